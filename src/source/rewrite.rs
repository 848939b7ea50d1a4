//! Retargeting a source package at another distribution.
//!
//! The package is unpacked, its top changelog entry rewritten to carry a
//! rebuild marker (`<version><suffix>+<n>`), the `Bugs:` contact replaced in
//! `debian/control`, and the tree packed again.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

use super::{dsc_file_name, SourcePackage};
use crate::config::MaintainerConfig;
use crate::debian::{deb822, Changelog, ChangelogEntry, RebuildMarker, Version};
use crate::error::PipelineError;
use crate::sandbox::{ExecOptions, Sandboxes, SessionOptions};

const UNPACK_DIR: &str = "source";
const REBUILD_URGENCY: &str = "low";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetargetRequest {
    /// Distribution written into the changelog.
    pub distribution: String,
    /// Version suffix such as `~bpo12`.
    pub suffix: String,
    /// Increment the counter of an existing rebuild marker.
    pub bump: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub version: Version,
    /// False when the changelog already described this rebuild.
    pub changelog_changed: bool,
}

/// Unpack `source` into `work_dir`, rewrite it for `request` and repack it.
///
/// `work_dir` must be below the sandbox scratch directory.
pub fn retarget(
    sandboxes: &Sandboxes<'_>,
    image: &str,
    work_dir: &Path,
    source: &SourcePackage,
    request: &RetargetRequest,
    maintainer: &MaintainerConfig,
) -> Result<SourcePackage> {
    let session = sandboxes.open(image, &SessionOptions::default())?;
    let in_work_dir = ExecOptions::default().cwd(work_dir);

    let tree = work_dir.join(UNPACK_DIR);
    session.execute(
        [
            "dpkg-source".to_string(),
            "-x".to_string(),
            source.dsc.display().to_string(),
            tree.display().to_string(),
        ],
        &in_work_dir,
    )?;

    let outcome = rewrite_tree(&tree, request, maintainer, &rfc2822_now()?)
        .with_context(|| format!("retargeting {} at {}", source.package, request.distribution))?;
    if outcome.changelog_changed {
        tracing::info!(
            "{} {} -> {} for {}",
            source.package,
            source.version,
            outcome.version,
            request.distribution
        );
    } else {
        tracing::info!(
            "{} {} already targets {}",
            source.package,
            outcome.version,
            request.distribution
        );
    }

    session.execute(["dpkg-source", "-b", UNPACK_DIR], &in_work_dir)?;
    session.close()?;

    let dsc = work_dir.join(dsc_file_name(&source.package, &outcome.version));
    SourcePackage::load(&dsc)
        .with_context(|| format!("loading retargeted '{}'", dsc.display()))
}

/// Rewrite the changelog and control file of an unpacked tree.
pub fn rewrite_tree(
    tree: &Path,
    request: &RetargetRequest,
    maintainer: &MaintainerConfig,
    date: &str,
) -> Result<RewriteOutcome> {
    let changelog_path = tree.join("debian/changelog");
    let text = fs::read_to_string(&changelog_path)
        .with_context(|| format!("reading '{}'", changelog_path.display()))?;
    let mut changelog = Changelog::parse(&text).map_err(|reason| PipelineError::Metadata {
        kind: "changelog",
        path: changelog_path.clone(),
        reason,
    })?;

    let top = changelog.top();
    top.parsed_version()?;

    let changelog_changed = match RebuildMarker::detect(&top.version) {
        Some(marker) => {
            let counter = if request.bump {
                marker.counter + 1
            } else {
                marker.counter
            };
            let version = marker.with_suffix(&request.suffix, counter);
            if version == top.version && top.distributions == request.distribution {
                false
            } else {
                let top = changelog.top_mut();
                top.set_version(&version);
                top.set_distributions(&request.distribution);
                true
            }
        }
        None => {
            let version = format!("{}{}+1", top.version, request.suffix);
            let mut entry = ChangelogEntry::new(
                &top.package,
                &version,
                &request.distribution,
                REBUILD_URGENCY,
                &maintainer.identity,
                date,
            );
            entry.add_change("");
            entry.add_change(&format!("  * Rebuild for {}.", request.distribution));
            entry.add_change("");
            changelog.push_front(entry);
            true
        }
    };

    let version = changelog.top().parsed_version()?;
    if changelog_changed {
        fs::write(&changelog_path, changelog.render())
            .with_context(|| format!("writing '{}'", changelog_path.display()))?;
    }

    set_bugs_contact(&tree.join("debian/control"), &maintainer.bugs)?;

    Ok(RewriteOutcome {
        version,
        changelog_changed,
    })
}

fn set_bugs_contact(control: &Path, bugs: &str) -> Result<()> {
    let text = fs::read_to_string(control)
        .with_context(|| format!("reading '{}'", control.display()))?;
    let mut paragraphs = deb822::parse(&text).map_err(|reason| PipelineError::Metadata {
        kind: "control file",
        path: control.to_path_buf(),
        reason,
    })?;
    for paragraph in &mut paragraphs {
        paragraph.set("Bugs", bugs);
    }
    let rendered = deb822::dump(&paragraphs);
    if rendered != text {
        fs::write(control, rendered)
            .with_context(|| format!("writing '{}'", control.display()))?;
    }
    Ok(())
}

fn rfc2822_now() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc2822)
        .context("formatting changelog date")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::classify;
    use crate::sandbox::testing::{Call, RecordingRuntime};
    use crate::sandbox::SandboxSettings;
    use crate::source::tests::{write_source_package, write_source_package_version};
    use std::path::PathBuf;
    use tempfile::TempDir;

    const DATE: &str = "Tue, 02 Jan 2024 08:30:00 +0000";

    const CHANGELOG: &str = "\
hello (1.0-1) unstable; urgency=medium

  * Initial release.

 -- Jane Doe <jane@example.org>  Mon, 01 Jan 2024 12:00:00 +0000
";

    const CONTROL: &str = "\
Source: hello
Maintainer: Jane Doe <jane@example.org>
Build-Depends: debhelper-compat (= 13)

Package: hello
Architecture: any
Description: greeter
 Prints a greeting.
";

    /// What `dpkg-source -x` of `hello_1.0-1` leaves in `tree`.
    pub(crate) fn write_unpacked_tree(tree: &Path) {
        fs::create_dir_all(tree.join("debian")).unwrap();
        fs::write(tree.join("debian/changelog"), CHANGELOG).unwrap();
        fs::write(tree.join("debian/control"), CONTROL).unwrap();
    }

    /// Fake runtime whose `dpkg-source -x` unpacks `hello_1.0-1` and whose
    /// `dpkg-source -b` packs `hello_<rebuilt>` in its working directory.
    pub(crate) fn unpacking_runtime(rebuilt: &'static str) -> RecordingRuntime {
        RecordingRuntime::new().on_exec(move |spec| {
            let argv: Vec<&str> = spec.argv.iter().map(String::as_str).collect();
            match argv.as_slice() {
                ["dpkg-source", "-x", _, tree] => write_unpacked_tree(Path::new(tree)),
                ["dpkg-source", "-b", _] => {
                    let dir = PathBuf::from(spec.workdir.clone().unwrap_or_default());
                    write_source_package_version(&dir, rebuilt);
                }
                _ => {}
            }
            Ok(())
        })
    }

    fn maintainer() -> MaintainerConfig {
        MaintainerConfig {
            identity: "Builder <builder@example.org>".to_string(),
            bugs: "mailto:Builder <bugs@example.org>".to_string(),
        }
    }

    fn request(distribution: &str, suffix: &str) -> RetargetRequest {
        RetargetRequest {
            distribution: distribution.to_string(),
            suffix: suffix.to_string(),
            bump: false,
        }
    }

    fn tree_with(changelog: &str) -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("debian")).unwrap();
        fs::write(temp.path().join("debian/changelog"), changelog).unwrap();
        fs::write(temp.path().join("debian/control"), CONTROL).unwrap();
        temp
    }

    fn read_changelog(tree: &Path) -> Changelog {
        Changelog::parse(&fs::read_to_string(tree.join("debian/changelog")).unwrap()).unwrap()
    }

    #[test]
    fn unmarked_version_gets_new_rebuild_entry() {
        let tree = tree_with(CHANGELOG);

        let outcome = rewrite_tree(tree.path(), &request("sid", "~bpo12"), &maintainer(), DATE).unwrap();

        assert!(outcome.changelog_changed);
        assert_eq!(outcome.version.to_string(), "1.0-1~bpo12+1");
        let changelog = read_changelog(tree.path());
        let top = changelog.top();
        assert_eq!(top.version, "1.0-1~bpo12+1");
        assert_eq!(top.distributions, "sid");
        assert_eq!(top.metadata, " urgency=low");
        assert_eq!(top.author, "Builder <builder@example.org>");
        assert_eq!(top.date, DATE);
        assert_eq!(top.changes, vec!["", "  * Rebuild for sid.", ""]);
        // The previous entry is kept verbatim below the new one.
        assert!(fs::read_to_string(tree.path().join("debian/changelog"))
            .unwrap()
            .ends_with(CHANGELOG));
    }

    #[test]
    fn second_rewrite_with_same_target_changes_nothing() {
        let tree = tree_with(CHANGELOG);
        rewrite_tree(tree.path(), &request("sid", "~bpo12"), &maintainer(), DATE).unwrap();
        let after_first = fs::read_to_string(tree.path().join("debian/changelog")).unwrap();
        let control_after_first = fs::read_to_string(tree.path().join("debian/control")).unwrap();

        let outcome =
            rewrite_tree(tree.path(), &request("sid", "~bpo12"), &maintainer(), "later").unwrap();

        assert!(!outcome.changelog_changed);
        assert_eq!(outcome.version.to_string(), "1.0-1~bpo12+1");
        assert_eq!(
            fs::read_to_string(tree.path().join("debian/changelog")).unwrap(),
            after_first
        );
        assert_eq!(
            fs::read_to_string(tree.path().join("debian/control")).unwrap(),
            control_after_first
        );
    }

    #[test]
    fn bump_increments_marker_counter() {
        let tree = tree_with(CHANGELOG);
        rewrite_tree(tree.path(), &request("sid", "~bpo12"), &maintainer(), DATE).unwrap();

        let mut bumped = request("sid", "~bpo12");
        bumped.bump = true;
        let outcome = rewrite_tree(tree.path(), &bumped, &maintainer(), DATE).unwrap();

        assert!(outcome.changelog_changed);
        assert_eq!(outcome.version.to_string(), "1.0-1~bpo12+2");
        let changelog = read_changelog(tree.path());
        assert_eq!(changelog.entries().len(), 2);
        assert!(outcome.version > Version::parse("1.0-1~bpo12+1").unwrap());
    }

    #[test]
    fn marked_version_is_retargeted_in_place() {
        let tree = tree_with(
            "\
hello (1.0-1~bpo11+3) bullseye-backports; urgency=medium

  * Rebuild for bullseye-backports.

 -- Jane Doe <jane@example.org>  Mon, 01 Jan 2024 12:00:00 +0000
",
        );

        let outcome =
            rewrite_tree(tree.path(), &request("stable", "~bpo12"), &maintainer(), DATE).unwrap();

        assert!(outcome.changelog_changed);
        let changelog = read_changelog(tree.path());
        assert_eq!(changelog.entries().len(), 1);
        assert_eq!(changelog.top().version, "1.0-1~bpo12+3");
        assert_eq!(changelog.top().distributions, "stable");
        assert_eq!(changelog.top().author, "Jane Doe <jane@example.org>");
    }

    #[test]
    fn plus_suffix_sorts_above_input_and_tilde_below() {
        let input = Version::parse("1.0-1").unwrap();

        let tree = tree_with(CHANGELOG);
        let plus = rewrite_tree(tree.path(), &request("stable", "+deb12u"), &maintainer(), DATE)
            .unwrap()
            .version;
        assert!(plus > input);

        let tree = tree_with(CHANGELOG);
        let tilde = rewrite_tree(tree.path(), &request("stable", "~bpo12"), &maintainer(), DATE)
            .unwrap()
            .version;
        assert!(tilde < input);
        assert!(tilde > Version::parse("1.0-0").unwrap());
    }

    #[test]
    fn bugs_contact_is_set_on_every_paragraph() {
        let tree = tree_with(CHANGELOG);
        rewrite_tree(tree.path(), &request("sid", "~bpo12"), &maintainer(), DATE).unwrap();

        let control = fs::read_to_string(tree.path().join("debian/control")).unwrap();
        let paragraphs = deb822::parse(&control).unwrap();
        assert_eq!(paragraphs.len(), 2);
        for paragraph in &paragraphs {
            assert_eq!(paragraph.get("Bugs"), Some("mailto:Builder <bugs@example.org>"));
        }
        assert_eq!(paragraphs[1].lines("Description"), vec!["Prints a greeting."]);
    }

    #[test]
    fn malformed_top_version_is_version_error() {
        let tree = tree_with(
            "hello (abc) unstable; urgency=low\n\n  * x\n\n -- A <a@b>  Mon, 01 Jan 2024 12:00:00 +0000\n",
        );

        let err = rewrite_tree(tree.path(), &request("sid", "~bpo12"), &maintainer(), DATE)
            .unwrap_err();
        assert!(matches!(classify(&err), Some(PipelineError::VersionParse { .. })));
    }

    #[test]
    fn retarget_unpacks_rewrites_and_loads_rebuilt_package() {
        let work = TempDir::new().unwrap();
        let source = SourcePackage::load(&write_source_package(work.path())).unwrap();
        let runtime = unpacking_runtime("1.0-1~bpo12+1");
        let sandboxes = Sandboxes::new(
            &runtime,
            SandboxSettings {
                scratch: PathBuf::from("/tmp"),
                userns: None,
                gnupg_home: None,
                default_user: "1000".to_string(),
            },
        );

        let retargeted = retarget(
            &sandboxes,
            "brianmay/debian-source:bookworm",
            work.path(),
            &source,
            &request("stable", "~bpo12"),
            &maintainer(),
        )
        .unwrap();

        assert_eq!(retargeted.version, "1.0-1~bpo12+1");
        assert_eq!(retargeted.dsc, work.path().join("hello_1.0-1~bpo12+1.dsc"));
        let changelog = read_changelog(&work.path().join("source"));
        assert_eq!(changelog.top().version, "1.0-1~bpo12+1");
        assert_eq!(changelog.top().distributions, "stable");

        let execs = runtime.execs();
        let work_dir = work.path().display().to_string();
        assert_eq!(execs.len(), 2);
        assert_eq!(
            execs[0].argv,
            vec![
                "dpkg-source".to_string(),
                "-x".to_string(),
                source.dsc.display().to_string(),
                work.path().join("source").display().to_string(),
            ]
        );
        assert_eq!(execs[1].argv, vec!["dpkg-source", "-b", "source"]);
        assert!(execs
            .iter()
            .all(|spec| spec.workdir.as_deref() == Some(work_dir.as_str())));
        assert_eq!(runtime.images(), vec!["brianmay/debian-source:bookworm"]);
        assert_eq!(runtime.count(|c| matches!(c, Call::Remove(_))), 1);
    }

    #[test]
    fn retarget_fails_when_repacked_version_is_missing() {
        let work = TempDir::new().unwrap();
        let source = SourcePackage::load(&write_source_package(work.path())).unwrap();
        // dpkg-source -b produced a package under some other version.
        let runtime = unpacking_runtime("1.0-1+b1");
        let sandboxes = Sandboxes::new(
            &runtime,
            SandboxSettings {
                scratch: PathBuf::from("/tmp"),
                userns: None,
                gnupg_home: None,
                default_user: "1000".to_string(),
            },
        );

        let err = retarget(
            &sandboxes,
            "brianmay/debian-source:sid",
            work.path(),
            &source,
            &request("unstable", "~bpo12"),
            &maintainer(),
        )
        .unwrap_err();

        assert!(err.to_string().starts_with("loading retargeted"));
        assert!(err.to_string().ends_with("hello_1.0-1~bpo12+1.dsc'"));
    }
}
