//! Debian source packages: the `.dsc` descriptor and the files it lists.
//!
//! A [`SourcePackage`] is either built from a working tree
//! ([`build_from_tree`]) or loaded from an existing `.dsc`. Each
//! distribution of a run gets its own copy ([`copy_descriptor`]); the copy
//! is what gets rewritten and built, never the original.

pub mod rewrite;

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

use crate::debian::{deb822, Changelog, Version};
use crate::error::PipelineError;
use crate::sandbox::{ExecOptions, Sandboxes, SessionOptions};

/// Where a working tree's parent directory is mounted for source builds.
const TREE_MOUNT: &str = "/build";

/// One entry of the `.dsc` `Files:` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DscFile {
    pub name: String,
    pub size: u64,
    pub md5: String,
    /// From `Checksums-Sha256:`, when the descriptor carries it.
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePackage {
    pub package: String,
    pub version: String,
    pub dsc: PathBuf,
    pub files: Vec<DscFile>,
}

impl SourcePackage {
    /// Load a `.dsc` and check that every file it lists is next to it.
    pub fn load(dsc: &Path) -> Result<Self> {
        let text = fs::read_to_string(dsc)
            .with_context(|| format!("reading source descriptor '{}'", dsc.display()))?;
        let malformed = |reason: String| PipelineError::Metadata {
            kind: "source descriptor",
            path: dsc.to_path_buf(),
            reason,
        };

        let paragraphs = deb822::parse(&text).map_err(malformed)?;
        let paragraph = paragraphs
            .first()
            .ok_or_else(|| malformed("no paragraphs".to_string()))?;
        let package = paragraph
            .get("Source")
            .ok_or_else(|| malformed("missing field 'Source'".to_string()))?
            .to_string();
        let version = paragraph
            .get("Version")
            .ok_or_else(|| malformed("missing field 'Version'".to_string()))?
            .to_string();

        let sha256: Vec<(String, String)> = paragraph
            .lines("Checksums-Sha256")
            .into_iter()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let sum = parts.next()?;
                let name = parts.nth(1)?;
                Some((name.to_string(), sum.to_string()))
            })
            .collect();

        let mut files = Vec::new();
        for line in paragraph.lines("Files") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let [md5, size, name] = parts[..] else {
                return Err(malformed(format!("bad Files line '{line}'")).into());
            };
            let size = size
                .parse()
                .map_err(|_| malformed(format!("bad size in Files line '{line}'")))?;
            files.push(DscFile {
                name: name.to_string(),
                size,
                md5: md5.to_string(),
                sha256: sha256
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, sum)| sum.clone()),
            });
        }
        if files.is_empty() {
            return Err(malformed("no files listed".to_string()).into());
        }

        let source = Self {
            package,
            version,
            dsc: dsc.to_path_buf(),
            files,
        };
        for file in &source.files {
            let path = source.dir().join(&file.name);
            if !path.is_file() {
                bail!(
                    "'{}' lists '{}', which does not exist",
                    dsc.display(),
                    path.display()
                );
            }
        }
        Ok(source)
    }

    pub fn dir(&self) -> &Path {
        self.dsc.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// `<package>_<version without epoch>.dsc`
pub fn dsc_file_name(package: &str, version: &Version) -> String {
    format!("{package}_{}.dsc", version.without_epoch())
}

/// Build a source package from an unpacked tree.
///
/// Trees under git are built with `gbp buildpackage`, anything else with
/// `dpkg-source -b`. The `.dsc` lands next to the tree.
pub fn build_from_tree(sandboxes: &Sandboxes<'_>, image: &str, tree: &Path) -> Result<SourcePackage> {
    let tree = fs::canonicalize(tree)
        .with_context(|| format!("resolving working tree '{}'", tree.display()))?;
    let (Some(parent), Some(name)) = (tree.parent(), tree.file_name()) else {
        bail!("working tree '{}' has no parent directory", tree.display());
    };
    let name = name.to_string_lossy().into_owned();

    let changelog_path = tree.join("debian/changelog");
    let text = fs::read_to_string(&changelog_path)
        .with_context(|| format!("reading '{}'", changelog_path.display()))?;
    let changelog = Changelog::parse(&text).map_err(|reason| PipelineError::Metadata {
        kind: "changelog",
        path: changelog_path.clone(),
        reason,
    })?;
    let version = changelog.top().parsed_version()?;

    match fs::remove_file(tree.join("debian/files")) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).context("removing stale debian/files");
        }
    }

    let session = sandboxes.open(image, &SessionOptions::with_volume(parent, TREE_MOUNT))?;
    let mount = format!("{TREE_MOUNT}/{name}");
    if tree.join(".git").is_dir() {
        tracing::info!("building source package from git tree '{}'", tree.display());
        session.execute(
            [
                "gbp",
                "buildpackage",
                "--git-builder=debuild",
                "--no-lintian",
                "-i",
                "-I",
                "-S",
                "-nc",
                "-uc",
                "-us",
                "--no-check-builddeps",
            ],
            &ExecOptions::default().cwd(&mount),
        )?;
    } else {
        tracing::info!("building source package from tree '{}'", tree.display());
        session.execute(
            ["dpkg-source", "-b", name.as_str()],
            &ExecOptions::default().cwd(TREE_MOUNT),
        )?;
    }
    session.close()?;

    let dsc = parent.join(dsc_file_name(changelog.package(), &version));
    SourcePackage::load(&dsc)
        .with_context(|| format!("loading freshly built '{}'", dsc.display()))
}

/// Copy the `.dsc` and every file it lists into `dest_dir`, verifying
/// SHA-256 sums where the descriptor has them.
pub fn copy_descriptor(source: &SourcePackage, dest_dir: &Path) -> Result<SourcePackage> {
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("creating '{}'", dest_dir.display()))?;

    for file in &source.files {
        let src = source.dir().join(&file.name);
        let dst = dest_dir.join(&file.name);
        fs::copy(&src, &dst)
            .with_context(|| format!("copying '{}' to '{}'", src.display(), dst.display()))?;

        let (actual, size) = sha256_file(&dst)?;
        if size != file.size {
            bail!(
                "'{}' is {size} bytes, descriptor says {}",
                dst.display(),
                file.size
            );
        }
        if let Some(expected) = &file.sha256 {
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(PipelineError::ChecksumMismatch {
                    path: dst,
                    expected: expected.clone(),
                    actual,
                }
                .into());
            }
        }
    }

    let dsc_name = source
        .dsc
        .file_name()
        .with_context(|| format!("descriptor path '{}' has no file name", source.dsc.display()))?;
    let dsc = dest_dir.join(dsc_name);
    fs::copy(&source.dsc, &dsc)
        .with_context(|| format!("copying '{}'", source.dsc.display()))?;

    tracing::debug!("copied {} into '{}'", source.package, dest_dir.display());
    Ok(SourcePackage {
        dsc,
        ..source.clone()
    })
}

fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}
