//! Binary (and source) build of one target.

use std::path::Path;

use anyhow::{bail, Result};

use super::EXTRA_REPO_LIST;
use crate::debian::changes::{self, ChangesArtifact};
use crate::sandbox::{ExecOptions, SandboxSession, Sandboxes, SessionOptions, ROOT_USER};

/// Which parts `dpkg-buildpackage` should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildSelection {
    pub source: bool,
    pub any: bool,
    pub all: bool,
}

impl BuildSelection {
    /// `--build=` argument, e.g. `--build=source,any,all`.
    pub fn build_arg(&self) -> Result<String> {
        let parts: Vec<&str> = [
            (self.source, "source"),
            (self.any, "any"),
            (self.all, "all"),
        ]
        .into_iter()
        .filter_map(|(wanted, name)| wanted.then_some(name))
        .collect();
        if parts.is_empty() {
            bail!("nothing to build");
        }
        Ok(format!("--build={}", parts.join(",")))
    }
}

/// Unpack `dsc` into `out_dir/source` inside a sandbox on `image` and build it.
///
/// Any failure drops the operator into a root shell in the build tree
/// before the error is returned. Returns the `.changes` file written to
/// `out_dir`, if the build produced one.
pub fn build(
    sandboxes: &Sandboxes<'_>,
    image: &str,
    dsc: &Path,
    out_dir: &Path,
    selection: BuildSelection,
    upload_distribution: &str,
    extra_repo: Option<&str>,
) -> Result<Option<ChangesArtifact>> {
    let build_arg = selection.build_arg()?;
    let tree = out_dir.join("source");

    let session = sandboxes.open(image, &SessionOptions::default())?;
    if let Some(line) = extra_repo {
        inject_extra_repo(&session, line)?;
    }

    let result = (|| -> Result<()> {
        let out = out_dir.display().to_string();
        let dsc_arg = dsc.display().to_string();
        let tree_arg = tree.display().to_string();
        session.execute(["mkdir", "-p", out.as_str()], &ExecOptions::default())?;
        session.execute(
            ["dpkg-source", "-x", dsc_arg.as_str(), tree_arg.as_str()],
            &ExecOptions::default().cwd(out_dir),
        )?;
        session.execute(["apt-get", "update", "--yes"], &ExecOptions::root())?;
        session.execute(["apt-get", "upgrade", "--yes"], &ExecOptions::root())?;
        session.execute(
            ["apt-get", "build-dep", "--yes", tree_arg.as_str()],
            &ExecOptions::root(),
        )?;
        session.execute(
            [
                "dpkg-buildpackage".to_string(),
                "--unsigned-source".to_string(),
                "--unsigned-changes".to_string(),
                format!("--changes-option=-DDistribution={upload_distribution}"),
                "-sa".to_string(),
                build_arg.clone(),
            ],
            &ExecOptions::default().cwd(&tree),
        )?;
        Ok(())
    })();
    diagnose_on_failure(&session, &tree, out_dir, result)?;
    session.close()?;

    match changes::find_single(out_dir)? {
        Some(path) => Ok(Some(ChangesArtifact::load(&path)?)),
        None => Ok(None),
    }
}

/// Write the extra apt source into the sandbox.
pub(crate) fn inject_extra_repo(session: &SandboxSession<'_>, line: &str) -> Result<()> {
    session.inject_file(EXTRA_REPO_LIST, Some(ROOT_USER), |f| {
        writeln!(f, "{line}")?;
        Ok(())
    })
}

/// On failure, open one root shell where the build was happening, then
/// hand back the original error.
fn diagnose_on_failure(
    session: &SandboxSession<'_>,
    tree: &Path,
    out_dir: &Path,
    result: Result<()>,
) -> Result<()> {
    let Err(err) = result else {
        return Ok(());
    };
    tracing::error!("build failed: {err:#}");
    tracing::warn!("starting a shell for inspection; exit it to continue");

    // The scratch mount makes the host view authoritative for what exists.
    let mut options = ExecOptions::root();
    if tree.is_dir() {
        options = options.cwd(tree);
    } else if out_dir.is_dir() {
        options = options.cwd(out_dir);
    }
    if let Err(shell_err) = session.execute(["bash"], &options) {
        tracing::warn!("inspection shell exited with an error: {shell_err:#}");
    }
    Err(err)
}
