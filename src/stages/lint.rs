//! lintian run against a built artifact.

use anyhow::Result;

use crate::debian::ChangesArtifact;
use crate::sandbox::{ExecOptions, Sandboxes, SessionOptions};

pub fn lint(sandboxes: &Sandboxes<'_>, image: &str, changes: &ChangesArtifact) -> Result<()> {
    let session = sandboxes.open(image, &SessionOptions::default())?;
    session.execute(["apt-get", "update", "--yes"], &ExecOptions::root())?;
    session.execute(["apt-get", "upgrade", "--yes"], &ExecOptions::root())?;
    session.execute(
        [
            "apt-get",
            "--yes",
            "-oDpkg::Options::=--force-confold",
            "install",
            "lintian",
        ],
        &ExecOptions::root(),
    )?;
    let path = changes.path.display().to_string();
    session.execute(["lintian", path.as_str()], &ExecOptions::default())?;
    session.close()
}
