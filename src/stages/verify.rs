//! Test stage: installing the built packages into a clean sandbox.

use std::fmt;

use anyhow::Result;

use super::build::inject_extra_repo;
use crate::debian::ChangesArtifact;
use crate::sandbox::{ExecOptions, SandboxSession, Sandboxes, SessionOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TestMode {
    /// Skip testing.
    None,
    /// Install the packages and stop.
    #[default]
    Auto,
    /// Install the packages, then open a shell.
    Manual,
    /// Open a shell without installing anything.
    #[value(name = "manual_no_unpack")]
    ManualNoUnpack,
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TestMode::None => "none",
            TestMode::Auto => "auto",
            TestMode::Manual => "manual",
            TestMode::ManualNoUnpack => "manual_no_unpack",
        })
    }
}

pub fn test(
    sandboxes: &Sandboxes<'_>,
    image: &str,
    changes: &ChangesArtifact,
    mode: TestMode,
    extra_repo: Option<&str>,
) -> Result<()> {
    if mode == TestMode::None {
        tracing::info!("testing skipped");
        return Ok(());
    }

    let debs = changes.debs();
    if debs.is_empty() {
        // Source-only upload: nothing to install.
        if mode == TestMode::Auto {
            return Ok(());
        }
        let session = sandboxes.open(image, &SessionOptions::default())?;
        shell(&session, changes)?;
        return session.close();
    }

    let session = sandboxes.open(image, &SessionOptions::default())?;
    if mode == TestMode::ManualNoUnpack {
        shell(&session, changes)?;
        return session.close();
    }

    if let Some(line) = extra_repo {
        inject_extra_repo(&session, line)?;
    }
    session.execute(["apt-get", "update", "--yes"], &ExecOptions::root())?;
    session.execute(["apt-get", "upgrade", "--yes"], &ExecOptions::root())?;

    let mut unpack = vec!["dpkg".to_string(), "--unpack".to_string(), "--".to_string()];
    unpack.extend(debs.iter().map(|deb| deb.display().to_string()));
    session.execute(unpack, &ExecOptions::root())?;
    session.execute(
        [
            "apt-get",
            "--yes",
            "-f",
            "-oDpkg::Options::=--force-confold",
            "install",
        ],
        &ExecOptions::root(),
    )?;

    if mode == TestMode::Manual {
        shell(&session, changes)?;
    }
    session.close()
}

fn shell(session: &SandboxSession<'_>, changes: &ChangesArtifact) -> Result<()> {
    session.execute(["bash"], &ExecOptions::root().cwd(changes.dir()))
}
