//! Signing a `.changes` file with the caller's key.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

use crate::debian::ChangesArtifact;
use crate::error::PipelineError;
use crate::sandbox::{ExecOptions, Sandboxes, SessionOptions};

pub const RETRY_MESSAGE: &str = "Press enter to try signing again.";

/// Blocks until the operator acknowledges `message`.
pub trait OperatorPrompt {
    fn confirm(&self, message: &str) -> Result<()>;
}

/// Prompt on stderr, wait for a line on stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl OperatorPrompt for TerminalPrompt {
    fn confirm(&self, message: &str) -> Result<()> {
        let mut stderr = io::stderr();
        writeln!(stderr, "{message}")?;
        stderr.flush()?;
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("waiting for operator")?;
        Ok(())
    }
}

/// `debsign` the artifact in a sandbox with the GnuPG home forwarded.
/// One failure is retried after the operator confirms.
pub fn sign(
    sandboxes: &Sandboxes<'_>,
    image: &str,
    changes: &ChangesArtifact,
    prompt: &dyn OperatorPrompt,
) -> Result<()> {
    let session = sandboxes.open(image, &SessionOptions::gpg())?;
    let path = changes.path.display().to_string();
    let argv = ["debsign", path.as_str()];

    if let Err(err) = session.execute(argv, &ExecOptions::default()) {
        tracing::warn!("signing failed: {err:#}");
        prompt.confirm(RETRY_MESSAGE)?;
        session
            .execute(argv, &ExecOptions::default())
            .map_err(|err| {
                tracing::error!("signing failed again: {err:#}");
                PipelineError::SigningFailed {
                    changes: changes.path.clone(),
                }
            })?;
    }
    session.close()
}
