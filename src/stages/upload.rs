//! `dput` of a signed artifact.

use anyhow::Result;

use crate::debian::ChangesArtifact;
use crate::error::PipelineError;
use crate::sandbox::{ExecOptions, Sandboxes, SessionOptions};

pub const UNRELEASED: &str = "UNRELEASED";
pub const MAX_DELAYED: u8 = 15;

/// Refuse artifacts whose distribution is inconsistent or unreleased.
pub fn check_distribution(changes: &ChangesArtifact, expected: &str) -> Result<(), PipelineError> {
    let refuse = |reason: String| PipelineError::UploadAssertion {
        changes: changes.path.clone(),
        reason,
    };

    let changelog = changes
        .changelog_distribution()
        .ok_or_else(|| refuse("cannot read the changelog header in Changes".to_string()))?;
    if changelog != changes.distribution {
        return Err(refuse(format!(
            "changelog says '{changelog}' but Distribution is '{}'",
            changes.distribution
        )));
    }
    if changes.distribution == UNRELEASED {
        return Err(refuse(format!("distribution is {UNRELEASED}")));
    }
    if changes.distribution != expected {
        return Err(refuse(format!(
            "distribution is '{}', expected '{expected}'",
            changes.distribution
        )));
    }
    Ok(())
}

/// `dput [--delayed=N] <server> <changes>`.
///
/// `Some(0)` still goes through the delayed queue; `None` uploads directly.
pub fn upload(
    sandboxes: &Sandboxes<'_>,
    image: &str,
    server: &str,
    delayed: Option<u8>,
    changes: &ChangesArtifact,
    expected_distribution: &str,
) -> Result<()> {
    check_distribution(changes, expected_distribution)?;

    let mut argv = vec!["dput".to_string()];
    if let Some(days) = delayed {
        if days > MAX_DELAYED {
            anyhow::bail!("--delayed must be between 0 and {MAX_DELAYED}, got {days}");
        }
        argv.push(format!("--delayed={days}"));
    }
    argv.push(server.to_string());
    argv.push(changes.path.display().to_string());

    tracing::info!("uploading {} {} to {server}", changes.source, changes.version);
    let session = sandboxes.open(image, &SessionOptions::default())?;
    session.execute(argv, &ExecOptions::default())?;
    session.close()
}
