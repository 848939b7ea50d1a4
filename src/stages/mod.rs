//! Per-target stage pipeline.
//!
//! ```text
//! Prepared -> Built -> Signed -> (Linted) -> Tested -> (Uploaded)
//! ```
//!
//! Each stage opens its own sandbox. A failing stage ends the target; the
//! error carries the target and the failing command.

pub mod build;
pub mod lint;
pub mod sign;
pub mod upload;
pub mod verify;

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};

use crate::debian::ChangesArtifact;
use crate::matrix::BuildTarget;
use crate::sandbox::Sandboxes;
use crate::source::SourcePackage;

pub use build::BuildSelection;
pub use sign::{OperatorPrompt, TerminalPrompt};
pub use verify::TestMode;

/// Where the extra apt source line is written inside sandboxes.
pub const EXTRA_REPO_LIST: &str = "/etc/apt/sources.list.d/extra_repo.list";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TargetState {
    Prepared,
    Built,
    Signed,
    Linted,
    Tested,
    Uploaded,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Run-wide stage settings.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub test_mode: TestMode,
    pub upload: bool,
    pub delayed: Option<u8>,
    pub extra_repo: Option<String>,
}

pub struct Pipeline<'a, 'r> {
    sandboxes: &'a Sandboxes<'r>,
    prompt: &'a dyn OperatorPrompt,
    options: &'a PipelineOptions,
}

impl<'a, 'r> Pipeline<'a, 'r> {
    pub fn new(
        sandboxes: &'a Sandboxes<'r>,
        prompt: &'a dyn OperatorPrompt,
        options: &'a PipelineOptions,
    ) -> Self {
        Self {
            sandboxes,
            prompt,
            options,
        }
    }

    /// Build `source` for `target` below `work_dir` and take the result as
    /// far through the stages as the target and options ask for.
    pub fn run(
        &self,
        target: &BuildTarget,
        source: &SourcePackage,
        work_dir: &Path,
    ) -> Result<Option<ChangesArtifact>> {
        let span = tracing::info_span!(
            "target",
            distribution = %target.distribution,
            arch = %target.arch
        );
        let _enter = span.enter();

        self.run_stages(target, source, work_dir)
            .with_context(|| format!("target {}/{}", target.distribution, target.arch))
    }

    fn run_stages(
        &self,
        target: &BuildTarget,
        source: &SourcePackage,
        work_dir: &Path,
    ) -> Result<Option<ChangesArtifact>> {
        let mut state = TargetState::Prepared;
        tracing::info!(image = %target.image, "{state}");

        let out_dir = work_dir.join("build").join(&target.arch);
        let built = build::build(
            self.sandboxes,
            &target.image,
            &source.dsc,
            &out_dir,
            target.selection(),
            &target.upload_distribution,
            self.options.extra_repo.as_deref(),
        )
        .context("build")?;
        let Some(changes) = built else {
            tracing::warn!("build produced no .changes file");
            return Ok(None);
        };
        advance(&mut state, TargetState::Built);

        sign::sign(self.sandboxes, &target.image, &changes, self.prompt).context("sign")?;
        advance(&mut state, TargetState::Signed);

        if target.lint {
            lint::lint(self.sandboxes, &target.image, &changes).context("lint")?;
            advance(&mut state, TargetState::Linted);
        }

        verify::test(
            self.sandboxes,
            &target.image,
            &changes,
            self.options.test_mode,
            self.options.extra_repo.as_deref(),
        )
        .context("test")?;
        advance(&mut state, TargetState::Tested);

        if self.options.upload && target.authoritative_upload {
            upload::upload(
                self.sandboxes,
                &target.image,
                &target.server,
                self.options.delayed,
                &changes,
                &target.upload_distribution,
            )
            .context("upload")?;
            advance(&mut state, TargetState::Uploaded);
        }

        Ok(Some(changes))
    }
}

fn advance(state: &mut TargetState, next: TargetState) {
    debug_assert!(next > *state);
    tracing::info!("{state} -> {next}");
    *state = next;
}
