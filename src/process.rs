//! Thin builder over `std::process::Command`.
//!
//! Every external program goes through [`Cmd`] so the command line is logged
//! once at debug level and a non-zero exit always surfaces as
//! [`PipelineError::CommandFailed`] with the rendered command attached.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

use crate::error::PipelineError;

/// Captured output of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CmdResult {
    pub stdout: String,
}

#[derive(Debug, Clone)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    dir: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
            envs: Vec::new(),
            error_msg: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_owned());
        self
    }

    pub fn dir(mut self, dir: &Path) -> Self {
        self.dir = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Message prepended to the error when the command cannot run or fails.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Render the command line the way a shell user would type it.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    fn wrap<T>(&self, result: Result<T>) -> Result<T> {
        match &self.error_msg {
            Some(msg) => result.context(msg.clone()),
            None => result,
        }
    }

    /// Run with captured output; stderr is only logged, on failure.
    pub fn run(self) -> Result<CmdResult> {
        let rendered = self.display();
        tracing::debug!("{rendered}");

        let result = (|| -> Result<CmdResult> {
            let output = self
                .command()
                .stdin(Stdio::null())
                .output()
                .with_context(|| format!("spawning '{rendered}'"))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    tracing::debug!("stderr: {}", stderr.trim());
                }
                return Err(PipelineError::CommandFailed {
                    command: rendered.clone(),
                    exit_code: output.status.code(),
                }
                .into());
            }

            Ok(CmdResult {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            })
        })();
        self.wrap(result)
    }

    /// Run attached to the current terminal, streaming output as it comes.
    pub fn run_interactive(self) -> Result<()> {
        let rendered = self.display();
        tracing::debug!("{rendered}");

        let result = (|| -> Result<()> {
            let status = self
                .command()
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .with_context(|| format!("spawning '{rendered}'"))?;

            if !status.success() {
                return Err(PipelineError::CommandFailed {
                    command: rendered.clone(),
                    exit_code: status.code(),
                }
                .into());
            }
            Ok(())
        })();
        self.wrap(result)
    }
}
