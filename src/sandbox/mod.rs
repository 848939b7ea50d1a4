//! Throwaway container sessions.
//!
//! Every packaging step runs inside a [`SandboxSession`]: a container created
//! and started from an image when the session opens, and killed and removed
//! when the session is dropped. Sessions are never shared between stages.
//!
//! ```text
//! Sandboxes (runtime + settings)
//!     │
//!     └── open(image, options) ──> SandboxSession
//!                                     ├── execute / execute_output
//!                                     ├── inject_file
//!                                     ├── extract_files
//!                                     └── close / Drop  (kill + rm, exactly once)
//! ```
//!
//! The scratch directory (`/tmp` by default) is mounted at the same path in
//! every container, so host paths below it are valid inside too.

pub mod docker;

#[cfg(test)]
pub(crate) mod testing;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use nix::unistd::getuid;
use tempfile::NamedTempFile;

use crate::config::Config;
use crate::error::PipelineError;

pub use docker::DockerRuntime;

pub const ROOT_USER: &str = "root";

/// Arguments for creating a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSpec {
    pub image: String,
    /// `(host path, container path)` bind mounts.
    pub volumes: Vec<(PathBuf, String)>,
    pub env: Vec<(String, String)>,
    pub userns: Option<String>,
}

/// One command to execute inside a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub argv: Vec<String>,
    pub user: String,
    pub workdir: Option<String>,
    pub env: Vec<(String, String)>,
}

/// The external container runtime, one method per CLI verb.
pub trait ContainerRuntime {
    /// Create a container and return its id.
    fn create(&self, spec: &CreateSpec) -> Result<String>;
    fn start(&self, id: &str) -> Result<()>;
    /// Run a command with output streamed to the terminal.
    fn exec(&self, id: &str, spec: &ExecSpec) -> Result<()>;
    /// Run a command and capture its stdout.
    fn exec_output(&self, id: &str, spec: &ExecSpec) -> Result<String>;
    fn copy_in(&self, id: &str, host: &Path, dest: &str) -> Result<()>;
    fn copy_out(&self, id: &str, src: &str, host: &Path) -> Result<()>;
    fn kill(&self, id: &str) -> Result<()>;
    fn remove(&self, id: &str) -> Result<()>;
}

/// Per-session options.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Mount the caller's GnuPG home read/write and export `GNUPGHOME`.
    pub gpg_forwarding: bool,
    /// One extra `(host path, container path)` bind mount.
    pub extra_volume: Option<(PathBuf, String)>,
}

impl SessionOptions {
    pub fn gpg() -> Self {
        Self {
            gpg_forwarding: true,
            ..Self::default()
        }
    }

    pub fn with_volume(host: &Path, container: &str) -> Self {
        Self {
            extra_volume: Some((host.to_path_buf(), container.to_string())),
            ..Self::default()
        }
    }
}

/// Per-command options.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub user: Option<String>,
    /// Overrides `user` with `root`.
    pub as_root: bool,
    pub working_dir: Option<String>,
    pub env: Vec<(String, String)>,
}

impl ExecOptions {
    pub fn root() -> Self {
        Self {
            as_root: true,
            ..Self::default()
        }
    }

    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().display().to_string());
        self
    }

    pub fn user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }
}

/// Settings shared by every session of a run.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub scratch: PathBuf,
    pub userns: Option<String>,
    pub gnupg_home: Option<PathBuf>,
    /// User commands run as unless overridden; the caller's uid by default.
    pub default_user: String,
}

impl SandboxSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scratch: config.sandbox.scratch.clone(),
            userns: config.sandbox.userns.clone(),
            gnupg_home: config.gnupg_home(),
            default_user: getuid().to_string(),
        }
    }
}

/// Opens sessions against one runtime with one set of settings.
pub struct Sandboxes<'r> {
    runtime: &'r dyn ContainerRuntime,
    settings: SandboxSettings,
}

impl<'r> Sandboxes<'r> {
    pub fn new(runtime: &'r dyn ContainerRuntime, settings: SandboxSettings) -> Self {
        Self { runtime, settings }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn open(&self, image: &str, options: &SessionOptions) -> Result<SandboxSession<'r>> {
        SandboxSession::open(self.runtime, &self.settings, image, options)
    }
}

/// A running container, torn down exactly once when closed or dropped.
pub struct SandboxSession<'r> {
    runtime: &'r dyn ContainerRuntime,
    id: String,
    image: String,
    default_user: String,
    closed: bool,
}

impl<'r> SandboxSession<'r> {
    pub fn open(
        runtime: &'r dyn ContainerRuntime,
        settings: &SandboxSettings,
        image: &str,
        options: &SessionOptions,
    ) -> Result<Self> {
        let start_error = |reason: String| PipelineError::SandboxStart {
            image: image.to_string(),
            reason,
        };

        let mut spec = CreateSpec {
            image: image.to_string(),
            volumes: vec![(
                settings.scratch.clone(),
                settings.scratch.display().to_string(),
            )],
            env: Vec::new(),
            userns: settings.userns.clone(),
        };
        if options.gpg_forwarding {
            let Some(gnupg_home) = &settings.gnupg_home else {
                bail!(start_error(
                    "GnuPG forwarding requested but no GnuPG home could be determined".to_string()
                ));
            };
            let path = gnupg_home.display().to_string();
            spec.volumes.push((gnupg_home.clone(), path.clone()));
            spec.env.push(("GNUPGHOME".to_string(), path));
        }
        if let Some((host, container)) = &options.extra_volume {
            spec.volumes.push((host.clone(), container.clone()));
        }

        let id = runtime
            .create(&spec)
            .map_err(|err| start_error(format!("{err:#}")))?;

        // From here on the session owns the container; dropping it on the
        // error path below tears the half-started container down.
        let session = Self {
            runtime,
            id,
            image: image.to_string(),
            default_user: settings.default_user.clone(),
            closed: false,
        };
        runtime
            .start(&session.id)
            .map_err(|err| start_error(format!("{err:#}")))?;

        tracing::debug!(image, id = %session.id, "sandbox started");
        Ok(session)
    }

    fn exec_spec<I, S>(&self, argv: I, options: &ExecOptions) -> ExecSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let user = if options.as_root {
            ROOT_USER.to_string()
        } else {
            options
                .user
                .clone()
                .unwrap_or_else(|| self.default_user.clone())
        };
        ExecSpec {
            argv: argv.into_iter().map(Into::into).collect(),
            user,
            workdir: options.working_dir.clone(),
            env: options.env.clone(),
        }
    }

    /// Run a command, output streamed to the terminal.
    pub fn execute<I, S>(&self, argv: I, options: &ExecOptions) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = self.exec_spec(argv, options);
        tracing::info!(user = %spec.user, "{}", spec.argv.join(" "));
        self.runtime
            .exec(&self.id, &spec)
            .with_context(|| format!("running '{}' in {}", spec.argv.join(" "), self.image))
    }

    /// Run a command and return its stdout.
    pub fn execute_output<I, S>(&self, argv: I, options: &ExecOptions) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = self.exec_spec(argv, options);
        tracing::debug!(user = %spec.user, "{}", spec.argv.join(" "));
        self.runtime
            .exec_output(&self.id, &spec)
            .with_context(|| format!("running '{}' in {}", spec.argv.join(" "), self.image))
    }

    /// Write a file into the container at `dest`.
    ///
    /// `write` fills a host-side temporary file; whatever it wrote is copied
    /// in afterwards even if it failed part way. An error from `write` wins
    /// over a copy error.
    pub fn inject_file<F>(&self, dest: &str, user: Option<&str>, write: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        let mut tmp = NamedTempFile::new().context("creating temporary file for injection")?;
        let written = write(tmp.as_file_mut());
        let copied = tmp
            .as_file_mut()
            .flush()
            .context("flushing injected file")
            .and_then(|()| self.runtime.copy_in(&self.id, tmp.path(), dest))
            .and_then(|()| match user {
                Some(user) if user != ROOT_USER => self.execute(
                    ["chown", user, dest],
                    &ExecOptions::root(),
                ),
                _ => Ok(()),
            })
            .with_context(|| format!("injecting '{dest}' into {}", self.image));
        written?;
        copied
    }

    /// Copy `src` out of the container to `host_dest`.
    pub fn extract_files(&self, src: &str, host_dest: &Path) -> Result<()> {
        self.runtime
            .copy_out(&self.id, src, host_dest)
            .with_context(|| format!("extracting '{src}' from {}", self.image))
    }

    /// Tear down now and report failures.
    pub fn close(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let killed = self.runtime.kill(&self.id);
        if let Err(err) = &killed {
            tracing::warn!(id = %self.id, "failed to stop sandbox: {err:#}");
        }
        let removed = self.runtime.remove(&self.id);
        if let Err(err) = &removed {
            tracing::warn!(id = %self.id, "failed to remove sandbox: {err:#}");
        }
        tracing::debug!(id = %self.id, "sandbox removed");
        killed.and(removed)
    }
}

impl Drop for SandboxSession<'_> {
    fn drop(&mut self) {
        // Failures were already logged; there is nowhere to report them.
        let _ = self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Call, RecordingRuntime};
    use super::*;
    use crate::error::classify;

    fn settings() -> SandboxSettings {
        SandboxSettings {
            scratch: PathBuf::from("/tmp"),
            userns: None,
            gnupg_home: Some(PathBuf::from("/home/me/.gnupg")),
            default_user: "1000".to_string(),
        }
    }

    #[test]
    fn session_is_torn_down_once_after_failed_execute() {
        let runtime = RecordingRuntime::new().failing("false");
        let sandboxes = Sandboxes::new(&runtime, settings());

        {
            let session = sandboxes.open("img", &SessionOptions::default()).unwrap();
            session.execute(["true"], &ExecOptions::default()).unwrap();
            assert!(session.execute(["false"], &ExecOptions::default()).is_err());
            session.execute(["true"], &ExecOptions::root()).unwrap();
        }

        assert_eq!(runtime.count(|c| matches!(c, Call::Create(_))), 1);
        assert_eq!(runtime.count(|c| matches!(c, Call::Kill(_))), 1);
        assert_eq!(runtime.count(|c| matches!(c, Call::Remove(_))), 1);
        assert!(matches!(runtime.calls().last(), Some(Call::Remove(_))));
    }

    #[test]
    fn explicit_close_does_not_tear_down_twice() {
        let runtime = RecordingRuntime::new();
        let sandboxes = Sandboxes::new(&runtime, settings());

        let session = sandboxes.open("img", &SessionOptions::default()).unwrap();
        session.close().unwrap();

        assert_eq!(runtime.count(|c| matches!(c, Call::Kill(_))), 1);
        assert_eq!(runtime.count(|c| matches!(c, Call::Remove(_))), 1);
    }

    #[test]
    fn failed_start_still_removes_container() {
        let runtime = RecordingRuntime::new().failing_start();
        let sandboxes = Sandboxes::new(&runtime, settings());

        let err = sandboxes
            .open("img", &SessionOptions::default())
            .err()
            .unwrap();
        assert!(matches!(classify(&err), Some(PipelineError::SandboxStart { .. })));
        assert_eq!(runtime.count(|c| matches!(c, Call::Kill(_))), 1);
        assert_eq!(runtime.count(|c| matches!(c, Call::Remove(_))), 1);
    }

    #[test]
    fn failed_create_has_nothing_to_tear_down() {
        let runtime = RecordingRuntime::new().failing_create();
        let sandboxes = Sandboxes::new(&runtime, settings());

        assert!(sandboxes.open("img", &SessionOptions::default()).is_err());
        assert_eq!(runtime.count(|c| matches!(c, Call::Kill(_) | Call::Remove(_))), 0);
    }

    #[test]
    fn teardown_failure_is_reported_by_close() {
        let runtime = RecordingRuntime::new().failing_kill();
        let sandboxes = Sandboxes::new(&runtime, settings());

        let session = sandboxes.open("img", &SessionOptions::default()).unwrap();
        assert!(session.close().is_err());
        assert_eq!(runtime.count(|c| matches!(c, Call::Remove(_))), 1);
    }

    #[test]
    fn mounts_scratch_gpg_and_extra_volume() {
        let runtime = RecordingRuntime::new();
        let sandboxes = Sandboxes::new(&runtime, settings());

        let mut options = SessionOptions::with_volume(Path::new("/home/me/src"), "/build");
        options.gpg_forwarding = true;
        drop(sandboxes.open("img", &options).unwrap());

        let Some(Call::Create(spec)) = runtime.calls().first().cloned() else {
            panic!("first call should be create");
        };
        assert_eq!(
            spec.volumes,
            vec![
                (PathBuf::from("/tmp"), "/tmp".to_string()),
                (PathBuf::from("/home/me/.gnupg"), "/home/me/.gnupg".to_string()),
                (PathBuf::from("/home/me/src"), "/build".to_string()),
            ]
        );
        assert_eq!(
            spec.env,
            vec![("GNUPGHOME".to_string(), "/home/me/.gnupg".to_string())]
        );
    }

    #[test]
    fn exec_user_defaults_to_caller_and_root_overrides() {
        let runtime = RecordingRuntime::new();
        let sandboxes = Sandboxes::new(&runtime, settings());
        let session = sandboxes.open("img", &SessionOptions::default()).unwrap();

        session.execute(["id"], &ExecOptions::default()).unwrap();
        session
            .execute(["id"], &ExecOptions::default().user("builder"))
            .unwrap();
        session
            .execute(["id"], &ExecOptions::root().user("builder").cwd("/tmp/x"))
            .unwrap();
        drop(session);

        let execs = runtime.execs();
        assert_eq!(execs[0].user, "1000");
        assert_eq!(execs[1].user, "builder");
        assert_eq!(execs[2].user, "root");
        assert_eq!(execs[2].workdir.as_deref(), Some("/tmp/x"));
    }

    #[test]
    fn inject_file_copies_content_and_chowns() {
        let runtime = RecordingRuntime::new();
        let sandboxes = Sandboxes::new(&runtime, settings());
        let session = sandboxes.open("img", &SessionOptions::default()).unwrap();

        session
            .inject_file("/etc/motd", Some("builder"), |f| {
                f.write_all(b"hello\n")?;
                Ok(())
            })
            .unwrap();
        drop(session);

        assert!(runtime
            .calls()
            .iter()
            .any(|c| matches!(c, Call::CopyIn { dest, content, .. } if dest == "/etc/motd" && content == "hello\n")));
        assert_eq!(runtime.execs()[0].argv, vec!["chown", "builder", "/etc/motd"]);
    }

    #[test]
    fn inject_file_copies_partial_content_and_returns_writer_error() {
        let runtime = RecordingRuntime::new();
        let sandboxes = Sandboxes::new(&runtime, settings());
        let session = sandboxes.open("img", &SessionOptions::default()).unwrap();

        let result = session.inject_file("/etc/partial", None, |f| {
            f.write_all(b"half")?;
            anyhow::bail!("writer gave up")
        });
        drop(session);

        assert!(result.unwrap_err().to_string().contains("writer gave up"));
        assert!(runtime
            .calls()
            .iter()
            .any(|c| matches!(c, Call::CopyIn { content, .. } if content == "half")));
    }

    #[test]
    fn extract_files_copies_container_path_to_host() {
        let runtime = RecordingRuntime::new();
        let sandboxes = Sandboxes::new(&runtime, settings());
        let session = sandboxes.open("img", &SessionOptions::default()).unwrap();

        session
            .extract_files("/tmp/build/hello.deb", Path::new("/srv/out"))
            .unwrap();
        drop(session);

        assert!(runtime.calls().contains(&Call::CopyOut {
            id: "container1".to_string(),
            src: "/tmp/build/hello.deb".to_string(),
            host: PathBuf::from("/srv/out"),
        }));
    }

    #[test]
    fn failed_extract_is_reported_and_session_still_torn_down() {
        let runtime = RecordingRuntime::new().failing_copy_out();
        let sandboxes = Sandboxes::new(&runtime, settings());
        let session = sandboxes.open("img", &SessionOptions::default()).unwrap();

        let err = session
            .extract_files("/tmp/build/missing", Path::new("/srv/out"))
            .unwrap_err();
        drop(session);

        assert_eq!(err.to_string(), "extracting '/tmp/build/missing' from img");
        assert!(format!("{err:#}").contains("container1:/tmp/build/missing"));
        assert_eq!(runtime.count(|c| matches!(c, Call::Remove(_))), 1);
    }

    #[test]
    fn execute_output_returns_stdout_as_chosen_user() {
        let runtime = RecordingRuntime::new().output("dpkg", "amd64\n");
        let sandboxes = Sandboxes::new(&runtime, settings());
        let session = sandboxes.open("img", &SessionOptions::default()).unwrap();

        let arch = session
            .execute_output(["dpkg", "--print-architecture"], &ExecOptions::default())
            .unwrap();
        drop(session);

        assert_eq!(arch, "amd64\n");
        assert!(matches!(
            &runtime.calls()[2],
            Call::ExecOutput(spec) if spec.user == "1000" && spec.argv == ["dpkg", "--print-architecture"]
        ));
    }

    #[test]
    fn failed_execute_output_is_command_failure() {
        let runtime = RecordingRuntime::new().failing("dpkg");
        let sandboxes = Sandboxes::new(&runtime, settings());
        let session = sandboxes.open("img", &SessionOptions::default()).unwrap();

        let err = session
            .execute_output(["dpkg", "--print-architecture"], &ExecOptions::root())
            .unwrap_err();

        assert!(matches!(
            classify(&err),
            Some(PipelineError::CommandFailed { exit_code: Some(1), .. })
        ));
    }

    #[test]
    fn default_user_is_the_callers_uid() {
        let settings = SandboxSettings::from_config(&Config::default());
        assert_eq!(settings.default_user, getuid().as_raw().to_string());
    }
}
