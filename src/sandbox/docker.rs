//! [`ContainerRuntime`] backed by the `docker` (or CLI-compatible `podman`)
//! command line.

use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::Path;

use anyhow::{bail, Result};

use super::{ContainerRuntime, CreateSpec, ExecSpec};
use crate::process::Cmd;

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    program: String,
}

impl DockerRuntime {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    fn cmd(&self) -> Cmd {
        Cmd::new(&self.program)
    }

    fn create_args(spec: &CreateSpec) -> Vec<String> {
        let mut args = vec!["create".to_string(), "-t".to_string(), "-i".to_string()];
        for (host, container) in &spec.volumes {
            args.push("-v".to_string());
            args.push(format!("{}:{}", host.display(), container));
        }
        if let Some(userns) = &spec.userns {
            args.push(format!("--userns={userns}"));
        }
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(spec.image.clone());
        args
    }

    fn exec_args(id: &str, spec: &ExecSpec, tty: bool) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if tty {
            args.push("-t".to_string());
        }
        args.push("-i".to_string());
        args.push("--user".to_string());
        args.push(spec.user.clone());
        if let Some(dir) = &spec.workdir {
            args.push("--workdir".to_string());
            args.push(dir.clone());
        }
        args.push("-e".to_string());
        args.push(format!("USER={}", spec.user));
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(id.to_string());
        args.extend(spec.argv.iter().cloned());
        args
    }

    fn copy_out_args(id: &str, src: &str, host: &Path) -> Vec<OsString> {
        vec![
            "cp".into(),
            format!("{id}:{src}").into(),
            host.as_os_str().to_owned(),
        ]
    }
}

impl ContainerRuntime for DockerRuntime {
    fn create(&self, spec: &CreateSpec) -> Result<String> {
        let output = self
            .cmd()
            .args(Self::create_args(spec))
            .error_msg(format!("creating container from '{}'", spec.image))
            .run()?;
        let id = output.stdout.trim();
        if id.is_empty() {
            bail!("{} create printed no container id", self.program);
        }
        Ok(id.to_string())
    }

    fn start(&self, id: &str) -> Result<()> {
        self.cmd()
            .args(["start", id])
            .error_msg(format!("starting container {id}"))
            .run()?;
        Ok(())
    }

    fn exec(&self, id: &str, spec: &ExecSpec) -> Result<()> {
        let tty = std::io::stdin().is_terminal();
        self.cmd()
            .args(Self::exec_args(id, spec, tty))
            .run_interactive()
    }

    fn exec_output(&self, id: &str, spec: &ExecSpec) -> Result<String> {
        let output = self.cmd().args(Self::exec_args(id, spec, false)).run()?;
        Ok(output.stdout)
    }

    fn copy_in(&self, id: &str, host: &Path, dest: &str) -> Result<()> {
        self.cmd()
            .arg("cp")
            .arg_path(host)
            .arg(format!("{id}:{dest}"))
            .error_msg(format!("copying '{}' into container {id}", host.display()))
            .run()?;
        Ok(())
    }

    fn copy_out(&self, id: &str, src: &str, host: &Path) -> Result<()> {
        self.cmd()
            .args(Self::copy_out_args(id, src, host))
            .error_msg(format!("copying '{src}' out of container {id}"))
            .run()?;
        Ok(())
    }

    fn kill(&self, id: &str) -> Result<()> {
        self.cmd()
            .args(["kill", id])
            .error_msg(format!("killing container {id}"))
            .run()?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.cmd()
            .args(["rm", id])
            .error_msg(format!("removing container {id}"))
            .run()?;
        Ok(())
    }
}
