//! In-memory [`ContainerRuntime`] that records every call.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use super::{ContainerRuntime, CreateSpec, ExecSpec};
use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Create(CreateSpec),
    Start(String),
    Exec(ExecSpec),
    ExecOutput(ExecSpec),
    CopyIn {
        id: String,
        dest: String,
        content: String,
    },
    CopyOut {
        id: String,
        src: String,
        host: PathBuf,
    },
    Kill(String),
    Remove(String),
}

type ExecHook = Box<dyn Fn(&ExecSpec) -> Result<()>>;

#[derive(Default)]
pub(crate) struct RecordingRuntime {
    calls: RefCell<Vec<Call>>,
    next_id: Cell<u32>,
    fail_create: bool,
    fail_start: bool,
    fail_kill: bool,
    fail_copy_out: bool,
    /// Program name -> remaining failures.
    failures: RefCell<HashMap<String, usize>>,
    outputs: HashMap<String, String>,
    hooks: Vec<ExecHook>,
}

impl RecordingRuntime {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every exec of `program` exits 1.
    pub(crate) fn failing(self, program: &str) -> Self {
        self.failing_times(program, usize::MAX)
    }

    /// The first `times` execs of `program` exit 1.
    pub(crate) fn failing_times(self, program: &str, times: usize) -> Self {
        self.failures.borrow_mut().insert(program.to_string(), times);
        self
    }

    pub(crate) fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub(crate) fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub(crate) fn failing_kill(mut self) -> Self {
        self.fail_kill = true;
        self
    }

    pub(crate) fn failing_copy_out(mut self) -> Self {
        self.fail_copy_out = true;
        self
    }

    /// Captured output for `program`.
    pub(crate) fn output(mut self, program: &str, stdout: &str) -> Self {
        self.outputs.insert(program.to_string(), stdout.to_string());
        self
    }

    /// Run `hook` for every successful exec, e.g. to fake build outputs.
    pub(crate) fn on_exec(mut self, hook: impl Fn(&ExecSpec) -> Result<()> + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub(crate) fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| predicate(c)).count()
    }

    /// Every command run, streamed or captured, in order.
    pub(crate) fn execs(&self) -> Vec<ExecSpec> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Exec(spec) | Call::ExecOutput(spec) => Some(spec.clone()),
                _ => None,
            })
            .collect()
    }

    /// Programs run (argv[0]), in order.
    pub(crate) fn programs(&self) -> Vec<String> {
        self.execs()
            .into_iter()
            .filter_map(|spec| spec.argv.first().cloned())
            .collect()
    }

    /// Images of every container created, in order.
    pub(crate) fn images(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Create(spec) => Some(spec.image.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn run(&self, spec: &ExecSpec) -> Result<()> {
        let program = spec.argv.first().cloned().unwrap_or_default();
        let mut failures = self.failures.borrow_mut();
        if let Some(remaining) = failures.get_mut(&program) {
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                return Err(PipelineError::CommandFailed {
                    command: spec.argv.join(" "),
                    exit_code: Some(1),
                }
                .into());
            }
        }
        drop(failures);
        for hook in &self.hooks {
            hook(spec)?;
        }
        Ok(())
    }
}

impl ContainerRuntime for RecordingRuntime {
    fn create(&self, spec: &CreateSpec) -> Result<String> {
        self.record(Call::Create(spec.clone()));
        if self.fail_create {
            bail!("image '{}' not found", spec.image);
        }
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        Ok(format!("container{id}"))
    }

    fn start(&self, id: &str) -> Result<()> {
        self.record(Call::Start(id.to_string()));
        if self.fail_start {
            bail!("container {id} failed to start");
        }
        Ok(())
    }

    fn exec(&self, _id: &str, spec: &ExecSpec) -> Result<()> {
        self.record(Call::Exec(spec.clone()));
        self.run(spec)
    }

    fn exec_output(&self, _id: &str, spec: &ExecSpec) -> Result<String> {
        self.record(Call::ExecOutput(spec.clone()));
        self.run(spec)?;
        let program = spec.argv.first().map(String::as_str).unwrap_or_default();
        Ok(self.outputs.get(program).cloned().unwrap_or_default())
    }

    fn copy_in(&self, id: &str, host: &Path, dest: &str) -> Result<()> {
        let content = fs::read_to_string(host)?;
        self.record(Call::CopyIn {
            id: id.to_string(),
            dest: dest.to_string(),
            content,
        });
        Ok(())
    }

    fn copy_out(&self, id: &str, src: &str, host: &Path) -> Result<()> {
        self.record(Call::CopyOut {
            id: id.to_string(),
            src: src.to_string(),
            host: host.to_path_buf(),
        });
        if self.fail_copy_out {
            bail!("no such file or directory: {id}:{src}");
        }
        Ok(())
    }

    fn kill(&self, id: &str) -> Result<()> {
        self.record(Call::Kill(id.to_string()));
        if self.fail_kill {
            bail!("container {id} is not running");
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.record(Call::Remove(id.to_string()));
        Ok(())
    }
}
