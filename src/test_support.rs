//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::resource::{
    Addressable, Deletable, Resource, ResourceError, ResourceKind, Terminable,
};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Call made against a [`FakeResource`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    /// `refresh` on the named resource.
    Refresh(String),
    /// `terminate` on the named resource.
    Terminate(String),
    /// `delete` on the named resource.
    Delete(String),
}

/// Shared, ordered record of calls made against fake resources.
#[derive(Clone, Debug, Default)]
pub struct CallJournal(Rc<RefCell<Vec<Call>>>);

impl CallJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().clone()
    }

    /// Terminate and delete calls in order, ignoring refreshes.
    #[must_use]
    pub fn destructive_calls(&self) -> Vec<Call> {
        self.0
            .borrow()
            .iter()
            .filter(|call| !matches!(call, Call::Refresh(_)))
            .cloned()
            .collect()
    }

    /// Names of resources that received a destructive call, first call only.
    #[must_use]
    pub fn teardown_order(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for call in self.destructive_calls() {
            let (Call::Terminate(name) | Call::Delete(name) | Call::Refresh(name)) = call;
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }

    fn record(&self, call: Call) {
        self.0.borrow_mut().push(call);
    }
}

/// Resource double with a scripted status sequence and optional
/// capabilities.
///
/// Each refresh pops the next scripted status; once the script runs out the
/// last status repeats. Terminating replaces the script with the
/// post-termination sequence (`terminated` by default).
#[derive(Debug)]
pub struct FakeResource {
    name: String,
    kind: ResourceKind,
    journal: CallJournal,
    script: RefCell<VecDeque<String>>,
    current: RefCell<Option<String>>,
    after_terminate: Vec<String>,
    materialises_status: bool,
    terminable: bool,
    deletable: bool,
    refresh_error: Option<String>,
    terminate_error: Option<String>,
    delete_error: Option<String>,
    delete_panic: Option<String>,
    address: Option<String>,
}

impl FakeResource {
    /// Creates a resource with no capabilities that reports `available`.
    #[must_use]
    pub fn new(name: &str, kind: ResourceKind, journal: &CallJournal) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            journal: journal.clone(),
            script: RefCell::new(VecDeque::from([String::from("available")])),
            current: RefCell::new(None),
            after_terminate: vec![String::from("terminated")],
            materialises_status: false,
            terminable: false,
            deletable: false,
            refresh_error: None,
            terminate_error: None,
            delete_error: None,
            delete_panic: None,
            address: None,
        }
    }

    /// Replaces the scripted status sequence.
    #[must_use]
    pub fn with_statuses<I, S>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.script.borrow_mut() = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the sequence reported after `terminate`.
    #[must_use]
    pub fn terminating_through<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after_terminate = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Exposes the refreshed status through [`Resource::status`] and makes
    /// `refresh` return a placeholder instead.
    #[must_use]
    pub const fn materialising_status(mut self) -> Self {
        self.materialises_status = true;
        self
    }

    /// Adds the terminate capability.
    #[must_use]
    pub const fn terminable(mut self) -> Self {
        self.terminable = true;
        self
    }

    /// Adds the delete capability.
    #[must_use]
    pub const fn deletable(mut self) -> Self {
        self.deletable = true;
        self
    }

    /// Makes every refresh fail with `message`.
    #[must_use]
    pub fn failing_refresh(mut self, message: &str) -> Self {
        self.refresh_error = Some(message.to_owned());
        self
    }

    /// Makes `terminate` fail with `message`.
    #[must_use]
    pub fn failing_terminate(mut self, message: &str) -> Self {
        self.terminable = true;
        self.terminate_error = Some(message.to_owned());
        self
    }

    /// Makes `delete` fail with `message`.
    #[must_use]
    pub fn failing_delete(mut self, message: &str) -> Self {
        self.deletable = true;
        self.delete_error = Some(message.to_owned());
        self
    }

    /// Makes `delete` panic with `message`.
    #[must_use]
    pub fn panicking_delete(mut self, message: &str) -> Self {
        self.deletable = true;
        self.delete_panic = Some(message.to_owned());
        self
    }

    /// Sets the network address reported through [`Addressable`].
    #[must_use]
    pub fn with_address(mut self, address: &str) -> Self {
        self.address = Some(address.to_owned());
        self
    }

    /// Resource name used in the journal.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn fail(&self, message: &str) -> ResourceError {
        ResourceError::Provider {
            resource: self.to_string(),
            message: message.to_owned(),
        }
    }
}

impl fmt::Display for FakeResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

impl Resource for FakeResource {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn refresh(&self) -> Result<String, ResourceError> {
        self.journal.record(Call::Refresh(self.name.clone()));
        if let Some(message) = &self.refresh_error {
            return Err(self.fail(message));
        }
        let next = self.script.borrow_mut().pop_front();
        let status = match next {
            Some(status) => {
                *self.current.borrow_mut() = Some(status.clone());
                status
            }
            None => self
                .current
                .borrow()
                .clone()
                .ok_or_else(|| self.fail("no scripted status"))?,
        };
        if self.materialises_status {
            return Ok(String::from("<see status attribute>"));
        }
        Ok(status)
    }

    fn status(&self) -> Option<String> {
        if self.materialises_status {
            self.current.borrow().clone()
        } else {
            None
        }
    }

    fn as_terminable(&self) -> Option<&dyn Terminable> {
        self.terminable.then_some(self as &dyn Terminable)
    }

    fn as_deletable(&self) -> Option<&dyn Deletable> {
        self.deletable.then_some(self as &dyn Deletable)
    }
}

impl Terminable for FakeResource {
    fn terminate(&self) -> Result<(), ResourceError> {
        self.journal.record(Call::Terminate(self.name.clone()));
        if let Some(message) = &self.terminate_error {
            return Err(self.fail(message));
        }
        *self.script.borrow_mut() = self.after_terminate.iter().cloned().collect();
        Ok(())
    }
}

impl Deletable for FakeResource {
    #[expect(
        clippy::panic_in_result_fn,
        reason = "simulates an adapter that panics instead of returning an error"
    )]
    fn delete(&self) -> Result<(), ResourceError> {
        self.journal.record(Call::Delete(self.name.clone()));
        if let Some(message) = &self.delete_panic {
            panic!("{message}");
        }
        if let Some(message) = &self.delete_error {
            return Err(self.fail(message));
        }
        Ok(())
    }
}

impl Addressable for FakeResource {
    fn network_address(&self) -> Option<String> {
        self.address.clone()
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    #[must_use]
    pub fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Produces a payload matching `scw instance server get -o json`.
#[must_use]
pub fn json_server(id: &str, state: &str, public_ip: Option<&str>) -> String {
    let ip = public_ip.map_or_else(
        || String::from("null"),
        |address| format!("{{\"address\":\"{address}\"}}"),
    );
    format!("{{\"id\":\"{id}\",\"state\":\"{state}\",\"public_ip\":{ip}}}")
}

/// Produces a payload matching `scw block volume get -o json` or
/// `scw block snapshot get -o json`.
#[must_use]
pub fn json_block_resource(id: &str, status: &str) -> String {
    format!("{{\"id\":\"{id}\",\"status\":\"{status}\"}}")
}
