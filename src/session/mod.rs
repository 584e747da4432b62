//! Remote command execution on a provisioned instance over the system `ssh`
//! client.
//!
//! A session is bound to the address the instance reported when it was
//! opened. It shares nothing across threads; each workflow opens its own.

use std::borrow::Cow;
use std::ffi::OsString;
use std::fmt;

use shell_escape::unix::escape;
use thiserror::Error;
use tracing::{debug, warn};

use crate::command::{CommandError, CommandRunner, ProcessCommandRunner};
use crate::resource::Addressable;
use crate::wait::DEFAULT_SSH_PORT;

/// Default SSH login for freshly provisioned instances.
pub const DEFAULT_SSH_USER: &str = "ec2-user";

/// SSH client settings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionConfig {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Remote login.
    pub user: String,
    /// Remote SSH port.
    pub port: u16,
    /// Private key passed with `-i`. `~/` is expanded against `HOME`.
    pub identity_file: Option<String>,
    /// Adds `BatchMode=yes` so the client never prompts.
    pub batch_mode: bool,
    /// When `false`, host keys of ephemeral hosts are accepted blindly.
    pub strict_host_key_checking: bool,
    /// Known hosts file; blank leaves the client default in place.
    pub known_hosts_file: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            user: DEFAULT_SSH_USER.to_owned(),
            port: DEFAULT_SSH_PORT,
            identity_file: None,
            batch_mode: true,
            strict_host_key_checking: false,
            known_hosts_file: String::from("/dev/null"),
        }
    }
}

impl SessionConfig {
    fn ssh_options(&self) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(self.port.to_string())];

        if let Some(identity_file) = &self.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        if self.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.known_hosts_file
            )));
        }

        args
    }
}

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Output captured from a remote command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteOutput {
    /// Exit code reported by `ssh`, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RemoteOutput {
    /// Returns `true` when the remote command exited with zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Errors raised by a remote session.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SessionError {
    /// The instance reported no address to connect to.
    #[error("{resource} has no network address")]
    MissingAddress {
        /// Instance the session was opened for.
        resource: String,
    },
    /// The remote command exited with a non-zero status.
    #[error("remote command `{command}` on {host} exited with status {status_text}: {stderr}")]
    RemoteFailure {
        /// Command as sent to the remote shell.
        command: String,
        /// Host the command ran on.
        host: String,
        /// Exit code reported by `ssh`.
        code: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when `ssh` cannot be executed.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// SSH session bound to one instance.
#[derive(Clone, Debug)]
pub struct RemoteSession<R: CommandRunner> {
    config: SessionConfig,
    runner: R,
    host: String,
}

impl RemoteSession<ProcessCommandRunner> {
    /// Opens a session that runs the real `ssh` client.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingAddress`] when the instance has no
    /// network address.
    pub fn connect<I>(instance: &I, config: SessionConfig) -> Result<Self, SessionError>
    where
        I: Addressable + fmt::Display + ?Sized,
    {
        Self::open(instance, config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> RemoteSession<R> {
    /// Opens a session against the address `instance` last reported.
    ///
    /// No connection is made until the first command runs.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingAddress`] when the instance has no
    /// network address.
    pub fn open<I>(instance: &I, config: SessionConfig, runner: R) -> Result<Self, SessionError>
    where
        I: Addressable + fmt::Display + ?Sized,
    {
        let host = instance
            .network_address()
            .ok_or_else(|| SessionError::MissingAddress {
                resource: instance.to_string(),
            })?;
        debug!(resource = %instance, host = %host, user = %config.user, "opened remote session");
        Ok(Self {
            config,
            runner,
            host,
        })
    }

    /// Address the session connects to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Runs `command` and fails on a non-zero exit.
    ///
    /// `command` is passed to the remote shell verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RemoteFailure`] on a non-zero exit and
    /// [`SessionError::Command`] when `ssh` cannot be spawned.
    pub fn run(&self, command: &str) -> Result<RemoteOutput, SessionError> {
        let output = self.run_unchecked(command)?;
        if output.is_success() {
            return Ok(output);
        }
        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        warn!(host = %self.host, command, status = %status_text, "remote command failed");
        Err(SessionError::RemoteFailure {
            command: command.to_owned(),
            host: self.host.clone(),
            code: output.code,
            status_text,
            stderr: output.stderr,
        })
    }

    /// Runs `command` as root through `sudo -n sh -c`.
    ///
    /// # Errors
    ///
    /// See [`RemoteSession::run`].
    pub fn sudo(&self, command: &str) -> Result<RemoteOutput, SessionError> {
        self.run(&sudo_wrap(command))
    }

    /// Runs `command` and returns its output whatever the exit status.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Command`] when `ssh` cannot be spawned.
    pub fn run_unchecked(&self, command: &str) -> Result<RemoteOutput, SessionError> {
        debug!(host = %self.host, command, "running remote command");
        let mut args = self.config.ssh_options();
        args.push(OsString::from(format!("{}@{}", self.config.user, self.host)));
        args.push(OsString::from(command));
        let output = self.runner.run(&self.config.ssh_bin, &args)?;
        Ok(RemoteOutput {
            code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

fn sudo_wrap(command: &str) -> String {
    format!("sudo -n sh -c {}", escape(Cow::Borrowed(command)))
}
