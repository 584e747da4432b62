//! Configuration loading via `ortho-config`.
//!
//! Values merge defaults, `stagehand.toml` (or the file named by
//! `STAGEHAND_CONFIG_PATH`), `STAGEHAND_*` environment variables, and CLI
//! flags in that order of precedence.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::session::SessionConfig;
use crate::wait::PollSettings;

const ENV_PREFIX: &str = "STAGEHAND";

/// Polling, SSH and provider CLI settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "STAGEHAND",
    discovery(
        app_name = "stagehand",
        env_var = "STAGEHAND_CONFIG_PATH",
        config_file_name = "stagehand.toml",
        dotfile_name = ".stagehand.toml",
        project_file_name = "stagehand.toml"
    )
)]
pub struct DeployConfig {
    /// Seconds between status samples.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Budget in seconds for each wait phase.
    #[ortho_config(default = 300)]
    pub wait_timeout_secs: u64,
    /// Budget in seconds for each terminated-status wait during teardown.
    /// Unset waits indefinitely.
    pub teardown_timeout_secs: Option<u64>,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "ec2-user".to_owned())]
    pub ssh_user: String,
    /// Remote SSH port, also probed by readiness waits.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Path to the SSH private key. Supports `~/` expansion.
    pub ssh_identity_file: Option<String>,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking; disabled by default for
    /// ephemeral hosts.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null` for ephemeral hosts.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Path to the Scaleway CLI binary.
    #[ortho_config(default = "scw".to_owned())]
    pub scw_bin: String,
}

impl DeployConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("stagehand")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and file key that supply the value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required string is blank
    /// and [`ConfigError::Invalid`] when the poll interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(&self.ssh_bin, "ssh_bin")?;
        Self::require_field(&self.ssh_user, "ssh_user")?;
        Self::require_field(&self.scw_bin, "scw_bin")?;
        if let Some(identity) = &self.ssh_identity_file {
            Self::require_field(identity, "ssh_identity_file")?;
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(format!(
                "poll_interval_secs must be at least 1: set {} or poll_interval_secs in stagehand.toml",
                env_var("poll_interval_secs")
            )));
        }
        Ok(())
    }

    fn require_field(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {field}: set {} or add {field} to stagehand.toml",
                env_var(field)
            )));
        }
        Ok(())
    }

    /// Cadence for status and readiness waits.
    #[must_use]
    pub const fn poll_settings(&self) -> PollSettings {
        PollSettings::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.wait_timeout_secs),
        )
    }

    /// Cadence for terminated-status waits during teardown.
    #[must_use]
    pub fn teardown_settings(&self) -> PollSettings {
        let interval = Duration::from_secs(self.poll_interval_secs);
        self.teardown_timeout_secs.map_or_else(
            || PollSettings::unbounded(interval),
            |secs| PollSettings::new(interval, Duration::from_secs(secs)),
        )
    }

    /// SSH client settings for remote sessions.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ssh_bin: self.ssh_bin.clone(),
            user: self.ssh_user.clone(),
            port: self.ssh_port,
            identity_file: self.ssh_identity_file.clone(),
            batch_mode: self.ssh_batch_mode,
            strict_host_key_checking: self.ssh_strict_host_key_checking,
            known_hosts_file: self.ssh_known_hosts_file.clone(),
        }
    }
}

fn env_var(field: &str) -> String {
    format!("{ENV_PREFIX}_{}", field.to_uppercase())
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
