//! Scaleway resources observed and destroyed through the `scw` CLI.
//!
//! Every adapter borrows a [`ScwCli`], which owns the binary path and the
//! [`CommandRunner`]. Commands always request `-o json` so the adapters can
//! deserialise the reply.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fmt;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::command::{CommandOutput, CommandRunner, ProcessCommandRunner};
use crate::ledger::TERMINATED_STATUS;
use crate::resource::{Addressable, Deletable, Resource, ResourceError, ResourceKind, Terminable};
use crate::wait::{READY_STATUS, ReadinessProbe};

/// Default Scaleway CLI binary name.
pub const DEFAULT_SCW_BIN: &str = "scw";

/// Options passed to `scw instance server terminate`. `with-block=false`
/// keeps the CLI from prompting about attached block volumes.
const TERMINATE_OPTIONS: &[&str] = &["with-ip=true", "with-block=false"];

/// State a Scaleway server reports while booting.
pub const SERVER_BOOTING_STATE: &str = "starting";

/// Readiness probe matching Scaleway server states.
#[must_use]
pub fn server_readiness_probe(port: u16) -> ReadinessProbe {
    ReadinessProbe {
        ready_status: READY_STATUS.to_owned(),
        transit_statuses: vec![SERVER_BOOTING_STATE.to_owned()],
        port,
    }
}

/// Handle on the `scw` binary.
#[derive(Clone, Debug)]
pub struct ScwCli<R: CommandRunner> {
    scw_bin: String,
    runner: R,
}

impl ScwCli<ProcessCommandRunner> {
    /// Creates a CLI handle wired to the real process runner.
    #[must_use]
    pub fn with_process_runner(scw_bin: impl Into<String>) -> Self {
        Self::new(scw_bin, ProcessCommandRunner)
    }
}

impl Default for ScwCli<ProcessCommandRunner> {
    fn default() -> Self {
        Self::with_process_runner(DEFAULT_SCW_BIN)
    }
}

impl<R: CommandRunner> ScwCli<R> {
    /// Creates a CLI handle using `runner` to execute `scw_bin`.
    #[must_use]
    pub fn new(scw_bin: impl Into<String>, runner: R) -> Self {
        Self {
            scw_bin: scw_bin.into(),
            runner,
        }
    }

    /// Binary invoked for every command.
    #[must_use]
    pub fn scw_bin(&self) -> &str {
        &self.scw_bin
    }

    /// Instance server `id` in `zone`.
    #[must_use]
    pub fn server(&self, id: &str, zone: &str) -> ScwServer<'_, R> {
        ScwServer {
            cli: self,
            locator: Locator::new(id, zone),
            observed: RefCell::new(None),
        }
    }

    /// Block Storage volume `id` in `zone`.
    #[must_use]
    pub fn volume(&self, id: &str, zone: &str) -> ScwVolume<'_, R> {
        ScwVolume {
            cli: self,
            locator: Locator::new(id, zone),
        }
    }

    /// Block Storage snapshot `id` in `zone`.
    #[must_use]
    pub fn snapshot(&self, id: &str, zone: &str) -> ScwSnapshot<'_, R> {
        ScwSnapshot {
            cli: self,
            locator: Locator::new(id, zone),
        }
    }

    fn run_scw(&self, args: &[OsString], resource: &str) -> Result<CommandOutput, ResourceError> {
        debug!(resource, "invoking scw");
        let output = self.runner.run(&self.scw_bin, args)?;
        if output.is_success() {
            return Ok(output);
        }
        Err(ResourceError::CommandFailure {
            program: self.scw_bin.clone(),
            status: output.code,
            status_text: output.status_text(),
            stderr: format!("{resource}: {}", output.stderr.trim()),
        })
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        args: &[OsString],
        resource: &str,
    ) -> Result<T, ResourceError> {
        let output = self.run_scw(args, resource)?;
        parse_json(&output.stdout, resource)
    }
}

fn parse_json<T: DeserializeOwned>(stdout: &str, resource: &str) -> Result<T, ResourceError> {
    serde_json::from_str(stdout).map_err(|err| ResourceError::Parse {
        resource: resource.to_owned(),
        message: err.to_string(),
    })
}

/// Identifier and zone of a Scaleway resource.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Locator {
    id: String,
    zone: String,
}

impl Locator {
    fn new(id: &str, zone: &str) -> Self {
        Self {
            id: id.to_owned(),
            zone: zone.to_owned(),
        }
    }

    fn args(&self, path: &[&str], verb: &str, extra: &[&str], json: bool) -> Vec<OsString> {
        let mut args = path.iter().map(OsString::from).collect::<Vec<_>>();
        args.push(OsString::from(verb));
        args.push(OsString::from(&self.id));
        args.push(OsString::from(format!("zone={}", self.zone)));
        args.extend(extra.iter().map(OsString::from));
        if json {
            args.push(OsString::from("-o"));
            args.push(OsString::from("json"));
        }
        args
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.zone)
    }
}

fn is_not_found(err: &ResourceError) -> bool {
    matches!(
        err,
        ResourceError::CommandFailure { stderr, .. }
            if stderr.to_ascii_lowercase().contains("not found")
    )
}

#[derive(Debug, Deserialize)]
struct ServerPayload {
    state: String,
    #[serde(default)]
    public_ip: Option<IpPayload>,
    #[serde(default)]
    public_ips: Vec<IpPayload>,
}

#[derive(Clone, Debug, Deserialize)]
struct IpPayload {
    address: String,
}

#[derive(Debug, Deserialize)]
struct BlockPayload {
    status: String,
}

#[derive(Clone, Debug, Default)]
struct ServerObservation {
    state: String,
    address: Option<String>,
}

/// Scaleway instance server.
///
/// Refreshing materialises the server `state` and its public IPv4 address.
/// A server that no longer exists reports `terminated`.
#[derive(Debug)]
pub struct ScwServer<'c, R: CommandRunner> {
    cli: &'c ScwCli<R>,
    locator: Locator,
    observed: RefCell<Option<ServerObservation>>,
}

impl<R: CommandRunner> ScwServer<'_, R> {
    /// Server identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.locator.id
    }

    fn fetch(&self) -> Result<ServerObservation, ResourceError> {
        let args = self
            .locator
            .args(&["instance", "server"], "get", &[], true);
        let label = self.to_string();
        let payload = match self.cli.get_json::<ServerPayload>(&args, &label) {
            Ok(payload) => payload,
            Err(err) if is_not_found(&err) => {
                debug!(resource = %self, "server no longer exists");
                return Ok(ServerObservation {
                    state: TERMINATED_STATUS.to_owned(),
                    address: None,
                });
            }
            Err(err) => return Err(err),
        };
        let address = payload
            .public_ip
            .into_iter()
            .chain(payload.public_ips)
            .map(|ip| ip.address)
            .find(|address| !address.is_empty());
        Ok(ServerObservation {
            state: payload.state,
            address,
        })
    }
}

impl<R: CommandRunner> fmt::Display for ScwServer<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server {}", self.locator)
    }
}

impl<R: CommandRunner> Resource for ScwServer<'_, R> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Instance
    }

    fn refresh(&self) -> Result<String, ResourceError> {
        let observation = self.fetch()?;
        let state = observation.state.clone();
        *self.observed.borrow_mut() = Some(observation);
        Ok(state)
    }

    fn status(&self) -> Option<String> {
        self.observed
            .borrow()
            .as_ref()
            .map(|observation| observation.state.clone())
    }

    fn as_terminable(&self) -> Option<&dyn Terminable> {
        Some(self)
    }
}

impl<R: CommandRunner> Terminable for ScwServer<'_, R> {
    /// Terminates the server and releases its flexible IP. Attached block
    /// volumes are left in place.
    fn terminate(&self) -> Result<(), ResourceError> {
        let args = self
            .locator
            .args(&["instance", "server"], "terminate", TERMINATE_OPTIONS, false);
        self.cli.run_scw(&args, &self.to_string())?;
        Ok(())
    }
}

impl<R: CommandRunner> Addressable for ScwServer<'_, R> {
    fn network_address(&self) -> Option<String> {
        self.observed
            .borrow()
            .as_ref()
            .and_then(|observation| observation.address.clone())
    }
}

fn refresh_block<R: CommandRunner>(
    cli: &ScwCli<R>,
    locator: &Locator,
    path: &[&str],
    label: &str,
) -> Result<String, ResourceError> {
    let args = locator.args(path, "get", &[], true);
    cli.get_json::<BlockPayload>(&args, label)
        .map(|payload| payload.status)
}

fn delete_block<R: CommandRunner>(
    cli: &ScwCli<R>,
    locator: &Locator,
    path: &[&str],
    label: &str,
) -> Result<(), ResourceError> {
    let args = locator.args(path, "delete", &[], false);
    cli.run_scw(&args, label)?;
    Ok(())
}

/// Scaleway Block Storage volume.
#[derive(Debug)]
pub struct ScwVolume<'c, R: CommandRunner> {
    cli: &'c ScwCli<R>,
    locator: Locator,
}

impl<R: CommandRunner> ScwVolume<'_, R> {
    const PATH: [&'static str; 2] = ["block", "volume"];

    /// Volume identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.locator.id
    }
}

impl<R: CommandRunner> fmt::Display for ScwVolume<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "volume {}", self.locator)
    }
}

impl<R: CommandRunner> Resource for ScwVolume<'_, R> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Volume
    }

    fn refresh(&self) -> Result<String, ResourceError> {
        refresh_block(self.cli, &self.locator, &Self::PATH, &self.to_string())
    }

    fn as_deletable(&self) -> Option<&dyn Deletable> {
        Some(self)
    }
}

impl<R: CommandRunner> Deletable for ScwVolume<'_, R> {
    fn delete(&self) -> Result<(), ResourceError> {
        delete_block(self.cli, &self.locator, &Self::PATH, &self.to_string())
    }
}

/// Scaleway Block Storage snapshot.
#[derive(Debug)]
pub struct ScwSnapshot<'c, R: CommandRunner> {
    cli: &'c ScwCli<R>,
    locator: Locator,
}

impl<R: CommandRunner> ScwSnapshot<'_, R> {
    const PATH: [&'static str; 2] = ["block", "snapshot"];

    /// Snapshot identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.locator.id
    }
}

impl<R: CommandRunner> fmt::Display for ScwSnapshot<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snapshot {}", self.locator)
    }
}

impl<R: CommandRunner> Resource for ScwSnapshot<'_, R> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Snapshot
    }

    fn refresh(&self) -> Result<String, ResourceError> {
        refresh_block(self.cli, &self.locator, &Self::PATH, &self.to_string())
    }

    fn as_deletable(&self) -> Option<&dyn Deletable> {
        Some(self)
    }
}

impl<R: CommandRunner> Deletable for ScwSnapshot<'_, R> {
    fn delete(&self) -> Result<(), ResourceError> {
        delete_block(self.cli, &self.locator, &Self::PATH, &self.to_string())
    }
}
