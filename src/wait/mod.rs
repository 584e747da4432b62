//! Blocking, timeout-bounded waits on resource status and port readiness.
//!
//! Every wait samples on the calling thread and sleeps a fixed interval
//! between samples. There is no backoff and no retry of failed samples:
//! errors raised while refreshing a resource propagate to the caller as
//! [`WaitError::Sample`].

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread::sleep;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::resource::{Addressable, Resource, ResourceError};

/// Default interval between samples.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default wait budget for a single phase.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Status reported by instances that finished booting.
pub const READY_STATUS: &str = "running";

/// Status an instance passes through while booting.
pub const BOOTING_STATUS: &str = "pending";

/// Port probed for SSH readiness.
pub const DEFAULT_SSH_PORT: u16 = 22;

const MIN_CONNECT_TIMEOUT: Duration = Duration::from_millis(1);

/// Sampling cadence for a wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollSettings {
    /// Pause between consecutive samples. Also bounds each connection
    /// attempt during port probing.
    pub interval: Duration,
    /// Overall budget; `None` polls until the goal or an error is reached.
    pub timeout: Option<Duration>,
}

impl PollSettings {
    /// Settings with a bounded timeout.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout: Some(timeout),
        }
    }

    /// Settings that never time out.
    #[must_use]
    pub const fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            timeout: None,
        }
    }

    /// A budget too large to represent as an [`Instant`] is unbounded.
    fn deadline(&self) -> Option<Instant> {
        self.timeout
            .and_then(|budget| Instant::now().checked_add(budget))
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT)
    }
}

/// Goal of a readiness wait.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadinessProbe {
    /// Status that marks the instance as booted.
    pub ready_status: String,
    /// Statuses tolerated on the way to `ready_status`.
    pub transit_statuses: Vec<String>,
    /// TCP port that must accept connections.
    pub port: u16,
}

impl ReadinessProbe {
    /// Overrides the probed port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self {
            ready_status: READY_STATUS.to_owned(),
            transit_statuses: vec![BOOTING_STATUS.to_owned()],
            port: DEFAULT_SSH_PORT,
        }
    }
}

/// Errors raised by waits.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WaitError {
    /// The resource entered a status outside the declared transit set.
    #[error("unexpected status {status:?} for {resource} while waiting for {target:?}")]
    UnexpectedStatus {
        /// Resource being polled.
        resource: String,
        /// Status the caller waited for.
        target: String,
        /// Status actually observed.
        status: String,
    },
    /// The wall-clock budget ran out before the goal was reached.
    #[error("operation timed out waiting for {action} on {resource}")]
    OperationTimedOut {
        /// Resource being polled.
        resource: String,
        /// What was being waited for.
        action: String,
    },
    /// The resource exposes no network address to probe.
    #[error("{resource} has no network address")]
    MissingAddress {
        /// Resource that was expected to be reachable.
        resource: String,
    },
    /// Refreshing the resource failed.
    #[error(transparent)]
    Sample(#[from] ResourceError),
}

/// Refreshes `target` and returns its current status.
///
/// The refresh always runs. When the resource materialises a status
/// attribute during the refresh, that attribute wins over the refresh return
/// value.
///
/// # Errors
///
/// Returns [`ResourceError`] when the refresh fails.
pub fn sample_status<R: Resource + ?Sized>(target: &R) -> Result<String, ResourceError> {
    let refreshed = target.refresh()?;
    Ok(target.status().unwrap_or(refreshed))
}

/// Polls `target` until it reports `status`.
///
/// When `via` is given, any observed status that is neither `status` nor a
/// member of `via` fails immediately. The first sample is always taken, even
/// with a zero timeout.
///
/// # Errors
///
/// Returns [`WaitError::UnexpectedStatus`] for a status outside `via`,
/// [`WaitError::OperationTimedOut`] when the timeout elapses, and
/// [`WaitError::Sample`] when a refresh fails.
pub fn wait_for_status<R: Resource + ?Sized>(
    target: &R,
    status: &str,
    via: Option<&[&str]>,
    settings: PollSettings,
) -> Result<(), WaitError> {
    debug!(resource = %target, goal = status, "waiting for status");
    let deadline = settings.deadline();
    loop {
        let current = sample_status(target)?;
        debug!(resource = %target, status = %current, "sampled status");
        if current == status {
            return Ok(());
        }
        if let Some(transit) = via
            && !transit.contains(&current.as_str())
        {
            warn!(resource = %target, status = %current, goal = status, "unexpected status");
            return Err(WaitError::UnexpectedStatus {
                resource: target.to_string(),
                target: status.to_owned(),
                status: current,
            });
        }
        if deadline.is_some_and(|limit| Instant::now() >= limit) {
            warn!(resource = %target, goal = status, "timed out waiting for status");
            return Err(WaitError::OperationTimedOut {
                resource: target.to_string(),
                action: format!("status {status:?}"),
            });
        }
        sleep(settings.interval);
    }
}

/// Waits until an instance has booted and accepts TCP connections.
///
/// The status phase waits for `probe.ready_status`, tolerating only
/// `probe.transit_statuses`. The connectivity phase then dials the
/// instance's address on `probe.port` until a connection succeeds.
///
/// Each phase gets the full `settings.timeout` budget: the connectivity clock
/// starts when the status phase finishes, so the total wait can approach
/// twice the timeout.
///
/// # Errors
///
/// Returns any [`wait_for_status`] error from the status phase,
/// [`WaitError::MissingAddress`] when the instance reports no address, and
/// [`WaitError::OperationTimedOut`] when the port never opens.
pub fn wait_for_instance_ready<R>(
    instance: &R,
    probe: &ReadinessProbe,
    settings: PollSettings,
) -> Result<(), WaitError>
where
    R: Resource + Addressable + ?Sized,
{
    debug!(resource = %instance, "waiting for instance to be ready");
    let transit = probe
        .transit_statuses
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>();
    wait_for_status(instance, &probe.ready_status, Some(transit.as_slice()), settings)?;

    let host = instance
        .network_address()
        .ok_or_else(|| WaitError::MissingAddress {
            resource: instance.to_string(),
        })?;
    wait_for_port(&instance.to_string(), &host, probe.port, settings)
}

/// Dials `host:port` until a connection succeeds or the budget elapses.
///
/// `label` names the resource in logs and errors.
///
/// # Errors
///
/// Returns [`WaitError::OperationTimedOut`] when no attempt succeeds in time.
pub fn wait_for_port(
    label: &str,
    host: &str,
    port: u16,
    settings: PollSettings,
) -> Result<(), WaitError> {
    let deadline = settings.deadline();
    let connect_timeout = settings.interval.max(MIN_CONNECT_TIMEOUT);
    loop {
        debug!(resource = label, host, port, "probing port");
        if try_connect(host, port, connect_timeout) {
            return Ok(());
        }
        if deadline.is_some_and(|limit| Instant::now() >= limit) {
            warn!(resource = label, host, port, "timed out waiting for port");
            return Err(WaitError::OperationTimedOut {
                resource: label.to_owned(),
                action: format!("port {port}"),
            });
        }
        sleep(settings.interval);
    }
}

fn try_connect(host: &str, port: u16, budget: Duration) -> bool {
    match (host, port).to_socket_addrs() {
        Ok(addrs) => connect_any(addrs, budget),
        Err(err) => {
            debug!(host, error = %err, "address resolution failed");
            false
        }
    }
}

/// Dials each address in turn until one accepts. All attempts share one
/// `budget`, so a host with many addresses cannot overrun the poll interval.
fn connect_any(addrs: impl Iterator<Item = SocketAddr>, budget: Duration) -> bool {
    let started = Instant::now();
    for addr in addrs {
        let remaining = budget.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return false;
        }
        if TcpStream::connect_timeout(&addr, remaining).is_ok() {
            return true;
        }
    }
    false
}
