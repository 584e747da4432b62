//! Lifecycle helpers for transient cloud resources.
//!
//! Workflows that provision short-lived infrastructure (an instance to build
//! an image on, a volume to snapshot, a snapshot to register) need two
//! things: a way to block until a resource reaches a status, and a guarantee
//! that whatever was created is torn down again in an order the provider
//! accepts. [`wait`] provides the first, [`ledger`] the second. The
//! remaining modules adapt the Scaleway CLI and the system SSH client to
//! those abstractions and load the templates such workflows deploy.
//!
//! Everything here is blocking and single-threaded: a wait sleeps
//! on the calling thread and a ledger is owned by exactly one workflow.

pub mod command;
pub mod config;
pub mod ledger;
pub mod resource;
pub mod scw;
pub mod session;
pub mod template;
pub mod test_support;
pub mod wait;

pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, DeployConfig};
pub use ledger::{
    CleanupLedger, CleanupScope, DestructionFailed, LedgerState, Retention, ScopeOutcome,
    TeardownReport, with_cleanup,
};
pub use resource::{Addressable, Deletable, Resource, ResourceError, ResourceKind, Terminable};
pub use scw::{ScwCli, ScwServer, ScwSnapshot, ScwVolume};
pub use session::{RemoteOutput, RemoteSession, SessionConfig, SessionError};
pub use template::{TemplateError, load_template};
pub use wait::{
    PollSettings, ReadinessProbe, WaitError, wait_for_instance_ready, wait_for_port,
    wait_for_status,
};
