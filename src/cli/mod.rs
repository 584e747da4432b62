//! Command-line interface definitions for the `stagehand` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page. It
//! must only depend on `clap`.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

/// Top-level CLI for the `stagehand` binary.
#[derive(Debug, Parser)]
#[command(
    name = "stagehand",
    about = "Wait on, probe, and tear down transient Scaleway resources",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Increase log verbosity (`-v` for info, `-vv` for debug). `RUST_LOG`
    /// takes precedence when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub(crate) verbose: u8,
    /// Subcommand to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of `stagehand`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Load a JSON/YAML template file or directory tree and print it as JSON.
    #[command(name = "template")]
    Template(TemplateCommand),
    /// Poll a resource until it reports a status.
    #[command(name = "wait")]
    Wait(WaitCommand),
    /// Wait for a server to boot and accept SSH connections.
    #[command(name = "ready")]
    Ready(ReadyCommand),
    /// Wait for a server to be ready, then run a command on it over SSH.
    #[command(name = "exec")]
    Exec(ExecCommand),
    /// Destroy resources in dependency order: servers, volumes, snapshots.
    #[command(name = "teardown")]
    Teardown(TeardownCommand),
}

/// Resource families addressable from the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum KindArg {
    /// Instance server.
    Server,
    /// Block Storage volume.
    Volume,
    /// Block Storage snapshot.
    Snapshot,
}

/// Arguments for `stagehand template`.
#[derive(Debug, Args)]
pub(crate) struct TemplateCommand {
    /// Template file, or directory whose entries are merged by name.
    #[arg(value_name = "PATH")]
    pub(crate) path: String,
}

/// Arguments for `stagehand wait`.
#[derive(Debug, Args)]
pub(crate) struct WaitCommand {
    /// Kind of resource to poll.
    #[arg(value_enum, value_name = "KIND")]
    pub(crate) kind: KindArg,
    /// Resource identifier.
    #[arg(value_name = "ID")]
    pub(crate) id: String,
    /// Zone the resource lives in.
    #[arg(long, env = "SCW_DEFAULT_ZONE", value_name = "ZONE")]
    pub(crate) zone: String,
    /// Status to wait for.
    #[arg(long, value_name = "STATUS")]
    pub(crate) status: String,
    /// Status tolerated on the way; repeat for several. Without any, every
    /// status is tolerated.
    #[arg(long = "via", value_name = "STATUS")]
    pub(crate) via: Vec<String>,
    /// Override the configured wait budget in seconds.
    #[arg(long, value_name = "SECS")]
    pub(crate) timeout: Option<u64>,
}

/// Arguments for `stagehand ready`.
#[derive(Debug, Args)]
pub(crate) struct ReadyCommand {
    /// Server identifier.
    #[arg(value_name = "SERVER_ID")]
    pub(crate) server_id: String,
    /// Zone the server lives in.
    #[arg(long, env = "SCW_DEFAULT_ZONE", value_name = "ZONE")]
    pub(crate) zone: String,
    /// Port to probe instead of the configured SSH port.
    #[arg(long, value_name = "PORT")]
    pub(crate) port: Option<u16>,
}

/// Arguments for `stagehand exec`.
#[derive(Debug, Args)]
pub(crate) struct ExecCommand {
    /// Server identifier.
    #[arg(value_name = "SERVER_ID")]
    pub(crate) server_id: String,
    /// Zone the server lives in.
    #[arg(long, env = "SCW_DEFAULT_ZONE", value_name = "ZONE")]
    pub(crate) zone: String,
    /// Run the command as root through `sudo -n sh -c`.
    #[arg(long)]
    pub(crate) sudo: bool,
    /// SSH port to probe and connect to instead of the configured one.
    #[arg(long, value_name = "PORT")]
    pub(crate) port: Option<u16>,
    /// Command to run on the server, after `--`. Words are joined with
    /// spaces and handed to the remote shell.
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub(crate) command: Vec<String>,
}

/// Arguments for `stagehand teardown`.
#[derive(Debug, Args)]
pub(crate) struct TeardownCommand {
    /// Server to terminate; repeat for several.
    #[arg(long = "server", value_name = "ID")]
    pub(crate) servers: Vec<String>,
    /// Volume to delete; repeat for several.
    #[arg(long = "volume", value_name = "ID")]
    pub(crate) volumes: Vec<String>,
    /// Snapshot to delete; repeat for several.
    #[arg(long = "snapshot", value_name = "ID")]
    pub(crate) snapshots: Vec<String>,
    /// Zone the resources live in.
    #[arg(long, env = "SCW_DEFAULT_ZONE", value_name = "ZONE")]
    pub(crate) zone: String,
}
