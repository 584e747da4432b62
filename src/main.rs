//! Binary entry point for the stagehand CLI.

use std::io::{self, Write};
use std::process;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use stagehand::ledger::{CleanupLedger, ScopeOutcome};
use stagehand::scw::server_readiness_probe;
use stagehand::{
    Addressable, CommandRunner, ConfigError, DeployConfig, ProcessCommandRunner, RemoteSession,
    Resource, ScwCli, SessionConfig, SessionError, TemplateError, WaitError, load_template,
    wait_for_instance_ready, wait_for_status,
};

mod cli;

use cli::{
    Cli, Command, ExecCommand, KindArg, ReadyCommand, TeardownCommand, TemplateCommand,
    WaitCommand,
};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("wait failed: {0}")]
    Wait(#[from] WaitError),
    #[error("remote command failed: {0}")]
    Session(#[from] SessionError),
    #[error("teardown failed for {failed} resource(s); see log output for details")]
    Teardown { failed: usize },
    #[error("failed to write output: {0}")]
    Output(String),
}

impl From<io::Error> for CliError {
    fn from(value: io::Error) -> Self {
        Self::Output(value.to_string())
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let exit_code = match dispatch(&cli.command, &mut io::stdout()) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn dispatch(command: &Command, out: &mut impl Write) -> Result<(), CliError> {
    match command {
        Command::Template(args) => template_command(args, out),
        Command::Wait(args) => {
            let config = load_config()?;
            let scw = ScwCli::with_process_runner(config.scw_bin.clone());
            wait_command(args, &config, &scw, out)
        }
        Command::Ready(args) => {
            let config = load_config()?;
            let scw = ScwCli::with_process_runner(config.scw_bin.clone());
            ready_command(args, &config, &scw, out)
        }
        Command::Exec(args) => {
            let config = load_config()?;
            let scw = ScwCli::with_process_runner(config.scw_bin.clone());
            exec_command(
                args,
                &config,
                &scw,
                ProcessCommandRunner,
                out,
                &mut io::stderr(),
            )
        }
        Command::Teardown(args) => {
            let config = load_config()?;
            let scw = ScwCli::with_process_runner(config.scw_bin.clone());
            teardown_command(args, &config, &scw, out)
        }
    }
}

fn load_config() -> Result<DeployConfig, CliError> {
    let config = DeployConfig::load_without_cli_args()?;
    config.validate()?;
    Ok(config)
}

fn template_command(args: &TemplateCommand, out: &mut impl Write) -> Result<(), CliError> {
    let template = load_template(&Utf8PathBuf::from(&args.path))?;
    let rendered = serde_json::to_string_pretty(&template)
        .map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(out, "{rendered}")?;
    Ok(())
}

fn wait_command<R: CommandRunner>(
    args: &WaitCommand,
    config: &DeployConfig,
    scw: &ScwCli<R>,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let resource: Box<dyn Resource + '_> = match args.kind {
        KindArg::Server => Box::new(scw.server(&args.id, &args.zone)),
        KindArg::Volume => Box::new(scw.volume(&args.id, &args.zone)),
        KindArg::Snapshot => Box::new(scw.snapshot(&args.id, &args.zone)),
    };
    let mut settings = config.poll_settings();
    if let Some(secs) = args.timeout {
        settings.timeout = Some(Duration::from_secs(secs));
    }
    let via = args.via.iter().map(String::as_str).collect::<Vec<_>>();
    let transit = (!via.is_empty()).then_some(via.as_slice());

    wait_for_status(&*resource, &args.status, transit, settings)?;
    writeln!(out, "{resource} reached status {}", args.status)?;
    Ok(())
}

fn ready_command<R: CommandRunner>(
    args: &ReadyCommand,
    config: &DeployConfig,
    scw: &ScwCli<R>,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let server = scw.server(&args.server_id, &args.zone);
    let port = args.port.unwrap_or(config.ssh_port);
    let probe = server_readiness_probe(port);

    wait_for_instance_ready(&server, &probe, config.poll_settings())?;
    let address = server.network_address().unwrap_or_default();
    writeln!(out, "{server} is ready at {address}:{port}")?;
    Ok(())
}

fn exec_command<R: CommandRunner, S: CommandRunner>(
    args: &ExecCommand,
    config: &DeployConfig,
    scw: &ScwCli<R>,
    ssh_runner: S,
    out: &mut impl Write,
    err_out: &mut impl Write,
) -> Result<(), CliError> {
    let server = scw.server(&args.server_id, &args.zone);
    let port = args.port.unwrap_or(config.ssh_port);
    wait_for_instance_ready(&server, &server_readiness_probe(port), config.poll_settings())?;

    let session_config = SessionConfig {
        port,
        ..config.session_config()
    };
    let session = RemoteSession::open(&server, session_config, ssh_runner)?;
    let command = args.command.join(" ");
    let output = if args.sudo {
        session.sudo(&command)?
    } else {
        session.run(&command)?
    };
    out.write_all(output.stdout.as_bytes())?;
    err_out.write_all(output.stderr.as_bytes())?;
    Ok(())
}

fn teardown_command<R: CommandRunner>(
    args: &TeardownCommand,
    config: &DeployConfig,
    scw: &ScwCli<R>,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let mut ledger = CleanupLedger::new().with_teardown_settings(config.teardown_settings());
    for id in &args.servers {
        ledger.register_default(scw.server(id, &args.zone));
    }
    for id in &args.volumes {
        ledger.register_default(scw.volume(id, &args.zone));
    }
    for id in &args.snapshots {
        ledger.register_default(scw.snapshot(id, &args.zone));
    }

    let report = ledger.exit(ScopeOutcome::Success);
    writeln!(
        out,
        "teardown complete: destroyed={}, failed={}",
        report.destroyed, report.failed
    )?;
    if report.failed > 0 {
        return Err(CliError::Teardown {
            failed: report.failed,
        });
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use rstest::{fixture, rstest};
    use stagehand::test_support::{ScriptedRunner, json_block_resource, json_server};

    use super::*;

    #[fixture]
    fn config() -> DeployConfig {
        DeployConfig {
            poll_interval_secs: 0,
            wait_timeout_secs: 1,
            teardown_timeout_secs: Some(1),
            ssh_bin: String::from("ssh"),
            ssh_user: String::from("ec2-user"),
            ssh_port: 22,
            ssh_identity_file: None,
            ssh_batch_mode: true,
            ssh_strict_host_key_checking: false,
            ssh_known_hosts_file: String::from("/dev/null"),
            scw_bin: String::from("scw"),
        }
    }

    fn rendered(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"))
    }

    #[rstest]
    fn wait_reports_reached_status(config: DeployConfig) {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), json_block_resource("vol-1", "creating"), "");
        runner.push_output(Some(0), json_block_resource("vol-1", "available"), "");
        let scw = ScwCli::new("scw", runner);
        let args = WaitCommand {
            kind: KindArg::Volume,
            id: String::from("vol-1"),
            zone: String::from("fr-par-1"),
            status: String::from("available"),
            via: vec![String::from("creating")],
            timeout: None,
        };
        let mut buf = Vec::new();

        wait_command(&args, &config, &scw, &mut buf).unwrap_or_else(|err| panic!("wait: {err}"));

        assert_eq!(
            rendered(buf),
            "volume vol-1@fr-par-1 reached status available\n"
        );
    }

    #[rstest]
    fn wait_surfaces_unexpected_status(config: DeployConfig) {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), json_server("srv-1", "stopped", None), "");
        let scw = ScwCli::new("scw", runner);
        let args = WaitCommand {
            kind: KindArg::Server,
            id: String::from("srv-1"),
            zone: String::from("fr-par-1"),
            status: String::from("running"),
            via: vec![String::from("starting")],
            timeout: Some(0),
        };

        let err = wait_command(&args, &config, &scw, &mut Vec::new()).expect_err("stopped");

        assert!(matches!(err, CliError::Wait(WaitError::UnexpectedStatus { .. })));
    }

    #[rstest]
    fn ready_reports_address_once_port_accepts(config: DeployConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|err| panic!("bind: {err}"));
        let port = listener
            .local_addr()
            .unwrap_or_else(|err| panic!("listener addr: {err}"))
            .port();
        let runner = ScriptedRunner::new();
        runner.push_output(
            Some(0),
            json_server("srv-1", "running", Some("127.0.0.1")),
            "",
        );
        let scw = ScwCli::new("scw", runner);
        let args = ReadyCommand {
            server_id: String::from("srv-1"),
            zone: String::from("fr-par-1"),
            port: Some(port),
        };
        let mut buf = Vec::new();

        ready_command(&args, &config, &scw, &mut buf)
            .unwrap_or_else(|err| panic!("ready: {err}"));

        assert_eq!(
            rendered(buf),
            format!("server srv-1@fr-par-1 is ready at 127.0.0.1:{port}\n")
        );
        drop(listener);
    }

    #[rstest]
    fn teardown_reports_summary(config: DeployConfig) {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_success();
        let scw = ScwCli::new("scw", runner.clone());
        let args = TeardownCommand {
            servers: Vec::new(),
            volumes: vec![String::from("vol-1")],
            snapshots: vec![String::from("snap-1")],
            zone: String::from("fr-par-1"),
        };
        let mut buf = Vec::new();

        teardown_command(&args, &config, &scw, &mut buf)
            .unwrap_or_else(|err| panic!("teardown: {err}"));

        assert_eq!(rendered(buf), "teardown complete: destroyed=2, failed=0\n");
        assert_eq!(runner.invocations().len(), 2);
    }

    #[rstest]
    fn teardown_fails_when_any_resource_survives(config: DeployConfig) {
        let runner = ScriptedRunner::new();
        runner.push_failure(1);
        runner.push_success();
        let scw = ScwCli::new("scw", runner);
        let args = TeardownCommand {
            servers: Vec::new(),
            volumes: vec![String::from("vol-1"), String::from("vol-2")],
            snapshots: Vec::new(),
            zone: String::from("fr-par-1"),
        };
        let mut buf = Vec::new();

        let err = teardown_command(&args, &config, &scw, &mut buf).expect_err("one delete fails");

        assert!(matches!(err, CliError::Teardown { failed: 1 }));
        assert_eq!(rendered(buf), "teardown complete: destroyed=1, failed=1\n");
    }

    fn exec_args(port: u16, sudo: bool, command: &[&str]) -> ExecCommand {
        ExecCommand {
            server_id: String::from("srv-1"),
            zone: String::from("fr-par-1"),
            sudo,
            port: Some(port),
            command: command.iter().map(|word| (*word).to_owned()).collect(),
        }
    }

    #[rstest]
    fn exec_waits_for_server_then_runs_sudo_command(config: DeployConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|err| panic!("bind: {err}"));
        let port = listener
            .local_addr()
            .unwrap_or_else(|err| panic!("listener addr: {err}"))
            .port();
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), json_server("srv-1", "starting", None), "");
        runner.push_output(
            Some(0),
            json_server("srv-1", "running", Some("127.0.0.1")),
            "",
        );
        runner.push_output(Some(0), "done\n", "note\n");
        let scw = ScwCli::new("scw", runner.clone());
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        exec_command(
            &exec_args(port, true, &["touch", "/TESTFILE"]),
            &config,
            &scw,
            runner.clone(),
            &mut stdout,
            &mut stderr,
        )
        .unwrap_or_else(|err| panic!("exec: {err}"));

        assert_eq!(rendered(stdout), "done\n");
        assert_eq!(rendered(stderr), "note\n");
        let commands = runner
            .invocations()
            .iter()
            .map(|invocation| invocation.command_string())
            .collect::<Vec<_>>();
        assert_eq!(
            commands,
            [
                String::from("scw instance server get srv-1 zone=fr-par-1 -o json"),
                String::from("scw instance server get srv-1 zone=fr-par-1 -o json"),
                format!(
                    "ssh -p {port} -o BatchMode=yes -o StrictHostKeyChecking=no \
                     -o UserKnownHostsFile=/dev/null ec2-user@127.0.0.1 \
                     sudo -n sh -c 'touch /TESTFILE'"
                ),
            ]
        );
        drop(listener);
    }

    #[rstest]
    fn exec_surfaces_remote_failure(config: DeployConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|err| panic!("bind: {err}"));
        let port = listener
            .local_addr()
            .unwrap_or_else(|err| panic!("listener addr: {err}"))
            .port();
        let runner = ScriptedRunner::new();
        runner.push_output(
            Some(0),
            json_server("srv-1", "running", Some("127.0.0.1")),
            "",
        );
        runner.push_output(Some(2), "", "no such file");
        let scw = ScwCli::new("scw", runner.clone());

        let err = exec_command(
            &exec_args(port, false, &["cat", "/missing"]),
            &config,
            &scw,
            runner,
            &mut Vec::new(),
            &mut Vec::new(),
        )
        .expect_err("remote command fails");

        assert!(matches!(
            err,
            CliError::Session(SessionError::RemoteFailure { code: Some(2), .. })
        ));
        drop(listener);
    }

    #[rstest]
    fn exec_does_not_connect_to_a_stopped_server(config: DeployConfig) {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), json_server("srv-1", "stopped", None), "");
        let scw = ScwCli::new("scw", runner.clone());

        let err = exec_command(
            &exec_args(22, false, &["uptime"]),
            &config,
            &scw,
            runner.clone(),
            &mut Vec::new(),
            &mut Vec::new(),
        )
        .expect_err("stopped server never becomes ready");

        assert!(matches!(err, CliError::Wait(WaitError::UnexpectedStatus { .. })));
        assert_eq!(runner.invocations().len(), 1);
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        write_error(&mut buf, &CliError::Teardown { failed: 2 });
        assert!(
            rendered(buf).contains("teardown failed for 2 resource(s)"),
            "unexpected rendering"
        );
    }
}
