//! Minimal demo harness for `openpull_core`. The real CLI launcher (signal
//! propagation, richer exit semantics) is an external collaborator per the
//! spec; this binary exists to exercise the library end to end: spawn a
//! child process, forward its stdout/stderr through the connection engine,
//! and wait for it to exit.

use std::process::Stdio;

use clap::Parser;
use openpull_core::config::CliConfig;
use openpull_core::connection::ConnectionInfo;
use openpull_core::manager::Manager;
use tokio::process::Command;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "openpull-agent", about = "Forward a child process's logs over an openpull session")]
struct Cli {
    /// openpull://<role>:<key>@<host>[:<port>]/<publicToken?>
    #[arg(long, env = "OPENPULL_URL")]
    url: Option<String>,

    /// Command to spawn and forward stdout/stderr from.
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    openpull_core::telemetry::init_tracing();

    let cli = Cli::parse();
    let cfg = CliConfig::from_env();
    let url = cli.url.or(cfg.url).unwrap_or_else(|| {
        error!(target = "cli", "no connection string: pass --url or set OPENPULL_URL");
        std::process::exit(1);
    });

    let info = match ConnectionInfo::parse(&url) {
        Ok(info) => info,
        Err(err) => {
            error!(target = "cli", %err, "failed to parse connection string");
            std::process::exit(1);
        }
    };

    let manager = match Manager::connect(info).await {
        Ok(manager) => manager,
        Err(err) => {
            error!(target = "cli", %err, "failed to connect");
            std::process::exit(1);
        }
    };
    info!(target = "cli", peer_id = ?manager.peer_id().await, "connected");

    let (program, args) = cli
        .command
        .split_first()
        .expect("clap enforces at least one element");

    let mut child = match Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            error!(target = "cli", %err, "failed to spawn child process");
            manager.disconnect().await;
            std::process::exit(1);
        }
    };

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");
    let dispatch = manager.forward_streams(stdout, stderr);

    let status = tokio::select! {
        status = child.wait() => status,
        _ = tokio::signal::ctrl_c() => {
            warn!(target = "cli", "interrupted, terminating child");
            let _ = child.start_kill();
            child.wait().await
        }
    };

    match status {
        Ok(status) => info!(target = "cli", code = ?status.code(), "child exited"),
        Err(err) => error!(target = "cli", %err, "failed to wait on child"),
    }

    tokio::time::sleep(cfg.exit_delay).await;
    dispatch.abort();
    manager.disconnect().await;
}
