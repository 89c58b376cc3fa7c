//! tether command-line interface
//!
//! ```text
//! tether connect -h HOST -p PORT [-t 10s]   relay stdin/stdout over TCP
//! tether echo [--bind 127.0.0.1:8080]       run the line echo server
//! ```
//!
//! Diagnostics go to stderr through `tracing`; stdout carries only relayed
//! records. Ctrl-C ends either command cleanly.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use tether_core::constants::DEFAULT_TIMEOUT_STR;
use tether_core::{Endpoint, parse_duration};
use tether_network::{EchoServer, EchoServerConfig, RelayConfig, Session, default_bind_addr};

/// Bound on runtime shutdown once a command returns. A blocked stdin read
/// would otherwise keep the process alive.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version, about = "Line-oriented TCP relay")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Relay stdin to a remote TCP endpoint and its replies to stdout
    #[command(disable_help_flag = true)]
    Connect(ConnectArgs),

    /// Run a server that echoes every line back with a prefix
    Echo(EchoArgs),
}

#[derive(Args, Debug)]
struct ConnectArgs {
    /// Remote host name or address
    #[arg(short = 'h', long)]
    host: String,

    /// Remote port
    #[arg(short, long)]
    port: u16,

    /// Session timeout, e.g. 10s, 1m30s, 250ms
    #[arg(short, long, default_value = DEFAULT_TIMEOUT_STR, value_parser = parse_timeout)]
    timeout: Duration,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

#[derive(Args, Debug)]
struct EchoArgs {
    /// Address to listen on
    #[arg(short, long, default_value_t = default_bind_addr())]
    bind: SocketAddr,

    /// Text placed before each echoed line
    #[arg(long)]
    prefix: Option<String>,
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    let timeout = parse_duration(s).map_err(|e| e.to_string())?;
    if timeout.is_zero() {
        return Err("timeout must be greater than zero".to_string());
    }
    Ok(timeout)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted");
                token.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}

async fn connect(args: ConnectArgs) -> Result<ExitCode> {
    let endpoint = Endpoint::new(args.host, args.port).context("invalid endpoint")?;
    let config = RelayConfig::new(endpoint, args.timeout);

    let session = Session::new(config, tokio::io::stdin(), tokio::io::stdout());
    cancel_on_interrupt(session.cancellation_token());

    match session.run().await {
        Ok(report) => {
            info!(
                records_sent = report.records_sent,
                records_received = report.records_received,
                "Session ended: {}",
                report.end
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("{}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn echo(args: EchoArgs) -> Result<ExitCode> {
    let mut config = EchoServerConfig::with_bind_addr(args.bind);
    if let Some(prefix) = args.prefix {
        config.reply_prefix = prefix;
    }

    let server = EchoServer::bind(config).await?;
    eprintln!("Listening on {}", server.local_addr()?);

    let stop = CancellationToken::new();
    cancel_on_interrupt(stop.clone());
    server.run(stop).await?;

    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    debug!(?cli, "Starting tether {}", tether_core::VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    let result = runtime.block_on(async {
        match cli.command {
            Command::Connect(args) => connect(args).await,
            Command::Echo(args) => echo(args).await,
        }
    });

    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_connect_short_flags() {
        let cli = Cli::try_parse_from(["tether", "connect", "-h", "example.com", "-p", "23"]).unwrap();
        let Command::Connect(args) = cli.command else {
            panic!("expected connect");
        };
        assert_eq!(args.host, "example.com");
        assert_eq!(args.port, 23);
        assert_eq!(args.timeout, Duration::from_secs(10));
    }

    #[rstest]
    #[case("5s", Duration::from_secs(5))]
    #[case("1m30s", Duration::from_secs(90))]
    #[case("250ms", Duration::from_millis(250))]
    fn test_connect_timeout_flag(#[case] value: &str, #[case] expected: Duration) {
        let cli = Cli::try_parse_from([
            "tether", "connect", "--host", "localhost", "--port", "8080", "-t", value,
        ])
        .unwrap();
        let Command::Connect(args) = cli.command else {
            panic!("expected connect");
        };
        assert_eq!(args.timeout, expected);
    }

    #[rstest]
    #[case("ten seconds")]
    #[case("10")]
    #[case("0s")]
    #[case("-1s")]
    fn test_invalid_timeout_rejected(#[case] value: &str) {
        let result = Cli::try_parse_from([
            "tether", "connect", "-h", "localhost", "-p", "8080", "--timeout", value,
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_connect_requires_host_and_port() {
        assert!(Cli::try_parse_from(["tether", "connect", "-p", "8080"]).is_err());
        assert!(Cli::try_parse_from(["tether", "connect", "-h", "localhost"]).is_err());
    }

    #[test]
    fn test_echo_defaults() {
        let cli = Cli::try_parse_from(["tether", "echo"]).unwrap();
        let Command::Echo(args) = cli.command else {
            panic!("expected echo");
        };
        assert_eq!(args.bind, default_bind_addr());
        assert!(args.prefix.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_verbose_is_global() {
        let cli = Cli::try_parse_from(["tether", "echo", "--verbose", "--bind", "127.0.0.1:0"])
            .unwrap();
        assert!(cli.verbose);
    }
}
