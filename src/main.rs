use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowgate::config::{FlowgateConfig, LoggingConfig};
use flowgate::gate::{AdmissionGate, GateOutcome};
use flowgate::global;
use flowgate::ratelimit::{FlowRule, RuleSet};

/// Answers request targets read from stdin, one per line, through a flow-limited gate.
#[derive(Parser, Debug)]
#[command(name = "flowgate", version, about)]
struct Args {
    /// Service configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Flow rule file (YAML or JSON), overrides the configured path
    #[arg(short, long)]
    rules: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = FlowgateConfig::load(args.config.as_deref())?;
    if let Some(rules) = args.rules {
        config.rules.path = Some(rules);
    }

    init_tracing(&config.logging);

    info!("Starting Flowgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let rules = match &config.rules.path {
        Some(path) => RuleSet::from_file(path)?,
        None => {
            info!("No rule file configured, using the built-in /sayHello rule");
            RuleSet::new(vec![FlowRule::qps("/sayHello", 2.0)])
        }
    };

    let limiter = global::initialize(rules)?;
    let gate = AdmissionGate::new(limiter);

    let reload = config.rules.path.clone().zip(config.rules.reload_interval());
    if let Some((path, interval)) = reload {
        tokio::spawn(reload_rules(path, interval));
    }

    let interrupted = tokio::select! {
        result = serve_stdin(&gate) => {
            result?;
            false
        }
        _ = shutdown_signal() => true,
    };

    global::teardown();
    info!("Flowgate stopped");

    if interrupted {
        // A pending blocking stdin read would otherwise hold the runtime open
        std::process::exit(0);
    }
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.with_target(false).with_thread_ids(true).init();
    }
}

/// Read request targets from stdin and answer each one on stdout.
async fn serve_stdin(gate: &AdmissionGate) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match gate.check_request(&line) {
            Ok(GateOutcome::Allow { .. }) => "200 hello".to_string(),
            Ok(GateOutcome::Reject { status, retry_after }) => format!(
                "{} Too Many Requests (retry after {}ms)",
                status,
                retry_after.as_millis()
            ),
            Err(e) => format!("400 {}", e),
        };

        stdout.write_all(response.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!("Input closed");
    Ok(())
}

/// Periodically re-read the rule file. A file that fails to load leaves the
/// active rules in place.
async fn reload_rules(path: PathBuf, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately and the rules were just loaded
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match RuleSet::from_file(&path).and_then(global::load_rules) {
            Ok(()) => info!(path = %path.display(), "Flow rules reloaded"),
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "Rejected flow rule reload, keeping previous rules"
            ),
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
