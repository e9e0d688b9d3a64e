use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use mesh_harness::cli::Cli;
use mesh_harness::config::HarnessConfig;
use mesh_harness::process::Supervisor;
use mesh_harness::scenario::{Scenario, TestOutcome};
use mesh_harness::telemetry::logging;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config()).context("failed to initialise logging")?;

    let config = cli.to_config();
    config.validate().context("invalid harness configuration")?;

    let outcome = drive(&config).await;
    std::process::exit(outcome.exit_code());
}

async fn drive(config: &HarnessConfig) -> TestOutcome {
    let mut supervisor = Supervisor::new(config.peer.clone(), config.timings.termination_grace);
    if config.reclaim_ports {
        supervisor = supervisor.with_port_reclaim(config.known_ports());
    }

    let scenario = Scenario::new(config);
    let outcome = tokio::select! {
        outcome = scenario.run(&mut supervisor) => outcome,
        signal = shutdown_signal() => {
            warn!(signal, "interrupted; aborting scenario");
            TestOutcome::Interrupted(signal)
        }
    };

    supervisor.terminate_all().await;
    report(&outcome);

    // Lets the non-blocking log writer drain before the process exits.
    tokio::time::sleep(config.timings.exit_grace).await;
    outcome
}

fn report(outcome: &TestOutcome) {
    match outcome {
        TestOutcome::Passed => {
            info!(outcome = "success", "all scenario steps completed");
            info!(outcome = "success", "seller started and ready");
            info!(outcome = "success", "buyer started and ready");
            info!(outcome = "success", "p2p messages delivered in both directions");
            info!(outcome = "success", "status checks completed for both peers");
        }
        TestOutcome::Failed(failure) => {
            error!(step = %failure.step, error = %failure.source, "scenario FAILED");
        }
        TestOutcome::Interrupted(signal) => {
            error!(signal, "scenario interrupted before completion");
        }
    }
}

async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => tokio::select! {
                _ = ctrl_c() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            },
            Err(err) => {
                warn!(error = %err, "unable to listen for SIGTERM");
                ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
        "ctrl-c"
    }
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "unable to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
