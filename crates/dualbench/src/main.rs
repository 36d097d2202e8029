//! DualBench - benchmark runner.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dualbench::{run_benchmark, Args};

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dualbench=info,dualbench_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting dualbench");

    let args = Args::parse();
    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    tracing::info!(
        counts = ?config.counts,
        concurrency = ?config.concurrency,
        workloads = ?config.workloads,
        backends = %config.backends,
        store = %config.store,
        output = %config.output.display(),
        "configuration loaded"
    );

    match run_benchmark(config) {
        Ok(outcome) => {
            for summary in &outcome.report.summaries {
                tracing::info!(
                    workload = %summary.workload,
                    cooperative_wins = summary.cooperative_wins,
                    pooled_wins = summary.pooled_wins,
                    ties = summary.ties,
                    avg_diff_percent = ?summary.avg_diff_percent,
                    overall_faster = ?summary.overall_faster,
                    "workload summary"
                );
            }
            for summary in &outcome.report.concurrency_summaries {
                tracing::info!(
                    concurrency = summary.concurrency,
                    cooperative_wins = summary.cooperative_wins,
                    pooled_wins = summary.pooled_wins,
                    ties = summary.ties,
                    avg_diff_percent = ?summary.avg_diff_percent,
                    overall_faster = ?summary.overall_faster,
                    "concurrency summary"
                );
            }
            ExitCode::from(outcome.exit_code() as u8)
        }
        Err(e) => {
            tracing::error!(error = %e, "benchmark failed");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
