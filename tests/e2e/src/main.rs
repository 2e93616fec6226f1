//! End-to-End Test Runner for Actor Ports

use anyhow::Result;
use clap::Parser;
use port_e2e_tests::{all_scenarios, TestConfig, TestFramework, TestResult, Transport};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario to run, or "all"
    #[arg(short, long, default_value = "all")]
    scenario: String,

    /// Transport: local, tcp, jsonrpc or all
    #[arg(long, default_value = "all")]
    transport: String,

    /// Per-scenario timeout in seconds
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,

    /// Write results as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("port_e2e_tests={log_level},warn").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let transports: Vec<Transport> = if args.transport == "all" {
        Transport::ALL.to_vec()
    } else {
        vec![args.transport.parse()?]
    };

    let mut results: Vec<TestResult> = Vec::new();
    for transport in transports {
        let framework = TestFramework::new(TestConfig {
            timeout_secs: args.timeout,
            transport,
            cleanup: true,
        });
        for scenario in all_scenarios() {
            if args.scenario != "all" && args.scenario != scenario.name() {
                continue;
            }
            results.push(framework.run_scenario(scenario.as_ref()).await);
        }
    }

    let passed = results.iter().filter(|result| result.success).count();
    for result in &results {
        if result.success {
            info!("PASS {} [{}] in {:?}", result.scenario_name, result.transport, result.duration);
        } else {
            error!(
                "FAIL {} [{}]: {}",
                result.scenario_name,
                result.transport,
                result.error_message.as_deref().unwrap_or("unknown error")
            );
            for validation in result.validation_results.iter().filter(|v| !v.passed) {
                error!("  {}: {}", validation.validator, validation.message);
            }
        }
    }
    info!("{passed}/{} scenarios passed", results.len());

    if let Some(path) = args.output {
        tokio::fs::write(&path, serde_json::to_vec_pretty(&results)?).await?;
        info!("Results written to {}", path.display());
    }

    if passed != results.len() {
        anyhow::bail!("{} scenario(s) failed", results.len() - passed);
    }
    Ok(())
}
