use anyhow::Context;
use clap::Parser;
use log::info;
use sigintcore::scanning::CancellationToken;
use std::path::PathBuf;
use std::thread;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::WorkflowConfig;
use workflow::runner::{Runner, WorkflowResult};

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Simulated multi-radio SIGINT scan driver")]
struct Args {
    /// Run one timed scan session and write the report
    #[arg(long, default_value_t = false)]
    offline: bool,
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Number of simulated radios
    #[arg(long)]
    channels: Option<usize>,
    /// Session length for offline runs
    #[arg(long)]
    duration_secs: Option<f64>,
    /// Keep scanning until Ctrl+C
    #[arg(long, default_value_t = false)]
    serve: bool,
    /// JSON-lines report, appended to on every run
    #[arg(long, default_value = "tools/data/sigint_report.jsonl")]
    report: PathBuf,
}

fn summarise(label: &str, result: &WorkflowResult) {
    println!(
        "{} run -> hits {}, anomalies {}, bearings {}, dropped {}",
        label,
        result.hit_count(),
        result.anomalies.len(),
        result.bearings.len(),
        result.status.metrics.dropped_hits
    );
    for report in &result.bearings {
        println!(
            "  anomaly #{}: {:.3} MHz bearing {:.1} deg (confidence {:.2})",
            report.anomaly_id,
            report.bearing.frequency_hz / 1e6,
            report.bearing.bearing_deg,
            report.bearing.confidence
        );
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let workflow_config = if let Some(path) = &args.workflow {
        WorkflowConfig::load(path)?.with_overrides(args.channels, args.duration_secs)
    } else {
        let defaults = WorkflowConfig::default();
        WorkflowConfig::from_args(
            args.channels.unwrap_or(defaults.channels),
            args.duration_secs.unwrap_or(defaults.duration_secs),
        )
    };
    let runner = Runner::new(workflow_config);

    if args.offline {
        let result = runner.execute()?;
        summarise("Offline", &result);
        result.append_report(&args.report)?;
        info!("report appended to {}", args.report.display());
    }
    if args.serve {
        println!("Scanning until Ctrl+C...");
        let cancel = CancellationToken::new();
        let worker = {
            let runner = runner.clone();
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("sigint-session".into())
                .spawn(move || runner.run(&cancel, None))
                .context("spawning session thread")?
        };

        let runtime = TokioBuilder::new_current_thread()
            .enable_all()
            .build()
            .context("creating runtime for signal handling")?;
        runtime.block_on(async {
            signal::ctrl_c().await.context("awaiting Ctrl+C to exit")?;
            Ok::<(), anyhow::Error>(())
        })?;
        cancel.cancel();

        let result = worker
            .join()
            .map_err(|_| anyhow::anyhow!("session thread panicked"))??;
        summarise("Live", &result);
        result.append_report(&args.report)?;
    }

    Ok(())
}
