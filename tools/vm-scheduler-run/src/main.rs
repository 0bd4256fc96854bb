use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use env_logger::Builder;
use indexmap::IndexMap;
use log::info;

use dslab_vm_scheduler::core::config::SimulationConfig;
use dslab_vm_scheduler::experiment::{save_reports, Experiment};
use dslab_vm_scheduler::ClusterSimulation;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
/// Runs cluster simulation with energy-aware VM scheduler
struct Args {
    /// Path to YAML file with simulation configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Path to produced JSON file with simulation results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Placement strategy overriding the one from config
    #[arg(short, long)]
    strategy: Option<String>,

    /// Compare all built-in placement strategies
    #[arg(long)]
    compare: bool,

    /// Number of threads to use when comparing strategies
    #[arg(short, long, default_value_t = 1)]
    threads: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    Builder::from_default_env().format_timestamp(None).init();
    let args = Args::parse();

    let mut config = SimulationConfig::from_file(&args.config)?;
    if let Some(strategy) = &args.strategy {
        config.scheduler.placement = strategy.clone();
    }

    let reports = if args.compare {
        Experiment::with_all_strategies(config).run(args.threads)?
    } else {
        let report = ClusterSimulation::new(config)?.run();
        let mut reports = IndexMap::new();
        reports.insert(report.strategy.clone(), report);
        reports
    };

    for (strategy, report) in reports.iter() {
        info!(
            "{}: energy {:.3}, completed {}/{}, unplaced {}",
            strategy, report.total_energy, report.tasks_completed, report.tasks_total, report.tasks_unplaced
        );
    }

    let output = args.output.unwrap_or_else(|| {
        let stem = args
            .config
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "simulation".to_string());
        args.config.with_file_name(format!("{}-results", stem)).with_extension("json")
    });
    save_reports(&output, &reports)?;
    Ok(())
}
