//! linkage-calibrate CLI: threshold sweeps and indirect link resolution.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use linkage_calibrate::config::{IndirectConfig, RunConfig};
use linkage_calibrate::indirect::GroundTruthOracle;
use linkage_calibrate::linkage::DirectLinkage;
use linkage_calibrate::quality::LinkageQuality;
use linkage_calibrate::record::RecordSource;
use linkage_calibrate::sweep::{
    DEFAULT_GRANULARITY, MetricState, Sample, SweepEngine, ThresholdGrid,
};

#[derive(Parser)]
#[command(
    name = "linkage-calibrate",
    version,
    about = "Threshold-sweep evaluation for record linkage"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run, or resume, a threshold sweep.
    Sweep {
        /// Path to the run configuration (TOML).
        #[arg(long)]
        config: PathBuf,

        /// Override the output directory from the config.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Only check the first N (permuted) records of the first source.
        #[arg(long)]
        records: Option<usize>,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Resolve indirect links and assess them against ground truth.
    Resolve {
        /// Path to the indirect-resolution configuration (TOML).
        #[arg(long)]
        config: PathBuf,

        /// Print the linkage quality as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Count the ground-truth true links of a run configuration.
    CountTruth {
        #[arg(long)]
        config: PathBuf,

        /// Also list every ground-truth link as an id pair.
        #[arg(long)]
        list: bool,
    },

    /// Print the threshold grid.
    Grid {
        #[arg(long, default_value_t = DEFAULT_GRANULARITY)]
        granularity: usize,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sweep {
            config,
            output_dir,
            records,
            json,
        } => {
            let mut run = RunConfig::load(&config)?;
            if let Some(dir) = output_dir {
                run.sweep.output_dir = dir;
            }
            if let Some(n) = records {
                run.sweep.records_to_check = Some(n);
            }
            let prepared = run.prepare()?;

            let interrupt = Arc::new(AtomicBool::new(false));
            for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
                signal_hook::flag::register(signal, Arc::clone(&interrupt)).into_diagnostic()?;
            }

            let mut engine = SweepEngine::new(prepared.spec, prepared.metrics, run.sweep.clone())?
                .with_dataset(&run.dataset)
                .with_interrupt_flag(interrupt);
            engine.import_checkpoint_if_present()?;
            engine.load_records(
                &prepared.source1,
                prepared
                    .source2
                    .as_ref()
                    .map(|s| s as &dyn RecordSource),
            )?;
            let summary = engine.run()?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&summary).into_diagnostic()?
                );
            } else {
                println!(
                    "Sweep {}: {}/{} records in {} blocks ({:?} start)",
                    summary.phase,
                    summary.records_processed,
                    summary.records_to_check,
                    summary.blocks_run,
                    summary.resumed_from,
                );
                for state in engine.states() {
                    print_best_threshold(state, engine.grid());
                }
                println!(
                    "Results: {}",
                    engine.output_paths().results.display()
                );
            }
        }

        Commands::Resolve { config, json } => {
            let prepared = IndirectConfig::load(&config)?.prepare()?;
            let assessment = prepared.resolver.assess(&prepared.oracle);
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&assessment.quality).into_diagnostic()?
                );
            } else {
                println!("{}", assessment.quality);
                if assessment.unknown > 0 {
                    println!("{} selected links had no ground truth", assessment.unknown);
                }
            }
        }

        Commands::CountTruth { config, list } => {
            let run = RunConfig::load(&config)?;
            let prepared = run.prepare()?;
            let records1 = prepared.source1.records()?;
            let records2 = match &prepared.source2 {
                Some(source) => source.records()?,
                None => records1.clone(),
            };
            let linkage = DirectLinkage::new(prepared.spec, records1, records2);
            if list {
                for (id1, id2) in linkage.ground_truth_links() {
                    println!("{id1},{id2}");
                }
            }
            println!(
                "{}: {} ground-truth links",
                run.linkage_type,
                linkage.number_of_ground_truth_true_links()
            );
        }

        Commands::Grid { granularity } => {
            let grid = ThresholdGrid::new(granularity)?;
            let thresholds: Vec<String> = grid.thresholds().map(|t| format!("{t:.2}")).collect();
            println!("{}", thresholds.join(","));
        }
    }

    Ok(())
}

/// Print the threshold with the highest F-measure, pooling all runs.
fn print_best_threshold(state: &MetricState, grid: &ThresholdGrid) {
    let pooled: Vec<Sample> = (0..grid.size())
        .map(|i| {
            state.samples.iter().fold(Sample::default(), |acc, run| Sample {
                tp: acc.tp + run[i].tp,
                fp: acc.fp + run[i].fp,
                fn_: acc.fn_ + run[i].fn_,
                tn: acc.tn + run[i].tn,
            })
        })
        .collect();
    let best = pooled
        .iter()
        .enumerate()
        .map(|(i, s)| (i, LinkageQuality::new(s.tp, s.fp, s.fn_)))
        .max_by(|a, b| a.1.f_measure().total_cmp(&b.1.f_measure()));
    if let Some((i, q)) = best {
        println!(
            "  {}: best threshold {:.2} (F {:.2}, precision {:.2}, recall {:.2})",
            state.name,
            grid.index_to_threshold(i),
            q.f_measure(),
            q.precision(),
            q.recall()
        );
    }
}
