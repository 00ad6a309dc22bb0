use anyhow::Context;
use clap::{Parser, Subcommand};
use record_upsert::config::Config;
use record_upsert::input::read_records;
use record_upsert::{logging, metrics, UpsertPipeline};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "record_upsert")]
#[command(about = "Reconcile crawled records against a relational store and upsert them in bulk")]
#[command(version = "0.1.0")]
struct Cli {
    /// Config file (defaults to $RECORD_UPSERT_CONFIG, then upsert.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile and write records of one shape
    Apply {
        /// Shape name as configured under [shapes.<name>]
        #[arg(long)]
        shape: String,
        /// JSON array or NDJSON file of records
        #[arg(long)]
        input: PathBuf,
        /// Records per batch (default: the whole file is one batch)
        #[arg(long)]
        batch_size: Option<usize>,
        /// Classify only, print the plan, write nothing. Each batch is
        /// classified against the store as it is now, so with --batch-size a
        /// key first seen in an earlier batch is planned as a create again.
        #[arg(long)]
        dry_run: bool,
        /// Write a Prometheus text snapshot here when done
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },
    /// Validate and list the configured shapes
    Shapes,
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    let _log_guard = logging::init_logging(&config.logging);

    match cli.command {
        Commands::Apply {
            shape,
            input,
            batch_size,
            dry_run,
            metrics_out,
        } => {
            metrics::init_metrics();
            let records = read_records(&input)
                .with_context(|| format!("reading records from {}", input.display()))?;
            let batch_size = batch_size.unwrap_or(records.len()).max(1);
            info!("Loaded {} records for shape {}", records.len(), shape);

            if dry_run && records.len() > batch_size {
                warn!("Dry run over several batches: creates repeated across batches are not merged");
            }

            let mut pipeline = UpsertPipeline::open(&config)?;
            let mut failed = 0;
            for batch in records.chunks(batch_size) {
                if dry_run {
                    let plan = pipeline.reconcile(&shape, batch)?;
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                    continue;
                }
                match pipeline.process_batch(&shape, batch) {
                    Ok(outcome) => println!("{}", serde_json::to_string(&outcome)?),
                    Err(e) => {
                        // Already logged with context; keep going with the next batch.
                        failed += 1;
                        warn!("Skipping failed batch: {}", e);
                    }
                }
            }
            pipeline.close()?;

            if let Some(path) = metrics_out {
                match metrics::render() {
                    Some(text) => std::fs::write(&path, text)
                        .with_context(|| format!("writing metrics to {}", path.display()))?,
                    None => warn!("Metrics recorder not installed; nothing written"),
                }
            }

            if failed > 0 {
                error!("{} batches failed", failed);
                anyhow::bail!("{failed} batches failed");
            }
        }
        Commands::Shapes => {
            let pipeline_shapes = record_upsert::ShapeRegistry::from_config(&config)?;
            for (name, descriptor) in pipeline_shapes.iter() {
                println!(
                    "{name}: table={} fields=[{}] match=[{}] update={}",
                    descriptor.table(),
                    descriptor.fields().join(", "),
                    descriptor.match_fields().join(", "),
                    descriptor.update_allowed()
                );
            }
        }
    }
    Ok(())
}
