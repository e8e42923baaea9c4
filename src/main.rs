use anyhow::Context as _;
use clap::{Parser, Subcommand};
use dotenv::dotenv;

use stepflow::capability::{FileSource, MemoryStore, SqliteStore};
use stepflow::config::AppConfig;
use stepflow::engine::{AlertStatus, Run, RunReport, StepOutcome};
use stepflow::flow::transactions::{self, INPUT_SOURCE};
use stepflow::flow::{Flow, FlowBuilder, StepRegistry};

use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_DATABASE: &str = "stepflow.db";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a flow over a set of input records
    Run {
        /// Path to the input records, or the records themselves
        #[arg(short, long)]
        input: String,

        /// SQLite database receiving published records
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Flow definition file (defaults to the built-in transactions flow)
        #[arg(short, long)]
        flow: Option<PathBuf>,

        /// Make this step fail with a simulated error
        #[arg(long)]
        fail_step: Option<String>,

        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check that a flow definition builds into a valid graph
    Validate {
        /// Flow definition file (defaults to the built-in transactions flow)
        #[arg(short, long)]
        flow: Option<PathBuf>,
    },
}

async fn build_flow(
    builder: &FlowBuilder,
    flow: Option<&PathBuf>,
) -> Result<Flow, stepflow::error::FlowError> {
    match flow {
        Some(path) => {
            log::info!("Loading flow from {}", path.display());
            builder.build_file(path).await
        }
        None => builder.build(&transactions::definition()?).await,
    }
}

fn print_report(report: &RunReport) {
    println!("Run {} finished", report.run_id);
    for record in &report.steps {
        match &record.outcome {
            StepOutcome::Succeeded => {
                println!("  ok      {:<22} {:>6} ms", record.step, record.duration_ms)
            }
            StepOutcome::Caught { flag, cause } => println!(
                "  caught  {:<22} {:>6} ms  [{}] {}",
                record.step, record.duration_ms, flag, cause
            ),
        }
    }

    if report.failures.is_clean() {
        println!("No failures");
        return;
    }
    println!("{}", report.failures.message(&report.run_id));
    match &report.failures.alert {
        AlertStatus::Sent => println!("Alert sent"),
        AlertStatus::Failed(reason) => println!("Alert not sent: {}", reason),
        AlertStatus::NotNeeded => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Run {
            input,
            database,
            flow,
            fail_step,
            config,
            json,
        } => {
            let config = AppConfig::load(config.as_deref())?;
            let database = database
                .or_else(|| config.database.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));

            let store = SqliteStore::open(&database)
                .with_context(|| format!("opening database {}", database.display()))?;
            log::info!("Publishing to {}", database.display());

            let registry = StepRegistry::new();
            transactions::register_steps(&registry, Arc::new(FileSource::new()), Arc::new(store))
                .await;

            let builder = FlowBuilder::new(registry).simulate_failure(fail_step);
            let flow = build_flow(&builder, flow.as_ref()).await?;

            let run = Run::new(flow.graph.clone())
                .with_param(INPUT_SOURCE, input)
                .with_reporter(flow.reporter(config.alerter()));
            log::info!("Starting run {} of flow '{}'", run.id(), flow.name);

            let report = run
                .execute()
                .await
                .with_context(|| format!("flow '{}' aborted", flow.name))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Validate { flow } => {
            let registry = StepRegistry::new();
            transactions::register_steps(
                &registry,
                Arc::new(FileSource::new()),
                Arc::new(MemoryStore::new()),
            )
            .await;

            let builder = FlowBuilder::new(registry);
            let flow = build_flow(&builder, flow.as_ref()).await?;

            println!(
                "Flow '{}' is valid: {}",
                flow.name,
                flow.graph.order().join(" -> ")
            );
            println!("Reported flags: {}", flow.report_flags.join(", "));
        }
    }

    Ok(())
}
