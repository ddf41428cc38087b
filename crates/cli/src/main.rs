//! LinePlan CLI - predicted completion dates for a production queue.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lineplan_core::{parse_ready_date, DailyOutput, ItemRow, ItemStatus};
use lineplan_execution::{FixedClock, PredictionOutcome, RecomputeController, RunOutcome};
use lineplan_progress::{CapacityEstimator, StatisticsProvider, StoreStatistics, WorkCalendar};
use lineplan_storage::{JsonStorage, Storage};

#[derive(Parser)]
#[command(name = "lineplan")]
#[command(about = "Predict production completion dates", long_about = None)]
struct Cli {
    /// Data directory (items.json, history.json, config.json)
    #[arg(long, global = true, default_value = ".lineplan")]
    data: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute predicted completion dates
    Plan {
        /// Plan as of this timestamp instead of now
        #[arg(long)]
        now: Option<String>,
        /// Override the static hourly rate
        #[arg(long)]
        rate: Option<f64>,
    },
    /// Add or replace a queued item
    Add {
        /// Item ID
        id: String,
        /// Remaining workload (area units)
        workload: f64,
        /// Ready date
        #[arg(long)]
        ready: Option<String>,
        /// Status (pending, in progress, done)
        #[arg(long, default_value = "pending")]
        status: String,
    },
    /// List items and their predictions
    List,
    /// Record completed output for a production day
    Record {
        /// Production day (YYYY-MM-DD)
        date: NaiveDate,
        /// Completed workload
        workload: f64,
    },
    /// Working minutes between two timestamps
    Minutes {
        /// Start timestamp
        start: String,
        /// End timestamp
        end: String,
    },
    /// Show the resolved daily capacity
    Capacity {
        /// Resolve as of this date instead of today
        #[arg(long)]
        today: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let storage = Arc::new(
        JsonStorage::new(&cli.data)
            .await
            .with_context(|| format!("opening {}", cli.data.display()))?,
    );
    let mut config = storage.load_config().await?;

    match cli.command {
        Commands::Plan { now, rate } => {
            if let Some(rate) = rate {
                config.capacity.rate_per_hour = rate;
                config.validate()?;
            }
            let mut builder = RecomputeController::builder(storage.clone(), config);
            if let Some(text) = now {
                builder = builder.with_clock(Arc::new(FixedClock::new(parse_timestamp(&text)?)));
            }
            let controller = builder.build();

            report(controller.compute_now().await)?;
        }
        Commands::Add { id, workload, ready, status } => {
            let status: ItemStatus = status.parse()?;
            let mut row = ItemRow::new(id.as_str(), workload).with_status(status);
            if let Some(ready) = ready {
                parse_ready_date(&ready)?;
                row = row.with_ready_date(ready);
            }
            storage.save_item(row).await?;
            println!("Saved item: {id}");
        }
        Commands::List => {
            let items = storage.list_items().await?;

            println!("Items ({})", items.len());
            for item in items {
                println!(
                    "  {} | {} | ready {} | {} -> {}",
                    item.id,
                    item.status,
                    item.ready_date.as_deref().unwrap_or("-"),
                    item.remaining_workload,
                    item.predicted_completion.as_deref().unwrap_or("-"),
                );
            }
        }
        Commands::Record { date, workload } => {
            storage.record_output(DailyOutput::new(date, workload)).await?;
            println!("Recorded {workload} for {date}");
        }
        Commands::Minutes { start, end } => {
            let calendar = WorkCalendar::from_config(&config.calendar);
            let minutes = calendar.try_working_minutes_between(
                parse_timestamp(&start)?,
                parse_timestamp(&end)?,
            )?;
            println!("{minutes}");
        }
        Commands::Capacity { today } => {
            let today = today.unwrap_or_else(|| chrono::Local::now().date_naive());
            let calendar = WorkCalendar::from_config(&config.calendar);
            let estimator = CapacityEstimator::new(&config.capacity, &calendar);

            let stats = StoreStatistics::new(storage.clone()).refresh(&[], today).await?;
            let fallback = estimator.fallback(stats.long_run_average);
            match estimator.daily_capacity(&stats.history, today, &fallback) {
                Ok(estimate) => {
                    let snapshot = estimator.snapshot(estimate.daily_capacity);
                    println!("Daily capacity: {:.2} ({})", estimate.daily_capacity, estimate.source);
                    println!("Per-item cap:   {:.2}", snapshot.per_item_daily_cap);
                }
                Err(e) => println!("Daily capacity: unavailable ({e})"),
            }
        }
    }

    Ok(())
}

fn parse_timestamp(text: &str) -> Result<chrono::NaiveDateTime> {
    parse_ready_date(text)?.ok_or_else(|| anyhow!("empty timestamp"))
}

fn report(outcome: RunOutcome) -> Result<()> {
    match outcome {
        RunOutcome::Completed(run) => {
            info!(run_id = %run.run_id, items_written = run.items_written, "Plan updated");
            for prediction in &run.schedule.predictions {
                let text = match &prediction.outcome {
                    PredictionOutcome::Scheduled(date) => date.to_string(),
                    PredictionOutcome::Unscheduled(e) => format!("unscheduled ({e})"),
                    PredictionOutcome::Cleared => "-".to_string(),
                };
                println!("  {} -> {}", prediction.item_id, text);
            }
            Ok(())
        }
        RunOutcome::Skipped(signature) => {
            println!("Nothing changed ({signature})");
            Ok(())
        }
        RunOutcome::Coalesced => {
            println!("A run is already in progress");
            Ok(())
        }
        RunOutcome::Failed(e) => Err(e.into()),
    }
}
