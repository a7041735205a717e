mod cli;
mod demo;

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use tickwork_scheduler::{Scheduler, SchedulerConfig};

use crate::cli::CliArgs;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut config = match args.config.as_deref() {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => SchedulerConfig::from_env().context("invalid scheduler environment")?,
    };
    if let Some(ms) = args.interval_ms {
        config.tick_interval_ms = ms;
    }
    config.validate().context("invalid scheduler config")?;

    let interval = config.tick_interval();
    let run_for = Duration::from_secs(args.run_secs);
    let scheduler = Scheduler::with_config(config);

    let tasks = demo::tasks(args.fail_after);
    demo::register(&scheduler, &tasks);

    scheduler.set_after(|stats| {
        if stats.ticks % 100 == 0 {
            info!(ticks = stats.ticks, load = stats.load, tasks = stats.task_count, "progress");
        }
    });

    scheduler
        .try_start(interval)
        .context("failed to start scheduler")?;
    thread::sleep(run_for);

    scheduler.try_stop().context("failed to stop scheduler")?;
    info!(ticks = scheduler.ticks(), "paused");
    thread::sleep(Duration::from_secs(args.pause_secs));

    scheduler
        .try_start(interval)
        .context("failed to resume scheduler")?;
    thread::sleep(run_for);
    scheduler.try_close().context("failed to close scheduler")?;

    let report = demo::report(&scheduler, &tasks);
    let json = if args.compact {
        serde_json::to_string(&report)
    } else {
        serde_json::to_string_pretty(&report)
    }
    .context("failed to serialize report")?;
    println!("{json}");

    Ok(())
}
