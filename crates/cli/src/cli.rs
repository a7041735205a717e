use clap::Parser;

/// Demo runner for the tickwork scheduler.
///
/// Registers a few synthetic traced tasks, drives a scheduler through
/// start, stop, resume and close, then prints the collected statistics.
#[derive(Parser, Debug)]
#[command(name = "tickwork", about = "Run a demo workload on the tickwork scheduler")]
pub struct CliArgs {
    /// Path to a TOML scheduler config
    #[arg(long, env = "TICKWORK_CONFIG")]
    pub config: Option<String>,

    /// Tick interval override in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Seconds to run before pausing, and again after resuming
    #[arg(long, default_value = "2")]
    pub run_secs: u64,

    /// Seconds to stay paused between the two runs
    #[arg(long, default_value = "1")]
    pub pause_secs: u64,

    /// Run count after which the flaky task starts failing
    #[arg(long, default_value = "5")]
    pub fail_after: usize,

    /// Print the report as compact JSON instead of pretty-printed
    #[arg(long)]
    pub compact: bool,
}
