//! The `reclone-cron` command: periodic wrapper around `reclone`.
//!
//! Runs the full reclone table on a fixed minute interval. Runs are
//! strictly serial, so at most one is ever in flight in this process.

use anyhow::Result;
use clap::Args;
use std::time::Duration;

use super::reclone::{self, RecloneArgs};
use crate::colorlog;

const DEFAULT_INTERVAL_MINUTES: u64 = 60;

#[derive(Args, Debug, Default)]
pub struct RecloneCronArgs {
    /// Minutes between reclone runs
    #[arg(long)]
    pub interval_minutes: Option<u64>,
    /// Path to the reclone configuration file
    #[arg(long)]
    pub reclone_path: Option<String>,
    /// Quiet logging output for the child reclones
    #[arg(long)]
    pub quiet: bool,
}

pub fn run(args: RecloneCronArgs) -> Result<i32> {
    let interval_minutes = args
        .interval_minutes
        .or_else(|| {
            std::env::var("GITFLEET_CRON_TIMER_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or(DEFAULT_INTERVAL_MINUTES)
        .max(1);

    colorlog::print_info(format!(
        "Starting reclone cron, running every {interval_minutes} minutes"
    ));

    loop {
        let reclone_args = RecloneArgs {
            keys: Vec::new(),
            reclone_path: args.reclone_path.clone(),
            quiet: args.quiet,
            list: false,
            env_config_only: false,
        };
        // A failed run is a run-level failure, not a scheduler failure.
        if let Err(err) = reclone::run(reclone_args) {
            colorlog::print_error(format!("Reclone run failed: {err}"));
        }
        std::thread::sleep(Duration::from_secs(interval_minutes * 60));
    }
}
