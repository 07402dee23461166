#![deny(
    clippy::all,
    clippy::cargo,
    clippy::nursery,
    clippy::must_use_candidate,
    clippy::perf
    // clippy::restriction,
    // clippy::pedantic
)]
// now allow a few rules which are denied by the above statement
// --> they are ridiculous and not necessary
#![allow(
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::fallible_impl_from,
    clippy::multiple_crate_versions
)]
#![deny(missing_debug_implementations)]

use clap::Parser;
use generation_barrier::participant::{self, Role, RoundReport, ScenarioConfig};
use generation_barrier::{Barrier, Error};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Runs rounds of a steady, a polling and a late participant on one barrier.
///
/// The polling participant retries short deadlines while the round fills up;
/// its timed out attempts never count towards the round.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Number of rounds to run on the same barrier.
    #[arg(long, default_value_t = 3)]
    rounds: usize,
    /// Delay before the steady and the polling participant arrive.
    #[arg(long, default_value_t = 1000)]
    arrival_delay_ms: u64,
    /// Delay before the late participant arrives.
    #[arg(long, default_value_t = 4000)]
    late_delay_ms: u64,
    /// Deadline of each attempt of the polling participant.
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,
    /// Upper bound of random delay added to every arrival.
    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,
}

impl From<&Args> for ScenarioConfig {
    fn from(args: &Args) -> Self {
        Self {
            arrival_delay: Duration::from_millis(args.arrival_delay_ms),
            late_delay: Duration::from_millis(args.late_delay_ms),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            jitter: Duration::from_millis(args.jitter_ms),
        }
    }
}

fn print_analysis(round: usize, report: &RoundReport) {
    println!(
        "Round {round:>3}: generation {} -> {}, took {:>5} ms",
        report.generation_before,
        report.generation_after,
        report.duration.as_millis()
    );
    for role in Role::ALL {
        if let Some(participant) = report.participant(role) {
            println!(
                "  {:<8} waited {:>5} ms, timeouts: {}",
                participant.role,
                participant.waited.as_millis(),
                participant.timeouts
            );
        }
    }
}

fn run(args: &Args) -> Result<(), Error> {
    let config = ScenarioConfig::from(args);
    let barrier = Arc::new(Barrier::new(Role::ALL.len())?);
    log::info!("running {} rounds with {config:?}", args.rounds);

    let begin = Instant::now();
    for round in 1..=args.rounds {
        let report = participant::run_round(&barrier, &config)?;
        print_analysis(round, &report);
    }

    println!(
        "did {} rounds in {} seconds",
        args.rounds,
        begin.elapsed().as_secs()
    );
    Ok(())
}

fn main() -> ExitCode {
    pretty_env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("demo failed: {e}");
            ExitCode::FAILURE
        }
    }
}
