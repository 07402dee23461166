//! Module for driving a round of participants. See [`run_round`].

use crate::{Barrier, Error, WaitResult};
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;
use std::thread::sleep;
use std::time::{Duration, Instant};

/// How a participant approaches the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Arrives after [`ScenarioConfig::arrival_delay`] and blocks.
    Steady,
    /// Arrives after [`ScenarioConfig::arrival_delay`] and retries deadlines
    /// of [`ScenarioConfig::poll_interval`] until released.
    Polling,
    /// Arrives after [`ScenarioConfig::late_delay`] and blocks.
    Late,
}

impl Role {
    /// Every role, in spawn order. A round has one participant per role.
    pub const ALL: [Self; 3] = [Self::Steady, Self::Polling, Self::Late];

    const fn as_str(self) -> &'static str {
        match self {
            Self::Steady => "steady",
            Self::Polling => "polling",
            Self::Late => "late",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Timing of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioConfig {
    /// Delay before the steady and the polling participant arrive.
    pub arrival_delay: Duration,
    /// Delay before the late participant arrives.
    pub late_delay: Duration,
    /// Deadline of each attempt of the polling participant.
    pub poll_interval: Duration,
    /// Upper bound of the random delay added to every arrival.
    pub jitter: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            arrival_delay: Duration::from_secs(1),
            late_delay: Duration::from_secs(4),
            poll_interval: Duration::from_millis(100),
            jitter: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantReport {
    pub role: Role,
    /// Attempts that ended with [`WaitResult::Timeout`]. Always zero for
    /// blocking roles.
    pub timeouts: usize,
    /// Time spent inside the barrier, retries included.
    pub waited: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    pub generation_before: u64,
    pub generation_after: u64,
    /// From the start signal until every participant was joined.
    pub duration: Duration,
    /// One report per role, in the order of [`Role::ALL`].
    pub participants: Vec<ParticipantReport>,
}

impl RoundReport {
    #[must_use]
    pub fn participant(&self, role: Role) -> Option<&ParticipantReport> {
        self.participants.iter().find(|report| report.role == role)
    }

    /// Sum of timeouts over all participants.
    #[must_use]
    pub fn timeouts(&self) -> usize {
        self.participants.iter().map(|report| report.timeouts).sum()
    }
}

fn random_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let max_us = u64::try_from(max.as_micros()).unwrap_or(u64::MAX);
    Duration::from_micros(fastrand::u64(0..=max_us))
}

// Saturates instead of computing `start + delay`, which panics on overflow.
fn remaining_delay(start: Instant, delay: Duration) -> Duration {
    delay.saturating_sub(start.elapsed())
}

type Spawned<T> = (Role, SyncSender<Instant>, thread::JoinHandle<T>);

/// Sends the start signal to every participant, or to none of them.
///
/// A participant blocks on its start signal before anything else, so one that
/// already finished has lost its receiver. Checking all of them first means a
/// failure never leaves an already started participant alone on the barrier.
fn start_all<T>(start: Instant, spawned: &[Spawned<T>]) -> Result<(), Error> {
    if let Some((role, _, _)) = spawned.iter().find(|(_, _, handle)| handle.is_finished()) {
        return Err(Error::ParticipantFailed { role: *role });
    }

    for (role, sender, _) in spawned {
        sender
            .send(start)
            .map_err(|_| Error::ParticipantFailed { role: *role })?;
    }
    Ok(())
}

fn participant_fn(
    role: Role,
    barrier: Arc<Barrier>,
    config: ScenarioConfig,
    start_signal: Receiver<Instant>,
) -> impl FnOnce() -> Option<ParticipantReport> {
    move || {
        // A dropped sender means the round was abandoned before it started.
        let start = start_signal.recv().ok()?;

        let delay = match role {
            Role::Steady | Role::Polling => config.arrival_delay,
            Role::Late => config.late_delay,
        };
        sleep(remaining_delay(start, delay.saturating_add(random_jitter(config.jitter))));

        let begin = Instant::now();
        let timeouts = match role {
            Role::Steady | Role::Late => {
                barrier.wait();
                0
            }
            Role::Polling => {
                let mut timeouts = 0;
                while barrier.wait_timeout(config.poll_interval) == WaitResult::Timeout {
                    timeouts += 1;
                }
                timeouts
            }
        };
        let waited = begin.elapsed();
        log::debug!("{role} participant released after {waited:?} ({timeouts} timeouts)");

        Some(ParticipantReport {
            role,
            timeouts,
            waited,
        })
    }
}

/// Runs one round with one participant per [`Role`] on `barrier`.
///
/// All participants are spawned first and only then started together, so a
/// failed spawn never leaves a participant blocked on the barrier.
///
/// # Errors
/// - [`Error::ParticipantMismatch`] if the threshold of `barrier` is not the
///   number of roles.
/// - [`Error::Spawn`] if a participant thread cannot be spawned.
/// - [`Error::ParticipantFailed`] if a participant did not start or did not
///   complete the round. Participants never panic once started, so a failed
///   join is not expected after a successful start; should it happen, the
///   remaining participants are left detached.
pub fn run_round(barrier: &Arc<Barrier>, config: &ScenarioConfig) -> Result<RoundReport, Error> {
    let participants = Role::ALL.len();
    if barrier.threshold() != participants {
        return Err(Error::ParticipantMismatch {
            threshold: barrier.threshold(),
            participants,
        });
    }

    let generation_before = barrier.generation();

    let mut spawned = Vec::<Spawned<_>>::with_capacity(participants);
    for role in Role::ALL {
        let (sender, receiver) = sync_channel(1);
        let handle = thread::Builder::new()
            .name(format!("{role}-participant"))
            .spawn(participant_fn(role, barrier.clone(), config.clone(), receiver))?;
        spawned.push((role, sender, handle));
    }

    let start = Instant::now();
    log::trace!("starting round at generation {generation_before}");
    start_all(start, &spawned)?;

    let mut reports = Vec::with_capacity(participants);
    for (role, _, handle) in spawned {
        match handle.join() {
            Ok(Some(report)) => reports.push(report),
            Ok(None) | Err(_) => return Err(Error::ParticipantFailed { role }),
        }
    }
    let duration = start.elapsed();

    let generation_after = barrier.generation();
    log::debug!(
        "round took {duration:?}, generation {generation_before} -> {generation_after}"
    );

    Ok(RoundReport {
        generation_before,
        generation_after,
        duration,
        participants: reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;

    fn fast_config() -> ScenarioConfig {
        ScenarioConfig {
            arrival_delay: Duration::from_millis(10),
            late_delay: Duration::from_millis(120),
            poll_interval: Duration::from_millis(15),
            jitter: Duration::ZERO,
        }
    }

    #[test_log::test]
    fn round_releases_every_role() {
        let barrier = Arc::new(Barrier::new(3).unwrap());
        let config = fast_config();

        let report = run_round(&barrier, &config).unwrap();

        check!(report.generation_before == 0);
        check!(report.generation_after == 1);
        check!(report.participants.len() == Role::ALL.len());
        check!(report.duration >= config.late_delay);

        let polling = report.participant(Role::Polling).unwrap();
        check!(polling.timeouts >= 1);
        check!(report.timeouts() == polling.timeouts);

        let late = report.participant(Role::Late).unwrap();
        check!(late.timeouts == 0);
        check!(late.waited < Duration::from_millis(60));

        let steady = report.participant(Role::Steady).unwrap();
        check!(steady.waited >= Duration::from_millis(60));
    }

    #[test_log::test]
    fn rounds_reuse_the_barrier() {
        let barrier = Arc::new(Barrier::new(3).unwrap());
        let config = ScenarioConfig {
            jitter: Duration::from_millis(5),
            ..fast_config()
        };

        for round in 0..3 {
            let report = run_round(&barrier, &config).unwrap();
            check!(report.generation_before == round);
            check!(report.generation_after == round + 1);
        }
        check!(barrier.waiters() == 0);
    }

    #[test_log::test]
    fn mismatched_threshold_is_rejected() {
        let barrier = Arc::new(Barrier::new(2).unwrap());

        let result = run_round(&barrier, &fast_config());

        assert2::assert!(
            let Err(Error::ParticipantMismatch {
                threshold: 2,
                participants: 3
            }) = result
        );
        check!(barrier.generation() == 0);
    }

    #[test_log::test]
    fn finished_participant_blocks_every_start_signal() {
        let (gone_sender, gone_receiver) = sync_channel::<Instant>(1);
        let gone = thread::spawn(move || {
            drop(gone_receiver);
            false
        });
        while !gone.is_finished() {
            sleep(Duration::from_millis(1));
        }

        let (waiting_sender, waiting_receiver) = sync_channel::<Instant>(1);
        let waiting = thread::spawn(move || waiting_receiver.recv().is_ok());

        // The waiting participant comes first, so a partial start would
        // reach it before the finished one is noticed.
        let spawned = vec![
            (Role::Steady, waiting_sender, waiting),
            (Role::Polling, gone_sender, gone),
        ];
        let result = start_all(Instant::now(), &spawned);
        assert2::assert!(let Err(Error::ParticipantFailed { role: Role::Polling }) = result);

        let mut spawned = spawned.into_iter();
        let (_, waiting_sender, waiting) = spawned.next().unwrap();
        drop(waiting_sender);
        check!(!waiting.join().unwrap());
    }

    #[test]
    fn huge_delays_saturate() {
        let start = Instant::now();
        check!(remaining_delay(start, Duration::MAX) > Duration::from_secs(3600));
        check!(remaining_delay(start, Duration::ZERO) == Duration::ZERO);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        check!(random_jitter(Duration::ZERO) == Duration::ZERO);
        for _ in 0..100 {
            check!(random_jitter(Duration::from_millis(3)) <= Duration::from_millis(3));
        }
    }
}
