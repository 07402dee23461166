//! A reusable rendezvous point for a fixed number of threads. See [`Barrier`].

use crate::{Error, WaitResult};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct BarrierState {
    // participants blocked in the current round, always below the threshold
    waiters: usize,
    // bumped once per completed round; wraps
    generation: u64,
}

/// A barrier that blocks `threshold` participants until all of them have
/// arrived, releases them together and then starts the next round.
///
/// Every call remembers the generation it arrived in and only returns once
/// that generation has ended. A notification that belongs to an earlier round
/// or a spurious wakeup therefore never releases a participant early.
///
/// The timed variants ([`Barrier::wait_until`] and [`Barrier::wait_timeout`])
/// let a participant give up: on timeout the arrival is retracted under the
/// same lock that counted it, so the round still needs `threshold` real
/// arrivals to complete.
///
/// Exactly `threshold` participants are expected per round. A surplus caller
/// is not detected; it simply joins the following round.
#[derive(Debug)]
pub struct Barrier {
    threshold: usize,
    state: Mutex<BarrierState>,
    new_generation: Condvar,
}

impl Barrier {
    /// Creates a barrier for `threshold` participants per round.
    ///
    /// # Errors
    /// [`Error::InvalidThreshold`] if `threshold` is zero.
    pub fn new(threshold: usize) -> Result<Self, Error> {
        if threshold == 0 {
            return Err(Error::InvalidThreshold);
        }

        Ok(Self {
            threshold,
            state: Mutex::new(BarrierState::default()),
            new_generation: Condvar::new(),
        })
    }

    /// Number of participants required to complete a round.
    #[must_use]
    pub const fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of completed rounds (wrapping).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Number of participants currently blocked in the present round.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.lock().waiters
    }

    /// Blocks until `threshold` participants have called into the barrier.
    ///
    /// The participant completing the round returns without blocking.
    pub fn wait(&self) {
        let mut state = self.lock();
        let Some(my_generation) = self.arrive(&mut state) else {
            self.complete_round(state);
            return;
        };

        let state = self
            .new_generation
            .wait_while(state, |state| state.generation == my_generation)
            .unwrap_or_else(PoisonError::into_inner);
        drop(state);
        log::trace!("released from generation {my_generation}");
    }

    /// Like [`Barrier::wait`], but gives up once `deadline` has passed.
    ///
    /// Returns [`WaitResult::Release`] if the round completed, including when
    /// this call completed it. The last arriver is never subject to its own
    /// deadline, even one already in the past.
    ///
    /// Returns [`WaitResult::Timeout`] if the deadline passed first. The
    /// arrival is then retracted and the caller has to wait again to be
    /// counted.
    pub fn wait_until(&self, deadline: Instant) -> WaitResult {
        let mut state = self.lock();
        let Some(my_generation) = self.arrive(&mut state) else {
            self.complete_round(state);
            return WaitResult::Release;
        };

        let timeout = deadline.saturating_duration_since(Instant::now());
        let (mut state, _) = self
            .new_generation
            .wait_timeout_while(state, timeout, |state| state.generation == my_generation)
            .unwrap_or_else(PoisonError::into_inner);

        // The timeout and the round completing may coincide. A finished round
        // wins, otherwise our arrival is still counted and must be undone.
        if state.generation != my_generation {
            drop(state);
            log::trace!("released from generation {my_generation}");
            return WaitResult::Release;
        }

        state.waiters -= 1;
        let waiters = state.waiters;
        drop(state);
        log::debug!(
            "deadline passed in generation {my_generation}, arrival retracted ({waiters}/{} waiting)",
            self.threshold
        );
        WaitResult::Timeout
    }

    /// Like [`Barrier::wait_until`] with a deadline `timeout` from now.
    ///
    /// A timeout too large to be expressed as an [`Instant`] waits without a
    /// deadline.
    pub fn wait_timeout(&self, timeout: Duration) -> WaitResult {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(deadline),
            None => {
                self.wait();
                WaitResult::Release
            }
        }
    }

    /// Counts one arrival.
    ///
    /// Returns the generation the caller has to wait out, or `None` if this
    /// arrival completed the round. In that case the state is already reset
    /// for the next round and the caller must call [`Self::complete_round`].
    fn arrive(&self, state: &mut BarrierState) -> Option<u64> {
        let my_generation = state.generation;
        state.waiters += 1;
        log::trace!(
            "arrival in generation {my_generation} ({}/{})",
            state.waiters,
            self.threshold
        );

        if state.waiters == self.threshold {
            state.generation = state.generation.wrapping_add(1);
            state.waiters = 0;
            None
        } else {
            Some(my_generation)
        }
    }

    fn complete_round(&self, state: MutexGuard<'_, BarrierState>) {
        let generation = state.generation;
        drop(state);
        self.new_generation.notify_all();
        log::debug!("round complete, now at generation {generation}");
    }

    // No user code runs while the lock is held and the state is never left
    // half-updated, so a poisoned lock still guards a consistent state.
    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
