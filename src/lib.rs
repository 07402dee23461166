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

pub mod barrier;
pub mod participant;

pub use barrier::Barrier;

/// Outcome of a deadline-bounded wait on a [`Barrier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitResult {
    /// The round completed, possibly by this very call.
    Release,
    /// The deadline passed first. The arrival was retracted.
    Timeout,
}

/// Errors from building a [`Barrier`] or running a round of participants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("a barrier needs at least one participant")]
    InvalidThreshold,
    #[error("barrier expects {threshold} participants per round, but {participants} take part")]
    ParticipantMismatch {
        threshold: usize,
        participants: usize,
    },
    #[error("failed to spawn participant thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("{role} participant did not complete the round")]
    ParticipantFailed { role: participant::Role },
}
