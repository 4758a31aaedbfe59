//! Time base for the link: microsecond instants and durations.
//!
//! The protocol is specified in microseconds end to end (frame cadence,
//! auto-retransmit window, the measured datagram period), so the aliases here
//! fix a 1 MHz tick. 64-bit ticks do not wrap within a deployment's lifetime.

pub type Instant = fugit::Instant<u64, 1, 1_000_000>;
pub type Duration = fugit::Duration<u64, 1, 1_000_000>;

/// Trait for monotonic time providers.
///
/// The integration supplies an implementation backed by a hardware timer with
/// microsecond resolution. The [`Instant`]s returned must never move
/// backwards in time.
///
/// This trait can also be implemented by a mock timer for testing.
pub trait Timer {
    /// Obtain the current time as an [`Instant`].
    fn now(&self) -> Instant;
}
