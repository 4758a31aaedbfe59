//! Link supervision: error accounting and sequence-gap classification.

use crate::time::{Duration, Instant};

/// Largest believable gap between the expected and the received datagram
/// number. Anything at or above this is loss of synchronization.
pub const GAP_LIMIT: u16 = 32;

/// How long the receiver tolerates silence while hopping before it falls
/// back to the mono channel.
pub const SYNC_LOSS_TIMEOUT: Duration = Duration::secs(1);

const WINDOW: Duration = Duration::secs(1);

/// Count of datagrams lost per one-second window.
///
/// Losses accumulate into the current window; [`roll`] publishes and clears
/// it once a full second has elapsed. The published value rides in ACK
/// payload slot 0.
///
/// [`roll`]: ErrorWindow::roll
#[derive(Debug, Clone)]
pub struct ErrorWindow {
    opened: Option<Instant>,
    current: u16,
    published: u16,
    total: u32,
}

impl ErrorWindow {
    pub fn new() -> Self {
        ErrorWindow {
            opened: None,
            current: 0,
            published: 0,
            total: 0,
        }
    }

    pub fn add(&mut self, lost: u16) {
        self.current = self.current.saturating_add(lost);
        self.total = self.total.saturating_add(u32::from(lost));
    }

    /// Advance the window.
    pub fn roll(&mut self, now: Instant) {
        match self.opened {
            None => self.opened = Some(now),
            Some(opened) => {
                let elapsed = now.checked_duration_since(opened);
                if elapsed.map_or(false, |d| d >= WINDOW) {
                    self.published = self.current;
                    self.current = 0;
                    self.opened = Some(now);
                }
            }
        }
    }

    /// Losses in the last completed window.
    pub fn last_second(&self) -> u16 {
        self.published
    }

    /// Losses accumulated in the window still in progress.
    pub fn in_progress(&self) -> u16 {
        self.current
    }

    pub fn total(&self) -> u32 {
        self.total
    }
}

impl Default for ErrorWindow {
    fn default() -> Self {
        ErrorWindow::new()
    }
}

/// One observed datagram number against the expected progression.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStep {
    /// The expected successor; 65535 wraps to 0.
    InOrder,
    /// `missing` datagrams were skipped.
    Missed { missing: u16 },
    /// The gap reaches [`GAP_LIMIT`]; a regression looks the same after
    /// wrapping and is treated the same.
    OutOfSync,
}

/// Wrap-aware progression tracker for incoming datagram numbers.
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    expected: Option<u16>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        SequenceTracker { expected: None }
    }

    pub fn reset(&mut self) {
        self.expected = None;
    }

    pub fn observe(&mut self, number: u16) -> SequenceStep {
        let step = match self.expected {
            None => SequenceStep::InOrder,
            Some(expected) => {
                let gap = number.wrapping_sub(expected);
                if gap == 0 {
                    SequenceStep::InOrder
                } else if gap < GAP_LIMIT {
                    SequenceStep::Missed { missing: gap }
                } else {
                    SequenceStep::OutOfSync
                }
            }
        };
        self.expected = Some(number.wrapping_add(1));
        step
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        SequenceTracker::new()
    }
}
