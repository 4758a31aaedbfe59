//! Measurement of the average datagram period on the receiving side.

use crate::time::Instant;

/// Arrivals discarded after boot before sampling starts; the first frames
/// can carry inaccurate inter-arrival times.
const IGNORED_ARRIVALS: u8 = 10;

/// Strictly consecutive arrivals averaged over.
const AVG_COUNT: u8 = 32;

/// Derives the hop cadence from a run of consecutive datagram numbers.
///
/// Only a strictly consecutive successor extends the current run; any gap
/// restarts the measurement at the offending arrival, so samples polluted by
/// loss never reach the average. The fixed run length bounds convergence to
/// about 320 ms at 100 datagrams per second.
#[derive(Debug, Clone)]
pub struct PeriodEstimator {
    ignore_left: u8,
    run_start: Option<Instant>,
    run_len: u8,
    previous: Option<u16>,
    average_us: Option<u32>,
}

impl PeriodEstimator {
    pub fn new() -> Self {
        PeriodEstimator {
            ignore_left: IGNORED_ARRIVALS,
            run_start: None,
            run_len: 0,
            previous: None,
            average_us: None,
        }
    }

    pub fn reset(&mut self) {
        *self = PeriodEstimator::new();
    }

    /// Feed one arrival. Returns the average period, in microseconds, once
    /// it is known; the measurement then stays frozen until [`reset`].
    ///
    /// [`reset`]: PeriodEstimator::reset
    pub fn record(&mut self, number: u16, at: Instant) -> Option<u32> {
        if self.average_us.is_some() {
            return self.average_us;
        }
        if self.ignore_left > 0 {
            self.ignore_left -= 1;
            self.previous = Some(number);
            return None;
        }

        match (self.run_start, self.previous) {
            (Some(run_start), Some(previous)) if number == previous.wrapping_add(1) => {
                self.run_len += 1;
                if self.run_len >= AVG_COUNT {
                    let average = at
                        .checked_duration_since(run_start)
                        .map(|elapsed| (elapsed.ticks() / u64::from(AVG_COUNT)) as u32)
                        .filter(|&avg| avg > 0);
                    match average {
                        Some(avg) => self.average_us = Some(avg),
                        None => {
                            // the clock misbehaved; start over from here
                            self.run_start = Some(at);
                            self.run_len = 0;
                        }
                    }
                }
            }
            _ => {
                self.run_start = Some(at);
                self.run_len = 0;
            }
        }
        self.previous = Some(number);
        self.average_us
    }

    pub fn average_us(&self) -> Option<u32> {
        self.average_us
    }
}

impl Default for PeriodEstimator {
    fn default() -> Self {
        PeriodEstimator::new()
    }
}
