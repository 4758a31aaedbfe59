//! Link configuration.

use crate::radio::{DataRate, PaLevel};
use crate::time::Duration;

/// Built-in defaults, used at first boot and whenever the settings store is
/// unreadable.
pub mod defaults {
    /// Transmitter id used while pairing and at first boot. Deployments with
    /// several links in range should persist distinct ids.
    pub const TX_DEVICE_ID: u16 = 0x2401;

    /// Receiver id at first boot.
    pub const RX_DEVICE_ID: u16 = 0x2402;

    /// Channel used for pairing and single-frequency operation, and the slot
    /// reserved out of every hop schedule.
    pub const MONO_CHANNEL: u8 = 64;
}

/// Static per-session parameters of the link.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    /// MSG datagrams per second; must be a multiple of 10. Default: 100.
    pub datagrams_per_second: u16,

    /// Highest channel the hop schedule may use, `2..=125`. Channel `n` sits
    /// at 2400 + n MHz; 83 keeps the link inside common regional
    /// allocations. Default: 83.
    pub max_channel: u8,

    /// Default: 250 kbps (longest range, fewest retransmissions).
    pub data_rate: DataRate,

    /// RF output power outside of pairing. Default: min.
    pub pa_level: PaLevel,

    /// Auto-retransmit delay in 250 µs steps, `0..=15` (0 meaning 250 µs).
    /// Must exceed one MSG transmission plus one ACK reception. Default: 3
    /// (1000 µs).
    pub art_delay: u8,

    /// Auto-retransmit attempts, `0..=15`; 0 disables retransmission
    /// entirely. Default: 0.
    pub art_attempts: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            datagrams_per_second: 100,
            max_channel: 83,
            data_rate: DataRate::Kbps250,
            pa_level: PaLevel::Min,
            art_delay: 3,
            art_attempts: 0,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `datagrams_per_second` is zero or not a multiple of 10.
    BadCadence { datagrams_per_second: u16 },
    /// `max_channel` is outside `2..=125`.
    BadChannelRange { max_channel: u8 },
    /// The mono channel read back from settings lies above `max_channel`.
    MonoChannelOutOfRange { mono_channel: u8, max_channel: u8 },
    /// The auto-retransmit window does not fit into one frame period: a
    /// single send could starve the next datagram.
    RetryBudgetExceedsTick { art_window_us: u32, tick_us: u32 },
}

impl LinkConfig {
    /// Nominal frame period. Only meaningful for a validated configuration.
    pub fn tick_period(&self) -> Duration {
        Duration::micros(1_000_000 / u64::from(self.datagrams_per_second.max(1)))
    }

    /// Worst case a single `write` may block: the chip retries
    /// `art_attempts` times, one `art_delay` step apart.
    pub fn art_window_us(&self) -> u32 {
        (u32::from(self.art_delay) + 1) * 250 * u32::from(self.art_attempts)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datagrams_per_second == 0 || self.datagrams_per_second % 10 != 0 {
            return Err(ConfigError::BadCadence {
                datagrams_per_second: self.datagrams_per_second,
            });
        }
        if self.max_channel < 2 || self.max_channel > 125 {
            return Err(ConfigError::BadChannelRange {
                max_channel: self.max_channel,
            });
        }
        let tick_us = 1_000_000 / u32::from(self.datagrams_per_second);
        let art_window_us = self.art_window_us();
        if art_window_us >= tick_us {
            return Err(ConfigError::RetryBudgetExceedsTick {
                art_window_us,
                tick_us,
            });
        }
        Ok(())
    }
}
