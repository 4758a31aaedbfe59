//! Frequency-hopping point-to-point link for auto-acknowledging 2.4 GHz
//! packet radios.
//!
//! One transmitter pairs with one receiver. After a short bootstrap on a
//! single pairing channel both ends jump synchronously across a
//! pseudo-random permutation of the allowed channels, one hop per frame, so
//! interference on any subset of channels degrades the link instead of
//! killing it. Every outgoing MSG carries a per-tick user payload; every
//! acknowledgement carries a telemetry payload back.
//!
//! The integration provides the radio ([`Radio`]), a monotonic clock
//! ([`Timer`]), persistence ([`SettingsStore`]), entropy
//! ([`rand_core::RngCore`], transmitter only) and the per-tick payload hooks
//! ([`TxApplication`], [`RxApplication`]), then drives
//! [`Transmitter::tick`] at the frame cadence and [`Receiver::poll`] as
//! often as it can.
//!
//! Supports `no_std`.
#![no_std]

pub mod config;
pub mod datagram;
pub mod pairing;
pub mod radio;
pub mod rng;
pub mod rx;
pub mod schedule;
mod serde;
pub mod settings;
pub mod supervisor;
pub mod time;
pub mod timing;
pub mod tx;

pub use config::{ConfigError, LinkConfig};
pub use datagram::{AckDatagram, DatagramType, MsgDatagram, ACK_VALUES, MSG_VALUES};
pub use radio::{DataRate, PaLevel, PipeAddress, Radio};
pub use rx::Receiver;
pub use schedule::HopSchedule;
pub use settings::{SettingsKey, SettingsStore};
pub use time::{Duration, Instant, Timer};
pub use tx::{TickReport, Transmitter};

use rand_core::RngCore;

/// Operating mode of an endpoint.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Negotiating a fresh session on the pairing channel at minimum power.
    Pairing,
    /// Operational on the single bootstrap channel.
    MonoFreq,
    /// Hopping across the full schedule.
    MultiFreq,
}

/// The 16-bit seed both endpoints expand into the hop schedule.
///
/// Zero is reserved for "no session" and can never be committed. This is an
/// anti-collision value, not a secret.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKey(u16);

impl SessionKey {
    pub fn new(raw: u16) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(SessionKey(raw))
        }
    }

    /// Draw a fresh non-zero key from a hardware entropy source.
    pub fn draw(rng: &mut impl RngCore) -> Self {
        loop {
            let candidate = (rng.next_u32() & 0xffff) as u16;
            if let Some(key) = SessionKey::new(candidate) {
                return key;
            }
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

/// Startup failure. Anything past startup surfaces through the error
/// counter and the status accessors instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError<E> {
    /// The radio did not respond or could not be configured.
    Hardware(E),
    /// The configuration cannot sustain the frame cadence.
    Config(ConfigError),
}

impl<E> From<ConfigError> for InitError<E> {
    fn from(e: ConfigError) -> Self {
        InitError::Config(e)
    }
}

/// Per-tick payload hooks on the transmitter.
///
/// Both callbacks must return well within a fraction of the frame period;
/// they run on the link's own tick.
pub trait TxApplication {
    /// Fill the user payload of the next outgoing MSG.
    fn fill_message(&mut self, values: &mut [u16; MSG_VALUES]);

    /// Telemetry the receiver returned in the latest acknowledgement.
    fn handle_ack(&mut self, values: &[u16; ACK_VALUES]);
}

/// Per-tick payload hooks on the receiver.
pub trait RxApplication {
    /// User payload of a received MSG.
    fn handle_message(&mut self, values: &[u16; MSG_VALUES]);

    /// Fill the telemetry payload pre-loaded for the next acknowledgement.
    /// Slot 0 is overwritten with the supervisor's error count.
    fn fill_ack(&mut self, values: &mut [u16; ACK_VALUES]);
}
