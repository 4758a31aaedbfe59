//! The pairing handshake.
//!
//! Pairing establishes a shared `(TXID, RXID, session key)` so both
//! endpoints derive the same hop schedule. It runs on the mono channel at
//! minimum RF power, so only a peer within arm's reach can take part, and on
//! the pipe address derived from the default transmitter id, so an unpaired
//! receiver can hear an unknown transmitter at all.
//!
//! The transmitter offers a candidate key every tick; the receiver echoes
//! the offer it latched onto and reports completion once the echo has held
//! for [`ECHOES_REQUIRED`] consecutive frames. The transmitter commits
//! first, on the completed echo; the receiver commits when it observes the
//! transmitter's committed-session flag.

use rand_core::RngCore;

use crate::datagram::{AckDatagram, MsgDatagram, SVC_KEY, SVC_RXID, SVC_TXID};
use crate::time::{Duration, Instant};
use crate::SessionKey;

/// Consecutive matching echoes the receiver requires before it reports the
/// handshake complete.
pub const ECHOES_REQUIRED: u8 = 10;

/// How long the transmitter keeps offering one candidate key without a
/// matching confirmation before it draws a fresh one. Two transmitters
/// courting the same receiver would otherwise deadlock on their first
/// candidates.
pub const REDRAW_AFTER: Duration = Duration::secs(5);

/// Transmitter side: offers a candidate key until the receiver confirms it.
#[derive(Debug)]
pub struct PairingInitiator {
    key: SessionKey,
    offered_at: Instant,
}

/// The receiver's answer that completes the handshake on the transmitter.
#[derive(Debug, Clone, Copy)]
pub struct Confirmation {
    pub key: SessionKey,
    pub rxid: u16,
}

impl PairingInitiator {
    pub fn new(rng: &mut impl RngCore, now: Instant) -> Self {
        PairingInitiator {
            key: SessionKey::draw(rng),
            offered_at: now,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// What the receiver confirmed, if anything. An echo of somebody else's
    /// key is not a confirmation.
    pub fn on_ack(&self, ack: &AckDatagram) -> Option<Confirmation> {
        if !ack.flags.pairing_complete() || ack.values[SVC_KEY] != self.key.get() {
            return None;
        }
        Some(Confirmation {
            key: self.key,
            rxid: ack.values[SVC_RXID],
        })
    }

    /// Draw a fresh candidate if the current one has gone unanswered too
    /// long. Returns `true` when the key changed.
    pub fn redraw_if_stale(&mut self, rng: &mut impl RngCore, now: Instant) -> bool {
        let stale = now
            .checked_duration_since(self.offered_at)
            .map_or(false, |d| d >= REDRAW_AFTER);
        if stale {
            self.key = SessionKey::draw(rng);
            self.offered_at = now;
        }
        stale
    }
}

/// An offer heard on the pairing channel.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offer {
    pub key: u16,
    pub txid: u16,
}

/// The echo the receiver loads in answer to an offer.
#[derive(Debug, Clone, Copy)]
pub struct Echo {
    pub offer: Offer,
    pub complete: bool,
}

/// Receiver side: latches onto one offer and echoes it until it has seen
/// enough consecutive repetitions.
#[derive(Debug)]
pub struct PairingResponder {
    latched: Option<Offer>,
    echoes: u8,
}

impl PairingResponder {
    pub fn new() -> Self {
        PairingResponder {
            latched: None,
            echoes: 0,
        }
    }

    pub fn reset(&mut self) {
        self.latched = None;
        self.echoes = 0;
    }

    /// Feed one pairing MSG; returns the echo to load, with `complete` set
    /// once this offer has held for [`ECHOES_REQUIRED`] frames in a row.
    ///
    /// A different offer re-latches and restarts the count, so with two
    /// transmitters in range whichever first gets an uninterrupted run wins;
    /// the loser never sees its echo and redraws after [`REDRAW_AFTER`].
    pub fn on_msg(&mut self, msg: &MsgDatagram) -> Option<Echo> {
        if !msg.flags.pairing_in_progress() {
            return None;
        }
        let offer = Offer {
            key: msg.values[SVC_KEY],
            txid: msg.values[SVC_TXID],
        };
        if offer.key == 0 {
            // a zero key can never be committed
            return None;
        }
        if self.latched == Some(offer) {
            self.echoes = self.echoes.saturating_add(1);
        } else {
            self.latched = Some(offer);
            self.echoes = 1;
        }
        Some(Echo {
            offer,
            complete: self.echoes >= ECHOES_REQUIRED,
        })
    }

    pub fn latched(&self) -> Option<Offer> {
        self.latched
    }
}

impl Default for PairingResponder {
    fn default() -> Self {
        PairingResponder::new()
    }
}
