//! The two fixed-layout datagrams on the wire, with encoding and decoding.
//!
//! Both frames are two little-endian `u16` header fields followed by a fixed
//! number of `u16` payload slots:
//!
//! ```norust
//! u16 number      // sequence number (MSG) / echoed number (ACK)
//! u16 type        // flag bitmask, see DatagramType
//! u16 payload[N]  // N = MSG_VALUES or ACK_VALUES
//! ```
//!
//! Payload sizes are fixed at compile time; an incoming frame of any other
//! length is rejected.

use modular_bitfield::prelude::*;

use crate::serde::*;

/// Largest static payload the radio carries in one frame.
pub const MAX_FRAME_SIZE: usize = 32;

/// Payload slots in a MSG datagram (TX → RX), `4..=14`. The first slots are
/// service slots while the link is not yet hopping.
pub const MSG_VALUES: usize = 6;

/// Payload slots in an ACK datagram (RX → TX), `3..=14`. Slot 0 carries the
/// receiver's error counter once the link is synchronized; slots 0..=2 are
/// service slots during pairing.
pub const ACK_VALUES: usize = 4;

const HEADER_SIZE: usize = 4;

const _: () = assert!(MSG_VALUES >= 4 && MSG_VALUES <= 14);
const _: () = assert!(ACK_VALUES >= 3 && ACK_VALUES <= 14);
const _: () = assert!(HEADER_SIZE + 2 * MSG_VALUES <= MAX_FRAME_SIZE);
const _: () = assert!(HEADER_SIZE + 2 * ACK_VALUES <= MAX_FRAME_SIZE);

/// Service payload slot: offered/committed session key (MSG and ACK).
pub const SVC_KEY: usize = 0;
/// Service payload slot: transmitter id (MSG and ACK).
pub const SVC_TXID: usize = 1;
/// Service payload slot: PA level index (MSG only).
pub const SVC_PA_LEVEL: usize = 2;
/// Service payload slot: receiver id (ACK only, RX → TX).
pub const SVC_RXID: usize = 2;
/// Payload slot carrying the receiver's per-second error count in every ACK
/// of a synchronized link.
pub const SVC_ERRORS: usize = 0;

/// The datagram `type` field.
#[bitfield(bits = 16)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramType {
    /// The payload carries link-internal service slots.
    pub service: bool,
    /// The payload carries application data.
    pub user: bool,
    /// The receiver has measured the cadence and is ready to hop.
    pub synchronized: bool,
    /// A pairing offer (MSG) or its echo (ACK).
    pub pairing_in_progress: bool,
    /// The handshake finished on the sender's side.
    pub pairing_complete: bool,
    pub rfu: B11,
}

/// A fixed-layout frame: `number`, `type`, then `N` payload slots.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datagram<const N: usize> {
    pub number: u16,
    pub flags: DatagramType,
    pub values: [u16; N],
}

/// MSG datagram, TX → RX, one per tick.
pub type MsgDatagram = Datagram<MSG_VALUES>;

/// ACK datagram, RX → TX, pre-loaded by the receiver and emitted by the
/// radio as the acknowledgement of a MSG.
pub type AckDatagram = Datagram<ACK_VALUES>;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramError {
    SizeMismatch { have: usize, need: usize },
}

impl<const N: usize> Datagram<N> {
    /// Frame size on the wire.
    pub const WIRE_SIZE: usize = HEADER_SIZE + 2 * N;

    pub fn new(number: u16, flags: DatagramType) -> Self {
        Datagram {
            number,
            flags,
            values: [0; N],
        }
    }

    /// Decode an incoming frame. Anything but the exact wire size is
    /// rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatagramError> {
        let have = bytes.len();
        let need = Self::WIRE_SIZE;
        if have != need {
            return Err(DatagramError::SizeMismatch { have, need });
        }

        let number = get_u16_le(bytes, 0);
        let flags = DatagramType::from_bytes([bytes[2], bytes[3]]);
        let mut values = [0u16; N];
        for (idx, value) in values.iter_mut().enumerate() {
            *value = get_u16_le(bytes, HEADER_SIZE + 2 * idx);
        }
        Ok(Datagram {
            number,
            flags,
            values,
        })
    }

    /// Encode into `out`, returning the number of bytes written.
    pub fn write_bytes(&self, out: &mut [u8]) -> Result<usize, DatagramError> {
        let have = out.len();
        let need = Self::WIRE_SIZE;
        if have < need {
            return Err(DatagramError::SizeMismatch { have, need });
        }

        self.encode_into(out);
        Ok(need)
    }

    /// Encode into a radio-sized buffer. The frame sizes of the link's
    /// [`MsgDatagram`] and [`AckDatagram`] are checked against
    /// [`MAX_FRAME_SIZE`] at compile time.
    pub fn to_frame(&self) -> ([u8; MAX_FRAME_SIZE], usize) {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        self.encode_into(&mut buf);
        (buf, Self::WIRE_SIZE)
    }

    fn encode_into(&self, out: &mut [u8]) {
        put_u16_le(out, 0, self.number);
        out[2..4].copy_from_slice(&self.flags.into_bytes());
        for (idx, value) in self.values.iter().enumerate() {
            put_u16_le(out, HEADER_SIZE + 2 * idx, *value);
        }
    }
}
