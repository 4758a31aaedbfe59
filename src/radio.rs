//! The hardware boundary: a thin facade over an auto-acknowledging 2.4 GHz
//! packet radio.
//!
//! The link core owns the radio exclusively and reconfigures it between
//! frames; nothing here is re-entrant. Frames are fixed-size (no dynamic
//! payload sizing) and the chip's 16-bit CRC is the only integrity check.

use crate::config::LinkConfig;

/// Air data rate.
///
/// Lower rates give longer range and fewer retransmissions at the cost of
/// airtime and supply current.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRate {
    Kbps250,
    Mbps1,
    Mbps2,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct DataRateOutOfRange;

impl TryFrom<u8> for DataRate {
    type Error = DataRateOutOfRange;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => DataRate::Kbps250,
            1 => DataRate::Mbps1,
            2 => DataRate::Mbps2,
            _ => return Err(DataRateOutOfRange),
        })
    }
}

impl From<DataRate> for u8 {
    fn from(v: DataRate) -> Self {
        match v {
            DataRate::Kbps250 => 0,
            DataRate::Mbps1 => 1,
            DataRate::Mbps2 => 2,
        }
    }
}

/// RF output power.
///
/// Two devices closer than about a meter should use [`PaLevel::Min`]: a
/// stronger signal saturates the receiver and datagrams get lost.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaLevel {
    Min,
    Low,
    High,
    Max,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct PaLevelOutOfRange;

impl TryFrom<u8> for PaLevel {
    type Error = PaLevelOutOfRange;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => PaLevel::Min,
            1 => PaLevel::Low,
            2 => PaLevel::High,
            3 => PaLevel::Max,
            _ => return Err(PaLevelOutOfRange),
        })
    }
}

impl From<PaLevel> for u8 {
    fn from(v: PaLevel) -> Self {
        match v {
            PaLevel::Min => 0,
            PaLevel::Low => 1,
            PaLevel::High => 2,
            PaLevel::Max => 3,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcLength {
    Disabled,
    Bits8,
    Bits16,
}

/// Address width used on both ends.
pub const ADDRESS_WIDTH: u8 = 3;

/// Pipe the receiver listens on; its acknowledgements carry the pre-loaded
/// payload back to the transmitter's pipe 0.
pub(crate) const DATA_PIPE: u8 = 1;

const ADDRESS_PAD: u8 = 0xE7;

/// On-air pipe address: a 16-bit device id in little-endian order plus a
/// fixed pad byte, identical on both ends.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeAddress(pub [u8; ADDRESS_WIDTH as usize]);

impl PipeAddress {
    pub fn for_device(id: u16) -> Self {
        let id = id.to_le_bytes();
        PipeAddress([id[0], id[1], ADDRESS_PAD])
    }
}

/// Primitive operations of the transceiver.
///
/// Implementations wrap the physical chip driver; a simulated medium
/// implements the same trait for testing.
pub trait Radio {
    type Error;

    /// Probe and initialise the chip. Failure here is fatal: the link never
    /// enters an operational state.
    fn begin(&mut self) -> Result<(), Self::Error>;

    fn power_up(&mut self) -> Result<(), Self::Error>;
    fn power_down(&mut self) -> Result<(), Self::Error>;

    /// Address width in bytes, at least 3.
    fn set_address_width(&mut self, width: u8) -> Result<(), Self::Error>;
    fn set_data_rate(&mut self, rate: DataRate) -> Result<(), Self::Error>;
    fn set_crc_length(&mut self, crc: CrcLength) -> Result<(), Self::Error>;
    fn set_pa_level(&mut self, level: PaLevel, lna_enabled: bool) -> Result<(), Self::Error>;

    /// Auto-retransmit: `delay` in 250 µs steps (`0..=15`, 0 meaning
    /// 250 µs), `attempts` `0..=15`. Transmitter side only.
    fn set_retries(&mut self, delay: u8, attempts: u8) -> Result<(), Self::Error>;

    /// Enable pre-loaded per-pipe acknowledgement payloads.
    fn enable_ack_payload(&mut self) -> Result<(), Self::Error>;

    fn open_writing_pipe(&mut self, address: PipeAddress) -> Result<(), Self::Error>;
    fn open_reading_pipe(&mut self, pipe: u8, address: PipeAddress) -> Result<(), Self::Error>;
    fn close_reading_pipe(&mut self, pipe: u8) -> Result<(), Self::Error>;

    fn set_channel(&mut self, channel: u8) -> Result<(), Self::Error>;

    fn start_listening(&mut self) -> Result<(), Self::Error>;
    fn stop_listening(&mut self) -> Result<(), Self::Error>;

    /// Blocking send. Returns `true` once the frame was acknowledged within
    /// the auto-retransmit window, `false` when the window expired. An
    /// acknowledgement payload, if one came back, becomes available through
    /// [`read`](Radio::read).
    fn write(&mut self, buf: &[u8]) -> Result<bool, Self::Error>;

    /// Pipe number with a pending payload, if any. Non-blocking.
    fn available(&mut self) -> Result<Option<u8>, Self::Error>;

    /// Pop the pending payload, returning its byte count. On the receiver
    /// this also queues the pre-loaded acknowledgement payload for the
    /// responding pipe.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Queue the payload the chip will attach to the next acknowledgement
    /// sent from `pipe`.
    fn write_ack_payload(&mut self, pipe: u8, buf: &[u8]) -> Result<(), Self::Error>;

    fn flush_tx(&mut self) -> Result<(), Self::Error>;
    fn flush_rx(&mut self) -> Result<(), Self::Error>;
}

/// Bring-up shared by both roles. Pipes, channel, retries and PA level are
/// configured by the caller afterwards; the radio is left powered down.
pub(crate) fn bring_up<R: Radio>(radio: &mut R, config: &LinkConfig) -> Result<(), R::Error> {
    radio.begin()?;
    radio.power_down()?;
    radio.enable_ack_payload()?;
    radio.set_crc_length(CrcLength::Bits16)?;
    radio.set_address_width(ADDRESS_WIDTH)?;
    radio.set_data_rate(config.data_rate)?;
    Ok(())
}
