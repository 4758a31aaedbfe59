//! Persisted link state.
//!
//! The store itself is an external collaborator behind a narrow key/value
//! API; its record layout is opaque here. An unreadable or unwritable store
//! is never fatal: the link runs on defaults and reports the condition
//! through its status surface.

use crate::config::defaults;
use crate::radio::PaLevel;
use crate::SessionKey;

/// Keys understood by the store. Values fit in a `u32`.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsKey {
    TxId,
    RxId,
    MonoChannel,
    PaLevel,
    SessionKey,
}

/// Key/value persistence provided by the platform.
pub trait SettingsStore {
    type Error;

    /// `Ok(None)` when the key has never been written.
    fn load(&mut self, key: SettingsKey) -> Result<Option<u32>, Self::Error>;

    fn store(&mut self, key: SettingsKey, value: u32) -> Result<(), Self::Error>;
}

/// The link state read back at boot.
#[derive(Debug, Clone, Copy)]
pub struct PersistedConfig {
    pub txid: u16,
    pub rxid: u16,
    pub mono_channel: u8,
    pub pa_level: PaLevel,
    pub session_key: Option<SessionKey>,
}

impl PersistedConfig {
    /// Read everything, substituting defaults for missing, invalid or
    /// unreadable records. The second value reports whether any read failed.
    pub fn load<S: SettingsStore>(store: &mut S, default_pa: PaLevel) -> (Self, bool) {
        let mut fault = false;
        let mut get = |key: SettingsKey| -> Option<u32> {
            match store.load(key) {
                Ok(value) => value,
                Err(_) => {
                    fault = true;
                    None
                }
            }
        };

        // a device id of zero is reserved for "never assigned"
        let txid = match get(SettingsKey::TxId) {
            Some(raw) if raw as u16 != 0 => raw as u16,
            _ => defaults::TX_DEVICE_ID,
        };
        let rxid = match get(SettingsKey::RxId) {
            Some(raw) if raw as u16 != 0 => raw as u16,
            _ => defaults::RX_DEVICE_ID,
        };
        let mono_channel = match get(SettingsKey::MonoChannel) {
            Some(raw) if raw <= 125 => raw as u8,
            _ => defaults::MONO_CHANNEL,
        };
        let pa_level = get(SettingsKey::PaLevel)
            .and_then(|raw| u8::try_from(raw).ok())
            .and_then(|raw| PaLevel::try_from(raw).ok())
            .unwrap_or(default_pa);
        let session_key = get(SettingsKey::SessionKey).and_then(|raw| SessionKey::new(raw as u16));

        (
            PersistedConfig {
                txid,
                rxid,
                mono_channel,
                pa_level,
                session_key,
            },
            fault,
        )
    }
}

/// Write one record; a persistence failure raises the fault flag instead of
/// propagating.
pub(crate) fn commit<S: SettingsStore>(
    store: &mut S,
    key: SettingsKey,
    value: u32,
    fault: &mut bool,
) {
    if store.store(key, value).is_err() {
        *fault = true;
    }
}
