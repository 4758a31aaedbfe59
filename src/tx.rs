//! The transmitting endpoint.

use rand_core::RngCore;

use crate::config::{defaults, ConfigError, LinkConfig};
use crate::datagram::{
    AckDatagram, DatagramType, MsgDatagram, MAX_FRAME_SIZE, SVC_KEY, SVC_PA_LEVEL, SVC_TXID,
};
use crate::pairing::PairingInitiator;
use crate::radio::{self, PaLevel, PipeAddress, Radio};
use crate::schedule::HopSchedule;
use crate::settings::{self, PersistedConfig, SettingsKey, SettingsStore};
use crate::supervisor::ErrorWindow;
use crate::time::{Instant, Timer};
use crate::{InitError, LinkState, SessionKey, TxApplication};

/// What one tick did, for the integration's status surface.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct TickReport {
    /// Sequence number of the MSG sent this tick.
    pub number: u16,
    /// Whether the radio observed an acknowledgement.
    pub acked: bool,
    pub state: LinkState,
}

/// Transmitting endpoint of the link.
///
/// The integration calls [`tick`](Transmitter::tick) once per frame period;
/// everything — pairing, the bootstrap exchange, hopping and fallback — is
/// driven from there.
pub struct Transmitter<R, T, G, S>
where
    R: Radio,
    T: Timer,
    G: RngCore,
    S: SettingsStore,
{
    radio: R,
    timer: T,
    rng: G,
    settings: S,
    config: LinkConfig,

    txid: u16,
    rxid: u16,
    mono_channel: u8,
    session: Option<SessionKey>,
    schedule: Option<HopSchedule>,

    state: LinkState,
    counter: u16,
    pairing: Option<PairingInitiator>,
    unacked_run: u16,
    errors: ErrorWindow,
    settings_fault: bool,
}

impl<R, T, G, S> Transmitter<R, T, G, S>
where
    R: Radio,
    T: Timer,
    G: RngCore,
    S: SettingsStore,
{
    pub fn new(
        radio: R,
        timer: T,
        rng: G,
        mut settings: S,
        config: LinkConfig,
    ) -> Result<Self, InitError<R::Error>> {
        config.validate()?;

        let (persisted, settings_fault) = PersistedConfig::load(&mut settings, config.pa_level);
        if persisted.mono_channel > config.max_channel {
            return Err(InitError::Config(ConfigError::MonoChannelOutOfRange {
                mono_channel: persisted.mono_channel,
                max_channel: config.max_channel,
            }));
        }

        let mut this = Transmitter {
            radio,
            timer,
            rng,
            settings,
            config,
            txid: persisted.txid,
            rxid: persisted.rxid,
            mono_channel: persisted.mono_channel,
            session: persisted.session_key,
            schedule: None,
            state: LinkState::MonoFreq,
            counter: 0,
            pairing: None,
            unacked_run: 0,
            errors: ErrorWindow::new(),
            settings_fault,
        };

        radio::bring_up(&mut this.radio, &this.config).map_err(InitError::Hardware)?;
        this.radio
            .set_retries(this.config.art_delay, this.config.art_attempts)
            .map_err(InitError::Hardware)?;

        match this.session {
            Some(key) => {
                this.schedule = Some(HopSchedule::derive(
                    key,
                    this.config.max_channel,
                    this.mono_channel,
                ));
                this.enter_monofreq().map_err(InitError::Hardware)?;
            }
            None => this.enter_pairing().map_err(InitError::Hardware)?,
        }
        this.radio.power_up().map_err(InitError::Hardware)?;
        Ok(this)
    }

    /// One frame period. Sends exactly one MSG and processes whatever
    /// acknowledgement came back.
    pub fn tick(&mut self, app: &mut impl TxApplication) -> Result<TickReport, R::Error> {
        let now = self.timer.now();
        self.errors.roll(now);
        match self.state {
            LinkState::Pairing => self.tick_pairing(now),
            LinkState::MonoFreq => self.tick_monofreq(),
            LinkState::MultiFreq => self.tick_multifreq(app),
        }
    }

    /// The user held the pairing button: abandon the session and court a
    /// receiver with a fresh key.
    pub fn start_pairing(&mut self) -> Result<(), R::Error> {
        self.enter_pairing()
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn session_key(&self) -> Option<SessionKey> {
        self.session
    }

    pub fn schedule(&self) -> Option<&HopSchedule> {
        self.schedule.as_ref()
    }

    pub fn device_id(&self) -> u16 {
        self.txid
    }

    /// Unacknowledged MSGs in the last completed one-second window.
    pub fn errors_last_second(&self) -> u16 {
        self.errors.last_second()
    }

    pub fn errors_total(&self) -> u32 {
        self.errors.total()
    }

    /// True once any settings read or write has failed; the link keeps
    /// running on defaults.
    pub fn settings_fault(&self) -> bool {
        self.settings_fault
    }

    fn tick_pairing(&mut self, now: Instant) -> Result<TickReport, R::Error> {
        let key = self
            .pairing
            .get_or_insert_with(|| PairingInitiator::new(&mut self.rng, now))
            .key();

        let mut msg = MsgDatagram::new(
            self.counter,
            DatagramType::new()
                .with_service(true)
                .with_pairing_in_progress(true),
        );
        msg.values[SVC_KEY] = key.get();
        msg.values[SVC_TXID] = self.txid;
        msg.values[SVC_PA_LEVEL] = u16::from(u8::from(self.config.pa_level));

        let (acked, ack) = self.transmit(&msg)?;
        let confirmation = match (&self.pairing, ack) {
            (Some(pairing), Some(ack)) => pairing.on_ack(&ack),
            _ => None,
        };
        if let Some(confirmation) = confirmation {
            self.commit_session(confirmation.key, confirmation.rxid);
            self.schedule = Some(HopSchedule::derive(
                confirmation.key,
                self.config.max_channel,
                self.mono_channel,
            ));
            self.enter_monofreq()?;
        } else if let Some(pairing) = self.pairing.as_mut() {
            pairing.redraw_if_stale(&mut self.rng, now);
        }

        Ok(TickReport {
            number: msg.number,
            acked,
            state: self.state,
        })
    }

    fn tick_monofreq(&mut self) -> Result<TickReport, R::Error> {
        let mut msg = MsgDatagram::new(
            self.counter,
            DatagramType::new()
                .with_service(true)
                .with_pairing_complete(true),
        );
        if let Some(key) = self.session {
            msg.values[SVC_KEY] = key.get();
        }
        msg.values[SVC_TXID] = self.txid;
        msg.values[SVC_PA_LEVEL] = u16::from(u8::from(self.config.pa_level));

        let (acked, ack) = self.transmit(&msg)?;
        self.note_ack(acked);
        if let Some(ack) = ack {
            if ack.flags.synchronized() && self.schedule.is_some() {
                // the receiver measured the cadence; hop from the next frame
                self.state = LinkState::MultiFreq;
            }
        }

        Ok(TickReport {
            number: msg.number,
            acked,
            state: self.state,
        })
    }

    fn tick_multifreq(&mut self, app: &mut impl TxApplication) -> Result<TickReport, R::Error> {
        let number = self.counter;
        if let Some(schedule) = self.schedule.as_ref() {
            self.radio.set_channel(schedule.channel_for(number))?;
        }

        let mut msg = MsgDatagram::new(number, DatagramType::new().with_user(true));
        app.fill_message(&mut msg.values);

        let (acked, ack) = self.transmit(&msg)?;
        self.note_ack(acked);
        if acked {
            if let Some(ack) = ack {
                if ack.flags.user() {
                    app.handle_ack(&ack.values);
                }
            }
        } else if self.unacked_run >= self.config.datagrams_per_second {
            // a full second of one-way silence: the receiver has fallen back
            // to the mono channel
            self.enter_monofreq()?;
        }

        Ok(TickReport {
            number,
            acked,
            state: self.state,
        })
    }

    /// Send one MSG and pop the acknowledgement payload, if the radio got
    /// one back. A mis-sized payload counts as no payload.
    fn transmit(&mut self, msg: &MsgDatagram) -> Result<(bool, Option<AckDatagram>), R::Error> {
        let (frame, len) = msg.to_frame();
        self.counter = self.counter.wrapping_add(1);
        if !self.radio.write(&frame[..len])? {
            return Ok((false, None));
        }
        if self.radio.available()?.is_none() {
            return Ok((true, None));
        }
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let got = self.radio.read(&mut buf)?;
        Ok((true, AckDatagram::from_bytes(&buf[..got]).ok()))
    }

    fn note_ack(&mut self, acked: bool) {
        if acked {
            self.unacked_run = 0;
        } else {
            self.unacked_run = self.unacked_run.saturating_add(1);
            self.errors.add(1);
        }
    }

    fn commit_session(&mut self, key: SessionKey, rxid: u16) {
        self.session = Some(key);
        if rxid != 0 {
            self.rxid = rxid;
        }
        settings::commit(
            &mut self.settings,
            SettingsKey::SessionKey,
            u32::from(key.get()),
            &mut self.settings_fault,
        );
        settings::commit(
            &mut self.settings,
            SettingsKey::TxId,
            u32::from(self.txid),
            &mut self.settings_fault,
        );
        settings::commit(
            &mut self.settings,
            SettingsKey::RxId,
            u32::from(self.rxid),
            &mut self.settings_fault,
        );
    }

    fn enter_pairing(&mut self) -> Result<(), R::Error> {
        let now = self.timer.now();
        self.pairing = Some(PairingInitiator::new(&mut self.rng, now));
        // restrict range so a distant third device cannot pair by accident
        self.retune(
            PipeAddress::for_device(defaults::TX_DEVICE_ID),
            PaLevel::Min,
        )?;
        self.state = LinkState::Pairing;
        Ok(())
    }

    fn enter_monofreq(&mut self) -> Result<(), R::Error> {
        self.pairing = None;
        self.unacked_run = 0;
        self.retune(PipeAddress::for_device(self.txid), self.config.pa_level)?;
        self.state = LinkState::MonoFreq;
        Ok(())
    }

    /// Hot reconfiguration between frames: flush, re-address, re-tune to the
    /// mono channel.
    fn retune(&mut self, address: PipeAddress, pa: PaLevel) -> Result<(), R::Error> {
        self.radio.set_pa_level(pa, true)?;
        self.radio.stop_listening()?;
        self.radio.flush_tx()?;
        self.radio.flush_rx()?;
        self.radio.open_writing_pipe(address)?;
        self.radio.set_channel(self.mono_channel)?;
        Ok(())
    }
}
