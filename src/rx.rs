//! The receiving endpoint.

use crate::config::{defaults, ConfigError, LinkConfig};
use crate::datagram::{
    AckDatagram, DatagramType, MsgDatagram, MAX_FRAME_SIZE, SVC_ERRORS, SVC_KEY, SVC_PA_LEVEL,
    SVC_RXID, SVC_TXID,
};
use crate::pairing::PairingResponder;
use crate::radio::{self, PaLevel, PipeAddress, Radio, DATA_PIPE};
use crate::schedule::HopSchedule;
use crate::settings::{self, PersistedConfig, SettingsKey, SettingsStore};
use crate::supervisor::{ErrorWindow, SequenceStep, SequenceTracker, GAP_LIMIT, SYNC_LOSS_TIMEOUT};
use crate::time::{Duration, Instant, Timer};
use crate::timing::PeriodEstimator;
use crate::{InitError, LinkState, RxApplication, SessionKey};

/// Receiving endpoint of the link.
///
/// [`poll`](Receiver::poll) is called as often as the integration can
/// manage; it drains pending datagrams, keeps the acknowledgement payload
/// loaded and, once hopping, walks the schedule on the measured cadence.
pub struct Receiver<R, T, S>
where
    R: Radio,
    T: Timer,
    S: SettingsStore,
{
    radio: R,
    timer: T,
    settings: S,
    config: LinkConfig,

    txid: u16,
    rxid: u16,
    mono_channel: u8,
    pa_level: PaLevel,
    session: Option<SessionKey>,
    schedule: Option<HopSchedule>,

    state: LinkState,
    oracle: PeriodEstimator,
    tracker: SequenceTracker,
    errors: ErrorWindow,
    pairing: PairingResponder,

    announced: bool,
    pairing_handoff: bool,
    avg_period_us: Option<u32>,
    expected_number: u16,
    expected_at: Option<Instant>,
    last_rx: Option<Instant>,
    settings_fault: bool,
}

impl<R, T, S> Receiver<R, T, S>
where
    R: Radio,
    T: Timer,
    S: SettingsStore,
{
    pub fn new(
        radio: R,
        timer: T,
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

        let mut this = Receiver {
            radio,
            timer,
            settings,
            config,
            txid: persisted.txid,
            rxid: persisted.rxid,
            mono_channel: persisted.mono_channel,
            pa_level: persisted.pa_level,
            session: persisted.session_key,
            schedule: None,
            state: LinkState::MonoFreq,
            oracle: PeriodEstimator::new(),
            tracker: SequenceTracker::new(),
            errors: ErrorWindow::new(),
            pairing: PairingResponder::new(),
            announced: false,
            pairing_handoff: false,
            avg_period_us: None,
            expected_number: 0,
            expected_at: None,
            last_rx: None,
            settings_fault,
        };

        radio::bring_up(&mut this.radio, &this.config).map_err(InitError::Hardware)?;

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

    /// Drain the radio and advance the hop clock. Call at least a few times
    /// per frame period.
    pub fn poll(&mut self, app: &mut impl RxApplication) -> Result<(), R::Error> {
        let now = self.timer.now();
        self.errors.roll(now);
        match self.state {
            LinkState::Pairing => self.poll_pairing(now),
            LinkState::MonoFreq => self.poll_monofreq(now),
            LinkState::MultiFreq => self.poll_multifreq(now, app),
        }
    }

    /// The user held the pairing button: drop back to the pairing channel
    /// and wait for an offer.
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
        self.rxid
    }

    /// Measured datagram period in microseconds; cleared on loss of sync.
    pub fn average_period_us(&self) -> Option<u32> {
        self.avg_period_us
    }

    /// Missing datagrams in the last completed one-second window.
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

    fn poll_pairing(&mut self, now: Instant) -> Result<(), R::Error> {
        while let Some(msg) = self.receive()? {
            self.last_rx = Some(now);
            if msg.flags.pairing_complete() {
                // the transmitter has committed; its service slots carry the
                // session we join
                if let Some(key) = SessionKey::new(msg.values[SVC_KEY]) {
                    self.commit_session(key, msg.values[SVC_TXID]);
                    self.enter_monofreq()?;
                    return Ok(());
                }
                continue;
            }
            if let Some(echo) = self.pairing.on_msg(&msg) {
                let handoff = self.pairing_handoff;
                let mut flags = DatagramType::new()
                    .with_service(true)
                    .with_pairing_in_progress(true);
                if echo.complete {
                    flags.set_pairing_complete(true);
                }
                let mut ack = AckDatagram::new(msg.number, flags);
                ack.values[SVC_KEY] = echo.offer.key;
                ack.values[SVC_TXID] = echo.offer.txid;
                ack.values[SVC_RXID] = self.rxid;
                self.load_ack(&ack)?;
                self.pairing_handoff = echo.complete;

                if handoff {
                    // this datagram's hardware ACK delivered our completed
                    // echo; the transmitter commits and moves off the
                    // pairing address, so follow it
                    let address = PipeAddress::for_device(echo.offer.txid);
                    self.radio.close_reading_pipe(DATA_PIPE)?;
                    self.radio.open_reading_pipe(DATA_PIPE, address)?;
                }
            }
        }

        // a transmitter we followed off the pairing address never showed up
        // there; go back to square one
        let silent_for = self
            .last_rx
            .and_then(|last| now.checked_duration_since(last));
        if self.pairing_handoff && silent_for.map_or(false, |d| d >= SYNC_LOSS_TIMEOUT) {
            self.enter_pairing()?;
        }
        Ok(())
    }

    fn poll_monofreq(&mut self, now: Instant) -> Result<(), R::Error> {
        while let Some(msg) = self.receive()? {
            self.on_monofreq_msg(msg, now)?;
            if self.state != LinkState::MonoFreq {
                break;
            }
        }
        Ok(())
    }

    fn on_monofreq_msg(&mut self, msg: MsgDatagram, now: Instant) -> Result<(), R::Error> {
        self.last_rx = Some(now);
        match self.tracker.observe(msg.number) {
            SequenceStep::InOrder => {}
            SequenceStep::Missed { missing } => self.errors.add(missing),
            // the transmitter restarted; the oracle restarts on its own
            SequenceStep::OutOfSync => {}
        }

        self.adopt_service(&msg)?;
        if let Some(avg) = self.oracle.record(msg.number, now) {
            self.avg_period_us = Some(avg);
        }

        let was_announced = self.announced;
        let synced = self.avg_period_us.is_some() && self.schedule.is_some();
        let mut flags = DatagramType::new().with_service(true);
        if synced {
            flags.set_synchronized(true);
        }
        let mut ack = AckDatagram::new(msg.number, flags);
        ack.values[SVC_ERRORS] = self.errors.last_second();
        self.load_ack(&ack)?;
        self.announced = synced;

        if was_announced && synced {
            // this datagram's hardware ACK delivered the SYNCHRONIZED flag
            // to the transmitter; hop together from the next number
            self.enter_multifreq(msg.number, now)?;
        }
        Ok(())
    }

    fn poll_multifreq(
        &mut self,
        now: Instant,
        app: &mut impl RxApplication,
    ) -> Result<(), R::Error> {
        while let Some(msg) = self.receive()? {
            self.on_multifreq_msg(msg, now, app)?;
            if self.state != LinkState::MultiFreq {
                return Ok(());
            }
        }

        let silent_for = self
            .last_rx
            .and_then(|last| now.checked_duration_since(last));
        if silent_for.map_or(false, |d| d >= SYNC_LOSS_TIMEOUT) {
            // a full second without one datagram: back to the mono channel,
            // re-measure from scratch
            self.enter_monofreq()?;
            return Ok(());
        }

        let avg = match self.avg_period_us {
            Some(avg) => u64::from(avg),
            None => return Ok(()),
        };
        // sized for ≥1 % clock drift on both sides plus radio turnaround
        let epsilon = Duration::micros(avg / 20);
        while let Some(expected) = self.expected_at {
            if now <= expected + epsilon {
                break;
            }
            // the window expired with nothing on air for us
            self.errors.add(1);
            self.expected_number = self.expected_number.wrapping_add(1);
            self.expected_at = Some(expected + Duration::micros(avg));
            self.tune_to_expected()?;
        }
        Ok(())
    }

    fn on_multifreq_msg(
        &mut self,
        msg: MsgDatagram,
        now: Instant,
        app: &mut impl RxApplication,
    ) -> Result<(), R::Error> {
        let gap = msg.number.wrapping_sub(self.expected_number);
        if gap >= GAP_LIMIT {
            // a regression or an unbelievable jump: the schedules no longer
            // agree
            self.enter_monofreq()?;
            return Ok(());
        }
        if gap > 0 {
            self.errors.add(gap);
        }
        self.last_rx = Some(now);

        if msg.flags.user() {
            app.handle_message(&msg.values);
        }
        let mut ack = AckDatagram::new(
            msg.number,
            DatagramType::new().with_user(true).with_synchronized(true),
        );
        app.fill_ack(&mut ack.values);
        ack.values[SVC_ERRORS] = self.errors.last_second();
        self.load_ack(&ack)?;

        self.expected_number = msg.number.wrapping_add(1);
        if let Some(avg) = self.avg_period_us {
            self.expected_at = Some(now + Duration::micros(u64::from(avg)));
        }
        self.tune_to_expected()?;
        Ok(())
    }

    /// Service frames keep broadcasting the committed session; adopt what
    /// changed (a re-paired transmitter, a new PA level).
    fn adopt_service(&mut self, msg: &MsgDatagram) -> Result<(), R::Error> {
        if !msg.flags.service() {
            return Ok(());
        }
        if let Some(key) = SessionKey::new(msg.values[SVC_KEY]) {
            if self.session != Some(key) {
                self.commit_session(key, msg.values[SVC_TXID]);
            }
        }
        let level = u8::try_from(msg.values[SVC_PA_LEVEL])
            .ok()
            .and_then(|raw| PaLevel::try_from(raw).ok());
        if let Some(level) = level {
            if level != self.pa_level {
                self.pa_level = level;
                self.radio.set_pa_level(level, true)?;
                settings::commit(
                    &mut self.settings,
                    SettingsKey::PaLevel,
                    u32::from(u8::from(level)),
                    &mut self.settings_fault,
                );
            }
        }
        Ok(())
    }

    fn commit_session(&mut self, key: SessionKey, txid: u16) {
        self.session = Some(key);
        if txid != 0 {
            self.txid = txid;
        }
        self.schedule = Some(HopSchedule::derive(
            key,
            self.config.max_channel,
            self.mono_channel,
        ));
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

    fn receive(&mut self) -> Result<Option<MsgDatagram>, R::Error> {
        if self.radio.available()?.is_none() {
            return Ok(None);
        }
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let got = self.radio.read(&mut buf)?;
        // mis-sized frames are dropped, not surfaced
        Ok(MsgDatagram::from_bytes(&buf[..got]).ok())
    }

    fn load_ack(&mut self, ack: &AckDatagram) -> Result<(), R::Error> {
        let (frame, len) = ack.to_frame();
        self.radio.write_ack_payload(DATA_PIPE, &frame[..len])
    }

    fn enter_pairing(&mut self) -> Result<(), R::Error> {
        self.pairing.reset();
        self.oracle.reset();
        self.tracker.reset();
        self.avg_period_us = None;
        self.announced = false;
        self.pairing_handoff = false;
        self.expected_at = None;
        self.last_rx = None;
        // minimum power: pair only with a peer within arm's reach
        self.retune(
            PipeAddress::for_device(defaults::TX_DEVICE_ID),
            PaLevel::Min,
        )?;
        self.state = LinkState::Pairing;
        Ok(())
    }

    fn enter_monofreq(&mut self) -> Result<(), R::Error> {
        self.oracle.reset();
        self.tracker.reset();
        self.avg_period_us = None;
        self.announced = false;
        self.pairing_handoff = false;
        self.expected_at = None;
        self.retune(PipeAddress::for_device(self.txid), self.pa_level)?;
        self.state = LinkState::MonoFreq;
        Ok(())
    }

    fn enter_multifreq(&mut self, last_number: u16, at: Instant) -> Result<(), R::Error> {
        let avg = match self.avg_period_us {
            Some(avg) => avg,
            None => return Ok(()),
        };
        self.expected_number = last_number.wrapping_add(1);
        self.expected_at = Some(at + Duration::micros(u64::from(avg)));
        self.last_rx = Some(at);
        self.state = LinkState::MultiFreq;
        self.tune_to_expected()?;
        Ok(())
    }

    fn tune_to_expected(&mut self) -> Result<(), R::Error> {
        if let Some(schedule) = self.schedule.as_ref() {
            let channel = schedule.channel_for(self.expected_number);
            self.radio.set_channel(channel)?;
        }
        Ok(())
    }

    /// Hot reconfiguration between frames: flush, re-pipe, back to the mono
    /// channel, and answer the very first datagram with a well-formed
    /// payload.
    fn retune(&mut self, address: PipeAddress, pa: PaLevel) -> Result<(), R::Error> {
        self.radio.set_pa_level(pa, true)?;
        self.radio.stop_listening()?;
        self.radio.flush_tx()?;
        self.radio.flush_rx()?;
        self.radio.close_reading_pipe(DATA_PIPE)?;
        self.radio.open_reading_pipe(DATA_PIPE, address)?;
        self.radio.set_channel(self.mono_channel)?;
        self.radio.start_listening()?;

        let blank = AckDatagram::new(0, DatagramType::new());
        let (frame, len) = blank.to_frame();
        self.radio.write_ack_payload(DATA_PIPE, &frame[..len])
    }
}
