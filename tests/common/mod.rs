//! Shared fixtures: a simulated radio medium, a scripted clock and RNG, an
//! in-memory settings store, and a harness wiring one transmitter to one
//! receiver.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use fhss24::radio::{CrcLength, DataRate, PaLevel, PipeAddress, Radio};
use fhss24::settings::{SettingsKey, SettingsStore};
use fhss24::time::{Instant, Timer};
use fhss24::tx::TickReport;
use fhss24::{
    LinkConfig, Receiver, RxApplication, Transmitter, TxApplication, ACK_VALUES, MSG_VALUES,
};
use rand_core::RngCore;

/// Frame period driven by the harness, µs.
pub const TICK_US: u64 = 10_000;

#[derive(Clone)]
pub struct TestClock(Rc<Cell<u64>>);

impl TestClock {
    pub fn new() -> Self {
        TestClock(Rc::new(Cell::new(0)))
    }

    pub fn advance(&self, micros: u64) {
        self.0.set(self.0.get() + micros);
    }
}

impl Timer for TestClock {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.0.get())
    }
}

/// Entropy source replaying a script, then a fixed filler value.
pub struct ScriptedRng(VecDeque<u32>);

impl ScriptedRng {
    pub fn new(script: &[u32]) -> Self {
        ScriptedRng(script.iter().copied().collect())
    }
}

impl RngCore for ScriptedRng {
    fn next_u32(&mut self) -> u32 {
        self.0.pop_front().unwrap_or(0xACE1)
    }

    fn next_u64(&mut self) -> u64 {
        u64::from(self.next_u32()) << 32 | u64::from(self.next_u32())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemSettings(Rc<RefCell<Vec<(SettingsKey, u32)>>>);

impl MemSettings {
    pub fn new() -> Self {
        MemSettings::default()
    }

    pub fn with(self, key: SettingsKey, value: u32) -> Self {
        self.put(key, value);
        self
    }

    pub fn put(&self, key: SettingsKey, value: u32) {
        let mut records = self.0.borrow_mut();
        if let Some(record) = records.iter_mut().find(|(k, _)| *k == key) {
            record.1 = value;
        } else {
            records.push((key, value));
        }
    }

    pub fn get(&self, key: SettingsKey) -> Option<u32> {
        self.0.borrow().iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }
}

impl SettingsStore for MemSettings {
    type Error = ();

    fn load(&mut self, key: SettingsKey) -> Result<Option<u32>, ()> {
        Ok(self.get(key))
    }

    fn store(&mut self, key: SettingsKey, value: u32) -> Result<(), ()> {
        self.put(key, value);
        Ok(())
    }
}

/// A store whose medium is gone.
pub struct FailingSettings;

impl SettingsStore for FailingSettings {
    type Error = ();

    fn load(&mut self, _key: SettingsKey) -> Result<Option<u32>, ()> {
        Err(())
    }

    fn store(&mut self, _key: SettingsKey, _value: u32) -> Result<(), ()> {
        Err(())
    }
}

pub fn paired_settings(txid: u16, rxid: u16, session_key: u16) -> MemSettings {
    MemSettings::new()
        .with(SettingsKey::TxId, u32::from(txid))
        .with(SettingsKey::RxId, u32::from(rxid))
        .with(SettingsKey::SessionKey, u32::from(session_key))
}

#[derive(Debug, Clone, Copy)]
pub struct WriteRecord {
    pub number: u16,
    pub channel: u8,
    pub delivered: bool,
}

#[derive(Default)]
struct BusState {
    tx_channel: u8,
    rx_channel: u8,
    tx_address: Option<PipeAddress>,
    rx_address: Option<PipeAddress>,
    rx_listening: bool,
    loaded_ack: Option<Vec<u8>>,
    rx_inbox: VecDeque<Vec<u8>>,
    tx_ack_inbox: Option<Vec<u8>>,
    drop_msgs: bool,
    drop_acks: bool,
    writes: Vec<WriteRecord>,
    acks: Vec<(u16, Vec<u8>)>,
}

/// The shared medium. Delivery requires the receiver to be listening on the
/// transmitter's channel and address, exactly one hop at a time.
#[derive(Clone, Default)]
pub struct Bus(Rc<RefCell<BusState>>);

impl Bus {
    pub fn new() -> Self {
        Bus::default()
    }

    pub fn endpoints(&self) -> (TxRadio, RxRadio) {
        (TxRadio(self.0.clone()), RxRadio(self.0.clone()))
    }

    /// Simulate RF loss of every MSG until cleared.
    pub fn set_drop_msgs(&self, on: bool) {
        self.0.borrow_mut().drop_msgs = on;
    }

    /// Deliver MSGs but lose every acknowledgement until cleared.
    pub fn set_drop_acks(&self, on: bool) {
        self.0.borrow_mut().drop_acks = on;
    }

    /// Every write attempt: sequence number, channel, delivery.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.0.borrow().writes.clone()
    }

    /// Channel the MSG numbered `number` was first written on.
    pub fn channel_of(&self, number: u16) -> Option<u8> {
        self.0
            .borrow()
            .writes
            .iter()
            .find(|w| w.number == number)
            .map(|w| w.channel)
    }

    /// Acknowledgement payloads delivered back, keyed by the MSG number
    /// whose write carried them.
    pub fn delivered_acks(&self) -> Vec<(u16, Vec<u8>)> {
        self.0.borrow().acks.clone()
    }
}

pub struct TxRadio(Rc<RefCell<BusState>>);

impl Radio for TxRadio {
    type Error = ();

    fn begin(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn power_up(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn power_down(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn set_address_width(&mut self, _width: u8) -> Result<(), ()> {
        Ok(())
    }

    fn set_data_rate(&mut self, _rate: DataRate) -> Result<(), ()> {
        Ok(())
    }

    fn set_crc_length(&mut self, _crc: CrcLength) -> Result<(), ()> {
        Ok(())
    }

    fn set_pa_level(&mut self, _level: PaLevel, _lna_enabled: bool) -> Result<(), ()> {
        Ok(())
    }

    fn set_retries(&mut self, _delay: u8, _attempts: u8) -> Result<(), ()> {
        Ok(())
    }

    fn enable_ack_payload(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn open_writing_pipe(&mut self, address: PipeAddress) -> Result<(), ()> {
        self.0.borrow_mut().tx_address = Some(address);
        Ok(())
    }

    fn open_reading_pipe(&mut self, _pipe: u8, _address: PipeAddress) -> Result<(), ()> {
        Ok(())
    }

    fn close_reading_pipe(&mut self, _pipe: u8) -> Result<(), ()> {
        Ok(())
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), ()> {
        self.0.borrow_mut().tx_channel = channel;
        Ok(())
    }

    fn start_listening(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn stop_listening(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<bool, ()> {
        let mut bus = self.0.borrow_mut();
        let number = u16::from_le_bytes([buf[0], buf[1]]);
        let reachable = bus.rx_listening
            && bus.tx_channel == bus.rx_channel
            && bus.tx_address.is_some()
            && bus.tx_address == bus.rx_address;
        let delivered = reachable && !bus.drop_msgs;
        let channel = bus.tx_channel;
        bus.writes.push(WriteRecord {
            number,
            channel,
            delivered,
        });
        if !delivered {
            return Ok(false);
        }
        bus.rx_inbox.push_back(buf.to_vec());
        // the chip attaches whatever payload the receiver pre-loaded
        let ack = bus.loaded_ack.take();
        if bus.drop_acks {
            return Ok(false);
        }
        if let Some(payload) = &ack {
            bus.acks.push((number, payload.clone()));
        }
        bus.tx_ack_inbox = ack;
        Ok(true)
    }

    fn available(&mut self) -> Result<Option<u8>, ()> {
        Ok(self.0.borrow().tx_ack_inbox.as_ref().map(|_| 0))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ()> {
        match self.0.borrow_mut().tx_ack_inbox.take() {
            Some(frame) => {
                buf[..frame.len()].copy_from_slice(&frame);
                Ok(frame.len())
            }
            None => Ok(0),
        }
    }

    fn write_ack_payload(&mut self, _pipe: u8, _buf: &[u8]) -> Result<(), ()> {
        Ok(())
    }

    fn flush_tx(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn flush_rx(&mut self) -> Result<(), ()> {
        self.0.borrow_mut().tx_ack_inbox = None;
        Ok(())
    }
}

pub struct RxRadio(Rc<RefCell<BusState>>);

impl Radio for RxRadio {
    type Error = ();

    fn begin(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn power_up(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn power_down(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn set_address_width(&mut self, _width: u8) -> Result<(), ()> {
        Ok(())
    }

    fn set_data_rate(&mut self, _rate: DataRate) -> Result<(), ()> {
        Ok(())
    }

    fn set_crc_length(&mut self, _crc: CrcLength) -> Result<(), ()> {
        Ok(())
    }

    fn set_pa_level(&mut self, _level: PaLevel, _lna_enabled: bool) -> Result<(), ()> {
        Ok(())
    }

    fn set_retries(&mut self, _delay: u8, _attempts: u8) -> Result<(), ()> {
        Ok(())
    }

    fn enable_ack_payload(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn open_writing_pipe(&mut self, _address: PipeAddress) -> Result<(), ()> {
        Ok(())
    }

    fn open_reading_pipe(&mut self, _pipe: u8, address: PipeAddress) -> Result<(), ()> {
        self.0.borrow_mut().rx_address = Some(address);
        Ok(())
    }

    fn close_reading_pipe(&mut self, _pipe: u8) -> Result<(), ()> {
        self.0.borrow_mut().rx_address = None;
        Ok(())
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), ()> {
        self.0.borrow_mut().rx_channel = channel;
        Ok(())
    }

    fn start_listening(&mut self) -> Result<(), ()> {
        self.0.borrow_mut().rx_listening = true;
        Ok(())
    }

    fn stop_listening(&mut self) -> Result<(), ()> {
        self.0.borrow_mut().rx_listening = false;
        Ok(())
    }

    fn write(&mut self, _buf: &[u8]) -> Result<bool, ()> {
        Ok(false)
    }

    fn available(&mut self) -> Result<Option<u8>, ()> {
        Ok(if self.0.borrow().rx_inbox.is_empty() {
            None
        } else {
            Some(1)
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ()> {
        match self.0.borrow_mut().rx_inbox.pop_front() {
            Some(frame) => {
                buf[..frame.len()].copy_from_slice(&frame);
                Ok(frame.len())
            }
            None => Ok(0),
        }
    }

    fn write_ack_payload(&mut self, _pipe: u8, buf: &[u8]) -> Result<(), ()> {
        self.0.borrow_mut().loaded_ack = Some(buf.to_vec());
        Ok(())
    }

    fn flush_tx(&mut self) -> Result<(), ()> {
        self.0.borrow_mut().loaded_ack = None;
        Ok(())
    }

    fn flush_rx(&mut self) -> Result<(), ()> {
        self.0.borrow_mut().rx_inbox.clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct TxHooks {
    pub outgoing: [u16; MSG_VALUES],
    pub acks: Vec<[u16; ACK_VALUES]>,
}

impl TxApplication for TxHooks {
    fn fill_message(&mut self, values: &mut [u16; MSG_VALUES]) {
        *values = self.outgoing;
    }

    fn handle_ack(&mut self, values: &[u16; ACK_VALUES]) {
        self.acks.push(*values);
    }
}

#[derive(Default)]
pub struct RxHooks {
    pub outgoing: [u16; ACK_VALUES],
    pub messages: Vec<[u16; MSG_VALUES]>,
}

impl RxApplication for RxHooks {
    fn handle_message(&mut self, values: &[u16; MSG_VALUES]) {
        self.messages.push(*values);
    }

    fn fill_ack(&mut self, values: &mut [u16; ACK_VALUES]) {
        *values = self.outgoing;
    }
}

/// One transmitter and one receiver over a shared [`Bus`], stepped at the
/// nominal 100 frames per second.
pub struct Harness {
    pub clock: TestClock,
    pub bus: Bus,
    pub tx: Transmitter<TxRadio, TestClock, ScriptedRng, MemSettings>,
    pub rx: Receiver<RxRadio, TestClock, MemSettings>,
    pub tx_store: MemSettings,
    pub rx_store: MemSettings,
    pub tx_app: TxHooks,
    pub rx_app: RxHooks,
}

impl Harness {
    pub fn with_stores(tx_store: MemSettings, rx_store: MemSettings, rng: ScriptedRng) -> Self {
        let clock = TestClock::new();
        let bus = Bus::new();
        let (tx_radio, rx_radio) = bus.endpoints();
        let config = LinkConfig::default();
        let tx = Transmitter::new(tx_radio, clock.clone(), rng, tx_store.clone(), config)
            .expect("transmitter boots");
        let rx = Receiver::new(rx_radio, clock.clone(), rx_store.clone(), config)
            .expect("receiver boots");
        Harness {
            clock,
            bus,
            tx,
            rx,
            tx_store,
            rx_store,
            tx_app: TxHooks::default(),
            rx_app: RxHooks::default(),
        }
    }

    /// Both endpoints booted with the same committed session.
    pub fn paired(session_key: u16) -> Self {
        Harness::with_stores(
            paired_settings(0x0100, 0x0200, session_key),
            paired_settings(0x0100, 0x0200, session_key),
            ScriptedRng::new(&[]),
        )
    }

    /// One frame period: poll, send, poll, advance the clock.
    pub fn step(&mut self) -> TickReport {
        self.rx.poll(&mut self.rx_app).expect("rx poll");
        let report = self.tx.tick(&mut self.tx_app).expect("tx tick");
        self.rx.poll(&mut self.rx_app).expect("rx poll");
        self.clock.advance(TICK_US);
        report
    }

    pub fn run(&mut self, frames: usize) {
        for _ in 0..frames {
            self.step();
        }
    }
}
