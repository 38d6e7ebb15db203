//! Sub-GHz radio link engine.
//!
//! One radio, shared between receive and transmit. The engine drives it
//! through a pair of raw DMA buffers: both armed while receiving, refilled
//! alternately from the transmit queue while sending. The interrupt
//! callback only touches word-sized shared cells and re-arms the receiver;
//! every other transition happens in the cooperative step.
//
// https://github.com/adrcs/ip400
// Copyright 2025 Alberta Digital Radio Communications Society

use core::fmt::Debug;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use log::{debug, trace, warn};
use strum::Display;

use crate::config::{Modulation, RadioConfig};
use crate::frame::{Frame, FrameError, RadioErrors, MAX_FRAME_SIZE};
use crate::queue::FrameQueue;

/// PRBS polynomial length (X7 + X6 + 1)
pub const PRBS_LEN: usize = 127;

/// Sequence repetitions per test buffer
pub const PRBS_REPETITION: usize = 8;

/// Test buffer size
pub const PRBS_FRAME_SIZE: usize = PRBS_LEN * PRBS_REPETITION;

/// Radio command strobes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioCommand {
    Nop,
    Tx,
    Rx,
    LockRx,
    LockTx,
    Sabort,
}

impl RadioCommand {
    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => RadioCommand::Tx,
            2 => RadioCommand::Rx,
            3 => RadioCommand::LockRx,
            4 => RadioCommand::LockTx,
            5 => RadioCommand::Sabort,
            _ => RadioCommand::Nop,
        }
    }
}

/// Radio sequencer FSM states, in hardware order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FsmState {
    Idle = 0,
    EnaRfReg,
    WaitActive2,
    Active2,
    EnaCurr,
    SynthSetup,
    CalibVco,
    LockRxTx,
    LockOnTx,
    EnPa,
    Tx,
    PaDwnAna,
    EndTx,
    LockOnRx,
    EnRx,
    EnLna,
    Rx,
    EndRx,
    SynthPwdn,
}

bitflags::bitflags! {
    /// Interrupt status register bits
    pub struct IrqStatus: u32 {
        const RX_OK            = 0x0001;
        const TX_DONE          = 0x0002;
        const RX_CRC_ERROR     = 0x0004;
        const RX_TIMEOUT       = 0x0008;
        const SABORT_DONE      = 0x0010;
        const COMMAND_REJECTED = 0x0020;
        const DATABUFFER0_USED = 0x0040;
        const DATABUFFER1_USED = 0x0080;
    }
}

/// Transmit data path selection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxMode {
    Normal,
    /// Raw buffer replay, used by the PRBS test source
    DirectBuffers,
}

/// Transmit test modes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TestMode {
    Off,
    Cw,
    Prbs,
}

/// Link engine states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubGState {
    Idle,
    RxActive,
    RxAborting,
    TxReady,
    TxSending,
    TxTestSetup,
    TxTest,
    TxDone,
}

/// Raw buffer states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    Ready = 0,
    Active,
    Full,
    Empty,
}

impl BufferState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => BufferState::Active,
            2 => BufferState::Full,
            3 => BufferState::Empty,
            _ => BufferState::Ready,
        }
    }
}

/// The hardware seam: command strobes, status registers and buffer DMA
pub trait SubGRadio {
    type Error: Debug;

    fn strobe(&mut self, cmd: RadioCommand) -> Result<(), Self::Error>;
    fn irq_status(&mut self) -> Result<IrqStatus, Self::Error>;
    fn clear_irq(&mut self, flags: IrqStatus) -> Result<(), Self::Error>;
    fn fsm_state(&mut self) -> Result<FsmState, Self::Error>;
    /// Sequencer error detail register
    fn radio_errors(&mut self) -> Result<RadioErrors, Self::Error>;

    fn set_rssi_threshold(&mut self, dbm: i16) -> Result<(), Self::Error>;
    fn set_modulation(&mut self, modulation: Modulation) -> Result<(), Self::Error>;
    fn set_rx_mode(&mut self, buffer_size: usize) -> Result<(), Self::Error>;
    fn set_tx_mode(&mut self, mode: TxMode, payload_len: usize) -> Result<(), Self::Error>;

    /// Hand a buffer image to the radio DMA
    fn load_buffer(&mut self, id: usize, data: &[u8]) -> Result<(), Self::Error>;
    /// Pull a received image out of the radio DMA
    fn read_buffer(&mut self, id: usize, buf: &mut [u8]) -> Result<usize, Self::Error>;
    /// RSSI register captured on sync
    fn rssi_raw(&mut self) -> Result<u32, Self::Error>;
    /// Received length for the last RX_OK
    fn rx_length(&mut self) -> Result<usize, Self::Error>;
}

/// Transmit and receive indicators; LED drivers implement this
pub trait Indicators {
    fn rx_active(&mut self, _on: bool) {}
    fn tx_active(&mut self, _on: bool) {}
}

impl Indicators for () {}

/// State shared with the interrupt callback. Everything here is a plain
/// word-sized atomic so the cooperative stepper sees consistent values
/// without locks.
pub struct LinkShared {
    buf_state: [AtomicU8; 2],
    buf_len: [AtomicU32; 2],
    active_tx: AtomicU8,
    cmd: AtomicU8,
    pub last_rssi: AtomicU32,
    pub tx_frames: AtomicU32,
    pub rx_frames: AtomicU32,
    pub crc_errors: AtomicU32,
    pub timeouts: AtomicU32,
}

impl LinkShared {
    const fn new() -> Self {
        Self {
            buf_state: [AtomicU8::new(0), AtomicU8::new(0)],
            buf_len: [AtomicU32::new(0), AtomicU32::new(0)],
            active_tx: AtomicU8::new(0),
            cmd: AtomicU8::new(0),
            last_rssi: AtomicU32::new(0),
            tx_frames: AtomicU32::new(0),
            rx_frames: AtomicU32::new(0),
            crc_errors: AtomicU32::new(0),
            timeouts: AtomicU32::new(0),
        }
    }

    pub fn buffer_state(&self, id: usize) -> BufferState {
        BufferState::from_u8(self.buf_state[id].load(Ordering::Relaxed))
    }

    fn set_buffer(&self, id: usize, state: BufferState) {
        self.buf_state[id].store(state as u8, Ordering::Relaxed);
    }

    fn command(&self) -> RadioCommand {
        RadioCommand::from_u8(self.cmd.load(Ordering::Relaxed))
    }

    fn set_command(&self, cmd: RadioCommand) {
        self.cmd.store(cmd.to_u8(), Ordering::Relaxed);
    }

    /// Interrupt callback body. Classifies the status register, maintains
    /// buffer states and counters, and re-arms the receiver while the
    /// command register still says receive. Runs in interrupt context.
    pub fn handle_irq<R: SubGRadio>(&self, radio: &mut R) -> Result<(), R::Error> {
        let status = radio.irq_status()?;

        // errors leave the buffer in its current state for re-use
        if status.intersects(IrqStatus::RX_CRC_ERROR | IrqStatus::RX_TIMEOUT) {
            if status.contains(IrqStatus::RX_CRC_ERROR) {
                radio.clear_irq(IrqStatus::RX_CRC_ERROR)?;
                self.crc_errors.fetch_add(1, Ordering::Relaxed);
            }
            if status.contains(IrqStatus::RX_TIMEOUT) {
                radio.clear_irq(IrqStatus::RX_TIMEOUT)?;
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            if self.command() == RadioCommand::Rx {
                radio.strobe(RadioCommand::Rx)?;
            }
            return Ok(());
        }

        if status.contains(IrqStatus::RX_OK) {
            self.rx_frames.fetch_add(1, Ordering::Relaxed);
            self.last_rssi.store(radio.rssi_raw()?, Ordering::Relaxed);
            radio.clear_irq(IrqStatus::RX_OK)?;

            let len = radio.rx_length()? as u32;
            if status.contains(IrqStatus::DATABUFFER0_USED) {
                self.set_buffer(0, BufferState::Full);
                self.buf_len[0].store(len, Ordering::Relaxed);
            }
            if status.contains(IrqStatus::DATABUFFER1_USED) {
                self.set_buffer(1, BufferState::Full);
                self.buf_len[1].store(len, Ordering::Relaxed);
            }
            if self.command() == RadioCommand::Rx {
                radio.strobe(RadioCommand::Rx)?;
            }
        } else if status.contains(IrqStatus::TX_DONE) {
            radio.clear_irq(IrqStatus::TX_DONE)?;
            let active = self.active_tx.load(Ordering::Relaxed) as usize;
            self.set_buffer(active, BufferState::Empty);
            self.tx_frames.fetch_add(1, Ordering::Relaxed);
        }

        Ok(())
    }
}

/// Link engine errors
#[derive(Debug, Clone, PartialEq)]
pub enum LinkError<E> {
    Radio(E),
    Encode(FrameError),
}

/// A frame lifted out of a raw receive buffer
#[derive(Debug, Clone, PartialEq)]
pub struct RxFrame {
    pub frame: Frame,
    pub raw_len: usize,
    pub rssi_raw: u32,
}

/// The link engine proper: owns the two raw buffers and the command
/// register, and walks the radio between receive, transmit and the
/// diagnostic test modes.
pub struct LinkEngine<L = ()> {
    state: SubGState,
    test_mode: TestMode,
    abort_done: bool,
    tx_in_flight: bool,
    modulation: Modulation,
    rx_squelch: i16,
    shared: LinkShared,
    bufs: [[u8; MAX_FRAME_SIZE]; 2],
    buf_fill: [usize; 2],
    /// Frames dropped before dispatch (malformed raw buffers)
    pub decode_drops: u32,
    leds: L,
}

impl LinkEngine<()> {
    pub fn new(config: &RadioConfig) -> Self {
        Self::with_indicators(config, ())
    }
}

impl<L: Indicators> LinkEngine<L> {
    pub fn with_indicators(config: &RadioConfig, leds: L) -> Self {
        Self {
            state: SubGState::Idle,
            test_mode: TestMode::Off,
            abort_done: false,
            tx_in_flight: false,
            modulation: config.modulation,
            rx_squelch: config.rx_squelch_dbm,
            shared: LinkShared::new(),
            bufs: [[0u8; MAX_FRAME_SIZE]; 2],
            buf_fill: [0; 2],
            decode_drops: 0,
            leds,
        }
    }

    pub fn state(&self) -> SubGState {
        self.state
    }

    pub fn test_mode(&self) -> TestMode {
        self.test_mode
    }

    /// Select a diagnostic transmit mode; the engine aborts receive and
    /// holds the carrier until the mode is cleared
    pub fn set_test_mode(&mut self, mode: TestMode) {
        self.test_mode = mode;
    }

    /// Interrupt-visible state, for wiring the IRQ callback
    pub fn shared(&self) -> &LinkShared {
        &self.shared
    }

    /// Re-apply radio parameters after a configuration update
    pub fn configure(&mut self, config: &RadioConfig) {
        self.modulation = config.modulation;
        self.rx_squelch = config.rx_squelch_dbm;
    }

    fn find_buffer(&self, state: BufferState) -> Option<usize> {
        (0..2).find(|&i| self.shared.buffer_state(i) == state)
    }

    /// Serialise the next queued frame into raw buffer `id`
    fn fill_buffer<E: Debug>(
        &mut self,
        id: usize,
        queue: &mut FrameQueue,
    ) -> Result<bool, LinkError<E>> {
        let frame = match queue.deque() {
            Some(f) => f,
            None => return Ok(false),
        };

        match frame.encode(&mut self.bufs[id]) {
            Ok(n) => {
                self.buf_fill[id] = n;
                self.shared.set_buffer(id, BufferState::Full);
                Ok(true)
            }
            Err(e) => {
                warn!("dropping unencodable frame: {:?}", e);
                self.decode_drops += 1;
                Ok(false)
            }
        }
    }

    /// Spin on the status register until the abort resolves. Both
    /// terminal bits are cleared on exit.
    fn wait_abort<R: SubGRadio>(&mut self, radio: &mut R) -> Result<(), LinkError<R::Error>> {
        loop {
            let status = radio.irq_status().map_err(LinkError::Radio)?;
            if status.contains(IrqStatus::SABORT_DONE) {
                radio
                    .clear_irq(IrqStatus::SABORT_DONE)
                    .map_err(LinkError::Radio)?;
                break;
            }
            if status.contains(IrqStatus::COMMAND_REJECTED) {
                radio
                    .clear_irq(IrqStatus::COMMAND_REJECTED)
                    .map_err(LinkError::Radio)?;
                break;
            }
        }
        Ok(())
    }

    /// One cooperative step. Returns a reassembled frame when a receive
    /// buffer was full.
    pub fn step<R: SubGRadio>(
        &mut self,
        radio: &mut R,
        tx_queue: &mut FrameQueue,
    ) -> Result<Option<RxFrame>, LinkError<R::Error>> {
        match self.state {
            // idle: enable the receiver
            SubGState::Idle => {
                if self.shared.command() == RadioCommand::Sabort {
                    self.shared.set_command(RadioCommand::Nop);
                }

                let fsm = radio.fsm_state().map_err(LinkError::Radio)?;
                if fsm != FsmState::Idle && self.shared.command() == RadioCommand::Nop {
                    return Ok(None);
                }

                radio
                    .set_rssi_threshold(self.rx_squelch)
                    .map_err(LinkError::Radio)?;

                self.shared.set_buffer(0, BufferState::Active);
                self.shared.set_buffer(1, BufferState::Active);
                radio
                    .set_rx_mode(MAX_FRAME_SIZE)
                    .map_err(LinkError::Radio)?;

                self.shared.set_command(RadioCommand::Rx);
                radio.strobe(RadioCommand::Rx).map_err(LinkError::Radio)?;

                self.leds.rx_active(true);
                self.state = SubGState::RxActive;
            }

            SubGState::RxActive => {
                if let Some(id) = self.find_buffer(BufferState::Full) {
                    let raw_len = self.shared.buf_len[id].load(Ordering::Relaxed) as usize;
                    let n = {
                        let buf = &mut self.bufs[id];
                        radio
                            .read_buffer(id, &mut buf[..raw_len.min(MAX_FRAME_SIZE)])
                            .map_err(LinkError::Radio)?
                    };

                    let result = Frame::decode(&self.bufs[id][..n]);
                    self.shared.set_buffer(id, BufferState::Active);

                    match result {
                        Ok(frame) => {
                            let rssi_raw = self.shared.last_rssi.load(Ordering::Relaxed);
                            trace!("rx frame seq {} ({} raw bytes)", frame.seq, n);
                            return Ok(Some(RxFrame {
                                frame,
                                raw_len: n,
                                rssi_raw,
                            }));
                        }
                        Err(e) => {
                            warn!("malformed rx frame: {:?}", e);
                            self.decode_drops += 1;
                        }
                    }
                } else if tx_queue.has_data() || self.test_mode != TestMode::Off {
                    // receiver must give up the radio
                    self.shared.set_command(RadioCommand::Sabort);
                    radio
                        .strobe(RadioCommand::Sabort)
                        .map_err(LinkError::Radio)?;
                    self.abort_done = false;
                    self.state = SubGState::RxAborting;
                }
            }

            SubGState::RxAborting => {
                if self.shared.command() == RadioCommand::Sabort {
                    self.shared.set_command(RadioCommand::Nop);
                }

                if !self.abort_done {
                    self.wait_abort(radio)?;
                    self.abort_done = true;

                    self.shared.set_buffer(0, BufferState::Empty);
                    self.shared.set_buffer(1, BufferState::Empty);
                    self.leds.rx_active(false);
                }

                if radio.fsm_state().map_err(LinkError::Radio)? != FsmState::Idle {
                    return Ok(None);
                }

                if self.test_mode != TestMode::Off {
                    if self.test_mode == TestMode::Prbs {
                        gen_prbs(&mut self.bufs[0][..PRBS_FRAME_SIZE]);
                        gen_prbs(&mut self.bufs[1][..PRBS_FRAME_SIZE]);
                        radio
                            .load_buffer(0, &self.bufs[0][..PRBS_FRAME_SIZE])
                            .map_err(LinkError::Radio)?;
                        radio
                            .load_buffer(1, &self.bufs[1][..PRBS_FRAME_SIZE])
                            .map_err(LinkError::Radio)?;
                    }
                    radio
                        .set_tx_mode(TxMode::DirectBuffers, 0)
                        .map_err(LinkError::Radio)?;
                    radio
                        .strobe(RadioCommand::LockTx)
                        .map_err(LinkError::Radio)?;
                    self.state = SubGState::TxTestSetup;
                } else {
                    self.state = SubGState::TxReady;
                }
            }

            // ready to start the tx: try to fill both buffers
            SubGState::TxReady => {
                self.fill_buffer::<R::Error>(0, tx_queue)?;
                self.fill_buffer::<R::Error>(1, tx_queue)?;

                let first = match self.find_buffer(BufferState::Full) {
                    Some(id) => id,
                    None => {
                        // queue drained before we got here
                        self.state = SubGState::TxDone;
                        return Ok(None);
                    }
                };

                radio
                    .set_modulation(self.modulation)
                    .map_err(LinkError::Radio)?;
                radio
                    .set_tx_mode(TxMode::Normal, MAX_FRAME_SIZE)
                    .map_err(LinkError::Radio)?;

                self.shared.active_tx.store(first as u8, Ordering::Relaxed);
                radio
                    .load_buffer(first, &self.bufs[first][..self.buf_fill[first]])
                    .map_err(LinkError::Radio)?;

                self.shared.set_command(RadioCommand::Tx);
                radio.strobe(RadioCommand::Tx).map_err(LinkError::Radio)?;
                self.tx_in_flight = true;

                self.leds.tx_active(true);
                self.state = SubGState::TxSending;
            }

            SubGState::TxSending => {
                let active = self.shared.active_tx.load(Ordering::Relaxed) as usize;

                // the active buffer went empty: that transmission finished
                if self.tx_in_flight && self.shared.buffer_state(active) == BufferState::Empty {
                    self.tx_in_flight = false;
                }

                // launch the next waiting buffer
                if !self.tx_in_flight {
                    if let Some(next) = self.find_buffer(BufferState::Full) {
                        self.shared.active_tx.store(next as u8, Ordering::Relaxed);
                        radio
                            .load_buffer(next, &self.bufs[next][..self.buf_fill[next]])
                            .map_err(LinkError::Radio)?;
                        radio.strobe(RadioCommand::Tx).map_err(LinkError::Radio)?;
                        self.tx_in_flight = true;
                    }
                }

                // keep the pipeline fed
                if let Some(id) = self.find_buffer(BufferState::Empty) {
                    self.fill_buffer::<R::Error>(id, tx_queue)?;
                }

                // nothing sending, nothing waiting, nothing queued
                if !self.tx_in_flight
                    && self.find_buffer(BufferState::Full).is_none()
                    && !tx_queue.has_data()
                {
                    self.state = SubGState::TxDone;
                }
            }

            SubGState::TxTestSetup => {
                let fsm = radio.fsm_state().map_err(LinkError::Radio)?;
                if fsm < FsmState::LockOnTx {
                    return Ok(None);
                }

                if self.test_mode == TestMode::Cw {
                    radio
                        .set_modulation(Modulation::Cw)
                        .map_err(LinkError::Radio)?;
                }

                // wait until ready to transmit
                if fsm == FsmState::LockOnTx {
                    self.shared.set_command(RadioCommand::Tx);
                    radio.strobe(RadioCommand::Tx).map_err(LinkError::Radio)?;
                    self.leds.tx_active(true);
                    self.state = SubGState::TxTest;
                }
            }

            // hold until the mode is cleared
            SubGState::TxTest => {
                if self.test_mode == TestMode::Off {
                    self.state = SubGState::TxDone;
                }
            }

            // all transmit paths exit here
            SubGState::TxDone => {
                self.tx_in_flight = false;
                self.shared.set_command(RadioCommand::Sabort);
                radio
                    .strobe(RadioCommand::Sabort)
                    .map_err(LinkError::Radio)?;
                self.leds.tx_active(false);
                debug!("tx complete");
                self.state = SubGState::Idle;
            }
        }

        Ok(None)
    }
}

/// Generate the X7 + X6 + 1 PRBS byte stream
pub fn gen_prbs(buffer: &mut [u8]) {
    let mut val: u8 = 0x02;
    for slot in buffer.iter_mut() {
        let nxt = ((val >> 6) ^ (val >> 5)) & 1;
        val = ((val << 1) | nxt) & 0x7F;
        *slot = val;
    }
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    //! Scripted radio for exercising the engine without hardware.

    use super::*;
    use alloc::vec::Vec;

    pub struct MockRadio {
        pub strobes: Vec<RadioCommand>,
        pub irq_pending: IrqStatus,
        pub fsm: FsmState,
        pub loaded: [Vec<u8>; 2],
        pub last_loaded: usize,
        pub rx_data: [Vec<u8>; 2],
        pub rssi: u32,
        pub rx_len: usize,
        pub modulation: Option<Modulation>,
        pub tx_mode: Option<TxMode>,
        pub rssi_threshold: Option<i16>,
        pub errors: RadioErrors,
    }

    impl MockRadio {
        pub fn new() -> Self {
            Self {
                strobes: Vec::new(),
                irq_pending: IrqStatus::empty(),
                fsm: FsmState::Idle,
                loaded: [Vec::new(), Vec::new()],
                last_loaded: 0,
                rx_data: [Vec::new(), Vec::new()],
                rssi: 0,
                rx_len: 0,
                modulation: None,
                tx_mode: None,
                rssi_threshold: None,
                errors: RadioErrors::empty(),
            }
        }

        /// Stage a received raw image in a buffer and raise the matching IRQ
        pub fn inject_rx(&mut self, id: usize, data: &[u8], rssi: u32) {
            self.rx_data[id] = data.to_vec();
            self.rx_len = data.len();
            self.rssi = rssi;
            self.irq_pending |= IrqStatus::RX_OK
                | if id == 0 {
                    IrqStatus::DATABUFFER0_USED
                } else {
                    IrqStatus::DATABUFFER1_USED
                };
        }
    }

    impl SubGRadio for MockRadio {
        type Error = ();

        fn strobe(&mut self, cmd: RadioCommand) -> Result<(), ()> {
            self.strobes.push(cmd);
            match cmd {
                RadioCommand::Sabort => {
                    // abort resolves immediately
                    self.irq_pending |= IrqStatus::SABORT_DONE;
                    self.fsm = FsmState::Idle;
                }
                RadioCommand::Rx => self.fsm = FsmState::Rx,
                RadioCommand::Tx => self.fsm = FsmState::Tx,
                RadioCommand::LockTx => self.fsm = FsmState::LockOnTx,
                _ => (),
            }
            Ok(())
        }

        fn irq_status(&mut self) -> Result<IrqStatus, ()> {
            Ok(self.irq_pending)
        }

        fn clear_irq(&mut self, flags: IrqStatus) -> Result<(), ()> {
            self.irq_pending.remove(flags);
            Ok(())
        }

        fn fsm_state(&mut self) -> Result<FsmState, ()> {
            Ok(self.fsm)
        }

        fn radio_errors(&mut self) -> Result<RadioErrors, ()> {
            Ok(self.errors)
        }

        fn set_rssi_threshold(&mut self, dbm: i16) -> Result<(), ()> {
            self.rssi_threshold = Some(dbm);
            Ok(())
        }

        fn set_modulation(&mut self, modulation: Modulation) -> Result<(), ()> {
            self.modulation = Some(modulation);
            Ok(())
        }

        fn set_rx_mode(&mut self, _buffer_size: usize) -> Result<(), ()> {
            Ok(())
        }

        fn set_tx_mode(&mut self, mode: TxMode, _payload_len: usize) -> Result<(), ()> {
            self.tx_mode = Some(mode);
            Ok(())
        }

        fn load_buffer(&mut self, id: usize, data: &[u8]) -> Result<(), ()> {
            self.loaded[id] = data.to_vec();
            self.last_loaded = id;
            Ok(())
        }

        fn read_buffer(&mut self, id: usize, buf: &mut [u8]) -> Result<usize, ()> {
            let n = self.rx_data[id].len().min(buf.len());
            buf[..n].copy_from_slice(&self.rx_data[id][..n]);
            Ok(n)
        }

        fn rssi_raw(&mut self) -> Result<u32, ()> {
            Ok(self.rssi)
        }

        fn rx_length(&mut self) -> Result<usize, ()> {
            Ok(self.rx_len)
        }
    }
}

#[cfg(test)]
mod test {
    use super::mock::MockRadio;
    use super::*;
    use crate::callsign::{Callsign, NodeAddr};
    use crate::frame::Coding;

    fn engine() -> LinkEngine<()> {
        LinkEngine::new(&RadioConfig::default())
    }

    fn test_frame(seq: u32) -> Frame {
        let mut f = Frame::new(
            NodeAddr::new(Callsign::from_str("VE6VH "), 1),
            NodeAddr::BROADCAST,
            Coding::Data,
            seq,
        );
        f.payload = alloc::vec![0x55u8; 64];
        f
    }

    #[test]
    fn idle_arms_receiver() {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let mut radio = MockRadio::new();
        let mut queue = FrameQueue::new();
        let mut engine = engine();

        engine.step(&mut radio, &mut queue).unwrap();

        assert_eq!(engine.state(), SubGState::RxActive);
        assert_eq!(radio.strobes.last(), Some(&RadioCommand::Rx));
        assert_eq!(engine.shared().buffer_state(0), BufferState::Active);
        assert_eq!(engine.shared().buffer_state(1), BufferState::Active);
        assert_eq!(radio.rssi_threshold, Some(-95));
    }

    #[test]
    fn receive_delivers_frame() {
        let mut radio = MockRadio::new();
        let mut queue = FrameQueue::new();
        let mut engine = engine();

        engine.step(&mut radio, &mut queue).unwrap();

        // a frame lands in buffer 1
        let frame = test_frame(9);
        let mut raw = [0u8; MAX_FRAME_SIZE];
        let n = frame.encode(&mut raw).unwrap();
        radio.inject_rx(1, &raw[..n], 210);

        engine.shared().handle_irq(&mut radio).unwrap();
        assert_eq!(engine.shared().buffer_state(1), BufferState::Full);
        assert_eq!(engine.shared().rx_frames.load(Ordering::Relaxed), 1);

        let rx = engine.step(&mut radio, &mut queue).unwrap().unwrap();
        assert_eq!(rx.frame, frame);
        assert_eq!(rx.rssi_raw, 210);
        // buffer returns to the receive pool
        assert_eq!(engine.shared().buffer_state(1), BufferState::Active);
    }

    #[test]
    fn rx_errors_count_and_rearm() {
        let mut radio = MockRadio::new();
        let mut queue = FrameQueue::new();
        let mut engine = engine();

        engine.step(&mut radio, &mut queue).unwrap();
        let strobes = radio.strobes.len();

        radio.irq_pending |= IrqStatus::RX_CRC_ERROR;
        engine.shared().handle_irq(&mut radio).unwrap();
        assert_eq!(engine.shared().crc_errors.load(Ordering::Relaxed), 1);
        // receiver restarted
        assert_eq!(radio.strobes.len(), strobes + 1);
        assert_eq!(radio.strobes.last(), Some(&RadioCommand::Rx));

        radio.irq_pending |= IrqStatus::RX_TIMEOUT;
        engine.shared().handle_irq(&mut radio).unwrap();
        assert_eq!(engine.shared().timeouts.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn transmit_flow() {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let mut radio = MockRadio::new();
        let mut queue = FrameQueue::new();
        let mut engine = engine();

        engine.step(&mut radio, &mut queue).unwrap();

        // two frames arrive while receiving
        queue.enque(test_frame(1));
        queue.enque(test_frame(2));

        engine.step(&mut radio, &mut queue).unwrap();
        assert_eq!(engine.state(), SubGState::RxAborting);
        assert!(radio.strobes.contains(&RadioCommand::Sabort));

        engine.step(&mut radio, &mut queue).unwrap();
        assert_eq!(engine.state(), SubGState::TxReady);
        // abort terminals consumed
        assert!(!radio.irq_pending.contains(IrqStatus::SABORT_DONE));

        engine.step(&mut radio, &mut queue).unwrap();
        assert_eq!(engine.state(), SubGState::TxSending);
        assert_eq!(engine.shared().buffer_state(0), BufferState::Full);
        assert_eq!(engine.shared().buffer_state(1), BufferState::Full);
        assert_eq!(radio.strobes.last(), Some(&RadioCommand::Tx));
        let first_image = radio.loaded[0].clone();
        assert_eq!(Frame::decode(&first_image).unwrap().seq, 1);

        // first buffer done; engine launches the second
        radio.irq_pending |= IrqStatus::TX_DONE;
        engine.shared().handle_irq(&mut radio).unwrap();
        assert_eq!(engine.shared().buffer_state(0), BufferState::Empty);
        assert_eq!(engine.shared().tx_frames.load(Ordering::Relaxed), 1);

        engine.step(&mut radio, &mut queue).unwrap();
        assert_eq!(Frame::decode(&radio.loaded[1]).unwrap().seq, 2);

        // second buffer done; queue empty, so the engine winds down
        radio.irq_pending |= IrqStatus::TX_DONE;
        engine.shared().handle_irq(&mut radio).unwrap();
        engine.step(&mut radio, &mut queue).unwrap();
        assert_eq!(engine.state(), SubGState::TxDone);

        engine.step(&mut radio, &mut queue).unwrap();
        assert_eq!(engine.state(), SubGState::Idle);
        assert_eq!(radio.strobes.last(), Some(&RadioCommand::Sabort));

        // and re-arms the receiver on the next pass
        engine.step(&mut radio, &mut queue).unwrap();
        assert_eq!(engine.state(), SubGState::RxActive);
    }

    #[test]
    fn cw_test_mode() {
        let mut radio = MockRadio::new();
        let mut queue = FrameQueue::new();
        let mut engine = engine();

        engine.step(&mut radio, &mut queue).unwrap();
        engine.set_test_mode(TestMode::Cw);

        engine.step(&mut radio, &mut queue).unwrap();
        assert_eq!(engine.state(), SubGState::RxAborting);

        engine.step(&mut radio, &mut queue).unwrap();
        assert_eq!(engine.state(), SubGState::TxTestSetup);
        assert_eq!(radio.tx_mode, Some(TxMode::DirectBuffers));
        assert_eq!(radio.strobes.last(), Some(&RadioCommand::LockTx));

        // mock jumps straight to LOCKONTX, so the strobe fires
        engine.step(&mut radio, &mut queue).unwrap();
        assert_eq!(engine.state(), SubGState::TxTest);
        assert_eq!(radio.modulation, Some(Modulation::Cw));
        assert_eq!(radio.strobes.last(), Some(&RadioCommand::Tx));

        // holds until cleared
        engine.step(&mut radio, &mut queue).unwrap();
        assert_eq!(engine.state(), SubGState::TxTest);

        engine.set_test_mode(TestMode::Off);
        engine.step(&mut radio, &mut queue).unwrap();
        assert_eq!(engine.state(), SubGState::TxDone);
    }

    #[test]
    fn prbs_test_mode_fills_buffers() {
        let mut radio = MockRadio::new();
        let mut queue = FrameQueue::new();
        let mut engine = engine();

        engine.step(&mut radio, &mut queue).unwrap();
        engine.set_test_mode(TestMode::Prbs);
        engine.step(&mut radio, &mut queue).unwrap();
        engine.step(&mut radio, &mut queue).unwrap();

        assert_eq!(engine.state(), SubGState::TxTestSetup);
        assert_eq!(radio.loaded[0].len(), PRBS_FRAME_SIZE);
        assert_eq!(radio.loaded[0], radio.loaded[1]);
    }

    #[test]
    fn prbs_sequence() {
        let mut buf = [0u8; PRBS_FRAME_SIZE];
        gen_prbs(&mut buf);

        // seed 0x02 shifts left until the X7+X6 taps fire
        assert_eq!(&buf[..6], &[0x04, 0x08, 0x10, 0x20, 0x40, 0x01]);
        assert_eq!(buf.len(), 127 * 8);
    }

    #[test]
    fn malformed_rx_counted() {
        let mut radio = MockRadio::new();
        let mut queue = FrameQueue::new();
        let mut engine = engine();

        engine.step(&mut radio, &mut queue).unwrap();

        radio.inject_rx(0, &[0u8; 4], 100);
        engine.shared().handle_irq(&mut radio).unwrap();

        let rx = engine.step(&mut radio, &mut queue).unwrap();
        assert!(rx.is_none());
        assert_eq!(engine.decode_drops, 1);
        assert_eq!(engine.shared().buffer_state(0), BufferState::Active);
    }
}
