//! Node composition.
//!
//! Owns one of everything and steps it all from a single cooperative
//! tick: radio link engine, dispatcher, mesh table, beacon emitter and
//! the host-link endpoint. This is the piece a firmware build wires to
//! its scheduler and interrupt vector.
//
// https://github.com/adrcs/ip400
// Copyright 2025 Alberta Digital Radio Communications Society

use core::sync::atomic::Ordering;

use log::info;

use crate::beacon::{BeaconTask, GpsFix};
use crate::callsign::{Callsign, NodeAddr};
use crate::config::{ConfigError, RadioConfig, StationConfig};
use crate::dispatch::{DispatchSinks, Dispatcher};
use crate::frame::{build_frame, Coding, Frame, FrameStats, SeqCounter};
use crate::hostlink::{Block, Direction, HostLink};
use crate::ip::{ipv4_from_device, vpn_lower_word};
use crate::mesh::{MeshConfig, MeshEntry, MeshTable};
use crate::queue::FrameQueue;
use crate::subg::{LinkEngine, LinkError, SubGRadio, SubGState, TestMode};
use crate::timer::{Timer, WallClock};

/// A complete IP400 node
pub struct Node<R, T> {
    station: StationConfig,
    radio_config: RadioConfig,
    radio: R,
    timer: T,
    local: NodeAddr,
    device_word: u32,

    engine: LinkEngine,
    mesh: MeshTable,
    dispatcher: Dispatcher,
    beacon: BeaconTask,
    hostlink: HostLink,

    radio_tx: FrameQueue,
    chat_rx: FrameQueue,
    seq: SeqCounter,
    gps: Option<GpsFix>,
    tick_ms: u32,
}

impl<R, T> Node<R, T>
where
    R: SubGRadio,
    T: Timer + WallClock,
{
    pub fn new(
        station: StationConfig,
        radio_config: RadioConfig,
        radio: R,
        timer: T,
        device_word: u32,
        tick_ms: u32,
    ) -> Self {
        let local = NodeAddr::new(
            Callsign::from_str(&station.callsign),
            vpn_lower_word(device_word),
        );

        info!(
            "node {} at {:?}",
            station.callsign.as_str(),
            ipv4_from_device(local.call, device_word)
        );

        let mesh = MeshTable::new(MeshConfig {
            ax25_compat: station.ax25_compat(),
            ssid: station.capabilities.ssid,
        });

        Self {
            engine: LinkEngine::new(&radio_config),
            mesh,
            dispatcher: Dispatcher::new(local),
            beacon: BeaconTask::new(station.beacon_interval_min, tick_ms),
            hostlink: HostLink::new(Direction::Node, tick_ms),
            radio_tx: FrameQueue::new(),
            chat_rx: FrameQueue::new(),
            seq: SeqCounter::new(),
            gps: None,
            local,
            device_word,
            station,
            radio_config,
            radio,
            timer,
            tick_ms,
        }
    }

    pub fn local_addr(&self) -> NodeAddr {
        self.local
    }

    /// The node's derived IPv4 address
    pub fn ipv4(&self) -> [u8; 4] {
        ipv4_from_device(self.local.call, self.device_word)
    }

    /// One scheduler tick: engine, dispatch, beacon, table scrub,
    /// host-link liveness.
    pub fn tick(&mut self) -> Result<(), LinkError<R::Error>> {
        let now_ms = self.timer.ticks_ms();
        let tod = self.timer.time_of_day();

        if let Some(rx) = self.engine.step(&mut self.radio, &mut self.radio_tx)? {
            let mut sinks = DispatchSinks {
                radio_tx: &mut self.radio_tx,
                chat: &mut self.chat_rx,
                host: &mut self.hostlink,
            };
            self.dispatcher
                .process(rx, &mut self.mesh, &mut self.seq, now_ms, tod, &mut sinks);
        }

        self.beacon.step(
            &self.station,
            &self.radio_config,
            self.gps.as_ref(),
            tod,
            self.local.vpn,
            &mut self.seq,
            &mut self.radio_tx,
        );

        self.mesh.tick(now_ms);
        self.hostlink.idle_tick();

        Ok(())
    }

    /// Radio interrupt entry point; wire this to the IRQ vector
    pub fn radio_irq(&mut self) -> Result<(), R::Error> {
        self.engine.shared().handle_irq(&mut self.radio)
    }

    /// One completed host-link transfer: feed the peer's block in, get
    /// ours out. Completed host-to-node frames go onto the radio queue.
    pub fn host_exchange(&mut self, inbound: &Block) -> Block {
        let (outbound, received) = self.hostlink.exchange(inbound);
        if let Some(hf) = received {
            if let Some(frame) = hf.into_frame(&self.local, &mut self.seq) {
                self.radio_tx.enque(frame);
            }
        }
        outbound
    }

    // --- frame producers -------------------------------------------------

    /// Queue a chat text frame
    pub fn send_text(&mut self, dest_call: &str, dest_vpn: u16, text: &[u8]) -> bool {
        let frame = build_frame(
            &self.station.callsign,
            self.local.vpn,
            dest_call,
            dest_vpn,
            Coding::Utf8Text,
            text,
            self.station.repeat_default(),
            self.seq.next(),
        );
        self.radio_tx.enque(frame)
    }

    /// Queue an opaque data frame
    pub fn send_data(
        &mut self,
        dest_call: &str,
        dest_vpn: u16,
        coding: Coding,
        payload: &[u8],
        repeat: bool,
    ) -> bool {
        let frame = build_frame(
            &self.station.callsign,
            self.local.vpn,
            dest_call,
            dest_vpn,
            coding,
            payload,
            repeat,
            self.seq.next(),
        );
        self.radio_tx.enque(frame)
    }

    /// Queue an echo request; the answer comes back on the chat queue
    pub fn send_echo_request(&mut self, dest_call: &str, dest_vpn: u16, payload: &[u8]) -> bool {
        let frame = build_frame(
            &self.station.callsign,
            self.local.vpn,
            dest_call,
            dest_vpn,
            Coding::EchoRequest,
            payload,
            self.station.repeat_default(),
            self.seq.next(),
        );
        self.radio_tx.enque(frame)
    }

    /// Next frame for the chat display
    pub fn poll_chat(&mut self) -> Option<Frame> {
        self.chat_rx.deque()
    }

    /// Latest GPS fix for the beacon payload, or None to fall back to the
    /// configured position
    pub fn set_gps_fix(&mut self, fix: Option<GpsFix>) {
        self.gps = fix;
    }

    // --- diagnostic surface ----------------------------------------------

    /// Switch the transmit test mode (off, CW, PRBS)
    pub fn set_test_mode(&mut self, mode: TestMode) {
        self.engine.set_test_mode(mode);
    }

    /// Send a beacon on the next tick
    pub fn force_beacon(&mut self) {
        self.beacon.force();
    }

    pub fn link_state(&self) -> SubGState {
        self.engine.state()
    }

    /// Radio sequencer error detail, for the diagnostic printer
    pub fn radio_status(&mut self) -> Result<crate::frame::RadioErrors, R::Error> {
        self.radio.radio_errors()
    }

    pub fn mesh_entries(&self) -> impl Iterator<Item = &MeshEntry> {
        self.mesh.entries()
    }

    /// Frame statistics snapshot, merging the interrupt-side counters
    /// with the dispatcher's
    pub fn stats(&self) -> FrameStats {
        let shared = self.engine.shared();
        let mut stats = FrameStats::default();
        self.dispatcher.stats_into(&mut stats);

        stats.tx_frames = shared.tx_frames.load(Ordering::Relaxed);
        stats.rx_frames = shared.rx_frames.load(Ordering::Relaxed);
        stats.crc_errors = shared.crc_errors.load(Ordering::Relaxed);
        stats.timeouts = shared.timeouts.load(Ordering::Relaxed);
        stats.last_rssi = shared.last_rssi.load(Ordering::Relaxed);
        stats.dropped += self.engine.decode_drops;
        stats
    }

    pub fn station(&self) -> &StationConfig {
        &self.station
    }

    pub fn radio_config(&self) -> &RadioConfig {
        &self.radio_config
    }

    /// Apply a station update; a rejected update leaves the prior values
    pub fn update_station(&mut self, station: StationConfig) -> Result<(), ConfigError> {
        station.validate()?;

        self.local = NodeAddr::new(
            Callsign::from_str(&station.callsign),
            vpn_lower_word(self.device_word),
        );
        self.dispatcher.set_local(self.local);
        self.beacon
            .set_interval(station.beacon_interval_min, self.tick_ms);
        self.station = station;
        Ok(())
    }

    /// Apply a radio update; a rejected update leaves the prior values
    pub fn update_radio(&mut self, config: RadioConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.engine.configure(&config);
        self.radio_config = config;
        Ok(())
    }

    /// Hardware access for IRQ wiring and simulation harnesses
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::subg::mock::MockRadio;
    use crate::timer::mock::MockTimer;

    fn make_node(call: &str, device: u32) -> Node<MockRadio, MockTimer> {
        let mut station = StationConfig::default();
        station.callsign.clear();
        let _ = station.callsign.push_str(call);
        Node::new(
            station,
            RadioConfig::default(),
            MockRadio::new(),
            MockTimer::new(),
            device,
            10,
        )
    }

    /// Run ticks until the mock radio has transmitted `want` frames,
    /// collecting the raw images
    fn pump_tx(node: &mut Node<MockRadio, MockTimer>, want: usize) -> alloc::vec::Vec<alloc::vec::Vec<u8>> {
        use crate::subg::{IrqStatus, RadioCommand};

        let count_tx = |node: &mut Node<MockRadio, MockTimer>| {
            node.radio_mut()
                .strobes
                .iter()
                .filter(|c| **c == RadioCommand::Tx)
                .count()
        };

        let mut seen = count_tx(node);
        let mut images = alloc::vec::Vec::new();
        for _ in 0..64 {
            node.tick().unwrap();
            let txs = count_tx(node);
            if txs > seen {
                seen = txs;
                // the engine just strobed TX; grab the launched image
                let id = node.radio_mut().last_loaded;
                images.push(node.radio_mut().loaded[id].clone());
                node.radio_mut().irq_pending |= IrqStatus::TX_DONE;
                node.radio_irq().unwrap();
            }
            if images.len() >= want {
                break;
            }
        }
        images
    }

    #[test]
    fn beacon_travels_between_nodes() {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let mut a = make_node("VE6VH", 0x1111_2222);
        let mut b = make_node("VA6AA", 0x3333_4444);

        // node A beacons on its first tick and the engine sends it
        let images = pump_tx(&mut a, 1);
        assert_eq!(images.len(), 1);

        // deliver the raw image to node B's receiver
        b.tick().unwrap(); // arms the engine
        b.radio_mut().inject_rx(0, &images[0], 220);
        b.radio_irq().unwrap();
        // B's own first-tick beacon is already queued; receive first
        b.tick().unwrap();

        let heard: alloc::vec::Vec<_> = b.mesh_entries().collect();
        assert_eq!(heard.len(), 1);
        assert_eq!(heard[0].addr, a.local_addr());

        let stats = b.stats();
        assert_eq!(stats.beacons, 1);
        assert_eq!(stats.rx_frames, 1);
    }

    #[test]
    fn node_addresses_derive_from_device_word() {
        let node = make_node("VE6VH", 0xAABB_CCDD);
        assert_eq!(node.local_addr().vpn, 0xCCDD);
        let ip = node.ipv4();
        assert_eq!(ip[0], 172);
        assert_eq!((ip[2], ip[3]), (0xBB, 0xAA));
    }

    #[test]
    fn rejected_config_keeps_prior_values() {
        let mut node = make_node("VE6VH", 1);

        let mut bad = node.radio_config().clone();
        bad.output_power_dbm = 30;
        assert!(node.update_radio(bad).is_err());
        assert_eq!(node.radio_config().output_power_dbm, 14);

        let mut bad = node.station().clone();
        bad.beacon_interval_min = 0;
        assert!(node.update_station(bad).is_err());
        assert_eq!(node.station().beacon_interval_min, 10);
    }

    /// Tick until the engine is back in receive
    fn settle_rx(node: &mut Node<MockRadio, MockTimer>) {
        for _ in 0..8 {
            if node.link_state() == SubGState::RxActive {
                return;
            }
            node.tick().unwrap();
        }
        panic!("engine did not return to receive");
    }

    #[test]
    fn chat_text_round_trip() {
        let mut a = make_node("VE6VH", 0x1111_2222);
        let mut b = make_node("VA6AA", 0x3333_4444);

        // get the first-tick beacons out of the way
        pump_tx(&mut a, 1);
        pump_tx(&mut b, 1);
        settle_rx(&mut b);

        a.send_text("VA6AA", b.local_addr().vpn, b"hello mesh");
        let images = pump_tx(&mut a, 1);

        b.radio_mut().inject_rx(1, images.last().unwrap(), 200);
        b.radio_irq().unwrap();
        b.tick().unwrap();

        let chat = b.poll_chat().unwrap();
        assert_eq!(chat.payload, b"hello mesh");
        assert_eq!(chat.source, a.local_addr());
    }

    #[test]
    fn host_frames_reach_the_radio_queue() {
        use crate::hostlink::{BlockAddressing, BlockStatus};

        let mut node = make_node("VE6VH", 1);
        pump_tx(&mut node, 1); // beacon out of the way

        // host pushes a single-block data frame
        let mut block = Block::empty(Direction::Host);
        block.set_status(BlockStatus::Single);
        block.set_length(5);
        block.set_addressing(&BlockAddressing {
            from_call: [0; 4],
            from_ip: [0; 2],
            to_call: Callsign::from_str("VA6AA ").0.to_le_bytes(),
            to_ip: [2, 0],
            coding: Coding::Data as u8,
            hop_count: 0,
            flags: 0,
        });
        block.body_mut()[..5].copy_from_slice(b"abcde");

        node.host_exchange(&block);

        let images = pump_tx(&mut node, 1);
        let frame = Frame::decode(images.last().unwrap()).unwrap();
        assert_eq!(frame.payload, b"abcde");
        assert_eq!(frame.source, node.local_addr());
    }
}
