//! Inbound frame dispatcher.
//!
//! Every reassembled receive frame lands here: self-originated copies are
//! dropped, duplicates are suppressed through the mesh table, and the rest
//! route by coding. Accepted frames with the repeat flag flood onward with
//! the local address appended to the hop table.
//
// https://github.com/adrcs/ip400
// Copyright 2025 Alberta Digital Radio Communications Society

use alloc::vec::Vec;

use log::{debug, error, trace};

use crate::callsign::NodeAddr;
use crate::frame::{Coding, Frame, FrameStats, MAX_HOP_COUNT};
use crate::hostlink::HostLink;
use crate::mesh::{Accept, MeshTable};
use crate::queue::FrameQueue;
use crate::subg::RxFrame;
use crate::timer::TimeOfDay;

/// True when we originated the frame: our address is the source, or it
/// already appears in the hop table. Both address halves are compared.
pub fn frame_is_mine(frame: &Frame, local: &NodeAddr) -> bool {
    if frame.source == *local {
        return true;
    }
    if !frame.flags.hoptable() {
        return false;
    }
    frame.hop_table.iter().any(|hop| hop == local)
}

/// Where accepted frames go
pub struct DispatchSinks<'a> {
    pub radio_tx: &'a mut FrameQueue,
    pub chat: &'a mut FrameQueue,
    pub host: &'a mut HostLink,
}

/// Classifies inbound frames and applies the repeat policy
pub struct Dispatcher {
    local: NodeAddr,
    pub frames_ok: u32,
    pub dropped: u32,
    pub duplicates: u32,
    pub beacons: u32,
    pub repeated: u32,
    pub echoes: u32,
}

impl Dispatcher {
    pub fn new(local: NodeAddr) -> Self {
        Self {
            local,
            frames_ok: 0,
            dropped: 0,
            duplicates: 0,
            beacons: 0,
            repeated: 0,
            echoes: 0,
        }
    }

    pub fn local(&self) -> NodeAddr {
        self.local
    }

    pub fn set_local(&mut self, local: NodeAddr) {
        self.local = local;
    }

    /// Fold our counters into a stats snapshot
    pub fn stats_into(&self, stats: &mut FrameStats) {
        stats.frames_ok = self.frames_ok;
        stats.dropped = self.dropped;
        stats.duplicates = self.duplicates;
        stats.beacons = self.beacons;
        stats.repeated = self.repeated;
    }

    /// Handle one received frame
    pub fn process(
        &mut self,
        rx: RxFrame,
        mesh: &mut MeshTable,
        seq: &mut crate::frame::SeqCounter,
        now_ms: u64,
        tod: TimeOfDay,
        sinks: &mut DispatchSinks,
    ) {
        let frame = rx.frame;

        // find a reason to reject the frame
        if frame_is_mine(&frame, &self.local) {
            trace!("own frame seq {} back from the mesh", frame.seq);
            self.dropped += 1;
            return;
        }

        let accepted = mesh.accept(&frame, rx.rssi_raw, now_ms, tod, &self.local);

        match accepted {
            Accept::Accepted => self.dispatch(&frame, rx.rssi_raw, mesh, seq, now_ms, tod, sinks),
            Accept::NotForUs => (),
            Accept::Duplicate => {
                self.duplicates += 1;
                self.dropped += 1;
            }
        }

        // flood onward while hops remain; duplicates never travel twice
        if accepted != Accept::Duplicate
            && frame.flags.repeat()
            && frame.flags.hop_count() < MAX_HOP_COUNT
        {
            self.repeat(frame, sinks.radio_tx);
        }
    }

    fn dispatch(
        &mut self,
        frame: &Frame,
        rssi_raw: u32,
        mesh: &mut MeshTable,
        seq: &mut crate::frame::SeqCounter,
        now_ms: u64,
        tod: TimeOfDay,
        sinks: &mut DispatchSinks,
    ) {
        let coding = match frame.flags.coding() {
            Some(c) => c,
            None => {
                self.dropped += 1;
                error!(
                    "frame received with unknown coding: {}",
                    frame.flags.coding_nibble()
                );
                return;
            }
        };

        match coding {
            Coding::Beacon => {
                mesh.process_beacon(frame, rssi_raw, now_ms, tod);
                sinks.host.enque_frame(frame);
                self.beacons += 1;
            }

            Coding::Utf8Text => {
                sinks.chat.enque(frame.clone());
                self.frames_ok += 1;
            }

            Coding::EchoRequest => {
                debug!("echo request from {:?}", frame.source);
                sinks.radio_tx.enque(self.echo_response(frame, seq));
                self.echoes += 1;
                self.frames_ok += 1;
            }

            // an answered echo reads as text
            Coding::EchoResponse => {
                sinks.chat.enque(frame.clone());
                self.frames_ok += 1;
            }

            Coding::LocalCommand => (),

            c if c.is_host_bound() => {
                sinks.host.enque_frame(frame);
                self.frames_ok += 1;
            }

            _ => {
                self.dropped += 1;
            }
        }
    }

    /// Synthesise the reply to an echo request: addresses swapped, payload
    /// copied, hop table cleared, fresh sequence
    fn echo_response(&self, request: &Frame, seq: &mut crate::frame::SeqCounter) -> Frame {
        let mut response = Frame::new(self.local, request.source, Coding::EchoResponse, seq.next());
        response.payload = request.payload.clone();
        response
    }

    /// Queue a repeated copy: one more hop table entry (us), one more hop
    fn repeat(&mut self, frame: Frame, radio_tx: &mut FrameQueue) {
        let hop_count = frame.flags.hop_count();

        // never reuse the incoming table
        let mut hop_table: Vec<NodeAddr> = Vec::with_capacity(hop_count as usize + 1);
        hop_table.extend_from_slice(&frame.hop_table);
        hop_table.push(self.local);

        let mut copy = frame;
        copy.hop_table = hop_table;
        copy.flags.set_hoptable(true);
        copy.flags.set_hop_count(hop_count + 1);

        self.repeated += 1;
        radio_tx.enque(copy);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::callsign::Callsign;
    use crate::frame::SeqCounter;
    use crate::hostlink::{Block, Direction};
    use crate::mesh::MeshConfig;

    struct Harness {
        dispatcher: Dispatcher,
        mesh: MeshTable,
        seq: SeqCounter,
        radio_tx: FrameQueue,
        chat: FrameQueue,
        host: HostLink,
    }

    fn local() -> NodeAddr {
        NodeAddr::new(Callsign::from_str("VE6VH "), 0x0001)
    }

    fn harness() -> Harness {
        let mut host = HostLink::new(Direction::Node, 10);
        // one completed exchange arms the host link
        host.exchange(&Block::empty(Direction::Host));

        Harness {
            dispatcher: Dispatcher::new(local()),
            mesh: MeshTable::new(MeshConfig::default()),
            seq: SeqCounter::new(),
            radio_tx: FrameQueue::new(),
            chat: FrameQueue::new(),
            host,
        }
    }

    impl Harness {
        fn process(&mut self, frame: Frame) {
            let rx = RxFrame {
                frame,
                raw_len: 0,
                rssi_raw: 200,
            };
            let mut sinks = DispatchSinks {
                radio_tx: &mut self.radio_tx,
                chat: &mut self.chat,
                host: &mut self.host,
            };
            self.dispatcher.process(
                rx,
                &mut self.mesh,
                &mut self.seq,
                0,
                TimeOfDay::default(),
                &mut sinks,
            );
        }
    }

    fn peer_frame(coding: Coding, seq: u32) -> Frame {
        let mut f = Frame::new(
            NodeAddr::new(Callsign::from_str("VA6AA "), 0x0002),
            NodeAddr::BROADCAST,
            coding,
            seq,
        );
        f.payload = alloc::vec![0x55u8; 60];
        f
    }

    #[test]
    fn own_source_dropped() {
        let mut h = harness();
        let mut f = peer_frame(Coding::Data, 1);
        f.source = local();
        f.flags.set_repeat(true);

        h.process(f);
        assert_eq!(h.dispatcher.dropped, 1);
        assert!(h.radio_tx.is_empty());
        assert_eq!(h.host.pending(), 0);
    }

    #[test]
    fn own_hop_entry_dropped() {
        let mut h = harness();
        let mut f = peer_frame(Coding::Data, 1);
        f.hop_table.push(local());
        f.flags.set_hoptable(true);
        f.flags.set_hop_count(1);
        f.flags.set_repeat(true);

        h.process(f);
        assert_eq!(h.dispatcher.dropped, 1);
        assert!(h.radio_tx.is_empty());
    }

    #[test]
    fn text_goes_to_chat() {
        let mut h = harness();
        h.process(peer_frame(Coding::Utf8Text, 1));
        assert_eq!(h.chat.len(), 1);
        assert_eq!(h.dispatcher.frames_ok, 1);
    }

    #[test]
    fn beacon_updates_mesh_and_host() {
        let mut h = harness();
        let mut f = peer_frame(Coding::Beacon, 1);
        f.payload = alloc::vec![0x09, 14, b'0', b'1'];

        h.process(f);
        assert_eq!(h.dispatcher.beacons, 1);
        assert_eq!(h.mesh.len(), 1);
        assert_eq!(h.host.pending(), 1);
        assert_eq!(h.mesh.entries().next().unwrap().tx_power, 14);
    }

    #[test]
    fn data_forwards_to_host() {
        let mut h = harness();
        h.process(peer_frame(Coding::Data, 1));
        assert_eq!(h.host.pending(), 1);
        assert_eq!(h.dispatcher.frames_ok, 1);
    }

    #[test]
    fn echo_request_answered() {
        let mut h = harness();
        let mut req = peer_frame(Coding::EchoRequest, 3);
        req.dest = local();
        req.payload = b"ping payload".to_vec();
        // the request came through a repeater
        req.hop_table
            .push(NodeAddr::new(Callsign::from_str("VE6RPT"), 9));
        req.flags.set_hoptable(true);
        req.flags.set_hop_count(1);
        let want_payload = req.payload.clone();
        let peer = req.source;

        h.process(req);

        let resp = h.radio_tx.deque().unwrap();
        assert_eq!(resp.source, local());
        assert_eq!(resp.dest, peer);
        assert_eq!(resp.payload, want_payload);
        assert_eq!(resp.flags.coding(), Some(Coding::EchoResponse));
        assert_eq!(resp.flags.hop_count(), 0);
        assert!(!resp.flags.hoptable());
        assert!(resp.hop_table.is_empty());
        // fresh sequence from our counter
        assert_eq!(resp.seq, u32::MAX);
    }

    #[test]
    fn repeat_appends_local_address() {
        let mut h = harness();
        let mut f = peer_frame(Coding::Data, 1);
        f.flags.set_repeat(true);

        h.process(f);

        let rpt = h.radio_tx.deque().unwrap();
        assert_eq!(rpt.flags.hop_count(), 1);
        assert!(rpt.flags.hoptable());
        assert_eq!(rpt.hop_table.len(), 1);
        assert_eq!(rpt.hop_table[0], local());
        assert_eq!(h.dispatcher.repeated, 1);
    }

    #[test]
    fn repeat_stops_at_hop_cap() {
        let mut h = harness();

        // hop count 14 repeats exactly once more
        let mut f = peer_frame(Coding::Data, 1);
        f.flags.set_repeat(true);
        for i in 0..14u16 {
            f.hop_table.push(NodeAddr::new(Callsign(0x2000 + i as u32), i));
        }
        f.flags.set_hoptable(true);
        f.flags.set_hop_count(14);

        h.process(f);
        let rpt = h.radio_tx.deque().unwrap();
        assert_eq!(rpt.flags.hop_count(), 15);
        assert_eq!(rpt.hop_table.len(), 15);
        assert_eq!(rpt.hop_table[14], local());

        // a later copy at the cap is not repeated
        let mut capped = peer_frame(Coding::Data, 2);
        capped.flags.set_repeat(true);
        for i in 0..15u16 {
            capped
                .hop_table
                .push(NodeAddr::new(Callsign(0x3000 + i as u32), i));
        }
        capped.flags.set_hoptable(true);
        capped.flags.set_hop_count(15);

        h.process(capped);
        assert!(h.radio_tx.is_empty());
    }

    #[test]
    fn duplicates_not_repeated() {
        let mut h = harness();

        let mut f = peer_frame(Coding::Data, 10);
        f.flags.set_repeat(true);
        h.process(f.clone());
        assert_eq!(h.radio_tx.len(), 1);
        h.radio_tx.flush();

        // the same sequence again: dropped, not flooded
        h.process(f);
        assert_eq!(h.dispatcher.duplicates, 1);
        assert!(h.radio_tx.is_empty());
    }

    #[test]
    fn not_for_us_still_repeats() {
        let mut h = harness();
        let mut f = peer_frame(Coding::Data, 1);
        f.dest = NodeAddr::new(Callsign::from_str("VE9XYZ"), 7);
        f.flags.set_repeat(true);

        h.process(f);
        // not dispatched anywhere, but flooded onward
        assert_eq!(h.host.pending(), 0);
        assert_eq!(h.radio_tx.len(), 1);
        assert_eq!(h.dispatcher.frames_ok, 0);
    }

    #[test]
    fn local_command_reserved() {
        let mut h = harness();
        let f = peer_frame(Coding::LocalCommand, 1);

        h.process(f);
        assert_eq!(h.dispatcher.frames_ok, 0);
        assert!(h.radio_tx.is_empty() && h.chat.is_empty());
        assert_eq!(h.host.pending(), 0);
    }
}
