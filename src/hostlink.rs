//! Host-link block exchange.
//!
//! The node and its host trade fixed-size blocks, one exchange per
//! scheduler tick, each direction carrying an independent frame stream.
//! Frames longer than a block body travel as fragments with monotone
//! offsets; an eye-catcher guards against desync, and a liveness timer
//! flushes the outbound queue when the peer stops exchanging.
//
// https://github.com/adrcs/ip400
// Copyright 2025 Alberta Digital Radio Communications Society

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace, warn};

use crate::callsign::{Callsign, NodeAddr, ADDR_SIZE};
use crate::frame::{Coding, Frame, FrameFlags, SeqCounter, MAX_HOP_COUNT, PAYLOAD_MAX};

/// Body bytes per exchange
pub const SPI_BUFFER_LEN: usize = 400;

/// Block header length
pub const SPI_HDR_LEN: usize = 24;

/// Total block length
pub const SPI_RAW_LEN: usize = SPI_HDR_LEN + SPI_BUFFER_LEN;

/// Give up on the peer after this much silence
pub const SPI_MAX_TIME_MS: u32 = 200;

/// Worst-case flattened frame: hop table ahead of a full payload
pub const MAX_BODY: usize = MAX_HOP_COUNT as usize * ADDR_SIZE + PAYLOAD_MAX;

/// Eye catcher on node-originated blocks
pub const EYE_NODE: [u8; 4] = *b"IP4C";

/// Eye catcher on host-originated blocks
pub const EYE_HOST: [u8; 4] = *b"IP4X";

/// Block status byte
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockStatus {
    NoData,
    Single,
    Fragment,
    LastFragment,
    /// Anything out of range; the block is discarded
    Invalid,
}

impl BlockStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => BlockStatus::NoData,
            1 => BlockStatus::Single,
            2 => BlockStatus::Fragment,
            3 => BlockStatus::LastFragment,
            _ => BlockStatus::Invalid,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            BlockStatus::NoData => 0,
            BlockStatus::Single => 1,
            BlockStatus::Fragment => 2,
            BlockStatus::LastFragment => 3,
            BlockStatus::Invalid => 4,
        }
    }
}

/// Which end of the link we are
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Radio node: sends `IP4C`, expects `IP4X`
    Node,
    /// Host daemon: sends `IP4X`, expects `IP4C`
    Host,
}

impl Direction {
    fn tx_eye(&self) -> [u8; 4] {
        match self {
            Direction::Node => EYE_NODE,
            Direction::Host => EYE_HOST,
        }
    }

    fn rx_eye(&self) -> [u8; 4] {
        match self {
            Direction::Node => EYE_HOST,
            Direction::Host => EYE_NODE,
        }
    }
}

/// Addressing and coding fields carried in every block header
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockAddressing {
    pub from_call: [u8; 4],
    pub from_ip: [u8; 2],
    pub to_call: [u8; 4],
    pub to_ip: [u8; 2],
    pub coding: u8,
    pub hop_count: u8,
    pub flags: u8,
}

impl BlockAddressing {
    /// Lift the addressing fields out of a frame header
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            from_call: frame.source.call_bytes(),
            from_ip: frame.source.vpn_bytes(),
            to_call: frame.dest.call_bytes(),
            to_ip: frame.dest.vpn_bytes(),
            coding: frame.flags.coding_nibble(),
            hop_count: frame.flags.hop_count(),
            flags: frame.flags.upper_byte(),
        }
    }

    pub fn source(&self) -> NodeAddr {
        NodeAddr::new(
            Callsign(u32::from_le_bytes(self.from_call)),
            u16::from_le_bytes(self.from_ip),
        )
    }

    pub fn dest(&self) -> NodeAddr {
        NodeAddr::new(
            Callsign(u32::from_le_bytes(self.to_call)),
            u16::from_le_bytes(self.to_ip),
        )
    }
}

/// One fixed-size exchange block
#[derive(Clone)]
pub struct Block(pub [u8; SPI_RAW_LEN]);

impl Block {
    pub fn empty(direction: Direction) -> Self {
        let mut block = Block([0u8; SPI_RAW_LEN]);
        block.0[0..4].copy_from_slice(&direction.tx_eye());
        block.set_status(BlockStatus::NoData);
        block
    }

    pub fn eye(&self) -> &[u8] {
        &self.0[0..4]
    }

    pub fn status(&self) -> BlockStatus {
        BlockStatus::from_u8(self.0[4])
    }

    pub fn set_status(&mut self, status: BlockStatus) {
        self.0[4] = status.to_u8();
    }

    pub fn offset(&self) -> u16 {
        BigEndian::read_u16(&self.0[5..7])
    }

    pub fn set_offset(&mut self, offset: u16) {
        BigEndian::write_u16(&mut self.0[5..7], offset);
    }

    pub fn length(&self) -> u16 {
        BigEndian::read_u16(&self.0[7..9])
    }

    pub fn set_length(&mut self, length: u16) {
        BigEndian::write_u16(&mut self.0[7..9], length);
    }

    pub fn addressing(&self) -> BlockAddressing {
        let mut addr = BlockAddressing::default();
        addr.from_call.copy_from_slice(&self.0[9..13]);
        addr.from_ip.copy_from_slice(&self.0[13..15]);
        addr.to_call.copy_from_slice(&self.0[15..19]);
        addr.to_ip.copy_from_slice(&self.0[19..21]);
        addr.coding = self.0[21];
        addr.hop_count = self.0[22];
        addr.flags = self.0[23];
        addr
    }

    pub fn set_addressing(&mut self, addr: &BlockAddressing) {
        self.0[9..13].copy_from_slice(&addr.from_call);
        self.0[13..15].copy_from_slice(&addr.from_ip);
        self.0[15..19].copy_from_slice(&addr.to_call);
        self.0[19..21].copy_from_slice(&addr.to_ip);
        self.0[21] = addr.coding;
        self.0[22] = addr.hop_count;
        self.0[23] = addr.flags;
    }

    pub fn body(&self) -> &[u8] {
        &self.0[SPI_HDR_LEN..]
    }

    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.0[SPI_HDR_LEN..]
    }
}

/// A frame in host-link form: addressing fields plus the flat body
/// (hop table bytes ahead of the payload)
#[derive(Clone, Debug, PartialEq)]
pub struct HostFrame {
    pub addressing: BlockAddressing,
    pub body: Vec<u8>,
}

impl HostFrame {
    /// Flatten an on-air frame for the host link
    pub fn from_frame(frame: &Frame) -> Self {
        let mut body = Vec::with_capacity(frame.payload.len() + frame.hop_table.len() * ADDR_SIZE);
        let mut entry = [0u8; ADDR_SIZE];
        for hop in frame.hop_table.iter() {
            hop.write(&mut entry);
            body.extend_from_slice(&entry);
        }
        body.extend_from_slice(&frame.payload);

        Self {
            addressing: BlockAddressing::from_frame(frame),
            body,
        }
    }

    /// Rebuild an on-air frame on the node side. The local node becomes
    /// the source and the frame gets a fresh sequence number. Host-side
    /// beacons are never put on the air.
    pub fn into_frame(self, local: &NodeAddr, seq: &mut SeqCounter) -> Option<Frame> {
        if Coding::from_nibble(self.addressing.coding) == Some(Coding::Beacon) {
            return None;
        }

        let mut flags = FrameFlags::from_parts(
            self.addressing.hop_count,
            self.addressing.coding,
            self.addressing.flags,
        );

        let hops = self.addressing.hop_count as usize;
        let table_len = hops * ADDR_SIZE;
        if self.body.len() < table_len {
            return None;
        }

        let mut hop_table = Vec::with_capacity(hops);
        for i in 0..hops {
            hop_table.push(NodeAddr::read(&self.body[i * ADDR_SIZE..(i + 1) * ADDR_SIZE]));
        }
        if hops > 0 {
            flags.set_hoptable(true);
        }

        Some(Frame {
            source: *local,
            dest: self.addressing.dest(),
            flags,
            seq: seq.next(),
            hop_table,
            payload: self.body[table_len..].to_vec(),
        })
    }

    /// Datagram image for the UDP relay: header then assembled body
    pub fn to_datagram(&self, direction: Direction) -> Vec<u8> {
        let mut block = Block::empty(direction);
        block.set_status(BlockStatus::Single);
        block.set_offset(0);
        block.set_length(self.body.len() as u16);
        block.set_addressing(&self.addressing);

        let mut out = Vec::with_capacity(SPI_HDR_LEN + self.body.len());
        out.extend_from_slice(&block.0[..SPI_HDR_LEN]);
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse a relay datagram back into host-link form
    pub fn from_datagram(data: &[u8], expect_eye: &[u8; 4]) -> Option<Self> {
        if data.len() < SPI_HDR_LEN || &data[0..4] != expect_eye {
            return None;
        }

        let mut header = Block([0u8; SPI_RAW_LEN]);
        header.0[..SPI_HDR_LEN].copy_from_slice(&data[..SPI_HDR_LEN]);

        let len = (header.length() as usize).min(data.len() - SPI_HDR_LEN);
        Some(Self {
            addressing: header.addressing(),
            body: data[SPI_HDR_LEN..SPI_HDR_LEN + len].to_vec(),
        })
    }
}

/// Per-direction transfer state
#[derive(Clone, Copy, Debug, PartialEq)]
enum XferState {
    Idle,
    Fragmenting,
}

struct TxInProgress {
    addressing: BlockAddressing,
    body: Vec<u8>,
    offset: usize,
}

/// The block-exchange endpoint. Transport-agnostic: the caller moves the
/// blocks over SPI, UDP or anything else that can swap 424 bytes, and
/// reports idle ticks so the liveness timer can run.
pub struct HostLink {
    direction: Direction,
    tx_state: XferState,
    rx_state: XferState,
    tx_queue: VecDeque<HostFrame>,
    tx_current: Option<TxInProgress>,
    rx_addressing: BlockAddressing,
    rx_buf: [u8; MAX_BODY],
    active: bool,
    idle_ticks: u32,
    max_idle_ticks: u32,
}

impl HostLink {
    pub fn new(direction: Direction, tick_ms: u32) -> Self {
        Self {
            direction,
            tx_state: XferState::Idle,
            rx_state: XferState::Idle,
            tx_queue: VecDeque::new(),
            tx_current: None,
            rx_addressing: BlockAddressing::default(),
            rx_buf: [0u8; MAX_BODY],
            active: false,
            idle_ticks: 0,
            max_idle_ticks: (SPI_MAX_TIME_MS / tick_ms.max(1)).max(1),
        }
    }

    /// The peer has completed an exchange recently
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Outbound frames waiting for the peer
    pub fn pending(&self) -> usize {
        self.tx_queue.len() + self.tx_current.is_some() as usize
    }

    /// Queue an outbound frame. Refused while the peer is inactive.
    pub fn enque_frame(&mut self, frame: &Frame) -> bool {
        if !self.active {
            return false;
        }
        self.tx_queue.push_back(HostFrame::from_frame(frame));
        true
    }

    /// Queue an already-flattened frame (UDP relay receive path)
    pub fn enque_host_frame(&mut self, frame: HostFrame) -> bool {
        if !self.active {
            return false;
        }
        self.tx_queue.push_back(frame);
        true
    }

    /// A scheduler tick passed without a completed exchange. When the
    /// peer has been quiet for the whole window, queued frames are
    /// discarded until it comes back.
    pub fn idle_tick(&mut self) {
        self.idle_ticks += 1;
        if self.idle_ticks >= self.max_idle_ticks {
            if self.active || !self.tx_queue.is_empty() {
                debug!("host link inactive, flushing {} frames", self.tx_queue.len());
            }
            self.tx_queue.clear();
            self.tx_current = None;
            self.tx_state = XferState::Idle;
            self.active = false;
            self.idle_ticks = 0;
        }
    }

    /// One completed exchange: consume the peer's block, produce ours.
    /// A reassembled inbound frame, when one completes, is returned for
    /// the caller to forward.
    pub fn exchange(&mut self, inbound: &Block) -> (Block, Option<HostFrame>) {
        self.active = true;
        self.idle_ticks = 0;

        let received = self.process_inbound(inbound);
        let outbound = self.next_outbound();

        (outbound, received)
    }

    fn process_inbound(&mut self, block: &Block) -> Option<HostFrame> {
        let status = block.status();
        if status == BlockStatus::NoData || status == BlockStatus::Invalid {
            return None;
        }

        // desync: a bad eye discards the block without touching state
        if block.eye() != self.direction.rx_eye() {
            warn!("host link eye mismatch: {:?}", block.eye());
            return None;
        }

        let offset = block.offset() as usize;
        let length = block.length() as usize;
        if length > SPI_BUFFER_LEN || offset + length > MAX_BODY {
            warn!("host link block out of range: {}+{}", offset, length);
            return None;
        }

        match (self.rx_state, status) {
            (_, BlockStatus::Single) => {
                self.rx_state = XferState::Idle;
                Some(HostFrame {
                    addressing: block.addressing(),
                    body: block.body()[..length].to_vec(),
                })
            }
            (XferState::Idle, BlockStatus::Fragment) => {
                self.rx_addressing = block.addressing();
                self.rx_buf[offset..offset + length].copy_from_slice(&block.body()[..length]);
                self.rx_state = XferState::Fragmenting;
                trace!("rx fragment start, {} bytes", length);
                None
            }
            (XferState::Fragmenting, BlockStatus::Fragment) => {
                self.rx_buf[offset..offset + length].copy_from_slice(&block.body()[..length]);
                None
            }
            (XferState::Fragmenting, BlockStatus::LastFragment) => {
                self.rx_buf[offset..offset + length].copy_from_slice(&block.body()[..length]);
                self.rx_state = XferState::Idle;
                let total = offset + length;
                trace!("rx reassembly complete, {} bytes", total);
                Some(HostFrame {
                    addressing: self.rx_addressing.clone(),
                    body: self.rx_buf[..total].to_vec(),
                })
            }
            // a stray last-fragment with nothing accumulated
            (XferState::Idle, BlockStatus::LastFragment) => {
                warn!("host link last-fragment without a start");
                None
            }
            _ => None,
        }
    }

    fn next_outbound(&mut self) -> Block {
        let mut block = Block::empty(self.direction);

        if self.tx_state == XferState::Idle {
            let frame = match self.tx_queue.pop_front() {
                Some(f) => f,
                None => return block,
            };

            if frame.body.len() <= SPI_BUFFER_LEN {
                block.set_status(BlockStatus::Single);
                block.set_offset(0);
                block.set_length(frame.body.len() as u16);
                block.set_addressing(&frame.addressing);
                block.body_mut()[..frame.body.len()].copy_from_slice(&frame.body);
                return block;
            }

            // too long for one exchange: start fragmenting
            block.set_status(BlockStatus::Fragment);
            block.set_offset(0);
            block.set_length(SPI_BUFFER_LEN as u16);
            block.set_addressing(&frame.addressing);
            block.body_mut().copy_from_slice(&frame.body[..SPI_BUFFER_LEN]);

            self.tx_current = Some(TxInProgress {
                addressing: frame.addressing,
                body: frame.body,
                offset: SPI_BUFFER_LEN,
            });
            self.tx_state = XferState::Fragmenting;
            return block;
        }

        // send the next fragment
        let mut current = match self.tx_current.take() {
            Some(c) => c,
            None => {
                self.tx_state = XferState::Idle;
                return block;
            }
        };

        let remaining = current.body.len() - current.offset;
        let seg = remaining.min(SPI_BUFFER_LEN);
        let last = remaining <= SPI_BUFFER_LEN;

        block.set_status(if last {
            BlockStatus::LastFragment
        } else {
            BlockStatus::Fragment
        });
        block.set_offset(current.offset as u16);
        block.set_length(seg as u16);
        block.set_addressing(&current.addressing);
        block.body_mut()[..seg].copy_from_slice(&current.body[current.offset..current.offset + seg]);

        if last {
            self.tx_state = XferState::Idle;
        } else {
            current.offset += seg;
            self.tx_current = Some(current);
        }

        block
    }
}
