//! IP400 frame object and wire codec.
//!
//! On the air a frame is source address, destination address, flag word,
//! sequence number, payload length, an optional hop table and the payload,
//! all little-endian, padded out to a four-byte boundary for the radio.
//
// https://github.com/adrcs/ip400
// Copyright 2025 Alberta Digital Radio Communications Society

use alloc::vec::Vec;

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use strum::Display;

use crate::callsign::{encode_extended, NodeAddr, ADDR_SIZE};

/// Min octets in a payload
pub const PAYLOAD_MIN: usize = 56;

/// Max octets in a payload
pub const PAYLOAD_MAX: usize = 1053;

/// Octets appended by the FEC stage
pub const N_FEC: usize = 4;

/// Hop count limit; a frame at the cap is never repeated again
pub const MAX_HOP_COUNT: u8 = 15;

/// Serialised header: two addresses, flag word, sequence, length
pub const HDR_SIZE: usize = 2 * ADDR_SIZE + 2 + 4 + 2;

/// Shortest frame handed to the radio
pub const MIN_FRAME_SIZE: usize = HDR_SIZE + PAYLOAD_MIN + N_FEC;

/// Raw buffer size: worst-case frame rounded to a word boundary
pub const MAX_FRAME_SIZE: usize =
    (HDR_SIZE + MAX_HOP_COUNT as usize * ADDR_SIZE + PAYLOAD_MAX + N_FEC + 3) & !3;

/// Packet coding held in the flag word
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Coding {
    Utf8Text = 0,
    CompressedAudio,
    CompressedVideo,
    Data,
    Beacon,
    IpEncapsulated,
    Ax25,
    Dtmf,
    Dmr,
    Dstar,
    P25,
    Nxdn,
    M17,
    EchoRequest,
    EchoResponse,
    LocalCommand,
}

impl Coding {
    /// Decode the coding nibble; anything the enum does not name is invalid
    pub fn from_nibble(n: u8) -> Option<Coding> {
        use Coding::*;
        let c = match n {
            0 => Utf8Text,
            1 => CompressedAudio,
            2 => CompressedVideo,
            3 => Data,
            4 => Beacon,
            5 => IpEncapsulated,
            6 => Ax25,
            7 => Dtmf,
            8 => Dmr,
            9 => Dstar,
            10 => P25,
            11 => Nxdn,
            12 => M17,
            13 => EchoRequest,
            14 => EchoResponse,
            15 => LocalCommand,
            _ => return None,
        };
        Some(c)
    }

    /// Frames the dispatcher hands across the host link
    pub fn is_host_bound(&self) -> bool {
        use Coding::*;
        matches!(
            self,
            CompressedAudio
                | CompressedVideo
                | Data
                | IpEncapsulated
                | Ax25
                | Dtmf
                | Dmr
                | Dstar
                | P25
                | Nxdn
                | M17
        )
    }
}

/// The 16-bit flag word.
///
/// Layout, LSB first: hop_count:4, coding:4, compression:2, hoptable:1,
/// src_ext:1, dest_ext:1, command:1, noconnect:1, repeat:1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameFlags(pub u16);

macro_rules! flag_bit {
    ($get:ident, $set:ident, $bit:expr) => {
        pub fn $get(&self) -> bool {
            self.0 & (1 << $bit) != 0
        }
        pub fn $set(&mut self, v: bool) {
            if v {
                self.0 |= 1 << $bit;
            } else {
                self.0 &= !(1 << $bit);
            }
        }
    };
}

impl FrameFlags {
    pub fn hop_count(&self) -> u8 {
        (self.0 & 0x000F) as u8
    }

    pub fn set_hop_count(&mut self, count: u8) {
        self.0 = (self.0 & !0x000F) | (count as u16 & 0x000F);
    }

    pub fn coding_nibble(&self) -> u8 {
        ((self.0 >> 4) & 0x000F) as u8
    }

    pub fn set_coding(&mut self, coding: Coding) {
        self.0 = (self.0 & !0x00F0) | ((coding as u16) << 4);
    }

    pub fn coding(&self) -> Option<Coding> {
        Coding::from_nibble(self.coding_nibble())
    }

    pub fn compression(&self) -> u8 {
        ((self.0 >> 8) & 0x0003) as u8
    }

    pub fn set_compression(&mut self, c: u8) {
        self.0 = (self.0 & !0x0300) | ((c as u16 & 0x3) << 8);
    }

    flag_bit!(hoptable, set_hoptable, 10);
    flag_bit!(src_ext, set_src_ext, 11);
    flag_bit!(dest_ext, set_dest_ext, 12);
    flag_bit!(command, set_command, 13);
    flag_bit!(noconnect, set_noconnect, 14);
    flag_bit!(repeat, set_repeat, 15);

    /// Upper flag byte as carried in a host-link block header
    pub fn upper_byte(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Rebuild the word from the host-link header fields
    pub fn from_parts(hop_count: u8, coding: u8, upper: u8) -> Self {
        FrameFlags(
            (hop_count as u16 & 0x0F) | ((coding as u16 & 0x0F) << 4) | ((upper as u16) << 8),
        )
    }
}

bitflags! {
    /// Radio sequencer error register, surfaced to the diagnostic printer
    pub struct RadioErrors: u32 {
        const SEQ_COMPLETE_ERR = 0x8000;
        const SEQ_ACT_TIMEOUT  = 0x4000;
        const PLL_CALAMP_ERR   = 0x0800;
        const PLL_CALFREQ_ERR  = 0x0400;
        const PLL_UNLOCK_ERR   = 0x0200;
        const PLL_LOCK_FAIL    = 0x0100;
        const DBM_FIFO_ERR     = 0x0020;
    }
}

/// Frame codec errors
#[derive(Debug, Clone, PartialEq)]
pub enum FrameError {
    /// Payload exceeds the on-air maximum
    PayloadTooLong(usize),
    /// Hop table length disagrees with the flag word
    HopCountMismatch,
    /// Declared length runs past the raw buffer
    Truncated,
    /// Destination buffer too small for the serialised frame
    BufferTooSmall,
}

/// A complete frame, owned as a single unit
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub source: NodeAddr,
    pub dest: NodeAddr,
    pub flags: FrameFlags,
    pub seq: u32,
    pub hop_table: Vec<NodeAddr>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(source: NodeAddr, dest: NodeAddr, coding: Coding, seq: u32) -> Self {
        let mut flags = FrameFlags::default();
        flags.set_coding(coding);
        Frame {
            source,
            dest,
            flags,
            seq,
            hop_table: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Serialised length before padding
    fn body_len(&self) -> usize {
        let hops = if self.flags.hoptable() {
            self.hop_table.len() * ADDR_SIZE
        } else {
            0
        };
        HDR_SIZE + hops + self.payload.len()
    }

    /// Length of the padded on-air image
    pub fn encoded_len(&self) -> usize {
        let padded = (self.body_len() + 3) & !3;
        padded.max(MIN_FRAME_SIZE)
    }

    /// Serialise into a raw radio buffer. The image is zero-padded to a
    /// four-byte boundary and never shorter than the radio minimum; the
    /// length field keeps the true payload length.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, FrameError> {
        if self.payload.len() > PAYLOAD_MAX {
            return Err(FrameError::PayloadTooLong(self.payload.len()));
        }
        if self.flags.hoptable() && self.hop_table.len() != self.flags.hop_count() as usize {
            return Err(FrameError::HopCountMismatch);
        }

        let total = self.encoded_len();
        if buf.len() < total {
            return Err(FrameError::BufferTooSmall);
        }

        self.source.write(&mut buf[0..ADDR_SIZE]);
        self.dest.write(&mut buf[ADDR_SIZE..2 * ADDR_SIZE]);

        let mut at = 2 * ADDR_SIZE;
        LittleEndian::write_u16(&mut buf[at..at + 2], self.flags.0);
        at += 2;
        LittleEndian::write_u32(&mut buf[at..at + 4], self.seq);
        at += 4;
        LittleEndian::write_u16(&mut buf[at..at + 2], self.payload.len() as u16);
        at += 2;

        if self.flags.hoptable() {
            for hop in self.hop_table.iter() {
                hop.write(&mut buf[at..at + ADDR_SIZE]);
                at += ADDR_SIZE;
            }
        }

        buf[at..at + self.payload.len()].copy_from_slice(&self.payload);
        at += self.payload.len();

        for b in buf[at..total].iter_mut() {
            *b = 0;
        }

        Ok(total)
    }

    /// Parse a raw buffer back into a frame; the inverse of [`Self::encode`]
    pub fn decode(buf: &[u8]) -> Result<Frame, FrameError> {
        if buf.len() < HDR_SIZE {
            return Err(FrameError::Truncated);
        }

        let source = NodeAddr::read(&buf[0..ADDR_SIZE]);
        let dest = NodeAddr::read(&buf[ADDR_SIZE..2 * ADDR_SIZE]);

        let mut at = 2 * ADDR_SIZE;
        let flags = FrameFlags(LittleEndian::read_u16(&buf[at..at + 2]));
        at += 2;
        let seq = LittleEndian::read_u32(&buf[at..at + 4]);
        at += 4;
        let length = LittleEndian::read_u16(&buf[at..at + 2]) as usize;
        at += 2;

        let mut hop_table = Vec::new();
        if flags.hoptable() {
            let hops = flags.hop_count() as usize;
            if buf.len() < at + hops * ADDR_SIZE {
                return Err(FrameError::Truncated);
            }
            for _ in 0..hops {
                hop_table.push(NodeAddr::read(&buf[at..at + ADDR_SIZE]));
                at += ADDR_SIZE;
            }
        }

        if length > PAYLOAD_MAX || buf.len() < at + length {
            return Err(FrameError::Truncated);
        }

        let payload = buf[at..at + length].to_vec();

        Ok(Frame {
            source,
            dest,
            flags,
            seq,
            hop_table,
            payload,
        })
    }
}

/// Per-node frame sequence counter.
///
/// Starts at the all-ones sentinel so the first frame after boot tells
/// receivers to resynchronise their expected sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct SeqCounter(u32);

impl SeqCounter {
    pub fn new() -> Self {
        SeqCounter(u32::MAX)
    }

    pub fn next(&mut self) -> u32 {
        let seq = self.0;
        self.0 = self.0.wrapping_add(1);
        seq
    }
}

impl Default for SeqCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame counters shown by the diagnostic surface
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub tx_frames: u32,
    pub rx_frames: u32,
    pub crc_errors: u32,
    pub timeouts: u32,
    pub last_rssi: u32,
    pub frames_ok: u32,
    pub dropped: u32,
    pub duplicates: u32,
    pub beacons: u32,
    pub repeated: u32,
}

/// Assemble an outbound frame.
///
/// Callsigns longer than six symbols spill their surplus chunks into the
/// payload head, raising the matching extension flag.
pub fn build_frame(
    src_call: &str,
    src_vpn: u16,
    dest_call: &str,
    dest_vpn: u16,
    coding: Coding,
    body: &[u8],
    repeat: bool,
    seq: u32,
) -> Frame {
    let (src, src_chunks) = encode_extended(src_call);
    let (dst, dest_chunks) = encode_extended(dest_call);

    let mut payload = Vec::new();
    let mut flags = FrameFlags::default();
    if let Some(chunks) = src_chunks {
        payload.extend_from_slice(&chunks);
        flags.set_src_ext(true);
    }
    if let Some(chunks) = dest_chunks {
        payload.extend_from_slice(&chunks);
        flags.set_dest_ext(true);
    }
    payload.extend_from_slice(body);

    flags.set_coding(coding);
    flags.set_repeat(repeat);

    Frame {
        source: NodeAddr::new(src, src_vpn),
        dest: NodeAddr::new(dst, dest_vpn),
        flags,
        seq,
        hop_table: Vec::new(),
        payload,
    }
}

/// Assemble a broadcast beacon frame
pub fn build_beacon(src_call: &str, src_vpn: u16, payload: &[u8], seq: u32) -> Frame {
    build_frame(
        src_call,
        src_vpn,
        "FFFF",
        0xFFFF,
        Coding::Beacon,
        payload,
        true,
        seq,
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::callsign::Callsign;

    fn sample_frame(payload_len: usize, hops: usize) -> Frame {
        let mut f = Frame::new(
            NodeAddr::new(Callsign::from_str("VE6VH "), 0x1234),
            NodeAddr::new(Callsign::from_str("VA6EJT"), 0x5678),
            Coding::Data,
            42,
        );
        f.payload = (0..payload_len).map(|i| i as u8).collect();
        for k in 0..hops {
            f.hop_table
                .push(NodeAddr::new(Callsign(0x1000 + k as u32), k as u16));
        }
        if hops > 0 {
            f.flags.set_hoptable(true);
            f.flags.set_hop_count(hops as u8);
        }
        f
    }

    #[test]
    fn flag_word_fields() {
        let mut flags = FrameFlags::default();
        flags.set_hop_count(7);
        flags.set_coding(Coding::Beacon);
        flags.set_compression(2);
        flags.set_hoptable(true);
        flags.set_src_ext(true);
        flags.set_repeat(true);

        assert_eq!(flags.hop_count(), 7);
        assert_eq!(flags.coding(), Some(Coding::Beacon));
        assert_eq!(flags.compression(), 2);
        assert!(flags.hoptable() && flags.src_ext() && flags.repeat());
        assert!(!flags.dest_ext() && !flags.command() && !flags.noconnect());

        // survives the host-link split into nibbles and the upper byte
        let rebuilt =
            FrameFlags::from_parts(flags.hop_count(), flags.coding_nibble(), flags.upper_byte());
        assert_eq!(rebuilt, flags);
    }

    #[test]
    fn codec_round_trip() {
        let frame = sample_frame(300, 0);
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = frame.encode(&mut buf).unwrap();

        assert_eq!(n % 4, 0);
        assert!(n >= MIN_FRAME_SIZE && n <= MAX_FRAME_SIZE);
        assert_eq!(Frame::decode(&buf[..n]).unwrap(), frame);
    }

    #[test]
    fn codec_round_trip_with_hops() {
        let frame = sample_frame(900, 3);
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = frame.encode(&mut buf).unwrap();
        assert_eq!(Frame::decode(&buf[..n]).unwrap(), frame);
    }

    #[test]
    fn short_payloads_pad_to_minimum() {
        let frame = sample_frame(4, 0);
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = frame.encode(&mut buf).unwrap();
        assert_eq!(n, MIN_FRAME_SIZE);
        // length field still carries the true payload length
        assert_eq!(Frame::decode(&buf[..n]).unwrap().payload.len(), 4);
    }

    #[test]
    fn oversize_payload_refused() {
        let frame = sample_frame(PAYLOAD_MAX + 1, 0);
        let mut buf = [0u8; 2048];
        assert_eq!(
            frame.encode(&mut buf),
            Err(FrameError::PayloadTooLong(PAYLOAD_MAX + 1))
        );
    }

    #[test]
    fn hop_flag_must_match_table() {
        let mut frame = sample_frame(100, 2);
        frame.flags.set_hop_count(5);
        let mut buf = [0u8; MAX_FRAME_SIZE];
        assert_eq!(frame.encode(&mut buf), Err(FrameError::HopCountMismatch));
    }

    #[test]
    fn truncated_buffer_rejected() {
        let frame = sample_frame(500, 0);
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = frame.encode(&mut buf).unwrap();
        assert_eq!(Frame::decode(&buf[..n - 200]), Err(FrameError::Truncated));
        assert_eq!(Frame::decode(&buf[..10]), Err(FrameError::Truncated));
    }

    #[test]
    fn seq_counter_boot_sentinel() {
        let mut seq = SeqCounter::new();
        assert_eq!(seq.next(), u32::MAX);
        assert_eq!(seq.next(), 0);
        assert_eq!(seq.next(), 1);
    }

    #[test]
    fn beacon_builder_broadcasts() {
        let beacon = build_beacon("VE6VH", 0x1234, b"payload", 7);
        assert!(beacon.dest.is_broadcast());
        assert_eq!(beacon.flags.coding(), Some(Coding::Beacon));
        assert!(beacon.flags.repeat());
        assert_eq!(beacon.source.vpn, 0x1234);
    }

    #[test]
    fn extended_call_spills_into_payload() {
        let frame = build_frame(
            "VE6VHEXTRA",
            1,
            "VA6EJT",
            2,
            Coding::Utf8Text,
            b"hello",
            false,
            0,
        );
        assert!(frame.flags.src_ext());
        assert!(!frame.flags.dest_ext());
        // one chunk word plus terminator ahead of the body
        assert_eq!(&frame.payload[8..], b"hello");
    }

    #[test]
    fn invalid_coding_nibble() {
        assert_eq!(Coding::from_nibble(16), None);
        assert_eq!(Coding::from_nibble(4), Some(Coding::Beacon));
    }
}
