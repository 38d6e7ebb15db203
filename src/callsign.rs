//! Radix-40 callsign compression.
//!
//! A callsign of up to six symbols packs into a 32-bit word. Longer calls
//! are split into 6-character chunks; the surplus chunks travel at the head
//! of the frame payload, flagged by the source/destination extension bits.
//
// https://github.com/adrcs/ip400
// Copyright 2025 Alberta Digital Radio Communications Society

use byteorder::{ByteOrder, LittleEndian};

use heapless::String;

/// Alphabet radix
pub const RADIX_40: u32 = 40;

/// Symbols in a compressed callsign word
pub const MAX_CALL: usize = 6;

/// Longest supported callsign, compressed word plus payload chunks
pub const EXT_CALL: usize = 4 * MAX_CALL;

/// Octets in an encoded node address (callsign word + vpn halfword)
pub const ADDR_SIZE: usize = 6;

/// Terminator word closing the extension chunks in the payload
const EXT_TERMINATOR: u32 = 0xFF00_0000;

// Radix 40 callsign alphabet
const ALPHABET: [u8; RADIX_40 as usize] = [
    //   0    1    2    3    4    5    6    7    8    9
    b'0', b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9',
    //  10   11   12   13   14   15   16   17   18   19
    b' ', b'A', b'B', b'C', b'D', b'E', b'F', b'G', b'H', b'I',
    //  20   21   22   23   24   25   26   27   28   29
    b'J', b'K', b'L', b'M', b'N', b'O', b'P', b'Q', b'R', b'S',
    //  30   31   32   33   34   35   36   37   38   39
    b'T', b'U', b'V', b'W', b'X', b'Y', b'Z', b'(', b')', b'@',
];

/// Encode a character into the alphabet.
/// Anything outside the alphabet maps to the pad symbol (space).
fn alpha_encode(c: u8) -> u32 {
    let c = c.to_ascii_uppercase();

    // '-' marks an extended call on input and shares the '@' slot
    if c == b'-' {
        return 39;
    }

    match ALPHABET.iter().position(|&a| a == c) {
        Some(i) => i as u32,
        None => 10,
    }
}

/// Decode an alphabet index back into ASCII
fn alpha_decode(alpha: u32) -> u8 {
    ALPHABET[(alpha % RADIX_40) as usize]
}

/// Pack a window of up to six symbols, MSB first
pub fn encode_chunk(window: &[u8]) -> u32 {
    let mut chunk = 0u32;
    for i in 0..MAX_CALL {
        let sym = window.get(i).copied().unwrap_or(b' ');
        chunk = alpha_encode(sym) + chunk * RADIX_40;
    }
    chunk
}

/// A compressed callsign word
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Callsign(pub u32);

impl Callsign {
    pub const BROADCAST: Callsign = Callsign(0xFFFF_FFFF);

    /// Compress the first six symbols of a callsign.
    /// The literal broadcast string maps to the all-ones word.
    pub fn from_str(call: &str) -> Self {
        if call == "FFFF" {
            return Self::BROADCAST;
        }
        Callsign(encode_chunk(call.as_bytes()))
    }

    /// Expand back to the padded six-symbol window
    pub fn decode(&self) -> String<MAX_CALL> {
        let mut tmp = [0u8; MAX_CALL];
        let mut enc = self.0;
        for slot in tmp.iter_mut() {
            *slot = alpha_decode(enc % RADIX_40);
            enc /= RADIX_40;
        }
        tmp.reverse();

        let mut out = String::new();
        for &c in tmp.iter() {
            // padded windows always fit
            let _ = out.push(c as char);
        }
        out
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == Self::BROADCAST.0
    }
}

/// Encode a full callsign: the leading window compresses into the address
/// word, surplus chunks (plus the terminator) are returned for the payload
/// head and the caller raises the matching extension flag.
pub fn encode_extended(call: &str) -> (Callsign, Option<alloc::vec::Vec<u8>>) {
    if call.len() <= MAX_CALL || call == "FFFF" {
        return (Callsign::from_str(call), None);
    }

    let bytes = call.as_bytes();
    let first = Callsign(encode_chunk(&bytes[..MAX_CALL]));

    let mut ext = alloc::vec::Vec::new();
    let mut word = [0u8; 4];
    for chunk in bytes[MAX_CALL..].chunks(MAX_CALL) {
        LittleEndian::write_u32(&mut word, encode_chunk(chunk));
        ext.extend_from_slice(&word);
    }
    LittleEndian::write_u32(&mut word, EXT_TERMINATOR);
    ext.extend_from_slice(&word);

    (first, Some(ext))
}

/// Recover an extended callsign from the address word and the payload head.
/// Returns the decoded string and the number of payload bytes consumed.
pub fn decode_extended(call: Callsign, payload: &[u8]) -> (String<EXT_CALL>, usize) {
    let mut out: String<EXT_CALL> = String::new();
    for c in call.decode().chars() {
        let _ = out.push(c);
    }

    let mut consumed = 0;
    while payload.len() >= consumed + 4 {
        let word = LittleEndian::read_u32(&payload[consumed..consumed + 4]);
        consumed += 4;
        if word == EXT_TERMINATOR {
            break;
        }
        for c in Callsign(word).decode().chars() {
            let _ = out.push(c);
        }
    }

    while out.ends_with(' ') {
        out.pop();
    }

    (out, consumed)
}

/// Logical node address: compressed callsign plus the VPN lower halfword
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeAddr {
    pub call: Callsign,
    pub vpn: u16,
}

impl NodeAddr {
    pub const BROADCAST: NodeAddr = NodeAddr {
        call: Callsign::BROADCAST,
        vpn: 0xFFFF,
    };

    pub fn new(call: Callsign, vpn: u16) -> Self {
        Self { call, vpn }
    }

    pub fn is_broadcast(&self) -> bool {
        self.call.is_broadcast() && self.vpn == 0xFFFF
    }

    /// AX.25 compatibility overlay: upper nibbles all-ones, SSID in the
    /// low nibble of the vpn halfword
    pub fn ax25_ssid(&self) -> Option<u8> {
        if self.vpn & 0xFFF0 == 0xFFF0 && self.vpn != 0xFFFF {
            Some((self.vpn & 0x0F) as u8)
        } else {
            None
        }
    }

    pub fn write(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.call.0);
        LittleEndian::write_u16(&mut buf[4..6], self.vpn);
    }

    pub fn read(buf: &[u8]) -> Self {
        Self {
            call: Callsign(LittleEndian::read_u32(&buf[0..4])),
            vpn: LittleEndian::read_u16(&buf[4..6]),
        }
    }

    /// Callsign bytes as they appear on the wire
    pub fn call_bytes(&self) -> [u8; 4] {
        self.call.0.to_le_bytes()
    }

    pub fn vpn_bytes(&self) -> [u8; 2] {
        self.vpn.to_le_bytes()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_ve6vh() {
        // V,E,6,V,H,space composed by hand under radix 40
        let expected = ((((32u32 * 40 + 15) * 40 + 6) * 40 + 32) * 40 + 18) * 40 + 10;
        let call = Callsign::from_str("VE6VH ");
        assert_eq!(call.0, expected);
        assert_eq!(call.decode().as_str(), "VE6VH ");
    }

    #[test]
    fn short_calls_pad_with_space() {
        let call = Callsign::from_str("N0CL");
        assert_eq!(call.decode().as_str(), "N0CL  ");
    }

    #[test]
    fn round_trip_alphabet() {
        for s in &["VE6VH ", "AB1CDE", "0Z9( )", "@@@@@@", "      "] {
            let call = Callsign::from_str(s);
            assert_eq!(call.decode().as_str(), *s);
        }
    }

    #[test]
    fn lowercase_and_invalid_fold() {
        assert_eq!(Callsign::from_str("ve6vh "), Callsign::from_str("VE6VH "));
        // '*' is outside the alphabet and maps to the pad symbol
        assert_eq!(Callsign::from_str("A*B   "), Callsign::from_str("A B   "));
    }

    #[test]
    fn broadcast_literal() {
        assert_eq!(Callsign::from_str("FFFF"), Callsign::BROADCAST);
        assert!(NodeAddr::BROADCAST.is_broadcast());
    }

    #[test]
    fn extended_call_chunks() {
        let (first, ext) = encode_extended("VE6VH-EXTRA1");
        let ext = ext.unwrap();
        // two surplus words: one chunk plus the terminator
        assert_eq!(ext.len(), 8);
        assert_eq!(LittleEndian::read_u32(&ext[4..8]), 0xFF00_0000);

        let (full, consumed) = decode_extended(first, &ext);
        assert_eq!(consumed, 8);
        assert_eq!(full.as_str(), "VE6VH@EXTRA1");
    }

    #[test]
    fn plain_call_has_no_chunks() {
        let (first, ext) = encode_extended("VE6VH");
        assert!(ext.is_none());
        assert_eq!(first, Callsign::from_str("VE6VH"));
    }

    #[test]
    fn addr_wire_round_trip() {
        let addr = NodeAddr::new(Callsign::from_str("VE6VH "), 0x1234);
        let mut buf = [0u8; ADDR_SIZE];
        addr.write(&mut buf);
        assert_eq!(NodeAddr::read(&buf), addr);
    }

    #[test]
    fn ax25_overlay() {
        assert_eq!(NodeAddr::new(Callsign(1), 0xFFF3).ax25_ssid(), Some(3));
        assert_eq!(NodeAddr::new(Callsign(1), 0x1234).ax25_ssid(), None);
        // full broadcast is not an SSID match
        assert_eq!(NodeAddr::BROADCAST.ax25_ssid(), None);
    }
}
