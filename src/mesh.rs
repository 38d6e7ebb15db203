//! Mesh table: the directory of peers heard on air.
//!
//! Entries are keyed by the sender's node address and carry the next
//! expected sequence number, which is what makes flood-repeat duplicate
//! suppression work.
//
// https://github.com/adrcs/ip400
// Copyright 2025 Alberta Digital Radio Communications Society

use heapless::Vec;
use log::{debug, warn};

use crate::callsign::NodeAddr;
use crate::config::Capabilities;
use crate::frame::Frame;
use crate::ip::ipv4_from_addr;
use crate::timer::TimeOfDay;

/// Memory dedicated to the table; capacity follows from the entry size
pub const MESH_MEMORY: usize = 2048;

/// RSSI register scaling: 95 - rx gain, approximately 65
pub const RSSI_SCALAR: i16 = 161;

/// A valid entry goes lost after this much silence
pub const LOST_AFTER_MS: u64 = 30 * 60_000;

/// A lost entry is dropped after this much silence
pub const UNUSED_AFTER_MS: u64 = 60 * 60_000;

/// Entry lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MeshState {
    Valid,
    Lost,
}

/// One station heard on air
#[derive(Clone, Debug, PartialEq)]
pub struct MeshEntry {
    pub state: MeshState,
    pub addr: NodeAddr,
    pub next_seq: u32,
    pub last_rssi: i16,
    pub tx_power: u8,
    pub capabilities: Capabilities,
    pub last_heard_ms: u64,
    pub last_heard: TimeOfDay,
    pub hop_count: u8,
    pub ip: [u8; 4],
}

pub const MAX_MESH_ENTRIES: usize = MESH_MEMORY / core::mem::size_of::<MeshEntry>();

/// Scale the hardware RSSI register to dBm
pub fn scale_rssi(raw: u32) -> i16 {
    (raw / 2) as i16 - RSSI_SCALAR
}

/// Matching rules for the lookup key
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshConfig {
    /// AX.25 compatibility: an all-ones-upper-nibble vpn with our SSID in
    /// the low nibble matches any entry sharing the callsign
    pub ax25_compat: bool,
    pub ssid: u8,
}

/// Fixed-capacity peer directory
pub struct MeshTable {
    config: MeshConfig,
    entries: Vec<MeshEntry, MAX_MESH_ENTRIES>,
}

impl MeshTable {
    pub fn new(config: MeshConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
        }
    }

    fn vpn_matches(&self, query: u16, entry: u16) -> bool {
        if query == 0xFFFF {
            return true;
        }
        if query == entry {
            return true;
        }
        self.config.ax25_compat && query & 0xFFF0 == 0xFFF0 && query & 0x0F == self.config.ssid as u16
    }

    /// Linear scan by (callsign, vpn). A broadcast vpn matches any entry
    /// with the callsign; ties go to the first match in insertion order.
    fn find(&self, addr: &NodeAddr) -> Option<usize> {
        let query = addr.vpn;
        self.entries
            .iter()
            .position(|e| e.addr.call == addr.call && self.vpn_matches(query, e.addr.vpn))
    }

    /// Select the k-th entry sharing a callsign, in insertion order
    pub fn find_indexed(&self, addr: &NodeAddr, k: usize) -> Option<&MeshEntry> {
        self.entries
            .iter()
            .filter(|e| e.addr.call == addr.call && self.vpn_matches(addr.vpn, e.addr.vpn))
            .nth(k)
    }

    fn insert(&mut self, frame: &Frame, rssi: i16, now_ms: u64, tod: TimeOfDay, beacon: bool) {
        let capabilities = if beacon && !frame.payload.is_empty() {
            Capabilities::from_byte(frame.payload[0])
        } else {
            Capabilities::empty()
        };
        let tx_power = if beacon && frame.payload.len() > 1 {
            frame.payload[1]
        } else {
            0
        };

        let entry = MeshEntry {
            state: MeshState::Valid,
            addr: frame.source,
            next_seq: next_seq_for(frame.seq),
            last_rssi: rssi,
            tx_power,
            capabilities,
            last_heard_ms: now_ms,
            last_heard: tod,
            hop_count: frame.flags.hop_count(),
            ip: ipv4_from_addr(&frame.source),
        };

        if self.entries.push(entry).is_err() {
            warn!("mesh table full, not adding {:?}", frame.source);
        }
    }

    /// Capture a beacon: refresh a known sender, or learn a new one.
    /// A repeated copy with a larger hop count never clobbers direct data.
    pub fn process_beacon(&mut self, frame: &Frame, rssi_raw: u32, now_ms: u64, tod: TimeOfDay) {
        let rssi = scale_rssi(rssi_raw);

        if let Some(i) = self.find(&frame.source) {
            let entry = &mut self.entries[i];
            if entry.hop_count < frame.flags.hop_count() {
                return;
            }

            entry.state = MeshState::Valid;
            entry.last_heard_ms = now_ms;
            entry.last_heard = tod;
            entry.last_rssi = rssi;
            entry.next_seq = next_seq_for(frame.seq);
            if !frame.payload.is_empty() {
                entry.capabilities = Capabilities::from_byte(frame.payload[0]);
            }
            if frame.payload.len() > 1 {
                entry.tx_power = frame.payload[1];
            }
            return;
        }

        debug!("new station {:?}", frame.source);
        self.insert(frame, rssi, now_ms, tod, true);
    }

    /// Accept or reject an inbound frame.
    ///
    /// Frames not addressed to us (or broadcast) are rejected outright;
    /// for the rest the sender's sequence must not have gone backwards.
    /// Unknown senders are learned with empty capabilities.
    pub fn accept(
        &mut self,
        frame: &Frame,
        rssi_raw: u32,
        now_ms: u64,
        tod: TimeOfDay,
        local: &NodeAddr,
    ) -> Accept {
        if !frame.dest.call.is_broadcast() && frame.dest.call != local.call {
            return Accept::NotForUs;
        }

        if let Some(i) = self.find(&frame.source) {
            let entry = &mut self.entries[i];
            // all-ones means the sender rebooted
            if frame.seq == u32::MAX {
                entry.next_seq = 0;
            }
            if frame.seq < entry.next_seq {
                return Accept::Duplicate;
            }
            entry.next_seq = frame.seq.wrapping_add(1);
            entry.state = MeshState::Valid;
            entry.last_heard_ms = now_ms;
            entry.last_heard = tod;
            entry.last_rssi = scale_rssi(rssi_raw);
            return Accept::Accepted;
        }

        // sender is unknown: add him for now
        self.insert(frame, scale_rssi(rssi_raw), now_ms, tod, false);
        Accept::Accepted
    }

    /// Periodic scan: silence turns valid entries lost, then drops them
    pub fn tick(&mut self, now_ms: u64) {
        for entry in self.entries.iter_mut() {
            if entry.state == MeshState::Valid
                && now_ms.saturating_sub(entry.last_heard_ms) >= LOST_AFTER_MS
            {
                debug!("station {:?} lost", entry.addr);
                entry.state = MeshState::Lost;
            }
        }
        let expired = self.entries.iter().any(|e| {
            e.state == MeshState::Lost && now_ms.saturating_sub(e.last_heard_ms) >= UNUSED_AFTER_MS
        });
        if expired {
            // rebuild in insertion order; indexed lookup depends on it
            let mut kept: Vec<MeshEntry, MAX_MESH_ENTRIES> = Vec::new();
            for e in self.entries.iter() {
                if e.state == MeshState::Lost
                    && now_ms.saturating_sub(e.last_heard_ms) >= UNUSED_AFTER_MS
                {
                    continue;
                }
                let _ = kept.push(e.clone());
            }
            self.entries = kept;
        }
    }

    /// Enumerate entries for display
    pub fn entries(&self) -> impl Iterator<Item = &MeshEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of the acceptance check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accept {
    /// Addressed to us (or broadcast) and in sequence
    Accepted,
    /// Addressed to another station; not dispatched, still repeatable
    NotForUs,
    /// Sequence went backwards; never dispatched, never repeated
    Duplicate,
}

/// Next expected sequence after hearing `seq`
fn next_seq_for(seq: u32) -> u32 {
    if seq == u32::MAX {
        0
    } else {
        seq + 1
    }
}
