//! IP400 packet radio node stack.
//!
//! A node owns a sub-GHz transceiver and takes part in a store-and-forward
//! mesh: it advertises itself with periodic beacons, learns its peers,
//! suppresses duplicates, floods repeatable frames up to a bounded hop
//! count, derives a private-range IPv4 address from its identity, and
//! relays frames to an external host over a fragmented block exchange.
//
// https://github.com/adrcs/ip400
// Copyright 2025 Alberta Digital Radio Communications Society

#![no_std]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod timer;

pub mod callsign;

pub mod ip;

pub mod frame;

pub mod queue;

pub mod config;

pub mod mesh;

pub mod subg;

pub mod dispatch;

pub mod hostlink;

pub mod beacon;

pub mod node;

#[cfg(feature = "std")]
pub mod udp;

pub mod prelude;
