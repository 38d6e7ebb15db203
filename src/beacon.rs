//! Beacon emitter.
//!
//! Counts scheduler ticks down from the configured interval and then
//! broadcasts the station's capabilities, firmware version and position.
//! Position text comes from a held GPS fix when there is one, otherwise
//! from the configured coordinates, formatted DDMM.MMMMM with hemisphere.
//
// https://github.com/adrcs/ip400
// Copyright 2025 Alberta Digital Radio Communications Society

use core::fmt::Write;

use alloc::vec::Vec;

use log::debug;

use heapless::String;

use crate::config::{RadioConfig, StationConfig};
use crate::frame::{build_beacon, SeqCounter};
use crate::queue::FrameQueue;
use crate::timer::TimeOfDay;

/// Longest beacon text
pub const MAX_BEACON: usize = 80;

const GPS_FIX_LEN: usize = 20;

/// A position snapshot extracted from the GPS sentences. The fields are
/// already in the NMEA DDMM form with the hemisphere appended.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GpsFix {
    pub latitude: String<GPS_FIX_LEN>,
    pub longitude: String<GPS_FIX_LEN>,
    pub fix_time: String<GPS_FIX_LEN>,
}

/// Format a signed decimal-degree value as DDMM.MMMMM with hemisphere
pub fn format_position(buffer: &mut String<MAX_BEACON>, value: f64, pos_hemi: char, neg_hemi: char) {
    let hemi = if value > 0.0 { pos_hemi } else { neg_hemi };
    let value = if value < 0.0 { -value } else { value };

    let whole = value as u32;
    let fract = value - whole as f64;

    // minutes rounded to two places, fraction carried to five digits
    let mut dmin = 60.0 * fract;
    dmin = ((dmin * 100.0 + 0.5) as u32) as f64 / 100.0;

    let min = dmin as u32;
    let scaled = (dmin - min as f64) * 100_000.0;
    let mut ifract = scaled as u32;
    if (ifract as f64) < scaled {
        ifract += 1;
    }

    let _ = write!(buffer, "{}{:02}.{:05}{}", whole, min, ifract, hemi);
}

/// Periodic beacon source
pub struct BeaconTask {
    reload: u32,
    counter: u32,
}

impl BeaconTask {
    /// The countdown runs in scheduler ticks of `tick_ms`
    pub fn new(interval_min: u16, tick_ms: u32) -> Self {
        let ticks_per_min = 60_000 / tick_ms.max(1);
        Self {
            reload: interval_min as u32 * ticks_per_min,
            // first beacon goes out on the first tick
            counter: 0,
        }
    }

    pub fn set_interval(&mut self, interval_min: u16, tick_ms: u32) {
        self.reload = interval_min as u32 * (60_000 / tick_ms.max(1));
    }

    /// Arm an immediate beacon
    pub fn force(&mut self) {
        self.counter = 0;
    }

    /// Assemble the payload: capability byte, TX power, firmware version,
    /// then the position dialect
    fn payload(
        &self,
        station: &StationConfig,
        radio: &RadioConfig,
        gps: Option<&GpsFix>,
        tod: TimeOfDay,
    ) -> Vec<u8> {
        let mut payload = Vec::with_capacity(4 + MAX_BEACON);
        payload.push(station.capabilities.to_byte());
        payload.push(radio.output_power_dbm);
        payload.push(station.firmware.0 + b'0');
        payload.push(station.firmware.1 + b'0');

        let mut text: String<MAX_BEACON> = String::new();
        match gps {
            Some(fix) => {
                let _ = write!(
                    text,
                    "GPS,{},{},{},",
                    fix.latitude, fix.longitude, fix.fix_time
                );
            }
            None => {
                let _ = text.push_str("FXD,");
                format_position(&mut text, station.latitude, 'N', 'S');
                let _ = text.push(',');
                format_position(&mut text, station.longitude, 'E', 'W');
                let _ = text.push(',');
            }
        }

        let _ = write!(
            text,
            ",{:02}{:02}{:02},{}",
            tod.hours, tod.minutes, tod.seconds, station.grid_square
        );

        payload.extend_from_slice(text.as_bytes());
        payload
    }

    /// One scheduler tick. Enqueues a broadcast beacon when the countdown
    /// reaches zero; returns whether one was sent.
    pub fn step(
        &mut self,
        station: &StationConfig,
        radio: &RadioConfig,
        gps: Option<&GpsFix>,
        tod: TimeOfDay,
        local_vpn: u16,
        seq: &mut SeqCounter,
        radio_tx: &mut FrameQueue,
    ) -> bool {
        if self.counter > 0 {
            self.counter -= 1;
            return false;
        }
        self.counter = self.reload;

        let payload = self.payload(station, radio, gps, tod);
        debug!("beacon: {} payload bytes", payload.len());

        let frame = build_beacon(&station.callsign, local_vpn, &payload, seq.next());
        radio_tx.enque(frame)
    }
}
