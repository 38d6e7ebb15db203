//! Station and radio configuration.
//
// https://github.com/adrcs/ip400
// Copyright 2025 Alberta Digital Radio Communications Society

use bitflags::bitflags;
use heapless::String;
use strum::Display;

use crate::callsign::{EXT_CALL, MAX_CALL};

/// Description field limit
pub const MAX_DESC: usize = 32;

/// Grid square field limit
pub const MAX_GRID: usize = 10;

bitflags! {
    /// Station capability bits advertised in the beacon header
    pub struct CapFlags: u8 {
        const FSK    = 0x01;
        const OFDM   = 0x02;
        const AX25   = 0x04;
        const REPEAT = 0x08;
    }
}

/// Capability byte: mode bits plus the AX.25 SSID nibble
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Capabilities {
    pub flags: CapFlags,
    pub ssid: u8,
}

impl Capabilities {
    pub fn to_byte(&self) -> u8 {
        self.flags.bits() | (self.ssid & 0x0F) << 4
    }

    pub fn from_byte(byte: u8) -> Self {
        Self {
            flags: CapFlags::from_bits_truncate(byte & 0x0F),
            ssid: byte >> 4,
        }
    }

    pub fn empty() -> Self {
        Self {
            flags: CapFlags::empty(),
            ssid: 0,
        }
    }

    /// Human form for the mesh listing
    pub fn describe(&self) -> String<24> {
        let mut s: String<24> = String::new();
        if self.flags.contains(CapFlags::FSK) {
            let _ = s.push_str("FSK");
        } else if self.flags.contains(CapFlags::OFDM) {
            let _ = s.push_str("OFDM");
        } else {
            let _ = s.push_str("Unknown");
        }
        if self.flags.contains(CapFlags::REPEAT) {
            let _ = s.push_str(" RPT");
        }
        s
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            flags: CapFlags::FSK | CapFlags::REPEAT,
            ssid: 0,
        }
    }
}

/// Modulation selector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Modulation {
    Fsk2,
    Fsk4,
    Gfsk2,
    Gfsk4,
    Ask,
    Ook,
    /// Unmodulated carrier, transmit test only
    Cw,
}

/// PA drive mode selector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PaDriveMode {
    Tx,
    TxHp,
    DualTxHp,
}

/// Rejected configuration fields
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Callsign,
    BeaconInterval(u16),
    Frequency(u32),
    DataRate(u32),
    Deviation(u32),
    Bandwidth(u32),
    OutputPower(u8),
    Squelch(i16),
}

/// Station identity and beacon data
#[derive(Clone, Debug, PartialEq)]
pub struct StationConfig {
    pub callsign: String<EXT_CALL>,
    pub description: String<MAX_DESC>,
    pub latitude: f64,
    pub longitude: f64,
    pub grid_square: String<MAX_GRID>,
    /// Beacon interval in minutes, 1-100
    pub beacon_interval_min: u16,
    pub capabilities: Capabilities,
    pub firmware: (u8, u8),
}

impl Default for StationConfig {
    fn default() -> Self {
        let mut callsign = String::new();
        let _ = callsign.push_str("NOCALL");
        Self {
            callsign,
            description: String::new(),
            latitude: 53.5461,
            longitude: -113.4938,
            grid_square: String::new(),
            beacon_interval_min: 10,
            capabilities: Capabilities::default(),
            firmware: (0, 1),
        }
    }
}

impl StationConfig {
    /// Repeat frames by default
    pub fn repeat_default(&self) -> bool {
        self.capabilities.flags.contains(CapFlags::REPEAT)
    }

    /// AX.25 compatibility addressing with SSID
    pub fn ax25_compat(&self) -> bool {
        self.capabilities.flags.contains(CapFlags::AX25)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let len = self.callsign.len();
        if len < 4 || len > MAX_CALL {
            return Err(ConfigError::Callsign);
        }
        if self.beacon_interval_min < 1 || self.beacon_interval_min > 100 {
            return Err(ConfigError::BeaconInterval(self.beacon_interval_min));
        }
        Ok(())
    }
}

/// Radio front-end parameters
#[derive(Clone, Debug, PartialEq)]
pub struct RadioConfig {
    pub frequency_hz: u32,
    pub modulation: Modulation,
    pub datarate_bps: u32,
    pub deviation_hz: u32,
    pub bandwidth_hz: u32,
    pub pa_drive: PaDriveMode,
    pub output_power_dbm: u8,
    pub rx_squelch_dbm: i16,
    /// US band plan lowers the frequency floor to 420 MHz
    pub us_band: bool,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 434_000_000,
            modulation: Modulation::Fsk4,
            datarate_bps: 100_000,
            deviation_hz: 25_000,
            bandwidth_hz: 200_000,
            pa_drive: PaDriveMode::Tx,
            output_power_dbm: 14,
            rx_squelch_dbm: -95,
            us_band: false,
        }
    }
}

impl RadioConfig {
    pub fn min_frequency(&self) -> u32 {
        if self.us_band {
            420_000_000
        } else {
            430_000_000
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frequency_hz < self.min_frequency() {
            return Err(ConfigError::Frequency(self.frequency_hz));
        }
        if self.datarate_bps < 9_600 || self.datarate_bps > 600_000 {
            return Err(ConfigError::DataRate(self.datarate_bps));
        }
        if self.deviation_hz < 12_500 || self.deviation_hz > 150_000 {
            return Err(ConfigError::Deviation(self.deviation_hz));
        }
        if self.bandwidth_hz < 2_600 || self.bandwidth_hz > 1_600_000 {
            return Err(ConfigError::Bandwidth(self.bandwidth_hz));
        }
        if self.output_power_dbm > 20 {
            return Err(ConfigError::OutputPower(self.output_power_dbm));
        }
        if self.rx_squelch_dbm < -115 || self.rx_squelch_dbm > 0 {
            return Err(ConfigError::Squelch(self.rx_squelch_dbm));
        }
        Ok(())
    }
}
