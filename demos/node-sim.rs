//! Two simulated nodes on a shared channel.
//!
//! Drives a pair of nodes over mock radios: both beacon, learn each other,
//! trade a text message and an echo, and print their mesh tables. Useful
//! for watching the stack work without hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;

use structopt::StructOpt;

use ip400::prelude::*;
use ip400::subg::mock::MockRadio;
use ip400::subg::{IrqStatus, RadioCommand};
use ip400::timer::mock::MockTimer;

#[derive(Debug, StructOpt)]
struct Options {
    #[structopt(long, default_value = "debug")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,

    #[structopt(long, default_value = "200")]
    /// Simulated scheduler ticks to run
    pub ticks: u32,
}

const TICK_MS: u64 = 10;

struct SimNode {
    node: Node<MockRadio, MockTimer>,
    timer: MockTimer,
    tx_seen: usize,
}

impl SimNode {
    fn new(call: &str, device_word: u32) -> anyhow::Result<Self> {
        let mut station = StationConfig::default();
        station.callsign.clear();
        let _ = station.callsign.push_str(call);
        station.beacon_interval_min = 1;
        station.validate().map_err(|e| anyhow::anyhow!("{:?}", e))?;

        let timer = MockTimer::new();
        let node = Node::new(
            station,
            RadioConfig::default(),
            MockRadio::new(),
            timer.clone(),
            device_word,
            TICK_MS as u32,
        );

        Ok(Self {
            node,
            timer,
            tx_seen: 0,
        })
    }

    /// One tick; returns a raw image if this node just keyed up
    fn tick(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        self.timer.advance_ms(TICK_MS);
        self.node
            .tick()
            .map_err(|e| anyhow::anyhow!("link error: {:?}", e))?;

        let radio = self.node.radio_mut();
        let txs = radio
            .strobes
            .iter()
            .filter(|c| **c == RadioCommand::Tx)
            .count();
        if txs > self.tx_seen {
            self.tx_seen = txs;
            let image = radio.loaded[radio.last_loaded].clone();
            radio.irq_pending |= IrqStatus::TX_DONE;
            self.node.radio_irq().map_err(|_| anyhow::anyhow!("irq"))?;
            return Ok(Some(image));
        }
        Ok(None)
    }

    /// Deliver a raw image off the shared channel
    fn receive(&mut self, image: &[u8], rssi: u32) -> anyhow::Result<()> {
        if self.node.link_state() != SubGState::RxActive {
            // radio busy transmitting; the frame is lost on the air
            return Ok(());
        }
        self.node.radio_mut().inject_rx(0, image, rssi);
        self.node.radio_irq().map_err(|_| anyhow::anyhow!("irq"))?;
        Ok(())
    }

    fn stats_line(&self) -> String {
        let s = self.node.stats();
        format!(
            "tx {} rx {} ok {} beacons {} repeated {} dropped {} dup {}",
            s.tx_frames, s.rx_frames, s.frames_ok, s.beacons, s.repeated, s.dropped, s.duplicates
        )
    }

    fn print_mesh(&self) {
        let call = self.node.station().callsign.clone();
        info!("mesh table at {}:", call.as_str());
        for entry in self.node.mesh_entries() {
            info!(
                "  {} ({:04X})  {}.{}.{}.{}  {} dBm  seq {}  hops {}  {}",
                entry.addr.call.decode().as_str(),
                entry.addr.vpn,
                entry.ip[0],
                entry.ip[1],
                entry.ip[2],
                entry.ip[3],
                entry.last_rssi,
                entry.next_seq,
                entry.hop_count,
                entry.capabilities.describe().as_str(),
            );
        }
    }
}

fn main() -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let opts = Options::from_args();
    let _ = simplelog::SimpleLogger::init(opts.log_level, simplelog::Config::default());

    info!("Starting node simulation");

    let mut a = SimNode::new("VE6VH", 0x1234_5678)?;
    let mut b = SimNode::new("VA6AA", 0x9ABC_DEF0)?;

    let mut sent_text = false;
    let mut sent_echo = false;

    for tick in 0..opts.ticks {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        if let Some(image) = a.tick()? {
            b.receive(&image, 220)?;
        }
        if let Some(image) = b.tick()? {
            a.receive(&image, 205)?;
        }

        // once the beacons have crossed, exercise chat and echo
        if tick == 50 && !sent_text {
            sent_text = true;
            let dest = b.node.local_addr();
            a.node.send_text("VA6AA", dest.vpn, b"hello from VE6VH");
        }
        if tick == 100 && !sent_echo {
            sent_echo = true;
            let dest = a.node.local_addr();
            b.node.send_echo_request("VE6VH", dest.vpn, b"echo test");
        }

        while let Some(chat) = b.node.poll_chat() {
            info!(
                "VA6AA chat rx: {}",
                String::from_utf8_lossy(&chat.payload)
            );
        }
        while let Some(chat) = a.node.poll_chat() {
            info!(
                "VE6VH chat rx: {}",
                String::from_utf8_lossy(&chat.payload)
            );
        }
    }

    a.print_mesh();
    b.print_mesh();

    info!("VE6VH stats: {}", a.stats_line());
    info!("VA6AA stats: {}", b.stats_line());

    Ok(())
}
