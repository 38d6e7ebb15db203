//! IP400 host-side daemon.
//!
//! Exchanges blocks with the node over spidev and relays reassembled
//! frames to an application as UDP datagrams, accepting the same shape
//! back for transmission on air.
//
// https://github.com/adrcs/ip400
// Copyright 2025 Alberta Digital Radio Communications Society

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, error, info, warn};

use humantime::Duration;
use structopt::StructOpt;

use linux_embedded_hal::spidev::{self, SpiModeFlags, SpidevOptions, SpidevTransfer};

use ip400::hostlink::{Block, Direction, HostLink, SPI_RAW_LEN};
use ip400::udp::UdpRelay;

#[derive(Debug, StructOpt)]
struct Options {
    #[structopt(long, default_value = "/dev/spidev0.0")]
    /// SPI device connected to the node
    pub spi_dev: String,

    #[structopt(long, default_value = "500000")]
    /// SPI clock in Hz
    pub spi_speed: u32,

    #[structopt(long, default_value = "127.0.0.1")]
    /// Application host for reassembled frames
    pub host: String,

    #[structopt(long, default_value = "9000")]
    /// Application port
    pub host_port: u16,

    #[structopt(long, default_value = "9001")]
    /// Local port for frames from the application
    pub local_port: u16,

    #[structopt(long, default_value = "10ms")]
    /// Exchange interval
    pub tick: Duration,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

fn main() -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    // Bind exit handler
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    // Load options
    let opts = Options::from_args();

    // Initialise logging
    let _ = simplelog::SimpleLogger::init(opts.log_level, simplelog::Config::default());

    info!("Starting ip400spid on {}", opts.spi_dev);

    // SPI device, mode 0, 8 bits
    let mut spi = spidev::Spidev::open(&opts.spi_dev)?;
    spi.configure(
        &SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(opts.spi_speed)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build(),
    )?;

    // UDP relay to the application
    let mut relay = UdpRelay::open(&opts.host, opts.host_port, opts.local_port)?;

    let tick_ms = (opts.tick.as_millis() as u32).max(1);
    let mut hostlink = HostLink::new(Direction::Host, tick_ms);
    let mut outbound = Block::empty(Direction::Host);

    while running.load(Ordering::SeqCst) {
        // frames from the application go onto the outbound queue
        while let Some(frame) = relay.poll() {
            if !hostlink.enque_host_frame(frame) {
                warn!("node link down, frame from application dropped");
            }
        }

        // one full-duplex block exchange with the node
        let mut raw = [0u8; SPI_RAW_LEN];
        let result = {
            let mut xfer = SpidevTransfer::read_write(&outbound.0, &mut raw);
            spi.transfer(&mut xfer)
        };

        match result {
            Ok(()) => {
                let inbound = Block(raw);
                let (next, received) = hostlink.exchange(&inbound);
                outbound = next;

                if let Some(frame) = received {
                    debug!("frame from node, {} body bytes", frame.body.len());
                    if let Err(e) = relay.send(&frame) {
                        error!("relay send failed: {}", e);
                    }
                }
            }
            Err(e) => {
                error!("SPI transfer error: {}", e);
                hostlink.idle_tick();
            }
        }

        thread::sleep(*opts.tick);
    }

    info!("ip400spid exiting");
    Ok(())
}
