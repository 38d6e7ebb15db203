//! Host UDP relay.
//!
//! The host daemon forwards reassembled node frames to an application as
//! UDP datagrams (block header plus assembled body) and accepts the same
//! shape back. Receive runs on a worker thread with a one-second socket
//! timeout; the worker only enqueues complete, validated frames onto a
//! single-producer single-consumer queue drained by the exchange loop.
//
// https://github.com/adrcs/ip400
// Copyright 2025 Alberta Digital Radio Communications Society

use std::boxed::Box;
use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use std::vec::Vec;

use heapless::spsc::{Consumer, Queue};
use log::{debug, warn};

use crate::hostlink::{Direction, HostFrame, EYE_NODE};

/// Frames buffered between the worker thread and the exchange loop
pub const UDP_QUEUE_DEPTH: usize = 16;

const MAX_DATAGRAM: usize = 1500;

/// UDP endpoint with a background receive worker
pub struct UdpRelay {
    socket: UdpSocket,
    remote: std::net::SocketAddr,
    exit: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    rx: Consumer<'static, HostFrame, UDP_QUEUE_DEPTH>,
}

impl UdpRelay {
    /// Bind the local port, resolve the peer and start the receive worker.
    /// The relay always speaks the node-side block shape: frames off the
    /// air keep their `IP4C` header and the application sends the same
    /// form back.
    pub fn open(host: &str, host_port: u16, local_port: u16) -> io::Result<Self> {
        let remote = (host, host_port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown host"))?;

        let socket = UdpSocket::bind(("0.0.0.0", local_port))?;
        socket.set_read_timeout(Some(Duration::from_secs(1)))?;

        let queue: &'static mut Queue<HostFrame, UDP_QUEUE_DEPTH> = Box::leak(Box::new(Queue::new()));
        let (mut producer, consumer) = queue.split();

        let exit = Arc::new(AtomicBool::new(false));
        let exit_flag = exit.clone();
        let rx_socket = socket.try_clone()?;

        let worker = std::thread::spawn(move || {
            let mut buf = [0u8; MAX_DATAGRAM];
            while !exit_flag.load(Ordering::SeqCst) {
                match rx_socket.recv_from(&mut buf) {
                    Ok((n, from)) => {
                        // check the packet header first
                        match HostFrame::from_datagram(&buf[..n], &EYE_NODE) {
                            Some(frame) => {
                                debug!("udp rx {} bytes from {}", n, from);
                                if producer.enqueue(frame).is_err() {
                                    warn!("udp rx queue full, datagram dropped");
                                }
                            }
                            None => debug!("udp rx {} bytes, not an IP400 frame", n),
                        }
                    }
                    Err(e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::TimedOut =>
                    {
                        // idle; loop around and re-check the exit flag
                    }
                    Err(e) => warn!("udp receive error: {}", e),
                }
            }
        });

        Ok(Self {
            socket,
            remote,
            exit,
            worker: Some(worker),
            rx: consumer,
        })
    }

    pub fn local_port(&self) -> io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Forward a reassembled frame as one datagram
    pub fn send(&self, frame: &HostFrame) -> io::Result<()> {
        let datagram: Vec<u8> = frame.to_datagram(Direction::Node);
        self.socket.send_to(&datagram, self.remote)?;
        Ok(())
    }

    /// Take the next frame the worker received, if any
    pub fn poll(&mut self) -> Option<HostFrame> {
        self.rx.dequeue()
    }
}

impl Drop for UdpRelay {
    fn drop(&mut self) {
        self.exit.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::{build_frame, Coding};

    #[test]
    fn relay_round_trip() {
        // an "application" endpoint on an ephemeral port
        let app = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        app.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let app_port = app.local_addr().unwrap().port();

        let mut relay = UdpRelay::open("127.0.0.1", app_port, 0).unwrap();
        let relay_port = relay.local_port().unwrap();

        let frame = build_frame("VE6VH", 1, "VA6AA", 2, Coding::Data, &[7u8; 40], false, 3);
        let hf = HostFrame::from_frame(&frame);

        // outbound: relay -> application
        relay.send(&hf).unwrap();
        let mut buf = [0u8; MAX_DATAGRAM];
        let (n, _) = app.recv_from(&mut buf).unwrap();
        let got = HostFrame::from_datagram(&buf[..n], b"IP4C").unwrap();
        assert_eq!(got, hf);

        // inbound: application -> relay worker -> poll
        app.send_to(&buf[..n], ("127.0.0.1", relay_port)).unwrap();
        let mut received = None;
        for _ in 0..200 {
            if let Some(f) = relay.poll() {
                received = Some(f);
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(received.unwrap(), hf);
    }

    #[test]
    fn bad_eye_dropped_by_worker() {
        let app = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let app_port = app.local_addr().unwrap().port();
        let mut relay = UdpRelay::open("127.0.0.1", app_port, 0).unwrap();
        let relay_port = relay.local_port().unwrap();

        let mut datagram = [0u8; 64];
        datagram[0..4].copy_from_slice(b"XXXX");
        app.send_to(&datagram, ("127.0.0.1", relay_port)).unwrap();

        std::thread::sleep(Duration::from_millis(200));
        assert!(relay.poll().is_none());
    }
}
