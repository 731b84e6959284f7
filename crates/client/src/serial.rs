//! CDC serial transport and port discovery
//!
//! The CDC path presents the device as a USB serial port. This module opens
//! the port with the DTR wake toggle the firmware listens for, adapts it to
//! [`ByteTransport`], and provides the discovery helpers: enumeration,
//! activity sniffing to disambiguate between several candidate ports, and a
//! bounded wait-for-device loop.

use crate::commands::cdc;
use crate::error::{ClientError, Result};
use crate::reader::ByteTransport;
use serialport::{ClearBuffer, SerialPort, SerialPortType};
use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default CDC baud rate; the link is USB-native, the number only scales
/// read-deadline estimates
pub const DEFAULT_BAUD: u32 = 115_200;

/// Serial transport over a CDC ACM port
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    baudrate: u32,
}

impl SerialTransport {
    /// Open a port with a short poll timeout and the DTR wake toggle
    pub fn open(path: &str, baudrate: u32) -> Result<Self> {
        let mut port = serialport::new(path, baudrate)
            .timeout(Duration::from_millis(100))
            .open()?;
        let _ = port.clear(ClearBuffer::Input);
        // DTR low-then-high acts as a soft trigger on listening firmware
        let _ = port.write_data_terminal_ready(false);
        thread::sleep(Duration::from_millis(20));
        let _ = port.write_data_terminal_ready(true);
        info!(path, baudrate, "opened CDC port");
        Ok(Self { port, baudrate })
    }

    /// Send a CDC command and collect its response
    ///
    /// Stream-aware: reads with the port's short timeout and reports a
    /// missing response as a timeout error instead of wedging the session.
    pub fn send_command(&mut self, opcode: u8, payload: &[u8]) -> Result<CdcResponse> {
        let mut pkt = Vec::with_capacity(1 + payload.len());
        pkt.push(opcode);
        pkt.extend_from_slice(payload);
        self.port.write_all(&pkt)?;
        self.port.flush()?;

        let mut id = [0u8; 1];
        self.read_response(&mut id, "response id")?;
        match id[0] {
            cdc::RSP_ACK => {
                let mut echo = [0u8; 1];
                self.read_response(&mut echo, "ack echo")?;
                if echo[0] != opcode {
                    return Err(ClientError::Framing(format!(
                        "ACK echo mismatch: got {:#04x}, expected {:#04x}",
                        echo[0], opcode
                    )));
                }
                Ok(CdcResponse::Ack)
            }
            cdc::RSP_NACK => {
                let mut body = [0u8; 2];
                self.read_response(&mut body, "nack body")?;
                Ok(CdcResponse::Nack(body[1]))
            }
            cdc::RSP_STATUS => {
                let mut buf = [0u8; 256];
                let n = match self.port.read(&mut buf) {
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
                    Err(e) => return Err(e.into()),
                };
                Ok(CdcResponse::Status(buf[..n].to_vec()))
            }
            other => Ok(CdcResponse::Unknown(other)),
        }
    }

    fn read_response(&mut self, buf: &mut [u8], what: &'static str) -> Result<()> {
        match self.port.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                Err(ClientError::TransportTimeout(what))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl ByteTransport for SerialTransport {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn byte_rate(&self) -> f64 {
        // 10 bits per byte on the virtual line
        (self.baudrate as f64 / 10.0).max(1.0)
    }
}

/// Response to a CDC command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CdcResponse {
    Ack,
    /// NACK with the device's error code
    Nack(u8),
    /// STATUS response body
    Status(Vec<u8>),
    /// Unrecognized response id (mid-stream bytes)
    Unknown(u8),
}

/// List candidate CDC ports (USB serial devices), sorted by name
pub fn list_ports() -> Result<Vec<String>> {
    let mut ports: Vec<String> = serialport::available_ports()?
        .into_iter()
        .filter(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
        .map(|p| p.port_name)
        .collect();
    ports.sort();
    Ok(ports)
}

/// Byte-traffic sample from one port
#[derive(Debug, Clone)]
pub struct SniffReport {
    pub port: String,
    pub total: usize,
    pub sample: Vec<u8>,
}

/// Count incoming bytes on a port for a short window
///
/// The port is opened fresh and closed again; errors count as silence so a
/// busy or vanishing port never aborts discovery.
pub fn sniff_port(path: &str, window: Duration, sample_limit: usize) -> SniffReport {
    let mut report = SniffReport {
        port: path.to_string(),
        total: 0,
        sample: Vec::new(),
    };
    let Ok(mut port) = serialport::new(path, DEFAULT_BAUD)
        .timeout(Duration::from_millis(50))
        .open()
    else {
        return report;
    };
    let deadline = Instant::now() + window;
    let mut buf = [0u8; 256];
    while Instant::now() < deadline {
        match port.read(&mut buf) {
            Ok(0) => thread::sleep(Duration::from_millis(20)),
            Ok(n) => {
                report.total += n;
                let room = sample_limit.saturating_sub(report.sample.len());
                report.sample.extend_from_slice(&buf[..n.min(room)]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                thread::sleep(Duration::from_millis(20))
            }
            Err(_) => break,
        }
    }
    report
}

/// Choose among several candidate ports by sampled activity
///
/// Returns the busiest port when any of them shows traffic, otherwise the
/// first candidate.
pub fn pick_active_port(candidates: &[String], window: Duration) -> Option<String> {
    let first = candidates.first()?.clone();
    if candidates.len() == 1 {
        return Some(first);
    }
    let mut reports: Vec<SniffReport> = candidates
        .iter()
        .map(|p| sniff_port(p, window, 0))
        .collect();
    reports.sort_by(|a, b| b.total.cmp(&a.total));
    let busiest = &reports[0];
    if busiest.total > 0 {
        debug!(port = %busiest.port, bytes = busiest.total, "selected port by activity");
        Some(busiest.port.clone())
    } else {
        Some(first)
    }
}

/// Poll until a CDC port appears, up to an optional deadline
pub fn wait_for_port(poll: Duration, deadline: Option<Duration>) -> Result<String> {
    let until = deadline.map(|d| Instant::now() + d);
    loop {
        let candidates = list_ports()?;
        if !candidates.is_empty() {
            if let Some(port) = pick_active_port(&candidates, Duration::from_millis(300)) {
                info!(%port, "CDC port found");
                return Ok(port);
            }
        }
        if until.is_some_and(|t| Instant::now() >= t) {
            return Err(ClientError::TransportTimeout("CDC port discovery"));
        }
        thread::sleep(poll);
    }
}
