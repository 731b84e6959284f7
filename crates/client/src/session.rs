//! USB session controller for the vendor-bulk stream
//!
//! Owns the device handle for one session: discovery, alt-setting
//! negotiation with its three-tier fallback, readiness polling, command
//! dispatch, the background reader thread and its watchdog-driven
//! auto-recovery, and best-effort shutdown.
//!
//! One background thread owns the transport read loop, deframing and stereo
//! reassembly; it never blocks on consumer speed. Control and command calls
//! run on whichever thread invokes them. Connectivity loss is exposed as
//! polled state (`disconnected`) rather than an exception so the owner's
//! reconnection loop can act on its own schedule.

use crate::commands::{self, Command};
use crate::deframer::{ContinuousDeframer, DeframeEvent};
use crate::error::{ClientError, Result, classify_usb_error};
use crate::stereo::{PAIR_QUEUE_CAPACITY, StereoAssembler, StereoQueue};
use crate::watchdog::{Watchdog, WatchdogAction};
use common::StreamConfig;
use crossbeam_channel::{Receiver, Sender, bounded};
use protocol::{StatusBlock, StereoPair};
use rusb::{Context, Device, DeviceHandle, Direction, Recipient, RequestType, TransferType, UsbContext};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Vendor bulk IN endpoint
pub const EP_IN: u8 = 0x83;
/// Vendor bulk OUT endpoint
pub const EP_OUT: u8 = 0x03;

const BULK_READ_LEN: usize = 4096;
const BULK_READ_TIMEOUT: Duration = Duration::from_secs(1);
const CMD_TIMEOUT: Duration = Duration::from_secs(1);
const CTRL_TIMEOUT: Duration = Duration::from_millis(300);
const SOFT_RESET_TIMEOUT: Duration = Duration::from_millis(500);
const DEEP_RESET_TIMEOUT: Duration = Duration::from_millis(800);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(7);
const INTER_COMMAND_PAUSE: Duration = Duration::from_millis(20);
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);
/// If only STAT/diagnostic traffic appeared this long after connecting,
/// re-send the start sequence once
const FALLBACK_START_AFTER: Duration = Duration::from_millis(1600);
const CMD_RETRIES: u32 = 3;
const ALT_RETRIES: u32 = 2;
/// Standard SET_INTERFACE request, used for the raw-control fallback tier
const REQ_SET_INTERFACE: u8 = 0x0B;

/// USB topology of the opened device, for external power-cycle tooling
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub vid: u16,
    pub pid: u16,
    pub bus: u8,
    pub address: u8,
    pub port_numbers: Vec<u8>,
    /// sysfs-style path like `1-1.3.2`
    pub port_path: Option<String>,
    /// Location of the parent hub, `1-1.3` for the path above
    pub hub_location: Option<String>,
    /// Port number on the parent hub
    pub hub_port: Option<u8>,
}

impl PortInfo {
    fn from_device(device: &Device<Context>, vid: u16, pid: u16) -> Self {
        let bus = device.bus_number();
        let address = device.address();
        let ports = device.port_numbers().unwrap_or_default();

        let join = |list: &[u8]| {
            list.iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(".")
        };
        let port_path = (!ports.is_empty()).then(|| format!("{}-{}", bus, join(&ports)));
        let hub_location = match ports.len() {
            0 => None,
            1 => Some(format!("{}-{}", bus, ports[0])),
            n => Some(format!("{}-{}", bus, join(&ports[..n - 1]))),
        };
        let hub_port = ports.last().copied();

        Self {
            vid,
            pid,
            bus,
            address,
            port_numbers: ports,
            port_path,
            hub_location,
            hub_port,
        }
    }
}

/// One-second counter snapshot published by the reader thread
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterSnapshot {
    pub frames: u64,
    pub bytes: u64,
    pub crc_bad: u64,
    pub magic_bad: u64,
    pub test_seen: u64,
    pub seq_gaps: u64,
    /// Frames waiting for their partner in the assembler
    pub pending: usize,
    /// Pairs currently queued for the consumer
    pub queued: usize,
    /// Pairs dropped because the consumer fell behind
    pub dropped_pairs: u64,
    pub restart_attempts: u32,
}

struct DiscoveredDevice {
    device: Device<Context>,
    config_value: u8,
    iface: u8,
}

/// Find a configuration/interface carrying the bulk endpoint pair
fn find_stream_interface(device: &Device<Context>, iface_prefer: Option<u8>) -> Option<(u8, u8)> {
    let descriptor = device.device_descriptor().ok()?;
    let mut matches: Vec<(u8, u8)> = Vec::new();
    for index in 0..descriptor.num_configurations() {
        let Ok(config) = device.config_descriptor(index) else {
            continue;
        };
        for interface in config.interfaces() {
            for alt in interface.descriptors() {
                let mut has_in = false;
                let mut has_out = false;
                for endpoint in alt.endpoint_descriptors() {
                    if endpoint.transfer_type() != TransferType::Bulk {
                        continue;
                    }
                    match endpoint.address() {
                        EP_IN => has_in = true,
                        EP_OUT => has_out = true,
                        _ => {}
                    }
                }
                if has_in && has_out {
                    matches.push((config.number(), interface.number()));
                }
            }
        }
    }
    matches.dedup();
    if let Some(prefer) = iface_prefer
        && let Some(found) = matches.iter().find(|(_, iface)| *iface == prefer)
    {
        return Some(*found);
    }
    matches.first().copied()
}

/// Locate the device: exact VID/PID preferred, any-device scan optional
fn discover(context: &Context, config: &StreamConfig) -> Result<DiscoveredDevice> {
    let devices = context.devices()?;

    for device in devices.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        if descriptor.vendor_id() == config.vid && descriptor.product_id() == config.pid {
            let Some((config_value, iface)) = find_stream_interface(&device, config.iface_prefer)
            else {
                return Err(ClientError::NoInterface(format!(
                    "device {:04x}:{:04x} present but has no bulk {:#04x}/{:#04x} pair",
                    config.vid, config.pid, EP_IN, EP_OUT
                )));
            };
            info!(
                vid = format_args!("{:04x}", config.vid),
                pid = format_args!("{:04x}", config.pid),
                config_value,
                iface,
                "opened exact device match"
            );
            return Ok(DiscoveredDevice {
                device,
                config_value,
                iface,
            });
        }
    }

    if !config.allow_any {
        return Err(ClientError::NoDevice);
    }

    let mut candidates = Vec::new();
    for device in devices.iter() {
        if let Some(found) = find_stream_interface(&device, config.iface_prefer) {
            candidates.push((device, found));
        }
    }
    if candidates.is_empty() {
        return Err(ClientError::NoDevice);
    }
    if candidates.len() > 1 {
        for (device, (config_value, iface)) in &candidates {
            let id = device
                .device_descriptor()
                .map(|d| format!("{:04x}:{:04x}", d.vendor_id(), d.product_id()))
                .unwrap_or_else(|_| "????:????".into());
            info!(
                device = %id,
                bus = device.bus_number(),
                address = device.address(),
                config_value,
                iface,
                "endpoint-pair candidate"
            );
        }
        info!("multiple candidates, picking the first by bus order");
    }
    let (device, (config_value, iface)) = candidates.swap_remove(0);
    Ok(DiscoveredDevice {
        device,
        config_value,
        iface,
    })
}

/// Device handle plus the cross-thread session state
///
/// Shared between the controller and the reader thread; every method takes
/// `&self`. Only `disconnected` and the last-RX clock are read from other
/// threads; the rest of the framing state lives in the reader thread.
struct DeviceIo {
    handle: DeviceHandle<Context>,
    iface: u8,
    config: StreamConfig,
    epoch: Instant,
    running: AtomicBool,
    disconnected: AtomicBool,
    last_rx_ms: AtomicU64,
    restart_attempts: AtomicU32,
    current_alt: AtomicU8,
    last_stat: Mutex<Option<StatusBlock>>,
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DeviceIo {
    fn running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Relaxed)
    }

    fn set_disconnected(&self) {
        self.disconnected.store(true, Ordering::Relaxed);
    }

    fn touch_rx(&self) {
        let ms = self.epoch.elapsed().as_millis() as u64;
        self.last_rx_ms.store(ms, Ordering::Relaxed);
    }

    fn last_rx_instant(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_rx_ms.load(Ordering::Relaxed))
    }

    fn last_rx_age(&self) -> Duration {
        self.last_rx_instant().elapsed()
    }

    fn store_stat(&self, stat: StatusBlock) {
        *lock_or_recover(&self.last_stat) = Some(stat);
    }

    fn last_stat(&self) -> Option<StatusBlock> {
        lock_or_recover(&self.last_stat).clone()
    }

    /// EP0 vendor GET_STATUS; NAK/STALL here is routine and non-fatal
    fn get_status_ep0(&self) -> Option<StatusBlock> {
        let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        let mut buf = [0u8; 64];
        match self
            .handle
            .read_control(request_type, commands::GET_STATUS, 0, 0, &mut buf, CTRL_TIMEOUT)
        {
            Ok(n) if n > 0 => match StatusBlock::parse(&buf[..n]) {
                Some(stat) => {
                    self.store_stat(stat.clone());
                    Some(stat)
                }
                None => {
                    debug!(len = n, "GET_STATUS returned non-STAT bytes");
                    None
                }
            },
            Ok(_) => None,
            Err(rusb::Error::Timeout) => None,
            Err(e) => {
                debug!("GET_STATUS failed: {}", e);
                None
            }
        }
    }

    /// Poll readiness bits after an alt change, then clear both halts
    ///
    /// Expiry is non-fatal; some firmware revisions never report readiness
    /// yet stream fine once the halts are cleared.
    fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout.max(Duration::from_millis(50));
        let mut ready = false;
        while Instant::now() < deadline {
            if let Some(stat) = self.get_status_ep0() {
                let (alt1, out_armed) = stat.readiness();
                if alt1 && out_armed {
                    ready = true;
                    break;
                }
            }
            thread::sleep(READY_POLL_INTERVAL);
        }
        self.clear_halt_eps();
        if !ready {
            debug!(?timeout, "readiness not confirmed before timeout");
        }
        ready
    }

    fn clear_halt_eps(&self) {
        for endpoint in [EP_IN, EP_OUT] {
            if let Err(e) = self.handle.clear_halt(endpoint) {
                debug!(endpoint, "clear_halt failed: {}", e);
            }
        }
    }

    /// Three-tier alt negotiation: standard call, raw SET_INTERFACE
    /// control, then the vendor SET_ALT request to device and interface
    /// recipients. Each success path re-checks readiness and clears halts.
    fn ensure_alt(&self, desired: u8) -> Result<()> {
        for attempt in 1..=ALT_RETRIES + 1 {
            if let Err(e) = self.handle.claim_interface(self.iface) {
                debug!("claim before alt-set failed: {}", e);
            }
            match self.handle.set_alternate_setting(self.iface, desired) {
                Ok(()) => {
                    debug!(alt = desired, attempt, "set_alternate_setting ok");
                    self.finish_alt(desired);
                    return Ok(());
                }
                Err(e) => {
                    debug!(alt = desired, attempt, "set_alternate_setting failed: {}", e);
                    thread::sleep(Duration::from_millis(20));
                }
            }
        }

        let request_type =
            rusb::request_type(Direction::Out, RequestType::Standard, Recipient::Interface);
        match self.handle.write_control(
            request_type,
            REQ_SET_INTERFACE,
            desired as u16,
            self.iface as u16,
            &[],
            CTRL_TIMEOUT,
        ) {
            Ok(_) => {
                debug!(alt = desired, "raw SET_INTERFACE control ok");
                self.finish_alt(desired);
                return Ok(());
            }
            Err(e) => debug!(alt = desired, "raw SET_INTERFACE control failed: {}", e),
        }

        for recipient in [Recipient::Device, Recipient::Interface] {
            let request_type = rusb::request_type(Direction::Out, RequestType::Vendor, recipient);
            match self.handle.write_control(
                request_type,
                commands::SET_ALT,
                desired as u16,
                self.iface as u16,
                &[],
                CTRL_TIMEOUT,
            ) {
                Ok(_) => {
                    debug!(alt = desired, ?recipient, "vendor SET_ALT ok");
                    self.finish_alt(desired);
                    return Ok(());
                }
                Err(e) => debug!(alt = desired, ?recipient, "vendor SET_ALT failed: {}", e),
            }
        }

        warn!(alt = desired, "all alt-setting methods failed");
        Err(ClientError::NoInterface(format!(
            "unable to select alternate setting {}",
            desired
        )))
    }

    fn finish_alt(&self, alt: u8) {
        self.current_alt.store(alt, Ordering::Relaxed);
        self.wait_ready(Duration::from_millis(200));
    }

    /// Bulk-OUT command with bounded retries
    ///
    /// A STALL/pipe error triggers a readiness re-check and halt clearing
    /// before the next attempt. A final EBUSY marks the session
    /// disconnected so the owner reopens from scratch.
    fn send_raw(&self, opcode: u8, packet: &[u8]) -> Result<()> {
        let mut last = rusb::Error::Other;
        for attempt in 1..=CMD_RETRIES {
            match self.handle.write_bulk(EP_OUT, packet, CMD_TIMEOUT) {
                Ok(n) => {
                    debug!(opcode = format_args!("{:#04x}", opcode), n, "command sent");
                    return Ok(());
                }
                Err(e) => {
                    debug!(
                        opcode = format_args!("{:#04x}", opcode),
                        attempt,
                        "command write failed: {}",
                        e
                    );
                    last = e;
                    if matches!(e, rusb::Error::Pipe | rusb::Error::Io) {
                        if let Some(stat) = self.get_status_ep0() {
                            let (alt1, out_armed) = stat.readiness();
                            debug!(alt1, out_armed, "pipe stalled, clearing halts before retry");
                        }
                        self.clear_halt_eps();
                        self.wait_ready(Duration::from_millis(200));
                    }
                    thread::sleep(Duration::from_millis(50));
                }
            }
        }
        if last == rusb::Error::Busy {
            self.set_disconnected();
        }
        Err(ClientError::CommandFailure {
            opcode,
            attempts: CMD_RETRIES,
            source: last,
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.send_raw(command.opcode(), &command.encode())
    }

    fn send_logged(&self, command: Command) {
        if let Err(e) = self.send(command) {
            warn!("{}", e);
        }
        thread::sleep(INTER_COMMAND_PAUSE);
    }

    /// STOP, clear halts, toggle alt 0 -> 1, wait for readiness, clear
    /// halts again: a deterministic pipeline state regardless of what the
    /// previous session left behind
    fn clean_start(&self, stop_first: bool) {
        if stop_first {
            self.wait_ready(Duration::from_secs(1));
            self.send_logged(Command::StopStream);
        }
        self.clear_halt_eps();
        thread::sleep(Duration::from_millis(10));
        if let Err(e) = self.ensure_alt(0) {
            debug!("alt toggle to 0 failed: {}", e);
        }
        thread::sleep(Duration::from_millis(5));
        if let Err(e) = self.ensure_alt(1) {
            debug!("alt toggle to 1 failed: {}", e);
        }
        self.wait_ready(Duration::from_millis(500));
        self.clear_halt_eps();
    }

    /// Send the configured profile/mode/frame-size and START
    fn configure_and_start(&self) {
        if let Some(profile) = self.config.profile {
            self.send_logged(Command::SetProfile(profile));
        }
        self.send_logged(Command::SetFullMode(self.config.full_mode));
        if let Some(samples) = self.config.frame_samples {
            self.send_logged(Command::SetFrameSamples(samples));
        }
        self.send_logged(Command::StartStream);
        self.prime_status();
    }

    fn prime_status(&self) {
        for _ in 0..2 {
            self.get_status_ep0();
            thread::sleep(Duration::from_millis(50));
        }
    }

    /// Full recovery cycle used by the watchdog
    fn restart_stream(&self) {
        self.clean_start(true);
        self.configure_and_start();
        self.kick_cdc_start();
    }

    /// One-shot re-send of the start sequence when only diagnostics appear
    fn fallback_start(&self) {
        if let Some(profile) = self.config.profile {
            self.send_logged(Command::SetProfile(profile));
        }
        self.send_logged(Command::SetFullMode(self.config.full_mode));
        self.send_logged(Command::StartStream);
        self.kick_cdc_start();
    }

    /// Poke START through the CDC data interface as well; some firmware
    /// revisions only listen there after a stall
    fn kick_cdc_start(&self) {
        let device = self.handle.device();
        let Ok(config) = device.active_config_descriptor() else {
            return;
        };
        for interface in config.interfaces() {
            for alt in interface.descriptors() {
                if alt.class_code() != 0x0A {
                    continue; // CDC Data only
                }
                let Some(out_ep) = alt.endpoint_descriptors().find(|e| {
                    e.direction() == Direction::Out && e.transfer_type() == TransferType::Bulk
                }) else {
                    continue;
                };
                let number = interface.number();
                if let Err(e) = self.handle.claim_interface(number) {
                    debug!(iface = number, "CDC claim failed: {}", e);
                    return;
                }
                match self
                    .handle
                    .write_bulk(out_ep.address(), &[commands::START_STREAM], CTRL_TIMEOUT)
                {
                    Ok(_) => debug!("CDC START kick sent"),
                    Err(e) => debug!("CDC START kick failed: {}", e),
                }
                if let Err(e) = self.handle.release_interface(number) {
                    debug!(iface = number, "CDC release failed: {}", e);
                }
                return;
            }
        }
    }
}

/// Background loop: bulk reads, deframing, pairing, watchdog
fn run_reader(io: Arc<DeviceIo>, queue: Arc<StereoQueue>, stats_tx: Sender<CounterSnapshot>) {
    let mut deframer = ContinuousDeframer::new(io.config.test_frames_as_data);
    let mut assembler = StereoAssembler::new(io.config.relaxed_pairing);
    let mut watchdog = Watchdog::new(io.config.watchdog);
    watchdog.arm(Instant::now());

    let connected_at = Instant::now();
    let mut fallback_done = false;
    let mut working_seen = false;
    let mut last_snapshot = Instant::now();
    let mut buf = vec![0u8; BULK_READ_LEN];

    while io.running() && !io.is_disconnected() {
        match io.handle.read_bulk(EP_IN, &mut buf, BULK_READ_TIMEOUT) {
            Ok(n) => {
                if n > 0 {
                    io.touch_rx();
                    deframer.extend(&buf[..n]);
                    while let Some(event) = deframer.next_event() {
                        match event {
                            DeframeEvent::Status(stat) => io.store_stat(stat),
                            DeframeEvent::Data(frame) => {
                                working_seen = true;
                                if let Some(pair) = assembler.push(frame) {
                                    queue.push(pair);
                                }
                            }
                        }
                    }
                }
            }
            Err(rusb::Error::Timeout) => {
                match watchdog.poll(Instant::now(), io.last_rx_instant()) {
                    WatchdogAction::Keepalive => {
                        io.get_status_ep0();
                    }
                    WatchdogAction::Restart { attempts } => {
                        info!(attempts, "RX silence, running clean restart");
                        io.restart_stream();
                        io.restart_attempts.store(attempts, Ordering::Relaxed);
                        if watchdog.exhausted() {
                            if io.config.hard_reset_on_failure {
                                warn!("restart attempts exhausted, issuing hard USB reset");
                                if let Err(e) = io.handle.reset() {
                                    warn!("hard reset failed: {}", e);
                                }
                                watchdog.reset_attempts();
                            }
                            if io.config.force_reopen {
                                warn!("restart attempts exhausted, forcing session reopen");
                                io.set_disconnected();
                            }
                        }
                    }
                    WatchdogAction::None => {}
                }
            }
            Err(e @ (rusb::Error::Io | rusb::Error::NoDevice | rusb::Error::Pipe)) => {
                warn!("bulk read failed, device lost: {}", e);
                io.set_disconnected();
                break;
            }
            Err(rusb::Error::Busy) => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                warn!("bulk read error: {}", e);
                thread::sleep(Duration::from_millis(100));
            }
        }

        if !working_seen && !fallback_done && connected_at.elapsed() > FALLBACK_START_AFTER {
            info!("only diagnostic traffic since connect, re-sending start sequence");
            io.fallback_start();
            fallback_done = true;
        }

        if last_snapshot.elapsed() >= SNAPSHOT_INTERVAL {
            let counters = deframer.counters();
            let snapshot = CounterSnapshot {
                frames: counters.frames,
                bytes: counters.bytes,
                crc_bad: counters.crc_bad,
                magic_bad: counters.magic_bad,
                test_seen: counters.test_seen,
                seq_gaps: counters.seq_gaps,
                pending: assembler.pending_len(),
                queued: queue.len(),
                dropped_pairs: queue.dropped(),
                restart_attempts: io.restart_attempts.load(Ordering::Relaxed),
            };
            let _ = stats_tx.try_send(snapshot);
            last_snapshot = Instant::now();
        }
    }
    debug!("reader thread exiting");
}

/// Host-side session with the acquisition device
///
/// Created with [`SessionController::open`]; destroyed on [`close`] (or
/// drop), which releases the exclusive interface claim so a new controller
/// can reopen the device.
///
/// [`close`]: SessionController::close
pub struct SessionController {
    io: Arc<DeviceIo>,
    queue: Arc<StereoQueue>,
    stats_rx: Receiver<CounterSnapshot>,
    latest_stats: Mutex<CounterSnapshot>,
    reader: Option<JoinHandle<()>>,
    port_info: PortInfo,
}

impl SessionController {
    /// Discover, open and start streaming from the device
    pub fn open(config: StreamConfig) -> Result<Self> {
        let context = Context::new()?;
        let discovered = discover(&context, &config)?;
        let device = discovered.device;
        let descriptor = device.device_descriptor()?;
        let port_info =
            PortInfo::from_device(&device, descriptor.vendor_id(), descriptor.product_id());

        let handle = device.open().map_err(classify_usb_error)?;
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("auto kernel-driver detach unavailable: {}", e);
        }

        match handle.active_configuration() {
            Ok(active) if active == discovered.config_value => {}
            _ => {
                if let Err(e) = handle.set_active_configuration(discovered.config_value) {
                    warn!(config_value = discovered.config_value, "set_configuration failed: {}", e);
                }
            }
        }
        handle
            .claim_interface(discovered.iface)
            .map_err(classify_usb_error)?;

        let io = Arc::new(DeviceIo {
            handle,
            iface: discovered.iface,
            config,
            epoch: Instant::now(),
            running: AtomicBool::new(true),
            disconnected: AtomicBool::new(false),
            last_rx_ms: AtomicU64::new(0),
            restart_attempts: AtomicU32::new(0),
            current_alt: AtomicU8::new(0),
            last_stat: Mutex::new(None),
        });
        io.touch_rx();
        io.clear_halt_eps();
        if let Err(e) = io.ensure_alt(1) {
            warn!("initial alt-setting negotiation failed: {}", e);
        }
        if io.config.clean_start {
            io.clean_start(true);
        }
        io.wait_ready(Duration::from_secs(1));
        io.configure_and_start();

        let queue = Arc::new(StereoQueue::new(PAIR_QUEUE_CAPACITY));
        let (stats_tx, stats_rx) = bounded(8);
        let reader = thread::Builder::new()
            .name("acq-reader".to_string())
            .spawn({
                let io = Arc::clone(&io);
                let queue = Arc::clone(&queue);
                move || run_reader(io, queue, stats_tx)
            })?;

        info!(port = ?port_info.port_path, "session started");
        Ok(Self {
            io,
            queue,
            stats_rx,
            latest_stats: Mutex::new(CounterSnapshot::default()),
            reader: Some(reader),
            port_info,
        })
    }

    /// Block up to `timeout` for the next stereo pair
    pub fn get_stereo(&self, timeout: Duration) -> Option<StereoPair> {
        self.queue.pop(timeout)
    }

    /// Send a raw opcode + payload over bulk OUT
    pub fn send_cmd(&self, opcode: u8, payload: &[u8]) -> Result<()> {
        let mut packet = Vec::with_capacity(1 + payload.len());
        packet.push(opcode);
        packet.extend_from_slice(payload);
        self.io.send_raw(opcode, &packet)
    }

    /// Send a typed bulk command
    pub fn send(&self, command: Command) -> Result<()> {
        self.io.send(command)
    }

    /// EP0 vendor soft reset: restart the streaming pipeline
    pub fn soft_reset(&self) -> Result<()> {
        let request_type =
            rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        self.io
            .handle
            .write_control(request_type, commands::SOFT_RESET, 0, 0, &[], SOFT_RESET_TIMEOUT)
            .map_err(classify_usb_error)?;
        info!("SOFT_RESET sent");
        Ok(())
    }

    /// EP0 vendor deep reset: full firmware restart
    pub fn deep_reset(&self) -> Result<()> {
        let request_type =
            rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        self.io
            .handle
            .write_control(request_type, commands::DEEP_RESET, 0, 0, &[], DEEP_RESET_TIMEOUT)
            .map_err(classify_usb_error)?;
        info!("DEEP_RESET sent");
        Ok(())
    }

    /// Force the vendor interface's alternate setting
    pub fn set_alt(&self, alt: u8) -> Result<()> {
        self.io.ensure_alt(alt)
    }

    /// Current alternate setting as last negotiated
    pub fn current_alt(&self) -> u8 {
        self.io.current_alt.load(Ordering::Relaxed)
    }

    /// Fetch a fresh STAT snapshot over EP0
    pub fn get_status(&self) -> Option<StatusBlock> {
        self.io.get_status_ep0()
    }

    /// Most recent STAT snapshot from either EP0 or the bulk stream
    pub fn last_stat(&self) -> Option<StatusBlock> {
        self.io.last_stat()
    }

    /// The reader thread observed a fatal device loss or gave up restarting
    pub fn disconnected(&self) -> bool {
        self.io.is_disconnected()
    }

    /// Time since the last byte arrived on the bulk IN endpoint
    pub fn last_rx_age(&self) -> Duration {
        self.io.last_rx_age()
    }

    /// Latest one-second counter snapshot
    pub fn counters(&self) -> CounterSnapshot {
        let mut latest = lock_or_recover(&self.latest_stats);
        while let Ok(snapshot) = self.stats_rx.try_recv() {
            *latest = snapshot;
        }
        *latest
    }

    /// USB topology for external power-cycle tooling
    pub fn port_info(&self) -> &PortInfo {
        &self.port_info
    }

    /// Stop streaming and release the device
    ///
    /// Best-effort: STOP, alt back to 0, release the interface. Every step
    /// swallows its own errors so a wedged device still gets released.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        self.io.stop();
        if reader.join().is_err() {
            warn!("reader thread panicked");
        }
        if !self.io.is_disconnected()
            && let Err(e) = self.io.send(Command::StopStream)
        {
            debug!("STOP on close failed: {}", e);
        }
        if let Err(e) = self.io.handle.set_alternate_setting(self.io.iface, 0) {
            debug!("alt revert on close failed: {}", e);
        }
        if let Err(e) = self.io.handle.release_interface(self.io.iface) {
            debug!("interface release on close failed: {}", e);
        }
        info!("session closed");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_snapshot_defaults() {
        let snapshot = CounterSnapshot::default();
        assert_eq!(snapshot.frames, 0);
        assert_eq!(snapshot.restart_attempts, 0);
    }

    #[test]
    fn test_discover_without_device() {
        // No fixture hardware in CI; exact-match discovery must fail
        // cleanly with NoDevice rather than panic.
        let Ok(context) = Context::new() else {
            return; // no usbfs in the sandbox
        };
        let config = StreamConfig::default().with_device(0x0f0f, 0x0f0f);
        match discover(&context, &config) {
            Err(ClientError::NoDevice) => {}
            Err(other) => panic!("expected NoDevice, got {:?}", other),
            Ok(_) => panic!("unexpected device 0x0f0f:0x0f0f present"),
        }
    }
}
