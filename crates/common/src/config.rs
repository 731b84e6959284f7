//! Stream configuration
//!
//! All behavior toggles live in one immutable [`StreamConfig`] built once at
//! startup and handed to the session controller, replacing what used to be a
//! pile of environment-driven switches. There is no file persistence; the
//! caller constructs the struct in code.

use std::time::Duration;

/// Default vendor ID of the acquisition device
pub const DEFAULT_VID: u16 = 0xCAFE;
/// Default product ID of the acquisition device
pub const DEFAULT_PID: u16 = 0x4001;

/// Watchdog thresholds for the reader loop
#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    /// RX silence before EP0 keepalive pings start
    pub keepalive_after: Duration,
    /// Minimum spacing between keepalive pings
    pub keepalive_interval: Duration,
    /// RX silence before a full clean restart
    pub restart_after: Duration,
    /// Minimum spacing between restart attempts
    pub restart_interval: Duration,
    /// Consecutive failed restarts before escalation
    pub max_restarts: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            keepalive_after: Duration::from_secs(2),
            keepalive_interval: Duration::from_secs(1),
            restart_after: Duration::from_secs(4),
            restart_interval: Duration::from_secs(3),
            max_restarts: 3,
        }
    }
}

/// Immutable session configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Vendor ID for exact discovery
    pub vid: u16,
    /// Product ID for exact discovery
    pub pid: u16,
    /// Fall back to scanning every device for the bulk endpoint pair
    pub allow_any: bool,
    /// Prefer this interface number when several match
    pub iface_prefer: Option<u8>,
    /// Acquisition profile sent at startup (`SET_PROFILE`)
    pub profile: Option<u8>,
    /// Full-range capture mode (`SET_FULL_MODE`)
    pub full_mode: bool,
    /// Samples per channel per frame (`SET_FRAME_SAMPLES`)
    pub frame_samples: Option<u16>,
    /// Accept off-by-one sequence numbers when pairing channels
    pub relaxed_pairing: bool,
    /// Run the STOP / clear-halt / alt-toggle sequence on open
    pub clean_start: bool,
    /// Issue a hard USB reset after repeated failed restarts
    pub hard_reset_on_failure: bool,
    /// Mark the session disconnected after repeated failed restarts so the
    /// owner performs a full reopen
    pub force_reopen: bool,
    /// Duplicate heartbeat frames onto both channels instead of dropping
    pub test_frames_as_data: bool,
    /// Treat the byte-swapped sync magic as a valid frame start
    pub allow_swapped_magic: bool,
    /// Watchdog thresholds
    pub watchdog: WatchdogConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            vid: DEFAULT_VID,
            pid: DEFAULT_PID,
            allow_any: false,
            iface_prefer: None,
            profile: Some(1),
            full_mode: true,
            frame_samples: None,
            relaxed_pairing: true,
            clean_start: true,
            hard_reset_on_failure: false,
            force_reopen: false,
            test_frames_as_data: false,
            allow_swapped_magic: false,
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, vid: u16, pid: u16) -> Self {
        self.vid = vid;
        self.pid = pid;
        self
    }

    pub fn with_profile(mut self, profile: u8) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_frame_samples(mut self, samples: u16) -> Self {
        self.frame_samples = Some(samples);
        self
    }

    pub fn with_relaxed_pairing(mut self, relaxed: bool) -> Self {
        self.relaxed_pairing = relaxed;
        self
    }

    pub fn with_clean_start(mut self, clean: bool) -> Self {
        self.clean_start = clean;
        self
    }

    pub fn with_test_frames_as_data(mut self, as_data: bool) -> Self {
        self.test_frames_as_data = as_data;
        self
    }
}
