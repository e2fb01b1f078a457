//! Double-reset detection.
//!
//! Pressing reset twice in quick succession asks the node to forget its
//! stored broker settings. A flag file is raised at boot and lowered once
//! the detection window has passed; finding it still raised at the next
//! boot means the previous run was cut short inside the window.

use embassy_time::{Duration, Instant};
use log::{info, warn};

use crate::config::DRD_FLAG_PATH;
use crate::peripherals::{Filesystem, FsError};

const RAISED: &[u8] = &[1];
const LOWERED: &[u8] = &[0];

pub struct DoubleResetDetector {
    timeout: Duration,
    /// Set while the flag file is raised and waiting to be lowered.
    lower_at: Option<Instant>,
}

impl DoubleResetDetector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            lower_at: None,
        }
    }

    /// Runs once at boot. Returns true when a double reset was detected.
    pub fn detect<F: Filesystem>(&mut self, fs: &mut F, boot: Instant) -> bool {
        if self.timeout == Duration::from_ticks(0) {
            return false;
        }

        let detected = match fs.read(DRD_FLAG_PATH) {
            Ok(bytes) => bytes.as_slice() == RAISED,
            Err(FsError::NotFound) => false,
            Err(e) => {
                warn!("Cannot read reset flag: {}", e);
                false
            }
        };

        match fs.write(DRD_FLAG_PATH, RAISED) {
            Ok(()) => self.lower_at = Some(boot + self.timeout),
            Err(e) => warn!("Cannot raise reset flag: {}", e),
        }

        if detected {
            info!("Double reset detected");
        }
        detected
    }

    /// Lowers the flag once the window has passed. Cheap to call every tick.
    pub fn poll<F: Filesystem>(&mut self, fs: &mut F, now: Instant) {
        let Some(lower_at) = self.lower_at else {
            return;
        };
        if now < lower_at {
            return;
        }
        if let Err(e) = fs.write(DRD_FLAG_PATH, LOWERED) {
            warn!("Cannot lower reset flag: {}", e);
        }
        self.lower_at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.lower_at.is_some()
    }
}
