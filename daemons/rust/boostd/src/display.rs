// SPDX-License-Identifier: GPL-2.0
//
// boostd: event-driven performance boost daemon
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Display state tracking via the backlight brightness node.
//!
//! Brightness zero means the panel blanked. Polled rather than notified:
//! a missed edge self-corrects on the next poll, and 100ms of slack on a
//! screen-off transition is invisible.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use boostd_core::{CpuBoostDomain, DevfreqBoostDomain};
use log::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct DisplayWatcher {
    node: PathBuf,
}

impl DisplayWatcher {
    pub fn new(node: PathBuf) -> Self {
        Self { node }
    }

    /// Find the first backlight device exposing a brightness node.
    pub fn autodetect() -> Option<Self> {
        let dir = std::fs::read_dir("/sys/class/backlight").ok()?;
        for entry in dir.flatten() {
            let node = entry.path().join("actual_brightness");
            if node.exists() {
                info!("tracking display state via {}", node.display());
                return Some(Self::new(node));
            }
        }
        warn!("no backlight device found, display tracking disabled");
        None
    }

    fn is_awake(node: &Path) -> Option<bool> {
        let raw = std::fs::read_to_string(node).ok()?;
        let value: u64 = raw.trim().parse().ok()?;
        Some(value > 0)
    }

    pub fn run(
        &self,
        cpu: Arc<CpuBoostDomain>,
        devfreq: Arc<DevfreqBoostDomain>,
        shutdown: Arc<AtomicBool>,
    ) {
        let mut awake = Self::is_awake(&self.node).unwrap_or(true);
        // The domains are constructed awake; a daemon started against a
        // blanked panel must hear about it before the first edge.
        if !awake {
            info!("display asleep at startup");
            cpu.screen_state_changed(false);
            devfreq.screen_state_changed(false);
        }
        while !shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(POLL_INTERVAL);
            let Some(now_awake) = Self::is_awake(&self.node) else {
                continue;
            };
            if now_awake != awake {
                awake = now_awake;
                info!("display {}", if awake { "awake" } else { "asleep" });
                cpu.screen_state_changed(awake);
                devfreq.screen_state_changed(awake);
            }
        }
    }
}
