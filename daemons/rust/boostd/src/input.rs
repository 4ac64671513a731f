// SPDX-License-Identifier: GPL-2.0
//
// boostd: event-driven performance boost daemon
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Raw input monitoring: evdev devices on epoll, kicking the boost domains.
//!
//! Interrupt-driven via level-triggered EPOLLIN. One epoll wake produces at
//! most one kick per domain no matter how many events were batched, so a
//! high-rate mouse cannot flood the dispatcher channels.

use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use boostd_core::{CpuBoostDomain, DevfreqBoostDomain};
use evdev::EventType;
use log::{info, warn};
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};

/// How long epoll_wait may block before rechecking the shutdown flag.
const EPOLL_TIMEOUT_MS: u16 = 100;

/// True for devices that generate user-visible interaction: keyboards,
/// mice, touchscreens and gamepads. Accelerometers and switches expose
/// neither keys nor pointer axes and are skipped.
fn is_interactive(dev: &evdev::Device) -> bool {
    let supported = dev.supported_events();
    supported.contains(EventType::KEY)
        || supported.contains(EventType::RELATIVE)
        || supported.contains(EventType::ABSOLUTE)
}

pub struct InputWatcher {
    devices: Vec<evdev::Device>,
}

impl InputWatcher {
    /// Open every interactive device under /dev/input.
    pub fn scan() -> Result<Self> {
        Self::scan_dir(Path::new("/dev/input"))
    }

    fn scan_dir(dir: &Path) -> Result<Self> {
        let mut devices = Vec::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to scan {}", dir.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if !name.starts_with("event") {
                continue;
            }
            let Ok(dev) = evdev::Device::open(&path) else {
                continue;
            };
            if !is_interactive(&dev) {
                continue;
            }
            let fd = dev.as_raw_fd();
            if fd < 0 {
                continue;
            }
            // Non-blocking so a drained fetch never stalls the loop.
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL);
                if flags >= 0 {
                    let _ = libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                }
            }
            info!(
                "watching input device {} ({})",
                name,
                dev.name().unwrap_or("unknown")
            );
            devices.push(dev);
        }
        Ok(Self { devices })
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Block on input until `shutdown` is raised.
    pub fn run(
        mut self,
        cpu: Arc<CpuBoostDomain>,
        devfreq: Arc<DevfreqBoostDomain>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<()> {
        let epfd = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
            .context("failed to create epoll instance")?;

        for (idx, dev) in self.devices.iter().enumerate() {
            let fd = dev.as_raw_fd();
            // SAFETY: the device owns fd and outlives this registration; the
            // BorrowedFd is scoped to the add call.
            let bfd = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
            epfd.add(bfd, EpollEvent::new(EpollFlags::EPOLLIN, idx as u64))
                .context("failed to register input device with epoll")?;
        }

        let mut events = [EpollEvent::empty(); 32];
        while !shutdown.load(Ordering::Relaxed) {
            let n = match epfd.wait(&mut events, Some(EPOLL_TIMEOUT_MS)) {
                Ok(n) => n,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(err) => {
                    warn!("epoll wait failed: {err}");
                    std::thread::sleep(Duration::from_millis(EPOLL_TIMEOUT_MS as u64));
                    continue;
                }
            };

            let mut activity = false;
            for ev in events.iter().take(n) {
                let idx = ev.data() as usize;
                let flags = ev.events();

                if flags.contains(EpollFlags::EPOLLHUP) || flags.contains(EpollFlags::EPOLLERR) {
                    // Device unplugged; deregister but keep it allocated so
                    // the remaining epoll tags stay valid.
                    if let Some(dev) = self.devices.get(idx) {
                        let fd = dev.as_raw_fd();
                        // SAFETY: fd is still open, just unusable after HUP.
                        let bfd = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
                        let _ = epfd.delete(bfd);
                        warn!("input device {idx} disconnected");
                    }
                    continue;
                }

                let Some(dev) = self.devices.get_mut(idx) else {
                    continue;
                };
                let Ok(iter) = dev.fetch_events() else {
                    continue;
                };
                for event in iter {
                    match event.event_type() {
                        EventType::KEY => activity = true,
                        // Zero-delta relative events are polling noise.
                        EventType::RELATIVE => activity |= event.value() != 0,
                        EventType::ABSOLUTE => activity = true,
                        _ => {}
                    }
                }
            }

            // One kick per wake, however many devices fired together.
            if activity {
                cpu.kick();
                devfreq.kick();
            }
        }

        Ok(())
    }
}
