// SPDX-License-Identifier: GPL-2.0
//
// boostd: event-driven performance boost coordinator
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Side-effect sinks: the per-domain outputs the coordination engine drives.
//!
//! Implementations may take short-lived locks of their own; the engine only
//! ever calls them from the domain's single worker thread, so no two
//! apply/unapply steps for one domain run concurrently.

/// Handle for an outstanding foreground-group boost grant.
///
/// Move-only: releasing consumes the handle, so a slot can never be released
/// twice and never leaks silently past the engine's bookkeeping.
#[derive(Debug)]
pub struct SlotHandle(i32);

impl SlotHandle {
    pub fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> i32 {
        self.0
    }
}

/// Scheduler boost for the foreground task group.
pub trait CgroupBoost: Send + Sync {
    /// Apply `level` to the foreground group. `None` means the sink refused
    /// the grant (the engine then leaves its slot bit clear).
    fn apply(&self, level: i32) -> Option<SlotHandle>;

    /// Restore the baseline the grant displaced.
    fn release(&self, slot: SlotHandle);

    /// Set the root group level, returning the previous level so it can be
    /// restored on display wake.
    fn set_root_level(&self, level: i32) -> i32;
}

/// GPU power-level floor. Lower level index = more permissive floor.
pub trait GpuPower: Send + Sync {
    fn set_min_level(&self, level: u32);
}

/// Prompts the frequency governor to requery clamps.
///
/// The engine passes a resolver computing `(min, max)` for a CPU given that
/// CPU's policy limits; the sink consults it for one CPU per cluster and
/// pushes the result wherever the governor reads it.
pub trait PolicyRefresh: Send + Sync {
    fn refresh(&self, resolve: &dyn Fn(u32, PolicyLimits) -> Clamp);
}

/// Hardware limits for one CPU's frequency policy.
#[derive(Debug, Clone, Copy)]
pub struct PolicyLimits {
    /// Absolute minimum the CPU supports (kHz).
    pub cpuinfo_min: u32,
    /// Current policy maximum (kHz).
    pub max: u32,
}

/// The frequency bound the governor is told to honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clamp {
    pub min: u32,
    pub max: u32,
}

/// One devfreq-governed bus device.
pub trait DevfreqDevice: Send + Sync {
    /// Lowest frequency in the device's table (the unboosted floor).
    fn min_freq(&self) -> u64;
    fn max_freq(&self) -> u64;
    /// Push a new frequency floor; `max_boost` pins the device to its
    /// maximum regardless of the floor.
    fn set_floor(&self, min_freq: u64, max_boost: bool);
}

#[cfg(test)]
pub mod mock {
    //! Counting sink doubles for engine tests.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockCgroup {
        pub applies: AtomicU32,
        pub releases: AtomicU32,
        pub last_level: AtomicI32,
        pub root_level: AtomicI32,
        next_slot: AtomicI32,
    }

    impl CgroupBoost for MockCgroup {
        fn apply(&self, level: i32) -> Option<SlotHandle> {
            self.applies.fetch_add(1, Ordering::Relaxed);
            self.last_level.store(level, Ordering::Relaxed);
            Some(SlotHandle::new(self.next_slot.fetch_add(1, Ordering::Relaxed)))
        }

        fn release(&self, _slot: SlotHandle) {
            self.releases.fetch_add(1, Ordering::Relaxed);
        }

        fn set_root_level(&self, level: i32) -> i32 {
            self.root_level.swap(level, Ordering::Relaxed)
        }
    }

    #[derive(Default)]
    pub struct MockGpu {
        pub sets: AtomicU32,
        pub last_level: AtomicU32,
    }

    impl GpuPower for MockGpu {
        fn set_min_level(&self, level: u32) {
            self.sets.fetch_add(1, Ordering::Relaxed);
            self.last_level.store(level, Ordering::Relaxed);
        }
    }

    /// Records every clamp the governor would observe for the given CPUs.
    pub struct MockPolicy {
        pub cpus: Vec<(u32, PolicyLimits)>,
        pub refreshes: AtomicU32,
        pub last: Mutex<Vec<(u32, Clamp)>>,
    }

    impl MockPolicy {
        pub fn new(cpus: Vec<(u32, PolicyLimits)>) -> Self {
            Self {
                cpus,
                refreshes: AtomicU32::new(0),
                last: Mutex::new(Vec::new()),
            }
        }
    }

    impl PolicyRefresh for MockPolicy {
        fn refresh(&self, resolve: &dyn Fn(u32, PolicyLimits) -> Clamp) {
            self.refreshes.fetch_add(1, Ordering::Relaxed);
            let mut last = self.last.lock().unwrap();
            last.clear();
            for &(cpu, limits) in &self.cpus {
                last.push((cpu, resolve(cpu, limits)));
            }
        }
    }

    #[derive(Default)]
    pub struct MockDevfreq {
        pub floor: AtomicU64,
        pub max_boost: AtomicBool,
        pub updates: AtomicU32,
    }

    impl DevfreqDevice for MockDevfreq {
        fn min_freq(&self) -> u64 {
            200_000_000
        }

        fn max_freq(&self) -> u64 {
            1_804_800_000
        }

        fn set_floor(&self, min_freq: u64, max_boost: bool) {
            self.floor.store(min_freq, Ordering::Relaxed);
            self.max_boost.store(max_boost, Ordering::Relaxed);
            self.updates.fetch_add(1, Ordering::Relaxed);
        }
    }
}
