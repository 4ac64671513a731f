// SPDX-License-Identifier: GPL-2.0
//
// boostd: event-driven performance boost coordinator
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! The CPU+GPU+cgroup boost domain.
//!
//! Event sources call the lightweight `kick*` entry points, which only touch
//! atomics and enqueue work; all side effects (policy refresh, cgroup slot,
//! GPU floor) are applied on the domain's dispatcher thread. The governor
//! consults `resolve_clamp` on every policy recompute.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::error;

use crate::cluster::{Cluster, ClusterMap};
use crate::deadline::{ticks_ms, ExpiryCell};
use crate::sink::{CgroupBoost, Clamp, GpuPower, PolicyRefresh, PolicyLimits, SlotHandle};
use crate::state::{State, StateCell};
use crate::tunables::TunableStore;
use crate::worker::{Actor, TimerKind, TimerSlots, Worker};

/// Sentinel for "no CPU pinned for max boost".
const NO_PIN: u32 = u32::MAX;

/// Requested GPU boost frequency to power-level index. Higher frequency maps
/// to a lower, more permissive level. Unrecognized values change nothing.
pub fn gpu_boost_level(freq: u32) -> Option<u32> {
    match freq {
        f if f >= 342 => Some(6),
        257 => Some(7),
        _ => None,
    }
}

/// GPU baseline frequency to power-level index, used when dropping the floor.
pub fn gpu_floor_level(freq: u32) -> Option<u32> {
    match freq {
        342 => Some(6),
        257 => Some(7),
        180 => Some(8),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum CpuEvent {
    Input,
    Max,
    Flex,
    ScreenOn,
    ScreenOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CpuTimer {
    InputUnboost,
    MaxUnboost,
    FlexUnboost,
    SlotExtender,
    GpuExtender,
}

impl TimerKind for CpuTimer {
    const COUNT: usize = 5;

    fn index(self) -> usize {
        match self {
            CpuTimer::InputUnboost => 0,
            CpuTimer::MaxUnboost => 1,
            CpuTimer::FlexUnboost => 2,
            CpuTimer::SlotExtender => 3,
            CpuTimer::GpuExtender => 4,
        }
    }

    fn from_index(idx: usize) -> Self {
        match idx {
            0 => CpuTimer::InputUnboost,
            1 => CpuTimer::MaxUnboost,
            2 => CpuTimer::FlexUnboost,
            3 => CpuTimer::SlotExtender,
            _ => CpuTimer::GpuExtender,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SlotKind {
    Input,
    Max,
    Flex,
}

/// State shared between kickers, the worker and clamp queries.
struct CpuShared {
    state: StateCell,
    max_deadline: ExpiryCell,
    flex_deadline: ExpiryCell,
    pinned_cpu: AtomicU32,
    epoch: Instant,
    tunables: Arc<TunableStore>,
    clusters: ClusterMap,
}

impl CpuShared {
    /// Resolve the `(min, max)` clamp the governor must honor for `cpu`.
    ///
    /// The max-boost rule is sticky for the pinned CPU until the bit clears
    /// and beats every other rule. Otherwise the input table wins over the
    /// flex table, and with no boost active the configured baseline floor
    /// applies.
    fn resolve_clamp(&self, cpu: u32, limits: PolicyLimits) -> Clamp {
        let st = self.state.read();

        if st.contains(State::MAX_BOOST) && self.pinned_cpu.load(Ordering::Relaxed) == cpu {
            return Clamp {
                min: limits.max,
                max: limits.max,
            };
        }

        let t = self.tunables.load();
        let cluster = self.clusters.cluster_of(cpu);

        if st.intersects(State::INPUT_BOOST | State::FLEX_BOOST) {
            let boost = if st.contains(State::INPUT_BOOST) {
                match cluster {
                    Cluster::Little => t.input_boost_freq_lp,
                    Cluster::Big => t.input_boost_freq_hp,
                }
            } else {
                match cluster {
                    Cluster::Little => t.flex_boost_freq_lp,
                    Cluster::Big => t.flex_boost_freq_hp,
                }
            };
            Clamp {
                min: boost.min(limits.max),
                max: limits.max,
            }
        } else {
            let floor = match cluster {
                Cluster::Little => t.remove_boost_freq_lp,
                Cluster::Big => t.remove_boost_freq_hp,
            };
            Clamp {
                min: floor.max(limits.cpuinfo_min),
                max: limits.max,
            }
        }
    }
}

/// Side-effect sinks injected into the CPU domain.
pub struct CpuSinks {
    pub cgroup: Arc<dyn CgroupBoost>,
    /// The GPU device may be absent; boosting then skips the floor entirely.
    pub gpu: Option<Arc<dyn GpuPower>>,
    pub policy: Arc<dyn PolicyRefresh>,
}

struct CpuEngine {
    shared: Arc<CpuShared>,
    cgroup: Arc<dyn CgroupBoost>,
    gpu: Option<Arc<dyn GpuPower>>,
    policy: Arc<dyn PolicyRefresh>,
    input_slot: Option<SlotHandle>,
    max_slot: Option<SlotHandle>,
    flex_slot: Option<SlotHandle>,
    root_default: i32,
}

impl CpuEngine {
    fn refresh_policy(&self) {
        let shared = &self.shared;
        self.policy
            .refresh(&|cpu, limits| shared.resolve_clamp(cpu, limits));
    }

    fn apply_slot(&mut self, kind: SlotKind) {
        let t = self.shared.tunables.load();
        let (offset, bit) = match kind {
            SlotKind::Input => (t.cgroup_input_offset, State::INPUT_SLOT),
            SlotKind::Max => (t.cgroup_max_offset, State::MAX_SLOT),
            SlotKind::Flex => (t.cgroup_flex_offset, State::FLEX_SLOT),
        };
        let level = t.cgroup_dynamic_level + offset;
        if level == 0 {
            return;
        }
        let slot = match kind {
            SlotKind::Input => &mut self.input_slot,
            SlotKind::Max => &mut self.max_slot,
            SlotKind::Flex => &mut self.flex_slot,
        };
        // Idempotent while a slot is held for this kind.
        if slot.is_some() {
            return;
        }
        if let Some(handle) = self.cgroup.apply(level) {
            *slot = Some(handle);
            self.shared.state.set(bit);
        }
    }

    fn release_slot(&mut self, kind: SlotKind) {
        let (slot, bit) = match kind {
            SlotKind::Input => (&mut self.input_slot, State::INPUT_SLOT),
            SlotKind::Max => (&mut self.max_slot, State::MAX_SLOT),
            SlotKind::Flex => (&mut self.flex_slot, State::FLEX_SLOT),
        };
        if let Some(handle) = slot.take() {
            self.cgroup.release(handle);
            self.shared.state.clear(bit);
        }
    }

    fn apply_gpu_floor(&self) {
        let Some(gpu) = &self.gpu else { return };
        let t = self.shared.tunables.load();
        if t.gpu_boost_freq == 0 {
            return;
        }
        if self.shared.state.read().contains(State::INPUT_GPU) {
            return;
        }
        if let Some(level) = gpu_boost_level(t.gpu_boost_freq) {
            gpu.set_min_level(level);
            self.shared.state.set(State::INPUT_GPU);
        }
    }

    fn clear_gpu_floor(&self) {
        let Some(gpu) = &self.gpu else { return };
        if !self.shared.state.read().contains(State::INPUT_GPU) {
            return;
        }
        let t = self.shared.tunables.load();
        if let Some(level) = gpu_floor_level(t.gpu_min_freq) {
            gpu.set_min_level(level);
        }
        self.shared.state.clear(State::INPUT_GPU);
    }

    fn boost_input(&mut self, timers: &mut TimerSlots<CpuTimer>) {
        // A pending unboost means the boost is live and its side effects are
        // already applied: only postpone removal, never re-apply.
        if !timers.cancel(CpuTimer::InputUnboost) {
            timers.cancel(CpuTimer::SlotExtender);
            timers.cancel(CpuTimer::GpuExtender);
            self.shared.state.set(State::INPUT_BOOST);
            self.refresh_policy();
            self.apply_slot(SlotKind::Input);
            self.apply_gpu_floor();
        }
        let t = self.shared.tunables.load();
        timers.arm_after(
            CpuTimer::InputUnboost,
            Duration::from_millis(t.input_boost_ms as u64),
        );
    }

    fn unboost_input(&mut self, timers: &mut TimerSlots<CpuTimer>) {
        self.shared.state.clear(State::INPUT_BOOST);
        self.refresh_policy();

        // The frequency clamp drops right away; the cgroup slot and GPU
        // floor are handed to the extender timers.
        let t = self.shared.tunables.load();
        timers.arm_after(
            CpuTimer::SlotExtender,
            Duration::from_millis(t.cgroup_extender_ms as u64),
        );
        timers.arm_after(
            CpuTimer::GpuExtender,
            Duration::from_millis(t.gpu_extender_ms as u64),
        );
    }

    fn boost_max(&mut self, timers: &mut TimerSlots<CpuTimer>) {
        if !timers.cancel(CpuTimer::MaxUnboost) {
            self.shared.state.set(State::MAX_BOOST);
            self.refresh_policy();
            self.apply_slot(SlotKind::Max);
        }
        let deadline = self.shared.epoch
            + Duration::from_millis(self.shared.max_deadline.deadline_ms());
        timers.arm_at(CpuTimer::MaxUnboost, deadline);
    }

    fn unboost_max(&mut self, _timers: &mut TimerSlots<CpuTimer>) {
        self.shared
            .state
            .clear(State::WAKE_BOOST | State::MAX_BOOST);
        self.shared.pinned_cpu.store(NO_PIN, Ordering::Relaxed);
        self.refresh_policy();
        self.release_slot(SlotKind::Max);
    }

    fn boost_flex(&mut self, timers: &mut TimerSlots<CpuTimer>) {
        let t = self.shared.tunables.load();
        if t.flex_boost_ms == 0 {
            return;
        }
        if !timers.cancel(CpuTimer::FlexUnboost) {
            self.shared.state.set(State::FLEX_BOOST);
            self.refresh_policy();
            // Flex never steals the slot from a live input or max boost.
            let st = self.shared.state.read();
            if !st.intersects(State::INPUT_SLOT | State::MAX_SLOT) {
                self.apply_slot(SlotKind::Flex);
            }
        }
        let deadline = self.shared.epoch
            + Duration::from_millis(self.shared.flex_deadline.deadline_ms());
        timers.arm_at(CpuTimer::FlexUnboost, deadline);
    }

    fn unboost_flex(&mut self, _timers: &mut TimerSlots<CpuTimer>) {
        self.shared.state.clear(State::FLEX_BOOST);
        self.refresh_policy();
        self.release_slot(SlotKind::Flex);
    }

    /// Display went to sleep: drop everything at once.
    fn unboost_all(&mut self, timers: &mut TimerSlots<CpuTimer>) {
        for timer in [
            CpuTimer::InputUnboost,
            CpuTimer::MaxUnboost,
            CpuTimer::FlexUnboost,
            CpuTimer::SlotExtender,
            CpuTimer::GpuExtender,
        ] {
            timers.cancel(timer);
        }

        self.shared.state.clear(
            State::INPUT_BOOST | State::WAKE_BOOST | State::MAX_BOOST | State::FLEX_BOOST,
        );
        self.shared.pinned_cpu.store(NO_PIN, Ordering::Relaxed);
        self.refresh_policy();

        self.release_slot(SlotKind::Input);
        self.release_slot(SlotKind::Max);
        self.release_slot(SlotKind::Flex);
        self.clear_gpu_floor();

        let t = self.shared.tunables.load();
        self.root_default = self.cgroup.set_root_level(t.suspend_cgroup_level);
    }
}

impl Actor for CpuEngine {
    type Event = CpuEvent;
    type Timer = CpuTimer;

    fn on_event(&mut self, event: CpuEvent, timers: &mut TimerSlots<CpuTimer>) {
        match event {
            CpuEvent::Input => self.boost_input(timers),
            CpuEvent::Max => self.boost_max(timers),
            CpuEvent::Flex => self.boost_flex(timers),
            CpuEvent::ScreenOn => {
                self.cgroup.set_root_level(self.root_default);
            }
            CpuEvent::ScreenOff => self.unboost_all(timers),
        }
    }

    fn on_timer(&mut self, timer: CpuTimer, timers: &mut TimerSlots<CpuTimer>) {
        match timer {
            CpuTimer::InputUnboost => self.unboost_input(timers),
            CpuTimer::MaxUnboost => self.unboost_max(timers),
            CpuTimer::FlexUnboost => self.unboost_flex(timers),
            CpuTimer::SlotExtender => self.release_slot(SlotKind::Input),
            CpuTimer::GpuExtender => self.clear_gpu_floor(),
        }
    }
}

/// One coordinated CPU boost instance, alive for the process lifetime.
///
/// If the dispatcher thread cannot be created the domain is disabled: every
/// public operation becomes a no-op, since callers must never fail because a
/// performance hint went missing.
pub struct CpuBoostDomain {
    shared: Arc<CpuShared>,
    worker: Option<Worker<CpuEvent>>,
}

impl CpuBoostDomain {
    pub fn new(tunables: Arc<TunableStore>, clusters: ClusterMap, sinks: CpuSinks) -> Self {
        let shared = Arc::new(CpuShared {
            state: StateCell::new(),
            max_deadline: ExpiryCell::new(),
            flex_deadline: ExpiryCell::new(),
            pinned_cpu: AtomicU32::new(NO_PIN),
            epoch: Instant::now(),
            tunables: Arc::clone(&tunables),
            clusters,
        });
        // The display starts awake.
        shared.state.set(State::SCREEN_AWAKE);

        let engine = CpuEngine {
            shared: Arc::clone(&shared),
            cgroup: sinks.cgroup,
            gpu: sinks.gpu,
            policy: sinks.policy,
            input_slot: None,
            max_slot: None,
            flex_slot: None,
            root_default: 0,
        };

        let priority = tunables.load().worker_priority;
        let worker = match Worker::spawn("cpu_boostd", priority, engine) {
            Ok(worker) => Some(worker),
            Err(err) => {
                error!("cpu boost domain disabled: {err}");
                None
            }
        };

        Self { shared, worker }
    }

    /// Lightweight input-style boost for a fixed duration. Suppressed while
    /// the display sleeps.
    pub fn kick(&self) {
        let Some(worker) = &self.worker else { return };
        if !self.shared.state.read().contains(State::SCREEN_AWAKE) {
            return;
        }
        worker.send(CpuEvent::Input);
    }

    /// Hard-maximum boost with extend-only duration; `cluster` selects the
    /// CPU whose clamp is pinned to its policy maximum.
    pub fn kick_max(&self, duration: Duration, cluster: Cluster) {
        let Some(worker) = &self.worker else { return };
        if !self.shared.state.read().contains(State::SCREEN_AWAKE) {
            return;
        }
        let now = ticks_ms(self.shared.epoch);
        if self.shared.max_deadline.extend(now, duration).is_some() {
            // Pin moves only with an accepted extension, so a rejected short
            // kick cannot retarget a longer boost already in flight.
            self.shared
                .pinned_cpu
                .store(self.shared.clusters.lead_cpu(cluster), Ordering::Relaxed);
            worker.send(CpuEvent::Max);
        }
    }

    /// Secondary boost tier, extend-only with the configured flex duration.
    pub fn kick_flex(&self) {
        let Some(worker) = &self.worker else { return };
        if !self.shared.state.read().contains(State::SCREEN_AWAKE) {
            return;
        }
        let t = self.shared.tunables.load();
        let now = ticks_ms(self.shared.epoch);
        let duration = Duration::from_millis(t.flex_boost_ms as u64);
        if self.shared.flex_deadline.extend(now, duration).is_some() {
            worker.send(CpuEvent::Flex);
        }
    }

    /// Boost issued on display wake; routes through the max-boost path.
    pub fn kick_wake(&self, duration: Duration) {
        self.kick_max(duration, Cluster::Little);
    }

    pub fn screen_state_changed(&self, awake: bool) {
        let Some(worker) = &self.worker else { return };
        if awake {
            self.shared.state.set(State::SCREEN_AWAKE);
            worker.send(CpuEvent::ScreenOn);
            let wake_ms = self.shared.tunables.load().wake_boost_ms;
            self.kick_wake(Duration::from_millis(wake_ms as u64));
        } else {
            self.shared.state.clear(State::SCREEN_AWAKE);
            worker.send(CpuEvent::ScreenOff);
        }
    }

    /// Governor query: the frequency bound for `cpu` under the current
    /// boost state.
    pub fn resolve_clamp(&self, cpu: u32, limits: PolicyLimits) -> Clamp {
        self.shared.resolve_clamp(cpu, limits)
    }

    /// Current boost state, for introspection and logging.
    pub fn state(&self) -> State {
        self.shared.state.read()
    }
}
