// SPDX-License-Identifier: GPL-2.0
//
// boostd: event-driven performance boost coordinator
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Memory-bus (devfreq) boost domain.
//!
//! Mirrors the CPU domain's kick surface for a single devfreq-governed
//! device. The device binds late via `register_device`; kicks arriving
//! before that are accepted but apply nothing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, warn};
use once_cell::sync::OnceCell;

use crate::deadline::{ticks_ms, ExpiryCell};
use crate::sink::DevfreqDevice;
use crate::state::{State, StateCell};
use crate::tunables::TunableStore;
use crate::worker::{Actor, TimerKind, TimerSlots, Worker};

#[derive(Debug, Clone, Copy)]
enum DevfreqEvent {
    Input,
    Flex,
    Max,
    Wake,
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DevfreqTimer {
    InputUnboost,
    FlexUnboost,
    MaxUnboost,
    WakeUnboost,
}

impl TimerKind for DevfreqTimer {
    const COUNT: usize = 4;

    fn index(self) -> usize {
        match self {
            DevfreqTimer::InputUnboost => 0,
            DevfreqTimer::FlexUnboost => 1,
            DevfreqTimer::MaxUnboost => 2,
            DevfreqTimer::WakeUnboost => 3,
        }
    }

    fn from_index(idx: usize) -> Self {
        match idx {
            0 => DevfreqTimer::InputUnboost,
            1 => DevfreqTimer::FlexUnboost,
            2 => DevfreqTimer::MaxUnboost,
            _ => DevfreqTimer::WakeUnboost,
        }
    }
}

struct DevfreqShared {
    state: StateCell,
    max_deadline: ExpiryCell,
    wake_deadline: ExpiryCell,
    device: OnceCell<Arc<dyn DevfreqDevice>>,
    epoch: Instant,
    tunables: Arc<TunableStore>,
}

struct DevfreqEngine {
    shared: Arc<DevfreqShared>,
}

impl DevfreqEngine {
    /// Recompute the device floor from the current state. The boost floor
    /// applies whenever input or flex is active; max and wake pin the device
    /// to its maximum on top of whatever floor is chosen.
    fn update_floor(&self) {
        let Some(device) = self.shared.device.get() else {
            return;
        };
        let st = self.shared.state.read();

        if st.contains(State::SCREEN_OFF) {
            // Only the wake boost acts across the blanked window.
            device.set_floor(device.min_freq(), st.contains(State::WAKE_BOOST));
            return;
        }

        let floor = if st.intersects(State::INPUT_BOOST | State::FLEX_BOOST) {
            let t = self.shared.tunables.load();
            t.devfreq_boost_freq.min(device.max_freq())
        } else {
            device.min_freq()
        };
        let max_boost = st.intersects(State::MAX_BOOST | State::WAKE_BOOST);
        device.set_floor(floor, max_boost);
    }

    fn boost(&self, bit: State, timer: DevfreqTimer, window: Duration, timers: &mut TimerSlots<DevfreqTimer>) {
        if !timers.cancel(timer) {
            self.shared.state.set(bit);
            self.update_floor();
        }
        timers.arm_after(timer, window);
    }

    fn boost_until(&self, bit: State, timer: DevfreqTimer, deadline_ms: u64, timers: &mut TimerSlots<DevfreqTimer>) {
        if !timers.cancel(timer) {
            self.shared.state.set(bit);
            self.update_floor();
        }
        timers.arm_at(timer, self.shared.epoch + Duration::from_millis(deadline_ms));
    }

    fn unboost(&self, bit: State) {
        self.shared.state.clear(bit);
        self.update_floor();
    }
}

impl Actor for DevfreqEngine {
    type Event = DevfreqEvent;
    type Timer = DevfreqTimer;

    fn on_event(&mut self, event: DevfreqEvent, timers: &mut TimerSlots<DevfreqTimer>) {
        let t = self.shared.tunables.load();
        match event {
            DevfreqEvent::Input => self.boost(
                State::INPUT_BOOST,
                DevfreqTimer::InputUnboost,
                Duration::from_millis(t.devfreq_input_boost_ms as u64),
                timers,
            ),
            DevfreqEvent::Flex => self.boost(
                State::FLEX_BOOST,
                DevfreqTimer::FlexUnboost,
                Duration::from_millis(t.devfreq_flex_boost_ms as u64),
                timers,
            ),
            DevfreqEvent::Max => self.boost_until(
                State::MAX_BOOST,
                DevfreqTimer::MaxUnboost,
                self.shared.max_deadline.deadline_ms(),
                timers,
            ),
            DevfreqEvent::Wake => self.boost_until(
                State::WAKE_BOOST,
                DevfreqTimer::WakeUnboost,
                self.shared.wake_deadline.deadline_ms(),
                timers,
            ),
            DevfreqEvent::Refresh => self.update_floor(),
        }
    }

    fn on_timer(&mut self, timer: DevfreqTimer, _timers: &mut TimerSlots<DevfreqTimer>) {
        match timer {
            DevfreqTimer::InputUnboost => self.unboost(State::INPUT_BOOST),
            DevfreqTimer::FlexUnboost => self.unboost(State::FLEX_BOOST),
            DevfreqTimer::MaxUnboost => self.unboost(State::MAX_BOOST),
            DevfreqTimer::WakeUnboost => self.unboost(State::WAKE_BOOST),
        }
    }
}

/// Boost coordinator for one devfreq device.
pub struct DevfreqBoostDomain {
    shared: Arc<DevfreqShared>,
    worker: Option<Worker<DevfreqEvent>>,
}

impl DevfreqBoostDomain {
    pub fn new(tunables: Arc<TunableStore>) -> Self {
        let shared = Arc::new(DevfreqShared {
            state: StateCell::new(),
            max_deadline: ExpiryCell::new(),
            wake_deadline: ExpiryCell::new(),
            device: OnceCell::new(),
            epoch: Instant::now(),
            tunables,
        });

        let engine = DevfreqEngine {
            shared: Arc::clone(&shared),
        };
        let priority = shared.tunables.load().worker_priority;
        let worker = match Worker::spawn("devfreq_boostd", priority, engine) {
            Ok(worker) => Some(worker),
            Err(err) => {
                error!("devfreq boost domain disabled: {err}");
                None
            }
        };

        Self { shared, worker }
    }

    /// Bind the device this domain drives. One-shot; the floor is pushed
    /// immediately so a device probed mid-boost catches up.
    pub fn register_device(&self, device: Arc<dyn DevfreqDevice>) {
        if self.shared.device.set(device).is_err() {
            warn!("devfreq device already registered, ignoring");
            return;
        }
        if let Some(worker) = &self.worker {
            worker.send(DevfreqEvent::Refresh);
        }
    }

    pub fn kick(&self) {
        let Some(worker) = &self.worker else { return };
        // Kicks before the device binds leave everything untouched.
        if self.shared.device.get().is_none() {
            return;
        }
        if self.shared.state.read().contains(State::SCREEN_OFF) {
            return;
        }
        worker.send(DevfreqEvent::Input);
    }

    pub fn kick_flex(&self) {
        let Some(worker) = &self.worker else { return };
        if self.shared.device.get().is_none() {
            return;
        }
        if self.shared.state.read().contains(State::SCREEN_OFF) {
            return;
        }
        worker.send(DevfreqEvent::Flex);
    }

    /// Pin the device to its maximum for at least `duration`, extend-only.
    pub fn kick_max(&self, duration: Duration) {
        let Some(worker) = &self.worker else { return };
        if self.shared.device.get().is_none() {
            return;
        }
        if self.shared.state.read().contains(State::SCREEN_OFF) {
            return;
        }
        let now = ticks_ms(self.shared.epoch);
        if self.shared.max_deadline.extend(now, duration).is_some() {
            worker.send(DevfreqEvent::Max);
        }
    }

    /// Wake boost: only meaningful while the display is still marked off,
    /// i.e. on the transition back to awake.
    pub fn kick_wake(&self, duration: Duration) {
        let Some(worker) = &self.worker else { return };
        if self.shared.device.get().is_none() {
            return;
        }
        if !self.shared.state.read().contains(State::SCREEN_OFF) {
            return;
        }
        let now = ticks_ms(self.shared.epoch);
        if self.shared.wake_deadline.extend(now, duration).is_some() {
            worker.send(DevfreqEvent::Wake);
        }
    }

    pub fn screen_state_changed(&self, awake: bool) {
        let Some(worker) = &self.worker else { return };
        if awake {
            // Arm the wake boost while SCREEN_OFF is still set, then lift it.
            let t = self.shared.tunables.load();
            self.kick_wake(Duration::from_millis(t.devfreq_wake_boost_ms as u64));
            self.shared.state.clear(State::SCREEN_OFF);
            worker.send(DevfreqEvent::Refresh);
        } else {
            self.shared.state.set(State::SCREEN_OFF);
            worker.send(DevfreqEvent::Refresh);
        }
    }

    pub fn state(&self) -> State {
        self.shared.state.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::mock::MockDevfreq;
    use crate::tunables::Tunables;
    use std::sync::atomic::Ordering;

    fn fixture(tunables: Tunables) -> (DevfreqEngine, Arc<MockDevfreq>) {
        let shared = Arc::new(DevfreqShared {
            state: StateCell::new(),
            max_deadline: ExpiryCell::new(),
            wake_deadline: ExpiryCell::new(),
            device: OnceCell::new(),
            epoch: Instant::now(),
            tunables: TunableStore::new(tunables),
        });
        let device = Arc::new(MockDevfreq::default());
        let dyn_device: Arc<dyn DevfreqDevice> = device.clone();
        shared.device.set(dyn_device).ok().unwrap();
        (DevfreqEngine { shared }, device)
    }

    #[test]
    fn kicks_before_device_binds_leave_state_untouched() {
        let tunables = TunableStore::new(Tunables {
            worker_priority: 0,
            ..Tunables::default()
        });
        let domain = DevfreqBoostDomain::new(tunables);

        domain.kick();
        domain.kick_flex();
        domain.kick_max(Duration::from_millis(500));
        std::thread::sleep(Duration::from_millis(20));

        // No bits, no armed deadlines, nothing for a late device to inherit.
        assert!(domain.state().is_empty());
        assert_eq!(domain.shared.max_deadline.deadline_ms(), 0);
        assert_eq!(domain.shared.wake_deadline.deadline_ms(), 0);

        let device = Arc::new(MockDevfreq::default());
        domain.register_device(device.clone());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(device.floor.load(Ordering::Relaxed), 200_000_000);

        // Kicks start working once the device is bound.
        domain.kick();
        std::thread::sleep(Duration::from_millis(20));
        assert!(domain.state().contains(State::INPUT_BOOST));
        assert_eq!(device.floor.load(Ordering::Relaxed), 1_017_600_000);
    }

    #[test]
    fn input_and_flex_both_raise_the_floor() {
        let (mut engine, device) = fixture(Tunables::default());
        let mut timers = TimerSlots::new();

        engine.on_event(DevfreqEvent::Flex, &mut timers);
        assert_eq!(device.floor.load(Ordering::Relaxed), 1_017_600_000);
        assert!(!device.max_boost.load(Ordering::Relaxed));

        engine.on_event(DevfreqEvent::Input, &mut timers);
        assert_eq!(device.floor.load(Ordering::Relaxed), 1_017_600_000);

        // Input expiring while flex holds must keep the floor raised.
        timers.cancel(DevfreqTimer::InputUnboost);
        engine.on_timer(DevfreqTimer::InputUnboost, &mut timers);
        assert_eq!(device.floor.load(Ordering::Relaxed), 1_017_600_000);

        timers.cancel(DevfreqTimer::FlexUnboost);
        engine.on_timer(DevfreqTimer::FlexUnboost, &mut timers);
        assert_eq!(device.floor.load(Ordering::Relaxed), 200_000_000);
    }

    #[test]
    fn boost_freq_clamped_to_device_max() {
        let mut t = Tunables::default();
        t.devfreq_boost_freq = 5_000_000_000;
        let (mut engine, device) = fixture(t);
        let mut timers = TimerSlots::new();

        engine.on_event(DevfreqEvent::Input, &mut timers);
        assert_eq!(device.floor.load(Ordering::Relaxed), 1_804_800_000);
    }

    #[test]
    fn max_boost_pins_independent_of_floor() {
        let (mut engine, device) = fixture(Tunables::default());
        let mut timers = TimerSlots::new();

        engine
            .shared
            .max_deadline
            .extend(0, Duration::from_millis(500));
        engine.on_event(DevfreqEvent::Max, &mut timers);
        assert!(device.max_boost.load(Ordering::Relaxed));
        assert_eq!(device.floor.load(Ordering::Relaxed), 200_000_000);

        engine.on_timer(DevfreqTimer::MaxUnboost, &mut timers);
        assert!(!device.max_boost.load(Ordering::Relaxed));
    }

    #[test]
    fn screen_off_forces_the_unboosted_floor() {
        let (mut engine, device) = fixture(Tunables::default());
        let mut timers = TimerSlots::new();

        engine.on_event(DevfreqEvent::Input, &mut timers);
        engine
            .shared
            .max_deadline
            .extend(0, Duration::from_millis(500));
        engine.on_event(DevfreqEvent::Max, &mut timers);

        engine.shared.state.set(State::SCREEN_OFF);
        engine.on_event(DevfreqEvent::Refresh, &mut timers);
        assert_eq!(device.floor.load(Ordering::Relaxed), 200_000_000);
        assert!(!device.max_boost.load(Ordering::Relaxed));
    }

    #[test]
    fn wake_kick_only_fires_on_the_off_to_on_transition() {
        let tunables = TunableStore::new(Tunables {
            worker_priority: 0,
            ..Tunables::default()
        });
        let domain = DevfreqBoostDomain::new(tunables);
        let device = Arc::new(MockDevfreq::default());
        domain.register_device(device.clone());

        // Screen is on: wake kicks are meaningless and ignored.
        domain.kick_wake(Duration::from_millis(500));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!domain.state().contains(State::WAKE_BOOST));

        domain.screen_state_changed(false);
        std::thread::sleep(Duration::from_millis(20));
        domain.kick();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!domain.state().contains(State::INPUT_BOOST));

        domain.screen_state_changed(true);
        std::thread::sleep(Duration::from_millis(20));
        assert!(domain.state().contains(State::WAKE_BOOST));
        assert!(device.max_boost.load(Ordering::Relaxed));
    }
}
