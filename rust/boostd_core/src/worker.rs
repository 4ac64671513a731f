// SPDX-License-Identifier: GPL-2.0
//
// boostd: event-driven performance boost coordinator
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Per-domain dispatcher: one dedicated worker thread consuming a channel,
//! pinned to the housekeeping CPUs and raised to SCHED_FIFO so boost
//! application is never delayed by the load it counteracts.
//!
//! The worker owns every pending unboost timer, so arming a replacement is
//! synchronous cancellation: a replaced timer can never fire late. Work for
//! one domain is processed strictly one item at a time; distinct domains run
//! fully in parallel.

use std::marker::PhantomData;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use log::warn;
use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;

/// CPUs the worker threads are bound to. Matches the housekeeping set used
/// for all boost application work.
const WORKER_CPUS: [usize; 4] = [0, 1, 2, 3];

/// A fixed enumeration of deferred-timer identities for one domain.
pub trait TimerKind: Copy + Send + 'static {
    const COUNT: usize;
    fn index(self) -> usize;
    fn from_index(idx: usize) -> Self;
}

/// The pending unboost timers owned by a worker thread.
pub struct TimerSlots<K: TimerKind> {
    due: Vec<Option<Instant>>,
    _kind: PhantomData<K>,
}

impl<K: TimerKind> TimerSlots<K> {
    pub fn new() -> Self {
        Self {
            due: vec![None; K::COUNT],
            _kind: PhantomData,
        }
    }

    /// Arm (or re-arm, replacing any pending instance) a timer.
    pub fn arm_at(&mut self, kind: K, at: Instant) {
        self.due[kind.index()] = Some(at);
    }

    pub fn arm_after(&mut self, kind: K, delay: Duration) {
        self.arm_at(kind, Instant::now() + delay);
    }

    /// Cancel a timer, reporting whether it was pending. The dispatcher's
    /// re-entrancy contract hinges on this: cancelling a pending unboost
    /// means the boost is already live and apply must be skipped.
    pub fn cancel(&mut self, kind: K) -> bool {
        self.due[kind.index()].take().is_some()
    }

    pub fn is_pending(&self, kind: K) -> bool {
        self.due[kind.index()].is_some()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.due.iter().flatten().min().copied()
    }

    fn pop_due(&mut self, now: Instant) -> Option<K> {
        let idx = self
            .due
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.map(|at| (i, at)))
            .filter(|&(_, at)| at <= now)
            .min_by_key(|&(_, at)| at)
            .map(|(i, _)| i)?;
        self.due[idx] = None;
        Some(K::from_index(idx))
    }
}

impl<K: TimerKind> Default for TimerSlots<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// One domain's apply/unapply state machine, driven by the worker loop.
pub trait Actor: Send + 'static {
    type Event: Send + 'static;
    type Timer: TimerKind;

    fn on_event(&mut self, event: Self::Event, timers: &mut TimerSlots<Self::Timer>);
    fn on_timer(&mut self, timer: Self::Timer, timers: &mut TimerSlots<Self::Timer>);
}

/// Handle to a running dispatcher. Dropping it closes the channel and joins
/// the worker.
pub struct Worker<E: Send + 'static> {
    tx: Option<Sender<E>>,
    thread: Option<JoinHandle<()>>,
}

impl<E: Send + 'static> Worker<E> {
    /// Spawn a dispatcher for `actor`. Thread creation failure is the only
    /// hard error; affinity/priority failures degrade with a single warning.
    pub fn spawn<A>(name: &str, priority: u32, mut actor: A) -> Result<Self>
    where
        A: Actor<Event = E>,
    {
        let (tx, rx) = channel::unbounded::<E>();
        let tname = name.to_string();
        let thread = std::thread::Builder::new()
            .name(tname.clone())
            .spawn(move || {
                setup_worker_thread(&tname, priority);

                let mut timers = TimerSlots::<A::Timer>::new();
                loop {
                    let event = match timers.next_deadline() {
                        Some(at) => {
                            let now = Instant::now();
                            if at <= now {
                                if let Some(kind) = timers.pop_due(now) {
                                    actor.on_timer(kind, &mut timers);
                                }
                                continue;
                            }
                            match rx.recv_timeout(at - now) {
                                Ok(ev) => Some(ev),
                                Err(RecvTimeoutError::Timeout) => None,
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                        None => match rx.recv() {
                            Ok(ev) => Some(ev),
                            Err(_) => break,
                        },
                    };

                    match event {
                        Some(ev) => actor.on_event(ev, &mut timers),
                        None => {
                            let now = Instant::now();
                            while let Some(kind) = timers.pop_due(now) {
                                actor.on_timer(kind, &mut timers);
                            }
                        }
                    }
                }
            })
            .with_context(|| format!("failed to spawn {name} worker"))?;

        Ok(Self {
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    /// Enqueue an event. Returns immediately; a closed channel (worker gone)
    /// silently drops the event rather than erroring the caller.
    pub fn send(&self, event: E) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

impl<E: Send + 'static> Drop for Worker<E> {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn setup_worker_thread(name: &str, priority: u32) {
    let mut cpuset = CpuSet::new();
    let nr_cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    for &cpu in WORKER_CPUS.iter().filter(|&&c| c < nr_cpus) {
        let _ = cpuset.set(cpu);
    }
    if let Err(err) = sched_setaffinity(Pid::from_raw(0), &cpuset) {
        warn!("{name}: failed to pin worker to housekeeping CPUs: {err}");
    }

    let param = libc::sched_param {
        sched_priority: priority as i32,
    };
    // SAFETY: plain syscall on the current thread with a stack-local param.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        warn!(
            "{name}: failed to set SCHED_FIFO priority {priority}: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy)]
    struct OneShot;

    impl TimerKind for OneShot {
        const COUNT: usize = 1;
        fn index(self) -> usize {
            0
        }
        fn from_index(_: usize) -> Self {
            OneShot
        }
    }

    struct CountingActor {
        events: Arc<AtomicU32>,
        fired: Arc<AtomicU32>,
    }

    impl Actor for CountingActor {
        type Event = Duration;
        type Timer = OneShot;

        fn on_event(&mut self, delay: Duration, timers: &mut TimerSlots<OneShot>) {
            self.events.fetch_add(1, Ordering::Relaxed);
            timers.arm_after(OneShot, delay);
        }

        fn on_timer(&mut self, _: OneShot, _: &mut TimerSlots<OneShot>) {
            self.fired.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn rearm_replaces_pending_timer() {
        let events = Arc::new(AtomicU32::new(0));
        let fired = Arc::new(AtomicU32::new(0));
        let worker = Worker::spawn(
            "test_worker",
            0,
            CountingActor {
                events: events.clone(),
                fired: fired.clone(),
            },
        )
        .unwrap();

        // Three kicks inside one window: one timer fires, not three.
        for _ in 0..3 {
            worker.send(Duration::from_millis(40));
            std::thread::sleep(Duration::from_millis(5));
        }
        std::thread::sleep(Duration::from_millis(80));

        assert_eq!(events.load(Ordering::Relaxed), 3);
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn drop_joins_worker() {
        let events = Arc::new(AtomicU32::new(0));
        let fired = Arc::new(AtomicU32::new(0));
        let worker = Worker::spawn(
            "test_worker_drop",
            0,
            CountingActor {
                events: events.clone(),
                fired,
            },
        )
        .unwrap();
        worker.send(Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(20));
        drop(worker);
        assert_eq!(events.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn timer_slots_order() {
        let mut slots: TimerSlots<OneShot> = TimerSlots::new();
        assert!(!slots.cancel(OneShot));
        slots.arm_after(OneShot, Duration::from_millis(10));
        assert!(slots.is_pending(OneShot));
        assert!(slots.cancel(OneShot));
        assert!(!slots.is_pending(OneShot));
    }
}
