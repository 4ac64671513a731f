// SPDX-License-Identifier: GPL-2.0
//
// boostd: event-driven performance boost coordinator
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Runtime-tunable boost parameters.
//!
//! Every value is read fresh at apply time, never latched for the life of a
//! boost: swapping the table mid-flight affects the next scheduling decision,
//! not an already-armed timer.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// The full tunable surface, validated only by type.
///
/// CPU frequencies are in kHz, devfreq frequencies in Hz, GPU frequencies in
/// MHz (they index the power-level table, see `cpu::gpu_boost_level`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    pub input_boost_freq_lp: u32,
    pub input_boost_freq_hp: u32,
    pub input_boost_ms: u32,
    pub remove_boost_freq_lp: u32,
    pub remove_boost_freq_hp: u32,
    pub flex_boost_freq_lp: u32,
    pub flex_boost_freq_hp: u32,
    pub flex_boost_ms: u32,
    pub wake_boost_ms: u32,

    pub gpu_boost_freq: u32,
    pub gpu_min_freq: u32,
    pub gpu_extender_ms: u32,

    /// Base dynamic boost level for the foreground task group; each kind
    /// adds its own offset on top.
    pub cgroup_dynamic_level: i32,
    pub cgroup_input_offset: i32,
    pub cgroup_max_offset: i32,
    pub cgroup_flex_offset: i32,
    pub cgroup_extender_ms: u32,
    /// Level applied to the root group while the display sleeps.
    pub suspend_cgroup_level: i32,

    pub worker_priority: u32,

    pub devfreq_boost_freq: u64,
    pub devfreq_input_boost_ms: u32,
    pub devfreq_flex_boost_ms: u32,
    pub devfreq_wake_boost_ms: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            input_boost_freq_lp: 1_324_800,
            input_boost_freq_hp: 1_420_800,
            input_boost_ms: 100,
            remove_boost_freq_lp: 576_000,
            remove_boost_freq_hp: 825_600,
            flex_boost_freq_lp: 1_516_800,
            flex_boost_freq_hp: 1_766_400,
            flex_boost_ms: 250,
            wake_boost_ms: 1000,
            gpu_boost_freq: 342,
            gpu_min_freq: 257,
            gpu_extender_ms: 1000,
            cgroup_dynamic_level: 20,
            cgroup_input_offset: 5,
            cgroup_max_offset: 30,
            cgroup_flex_offset: 0,
            cgroup_extender_ms: 1000,
            suspend_cgroup_level: -10,
            worker_priority: 50,
            devfreq_boost_freq: 1_017_600_000,
            devfreq_input_boost_ms: 80,
            devfreq_flex_boost_ms: 250,
            devfreq_wake_boost_ms: 1000,
        }
    }
}

/// Shared, hot-swappable tunable table.
#[derive(Debug)]
pub struct TunableStore(ArcSwap<Tunables>);

impl TunableStore {
    pub fn new(tunables: Tunables) -> Arc<Self> {
        Arc::new(Self(ArcSwap::from_pointee(tunables)))
    }

    pub fn load(&self) -> Arc<Tunables> {
        self.0.load_full()
    }

    pub fn store(&self, tunables: Tunables) {
        self.0.store(Arc::new(tunables));
    }
}
