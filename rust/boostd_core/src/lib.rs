// SPDX-License-Identifier: GPL-2.0
//
// boostd: event-driven performance boost coordinator
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Core coordination engine for the boostd performance daemon.
//!
//! Two independent boost domains share the same building blocks: a lock-free
//! state word, extend-only expiry cells and a per-domain dispatcher thread
//! that owns all unboost timers. Event sources stay wait-free; everything
//! that can block lives behind the dispatcher channel.

pub mod cluster;
pub mod cpu;
pub mod deadline;
pub mod devfreq;
pub mod sink;
pub mod state;
pub mod tunables;
pub mod worker;

pub use cluster::{Cluster, ClusterMap};
pub use cpu::{CpuBoostDomain, CpuSinks};
pub use devfreq::DevfreqBoostDomain;
pub use sink::{CgroupBoost, Clamp, DevfreqDevice, GpuPower, PolicyLimits, PolicyRefresh, SlotHandle};
pub use state::State;
pub use tunables::{TunableStore, Tunables};
