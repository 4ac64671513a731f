// SPDX-License-Identifier: GPL-2.0
//
// boostd: event-driven performance boost coordinator
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Per-domain boost state bits.
    ///
    /// The CPU domain uses `SCREEN_AWAKE` polarity, the devfreq domain uses
    /// `SCREEN_OFF`. The `*_SLOT` bits track an outstanding cgroup boost
    /// grant per kind; `INPUT_GPU` tracks a held GPU power floor. A slot bit
    /// may only be set while the matching boost bit is set or during its
    /// extender window.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct State: u32 {
        const SCREEN_AWAKE = 1 << 0;
        const INPUT_BOOST  = 1 << 1;
        const WAKE_BOOST   = 1 << 2;
        const MAX_BOOST    = 1 << 3;
        const FLEX_BOOST   = 1 << 4;
        const INPUT_SLOT   = 1 << 5;
        const MAX_SLOT     = 1 << 6;
        const FLEX_SLOT    = 1 << 7;
        const INPUT_GPU    = 1 << 8;
        const SCREEN_OFF   = 1 << 9;
    }
}

/// Lock-free boost state shared between event-source callers, the domain
/// worker and clamp queries. Set/clear are single atomic RMW ops; no
/// operation blocks or fails.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU32);

impl StateCell {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn set(&self, bits: State) {
        self.0.fetch_or(bits.bits(), Ordering::Relaxed);
    }

    pub fn clear(&self, bits: State) {
        self.0.fetch_and(!bits.bits(), Ordering::Relaxed);
    }

    pub fn read(&self) -> State {
        State::from_bits_truncate(self.0.load(Ordering::Relaxed))
    }
}
