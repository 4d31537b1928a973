// BgpLab: BGP Lab Simulator written in Rust
// Copyright (C) 2022-2023 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Discrete simulation clock and tick-driven timers. There is no real-time dependency anywhere:
//! time only moves when [`crate::engine::Engine::tick`] is called, which keeps every run
//! reproducible.

use serde::{Deserialize, Serialize};

/// The global simulation clock. Holds the current simulated time in milliseconds and the number of
/// positive-duration ticks performed so far. Zero-duration ticks do not advance the clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimClock {
    now_ms: u64,
    tick: u64,
}

impl SimClock {
    /// Current simulated time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Number of positive-duration ticks performed so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub(crate) fn advance(&mut self, ms: u64) {
        debug_assert!(ms > 0);
        self.now_ms += ms;
        self.tick += 1;
    }
}

/// A countdown timer advanced in discrete steps. An interval of zero disables the timer entirely:
/// [`Timer::restart`] becomes a no-op and the timer never fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Timer {
    interval_ms: u64,
    remaining_ms: Option<u64>,
    periodic: bool,
}

impl Timer {
    /// Create a stopped one-shot timer. It fires once after its interval and must be restarted
    /// explicitly.
    pub(crate) fn one_shot(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            remaining_ms: None,
            periodic: false,
        }
    }

    /// Create a stopped periodic timer. It re-arms itself after every expiry.
    pub(crate) fn periodic(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            remaining_ms: None,
            periodic: true,
        }
    }

    /// (Re-)arm the timer to its full interval. No-op for a disabled (zero-interval) timer.
    pub(crate) fn restart(&mut self) {
        if self.interval_ms > 0 {
            self.remaining_ms = Some(self.interval_ms);
        }
    }

    /// Stop the timer without firing.
    pub(crate) fn stop(&mut self) {
        self.remaining_ms = None;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.remaining_ms.is_some()
    }

    /// Advance the timer by `ms` milliseconds and return how many times it fired. A one-shot timer
    /// fires at most once and stops; a periodic timer may fire several times if `ms` spans
    /// multiple intervals.
    pub(crate) fn advance(&mut self, ms: u64) -> u32 {
        let Some(mut remaining) = self.remaining_ms else {
            return 0;
        };
        let mut elapsed = ms;
        let mut fired = 0;
        while elapsed >= remaining {
            elapsed -= remaining;
            fired += 1;
            if !self.periodic {
                self.remaining_ms = None;
                return fired;
            }
            remaining = self.interval_ms;
        }
        self.remaining_ms = Some(remaining - elapsed);
        fired
    }
}
