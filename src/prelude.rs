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

//! Convenience re-export of common members.

pub use crate::bgp::{BgpRoute, Origin, PathAttributes, RibCandidate, RibEntry, RouteSource};
pub use crate::engine::Engine;
pub use crate::event::{SessionView, SimEvent, TickReport};
pub use crate::lab::{
    AddressFamily, AfiSafi, InterfaceSpec, LabDocument, NeighborSpec, PolicyRefs, RibSeed,
    RouterKnobs, RouterSpec, SessionType, TimerSpec,
};
pub use crate::policy::{AttributeOverride, PolicyAction};
pub use crate::session::{FsmState, SessionFault};
pub use crate::types::{AsId, LoadError, RouterId, SimError};
