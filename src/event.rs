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

//! Module for defining events: the internal BGP message queue entries, and the observable
//! simulation events reported back to the caller.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::bgp::BgpEvent;
use crate::session::{FsmState, SessionFault};
use crate::types::RouterId;

/// One BGP message in flight from one router to another. Messages are delivered in FIFO order,
/// which keeps every run deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MessageEvent {
    pub from: RouterId,
    pub to: RouterId,
    pub event: BgpEvent,
}

/// An observable event that occurred while the simulation advanced. Session faults and best-path
/// changes are reported this way; they are never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SimEvent {
    /// A neighbor session completed its handshake.
    SessionEstablished {
        /// The neighbor id from the lab document.
        neighbor: String,
    },
    /// A neighbor session failed back to Idle.
    SessionDown {
        /// The neighbor id from the lab document.
        neighbor: String,
        /// Why the session failed.
        fault: SessionFault,
    },
    /// A router selected a different best path for a prefix (or lost the last one).
    BestPathChanged {
        /// The router id from the lab document.
        router: String,
        /// The affected prefix.
        prefix: Ipv4Net,
        /// The new best next hop, or `None` if the prefix was withdrawn.
        next_hop: Option<Ipv4Addr>,
    },
}

/// A summary of everything that happened during one [`crate::engine::Engine::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// Number of positive-duration ticks performed so far.
    pub tick: u64,
    /// Simulated time after this tick, in milliseconds.
    pub now_ms: u64,
    /// Number of BGP messages processed while settling.
    pub messages: usize,
    /// Everything observable that happened, in order.
    pub events: Vec<SimEvent>,
}

/// The state of one neighbor session as exposed by the query interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// The neighbor id from the lab document.
    pub neighbor: String,
    /// The two endpoints, as lab router ids.
    pub local: String,
    /// The peer endpoint.
    pub peer: String,
    /// The current FSM state.
    pub state: FsmState,
}
