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

#![deny(missing_docs, missing_debug_implementations)]

//! # BgpLab
//!
//! This is a library simulating networks of BGP routers for educational labs. A lab document
//! describes a topology of routers and neighbor sessions; the engine maintains the per-router
//! routing tables (Adj-RIB-In, Loc-RIB, Adj-RIB-Out), runs one RFC-4271-shaped session state
//! machine per neighbor, selects best paths with the standard BGP tie-break chain whenever routes
//! change, and propagates updates and withdrawals under the eBGP/iBGP split-horizon and
//! route-reflection rules.
//!
//! ## Main concepts
//!
//! The [`engine::Engine`] is the main structure to operate on. It owns one simulation at a time:
//! loading a lab ([`engine::Engine::load_lab`]) replaces all prior state atomically, and
//! [`engine::Engine::tick`] advances the simulation in discrete steps. A tick fires the due
//! session timers, completes pending handshakes, and exchanges BGP messages until the network has
//! converged. There are no sockets and no wire formats: protocol semantics are simulated, not
//! bytes.
//!
//! Everything is deterministic. Messages travel through a FIFO queue, routers and sessions are
//! visited in a fixed order, and time only moves when `tick` is called, so the same lab and the
//! same commands always produce the same tables.
//!
//! Policy objects (route-maps, community-lists, AS-path-lists, prefix-lists) are opaque named
//! references. Each name resolves to accept (the default), reject, or accept-with-overrides; see
//! [`engine::Engine::set_policy_action`].
//!
//! ## Example usage
//!
//! Two routers in different ASes, one eBGP session, and one seeded route. After a single tick the
//! session is established and the route has propagated:
//!
//! ```
//! use bgplab::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut engine = Engine::new();
//!     engine.load_lab_json(
//!         r#"{
//!             "id": "two-as",
//!             "name": "Two ASes",
//!             "routers": [
//!                 { "id": "x", "asn": 65001, "routerId": "10.0.0.1" },
//!                 { "id": "y", "asn": 65002, "routerId": "10.0.0.2" }
//!             ],
//!             "neighbors": [
//!                 {
//!                     "id": "x-y",
//!                     "localRouterId": "x",
//!                     "peerRouterId": "y",
//!                     "localAs": 65001,
//!                     "peerAs": 65002
//!                 }
//!             ],
//!             "initialRibs": [
//!                 {
//!                     "routerId": "x",
//!                     "entry": {
//!                         "prefix": "10.1.0.0/24",
//!                         "source": "local",
//!                         "nextHop": "10.0.0.1"
//!                     }
//!                 }
//!             ]
//!         }"#,
//!     )?;
//!
//!     let report = engine.tick(1000)?;
//!     assert!(!report.events.is_empty());
//!     assert_eq!(engine.session_state("x-y"), Some(FsmState::Established));
//!
//!     let rib = engine.loc_rib("y").unwrap();
//!     assert_eq!(rib.len(), 1);
//!     assert_eq!(rib[0].source, RouteSource::EBgp);
//!     assert_eq!(rib[0].next_hop, "10.0.0.1".parse::<std::net::Ipv4Addr>()?);
//!     Ok(())
//! }
//! ```

pub mod bgp;
pub mod clock;
pub mod engine;
pub mod event;
pub mod lab;
pub mod policy;
pub mod prelude;
pub mod rib;
mod router;
pub mod session;
pub mod types;

#[cfg(test)]
mod test;
