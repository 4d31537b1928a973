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

//! Module containing all type definitions

use petgraph::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lab::AddressFamily;

pub(crate) type IndexType = u32;
/// Router Identification (and index into the graph)
pub type RouterId = NodeIndex<IndexType>;

/// AS Number
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AsId(pub u32);

impl std::fmt::Display for AsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AS{}", self.0)
    }
}

impl From<u32> for AsId {
    fn from(x: u32) -> Self {
        Self(x)
    }
}

/// Link Weight for the IGP graph
pub type LinkWeight = f64;
/// IGP Network graph
pub type IgpNetwork = StableGraph<(), LinkWeight, Directed, IndexType>;

/// Errors raised while adopting a lab document. A rejected document leaves the previously loaded
/// lab untouched.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Two routers in the document share the same id.
    #[error("duplicate router id: {0}")]
    DuplicateRouter(String),
    /// Two neighbors in the document share the same id.
    #[error("duplicate neighbor id: {0}")]
    DuplicateNeighbor(String),
    /// Two neighbors describe a session between the same pair of routers.
    #[error("neighbor {0} duplicates the session between {1} and {2}")]
    DuplicateSession(String, String, String),
    /// A neighbor references a router id that does not appear in the document.
    #[error("neighbor {neighbor} references unknown router {router}")]
    UnknownRouter {
        /// The neighbor holding the dangling reference.
        neighbor: String,
        /// The router id that could not be resolved.
        router: String,
    },
    /// A neighbor lists the same router as both endpoints.
    #[error("neighbor {0} connects a router to itself")]
    SelfSession(String),
    /// The local or peer AS of a neighbor disagrees with the AS configured on the routers.
    #[error("neighbor {0}: local/peer AS does not match the router configuration")]
    AsMismatch(String),
    /// The declared session type contradicts the AS numbers of the endpoints.
    #[error("neighbor {0}: declared session type contradicts the AS numbers")]
    SessionTypeMismatch(String),
    /// The route-reflector client flag is only meaningful on iBGP sessions.
    #[error("neighbor {0}: route-reflector client flag on an eBGP session")]
    ReflectorClientOnEbgp(String),
    /// A neighbor enables an address family that one of its endpoints does not support.
    #[error("neighbor {neighbor}: address family {family} not enabled on both routers")]
    AddressFamilyMismatch {
        /// The offending neighbor.
        neighbor: String,
        /// The address family missing on at least one endpoint.
        family: AddressFamily,
    },
    /// A neighbor enables no address family at all.
    #[error("neighbor {0} enables no address family")]
    NoAddressFamily(String),
    /// An initial RIB seed references a router id that does not appear in the document.
    #[error("initial RIB seed references unknown router {0}")]
    UnknownSeedRouter(String),
    /// `max_paths` must be at least 1.
    #[error("router {0}: max-paths must be at least 1")]
    InvalidMaxPaths(String),
    /// The lab document is not valid JSON.
    #[error("{0}")]
    JsonError(Box<serde_json::Error>),
    /// Selecting the initial routes from the lab seeds failed.
    #[error("initial state: {0}")]
    InitialState(#[from] SimError),
}

impl From<serde_json::Error> for LoadError {
    fn from(value: serde_json::Error) -> Self {
        Self::JsonError(Box::new(value))
    }
}

impl PartialEq for LoadError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::DuplicateRouter(l), Self::DuplicateRouter(r)) => l == r,
            (Self::DuplicateNeighbor(l), Self::DuplicateNeighbor(r)) => l == r,
            (Self::DuplicateSession(l0, l1, l2), Self::DuplicateSession(r0, r1, r2)) => {
                l0 == r0 && l1 == r1 && l2 == r2
            }
            (
                Self::UnknownRouter {
                    neighbor: ln,
                    router: lr,
                },
                Self::UnknownRouter {
                    neighbor: rn,
                    router: rr,
                },
            ) => ln == rn && lr == rr,
            (Self::SelfSession(l), Self::SelfSession(r)) => l == r,
            (Self::AsMismatch(l), Self::AsMismatch(r)) => l == r,
            (Self::SessionTypeMismatch(l), Self::SessionTypeMismatch(r)) => l == r,
            (Self::ReflectorClientOnEbgp(l), Self::ReflectorClientOnEbgp(r)) => l == r,
            (
                Self::AddressFamilyMismatch {
                    neighbor: ln,
                    family: lf,
                },
                Self::AddressFamilyMismatch {
                    neighbor: rn,
                    family: rf,
                },
            ) => ln == rn && lf == rf,
            (Self::NoAddressFamily(l), Self::NoAddressFamily(r)) => l == r,
            (Self::UnknownSeedRouter(l), Self::UnknownSeedRouter(r)) => l == r,
            (Self::InvalidMaxPaths(l), Self::InvalidMaxPaths(r)) => l == r,
            (Self::JsonError(l), Self::JsonError(r)) => l.to_string() == r.to_string(),
            (Self::InitialState(l), Self::InitialState(r)) => l == r,
            _ => false,
        }
    }
}

/// Errors raised while driving a loaded simulation. Session faults (hold-timer expiry, malformed
/// OPEN, max-prefix overrun) are *not* errors: the FSM recovers from them and they are reported as
/// [`crate::event::SimEvent`]s instead.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SimError {
    /// No lab document has been loaded yet.
    #[error("no lab is loaded")]
    NoLabLoaded,
    /// A command referenced a router id that is not part of the loaded lab.
    #[error("unknown router: {0}")]
    UnknownRouter(String),
    /// A command referenced a neighbor id that is not part of the loaded lab.
    #[error("unknown neighbor: {0}")]
    UnknownNeighbor(String),
    /// The exchange of BGP messages did not converge within the message limit.
    #[error("simulation cannot converge in the given time")]
    NoConvergence,
    /// An internal invariant of the engine was violated. This indicates a bug in the engine, not a
    /// simulated network condition, and aborts the current tick.
    #[error("engine invariant violated: {0}")]
    InvariantViolation(String),
}
