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

//! Module containing definitions for BGP: path attributes, routes, RIB entries, and the simulated
//! message exchanged between peers.

mod decision;
pub(crate) use decision::{select_best, DecisionConfig};

use crate::types::{AsId, LinkWeight, RouterId};

use ipnet::Ipv4Net;
use ordered_float::NotNan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// Default LOCAL_PREF applied when the attribute is absent.
pub const DEFAULT_LOCAL_PREF: u32 = 100;
/// Default MED applied when the attribute is absent. Absent MED compares as 0.
pub const DEFAULT_MED: u32 = 0;
/// Default administrative weight of a route. Weight is local to a router and never propagated.
pub const DEFAULT_WEIGHT: u32 = 100;

/// ORIGIN attribute. The variants are ordered by preference: IGP beats EGP beats INCOMPLETE.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// The route originates from an interior gateway protocol.
    #[default]
    Igp,
    /// The route originates from the (historic) EGP protocol.
    Egp,
    /// The origin of the route is unknown (e.g., redistributed).
    Incomplete,
}

/// AGGREGATOR attribute: the AS and BGP identifier of the router that formed an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregator {
    /// AS number of the aggregating router.
    pub asn: AsId,
    /// BGP identifier of the aggregating router.
    pub router_id: Ipv4Addr,
}

/// The immutable set of BGP path attributes attached to a route. Updates replace the whole value
/// rather than mutating it in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathAttributes {
    /// ORIGIN of the route.
    pub origin: Origin,
    /// AS-PATH, where the origin of the route is last, and the ID of a new AS is prepended.
    pub as_path: Vec<AsId>,
    /// MED (Multi-Exit Discriminator). Absent compares as [`DEFAULT_MED`].
    pub med: Option<u32>,
    /// LOCAL_PREF. Absent compares as [`DEFAULT_LOCAL_PREF`]. Never crosses an eBGP boundary.
    pub local_pref: Option<u32>,
    /// COMMUNITY values.
    pub communities: BTreeSet<u32>,
    /// Extended community values.
    pub ext_communities: BTreeSet<u64>,
    /// AGGREGATOR, set by the router that formed an aggregate.
    pub aggregator: Option<Aggregator>,
    /// ATOMIC_AGGREGATE flag.
    pub atomic_aggregate: bool,
    /// ORIGINATOR_ID, stamped by a route reflector.
    pub originator_id: Option<Ipv4Addr>,
    /// CLUSTER_LIST, extended on every reflection hop.
    pub cluster_list: Vec<Ipv4Addr>,
    /// Administrative weight. Local to the router, the most preferred metric of the decision
    /// process, and never propagated to any peer.
    pub weight: Option<u32>,
}

impl Default for PathAttributes {
    fn default() -> Self {
        Self {
            origin: Origin::Igp,
            as_path: Vec::new(),
            med: None,
            local_pref: None,
            communities: BTreeSet::new(),
            ext_communities: BTreeSet::new(),
            aggregator: None,
            atomic_aggregate: false,
            originator_id: None,
            cluster_list: Vec::new(),
            weight: None,
        }
    }
}

impl PathAttributes {
    /// Applies the default values for any non-mandatory field.
    pub fn apply_default(&mut self) {
        self.local_pref = Some(self.local_pref.unwrap_or(DEFAULT_LOCAL_PREF));
        self.med = Some(self.med.unwrap_or(DEFAULT_MED));
    }

    /// LOCAL_PREF with the default applied.
    pub fn effective_local_pref(&self) -> u32 {
        self.local_pref.unwrap_or(DEFAULT_LOCAL_PREF)
    }

    /// MED with the default applied (absent MED compares as 0).
    pub fn effective_med(&self) -> u32 {
        self.med.unwrap_or(DEFAULT_MED)
    }

    /// Administrative weight with the default applied.
    pub fn effective_weight(&self) -> u32 {
        self.weight.unwrap_or(DEFAULT_WEIGHT)
    }

    /// The neighboring AS the route was learned from: the first entry of the AS-PATH. Locally
    /// originated routes have no neighboring AS.
    pub fn neighboring_as(&self) -> Option<AsId> {
        self.as_path.first().copied()
    }
}

/// From which kind of source a RIB entry was learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteSource {
    /// Learned from an eBGP peer.
    #[serde(rename = "eBGP")]
    EBgp,
    /// Learned from an iBGP peer (including a route reflector).
    #[serde(rename = "iBGP")]
    IBgp,
    /// Originated on this router.
    #[serde(rename = "local")]
    Local,
    /// Formed by aggregation on this router.
    #[serde(rename = "aggregate")]
    Aggregate,
    /// Learned from an iBGP peer that is a route-reflection client of this router.
    #[serde(rename = "rr-client")]
    RrClient,
}

impl RouteSource {
    /// returns true if the route was learned over eBGP
    pub fn is_ebgp(&self) -> bool {
        matches!(self, Self::EBgp)
    }

    /// returns true if the route was learned over iBGP (from a peer or a client)
    pub fn is_ibgp(&self) -> bool {
        matches!(self, Self::IBgp | Self::RrClient)
    }

    /// returns true if the route was originated on this router
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local | Self::Aggregate)
    }
}

impl std::fmt::Display for RouteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteSource::EBgp => write!(f, "eBGP"),
            RouteSource::IBgp => write!(f, "iBGP"),
            RouteSource::Local => write!(f, "local"),
            RouteSource::Aggregate => write!(f, "aggregate"),
            RouteSource::RrClient => write!(f, "rr-client"),
        }
    }
}

/// How a router relates to one of its peers on an established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerKind {
    /// The peer lives in a different AS.
    EBgp,
    /// The peer is an ordinary iBGP peer (or the reflector of this router).
    IBgpPeer,
    /// The peer is a route-reflection client of this router.
    IBgpClient,
}

impl PeerKind {
    /// returns true if the peer is an eBGP peer
    pub fn is_ebgp(&self) -> bool {
        matches!(self, Self::EBgp)
    }

    /// returns true if the peer is an iBGP peer or client
    pub fn is_ibgp(&self) -> bool {
        !self.is_ebgp()
    }
}

impl std::fmt::Display for PeerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerKind::EBgp => write!(f, "eBGP"),
            PeerKind::IBgpPeer => write!(f, "iBGP"),
            PeerKind::IBgpClient => write!(f, "iBGP client"),
        }
    }
}

/// A BGP route as it travels between peers: a prefix, the next hop to reach it, and the path
/// attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BgpRoute {
    /// The destination prefix.
    pub prefix: Ipv4Net,
    /// NEXT_HOP address for reaching the destination.
    pub next_hop: Ipv4Addr,
    /// The path attributes of the route.
    pub attrs: PathAttributes,
}

/// The simulated message exchanged between two established peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BgpEvent {
    /// Withdraw a previously advertised route.
    Withdraw(Ipv4Net),
    /// Update a route, or add a new one.
    Update(BgpRoute),
}

impl BgpEvent {
    /// Returns the prefix for which this event is responsible.
    pub fn prefix(&self) -> Ipv4Net {
        match self {
            Self::Withdraw(p) => *p,
            Self::Update(r) => r.prefix,
        }
    }
}

/// One entry of a routing table: a route plus where it came from and how long it has been
/// installed. Entries are immutable; the aging pass replaces them instead of mutating in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RibEntry {
    /// The destination prefix.
    pub prefix: Ipv4Net,
    /// The path attributes of the route.
    #[serde(rename = "pathAttributes", default)]
    pub attrs: PathAttributes,
    /// The kind of source the route was learned from.
    pub source: RouteSource,
    /// NEXT_HOP address.
    pub next_hop: Ipv4Addr,
    /// Milliseconds since the entry was installed or received.
    #[serde(default)]
    pub age_ms: u64,
}

impl RibEntry {
    /// Return a copy of the entry aged by `ms` milliseconds.
    pub fn aged(&self, ms: u64) -> Self {
        Self {
            age_ms: self.age_ms + ms,
            ..self.clone()
        }
    }
}

/// A [`RibEntry`] decorated with the selection metadata the decision process needs: the peer it
/// was learned from, the IGP cost towards the next hop, and the tick at which it was installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RibCandidate {
    /// The routing table entry itself.
    pub entry: RibEntry,
    /// The peer the route was learned from, or `None` for locally originated routes.
    pub from_peer: Option<RouterId>,
    /// BGP identifier of the advertising peer (self for local routes).
    pub peer_bgp_id: Ipv4Addr,
    /// Address of the advertising peer (self for local routes).
    pub peer_addr: Ipv4Addr,
    /// IGP cost towards the next hop, approximated from configured interface costs.
    pub igp_cost: Option<NotNan<LinkWeight>>,
    /// The tick at which this candidate was installed. Earlier installs win the stability
    /// tie-break.
    pub install_tick: u64,
}
