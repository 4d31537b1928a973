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

//! The lab document: the JSON topology description consumed at load time. Field names follow the
//! camelCase convention of the lab files, and almost everything has a default so that terse
//! hand-written documents load.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::bgp::RibEntry;
use crate::types::{AsId, LoadError};

/// A complete lab: routers, neighbor sessions, and the initial RIB seeds. Loading a document
/// replaces all prior engine state atomically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabDocument {
    /// Unique id of the lab.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// The routers of the topology.
    pub routers: Vec<RouterSpec>,
    /// The neighbor sessions between them.
    #[serde(default)]
    pub neighbors: Vec<NeighborSpec>,
    /// Routes installed into routers when the lab loads.
    #[serde(default)]
    pub initial_ribs: Vec<RibSeed>,
}

/// One router of the lab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterSpec {
    /// Unique id of the router within the lab.
    pub id: String,
    /// Display name. Defaults to the id when omitted.
    #[serde(default)]
    pub name: String,
    /// AS number.
    pub asn: AsId,
    /// BGP identifier.
    pub router_id: Ipv4Addr,
    /// Loopback addresses. The first loopback is the router's primary address.
    #[serde(default)]
    pub loopbacks: Vec<Ipv4Addr>,
    /// Interfaces with their networks and optional costs.
    #[serde(default)]
    pub interfaces: Vec<InterfaceSpec>,
    /// Enabled address families.
    #[serde(default)]
    pub afi_safi: AfiSafi,
    /// Named policy objects owned by this router. Opaque; never evaluated.
    #[serde(default)]
    pub policy: PolicyRefs,
    /// Session timer defaults, in milliseconds.
    #[serde(default)]
    pub timers: TimerSpec,
    /// Per-instance behavior knobs.
    #[serde(default)]
    pub knobs: RouterKnobs,
}

impl Default for RouterSpec {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            asn: AsId(0),
            router_id: Ipv4Addr::UNSPECIFIED,
            loopbacks: Vec::new(),
            interfaces: Vec::new(),
            afi_safi: AfiSafi::default(),
            policy: PolicyRefs::default(),
            timers: TimerSpec::default(),
            knobs: RouterKnobs::default(),
        }
    }
}

impl RouterSpec {
    /// The primary address of the router: its first loopback, or the BGP identifier.
    pub fn primary_addr(&self) -> Ipv4Addr {
        self.loopbacks.first().copied().unwrap_or(self.router_id)
    }
}

/// One interface of a router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceSpec {
    /// Interface name.
    pub name: String,
    /// Interface address.
    pub addr: Ipv4Addr,
    /// The connected network.
    pub network: Ipv4Net,
    /// IGP cost of the interface. Defaults to 1.
    #[serde(default)]
    pub cost: Option<f64>,
}

/// Address family capability flags of a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AfiSafi {
    /// IPv4 unicast. The only family actually simulated.
    pub ipv4: bool,
    /// IPv6 unicast.
    pub ipv6: bool,
    /// VPNv4.
    pub vpnv4: bool,
    /// VPNv6.
    pub vpnv6: bool,
}

impl Default for AfiSafi {
    fn default() -> Self {
        Self {
            ipv4: true,
            ipv6: false,
            vpnv4: false,
            vpnv6: false,
        }
    }
}

impl AfiSafi {
    fn supports(&self, family: AddressFamily) -> bool {
        match family {
            AddressFamily::Ipv4 => self.ipv4,
            AddressFamily::Ipv6 => self.ipv6,
            AddressFamily::Vpnv4 => self.vpnv4,
            AddressFamily::Vpnv6 => self.vpnv6,
        }
    }
}

/// An address family a neighbor session can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4 unicast.
    Ipv4,
    /// IPv6 unicast.
    Ipv6,
    /// VPNv4.
    Vpnv4,
    /// VPNv6.
    Vpnv6,
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6"),
            AddressFamily::Vpnv4 => write!(f, "vpnv4"),
            AddressFamily::Vpnv6 => write!(f, "vpnv6"),
        }
    }
}

/// Named policy objects referenced by a router. Bodies are opaque.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyRefs {
    /// Route-map names.
    pub route_maps: Vec<String>,
    /// Community-list names.
    pub community_lists: Vec<String>,
    /// AS-path-list names.
    pub as_path_lists: Vec<String>,
    /// Prefix-list names.
    pub prefix_lists: Vec<String>,
}

/// Session timer defaults of a router, in milliseconds. A keepalive of 0 disables keepalive
/// generation; a hold time of 0 means the hold timer never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerSpec {
    /// Keepalive interval.
    pub keepalive: u64,
    /// Hold time.
    pub hold: u64,
    /// Connect-retry interval.
    pub connect_retry: u64,
}

impl Default for TimerSpec {
    fn default() -> Self {
        Self {
            keepalive: 60_000,
            hold: 180_000,
            connect_retry: 120_000,
        }
    }
}

/// Per-router behavior knobs consulted by the decision process and the update propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterKnobs {
    /// Compare MED across all neighboring ASes instead of only within one.
    pub always_compare_med: bool,
    /// Evaluate MED groups in deterministic (AS-sorted) order.
    pub deterministic_med: bool,
    /// Keep several equally good paths in the Loc-RIB.
    pub multipath: bool,
    /// Upper bound on retained paths when multipath is enabled.
    pub max_paths: usize,
    /// Accepted for compatibility; additional paths are not advertised.
    pub add_path: bool,
    /// Rewrite the next hop to this router's address when passing eBGP-learned routes to iBGP
    /// peers.
    pub next_hop_self: bool,
}

impl Default for RouterKnobs {
    fn default() -> Self {
        Self {
            always_compare_med: false,
            deterministic_med: false,
            multipath: false,
            max_paths: 1,
            add_path: false,
            next_hop_self: false,
        }
    }
}

/// The declared type of a neighbor session. Optional in the document; when present it must agree
/// with the AS numbers of the endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionType {
    /// The endpoints are in different ASes.
    #[serde(rename = "eBGP")]
    EBgp,
    /// The endpoints share an AS.
    #[serde(rename = "iBGP")]
    IBgp,
}

/// BFD parameters of a neighbor. Accepted configuration; liveness is driven by the session FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BfdSpec {
    /// Whether BFD is enabled.
    pub enabled: bool,
    /// Minimum transmit interval in milliseconds.
    pub min_tx: u64,
    /// Minimum receive interval in milliseconds.
    pub min_rx: u64,
    /// Detection multiplier.
    pub mult: u32,
}

/// One neighbor session between two routers of the lab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeighborSpec {
    /// Unique id of the neighbor within the lab.
    pub id: String,
    /// The local endpoint (router id).
    pub local_router_id: String,
    /// The peer endpoint (router id).
    pub peer_router_id: String,
    /// AS number of the local endpoint.
    pub local_as: AsId,
    /// AS number of the peer endpoint.
    pub peer_as: AsId,
    /// Declared session type, validated against the AS numbers.
    #[serde(default)]
    pub session_type: Option<SessionType>,
    /// TTL for multihop eBGP sessions.
    #[serde(default)]
    pub multihop_ttl: Option<u8>,
    /// Passive sessions wait in Active for an inbound transport instead of connecting.
    #[serde(default)]
    pub passive: bool,
    /// The peer is a route-server client: routes passed to it keep a transparent AS-PATH.
    #[serde(default)]
    pub route_server_client: bool,
    /// The peer is a route-reflection client of the local router.
    #[serde(default)]
    pub rr_client: bool,
    /// Address families enabled on the session. Defaults to IPv4 unicast.
    #[serde(default = "default_families")]
    pub families: Vec<AddressFamily>,
    /// Policy names applied by the local router to routes received from the peer.
    #[serde(default)]
    pub in_route_maps: Vec<String>,
    /// Policy names applied by the local router to routes sent to the peer.
    #[serde(default)]
    pub out_route_maps: Vec<String>,
    /// Maximum number of prefixes accepted from the peer before the session faults.
    #[serde(default)]
    pub max_prefixes: Option<usize>,
    /// BFD parameters.
    #[serde(default)]
    pub bfd: Option<BfdSpec>,
}

impl Default for NeighborSpec {
    fn default() -> Self {
        Self {
            id: String::new(),
            local_router_id: String::new(),
            peer_router_id: String::new(),
            local_as: AsId(0),
            peer_as: AsId(0),
            session_type: None,
            multihop_ttl: None,
            passive: false,
            route_server_client: false,
            rr_client: false,
            families: default_families(),
            in_route_maps: Vec::new(),
            out_route_maps: Vec::new(),
            max_prefixes: None,
            bfd: None,
        }
    }
}

fn default_families() -> Vec<AddressFamily> {
    vec![AddressFamily::Ipv4]
}

/// One initial RIB seed: a routing table entry installed into a router at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RibSeed {
    /// The router receiving the entry.
    pub router_id: String,
    /// The entry itself.
    pub entry: RibEntry,
}

impl LabDocument {
    /// Parse a lab document from JSON.
    pub fn from_json(s: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Check the document for internal consistency. A document that fails validation is rejected
    /// as a whole; the engine keeps its previous lab.
    pub fn validate(&self) -> Result<(), LoadError> {
        let mut router_ids: HashSet<&str> = HashSet::new();
        for router in &self.routers {
            if !router_ids.insert(&router.id) {
                return Err(LoadError::DuplicateRouter(router.id.clone()));
            }
            if router.knobs.max_paths == 0 {
                return Err(LoadError::InvalidMaxPaths(router.id.clone()));
            }
        }

        let mut neighbor_ids: HashSet<&str> = HashSet::new();
        let mut pairs: HashSet<(&str, &str)> = HashSet::new();
        for neighbor in &self.neighbors {
            if !neighbor_ids.insert(&neighbor.id) {
                return Err(LoadError::DuplicateNeighbor(neighbor.id.clone()));
            }
            let local = self.router(&neighbor.local_router_id).ok_or_else(|| {
                LoadError::UnknownRouter {
                    neighbor: neighbor.id.clone(),
                    router: neighbor.local_router_id.clone(),
                }
            })?;
            let peer = self.router(&neighbor.peer_router_id).ok_or_else(|| {
                LoadError::UnknownRouter {
                    neighbor: neighbor.id.clone(),
                    router: neighbor.peer_router_id.clone(),
                }
            })?;
            if local.id == peer.id {
                return Err(LoadError::SelfSession(neighbor.id.clone()));
            }
            let key = if local.id < peer.id {
                (local.id.as_str(), peer.id.as_str())
            } else {
                (peer.id.as_str(), local.id.as_str())
            };
            if !pairs.insert(key) {
                return Err(LoadError::DuplicateSession(
                    neighbor.id.clone(),
                    local.id.clone(),
                    peer.id.clone(),
                ));
            }
            if neighbor.local_as != local.asn || neighbor.peer_as != peer.asn {
                return Err(LoadError::AsMismatch(neighbor.id.clone()));
            }
            let is_ebgp = neighbor.local_as != neighbor.peer_as;
            match neighbor.session_type {
                Some(SessionType::EBgp) if !is_ebgp => {
                    return Err(LoadError::SessionTypeMismatch(neighbor.id.clone()))
                }
                Some(SessionType::IBgp) if is_ebgp => {
                    return Err(LoadError::SessionTypeMismatch(neighbor.id.clone()))
                }
                _ => {}
            }
            if neighbor.rr_client && is_ebgp {
                return Err(LoadError::ReflectorClientOnEbgp(neighbor.id.clone()));
            }
            if neighbor.families.is_empty() {
                return Err(LoadError::NoAddressFamily(neighbor.id.clone()));
            }
            for family in &neighbor.families {
                if !local.afi_safi.supports(*family) || !peer.afi_safi.supports(*family) {
                    return Err(LoadError::AddressFamilyMismatch {
                        neighbor: neighbor.id.clone(),
                        family: *family,
                    });
                }
            }
        }

        for seed in &self.initial_ribs {
            if self.router(&seed.router_id).is_none() {
                return Err(LoadError::UnknownSeedRouter(seed.router_id.clone()));
            }
        }

        Ok(())
    }

    fn router(&self, id: &str) -> Option<&RouterSpec> {
        self.routers.iter().find(|r| r.id == id)
    }

    /// Whether the session described by a neighbor is eBGP (the endpoints disagree on the AS).
    pub fn is_ebgp(neighbor: &NeighborSpec) -> bool {
        neighbor.local_as != neighbor.peer_as
    }
}
