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

//! The per-router BGP machinery: processing received routes, running the decision process for
//! dirty prefixes, and propagating Loc-RIB changes to the established peers under the
//! split-horizon and route-reflection rules.

use ipnet::Ipv4Net;
use log::{debug, trace};
use ordered_float::NotNan;

use crate::bgp::{
    select_best, BgpEvent, BgpRoute, DecisionConfig, PeerKind, RibCandidate, RibEntry, RouteSource,
};
use crate::event::MessageEvent;
use crate::lab::RouterSpec;
use crate::policy::PolicyTable;
use crate::rib::{AdjRibInRecord, RouterRibs};
use crate::types::{LinkWeight, RouterId, SimError};

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

/// Everything a router needs to know about one established peer in order to exchange routes with
/// it. Handles exist only while the session is Established; they are registered when the
/// handshake completes and removed when the session fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PeerHandle {
    /// The neighbor id covering this peering.
    pub neighbor_id: String,
    /// How this router relates to the peer.
    pub kind: PeerKind,
    /// The peer's primary address.
    pub addr: Ipv4Addr,
    /// The peer's BGP identifier.
    pub bgp_id: Ipv4Addr,
    /// Routes sent to this peer keep a transparent AS-PATH.
    pub route_server_client: bool,
    /// Policies applied to routes received from the peer.
    pub policies_in: Vec<String>,
    /// Policies applied to routes sent to the peer.
    pub policies_out: Vec<String>,
    /// Max-prefix limit for routes from this peer.
    pub max_prefixes: Option<usize>,
}

/// A change of the selected best path, reported as an observable event by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BestPathChange {
    pub prefix: Ipv4Net,
    pub next_hop: Option<Ipv4Addr>,
}

/// The state of one simulated router: its lab configuration, its routing tables, the IGP distance
/// table, and the currently established peers.
#[derive(Debug, Clone)]
pub(crate) struct RouterState {
    pub(crate) spec: RouterSpec,
    pub(crate) id: RouterId,
    pub(crate) ribs: RouterRibs,
    /// Shortest-path distance to every other router, over configured interface costs.
    pub(crate) igp_table: BTreeMap<RouterId, NotNan<LinkWeight>>,
    /// The peers this router currently exchanges routes with.
    pub(crate) peers: BTreeMap<RouterId, PeerHandle>,
}

impl RouterState {
    pub(crate) fn new(spec: RouterSpec, id: RouterId) -> Self {
        Self {
            spec,
            id,
            ribs: RouterRibs::default(),
            igp_table: BTreeMap::new(),
            peers: BTreeMap::new(),
        }
    }

    /// The primary address of the router.
    pub(crate) fn primary_addr(&self) -> Ipv4Addr {
        self.spec.primary_addr()
    }

    /// Process one raw Adj-RIB-In record into a selection candidate: loop protection, inbound
    /// policy, attribute defaults, and IGP cost resolution. Returns `None` if the route must not
    /// take part in selection.
    fn process_adj_in(
        &self,
        peer: RouterId,
        record: &AdjRibInRecord,
        policies: &PolicyTable,
        addr_map: &HashMap<Ipv4Addr, RouterId>,
    ) -> Option<RibCandidate> {
        let route = record.route.clone();

        // loop protection, checked before any policy runs
        if record.source.is_ebgp() && route.attrs.as_path.contains(&self.spec.asn) {
            trace!("{}: own AS in AS-PATH, ignoring {}", self.spec.id, route.prefix);
            return None;
        }
        if route.attrs.originator_id == Some(self.spec.router_id) {
            trace!("{}: ORIGINATOR_ID is self, ignoring {}", self.spec.id, route.prefix);
            return None;
        }
        if route.attrs.cluster_list.contains(&self.spec.router_id) {
            trace!("{}: own cluster id in CLUSTER_LIST, ignoring {}", self.spec.id, route.prefix);
            return None;
        }

        let policies_in = self
            .peers
            .get(&peer)
            .map(|h| h.policies_in.as_slice())
            .unwrap_or_default();
        let mut route = policies.apply(policies_in, route)?;

        route.attrs.apply_default();

        let mut entry = RibEntry {
            prefix: route.prefix,
            attrs: route.attrs,
            source: record.source,
            next_hop: route.next_hop,
            age_ms: record.age_ms,
        };

        let igp_cost = if record.source.is_ebgp() {
            // the egress is the peer itself
            entry.next_hop = record.peer_addr;
            NotNan::default()
        } else {
            self.cost_to(entry.next_hop, addr_map)
        };

        Some(RibCandidate {
            entry,
            from_peer: Some(peer),
            peer_bgp_id: record.peer_bgp_id,
            peer_addr: record.peer_addr,
            igp_cost: Some(igp_cost),
            install_tick: record.install_tick,
        })
    }

    /// IGP distance towards a next-hop address, resolved over the session-derived link graph. An
    /// unresolvable next hop costs zero so that hand-written lab seeds stay usable.
    fn cost_to(&self, next_hop: Ipv4Addr, addr_map: &HashMap<Ipv4Addr, RouterId>) -> NotNan<LinkWeight> {
        let Some(owner) = addr_map.get(&next_hop) else {
            debug!("{}: cannot resolve next hop {next_hop}, cost 0", self.spec.id);
            return NotNan::default();
        };
        if *owner == self.id {
            return NotNan::default();
        }
        match self.igp_table.get(owner) {
            Some(cost) => *cost,
            None => {
                debug!("{}: no IGP path towards {next_hop}, cost 0", self.spec.id);
                NotNan::default()
            }
        }
    }

    /// Run the decision process for one prefix over all current candidates. Replaces the Loc-RIB
    /// entry and returns the change, or `None` if the selection is unchanged.
    pub(crate) fn decide(
        &mut self,
        prefix: Ipv4Net,
        policies: &PolicyTable,
        addr_map: &HashMap<Ipv4Addr, RouterId>,
    ) -> Result<Option<BestPathChange>, SimError> {
        let mut cands: Vec<RibCandidate> = Vec::new();
        if let Some(local) = self.ribs.local_routes.get(&prefix) {
            cands.push(local.clone());
        }
        for (peer, record) in self.ribs.records(prefix) {
            if let Some(cand) = self.process_adj_in(peer, record, policies, addr_map) {
                cands.push(cand);
            }
        }

        let config = DecisionConfig::from(&self.spec.knobs);
        let winners = select_best(cands, &config);
        if winners.len() > 1 && !self.spec.knobs.multipath {
            return Err(SimError::InvariantViolation(format!(
                "{} winners for {} on {} with multipath disabled",
                winners.len(),
                prefix,
                self.spec.id
            )));
        }

        let old = self.ribs.loc_rib.get(&prefix);
        if old == Some(&winners) || (old.is_none() && winners.is_empty()) {
            return Ok(None);
        }
        let next_hop = winners.first().map(|c| c.entry.next_hop);
        self.ribs.set_loc_rib(prefix, winners);
        Ok(Some(BestPathChange { prefix, next_hop }))
    }

    /// Propagate the current Loc-RIB state of one prefix to all established peers. Compares
    /// against the Adj-RIB-Out and emits only actual changes: an update when the advertised route
    /// differs, a withdrawal when a previously advertised route must disappear.
    pub(crate) fn disseminate(
        &mut self,
        prefix: Ipv4Net,
        policies: &PolicyTable,
    ) -> Vec<MessageEvent> {
        let best: Option<&RibCandidate> = self.ribs.best_local(prefix);
        let mut plan: Vec<(RouterId, Option<BgpRoute>)> = Vec::new();
        let mut events = Vec::new();

        for (peer, handle) in &self.peers {
            let current: Option<&BgpRoute> =
                self.ribs.adj_rib_out.get(peer).and_then(|t| t.get(&prefix));
            let will_advertise = best
                .map(|b| should_export(b, *peer, handle.kind))
                .unwrap_or(false);

            if !will_advertise && current.is_none() {
                continue;
            }
            if !will_advertise {
                plan.push((*peer, None));
                events.push(MessageEvent {
                    from: self.id,
                    to: *peer,
                    event: BgpEvent::Withdraw(prefix),
                });
                continue;
            }

            let out = best.and_then(|b| self.process_adj_out(b, handle));
            let out = out.and_then(|r| policies.apply(&handle.policies_out, r));
            let out = out.map(|r| self.finish_adj_out(r, handle));
            match (out, current) {
                (Some(route), Some(current)) if route == *current => {}
                (Some(route), _) => {
                    events.push(MessageEvent {
                        from: self.id,
                        to: *peer,
                        event: BgpEvent::Update(route.clone()),
                    });
                    plan.push((*peer, Some(route)));
                }
                (None, Some(_)) => {
                    events.push(MessageEvent {
                        from: self.id,
                        to: *peer,
                        event: BgpEvent::Withdraw(prefix),
                    });
                    plan.push((*peer, None));
                }
                (None, None) => {}
            }
        }

        for (peer, action) in plan {
            match action {
                Some(route) => {
                    self.ribs
                        .adj_rib_out
                        .entry(peer)
                        .or_default()
                        .insert(prefix, route);
                }
                None => {
                    if let Some(table) = self.ribs.adj_rib_out.get_mut(&peer) {
                        table.remove(&prefix);
                    }
                }
            }
        }

        events
    }

    /// First half of outbound processing, before the outbound policy runs: next-hop-self towards
    /// iBGP, and ORIGINATOR_ID / CLUSTER_LIST stamping when the route is reflected. Weight never
    /// leaves the router.
    fn process_adj_out(&self, cand: &RibCandidate, handle: &PeerHandle) -> Option<BgpRoute> {
        let mut route = BgpRoute {
            prefix: cand.entry.prefix,
            next_hop: cand.entry.next_hop,
            attrs: cand.entry.attrs.clone(),
        };
        route.attrs.weight = None;

        if cand.entry.source.is_ebgp() && handle.kind.is_ibgp() && self.spec.knobs.next_hop_self {
            route.next_hop = self.primary_addr();
        }

        if cand.entry.source.is_ibgp() && handle.kind.is_ibgp() {
            // the route is reflected
            route
                .attrs
                .originator_id
                .get_or_insert(cand.peer_bgp_id);
            route.attrs.cluster_list.push(self.spec.router_id);
        }

        Some(route)
    }

    /// Second half of outbound processing, after the outbound policy: crossing an eBGP boundary
    /// prepends the own AS and rewrites the next hop (both suppressed towards route-server
    /// clients, which see the route transparently), and strips every iBGP-only attribute.
    fn finish_adj_out(&self, mut route: BgpRoute, handle: &PeerHandle) -> BgpRoute {
        if handle.kind.is_ebgp() {
            if !handle.route_server_client {
                route.attrs.as_path.insert(0, self.spec.asn);
                route.next_hop = self.primary_addr();
            }
            route.attrs.local_pref = None;
            route.attrs.originator_id = None;
            route.attrs.cluster_list.clear();
        }
        route
    }
}

/// Whether a selected route may be exported to a given peer. Implements split horizon and the
/// route-reflection exception: routes learned over iBGP are only passed on to eBGP peers and to
/// route-reflection clients, unless they were learned from a client in the first place. A route
/// is never echoed to the peer it was learned from.
#[inline(always)]
pub(crate) fn should_export(best: &RibCandidate, to: RouterId, to_kind: PeerKind) -> bool {
    if best.from_peer == Some(to) {
        return false;
    }
    match (best.entry.source, to_kind) {
        (RouteSource::Local | RouteSource::Aggregate, _) => true,
        (RouteSource::EBgp, _) => true,
        (RouteSource::RrClient, _) => true,
        (RouteSource::IBgp, PeerKind::EBgp | PeerKind::IBgpClient) => true,
        (RouteSource::IBgp, PeerKind::IBgpPeer) => false,
    }
}
