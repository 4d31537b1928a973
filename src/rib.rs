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

//! The per-router RIB store: Adj-RIB-In tables keyed by peer, the Loc-RIB holding the selected
//! best route(s), and Adj-RIB-Out tables holding what was advertised to each peer.
//!
//! Withdrawals are tombstones, not deletions: the last-known route stays inspectable until the
//! tombstone is swept after the retention period. Every mutation bumps a revision counter and
//! marks the affected prefix dirty; the decision process consumes the dirty set.

use crate::bgp::{BgpRoute, RibCandidate, RibEntry, RouteSource};
use crate::types::RouterId;

use ipnet::Ipv4Net;
use prefix_trie::{PrefixMap, PrefixSet};

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

/// One raw entry of an Adj-RIB-In table: the route exactly as received from the peer, plus the
/// metadata needed to process it later. Routes are stored unprocessed so that a policy change
/// re-evaluates them without requiring a new update from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjRibInRecord {
    /// The route as received.
    pub route: BgpRoute,
    /// The kind of source, seen from the receiving router.
    pub source: RouteSource,
    /// BGP identifier of the advertising peer.
    pub peer_bgp_id: Ipv4Addr,
    /// Address of the advertising peer.
    pub peer_addr: Ipv4Addr,
    /// Milliseconds since the route was received.
    pub age_ms: u64,
    /// The tick at which the route was received.
    pub install_tick: u64,
    /// Set when the route was withdrawn: the tick of the withdrawal. A tombstoned route no longer
    /// takes part in selection but stays inspectable until swept.
    pub withdrawn_at: Option<u64>,
}

impl AdjRibInRecord {
    /// returns true if this record is a withdrawal tombstone
    pub fn is_withdrawn(&self) -> bool {
        self.withdrawn_at.is_some()
    }
}

/// The three routing tables of a single router, together with the dirty-prefix bookkeeping that
/// drives re-selection.
#[derive(Debug, Clone, Default)]
pub struct RouterRibs {
    /// Routes received from each peer, one table per peer, unprocessed.
    pub(crate) adj_rib_in: BTreeMap<RouterId, PrefixMap<Ipv4Net, AdjRibInRecord>>,
    /// Routes originated on this router (lab seeds and advertise commands).
    pub(crate) local_routes: PrefixMap<Ipv4Net, RibCandidate>,
    /// The selected best route(s) per prefix, best first. More than one entry only under
    /// multipath.
    pub(crate) loc_rib: PrefixMap<Ipv4Net, Vec<RibCandidate>>,
    /// What has been advertised to each peer.
    pub(crate) adj_rib_out: BTreeMap<RouterId, PrefixMap<Ipv4Net, BgpRoute>>,
    /// All prefixes this router has ever seen.
    pub(crate) known_prefixes: PrefixSet<Ipv4Net>,
    revision: u64,
    dirty: BTreeSet<Ipv4Net>,
}

impl RouterRibs {
    /// Install a locally originated candidate. Replaces any previous local route for the prefix.
    pub(crate) fn install_local(&mut self, cand: RibCandidate) {
        let prefix = cand.entry.prefix;
        self.local_routes.insert(prefix, cand);
        self.touch(prefix);
    }

    /// Remove a locally originated route. Returns the removed candidate, if any.
    pub(crate) fn remove_local(&mut self, prefix: Ipv4Net) -> Option<RibCandidate> {
        let old = self.local_routes.remove(&prefix);
        if old.is_some() {
            self.touch(prefix);
        }
        old
    }

    /// Store a route received from a peer. If the same route is already present, its install tick
    /// and age are preserved so that re-advertisements do not reset the stability tie-break; a
    /// pending tombstone is cleared either way.
    pub(crate) fn receive_update(&mut self, peer: RouterId, record: AdjRibInRecord) {
        let prefix = record.route.prefix;
        let table = self.adj_rib_in.entry(peer).or_default();
        let record = match table.get(&prefix) {
            Some(old) if old.route == record.route && old.source == record.source => {
                AdjRibInRecord {
                    age_ms: old.age_ms,
                    install_tick: old.install_tick,
                    withdrawn_at: None,
                    ..record
                }
            }
            _ => record,
        };
        table.insert(prefix, record);
        self.touch(prefix);
    }

    /// Tombstone a route received from a peer. Returns `true` if a live route was withdrawn.
    pub(crate) fn receive_withdraw(&mut self, peer: RouterId, prefix: Ipv4Net, tick: u64) -> bool {
        let Some(record) = self.adj_rib_in.get_mut(&peer).and_then(|t| t.get_mut(&prefix)) else {
            return false;
        };
        if record.is_withdrawn() {
            return false;
        }
        record.withdrawn_at = Some(tick);
        self.touch(prefix);
        true
    }

    /// Tombstone everything received from a peer and forget what was advertised to it. Returns
    /// the prefixes that lost a live candidate. Called when the peer's session leaves Established.
    pub(crate) fn drop_peer(&mut self, peer: RouterId, tick: u64) -> Vec<Ipv4Net> {
        let mut affected = Vec::new();
        if let Some(table) = self.adj_rib_in.get_mut(&peer) {
            let prefixes: Vec<Ipv4Net> = table.keys().copied().collect();
            for prefix in prefixes {
                let record = table.get_mut(&prefix).unwrap();
                if !record.is_withdrawn() {
                    record.withdrawn_at = Some(tick);
                    affected.push(prefix);
                }
            }
        }
        self.adj_rib_out.remove(&peer);
        for prefix in &affected {
            self.touch(*prefix);
        }
        affected
    }

    /// The live (non-tombstoned) candidates received for a prefix, one per peer, in peer order.
    pub(crate) fn records(&self, prefix: Ipv4Net) -> Vec<(RouterId, &AdjRibInRecord)> {
        self.adj_rib_in
            .iter()
            .filter_map(|(peer, table)| table.get(&prefix).map(|r| (*peer, r)))
            .filter(|(_, r)| !r.is_withdrawn())
            .collect()
    }

    /// Number of live prefixes currently received from a peer. Compared against the neighbor's
    /// max-prefix limit.
    pub(crate) fn prefix_count_from(&self, peer: RouterId) -> usize {
        self.adj_rib_in
            .get(&peer)
            .map(|t| t.values().filter(|r| !r.is_withdrawn()).count())
            .unwrap_or(0)
    }

    /// The best route currently selected for a prefix.
    pub fn best_local(&self, prefix: Ipv4Net) -> Option<&RibCandidate> {
        self.loc_rib.get(&prefix).and_then(|winners| winners.first())
    }

    /// All live candidates currently competing for a prefix: the locally originated route (if
    /// any) followed by the non-tombstoned routes of every peer, as received and unprocessed.
    pub fn all_candidates(&self, prefix: Ipv4Net) -> Vec<RibEntry> {
        let mut entries: Vec<RibEntry> = Vec::new();
        if let Some(local) = self.local_routes.get(&prefix) {
            entries.push(local.entry.clone());
        }
        entries.extend(self.records(prefix).into_iter().map(|(_, r)| RibEntry {
            prefix,
            attrs: r.route.attrs.clone(),
            source: r.source,
            next_hop: r.route.next_hop,
            age_ms: r.age_ms,
        }));
        entries
    }

    /// A cloned snapshot of the Loc-RIB, winners flattened in prefix order.
    pub fn loc_rib_snapshot(&self) -> Vec<RibEntry> {
        self.loc_rib
            .iter()
            .flat_map(|(_, winners)| winners.iter().map(|c| c.entry.clone()))
            .collect()
    }

    pub(crate) fn set_loc_rib(&mut self, prefix: Ipv4Net, winners: Vec<RibCandidate>) {
        self.revision += 1;
        if winners.is_empty() {
            self.loc_rib.remove(&prefix);
        } else {
            self.loc_rib.insert(prefix, winners);
        }
    }

    /// Bump the age of every stored entry by `ms`. Entries are immutable values; aging replaces
    /// them with aged copies.
    pub(crate) fn age_entries(&mut self, ms: u64) {
        for table in self.adj_rib_in.values_mut() {
            for record in table.values_mut() {
                record.age_ms += ms;
            }
        }
        for cand in self.local_routes.values_mut() {
            let aged = cand.entry.aged(ms);
            cand.entry = aged;
        }
        for winners in self.loc_rib.values_mut() {
            for cand in winners.iter_mut() {
                let aged = cand.entry.aged(ms);
                cand.entry = aged;
            }
        }
    }

    /// Remove tombstones older than `retention` ticks. Returns the number of swept records.
    pub(crate) fn sweep_tombstones(&mut self, tick: u64, retention: u64) -> usize {
        let mut swept = 0;
        for table in self.adj_rib_in.values_mut() {
            let expired: Vec<Ipv4Net> = table
                .iter()
                .filter(|(_, r)| matches!(r.withdrawn_at, Some(at) if tick >= at + retention))
                .map(|(p, _)| *p)
                .collect();
            for prefix in expired {
                table.remove(&prefix);
                swept += 1;
            }
        }
        swept
    }

    /// Take the set of prefixes needing re-selection, leaving it empty.
    pub(crate) fn take_dirty(&mut self) -> BTreeSet<Ipv4Net> {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self, prefix: Ipv4Net) {
        self.dirty.insert(prefix);
    }

    /// The revision counter, bumped on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self, prefix: Ipv4Net) {
        self.revision += 1;
        self.known_prefixes.insert(prefix);
        self.dirty.insert(prefix);
    }
}
