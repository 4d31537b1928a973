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

//! The best-path decision process: staged elimination over all candidates of a single prefix.
//! Every stage either keeps the candidate set unchanged or shrinks it, and the final stage picks
//! by a total order, so selection always terminates with at least one winner for a non-empty
//! input.

use itertools::Itertools;

use super::RibCandidate;
use crate::lab::RouterKnobs;
use crate::types::AsId;

use std::net::Ipv4Addr;

/// The per-router knobs consulted by the decision process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DecisionConfig {
    pub always_compare_med: bool,
    pub deterministic_med: bool,
    pub multipath: bool,
    pub max_paths: usize,
}

impl From<&RouterKnobs> for DecisionConfig {
    fn from(knobs: &RouterKnobs) -> Self {
        Self {
            always_compare_med: knobs.always_compare_med,
            deterministic_med: knobs.deterministic_med,
            multipath: knobs.multipath,
            max_paths: knobs.max_paths,
        }
    }
}

/// Select the best route(s) among all candidates for one prefix. Returns the winners, best first.
/// Without multipath exactly one candidate survives (for a non-empty input); with multipath up to
/// `max_paths` compatible candidates are retained.
///
/// The elimination order is: weight, local-pref, locally-originated, AS-path length, origin, MED,
/// eBGP-over-iBGP, IGP cost, and finally the stability tie-break (oldest install, then lowest
/// peer BGP identifier, then lowest peer address).
pub(crate) fn select_best(
    mut cands: Vec<RibCandidate>,
    cfg: &DecisionConfig,
) -> Vec<RibCandidate> {
    if cands.is_empty() {
        return cands;
    }

    retain_max(&mut cands, |c| c.entry.attrs.effective_weight());
    retain_max(&mut cands, |c| c.entry.attrs.effective_local_pref());
    if cands.iter().any(|c| c.entry.source.is_local()) {
        cands.retain(|c| c.entry.source.is_local());
    }
    retain_min(&mut cands, |c| c.entry.attrs.as_path.len());
    retain_min(&mut cands, |c| c.entry.attrs.origin);
    apply_med_rule(&mut cands, cfg);
    if cands.iter().any(|c| c.entry.source.is_ebgp()) {
        cands.retain(|c| !c.entry.source.is_ibgp());
    }
    retain_min(&mut cands, |c| c.igp_cost.unwrap_or_default());

    if cfg.multipath && cands.len() > 1 {
        multipath_set(cands, cfg.max_paths)
    } else {
        cands.sort_by_key(stability_key);
        cands.truncate(1);
        cands
    }
}

/// Keep only the candidates maximizing `key`.
fn retain_max<K: Ord, F: Fn(&RibCandidate) -> K>(cands: &mut Vec<RibCandidate>, key: F) {
    if let Some(best) = cands.iter().map(&key).max() {
        cands.retain(|c| key(c) == best);
    }
}

/// Keep only the candidates minimizing `key`.
fn retain_min<K: Ord, F: Fn(&RibCandidate) -> K>(cands: &mut Vec<RibCandidate>, key: F) {
    if let Some(best) = cands.iter().map(&key).min() {
        cands.retain(|c| key(c) == best);
    }
}

/// MED elimination. With `always_compare_med`, the lowest MED wins across all remaining
/// candidates. Otherwise MED is only compared among routes learned from the same neighboring AS
/// (the first AS of the AS-PATH); each group keeps its lowest-MED members. Grouping is evaluated
/// deterministically regardless of candidate arrival order, which is what the `deterministic_med`
/// knob asks for.
fn apply_med_rule(cands: &mut Vec<RibCandidate>, cfg: &DecisionConfig) {
    if cands.len() <= 1 {
        return;
    }
    if cfg.always_compare_med {
        retain_min(cands, |c| c.entry.attrs.effective_med());
        return;
    }
    let mut groups: Vec<Option<AsId>> = cands
        .iter()
        .map(|c| c.entry.attrs.neighboring_as())
        .unique()
        .collect();
    if cfg.deterministic_med {
        // compare groups in order of the neighboring AS, not in arrival order
        groups.sort();
    }
    let mut keep = Vec::with_capacity(cands.len());
    for group in groups {
        let lowest = cands
            .iter()
            .filter(|c| c.entry.attrs.neighboring_as() == group)
            .map(|c| c.entry.attrs.effective_med())
            .min()
            .unwrap();
        keep.extend(
            cands
                .iter()
                .filter(|c| {
                    c.entry.attrs.neighboring_as() == group
                        && c.entry.attrs.effective_med() == lowest
                })
                .cloned(),
        );
    }
    *cands = keep;
}

/// The final, total tie-break: oldest install first, then lowest peer BGP identifier, then lowest
/// peer address.
fn stability_key(c: &RibCandidate) -> (u64, Ipv4Addr, Ipv4Addr) {
    (c.install_tick, c.peer_bgp_id, c.peer_addr)
}

/// Multipath retention: the overall best is determined by the stability tie-break, then all
/// candidates compatible with it are kept, capped at `max_paths`. eBGP multipath requires the same
/// neighboring AS as the best route; iBGP multipath requires identical attributes apart from the
/// next hop.
fn multipath_set(mut cands: Vec<RibCandidate>, max_paths: usize) -> Vec<RibCandidate> {
    cands.sort_by_key(stability_key);
    let best = cands[0].clone();
    let mut set: Vec<RibCandidate> = if best.entry.source.is_ebgp() {
        cands
            .into_iter()
            .filter(|c| {
                c.entry.source.is_ebgp()
                    && c.entry.attrs.neighboring_as() == best.entry.attrs.neighboring_as()
            })
            .collect()
    } else {
        cands
            .into_iter()
            .filter(|c| c.entry.attrs == best.entry.attrs)
            .collect()
    };
    set.truncate(max_paths.max(1));
    set
}
