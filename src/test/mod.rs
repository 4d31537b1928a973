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

mod test_engine;
mod test_lab;

use crate::bgp::{PathAttributes, RibEntry, RouteSource};
use crate::lab::{AddressFamily, LabDocument, NeighborSpec, RibSeed, RouterSpec};

pub(crate) fn router(id: &str, asn: u32, bgp_id: &str) -> RouterSpec {
    RouterSpec {
        id: id.to_string(),
        name: id.to_string(),
        asn: asn.into(),
        router_id: bgp_id.parse().unwrap(),
        ..Default::default()
    }
}

pub(crate) fn neighbor(id: &str, local: &RouterSpec, peer: &RouterSpec) -> NeighborSpec {
    NeighborSpec {
        id: id.to_string(),
        local_router_id: local.id.clone(),
        peer_router_id: peer.id.clone(),
        local_as: local.asn,
        peer_as: peer.asn,
        families: vec![AddressFamily::Ipv4],
        ..Default::default()
    }
}

pub(crate) fn seed(router: &str, prefix: &str, next_hop: &str) -> RibSeed {
    RibSeed {
        router_id: router.to_string(),
        entry: RibEntry {
            prefix: prefix.parse().unwrap(),
            attrs: PathAttributes::default(),
            source: RouteSource::Local,
            next_hop: next_hop.parse().unwrap(),
            age_ms: 0,
        },
    }
}

pub(crate) fn lab(
    id: &str,
    routers: Vec<RouterSpec>,
    neighbors: Vec<NeighborSpec>,
    initial_ribs: Vec<RibSeed>,
) -> LabDocument {
    LabDocument {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        routers,
        neighbors,
        initial_ribs,
    }
}
