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

use super::{lab, neighbor, router, seed};
use crate::lab::{AddressFamily, LabDocument, SessionType};
use crate::types::LoadError;

use pretty_assertions::assert_eq;

fn two_router_doc() -> LabDocument {
    let x = router("x", 65001, "10.0.0.1");
    let y = router("y", 65002, "10.0.0.2");
    let n = neighbor("x-y", &x, &y);
    lab("basic", vec![x, y], vec![n], vec![])
}

#[test]
fn a_valid_document_passes() {
    two_router_doc().validate().unwrap();
}

#[test]
fn duplicate_router_ids_are_rejected() {
    let mut doc = two_router_doc();
    doc.routers.push(router("x", 65003, "10.0.0.3"));
    assert_eq!(
        doc.validate(),
        Err(LoadError::DuplicateRouter("x".to_string()))
    );
}

#[test]
fn duplicate_neighbor_ids_are_rejected() {
    let z = router("z", 65003, "10.0.0.3");
    let mut doc = two_router_doc();
    let mut second = neighbor("x-y", &doc.routers[0], &z);
    second.id = "x-y".to_string();
    doc.routers.push(z);
    doc.neighbors.push(second);
    assert_eq!(
        doc.validate(),
        Err(LoadError::DuplicateNeighbor("x-y".to_string()))
    );
}

#[test]
fn a_neighbor_must_reference_known_routers() {
    let mut doc = two_router_doc();
    doc.neighbors[0].peer_router_id = "ghost".to_string();
    assert_eq!(
        doc.validate(),
        Err(LoadError::UnknownRouter {
            neighbor: "x-y".to_string(),
            router: "ghost".to_string(),
        })
    );
}

#[test]
fn a_router_cannot_peer_with_itself() {
    let mut doc = two_router_doc();
    doc.neighbors[0].peer_router_id = "x".to_string();
    doc.neighbors[0].peer_as = 65001.into();
    assert_eq!(doc.validate(), Err(LoadError::SelfSession("x-y".to_string())));
}

#[test]
fn neighbor_as_numbers_must_match_the_routers() {
    let mut doc = two_router_doc();
    doc.neighbors[0].peer_as = 65999.into();
    assert_eq!(doc.validate(), Err(LoadError::AsMismatch("x-y".to_string())));
}

#[test]
fn the_declared_session_type_must_match_the_as_numbers() {
    let mut doc = two_router_doc();
    doc.neighbors[0].session_type = Some(SessionType::IBgp);
    assert_eq!(
        doc.validate(),
        Err(LoadError::SessionTypeMismatch("x-y".to_string()))
    );
    doc.neighbors[0].session_type = Some(SessionType::EBgp);
    doc.validate().unwrap();
}

#[test]
fn reflector_clients_require_ibgp() {
    let mut doc = two_router_doc();
    doc.neighbors[0].rr_client = true;
    assert_eq!(
        doc.validate(),
        Err(LoadError::ReflectorClientOnEbgp("x-y".to_string()))
    );
}

#[test]
fn address_families_must_be_enabled_on_both_ends() {
    let mut doc = two_router_doc();
    doc.neighbors[0].families = vec![AddressFamily::Ipv4, AddressFamily::Vpnv4];
    assert_eq!(
        doc.validate(),
        Err(LoadError::AddressFamilyMismatch {
            neighbor: "x-y".to_string(),
            family: AddressFamily::Vpnv4,
        })
    );
    // enabling the family on both routers fixes the document
    doc.routers[0].afi_safi.vpnv4 = true;
    doc.routers[1].afi_safi.vpnv4 = true;
    doc.validate().unwrap();
}

#[test]
fn a_session_without_families_is_rejected() {
    let mut doc = two_router_doc();
    doc.neighbors[0].families = vec![];
    assert_eq!(
        doc.validate(),
        Err(LoadError::NoAddressFamily("x-y".to_string()))
    );
}

#[test]
fn seeds_must_reference_known_routers() {
    let mut doc = two_router_doc();
    doc.initial_ribs
        .push(seed("ghost", "100.0.0.0/24", "10.0.0.1"));
    assert_eq!(
        doc.validate(),
        Err(LoadError::UnknownSeedRouter("ghost".to_string()))
    );
}

#[test]
fn duplicate_sessions_between_the_same_pair_are_rejected() {
    let mut doc = two_router_doc();
    let mut second = doc.neighbors[0].clone();
    second.id = "y-x".to_string();
    std::mem::swap(&mut second.local_router_id, &mut second.peer_router_id);
    std::mem::swap(&mut second.local_as, &mut second.peer_as);
    doc.neighbors.push(second);
    assert_eq!(
        doc.validate(),
        Err(LoadError::DuplicateSession(
            "y-x".to_string(),
            "y".to_string(),
            "x".to_string(),
        ))
    );
}

#[test]
fn max_paths_zero_is_rejected() {
    let mut doc = two_router_doc();
    doc.routers[0].knobs.multipath = true;
    doc.routers[0].knobs.max_paths = 0;
    assert_eq!(
        doc.validate(),
        Err(LoadError::InvalidMaxPaths("x".to_string()))
    );
}

#[test]
fn documents_load_from_camel_case_json() {
    let doc = LabDocument::from_json(
        r#"{
            "id": "json-lab",
            "name": "JSON Lab",
            "routers": [
                { "id": "a", "asn": 65001, "routerId": "10.0.0.1" },
                {
                    "id": "b",
                    "asn": 65002,
                    "routerId": "10.0.0.2",
                    "loopbacks": ["192.168.0.1"],
                    "knobs": { "alwaysCompareMed": true, "multipath": true, "maxPaths": 2 },
                    "timers": { "keepalive": 0, "hold": 3000, "connectRetry": 1000 }
                }
            ],
            "neighbors": [
                {
                    "id": "a-b",
                    "localRouterId": "a",
                    "peerRouterId": "b",
                    "localAs": 65001,
                    "peerAs": 65002,
                    "sessionType": "eBGP",
                    "maxPrefixes": 10
                }
            ],
            "initialRibs": [
                {
                    "routerId": "a",
                    "entry": {
                        "prefix": "100.0.0.0/24",
                        "pathAttributes": { "origin": "igp", "localPref": 200 },
                        "source": "local",
                        "nextHop": "10.0.0.1"
                    }
                }
            ]
        }"#,
    )
    .unwrap();
    doc.validate().unwrap();
    assert_eq!(doc.routers[1].knobs.max_paths, 2);
    assert_eq!(doc.routers[1].timers.hold, 3000);
    assert_eq!(doc.neighbors[0].max_prefixes, Some(10));
    assert_eq!(doc.initial_ribs[0].entry.attrs.local_pref, Some(200));
    assert_eq!(
        doc.neighbors[0].families,
        vec![crate::lab::AddressFamily::Ipv4]
    );
}
