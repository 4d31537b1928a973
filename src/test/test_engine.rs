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
use crate::bgp::{PathAttributes, RouteSource};
use crate::engine::Engine;
use crate::event::SimEvent;
use crate::lab::InterfaceSpec;
use crate::policy::{AttributeOverride, PolicyAction};
use crate::session::{FsmState, SessionFault};
use crate::types::{LoadError, SimError};

use maplit::hashset;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::net::Ipv4Addr;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn addr(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

fn modify_local_pref(value: u32) -> PolicyAction {
    PolicyAction::Modify(AttributeOverride {
        local_pref: Some(value),
        ..Default::default()
    })
}

/// Two routers in different ASes, one session, one seeded route on `x`.
fn two_as_engine() -> Engine {
    let x = router("x", 65001, "10.0.0.1");
    let y = router("y", 65002, "10.0.0.2");
    let n = neighbor("x-y", &x, &y);
    let doc = lab(
        "two-as",
        vec![x, y],
        vec![n],
        vec![seed("x", "100.0.0.0/24", "10.0.0.1")],
    );
    let mut engine = Engine::new();
    engine.load_lab(&doc).unwrap();
    engine
}

#[test]
fn scenario_a_one_tick_propagates_the_seed() {
    init();
    let mut engine = two_as_engine();

    // the seed is selected on x right after loading
    let x_rib = engine.loc_rib("x").unwrap();
    assert_eq!(x_rib.len(), 1);
    assert_eq!(x_rib[0].source, RouteSource::Local);

    // y knows nothing yet, and the session is down
    assert_eq!(engine.loc_rib("y").unwrap(), vec![]);
    assert_eq!(engine.session_state("x-y"), Some(FsmState::Idle));

    let report = engine.tick(1000).unwrap();
    assert!(report.events.contains(&SimEvent::SessionEstablished {
        neighbor: "x-y".to_string()
    }));
    assert_eq!(engine.session_state("x-y"), Some(FsmState::Established));

    let y_rib = engine.loc_rib("y").unwrap();
    assert_eq!(y_rib.len(), 1);
    assert_eq!(y_rib[0].prefix, "100.0.0.0/24".parse().unwrap());
    assert_eq!(y_rib[0].source, RouteSource::EBgp);
    assert_eq!(y_rib[0].next_hop, addr("10.0.0.1"));
    assert_eq!(y_rib[0].attrs.as_path, vec![65001.into()]);
}

#[test]
fn scenario_b_local_pref_beats_everything_after_weight() {
    init();
    let y = router("y", 65001, "10.0.1.1");
    let e1 = router("e1", 65100, "10.0.2.1");
    let e2 = router("e2", 65200, "10.0.3.1");
    let mut n1 = neighbor("y-e1", &y, &e1);
    n1.in_route_maps = vec!["lp200".to_string()];
    let mut n2 = neighbor("y-e2", &y, &e2);
    n2.in_route_maps = vec!["lp100".to_string()];
    let doc = lab("pref", vec![y, e1, e2], vec![n1, n2], vec![]);

    let mut engine = Engine::new();
    engine.load_lab(&doc).unwrap();
    engine.set_policy_action("lp200", modify_local_pref(200)).unwrap();
    engine.set_policy_action("lp100", modify_local_pref(100)).unwrap();

    // e1's route has the longer AS path and the worse MED
    engine
        .advertise_route(
            "e1",
            "100.0.0.0/24".parse().unwrap(),
            PathAttributes {
                as_path: vec![65100.into()],
                med: Some(50),
                ..Default::default()
            },
        )
        .unwrap();
    engine
        .advertise_route("e2", "100.0.0.0/24".parse().unwrap(), PathAttributes::default())
        .unwrap();
    engine.tick(1000).unwrap();

    let rib = engine.loc_rib("y").unwrap();
    assert_eq!(rib.len(), 1);
    assert_eq!(rib[0].attrs.local_pref, Some(200));
    assert_eq!(rib[0].next_hop, addr("10.0.2.1"));

    // both routes stay visible as candidates
    let candidates = engine
        .candidates("y", "100.0.0.0/24".parse().unwrap())
        .unwrap();
    assert_eq!(candidates.len(), 2);
}

#[test]
fn scenario_c_always_compare_med_picks_the_lower_med() {
    init();
    let mut y = router("y", 65001, "10.0.1.1");
    y.knobs.always_compare_med = true;
    let e1 = router("e1", 65100, "10.0.2.1");
    let e2 = router("e2", 65200, "10.0.3.1");
    let n1 = neighbor("y-e1", &y, &e1);
    let n2 = neighbor("y-e2", &y, &e2);
    let doc = lab("med", vec![y, e1, e2], vec![n1, n2], vec![]);

    let mut engine = Engine::new();
    engine.load_lab(&doc).unwrap();
    engine
        .advertise_route(
            "e1",
            "100.0.0.0/24".parse().unwrap(),
            PathAttributes {
                med: Some(10),
                ..Default::default()
            },
        )
        .unwrap();
    engine
        .advertise_route(
            "e2",
            "100.0.0.0/24".parse().unwrap(),
            PathAttributes {
                med: Some(20),
                ..Default::default()
            },
        )
        .unwrap();
    engine.tick(1000).unwrap();

    let rib = engine.loc_rib("y").unwrap();
    assert_eq!(rib.len(), 1);
    assert_eq!(rib[0].attrs.med, Some(10));
    assert_eq!(rib[0].next_hop, addr("10.0.2.1"));
}

#[test]
fn scenario_d_hold_expiry_withdraws_the_peers_routes() {
    init();
    let mut x = router("x", 65001, "10.0.0.1");
    x.timers.keepalive = 0;
    x.timers.hold = 3000;
    let mut y = router("y", 65002, "10.0.0.2");
    y.timers.keepalive = 0;
    y.timers.hold = 3000;
    let n = neighbor("x-y", &x, &y);
    let doc = lab(
        "hold",
        vec![x, y],
        vec![n],
        vec![seed("x", "100.0.0.0/24", "10.0.0.1")],
    );
    let mut engine = Engine::new();
    engine.load_lab(&doc).unwrap();

    engine.tick(1000).unwrap();
    assert_eq!(engine.session_state("x-y"), Some(FsmState::Established));
    assert_eq!(engine.loc_rib("y").unwrap().len(), 1);

    // no keepalives flow; the hold timer runs out three ticks after establishment
    engine.tick(1000).unwrap();
    engine.tick(1000).unwrap();
    assert_eq!(engine.session_state("x-y"), Some(FsmState::Established));
    let report = engine.tick(1000).unwrap();
    assert!(report.events.contains(&SimEvent::SessionDown {
        neighbor: "x-y".to_string(),
        fault: SessionFault::HoldTimerExpired,
    }));
    assert_eq!(engine.session_state("x-y"), Some(FsmState::Idle));
    assert_eq!(engine.loc_rib("y").unwrap(), vec![]);
}

/// e --(eBGP)-- a --(iBGP)-- b --(iBGP)-- c, all of a, b, c in AS 65001.
fn chain_doc(reflect: bool, next_hop_self: bool) -> crate::lab::LabDocument {
    let e = router("e", 65100, "10.0.9.1");
    let mut a = router("a", 65001, "10.0.0.1");
    a.knobs.next_hop_self = next_hop_self;
    let b = router("b", 65001, "10.0.0.2");
    let c = router("c", 65001, "10.0.0.3");
    let n0 = neighbor("e-a", &e, &a);
    let n1 = neighbor("a-b", &a, &b);
    let mut n2 = neighbor("b-c", &b, &c);
    n2.rr_client = reflect;
    lab("chain", vec![e, a, b, c], vec![n0, n1, n2], vec![])
}

#[test]
fn ibgp_routes_are_not_readvertised_to_non_clients() {
    init();
    let mut engine = Engine::new();
    engine.load_lab(&chain_doc(false, false)).unwrap();
    engine
        .advertise_route("e", "100.0.0.0/24".parse().unwrap(), PathAttributes::default())
        .unwrap();
    engine.tick(1000).unwrap();

    assert_eq!(engine.loc_rib("a").unwrap().len(), 1);
    let b_rib = engine.loc_rib("b").unwrap();
    assert_eq!(b_rib.len(), 1);
    assert_eq!(b_rib[0].source, RouteSource::IBgp);
    // split horizon: b must not pass an iBGP-learned route to another iBGP peer
    assert_eq!(engine.loc_rib("c").unwrap(), vec![]);
}

#[test]
fn route_reflection_reaches_the_client() {
    init();
    let mut engine = Engine::new();
    engine.load_lab(&chain_doc(true, false)).unwrap();
    engine
        .advertise_route("e", "100.0.0.0/24".parse().unwrap(), PathAttributes::default())
        .unwrap();
    engine.tick(1000).unwrap();

    let c_rib = engine.loc_rib("c").unwrap();
    assert_eq!(c_rib.len(), 1);
    assert_eq!(c_rib[0].source, RouteSource::IBgp);
    // the reflector stamped the originator and itself as the cluster
    assert_eq!(c_rib[0].attrs.originator_id, Some(addr("10.0.0.1")));
    assert_eq!(c_rib[0].attrs.cluster_list, vec![addr("10.0.0.2")]);
    // without next-hop-self the egress stays the external router
    assert_eq!(c_rib[0].next_hop, addr("10.0.9.1"));
}

#[test]
fn next_hop_self_rewrites_towards_ibgp() {
    init();
    let mut engine = Engine::new();
    engine.load_lab(&chain_doc(false, true)).unwrap();
    engine
        .advertise_route("e", "100.0.0.0/24".parse().unwrap(), PathAttributes::default())
        .unwrap();
    engine.tick(1000).unwrap();

    let b_rib = engine.loc_rib("b").unwrap();
    assert_eq!(b_rib.len(), 1);
    assert_eq!(b_rib[0].next_hop, addr("10.0.0.1"));
}

#[test]
fn withdrawing_the_sole_candidate_propagates_immediately() {
    init();
    let x = router("x", 65001, "10.0.0.1");
    let y = router("y", 65002, "10.0.0.2");
    let n = neighbor("x-y", &x, &y);
    let doc = lab("wd", vec![x, y], vec![n], vec![]);
    let mut engine = Engine::new();
    engine.load_lab(&doc).unwrap();
    engine.tick(1000).unwrap();

    engine
        .advertise_route("x", "100.0.0.0/24".parse().unwrap(), PathAttributes::default())
        .unwrap();
    assert_eq!(engine.loc_rib("y").unwrap().len(), 1);

    let events = engine
        .withdraw_route("x", "100.0.0.0/24".parse().unwrap())
        .unwrap();
    assert!(events.contains(&SimEvent::BestPathChanged {
        router: "y".to_string(),
        prefix: "100.0.0.0/24".parse().unwrap(),
        next_hop: None,
    }));
    assert_eq!(engine.loc_rib("x").unwrap(), vec![]);
    assert_eq!(engine.loc_rib("y").unwrap(), vec![]);
}

#[test]
fn zero_duration_ticks_are_idempotent() {
    init();
    let mut engine = two_as_engine();
    engine.tick(1000).unwrap();

    let snapshot_x = engine.loc_rib("x").unwrap();
    let snapshot_y = engine.loc_rib("y").unwrap();
    let now = engine.now_ms();
    for _ in 0..2 {
        let report = engine.tick(0).unwrap();
        assert_eq!(report.messages, 0);
        assert_eq!(report.events, vec![]);
        assert_eq!(engine.loc_rib("x").unwrap(), snapshot_x);
        assert_eq!(engine.loc_rib("y").unwrap(), snapshot_y);
        assert_eq!(engine.now_ms(), now);
    }
}

#[test]
fn loading_the_same_lab_twice_gives_the_same_snapshot() {
    init();
    let x = router("x", 65001, "10.0.0.1");
    let y = router("y", 65002, "10.0.0.2");
    let n = neighbor("x-y", &x, &y);
    let doc = lab(
        "twice",
        vec![x, y],
        vec![n],
        vec![seed("x", "100.0.0.0/24", "10.0.0.1")],
    );
    let mut engine = Engine::new();
    engine.load_lab(&doc).unwrap();
    let first = engine.loc_rib("x").unwrap();

    engine.load_lab(&doc).unwrap();
    assert_eq!(engine.loc_rib("x").unwrap(), first);
    assert_eq!(engine.session_state("x-y"), Some(FsmState::Idle));
}

#[test]
fn a_rejected_document_keeps_the_previous_lab() {
    init();
    let mut engine = two_as_engine();
    engine.tick(1000).unwrap();

    let mut bad = lab(
        "bad",
        vec![router("x", 65001, "10.0.0.1")],
        vec![],
        vec![],
    );
    bad.neighbors.push(crate::lab::NeighborSpec {
        id: "x-ghost".to_string(),
        local_router_id: "x".to_string(),
        peer_router_id: "ghost".to_string(),
        local_as: 65001.into(),
        peer_as: 65002.into(),
        families: vec![crate::lab::AddressFamily::Ipv4],
        ..Default::default()
    });
    let err = engine.load_lab(&bad).unwrap_err();
    assert_eq!(
        err,
        LoadError::UnknownRouter {
            neighbor: "x-ghost".to_string(),
            router: "ghost".to_string(),
        }
    );

    // the engine still runs the previous lab, fully intact
    assert_eq!(engine.lab().unwrap().0, "two-as");
    assert_eq!(engine.session_state("x-y"), Some(FsmState::Established));
    assert_eq!(engine.loc_rib("y").unwrap().len(), 1);
}

#[test]
fn exceeding_max_prefix_faults_the_session() {
    init();
    let x = router("x", 65001, "10.0.0.1");
    let y = router("y", 65002, "10.0.0.2");
    let mut n = neighbor("y-x", &y, &x);
    n.max_prefixes = Some(1);
    let doc = lab("maxpfx", vec![x, y], vec![n], vec![]);
    let mut engine = Engine::new();
    engine.load_lab(&doc).unwrap();
    engine
        .advertise_route("x", "100.0.0.0/24".parse().unwrap(), PathAttributes::default())
        .unwrap();
    engine
        .advertise_route("x", "100.0.1.0/24".parse().unwrap(), PathAttributes::default())
        .unwrap();

    let report = engine.tick(1000).unwrap();
    assert!(report.events.contains(&SimEvent::SessionDown {
        neighbor: "y-x".to_string(),
        fault: SessionFault::MaxPrefixExceeded { limit: 1 },
    }));
    assert_eq!(engine.session_state("y-x"), Some(FsmState::Idle));
    assert_eq!(engine.loc_rib("y").unwrap(), vec![]);

    // the session does not flap back up on its own
    engine.tick(1000).unwrap();
    assert_eq!(engine.session_state("y-x"), Some(FsmState::Idle));
}

#[test]
fn ebgp_multipath_installs_both_paths() {
    init();
    let mut y = router("y", 65001, "10.0.1.1");
    y.knobs.multipath = true;
    y.knobs.max_paths = 2;
    let e1 = router("e1", 65100, "10.0.2.1");
    let e2 = router("e2", 65100, "10.0.3.1");
    let n1 = neighbor("y-e1", &y, &e1);
    let n2 = neighbor("y-e2", &y, &e2);
    let doc = lab("mp", vec![y, e1, e2], vec![n1, n2], vec![]);

    let mut engine = Engine::new();
    engine.load_lab(&doc).unwrap();
    for source in ["e1", "e2"] {
        engine
            .advertise_route(source, "100.0.0.0/24".parse().unwrap(), PathAttributes::default())
            .unwrap();
    }
    engine.tick(1000).unwrap();

    let rib = engine.loc_rib("y").unwrap();
    assert_eq!(rib.len(), 2);
    let next_hops: HashSet<Ipv4Addr> = rib.iter().map(|e| e.next_hop).collect();
    assert_eq!(next_hops, hashset! {addr("10.0.2.1"), addr("10.0.3.1")});
}

#[test]
fn lower_interface_cost_breaks_the_igp_tie() {
    init();
    let a = router("a", 65001, "10.0.12.1");
    let b = router("b", 65001, "10.0.13.1");
    let mut y = router("y", 65001, "10.0.0.1");
    y.interfaces = vec![
        InterfaceSpec {
            name: "eth0".to_string(),
            addr: addr("10.0.12.2"),
            network: "10.0.12.0/30".parse().unwrap(),
            cost: Some(5.0),
        },
        InterfaceSpec {
            name: "eth1".to_string(),
            addr: addr("10.0.13.2"),
            network: "10.0.13.0/30".parse().unwrap(),
            cost: Some(1.0),
        },
    ];
    let n1 = neighbor("y-a", &y, &a);
    let n2 = neighbor("y-b", &y, &b);
    let doc = lab("igp", vec![a, b, y], vec![n1, n2], vec![]);

    let mut engine = Engine::new();
    engine.load_lab(&doc).unwrap();
    for source in ["a", "b"] {
        engine
            .advertise_route(source, "100.0.0.0/24".parse().unwrap(), PathAttributes::default())
            .unwrap();
    }
    engine.tick(1000).unwrap();

    let rib = engine.loc_rib("y").unwrap();
    assert_eq!(rib.len(), 1);
    assert_eq!(rib[0].next_hop, addr("10.0.13.1"));
}

#[test]
fn an_inbound_reject_policy_blocks_the_import() {
    init();
    let x = router("x", 65001, "10.0.0.1");
    let y = router("y", 65002, "10.0.0.2");
    let mut n = neighbor("y-x", &y, &x);
    n.in_route_maps = vec!["deny-all".to_string()];
    let doc = lab("deny", vec![x, y], vec![n], vec![]);
    let mut engine = Engine::new();
    engine.load_lab(&doc).unwrap();
    engine.set_policy_action("deny-all", PolicyAction::Reject).unwrap();
    engine
        .advertise_route("x", "100.0.0.0/24".parse().unwrap(), PathAttributes::default())
        .unwrap();
    engine.tick(1000).unwrap();

    assert_eq!(engine.session_state("y-x"), Some(FsmState::Established));
    assert_eq!(engine.loc_rib("y").unwrap(), vec![]);

    // flipping the policy back to accept re-selects without a new advertisement
    let events = engine
        .set_policy_action("deny-all", PolicyAction::Accept)
        .unwrap();
    assert!(!events.is_empty());
    assert_eq!(engine.loc_rib("y").unwrap().len(), 1);
}

#[test]
fn a_malformed_open_faults_the_session_until_restarted() {
    init();
    let mut engine = two_as_engine();
    engine.tick(1000).unwrap();
    assert_eq!(engine.loc_rib("y").unwrap().len(), 1);

    let events = engine.inject_open("x-y", 64999).unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        SimEvent::SessionDown {
            fault: SessionFault::MalformedOpen { .. },
            ..
        }
    )));
    assert_eq!(engine.session_state("x-y"), Some(FsmState::Idle));
    assert_eq!(engine.loc_rib("y").unwrap(), vec![]);

    // the fault sticks across ticks
    engine.tick(1000).unwrap();
    assert_eq!(engine.session_state("x-y"), Some(FsmState::Idle));

    // an operator restart brings it back, and the routes with it
    engine.start_neighbor("x-y").unwrap();
    engine.tick(1000).unwrap();
    assert_eq!(engine.session_state("x-y"), Some(FsmState::Established));
    assert_eq!(engine.loc_rib("y").unwrap().len(), 1);
}

#[test]
fn transport_loss_tears_down_and_recovers() {
    init();
    let mut engine = two_as_engine();
    engine.tick(1000).unwrap();

    let events = engine.set_transport("x-y", false).unwrap();
    assert!(events.contains(&SimEvent::SessionDown {
        neighbor: "x-y".to_string(),
        fault: SessionFault::TransportLost,
    }));
    assert_eq!(engine.loc_rib("y").unwrap(), vec![]);

    engine.tick(1000).unwrap();
    assert_eq!(engine.session_state("x-y"), Some(FsmState::Idle));

    engine.set_transport("x-y", true).unwrap();
    engine.tick(1000).unwrap();
    assert_eq!(engine.session_state("x-y"), Some(FsmState::Established));
    assert_eq!(engine.loc_rib("y").unwrap().len(), 1);
}

#[test]
fn commands_require_a_loaded_lab() {
    init();
    let mut engine = Engine::new();
    assert_eq!(engine.tick(1000), Err(SimError::NoLabLoaded));
    assert_eq!(engine.loc_rib("x"), None);
    assert_eq!(engine.session_state("x-y"), None);
    assert_eq!(engine.list_routers(), Vec::<&crate::lab::RouterSpec>::new());
    assert_eq!(
        engine.advertise_route("x", "100.0.0.0/24".parse().unwrap(), PathAttributes::default()),
        Err(SimError::NoLabLoaded)
    );
}

#[test]
fn commands_check_their_references() {
    init();
    let mut engine = two_as_engine();
    assert_eq!(
        engine.advertise_route("ghost", "100.0.0.0/24".parse().unwrap(), PathAttributes::default()),
        Err(SimError::UnknownRouter("ghost".to_string()))
    );
    assert_eq!(
        engine.inject_notification("ghost"),
        Err(SimError::UnknownNeighbor("ghost".to_string()))
    );
    assert_eq!(
        engine.select_router("ghost"),
        Err(SimError::UnknownRouter("ghost".to_string()))
    );

    engine.select_router("x").unwrap();
    assert_eq!(engine.selected_router(), Some("x"));
    // focus is pure bookkeeping and survives ticks
    engine.tick(1000).unwrap();
    assert_eq!(engine.selected_router(), Some("x"));
}

#[test]
fn the_query_interface_reflects_the_lab() {
    init();
    let engine = two_as_engine();
    assert_eq!(engine.lab(), Some(("two-as", "two-as")));
    assert_eq!(engine.list_routers().len(), 2);
    assert_eq!(engine.list_neighbors().len(), 1);
    let views = engine.session_views();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].neighbor, "x-y");
    assert_eq!(views[0].local, "x");
    assert_eq!(views[0].peer, "y");
    assert_eq!(views[0].state, FsmState::Idle);
}
