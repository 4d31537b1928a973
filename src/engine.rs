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

//! # The simulation engine
//!
//! The [`Engine`] owns one simulation at a time. Loading a lab document builds a complete new
//! state first and only then swaps it in, so a rejected document never leaves the engine half
//! loaded. Advancing the clock with [`Engine::tick`] drives the session timers, completes pending
//! handshakes, and exchanges BGP messages until the network has converged; everything observable
//! that happened is returned in a [`TickReport`].
//!
//! The whole simulation is synchronous and deterministic: messages are delivered in FIFO order,
//! routers and sessions are visited in a fixed order, and no part of it depends on wall-clock
//! time.

use ipnet::Ipv4Net;
use log::{debug, warn};
use ordered_float::NotNan;
use petgraph::algo::dijkstra;

use crate::bgp::{BgpEvent, PathAttributes, PeerKind, RibCandidate, RibEntry, RouteSource};
use crate::clock::SimClock;
use crate::event::{MessageEvent, SessionView, SimEvent, TickReport};
use crate::lab::{LabDocument, NeighborSpec, RouterSpec};
use crate::policy::{PolicyAction, PolicyTable};
use crate::rib::AdjRibInRecord;
use crate::router::RouterState;
use crate::session::{FsmEvent, FsmState, Session, SessionFault, SessionStep};
use crate::types::{IgpNetwork, LoadError, RouterId, SimError};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::Ipv4Addr;

/// Stop settling after this many processed messages and report non-convergence.
static DEFAULT_MSG_LIMIT: usize = 1_000_000;
/// How many ticks a withdrawal tombstone stays inspectable before it is swept.
static DEFAULT_TOMBSTONE_RETENTION: u64 = 4;
/// Upper bound on FSM steps when completing a handshake within one tick.
const HANDSHAKE_STEPS: usize = 8;

/// The simulation engine. See the [module documentation](self) for an overview.
#[derive(Debug, Default)]
pub struct Engine {
    sim: Option<SimState>,
    selected: Option<String>,
}

#[derive(Debug)]
struct SimState {
    lab_id: String,
    lab_name: String,
    routers: BTreeMap<RouterId, RouterState>,
    router_ids: HashMap<String, RouterId>,
    sessions: BTreeMap<String, Session>,
    addr_map: HashMap<Ipv4Addr, RouterId>,
    policies: PolicyTable,
    queue: VecDeque<MessageEvent>,
    clock: SimClock,
    retention: u64,
    msg_limit: usize,
    events: Vec<SimEvent>,
}

impl Engine {
    /// Create an engine with no lab loaded.
    pub fn new() -> Self {
        Self::default()
    }

    // ************
    // * Commands *
    // ************

    /// Load a lab document, replacing all prior state atomically. If the document is rejected,
    /// the previously loaded lab (if any) stays untouched.
    pub fn load_lab(&mut self, doc: &LabDocument) -> Result<(), LoadError> {
        let sim = SimState::build(doc)?;
        debug!(
            "loaded lab '{}' with {} routers and {} sessions",
            sim.lab_id,
            sim.routers.len(),
            sim.sessions.len()
        );
        self.sim = Some(sim);
        self.selected = None;
        Ok(())
    }

    /// Parse a lab document from JSON and load it.
    pub fn load_lab_json(&mut self, json: &str) -> Result<(), LoadError> {
        let doc = LabDocument::from_json(json)?;
        self.load_lab(&doc)
    }

    /// Advance the simulation by `duration_ms` milliseconds: fire due session timers, complete
    /// pending handshakes, exchange BGP messages until convergence, age all RIB entries, and
    /// sweep expired withdrawal tombstones. A zero duration only drains already pending work and
    /// is idempotent.
    pub fn tick(&mut self, duration_ms: u64) -> Result<TickReport, SimError> {
        self.sim_mut()?.tick(duration_ms)
    }

    /// Originate a route on a router, as if it were configured there. Convergence runs
    /// immediately; the observable events are returned.
    pub fn advertise_route(
        &mut self,
        router: &str,
        prefix: Ipv4Net,
        attrs: PathAttributes,
    ) -> Result<Vec<SimEvent>, SimError> {
        let sim = self.sim_mut()?;
        sim.events.clear();
        let rid = sim.router_id(router)?;
        let tick = sim.clock.tick();
        {
            let r = sim.routers.get_mut(&rid).unwrap();
            let addr = r.primary_addr();
            r.ribs.install_local(RibCandidate {
                entry: RibEntry {
                    prefix,
                    attrs,
                    source: RouteSource::Local,
                    next_hop: addr,
                    age_ms: 0,
                },
                from_peer: None,
                peer_bgp_id: r.spec.router_id,
                peer_addr: addr,
                igp_cost: Some(NotNan::default()),
                install_tick: tick,
            });
        }
        sim.settle()?;
        Ok(std::mem::take(&mut sim.events))
    }

    /// Stop originating a route on a router. Convergence runs immediately.
    pub fn withdraw_route(
        &mut self,
        router: &str,
        prefix: Ipv4Net,
    ) -> Result<Vec<SimEvent>, SimError> {
        let sim = self.sim_mut()?;
        sim.events.clear();
        let rid = sim.router_id(router)?;
        sim.routers.get_mut(&rid).unwrap().ribs.remove_local(prefix);
        sim.settle()?;
        Ok(std::mem::take(&mut sim.events))
    }

    /// Bring the simulated transport of a session up or down. Taking it down fails an established
    /// session; bringing it up clears a previous fault and lets the session re-establish on the
    /// next tick.
    pub fn set_transport(&mut self, neighbor: &str, up: bool) -> Result<Vec<SimEvent>, SimError> {
        let event = if up {
            FsmEvent::TransportUp
        } else {
            FsmEvent::TransportDown
        };
        self.sim_mut()?.drive_session(neighbor, event, |s| {
            s.transport_up = up;
            if up {
                s.faulted = false;
            }
        })
    }

    /// Deliver a simulated NOTIFICATION to a session.
    pub fn inject_notification(&mut self, neighbor: &str) -> Result<Vec<SimEvent>, SimError> {
        self.sim_mut()?
            .drive_session(neighbor, FsmEvent::NotificationReceived, |_| {})
    }

    /// Deliver a simulated OPEN claiming the given AS to a session. An AS that does not match the
    /// configured peer AS is a malformed OPEN and faults the session.
    pub fn inject_open(
        &mut self,
        neighbor: &str,
        peer_as: impl Into<crate::types::AsId>,
    ) -> Result<Vec<SimEvent>, SimError> {
        let peer_as = peer_as.into();
        self.sim_mut()?
            .drive_session(neighbor, FsmEvent::OpenReceived { peer_as }, |_| {})
    }

    /// Administratively stop a session. It stays down until restarted.
    pub fn shutdown_neighbor(&mut self, neighbor: &str) -> Result<Vec<SimEvent>, SimError> {
        self.sim_mut()?
            .drive_session(neighbor, FsmEvent::ManualStop, |s| s.admin_up = false)
    }

    /// Administratively start a session again after a shutdown or a fault. The handshake runs on
    /// the next tick.
    pub fn start_neighbor(&mut self, neighbor: &str) -> Result<Vec<SimEvent>, SimError> {
        self.sim_mut()?.drive_session(neighbor, FsmEvent::ManualStart, |s| {
            s.admin_up = true;
            s.faulted = false;
        })
    }

    /// Bind a policy name to an action. All routers re-evaluate their selections immediately:
    /// this is the accept/modify/reject extension point for the otherwise opaque policy objects.
    pub fn set_policy_action(
        &mut self,
        name: impl Into<String>,
        action: PolicyAction,
    ) -> Result<Vec<SimEvent>, SimError> {
        let sim = self.sim_mut()?;
        sim.events.clear();
        sim.policies.set(name, action);
        for router in sim.routers.values_mut() {
            let prefixes: Vec<Ipv4Net> = router.ribs.known_prefixes.iter().copied().collect();
            for prefix in prefixes {
                router.ribs.mark_dirty(prefix);
            }
        }
        sim.settle()?;
        Ok(std::mem::take(&mut sim.events))
    }

    /// Remember which router the presentation layer currently focuses. Pure bookkeeping, no
    /// effect on the simulation.
    pub fn select_router(&mut self, router: &str) -> Result<(), SimError> {
        self.sim()?.router_id(router)?;
        self.selected = Some(router.to_string());
        Ok(())
    }

    // ***********
    // * Queries *
    // ***********

    /// The id and name of the loaded lab.
    pub fn lab(&self) -> Option<(&str, &str)> {
        self.sim
            .as_ref()
            .map(|s| (s.lab_id.as_str(), s.lab_name.as_str()))
    }

    /// All routers of the loaded lab.
    pub fn list_routers(&self) -> Vec<&RouterSpec> {
        self.sim
            .iter()
            .flat_map(|s| s.routers.values().map(|r| &r.spec))
            .collect()
    }

    /// All neighbor sessions of the loaded lab.
    pub fn list_neighbors(&self) -> Vec<&NeighborSpec> {
        self.sim
            .iter()
            .flat_map(|s| s.sessions.values().map(|n| &n.spec))
            .collect()
    }

    /// The state of every neighbor session.
    pub fn session_views(&self) -> Vec<SessionView> {
        self.sim
            .iter()
            .flat_map(|s| s.sessions.values())
            .map(|s| SessionView {
                neighbor: s.spec.id.clone(),
                local: s.spec.local_router_id.clone(),
                peer: s.spec.peer_router_id.clone(),
                state: s.state(),
            })
            .collect()
    }

    /// The FSM state of one neighbor session.
    pub fn session_state(&self, neighbor: &str) -> Option<FsmState> {
        self.sim
            .as_ref()
            .and_then(|s| s.sessions.get(neighbor))
            .map(|s| s.state())
    }

    /// A cloned snapshot of a router's Loc-RIB, in prefix order. Multipath winners appear
    /// best-first.
    pub fn loc_rib(&self, router: &str) -> Option<Vec<RibEntry>> {
        let sim = self.sim.as_ref()?;
        let rid = *sim.router_ids.get(router)?;
        Some(sim.routers[&rid].ribs.loc_rib_snapshot())
    }

    /// All live candidates a router currently holds for a prefix, across all of its Adj-RIB-In
    /// tables plus its own originated route. Raw, as received: inbound policies only apply during
    /// selection.
    pub fn candidates(&self, router: &str, prefix: Ipv4Net) -> Option<Vec<RibEntry>> {
        let sim = self.sim.as_ref()?;
        let rid = *sim.router_ids.get(router)?;
        Some(sim.routers[&rid].ribs.all_candidates(prefix))
    }

    /// The router currently focused by the presentation layer.
    pub fn selected_router(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Current simulated time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.sim.as_ref().map(|s| s.clock.now_ms()).unwrap_or(0)
    }

    /// Configure after how many processed messages a tick gives up and reports non-convergence.
    pub fn set_msg_limit(&mut self, limit: usize) {
        if let Some(sim) = self.sim.as_mut() {
            sim.msg_limit = limit;
        }
    }

    /// Configure how many ticks withdrawal tombstones stay inspectable.
    pub fn set_tombstone_retention(&mut self, ticks: u64) {
        if let Some(sim) = self.sim.as_mut() {
            sim.retention = ticks;
        }
    }

    fn sim(&self) -> Result<&SimState, SimError> {
        self.sim.as_ref().ok_or(SimError::NoLabLoaded)
    }

    fn sim_mut(&mut self) -> Result<&mut SimState, SimError> {
        self.sim.as_mut().ok_or(SimError::NoLabLoaded)
    }
}

impl SimState {
    /// Build a complete simulation state from a lab document. Everything is constructed before
    /// anything is adopted, which gives `load_lab` its all-or-nothing behavior.
    fn build(doc: &LabDocument) -> Result<Self, LoadError> {
        doc.validate()?;

        let mut topology = IgpNetwork::default();
        let mut routers: BTreeMap<RouterId, RouterState> = BTreeMap::new();
        let mut router_ids: HashMap<String, RouterId> = HashMap::new();
        let mut addr_map: HashMap<Ipv4Addr, RouterId> = HashMap::new();

        for spec in &doc.routers {
            let mut spec = spec.clone();
            if spec.name.is_empty() {
                spec.name = spec.id.clone();
            }
            let id = topology.add_node(());
            router_ids.insert(spec.id.clone(), id);
            addr_map.entry(spec.router_id).or_insert(id);
            for addr in &spec.loopbacks {
                addr_map.entry(*addr).or_insert(id);
            }
            for iface in &spec.interfaces {
                addr_map.entry(iface.addr).or_insert(id);
            }
            routers.insert(id, RouterState::new(spec, id));
        }

        let mut sessions: BTreeMap<String, Session> = BTreeMap::new();
        for neighbor in &doc.neighbors {
            let local = router_ids[&neighbor.local_router_id];
            let peer = router_ids[&neighbor.peer_router_id];
            let w_out = link_cost(&routers[&local].spec, routers[&peer].spec.primary_addr());
            let w_in = link_cost(&routers[&peer].spec, routers[&local].spec.primary_addr());
            topology.update_edge(local, peer, w_out);
            topology.update_edge(peer, local, w_in);
            let timers = routers[&local].spec.timers;
            sessions.insert(
                neighbor.id.clone(),
                Session::new(
                    neighbor.clone(),
                    local,
                    peer,
                    timers.keepalive,
                    timers.hold,
                    timers.connect_retry,
                ),
            );
        }

        for (id, router) in routers.iter_mut() {
            let distances = dijkstra(&topology, *id, None, |e| *e.weight());
            router.igp_table = distances
                .into_iter()
                .filter(|(target, _)| target != id)
                .map(|(target, cost)| (target, NotNan::new(cost).unwrap()))
                .collect();
        }

        let mut state = Self {
            lab_id: doc.id.clone(),
            lab_name: doc.name.clone(),
            routers,
            router_ids,
            sessions,
            addr_map,
            policies: PolicyTable::default(),
            queue: VecDeque::new(),
            clock: SimClock::default(),
            retention: DEFAULT_TOMBSTONE_RETENTION,
            msg_limit: DEFAULT_MSG_LIMIT,
            events: Vec::new(),
        };

        for seed in &doc.initial_ribs {
            let rid = state.router_ids[&seed.router_id];
            let router = state.routers.get_mut(&rid).unwrap();
            let addr = router.primary_addr();
            router.ribs.install_local(RibCandidate {
                entry: seed.entry.clone(),
                from_peer: None,
                peer_bgp_id: router.spec.router_id,
                peer_addr: addr,
                igp_cost: Some(NotNan::default()),
                install_tick: 0,
            });
        }

        // select the seeded routes so that queries work right after loading; no session is
        // established yet, so no message can flow
        state.settle()?;
        state.events.clear();
        Ok(state)
    }

    fn tick(&mut self, duration_ms: u64) -> Result<TickReport, SimError> {
        self.events.clear();
        if duration_ms > 0 {
            self.clock.advance(duration_ms);
            self.tick_session_timers(duration_ms);
            self.establish_sessions();
        }
        let messages = self.settle()?;
        if duration_ms > 0 {
            let tick = self.clock.tick();
            let retention = self.retention;
            for router in self.routers.values_mut() {
                router.ribs.age_entries(duration_ms);
                router.ribs.sweep_tombstones(tick, retention);
            }
        }
        Ok(TickReport {
            tick: self.clock.tick(),
            now_ms: self.clock.now_ms(),
            messages,
            events: std::mem::take(&mut self.events),
        })
    }

    /// Advance all session timers by `ms` and handle the fired events. A keepalive generated this
    /// tick reaches the peer within the same tick and refreshes the hold timer before the hold
    /// timer itself is advanced.
    fn tick_session_timers(&mut self, ms: u64) {
        let ids: Vec<String> = self.sessions.keys().cloned().collect();
        for id in ids {
            let mut steps: Vec<SessionStep> = Vec::new();
            {
                let session = self.sessions.get_mut(&id).unwrap();
                if !session.admin_up {
                    continue;
                }
                let keepalives = session.keepalive.advance(ms);
                for _ in 0..keepalives {
                    let step = session.handle(FsmEvent::KeepaliveTimerExpires);
                    let answered = step.send_keepalive;
                    steps.push(step);
                    if answered {
                        steps.push(session.handle(FsmEvent::KeepaliveReceived));
                    }
                }
                let retries = session.connect_retry.advance(ms);
                for _ in 0..retries {
                    steps.push(session.handle(FsmEvent::ConnectRetryTimerExpires));
                }
                if session.hold.is_running() && session.hold.advance(ms) > 0 {
                    steps.push(session.handle(FsmEvent::HoldTimerExpires));
                }
            }
            for step in steps {
                self.apply_session_step(&id, step);
            }
        }
    }

    /// Complete the handshake of every startable session within this tick. The engine plays the
    /// peer's side of the exchange: it answers an OPEN with the configured peer AS and confirms
    /// with a keepalive.
    fn establish_sessions(&mut self) {
        let ids: Vec<String> = self.sessions.keys().cloned().collect();
        for id in ids {
            let mut steps: Vec<SessionStep> = Vec::new();
            {
                let session = self.sessions.get_mut(&id).unwrap();
                if !session.admin_up || !session.transport_up || session.faulted {
                    continue;
                }
                for _ in 0..HANDSHAKE_STEPS {
                    let event = match session.state {
                        FsmState::Idle => FsmEvent::ManualStart,
                        FsmState::Connect | FsmState::Active => FsmEvent::TransportUp,
                        FsmState::OpenSent => FsmEvent::OpenReceived {
                            peer_as: session.spec.peer_as,
                        },
                        FsmState::OpenConfirm => FsmEvent::KeepaliveReceived,
                        FsmState::Established => break,
                    };
                    let step = session.handle(event);
                    let stalled = step.from == step.to;
                    steps.push(step);
                    if stalled {
                        break;
                    }
                }
            }
            for step in steps {
                self.apply_session_step(&id, step);
            }
        }
    }

    /// Interpret the outcome of one FSM step: register or deregister the peering and report
    /// faults.
    fn apply_session_step(&mut self, id: &str, step: SessionStep) {
        if step.entered_established() {
            self.session_up(id);
        }
        if let Some(fault) = step.fault {
            warn!("session {id} failed: {fault}");
            self.sessions.get_mut(id).unwrap().faulted = true;
            self.events.push(SimEvent::SessionDown {
                neighbor: id.to_string(),
                fault,
            });
            if step.left_established() {
                self.session_down(id);
            }
        }
    }

    /// A session completed its handshake: register the peering on both endpoints and advertise
    /// the current best routes in both directions.
    fn session_up(&mut self, id: &str) {
        let (local, peer, spec) = {
            let s = &self.sessions[id];
            (s.local, s.peer, s.spec.clone())
        };
        let is_ebgp = LabDocument::is_ebgp(&spec);
        let local_kind = if is_ebgp {
            PeerKind::EBgp
        } else if spec.rr_client {
            PeerKind::IBgpClient
        } else {
            PeerKind::IBgpPeer
        };
        let peer_kind = if is_ebgp {
            PeerKind::EBgp
        } else {
            PeerKind::IBgpPeer
        };
        let (local_addr, local_bgp_id) = {
            let r = &self.routers[&local];
            (r.primary_addr(), r.spec.router_id)
        };
        let (peer_addr, peer_bgp_id) = {
            let r = &self.routers[&peer];
            (r.primary_addr(), r.spec.router_id)
        };

        self.routers.get_mut(&local).unwrap().peers.insert(
            peer,
            crate::router::PeerHandle {
                neighbor_id: id.to_string(),
                kind: local_kind,
                addr: peer_addr,
                bgp_id: peer_bgp_id,
                route_server_client: spec.route_server_client,
                policies_in: spec.in_route_maps.clone(),
                policies_out: spec.out_route_maps.clone(),
                max_prefixes: spec.max_prefixes,
            },
        );
        // policies and limits are configured on the local side of the neighbor object
        self.routers.get_mut(&peer).unwrap().peers.insert(
            local,
            crate::router::PeerHandle {
                neighbor_id: id.to_string(),
                kind: peer_kind,
                addr: local_addr,
                bgp_id: local_bgp_id,
                route_server_client: false,
                policies_in: Vec::new(),
                policies_out: Vec::new(),
                max_prefixes: None,
            },
        );

        debug!("session {id} established");
        self.events.push(SimEvent::SessionEstablished {
            neighbor: id.to_string(),
        });

        self.sync_peer(local);
        self.sync_peer(peer);
    }

    /// Re-run dissemination for every known prefix of a router. Used when a new peering comes up:
    /// the Adj-RIB-Out comparison suppresses everything that did not actually change.
    fn sync_peer(&mut self, rid: RouterId) {
        let SimState {
            routers,
            policies,
            queue,
            ..
        } = self;
        let router = routers.get_mut(&rid).unwrap();
        let prefixes: Vec<Ipv4Net> = router.ribs.known_prefixes.iter().copied().collect();
        for prefix in prefixes {
            queue.extend(router.disseminate(prefix, policies));
        }
    }

    /// A session left Established: deregister the peering and tombstone everything learned over
    /// it, on both endpoints. Re-selection for the affected prefixes happens when the state
    /// settles.
    fn session_down(&mut self, id: &str) {
        let (local, peer) = {
            let s = &self.sessions[id];
            (s.local, s.peer)
        };
        let tick = self.clock.tick();
        if let Some(router) = self.routers.get_mut(&local) {
            router.peers.remove(&peer);
            router.ribs.drop_peer(peer, tick);
        }
        if let Some(router) = self.routers.get_mut(&peer) {
            router.peers.remove(&local);
            router.ribs.drop_peer(local, tick);
        }
    }

    /// Feed one externally driven event into a session, after mutating it with `prepare`.
    fn drive_session(
        &mut self,
        neighbor: &str,
        event: FsmEvent,
        prepare: impl FnOnce(&mut Session),
    ) -> Result<Vec<SimEvent>, SimError> {
        self.events.clear();
        let step = {
            let session = self
                .sessions
                .get_mut(neighbor)
                .ok_or_else(|| SimError::UnknownNeighbor(neighbor.to_string()))?;
            prepare(session);
            session.handle(event)
        };
        let id = neighbor.to_string();
        self.apply_session_step(&id, step);
        self.settle()?;
        Ok(std::mem::take(&mut self.events))
    }

    /// Run decision and dissemination for every dirty prefix, then deliver queued messages one by
    /// one until nothing is left. Bounded by the message limit.
    fn settle(&mut self) -> Result<usize, SimError> {
        let mut processed = 0;
        loop {
            self.process_dirty()?;
            let Some(msg) = self.queue.pop_front() else {
                break;
            };
            processed += 1;
            if processed > self.msg_limit {
                debug!("simulation could not converge");
                return Err(SimError::NoConvergence);
            }
            if let Some((neighbor, fault)) = self.deliver(msg) {
                self.fail_session(&neighbor, fault);
            }
        }
        Ok(processed)
    }

    /// Phase 2 and 3 for every prefix marked dirty on any router.
    fn process_dirty(&mut self) -> Result<(), SimError> {
        let SimState {
            routers,
            policies,
            addr_map,
            queue,
            events,
            ..
        } = self;
        for router in routers.values_mut() {
            let dirty = router.ribs.take_dirty();
            for prefix in dirty {
                if let Some(change) = router.decide(prefix, policies, addr_map)? {
                    events.push(SimEvent::BestPathChanged {
                        router: router.spec.id.clone(),
                        prefix: change.prefix,
                        next_hop: change.next_hop,
                    });
                    queue.extend(router.disseminate(prefix, policies));
                }
            }
        }
        Ok(())
    }

    /// Deliver one BGP message into the recipient's Adj-RIB-In. Returns a session fault if the
    /// peer exceeded its max-prefix limit.
    fn deliver(&mut self, msg: MessageEvent) -> Option<(String, SessionFault)> {
        let tick = self.clock.tick();
        let Some(router) = self.routers.get_mut(&msg.to) else {
            warn!("BGP message to an unknown router, ignoring");
            return None;
        };
        let Some(handle) = router.peers.get(&msg.from).cloned() else {
            warn!(
                "{}: BGP message from a peer without an established session, ignoring",
                router.spec.id
            );
            return None;
        };
        match msg.event {
            BgpEvent::Update(route) => {
                let source = match handle.kind {
                    PeerKind::EBgp => RouteSource::EBgp,
                    PeerKind::IBgpClient => RouteSource::RrClient,
                    PeerKind::IBgpPeer => RouteSource::IBgp,
                };
                router.ribs.receive_update(
                    msg.from,
                    AdjRibInRecord {
                        route,
                        source,
                        peer_bgp_id: handle.bgp_id,
                        peer_addr: handle.addr,
                        age_ms: 0,
                        install_tick: tick,
                        withdrawn_at: None,
                    },
                );
                if let Some(limit) = handle.max_prefixes {
                    if router.ribs.prefix_count_from(msg.from) > limit {
                        return Some((
                            handle.neighbor_id.clone(),
                            SessionFault::MaxPrefixExceeded { limit },
                        ));
                    }
                }
            }
            BgpEvent::Withdraw(prefix) => {
                router.ribs.receive_withdraw(msg.from, prefix, tick);
            }
        }
        None
    }

    /// Fail a session from outside the FSM (max-prefix overrun). The session needs an operator
    /// restart afterwards, which keeps it from immediately re-establishing and overrunning again.
    fn fail_session(&mut self, id: &str, fault: SessionFault) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        warn!("session {id} failed: {fault}");
        let was_established = session.state == FsmState::Established;
        session.state = FsmState::Idle;
        session.admin_up = false;
        session.faulted = true;
        session.hold.stop();
        session.keepalive.stop();
        session.connect_retry.stop();
        self.events.push(SimEvent::SessionDown {
            neighbor: id.to_string(),
            fault,
        });
        if was_established {
            self.session_down(id);
        }
    }

    fn router_id(&self, router: &str) -> Result<RouterId, SimError> {
        self.router_ids
            .get(router)
            .copied()
            .ok_or_else(|| SimError::UnknownRouter(router.to_string()))
    }
}

/// The IGP cost of reaching a directly connected peer: the cost of the interface whose network
/// contains the peer's primary address, defaulting to 1.
fn link_cost(spec: &RouterSpec, peer_addr: Ipv4Addr) -> f64 {
    spec.interfaces
        .iter()
        .find(|iface| iface.network.contains(&peer_addr))
        .map(|iface| iface.cost.unwrap_or(1.0))
        .unwrap_or(1.0)
}
