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

//! The per-neighbor session state machine, shaped after RFC 4271 section 8: Idle, Connect,
//! Active, OpenSent, OpenConfirm and Established, driven by simulated events instead of TCP
//! sockets. The transition function is a single exhaustive match over (state, event); there is no
//! dynamic dispatch.
//!
//! Established is the only state in which routes are exchanged. Any transition out of Established
//! is a failure transition back to Idle, carries a [`SessionFault`], and causes all routes
//! learned from the peer to be withdrawn. Faults are observable events, never fatal to the
//! simulation.

use log::trace;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Timer;
use crate::lab::NeighborSpec;
use crate::types::{AsId, RouterId};

/// The state of a neighbor session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FsmState {
    /// Initial state; refuses everything until started.
    #[default]
    Idle,
    /// Actively trying to bring up the transport.
    Connect,
    /// Waiting for an inbound transport (passive side), or retrying after a failure.
    Active,
    /// Transport is up, OPEN sent, waiting for the peer's OPEN.
    OpenSent,
    /// OPENs exchanged, waiting for the first keepalive.
    OpenConfirm,
    /// The session is up; routes are exchanged.
    Established,
}

impl std::fmt::Display for FsmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FsmState::Idle => write!(f, "idle"),
            FsmState::Connect => write!(f, "connect"),
            FsmState::Active => write!(f, "active"),
            FsmState::OpenSent => write!(f, "open sent"),
            FsmState::OpenConfirm => write!(f, "open confirm"),
            FsmState::Established => write!(f, "established"),
        }
    }
}

/// A simulated event delivered to a session FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmEvent {
    /// The operator starts the session.
    ManualStart,
    /// The operator stops the session.
    ManualStop,
    /// The connect-retry timer ran out.
    ConnectRetryTimerExpires,
    /// The hold timer ran out without hearing from the peer.
    HoldTimerExpires,
    /// The keepalive timer ran out; time to send a keepalive.
    KeepaliveTimerExpires,
    /// The peer's (simulated) OPEN arrived.
    OpenReceived {
        /// The AS number the peer claims in its OPEN.
        peer_as: AsId,
    },
    /// A (simulated) keepalive arrived from the peer.
    KeepaliveReceived,
    /// A (simulated) NOTIFICATION arrived from the peer.
    NotificationReceived,
    /// The simulated transport came up.
    TransportUp,
    /// The simulated transport went down.
    TransportDown,
}

impl std::fmt::Display for FsmEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FsmEvent::ManualStart => write!(f, "manual start"),
            FsmEvent::ManualStop => write!(f, "manual stop"),
            FsmEvent::ConnectRetryTimerExpires => write!(f, "connect retry timer expires"),
            FsmEvent::HoldTimerExpires => write!(f, "hold timer expires"),
            FsmEvent::KeepaliveTimerExpires => write!(f, "keepalive timer expires"),
            FsmEvent::OpenReceived { peer_as } => write!(f, "open received ({peer_as})"),
            FsmEvent::KeepaliveReceived => write!(f, "keepalive received"),
            FsmEvent::NotificationReceived => write!(f, "notification received"),
            FsmEvent::TransportUp => write!(f, "transport up"),
            FsmEvent::TransportDown => write!(f, "transport down"),
        }
    }
}

/// Why a session failed. Faults are recovered automatically (the FSM falls back to Idle and the
/// peer's routes are withdrawn) and surfaced as observable events.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionFault {
    /// The hold timer expired without a keepalive from the peer. The canonical failure.
    #[error("hold timer expired")]
    HoldTimerExpired,
    /// The peer's OPEN announced an unexpected AS.
    #[error("malformed OPEN: expected {expected}, got {got}")]
    MalformedOpen {
        /// The AS configured for the peer.
        expected: AsId,
        /// The AS the peer announced.
        got: AsId,
    },
    /// The peer sent a NOTIFICATION.
    #[error("notification received")]
    NotificationReceived,
    /// The simulated transport went down.
    #[error("transport lost")]
    TransportLost,
    /// The peer advertised more prefixes than allowed.
    #[error("max-prefix limit of {limit} exceeded")]
    MaxPrefixExceeded {
        /// The configured limit.
        limit: usize,
    },
    /// The operator stopped the session.
    #[error("manual stop")]
    ManualStop,
}

/// What a transition asks the surrounding machinery to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FsmAction {
    StartConnectRetry,
    StopConnectRetry,
    /// Arm (or re-arm) the hold timer to its full interval.
    RestartHold,
    StopHold,
    StartKeepalive,
    StopKeepalive,
    /// Send a (simulated) OPEN to the peer.
    SendOpen,
    /// Send a (simulated) keepalive to the peer.
    SendKeepalive,
    /// Report a session fault. If the session was Established, the engine withdraws all routes
    /// learned from the peer.
    Fault(SessionFault),
}

/// The result of applying one event: the next state and the actions to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Transition {
    pub next: FsmState,
    pub actions: Vec<FsmAction>,
}

impl Transition {
    fn to(next: FsmState, actions: Vec<FsmAction>) -> Self {
        Self { next, actions }
    }

    fn stay(state: FsmState) -> Self {
        Self {
            next: state,
            actions: Vec::new(),
        }
    }
}

/// The transition table. Pure: consults only the current state, the event, and the neighbor
/// configuration (passive flag and expected peer AS).
pub(crate) fn transition(state: FsmState, event: &FsmEvent, spec: &NeighborSpec) -> Transition {
    use FsmAction::*;
    use FsmEvent as E;
    use FsmState::*;

    match (state, event) {
        (Idle, E::ManualStart) if spec.passive => Transition::to(Active, vec![]),
        (Idle, E::ManualStart) => Transition::to(Connect, vec![StartConnectRetry]),

        (Connect, E::TransportUp) => {
            Transition::to(OpenSent, vec![StopConnectRetry, SendOpen, RestartHold])
        }
        (Connect, E::ConnectRetryTimerExpires) => Transition::to(Connect, vec![StartConnectRetry]),
        (Connect, E::TransportDown) => Transition::to(Active, vec![StopConnectRetry]),

        (Active, E::TransportUp) => Transition::to(OpenSent, vec![SendOpen, RestartHold]),
        (Active, E::OpenReceived { peer_as }) if *peer_as == spec.peer_as => {
            Transition::to(OpenConfirm, vec![SendOpen, SendKeepalive, RestartHold])
        }
        (OpenSent, E::OpenReceived { peer_as }) if *peer_as == spec.peer_as => {
            Transition::to(OpenConfirm, vec![SendKeepalive, RestartHold])
        }
        (Active | OpenSent, E::OpenReceived { peer_as }) => Transition::to(
            Idle,
            vec![
                StopHold,
                Fault(SessionFault::MalformedOpen {
                    expected: spec.peer_as,
                    got: *peer_as,
                }),
            ],
        ),

        (OpenSent, E::TransportDown) => Transition::to(Active, vec![StopHold]),
        (OpenSent | OpenConfirm, E::HoldTimerExpires) => Transition::to(
            Idle,
            vec![StopHold, Fault(SessionFault::HoldTimerExpired)],
        ),
        (OpenSent | OpenConfirm, E::NotificationReceived) => Transition::to(
            Idle,
            vec![StopHold, Fault(SessionFault::NotificationReceived)],
        ),

        (OpenConfirm, E::KeepaliveReceived) => {
            Transition::to(Established, vec![RestartHold, StartKeepalive])
        }
        (OpenConfirm, E::TransportDown) => {
            Transition::to(Idle, vec![StopHold, Fault(SessionFault::TransportLost)])
        }

        (Established, E::OpenReceived { peer_as }) => Transition::to(
            Idle,
            vec![
                StopHold,
                StopKeepalive,
                Fault(SessionFault::MalformedOpen {
                    expected: spec.peer_as,
                    got: *peer_as,
                }),
            ],
        ),
        (Established, E::KeepaliveTimerExpires) => {
            Transition::to(Established, vec![SendKeepalive])
        }
        (Established, E::KeepaliveReceived) => Transition::to(Established, vec![RestartHold]),
        (Established, E::HoldTimerExpires) => Transition::to(
            Idle,
            vec![
                StopHold,
                StopKeepalive,
                Fault(SessionFault::HoldTimerExpired),
            ],
        ),
        (Established, E::NotificationReceived) => Transition::to(
            Idle,
            vec![
                StopHold,
                StopKeepalive,
                Fault(SessionFault::NotificationReceived),
            ],
        ),
        (Established, E::TransportDown) => Transition::to(
            Idle,
            vec![StopHold, StopKeepalive, Fault(SessionFault::TransportLost)],
        ),

        (Connect | Active | OpenSent | OpenConfirm | Established, E::ManualStop) => Transition::to(
            Idle,
            vec![
                StopConnectRetry,
                StopHold,
                StopKeepalive,
                Fault(SessionFault::ManualStop),
            ],
        ),

        (state, event) => {
            trace!("event '{event}' ignored in state '{state}'");
            Transition::stay(state)
        }
    }
}

/// The outcome of one event handled by a [`Session`], interpreted by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SessionStep {
    pub from: FsmState,
    pub to: FsmState,
    pub send_open: bool,
    pub send_keepalive: bool,
    pub fault: Option<SessionFault>,
}

impl SessionStep {
    /// The session just completed its handshake.
    pub fn entered_established(&self) -> bool {
        self.from != FsmState::Established && self.to == FsmState::Established
    }

    /// The session just failed out of Established; routes from the peer must be withdrawn.
    pub fn left_established(&self) -> bool {
        self.from == FsmState::Established && self.to != FsmState::Established
    }
}

/// One neighbor relationship: its configuration, the FSM state, and the three session timers.
/// The timer intervals are taken from the local router's timer defaults.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) spec: NeighborSpec,
    pub(crate) local: RouterId,
    pub(crate) peer: RouterId,
    pub(crate) state: FsmState,
    pub(crate) admin_up: bool,
    pub(crate) transport_up: bool,
    /// Set when the session failed. A faulted session stays in Idle until the operator restarts
    /// it or brings the transport back up.
    pub(crate) faulted: bool,
    pub(crate) connect_retry: Timer,
    pub(crate) hold: Timer,
    pub(crate) keepalive: Timer,
}

impl Session {
    pub(crate) fn new(
        spec: NeighborSpec,
        local: RouterId,
        peer: RouterId,
        keepalive_ms: u64,
        hold_ms: u64,
        connect_retry_ms: u64,
    ) -> Self {
        Self {
            spec,
            local,
            peer,
            state: FsmState::Idle,
            admin_up: true,
            transport_up: true,
            faulted: false,
            connect_retry: Timer::periodic(connect_retry_ms),
            hold: Timer::one_shot(hold_ms),
            keepalive: Timer::periodic(keepalive_ms),
        }
    }

    /// The current FSM state.
    pub fn state(&self) -> FsmState {
        self.state
    }

    /// The neighbor id from the lab document.
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Apply one event: run the transition table, update timers, and report what happened.
    pub(crate) fn handle(&mut self, event: FsmEvent) -> SessionStep {
        let from = self.state;
        let Transition { next, actions } = transition(from, &event, &self.spec);
        let mut step = SessionStep {
            from,
            to: next,
            ..Default::default()
        };
        for action in actions {
            match action {
                FsmAction::StartConnectRetry => self.connect_retry.restart(),
                FsmAction::StopConnectRetry => self.connect_retry.stop(),
                FsmAction::RestartHold => self.hold.restart(),
                FsmAction::StopHold => self.hold.stop(),
                FsmAction::StartKeepalive => self.keepalive.restart(),
                FsmAction::StopKeepalive => self.keepalive.stop(),
                FsmAction::SendOpen => step.send_open = true,
                FsmAction::SendKeepalive => step.send_keepalive = true,
                FsmAction::Fault(fault) => step.fault = Some(fault),
            }
        }
        self.state = next;
        step
    }
}
