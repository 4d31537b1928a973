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

//! Opaque, named policy objects. Route-maps, community-lists, AS-path-lists and prefix-lists are
//! referenced by name from routers and neighbors; their bodies are never evaluated. Each name
//! resolves to an action: accept unchanged (the default), reject, or accept with an attribute
//! override. This keeps the accept/modify/reject extension point without a policy language.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::bgp::BgpRoute;
use crate::types::AsId;

/// What applying a named policy does to a route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyAction {
    /// Accept the route unchanged.
    #[default]
    Accept,
    /// Reject the route.
    Reject,
    /// Accept the route with some attributes overridden.
    Modify(AttributeOverride),
}

/// Attribute overrides applied by a [`PolicyAction::Modify`]. Only the set fields change the
/// route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttributeOverride {
    /// Overwrite LOCAL_PREF.
    pub local_pref: Option<u32>,
    /// Overwrite MED.
    pub med: Option<u32>,
    /// Overwrite the administrative weight.
    pub weight: Option<u32>,
    /// Prepend these AS numbers to the AS-PATH (first element ends up first).
    pub prepend: Vec<AsId>,
    /// Add these communities.
    pub add_communities: BTreeSet<u32>,
}

impl AttributeOverride {
    fn apply(&self, route: &mut BgpRoute) {
        if let Some(lp) = self.local_pref {
            route.attrs.local_pref = Some(lp);
        }
        if let Some(med) = self.med {
            route.attrs.med = Some(med);
        }
        if let Some(weight) = self.weight {
            route.attrs.weight = Some(weight);
        }
        for asn in self.prepend.iter().rev() {
            route.attrs.as_path.insert(0, *asn);
        }
        route.attrs.communities.extend(self.add_communities.iter());
    }
}

/// The engine-wide table resolving policy names to actions. Names that were never configured
/// resolve to [`PolicyAction::Accept`].
#[derive(Debug, Clone, Default)]
pub(crate) struct PolicyTable {
    actions: HashMap<String, PolicyAction>,
}

impl PolicyTable {
    pub(crate) fn set(&mut self, name: impl Into<String>, action: PolicyAction) {
        self.actions.insert(name.into(), action);
    }

    /// Apply a chain of named policies to a route. Returns `None` as soon as one of them rejects.
    pub(crate) fn apply(&self, names: &[String], mut route: BgpRoute) -> Option<BgpRoute> {
        for name in names {
            match self.actions.get(name).unwrap_or(&PolicyAction::Accept) {
                PolicyAction::Accept => {}
                PolicyAction::Reject => return None,
                PolicyAction::Modify(overrides) => overrides.apply(&mut route),
            }
        }
        Some(route)
    }
}
