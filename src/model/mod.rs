// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The zone/resource/node data model.
//!
//! A [`Zone`] owns [`Resource`]s, which own [`Node`]s. Ownership is
//! strictly downward: children know nothing of their parents, and all
//! mutation goes through the owning zone so that serial numbers can be
//! bumped up the chain (node, then resource, then zone).
//!
//! Which fields exist on each entity, and how they behave when set, is
//! described by the [`FieldSpec`] tables [`ZONE_FIELDS`],
//! [`RESOURCE_FIELDS`], and [`NODE_FIELDS`]. Setting a field whose spec
//! says it increments the serial bumps the serials of the entity and
//! all of its ancestors; setting a field whose spec says it propagates
//! produces a [`Change`] for peers.
//!
//! The [`ZoneSet`] is the registry of all zones and implements
//! replication: [`ZoneSet::receive_zones`] folds in peer snapshots by
//! serial comparison, and [`ZoneSet::apply_remote`] applies live
//! property changes from peers last-write-wins.

use std::fmt;

use serde::{Deserialize, Serialize};

mod entity;
mod snapshot;
mod validation;
mod zone_set;
pub use entity::{email_to_rname, Node, Resource, Selection, Soa, Zone};
pub use snapshot::{Checked, NodeSnapshot, ResourceSnapshot, ZoneSnapshot};
pub use validation::{ValidationError, ValidationIssue};
pub use zone_set::{ZoneEvent, ZoneSet};

////////////////////////////////////////////////////////////////////////
// FIELD TABLES                                                       //
////////////////////////////////////////////////////////////////////////

/// Describes how a settable entity field behaves.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,

    /// The field must be present in a snapshot for the entity to load.
    pub required: bool,

    /// Setting the field bumps the serial of the entity and its
    /// ancestors.
    pub increments_serial: bool,

    /// Setting the field locally is announced to peers.
    pub propagates: bool,
}

const fn field(
    name: &'static str,
    required: bool,
    increments_serial: bool,
    propagates: bool,
) -> FieldSpec {
    FieldSpec {
        name,
        required,
        increments_serial,
        propagates,
    }
}

pub const ZONE_FIELDS: &[FieldSpec] = &[
    field("email", true, true, true),
    field("ttl", true, true, true),
];

pub const RESOURCE_FIELDS: &[FieldSpec] = &[
    field("ttl", true, true, true),
    field("type", true, true, true),
    field("handler", true, true, true),
];

pub const NODE_FIELDS: &[FieldSpec] = &[
    field("ips", true, true, true),
    field("load", false, true, true),
    field("last_used", false, false, false),
];

/// Finds the spec for the field called `name` in `table`.
pub fn field_spec(table: &'static [FieldSpec], name: &str) -> Option<&'static FieldSpec> {
    table.iter().find(|spec| spec.name == name)
}

////////////////////////////////////////////////////////////////////////
// STAMPED VALUES AND CHANGES                                         //
////////////////////////////////////////////////////////////////////////

/// A field value together with the time (in milliseconds since the
/// UNIX epoch) it was last written. Values loaded from a snapshot have
/// a stamp of zero, so any live change supersedes them.
#[derive(Clone, Debug, PartialEq)]
pub struct Stamped<T> {
    pub value: T,
    pub when: u64,
}

impl<T: PartialEq> Stamped<T> {
    pub fn new(value: T) -> Self {
        Self { value, when: 0 }
    }

    /// Writes `value` if it differs from the current value. Remote
    /// writes must also be newer than the last write. Returns whether
    /// anything changed.
    fn assign(&mut self, value: T, when: u64, origin: Origin) -> bool {
        if value == self.value || (origin == Origin::Remote && when <= self.when) {
            false
        } else {
            self.value = value;
            self.when = when;
            true
        }
    }
}

/// Where a property write came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Origin {
    /// A local write (a load report, an administrative change). Bumps
    /// serials where the field says so.
    Local,

    /// A write propagated by a peer. Applied last-write-wins and never
    /// bumps serials, since the originating peer already did.
    Remote,
}

/// A property change, as propagated between peers.
///
/// `resource` and `node` form the path below the zone: a zone property
/// has neither, a resource property has only `resource`, and a node
/// property has both.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Change {
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub field: String,
    pub when: u64,
    pub value: serde_json::Value,
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a property could not be set.
#[derive(Debug)]
pub enum Error {
    UnknownZone(String),
    UnknownResource(String),
    UnknownNode(String),
    UnknownField(String),
    InvalidValue { field: &'static str, reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownZone(name) => write!(f, "unknown zone {name}"),
            Self::UnknownResource(name) => write!(f, "unknown resource {name}"),
            Self::UnknownNode(name) => write!(f, "unknown node {name}"),
            Self::UnknownField(name) => write!(f, "unknown or read-only field {name}"),
            Self::InvalidValue { field, reason } => {
                write!(f, "invalid value for field {field}: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}
