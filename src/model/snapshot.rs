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

//! The declarative snapshot form of zones, as persisted to disk and
//! exchanged with peers.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::validation::{check_required, ValidationError, ValidationIssue};
use super::{
    email_to_rname, Node, Resource, Stamped, Zone, NODE_FIELDS, RESOURCE_FIELDS, ZONE_FIELDS,
};
use crate::catalog::RecordInput;
use crate::name::Name;
use crate::policy::Pipeline;
use crate::rr::Type;

////////////////////////////////////////////////////////////////////////
// CHECKED ENTITIES                                                   //
////////////////////////////////////////////////////////////////////////

/// A snapshot entity that may not have been readable.
///
/// Zones, resources, and nodes are read through this wrapper, so that a
/// value of the wrong type inside one entity (say, a string `load`)
/// only makes that entity malformed. The document or batch around it
/// still deserializes, and validation reports the malformed entity
/// like any other invalid one. A malformed entity serializes back to
/// the JSON it was read from.
#[derive(Clone, Debug, PartialEq)]
pub enum Checked<T> {
    Valid(T),
    Malformed { value: Value, reason: String },
}

impl<T> Checked<T> {
    /// Returns the entity if it was readable.
    pub fn valid(&self) -> Option<&T> {
        match self {
            Self::Valid(entity) => Some(entity),
            Self::Malformed { .. } => None,
        }
    }

    /// Returns the entity, or a validation error for `path` if it was
    /// not readable.
    pub fn into_result(self, path: &str) -> Result<T, ValidationError> {
        match self {
            Self::Valid(entity) => Ok(entity),
            Self::Malformed { reason, .. } => Err(ValidationError::new(
                path,
                ValidationIssue::Malformed(reason),
            )),
        }
    }
}

impl<T> From<T> for Checked<T> {
    fn from(entity: T) -> Self {
        Self::Valid(entity)
    }
}

impl<T: Serialize> Serialize for Checked<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Valid(entity) => entity.serialize(serializer),
            Self::Malformed { value, .. } => value.serialize(serializer),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Checked<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match T::deserialize(&value) {
            Ok(entity) => Ok(Self::Valid(entity)),
            Err(err) => Ok(Self::Malformed {
                reason: err.to_string(),
                value,
            }),
        }
    }
}

impl Checked<ZoneSnapshot> {
    /// Names a zone for error messages, even when it is malformed.
    pub fn describe(&self) -> String {
        match self {
            Self::Valid(snapshot) => snapshot.name.clone(),
            Self::Malformed { value, .. } => value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("<unnamed zone>")
                .to_owned(),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// SNAPSHOTS                                                          //
////////////////////////////////////////////////////////////////////////

/// A zone snapshot.
///
/// Fields that an entity requires are still optional here, so that a
/// snapshot missing them can be read and then rejected by validation
/// with a useful message.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ZoneSnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<u64>,
    #[serde(default)]
    pub resources: BTreeMap<String, Checked<ResourceSnapshot>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<RecordInput>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub rr_type: Option<Type>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<u64>,
    #[serde(default)]
    pub nodes: BTreeMap<String, Checked<NodeSnapshot>>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct NodeSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ips: Option<Vec<String>>,
    #[serde(default)]
    pub load: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<u64>,
}

impl Zone {
    /// Builds a zone from a snapshot.
    ///
    /// A zone-level problem rejects the whole zone. Resources and nodes
    /// with problems are left out, and their issues are returned next
    /// to the zone so the caller can log them. A missing or zero serial
    /// becomes 1.
    pub fn from_snapshot(
        snapshot: ZoneSnapshot,
    ) -> Result<(Zone, Vec<ValidationError>), ValidationError> {
        let name = Name::qualify(&snapshot.name, &Name::root())
            .map_err(|err| ValidationError::invalid(&snapshot.name, "name", err))?;
        let path = name.to_string();

        check_required(ZONE_FIELDS, &path, |field| match field {
            "email" => snapshot.email.is_some(),
            "ttl" => snapshot.ttl.is_some(),
            _ => true,
        })?;
        let email = snapshot.email.unwrap_or_default();
        if email_to_rname(&email, &name).is_none() {
            let reason = format!("{email:?} is not a mailbox");
            return Err(ValidationError::invalid(&path, "email", reason));
        }
        let ttl = match snapshot.ttl {
            Some(0) | None => {
                return Err(ValidationError::invalid(&path, "ttl", "TTL must be positive"))
            }
            Some(ttl) => ttl,
        };

        let mut zone = Zone::new(name, &email, ttl);
        zone.serial = serial_or_default(snapshot.serial);
        zone.records = snapshot.records;

        let mut issues = Vec::new();
        for (resource_name, resource_snapshot) in snapshot.resources {
            let key = resource_name.to_ascii_lowercase();
            let resource_path = format!("{path}/{resource_name}");
            if zone.resources.contains_key(&key) {
                let reason = "duplicate resource name";
                issues.push(ValidationError::invalid(resource_path, "name", reason));
                continue;
            }
            match Name::qualify(&key, &zone.name) {
                Ok(owner) if owner.eq_or_subdomain_of(&zone.name) => (),
                _ => {
                    let reason = "not a name within the zone";
                    issues.push(ValidationError::invalid(resource_path, "name", reason));
                    continue;
                }
            }
            let resource = resource_snapshot
                .into_result(&resource_path)
                .and_then(|snapshot| {
                    resource_from_snapshot(&resource_path, snapshot, &mut issues)
                });
            match resource {
                Ok(resource) => {
                    zone.resources.insert(key, resource);
                }
                Err(err) => issues.push(err),
            }
        }

        Ok((zone, issues))
    }

    /// Produces the snapshot form of the zone.
    pub fn to_snapshot(&self) -> ZoneSnapshot {
        ZoneSnapshot {
            name: self.name.to_string(),
            email: Some(self.email.value.clone()),
            ttl: Some(self.ttl.value),
            serial: Some(self.serial),
            resources: self
                .resources
                .iter()
                .map(|(name, resource)| {
                    let snapshot = ResourceSnapshot {
                        ttl: Some(resource.ttl.value),
                        rr_type: Some(resource.rr_type.value),
                        handler: Some(resource.handler.value.to_string()),
                        serial: Some(resource.serial),
                        nodes: resource
                            .nodes
                            .iter()
                            .map(|(name, node)| {
                                let snapshot = NodeSnapshot {
                                    ips: Some(
                                        node.ips.value.iter().map(IpAddr::to_string).collect(),
                                    ),
                                    load: node.load.value,
                                    last_used: node.last_used.value,
                                    serial: Some(node.serial),
                                };
                                (name.clone(), Checked::Valid(snapshot))
                            })
                            .collect(),
                    };
                    (name.clone(), Checked::Valid(snapshot))
                })
                .collect(),
            records: self.records.clone(),
        }
    }
}

fn resource_from_snapshot(
    path: &str,
    snapshot: ResourceSnapshot,
    issues: &mut Vec<ValidationError>,
) -> Result<Resource, ValidationError> {
    check_required(RESOURCE_FIELDS, path, |field| match field {
        "ttl" => snapshot.ttl.is_some(),
        "handler" => snapshot.handler.is_some(),
        // The type defaults to A.
        _ => true,
    })?;
    let ttl = match snapshot.ttl {
        Some(0) | None => return Err(ValidationError::invalid(path, "ttl", "TTL must be positive")),
        Some(ttl) => ttl,
    };
    let rr_type = snapshot.rr_type.unwrap_or(Type::A);
    if !rr_type.is_supported() {
        return Err(ValidationError::invalid(path, "type", format!("{rr_type} is not supported")));
    }
    let handler: Pipeline = snapshot
        .handler
        .unwrap_or_default()
        .parse()
        .map_err(|err| ValidationError::invalid(path, "handler", err))?;

    let mut resource = Resource::new(ttl, rr_type, handler);
    resource.serial = serial_or_default(snapshot.serial);

    for (node_name, node_snapshot) in snapshot.nodes {
        let key = node_name.to_ascii_lowercase();
        let node_path = format!("{path}/{node_name}");
        if resource.nodes.contains_key(&key) {
            issues.push(ValidationError::invalid(node_path, "name", "duplicate node name"));
            continue;
        }
        let node = node_snapshot
            .into_result(&node_path)
            .and_then(|snapshot| node_from_snapshot(&node_path, snapshot));
        match node {
            Ok(node) => {
                resource.nodes.insert(key, node);
            }
            Err(err) => issues.push(err),
        }
    }
    Ok(resource)
}

fn node_from_snapshot(path: &str, snapshot: NodeSnapshot) -> Result<Node, ValidationError> {
    check_required(NODE_FIELDS, path, |field| match field {
        "ips" => snapshot.ips.is_some(),
        _ => true,
    })?;
    let ips = snapshot
        .ips
        .unwrap_or_default()
        .iter()
        .map(|ip| ip.parse::<IpAddr>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| ValidationError::invalid(path, "ips", err))?;
    if !snapshot.load.is_finite() {
        return Err(ValidationError::new(
            path,
            ValidationIssue::InvalidField {
                field: "load",
                reason: String::from("load must be finite"),
            },
        ));
    }

    let mut node = Node::new(ips);
    node.load = Stamped::new(snapshot.load);
    node.last_used = Stamped::new(snapshot.last_used);
    node.serial = serial_or_default(snapshot.serial);
    Ok(node)
}

fn serial_or_default(serial: Option<u64>) -> u64 {
    serial.filter(|&serial| serial > 0).unwrap_or(1)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
