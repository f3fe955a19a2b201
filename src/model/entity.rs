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

//! The [`Zone`], [`Resource`], and [`Node`] entities.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{
    field_spec, Error, FieldSpec, Origin, Stamped, NODE_FIELDS, RESOURCE_FIELDS, ZONE_FIELDS,
};
use crate::catalog::RecordInput;
use crate::name::Name;
use crate::policy::{Candidate, Pipeline};
use crate::rr::Type;

// SOA timers. Zones do not carry these, so every zone uses the same.
const SOA_REFRESH: u32 = 3600;
const SOA_RETRY: u32 = 1200;
const SOA_EXPIRE: u32 = 1_209_600;

////////////////////////////////////////////////////////////////////////
// NODES                                                              //
////////////////////////////////////////////////////////////////////////

/// A backend endpoint that can be handed out in responses.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub(super) ips: Stamped<Vec<IpAddr>>,
    pub(super) load: Stamped<f64>,
    pub(super) last_used: Stamped<Option<u64>>,
    pub(super) serial: u64,
}

impl Node {
    pub fn new(ips: Vec<IpAddr>) -> Self {
        Self {
            ips: Stamped::new(ips),
            load: Stamped::new(0.0),
            last_used: Stamped::new(None),
            serial: 1,
        }
    }

    pub fn ips(&self) -> &[IpAddr] {
        &self.ips.value
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    fn set(
        &mut self,
        spec: &'static FieldSpec,
        value: &Value,
        when: u64,
        origin: Origin,
    ) -> Result<bool, Error> {
        check_origin(spec, origin)?;
        Ok(match spec.name {
            "ips" => self.ips.assign(decode(spec, value)?, when, origin),
            "load" => self.load.assign(decode(spec, value)?, when, origin),
            _ => self.last_used.assign(Some(decode(spec, value)?), when, origin),
        })
    }
}

/// A node paired with its name, so that selection results can be
/// mapped back to map keys.
struct Named<'a>(&'a str, &'a Node);

impl Candidate for Named<'_> {
    fn load(&self) -> f64 {
        self.1.load()
    }

    fn last_used(&self) -> Option<u64> {
        self.1.last_used()
    }
}

impl Candidate for Node {
    fn load(&self) -> f64 {
        self.load.value
    }

    fn last_used(&self) -> Option<u64> {
        self.last_used.value
    }
}

////////////////////////////////////////////////////////////////////////
// RESOURCES                                                          //
////////////////////////////////////////////////////////////////////////

/// A named service within a zone, answered with the addresses of the
/// nodes its pipeline selects.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    pub(super) ttl: Stamped<u32>,
    pub(super) rr_type: Stamped<Type>,
    pub(super) handler: Stamped<Pipeline>,
    pub(super) nodes: BTreeMap<String, Node>,
    pub(super) serial: u64,
}

impl Resource {
    pub fn new(ttl: u32, rr_type: Type, handler: Pipeline) -> Self {
        Self {
            ttl: Stamped::new(ttl),
            rr_type: Stamped::new(rr_type),
            handler: Stamped::new(handler),
            nodes: BTreeMap::new(),
            serial: 1,
        }
    }

    pub fn ttl(&self) -> u32 {
        self.ttl.value
    }

    pub fn rr_type(&self) -> Type {
        self.rr_type.value
    }

    pub fn handler(&self) -> &Pipeline {
        &self.handler.value
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Returns the node with the given (case-insensitive) name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(&name.to_ascii_lowercase())
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(name, node)| (name.as_str(), node))
    }

    /// Adds a node while the resource is being built, before it belongs
    /// to a zone.
    pub fn with_node(mut self, name: &str, node: Node) -> Self {
        self.nodes.insert(name.to_ascii_lowercase(), node);
        self
    }

    fn set(
        &mut self,
        spec: &'static FieldSpec,
        value: &Value,
        when: u64,
        origin: Origin,
    ) -> Result<bool, Error> {
        check_origin(spec, origin)?;
        Ok(match spec.name {
            "ttl" => self.ttl.assign(positive_ttl(spec, value)?, when, origin),
            "type" => self.rr_type.assign(supported_type(spec, value)?, when, origin),
            _ => self.handler.assign(decode(spec, value)?, when, origin),
        })
    }
}

////////////////////////////////////////////////////////////////////////
// ZONES                                                              //
////////////////////////////////////////////////////////////////////////

/// An authoritative zone: its administrative data, its resources, and
/// any static records.
#[derive(Clone, Debug, PartialEq)]
pub struct Zone {
    pub(super) name: Name,
    pub(super) email: Stamped<String>,
    pub(super) ttl: Stamped<u32>,
    pub(super) serial: u64,
    pub(super) resources: BTreeMap<String, Resource>,
    pub(super) records: Vec<RecordInput>,
}

/// The result of running a resource's pipeline for a query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Selection {
    pub ttl: u32,
    pub nodes: Vec<String>,
    pub addresses: Vec<IpAddr>,
}

/// SOA data derived from a zone's metadata.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Soa {
    pub mname: Name,
    pub rname: Name,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
    pub ttl: u32,
}

impl Zone {
    /// Creates a zone with serial 1. `email` must be convertible to a
    /// domain name (see [`email_to_rname`]).
    pub fn new(name: Name, email: &str, ttl: u32) -> Self {
        Self {
            name,
            email: Stamped::new(email.to_owned()),
            ttl: Stamped::new(ttl),
            serial: 1,
            resources: BTreeMap::new(),
            records: Vec::new(),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email.value
    }

    pub fn ttl(&self) -> u32 {
        self.ttl.value
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn records(&self) -> &[RecordInput] {
        &self.records
    }

    /// Returns the resource with the given (case-insensitive) name.
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.get(&name.to_ascii_lowercase())
    }

    pub fn resources(&self) -> impl Iterator<Item = (&str, &Resource)> {
        self.resources.iter().map(|(name, r)| (name.as_str(), r))
    }

    /// Returns the highest serial of the zone or anything within it.
    pub fn max_serial(&self) -> u64 {
        self.resources
            .values()
            .flat_map(|r| std::iter::once(r.serial).chain(r.nodes.values().map(|n| n.serial)))
            .fold(self.serial, u64::max)
    }

    /// Adds or replaces a resource, bumping the zone serial.
    pub fn insert_resource(&mut self, name: &str, resource: Resource) {
        self.resources.insert(name.to_ascii_lowercase(), resource);
        self.serial += 1;
    }

    /// Removes a resource, bumping the zone serial if it existed.
    pub fn remove_resource(&mut self, name: &str) -> Option<Resource> {
        let removed = self.resources.remove(&name.to_ascii_lowercase());
        if removed.is_some() {
            self.serial += 1;
        }
        removed
    }

    /// Adds or replaces a node of an existing resource, bumping the
    /// resource and zone serials.
    pub fn insert_node(&mut self, resource: &str, name: &str, node: Node) -> Result<(), Error> {
        let parent = self
            .resources
            .get_mut(&resource.to_ascii_lowercase())
            .ok_or_else(|| Error::UnknownResource(resource.to_owned()))?;
        parent.nodes.insert(name.to_ascii_lowercase(), node);
        parent.serial += 1;
        self.serial += 1;
        Ok(())
    }

    /// Removes a node, bumping the resource and zone serials if it
    /// existed.
    pub fn remove_node(&mut self, resource: &str, name: &str) -> Result<Option<Node>, Error> {
        let parent = self
            .resources
            .get_mut(&resource.to_ascii_lowercase())
            .ok_or_else(|| Error::UnknownResource(resource.to_owned()))?;
        let removed = parent.nodes.remove(&name.to_ascii_lowercase());
        if removed.is_some() {
            parent.serial += 1;
            self.serial += 1;
        }
        Ok(removed)
    }

    /// Sets a field of the zone (no `resource`), of a resource (no
    /// `node`), or of a node. Returns the field's spec if the value
    /// changed.
    ///
    /// Local writes of serial-incrementing fields bump the serial of
    /// the written entity and of every entity above it.
    pub fn set_property(
        &mut self,
        resource: Option<&str>,
        node: Option<&str>,
        field: &str,
        value: &Value,
        when: u64,
        origin: Origin,
    ) -> Result<Option<&'static FieldSpec>, Error> {
        let unknown_field = || Error::UnknownField(field.to_owned());
        let (spec, applied) = match (resource, node) {
            (None, None) => {
                let spec = field_spec(ZONE_FIELDS, field).ok_or_else(unknown_field)?;
                let applied = match spec.name {
                    "email" => {
                        let email: String = decode(spec, value)?;
                        email_to_rname(&email, &self.name).ok_or_else(|| Error::InvalidValue {
                            field: spec.name,
                            reason: format!("{email:?} is not a mailbox"),
                        })?;
                        self.email.assign(email, when, origin)
                    }
                    _ => self.ttl.assign(positive_ttl(spec, value)?, when, origin),
                };
                if applied && bumps(spec, origin) {
                    self.serial += 1;
                }
                (spec, applied)
            }
            (Some(resource), None) => {
                let spec = field_spec(RESOURCE_FIELDS, field).ok_or_else(unknown_field)?;
                let target = self
                    .resources
                    .get_mut(&resource.to_ascii_lowercase())
                    .ok_or_else(|| Error::UnknownResource(resource.to_owned()))?;
                let applied = target.set(spec, value, when, origin)?;
                if applied && bumps(spec, origin) {
                    target.serial += 1;
                    self.serial += 1;
                }
                (spec, applied)
            }
            (Some(resource), Some(node)) => {
                let spec = field_spec(NODE_FIELDS, field).ok_or_else(unknown_field)?;
                let parent = self
                    .resources
                    .get_mut(&resource.to_ascii_lowercase())
                    .ok_or_else(|| Error::UnknownResource(resource.to_owned()))?;
                let target = parent
                    .nodes
                    .get_mut(&node.to_ascii_lowercase())
                    .ok_or_else(|| Error::UnknownNode(node.to_owned()))?;
                let applied = target.set(spec, value, when, origin)?;
                if applied && bumps(spec, origin) {
                    target.serial += 1;
                    parent.serial += 1;
                    self.serial += 1;
                }
                (spec, applied)
            }
            (None, Some(node)) => return Err(Error::UnknownNode(node.to_owned())),
        };
        Ok(applied.then_some(spec))
    }

    /// Finds the resource answering `qname`/`qtype`, runs its pipeline,
    /// and records `now` as the last-used time of every selected node.
    ///
    /// The resource is found by exact name first, then by the wildcard
    /// resources `*.<ancestor>` from the closest ancestor up to the apex.
    /// Returns [`None`] if no resource of type `qtype` matches; a
    /// matching resource without nodes yields an empty selection.
    pub fn select_nodes(&mut self, qname: &Name, qtype: Type, now: u64) -> Option<Selection> {
        let key = self.resource_key(qname, qtype)?;
        let resource = self.resources.get_mut(&key)?;

        let order: Vec<String> = {
            let named: Vec<Named> = resource
                .nodes
                .iter()
                .map(|(name, node)| Named(name, node))
                .collect();
            let candidates: Vec<&Named> = named.iter().collect();
            resource
                .handler
                .value
                .select(&candidates, now)
                .into_iter()
                .map(|named| named.0.to_owned())
                .collect()
        };

        let mut addresses = Vec::new();
        for name in &order {
            if let Some(node) = resource.nodes.get_mut(name) {
                node.last_used.value = Some(now);
                node.last_used.when = now;
                addresses.extend(node.ips.value.iter().copied().filter(|ip| match qtype {
                    Type::A => ip.is_ipv4(),
                    Type::AAAA => ip.is_ipv6(),
                    _ => false,
                }));
            }
        }

        Some(Selection {
            ttl: resource.ttl.value,
            nodes: order,
            addresses,
        })
    }

    /// Returns whether a resource of type `qtype` answers `qname`,
    /// directly or through a wildcard.
    pub fn has_resource(&self, qname: &Name, qtype: Type) -> bool {
        self.resource_key(qname, qtype).is_some()
    }

    fn resource_key(&self, qname: &Name, qtype: Type) -> Option<String> {
        let mut candidates = vec![qname.clone()];
        let mut ancestor = qname.parent();
        while let Some(current) = ancestor {
            if !current.eq_or_subdomain_of(&self.name) {
                break;
            }
            candidates.push(current.wildcard_child());
            ancestor = current.parent();
        }

        candidates
            .iter()
            .filter_map(|candidate| candidate.relative_to(&self.name))
            .find(|key| {
                self.resources
                    .get(key)
                    .map_or(false, |resource| resource.rr_type.value == qtype)
            })
    }

    /// Returns the zone's SOA data. The serial is truncated to 32 bits.
    pub fn soa(&self) -> Soa {
        Soa {
            mname: self.name.clone(),
            rname: email_to_rname(&self.email.value, &self.name)
                .unwrap_or_else(|| self.name.clone()),
            serial: self.serial as u32,
            refresh: SOA_REFRESH,
            retry: SOA_RETRY,
            expire: SOA_EXPIRE,
            minimum: self.ttl.value,
            ttl: self.ttl.value,
        }
    }
}

/// Converts an administrative email address to the domain-name form
/// used in SOA RNAME fields: `hostmaster@example.com` becomes
/// `hostmaster.example.com.`. Addresses already in domain-name form are
/// taken as absolute.
pub fn email_to_rname(email: &str, zone: &Name) -> Option<Name> {
    let text = email.trim();
    if text.is_empty() {
        return None;
    }
    let text = match text.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !local.contains('.') => {
            format!("{local}.{domain}")
        }
        Some(_) => return None,
        None => text.to_owned(),
    };
    if text.ends_with('.') {
        Name::qualify(&text, zone).ok()
    } else {
        Name::qualify(&format!("{text}."), zone).ok()
    }
}

fn bumps(spec: &FieldSpec, origin: Origin) -> bool {
    origin == Origin::Local && spec.increments_serial
}

fn decode<T: DeserializeOwned>(spec: &'static FieldSpec, value: &Value) -> Result<T, Error> {
    serde_json::from_value(value.clone()).map_err(|err| Error::InvalidValue {
        field: spec.name,
        reason: err.to_string(),
    })
}

/// Rejects peer writes to fields that are never propagated, such as a
/// node's `last_used`.
fn check_origin(spec: &'static FieldSpec, origin: Origin) -> Result<(), Error> {
    if origin == Origin::Remote && !spec.propagates {
        Err(Error::InvalidValue {
            field: spec.name,
            reason: String::from("field is not accepted from peers"),
        })
    } else {
        Ok(())
    }
}

fn supported_type(spec: &'static FieldSpec, value: &Value) -> Result<Type, Error> {
    let rr_type: Type = decode(spec, value)?;
    if rr_type.is_supported() {
        Ok(rr_type)
    } else {
        Err(Error::InvalidValue {
            field: spec.name,
            reason: format!("{rr_type} is not supported"),
        })
    }
}

fn positive_ttl(spec: &'static FieldSpec, value: &Value) -> Result<u32, Error> {
    match decode::<u32>(spec, value)? {
        0 => Err(Error::InvalidValue {
            field: spec.name,
            reason: String::from("TTL must be positive"),
        }),
        ttl => Ok(ttl),
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    fn example_zone() -> Zone {
        let mut zone = Zone::new(name("example.com."), "hostmaster@example.com", 300);
        let www = Resource::new(60, Type::A, "LeastLoad(2)".parse().unwrap())
            .with_node("n1", Node::new(vec![ip("192.0.2.1"), ip("2001:db8::1")]))
            .with_node("n2", Node::new(vec![ip("192.0.2.2")]))
            .with_node("n3", Node::new(vec![ip("192.0.2.3")]));
        zone.resources.insert("www".into(), www);
        zone.resources.insert(
            "*.dyn".into(),
            Resource::new(30, Type::A, Pipeline::default())
                .with_node("d1", Node::new(vec![ip("198.51.100.1")])),
        );
        zone.resources.insert("empty".into(), Resource::new(30, Type::A, Pipeline::default()));
        zone
    }

    fn set_load(zone: &mut Zone, node: &str, load: f64) {
        zone.set_property(Some("www"), Some(node), "load", &json!(load), 1, Origin::Local)
            .unwrap();
    }

    #[test]
    fn node_writes_bump_serials_up_the_chain() {
        let mut zone = example_zone();
        let before = zone.serial();
        for (i, load) in [5.0, 10.0, 1.0].into_iter().enumerate() {
            let serial = zone.serial();
            set_load(&mut zone, &format!("n{}", i + 1), load);
            assert!(zone.serial() > serial);
        }
        assert_eq!(zone.serial(), before + 3);
        let www = zone.resource("www").unwrap();
        assert_eq!(www.serial(), 4);
        assert_eq!(www.node("N1").unwrap().serial(), 2);
    }

    #[test]
    fn resource_and_zone_writes_bump_serials() {
        let mut zone = example_zone();
        let spec = zone
            .set_property(Some("WWW"), None, "ttl", &json!(120), 5, Origin::Local)
            .unwrap()
            .unwrap();
        assert_eq!(spec.name, "ttl");
        assert_eq!(zone.serial(), 2);
        zone.set_property(None, None, "email", &json!("admin@example.com"), 6, Origin::Local)
            .unwrap();
        assert_eq!(zone.serial(), 3);
        assert_eq!(zone.soa().rname, name("admin.example.com."));
    }

    #[test]
    fn unchanged_and_local_only_writes_do_not_bump() {
        let mut zone = example_zone();
        let same = zone
            .set_property(Some("www"), None, "ttl", &json!(60), 5, Origin::Local)
            .unwrap();
        assert!(same.is_none());
        zone.set_property(Some("www"), Some("n1"), "last_used", &json!(99), 5, Origin::Local)
            .unwrap();
        assert_eq!(zone.serial(), 1);
    }

    #[test]
    fn invalid_writes_are_rejected() {
        let mut zone = example_zone();
        assert!(matches!(
            zone.set_property(Some("www"), None, "ttl", &json!(0), 1, Origin::Local),
            Err(Error::InvalidValue { field: "ttl", .. })
        ));
        assert!(matches!(
            zone.set_property(Some("www"), None, "handler", &json!("Random(1)"), 1, Origin::Local),
            Err(Error::InvalidValue { field: "handler", .. })
        ));
        assert!(matches!(
            zone.set_property(Some("nope"), None, "ttl", &json!(5), 1, Origin::Local),
            Err(Error::UnknownResource(_))
        ));
        assert!(matches!(
            zone.set_property(Some("www"), Some("nope"), "load", &json!(5), 1, Origin::Local),
            Err(Error::UnknownNode(_))
        ));
        assert!(matches!(
            zone.set_property(None, None, "serial", &json!(5), 1, Origin::Local),
            Err(Error::UnknownField(_))
        ));
        assert_eq!(zone.serial(), 1);
    }

    #[test]
    fn unsupported_types_and_peer_only_fields_are_rejected() {
        let mut zone = example_zone();
        assert!(matches!(
            zone.set_property(Some("www"), None, "type", &json!("ANY"), 1, Origin::Local),
            Err(Error::InvalidValue { field: "type", .. })
        ));
        assert!(matches!(
            zone.set_property(Some("www"), None, "type", &json!(99), 1, Origin::Remote),
            Err(Error::InvalidValue { field: "type", .. })
        ));
        assert_eq!(zone.resource("www").unwrap().rr_type(), Type::A);
        assert!(matches!(
            zone.set_property(Some("www"), Some("n1"), "last_used", &json!(7), 9, Origin::Remote),
            Err(Error::InvalidValue { field: "last_used", .. })
        ));
        assert_eq!(zone.resource("www").unwrap().node("n1").unwrap().last_used(), None);
        let aaaa = zone
            .set_property(Some("www"), None, "type", &json!("AAAA"), 2, Origin::Local)
            .unwrap();
        assert!(aaaa.is_some());
        assert_eq!(zone.resource("www").unwrap().rr_type(), Type::AAAA);
    }

    #[test]
    fn remote_writes_are_last_write_wins_without_bumping() {
        let mut zone = example_zone();
        let applied = zone
            .set_property(Some("www"), Some("n1"), "load", &json!(7.0), 100, Origin::Remote)
            .unwrap();
        assert!(applied.is_some());
        let stale = zone
            .set_property(Some("www"), Some("n1"), "load", &json!(9.0), 50, Origin::Remote)
            .unwrap();
        assert!(stale.is_none());
        assert_eq!(zone.resource("www").unwrap().node("n1").unwrap().load(), 7.0);
        assert_eq!(zone.serial(), 1);
    }

    #[test]
    fn selection_follows_pipeline_and_marks_nodes_used() {
        let mut zone = example_zone();
        set_load(&mut zone, "n1", 5.0);
        set_load(&mut zone, "n2", 10.0);
        set_load(&mut zone, "n3", 1.0);

        let selection = zone.select_nodes(&name("www.example.com."), Type::A, 1000).unwrap();
        assert_eq!(selection.nodes, ["n3", "n1"]);
        assert_eq!(selection.ttl, 60);
        assert_eq!(selection.addresses, [ip("192.0.2.3"), ip("192.0.2.1")]);

        let www = zone.resource("www").unwrap();
        assert_eq!(www.node("n3").unwrap().last_used(), Some(1000));
        assert_eq!(www.node("n2").unwrap().last_used(), None);

        let v6 = zone.select_nodes(&name("www.example.com."), Type::AAAA, 2000);
        assert!(v6.is_none());
    }

    #[test]
    fn selection_uses_wildcard_resources() {
        let mut zone = example_zone();
        let selection = zone
            .select_nodes(&name("host7.dyn.example.com."), Type::A, 1)
            .unwrap();
        assert_eq!(selection.addresses, [ip("198.51.100.1")]);
        assert!(zone.select_nodes(&name("dyn.example.com."), Type::A, 1).is_none());
    }

    #[test]
    fn empty_resource_selects_nothing() {
        let mut zone = example_zone();
        let selection = zone.select_nodes(&name("empty.example.com."), Type::A, 1).unwrap();
        assert!(selection.nodes.is_empty());
        assert!(selection.addresses.is_empty());
    }

    #[test]
    fn structural_changes_bump_serials() {
        let mut zone = example_zone();
        zone.insert_node("www", "n4", Node::new(vec![ip("192.0.2.4")])).unwrap();
        assert_eq!(zone.serial(), 2);
        assert!(zone.remove_node("www", "n4").unwrap().is_some());
        assert_eq!(zone.serial(), 3);
        assert!(zone.remove_resource("empty").is_some());
        assert!(zone.remove_resource("empty").is_none());
        assert_eq!(zone.serial(), 4);
        zone.insert_resource("api", Resource::new(10, Type::AAAA, Pipeline::default()));
        assert_eq!(zone.serial(), 5);
        assert!(zone.max_serial() >= zone.serial());
    }

    #[test]
    fn soa_truncates_serial() {
        let mut zone = example_zone();
        zone.serial = (1 << 32) + 7;
        let soa = zone.soa();
        assert_eq!(soa.serial, 7);
        assert_eq!(soa.mname, name("example.com."));
        assert_eq!(soa.rname, name("hostmaster.example.com."));
    }

    #[test]
    fn email_conversion() {
        let zone = name("example.com.");
        assert_eq!(
            email_to_rname("tj.example.org", &zone),
            Some(name("tj.example.org."))
        );
        assert_eq!(email_to_rname("", &zone), None);
        assert_eq!(email_to_rname("a.b@example.com", &zone), None);
    }
}
