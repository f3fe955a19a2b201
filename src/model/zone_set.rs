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

//! The [`ZoneSet`] registry and zone replication.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use super::{
    Change, Checked, Error, Origin, Selection, Soa, ValidationError, Zone, ZoneSnapshot,
};
use crate::name::Name;
use crate::rr::Type;
use crate::util::Clock;

/// A notification about a change to the zone set, consumed by
/// persistence and by peer fan-out.
#[derive(Clone, Debug, PartialEq)]
pub enum ZoneEvent {
    /// A propagating property was written, locally or by a peer.
    Property(Change),

    /// A zone's serial changed.
    SerialChanged { zone: Name, old: u64, new: u64 },

    /// A zone was adopted from, or wholesale replaced by, a peer's
    /// snapshot.
    Replaced(Name),
}

/// The registry of authoritative zone entities.
///
/// All access is through short critical sections on an internal lock;
/// nothing is held across a suspension point.
pub struct ZoneSet {
    zones: RwLock<HashMap<Name, Zone>>,
    clock: Arc<dyn Clock>,
    events: Option<UnboundedSender<ZoneEvent>>,
    deep_compare: bool,
}

impl ZoneSet {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            zones: RwLock::new(HashMap::new()),
            clock,
            events: None,
            deep_compare: false,
        }
    }

    /// Sends [`ZoneEvent`]s to `events`.
    pub fn with_events(mut self, events: UnboundedSender<ZoneEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// When enabled, [`receive_zones`](Self::receive_zones) compares
    /// the highest serial found anywhere in each zone rather than only
    /// the zone serial.
    pub fn with_deep_compare(mut self, deep_compare: bool) -> Self {
        self.deep_compare = deep_compare;
        self
    }

    /// Adds or replaces a zone without emitting events.
    pub fn insert(&self, zone: Zone) -> Option<Zone> {
        self.zones.write().insert(zone.name().clone(), zone)
    }

    /// Validates and inserts a snapshot, logging any resources or nodes
    /// that had to be skipped.
    pub fn load_snapshot(&self, snapshot: ZoneSnapshot) -> Result<Name, ValidationError> {
        let (zone, issues) = Zone::from_snapshot(snapshot)?;
        for issue in issues {
            warn!("Skipping {issue}");
        }
        let name = zone.name().clone();
        self.insert(zone);
        Ok(name)
    }

    pub fn remove(&self, name: &Name) -> Option<Zone> {
        self.zones.write().remove(name)
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.zones.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<Name> {
        self.zones.read().keys().cloned().collect()
    }

    /// Runs `f` on the named zone.
    pub fn with_zone<R>(&self, name: &Name, f: impl FnOnce(&Zone) -> R) -> Option<R> {
        self.zones.read().get(name).map(f)
    }

    pub fn snapshot(&self, name: &Name) -> Option<ZoneSnapshot> {
        self.with_zone(name, Zone::to_snapshot)
    }

    /// Returns snapshots of every zone, as sent to peers.
    pub fn snapshots(&self) -> Vec<ZoneSnapshot> {
        self.zones.read().values().map(Zone::to_snapshot).collect()
    }

    /// Folds in zones received from a peer and returns the names of the
    /// zones that were adopted or replaced.
    ///
    /// Unknown zones are adopted. A known zone is replaced wholesale
    /// when the peer's serial is strictly greater than ours; otherwise
    /// the peer's copy is discarded. There is never a partial merge.
    /// A malformed zone in the batch is skipped on its own.
    pub fn receive_zones<S>(&self, peer_zones: Vec<S>) -> Vec<Name>
    where
        S: Into<Checked<ZoneSnapshot>>,
    {
        let mut events = Vec::new();
        let mut replaced = Vec::new();
        {
            let mut zones = self.zones.write();
            for snapshot in peer_zones {
                let snapshot: Checked<ZoneSnapshot> = snapshot.into();
                let description = snapshot.describe();
                let zone = match snapshot
                    .into_result(&description)
                    .and_then(Zone::from_snapshot)
                {
                    Ok((zone, issues)) => {
                        for issue in issues {
                            warn!("Skipping peer entity {issue}");
                        }
                        zone
                    }
                    Err(err) => {
                        warn!("Ignoring invalid zone from peer: {err}");
                        continue;
                    }
                };

                let name = zone.name().clone();
                let old = match zones.get(&name) {
                    None => {
                        info!("Adopting zone {name} from peer (serial {})", zone.serial());
                        0
                    }
                    Some(local) if self.freshness(&zone) > self.freshness(local) => {
                        info!(
                            "Replacing zone {name}: peer serial {} is newer than {}",
                            zone.serial(),
                            local.serial()
                        );
                        local.serial()
                    }
                    Some(local) => {
                        debug!(
                            "Keeping zone {name}: peer serial {} is not newer than {}",
                            zone.serial(),
                            local.serial()
                        );
                        continue;
                    }
                };

                events.push(ZoneEvent::Replaced(name.clone()));
                events.push(ZoneEvent::SerialChanged {
                    zone: name.clone(),
                    old,
                    new: zone.serial(),
                });
                zones.insert(name.clone(), zone);
                replaced.push(name);
            }
        }

        for event in events {
            self.emit(event);
        }
        replaced
    }

    fn freshness(&self, zone: &Zone) -> u64 {
        if self.deep_compare {
            zone.max_serial()
        } else {
            zone.serial()
        }
    }

    /// Writes a property locally, stamped with the current time.
    /// Returns whether the value changed.
    pub fn set_property(
        &self,
        zone: &Name,
        resource: Option<&str>,
        node: Option<&str>,
        field: &str,
        value: Value,
    ) -> Result<bool, Error> {
        let when = self.clock.now_millis();
        let change = Change {
            zone: zone.to_string(),
            resource: resource.map(str::to_owned),
            node: node.map(str::to_owned),
            field: field.to_owned(),
            when,
            value,
        };
        self.apply(zone, change, Origin::Local)
    }

    /// Applies a property change propagated by a peer. The change wins
    /// only if it is newer than the field's last write and carries a
    /// different value; a winning change is propagated onward.
    pub fn apply_remote(&self, change: Change) -> Result<bool, Error> {
        let zone: Name = change
            .zone
            .parse()
            .map_err(|_| Error::UnknownZone(change.zone.clone()))?;
        self.apply(&zone, change, Origin::Remote)
    }

    fn apply(&self, zone_name: &Name, change: Change, origin: Origin) -> Result<bool, Error> {
        let (spec, old, new) = {
            let mut zones = self.zones.write();
            let zone = zones
                .get_mut(zone_name)
                .ok_or_else(|| Error::UnknownZone(change.zone.clone()))?;
            let old = zone.serial();
            let spec = zone.set_property(
                change.resource.as_deref(),
                change.node.as_deref(),
                &change.field,
                &change.value,
                change.when,
                origin,
            )?;
            (spec, old, zone.serial())
        };

        let spec = match spec {
            Some(spec) => spec,
            None => return Ok(false),
        };
        debug!(
            "Set {} of {}/{}/{} to {}",
            change.field,
            change.zone,
            change.resource.as_deref().unwrap_or("-"),
            change.node.as_deref().unwrap_or("-"),
            change.value
        );
        if new != old {
            self.emit(ZoneEvent::SerialChanged {
                zone: zone_name.clone(),
                old,
                new,
            });
        }
        if spec.propagates {
            self.emit(ZoneEvent::Property(change));
        }
        Ok(true)
    }

    /// Runs node selection for a query against the named zone (see
    /// [`Zone::select_nodes`]).
    pub fn select_nodes(&self, zone: &Name, qname: &Name, qtype: Type) -> Option<Selection> {
        let now = self.clock.now_millis();
        self.zones.write().get_mut(zone)?.select_nodes(qname, qtype, now)
    }

    pub fn has_resource(&self, zone: &Name, qname: &Name, qtype: Type) -> bool {
        self.with_zone(zone, |z| z.has_resource(qname, qtype))
            .unwrap_or(false)
    }

    pub fn soa(&self, zone: &Name) -> Option<Soa> {
        self.with_zone(zone, Zone::soa)
    }

    fn emit(&self, event: ZoneEvent) {
        if let Some(ref events) = self.events {
            if events.send(event).is_err() {
                debug!("Zone event receiver is gone; dropping event");
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ManualClock;
    use serde_json::json;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn snapshot(serial: u64, resources: &[&str]) -> ZoneSnapshot {
        let resources: serde_json::Map<String, Value> = resources
            .iter()
            .map(|r| {
                (
                    r.to_string(),
                    json!({
                        "ttl": 60,
                        "handler": "LeastLoad(3)",
                        "nodes": { "n1": { "ips": ["192.0.2.1"] } }
                    }),
                )
            })
            .collect();
        serde_json::from_value(json!({
            "name": "example.com.",
            "email": "hostmaster@example.com",
            "ttl": 300,
            "serial": serial,
            "resources": resources,
        }))
        .unwrap()
    }

    fn zone_set() -> (ZoneSet, Arc<ManualClock>, UnboundedReceiver<ZoneEvent>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let (tx, rx) = unbounded_channel();
        let set = ZoneSet::new(clock.clone()).with_events(tx);
        (set, clock, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ZoneEvent>) -> Vec<ZoneEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn unknown_zones_are_adopted() {
        let (set, _, mut rx) = zone_set();
        let adopted = set.receive_zones(vec![snapshot(4, &["www"])]);
        assert_eq!(adopted, [name("example.com.")]);
        assert_eq!(
            drain(&mut rx),
            [
                ZoneEvent::Replaced(name("example.com.")),
                ZoneEvent::SerialChanged {
                    zone: name("example.com."),
                    old: 0,
                    new: 4
                },
            ]
        );
    }

    #[test]
    fn older_or_equal_peer_serials_are_ignored() {
        let (set, _, mut rx) = zone_set();
        set.load_snapshot(snapshot(5, &["www", "api"])).unwrap();
        assert!(set.receive_zones(vec![snapshot(3, &["www"])]).is_empty());
        assert!(set.receive_zones(vec![snapshot(5, &["www"])]).is_empty());
        let zone = name("example.com.");
        assert_eq!(set.with_zone(&zone, |z| z.resources().count()), Some(2));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn newer_peer_serial_replaces_wholesale() {
        let (set, _, _rx) = zone_set();
        set.load_snapshot(snapshot(5, &["www", "api"])).unwrap();
        assert_eq!(set.receive_zones(vec![snapshot(6, &["www"])]).len(), 1);
        let zone = name("example.com.");
        assert_eq!(set.with_zone(&zone, Zone::serial), Some(6));
        assert!(set.with_zone(&zone, |z| z.resource("api").is_none()).unwrap());
    }

    #[test]
    fn malformed_entities_do_not_sink_the_batch() {
        let (set, _, _rx) = zone_set();
        let batch: Vec<Checked<ZoneSnapshot>> = serde_json::from_value(json!([
            {
                "name": "good.test.",
                "email": "hostmaster@good.test",
                "ttl": 300,
                "serial": 2,
                "resources": {
                    "www": {
                        "ttl": 60,
                        "handler": "LeastLoad(3)",
                        "nodes": {
                            "n1": { "ips": ["192.0.2.1"] },
                            "n2": { "ips": ["192.0.2.2"], "load": "high" }
                        }
                    }
                }
            },
            { "name": "bad.test.", "email": "hostmaster@bad.test", "ttl": "300" },
        ]))
        .unwrap();
        assert!(batch[0].valid().is_some());
        assert!(batch[1].valid().is_none());
        assert_eq!(batch[1].describe(), "bad.test.");

        assert_eq!(set.receive_zones(batch), [name("good.test.")]);
        let nodes = set.with_zone(&name("good.test."), |z| {
            z.resource("www").map(|r| r.nodes().count())
        });
        assert_eq!(nodes, Some(Some(1)));
        assert!(!set.contains(&name("bad.test.")));
    }

    #[test]
    fn deep_compare_looks_inside_zones() {
        let clock = Arc::new(ManualClock::new(0));
        let set = ZoneSet::new(clock).with_deep_compare(true);
        set.load_snapshot(snapshot(5, &["www"])).unwrap();
        let mut peer = snapshot(5, &["www", "api"]);
        if let Some(Checked::Valid(api)) = peer.resources.get_mut("api") {
            api.serial = Some(9);
        }
        assert_eq!(set.receive_zones(vec![peer]).len(), 1);
    }

    #[test]
    fn local_writes_bump_serial_and_propagate() {
        let (set, clock, mut rx) = zone_set();
        let zone = name("example.com.");
        set.load_snapshot(snapshot(1, &["www"])).unwrap();
        clock.set(5_000);

        for load in [5.0, 10.0] {
            let before = set.with_zone(&zone, Zone::serial).unwrap();
            assert!(set
                .set_property(&zone, Some("www"), Some("n1"), "load", json!(load))
                .unwrap());
            assert!(set.with_zone(&zone, Zone::serial).unwrap() > before);
        }

        let events = drain(&mut rx);
        assert_eq!(events.len(), 4);
        assert!(matches!(
            &events[1],
            ZoneEvent::Property(Change { field, when: 5_000, .. }) if field == "load"
        ));
    }

    #[test]
    fn remote_changes_are_last_write_wins() {
        let (set, _, mut rx) = zone_set();
        let zone = name("example.com.");
        set.load_snapshot(snapshot(1, &["www"])).unwrap();

        let change = |when, load: f64| Change {
            zone: "example.com.".into(),
            resource: Some("www".into()),
            node: Some("n1".into()),
            field: "load".into(),
            when,
            value: json!(load),
        };
        assert!(set.apply_remote(change(200, 3.0)).unwrap());
        assert!(!set.apply_remote(change(100, 8.0)).unwrap());
        assert!(!set.apply_remote(change(300, 3.0)).unwrap());
        assert_eq!(set.with_zone(&zone, Zone::serial), Some(1));

        let events = drain(&mut rx);
        assert_eq!(events, [ZoneEvent::Property(change(200, 3.0))]);
        assert!(matches!(
            set.apply_remote(Change {
                zone: "example.net.".into(),
                ..change(1, 1.0)
            }),
            Err(Error::UnknownZone(_))
        ));
    }

    #[test]
    fn selection_goes_through_the_clock() {
        let (set, clock, _rx) = zone_set();
        let zone = name("example.com.");
        set.load_snapshot(snapshot(1, &["www"])).unwrap();
        clock.set(42);
        let selection = set
            .select_nodes(&zone, &name("www.example.com."), Type::A)
            .unwrap();
        assert_eq!(selection.nodes, ["n1"]);
        let last_used = set.with_zone(&zone, |z| {
            use crate::policy::Candidate;
            z.resource("www").unwrap().node("n1").unwrap().last_used()
        });
        assert_eq!(last_used, Some(Some(42)));
        assert_eq!(set.soa(&zone).unwrap().serial, 1);
    }
}
