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

//! Replication of zones between peers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;

use super::{exchange_zones, Call, Error, PeerChannel, Propagation, Reply};
use crate::model::{Change, ZoneSet};
use crate::name::Name;

/// Identifies a change: its path, field, and timestamp.
type ChangeKey = (String, Option<String>, Option<String>, String, u64);

fn change_key(change: &Change) -> ChangeKey {
    (
        change.zone.clone(),
        change.resource.clone(),
        change.node.clone(),
        change.field.clone(),
        change.when,
    )
}

/// Keeps the local [`ZoneSet`] and the peers' in step.
///
/// Property changes reach the replicator through
/// [`propagate`](Self::propagate), which the owner calls for each
/// [`ZoneEvent::Property`](crate::model::ZoneEvent::Property). A change
/// that came from a peer is sent to every other peer but not back to
/// the one it came from.
pub struct Replicator {
    zones: Arc<ZoneSet>,
    peers: Vec<Arc<dyn PeerChannel>>,
    self_id: Option<String>,
    origins: Mutex<HashMap<ChangeKey, String>>,
}

impl Replicator {
    pub fn new(zones: Arc<ZoneSet>, peers: Vec<Arc<dyn PeerChannel>>) -> Self {
        Self {
            zones,
            peers,
            self_id: None,
            origins: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the ID we give in the `from` field of propagated changes.
    /// Peers match it against their own [`PeerChannel::id`]s.
    pub fn with_self_id(mut self, id: impl Into<String>) -> Self {
        self.self_id = Some(id.into());
        self
    }

    pub fn zones(&self) -> &Arc<ZoneSet> {
        &self.zones
    }

    pub fn peers(&self) -> &[Arc<dyn PeerChannel>] {
        &self.peers
    }

    /// Applies a change received from a peer, last-write-wins. Returns
    /// whether it was applied.
    pub fn receive_change(&self, propagation: Propagation) -> Result<bool, Error> {
        let key = change_key(&propagation.change);
        if let Some(from) = propagation.from {
            // Recorded before applying, since applying emits the event
            // that leads to propagate.
            self.origins.lock().insert(key.clone(), from);
        }
        let result = self.zones.apply_remote(propagation.change);
        if !matches!(result, Ok(true)) {
            self.origins.lock().remove(&key);
        }
        Ok(result?)
    }

    /// Sends a change to every peer except the one it came from.
    /// Failures are logged; the periodic zone exchange repairs peers
    /// that missed a change.
    pub async fn propagate(&self, change: &Change) {
        let origin = self.origins.lock().remove(&change_key(change));
        for peer in &self.peers {
            if origin.as_deref() == Some(peer.id()) {
                continue;
            }
            let call = Call::set_property(change.clone(), self.self_id.clone());
            match peer.call(call).await {
                Ok(Reply::Applied(applied)) => {
                    debug!(
                        "Peer {} {} change to {} of {}",
                        peer.id(),
                        if applied { "applied" } else { "ignored" },
                        change.field,
                        change.zone
                    );
                }
                Ok(other) => warn!("Peer {} sent an unexpected {} reply", peer.id(), other.kind()),
                Err(err) => warn!("Failed to propagate change to peer {}: {err}", peer.id()),
            }
        }
    }

    /// Sends our zones to `peer` and folds in the zones it sends back.
    /// Returns the names of the zones that were adopted or replaced.
    pub async fn exchange_with(&self, peer: &dyn PeerChannel) -> Result<Vec<Name>, Error> {
        let zones = exchange_zones(self.zones.snapshots());
        match peer.call(Call::ZoneExchange { zones }).await? {
            Reply::Zones(theirs) => Ok(self.zones.receive_zones(theirs)),
            other => Err(Error::Protocol(format!(
                "unexpected {} reply to zone_exchange",
                other.kind()
            ))),
        }
    }

    /// Runs [`exchange_with`](Self::exchange_with) for every peer,
    /// logging the outcome.
    pub async fn exchange_all(&self) {
        for peer in &self.peers {
            match self.exchange_with(peer.as_ref()).await {
                Ok(replaced) if replaced.is_empty() => {
                    debug!("Zone exchange with {}: nothing new", peer.id())
                }
                Ok(replaced) => info!(
                    "Zone exchange with {}: took {} zone(s)",
                    peer.id(),
                    replaced.len()
                ),
                Err(err) => warn!("Zone exchange with {} failed: {err}", peer.id()),
            }
        }
    }

    /// Starts exchanging zones with every peer: once now, then
    /// repeatedly at intervals of roughly `interval`. The intervals are
    /// jittered so that peers started together do not stay in lockstep.
    /// The task stops when the returned [`ExchangeTask`] is dropped.
    pub fn start(self: &Arc<Self>, interval: Duration) -> ExchangeTask {
        let replicator = self.clone();
        ExchangeTask(tokio::spawn(async move {
            loop {
                replicator.exchange_all().await;
                tokio::time::sleep(jittered(interval)).await;
            }
        }))
    }
}

/// Scales `interval` by a random factor between 0.5 and 1.5.
fn jittered(interval: Duration) -> Duration {
    interval.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
}

/// The handle of a running zone exchange task.
pub struct ExchangeTask(JoinHandle<()>);

impl ExchangeTask {
    pub fn stop(self) {}
}

impl Drop for ExchangeTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ZoneEvent, ZoneSnapshot};
    use crate::util::ManualClock;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// A peer that records calls and answers from a fixed zone list.
    struct MockPeer {
        id: String,
        zones: Vec<ZoneSnapshot>,
        calls: Mutex<Vec<Call>>,
    }

    impl MockPeer {
        fn new(id: &str, zones: Vec<ZoneSnapshot>) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                zones,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl PeerChannel for MockPeer {
        fn id(&self) -> &str {
            &self.id
        }

        async fn call(&self, call: Call) -> Result<Reply, Error> {
            self.calls.lock().push(call.clone());
            match call {
                Call::ZoneExchange { .. } => {
                    Ok(Reply::Zones(exchange_zones(self.zones.clone())))
                }
                Call::Validate { time } => Ok(Reply::Validated { time }),
                _ => Ok(Reply::Applied(true)),
            }
        }
    }

    fn snapshot(serial: u64, nodes: &[&str]) -> ZoneSnapshot {
        let nodes: serde_json::Map<String, serde_json::Value> = nodes
            .iter()
            .map(|n| (n.to_string(), json!({ "ips": ["10.0.0.1"], "load": 1 })))
            .collect();
        serde_json::from_value(json!({
            "name": "example.com.",
            "email": "hostmaster@example.com",
            "ttl": 300,
            "serial": serial,
            "resources": {
                "lb": { "ttl": 30, "type": "A", "handler": "LeastLoad(1)", "nodes": nodes }
            }
        }))
        .unwrap()
    }

    fn zone_set(serial: u64) -> (Arc<ZoneSet>, mpsc::UnboundedReceiver<ZoneEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let zones = ZoneSet::new(Arc::new(ManualClock::new(5000))).with_events(sender);
        zones.load_snapshot(snapshot(serial, &["n1", "n2"])).unwrap();
        (Arc::new(zones), receiver)
    }

    fn node_names(zones: &ZoneSet) -> Vec<String> {
        let zone: Name = "example.com.".parse().unwrap();
        zones
            .with_zone(&zone, |z| {
                z.resource("lb")
                    .map(|r| r.nodes().map(|(n, _)| n.to_owned()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn load_change(when: u64, load: u64) -> Change {
        Change {
            zone: "example.com.".into(),
            resource: Some("lb".into()),
            node: Some("n1".into()),
            field: "load".into(),
            when,
            value: json!(load),
        }
    }

    #[tokio::test]
    async fn newer_peer_zones_replace_ours_wholesale() {
        let (zones, _events) = zone_set(5);
        let peer = MockPeer::new("b", vec![snapshot(9, &["n1"])]);
        let replicator = Replicator::new(zones.clone(), vec![peer.clone()]);

        let replaced = replicator.exchange_with(peer.as_ref()).await.unwrap();
        assert_eq!(replaced.len(), 1);
        assert_eq!(node_names(&zones), ["n1"]);
        match &peer.calls()[0] {
            Call::ZoneExchange { zones } => {
                assert_eq!(zones[0].valid().unwrap().serial, Some(5))
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn older_peer_zones_are_ignored() {
        let (zones, _events) = zone_set(5);
        let peer = MockPeer::new("b", vec![snapshot(3, &["n1"])]);
        let replicator = Replicator::new(zones.clone(), vec![peer.clone()]);
        assert!(replicator.exchange_with(peer.as_ref()).await.unwrap().is_empty());
        assert_eq!(node_names(&zones), ["n1", "n2"]);
    }

    #[tokio::test]
    async fn remote_changes_are_not_echoed_to_their_origin() {
        let (zones, mut events) = zone_set(5);
        let a = MockPeer::new("a", Vec::new());
        let b = MockPeer::new("b", Vec::new());
        let replicator =
            Replicator::new(zones, vec![a.clone(), b.clone()]).with_self_id("self");

        let applied = replicator
            .receive_change(Propagation {
                from: Some("a".into()),
                change: load_change(6000, 8),
            })
            .unwrap();
        assert!(applied);

        let change = match events.recv().await {
            Some(ZoneEvent::Property(change)) => change,
            other => panic!("unexpected event {other:?}"),
        };
        replicator.propagate(&change).await;
        assert!(a.calls().is_empty());
        match &b.calls()[..] {
            [Call::NodeSetProperty(p)] => {
                assert_eq!(p.from.as_deref(), Some("self"));
                assert_eq!(p.change, change);
            }
            other => panic!("unexpected calls {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_remote_changes_lose() {
        let (zones, _events) = zone_set(5);
        let replicator = Replicator::new(zones, Vec::new());
        let newer = Propagation {
            from: Some("a".into()),
            change: load_change(6000, 8),
        };
        let older = Propagation {
            from: Some("a".into()),
            change: load_change(5500, 9),
        };
        assert!(replicator.receive_change(newer).unwrap());
        assert!(!replicator.receive_change(older).unwrap());
        assert!(replicator.origins.lock().len() <= 1);
    }

    #[tokio::test]
    async fn unknown_zones_are_errors() {
        let (zones, _events) = zone_set(5);
        let replicator = Replicator::new(zones, Vec::new());
        let mut change = load_change(6000, 8);
        change.zone = "example.net.".into();
        let result = replicator.receive_change(Propagation { from: None, change });
        assert!(matches!(result, Err(Error::Model(_))));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let d = jittered(Duration::from_secs(10));
            assert!(d >= Duration::from_secs(5) && d <= Duration::from_secs(15));
        }
    }
}
