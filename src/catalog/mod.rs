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

//! The zone directory.
//!
//! A [`Catalog`] knows which zones the server answers for, how each is
//! served (authoritatively or by forwarding), and owns the static
//! records of the authoritative ones. Finding the zone for a query
//! follows step 2 of [RFC 1034 § 4.3.2]: the served zone that is the
//! nearest ancestor of the query name wins. This lets one server host
//! both `example.com.` and `sub.example.com.` without delegations.
//!
//! Each zone has an asynchronous read/write lock. Lookups hold it for
//! reading, and [`Catalog::add`] and [`Catalog::delete`] hold it for
//! writing while they replace or remove the zone's records, so a query
//! sees either the old records or the new ones and never a zone that
//! is only partly stored.
//!
//! [RFC 1034 § 4.3.2]: https://datatracker.ietf.org/doc/html/rfc1034#section-4.3.2

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock as ZoneLock;

use crate::db::{self, RecordStore};
use crate::message::Question;
use crate::name::Name;
use crate::rr::{Rdata, Record, Type};

/// How a served zone is answered.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ZoneKind {
    /// Answered from local data.
    Master,

    /// Forwarded to the given upstream servers rather than the global
    /// forwarder list.
    Forward(Vec<SocketAddr>),
}

/// Directory metadata about a served zone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ZoneInfo {
    pub name: Name,
    pub kind: ZoneKind,
}

/// A static record as it appears in a zone snapshot or is produced by
/// the zone file parser.
///
/// The owner may be relative, `@`, or empty; RDATA is in presentation
/// format. Both are qualified against the zone name when added.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RecordInput {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub rr_type: Type,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    pub data: String,
}

/// A zone to be added to a [`Catalog`].
#[derive(Clone, Debug)]
pub struct ZoneInput {
    pub name: String,
    pub kind: ZoneKind,
    pub default_ttl: u32,
    pub records: Vec<RecordInput>,
}

/// The zone directory. See the [module documentation](self).
pub struct Catalog {
    zones: RwLock<HashMap<Name, Arc<ZoneInfo>>>,
    locks: Mutex<HashMap<Name, Arc<ZoneLock<()>>>>,
    store: Arc<dyn RecordStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            zones: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Returns the most specific served zone that `name` is equal to or
    /// a subdomain of.
    pub fn have(&self, name: &Name) -> Option<Arc<ZoneInfo>> {
        let zones = self.zones.read();
        let mut current = Some(name.clone());
        while let Some(candidate) = current {
            if let Some(info) = zones.get(&candidate) {
                return Some(info.clone());
            }
            current = candidate.parent();
        }
        None
    }

    /// Returns the lock guarding the records of `zone`.
    fn zone_lock(&self, zone: &Name) -> Arc<ZoneLock<()>> {
        self.locks.lock().entry(zone.clone()).or_default().clone()
    }

    /// Returns the names of all served zones.
    pub fn zone_names(&self) -> Vec<Name> {
        self.zones.read().keys().cloned().collect()
    }

    /// Adds (or replaces) a zone and stores its records, returning the
    /// zone's canonical name.
    ///
    /// Records that cannot be understood are logged and skipped; the
    /// rest of the zone still loads. Only backend failures are errors.
    pub async fn add(&self, input: ZoneInput) -> Result<Name, Error> {
        let apex = Name::qualify(&input.name, &Name::root())
            .map_err(|_| Error::InvalidZoneName(input.name.clone()))?;

        let lock = self.zone_lock(&apex);
        let _writing = lock.write().await;
        let replaced = self
            .zones
            .write()
            .insert(
                apex.clone(),
                Arc::new(ZoneInfo {
                    name: apex.clone(),
                    kind: input.kind,
                }),
            )
            .is_some();
        if replaced {
            self.store.delete(&apex, None).await?;
        }

        let mut stored = 0;
        for record in input.records {
            match qualify_record(&record, &apex, input.default_ttl) {
                Ok(record) => {
                    let owner = record.owner.clone();
                    self.store.set(&apex, &owner, record.rr_type(), record).await?;
                    stored += 1;
                }
                Err(err) => warn!(
                    "Skipping record {:?} {} {:?} in zone {}: {}",
                    record.name, record.rr_type, record.data, apex, err
                ),
            }
        }
        debug!("Added zone {apex} with {stored} records");
        Ok(apex)
    }

    /// Removes a zone and its records. Unknown zones are ignored.
    pub async fn delete(&self, name: &Name) -> Result<(), Error> {
        let lock = self.zone_lock(name);
        let _writing = lock.write().await;
        if self.zones.write().remove(name).is_some() {
            self.store.delete(name, None).await?;
            debug!("Deleted zone {name}");
        }
        Ok(())
    }

    /// Resolves `question` against the records of `zone`, with wildcard
    /// expansion and CNAME chasing (see [`db::lookup`]).
    pub async fn lookup(&self, question: &Question, zone: &Name) -> Result<Vec<Record>, Error> {
        let lock = self.zone_lock(zone);
        let _reading = lock.read().await;
        Ok(db::lookup(&*self.store, zone, &question.qname, question.qtype).await?)
    }
}

/// Turns a [`RecordInput`] into a [`Record`] owned within `apex`.
fn qualify_record(
    input: &RecordInput,
    apex: &Name,
    default_ttl: u32,
) -> Result<Record, Box<dyn std::error::Error + Send + Sync>> {
    let owner = Name::qualify(&input.name, apex)?;
    if !owner.eq_or_subdomain_of(apex) {
        return Err(format!("owner {owner} is outside the zone").into());
    }
    let rdata = Rdata::parse(input.rr_type, &input.data, apex)?;
    Ok(Record::new(owner, input.ttl.unwrap_or(default_ttl), rdata))
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a catalog operation failed.
#[derive(Debug)]
pub enum Error {
    InvalidZoneName(String),
    Store(db::Error),
}

impl From<db::Error> for Error {
    fn from(err: db::Error) -> Self {
        Self::Store(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::InvalidZoneName(name) => write!(f, "invalid zone name {name:?}"),
            Self::Store(_) => f.write_str("record store failure"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn record(owner: &str, rr_type: Type, data: &str) -> RecordInput {
        RecordInput {
            name: owner.into(),
            rr_type,
            ttl: None,
            data: data.into(),
        }
    }

    fn master(zone: &str, records: Vec<RecordInput>) -> ZoneInput {
        ZoneInput {
            name: zone.into(),
            kind: ZoneKind::Master,
            default_ttl: 300,
            records,
        }
    }

    fn catalog() -> Catalog {
        Catalog::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn have_finds_most_specific_zone() {
        let catalog = catalog();
        catalog.add(master("example.com", vec![])).await.unwrap();
        catalog.add(master("sub.example.com.", vec![])).await.unwrap();

        let info = catalog.have(&name("a.b.sub.example.com.")).unwrap();
        assert_eq!(info.name, name("sub.example.com."));
        let info = catalog.have(&name("www.Example.COM.")).unwrap();
        assert_eq!(info.name, name("example.com."));
        assert!(catalog.have(&name("example.net.")).is_none());
        assert!(catalog.have(&name("com.")).is_none());
    }

    #[tokio::test]
    async fn add_qualifies_owners() {
        let catalog = catalog();
        let zone = catalog
            .add(master(
                "Example.com",
                vec![
                    record("@", Type::A, "192.0.2.1"),
                    record("", Type::AAAA, "2001:db8::1"),
                    record("www", Type::CNAME, "@"),
                    record("mail.example.com.", Type::from(1), "192.0.2.25"),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(zone, name("example.com."));

        let apex = catalog
            .lookup(&Question::new(name("example.com."), Type::AAAA), &zone)
            .await
            .unwrap();
        assert_eq!(apex.len(), 1);

        let www = catalog
            .lookup(&Question::new(name("www.example.com."), Type::A), &zone)
            .await
            .unwrap();
        assert_eq!(www.len(), 2);
        assert_eq!(www[0].rr_type(), Type::CNAME);
        assert_eq!(www[1].owner, zone);

        let mail = catalog
            .lookup(&Question::new(name("mail.example.com."), Type::A), &zone)
            .await
            .unwrap();
        assert_eq!(mail[0].ttl, 300);
    }

    #[tokio::test]
    async fn bad_records_are_skipped() {
        let catalog = catalog();
        let zone = catalog
            .add(master(
                "example.com.",
                vec![
                    record("bad", Type::A, "not-an-address"),
                    record("outside.example.net.", Type::A, "192.0.2.1"),
                    record("good", Type::A, "192.0.2.2"),
                ],
            ))
            .await
            .unwrap();
        let good = catalog
            .lookup(&Question::new(name("good.example.com."), Type::A), &zone)
            .await
            .unwrap();
        assert_eq!(good.len(), 1);
        let bad = catalog
            .lookup(&Question::new(name("bad.example.com."), Type::A), &zone)
            .await
            .unwrap();
        assert!(bad.is_empty());
    }

    #[tokio::test]
    async fn re_adding_replaces_records() {
        let catalog = catalog();
        let zone = name("example.com.");
        catalog
            .add(master("example.com.", vec![record("old", Type::A, "192.0.2.1")]))
            .await
            .unwrap();
        catalog
            .add(master("example.com.", vec![record("new", Type::A, "192.0.2.2")]))
            .await
            .unwrap();
        let old = catalog
            .lookup(&Question::new(name("old.example.com."), Type::A), &zone)
            .await
            .unwrap();
        assert!(old.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn lookups_during_a_reload_see_a_whole_zone() {
        let catalog = Arc::new(catalog());
        let mut records = vec![record("www", Type::A, "192.0.2.80")];
        records.extend((0..500).map(|i| record(&format!("host{i}"), Type::A, "192.0.2.1")));
        let zone = catalog
            .add(master("example.com.", records.clone()))
            .await
            .unwrap();

        let reloader = {
            let catalog = catalog.clone();
            tokio::spawn(async move {
                for _ in 0..5 {
                    catalog
                        .add(master("example.com.", records.clone()))
                        .await
                        .unwrap();
                }
            })
        };

        let question = Question::new(name("www.example.com."), Type::A);
        loop {
            let finished = reloader.is_finished();
            let found = catalog.lookup(&question, &zone).await.unwrap();
            assert_eq!(found.len(), 1);
            if finished {
                break;
            }
        }
        reloader.await.unwrap();
    }

    #[tokio::test]
    async fn delete_is_a_no_op_for_unknown_zones() {
        let catalog = catalog();
        catalog.delete(&name("example.com.")).await.unwrap();
        catalog
            .add(master("example.com.", vec![record("www", Type::A, "192.0.2.1")]))
            .await
            .unwrap();
        catalog.delete(&name("example.com.")).await.unwrap();
        assert!(catalog.have(&name("www.example.com.")).is_none());
        assert!(catalog.zone_names().is_empty());
    }
}
