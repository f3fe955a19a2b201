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

//! Provides the [`MemoryStore`] record store.

use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;

use super::{Error, RecordStore};
use crate::name::Name;
use crate::rr::{Record, Type};

type Names = HashMap<Name, HashMap<Type, Vec<Record>>>;

/// A [`RecordStore`] that keeps records in nested hash maps.
///
/// Each operation first yields to the scheduler, so that completion is
/// always deferred the way it would be for a remote backend. The lock
/// is never held across a suspension point.
#[derive(Debug, Default)]
pub struct MemoryStore {
    zones: Mutex<HashMap<Name, Names>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of distinct owner names stored for `zone`.
    pub fn name_count(&self, zone: &Name) -> usize {
        self.zones.lock().get(zone).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(
        &self,
        zone: &Name,
        name: &Name,
        rr_type: Type,
    ) -> Result<Option<Vec<Record>>, Error> {
        tokio::task::yield_now().await;
        let records = self
            .zones
            .lock()
            .get(zone)
            .and_then(|names| names.get(name))
            .and_then(|types| types.get(&rr_type))
            .cloned();
        debug!(
            "store get {zone} {name} {rr_type}: {}",
            records.as_ref().map_or(0, Vec::len)
        );
        Ok(records)
    }

    async fn set(
        &self,
        zone: &Name,
        name: &Name,
        rr_type: Type,
        record: Record,
    ) -> Result<(), Error> {
        tokio::task::yield_now().await;
        debug!("store set {zone} {name} {rr_type}");
        self.zones
            .lock()
            .entry(zone.clone())
            .or_default()
            .entry(name.clone())
            .or_default()
            .entry(rr_type)
            .or_default()
            .push(record);
        Ok(())
    }

    async fn delete(&self, zone: &Name, name: Option<&Name>) -> Result<(), Error> {
        tokio::task::yield_now().await;
        let mut zones = self.zones.lock();
        match name {
            Some(name) => {
                debug!("store delete {zone} {name}");
                if let Some(names) = zones.get_mut(zone) {
                    names.remove(name);
                }
            }
            None => {
                debug!("store delete {zone}");
                zones.remove(zone);
            }
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::Rdata;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn record(owner: &str, last_octet: u8) -> Record {
        Record::new(
            name(owner),
            60,
            Rdata::A([192, 0, 2, last_octet].into()),
        )
    }

    #[tokio::test]
    async fn set_appends_and_get_is_caseless() {
        let store = MemoryStore::new();
        let zone = name("example.com.");
        let www = name("www.example.com.");
        store.set(&zone, &www, Type::A, record("www.example.com.", 1)).await.unwrap();
        store.set(&zone, &www, Type::A, record("www.example.com.", 2)).await.unwrap();

        let records = store
            .get(&zone, &name("WWW.Example.COM."), Type::A)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(store.get(&zone, &www, Type::AAAA).await.unwrap().is_none());
        assert!(store.get(&name("other."), &www, Type::A).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_name_or_zone() {
        let store = MemoryStore::new();
        let zone = name("example.com.");
        let www = name("www.example.com.");
        let mail = name("mail.example.com.");
        store.set(&zone, &www, Type::A, record("www.example.com.", 1)).await.unwrap();
        store.set(&zone, &mail, Type::A, record("mail.example.com.", 2)).await.unwrap();
        assert_eq!(store.name_count(&zone), 2);

        store.delete(&zone, Some(&www)).await.unwrap();
        assert!(store.get(&zone, &www, Type::A).await.unwrap().is_none());
        assert_eq!(store.name_count(&zone), 1);

        store.delete(&zone, None).await.unwrap();
        assert_eq!(store.name_count(&zone), 0);
        store.delete(&zone, None).await.unwrap();
    }
}
