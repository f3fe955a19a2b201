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

//! The response cache for recursively resolved answers.
//!
//! Answers from upstream forwarders are stored per owner name in a
//! [`RecordStore`] under the root pseudo-zone, with every record
//! stamped with an absolute expiry time. An [`LruIndex`] bounds the
//! number of distinct names: whenever there are more than the
//! configured maximum, the least recently used names are evicted.
//! Authoritative data never goes through here.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::db::{self, RecordStore};
use crate::message::{Question, Response};
use crate::name::Name;
use crate::rr::Record;
use crate::util::Clock;

mod lru;
pub use lru::LruIndex;

/// The default maximum number of distinct cached names.
pub const DEFAULT_MAX_KEYS: usize = 1000;

/// The default period of the garbage collection task.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60);

/// A TTL-expiring, LRU-bounded cache of upstream answers.
pub struct ResponseCache {
    store: Arc<dyn RecordStore>,
    zone: Name,
    max_keys: usize,
    lru: Mutex<LruIndex>,
    in_gc: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, max_keys: usize) -> Self {
        Self {
            store,
            zone: Name::root(),
            max_keys,
            lru: Mutex::new(LruIndex::new()),
            in_gc: AtomicBool::new(false),
            clock,
        }
    }

    /// Returns the number of distinct names currently cached.
    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.lock().is_empty()
    }

    /// Caches every record of an upstream response.
    ///
    /// Records are grouped by owner name, and each group replaces
    /// whatever was cached for that name before. If this pushes the
    /// cache over capacity, a collection runs before returning.
    pub async fn store(&self, response: &Response) -> Result<(), db::Error> {
        let now = self.clock.now_millis();
        let mut groups: BTreeMap<Name, Vec<Record>> = BTreeMap::new();
        for record in response.records() {
            let mut record = record.clone();
            record.expires = Some(now + u64::from(record.ttl) * 1000);
            groups.entry(record.owner.clone()).or_default().push(record);
        }

        for (name, records) in groups {
            self.lru.lock().touch(&name, now);
            self.store.delete(&self.zone, Some(&name)).await?;
            debug!("cache store {name}: {} records", records.len());
            for record in records {
                self.store.set(&self.zone, &name, record.rr_type(), record).await?;
            }
        }

        if self.len() > self.max_keys {
            self.gc().await?;
        }
        Ok(())
    }

    /// Looks `question` up in the cache.
    ///
    /// If any record in the result has expired, the whole result is
    /// treated as a miss and every name with an expired record is
    /// purged. Otherwise, the names involved become most recently used.
    pub async fn lookup(&self, question: &Question) -> Result<Option<Vec<Record>>, db::Error> {
        let records = db::lookup(&*self.store, &self.zone, &question.qname, question.qtype).await?;
        if records.is_empty() {
            debug!("cache miss {question}");
            return Ok(None);
        }

        let now = self.clock.now_millis();
        let mut purge = Vec::new();
        {
            let mut lru = self.lru.lock();
            for record in &records {
                if record.is_expired(now) {
                    if !purge.contains(&record.owner) {
                        purge.push(record.owner.clone());
                    }
                } else {
                    lru.touch(&record.owner, now);
                }
            }
            for name in &purge {
                lru.remove(name);
            }
        }

        if purge.is_empty() {
            debug!("cache hit {question}");
            Ok(Some(records))
        } else {
            debug!("cache purging expired names {purge:?}");
            for name in &purge {
                self.store.delete(&self.zone, Some(name)).await?;
            }
            Ok(None)
        }
    }

    /// Evicts least recently used names until the cache is within
    /// capacity, returning how many were evicted.
    ///
    /// Deletions are made one at a time. If a collection is already
    /// running, this returns immediately.
    pub async fn gc(&self) -> Result<usize, db::Error> {
        if self.in_gc.swap(true, Ordering::AcqRel) {
            debug!("cache gc already running");
            return Ok(0);
        }
        let _guard = GcGuard(&self.in_gc);
        debug!("cache gc started");

        let evicted: Vec<Name> = {
            let mut lru = self.lru.lock();
            let mut evicted = Vec::new();
            while lru.len() > self.max_keys {
                match lru.pop_oldest() {
                    Some(name) => evicted.push(name),
                    None => break,
                }
            }
            evicted
        };

        for name in &evicted {
            debug!("cache delete {name}");
            self.store.delete(&self.zone, Some(name)).await?;
        }
        debug!("cache gc done");
        Ok(evicted.len())
    }

    /// Starts periodic garbage collection. The task stops when the
    /// returned [`GcTask`] is dropped.
    pub fn start(self: &Arc<Self>, period: Duration) -> GcTask {
        let cache = self.clone();
        GcTask(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if let Err(err) = cache.gc().await {
                    warn!("Cache garbage collection failed: {err}");
                }
            }
        }))
    }
}

/// Clears the re-entrancy flag when a collection ends, however it ends.
struct GcGuard<'a>(&'a AtomicBool);

impl Drop for GcGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The handle of a running garbage collection task.
pub struct GcTask(JoinHandle<()>);

impl GcTask {
    pub fn stop(self) {}
}

impl Drop for GcTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
