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

//! Facilities for storing and accessing DNS records.
//!
//! Records live in a [`RecordStore`], keyed by zone, owner name, and
//! type. The store is deliberately dumb: it knows nothing about
//! wildcards, CNAMEs, or zone cuts. All of that is done by [`lookup`],
//! which runs the resolution algorithm against any store. This lets the
//! authoritative [`Catalog`](crate::catalog::Catalog) and the
//! [`ResponseCache`](crate::cache::ResponseCache) share both the
//! algorithm and the storage backend.
//!
//! The store contract is asynchronous so that a backend may live in
//! another process. The provided [`MemoryStore`] keeps everything in
//! memory and never fails, but still yields to the scheduler on every
//! operation so that callers behave the same against either kind of
//! backend.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use log::debug;

use crate::name::Name;
use crate::rr::{Record, Type};

mod memory;
pub use memory::MemoryStore;

/// The longest CNAME chain that [`lookup`] will follow.
const MAX_CNAME_CHAIN: usize = 16;

////////////////////////////////////////////////////////////////////////
// RECORD STORES                                                      //
////////////////////////////////////////////////////////////////////////

/// Trait for record storage backends.
///
/// Keys are [`Name`]s, which are canonical, so comparisons are
/// case-insensitive.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns the record set for a (zone, name, type) triple, or
    /// [`None`] if there is none.
    async fn get(
        &self,
        zone: &Name,
        name: &Name,
        rr_type: Type,
    ) -> Result<Option<Vec<Record>>, Error>;

    /// Appends `record` to the record set for a (zone, name, type)
    /// triple, creating whatever containers are needed.
    async fn set(
        &self,
        zone: &Name,
        name: &Name,
        rr_type: Type,
        record: Record,
    ) -> Result<(), Error>;

    /// Removes every record of `zone`, or only those owned by `name`
    /// when it is given.
    async fn delete(&self, zone: &Name, name: Option<&Name>) -> Result<(), Error>;
}

/// An error reported by a [`RecordStore`] backend.
#[derive(Debug)]
pub struct Error {
    message: String,
}

impl Error {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "record store failure: {}", self.message)
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// LOOKUP ALGORITHM                                                   //
////////////////////////////////////////////////////////////////////////

/// Resolves `qname`/`qtype` against the records of `zone`.
///
/// At each name the exact owner is tried first, then `*.<ancestor>`
/// for each ancestor from the immediate parent up to and including the
/// zone apex. Records matched through a wildcard are returned with
/// their owner rewritten to the name being resolved. When only a CNAME
/// exists, it is added to the result and resolution restarts at its
/// target, provided the target is inside `zone`. The returned sequence
/// is in traversal order and is empty when nothing matched.
pub async fn lookup(
    store: &dyn RecordStore,
    zone: &Name,
    qname: &Name,
    qtype: Type,
) -> Result<Vec<Record>, Error> {
    let mut result = Vec::new();
    let mut visited = HashSet::new();
    let mut current = qname.clone();

    loop {
        if visited.len() >= MAX_CNAME_CHAIN || !visited.insert(current.clone()) {
            debug!("CNAME chain from {qname} loops or is too long; stopping at {current}");
            break;
        }

        match find(store, zone, &current, qtype).await? {
            Found::Records(records) => {
                result.extend(records);
                break;
            }
            Found::Cname(records) => {
                let target = records
                    .first()
                    .and_then(|r| r.rdata.cname_target())
                    .cloned();
                result.extend(records);
                match target {
                    Some(target) if target.eq_or_subdomain_of(zone) => current = target,
                    _ => break,
                }
            }
            Found::Nothing => break,
        }
    }

    Ok(result)
}

enum Found {
    Records(Vec<Record>),
    Cname(Vec<Record>),
    Nothing,
}

/// Performs one step of [`lookup`]: finds records of `qtype` (or
/// failing that, a CNAME) for `name`, directly or through a wildcard.
async fn find(
    store: &dyn RecordStore,
    zone: &Name,
    name: &Name,
    qtype: Type,
) -> Result<Found, Error> {
    let mut candidates = vec![name.clone()];
    let mut ancestor = name.parent();
    while let Some(current) = ancestor {
        if !current.eq_or_subdomain_of(zone) {
            break;
        }
        candidates.push(current.wildcard_child());
        ancestor = current.parent();
    }

    for candidate in candidates {
        let rewrite = candidate != *name;
        if let Some(records) = non_empty(store.get(zone, &candidate, qtype).await?) {
            return Ok(Found::Records(with_owner(records, name, rewrite)));
        }
        if qtype != Type::CNAME {
            if let Some(records) = non_empty(store.get(zone, &candidate, Type::CNAME).await?) {
                return Ok(Found::Cname(with_owner(records, name, rewrite)));
            }
        }
    }
    Ok(Found::Nothing)
}

fn non_empty(records: Option<Vec<Record>>) -> Option<Vec<Record>> {
    records.filter(|r| !r.is_empty())
}

fn with_owner(mut records: Vec<Record>, owner: &Name, rewrite: bool) -> Vec<Record> {
    if rewrite {
        for record in &mut records {
            record.owner = owner.clone();
        }
    }
    records
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
