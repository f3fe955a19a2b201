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

//! Provides the [`LruIndex`] used by the response cache.

use std::collections::{BTreeMap, HashMap};

use crate::name::Name;

/// Tracks when each cached name was last touched.
///
/// Entries are ordered by (timestamp, insertion sequence), so names
/// touched in the same millisecond still have a definite order. Every
/// name has exactly one position; touching it again moves it.
#[derive(Debug, Default)]
pub struct LruIndex {
    positions: HashMap<Name, (u64, u64)>,
    order: BTreeMap<(u64, u64), Name>,
    sequence: u64,
}

impl LruIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `name` to the most recently used position, stamped `now`.
    pub fn touch(&mut self, name: &Name, now: u64) {
        if let Some(old) = self.positions.remove(name) {
            self.order.remove(&old);
        }
        self.sequence += 1;
        let position = (now, self.sequence);
        self.positions.insert(name.clone(), position);
        self.order.insert(position, name.clone());
    }

    /// Forgets `name`. Returns whether it was present.
    pub fn remove(&mut self, name: &Name) -> bool {
        match self.positions.remove(name) {
            Some(position) => {
                self.order.remove(&position);
                true
            }
            None => false,
        }
    }

    /// Removes and returns the least recently used name.
    pub fn pop_oldest(&mut self) -> Option<Name> {
        let (&position, _) = self.order.iter().next()?;
        let name = self.order.remove(&position)?;
        self.positions.remove(&name);
        Some(name)
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.positions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
