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

//! A lazily-sorted priority queue used by the node selection policies.

use std::cmp::Ordering;

/// Which end of the priority range [`PriorityQueue::pop`] takes from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Order {
    /// Lowest priority value first.
    Ascending,

    /// Highest priority value first.
    Descending,
}

/// A priority queue that defers sorting until it is read.
///
/// Entries accumulate unsorted. The first [`pop`](Self::pop) or
/// [`top`](Self::top) after a [`push`](Self::push) sorts everything
/// once, and later reads reuse that order until the next push. Ties are
/// not ordered in any particular way. Reading from an empty queue
/// yields [`None`].
#[derive(Clone, Debug)]
pub struct PriorityQueue<T, P> {
    order: Order,
    // When sorted, the next entry to pop is the last one.
    entries: Vec<(P, T)>,
    sorted: bool,
}

impl<T, P: PartialOrd> PriorityQueue<T, P> {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            entries: Vec::new(),
            sorted: true,
        }
    }

    pub fn with_capacity(order: Order, capacity: usize) -> Self {
        Self {
            order,
            entries: Vec::with_capacity(capacity),
            sorted: true,
        }
    }

    pub fn push(&mut self, item: T, priority: P) {
        self.entries.push((priority, item));
        self.sorted = false;
    }

    pub fn pop(&mut self) -> Option<T> {
        self.sort();
        self.entries.pop().map(|(_, item)| item)
    }

    pub fn top(&mut self) -> Option<&T> {
        self.sort();
        self.entries.last().map(|(_, item)| item)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sort(&mut self) {
        if !self.sorted {
            let order = self.order;
            self.entries.sort_unstable_by(|(a, _), (b, _)| {
                let ordering = a.partial_cmp(b).unwrap_or(Ordering::Equal);
                match order {
                    Order::Ascending => ordering.reverse(),
                    Order::Descending => ordering,
                }
            });
            self.sorted = true;
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
