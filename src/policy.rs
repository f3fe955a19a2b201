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

//! Node selection policies.
//!
//! A resource names an ordered pipeline of built-in strategies, written
//! declaratively as e.g. `LeastLoad(3).LeastRecentlyUsed(1)`. Each
//! strategy ranks its candidate set and keeps the best few; the output
//! of one strategy is the input of the next. Selection never mutates
//! nodes: recording that a node was used is the caller's job, done when
//! the node is actually placed in a response.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::priority_queue::{Order, PriorityQueue};
use crate::util::Caseless;

/// The number of nodes [`Strategy::LeastLoad`] keeps by default.
pub const DEFAULT_LEAST_LOAD_COUNT: usize = 3;

/// The number of nodes [`Strategy::LeastRecentlyUsed`] keeps by default.
pub const DEFAULT_LEAST_RECENTLY_USED_COUNT: usize = 1;

/// The view of a node that the strategies rank on.
pub trait Candidate {
    /// The externally reported load metric.
    fn load(&self) -> f64;

    /// When the node was last placed in a response, in milliseconds
    /// since the UNIX epoch, if ever.
    fn last_used(&self) -> Option<u64>;
}

////////////////////////////////////////////////////////////////////////
// STRATEGIES                                                         //
////////////////////////////////////////////////////////////////////////

/// A built-in node ranking strategy.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Strategy {
    /// Keep the given number of nodes with the lowest load, lowest
    /// first.
    LeastLoad(usize),

    /// Keep the given number of nodes that were used longest ago,
    /// oldest first. Nodes that were never used rank as if used now.
    LeastRecentlyUsed(usize),
}

impl Strategy {
    /// Creates a [`Strategy::LeastLoad`], substituting the default for
    /// an absent or non-positive count.
    pub fn least_load(count: Option<i64>) -> Self {
        Self::LeastLoad(normalize(count, DEFAULT_LEAST_LOAD_COUNT))
    }

    /// Creates a [`Strategy::LeastRecentlyUsed`], substituting the
    /// default for an absent or non-positive count.
    pub fn least_recently_used(count: Option<i64>) -> Self {
        Self::LeastRecentlyUsed(normalize(count, DEFAULT_LEAST_RECENTLY_USED_COUNT))
    }

    /// Ranks `nodes` and returns the best of them in rank order. `now`
    /// stands in for the last-used time of never-used nodes.
    pub fn select<'a, N: Candidate>(&self, nodes: &[&'a N], now: u64) -> Vec<&'a N> {
        match *self {
            Self::LeastLoad(count) => top_k(nodes, count, |node| node.load()),
            Self::LeastRecentlyUsed(count) => top_k(nodes, count, |node| {
                node.last_used().unwrap_or(now) as f64
            }),
        }
    }
}

fn normalize(count: Option<i64>, default: usize) -> usize {
    match count {
        Some(count) if count > 0 => usize::try_from(count).unwrap_or(usize::MAX),
        _ => default,
    }
}

fn top_k<'a, N, F>(nodes: &[&'a N], count: usize, rank: F) -> Vec<&'a N>
where
    F: Fn(&N) -> f64,
{
    let mut queue = PriorityQueue::with_capacity(Order::Ascending, nodes.len());
    for &node in nodes {
        queue.push(node, rank(node));
    }
    let mut selected = Vec::with_capacity(count.min(nodes.len()));
    while selected.len() < count {
        match queue.pop() {
            Some(node) => selected.push(node),
            None => break,
        }
    }
    selected
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::LeastLoad(count) => write!(f, "LeastLoad({count})"),
            Self::LeastRecentlyUsed(count) => write!(f, "LeastRecentlyUsed({count})"),
        }
    }
}

impl FromStr for Strategy {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let (name, count) = match text.find('(') {
            Some(open) => {
                let args = text[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| ParseError::Syntax(text.to_owned()))?
                    .trim();
                let count = if args.is_empty() {
                    None
                } else {
                    Some(
                        args.parse::<i64>()
                            .map_err(|_| ParseError::InvalidCount(args.to_owned()))?,
                    )
                };
                (text[..open].trim(), count)
            }
            None => (text, None),
        };

        if Caseless(name) == Caseless("LeastLoad") {
            Ok(Self::least_load(count))
        } else if Caseless(name) == Caseless("LeastRecentlyUsed") {
            Ok(Self::least_recently_used(count))
        } else {
            Err(ParseError::UnknownStrategy(name.to_owned()))
        }
    }
}

////////////////////////////////////////////////////////////////////////
// PIPELINES                                                          //
////////////////////////////////////////////////////////////////////////

/// An ordered sequence of strategies, each narrowing the candidate set
/// of the next. An empty pipeline selects every node.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Pipeline(Vec<Strategy>);

impl Pipeline {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self(strategies)
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.0
    }

    /// Runs every strategy in order and returns the final selection.
    pub fn select<'a, N: Candidate>(&self, nodes: &[&'a N], now: u64) -> Vec<&'a N> {
        let mut candidates = nodes.to_vec();
        for strategy in &self.0 {
            candidates = strategy.select(&candidates, now);
        }
        candidates
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, strategy) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{strategy}")?;
        }
        Ok(())
    }
}

impl FromStr for Pipeline {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        text.split('.')
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl Serialize for Pipeline {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Pipeline {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a pipeline description is malformed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    UnknownStrategy(String),
    InvalidCount(String),
    Syntax(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownStrategy(name) => write!(f, "unknown selection strategy {name:?}"),
            Self::InvalidCount(count) => write!(f, "invalid strategy count {count:?}"),
            Self::Syntax(text) => write!(f, "malformed strategy {text:?}"),
        }
    }
}

impl std::error::Error for ParseError {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct TestNode {
        name: &'static str,
        load: f64,
        last_used: Option<u64>,
    }

    impl Candidate for TestNode {
        fn load(&self) -> f64 {
            self.load
        }

        fn last_used(&self) -> Option<u64> {
            self.last_used
        }
    }

    fn node(name: &'static str, load: f64, last_used: Option<u64>) -> TestNode {
        TestNode {
            name,
            load,
            last_used,
        }
    }

    fn names(nodes: &[&TestNode]) -> Vec<&'static str> {
        nodes.iter().map(|n| n.name).collect()
    }

    #[test]
    fn least_load_keeps_lowest_loads_in_order() {
        let nodes = [node("a", 5.0, None), node("b", 10.0, None), node("c", 1.0, None)];
        let refs: Vec<&TestNode> = nodes.iter().collect();
        let selected = Strategy::LeastLoad(2).select(&refs, 0);
        assert_eq!(names(&selected), ["c", "a"]);
    }

    #[test]
    fn least_recently_used_keeps_oldest() {
        let nodes = [
            node("a", 0.0, Some(100)),
            node("b", 0.0, Some(50)),
            node("c", 0.0, Some(200)),
        ];
        let refs: Vec<&TestNode> = nodes.iter().collect();
        let selected = Strategy::LeastRecentlyUsed(1).select(&refs, 1000);
        assert_eq!(names(&selected), ["b"]);
    }

    #[test]
    fn never_used_nodes_rank_as_just_used() {
        let nodes = [node("fresh", 0.0, None), node("old", 0.0, Some(500))];
        let refs: Vec<&TestNode> = nodes.iter().collect();
        let selected = Strategy::LeastRecentlyUsed(1).select(&refs, 1000);
        assert_eq!(names(&selected), ["old"]);
    }

    #[test]
    fn counts_beyond_available_and_empty_sets() {
        let nodes = [node("a", 3.0, None), node("b", 2.0, None)];
        let refs: Vec<&TestNode> = nodes.iter().collect();
        assert_eq!(names(&Strategy::LeastLoad(10).select(&refs, 0)), ["b", "a"]);
        assert!(Strategy::LeastLoad(3).select::<TestNode>(&[], 0).is_empty());
    }

    #[test]
    fn absent_or_non_positive_counts_use_defaults() {
        assert_eq!(Strategy::least_load(None), Strategy::LeastLoad(3));
        assert_eq!(Strategy::least_load(Some(-2)), Strategy::LeastLoad(3));
        assert_eq!(
            Strategy::least_recently_used(Some(0)),
            Strategy::LeastRecentlyUsed(1)
        );
        assert_eq!("LeastLoad()".parse(), Ok(Strategy::LeastLoad(3)));
        assert_eq!("leastrecentlyused".parse(), Ok(Strategy::LeastRecentlyUsed(1)));
    }

    #[test]
    fn pipeline_narrows_in_order() {
        let nodes = [
            node("a", 1.0, Some(300)),
            node("b", 2.0, Some(100)),
            node("c", 3.0, Some(50)),
            node("d", 9.0, Some(10)),
        ];
        let refs: Vec<&TestNode> = nodes.iter().collect();
        let pipeline: Pipeline = "LeastLoad(3).LeastRecentlyUsed(1)".parse().unwrap();
        assert_eq!(names(&pipeline.select(&refs, 1000)), ["c"]);
        assert_eq!(pipeline.to_string(), "LeastLoad(3).LeastRecentlyUsed(1)");
        assert_eq!(Pipeline::default().select(&refs, 0).len(), 4);
    }

    #[test]
    fn pipeline_rejects_unknown_strategies() {
        assert_eq!(
            "LeastLoad(2).Random(1)".parse::<Pipeline>(),
            Err(ParseError::UnknownStrategy("Random".into()))
        );
        assert_eq!(
            "LeastLoad(x)".parse::<Pipeline>(),
            Err(ParseError::InvalidCount("x".into()))
        );
        assert_eq!(
            "LeastLoad(2".parse::<Pipeline>(),
            Err(ParseError::Syntax("LeastLoad(2".into()))
        );
    }

    #[test]
    fn pipeline_serde_uses_string_form() {
        let pipeline: Pipeline = serde_json::from_str(r#""LeastLoad(2)""#).unwrap();
        assert_eq!(pipeline.strategies(), [Strategy::LeastLoad(2)]);
        assert_eq!(serde_json::to_string(&pipeline).unwrap(), r#""LeastLoad(2)""#);
    }
}
