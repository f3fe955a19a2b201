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

//! Ballast is a load-balancing DNS server library.
//!
//! An authoritative answer from Ballast is not a fixed set of records.
//! Each load-balanced name in a zone is a *resource* backed by a pool
//! of *nodes* (backend endpoints), and every query runs the resource's
//! node-selection policy to decide which addresses to hand out. Names
//! that Ballast does not serve may be forwarded to upstream resolvers
//! for clients that an ACL allows to recurse; those answers are kept in
//! a TTL-aware response cache. Finally, instances replicate their zone
//! data to one another, using each zone's serial number to decide which
//! copy is fresher.
//!
//! The major pieces are:
//!
//! * [`catalog`]: the directory of served zones, with wildcard and
//!   CNAME-following lookup over a pluggable [`db::RecordStore`];
//! * [`model`]: the zone/resource/node data model, its serial
//!   bookkeeping, and replication;
//! * [`policy`]: the built-in node-selection strategies;
//! * [`cache`]: the response cache for recursively resolved answers;
//! * [`server`]: the request-handling state machine that ties the
//!   above together; and
//! * [`io`] and [`rpc`]: network plumbing for DNS clients and peers.

pub mod cache;
pub mod catalog;
pub mod db;
pub mod io;
pub mod message;
pub mod model;
pub mod name;
pub mod policy;
pub mod priority_queue;
pub mod rpc;
pub mod rr;
pub mod server;
pub mod util;
pub mod zone_file;
