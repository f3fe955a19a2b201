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

//! The request-handling logic of the server.
//!
//! The [`Server`] structure is the heart of this module. It is
//! abstracted from any network I/O: an I/O provider decodes a query
//! into a [`Request`], calls [`Server::handle`], and encodes the
//! [`Response`] it gets back.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;

use crate::cache::ResponseCache;
use crate::catalog::Catalog;
use crate::message::{Rcode, Request, Response};
use crate::model::ZoneSet;
use crate::name::Name;

mod acl;
mod forward;
mod query;

pub use acl::{Acl, AclRule};
pub use forward::{Forwarders, Upstream, UpstreamError};
pub use query::{State, Transaction, TRANSITIONS};

/// The default deadline for one upstream query.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

////////////////////////////////////////////////////////////////////////
// SERVER                                                             //
////////////////////////////////////////////////////////////////////////

/// A load-balancing DNS server, abstracted from any underlying network
/// I/O provider.
///
/// Queries for zones in the [`Catalog`] are answered from its records
/// and from the nodes of the resources in the [`ZoneSet`]. Queries for
/// other names are forwarded upstream if the [`Acl`] allows it, and
/// the answers are kept in the [`ResponseCache`]. See
/// [`State`] for the steps a query goes through.
pub struct Server {
    catalog: Arc<Catalog>,
    zones: Arc<ZoneSet>,
    cache: Arc<ResponseCache>,
    acl: Acl,
    forwarders: Arc<Forwarders>,
    zone_forwarders: Mutex<HashMap<Name, (Vec<SocketAddr>, Arc<Forwarders>)>>,
    upstream: Arc<dyn Upstream>,
    upstream_timeout: Duration,
}

impl Server {
    /// Creates a server with an empty ACL, no forwarders, and the
    /// default upstream timeout.
    pub fn new(
        catalog: Arc<Catalog>,
        zones: Arc<ZoneSet>,
        cache: Arc<ResponseCache>,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        Self {
            catalog,
            zones,
            cache,
            acl: Acl::default(),
            forwarders: Arc::new(Forwarders::default()),
            zone_forwarders: Mutex::new(HashMap::new()),
            upstream,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    pub fn with_acl(mut self, acl: Acl) -> Self {
        self.acl = acl;
        self
    }

    /// Sets the global forwarder list, used for names no zone covers.
    pub fn with_forwarders(mut self, servers: Vec<SocketAddr>) -> Self {
        self.forwarders = Arc::new(Forwarders::new(servers));
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn zones(&self) -> &Arc<ZoneSet> {
        &self.zones
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Handles a decoded request. Only the first question is answered;
    /// a request without one is a FORMERR.
    pub async fn handle(&self, request: &Request) -> Response {
        let Some(question) = request.questions.first() else {
            return Response::new(Rcode::FormErr);
        };
        if request.questions.len() > 1 {
            debug!(
                "Ignoring {} extra questions from {}",
                request.questions.len() - 1,
                request.source
            );
        }
        self.resolve(question.clone(), request.source)
            .await
            .into_response()
    }

    /// Returns the round-robin list for a forward zone. The list is
    /// kept across queries and rebuilt if the zone's servers change.
    fn zone_forwarders(&self, zone: &Name, servers: &[SocketAddr]) -> Arc<Forwarders> {
        let mut map = self.zone_forwarders.lock();
        match map.get(zone) {
            Some((known, forwarders)) if known == servers => forwarders.clone(),
            _ => {
                let forwarders = Arc::new(Forwarders::new(servers.iter().copied()));
                map.insert(zone.clone(), (servers.to_vec(), forwarders.clone()));
                forwarders
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
