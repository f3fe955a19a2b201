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

//! Upstream forwarding: the round-robin forwarder list and the
//! [`Upstream`] resolver abstraction.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::message::{Question, Response};

/// A round-robin list of upstream servers.
///
/// The list rotates as each server is handed out, before the query is
/// sent, so that concurrent queries spread over all servers and a
/// failing server does not hold up the rotation.
#[derive(Debug, Default)]
pub struct Forwarders {
    servers: Mutex<VecDeque<SocketAddr>>,
}

impl Forwarders {
    pub fn new(servers: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            servers: Mutex::new(servers.into_iter().collect()),
        }
    }

    /// Takes the server at the head of the list and moves it to the
    /// tail.
    pub fn next(&self) -> Option<SocketAddr> {
        let mut servers = self.servers.lock();
        let server = servers.pop_front()?;
        servers.push_back(server);
        Some(server)
    }

    pub fn len(&self) -> usize {
        self.servers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.lock().is_empty()
    }
}

/// Sends a single query to an upstream server.
///
/// Implementations make one attempt and do not retry; the caller
/// bounds the attempt with a timeout.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn query(
        &self,
        server: SocketAddr,
        question: &Question,
    ) -> Result<Response, UpstreamError>;
}

/// An error signaling that an upstream query failed.
#[derive(Debug)]
pub enum UpstreamError {
    Io(io::Error),
    Malformed(String),
    Timeout,
}

impl From<io::Error> for UpstreamError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(_) => f.write_str("I/O error talking to upstream"),
            Self::Malformed(reason) => write!(f, "malformed upstream response: {reason}"),
            Self::Timeout => f.write_str("upstream did not answer in time"),
        }
    }
}

impl std::error::Error for UpstreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
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

    #[test]
    fn forwarders_rotate() {
        let a: SocketAddr = "192.0.2.1:53".parse().unwrap();
        let b: SocketAddr = "192.0.2.2:53".parse().unwrap();
        let forwarders = Forwarders::new([a, b]);
        assert_eq!(forwarders.next(), Some(a));
        assert_eq!(forwarders.next(), Some(b));
        assert_eq!(forwarders.next(), Some(a));
        assert_eq!(forwarders.len(), 2);
    }

    #[test]
    fn empty_forwarders_yield_nothing() {
        let forwarders = Forwarders::default();
        assert!(forwarders.is_empty());
        assert_eq!(forwarders.next(), None);
    }
}
