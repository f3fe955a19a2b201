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

//! The peer RPC protocol.
//!
//! Instances serving the same zones keep each other up to date over a
//! simple protocol: one JSON object per line over TCP. Each request is
//! a [`RequestFrame`] carrying a [`Call`], and is answered by a
//! [`ResponseFrame`] with the same ID. Requests on a connection are
//! answered in order, one at a time.
//!
//! A connection must open with [`Call::Validate`], which exchanges the
//! peers' clocks. Property changes are resolved last-write-wins by
//! timestamp, so peers whose clocks disagree by more than the
//! configured skew are refused.
//!
//! The [`Replicator`] drives replication: it fans out locally and
//! remotely applied property changes to the other peers, and it
//! periodically exchanges full zone snapshots, which
//! [`ZoneSet::receive_zones`](crate::model::ZoneSet::receive_zones)
//! folds in by serial.

use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::model::{self, Change, Checked, ZoneSnapshot};

mod client;
mod replicator;
mod server;
pub use client::TcpPeer;
pub use replicator::{ExchangeTask, Replicator};
pub use server::RpcServer;

/// The longest line accepted from a peer. Zone exchanges carry whole
/// zones, so this is generous.
const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

////////////////////////////////////////////////////////////////////////
// PROTOCOL                                                           //
////////////////////////////////////////////////////////////////////////

/// A remote procedure call.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Call {
    /// The connection handshake. `time` is the caller's clock in
    /// milliseconds since the UNIX epoch.
    Validate { time: u64 },

    /// Sends our zones; the reply carries the callee's. Each zone is
    /// read on its own, so a malformed one does not spoil the call.
    ZoneExchange { zones: Vec<Checked<ZoneSnapshot>> },

    ZoneSetProperty(Propagation),
    ResourceSetProperty(Propagation),
    NodeSetProperty(Propagation),
}

impl Call {
    /// Wraps a property change in the call matching its path.
    pub fn set_property(change: Change, from: Option<String>) -> Self {
        let node_level = change.node.is_some();
        let resource_level = change.resource.is_some();
        let propagation = Propagation { from, change };
        if node_level {
            Self::NodeSetProperty(propagation)
        } else if resource_level {
            Self::ResourceSetProperty(propagation)
        } else {
            Self::ZoneSetProperty(propagation)
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::Validate { .. } => "validate",
            Self::ZoneExchange { .. } => "zone_exchange",
            Self::ZoneSetProperty(_) => "zone_set_property",
            Self::ResourceSetProperty(_) => "resource_set_property",
            Self::NodeSetProperty(_) => "node_set_property",
        }
    }

    /// Checks that a property call's path matches its method: zone
    /// properties name no resource or node, resource properties name
    /// no node, and node properties name both.
    fn check_path(&self) -> Result<(), Error> {
        let (change, resource, node) = match self {
            Self::ZoneSetProperty(p) => (&p.change, false, false),
            Self::ResourceSetProperty(p) => (&p.change, true, false),
            Self::NodeSetProperty(p) => (&p.change, true, true),
            _ => return Ok(()),
        };
        if change.resource.is_some() == resource && change.node.is_some() == node {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "property path does not match method {}",
                self.method()
            )))
        }
    }
}

/// Prepares our snapshots for a zone exchange.
pub fn exchange_zones(zones: Vec<ZoneSnapshot>) -> Vec<Checked<ZoneSnapshot>> {
    zones.into_iter().map(Checked::from).collect()
}

/// A property change sent to a peer, with the ID of the peer that sent
/// it so that it is not echoed back.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Propagation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub change: Change,
}

/// The successful result of a [`Call`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reply {
    /// The callee's clock.
    Validated { time: u64 },
    Zones(Vec<Checked<ZoneSnapshot>>),

    /// Whether a property change won and was applied.
    Applied(bool),
}

impl Reply {
    fn kind(&self) -> &'static str {
        match self {
            Self::Validated { .. } => "validated",
            Self::Zones(_) => "zones",
            Self::Applied(_) => "applied",
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RequestFrame {
    pub id: u64,
    pub call: Call,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ResponseFrame {
    pub id: u64,
    pub outcome: Outcome,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Result(Reply),
    Error(String),
}

/// Returns how far apart two clock readings (in milliseconds) are.
pub fn clock_skew(ours: u64, theirs: u64) -> Duration {
    Duration::from_millis(ours.abs_diff(theirs))
}

/// A channel to one peer.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Identifies the peer. This is the ID that the peer puts in the
    /// `from` field of the changes it propagates.
    fn id(&self) -> &str;

    async fn call(&self, call: Call) -> Result<Reply, Error>;
}

////////////////////////////////////////////////////////////////////////
// FRAMING                                                            //
////////////////////////////////////////////////////////////////////////

async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

/// Reads one frame, or returns [`None`] if the connection was closed
/// first.
async fn read_frame<R, T>(reader: &mut R, buf: &mut String) -> Result<Option<T>, Error>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    use tokio::io::AsyncReadExt;

    buf.clear();
    let n = reader.take(MAX_FRAME_LEN).read_line(buf).await?;
    if n == 0 {
        return Ok(None);
    } else if !buf.ends_with('\n') && n as u64 >= MAX_FRAME_LEN {
        return Err(Error::Protocol("frame is too long".into()));
    }
    Ok(Some(serde_json::from_str(buf.trim_end())?))
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that an RPC failed.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Codec(serde_json::Error),
    ClockSkew(Duration),
    Model(model::Error),

    /// The peer answered with an error.
    Remote(String),
    Protocol(String),
    Timeout,
    Closed,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err)
    }
}

impl From<model::Error> for Error {
    fn from(err: model::Error) -> Self {
        Self::Model(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Codec(err) => write!(f, "malformed frame: {err}"),
            Self::ClockSkew(skew) => {
                write!(f, "peer clock is off by {} ms", skew.as_millis())
            }
            Self::Model(err) => write!(f, "{err}"),
            Self::Remote(message) => write!(f, "peer reported: {message}"),
            Self::Protocol(message) => write!(f, "protocol error: {message}"),
            Self::Timeout => f.write_str("call timed out"),
            Self::Closed => f.write_str("connection closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Codec(err) => Some(err),
            Self::Model(err) => Some(err),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
