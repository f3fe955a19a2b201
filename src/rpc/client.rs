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

//! Implementation of the TCP peer client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::{
    clock_skew, read_frame, write_frame, Call, Error, Outcome, PeerChannel, Reply, RequestFrame,
    ResponseFrame,
};
use crate::util::Clock;

/// How long a call, including connecting and the handshake, may take.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// A [`PeerChannel`] to a peer's RPC listener.
///
/// The connection is opened, and validated, on the first call. It is
/// dropped after any failure other than an error reported by the peer,
/// and reopened by the next call.
pub struct TcpPeer {
    addr: SocketAddr,
    id: String,
    clock: Arc<dyn Clock>,
    max_clock_skew: Duration,
    connection: Mutex<Option<Connection>>,
}

impl TcpPeer {
    pub fn new(addr: SocketAddr, clock: Arc<dyn Clock>, max_clock_skew: Duration) -> Self {
        Self {
            addr,
            id: addr.to_string(),
            clock,
            max_clock_skew,
            connection: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn connect(&self) -> Result<Connection, Error> {
        let (reader, writer) = TcpStream::connect(self.addr).await?.into_split();
        let mut connection = Connection {
            reader: BufReader::new(reader),
            writer,
            next_id: 1,
            buf: String::new(),
        };

        let ours = self.clock.now_millis();
        match connection.call(Call::Validate { time: ours }).await? {
            Reply::Validated { time } => {
                let skew = clock_skew(ours, time);
                if skew > self.max_clock_skew {
                    return Err(Error::ClockSkew(skew));
                }
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected {} reply to validate",
                    other.kind()
                )))
            }
        }
        info!("Connected to peer {}", self.addr);
        Ok(connection)
    }
}

#[async_trait]
impl PeerChannel for TcpPeer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, call: Call) -> Result<Reply, Error> {
        let mut connection = self.connection.lock().await;
        let method = call.method();
        let result = timeout(CALL_TIMEOUT, async {
            if connection.is_none() {
                *connection = Some(self.connect().await?);
            }
            connection.as_mut().ok_or(Error::Closed)?.call(call).await
        })
        .await
        .unwrap_or(Err(Error::Timeout));

        if let Err(ref err) = result {
            if !matches!(err, Error::Remote(_)) {
                debug!("Dropping connection to peer {} after {method}: {err}", self.addr);
                *connection = None;
            }
        }
        result
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: u64,
    buf: String,
}

impl Connection {
    async fn call(&mut self, call: Call) -> Result<Reply, Error> {
        let id = self.next_id;
        self.next_id += 1;
        write_frame(&mut self.writer, &RequestFrame { id, call }).await?;

        let frame: ResponseFrame = read_frame(&mut self.reader, &mut self.buf)
            .await?
            .ok_or(Error::Closed)?;
        if frame.id != id {
            return Err(Error::Protocol(format!(
                "reply has ID {}, expected {id}",
                frame.id
            )));
        }
        match frame.outcome {
            Outcome::Result(reply) => Ok(reply),
            Outcome::Error(message) => Err(Error::Remote(message)),
        }
    }
}
