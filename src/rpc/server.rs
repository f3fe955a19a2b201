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

//! Implementation of the RPC listener.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};

use super::{
    clock_skew, exchange_zones, read_frame, write_frame, Call, Error, Outcome, Reply, Replicator,
    RequestFrame, ResponseFrame,
};
use crate::io::run_with_respawning;
use crate::io::shutdown::{ShutdownController, ShutdownHandle};
use crate::util::Clock;

/// Answers peers' RPC calls.
pub struct RpcServer {
    replicator: Arc<Replicator>,
    clock: Arc<dyn Clock>,
    max_clock_skew: Duration,
}

impl RpcServer {
    pub fn new(
        replicator: Arc<Replicator>,
        clock: Arc<dyn Clock>,
        max_clock_skew: Duration,
    ) -> Self {
        Self {
            replicator,
            clock,
            max_clock_skew,
        }
    }

    /// Binds a listener for [`start`](Self::start).
    pub async fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }

    /// Spawns the accept loop for `listener` on the active Tokio
    /// runtime.
    pub fn start(self: &Arc<Self>, listener: TcpListener) -> ShutdownController {
        let (controller, handle) = ShutdownController::new();
        tokio::spawn(run_with_respawning(
            run_listener,
            handle,
            self.clone(),
            Arc::new(listener),
        ));
        controller
    }

    /// Answers one call. `validated` records whether the connection has
    /// completed the handshake.
    fn answer(&self, call: Call, validated: &mut bool) -> Result<Reply, Error> {
        call.check_path()?;
        match call {
            Call::Validate { time } => {
                let now = self.clock.now_millis();
                let skew = clock_skew(now, time);
                if skew > self.max_clock_skew {
                    return Err(Error::ClockSkew(skew));
                }
                *validated = true;
                Ok(Reply::Validated { time: now })
            }
            _ if !*validated => Err(Error::Protocol("connection is not validated".into())),
            Call::ZoneExchange { zones } => {
                let ours = exchange_zones(self.replicator.zones().snapshots());
                let replaced = self.replicator.zones().receive_zones(zones);
                if !replaced.is_empty() {
                    info!("Took {} zone(s) from peer exchange", replaced.len());
                }
                Ok(Reply::Zones(ours))
            }
            Call::ZoneSetProperty(propagation)
            | Call::ResourceSetProperty(propagation)
            | Call::NodeSetProperty(propagation) => {
                Ok(Reply::Applied(self.replicator.receive_change(propagation)?))
            }
        }
    }
}

async fn run_listener(
    mut shutdown: ShutdownHandle,
    server: Arc<RpcServer>,
    listener: Arc<TcpListener>,
) -> io::Result<()> {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.requested() => return Ok(()),
            res = listener.accept() => res?,
        };
        let server = server.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match handle_connection(&server, shutdown, stream, peer).await {
                Ok(()) => debug!("RPC connection from {peer} closed"),
                Err(err) => warn!("RPC connection from {peer} failed: {err}"),
            }
        });
    }
}

async fn handle_connection(
    server: &RpcServer,
    mut shutdown: ShutdownHandle,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), Error> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = String::new();
    let mut validated = false;

    loop {
        let frame: RequestFrame = tokio::select! {
            _ = shutdown.requested() => return Ok(()),
            res = read_frame(&mut reader, &mut buf) => match res? {
                Some(frame) => frame,
                None => return Ok(()),
            },
        };
        let method = frame.call.method();
        let (outcome, fatal) = match server.answer(frame.call, &mut validated) {
            Ok(reply) => (Outcome::Result(reply), false),
            Err(err) => {
                warn!("Rejected {method} from {peer}: {err}");
                (Outcome::Error(err.to_string()), !validated)
            }
        };
        write_frame(
            &mut writer,
            &ResponseFrame {
                id: frame.id,
                outcome,
            },
        )
        .await?;
        if fatal {
            return Ok(());
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
