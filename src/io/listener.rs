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

//! Implementation of the Tokio UDP and TCP listeners.

// NOTE: I/O error handling here is generally to exit the task. The
// run_with_respawning function acts as a supervisor that respawns the
// TCP acceptor and UDP receivers, after a delay if needed, when they
// exit with an error or a panic.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::message::{Rcode, Response};
use crate::server::Server;

use super::codec::{self, MAX_UDP_PAYLOAD};
use super::shutdown::{ShutdownController, ShutdownHandle};
use super::READ_MESSAGE_TIMEOUT;

/// Serves DNS over UDP and TCP on a Tokio runtime.
///
/// Sockets are bound by [`DnsListener::bind`], and tasks are spawned
/// by [`DnsListener::start`]. The [`ShutdownController`] returned by
/// the latter must be held as long as the server should be running,
/// since dropping it triggers shutdown.
pub struct DnsListener {
    tcp_listeners: Vec<TcpListener>,
    udp_sockets: Vec<Arc<UdpSocket>>,
}

impl DnsListener {
    /// Binds a UDP socket and a TCP listener on each address. This
    /// function requires that the Tokio runtime be active.
    pub async fn bind<A>(addrs: A) -> io::Result<Self>
    where
        A: IntoIterator<Item = SocketAddr>,
    {
        let mut tcp_listeners = Vec::new();
        let mut udp_sockets = Vec::new();
        for addr in addrs {
            let socket = Arc::new(UdpSocket::bind(addr).await?);
            // With port 0, use the same port for TCP as UDP was given.
            let tcp_addr = SocketAddr::new(addr.ip(), socket.local_addr()?.port());
            tcp_listeners.push(TcpListener::bind(tcp_addr).await?);
            udp_sockets.push(socket);
        }
        Ok(Self {
            tcp_listeners,
            udp_sockets,
        })
    }

    /// Returns the addresses the UDP sockets are bound to. The TCP
    /// listeners use the same addresses.
    pub fn local_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        self.udp_sockets.iter().map(|s| s.local_addr()).collect()
    }

    /// Spawns the listener tasks on the active Tokio runtime.
    pub fn start(self, server: &Arc<Server>) -> ShutdownController {
        let (controller, handle) = ShutdownController::new();

        for listener in self.tcp_listeners {
            tokio::spawn(run_with_respawning(
                run_tcp_listener,
                handle.clone(),
                server.clone(),
                Arc::new(listener),
            ));
        }

        for socket in self.udp_sockets {
            tokio::spawn(run_with_respawning(
                run_udp_receiver,
                handle.clone(),
                server.clone(),
                socket,
            ));
        }

        controller
    }
}

/// How long to wait between respawns of a task, so that tasks that
/// crash immediately do not use up significant CPU time.
const TASK_RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// Runs a Tokio task, respawning it if it returns an I/O error, is
/// cancelled, or panics. `context` is the server the task works for.
pub(crate) async fn run_with_respawning<F, G, C, S>(
    f: F,
    mut shutdown: ShutdownHandle,
    context: C,
    socket: S,
) where
    F: Fn(ShutdownHandle, C, S) -> G,
    G: Future<Output = io::Result<()>> + Send + 'static,
    C: Clone,
    S: Clone,
{
    loop {
        let last_spawn_time = Instant::now();
        match tokio::spawn(f(shutdown.clone(), context.clone(), socket.clone())).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => log_io_error(e),
            Err(_) => (), // The task panicked or was cancelled.
        }

        let since_last_spawn = Instant::now().duration_since(last_spawn_time);
        if let Some(duration_to_wait) = TASK_RESPAWN_DELAY.checked_sub(since_last_spawn) {
            tokio::select! {
                _ = shutdown.requested() => return,
                _ = tokio::time::sleep(duration_to_wait) => (),
            }
        }
    }
}

/// Decodes a message, runs it through the server, and encodes the
/// response. Returns [`None`] when nothing should be sent back.
async fn respond(
    server: &Server,
    message: &[u8],
    source: IpAddr,
    max_len: Option<usize>,
) -> Option<Vec<u8>> {
    let incoming = match codec::decode_request(message, source) {
        Ok(incoming) => incoming,
        Err(e) => {
            debug!("dropping message from {source}: {e}");
            return None;
        }
    };

    let response = if incoming.is_standard_query() {
        server.handle(&incoming.request).await
    } else {
        Response::new(Rcode::NotImp)
    };

    match codec::encode_response(&incoming, &response, max_len) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!("failed to encode response to {source}: {e}");
            codec::encode_response(&incoming, &Response::new(Rcode::ServFail), max_len).ok()
        }
    }
}

/// The TCP listener/accept loop.
async fn run_tcp_listener(
    mut shutdown: ShutdownHandle,
    server: Arc<Server>,
    listener: Arc<TcpListener>,
) -> io::Result<()> {
    loop {
        let (client, client_addr) = tokio::select! {
            _ = shutdown.requested() => return Ok(()),
            res = listener.accept() => res?,
        };
        let shutdown = shutdown.clone();
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_tcp_connection(shutdown, &server, client, client_addr.ip()).await
            {
                log_io_error(e);
            }
        });
    }
}

/// Handles a TCP connection. Each message is preceded by its length
/// as a two-octet field ([RFC 1035 § 4.2.2]).
///
/// [RFC 1035 § 4.2.2]: https://datatracker.ietf.org/doc/html/rfc1035#section-4.2.2
async fn handle_tcp_connection(
    mut shutdown: ShutdownHandle,
    server: &Server,
    mut socket: TcpStream,
    client_ip: IpAddr,
) -> io::Result<()> {
    let mut received_buf = vec![0; u16::MAX as usize];

    loop {
        let received_len = match timeout(
            READ_MESSAGE_TIMEOUT,
            read_message_over_tcp(&mut socket, &mut received_buf),
        )
        .await
        {
            Ok(Ok(Some(len))) => len,
            Ok(Ok(None)) => return Ok(()), // The connection was closed.
            Ok(Err(e)) => return Err(e),
            Err(_) => return Ok(()), // Timed out.
        };

        // A message we cannot even answer closes the connection.
        let response = match respond(server, &received_buf[..received_len], client_ip, None).await
        {
            Some(response) => response,
            None => return Ok(()),
        };
        let response_len = match u16::try_from(response.len()) {
            Ok(len) => len,
            Err(_) => {
                warn!("response to {client_ip} is too long for TCP");
                return Ok(());
            }
        };
        socket.write_u16(response_len).await?;
        socket.write_all(&response).await?;

        if shutdown.is_requested() {
            return Ok(());
        }
    }
}

/// Reads a single length-prefixed DNS message into `buf`, returning its
/// length, or [`None`] if the connection was closed first.
async fn read_message_over_tcp(
    socket: &mut TcpStream,
    buf: &mut [u8],
) -> io::Result<Option<usize>> {
    let len = match socket.read_u16().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    match socket.read_exact(&mut buf[..len]).await {
        Ok(_) => Ok(Some(len)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// The UDP receiver loop. Each message is processed in its own task.
async fn run_udp_receiver(
    mut shutdown: ShutdownHandle,
    server: Arc<Server>,
    socket: Arc<UdpSocket>,
) -> io::Result<()> {
    loop {
        let mut received_buf = vec![0; MAX_UDP_PAYLOAD];
        let (received_len, src) = tokio::select! {
            _ = shutdown.requested() => return Ok(()),
            res = socket.recv_from(&mut received_buf) => res?,
        };

        // Moving the wait sender into the task keeps shutdown from
        // completing while it runs.
        let wait_sender = shutdown.wait_sender.clone();
        let server = server.clone();
        let socket = socket.clone();
        tokio::spawn(async move {
            let response = respond(
                &server,
                &received_buf[..received_len],
                src.ip(),
                Some(MAX_UDP_PAYLOAD),
            )
            .await;
            if let Some(response) = response {
                if let Err(e) = socket.send_to(&response, src).await {
                    log_io_error(e);
                }
            }
            drop(wait_sender);
        });
    }
}

fn log_io_error(e: io::Error) {
    error!("I/O error: {e}");
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::catalog::{Catalog, RecordInput, ZoneInput, ZoneKind};
    use crate::db::MemoryStore;
    use crate::io::UdpUpstream;
    use crate::message::Question;
    use crate::model::ZoneSet;
    use crate::rr::Type;
    use crate::util::SystemClock;
    use hickory_proto::op::{Message, OpCode, ResponseCode};
    use hickory_proto::serialize::binary::BinEncodable;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn start() -> (ShutdownController, SocketAddr) {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(Catalog::new(store.clone()));
        catalog
            .add(ZoneInput {
                name: "example.com.".into(),
                kind: ZoneKind::Master,
                default_ttl: 300,
                records: vec![RecordInput {
                    name: "www".into(),
                    rr_type: Type::A,
                    ttl: Some(60),
                    data: "192.0.2.1".into(),
                }],
            })
            .await
            .unwrap();
        let clock = Arc::new(SystemClock);
        let zones = Arc::new(ZoneSet::new(clock.clone()));
        let cache = Arc::new(ResponseCache::new(
            Arc::new(MemoryStore::new()),
            clock,
            100,
        ));
        let server = Arc::new(Server::new(catalog, zones, cache, Arc::new(UdpUpstream::new())));

        let listener = DnsListener::bind(["127.0.0.1:0".parse().unwrap()])
            .await
            .unwrap();
        let addr = listener.local_addrs().unwrap()[0];
        (listener.start(&server), addr)
    }

    fn query(id: u16) -> Vec<u8> {
        let question = Question::new("www.example.com.".parse().unwrap(), Type::A);
        codec::encode_query(id, &question).unwrap()
    }

    #[tokio::test]
    async fn answers_over_udp() {
        let (controller, addr) = start().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&query(42), addr).await.unwrap();
        let mut buf = vec![0; 512];
        let len = client.recv(&mut buf).await.unwrap();
        let message = Message::from_vec(&buf[..len]).unwrap();
        assert_eq!(message.id(), 42);
        assert!(message.authoritative());
        assert_eq!(message.answers().len(), 1);
        controller.shut_down().await;
    }

    #[tokio::test]
    async fn answers_over_tcp() {
        let (controller, addr) = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        for id in [1, 2] {
            let query = query(id);
            client.write_u16(query.len() as u16).await.unwrap();
            client.write_all(&query).await.unwrap();
            let len = client.read_u16().await.unwrap() as usize;
            let mut buf = vec![0; len];
            client.read_exact(&mut buf).await.unwrap();
            let message = Message::from_vec(&buf).unwrap();
            assert_eq!(message.id(), id);
            assert_eq!(message.answers().len(), 1);
        }
        drop(client);
        controller.shut_down().await;
    }

    #[tokio::test]
    async fn other_opcodes_are_not_implemented() {
        let (controller, addr) = start().await;
        let mut message = Message::from_vec(&query(9)).unwrap();
        message.set_op_code(OpCode::Update);
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&message.to_vec().unwrap(), addr).await.unwrap();
        let mut buf = vec![0; 512];
        let len = client.recv(&mut buf).await.unwrap();
        let reply = Message::from_vec(&buf[..len]).unwrap();
        assert_eq!(reply.response_code(), ResponseCode::NotImp);
        controller.shut_down().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_tasks_are_respawned_after_a_delay() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (_controller, handle) = ShutdownController::new();
        let started = tokio::time::Instant::now();
        run_with_respawning(
            |_: ShutdownHandle, attempts: Arc<AtomicUsize>, _: ()| async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(io::Error::new(io::ErrorKind::Other, "too many open files"))
                } else {
                    Ok(())
                }
            },
            handle,
            attempts.clone(),
            (),
        )
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= 2 * TASK_RESPAWN_DELAY);
    }
}
