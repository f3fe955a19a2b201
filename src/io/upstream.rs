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

//! Implementation of the UDP upstream client.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use log::debug;
use tokio::net::UdpSocket;

use crate::message::{Question, Response};
use crate::server::{Upstream, UpstreamError};

use super::codec;

/// The receive buffer size for upstream responses. Responses are not
/// expected to exceed the classic UDP limit, but a larger buffer lets
/// us see (and reject) oversized ones instead of silently cutting
/// them.
const RECEIVE_BUFFER_SIZE: usize = 4096;

/// Sends queries to upstream servers over UDP.
///
/// Each query goes out on a fresh ephemeral socket connected to the
/// server, so replies from other addresses are filtered by the kernel.
/// The message ID is random. Replies with another ID are ignored, and
/// the reply that matches must echo the question that was asked.
#[derive(Debug, Default)]
pub struct UdpUpstream;

impl UdpUpstream {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Upstream for UdpUpstream {
    async fn query(
        &self,
        server: SocketAddr,
        question: &Question,
    ) -> Result<Response, UpstreamError> {
        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;

        let id: u16 = rand::random();
        let query = codec::encode_query(id, question)
            .map_err(|e| UpstreamError::Malformed(e.to_string()))?;
        socket.send(&query).await?;

        // Stray datagrams are dropped and we keep listening. The caller
        // bounds the whole exchange with its upstream timeout.
        let mut buf = vec![0; RECEIVE_BUFFER_SIZE];
        loop {
            let len = socket.recv(&mut buf).await?;
            let reply = match codec::decode_response(&buf[..len]) {
                Ok(reply) => reply,
                Err(e) => {
                    debug!("Discarding undecodable datagram from {server}: {e}");
                    continue;
                }
            };
            if reply.id != id {
                debug!("Discarding reply from {server} with ID {}, expected {id}", reply.id);
                continue;
            }
            if !reply.echoes(question) {
                return Err(UpstreamError::Malformed(format!(
                    "reply from {server} does not echo the question {question}"
                )));
            }
            return Ok(reply.response);
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Rcode;
    use crate::rr::{Rdata, Record, Type};
    use hickory_proto::op::Message;
    use std::time::Duration;
    use tokio::time::timeout;

    /// How the fake upstream answers the query it receives.
    #[derive(Clone, Copy)]
    enum Answer {
        Correct,
        WrongId,
        OtherQuestion,
    }

    fn question() -> Question {
        Question::new("www.example.net.".parse().unwrap(), Type::A)
    }

    /// Starts a fake upstream that answers one query with each of
    /// `answers`, in order.
    async fn fake_upstream(answers: &'static [Answer]) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0; 512];
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let query = Message::from_vec(&buf[..len]).unwrap();
            assert!(query.recursion_desired());
            let incoming = codec::decode_request(&buf[..len], peer.ip()).unwrap();

            for answer in answers {
                let mut echoed = incoming.clone();
                match answer {
                    Answer::Correct => (),
                    Answer::WrongId => echoed.id = echoed.id.wrapping_add(1),
                    Answer::OtherQuestion => {
                        let other = Question::new("victim.example.org.".parse().unwrap(), Type::A);
                        let bytes = codec::encode_query(incoming.id, &other).unwrap();
                        echoed = codec::decode_request(&bytes, peer.ip()).unwrap();
                    }
                }
                let qname = echoed.request.questions[0].qname.clone();
                let mut response = Response::new(Rcode::NoError);
                response.recursion_available = true;
                response.answer.push(Record::new(
                    qname,
                    300,
                    Rdata::A("203.0.113.9".parse().unwrap()),
                ));
                let reply = codec::encode_response(&echoed, &response, None).unwrap();
                socket.send_to(&reply, peer).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn queries_are_answered() {
        let server = fake_upstream(&[Answer::Correct]).await;
        let response = UdpUpstream::new().query(server, &question()).await.unwrap();
        assert_eq!(response.rcode, Rcode::NoError);
        assert!(response.recursion_available);
        assert_eq!(response.answer.len(), 1);
        assert_eq!(response.answer[0].rdata.to_string(), "203.0.113.9");
    }

    #[tokio::test]
    async fn mismatched_ids_are_skipped() {
        let server = fake_upstream(&[Answer::WrongId, Answer::Correct]).await;
        let response = UdpUpstream::new().query(server, &question()).await.unwrap();
        assert_eq!(response.answer[0].owner, question().qname);

        let server = fake_upstream(&[Answer::WrongId]).await;
        let upstream = UdpUpstream::new();
        let q = question();
        let pending = upstream.query(server, &q);
        assert!(timeout(Duration::from_millis(300), pending).await.is_err());
    }

    #[tokio::test]
    async fn replies_for_other_questions_are_rejected() {
        let server = fake_upstream(&[Answer::OtherQuestion]).await;
        let result = UdpUpstream::new().query(server, &question()).await;
        assert!(matches!(result, Err(UpstreamError::Malformed(_))));
    }
}
