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

//! Conversion between DNS wire messages and the server's object model.
//!
//! Wire parsing and serialization are done by `hickory-proto`; this
//! module only maps its types onto [`Request`], [`Response`], and
//! [`Record`]. Records of types the server does not hold are dropped
//! when decoding.

use std::fmt;
use std::net::IpAddr;

use hickory_proto::error::ProtoError;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA, CNAME, MX, NS, PTR, SOA, SRV, TXT};
use hickory_proto::rr::{self as wire, RData, RecordType};

use crate::message::{Question, Rcode, Request, Response};
use crate::name::Name;
use crate::rr::{Rdata, Record, Type};

/// The largest response sent over UDP without EDNS.
pub const MAX_UDP_PAYLOAD: usize = 512;

////////////////////////////////////////////////////////////////////////
// REQUESTS                                                           //
////////////////////////////////////////////////////////////////////////

/// A decoded query message: the [`Request`] plus the header data that
/// the response must echo.
#[derive(Clone, Debug)]
pub struct Incoming {
    pub id: u16,
    pub op_code: OpCode,
    pub request: Request,
    queries: Vec<Query>,
}

impl Incoming {
    /// Returns whether the message is a standard query, the only
    /// opcode the server implements.
    pub fn is_standard_query(&self) -> bool {
        self.op_code == OpCode::Query
    }
}

/// Decodes a query received from `source`.
pub fn decode_request(bytes: &[u8], source: IpAddr) -> Result<Incoming, Error> {
    let message = Message::from_vec(bytes)?;
    if message.message_type() != MessageType::Query {
        return Err(Error::NotAQuery);
    }

    let questions = questions_from_wire(&message)?;
    Ok(Incoming {
        id: message.id(),
        op_code: message.op_code(),
        request: Request {
            questions,
            source,
            recursion_desired: message.recursion_desired(),
        },
        queries: message.queries().to_vec(),
    })
}

fn questions_from_wire(message: &Message) -> Result<Vec<Question>, Error> {
    message
        .queries()
        .iter()
        .map(|query| -> Result<Question, Error> {
            Ok(Question {
                qname: from_wire_name(query.name())?,
                qtype: Type::from(u16::from(query.query_type())),
                qclass: u16::from(query.query_class()),
            })
        })
        .collect()
}

/// Encodes the response to `incoming`. When the encoded message would
/// exceed `max_len`, the records are left out and the TC bit is set so
/// that the client retries over TCP.
pub fn encode_response(
    incoming: &Incoming,
    response: &Response,
    max_len: Option<usize>,
) -> Result<Vec<u8>, Error> {
    let bytes = response_message(incoming, response, true)?.to_vec()?;
    match max_len {
        Some(max_len) if bytes.len() > max_len => {
            let mut message = response_message(incoming, response, false)?;
            message.set_truncated(true);
            Ok(message.to_vec()?)
        }
        _ => Ok(bytes),
    }
}

fn response_message(
    incoming: &Incoming,
    response: &Response,
    with_records: bool,
) -> Result<Message, Error> {
    let mut message = Message::new();
    message
        .set_id(incoming.id)
        .set_message_type(MessageType::Response)
        .set_op_code(incoming.op_code)
        .set_authoritative(response.authoritative)
        .set_recursion_desired(incoming.request.recursion_desired)
        .set_recursion_available(response.recursion_available)
        .set_response_code(to_wire_rcode(response.rcode));
    if let Some(query) = incoming.queries.first() {
        message.add_query(query.clone());
    }
    if with_records {
        for record in &response.answer {
            message.add_answer(to_wire(record)?);
        }
        for record in &response.authority {
            message.add_name_server(to_wire(record)?);
        }
        for record in &response.additional {
            message.add_additional(to_wire(record)?);
        }
    }
    Ok(message)
}

////////////////////////////////////////////////////////////////////////
// UPSTREAM QUERIES                                                   //
////////////////////////////////////////////////////////////////////////

/// Encodes a recursive query for `question` with message ID `id`.
pub fn encode_query(id: u16, question: &Question) -> Result<Vec<u8>, Error> {
    let query = Query::query(
        to_wire_name(&question.qname)?,
        RecordType::from(u16::from(question.qtype)),
    );
    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(query);
    Ok(message.to_vec()?)
}

/// A decoded upstream response, with the header data needed to match
/// it to the query it answers.
#[derive(Clone, Debug)]
pub struct UpstreamReply {
    pub id: u16,
    pub questions: Vec<Question>,
    pub response: Response,
}

impl UpstreamReply {
    /// Returns whether this reply echoes exactly `question`, the
    /// only question an upstream query carries.
    pub fn echoes(&self, question: &Question) -> bool {
        self.questions.len() == 1 && self.questions[0] == *question
    }
}

/// Decodes an upstream response.
pub fn decode_response(bytes: &[u8]) -> Result<UpstreamReply, Error> {
    let message = Message::from_vec(bytes)?;
    if message.message_type() != MessageType::Response {
        return Err(Error::NotAResponse);
    }

    let rcode = u8::try_from(u16::from(message.response_code()))
        .ok()
        .and_then(|value| Rcode::try_from(value).ok())
        .unwrap_or(Rcode::ServFail);
    let mut response = Response::new(rcode);
    response.recursion_available = message.recursion_available();
    response.answer = message.answers().iter().filter_map(from_wire).collect();
    response.authority = message.name_servers().iter().filter_map(from_wire).collect();
    response.additional = message.additionals().iter().filter_map(from_wire).collect();
    Ok(UpstreamReply {
        id: message.id(),
        questions: questions_from_wire(&message)?,
        response,
    })
}

////////////////////////////////////////////////////////////////////////
// RECORD CONVERSION                                                  //
////////////////////////////////////////////////////////////////////////

fn to_wire_rcode(rcode: Rcode) -> ResponseCode {
    <ResponseCode as From<u16>>::from(u16::from(u8::from(rcode)))
}

fn to_wire_name(name: &Name) -> Result<wire::Name, Error> {
    wire::Name::from_ascii(name.as_str()).map_err(|_| Error::InvalidName(name.to_string()))
}

fn from_wire_name(name: &wire::Name) -> Result<Name, Error> {
    let text = name.to_ascii();
    Name::qualify(&text, &Name::root()).map_err(|_| Error::InvalidName(text))
}

/// Converts a record to its `hickory-proto` form.
pub fn to_wire(record: &Record) -> Result<wire::Record, Error> {
    let rdata = match record.rdata {
        Rdata::A(address) => RData::A(A(address)),
        Rdata::Aaaa(address) => RData::AAAA(AAAA(address)),
        Rdata::Cname(ref target) => RData::CNAME(CNAME(to_wire_name(target)?)),
        Rdata::Ns(ref target) => RData::NS(NS(to_wire_name(target)?)),
        Rdata::Ptr(ref target) => RData::PTR(PTR(to_wire_name(target)?)),
        Rdata::Mx {
            preference,
            ref exchange,
        } => RData::MX(MX::new(preference, to_wire_name(exchange)?)),
        Rdata::Txt(ref strings) => RData::TXT(TXT::new(strings.clone())),
        Rdata::Soa {
            ref mname,
            ref rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        } => RData::SOA(SOA::new(
            to_wire_name(mname)?,
            to_wire_name(rname)?,
            serial,
            clamp_i32(refresh),
            clamp_i32(retry),
            clamp_i32(expire),
            minimum,
        )),
        Rdata::Srv {
            priority,
            weight,
            port,
            ref target,
        } => RData::SRV(SRV::new(priority, weight, port, to_wire_name(target)?)),
    };
    Ok(wire::Record::from_rdata(
        to_wire_name(&record.owner)?,
        record.ttl,
        rdata,
    ))
}

/// Converts a `hickory-proto` record, if its type is one the server
/// can hold.
pub fn from_wire(record: &wire::Record) -> Option<Record> {
    let name = |name: &wire::Name| from_wire_name(name).ok();
    let rdata = match record.data()? {
        RData::A(address) => Rdata::A(address.0),
        RData::AAAA(address) => Rdata::Aaaa(address.0),
        RData::CNAME(target) => Rdata::Cname(name(&target.0)?),
        RData::NS(target) => Rdata::Ns(name(&target.0)?),
        RData::PTR(target) => Rdata::Ptr(name(&target.0)?),
        RData::MX(mx) => Rdata::Mx {
            preference: mx.preference(),
            exchange: name(mx.exchange())?,
        },
        RData::TXT(txt) => Rdata::Txt(
            txt.txt_data()
                .iter()
                .map(|data| String::from_utf8_lossy(data).into_owned())
                .collect(),
        ),
        RData::SOA(soa) => Rdata::Soa {
            mname: name(soa.mname())?,
            rname: name(soa.rname())?,
            serial: soa.serial(),
            refresh: u32::try_from(soa.refresh()).unwrap_or(0),
            retry: u32::try_from(soa.retry()).unwrap_or(0),
            expire: u32::try_from(soa.expire()).unwrap_or(0),
            minimum: soa.minimum(),
        },
        RData::SRV(srv) => Rdata::Srv {
            priority: srv.priority(),
            weight: srv.weight(),
            port: srv.port(),
            target: name(srv.target())?,
        },
        _ => return None,
    };
    Some(Record::new(name(record.name())?, record.ttl(), rdata))
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a message could not be decoded or encoded.
#[derive(Debug)]
pub enum Error {
    Proto(ProtoError),
    NotAQuery,
    NotAResponse,
    InvalidName(String),
}

impl From<ProtoError> for Error {
    fn from(err: ProtoError) -> Self {
        Self::Proto(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Proto(err) => write!(f, "malformed message: {err}"),
            Self::NotAQuery => f.write_str("message is not a query"),
            Self::NotAResponse => f.write_str("message is not a response"),
            Self::InvalidName(name) => write!(f, "domain name {name} cannot be represented"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Proto(err) => Some(err),
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

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn source() -> IpAddr {
        "192.0.2.100".parse().unwrap()
    }

    #[test]
    fn queries_decode_into_requests() {
        let question = Question::new(name("WWW.Example.com."), Type::AAAA);
        let bytes = encode_query(0xbeef, &question).unwrap();
        let incoming = decode_request(&bytes, source()).unwrap();
        assert_eq!(incoming.id, 0xbeef);
        assert!(incoming.is_standard_query());
        assert!(incoming.request.recursion_desired);
        assert_eq!(incoming.request.source, source());
        assert_eq!(incoming.request.questions, [question]);
        assert_eq!(incoming.request.questions[0].qname.as_str(), "www.example.com.");
    }

    #[test]
    fn responses_keep_sections_and_flags() {
        let question = Question::new(name("example.com."), Type::MX);
        let incoming = decode_request(&encode_query(7, &question).unwrap(), source()).unwrap();

        let zone = name("example.com.");
        let mut response = Response::new(Rcode::NoError);
        response.authoritative = true;
        response.answer.push(Record::new(
            zone.clone(),
            300,
            Rdata::parse(Type::MX, "10 mail", &zone).unwrap(),
        ));
        response.authority.push(Record::new(
            zone.clone(),
            300,
            Rdata::parse(Type::NS, "ns1", &zone).unwrap(),
        ));
        response.additional.push(Record::new(
            name("mail.example.com."),
            60,
            Rdata::parse(Type::TXT, "\"a b\" c", &zone).unwrap(),
        ));

        let bytes = encode_response(&incoming, &response, None).unwrap();
        let message = Message::from_vec(&bytes).unwrap();
        assert!(message.authoritative());
        assert_eq!(message.id(), 7);
        assert_eq!(message.queries().len(), 1);

        let reply = decode_response(&bytes).unwrap();
        assert_eq!(reply.id, 7);
        assert!(reply.echoes(&incoming.request.questions[0]));
        let decoded = reply.response;
        assert_eq!(decoded.rcode, Rcode::NoError);
        assert_eq!(decoded.answer, response.answer);
        assert_eq!(decoded.authority, response.authority);
        assert_eq!(decoded.additional, response.additional);
    }

    #[test]
    fn soa_and_srv_survive_the_wire() {
        let zone = name("example.com.");
        for (rr_type, text) in [
            (Type::SOA, "ns1 admin 2024 3600 1200 1209600 300"),
            (Type::SRV, "10 20 5060 sip"),
        ] {
            let record = Record::new(zone.clone(), 60, Rdata::parse(rr_type, text, &zone).unwrap());
            assert_eq!(from_wire(&to_wire(&record).unwrap()), Some(record));
        }
    }

    #[test]
    fn rcodes_map_to_the_wire() {
        assert_eq!(to_wire_rcode(Rcode::Refused), ResponseCode::Refused);
        assert_eq!(to_wire_rcode(Rcode::NxDomain), ResponseCode::NXDomain);
        assert_eq!(to_wire_rcode(Rcode::ServFail), ResponseCode::ServFail);
    }

    #[test]
    fn oversized_udp_responses_are_truncated() {
        let question = Question::new(name("big.example.com."), Type::TXT);
        let incoming = decode_request(&encode_query(1, &question).unwrap(), source()).unwrap();
        let mut response = Response::new(Rcode::NoError);
        for i in 0..10 {
            response.answer.push(Record::new(
                question.qname.clone(),
                60,
                Rdata::Txt(vec![format!("{i}").repeat(200)]),
            ));
        }

        let bytes = encode_response(&incoming, &response, Some(MAX_UDP_PAYLOAD)).unwrap();
        assert!(bytes.len() <= MAX_UDP_PAYLOAD);
        let message = Message::from_vec(&bytes).unwrap();
        assert!(message.truncated());
        assert!(message.answers().is_empty());

        let bytes = encode_response(&incoming, &response, None).unwrap();
        assert_eq!(Message::from_vec(&bytes).unwrap().answers().len(), 10);
    }

    #[test]
    fn responses_are_not_requests() {
        let question = Question::new(name("example.com."), Type::A);
        let incoming = decode_request(&encode_query(1, &question).unwrap(), source()).unwrap();
        let bytes = encode_response(&incoming, &Response::default(), None).unwrap();
        assert!(matches!(
            decode_request(&bytes, source()),
            Err(Error::NotAQuery)
        ));
        assert!(matches!(
            decode_response(&encode_query(1, &question).unwrap()),
            Err(Error::NotAResponse)
        ));
        assert!(matches!(decode_request(&[0, 1], source()), Err(Error::Proto(_))));
    }
}
