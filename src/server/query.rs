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

//! The request-handling state machine.
//!
//! Every request is carried by a [`Transaction`] from [`State::Start`]
//! to exactly one terminal state. Each state is handled by one method
//! of [`Server`], which returns the state to move to; moves not in
//! [`TRANSITIONS`] are turned into [`State::Failure`].

use std::net::IpAddr;
use std::sync::Arc;

use log::{debug, warn};
use tokio::time;

use super::forward::{Forwarders, UpstreamError};
use super::Server;
use crate::catalog::{ZoneInfo, ZoneKind};
use crate::message::{Question, Rcode, Response, CLASS_IN};
use crate::model::Soa;
use crate::name::Name;
use crate::rr::{Rdata, Record, Type};

////////////////////////////////////////////////////////////////////////
// STATES                                                             //
////////////////////////////////////////////////////////////////////////

/// A state of the request handler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Start,
    Forbidden,
    CacheCheck,
    Local,
    Recurse,
    Results,
    Done,
    Failure,
    NotFound,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Forbidden | Self::Failure | Self::NotFound)
    }
}

/// The legal moves out of each non-terminal state.
pub const TRANSITIONS: &[(State, &[State])] = &[
    (
        State::Start,
        &[State::CacheCheck, State::Forbidden, State::NotFound, State::Failure],
    ),
    (
        State::CacheCheck,
        &[State::Results, State::Local, State::Recurse, State::Failure],
    ),
    (State::Local, &[State::Results, State::NotFound, State::Failure]),
    (State::Recurse, &[State::Results, State::Failure]),
    (State::Results, &[State::Done, State::Failure]),
];

fn is_allowed(from: State, to: State) -> bool {
    TRANSITIONS
        .iter()
        .find(|(state, _)| *state == from)
        .map_or(false, |(_, targets)| targets.contains(&to))
}

/// Where a request is answered from, decided in [`State::Start`].
enum Route {
    Local(Arc<ZoneInfo>),
    Recurse(Arc<Forwarders>),
}

////////////////////////////////////////////////////////////////////////
// TRANSACTIONS                                                       //
////////////////////////////////////////////////////////////////////////

/// The state of one request as it moves through the handler.
pub struct Transaction {
    question: Question,
    source: IpAddr,
    state: State,
    route: Option<Route>,
    answer_name: Name,
    response: Response,
    outcome: Option<State>,
    trace: Vec<State>,
}

impl Transaction {
    fn new(question: Question, source: IpAddr) -> Self {
        let answer_name = question.qname.clone();
        Self {
            question,
            source,
            state: State::Start,
            route: None,
            answer_name,
            response: Response::default(),
            outcome: None,
            trace: vec![State::Start],
        }
    }

    /// Moves to `next`. Once a terminal state is reached, further moves
    /// are ignored.
    fn goto(&mut self, next: State) {
        if self.state.is_terminal() {
            return;
        }
        let next = if is_allowed(self.state, next) {
            next
        } else {
            warn!(
                "Illegal transition {:?} -> {:?} for {}",
                self.state, next, self.question
            );
            State::Failure
        };
        debug!("{}: {:?} -> {:?}", self.question, self.state, next);
        self.state = next;
        self.trace.push(next);
        if next.is_terminal() {
            self.finish(next);
        }
    }

    /// Records the terminal outcome. Only the first call has any
    /// effect; returns whether this call was it.
    fn finish(&mut self, outcome: State) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    /// Returns the states visited, in order.
    pub fn trace(&self) -> &[State] {
        &self.trace
    }

    pub fn outcome(&self) -> Option<State> {
        self.outcome
    }

    /// Turns the transaction into the response to send.
    pub fn into_response(self) -> Response {
        let mut response = self.response;
        match self.outcome {
            Some(State::Done) => (),
            Some(State::Forbidden) => response.rcode = Rcode::Refused,
            Some(State::NotFound) => response.rcode = Rcode::NxDomain,
            _ => {
                response.rcode = Rcode::ServFail;
                response.answer.clear();
                response.authority.clear();
                response.additional.clear();
            }
        }
        match self.route {
            Some(Route::Local(_)) => {
                response.authoritative = !response.from_cache
                    && matches!(self.outcome, Some(State::Done | State::NotFound));
            }
            Some(Route::Recurse(_)) => response.recursion_available = true,
            None => (),
        }
        response
    }
}

////////////////////////////////////////////////////////////////////////
// STATE HANDLERS                                                     //
////////////////////////////////////////////////////////////////////////

impl Server {
    /// Runs `question` through the state machine.
    pub(super) async fn resolve(&self, question: Question, source: IpAddr) -> Transaction {
        let mut tx = Transaction::new(question, source);
        loop {
            let next = match tx.state {
                State::Start => self.start(&mut tx),
                State::CacheCheck => self.cache_check(&mut tx).await,
                State::Local => self.local(&mut tx).await,
                State::Recurse => self.recurse(&mut tx).await,
                State::Results => self.results(&mut tx),
                State::Done | State::Forbidden | State::Failure | State::NotFound => break,
            };
            tx.goto(next);
        }

        if tx.outcome == Some(State::NotFound) {
            if let Some(Route::Local(ref info)) = tx.route {
                if let Some(soa) = self.zones.soa(&info.name) {
                    tx.response.authority.push(soa_record(&info.name, soa));
                }
            }
        }
        tx
    }

    fn start(&self, tx: &mut Transaction) -> State {
        if tx.question.qclass != CLASS_IN {
            debug!("Refusing {}: unsupported class", tx.question);
            return State::Forbidden;
        }
        if !tx.question.qtype.is_supported() {
            debug!("Rejecting {}: unsupported type", tx.question);
            return State::NotFound;
        }

        match self.catalog.have(&tx.question.qname) {
            Some(info) => {
                let route = match info.kind {
                    ZoneKind::Master => Route::Local(info.clone()),
                    ZoneKind::Forward(ref servers) => {
                        Route::Recurse(self.zone_forwarders(&info.name, servers))
                    }
                };
                tx.route = Some(route);
            }
            None if self.acl.allows_recursion(tx.source) => {
                tx.route = Some(Route::Recurse(self.forwarders.clone()));
            }
            None => {
                debug!("Refusing {} from {}: not served", tx.question, tx.source);
                return State::Forbidden;
            }
        }
        State::CacheCheck
    }

    async fn cache_check(&self, tx: &mut Transaction) -> State {
        match self.cache.lookup(&tx.question).await {
            Ok(Some(records)) => {
                tx.response.answer = records;
                tx.response.from_cache = true;
                return State::Results;
            }
            Ok(None) => (),
            Err(err) => warn!("Cache lookup for {} failed: {err}", tx.question),
        }
        match tx.route {
            Some(Route::Local(_)) => State::Local,
            Some(Route::Recurse(_)) => State::Recurse,
            None => State::Failure,
        }
    }

    async fn local(&self, tx: &mut Transaction) -> State {
        let zone = match tx.route {
            Some(Route::Local(ref info)) => info.name.clone(),
            _ => return State::Failure,
        };
        let qtype = tx.question.qtype;

        if qtype == Type::SOA {
            if let Some(soa) = self.zones.soa(&zone) {
                let record = soa_record(&zone, soa);
                if tx.question.qname == zone {
                    tx.response.answer.push(record);
                } else {
                    tx.response.authority.push(record);
                }
                return State::Results;
            }
        }

        let records = match self.catalog.lookup(&tx.question, &zone).await {
            Ok(records) => records,
            Err(err) => {
                warn!("Lookup of {} in {zone} failed: {err}", tx.question);
                return State::Failure;
            }
        };
        let answer_name = chain_end(&tx.question.qname, qtype, &records);
        let has_resource = self.zones.has_resource(&zone, &answer_name, qtype);
        if records.is_empty() && !has_resource {
            return State::NotFound;
        }
        tx.response.answer = records;
        tx.answer_name = answer_name;
        State::Results
    }

    async fn recurse(&self, tx: &mut Transaction) -> State {
        let forwarders = match tx.route {
            Some(Route::Recurse(ref forwarders)) => forwarders.clone(),
            _ => return State::Failure,
        };
        let Some(server) = forwarders.next() else {
            warn!("No forwarders to send {} to", tx.question);
            return State::Failure;
        };

        debug!("Forwarding {} to {server}", tx.question);
        let query = self.upstream.query(server, &tx.question);
        let result = match time::timeout(self.upstream_timeout, query).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout),
        };

        match result {
            Ok(upstream) => {
                if let Err(err) = self.cache.store(&upstream).await {
                    warn!("Failed to cache the answer for {}: {err}", tx.question);
                }
                tx.response.rcode = upstream.rcode;
                tx.response.answer = upstream.answer;
                tx.response.authority = upstream.authority;
                tx.response.additional = upstream.additional;
                State::Results
            }
            Err(err) => {
                warn!("Forwarding {} to {server} failed: {err}", tx.question);
                State::Failure
            }
        }
    }

    /// Adds the addresses of the selected nodes to authoritative
    /// answers.
    fn results(&self, tx: &mut Transaction) -> State {
        let qtype = tx.question.qtype;
        let zone = match tx.route {
            Some(Route::Local(ref info)) if !tx.response.from_cache && qtype != Type::SOA => {
                info.name.clone()
            }
            _ => return State::Done,
        };

        if let Some(selection) = self.zones.select_nodes(&zone, &tx.answer_name, qtype) {
            debug!(
                "Selected {:?} for {} {qtype}",
                selection.nodes, tx.answer_name
            );
            for address in selection.addresses {
                let rdata = match address {
                    IpAddr::V4(v4) => Rdata::A(v4),
                    IpAddr::V6(v6) => Rdata::Aaaa(v6),
                };
                tx.response
                    .answer
                    .push(Record::new(tx.answer_name.clone(), selection.ttl, rdata));
            }
        }
        State::Done
    }
}

/// Returns the name a CNAME chain starting at `qname` ends at.
fn chain_end(qname: &Name, qtype: Type, records: &[Record]) -> Name {
    let mut current = qname.clone();
    if qtype == Type::CNAME {
        return current;
    }
    for record in records {
        if record.owner == current {
            if let Some(target) = record.rdata.cname_target() {
                current = target.clone();
            }
        }
    }
    current
}

fn soa_record(apex: &Name, soa: Soa) -> Record {
    let ttl = soa.ttl;
    let rdata = Rdata::Soa {
        mname: soa.mname,
        rname: soa.rname,
        serial: soa.serial,
        refresh: soa.refresh,
        retry: soa.retry,
        expire: soa.expire,
        minimum: soa.minimum,
    };
    Record::new(apex.clone(), ttl, rdata)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn question() -> Question {
        Question::new("www.example.com.".parse().unwrap(), Type::A)
    }

    fn source() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn every_live_state_can_fail() {
        for (state, targets) in TRANSITIONS {
            assert!(!state.is_terminal());
            assert!(targets.contains(&State::Failure));
        }
    }

    #[test]
    fn illegal_moves_become_failures() {
        let mut tx = Transaction::new(question(), source());
        tx.goto(State::Results);
        assert_eq!(tx.outcome(), Some(State::Failure));
        assert_eq!(tx.trace(), [State::Start, State::Failure]);
        assert_eq!(tx.into_response().rcode, Rcode::ServFail);
    }

    #[test]
    fn outcome_is_only_recorded_once() {
        let mut tx = Transaction::new(question(), source());
        tx.goto(State::Forbidden);
        tx.goto(State::CacheCheck);
        assert!(!tx.finish(State::Done));
        assert_eq!(tx.outcome(), Some(State::Forbidden));
        assert_eq!(tx.trace(), [State::Start, State::Forbidden]);
        assert_eq!(tx.into_response().rcode, Rcode::Refused);
    }

    #[test]
    fn failure_clears_records() {
        let mut tx = Transaction::new(question(), source());
        tx.response.answer.push(Record::new(
            "www.example.com.".parse().unwrap(),
            60,
            Rdata::A("192.0.2.1".parse().unwrap()),
        ));
        tx.goto(State::Failure);
        let response = tx.into_response();
        assert_eq!(response.rcode, Rcode::ServFail);
        assert!(response.answer.is_empty());
    }

    #[test]
    fn chain_end_follows_cnames_in_order() {
        let zone: Name = "example.com.".parse().unwrap();
        let cname = |owner: &str, target: &str| {
            Record::new(
                owner.parse().unwrap(),
                60,
                Rdata::parse(Type::CNAME, target, &zone).unwrap(),
            )
        };
        let records = [
            cname("a.example.com.", "b"),
            cname("b.example.com.", "c"),
        ];
        let qname: Name = "a.example.com.".parse().unwrap();
        assert_eq!(
            chain_end(&qname, Type::A, &records),
            "c.example.com.".parse().unwrap()
        );
        assert_eq!(chain_end(&qname, Type::CNAME, &records), qname);
    }
}
