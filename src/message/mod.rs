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

//! The decoded request/response object model.
//!
//! Wire encoding and decoding happen in [`crate::io::codec`]; the rest
//! of the server only ever sees these types.

use std::net::IpAddr;

use crate::rr::Record;

mod question;
mod rcode;
pub use question::{Question, CLASS_IN};
pub use rcode::{IntoRcodeError, Rcode};

/// A decoded query together with the address it came from.
#[derive(Clone, Debug)]
pub struct Request {
    pub questions: Vec<Question>,
    pub source: IpAddr,
    pub recursion_desired: bool,
}

impl Request {
    pub fn new(question: Question, source: IpAddr) -> Self {
        Self {
            questions: vec![question],
            source,
            recursion_desired: true,
        }
    }
}

/// A response under construction, or a decoded upstream response.
#[derive(Clone, Debug)]
pub struct Response {
    pub rcode: Rcode,
    pub authoritative: bool,
    pub recursion_available: bool,
    pub from_cache: bool,
    pub answer: Vec<Record>,
    pub authority: Vec<Record>,
    pub additional: Vec<Record>,
}

impl Response {
    pub fn new(rcode: Rcode) -> Self {
        Self {
            rcode,
            authoritative: false,
            recursion_available: false,
            from_cache: false,
            answer: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// Iterates over the records of all three sections.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.answer
            .iter()
            .chain(self.authority.iter())
            .chain(self.additional.iter())
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(Rcode::NoError)
    }
}
