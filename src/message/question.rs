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

//! Implementation of types relating to DNS questions.

use std::fmt;

use crate::name::Name;
use crate::rr::Type;

/// The QCLASS value for the Internet class, the only class served.
pub const CLASS_IN: u16 = 1;

/// The question of a DNS query.
///
/// Defined in [RFC 1035 § 4.1.2], a DNS question includes the QNAME,
/// the QTYPE, and the QCLASS. Since [`Name`]s are always canonical, the
/// QNAME here is already absolute and lowercased.
///
/// [RFC 1035 § 4.1.2]: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.2
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Question {
    pub qname: Name,
    pub qtype: Type,
    pub qclass: u16,
}

impl Question {
    /// Creates a class IN question.
    pub fn new(qname: Name, qtype: Type) -> Self {
        Self {
            qname,
            qtype,
            qclass: CLASS_IN,
        }
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.qname, self.qtype)
    }
}
