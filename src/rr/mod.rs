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

//! Data structures and routines for handling DNS resource records.

use std::fmt;

use crate::name::{self, Name};

pub mod rdata;
mod rr_type;
pub use rdata::Rdata;
pub use rr_type::Type;

////////////////////////////////////////////////////////////////////////
// RECORDS                                                            //
////////////////////////////////////////////////////////////////////////

/// A resource record held by the record store or placed in a response.
///
/// Only class IN is served, so no class is carried. Records stored by
/// the response cache carry an absolute expiry time in milliseconds
/// since the UNIX epoch; authoritative records never expire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub owner: Name,
    pub ttl: u32,
    pub rdata: Rdata,
    pub expires: Option<u64>,
}

impl Record {
    /// Creates a non-expiring record.
    pub fn new(owner: Name, ttl: u32, rdata: Rdata) -> Self {
        Self {
            owner,
            ttl,
            rdata,
            expires: None,
        }
    }

    /// Returns the record's type.
    pub fn rr_type(&self) -> Type {
        self.rdata.rr_type()
    }

    /// Returns whether the record has an expiry time before `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires.map_or(false, |expires| expires < now)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} IN {} {}",
            self.owner,
            self.ttl,
            self.rr_type(),
            self.rdata
        )
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that record text could not be parsed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    UnknownType(String),
    UnsupportedType(Type),
    MissingField(Type),
    TrailingData(Type),
    InvalidField { rr_type: Type, field: &'static str },
    InvalidName(name::Error),
    UnterminatedString,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownType(text) => write!(f, "unknown RR type {text}"),
            Self::UnsupportedType(rr_type) => write!(f, "RR type {rr_type} is not supported"),
            Self::MissingField(rr_type) => write!(f, "{rr_type} RDATA is missing a field"),
            Self::TrailingData(rr_type) => write!(f, "{rr_type} RDATA has trailing data"),
            Self::InvalidField { rr_type, field } => {
                write!(f, "{rr_type} RDATA has an invalid {field}")
            }
            Self::InvalidName(_) => f.write_str("RDATA contains an invalid domain name"),
            Self::UnterminatedString => f.write_str("unterminated quoted string"),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidName(err) => Some(err),
            _ => None,
        }
    }
}
