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

//! Provides the [`Type`] structure for DNS RR types.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserialize, Deserializer, Visitor};
use serde::{Serialize, Serializer};

use crate::util::Caseless;

////////////////////////////////////////////////////////////////////////
// RR TYPES                                                           //
////////////////////////////////////////////////////////////////////////

/// Represents the RR type of a DNS record.
///
/// An RR type is represented on the wire as an unsigned 16-bit integer.
/// Hence this is basically a wrapper around `u16` with nice
/// [`Debug`](fmt::Debug), [`Display`](fmt::Display), and [`FromStr`]
/// implementations for working with the common textual representations
/// of RR types. In addition, constants for the RR types that the server
/// can hold (e.g. [`Type::A`]) are provided.
///
/// Zone snapshots may give a type either as its mnemonic or as its
/// numeric value; the [`Deserialize`] implementation accepts both, and
/// [`Serialize`] always produces the mnemonic.
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Type(u16);

impl Type {
    pub const A: Type = Type(1);
    pub const NS: Type = Type(2);
    pub const CNAME: Type = Type(5);
    pub const SOA: Type = Type(6);
    pub const PTR: Type = Type(12);
    pub const MX: Type = Type(15);
    pub const TXT: Type = Type(16);
    pub const AAAA: Type = Type(28);
    pub const SRV: Type = Type(33);
    pub const ANY: Type = Type(255);

    /// Returns whether records of this type can be stored and served.
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            Self::A
                | Self::NS
                | Self::CNAME
                | Self::SOA
                | Self::PTR
                | Self::MX
                | Self::TXT
                | Self::AAAA
                | Self::SRV
        )
    }

    /// Returns whether this is an address type (A or AAAA), i.e. a type
    /// that node addresses can be answered with.
    pub fn is_address(self) -> bool {
        self == Self::A || self == Self::AAAA
    }
}

/// The mnemonics of the types that have them.
const MNEMONICS: &[(&str, Type)] = &[
    ("A", Type::A),
    ("NS", Type::NS),
    ("CNAME", Type::CNAME),
    ("SOA", Type::SOA),
    ("PTR", Type::PTR),
    ("MX", Type::MX),
    ("TXT", Type::TXT),
    ("AAAA", Type::AAAA),
    ("SRV", Type::SRV),
    ("ANY", Type::ANY),
];

impl From<u16> for Type {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<Type> for u16 {
    fn from(rr_type: Type) -> Self {
        rr_type.0
    }
}

impl FromStr for Type {
    type Err = &'static str;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if let Some((_, rr_type)) = MNEMONICS
            .iter()
            .find(|(mnemonic, _)| Caseless(mnemonic) == Caseless(text))
        {
            Ok(*rr_type)
        } else if text
            .get(0..4)
            .map_or(false, |prefix| prefix.eq_ignore_ascii_case("TYPE"))
        {
            text[4..]
                .parse::<u16>()
                .map(Self::from)
                .or(Err("type value is not a valid unsigned 16-bit integer"))
        } else {
            Err("unknown type")
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match MNEMONICS.iter().find(|(_, rr_type)| rr_type == self) {
            Some((mnemonic, _)) => f.write_str(mnemonic),
            None => write!(f, "TYPE{}", self.0), // RFC 3597 § 5
        }
    }
}

impl Serialize for Type {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TypeVisitor)
    }
}

struct TypeVisitor;

impl<'de> Visitor<'de> for TypeVisitor {
    type Value = Type;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an RR type mnemonic or number")
    }

    fn visit_str<E: de::Error>(self, text: &str) -> Result<Type, E> {
        text.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Type, E> {
        u16::try_from(value)
            .map(Type::from)
            .map_err(|_| E::custom("type value is not a valid unsigned 16-bit integer"))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Type, E> {
        u16::try_from(value)
            .map(Type::from)
            .map_err(|_| E::custom("type value is not a valid unsigned 16-bit integer"))
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_displays_according_to_rfc3597() {
        // TYPE65280 is from the private use range, so it should always
        // be unknown.
        let rr_type = Type::from(0xff00);
        assert_eq!(rr_type.to_string(), "TYPE65280");
    }

    #[test]
    fn type_parses_according_to_rfc3597() {
        let type_a: Type = "TYPE1".parse().unwrap();
        let type_65280: Type = "TYPE65280".parse().unwrap();
        assert_eq!(type_a, Type::A);
        assert_eq!(u16::from(type_65280), 65280);
        assert_eq!("aaaa".parse::<Type>(), Ok(Type::AAAA));
    }

    #[test]
    fn type_deserializes_from_mnemonic_or_number() {
        let types: Vec<Type> = serde_json::from_str(r#"["cname", 28, "TYPE33"]"#).unwrap();
        assert_eq!(types, [Type::CNAME, Type::AAAA, Type::SRV]);
        assert_eq!(serde_json::to_string(&Type::MX).unwrap(), r#""MX""#);
        assert!(serde_json::from_str::<Type>("70000").is_err());
    }

    #[test]
    fn supported_types() {
        assert!(Type::SRV.is_supported());
        assert!(!Type::ANY.is_supported());
        assert!(!Type::from(99).is_supported());
        assert!(Type::AAAA.is_address());
        assert!(!Type::CNAME.is_address());
    }
}
