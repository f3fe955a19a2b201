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

//! Record data in the presentation format used by zone files and zone
//! snapshots.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use super::{ParseError, Type};
use crate::name::Name;

/// The maximum length of a single TXT character-string.
const MAX_CHARACTER_STRING_LEN: usize = 255;

/// The RDATA of a record whose type the server can hold.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Rdata {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(Name),
    Ns(Name),
    Ptr(Name),
    Mx {
        preference: u16,
        exchange: Name,
    },
    Txt(Vec<String>),
    Soa {
        mname: Name,
        rname: Name,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: Name,
    },
}

impl Rdata {
    /// Returns the RR type this RDATA belongs to.
    pub fn rr_type(&self) -> Type {
        match self {
            Self::A(_) => Type::A,
            Self::Aaaa(_) => Type::AAAA,
            Self::Cname(_) => Type::CNAME,
            Self::Ns(_) => Type::NS,
            Self::Ptr(_) => Type::PTR,
            Self::Mx { .. } => Type::MX,
            Self::Txt(_) => Type::TXT,
            Self::Soa { .. } => Type::SOA,
            Self::Srv { .. } => Type::SRV,
        }
    }

    /// Returns the canonical name a CNAME record points to.
    pub fn cname_target(&self) -> Option<&Name> {
        match self {
            Self::Cname(target) => Some(target),
            _ => None,
        }
    }

    /// Parses presentation-format RDATA text such as `10 mail` or
    /// `"v=spf1" "-all"`. Relative domain names are qualified against
    /// `origin`.
    pub fn parse(rr_type: Type, text: &str, origin: &Name) -> Result<Self, ParseError> {
        let fields = split_fields(text)?;
        let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
        Self::from_fields(rr_type, &fields, origin)
    }

    /// Builds RDATA from fields that have already been split (and, for
    /// TXT, unquoted).
    pub fn from_fields(rr_type: Type, fields: &[&str], origin: &Name) -> Result<Self, ParseError> {
        let mut reader = Fields {
            rr_type,
            fields: fields.iter(),
            origin,
        };
        let rdata = match rr_type {
            Type::A => Self::A(reader.parse("IPv4 address")?),
            Type::AAAA => Self::Aaaa(reader.parse("IPv6 address")?),
            Type::CNAME => Self::Cname(reader.name()?),
            Type::NS => Self::Ns(reader.name()?),
            Type::PTR => Self::Ptr(reader.name()?),
            Type::MX => Self::Mx {
                preference: reader.parse("preference")?,
                exchange: reader.name()?,
            },
            Type::TXT => {
                let strings: Vec<String> = reader.fields.by_ref().map(|s| s.to_string()).collect();
                if strings.is_empty() {
                    return Err(ParseError::MissingField(rr_type));
                } else if strings.iter().any(|s| s.len() > MAX_CHARACTER_STRING_LEN) {
                    return Err(ParseError::InvalidField {
                        rr_type,
                        field: "character-string",
                    });
                }
                Self::Txt(strings)
            }
            Type::SOA => Self::Soa {
                mname: reader.name()?,
                rname: reader.name()?,
                serial: reader.parse("serial")?,
                refresh: reader.parse("refresh")?,
                retry: reader.parse("retry")?,
                expire: reader.parse("expire")?,
                minimum: reader.parse("minimum")?,
            },
            Type::SRV => Self::Srv {
                priority: reader.parse("priority")?,
                weight: reader.parse("weight")?,
                port: reader.parse("port")?,
                target: reader.name()?,
            },
            _ => return Err(ParseError::UnsupportedType(rr_type)),
        };

        if reader.fields.next().is_some() {
            Err(ParseError::TrailingData(rr_type))
        } else {
            Ok(rdata)
        }
    }
}

/// Pulls typed fields off a field list for a particular RR type.
struct Fields<'a, 'b> {
    rr_type: Type,
    fields: std::slice::Iter<'a, &'b str>,
    origin: &'a Name,
}

impl Fields<'_, '_> {
    fn next(&mut self) -> Result<&str, ParseError> {
        self.fields
            .next()
            .copied()
            .ok_or(ParseError::MissingField(self.rr_type))
    }

    fn parse<T: std::str::FromStr>(&mut self, field: &'static str) -> Result<T, ParseError> {
        let rr_type = self.rr_type;
        self.next()?
            .parse()
            .map_err(|_| ParseError::InvalidField { rr_type, field })
    }

    fn name(&mut self) -> Result<Name, ParseError> {
        let origin = self.origin;
        Name::qualify(self.next()?, origin).map_err(ParseError::InvalidName)
    }
}

/// Splits RDATA text on whitespace, treating double-quoted strings
/// (with backslash escapes) as single fields.
pub fn split_fields(text: &str) -> Result<Vec<String>, ParseError> {
    let mut fields = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut field = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some(escaped) => field.push(escaped),
                        None => return Err(ParseError::UnterminatedString),
                    },
                    Some(c) => field.push(c),
                    None => return Err(ParseError::UnterminatedString),
                }
            }
            fields.push(field);
        } else {
            let mut field = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                field.push(c);
                chars.next();
            }
            fields.push(field);
        }
    }
    Ok(fields)
}

impl fmt::Display for Rdata {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::A(address) => write!(f, "{address}"),
            Self::Aaaa(address) => write!(f, "{address}"),
            Self::Cname(name) | Self::Ns(name) | Self::Ptr(name) => write!(f, "{name}"),
            Self::Mx {
                preference,
                exchange,
            } => write!(f, "{preference} {exchange}"),
            Self::Txt(strings) => {
                for (i, string) in strings.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    f.write_str("\"")?;
                    for c in string.chars() {
                        if c == '"' || c == '\\' {
                            f.write_str("\\")?;
                        }
                        write!(f, "{c}")?;
                    }
                    f.write_str("\"")?;
                }
                Ok(())
            }
            Self::Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => write!(
                f,
                "{mname} {rname} {serial} {refresh} {retry} {expire} {minimum}"
            ),
            Self::Srv {
                priority,
                weight,
                port,
                target,
            } => write!(f, "{priority} {weight} {port} {target}"),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        static ref ORIGIN: Name = "example.com.".parse().unwrap();
    }

    #[test]
    fn parses_names_relative_to_origin() {
        let rdata = Rdata::parse(Type::MX, "10 Mail", &ORIGIN).unwrap();
        assert_eq!(
            rdata,
            Rdata::Mx {
                preference: 10,
                exchange: "mail.example.com.".parse().unwrap(),
            }
        );
        assert_eq!(rdata.to_string(), "10 mail.example.com.");
    }

    #[test]
    fn parses_quoted_txt_strings() {
        let rdata = Rdata::parse(Type::TXT, r#""v=spf1 -all" "say \"hi\"""#, &ORIGIN).unwrap();
        assert_eq!(
            rdata,
            Rdata::Txt(vec!["v=spf1 -all".into(), "say \"hi\"".into()])
        );
        assert_eq!(rdata.to_string(), r#""v=spf1 -all" "say \"hi\"""#);
        assert_eq!(
            Rdata::parse(Type::TXT, "\"open", &ORIGIN),
            Err(ParseError::UnterminatedString)
        );
    }

    #[test]
    fn parses_soa_and_srv() {
        let soa = Rdata::parse(Type::SOA, "ns1 admin 7 3600 600 86400 300", &ORIGIN).unwrap();
        assert_eq!(soa.rr_type(), Type::SOA);
        assert_eq!(
            soa.to_string(),
            "ns1.example.com. admin.example.com. 7 3600 600 86400 300"
        );
        let srv = Rdata::parse(Type::SRV, "0 5 5060 sip.example.net.", &ORIGIN).unwrap();
        assert_eq!(srv.to_string(), "0 5 5060 sip.example.net.");
    }

    #[test]
    fn rejects_bad_rdata() {
        assert_eq!(
            Rdata::parse(Type::A, "300.1.1.1", &ORIGIN),
            Err(ParseError::InvalidField {
                rr_type: Type::A,
                field: "IPv4 address",
            })
        );
        assert_eq!(
            Rdata::parse(Type::A, "", &ORIGIN),
            Err(ParseError::MissingField(Type::A))
        );
        assert_eq!(
            Rdata::parse(Type::CNAME, "a.example. b.example.", &ORIGIN),
            Err(ParseError::TrailingData(Type::CNAME))
        );
        assert_eq!(
            Rdata::parse(Type::from(99), "x", &ORIGIN),
            Err(ParseError::UnsupportedType(Type::from(99)))
        );
    }
}
