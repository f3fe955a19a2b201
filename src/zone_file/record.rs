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

//! Parsing of zone file records.

use std::io::BufRead;

use super::reader::{Field, LogicalLine};
use super::{Error, ErrorKind, LineContent, ParsedRecord, Parser, Result};
use crate::name::Name;
use crate::rr::{Rdata, Type};
use crate::util::Caseless;

/// The classes that may appear in a zone file. Only IN is served.
const CLASSES: &[&str] = &["IN", "CH", "CS", "HS"];

impl<S: BufRead> Parser<S> {
    /// Parses a record line: an optional owner, then an optional TTL
    /// and class in either order, then the type and RDATA.
    pub(super) fn parse_record(&mut self, line: &LogicalLine) -> Result<LineContent> {
        let mut fields = line.fields.iter().peekable();

        let owner = if line.blank_owner {
            self.context.previous_owner.clone().ok_or_else(|| {
                Error::new(
                    line.fields[0].position,
                    ErrorKind::EmptyOwnerWithNoPrevious,
                )
            })?
        } else {
            let field = fields
                .next()
                .ok_or_else(|| Error::new(line.end(), ErrorKind::ExpectedName))?;
            self.parse_name(field)?
        };

        let mut ttl = None;
        let mut class_seen = false;
        let rr_type = loop {
            let field = fields
                .next()
                .ok_or_else(|| Error::new(line.end(), ErrorKind::ExpectedType))?;
            if !class_seen && is_class(&field.text) {
                if Caseless(&field.text) != Caseless("IN") {
                    return Err(Error::new(
                        field.position,
                        ErrorKind::UnsupportedClass(field.text.clone()),
                    ));
                }
                class_seen = true;
            } else if ttl.is_none() && starts_with_digit(&field.text) {
                ttl = Some(
                    parse_ttl(&field.text)
                        .ok_or_else(|| Error::new(field.position, ErrorKind::InvalidTtl))?,
                );
            } else {
                break parse_type(field)?;
            }
        };

        let rdata_fields: Vec<&Field> = fields.collect();
        let rdata = self.parse_rdata(rr_type, &rdata_fields, line)?;

        if ttl.is_some() {
            self.context.previous_ttl = ttl;
        }
        let ttl = ttl.or(self.context.default_ttl).or(self.context.previous_ttl);
        self.context.previous_owner = Some(owner.clone());

        Ok(LineContent::Record(ParsedRecord {
            owner,
            ttl,
            rr_type,
            rdata,
        }))
    }

    fn parse_name(&self, field: &Field) -> Result<Name> {
        Name::qualify(&field.text, &self.context.origin)
            .map_err(|err| Error::new(field.position, ErrorKind::InvalidName(err)))
    }

    fn parse_rdata(&self, rr_type: Type, fields: &[&Field], line: &LogicalLine) -> Result<Rdata> {
        let position = fields.first().map_or_else(|| line.end(), |f| f.position);
        let mut texts: Vec<String> = fields.iter().map(|f| f.text.clone()).collect();

        // SOA timers may carry units like TTLs do.
        if rr_type == Type::SOA {
            for (i, text) in texts.iter_mut().enumerate().skip(3) {
                if let Some(seconds) = parse_ttl(text) {
                    *text = seconds.to_string();
                } else {
                    return Err(Error::new(fields[i].position, ErrorKind::InvalidTtl));
                }
            }
        }

        let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
        Rdata::from_fields(rr_type, &texts, &self.context.origin)
            .map_err(|err| Error::new(position, ErrorKind::InvalidRdata(err)))
    }
}

fn is_class(text: &str) -> bool {
    CLASSES.iter().any(|class| Caseless(class) == Caseless(text))
}

fn starts_with_digit(text: &str) -> bool {
    text.chars().next().map_or(false, |c| c.is_ascii_digit())
}

fn parse_type(field: &Field) -> Result<Type> {
    let rr_type: Type = field
        .text
        .parse()
        .map_err(|err| Error::new(field.position, ErrorKind::InvalidType(err)))?;
    if rr_type.is_supported() {
        Ok(rr_type)
    } else {
        Err(Error::new(
            field.position,
            ErrorKind::UnsupportedType(field.text.clone()),
        ))
    }
}

/// Parses a TTL, either as plain seconds or in the BIND unit form
/// (`1w2d`, `1h30m`, `90s`; units are case-insensitive).
pub(super) fn parse_ttl(text: &str) -> Option<u32> {
    if text.is_empty() {
        return None;
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse().ok();
    }

    let mut total: u32 = 0;
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit: u32 = match c.to_ascii_lowercase() {
            'w' => 604_800,
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        let value: u32 = digits.parse().ok()?;
        total = total.checked_add(value.checked_mul(unit)?)?;
        digits.clear();
    }
    if digits.is_empty() {
        Some(total)
    } else {
        None
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::tests::{make_parser, records};
    use super::*;

    #[test]
    fn ttls_parse_with_units() {
        assert_eq!(parse_ttl("3600"), Some(3600));
        assert_eq!(parse_ttl("1h30m"), Some(5400));
        assert_eq!(parse_ttl("1W"), Some(604_800));
        assert_eq!(parse_ttl("2d4h"), Some(187_200));
        assert_eq!(parse_ttl("1h30"), None);
        assert_eq!(parse_ttl("h"), None);
        assert_eq!(parse_ttl("1y"), None);
        assert_eq!(parse_ttl("99999999w"), None);
    }

    #[test]
    fn ttl_and_class_in_either_order() {
        let records = records("a 60 IN A 192.0.2.1\nb IN 120 A 192.0.2.2\nc in a 192.0.2.3\n");
        assert_eq!(records[0].ttl, Some(60));
        assert_eq!(records[1].ttl, Some(120));
        // An omitted TTL falls back to the previous explicit one.
        assert_eq!(records[2].ttl, Some(120));
        assert_eq!(records[2].rr_type, Type::A);
    }

    #[test]
    fn blank_owner_repeats_previous() {
        let records = records("www A 192.0.2.1\n    AAAA 2001:db8::1\n@ MX 10 mail\n");
        assert_eq!(records[1].owner.as_str(), "www.example.com.");
        assert_eq!(records[1].rr_type, Type::AAAA);
        assert_eq!(records[2].owner.as_str(), "example.com.");
        assert_eq!(records[2].ttl, None);
        assert_eq!(records[2].rdata.to_string(), "10 mail.example.com.");
    }

    #[test]
    fn soa_timers_accept_units() {
        let records = records("@ SOA ns1 admin ( 2024010101 1h 15m 2w 1d )\n");
        assert_eq!(
            records[0].rdata.to_string(),
            "ns1.example.com. admin.example.com. 2024010101 3600 900 1209600 86400"
        );
    }

    #[test]
    fn all_served_types_parse() {
        let records = records(
            "@ NS ns1\n\
             ns1 A 192.0.2.53\n\
             ns1 AAAA 2001:db8::53\n\
             alias CNAME www\n\
             1 PTR host.example.net.\n\
             txt TXT \"v=spf1 -all\" second\n\
             _sip._tcp SRV 10 20 5060 sip\n",
        );
        let types: Vec<Type> = records.iter().map(|r| r.rr_type).collect();
        assert_eq!(
            types,
            [
                Type::NS,
                Type::A,
                Type::AAAA,
                Type::CNAME,
                Type::PTR,
                Type::TXT,
                Type::SRV
            ]
        );
        assert_eq!(records[5].rdata.to_string(), "\"v=spf1 -all\" \"second\"");
    }

    #[test]
    fn record_errors_carry_positions() {
        for (text, kind, column) in [
            ("  A 192.0.2.1\n", ErrorKind::EmptyOwnerWithNoPrevious, 3),
            ("www CH A 192.0.2.1\n", ErrorKind::UnsupportedClass("CH".into()), 5),
            ("www 60\n", ErrorKind::ExpectedType, 7),
            ("www HINFO a b\n", ErrorKind::InvalidType("unknown type"), 5),
            ("www TYPE99 abc\n", ErrorKind::UnsupportedType("TYPE99".into()), 5),
            ("www 1x A 192.0.2.1\n", ErrorKind::InvalidTtl, 5),
        ] {
            let err = make_parser(text).next().unwrap().unwrap_err();
            let details = err.details().unwrap();
            assert_eq!(details.kind(), &kind, "{text}");
            assert_eq!(details.line(), 1);
            assert_eq!(details.column(), column, "{text}");
        }
    }

    #[test]
    fn bad_rdata_is_an_error() {
        let err = make_parser("www A not-an-address\n").next().unwrap().unwrap_err();
        assert!(matches!(
            err.details().unwrap().kind(),
            ErrorKind::InvalidRdata(_)
        ));
    }
}
