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

//! Parsing of the [RFC 1035 § 5] zone file format.
//!
//! This module provides the [`Parser`] structure, which accepts a
//! stream implementing the [`BufRead`] trait. It can subsequently be
//! iterated over to read DNS records stored in [RFC 1035 § 5] format.
//! It will also report any `$INCLUDE` directives in the file, which the
//! caller may follow; [`load`] does so, resolving included paths
//! relative to the including file.
//!
//! Errors (which may be I/O errors or syntax errors) are reported
//! through the [`Error`] type. Iteration ends and parsing cannot be
//! continued after an error is returned.
//!
//! ```
//! use std::io::Cursor;
//! use ballast::name::Name;
//! use ballast::rr::Type;
//! use ballast::zone_file::Parser;
//!
//! const ZONE_FILE: &[u8] = br#"
//! $TTL 1h
//! @   IN SOA ns1 admin (
//!     123     ; SERIAL
//!     3600    ; REFRESH
//!     900     ; RETRY
//!     604800  ; EXPIRE
//!     3600    ; MINIMUM
//! )
//!     IN NS ns1
//! ns1 IN A 127.0.0.1
//!     IN AAAA ::1
//! "#;
//!
//! let origin: Name = "ballast.test.".parse().unwrap();
//! let mut parser = Parser::new(Cursor::new(ZONE_FILE), origin).records_only();
//! assert_eq!(parser.next().unwrap().unwrap().rr_type, Type::SOA);
//! assert_eq!(parser.next().unwrap().unwrap().rr_type, Type::NS);
//! assert_eq!(parser.next().unwrap().unwrap().rr_type, Type::A);
//! assert_eq!(parser.next().unwrap().unwrap().rr_type, Type::AAAA);
//! assert!(parser.next().is_none());
//! ```
//!
//! # Implementation
//!
//! An internal `Reader` turns the input into logical lines of fields,
//! dealing with comments, quoting, escapes, and parentheses. The
//! [`Parser`] then interprets each logical line as a directive or a
//! record. A record's RDATA fields are handed to
//! [`Rdata::from_fields`], so the zone file and the JSON record form
//! accept exactly the same RDATA.
//!
//! [RFC 1035 § 5]: https://datatracker.ietf.org/doc/html/rfc1035#section-5

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::debug;

use crate::catalog::RecordInput;
use crate::name::Name;
use crate::rr::{Rdata, Type};

mod directive;
pub mod error;
mod reader;
mod record;

use error::ErrorKind;
pub use error::{Error, ErrorDetails, Result};
pub use reader::Position;
use reader::Reader;

/// How deeply `$INCLUDE` files may nest.
pub const MAX_INCLUDE_DEPTH: usize = 8;

////////////////////////////////////////////////////////////////////////
// STRUCTURES                                                         //
////////////////////////////////////////////////////////////////////////

/// A parser for [RFC 1035 § 5] DNS zone files.
///
/// A [`Parser`] accepts a stream implementing [`BufRead`] and can then
/// be iterated to read DNS records and `$INCLUDE` directives from the
/// stream. See the [module-level documentation](`self`) for details
/// and example usage.
///
/// [RFC 1035 § 5]: https://datatracker.ietf.org/doc/html/rfc1035#section-5
pub struct Parser<S> {
    error: bool,
    reader: Reader<S>,
    context: Context,
}

/// Tracks the parse context of a [`Parser`].
///
/// An `@` symbol is shorthand for the current origin (set with
/// `$ORIGIN`), and relative domain names are interpreted relative to
/// it. Default TTLs can be set with `$TTL`, and omitted TTLs otherwise
/// default to the previous explicit TTL. Omitted owner names default
/// to the previous owner.
#[derive(Clone)]
struct Context {
    origin: Name,
    previous_owner: Option<Name>,
    previous_ttl: Option<u32>,
    default_ttl: Option<u32>,
}

/// A line parsed from a zone file, as returned by [`Parser::next`].
///
/// This actually represents a logical line; if parentheses are used, it
/// may be several physical lines in the file. Only lines that require
/// the caller's attention (records and `$INCLUDE` directives) are
/// returned.
#[derive(Clone, Debug)]
pub struct Line {
    pub number: usize,
    pub content: LineContent,
}

#[derive(Clone, Debug)]
pub enum LineContent {
    Include(Include),
    Record(ParsedRecord),
}

/// A parsed `$INCLUDE` directive.
#[derive(Clone, Debug)]
pub struct Include {
    pub path: PathBuf,
    pub origin: Name,
}

/// A parsed record. The TTL is [`None`] when the file gives neither
/// an explicit TTL nor a `$TTL` default; the zone's default applies.
#[derive(Clone, Debug)]
pub struct ParsedRecord {
    pub owner: Name,
    pub ttl: Option<u32>,
    pub rr_type: Type,
    pub rdata: Rdata,
}

impl ParsedRecord {
    /// Converts the record to the form the catalog and zone snapshots
    /// use, with an absolute owner.
    pub fn to_input(&self) -> RecordInput {
        RecordInput {
            name: self.owner.to_string(),
            rr_type: self.rr_type,
            ttl: self.ttl,
            data: self.rdata.to_string(),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// PARSER CONSTRUCTION AND ITERATION                                  //
////////////////////////////////////////////////////////////////////////

impl<S: BufRead> Parser<S> {
    /// Creates a new [`Parser`] to read a zone file from the provided
    /// stream, with `origin` as the initial origin.
    pub fn new(stream: S, origin: Name) -> Self {
        Self {
            error: false,
            reader: Reader::new(stream),
            context: Context {
                origin,
                previous_owner: None,
                previous_ttl: None,
                default_ttl: None,
            },
        }
    }

    /// Sets the default TTL, as if the file began with `$TTL`.
    pub fn with_default_ttl(mut self, ttl: u32) -> Self {
        self.context.default_ttl = Some(ttl);
        self
    }

    /// Converts this [`Parser`] into an iterator that produces only
    /// records. Any `$INCLUDE` directives found will trigger an
    /// ["include not supported"](`ErrorKind::IncludeNotSupported`)
    /// error.
    pub fn records_only(self) -> RecordsOnly<S> {
        RecordsOnly { parser: self }
    }

    /// An internal helper to parse lines until one with returnable data
    /// is found.
    fn parse_lines_until_returnable_data_found(&mut self) -> Result<Option<Line>> {
        while let Some(line) = self.reader.next_line()? {
            let content = if line.fields[0].text.starts_with('$') && !line.blank_owner {
                self.parse_directive(&line)?
            } else {
                Some(self.parse_record(&line)?)
            };
            if let Some(content) = content {
                return Ok(Some(Line {
                    number: line.number,
                    content,
                }));
            }
        }
        Ok(None)
    }
}

impl<S: BufRead> Iterator for Parser<S> {
    type Item = Result<Line>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error {
            return None;
        }

        match self.parse_lines_until_returnable_data_found() {
            Ok(Some(line)) => Some(Ok(line)),
            Ok(None) => None,
            Err(e) => {
                self.error = true;
                Some(Err(e))
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// RECORDS-ONLY ITERATOR                                              //
////////////////////////////////////////////////////////////////////////

/// An iterator that parses only records from a zone file and returns
/// an [error](`ErrorKind::IncludeNotSupported`) if an `$INCLUDE`
/// directive is found. See [`Parser::records_only`].
pub struct RecordsOnly<S> {
    parser: Parser<S>,
}

impl<S: BufRead> Iterator for RecordsOnly<S> {
    type Item = Result<ParsedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.parser.next() {
            Some(Ok(Line {
                content: LineContent::Record(record),
                ..
            })) => Some(Ok(record)),
            Some(Ok(Line { number, .. })) => {
                self.parser.error = true;
                Some(Err(Error::new(
                    Position {
                        line: number,
                        column: 1,
                    },
                    ErrorKind::IncludeNotSupported,
                )))
            }
            Some(Err(e)) => Some(Err(e)),
            None => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// LOADING FILES                                                      //
////////////////////////////////////////////////////////////////////////

/// Reads the zone file at `path`, following `$INCLUDE` directives, and
/// returns its records in file order.
pub fn load(path: &Path, origin: &Name) -> Result<Vec<RecordInput>> {
    let mut records = Vec::new();
    load_into(path, origin.clone(), None, 0, &mut records)?;
    debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

fn load_into(
    path: &Path,
    origin: Name,
    default_ttl: Option<u32>,
    depth: usize,
    records: &mut Vec<RecordInput>,
) -> Result<()> {
    let file = File::open(path)?;
    let mut parser = Parser::new(BufReader::new(file), origin);
    parser.context.default_ttl = default_ttl;

    while let Some(line) = parser.next() {
        let line = line?;
        match line.content {
            LineContent::Record(record) => records.push(record.to_input()),
            LineContent::Include(include) => {
                if depth + 1 >= MAX_INCLUDE_DEPTH {
                    return Err(Error::new(
                        Position {
                            line: line.number,
                            column: 1,
                        },
                        ErrorKind::IncludeTooDeep,
                    ));
                }
                let included = match path.parent() {
                    Some(dir) => dir.join(&include.path),
                    None => include.path.clone(),
                };
                let ttl = parser.context.default_ttl;
                load_into(&included, include.origin, ttl, depth + 1, records).map_err(|err| {
                    Error::Include {
                        path: included.clone(),
                        source: Box::new(err),
                    }
                })?;
            }
        }
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;

    use super::*;

    /// A helper used throughout the [`zone_file`](`super`) module's
    /// tests. The origin is `example.com.`.
    pub(super) fn make_parser(text: &str) -> Parser<Cursor<&[u8]>> {
        Parser::new(Cursor::new(text.as_bytes()), "example.com.".parse().unwrap())
    }

    pub(super) fn records(text: &str) -> Vec<ParsedRecord> {
        make_parser(text)
            .records_only()
            .collect::<Result<_>>()
            .unwrap()
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ballast-zone-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn records_convert_to_inputs() {
        let records = records("www 60 TXT \"hello world\"\n");
        let input = records[0].to_input();
        assert_eq!(input.name, "www.example.com.");
        assert_eq!(input.rr_type, Type::TXT);
        assert_eq!(input.ttl, Some(60));
        assert_eq!(input.data, "\"hello world\"");
    }

    #[test]
    fn records_only_rejects_includes() {
        let mut parser = make_parser("www A 192.0.2.1\n$INCLUDE other.zone\n").records_only();
        assert!(parser.next().unwrap().is_ok());
        let err = parser.next().unwrap().unwrap_err();
        assert_eq!(err.details().unwrap().kind(), &ErrorKind::IncludeNotSupported);
        assert!(parser.next().is_none());
    }

    #[test]
    fn parsing_stops_after_an_error() {
        let mut parser = make_parser("www BOGUS x\nmail A 192.0.2.1\n");
        assert!(parser.next().unwrap().is_err());
        assert!(parser.next().is_none());
    }

    #[test]
    fn load_follows_includes() {
        let dir = scratch_dir("include");
        fs::write(
            dir.join("main.zone"),
            "$TTL 300\nwww A 192.0.2.1\n$INCLUDE hosts.zone hosts\n",
        )
        .unwrap();
        fs::write(dir.join("hosts.zone"), "db A 192.0.2.2\n").unwrap();

        let origin: Name = "example.com.".parse().unwrap();
        let records = load(&dir.join("main.zone"), &origin).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["www.example.com.", "db.hosts.example.com."]);
        assert_eq!(records[1].ttl, Some(300));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn load_bounds_include_depth() {
        let dir = scratch_dir("loop");
        fs::write(dir.join("loop.zone"), "$INCLUDE loop.zone\n").unwrap();
        let origin: Name = "example.com.".parse().unwrap();
        let err = load(&dir.join("loop.zone"), &origin).unwrap_err();
        assert_eq!(err.details().unwrap().kind(), &ErrorKind::IncludeTooDeep);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn include_errors_name_the_file() {
        let dir = scratch_dir("bad");
        fs::write(dir.join("main.zone"), "$INCLUDE bad.zone\n").unwrap();
        fs::write(dir.join("bad.zone"), "\n\nwww A nope\n").unwrap();
        let origin: Name = "example.com.".parse().unwrap();
        let err = load(&dir.join("main.zone"), &origin).unwrap_err();
        assert!(matches!(err, Error::Include { .. }));
        assert_eq!(err.details().unwrap().line(), 3);
        fs::remove_dir_all(dir).unwrap();
    }
}
