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

//! Parsing of zone file `$`-directives.

use std::io::BufRead;
use std::path::PathBuf;

use super::reader::LogicalLine;
use super::record::parse_ttl;
use super::{Error, ErrorKind, Include, LineContent, Parser, Result};
use crate::name::Name;
use crate::util::Caseless;

impl<S: BufRead> Parser<S> {
    /// Parses a zone file directive. Returns an [`Include`] for
    /// `$INCLUDE`; `$ORIGIN` and `$TTL` only update the context.
    pub(super) fn parse_directive(&mut self, line: &LogicalLine) -> Result<Option<LineContent>> {
        let directive = &line.fields[0];
        let args = &line.fields[1..];
        let name = Caseless(&directive.text);
        if name == Caseless("$ORIGIN") {
            let Some(field) = args.first() else {
                return Err(Error::new(line.end(), ErrorKind::ExpectedName));
            };
            expect_eol(line, 2)?;
            self.context.origin = Name::qualify(&field.text, &self.context.origin)
                .map_err(|err| Error::new(field.position, ErrorKind::InvalidName(err)))?;
            Ok(None)
        } else if name == Caseless("$TTL") {
            let Some(field) = args.first() else {
                return Err(Error::new(line.end(), ErrorKind::ExpectedTtl));
            };
            expect_eol(line, 2)?;
            let ttl = parse_ttl(&field.text)
                .ok_or_else(|| Error::new(field.position, ErrorKind::InvalidTtl))?;
            self.context.default_ttl = Some(ttl);
            Ok(None)
        } else if name == Caseless("$INCLUDE") {
            let Some(path) = args.first() else {
                return Err(Error::new(line.end(), ErrorKind::ExpectedIncludePath));
            };
            let origin = match args.get(1) {
                Some(field) => {
                    expect_eol(line, 3)?;
                    Name::qualify(&field.text, &self.context.origin)
                        .map_err(|err| Error::new(field.position, ErrorKind::InvalidName(err)))?
                }
                None => self.context.origin.clone(),
            };
            Ok(Some(LineContent::Include(Include {
                path: PathBuf::from(&path.text),
                origin,
            })))
        } else {
            Err(Error::new(directive.position, ErrorKind::UnknownDirective))
        }
    }
}

/// Checks that `line` has no more than `count` fields.
fn expect_eol(line: &LogicalLine, count: usize) -> Result<()> {
    match line.fields.get(count) {
        Some(extra) => Err(Error::new(extra.position, ErrorKind::ExpectedEol)),
        None => Ok(()),
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
