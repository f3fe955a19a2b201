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

//! The [`Reader`] structure.
//!
//! See the [`zone_file` module-level documentation](`super`) for
//! implementation details about how the [`Reader`] is used.

use std::io::BufRead;

use super::{Error, ErrorKind, Result};

////////////////////////////////////////////////////////////////////////
// STRUCTURES                                                         //
////////////////////////////////////////////////////////////////////////

/// Splits a zone file into logical lines of fields.
///
/// The [`Reader`] takes care of comments, quoting, escapes, and
/// parentheses for line extension, so that the parser only ever sees
/// complete logical lines.
pub(super) struct Reader<S> {
    stream: S,
    line: usize,
    buf: String,
}

/// Records a human-readable position (line and column) in a zone file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// A logical line: one or more physical lines joined by parentheses.
#[derive(Debug)]
pub(super) struct LogicalLine {
    /// The number of the physical line the logical line starts on.
    pub number: usize,

    /// Whether the line starts with whitespace, meaning that the owner
    /// is omitted.
    pub blank_owner: bool,

    pub fields: Vec<Field>,
}

/// A field of a logical line, with quotes and escapes removed.
#[derive(Debug)]
pub(super) struct Field {
    pub text: String,
    pub quoted: bool,
    pub position: Position,
}

impl LogicalLine {
    /// Returns the position just past the last field, for errors about
    /// missing fields.
    pub fn end(&self) -> Position {
        self.fields.last().map_or(
            Position {
                line: self.number,
                column: 1,
            },
            |field| Position {
                line: field.position.line,
                column: field.position.column + field.text.len(),
            },
        )
    }
}

////////////////////////////////////////////////////////////////////////
// READER IMPLEMENTATION                                              //
////////////////////////////////////////////////////////////////////////

impl<S: BufRead> Reader<S> {
    /// Constructs a new [`Reader`] from the given stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            line: 0,
            buf: String::new(),
        }
    }

    /// Reads the next logical line that has at least one field. Blank
    /// and comment-only lines are skipped. Returns [`None`] at the end
    /// of the input.
    pub fn next_line(&mut self) -> Result<Option<LogicalLine>> {
        loop {
            let mut logical: Option<LogicalLine> = None;
            let mut in_parens = false;
            loop {
                if !self.read_physical_line()? {
                    if in_parens {
                        return Err(Error::new(
                            Position {
                                line: self.line,
                                column: 1,
                            },
                            ErrorKind::EofBeforeCloseParen,
                        ));
                    }
                    return Ok(logical.filter(|l| !l.fields.is_empty()));
                }
                let logical = logical.get_or_insert_with(|| LogicalLine {
                    number: self.line,
                    blank_owner: self.buf.starts_with([' ', '\t']),
                    fields: Vec::new(),
                });
                tokenize(&self.buf, self.line, &mut in_parens, &mut logical.fields)?;
                if !in_parens {
                    break;
                }
            }
            if let Some(line) = logical.filter(|l| !l.fields.is_empty()) {
                return Ok(Some(line));
            }
        }
    }

    fn read_physical_line(&mut self) -> Result<bool> {
        self.buf.clear();
        if self.stream.read_line(&mut self.buf)? == 0 {
            return Ok(false);
        }
        self.line += 1;
        while self.buf.ends_with(['\n', '\r']) {
            self.buf.pop();
        }
        Ok(true)
    }
}

/// Splits one physical line into fields, appending them to `fields`.
fn tokenize(text: &str, line: usize, in_parens: &mut bool, fields: &mut Vec<Field>) -> Result<()> {
    let mut chars = text.char_indices().peekable();
    while let Some(&(index, c)) = chars.peek() {
        let position = Position {
            line,
            column: index + 1,
        };
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            ';' => break,
            '(' => {
                if *in_parens {
                    return Err(Error::new(position, ErrorKind::NestedParens));
                }
                *in_parens = true;
                chars.next();
            }
            ')' => {
                if !*in_parens {
                    return Err(Error::new(position, ErrorKind::UnmatchedCloseParen));
                }
                *in_parens = false;
                chars.next();
            }
            '"' => {
                chars.next();
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((at, '\\')) => field.push(unescape(&mut chars, line, at)?),
                        Some((_, c)) => field.push(c),
                        None => return Err(Error::new(position, ErrorKind::EofInQuotedString)),
                    }
                }
                fields.push(Field {
                    text: field,
                    quoted: true,
                    position,
                });
            }
            _ => {
                let mut field = String::new();
                while let Some(&(at, c)) = chars.peek() {
                    if matches!(c, ' ' | '\t' | ';' | '(' | ')' | '"') {
                        break;
                    }
                    chars.next();
                    if c == '\\' {
                        field.push(unescape(&mut chars, line, at)?);
                    } else {
                        field.push(c);
                    }
                }
                fields.push(Field {
                    text: field,
                    quoted: false,
                    position,
                });
            }
        }
    }
    Ok(())
}

/// Reads the rest of an escape sequence whose backslash was at byte
/// `at`: either `\DDD` (a decimal octet value) or `\X` (the character
/// X taken literally).
fn unescape(
    chars: &mut std::iter::Peekable<std::str::CharIndices>,
    line: usize,
    at: usize,
) -> Result<char> {
    let position = Position {
        line,
        column: at + 1,
    };
    match chars.next() {
        Some((_, c)) if c.is_ascii_digit() => {
            let mut value = c.to_digit(10).unwrap_or(0);
            for _ in 0..2 {
                match chars.peek() {
                    Some(&(_, d)) if d.is_ascii_digit() => {
                        value = value * 10 + d.to_digit(10).unwrap_or(0);
                        chars.next();
                    }
                    _ => break,
                }
            }
            u8::try_from(value)
                .map(char::from)
                .map_err(|_| Error::new(position, ErrorKind::EscapeValueOutOfRange))
        }
        Some((_, c)) => Ok(c),
        None => Ok('\\'),
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
