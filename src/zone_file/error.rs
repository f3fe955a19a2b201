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

//! Error types for zone file parsing.
//!
//! All syntax errors are recorded with an [`ErrorKind`] value that
//! calling code can match on or display.

use std::fmt;
use std::io;
use std::path::PathBuf;

use super::Position;
use crate::name;
use crate::rr::ParseError;

////////////////////////////////////////////////////////////////////////
// ERROR STRUCTURE                                                    //
////////////////////////////////////////////////////////////////////////

/// Represents errors that may occur during zone file parsing.
#[derive(Debug)]
pub enum Error {
    /// I/O errors encountered while reading a zone file.
    Io(io::Error),

    /// Syntax errors.
    Syntax(ErrorDetails),

    /// An error in a file pulled in by `$INCLUDE`.
    Include { path: PathBuf, source: Box<Error> },
}

impl Error {
    /// Constructs a new [`Error`] of the [`Syntax`](`Error::Syntax`)
    /// variant with provided information.
    pub(super) fn new(position: Position, kind: ErrorKind) -> Self {
        Self::Syntax(ErrorDetails { position, kind })
    }

    /// Returns the syntax error at the bottom of any `$INCLUDE` chain.
    pub fn details(&self) -> Option<&ErrorDetails> {
        match self {
            Self::Io(_) => None,
            Self::Syntax(details) => Some(details),
            Self::Include { source, .. } => source.details(),
        }
    }
}

impl From<io::Error> for Error {
    fn from(io_error: io::Error) -> Self {
        Self::Io(io_error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(io_error) => write!(f, "I/O error: {}", io_error),
            Self::Syntax(details) => details.fmt(f),
            Self::Include { path, .. } => write!(f, "in included file {}", path.display()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(io_error) => Some(io_error),
            Self::Syntax(_) => None,
            Self::Include { source, .. } => Some(source.as_ref()),
        }
    }
}

/// A result type for zone file parsing.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// SYNTAX ERROR DETAILS                                               //
////////////////////////////////////////////////////////////////////////

/// Provides information about the position and kind of zone file syntax
/// errors.
#[derive(Debug)]
pub struct ErrorDetails {
    pub(super) position: Position,
    pub(super) kind: ErrorKind,
}

impl ErrorDetails {
    /// Returns the line in the file at which the error occurred.
    pub fn line(&self) -> usize {
        self.position.line
    }

    /// Returns the column in the file at which the error occurred.
    pub fn column(&self) -> usize {
        self.position.column
    }

    /// Returns the kind of syntax error that occurred.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} at line {} column {}",
            self.kind, self.position.line, self.position.column,
        )
    }
}

////////////////////////////////////////////////////////////////////////
// SYNTAX ERROR KINDS                                                 //
////////////////////////////////////////////////////////////////////////

/// Kinds of zone file syntax errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    EmptyOwnerWithNoPrevious,
    EofBeforeCloseParen,
    EofInQuotedString,
    EscapeValueOutOfRange,
    ExpectedEol,
    ExpectedIncludePath,
    ExpectedName,
    ExpectedTtl,
    ExpectedType,
    IncludeNotSupported,
    IncludeTooDeep,
    InvalidName(name::Error),
    InvalidRdata(ParseError),
    InvalidTtl,
    InvalidType(&'static str),
    NestedParens,
    UnknownDirective,
    UnmatchedCloseParen,
    UnsupportedClass(String),
    UnsupportedType(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::EmptyOwnerWithNoPrevious => {
                f.write_str("the owner cannot be empty when no previous owner is available")
            }
            Self::EofBeforeCloseParen => {
                f.write_str("reached end of file before close parenthesis")
            }
            Self::EofInQuotedString => f.write_str("reached end of line in quoted string"),
            Self::EscapeValueOutOfRange => {
                f.write_str("invalid escape sequence: escaped octet value is out of range")
            }
            Self::ExpectedEol => f.write_str("expected the end of the line"),
            Self::ExpectedIncludePath => f.write_str("expected a path to include"),
            Self::ExpectedName => f.write_str("expected a domain name"),
            Self::ExpectedTtl => f.write_str("expected a TTL"),
            Self::ExpectedType => f.write_str("expected an RR type"),
            Self::IncludeNotSupported => f.write_str("$INCLUDE is not supported here"),
            Self::IncludeTooDeep => f.write_str("$INCLUDE files are nested too deeply"),
            Self::InvalidName(name_err) => write!(f, "invalid name: {}", name_err),
            Self::InvalidRdata(ref rdata_err) => write!(f, "invalid RDATA: {}", rdata_err),
            Self::InvalidTtl => f.write_str("invalid TTL"),
            Self::InvalidType(type_err) => type_err.fmt(f),
            Self::NestedParens => f.write_str("nested parentheses"),
            Self::UnknownDirective => f.write_str("unknown directive"),
            Self::UnmatchedCloseParen => f.write_str("unmatched close parenthesis"),
            Self::UnsupportedClass(ref class) => write!(f, "class {} is not served", class),
            Self::UnsupportedType(ref rr_type) => write!(f, "RR type {} is not supported", rr_type),
        }
    }
}
