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

//! Implementation of snapshot validation.
//!
//! An entity in a snapshot must carry every field its [`FieldSpec`]
//! table marks as required, and every value must make sense for its
//! field. A zone that fails these checks is rejected. A resource or
//! node that fails them is skipped, and the issue is reported back to
//! the caller for logging while the rest of the zone loads.
//!
//! [`FieldSpec`]: super::FieldSpec

use std::fmt;

use super::FieldSpec;

/// Indicates what is wrong with an entity in a snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ValidationIssue {
    MissingField(&'static str),
    InvalidField { field: &'static str, reason: String },

    /// The entity could not be read at all, e.g. because a field held
    /// a value of the wrong type.
    Malformed(String),
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing required field {field}"),
            Self::InvalidField { field, reason } => write!(f, "invalid {field}: {reason}"),
            Self::Malformed(reason) => write!(f, "malformed: {reason}"),
        }
    }
}

/// A [`ValidationIssue`] together with the entity it was found in,
/// e.g. `example.com./www/node1`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationError {
    pub path: String,
    pub issue: ValidationIssue,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, issue: ValidationIssue) -> Self {
        Self {
            path: path.into(),
            issue,
        }
    }

    pub fn invalid(
        path: impl Into<String>,
        field: &'static str,
        reason: impl fmt::Display,
    ) -> Self {
        Self::new(
            path,
            ValidationIssue::InvalidField {
                field,
                reason: reason.to_string(),
            },
        )
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.issue)
    }
}

impl std::error::Error for ValidationError {}

/// Checks that every required field in `table` is present, as reported
/// by `present`.
pub(super) fn check_required<F>(
    table: &[FieldSpec],
    path: &str,
    present: F,
) -> Result<(), ValidationError>
where
    F: Fn(&str) -> bool,
{
    match table.iter().find(|spec| spec.required && !present(spec.name)) {
        Some(spec) => Err(ValidationError::new(
            path,
            ValidationIssue::MissingField(spec.name),
        )),
        None => Ok(()),
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
