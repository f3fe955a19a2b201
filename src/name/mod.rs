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

//! Implementation of the [`Name`] type for domain names.
//!
//! Every domain name held by the server is kept in one canonical form:
//! absolute (with a trailing dot), ASCII-lowercased, and validated
//! against the length limits of [RFC 1035 § 2.3.4]. Because of this,
//! plain equality and hashing on [`Name`] are case-insensitive DNS
//! comparisons, and names can be used directly as map keys.
//!
//! Names given in relative form are made absolute by
//! [`Name::qualify`], which appends an origin, the way zone files and
//! zone snapshots treat unqualified owners.
//!
//! [RFC 1035 § 2.3.4]: https://datatracker.ietf.org/doc/html/rfc1035#section-2.3.4

use std::fmt;
use std::str::FromStr;

mod error;
pub use error::Error;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name.
const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
const MAX_LABEL_LEN: usize = 63;

/// A domain name in canonical (absolute, lowercase) form.
///
/// The root name is represented as `"."`; every other name has the form
/// `"label1.label2.…labelN."`.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Name(Box<str>);

impl Name {
    /// Returns the root name (`.`).
    pub fn root() -> Self {
        Self(".".into())
    }

    /// Converts `text` into an absolute [`Name`], qualifying it against
    /// `origin` if it is relative.
    ///
    /// `@` and the empty string denote `origin` itself. A name ending in
    /// a dot is already absolute and is taken as-is. Anything else has
    /// `origin` appended. The operation is idempotent: qualifying the
    /// textual form of a [`Name`] yields that same [`Name`].
    pub fn qualify(text: &str, origin: &Name) -> Result<Self, Error> {
        let text = text.trim();
        if text.is_empty() || text == "@" {
            Ok(origin.clone())
        } else if text == "." {
            Ok(Self::root())
        } else if text.ends_with('.') {
            Self::from_absolute(text)
        } else if origin.is_root() {
            Self::from_absolute(&format!("{}.", text))
        } else {
            Self::from_absolute(&format!("{}.{}", text, origin))
        }
    }

    /// Builds a [`Name`] from text that already ends in a dot,
    /// validating and lowercasing it.
    fn from_absolute(text: &str) -> Result<Self, Error> {
        if !text.is_ascii() {
            return Err(Error::StrNotAscii);
        }

        // The wire form is one length octet per label plus the label
        // contents plus the null label, which works out to the length
        // of the dotted text plus one.
        if text.len() + 1 > MAX_WIRE_LEN {
            return Err(Error::NameTooLong);
        }

        for label in text[..text.len() - 1].split('.') {
            if label.is_empty() {
                return Err(Error::EmptyLabel);
            } else if label.len() > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            } else if label
                .bytes()
                .any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
            {
                return Err(Error::InvalidCharacter);
            }
        }
        Ok(Self(text.to_ascii_lowercase().into_boxed_str()))
    }

    /// Returns the canonical textual form of the name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns whether this is the root name.
    pub fn is_root(&self) -> bool {
        &*self.0 == "."
    }

    /// Returns the number of labels in the name, not counting the null
    /// label. The root has zero labels.
    pub fn len(&self) -> usize {
        self.labels().count()
    }

    /// Returns an iterator over the labels of the name, from left to
    /// right, not including the null label.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        let labels = if self.is_root() {
            ""
        } else {
            &self.0[..self.0.len() - 1]
        };
        labels.split('.').filter(|l| !l.is_empty())
    }

    /// Returns the leftmost label, or [`None`] for the root.
    pub fn first_label(&self) -> Option<&str> {
        self.labels().next()
    }

    /// Returns whether the leftmost label is the asterisk label.
    pub fn is_wildcard(&self) -> bool {
        self.first_label() == Some("*")
    }

    /// Returns the name with its leftmost label removed, or [`None`] if
    /// this is the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            match self.0.find('.') {
                Some(i) if i + 1 < self.0.len() => Some(Self(self.0[i + 1..].into())),
                _ => Some(Self::root()),
            }
        }
    }

    /// Returns `*.<self>`, the wildcard domain name whose closest
    /// encloser is this name.
    pub fn wildcard_child(&self) -> Self {
        if self.is_root() {
            Self("*.".into())
        } else {
            Self(format!("*.{}", self.0).into_boxed_str())
        }
    }

    /// Returns whether this name is equal to or a subdomain of `other`.
    pub fn eq_or_subdomain_of(&self, other: &Name) -> bool {
        if other.is_root() || self == other {
            true
        } else {
            self.0.len() > other.0.len()
                && self.0.ends_with(&*other.0)
                && self.0.as_bytes()[self.0.len() - other.0.len() - 1] == b'.'
        }
    }

    /// Returns this name relative to `origin`: `@` when the names are
    /// equal, the leading labels otherwise, or [`None`] if this name is
    /// not within `origin`.
    pub fn relative_to(&self, origin: &Name) -> Option<String> {
        if self == origin {
            Some(String::from("@"))
        } else if self.eq_or_subdomain_of(origin) {
            let prefix_len = if origin.is_root() {
                self.0.len() - 1
            } else {
                self.0.len() - origin.0.len() - 1
            };
            Some(self.0[..prefix_len].to_owned())
        } else {
            None
        }
    }
}

impl FromStr for Name {
    type Err = Error;

    /// Parses a name, treating relative names as relative to the root.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::qualify(text, &Self::root())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    #[test]
    fn qualify_is_idempotent_and_caseless() {
        let origin = name("Example.COM.");
        for text in ["www", "WWW.example.com.", "@", "", "a.b", "*.Wild"] {
            let once = Name::qualify(text, &origin).unwrap();
            let twice = Name::qualify(once.as_str(), &origin).unwrap();
            assert_eq!(once, twice);
            assert_eq!(once.as_str(), once.as_str().to_ascii_lowercase());
        }
        assert_eq!(
            Name::qualify("WWW", &origin).unwrap(),
            Name::qualify("www.example.com.", &origin).unwrap(),
        );
    }

    #[test]
    fn qualify_handles_apex_and_root_origins() {
        let origin = name("example.com.");
        assert_eq!(Name::qualify("@", &origin).unwrap(), origin);
        assert_eq!(Name::qualify("", &origin).unwrap(), origin);
        assert_eq!(name("www").as_str(), "www.");
        assert_eq!(name(".").as_str(), ".");
    }

    #[test]
    fn rejects_invalid_names() {
        assert_eq!("a..b.".parse::<Name>(), Err(Error::EmptyLabel));
        let long_label = "x".repeat(64);
        assert_eq!(long_label.parse::<Name>(), Err(Error::LabelTooLong));
        let long_name = format!("{}.", vec!["y".repeat(60); 5].join("."));
        assert_eq!(long_name.parse::<Name>(), Err(Error::NameTooLong));
        assert_eq!("bad name.".parse::<Name>(), Err(Error::InvalidCharacter));
        assert_eq!("dé.".parse::<Name>(), Err(Error::StrNotAscii));
    }

    #[test]
    fn parent_walks_to_root() {
        let mut current = name("a.b.example.");
        let mut seen = vec![current.to_string()];
        while let Some(parent) = current.parent() {
            seen.push(parent.to_string());
            current = parent;
        }
        assert_eq!(seen, ["a.b.example.", "b.example.", "example.", "."]);
    }

    #[test]
    fn subdomain_checks_respect_label_boundaries() {
        assert!(name("www.example.com.").eq_or_subdomain_of(&name("example.com.")));
        assert!(name("example.com.").eq_or_subdomain_of(&name("example.com.")));
        assert!(name("example.com.").eq_or_subdomain_of(&Name::root()));
        assert!(!name("badexample.com.").eq_or_subdomain_of(&name("example.com.")));
        assert!(!name("com.").eq_or_subdomain_of(&name("example.com.")));
    }

    #[test]
    fn relative_to_works() {
        let origin = name("example.com.");
        assert_eq!(origin.relative_to(&origin).as_deref(), Some("@"));
        assert_eq!(
            name("a.www.example.com.").relative_to(&origin).as_deref(),
            Some("a.www"),
        );
        assert_eq!(name("example.net.").relative_to(&origin), None);
    }

    #[test]
    fn wildcards() {
        let wildcard = name("example.com.").wildcard_child();
        assert_eq!(wildcard.as_str(), "*.example.com.");
        assert!(wildcard.is_wildcard());
        assert_eq!(wildcard.len(), 3);
        assert_eq!(Name::root().len(), 0);
    }
}
