//! The `Keywords` header as a set of IMAP-style keywords
//!
//! The header is a loose list: tokens may be separated by commas,
//! whitespace, or both. On write the set is always serialized the
//! same way (`", "`-joined, lexicographic), so rewriting an already
//! canonical header changes nothing.

use std::collections::BTreeSet;
use std::fmt;

use crate::label::resolve_folder;

/// Name of the header holding the keyword set.
pub const HEADER: &str = "Keywords";

/// Keywords that were renamed at some point, with their replacement.
const DEPRECATED: [(&str, &str); 3] = [
    ("Network", "JunkSocial"),
    ("Discussion", "Teamwork"),
    ("OtherJunk", "JunkOther"),
];

/// A sorted, duplicate-free keyword set.
///
/// Keywords are held in folder form: a system label such as `\Inbox`
/// is stored as `INBOX`, so lookups accept either spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keywords(BTreeSet<String>);

impl Keywords {
    /// Parse a raw header value.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self(tokens(raw).map(resolve_folder).collect())
    }

    /// Whether the keyword (label or folder form) is present.
    #[must_use]
    pub fn contains(&self, keyword: &str) -> bool {
        self.0.contains(&resolve_folder(keyword))
    }

    /// Add a keyword. Returns `true` if it was not already present.
    pub fn insert(&mut self, keyword: &str) -> bool {
        self.0.insert(resolve_folder(keyword))
    }

    /// Remove a keyword. Returns `true` if it was present.
    pub fn remove(&mut self, keyword: &str) -> bool {
        self.0.remove(&resolve_folder(keyword))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Canonical header value.
    #[must_use]
    pub fn to_header(&self) -> String {
        self.0.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
    }
}

impl fmt::Display for Keywords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_header())
    }
}

impl<'a> FromIterator<&'a str> for Keywords {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(resolve_folder).collect())
    }
}

/// Split a raw header value into its tokens, without normalizing them.
pub fn tokens(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
}

/// Whether every character of the token is in `[A-Za-z0-9_./-]`.
#[must_use]
pub fn is_conforming_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-'))
}

/// Whether any token of a raw header value falls outside the
/// conforming alphabet.
#[must_use]
pub fn has_nonconforming(raw: &str) -> bool {
    tokens(raw).any(|t| !is_conforming_token(t))
}

/// The keyword that replaced a deprecated one, if any.
#[must_use]
pub fn deprecated_replacement(keyword: &str) -> Option<&'static str> {
    DEPRECATED
        .iter()
        .find(|(old, _)| *old == keyword)
        .map(|(_, new)| *new)
}
