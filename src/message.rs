//! Message facade
//!
//! Wraps a [`MailEntry`] with lazily parsed headers and an in-memory
//! edit buffer. Reads never touch the disk twice; edits are only
//! written back by [`Message::save`].

use crate::error::{Error, Result};
use crate::keywords::{self, Keywords};
use crate::maildir::{Folder, MailEntry};
use chrono::{DateTime, Utc};
use mailparse::MailAddr;
use std::fmt;
use std::io::Write;
use std::sync::OnceLock;
use tracing::{debug, trace};

/// A mailbox from an address header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub name: Option<String>,
    pub email: String,
}

impl Address {
    /// Parse a comma-separated address list. Group members are
    /// flattened into the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the list is malformed.
    pub fn parse_list(s: &str) -> Result<Vec<Self>> {
        let list = mailparse::addrparse(s)?;
        let mut out = Vec::new();

        for addr in list.into_inner() {
            match addr {
                MailAddr::Single(info) => out.push(Self {
                    name: info.display_name,
                    email: info.addr,
                }),
                MailAddr::Group(group) => {
                    out.extend(group.addrs.into_iter().map(|info| Self {
                        name: info.display_name,
                        email: info.addr,
                    }));
                }
            }
        }

        Ok(out)
    }

    /// Everything after the last `@`, or the empty string.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.email.rsplit_once('@').map_or("", |(_, domain)| domain)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if !name.is_empty() => write!(f, "\"{name}\" <{}>", self.email),
            _ => f.write_str(&self.email),
        }
    }
}

/// Render a list the way it would appear in a header.
#[must_use]
pub fn join_addresses(list: &[Address]) -> String {
    list.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug)]
struct Parsed {
    headers: Vec<Header>,
    body_offset: usize,
}

/// A message opened for inspection and editing.
#[derive(Debug)]
pub struct Message {
    entry: MailEntry,
    raw: OnceLock<Vec<u8>>,
    parsed: OnceLock<Parsed>,
    keywords: OnceLock<Keywords>,
    /// Header replacements waiting for `save`. An empty value drops
    /// the header.
    edits: Vec<Header>,
}

impl Message {
    #[must_use]
    pub const fn new(entry: MailEntry) -> Self {
        Self {
            entry,
            raw: OnceLock::new(),
            parsed: OnceLock::new(),
            keywords: OnceLock::new(),
            edits: Vec::new(),
        }
    }

    #[must_use]
    pub const fn entry(&self) -> &MailEntry {
        &self.entry
    }

    /// The folder basename the message currently lives in.
    #[must_use]
    pub fn folder(&self) -> &str {
        self.entry.folder().name()
    }

    /// The full message as stored on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn raw(&self) -> Result<&[u8]> {
        if let Some(raw) = self.raw.get() {
            return Ok(raw);
        }
        let raw = self.entry.read()?;
        Ok(self.raw.get_or_init(|| raw))
    }

    fn parsed(&self) -> Result<&Parsed> {
        if let Some(parsed) = self.parsed.get() {
            return Ok(parsed);
        }

        let raw = self.raw()?;
        let (headers, body_offset) = mailparse::parse_headers(raw)?;
        let headers = headers
            .iter()
            .map(|h| Header {
                name: h.get_key(),
                value: h.get_value(),
            })
            .collect();
        trace!("Parsed headers of {}", self.entry.key());

        Ok(self.parsed.get_or_init(|| Parsed {
            headers,
            body_offset,
        }))
    }

    /// Every value of the named header, pending edits included.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be read or parsed.
    pub fn header_values(&self, name: &str) -> Result<Vec<String>> {
        if let Some(edit) = self.edit(name) {
            return Ok(if edit.value.is_empty() {
                Vec::new()
            } else {
                vec![edit.value.clone()]
            });
        }

        Ok(self
            .parsed()?
            .headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
            .collect())
    }

    /// The first value of the named header.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be read or parsed.
    pub fn header(&self, name: &str) -> Result<Option<String>> {
        Ok(self.header_values(name)?.into_iter().next())
    }

    fn edit(&self, name: &str) -> Option<&Header> {
        self.edits.iter().find(|h| h.name.eq_ignore_ascii_case(name))
    }

    /// Replace every occurrence of a header with a single value on the
    /// next save. An empty value removes the header.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.edits.retain(|h| !h.name.eq_ignore_ascii_case(name));
        self.edits.push(Header {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    /// The parsed `Date:` header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the header is missing or malformed.
    pub fn date(&self) -> Result<DateTime<Utc>> {
        let value = self
            .header("Date")?
            .ok_or_else(|| Error::Parse(format!("{} has no Date header", self.entry.key())))?;
        let ts = mailparse::dateparse(&value)
            .map_err(|e| Error::Parse(format!("bad Date {value:?}: {e}")))?;
        DateTime::from_timestamp(ts, 0)
            .ok_or_else(|| Error::Parse(format!("Date out of range: {value}")))
    }

    /// The decoded subject, empty when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be read or parsed.
    pub fn subject(&self) -> Result<String> {
        Ok(self.header("Subject")?.unwrap_or_default())
    }

    /// All addresses across every occurrence of an address header
    /// (`From`, `To`, `Cc`, `Sender`, `Delivered-To`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if any occurrence is malformed.
    pub fn address_list(&self, name: &str) -> Result<Vec<Address>> {
        let mut out = Vec::new();
        for value in self.header_values(name)? {
            out.extend(Address::parse_list(&value)?);
        }
        Ok(out)
    }

    fn raw_keywords(&self) -> Result<String> {
        Ok(self.header_values(keywords::HEADER)?.join(", "))
    }

    /// The current keyword set, in folder form.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be read or parsed.
    pub fn keywords(&self) -> Result<&Keywords> {
        if let Some(kw) = self.keywords.get() {
            return Ok(kw);
        }
        let kw = Keywords::parse(&self.raw_keywords()?);
        Ok(self.keywords.get_or_init(|| kw))
    }

    fn keywords_mut(&mut self) -> Result<&mut Keywords> {
        self.keywords()?;
        self.keywords
            .get_mut()
            .ok_or_else(|| Error::Parse("keywords not loaded".to_string()))
    }

    /// Whether every listed keyword is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be read or parsed.
    pub fn has_keyword<S: AsRef<str>>(&self, wanted: &[S]) -> Result<bool> {
        let kw = self.keywords()?;
        Ok(wanted.iter().all(|k| kw.contains(k.as_ref())))
    }

    /// Whether every listed keyword is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be read or parsed.
    pub fn missing_keyword<S: AsRef<str>>(&self, unwanted: &[S]) -> Result<bool> {
        let kw = self.keywords()?;
        Ok(unwanted.iter().all(|k| !kw.contains(k.as_ref())))
    }

    /// Whether the raw header holds a token outside the conforming
    /// alphabet.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be read or parsed.
    pub fn has_nonconforming_keywords(&self) -> Result<bool> {
        Ok(keywords::has_nonconforming(&self.raw_keywords()?))
    }

    /// Add keywords. Returns `true` if the set changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be read or parsed.
    pub fn add_keyword<S: AsRef<str>>(&mut self, add: &[S]) -> Result<bool> {
        let kw = self.keywords_mut()?;
        let mut changed = false;
        for k in add {
            changed |= kw.insert(k.as_ref());
        }
        if changed {
            self.stage_keywords();
        }
        Ok(changed)
    }

    /// Remove keywords. Returns `true` if the set changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be read or parsed.
    pub fn remove_keyword<S: AsRef<str>>(&mut self, remove: &[S]) -> Result<bool> {
        let kw = self.keywords_mut()?;
        let mut changed = false;
        for k in remove {
            changed |= kw.remove(k.as_ref());
        }
        if changed {
            self.stage_keywords();
        }
        Ok(changed)
    }

    /// Stage the canonical form of the header if the stored form
    /// differs. Returns `true` if a rewrite was staged.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be read or parsed.
    pub fn cleanup_keywords(&mut self) -> Result<bool> {
        let stored = self.raw_keywords()?;
        let canonical = self.keywords()?.to_header();
        if stored.trim() == canonical && self.header_values(keywords::HEADER)?.len() <= 1 {
            return Ok(false);
        }
        self.stage_keywords();
        Ok(true)
    }

    fn stage_keywords(&mut self) {
        let value = self
            .keywords
            .get()
            .map(Keywords::to_header)
            .unwrap_or_default();
        self.set_header(keywords::HEADER, &value);
    }

    /// Whether there are edits waiting for `save`.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.edits.is_empty()
    }

    /// Write pending header edits back through the store. Returns
    /// `false` without touching the disk when nothing changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be read or rewritten.
    pub fn save(&mut self) -> Result<bool> {
        if self.edits.is_empty() {
            return Ok(false);
        }

        let rewritten = rewrite_headers(self.raw()?, self.parsed()?.body_offset, &self.edits);

        let mut out = self.entry.replace()?;
        out.write_all(&rewritten)?;
        out.commit()?;
        debug!("Saved {} in {}", self.entry.key(), self.folder());

        self.edits.clear();
        self.parsed.take();
        self.raw = OnceLock::from(rewritten);
        Ok(true)
    }

    /// Move the message to another folder.
    ///
    /// # Errors
    ///
    /// See [`MailEntry::move_to`].
    pub fn move_to(&mut self, dest: &Folder) -> Result<()> {
        self.entry.move_to(dest)
    }
}

/// Rebuild a message with `edits` replacing any existing fields of the
/// same name. Folded continuation lines of a replaced field go with it.
/// The original line ending style is kept.
fn rewrite_headers(raw: &[u8], body_offset: usize, edits: &[Header]) -> Vec<u8> {
    let body_offset = body_offset.min(raw.len());
    let (head, body) = raw.split_at(body_offset);
    let eol: &[u8] = if head.windows(2).any(|w| w == b"\r\n") {
        b"\r\n"
    } else {
        b"\n"
    };

    let mut out = Vec::with_capacity(raw.len() + 64);
    let mut dropping = false;

    for line in head.split_inclusive(|&b| b == b'\n') {
        let content = line
            .strip_suffix(b"\n")
            .map_or(line, |l| l.strip_suffix(b"\r").unwrap_or(l));
        if content.is_empty() {
            break;
        }

        let continuation = matches!(content[0], b' ' | b'\t');
        if !continuation {
            let name = content
                .iter()
                .position(|&b| b == b':')
                .map_or(content, |i| &content[..i]);
            let name = String::from_utf8_lossy(name);
            dropping = edits
                .iter()
                .any(|e| e.name.eq_ignore_ascii_case(name.trim()));
        }

        if !dropping {
            out.extend_from_slice(line);
            if !line.ends_with(b"\n") {
                out.extend_from_slice(eol);
            }
        }
    }

    for edit in edits.iter().filter(|e| !e.value.is_empty()) {
        out.extend_from_slice(edit.name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(edit.value.as_bytes());
        out.extend_from_slice(eol);
    }

    out.extend_from_slice(eol);
    out.extend_from_slice(body);
    out
}
