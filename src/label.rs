//! Gmail pseudo-labels and their maildir folders
//!
//! The synchronizer exposes a handful of Gmail system labels as maildir
//! folders with `gmail.` names. Rules are written against the IMAP-style
//! labels (`\Trash`, `\Sent`, ...) while keywords and moves use the
//! folder names. This module owns that alias table.

use std::fmt;

/// A label as written in a rule or found in a `Keywords` header.
///
/// System labels (prefixed with `\`) have dedicated variants and a
/// fixed folder alias. Everything else is a [`Label::Keyword`], whose
/// label form and folder form are the same string.
///
/// # Examples
///
/// ```
/// use label_mail::Label;
///
/// let sent = Label::from_label("\\Sent");
/// assert_eq!(sent.folder_name(), "gmail.Sent_Mail");
///
/// let kw = Label::from_label("Alerts");
/// assert_eq!(kw.folder_name(), "Alerts");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Label {
    /// The inbox (`\Inbox` / `INBOX`).
    Inbox,
    /// Deleted messages (`\Trash` / `gmail.Trash`).
    Trash,
    /// Gmail priority marker (`\Important` / `gmail.Important`).
    Important,
    /// Sent messages (`\Sent` / `gmail.Sent_Mail`).
    Sent,
    /// Starred messages (`\Starred` / `gmail.Starred`).
    Starred,
    /// Drafts (`\Draft` / `gmail.Drafts`).
    Draft,
    /// A user-defined label.
    Keyword(String),
}

static ALIASES: [(Label, &str, &str); 6] = [
    (Label::Inbox, "\\Inbox", "INBOX"),
    (Label::Trash, "\\Trash", "gmail.Trash"),
    (Label::Important, "\\Important", "gmail.Important"),
    (Label::Sent, "\\Sent", "gmail.Sent_Mail"),
    (Label::Starred, "\\Starred", "gmail.Starred"),
    (Label::Draft, "\\Draft", "gmail.Drafts"),
];

impl Label {
    /// Parse the label form (`\Trash`, `Alerts`).
    #[must_use]
    pub fn from_label(s: &str) -> Self {
        ALIASES
            .iter()
            .find(|(_, label, _)| *label == s)
            .map_or_else(|| Self::Keyword(s.to_string()), |(l, _, _)| l.clone())
    }

    /// Parse the folder form (`gmail.Trash`, `Alerts`).
    #[must_use]
    pub fn from_folder(s: &str) -> Self {
        ALIASES
            .iter()
            .find(|(_, _, folder)| *folder == s)
            .map_or_else(|| Self::Keyword(s.to_string()), |(l, _, _)| l.clone())
    }

    /// The label form used by rules and predicates.
    #[must_use]
    pub fn as_label_str(&self) -> &str {
        match self {
            Self::Keyword(kw) => kw,
            system => system.alias().0,
        }
    }

    /// The folder form used on disk and in `Keywords` headers.
    #[must_use]
    pub fn folder_name(&self) -> &str {
        match self {
            Self::Keyword(kw) => kw,
            system => system.alias().1,
        }
    }

    fn alias(&self) -> (&'static str, &'static str) {
        ALIASES
            .iter()
            .find(|(l, _, _)| l == self)
            .map_or(("", ""), |(_, label, folder)| (*label, *folder))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label_str())
    }
}

/// Map a label or folder name to its folder form.
///
/// `\Trash` becomes `gmail.Trash`; anything that is already a folder
/// name passes through unchanged.
#[must_use]
pub fn resolve_folder(s: &str) -> String {
    Label::from_label(s).folder_name().to_string()
}

/// Map a folder or label name to its label form.
///
/// `gmail.Sent_Mail` becomes `\Sent`; anything that is already a label
/// passes through unchanged.
#[must_use]
pub fn resolve_label(s: &str) -> String {
    Label::from_folder(s).as_label_str().to_string()
}
