//! Rule-driven labeling for a local maildir
//!
//! Reads a YAML rule set, matches each rule against the messages of a
//! maildir++ tree and applies its actions: adding and clearing
//! keywords in the `Keywords` header, moving the message to another
//! folder and forwarding it over SMTP. Keywords double as Gmail-style
//! labels, so `\Inbox` and `INBOX` name the same thing:
//!
//! ```
//! use label_mail::Label;
//!
//! assert_eq!(Label::from_label("\\Trash").folder_name(), "gmail.Trash");
//! ```
//!
//! A separate [`Vacuum`] sweep retires unwanted folders and tidies
//! keyword headers.

mod apply;
mod config;
mod engine;
mod error;
mod forward;
mod keywords;
mod label;
mod maildir;
mod message;
mod predicate;
mod rules;
mod smtp;
mod summary;
mod vacuum;

pub use apply::Applier;
pub use config::{Paths, SmtpConfig, read_environment};
pub use engine::{DEFAULT_RECENT_HOURS, Labeler, LabelerOptions, SKIP_FOLDERS};
pub use error::{Error, Result};
pub use forward::{FORWARDED_HEADER, Forwarded, Forwarder, Transport, build_forward};
pub use keywords::Keywords;
pub use label::{Label, resolve_folder, resolve_label};
pub use maildir::{Folder, MailEntry, Maildir, ReadState, Replacement};
pub use message::{Address, Message};
pub use predicate::{Skip, Test, Verdict, evaluate};
pub use rules::{CompiledFolderRules, CompiledRule, Match, compile_sources, load};
pub use smtp::SmtpTransport;
pub use summary::ActionsSummary;
pub use vacuum::{Vacuum, VacuumReport, is_unwanted};
