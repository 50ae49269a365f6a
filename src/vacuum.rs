//! Vacuum: folder culling and keyword cleanup
//!
//! A maintenance sweep over every folder, skip folders included.
//! Unwanted folders are drained into a better home for each message
//! and then removed. Messages in every other folder get their
//! `Keywords` header canonicalized and deprecated keywords remapped.

use crate::error::{Error, Result};
use crate::keywords::deprecated_replacement;
use crate::maildir::{Folder, Maildir};
use crate::message::Message;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Folder names with these suffixes are unwanted.
pub const UNWANTED_SUFFIXES: [&str; 1] = [","];

/// Folder names with these prefixes are unwanted.
pub const UNWANTED_PREFIXES: [&str; 2] = ["+", "\\"];

/// Folders that are always unwanted.
pub const UNWANTED_NAMES: [&str; 8] = [
    "Drafts",
    "Home_School",
    "Network",
    "OtherJunk",
    "Pseudo-Junk.Social",
    "Pseudo-Junk.Social_Network",
    "[",
    "]",
];

/// Where a drained message goes when nothing better is known.
pub const FALLBACK_FOLDER: &str = "gmail.All_Mail";

const SOCIAL_MARKER: &str = "Social";
const SOCIAL_FOLDER: &str = "JunkSocial";

/// Whether a folder should be drained and removed.
#[must_use]
pub fn is_unwanted(name: &str) -> bool {
    UNWANTED_SUFFIXES.iter().any(|s| name.ends_with(s))
        || UNWANTED_PREFIXES.iter().any(|p| name.starts_with(p))
        || UNWANTED_NAMES.contains(&name)
}

/// What a sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VacuumReport {
    pub folders_removed: Vec<String>,
    pub messages_moved: usize,
    pub messages_rewritten: usize,
    pub failures: usize,
}

/// The vacuum sweep.
#[derive(Debug, Clone, Default)]
pub struct Vacuum {
    dry_run: bool,
    cancel: CancellationToken,
}

impl Vacuum {
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Sweep every folder under `maildir`.
    ///
    /// Per-message and per-folder failures are logged and counted in
    /// the report; the sweep carries on.
    ///
    /// # Errors
    ///
    /// Returns an error only if the maildir root cannot be listed.
    pub fn run(&self, maildir: &Maildir) -> Result<VacuumReport> {
        let mut report = VacuumReport::default();

        for folder in maildir.folders()? {
            if self.cancel.is_cancelled() {
                warn!("Vacuum cancelled before {}", folder.name());
                break;
            }

            let outcome = if is_unwanted(folder.name()) {
                self.drain(maildir, &folder, &mut report)
            } else {
                self.tidy(&folder, &mut report)
            };

            match outcome {
                Ok(()) => {}
                Err(Error::Cancelled) => {
                    warn!("Vacuum cancelled in {}", folder.name());
                    break;
                }
                Err(e) => {
                    warn!("Cannot vacuum {}: {}", folder.name(), e);
                    report.failures += 1;
                }
            }
        }

        info!(
            "Vacuum complete: {} folders removed, {} messages moved, {} rewritten",
            report.folders_removed.len(),
            report.messages_moved,
            report.messages_rewritten
        );
        Ok(report)
    }

    /// Re-home every message, then remove the folder if it is empty.
    fn drain(&self, maildir: &Maildir, folder: &Folder, report: &mut VacuumReport) -> Result<()> {
        info!("Draining unwanted folder {}", folder.name());
        let mut stranded = 0;

        for entry in folder.messages()? {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut msg = Message::new(entry);
            match self.rehome(maildir, folder, &mut msg) {
                Ok(dest) => {
                    debug!("Moved {} to {}", msg.entry().key(), dest);
                    report.messages_moved += 1;
                }
                Err(e) => {
                    warn!("Cannot move {} out of {}: {}", msg.entry().key(), folder.name(), e);
                    report.failures += 1;
                    stranded += 1;
                }
            }
        }

        if stranded > 0 {
            warn!("Keeping {}: {} messages could not be moved", folder.name(), stranded);
            return Ok(());
        }
        if self.dry_run {
            info!("Would remove folder {}", folder.name());
        } else if let Err(e) = maildir.remove_folder(folder.name()) {
            warn!("Cannot remove folder {}: {}", folder.name(), e);
            report.failures += 1;
            return Ok(());
        }
        report.folders_removed.push(folder.name().to_string());
        Ok(())
    }

    fn rehome(&self, maildir: &Maildir, from: &Folder, msg: &mut Message) -> Result<String> {
        remap_deprecated(msg)?;

        let dest = best_alternate_folder(msg, from.name())?;
        let dest = if dest == from.name() || is_unwanted(&dest) || !maildir.folder(&dest).exists() {
            FALLBACK_FOLDER.to_string()
        } else {
            dest
        };

        msg.remove_keyword(&[from.name()])?;
        if !self.dry_run {
            msg.save()?;
            msg.move_to(&maildir.folder(&dest))?;
        }
        Ok(dest)
    }

    /// Canonicalize keywords and remap deprecated ones.
    fn tidy(&self, folder: &Folder, report: &mut VacuumReport) -> Result<()> {
        for entry in folder.messages()? {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut msg = Message::new(entry);
            match self.tidy_message(&mut msg) {
                Ok(true) => report.messages_rewritten += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Cannot tidy {} in {}: {}", msg.entry().key(), folder.name(), e);
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }

    fn tidy_message(&self, msg: &mut Message) -> Result<bool> {
        if msg.has_nonconforming_keywords()? {
            msg.cleanup_keywords()?;
        }
        remap_deprecated(msg)?;

        if !msg.is_dirty() {
            return Ok(false);
        }
        debug!("Rewriting keywords of {}", msg.entry().key());
        if !self.dry_run {
            msg.save()?;
        }
        Ok(true)
    }
}

/// Swap deprecated keywords for their replacements.
fn remap_deprecated(msg: &mut Message) -> Result<()> {
    let stale: Vec<(String, &'static str)> = msg
        .keywords()?
        .iter()
        .filter_map(|k| deprecated_replacement(k).map(|new| (k.to_string(), new)))
        .collect();

    for (old, new) in stale {
        msg.remove_keyword(&[old.as_str()])?;
        msg.add_keyword(&[new])?;
    }
    Ok(())
}

/// Where a message from a retired folder should live: the social junk
/// folder if any keyword mentions it, else the first keyword, else the
/// fallback. The retired folder's own keyword is never a candidate.
///
/// # Errors
///
/// Returns an error if the message cannot be read.
pub fn best_alternate_folder(msg: &Message, retired: &str) -> Result<String> {
    let candidates: Vec<&str> = msg.keywords()?.iter().filter(|k| *k != retired).collect();

    if candidates.iter().any(|k| k.contains(SOCIAL_MARKER)) {
        return Ok(SOCIAL_FOLDER.to_string());
    }
    Ok(candidates
        .first()
        .map_or_else(|| FALLBACK_FOLDER.to_string(), |k| k.replace('/', ".")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn maildir(folders: &[&str]) -> (TempDir, Maildir) {
        let dir = TempDir::new().unwrap();
        for folder in folders {
            for sub in ["new", "cur", "tmp"] {
                fs::create_dir_all(dir.path().join(folder).join(sub)).unwrap();
            }
        }
        let maildir = Maildir::new(dir.path());
        (dir, maildir)
    }

    fn deliver(root: &Path, folder: &str, name: &str, keywords: &str) {
        let body = format!("From: a@x.com\nSubject: s\nKeywords: {keywords}\n\nbody\n");
        fs::write(root.join(folder).join("cur").join(name), body).unwrap();
    }

    fn read(root: &Path, folder: &str, name: &str) -> String {
        fs::read_to_string(root.join(folder).join("cur").join(name)).unwrap()
    }

    #[test]
    fn unwanted_folder_names() {
        let names = [
            "Drafts",
            "Network",
            "[",
            "]",
            "+Later",
            "\\Junk",
            "Oops,",
            "Pseudo-Junk.Social",
        ];
        for name in names {
            assert!(is_unwanted(name), "{name}");
        }
        for name in ["INBOX", "JunkSocial", "gmail.Drafts", "Net,work"] {
            assert!(!is_unwanted(name), "{name}");
        }
    }

    #[test]
    fn social_network_folder_is_drained_into_junk_social() {
        let (dir, maildir) = maildir(&["Pseudo-Junk.Social_Network", "JunkSocial", "INBOX"]);
        deliver(dir.path(), "Pseudo-Junk.Social_Network", "1.a:2,S", "Network");

        let report = Vacuum::new(false).run(&maildir).unwrap();

        assert_eq!(report.folders_removed, vec!["Pseudo-Junk.Social_Network"]);
        assert_eq!(report.messages_moved, 1);
        assert!(!dir.path().join("Pseudo-Junk.Social_Network").exists());
        assert!(read(dir.path(), "JunkSocial", "1.a:2,S").contains("Keywords: JunkSocial\n"));
    }

    #[test]
    fn drained_message_loses_the_retired_keyword() {
        let (dir, maildir) = maildir(&["Home_School", "Teamwork", "gmail.All_Mail"]);
        deliver(dir.path(), "Home_School", "1.a:2,S", "Home_School, Discussion");
        deliver(dir.path(), "Home_School", "2.a:2,S", "Home_School");

        Vacuum::new(false).run(&maildir).unwrap();

        let first = read(dir.path(), "Teamwork", "1.a:2,S");
        assert!(first.contains("Keywords: Teamwork\n"));
        let second = read(dir.path(), "gmail.All_Mail", "2.a:2,S");
        assert!(!second.contains("Keywords"));
        assert!(!dir.path().join("Home_School").exists());
    }

    #[test]
    fn folder_is_kept_when_a_message_cannot_move() {
        let (dir, maildir) = maildir(&["Drafts"]);
        deliver(dir.path(), "Drafts", "1.a:2,S", "Nowhere");

        let report = Vacuum::new(false).run(&maildir).unwrap();

        assert!(report.folders_removed.is_empty());
        assert_eq!(report.failures, 1);
        assert!(dir.path().join("Drafts/cur/1.a:2,S").exists());
    }

    #[test]
    fn kept_folders_are_tidied() {
        let (dir, maildir) = maildir(&["INBOX", "gmail.Trash"]);
        deliver(dir.path(), "INBOX", "1.a:2,S", "b \\Inbox a");
        deliver(dir.path(), "INBOX", "2.a:2,S", "Alerts, OtherJunk");
        deliver(dir.path(), "INBOX", "3.a:2,S", "Alerts, Clean");
        deliver(dir.path(), "gmail.Trash", "4.a:2,S", "Discussion");

        let report = Vacuum::new(false).run(&maildir).unwrap();

        assert_eq!(report.messages_rewritten, 3);
        assert!(read(dir.path(), "INBOX", "1.a:2,S").contains("Keywords: INBOX, a, b\n"));
        assert!(read(dir.path(), "INBOX", "2.a:2,S").contains("Keywords: Alerts, JunkOther\n"));
        assert!(read(dir.path(), "INBOX", "3.a:2,S").contains("Keywords: Alerts, Clean\n"));
        assert!(read(dir.path(), "gmail.Trash", "4.a:2,S").contains("Keywords: Teamwork\n"));

        let again = Vacuum::new(false).run(&maildir).unwrap();
        assert_eq!(again.messages_rewritten, 0);
    }

    #[test]
    fn dry_run_changes_nothing() {
        let (dir, maildir) = maildir(&["Network", "JunkSocial", "INBOX"]);
        deliver(dir.path(), "Network", "1.a:2,S", "Network");
        deliver(dir.path(), "INBOX", "2.a:2,S", "Discussion");

        let report = Vacuum::new(true).run(&maildir).unwrap();

        assert_eq!(report.messages_moved, 1);
        assert_eq!(report.messages_rewritten, 1);
        assert!(dir.path().join("Network/cur/1.a:2,S").exists());
        assert!(read(dir.path(), "INBOX", "2.a:2,S").contains("Keywords: Discussion\n"));
    }

    #[test]
    fn best_alternate_prefers_social() {
        let (dir, maildir) = maildir(&["X"]);
        deliver(dir.path(), "X", "1.a:2,S", "Alpha, FooSocialBar");
        deliver(dir.path(), "X", "2.a:2,S", "X, Projects/Y");
        deliver(dir.path(), "X", "3.a:2,S", "X");
        let folder = maildir.folder("X");

        let msg = Message::new(folder.find("1.a:2,S").unwrap());
        assert_eq!(best_alternate_folder(&msg, "X").unwrap(), "JunkSocial");
        let msg = Message::new(folder.find("2.a:2,S").unwrap());
        assert_eq!(best_alternate_folder(&msg, "X").unwrap(), "Projects.Y");
        let msg = Message::new(folder.find("3.a:2,S").unwrap());
        assert_eq!(best_alternate_folder(&msg, "X").unwrap(), FALLBACK_FOLDER);
    }
}
