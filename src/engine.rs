//! Labeling pass over a maildir
//!
//! Provides [`Labeler`], which walks every folder (or one message),
//! evaluates the compiled rules and hands matches to the
//! [`Applier`]. Folders are processed in name order, one message at a
//! time. The cancellation token is checked between folders and between
//! messages, never in the middle of one.

use crate::apply::Applier;
use crate::error::{Error, Result};
use crate::forward::{Forwarder, Transport};
use crate::maildir::{Folder, MailEntry, Maildir};
use crate::message::Message;
use crate::predicate::evaluate;
use crate::rules::{CompiledFolderRules, CompiledRule};
use crate::summary::ActionsSummary;
use chrono::{DateTime, TimeDelta, Utc};
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Folders that are never scanned for rule application.
pub const SKIP_FOLDERS: [&str; 4] = [
    "gmail.Spam",
    "gmail.Drafts",
    "gmail.Trash",
    "gmail.Sent_Mail",
];

/// Default "recent" window in hours: messages modified within it are
/// scanned.
pub const DEFAULT_RECENT_HOURS: i64 = 2;

/// Knobs for one labeling pass.
#[derive(Debug, Clone)]
pub struct LabelerOptions {
    /// Record actions without saving, moving or sending.
    pub dry_run: bool,
    /// Actually send forwards. When off they are reported only.
    pub allow_forwarding: bool,
    /// Only scan messages modified within this window; `None` scans
    /// everything.
    pub recent: Option<TimeDelta>,
    /// Reference time for age windows and the recent window.
    pub now: DateTime<Utc>,
}

impl Default for LabelerOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            allow_forwarding: false,
            recent: Some(TimeDelta::hours(DEFAULT_RECENT_HOURS)),
            now: Utc::now(),
        }
    }
}

/// Runs compiled rules against messages.
pub struct Labeler<T> {
    rules: CompiledFolderRules,
    forwarder: Option<Forwarder<T>>,
    options: LabelerOptions,
    cancel: CancellationToken,
}

impl<T: Transport + Sync> Labeler<T> {
    /// Group `rules` for this pass. `forwarder` is only used when
    /// `options.allow_forwarding` is set.
    #[must_use]
    pub fn new(
        rules: &[CompiledRule],
        forwarder: Option<Forwarder<T>>,
        options: LabelerOptions,
    ) -> Self {
        Self {
            rules: CompiledFolderRules::new(rules, options.now),
            forwarder,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the pass when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn applier<'a>(&'a self, maildir: &'a Maildir) -> Applier<'a, T> {
        let forwarder = self
            .forwarder
            .as_ref()
            .filter(|_| self.options.allow_forwarding);
        Applier::new(maildir, forwarder, self.options.dry_run, self.options.now)
    }

    /// Scan every folder except [`SKIP_FOLDERS`].
    ///
    /// A folder that fails midway is logged and the pass moves on. A
    /// cancelled pass returns what it did so far.
    ///
    /// # Errors
    ///
    /// Returns an error only if the maildir root cannot be listed.
    pub async fn label_messages(&self, maildir: &Maildir) -> Result<ActionsSummary> {
        let folders = maildir.folders()?;
        let applier = self.applier(maildir);
        let mut summary = ActionsSummary::new();

        for folder in folders {
            if SKIP_FOLDERS.contains(&folder.name()) {
                trace!("Skipping folder {}", folder.name());
                continue;
            }

            match self.label_folder(&applier, &folder, &mut summary).await {
                Ok(()) => {}
                Err(Error::Cancelled) => {
                    warn!("Pass cancelled; stopping before {}", folder.name());
                    break;
                }
                Err(e) => error!("Cannot process folder {}: {}", folder.name(), e),
            }
        }

        info!("Pass complete: {} actions", summary.total());
        Ok(summary)
    }

    /// Run the rules for `folder` against a single message, ignoring
    /// the recent window.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be found or an action
    /// fails.
    pub async fn label_message(
        &self,
        maildir: &Maildir,
        folder: &str,
        filename: &str,
    ) -> Result<ActionsSummary> {
        let entry = maildir.folder(folder).find(filename)?;
        let applier = self.applier(maildir);
        let mut summary = ActionsSummary::new();

        let rules = self.rules.rules_for(folder);
        self.label_one(&applier, &rules, entry, &mut summary).await?;
        Ok(summary)
    }

    async fn label_folder(
        &self,
        applier: &Applier<'_, T>,
        folder: &Folder,
        summary: &mut ActionsSummary,
    ) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let rules = self.rules.rules_for(folder.name());
        if rules.is_empty() {
            trace!("No rules for {}", folder.name());
            return Ok(());
        }

        debug!("Scanning {} with {} rules", folder.name(), rules.len());
        for entry in folder.messages()? {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if !self.is_recent(&entry) {
                continue;
            }

            match self.label_one(applier, &rules, entry, summary).await {
                Ok(()) => {}
                Err(e @ (Error::Io(_) | Error::Config(_))) => return Err(e),
                Err(e) => warn!("Skipping message in {}: {}", folder.name(), e),
            }
        }

        Ok(())
    }

    /// Run `rules` against one message. When a rule moves it, the
    /// destination folder's own rules run next, until the message
    /// stops moving or comes back to a folder it already passed.
    async fn label_one(
        &self,
        applier: &Applier<'_, T>,
        rules: &[&CompiledRule],
        entry: MailEntry,
        summary: &mut ActionsSummary,
    ) -> Result<()> {
        trace!("Reading {}", entry.path().display());
        let mut msg = Message::new(entry);
        let mut visited = vec![msg.folder().to_string()];

        Self::run_rules(applier, rules, &mut msg, summary).await?;
        while !visited.iter().any(|f| f == msg.folder()) {
            let folder = msg.folder().to_string();
            debug!("{} moved to {}", msg.entry().key(), folder);
            let rules = self.rules.folder_rules(&folder);
            Self::run_rules(applier, &rules, &mut msg, summary).await?;
            visited.push(folder);
        }
        Ok(())
    }

    async fn run_rules(
        applier: &Applier<'_, T>,
        rules: &[&CompiledRule],
        msg: &mut Message,
        summary: &mut ActionsSummary,
    ) -> Result<()> {
        for rule in rules {
            if evaluate(msg, rule).applies() {
                info!("Rule {} matched {}", rule.order, msg.entry().key());
                applier.apply(msg, rule, summary).await?;
            }
        }
        Ok(())
    }

    fn is_recent(&self, entry: &MailEntry) -> bool {
        let Some(window) = self.options.recent else {
            return true;
        };
        let cutoff = SystemTime::from(self.options.now - window);

        match entry.stat().and_then(|m| m.modified().map_err(Error::from)) {
            Ok(modified) => modified >= cutoff,
            Err(e) => {
                warn!("Cannot stat {}: {}", entry.path().display(), e);
                false
            }
        }
    }
}
