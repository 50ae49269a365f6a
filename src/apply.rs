//! Action applier
//!
//! Performs a matched rule's actions in a fixed order: label, clear,
//! forward, save, move. Saving before the move keeps the rewritten
//! header at the old path until the rename.

use crate::error::Result;
use crate::forward::{Forwarded, Forwarder, Transport};
use crate::maildir::Maildir;
use crate::message::{Message, join_addresses};
use crate::rules::CompiledRule;
use crate::summary::ActionsSummary;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Applies rules to messages under one maildir root.
#[derive(Debug)]
pub struct Applier<'a, T> {
    maildir: &'a Maildir,
    forwarder: Option<&'a Forwarder<T>>,
    dry_run: bool,
    now: DateTime<Utc>,
}

impl<'a, T: Transport + Sync> Applier<'a, T> {
    /// `forwarder` is `None` when sending is not allowed; forward
    /// actions are then only reported.
    #[must_use]
    pub const fn new(
        maildir: &'a Maildir,
        forwarder: Option<&'a Forwarder<T>>,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            maildir,
            forwarder,
            dry_run,
            now,
        }
    }

    /// Apply `rule` to `msg`, recording each completed action.
    ///
    /// In dry-run mode keyword edits happen in memory only, so later
    /// rules see them, but nothing is saved, moved or sent.
    ///
    /// # Errors
    ///
    /// Save and move failures propagate. A failed forward is logged
    /// and does not stop the remaining actions.
    pub async fn apply(
        &self,
        msg: &mut Message,
        rule: &CompiledRule,
        summary: &mut ActionsSummary,
    ) -> Result<()> {
        let key = msg.entry().key().to_string();

        if !rule.label.is_empty() {
            msg.add_keyword(&rule.label)?;
            let action = format!("Labeled {}", rule.label.join(", "));
            info!("{}: {}", key, action);
            summary.record(action);
        }

        if !rule.clear.is_empty() {
            msg.remove_keyword(&rule.clear)?;
            let action = format!("Cleared {}", rule.clear.join(", "));
            info!("{}: {}", key, action);
            summary.record(action);
        }

        if !rule.forward.is_empty() {
            self.forward(msg, rule, summary).await?;
        }

        if !self.dry_run {
            msg.save()?;
        }

        if let Some(dest) = &rule.move_to {
            if !self.dry_run {
                msg.move_to(&self.maildir.folder(dest))?;
            }
            let action = format!("Moved {dest}");
            info!("{}: {}", key, action);
            summary.record(action);
        }

        Ok(())
    }

    async fn forward(
        &self,
        msg: &mut Message,
        rule: &CompiledRule,
        summary: &mut ActionsSummary,
    ) -> Result<()> {
        let addrs = join_addresses(&rule.forward);

        let Some(forwarder) = self.forwarder else {
            info!("{}: NOT Forwarded {}", msg.entry().key(), addrs);
            summary.record(format!("NOT Forwarded {addrs}"));
            return Ok(());
        };

        if self.dry_run {
            if !forwarder.pending(msg, &rule.forward)?.is_empty() {
                summary.record(format!("Forwarded {addrs}"));
            }
            return Ok(());
        }

        match forwarder.forward(msg, &rule.forward, self.now).await {
            Ok(Forwarded::Sent(_)) => summary.record(format!("Forwarded {addrs}")),
            Ok(Forwarded::AlreadyDone) => {}
            Err(e) => warn!("Cannot forward {} to {}: {}", msg.entry().key(), addrs, e),
        }
        Ok(())
    }
}
