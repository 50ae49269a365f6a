//! Predicate engine
//!
//! A rule is checked against a message in two phases. The skip phase
//! short-circuits rules whose actions would change nothing (or that
//! must not touch the message at all). The predicate phase then runs
//! the fixed [`BATTERY`] of tests; the rule applies only if at least
//! one test was active and every active test passed. A `folder` only
//! scopes the rule and never counts as an active test.

use crate::error::Result;
use crate::label::Label;
use crate::message::{Address, Message};
use crate::rules::CompiledRule;
use std::fmt;
use tracing::{debug, trace};

/// One predicate kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Test {
    Folder,
    OkayDate,
    From,
    FromDomain,
    To,
    ToDomain,
    Sender,
    DeliveredTo,
    Subject,
    ISubject,
    SubjectContains,
    SubjectIContains,
    Contains,
    IContains,
}

/// The tests in evaluation order.
pub const BATTERY: [Test; 14] = [
    Test::Folder,
    Test::OkayDate,
    Test::From,
    Test::FromDomain,
    Test::To,
    Test::ToDomain,
    Test::Sender,
    Test::DeliveredTo,
    Test::Subject,
    Test::ISubject,
    Test::SubjectContains,
    Test::SubjectIContains,
    Test::Contains,
    Test::IContains,
];

/// Why a rule was skipped without evaluating predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    AlreadyLabeled,
    AlreadyCleared,
    AlreadyInFolder,
    Starred,
}

/// Outcome of checking one rule against one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Skip(Skip),
    /// The rule has no active predicate, so it never applies.
    NoTests,
    Fail(Test),
    Pass,
}

impl Verdict {
    #[must_use]
    pub const fn applies(self) -> bool {
        matches!(self, Self::Pass)
    }
}

impl fmt::Display for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Folder => "folder",
            Self::OkayDate => "days",
            Self::From => "from",
            Self::FromDomain => "from_domain",
            Self::To => "to",
            Self::ToDomain => "to_domain",
            Self::Sender => "sender",
            Self::DeliveredTo => "delivered_to",
            Self::Subject => "subject",
            Self::ISubject => "isubject",
            Self::SubjectContains => "subject_contains",
            Self::SubjectIContains => "subject_icontains",
            Self::Contains => "contains",
            Self::IContains => "icontains",
        };
        f.write_str(name)
    }
}

impl Test {
    /// The rule's operand for this test, if the test is active.
    fn operand(self, rule: &CompiledRule) -> Option<&str> {
        let m = &rule.matcher;
        match self {
            Self::Folder => m.folder.as_deref(),
            // the date test has no string operand; presence is enough
            Self::OkayDate => rule.okay_date.map(|_| ""),
            Self::From => m.from.as_deref(),
            Self::FromDomain => m.from_domain.as_deref(),
            Self::To => m.to.as_deref(),
            Self::ToDomain => m.to_domain.as_deref(),
            Self::Sender => m.sender.as_deref(),
            Self::DeliveredTo => m.delivered_to.as_deref(),
            Self::Subject => m.subject.as_deref(),
            Self::ISubject => m.isubject.as_deref(),
            Self::SubjectContains => m.subject_contains.as_deref(),
            Self::SubjectIContains => m.subject_icontains.as_deref(),
            Self::Contains => m.contains.as_deref(),
            Self::IContains => m.icontains.as_deref(),
        }
    }

    fn check(self, msg: &Message, rule: &CompiledRule, operand: &str) -> Result<bool> {
        Ok(match self {
            Self::Folder => msg.folder() == operand,
            Self::OkayDate => match rule.okay_date {
                Some(okay) => msg.date()? < okay,
                None => true,
            },
            Self::From => any_mailbox(&msg.address_list("From")?, operand),
            Self::FromDomain => any_domain(&msg.address_list("From")?, operand),
            Self::To => any_mailbox(&msg.address_list("To")?, operand),
            Self::ToDomain => any_domain(&msg.address_list("To")?, operand),
            Self::Sender => any_mailbox(&msg.address_list("Sender")?, operand),
            Self::DeliveredTo => any_mailbox(&msg.address_list("Delivered-To")?, operand),
            Self::Subject => msg.subject()? == operand,
            Self::ISubject => fold(&msg.subject()?) == fold(operand),
            Self::SubjectContains => msg.subject()?.contains(operand),
            Self::SubjectIContains => fold(&msg.subject()?).contains(&fold(operand)),
            Self::Contains => contains_bytes(msg.raw()?, operand.as_bytes()),
            Self::IContains => fold(&String::from_utf8_lossy(msg.raw()?)).contains(&fold(operand)),
        })
    }
}

fn fold(s: &str) -> String {
    s.to_lowercase()
}

fn any_mailbox(list: &[Address], wanted: &str) -> bool {
    let wanted = fold(wanted.trim());
    list.iter().any(|a| fold(&a.email) == wanted)
}

fn any_domain(list: &[Address], wanted: &str) -> bool {
    let wanted = fold(wanted.trim());
    list.iter().any(|a| fold(a.domain()) == wanted)
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

fn skip_reason(msg: &Message, rule: &CompiledRule) -> Result<Option<Skip>> {
    if !rule.label.is_empty() && msg.has_keyword(&rule.label)? {
        return Ok(Some(Skip::AlreadyLabeled));
    }
    if !rule.clear.is_empty() && msg.missing_keyword(&rule.clear)? {
        return Ok(Some(Skip::AlreadyCleared));
    }
    if rule.move_to.as_deref() == Some(msg.folder()) {
        return Ok(Some(Skip::AlreadyInFolder));
    }
    if msg.has_keyword(&[Label::Starred.as_label_str()])? {
        return Ok(Some(Skip::Starred));
    }
    Ok(None)
}

/// Check one rule against one message.
///
/// Any read or parse failure while testing counts as a failed test,
/// so a malformed message never matches.
#[must_use]
pub fn evaluate(msg: &Message, rule: &CompiledRule) -> Verdict {
    match skip_reason(msg, rule) {
        Ok(Some(skip)) => {
            trace!("Rule {} skipped for {}: {:?}", rule.order, msg.entry().key(), skip);
            return Verdict::Skip(skip);
        }
        Ok(None) => {}
        Err(err) => {
            debug!("Cannot read keywords of {}: {}", msg.entry().key(), err);
            return Verdict::Fail(Test::Folder);
        }
    }

    let mut active = 0;
    for test in BATTERY {
        let Some(operand) = test.operand(rule) else {
            continue;
        };
        // folder only scopes the rule
        if test != Test::Folder {
            active += 1;
        }

        match test.check(msg, rule, operand) {
            Ok(true) => trace!("Rule {} {} passed for {}", rule.order, test, msg.entry().key()),
            Ok(false) => {
                debug!("Rule {} {} failed for {}", rule.order, test, msg.entry().key());
                return Verdict::Fail(test);
            }
            Err(err) => {
                debug!(
                    "Rule {} {} failed for {}: {}",
                    rule.order,
                    test,
                    msg.entry().key(),
                    err
                );
                return Verdict::Fail(test);
            }
        }
    }

    if active == 0 {
        debug!("Rule {} has no tests; not applying", rule.order);
        return Verdict::NoTests;
    }
    Verdict::Pass
}
