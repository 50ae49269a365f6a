//! Rule model and compiler
//!
//! Rules come from two YAML files. The primary file maps environment
//! names to rule lists, with `"*"` applying everywhere:
//!
//! ```yaml
//! "*":
//!   - from: alerts@example.com
//!     label: Alerts
//! work:
//!   - folder: INBOX
//!     subject_icontains: standup
//!     move: Meetings
//! ```
//!
//! The local overlay is a bare list. Rules are compiled once, then
//! grouped by source folder with [`CompiledFolderRules::new`].

use crate::error::{Error, Result};
use crate::label::{Label, resolve_folder, resolve_label};
use crate::message::Address;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Primary-file key whose rules apply in every environment.
pub const ALL_ENVIRONMENTS: &str = "*";

/// Age window for trashing rules that do not set `days`.
pub const DEFAULT_TRASH_DAYS: i64 = 90;

/// The predicate half of a rule. Unset or empty fields are not tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Match {
    pub folder: Option<String>,
    pub from: Option<String>,
    pub from_domain: Option<String>,
    pub to: Option<String>,
    pub to_domain: Option<String>,
    pub sender: Option<String>,
    pub delivered_to: Option<String>,
    pub subject: Option<String>,
    pub isubject: Option<String>,
    pub subject_contains: Option<String>,
    pub subject_icontains: Option<String>,
    pub contains: Option<String>,
    pub icontains: Option<String>,
    pub days: Option<i64>,
}

impl Match {
    /// Turn empty strings into `None` so presence means "active test".
    fn normalized(mut self) -> Self {
        for field in [
            &mut self.folder,
            &mut self.from,
            &mut self.from_domain,
            &mut self.to,
            &mut self.to_domain,
            &mut self.sender,
            &mut self.delivered_to,
            &mut self.subject,
            &mut self.isubject,
            &mut self.subject_contains,
            &mut self.subject_icontains,
            &mut self.contains,
            &mut self.icontains,
        ] {
            if field.as_deref().is_some_and(str::is_empty) {
                *field = None;
            }
        }
        self.folder = self.folder.as_deref().map(canonical_folder);
        if self.days == Some(0) {
            self.days = None;
        }
        self
    }
}

/// A rule as written in YAML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawRule {
    #[serde(flatten)]
    pub matcher: Match,
    #[serde(deserialize_with = "string_or_list")]
    pub clear: Vec<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub label: Vec<String>,
    #[serde(rename = "move")]
    pub move_to: Option<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub forward: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<serde_yaml::Value>),
    Other(serde_yaml::Value),
}

/// Accept a scalar or a list of scalars. Anything else is logged and
/// dropped rather than failing the whole file.
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => vec![s],
        StringOrList::Many(items) => items
            .into_iter()
            .map(|item| {
                scalar_to_string(&item).unwrap_or_else(|| {
                    warn!("Ignoring non-scalar list item in rule: {:?}", item);
                    String::new()
                })
            })
            .collect(),
        StringOrList::Other(value) => {
            if let Some(s) = scalar_to_string(&value) {
                vec![s]
            } else {
                if !value.is_null() {
                    warn!("Ignoring malformed rule field: {:?}", value);
                }
                Vec::new()
            }
        }
    })
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A rule ready for evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRule {
    pub matcher: Match,
    /// Messages must be dated before this. Set during grouping.
    pub okay_date: Option<DateTime<Utc>>,
    /// Labels to remove, label form.
    pub clear: Vec<String>,
    /// Labels to add, label form.
    pub label: Vec<String>,
    /// Destination folder basename.
    pub move_to: Option<String>,
    pub forward: Vec<Address>,
    /// Position in the assembled rule list.
    pub order: usize,
}

impl CompiledRule {
    /// Whether the rule screens messages by age.
    #[must_use]
    pub fn needs_okay_date(&self) -> bool {
        self.matcher.days.is_some_and(|d| d != 0)
            || self.label.iter().any(|l| l == Label::Trash.as_label_str())
            || self.move_to.as_deref() == Some(Label::Trash.folder_name())
    }

    /// `now` minus the rule's age window.
    #[must_use]
    pub fn okay_date_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let days = match self.matcher.days {
            Some(d) if d != 0 => d,
            _ => DEFAULT_TRASH_DAYS,
        };
        TimeDelta::try_days(days)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether the rule does anything at all.
    #[must_use]
    pub fn has_action(&self) -> bool {
        !self.clear.is_empty()
            || !self.label.is_empty()
            || self.move_to.is_some()
            || !self.forward.is_empty()
    }
}

fn is_mailbox(addr: &Address) -> bool {
    addr.email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty())
}

fn canonical_label(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let label = resolve_label(s);
    if label.starts_with('\\') {
        Some(label)
    } else {
        Some(label.replace('.', "/"))
    }
}

fn canonical_folder(s: &str) -> String {
    resolve_folder(s.trim()).replace('/', ".")
}

impl RawRule {
    /// Normalize fields and parse forward addresses. Returns `None`
    /// for a rule with no action.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a forward address does not parse.
    pub fn compile(self, order: usize) -> Result<Option<CompiledRule>> {
        let mut forward = Vec::new();
        for raw in self.forward.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let parsed = Address::parse_list(raw)
                .map_err(|e| Error::Config(format!("Invalid forward address {raw:?}: {e}")))?;
            if parsed.is_empty() || !parsed.iter().all(is_mailbox) {
                return Err(Error::Config(format!("Invalid forward address {raw:?}")));
            }
            forward.extend(parsed);
        }

        let rule = CompiledRule {
            matcher: self.matcher.normalized(),
            okay_date: None,
            clear: self.clear.iter().filter_map(|s| canonical_label(s)).collect(),
            label: self.label.iter().filter_map(|s| canonical_label(s)).collect(),
            move_to: self
                .move_to
                .as_deref()
                .map(canonical_folder)
                .filter(|m| !m.is_empty()),
            forward,
            order,
        };

        if rule.has_action() {
            Ok(Some(rule))
        } else {
            debug!("Discarding rule {} with no action", order);
            Ok(None)
        }
    }
}

/// Assemble rules from both sources in priority order: `"*"`, then the
/// active environment, then the local overlay.
///
/// # Errors
///
/// Returns [`Error::Config`] if either document is malformed or a rule
/// fails to compile.
pub fn compile_sources(primary: &str, local: &str, env: &str) -> Result<Vec<CompiledRule>> {
    let mut by_env: BTreeMap<String, Option<Vec<RawRule>>> = if primary.trim().is_empty() {
        BTreeMap::new()
    } else {
        serde_yaml::from_str(primary)?
    };
    let local: Option<Vec<RawRule>> = if local.trim().is_empty() {
        None
    } else {
        serde_yaml::from_str(local)?
    };

    let mut raw = by_env.remove(ALL_ENVIRONMENTS).flatten().unwrap_or_default();
    if !env.is_empty() && env != ALL_ENVIRONMENTS {
        raw.extend(by_env.remove(env).flatten().unwrap_or_default());
    }
    raw.extend(local.unwrap_or_default());

    let mut compiled = Vec::with_capacity(raw.len());
    for (order, rule) in raw.into_iter().enumerate() {
        if let Some(rule) = rule.compile(order)? {
            compiled.push(rule);
        }
    }
    Ok(compiled)
}

/// Read and compile both rule files.
///
/// # Errors
///
/// The primary file must exist; a missing local overlay counts as
/// empty. Parse and compile failures are [`Error::Config`].
pub fn load(primary: &Path, local: &Path, env: &str) -> Result<Vec<CompiledRule>> {
    let primary_text = fs::read_to_string(primary).map_err(|e| {
        Error::Config(format!("Cannot read rules file {}: {e}", primary.display()))
    })?;

    let local_text = match fs::read_to_string(local) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No local rules at {}", local.display());
            String::new()
        }
        Err(e) => {
            return Err(Error::Config(format!(
                "Cannot read local rules file {}: {e}",
                local.display()
            )));
        }
    };

    let rules = compile_sources(&primary_text, &local_text, env)?;
    info!("Loaded {} rules for environment {:?}", rules.len(), env);
    Ok(rules)
}

/// Compiled rules bucketed by source folder. The `""` bucket applies
/// to every folder.
#[derive(Debug, Clone, Default)]
pub struct CompiledFolderRules {
    buckets: BTreeMap<String, Vec<CompiledRule>>,
}

impl CompiledFolderRules {
    /// Stamp age windows relative to `now` and bucket the rules.
    ///
    /// A rule that both names a source folder and moves gets a
    /// companion in the destination bucket that clears `\Inbox`. The
    /// labeler runs the destination bucket right after a move, so the
    /// companion fires in the same pass.
    #[must_use]
    pub fn new(rules: &[CompiledRule], now: DateTime<Utc>) -> Self {
        let mut buckets: BTreeMap<String, Vec<CompiledRule>> = BTreeMap::new();

        for rule in rules {
            let mut rule = rule.clone();
            if rule.needs_okay_date() {
                let okay = rule.okay_date_at(now);
                // a window ending in the future matches nothing
                rule.okay_date = Some(if okay > now {
                    DateTime::<Utc>::MIN_UTC
                } else {
                    okay
                });
            }

            if let (Some(source), Some(dest)) = (&rule.matcher.folder, &rule.move_to) {
                if source != dest {
                    let companion = CompiledRule {
                        matcher: Match {
                            folder: Some(dest.clone()),
                            ..rule.matcher.clone()
                        },
                        okay_date: rule.okay_date,
                        clear: vec![Label::Inbox.as_label_str().to_string()],
                        label: Vec::new(),
                        move_to: None,
                        forward: Vec::new(),
                        order: rule.order,
                    };
                    buckets.entry(dest.clone()).or_default().push(companion);
                }
            }

            let key = rule.matcher.folder.clone().unwrap_or_default();
            buckets.entry(key).or_default().push(rule);
        }

        Self { buckets }
    }

    /// Rules that apply in `folder`, in assembly order.
    #[must_use]
    pub fn rules_for(&self, folder: &str) -> Vec<&CompiledRule> {
        let mut rules: Vec<&CompiledRule> = self
            .buckets
            .get("")
            .into_iter()
            .chain(self.buckets.get(folder).filter(|_| !folder.is_empty()))
            .flatten()
            .collect();
        rules.sort_by_key(|r| r.order);
        rules
    }

    /// Rules scoped to `folder` alone, without the universal bucket.
    #[must_use]
    pub fn folder_rules(&self, folder: &str) -> Vec<&CompiledRule> {
        self.buckets
            .get(folder)
            .filter(|_| !folder.is_empty())
            .into_iter()
            .flatten()
            .collect()
    }

    /// Total number of rules, companions included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-07-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn scalar_and_list_fields() {
        let rules = compile_sources(
            r#"
"*":
  - from: a@x.com
    label: One
  - from: b@x.com
    label: [Two, " Three ", ""]
    clear:
      - Four
      - {nested: map}
"#,
            "",
            "",
        )
        .unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].label, vec!["One"]);
        assert_eq!(rules[1].label, vec!["Two", "Three"]);
        assert_eq!(rules[1].clear, vec!["Four"]);
    }

    #[test]
    fn malformed_field_becomes_empty() {
        let rules = compile_sources(
            "\"*\":\n  - from: a@x.com\n    label: {bad: shape}\n    move: Archive\n",
            "",
            "",
        )
        .unwrap();
        assert!(rules[0].label.is_empty());
        assert_eq!(rules[0].move_to.as_deref(), Some("Archive"));
    }

    #[test]
    fn assembly_order_is_star_env_local() {
        let primary = r#"
work:
  - from: env@x.com
    label: Env
"*":
  - from: star@x.com
    label: Star
home:
  - from: home@x.com
    label: Home
"#;
        let local = "- from: local@x.com\n  label: Local\n";

        let rules = compile_sources(primary, local, "work").unwrap();
        let labels: Vec<&str> = rules.iter().map(|r| r.label[0].as_str()).collect();
        assert_eq!(labels, vec!["Star", "Env", "Local"]);
        let orders: Vec<usize> = rules.iter().map(|r| r.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn labels_and_moves_are_canonicalized() {
        let rules = compile_sources(
            r#"
"*":
  - from: a@x.com
    label: [gmail.Sent_Mail, Projects.X, "\\Trash"]
    clear: INBOX
  - from: b@x.com
    move: "\\Trash"
  - from: c@x.com
    move: " Projects/X "
"#,
            "",
            "",
        )
        .unwrap();

        assert_eq!(rules[0].label, vec!["\\Sent", "Projects/X", "\\Trash"]);
        assert_eq!(rules[0].clear, vec!["\\Inbox"]);
        assert_eq!(rules[1].move_to.as_deref(), Some("gmail.Trash"));
        assert_eq!(rules[2].move_to.as_deref(), Some("Projects.X"));
    }

    #[test]
    fn rules_without_action_are_discarded() {
        let rules = compile_sources("\"*\":\n  - from: a@x.com\n", "", "").unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn bad_forward_address_fails_compilation() {
        let err = compile_sources(
            "\"*\":\n  - from: a@x.com\n    forward: not-an-address\n",
            "",
            "",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn forward_addresses_are_parsed() {
        let rules = compile_sources(
            "\"*\":\n  - from: a@x.com\n    forward: [me@home.com, \"Boss <boss@corp.com>\"]\n",
            "",
            "",
        )
        .unwrap();
        let emails: Vec<&str> = rules[0].forward.iter().map(|a| a.email.as_str()).collect();
        assert_eq!(emails, vec!["me@home.com", "boss@corp.com"]);
    }

    #[test]
    fn needs_okay_date() {
        let rules = compile_sources(
            r#"
"*":
  - {from: a@x.com, label: A}
  - {from: a@x.com, label: A, days: 3}
  - {from: a@x.com, label: "\\Trash"}
  - {from: a@x.com, move: gmail.Trash}
"#,
            "",
            "",
        )
        .unwrap();
        let needs: Vec<bool> = rules.iter().map(CompiledRule::needs_okay_date).collect();
        assert_eq!(needs, vec![false, true, true, true]);

        assert_eq!(rules[1].okay_date_at(now()), now() - TimeDelta::days(3));
        assert_eq!(rules[2].okay_date_at(now()), now() - TimeDelta::days(90));
    }

    #[test]
    fn negative_days_puts_okay_date_in_future() {
        let rules = compile_sources("\"*\":\n  - {from: a@x.com, label: A, days: -2}\n", "", "")
            .unwrap();
        assert!(rules[0].okay_date_at(now()) > now());
    }

    #[test]
    fn grouping_adds_inbox_clearing_companion() {
        let rules = compile_sources(
            r#"
"*":
  - {from: u@x.com, label: Universal}
  - {folder: INBOX, from: x@y.com, move: Projects/X}
"#,
            "",
            "",
        )
        .unwrap();
        let grouped = CompiledFolderRules::new(&rules, now());
        assert_eq!(grouped.len(), 3);

        let inbox = grouped.rules_for("INBOX");
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[1].move_to.as_deref(), Some("Projects.X"));

        let dest = grouped.rules_for("Projects.X");
        assert_eq!(dest.len(), 2);
        let companion = dest[1];
        assert_eq!(companion.matcher.folder.as_deref(), Some("Projects.X"));
        assert_eq!(companion.matcher.from.as_deref(), Some("x@y.com"));
        assert_eq!(companion.clear, vec!["\\Inbox"]);
        assert!(companion.move_to.is_none());

        assert_eq!(grouped.rules_for("Other").len(), 1);

        let only_dest = grouped.folder_rules("Projects.X");
        assert_eq!(only_dest.len(), 1);
        assert_eq!(only_dest[0].clear, vec!["\\Inbox"]);
        assert!(grouped.folder_rules("").is_empty());
        assert!(grouped.folder_rules("Other").is_empty());
    }

    #[test]
    fn grouping_stamps_okay_date() {
        let rules =
            compile_sources("\"*\":\n  - {from: a@x.com, move: \"\\\\Trash\"}\n", "", "").unwrap();
        let grouped = CompiledFolderRules::new(&rules, now());
        assert_eq!(
            grouped.rules_for("INBOX")[0].okay_date,
            Some(now() - TimeDelta::days(90))
        );
    }

    #[test]
    fn load_requires_primary_but_not_local() {
        let mut primary = NamedTempFile::new().unwrap();
        writeln!(primary, "\"*\":\n  - {{from: a@x.com, label: A}}").unwrap();
        let missing = primary.path().with_extension("missing");

        let rules = load(primary.path(), &missing, "").unwrap();
        assert_eq!(rules.len(), 1);

        assert!(matches!(
            load(&missing, primary.path(), ""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn unparsable_yaml_is_a_config_error() {
        assert!(matches!(
            compile_sources("\"*\": [unterminated", "", ""),
            Err(Error::Config(_))
        ));
    }
}
