//! Per-pass action counters

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Count of applied actions keyed by a human-readable description
/// such as `Labeled Alerts` or `Moved Projects.X`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ActionsSummary(BTreeMap<String, usize>);

impl ActionsSummary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, action: impl Into<String>) {
        *self.0.entry(action.into()).or_default() += 1;
    }

    /// Fold another summary into this one.
    pub fn merge(&mut self, other: Self) {
        for (action, count) in other.0 {
            *self.0.entry(action).or_default() += count;
        }
    }

    #[must_use]
    pub fn get(&self, action: &str) -> usize {
        self.0.get(action).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl fmt::Display for ActionsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "Nothing to do.");
        }

        let total = self.total();
        let key_width = self
            .0
            .keys()
            .map(|k| k.chars().count())
            .chain(std::iter::once("Total".len()))
            .max()
            .unwrap_or(0);
        let count_width = total.to_string().len();

        for (action, count) in &self.0 {
            writeln!(f, "{action:>key_width$} : {count:>count_width$}")?;
        }
        writeln!(f, "{}", "-".repeat(key_width + 3 + count_width))?;
        writeln!(f, "{:>key_width$} : {total:>count_width$}", "Total")
    }
}
