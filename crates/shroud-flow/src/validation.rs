//! Validation warnings collected while producing tasks.
//!
//! A [`ValidationContext`] is cheap to clone and immutable from the caller's
//! point of view: [`ValidationContext::with_field`] returns a new context that
//! stamps one more field onto every warning it records. All contexts derived
//! from the same root share one accumulator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// How serious a warning is. `Error` makes the run fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Diagnostic detail.
    Debug,
    /// Informational.
    Info,
    /// Suspicious but not fatal.
    Warning,
    /// Fatal: the dump must not start.
    Error,
}

/// One finding reported during validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    /// Human-readable message.
    pub msg: String,
    /// Severity.
    pub severity: Severity,
    /// Structured context (table, column, parameter, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
}

impl ValidationWarning {
    /// Creates a warning-severity finding.
    #[must_use]
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            severity: Severity::Warning,
            meta: BTreeMap::new(),
        }
    }

    /// Sets the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Adds a metadata field.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Returns true for error severity.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Scoped handle onto a shared warning accumulator.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    fields: Arc<BTreeMap<String, Value>>,
    sink: Arc<Mutex<Vec<ValidationWarning>>>,
}

impl ValidationContext {
    /// Creates a root context with an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a context that adds `key = value` to every warning it records.
    #[must_use]
    pub fn with_field(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut fields = (*self.fields).clone();
        fields.insert(key.into(), value.into());
        Self {
            fields: Arc::new(fields),
            sink: Arc::clone(&self.sink),
        }
    }

    /// Records a warning, stamped with this context's fields.
    ///
    /// Fields already set on the warning are kept.
    pub fn add(&self, mut warning: ValidationWarning) {
        for (key, value) in self.fields.iter() {
            warning
                .meta
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(warning);
    }

    /// Returns every warning recorded through any context sharing this accumulator.
    #[must_use]
    pub fn warnings(&self) -> Vec<ValidationWarning> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of error-severity warnings.
    #[must_use]
    pub fn fatal_count(&self) -> usize {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| w.is_fatal())
            .count()
    }

    /// Returns true if any error-severity warning was recorded.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.fatal_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_contexts_share_the_accumulator() {
        let root = ValidationContext::new().with_field("dump_id", "d1");
        let table = root.with_field("table", "public.users");
        let column = table.with_field("column", "email");

        column.add(ValidationWarning::new("unsupported type"));
        root.add(ValidationWarning::new("no primary key").with_severity(Severity::Info));

        let warnings = root.warnings();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].meta["column"], "email");
        assert_eq!(warnings[0].meta["table"], "public.users");
        assert_eq!(warnings[0].meta["dump_id"], "d1");
        assert!(!warnings[1].meta.contains_key("table"));
    }

    #[test]
    fn with_field_does_not_mutate_parent() {
        let root = ValidationContext::new();
        let _child = root.with_field("table", "t");
        root.add(ValidationWarning::new("m"));
        assert!(root.warnings()[0].meta.is_empty());
    }

    #[test]
    fn warning_meta_wins_over_context() {
        let ctx = ValidationContext::new().with_field("table", "outer");
        ctx.add(ValidationWarning::new("m").with_meta("table", "inner"));
        assert_eq!(ctx.warnings()[0].meta["table"], "inner");
    }

    #[test]
    fn fatal_only_with_error_severity() {
        let ctx = ValidationContext::new();
        ctx.add(ValidationWarning::new("w"));
        assert!(!ctx.is_fatal());
        ctx.with_field("table", "t")
            .add(ValidationWarning::new("e").with_severity(Severity::Error));
        assert!(ctx.is_fatal());
        assert_eq!(ctx.fatal_count(), 1);
    }
}
