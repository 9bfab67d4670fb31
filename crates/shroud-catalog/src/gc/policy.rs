//! Deletion criteria and mode resolution.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

use crate::error::{CatalogError, Result};

/// Raw deletion request, as collected from the command line.
///
/// At least one criterion must be set; when several are, the highest
/// priority one applies. `prune_unsafe` is a modifier of `prune_failed`,
/// not a criterion of its own.
///
/// # Example
///
/// ```rust
/// use shroud_catalog::gc::{DeleteMode, DeleteOptions};
///
/// let options = DeleteOptions {
///     retain_recent: Some(3),
///     dry_run: true,
///     ..DeleteOptions::default()
/// };
/// assert_eq!(options.mode().unwrap(), DeleteMode::RetainRecent(3));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete exactly this dump.
    pub dump_id: Option<String>,
    /// Keep the N newest `done` dumps.
    pub retain_recent: Option<usize>,
    /// Delete `failed` dumps.
    pub prune_failed: bool,
    /// With `prune_failed`, also delete `unknown-or-failed` dumps.
    pub prune_unsafe: bool,
    /// Delete `done` dumps started before this instant.
    pub before_date: Option<DateTime<Utc>>,
    /// Delete `done` dumps at least this old.
    pub retain_for: Option<Duration>,
    /// Select and log, but delete nothing.
    pub dry_run: bool,
}

/// A resolved deletion policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteMode {
    /// Delete every `done` dump whose age is at least the duration.
    RetainFor(Duration),
    /// Keep the N newest `done` dumps, delete the rest.
    RetainRecent(usize),
    /// Delete every `failed` dump, and `unknown-or-failed` ones if set.
    PruneFailed {
        /// Also delete dumps whose status could not be determined.
        include_unsafe: bool,
    },
    /// Delete every `done` dump dated before the instant.
    BeforeDate(DateTime<Utc>),
    /// Delete one named dump regardless of status.
    DumpId(String),
}

impl DeleteMode {
    /// Short name used in logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RetainFor(_) => "retain-for",
            Self::RetainRecent(_) => "retain-recent",
            Self::PruneFailed { .. } => "prune-failed",
            Self::BeforeDate(_) => "before-date",
            Self::DumpId(_) => "dump-id",
        }
    }
}

impl fmt::Display for DeleteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl DeleteOptions {
    /// Names of the criteria that are set, in priority order.
    #[must_use]
    pub fn criteria(&self) -> Vec<&'static str> {
        let mut set = Vec::new();
        if self.retain_for.is_some() {
            set.push("--retain-for");
        }
        if self.retain_recent.is_some() {
            set.push("--retain-recent");
        }
        if self.prune_failed {
            set.push("--prune-failed");
        }
        if self.before_date.is_some() {
            set.push("--before-date");
        }
        if self.dump_id.is_some() {
            set.push("dumpId");
        }
        set
    }

    /// Checks that the request names at least one criterion.
    ///
    /// Several criteria are accepted; [`DeleteOptions::mode`] picks one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOptions` if `prune_unsafe` is set without
    /// `prune_failed`, if the dump id is empty, or if no criterion is set.
    pub fn validate(&self) -> Result<()> {
        if self.prune_unsafe && !self.prune_failed {
            return Err(CatalogError::invalid_options(
                "--prune-unsafe works only with --prune-failed",
            ));
        }
        if self.dump_id.as_deref() == Some("") {
            return Err(CatalogError::invalid_options("dump id must not be empty"));
        }
        if self.criteria().is_empty() {
            return Err(CatalogError::invalid_options(
                "at least one deletion criteria must be specified: dumpId, --retain-recent, \
                 --prune-failed, --before-date, --retain-for",
            ));
        }
        Ok(())
    }

    /// Validates and resolves the active mode.
    ///
    /// When several criteria are set the first in priority order wins:
    /// `--retain-for`, `--retain-recent`, `--prune-failed`, `--before-date`,
    /// then the dump id. The others are logged and ignored.
    ///
    /// # Errors
    ///
    /// See [`DeleteOptions::validate`].
    pub fn mode(&self) -> Result<DeleteMode> {
        self.validate()?;
        let criteria = self.criteria();
        if let [winner, ignored @ ..] = criteria.as_slice() {
            if !ignored.is_empty() {
                tracing::warn!(
                    using = *winner,
                    ignored = %ignored.join(", "),
                    "several deletion criteria given, only the first applies"
                );
            }
        }

        if let Some(duration) = self.retain_for {
            return Ok(DeleteMode::RetainFor(duration));
        }
        if let Some(n) = self.retain_recent {
            return Ok(DeleteMode::RetainRecent(n));
        }
        if self.prune_failed {
            return Ok(DeleteMode::PruneFailed {
                include_unsafe: self.prune_unsafe,
            });
        }
        if let Some(date) = self.before_date {
            return Ok(DeleteMode::BeforeDate(date));
        }
        match &self.dump_id {
            Some(id) => Ok(DeleteMode::DumpId(id.clone())),
            None => Err(CatalogError::invalid_options("no deletion criteria")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_criterion_resolves_to_its_mode() {
        let day = Duration::from_secs(86_400);
        let date = Utc::now();
        let cases = [
            (
                DeleteOptions {
                    retain_for: Some(day),
                    ..DeleteOptions::default()
                },
                DeleteMode::RetainFor(day),
            ),
            (
                DeleteOptions {
                    retain_recent: Some(0),
                    ..DeleteOptions::default()
                },
                DeleteMode::RetainRecent(0),
            ),
            (
                DeleteOptions {
                    prune_failed: true,
                    prune_unsafe: true,
                    ..DeleteOptions::default()
                },
                DeleteMode::PruneFailed {
                    include_unsafe: true,
                },
            ),
            (
                DeleteOptions {
                    before_date: Some(date),
                    ..DeleteOptions::default()
                },
                DeleteMode::BeforeDate(date),
            ),
            (
                DeleteOptions {
                    dump_id: Some("d1".into()),
                    ..DeleteOptions::default()
                },
                DeleteMode::DumpId("d1".into()),
            ),
        ];
        for (options, expected) in cases {
            assert_eq!(options.mode().expect("mode"), expected);
        }
    }

    #[test]
    fn no_criteria_is_rejected() {
        let err = DeleteOptions {
            dry_run: true,
            ..DeleteOptions::default()
        }
        .mode()
        .expect_err("empty");
        assert!(err.to_string().contains("at least one deletion criteria"));
    }

    #[test]
    fn several_criteria_resolve_by_priority() {
        let date = Utc::now();
        let options = DeleteOptions {
            retain_recent: Some(2),
            prune_failed: true,
            ..DeleteOptions::default()
        };
        assert!(options.validate().is_ok());
        assert_eq!(options.mode().expect("mode"), DeleteMode::RetainRecent(2));

        let options = DeleteOptions {
            dump_id: Some("d1".into()),
            before_date: Some(date),
            retain_for: Some(Duration::from_secs(60)),
            ..DeleteOptions::default()
        };
        assert_eq!(
            options.criteria(),
            vec!["--retain-for", "--before-date", "dumpId"]
        );
        assert_eq!(
            options.mode().expect("mode"),
            DeleteMode::RetainFor(Duration::from_secs(60))
        );

        let options = DeleteOptions {
            dump_id: Some("d1".into()),
            prune_failed: true,
            ..DeleteOptions::default()
        };
        assert_eq!(
            options.mode().expect("mode"),
            DeleteMode::PruneFailed {
                include_unsafe: false
            }
        );
    }

    #[test]
    fn prune_unsafe_needs_prune_failed() {
        let err = DeleteOptions {
            prune_unsafe: true,
            retain_recent: Some(1),
            ..DeleteOptions::default()
        }
        .validate()
        .expect_err("unsafe alone");
        assert!(err.to_string().contains("--prune-unsafe"));
    }
}
