use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::HarnessError;

/// One excluded case, as stored in a skip-list file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipEntry {
    pub suite: String,
    pub test: String,
    #[serde(default)]
    pub reason: String,
}

impl SkipEntry {
    #[must_use]
    pub fn new(suite: &str, test: &str, reason: &str) -> Self {
        Self {
            suite: suite.to_owned(),
            test: test.to_owned(),
            reason: reason.to_owned(),
        }
    }
}

/// Cases known to be inapplicable, keyed by `suiteTitle.testTitle`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipRegistry {
    entries: BTreeMap<String, String>,
}

impl SkipRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Cases that exercise known evaluator defects rather than view semantics.
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_entries([
            SkipEntry::new(
                "fn_join",
                "join with no value - default to no separator",
                "evaluator requires an explicit join() separator",
            ),
            SkipEntry::new(
                "fhirpath",
                "string join: default separator",
                "evaluator requires an explicit join() separator",
            ),
            SkipEntry::new(
                "fn_boundary",
                "date lowBoundary",
                "lowBoundary() without precision uses the wrong default for dates",
            ),
            SkipEntry::new(
                "fn_boundary",
                "date highBoundary",
                "highBoundary() without precision uses the wrong default for dates",
            ),
            SkipEntry::new(
                "validate",
                "wrong type in forEach",
                "expected error condition is disputed",
            ),
        ])
    }

    pub fn from_entries(entries: impl IntoIterator<Item = SkipEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (Self::key(&entry.suite, &entry.test), entry.reason))
                .collect(),
        }
    }

    /// Loads a JSON array of `{"suite", "test", "reason"}` objects.
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let body = fs::read_to_string(path)?;
        let entries: Vec<SkipEntry> = serde_json::from_str(&body)?;
        Ok(Self::from_entries(entries))
    }

    #[must_use]
    pub fn key(suite: &str, test: &str) -> String {
        format!("{suite}.{test}")
    }

    /// The recorded reason when `suite.test` is registered.
    #[must_use]
    pub fn reason(&self, suite: &str, test: &str) -> Option<&str> {
        self.entries
            .get(&Self::key(suite, test))
            .map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, suite: &str, test: &str) -> bool {
        self.reason(suite, test).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
