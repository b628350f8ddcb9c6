use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sof_types::JsonValue;

use crate::HarnessError;

/// Failure reason recorded for cases excluded by the skip registry.
pub const SKIPPED_REASON: &str = "skipped";

/// One fixture document: sample resources plus the test cases run against them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    pub title: String,
    #[serde(default)]
    pub resources: Vec<Value>,
    pub tests: Vec<TestCase>,
}

impl TestSuite {
    pub fn from_json_str(body: &str) -> Result<Self, HarnessError> {
        let suite: Self = serde_json::from_str(body)?;
        suite.validate()?;
        Ok(suite)
    }

    /// Every case must name an operative expectation: `expectError: true` or an `expect` list.
    pub fn validate(&self) -> Result<(), HarnessError> {
        for case in &self.tests {
            if !case.expects_error() && case.expected.is_none() {
                return Err(HarnessError::FixtureFormat(format!(
                    "{}.{}: test declares neither expect nor expectError",
                    self.title, case.title
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub title: String,
    pub view: Value,
    #[serde(default, rename = "expect", skip_serializing_if = "Option::is_none")]
    pub expected: Option<Vec<ExpectedRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_error: Option<bool>,
    // Filled in once the case has been skipped or executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TestResult>,
}

impl TestCase {
    #[must_use]
    pub fn expects_error(&self) -> bool {
        self.expect_error == Some(true)
    }

    /// Expected rows when the case is not an expected-error case.
    #[must_use]
    pub fn expected_rows(&self) -> Option<&[ExpectedRow]> {
        if self.expects_error() {
            None
        } else {
            self.expected.as_deref()
        }
    }
}

/// Field name to expected value, in fixture order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct ExpectedRow {
    fields: Vec<(String, JsonValue)>,
}

impl ExpectedRow {
    #[must_use]
    pub fn new(fields: Vec<(String, JsonValue)>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Map<String, Value>> for ExpectedRow {
    fn from(map: Map<String, Value>) -> Self {
        let fields = map
            .into_iter()
            .map(|(name, value)| (name, JsonValue::from(value)))
            .collect();
        Self { fields }
    }
}

impl From<ExpectedRow> for Map<String, Value> {
    fn from(row: ExpectedRow) -> Self {
        row.fields
            .into_iter()
            .map(|(name, value)| (name, Value::from(value)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub passed: bool,
    pub failure_reason: Option<String>,
}

impl TestResult {
    #[must_use]
    pub fn pass() -> Self {
        Self {
            passed: true,
            failure_reason: None,
        }
    }

    #[must_use]
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            failure_reason: Some(reason.into()),
        }
    }

    #[must_use]
    pub fn skipped() -> Self {
        Self::fail(SKIPPED_REASON)
    }

    #[must_use]
    pub fn is_skip(&self) -> bool {
        !self.passed && self.failure_reason.as_deref() == Some(SKIPPED_REASON)
    }
}
