use std::fmt;

use sof_view::{FlatRow, Resource, ViewApplicator, ViewEngine, ViewError};
use tracing::{debug, info};

use crate::HarnessError;
use crate::fixture::{ExpectedRow, TestCase, TestResult};
use crate::matcher::ExpectedRows;
use crate::skip::SkipRegistry;

/// Why a non-skipped case failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    RowCountMismatch { produced: usize, expected: usize },
    RowNotFound { index: usize, row: String },
    MissingExpectedError,
    UnexpectedError(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RowCountMismatch { produced, expected } => write!(
                f,
                "Number of rows does not match: produced {produced} vs expected {expected}"
            ),
            Self::RowNotFound { index, row } => write!(f, "Row not found; index {index}: {row}"),
            Self::MissingExpectedError => {
                f.write_str("An error was expected but no exceptions were thrown")
            }
            Self::UnexpectedError(err) => write!(
                f,
                "View exceptions were thrown while none was expected: {err}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    Skipped { reason: String },
    Passed,
    Failed(FailureReason),
}

impl CaseOutcome {
    #[must_use]
    pub fn into_result(self) -> TestResult {
        match self {
            Self::Skipped { .. } => TestResult::skipped(),
            Self::Passed => TestResult::pass(),
            Self::Failed(reason) => TestResult::fail(reason.to_string()),
        }
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Runs single test cases against one view engine.
#[derive(Debug)]
pub struct TestExecutor<'a, E> {
    engine: &'a E,
    skips: &'a SkipRegistry,
}

impl<'a, E: ViewEngine> TestExecutor<'a, E> {
    #[must_use]
    pub fn new(engine: &'a E, skips: &'a SkipRegistry) -> Self {
        Self { engine, skips }
    }

    /// Decides the outcome of `case`. Only an evaluator failure outside the
    /// expected kinds is returned as an error.
    pub fn execute(
        &self,
        suite_title: &str,
        resources: &[E::Resource],
        case: &TestCase,
    ) -> Result<CaseOutcome, HarnessError> {
        if let Some(reason) = self.skips.reason(suite_title, &case.title) {
            info!(suite = suite_title, test = %case.title, reason, "skipping test");
            return Ok(CaseOutcome::Skipped {
                reason: reason.to_owned(),
            });
        }

        debug!(suite = suite_title, test = %case.title, "running test");
        let evaluated = match self.evaluate(resources, case) {
            Err(err) if !err.is_expected_kind() => {
                return Err(HarnessError::Evaluator {
                    suite: suite_title.to_owned(),
                    test: case.title.clone(),
                    source: err,
                });
            }
            other => other,
        };

        let outcome = match (evaluated, case.expected_rows()) {
            (Ok(_), None) => CaseOutcome::Failed(FailureReason::MissingExpectedError),
            (Ok(rows), Some(expected)) => classify_rows(&rows, expected),
            (Err(_), None) => CaseOutcome::Passed,
            (Err(err), Some(_)) => {
                CaseOutcome::Failed(FailureReason::UnexpectedError(err.to_string()))
            }
        };
        debug!(suite = suite_title, test = %case.title, ?outcome, "test resolved");
        Ok(outcome)
    }

    /// Executes `case` and records its result.
    pub fn run_case(
        &self,
        suite_title: &str,
        resources: &[E::Resource],
        case: &mut TestCase,
    ) -> Result<CaseOutcome, HarnessError> {
        let outcome = self.execute(suite_title, resources, case)?;
        case.result = Some(outcome.clone().into_result());
        Ok(outcome)
    }

    fn evaluate(
        &self,
        resources: &[E::Resource],
        case: &TestCase,
    ) -> Result<Vec<FlatRow>, ViewError> {
        let applicator = self.engine.prepare(&case.view)?;
        let mut rows = Vec::new();
        for resource in resources
            .iter()
            .filter(|resource| resource.resource_type_name() == applicator.resource_type())
        {
            rows.extend(applicator.apply(resource)?);
        }
        Ok(rows)
    }
}

/// Count check first, then every produced row must match some expected row.
#[must_use]
pub fn classify_rows(rows: &[FlatRow], expected: &[ExpectedRow]) -> CaseOutcome {
    if rows.len() != expected.len() {
        return CaseOutcome::Failed(FailureReason::RowCountMismatch {
            produced: rows.len(),
            expected: expected.len(),
        });
    }
    let candidates = ExpectedRows::new(expected);
    match rows.iter().position(|row| !candidates.has_row(row)) {
        Some(index) => CaseOutcome::Failed(FailureReason::RowNotFound {
            index,
            row: rows[index].to_string(),
        }),
        None => CaseOutcome::Passed,
    }
}

#[cfg(test)]
mod tests {
    use sof_types::TypedValue;
    use sof_view::{FlatRow, RowElement};

    use super::{CaseOutcome, FailureReason, classify_rows};
    use crate::fixture::ExpectedRow;

    fn expected(text: &str) -> ExpectedRow {
        serde_json::from_str(text).expect("expected row")
    }

    fn id_row(id: &str) -> FlatRow {
        FlatRow::new(vec![RowElement::new("id", vec![TypedValue::identifier(id)])])
    }

    #[test]
    fn count_mismatch_is_reported_before_row_matching() {
        let outcome = classify_rows(
            &[id_row("p9")],
            &[expected(r#"{"id": "p1"}"#), expected(r#"{"id": "p2"}"#)],
        );
        assert_eq!(
            outcome,
            CaseOutcome::Failed(FailureReason::RowCountMismatch {
                produced: 1,
                expected: 2
            })
        );
    }

    #[test]
    fn first_unmatched_row_is_reported() {
        let outcome = classify_rows(
            &[id_row("p1"), id_row("p3")],
            &[expected(r#"{"id": "p1"}"#), expected(r#"{"id": "p2"}"#)],
        );
        let CaseOutcome::Failed(reason) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(reason.to_string(), r#"Row not found; index 1: {id: [id("p3")]}"#);
    }

    #[test]
    fn one_expected_row_may_cover_duplicates() {
        let outcome = classify_rows(
            &[id_row("p1"), id_row("p1")],
            &[expected(r#"{"id": "p1"}"#), expected(r#"{"id": "p2"}"#)],
        );
        assert_eq!(outcome, CaseOutcome::Passed);
    }

    #[test]
    fn empty_expectation_passes_with_no_rows() {
        assert_eq!(classify_rows(&[], &[]), CaseOutcome::Passed);
    }

    #[test]
    fn outcomes_map_to_results() {
        let skipped = CaseOutcome::Skipped {
            reason: "known defect".to_owned(),
        };
        assert!(skipped.is_skipped());
        assert!(skipped.into_result().is_skip());
        assert!(CaseOutcome::Passed.into_result().passed);
        let failed = CaseOutcome::Failed(FailureReason::MissingExpectedError).into_result();
        assert!(!failed.passed);
        assert!(
            failed
                .failure_reason
                .as_deref()
                .is_some_and(|reason| reason.contains("no exceptions were thrown"))
        );
    }
}
