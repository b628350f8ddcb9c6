use std::cell::Cell;
use std::fs;

use serde_json::{Value, json};
use sof_conformance::{
    CaseOutcome, FailureReason, HarnessConfig, HarnessError, SkipEntry, SkipRegistry, SkipSource,
    TestExecutor, TestSuite, execute_suite, run_suites,
};
use sof_view::{
    BasicViewEngine, CompiledView, FlatRow, JsonResource, JsonResourceParser, ViewApplicator,
    ViewEngine, ViewError,
};

/// Delegates to the built-in engine and counts how often it was asked to prepare a view.
#[derive(Default)]
struct CountingEngine {
    prepared: Cell<usize>,
}

impl ViewEngine for CountingEngine {
    type Resource = JsonResource;
    type Applicator = CompiledView;

    fn prepare(&self, view: &Value) -> Result<CompiledView, ViewError> {
        self.prepared.set(self.prepared.get() + 1);
        BasicViewEngine.prepare(view)
    }
}

/// Fails every application with an error kind no fixture can expect.
struct BrokenEngine;

struct BrokenApplicator;

impl ViewApplicator<JsonResource> for BrokenApplicator {
    fn resource_type(&self) -> &str {
        "Patient"
    }

    fn apply(&self, _resource: &JsonResource) -> Result<Vec<FlatRow>, ViewError> {
        Err(ViewError::Internal("evaluator crashed".to_owned()))
    }
}

impl ViewEngine for BrokenEngine {
    type Resource = JsonResource;
    type Applicator = BrokenApplicator;

    fn prepare(&self, _view: &Value) -> Result<BrokenApplicator, ViewError> {
        Ok(BrokenApplicator)
    }
}

fn id_and_birth_date_view() -> Value {
    json!({
        "resource": "Patient",
        "select": [{"column": [
            {"name": "id", "path": "id"},
            {"name": "birthDate", "path": "birthDate"}
        ]}]
    })
}

fn basic_suite(tests: Value) -> TestSuite {
    TestSuite::from_json_str(
        &json!({
            "title": "basic",
            "resources": [{"resourceType": "Patient", "id": "p1", "birthDate": "1990-01-01"}],
            "tests": tests
        })
        .to_string(),
    )
    .expect("suite should parse")
}

fn run_single(suite: &mut TestSuite) -> CaseOutcome {
    let skips = SkipRegistry::empty();
    let executor = TestExecutor::new(&BasicViewEngine, &skips);
    let resources = parse_resources(suite);
    executor
        .run_case(&suite.title, &resources, &mut suite.tests[0])
        .expect("case should resolve")
}

fn parse_resources(suite: &TestSuite) -> Vec<JsonResource> {
    use sof_view::ResourceParser;

    suite
        .resources
        .iter()
        .map(|raw| JsonResourceParser.parse(raw).expect("resource"))
        .collect()
}

#[test]
fn scenario_a_matching_row_passes() {
    let mut suite = basic_suite(json!([{
        "title": "a",
        "view": id_and_birth_date_view(),
        "expect": [{"id": "p1", "birthDate": "1990-01-01"}]
    }]));
    assert_eq!(run_single(&mut suite), CaseOutcome::Passed);
    let result = suite.tests[0].result.as_ref().expect("result attached");
    assert!(result.passed);
    assert_eq!(result.failure_reason, None);
}

#[test]
fn scenario_b_row_count_mismatch_fails() {
    let mut suite = basic_suite(json!([{
        "title": "b",
        "view": id_and_birth_date_view(),
        "expect": [
            {"id": "p1", "birthDate": "1990-01-01"},
            {"id": "p2", "birthDate": "2000-01-01"}
        ]
    }]));
    assert_eq!(
        run_single(&mut suite),
        CaseOutcome::Failed(FailureReason::RowCountMismatch {
            produced: 1,
            expected: 2
        })
    );
    let reason = suite.tests[0]
        .result
        .as_ref()
        .and_then(|result| result.failure_reason.clone())
        .expect("failure reason");
    assert!(reason.contains('1') && reason.contains('2'), "{reason}");
}

#[test]
fn scenario_c_definition_error_is_expected() {
    let mut suite = basic_suite(json!([{
        "title": "c",
        "view": {"resource": "Patient", "select": [{"column": [{"name": "bad name", "path": "id"}]}]},
        "expectError": true
    }]));
    assert_eq!(run_single(&mut suite), CaseOutcome::Passed);
}

#[test]
fn scenario_d_missing_error_fails() {
    let mut suite = basic_suite(json!([{
        "title": "d",
        "view": id_and_birth_date_view(),
        "expectError": true
    }]));
    assert_eq!(
        run_single(&mut suite),
        CaseOutcome::Failed(FailureReason::MissingExpectedError)
    );
    let reason = suite.tests[0]
        .result
        .as_ref()
        .and_then(|result| result.failure_reason.as_deref())
        .expect("failure reason")
        .to_owned();
    assert!(reason.contains("no exceptions were thrown"), "{reason}");
}

#[test]
fn unexpected_error_fails_the_case() {
    let mut suite = basic_suite(json!([{
        "title": "e",
        "view": {"resource": "Patient", "select": [{"column": [{"name": "x", "path": "birthDate.lowBoundary()"}]}]},
        "expect": []
    }]));
    let outcome = run_single(&mut suite);
    assert!(
        matches!(outcome, CaseOutcome::Failed(FailureReason::UnexpectedError(_))),
        "{outcome:?}"
    );
}

#[test]
fn skipped_cases_never_reach_the_engine() {
    let mut suite = basic_suite(json!([
        {"title": "skip me", "view": id_and_birth_date_view(), "expectError": true},
        {"title": "run me", "view": id_and_birth_date_view(), "expect": [{"id": "p1", "birthDate": "1990-01-01"}]}
    ]));
    let skips = SkipRegistry::from_entries([SkipEntry::new("basic", "skip me", "known defect")]);
    let engine = CountingEngine::default();
    let executor = TestExecutor::new(&engine, &skips);
    let summary = execute_suite(&executor, &JsonResourceParser, &mut suite).expect("suite");

    assert_eq!(engine.prepared.get(), 1);
    assert_eq!((summary.total, summary.passed, summary.skipped), (2, 1, 1));
    assert!(suite.tests[0].result.as_ref().is_some_and(|r| r.is_skip()));
    assert!(suite.tests[1].result.as_ref().is_some_and(|r| r.passed));
}

#[test]
fn row_count_law_with_three_resources() {
    let suite_for = |expect: Value| {
        TestSuite::from_json_str(
            &json!({
                "title": "rows",
                "resources": [
                    {"resourceType": "Patient", "id": "p1"},
                    {"resourceType": "Patient", "id": "p2"},
                    {"resourceType": "Patient", "id": "p3"},
                    {"resourceType": "Observation", "id": "o1"}
                ],
                "tests": [{
                    "title": "ids",
                    "view": {"resource": "Patient", "select": [{"column": [{"name": "id", "path": "id"}]}]},
                    "expect": expect
                }]
            })
            .to_string(),
        )
        .expect("suite")
    };

    let mut passing = suite_for(json!([{"id": "p3"}, {"id": "p1"}, {"id": "p2"}]));
    assert_eq!(run_single(&mut passing), CaseOutcome::Passed);

    let mut unmatched = suite_for(json!([{"id": "p1"}, {"id": "p2"}, {"id": "p4"}]));
    assert!(matches!(
        run_single(&mut unmatched),
        CaseOutcome::Failed(FailureReason::RowNotFound { index: 2, .. })
    ));
}

#[test]
fn outcomes_are_deterministic() {
    let build = || {
        basic_suite(json!([
            {"title": "one", "view": id_and_birth_date_view(), "expect": [{"id": "p1", "birthDate": "1990-01-01"}]},
            {"title": "two", "view": id_and_birth_date_view(), "expectError": true}
        ]))
    };
    let skips = SkipRegistry::builtin();
    let executor = TestExecutor::new(&BasicViewEngine, &skips);
    let mut first = build();
    let mut second = build();
    execute_suite(&executor, &JsonResourceParser, &mut first).expect("first run");
    execute_suite(&executor, &JsonResourceParser, &mut second).expect("second run");
    assert_eq!(first, second);
}

#[test]
fn internal_evaluator_failure_is_fatal() {
    let mut suite = basic_suite(json!([{
        "title": "anything",
        "view": id_and_birth_date_view(),
        "expectError": true
    }]));
    let skips = SkipRegistry::empty();
    let executor = TestExecutor::new(&BrokenEngine, &skips);
    let err = execute_suite(&executor, &JsonResourceParser, &mut suite).expect_err("fatal");
    match err {
        HarnessError::Evaluator { suite, test, source } => {
            assert_eq!((suite.as_str(), test.as_str()), ("basic", "anything"));
            assert_eq!(source, ViewError::Internal("evaluator crashed".to_owned()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(suite.tests[0].result.is_none());
}

#[test]
fn fatal_failure_releases_a_partial_artifact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fixtures = dir.path().join("fixtures");
    fs::create_dir_all(&fixtures).expect("mkdir");
    fs::write(
        fixtures.join("basic.json"),
        json!({
            "title": "basic",
            "resources": [{"resourceType": "Patient", "id": "p1"}],
            "tests": [{"title": "t", "view": id_and_birth_date_view(), "expect": []}]
        })
        .to_string(),
    )
    .expect("write fixture");
    let config = HarnessConfig {
        fixture_root: fixtures,
        output_path: dir.path().join("out/results.json"),
        skip_registry: SkipSource::Disabled,
    };

    let err = run_suites(&config, &JsonResourceParser, &BrokenEngine, &SkipRegistry::empty())
        .expect_err("fatal");
    assert!(matches!(err, HarnessError::Evaluator { .. }));
    let partial = fs::read_to_string(&config.output_path).expect("writer was released");
    assert_eq!(partial, "[");
}

#[test]
fn malformed_resource_is_fatal() {
    let mut suite = TestSuite::from_json_str(
        r#"{"title": "bad", "resources": [{"id": "x"}], "tests": []}"#,
    )
    .expect("suite");
    let skips = SkipRegistry::empty();
    let executor = TestExecutor::new(&BasicViewEngine, &skips);
    let err = execute_suite(&executor, &JsonResourceParser, &mut suite).expect_err("fatal");
    assert!(matches!(err, HarnessError::Resource(_)), "{err}");
}

#[test]
fn object_expectation_fails_only_its_own_case() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fixtures = dir.path().join("fixtures");
    fs::create_dir_all(&fixtures).expect("mkdir");
    fs::write(
        fixtures.join("objects.json"),
        json!({
            "title": "objects",
            "resources": [{"resourceType": "Patient", "id": "p1", "birthDate": "1990-01-01"}],
            "tests": [
                {
                    "title": "object value",
                    "view": id_and_birth_date_view(),
                    "expect": [{"id": "p1", "birthDate": {"value": "1990-01-01"}}]
                },
                {
                    "title": "plain value",
                    "view": id_and_birth_date_view(),
                    "expect": [{"id": "p1", "birthDate": "1990-01-01"}]
                }
            ]
        })
        .to_string(),
    )
    .expect("write fixture");
    let config = HarnessConfig {
        fixture_root: fixtures,
        output_path: dir.path().join("results.json"),
        skip_registry: SkipSource::Disabled,
    };

    let report = run_suites(&config, &JsonResourceParser, &BasicViewEngine, &SkipRegistry::empty())
        .expect("object expectations are not fatal");
    assert_eq!((report.passed(), report.failed()), (1, 1));

    let artifact: Value =
        serde_json::from_str(&fs::read_to_string(&config.output_path).expect("artifact"))
            .expect("valid json");
    let tests = &artifact[0]["tests"];
    assert_eq!(tests[0]["result"]["passed"], false);
    assert_eq!(tests[0]["expect"][0]["birthDate"], json!({"value": "1990-01-01"}));
    assert_eq!(tests[1]["result"]["passed"], true);
}

#[test]
fn expected_field_the_view_does_not_produce_is_ignored() {
    let mut suite = basic_suite(json!([{
        "title": "wider expectation",
        "view": {"resource": "Patient", "select": [{"column": [{"name": "id", "path": "id"}]}]},
        "expect": [{"id": "p1", "birthDate": "1990-01-01"}]
    }]));
    assert_eq!(run_single(&mut suite), CaseOutcome::Passed);
}
