#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sof_view::{
    BasicViewEngine, JsonResourceParser, ResourceError, ResourceParser, ViewEngine, ViewError,
};
use thiserror::Error;
use tracing::{debug, info};

pub mod executor;
pub mod fixture;
pub mod matcher;
pub mod report;
pub mod skip;

pub use executor::{CaseOutcome, FailureReason, TestExecutor, classify_rows};
pub use fixture::{ExpectedRow, SKIPPED_REASON, TestCase, TestResult, TestSuite};
pub use matcher::{ExpectedRows, field_matches, row_matches, scalar_matches};
pub use report::ResultWriter;
pub use skip::{SkipEntry, SkipRegistry};

/// Where the skip registry comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SkipSource {
    #[default]
    Builtin,
    File(PathBuf),
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
    pub output_path: PathBuf,
    pub skip_registry: SkipSource,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
            output_path: std::env::temp_dir()
                .join(format!("sof-conformance-result-{}.json", now_unix_ms())),
            skip_registry: SkipSource::Builtin,
        }
    }

    pub fn load_skip_registry(&self) -> Result<SkipRegistry, HarnessError> {
        match &self.skip_registry {
            SkipSource::Builtin => Ok(SkipRegistry::builtin()),
            SkipSource::File(path) => SkipRegistry::load(path),
            SkipSource::Disabled => Ok(SkipRegistry::empty()),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("fixture format error: {0}")]
    FixtureFormat(String),
    #[error("fixture root does not exist: {}", .0.display())]
    MissingFixtureRoot(PathBuf),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("evaluator failed unexpectedly in {suite}.{test}")]
    Evaluator {
        suite: String,
        test: String,
        #[source]
        source: ViewError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SuiteSummary {
    pub title: String,
    pub fixture_path: Option<PathBuf>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl SuiteSummary {
    fn record(&mut self, outcome: &CaseOutcome) {
        self.total += 1;
        match outcome {
            CaseOutcome::Skipped { .. } => self.skipped += 1,
            CaseOutcome::Passed => self.passed += 1,
            CaseOutcome::Failed(_) => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub output_path: PathBuf,
    pub suites: Vec<SuiteSummary>,
}

impl RunReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.suites.iter().map(|suite| suite.total).sum()
    }

    #[must_use]
    pub fn passed(&self) -> usize {
        self.suites.iter().map(|suite| suite.passed).sum()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.suites.iter().map(|suite| suite.failed).sum()
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.suites.iter().map(|suite| suite.skipped).sum()
    }
}

pub fn load_suite(path: &Path) -> Result<TestSuite, HarnessError> {
    let body = fs::read_to_string(path)?;
    TestSuite::from_json_str(&body).map_err(|err| match err {
        HarnessError::Json(source) => {
            HarnessError::FixtureFormat(format!("{}: {source}", path.display()))
        }
        other => other,
    })
}

/// Runs every case of `suite` in declared order and attaches the results.
pub fn execute_suite<P, E>(
    executor: &TestExecutor<'_, E>,
    parser: &P,
    suite: &mut TestSuite,
) -> Result<SuiteSummary, HarnessError>
where
    P: ResourceParser,
    E: ViewEngine<Resource = P::Resource>,
{
    info!(suite = %suite.title, tests = suite.tests.len(), "next test collection");
    let resources = suite
        .resources
        .iter()
        .map(|raw| parser.parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let mut summary = SuiteSummary {
        title: suite.title.clone(),
        ..SuiteSummary::default()
    };
    for case in &mut suite.tests {
        let outcome = executor.run_case(&suite.title, &resources, case)?;
        summary.record(&outcome);
    }
    debug!(
        suite = %summary.title,
        passed = summary.passed,
        failed = summary.failed,
        skipped = summary.skipped,
        "suite resolved"
    );
    Ok(summary)
}

/// Runs every fixture under `config.fixture_root` and writes the annotated
/// suites to `config.output_path`.
pub fn run_suites<P, E>(
    config: &HarnessConfig,
    parser: &P,
    engine: &E,
    skips: &SkipRegistry,
) -> Result<RunReport, HarnessError>
where
    P: ResourceParser,
    E: ViewEngine<Resource = P::Resource>,
{
    let files = list_fixture_files(&config.fixture_root)?;
    info!(
        fixture_root = %config.fixture_root.display(),
        fixtures = files.len(),
        skips = skips.len(),
        "starting conformance run"
    );

    let executor = TestExecutor::new(engine, skips);
    let mut writer = ResultWriter::create(&config.output_path)?;
    let mut suites = Vec::with_capacity(files.len());
    for path in files {
        let mut suite = load_suite(&path)?;
        let mut summary = execute_suite(&executor, parser, &mut suite)?;
        writer.write_suite(&suite)?;
        summary.fixture_path = Some(path);
        suites.push(summary);
    }
    writer.finish()?;

    info!(output = %config.output_path.display(), suites = suites.len(), "wrote results");
    Ok(RunReport {
        output_path: config.output_path.clone(),
        suites,
    })
}

/// Runs with the bundled JSON resource parser and view evaluator.
pub fn run_with_builtin_engine(config: &HarnessConfig) -> Result<RunReport, HarnessError> {
    let skips = config.load_skip_registry()?;
    run_suites(config, &JsonResourceParser, &BasicViewEngine, &skips)
}

/// All `.json` files under `root`, sorted.
pub fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.is_dir() {
        return Err(HarnessError::MissingFixtureRoot(root.to_path_buf()));
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
