#![forbid(unsafe_code)]

use std::path::PathBuf;

use sof_conformance::{HarnessConfig, SkipSource, run_with_builtin_engine};
use tracing::Level;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = HarnessConfig::default_paths();
    let mut level = Level::INFO;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fixture-root" => {
                let value = args.next().ok_or("--fixture-root requires a directory")?;
                config.fixture_root = PathBuf::from(value);
            }
            "--output" => {
                let value = args.next().ok_or("--output requires a file path")?;
                config.output_path = PathBuf::from(value);
            }
            "--skip-list" => {
                let value = args.next().ok_or("--skip-list requires a JSON file")?;
                config.skip_registry = SkipSource::File(PathBuf::from(value));
            }
            "--no-skips" => {
                config.skip_registry = SkipSource::Disabled;
            }
            "--verbose" => {
                level = Level::DEBUG;
            }
            "--quiet" => {
                level = Level::WARN;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .map_err(|err| err.to_string())?;

    let report = run_with_builtin_engine(&config)?;
    for suite in &report.suites {
        println!(
            "suite={} fixture={} tests={} passed={} failed={} skipped={}",
            suite.title,
            suite
                .fixture_path
                .as_ref()
                .map_or_else(|| "<memory>".to_owned(), |path| path.display().to_string()),
            suite.total,
            suite.passed,
            suite.failed,
            suite.skipped
        );
    }
    println!(
        "total tests={} passed={} failed={} skipped={}",
        report.total(),
        report.passed(),
        report.failed(),
        report.skipped()
    );
    println!("wrote results={}", report.output_path.display());

    Ok(())
}

fn print_help() {
    println!(
        "sof-conformance-cli\n\
         Usage:\n\
         \tsof-conformance-cli [--fixture-root <dir>] [--output <file>] [--skip-list <file> | --no-skips]\n\
         Options:\n\
         \t--fixture-root <dir>  Directory searched recursively for *.json fixtures (default: bundled fixtures)\n\
         \t--output <file>       Result artifact path (default: sof-conformance-result-<ms>.json in the temp dir)\n\
         \t--skip-list <file>    JSON array of {{\"suite\", \"test\", \"reason\"}} entries to skip\n\
         \t--no-skips            Run every case, ignoring the built-in skip list\n\
         \t--verbose             Log every test case\n\
         \t--quiet               Only log warnings and unmatched rows\n\
         \t-h, --help            Show this help"
    );
}
