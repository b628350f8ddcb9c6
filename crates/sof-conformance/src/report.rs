use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::HarnessError;
use crate::fixture::TestSuite;

/// Streams resolved suites into one pretty-printed JSON array.
///
/// The array is opened on construction and closed by [`ResultWriter::finish`].
/// Dropping the writer early still releases the underlying handle.
#[derive(Debug)]
pub struct ResultWriter<W: Write> {
    out: W,
    written: usize,
}

impl ResultWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self, HarnessError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> ResultWriter<W> {
    pub fn new(mut out: W) -> Result<Self, HarnessError> {
        out.write_all(b"[")?;
        Ok(Self { out, written: 0 })
    }

    pub fn write_suite(&mut self, suite: &TestSuite) -> Result<(), HarnessError> {
        if self.written > 0 {
            self.out.write_all(b",\n")?;
        }
        serde_json::to_writer_pretty(&mut self.out, suite)?;
        self.written += 1;
        Ok(())
    }

    #[must_use]
    pub fn suites_written(&self) -> usize {
        self.written
    }

    pub fn finish(mut self) -> Result<W, HarnessError> {
        self.out.write_all(b"]")?;
        self.out.flush()?;
        Ok(self.out)
    }
}
