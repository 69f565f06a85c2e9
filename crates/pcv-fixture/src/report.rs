//! Per-test records and the suite report.

use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use pcv_core::{PcvError, ResourceId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DrainReport;

/// Severity of a test note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteLevel {
    /// A check passed.
    Ok,
    /// Something suspicious that does not fail the test.
    Warn,
    /// Informational output.
    Out,
}

/// One line a test recorded about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub level: NoteLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Note {
    #[must_use]
    pub fn new(level: NoteLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Final outcome of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    PassedWithWarnings,
    /// Not applicable to this provider; counts as a pass.
    Skipped,
    Failed,
}

impl TestOutcome {
    #[must_use]
    pub const fn is_pass(&self) -> bool {
        !matches!(self, Self::Failed)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::PassedWithWarnings => "passed_with_warnings",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    /// Outcome of a test body that returned `err`.
    ///
    /// `expects_deletion` is set when the test itself deleted the resource,
    /// making its disappearance the expected result.
    #[must_use]
    pub const fn for_error(err: &PcvError, expects_deletion: bool) -> Self {
        match err {
            PcvError::Unsupported { .. } => Self::Skipped,
            PcvError::Lost { .. } if expects_deletion => Self::Passed,
            PcvError::Lost { .. } => Self::PassedWithWarnings,
            _ => Self::Failed,
        }
    }
}

impl std::fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one finished test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    pub suite: String,
    pub test: String,
    pub outcome: TestOutcome,
    /// Why the test was skipped or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PcvError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture: Option<ResourceId>,
    #[serde(default)]
    pub notes: Vec<Note>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl TestRecord {
    /// Messages of every warning note.
    #[must_use]
    pub fn warnings(&self) -> Vec<&str> {
        self.notes
            .iter()
            .filter(|n| n.level == NoteLevel::Warn)
            .map(|n| n.message.as_str())
            .collect()
    }
}

/// Counts per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub passed: usize,
    pub passed_with_warnings: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Report for one suite run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub run_id: Uuid,
    pub provider: String,
    pub region: String,
    pub records: Vec<TestRecord>,
    pub drain: DrainReport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReportLine<'a> {
    Test(&'a TestRecord),
    Summary {
        suite: &'a str,
        run_id: Uuid,
        provider: &'a str,
        region: &'a str,
        counts: OutcomeCounts,
        cleanup_warnings: Vec<String>,
    },
}

impl SuiteReport {
    #[must_use]
    pub fn counts(&self) -> OutcomeCounts {
        self.records
            .iter()
            .fold(OutcomeCounts::default(), |mut counts, record| {
                match record.outcome {
                    TestOutcome::Passed => counts.passed += 1,
                    TestOutcome::PassedWithWarnings => counts.passed_with_warnings += 1,
                    TestOutcome::Skipped => counts.skipped += 1,
                    TestOutcome::Failed => counts.failed += 1,
                }
                counts
            })
    }

    /// Returns true if no test failed. Cleanup warnings do not count.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.records.iter().all(|r| r.outcome.is_pass())
    }

    #[must_use]
    pub fn record(&self, test: &str) -> Option<&TestRecord> {
        self.records.iter().find(|r| r.test == test)
    }

    /// Cleanup failures from the drain, as warnings.
    #[must_use]
    pub fn cleanup_warnings(&self) -> Vec<String> {
        self.drain.warnings()
    }

    fn lines(&self) -> impl Iterator<Item = ReportLine<'_>> {
        self.records
            .iter()
            .map(ReportLine::Test)
            .chain(std::iter::once(ReportLine::Summary {
                suite: &self.suite,
                run_id: self.run_id,
                provider: &self.provider,
                region: &self.region,
                counts: self.counts(),
                cleanup_warnings: self.cleanup_warnings(),
            }))
    }

    /// One JSON object per test, followed by a summary line.
    #[must_use]
    pub fn to_json_lines(&self) -> String {
        self.lines()
            .filter_map(|line| serde_json::to_string(&line).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Write [`SuiteReport::to_json_lines`] output to a file.
    ///
    /// # Errors
    /// Returns an IO error if the file cannot be created or written to.
    pub fn write_json_lines<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        for line in self.lines() {
            let line = serde_json::to_string(&line)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}
