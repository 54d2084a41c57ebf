//! Ingestion progress reporting.
//!
//! Every source visited during a pass produces one [`ProgressRecord`]; the
//! ordered records form the pass's trace. A [`ProgressReporter`] can observe
//! records as they happen. Human and JSON reporters write to **stderr** so
//! stdout remains parseable for scripts.

use chrono::{DateTime, Utc};
use std::fmt;
use std::io::Write;

use crate::error::IngestError;
use crate::models::Category;

/// What happened to one source (or category) during a pass.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// Already in the ledger at its current modified time.
    Skipped,
    /// Parsed and buffered for merging.
    Ingested { category: Category, records: usize },
    /// Name matched no category.
    Unmatched,
    /// Recovered failure: the source (or artifact) contributed nothing.
    Failed(IngestError),
    /// A category's new records were merged into its dataset.
    Merged {
        category: Category,
        new_records: usize,
        total: usize,
    },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Skipped => write!(f, "skipped (already ingested)"),
            ProgressEvent::Ingested { category, records } => {
                write!(f, "ingested {} {} records", format_number(*records as u64), category)
            }
            ProgressEvent::Unmatched => write!(f, "no matching category"),
            ProgressEvent::Failed(e) => write!(f, "failed: {}", e),
            ProgressEvent::Merged {
                category,
                new_records,
                total,
            } => write!(
                f,
                "merged {} new {} records ({} total)",
                format_number(*new_records as u64),
                category,
                format_number(*total as u64)
            ),
        }
    }
}

impl ProgressEvent {
    fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Skipped => "skipped",
            ProgressEvent::Ingested { .. } => "ingested",
            ProgressEvent::Unmatched => "unmatched",
            ProgressEvent::Failed(_) => "failed",
            ProgressEvent::Merged { .. } => "merged",
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            ProgressEvent::Ingested { category, records } => serde_json::json!({
                "event": self.kind(),
                "category": category.key(),
                "records": records
            }),
            ProgressEvent::Failed(e) => serde_json::json!({
                "event": self.kind(),
                "reason": e.to_string()
            }),
            ProgressEvent::Merged {
                category,
                new_records,
                total,
            } => serde_json::json!({
                "event": self.kind(),
                "category": category.key(),
                "new_records": new_records,
                "total": total
            }),
            ProgressEvent::Skipped | ProgressEvent::Unmatched => {
                serde_json::json!({ "event": self.kind() })
            }
        }
    }
}

/// One entry of the progress trace.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressRecord {
    pub timestamp: DateTime<Utc>,
    /// Source identifier, or the category key for merge events.
    pub source: String,
    pub event: ProgressEvent,
}

impl ProgressRecord {
    pub fn new(source: impl Into<String>, event: ProgressEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            event,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = self.event.to_json();
        obj["timestamp"] = serde_json::Value::String(self.timestamp.to_rfc3339());
        obj["source"] = serde_json::Value::String(self.source.clone());
        obj
    }
}

/// Observes progress records as a pass produces them.
///
/// Errors (and panics) raised by a reporter are swallowed by the pass.
pub trait ProgressReporter {
    fn report(&self, record: &ProgressRecord) -> anyhow::Result<()>;
}

impl<F> ProgressReporter for F
where
    F: Fn(&ProgressRecord) -> anyhow::Result<()>,
{
    fn report(&self, record: &ProgressRecord) -> anyhow::Result<()> {
        self(record)
    }
}

/// Human-friendly progress on stderr: "heart_rate-2023-06-01.json  ingested 1,440 heart_rate records".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, record: &ProgressRecord) -> anyhow::Result<()> {
        let line = format!("{}  {}\n", record.source, record.event);
        let mut stderr = std::io::stderr().lock();
        stderr.write_all(line.as_bytes())?;
        stderr.flush()?;
        Ok(())
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, record: &ProgressRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(&record.to_json())?;
        let mut stderr = std::io::stderr().lock();
        writeln!(stderr, "{}", line)?;
        stderr.flush()?;
        Ok(())
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _record: &ProgressRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn json_record_carries_source_and_event() {
        let record = ProgressRecord::new(
            "takeout.zip!heart_rate-2023-06-01.json",
            ProgressEvent::Ingested {
                category: Category::HeartRate,
                records: 3,
            },
        );
        let json = record.to_json();
        assert_eq!(json["event"], "ingested");
        assert_eq!(json["category"], "heart_rate");
        assert_eq!(json["records"], 3);
        assert_eq!(json["source"], "takeout.zip!heart_rate-2023-06-01.json");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn failure_events_render_reason() {
        let event = ProgressEvent::Failed(IngestError::ParseFailure {
            category: Category::Steps,
            reason: "invalid JSON".to_string(),
        });
        assert_eq!(event.to_string(), "failed: steps parse failure: invalid JSON");
    }

    #[test]
    fn closures_are_reporters() {
        let seen = std::cell::RefCell::new(Vec::new());
        let reporter = |r: &ProgressRecord| -> anyhow::Result<()> {
            seen.borrow_mut().push(r.source.clone());
            Ok(())
        };
        reporter
            .report(&ProgressRecord::new("a", ProgressEvent::Skipped))
            .unwrap();
        assert_eq!(seen.into_inner(), vec!["a".to_string()]);
    }
}
