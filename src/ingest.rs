//! Incremental ingestion pass.
//!
//! Coordinates the full flow: enumeration → per-category parsing → timestamp
//! normalization → merge into the persisted datasets → derived IBI series.
//! A processed-source ledger makes the pass incremental: a source is parsed
//! again only when its modified time is newer than the one recorded when it
//! was last ingested.
//!
//! Nothing that goes wrong with an individual source, artifact or the ledger
//! escapes a pass. Failures become [`ProgressEvent::Failed`] records in the
//! trace and the pass returns whatever it could merge.

use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::config::Config;
use crate::datetime::normalize;
use crate::enumerate::{CategoryMatcher, SourceEnumerator};
use crate::error::IngestError;
use crate::ibi::derive_ibi;
use crate::inventory::{self, CacheStatus, FileInventory};
use crate::ledger::{Ledger, LEDGER_FILE_NAME};
use crate::models::{
    Category, DailyRecord, HeartRateRecord, PassOutput, SleepRecord, StepRecord,
};
use crate::parse::{parse_source, Parsed, RawDaily, RawHeartRate, RawSleep, RawSteps};
use crate::progress::{ProgressEvent, ProgressRecord, ProgressReporter};
use crate::store::{DatasetStore, Tabular};

/// Owns the cache directory: the four persisted datasets and the ledger.
pub struct CacheManager {
    root: PathBuf,
    store: DatasetStore,
    matcher: CategoryMatcher,
    follow_symlinks: bool,
    trace: Vec<ProgressRecord>,
}

impl CacheManager {
    /// Manager for `root` with the default category patterns.
    pub fn new(root: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            store: DatasetStore::new(cache_dir),
            matcher: CategoryMatcher::default(),
            follow_symlinks: false,
            trace: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            root: config.source.root.clone(),
            store: DatasetStore::new(&config.cache.dir),
            matcher: config.categories.matcher()?,
            follow_symlinks: config.source.follow_symlinks,
            trace: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    fn enumerator(&self) -> SourceEnumerator {
        SourceEnumerator::new(&self.root)
            .follow_symlinks(self.follow_symlinks)
            .excluding(self.store.dir())
    }

    /// Runs one full ingestion pass over the root.
    ///
    /// Visits every source, parses only those that are new or modified since
    /// the ledger last saw them, merges their records into the persisted
    /// datasets and returns the merged datasets plus the IBI series. The
    /// trace of the pass is available afterwards from
    /// [`progress_trace`](Self::progress_trace).
    pub fn run_full_pass(&mut self, reporter: Option<&dyn ProgressReporter>) -> PassOutput {
        let mut trace = Vec::new();
        let output = {
            let mut pass = Pass {
                trace: &mut trace,
                reporter,
            };
            self.execute(&mut pass)
        };
        self.trace = trace;
        output
    }

    fn execute(&self, pass: &mut Pass<'_>) -> PassOutput {
        if !self.root.exists() {
            tracing::warn!(root = %self.root.display(), "ingestion root does not exist");
            pass.emit(
                self.root.display().to_string(),
                ProgressEvent::Failed(IngestError::RootMissing),
            );
            return PassOutput::default();
        }

        let ledger_path = self.store.ledger_path();
        let mut ledger = Ledger::load(&ledger_path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ledger unreadable, reprocessing every source");
            Ledger::default()
        });
        // Created up front so the walk can exclude it when it lies under the root.
        if let Err(e) = std::fs::create_dir_all(self.store.dir()) {
            tracing::warn!(dir = %self.store.dir().display(), error = %e, "cannot create cache directory");
        }

        let mut pending = Pending::default();
        let matcher = &self.matcher;
        // Decided before any bytes are read, so current sources cost one stat.
        let known = ledger.clone();
        let sources = self
            .enumerator()
            .scan(|source| matcher.matches_any(source) && !known.is_current(source));

        for item in sources {
            let source = match item {
                Ok(source) => source,
                Err(skipped) => {
                    pass.emit(
                        skipped.id,
                        ProgressEvent::Failed(IngestError::SourceUnreadable {
                            reason: skipped.reason,
                        }),
                    );
                    continue;
                }
            };
            let id = source.reference.id.clone();

            if ledger.is_current(&source.reference) {
                pass.emit(id, ProgressEvent::Skipped);
                continue;
            }

            let event = match (self.matcher.classify(&source.reference), &source.bytes) {
                (Some(category), Some(bytes)) => match parse_source(category, &id, bytes) {
                    Ok(parsed) => {
                        let records = pending.absorb(parsed);
                        tracing::debug!(source = %id, %category, records, "parsed source");
                        ProgressEvent::Ingested { category, records }
                    }
                    Err(e) => {
                        tracing::warn!(source = %id, %category, error = %e, "skipping unparsable source");
                        ProgressEvent::Failed(IngestError::ParseFailure {
                            category,
                            reason: e.to_string(),
                        })
                    }
                },
                _ => ProgressEvent::Unmatched,
            };
            pass.emit(id.clone(), event);

            ledger.record(&source.reference);
            if let Err(e) = ledger.save(&ledger_path) {
                tracing::warn!(error = %e, "failed to persist ledger");
                pass.emit(
                    id,
                    ProgressEvent::Failed(IngestError::CacheWriteFailure {
                        target: LEDGER_FILE_NAME.to_string(),
                        reason: format!("{:#}", e),
                    }),
                );
            }
        }

        let heart_rate = self.merge(normalize_heart_rate(pending.heart_rate), pass);
        let steps = self.merge(normalize_steps(pending.steps), pass);
        let sleep = self.merge(normalize_sleep(pending.sleep), pass);
        let daily = self.merge(normalize_daily(pending.daily), pass);
        let ibi = derive_ibi(&heart_rate);

        PassOutput {
            heart_rate,
            steps,
            sleep,
            daily,
            ibi,
        }
    }

    /// Merges `incoming` into the persisted dataset of `T`'s category and
    /// persists the result. With nothing incoming the persisted dataset is
    /// returned untouched.
    fn merge<T: Tabular>(&self, incoming: Vec<T>, pass: &mut Pass<'_>) -> Vec<T> {
        let existing = self.load_or_empty::<T>();
        if incoming.is_empty() {
            return existing;
        }

        let category = T::CATEGORY;
        let new_records = incoming.len();
        let merged = T::merge(existing, incoming);
        tracing::info!(%category, new_records, total = merged.len(), "merged dataset");

        if let Err(e) = self.store.save(&merged) {
            tracing::warn!(%category, error = %e, "failed to persist dataset");
            pass.emit(
                category.cache_file_name(),
                ProgressEvent::Failed(IngestError::CacheWriteFailure {
                    target: category.cache_file_name(),
                    reason: format!("{:#}", e),
                }),
            );
        }
        pass.emit(
            category.key(),
            ProgressEvent::Merged {
                category,
                new_records,
                total: merged.len(),
            },
        );
        merged
    }

    fn load_or_empty<T: Tabular>(&self) -> Vec<T> {
        self.store.load::<T>().unwrap_or_else(|e| {
            tracing::warn!(category = %T::CATEGORY, error = %format!("{:#}", e), "cache artifact unreadable, starting empty");
            Vec::new()
        })
    }

    /// The persisted datasets and their IBI series, without running a pass.
    pub fn load_cached(&self) -> PassOutput {
        let heart_rate = self.load_or_empty::<HeartRateRecord>();
        let ibi = derive_ibi(&heart_rate);
        PassOutput {
            heart_rate,
            steps: self.load_or_empty(),
            sleep: self.load_or_empty(),
            daily: self.load_or_empty(),
            ibi,
        }
    }

    /// Ordered trace of the most recent pass.
    pub fn progress_trace(&self) -> &[ProgressRecord] {
        &self.trace
    }

    /// Advisory per-category freshness of the persisted artifacts.
    pub fn cache_status(&self) -> BTreeMap<Category, CacheStatus> {
        inventory::cache_status(&self.enumerator(), &self.store, &self.matcher)
    }

    pub fn is_fresh(&self, category: Category) -> bool {
        self.cache_status()
            .get(&category)
            .is_some_and(|status| status.fresh)
    }

    pub fn file_inventory(&self) -> FileInventory {
        inventory::file_inventory(&self.enumerator(), &self.matcher)
    }
}

/// Per-pass event sink: appends to the trace, then notifies the reporter.
struct Pass<'a> {
    trace: &'a mut Vec<ProgressRecord>,
    reporter: Option<&'a dyn ProgressReporter>,
}

impl Pass<'_> {
    fn emit(&mut self, source: impl Into<String>, event: ProgressEvent) {
        let record = ProgressRecord::new(source, event);
        if let Some(reporter) = self.reporter {
            match catch_unwind(AssertUnwindSafe(|| reporter.report(&record))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "progress reporter failed"),
                Err(_) => tracing::debug!("progress reporter panicked"),
            }
        }
        self.trace.push(record);
    }
}

/// Raw records accumulated during a pass, per category.
#[derive(Default)]
struct Pending {
    heart_rate: Vec<RawHeartRate>,
    steps: Vec<RawSteps>,
    sleep: Vec<RawSleep>,
    daily: Vec<RawDaily>,
}

impl Pending {
    fn absorb(&mut self, parsed: Parsed) -> usize {
        let count = parsed.len();
        match parsed {
            Parsed::HeartRate(rows) => self.heart_rate.extend(rows),
            Parsed::Steps(rows) => self.steps.extend(rows),
            Parsed::Sleep(rows) => self.sleep.extend(rows),
            Parsed::Daily(rows) => self.daily.extend(rows),
        }
        count
    }
}

// Records whose timestamp cannot be resolved are dropped.

fn normalize_heart_rate(raw: Vec<RawHeartRate>) -> Vec<HeartRateRecord> {
    let instants = normalize(&raw.iter().map(|r| r.timestamp.as_str()).collect::<Vec<_>>());
    raw.into_iter()
        .zip(instants)
        .filter_map(|(r, instant)| {
            Some(HeartRateRecord {
                instant: instant?,
                bpm: r.bpm,
                confidence: r.confidence,
            })
        })
        .collect()
}

/// Missing step counts become 0; counts are rounded and clamped at 0.
fn normalize_steps(raw: Vec<RawSteps>) -> Vec<StepRecord> {
    let instants = normalize(&raw.iter().map(|r| r.timestamp.as_str()).collect::<Vec<_>>());
    raw.into_iter()
        .zip(instants)
        .filter_map(|(r, instant)| {
            Some(StepRecord {
                instant: instant?,
                steps: r.steps.map(|s| s.max(0.0).round() as u64).unwrap_or(0),
            })
        })
        .collect()
}

fn normalize_sleep(raw: Vec<RawSleep>) -> Vec<SleepRecord> {
    let starts = normalize(&raw.iter().map(|r| r.start.as_str()).collect::<Vec<_>>());
    raw.into_iter()
        .zip(starts)
        .filter_map(|(r, start)| {
            Some(SleepRecord {
                start: start?,
                duration_secs: r.duration_secs,
                level: r.level,
            })
        })
        .collect()
}

/// Daily rows are kept even when their date is unparsable; the key is unset.
fn normalize_daily(raw: Vec<RawDaily>) -> Vec<DailyRecord> {
    let dates = normalize(
        &raw.iter()
            .map(|r| r.date.as_deref().unwrap_or(""))
            .collect::<Vec<_>>(),
    );
    raw.into_iter()
        .zip(dates)
        .map(|(r, date)| DailyRecord {
            date: date.map(|dt| dt.date()),
            values: r.values,
        })
        .collect()
}

/// Counts of one pass's trace, by event kind.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TraceSummary {
    pub visited: usize,
    pub skipped: usize,
    pub ingested: usize,
    pub unmatched: usize,
    pub failed: usize,
}

impl TraceSummary {
    pub fn from_trace(trace: &[ProgressRecord]) -> Self {
        let mut summary = Self::default();
        for record in trace {
            match record.event {
                ProgressEvent::Skipped => summary.skipped += 1,
                ProgressEvent::Ingested { .. } => summary.ingested += 1,
                ProgressEvent::Unmatched => summary.unmatched += 1,
                ProgressEvent::Failed(_) => summary.failed += 1,
                ProgressEvent::Merged { .. } => continue,
            }
            summary.visited += 1;
        }
        summary
    }
}
