//! Core data models used throughout Tracker Harness.
//!
//! These types represent the sources, records, and datasets that flow through
//! the ingestion and caching pipeline.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// One of the four supported data kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    HeartRate,
    Steps,
    Sleep,
    Daily,
}

impl Category {
    /// All categories, in dispatch priority order.
    pub const ALL: [Category; 4] = [
        Category::HeartRate,
        Category::Steps,
        Category::Sleep,
        Category::Daily,
    ];

    /// Stable key used in cache file names, CLI output and progress events.
    pub fn key(&self) -> &'static str {
        match self {
            Category::HeartRate => "heart_rate",
            Category::Steps => "steps",
            Category::Sleep => "sleep",
            Category::Daily => "daily",
        }
    }

    /// File-name glob used when no override is configured.
    pub fn default_pattern(&self) -> &'static str {
        match self {
            Category::HeartRate => "heart_rate-*.json",
            Category::Steps => "steps-*.json",
            Category::Sleep => "sleep-*.json",
            Category::Daily => "*daily*.csv",
        }
    }

    /// Extra glob matched only against archive members. Fitbit ships its
    /// `Sleep Score.csv` daily table inside the export archive.
    pub fn archived_pattern(&self) -> Option<&'static str> {
        match self {
            Category::Daily => Some("*sleep*.csv"),
            _ => None,
        }
    }

    pub fn cache_file_name(&self) -> String {
        format!("{}.csv", self.key())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.key() == s)
            .ok_or_else(|| {
                format!(
                    "unknown category '{}'. Available: heart_rate, steps, sleep, daily",
                    s
                )
            })
    }
}

/// Identifies one physical piece of input.
///
/// `id` is the root-relative path, suffixed with `!member` for every archive
/// level it sits inside (`takeout.zip!Fitbit/heart_rate-2023-06-01.json`).
/// `modified` is in epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    pub id: String,
    pub modified: i64,
}

impl SourceRef {
    pub fn new(id: impl Into<String>, modified: i64) -> Self {
        Self {
            id: id.into(),
            modified,
        }
    }

    /// Bare file name of the innermost path component.
    pub fn file_name(&self) -> &str {
        file_name_of(&self.id)
    }

    /// Whether the source is a member of an archive.
    pub fn in_archive(&self) -> bool {
        self.id.contains('!')
    }
}

/// Returns the last path component of a source identifier or archive member path.
pub fn file_name_of(id: &str) -> &str {
    let inner = id.rsplit('!').next().unwrap_or(id);
    inner
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(inner)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateRecord {
    #[serde(rename = "dateTime")]
    pub instant: NaiveDateTime,
    pub bpm: Option<f64>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(rename = "dateTime")]
    pub instant: NaiveDateTime,
    pub steps: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepRecord {
    pub start: NaiveDateTime,
    #[serde(rename = "duration_s")]
    pub duration_secs: Option<f64>,
    pub level: Option<String>,
}

/// One row of a daily-summary CSV. The schema is whatever the source provides;
/// empty cells are not stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DailyRecord {
    pub date: Option<NaiveDate>,
    pub values: BTreeMap<String, String>,
}

/// One point of the derived inter-beat-interval series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IbiPoint {
    #[serde(rename = "dateTime")]
    pub instant: NaiveDateTime,
    pub ibi_ms: f64,
}

/// A record type with a per-category merge policy.
pub trait Record: Sized + Clone {
    const CATEGORY: Category;

    /// Combines persisted and newly parsed records into one deduplicated,
    /// ordered dataset.
    fn merge(existing: Vec<Self>, incoming: Vec<Self>) -> Vec<Self>;
}

impl Record for HeartRateRecord {
    const CATEGORY: Category = Category::HeartRate;

    fn merge(existing: Vec<Self>, incoming: Vec<Self>) -> Vec<Self> {
        keep_last_per_instant(concat(existing, incoming), |r| r.instant)
    }
}

impl Record for StepRecord {
    const CATEGORY: Category = Category::Steps;

    fn merge(existing: Vec<Self>, incoming: Vec<Self>) -> Vec<Self> {
        keep_last_per_instant(concat(existing, incoming), |r| r.instant)
    }
}

impl Record for SleepRecord {
    const CATEGORY: Category = Category::Sleep;

    fn merge(existing: Vec<Self>, incoming: Vec<Self>) -> Vec<Self> {
        let mut seen = HashSet::new();
        let mut merged: Vec<Self> = concat(existing, incoming)
            .into_iter()
            .filter(|r| seen.insert((r.start, r.duration_secs.map(f64::to_bits), r.level.clone())))
            .collect();
        merged.sort_by_key(|r| r.start);
        merged
    }
}

impl Record for DailyRecord {
    const CATEGORY: Category = Category::Daily;

    fn merge(existing: Vec<Self>, incoming: Vec<Self>) -> Vec<Self> {
        let mut seen = HashSet::new();
        let mut merged: Vec<Self> = concat(existing, incoming)
            .into_iter()
            .filter(|r| seen.insert(r.clone()))
            .collect();
        // Undated rows sort last.
        merged.sort_by_key(|r| (r.date.is_none(), r.date));
        merged
    }
}

fn concat<T>(mut existing: Vec<T>, incoming: Vec<T>) -> Vec<T> {
    existing.extend(incoming);
    existing
}

/// Sorts by instant and keeps only the latest-added record for each instant.
fn keep_last_per_instant<T>(mut records: Vec<T>, instant: impl Fn(&T) -> NaiveDateTime) -> Vec<T> {
    records.sort_by_key(|r| instant(r));
    let mut out: Vec<T> = Vec::with_capacity(records.len());
    for record in records {
        if out
            .last()
            .is_some_and(|prev| instant(prev) == instant(&record))
        {
            out.pop();
        }
        out.push(record);
    }
    out
}

/// The merged datasets of one pass, plus the derived IBI series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassOutput {
    pub heart_rate: Vec<HeartRateRecord>,
    pub steps: Vec<StepRecord>,
    pub sleep: Vec<SleepRecord>,
    pub daily: Vec<DailyRecord>,
    pub ibi: Vec<IbiPoint>,
}

impl PassOutput {
    pub fn count(&self, category: Category) -> usize {
        match category {
            Category::HeartRate => self.heart_rate.len(),
            Category::Steps => self.steps.len(),
            Category::Sleep => self.sleep.len(),
            Category::Daily => self.daily.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        Category::ALL.iter().all(|c| self.count(*c) == 0) && self.ibi.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    fn hr(s: &str, bpm: f64) -> HeartRateRecord {
        HeartRateRecord {
            instant: at(s),
            bpm: Some(bpm),
            confidence: None,
        }
    }

    #[test]
    fn file_name_strips_archive_and_directories() {
        assert_eq!(file_name_of("a/b.zip!Fitbit/heart_rate-1.json"), "heart_rate-1.json");
        assert_eq!(file_name_of("outer.zip!inner.zip!steps-2.json"), "steps-2.json");
        assert_eq!(file_name_of("daily.csv"), "daily.csv");
        assert!(SourceRef::new("takeout.zip!Sleep Score.csv", 0).in_archive());
        assert!(!SourceRef::new("Sleep Score.csv", 0).in_archive());
    }

    #[test]
    fn category_round_trips_through_key() {
        for category in Category::ALL {
            assert_eq!(category.key().parse::<Category>().unwrap(), category);
        }
        assert!("calories".parse::<Category>().is_err());
    }

    #[test]
    fn heart_rate_merge_sorts_and_keeps_newest_per_instant() {
        let existing = vec![hr("2023-01-01T02:00:00", 70.0), hr("2023-01-01T00:00:00", 60.0)];
        let incoming = vec![hr("2023-01-01T02:00:00", 72.0), hr("2023-01-01T01:00:00", 65.0)];
        let merged = HeartRateRecord::merge(existing, incoming);
        let bpms: Vec<f64> = merged.iter().filter_map(|r| r.bpm).collect();
        assert_eq!(bpms, vec![60.0, 65.0, 72.0]);
    }

    #[test]
    fn sleep_merge_drops_whole_tuple_duplicates_only() {
        let a = SleepRecord {
            start: at("2023-01-01T23:00:00"),
            duration_secs: Some(60.0),
            level: Some("light".into()),
        };
        let b = SleepRecord {
            level: Some("deep".into()),
            ..a.clone()
        };
        let earlier = SleepRecord {
            start: at("2023-01-01T22:00:00"),
            duration_secs: None,
            level: None,
        };
        let merged = SleepRecord::merge(vec![a.clone(), b.clone()], vec![a.clone(), earlier.clone()]);
        assert_eq!(merged, vec![earlier, a, b]);
    }

    #[test]
    fn daily_merge_puts_undated_rows_last() {
        let dated = DailyRecord {
            date: NaiveDate::from_ymd_opt(2023, 1, 2),
            values: BTreeMap::from([("steps".to_string(), "100".to_string())]),
        };
        let undated = DailyRecord::default();
        let merged = DailyRecord::merge(vec![undated.clone(), dated.clone()], vec![dated.clone()]);
        assert_eq!(merged, vec![dated, undated]);
    }
}
