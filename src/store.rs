//! Dataset persistence.
//!
//! Each category's merged dataset lives in one CSV artifact inside the cache
//! directory (`heart_rate.csv`, `steps.csv`, `sleep.csv`, `daily.csv`).
//! Artifacts are replaced atomically: rows are written to a temporary sibling
//! and renamed over the previous file.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::ledger::LEDGER_FILE_NAME;
use crate::models::{Category, DailyRecord, HeartRateRecord, Record, SleepRecord, StepRecord};

/// Header of the key column in `daily.csv`.
const DAILY_KEY_COLUMN: &str = "date";

/// A record type that can be written to and read from a CSV artifact.
pub trait Tabular: Record {
    fn write_rows<W: Write>(rows: &[Self], out: &mut csv::Writer<W>) -> Result<()>;
    fn read_rows<R: Read>(input: &mut csv::Reader<R>) -> Result<Vec<Self>>;
}

fn serialize_rows<T: Serialize, W: Write>(rows: &[T], out: &mut csv::Writer<W>) -> Result<()> {
    for row in rows {
        out.serialize(row)?;
    }
    Ok(())
}

fn deserialize_rows<T: DeserializeOwned, R: Read>(input: &mut csv::Reader<R>) -> Result<Vec<T>> {
    input
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(Into::into)
}

impl Tabular for HeartRateRecord {
    fn write_rows<W: Write>(rows: &[Self], out: &mut csv::Writer<W>) -> Result<()> {
        serialize_rows(rows, out)
    }

    fn read_rows<R: Read>(input: &mut csv::Reader<R>) -> Result<Vec<Self>> {
        deserialize_rows(input)
    }
}

impl Tabular for StepRecord {
    fn write_rows<W: Write>(rows: &[Self], out: &mut csv::Writer<W>) -> Result<()> {
        serialize_rows(rows, out)
    }

    fn read_rows<R: Read>(input: &mut csv::Reader<R>) -> Result<Vec<Self>> {
        deserialize_rows(input)
    }
}

impl Tabular for SleepRecord {
    fn write_rows<W: Write>(rows: &[Self], out: &mut csv::Writer<W>) -> Result<()> {
        serialize_rows(rows, out)
    }

    fn read_rows<R: Read>(input: &mut csv::Reader<R>) -> Result<Vec<Self>> {
        deserialize_rows(input)
    }
}

/// Daily rows have no fixed schema: the key column comes first, followed by
/// the sorted union of every value column. Columns are read back by position.
impl Tabular for DailyRecord {
    fn write_rows<W: Write>(rows: &[Self], out: &mut csv::Writer<W>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let columns: BTreeSet<&str> = rows
            .iter()
            .flat_map(|r| r.values.keys().map(String::as_str))
            .collect();

        let mut header = vec![DAILY_KEY_COLUMN];
        header.extend(columns.iter().copied());
        out.write_record(&header)?;

        for row in rows {
            let date = row
                .date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            let mut fields = vec![date];
            fields.extend(
                columns
                    .iter()
                    .map(|c| row.values.get(*c).cloned().unwrap_or_default()),
            );
            out.write_record(&fields)?;
        }
        Ok(())
    }

    fn read_rows<R: Read>(input: &mut csv::Reader<R>) -> Result<Vec<Self>> {
        let headers = input.headers()?.clone();
        let mut rows = Vec::new();
        for record in input.records() {
            let record = record?;
            let date = match record.get(0) {
                Some(s) if !s.is_empty() => Some(
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .with_context(|| format!("invalid cached date '{}'", s))?,
                ),
                _ => None,
            };
            let values: BTreeMap<String, String> = headers
                .iter()
                .zip(record.iter())
                .skip(1)
                .filter(|(_, value)| !value.is_empty())
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect();
            rows.push(DailyRecord { date, values });
        }
        Ok(rows)
    }
}

/// Owns the cache directory layout.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    dir: PathBuf,
}

impl DatasetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, category: Category) -> PathBuf {
        self.dir.join(category.cache_file_name())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE_NAME)
    }

    /// Loads a persisted dataset. A missing artifact is an empty dataset.
    pub fn load<T: Tabular>(&self) -> Result<Vec<T>> {
        let path = self.artifact_path(T::CATEGORY);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path)
            .with_context(|| format!("Failed to open cache artifact: {}", path.display()))?;
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        T::read_rows(&mut reader)
            .with_context(|| format!("Failed to read cache artifact: {}", path.display()))
    }

    /// Replaces the persisted dataset for `T`'s category.
    pub fn save<T: Tabular>(&self, rows: &[T]) -> Result<()> {
        let path = self.artifact_path(T::CATEGORY);
        write_atomic(&path, |file| {
            let mut writer = csv::Writer::from_writer(file);
            T::write_rows(rows, &mut writer)?;
            writer.flush()?;
            Ok(())
        })
    }

    /// Number of rows in a persisted artifact, without decoding them.
    pub fn row_count(&self, category: Category) -> Result<usize> {
        let path = self.artifact_path(category);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("Failed to open cache artifact: {}", path.display()))?;
        let mut count = 0;
        for record in reader.records() {
            record?;
            count += 1;
        }
        Ok(count)
    }
}

/// Writes `path` through a temporary sibling, creating parent directories as
/// needed.
pub(crate) fn write_atomic(path: &Path, write: impl FnOnce(&mut File) -> Result<()>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)
        .with_context(|| format!("Failed to create {}", tmp.display()))?;
    write(&mut file)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use tempfile::TempDir;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    #[test]
    fn missing_artifact_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path().join("cache"));
        assert!(store.load::<HeartRateRecord>().unwrap().is_empty());
    }

    #[test]
    fn heart_rate_round_trip_preserves_missing_values_and_order() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path());
        let rows = vec![
            HeartRateRecord {
                instant: at("2023-06-01 14:03:00"),
                bpm: Some(61.5),
                confidence: None,
            },
            HeartRateRecord {
                instant: at("2023-06-01 14:03:05.250"),
                bpm: None,
                confidence: Some(2.0),
            },
        ];
        store.save(&rows).unwrap();
        assert_eq!(store.load::<HeartRateRecord>().unwrap(), rows);
        assert_eq!(store.row_count(Category::HeartRate).unwrap(), 2);
    }

    #[test]
    fn sleep_and_steps_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path());
        let sleep = vec![SleepRecord {
            start: at("2023-06-01 23:00:00"),
            duration_secs: Some(600.0),
            level: Some("light".to_string()),
        }];
        let steps = vec![StepRecord {
            instant: at("2023-06-01 10:00:00"),
            steps: 0,
        }];
        store.save(&sleep).unwrap();
        store.save(&steps).unwrap();
        assert_eq!(store.load::<SleepRecord>().unwrap(), sleep);
        assert_eq!(store.load::<StepRecord>().unwrap(), steps);
    }

    #[test]
    fn daily_round_trip_with_sparse_columns() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path());
        let rows = vec![
            DailyRecord {
                date: NaiveDate::from_ymd_opt(2023, 6, 1),
                values: BTreeMap::from([
                    ("steps".to_string(), "8000".to_string()),
                    ("date".to_string(), "shadowed".to_string()),
                ]),
            },
            DailyRecord {
                date: None,
                values: BTreeMap::from([("sleep_score".to_string(), "81".to_string())]),
            },
        ];
        store.save(&rows).unwrap();
        assert_eq!(store.load::<DailyRecord>().unwrap(), rows);
    }

    #[test]
    fn save_replaces_previous_artifact() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path());
        let first = vec![StepRecord {
            instant: at("2023-06-01 10:00:00"),
            steps: 5,
        }];
        store.save(&first).unwrap();
        store.save::<StepRecord>(&[]).unwrap();
        assert!(store.load::<StepRecord>().unwrap().is_empty());
        assert!(!tmp.path().join("steps.tmp").exists());
    }
}
