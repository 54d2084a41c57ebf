//! Record parsers, one per category.
//!
//! Each parser turns the raw bytes of one source into raw records whose
//! timestamps are still strings; timestamp normalization happens later, in
//! bulk, over the whole pending buffer of a pass. A parser never panics: any
//! content it cannot decode is reported as a [`ParseError`] and the caller
//! skips that source's contribution.
//!
//! JSON exports are decoded by classifying the document into one of a fixed
//! set of accepted shapes, tried in priority order.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::datetime::with_filename_date;
use crate::models::{file_name_of, Category};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("unrecognized document shape: {0}")]
    Shape(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawHeartRate {
    pub timestamp: String,
    pub bpm: Option<f64>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawSteps {
    pub timestamp: String,
    pub steps: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawSleep {
    pub start: String,
    pub duration_secs: Option<f64>,
    pub level: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawDaily {
    pub date: Option<String>,
    pub values: BTreeMap<String, String>,
}

/// Output of one parser run.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    HeartRate(Vec<RawHeartRate>),
    Steps(Vec<RawSteps>),
    Sleep(Vec<RawSleep>),
    Daily(Vec<RawDaily>),
}

impl Parsed {
    pub fn len(&self) -> usize {
        match self {
            Parsed::HeartRate(v) => v.len(),
            Parsed::Steps(v) => v.len(),
            Parsed::Sleep(v) => v.len(),
            Parsed::Daily(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dispatches `bytes` to the parser for `category`.
pub fn parse_source(category: Category, source_id: &str, bytes: &[u8]) -> Result<Parsed, ParseError> {
    match category {
        Category::HeartRate => parse_heart_rate(source_id, bytes).map(Parsed::HeartRate),
        Category::Steps => parse_steps(source_id, bytes).map(Parsed::Steps),
        Category::Sleep => parse_sleep(bytes).map(Parsed::Sleep),
        Category::Daily => parse_daily(bytes).map(Parsed::Daily),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Time series (heart rate, steps)
// ═══════════════════════════════════════════════════════════════════════

/// Accepted top-level shapes of a time-series export.
enum SeriesShape<'a> {
    /// `{"value": [...]}`
    Wrapped(&'a [Value]),
    /// `[...]`
    List(&'a [Value]),
}

impl<'a> SeriesShape<'a> {
    fn classify(doc: &'a Value) -> Result<Self, ParseError> {
        match doc {
            Value::Object(map) => match map.get("value") {
                Some(Value::Array(entries)) => Ok(SeriesShape::Wrapped(entries)),
                _ => Err(ParseError::Shape("object without a 'value' array")),
            },
            Value::Array(entries) => Ok(SeriesShape::List(entries)),
            _ => Err(ParseError::Shape("expected a list or an object with 'value'")),
        }
    }

    fn entries(&self) -> impl Iterator<Item = &'a Map<String, Value>> {
        let entries: &'a [Value] = match self {
            SeriesShape::Wrapped(e) | SeriesShape::List(e) => *e,
        };
        entries.iter().filter_map(Value::as_object)
    }
}

/// Accepted shapes of an entry's `value` field.
enum Payload<'a> {
    /// `"value": {"bpm": 61, "confidence": 2}`
    Nested(&'a Map<String, Value>),
    /// `"value": 61` or `"value": "61"`
    Scalar(Option<f64>),
    Absent,
}

impl<'a> Payload<'a> {
    fn classify(entry: &'a Map<String, Value>) -> Self {
        match entry.get("value") {
            Some(Value::Object(nested)) => Payload::Nested(nested),
            Some(Value::Null) | None => Payload::Absent,
            Some(other) => Payload::Scalar(number(other)),
        }
    }
}

/// Coerces a JSON number or numeric string. Anything else is missing.
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn field_number(map: &Map<String, Value>, key: &str) -> Option<f64> {
    map.get(key).and_then(number)
}

/// Entry timestamp from `dateTime`, else `time`, recovering the date from the
/// source file name for time-of-day values.
fn entry_timestamp(entry: &Map<String, Value>, file_name: &str) -> Option<String> {
    let raw = ["dateTime", "time"].iter().find_map(|key| match entry.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })?;
    Some(with_filename_date(&raw, file_name))
}

pub fn parse_heart_rate(source_id: &str, bytes: &[u8]) -> Result<Vec<RawHeartRate>, ParseError> {
    let doc: Value = serde_json::from_slice(bytes)?;
    let shape = SeriesShape::classify(&doc)?;
    let file_name = file_name_of(source_id);

    Ok(shape
        .entries()
        .filter_map(|entry| {
            let timestamp = entry_timestamp(entry, file_name)?;
            let (bpm, confidence) = match Payload::classify(entry) {
                Payload::Nested(nested) => (
                    field_number(nested, "bpm"),
                    field_number(nested, "confidence"),
                ),
                Payload::Scalar(value) => (
                    field_number(entry, "bpm").or(value),
                    field_number(entry, "confidence"),
                ),
                Payload::Absent => (
                    field_number(entry, "bpm"),
                    field_number(entry, "confidence"),
                ),
            };
            Some(RawHeartRate {
                timestamp,
                bpm,
                confidence,
            })
        })
        .collect())
}

pub fn parse_steps(source_id: &str, bytes: &[u8]) -> Result<Vec<RawSteps>, ParseError> {
    let doc: Value = serde_json::from_slice(bytes)?;
    let shape = SeriesShape::classify(&doc)?;
    let file_name = file_name_of(source_id);

    Ok(shape
        .entries()
        .filter_map(|entry| {
            let timestamp = entry_timestamp(entry, file_name)?;
            let steps = match Payload::classify(entry) {
                Payload::Nested(nested) => {
                    field_number(nested, "steps").or_else(|| field_number(nested, "value"))
                }
                Payload::Scalar(value) => value.or_else(|| field_number(entry, "steps")),
                Payload::Absent => field_number(entry, "steps"),
            };
            Some(RawSteps { timestamp, steps })
        })
        .collect())
}

// ═══════════════════════════════════════════════════════════════════════
// Sleep
// ═══════════════════════════════════════════════════════════════════════

/// Accepted shapes of a sleep export, tried in order.
enum SleepShape<'a> {
    /// `{"levels": {"data": [{dateTime|start, seconds|duration, level|stage}]}}`
    Levels(&'a [Value]),
    /// `{"sleep": [{startTime, durationMillis}]}`
    Sessions(&'a [Value]),
    /// A list of sleep logs, each in one of the shapes above.
    Logs(&'a [Value]),
    Unsupported,
}

impl<'a> SleepShape<'a> {
    fn classify(doc: &'a Value) -> Self {
        match doc {
            Value::Object(map) => {
                if let Some(data) = map
                    .get("levels")
                    .and_then(|levels| levels.get("data"))
                    .and_then(Value::as_array)
                {
                    SleepShape::Levels(data)
                } else if let Some(sessions) = map.get("sleep").and_then(Value::as_array) {
                    SleepShape::Sessions(sessions)
                } else {
                    SleepShape::Unsupported
                }
            }
            Value::Array(logs) => SleepShape::Logs(logs),
            _ => SleepShape::Unsupported,
        }
    }
}

fn first_string(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

fn collect_sleep(doc: &Value, out: &mut Vec<RawSleep>) {
    match SleepShape::classify(doc) {
        SleepShape::Levels(data) => {
            for rec in data.iter().filter_map(Value::as_object) {
                let Some(start) = first_string(rec, &["dateTime", "start"]) else {
                    continue;
                };
                out.push(RawSleep {
                    start,
                    duration_secs: field_number(rec, "seconds")
                        .or_else(|| field_number(rec, "duration")),
                    level: first_string(rec, &["level", "stage"]),
                });
            }
        }
        SleepShape::Sessions(sessions) => {
            for session in sessions.iter().filter_map(Value::as_object) {
                let Some(start) = first_string(session, &["startTime"]) else {
                    continue;
                };
                let millis = field_number(session, "durationMillis").unwrap_or(0.0);
                out.push(RawSleep {
                    start,
                    duration_secs: Some(millis / 1000.0),
                    level: None,
                });
            }
        }
        SleepShape::Logs(logs) => {
            for log in logs.iter().filter(|log| log.is_object()) {
                collect_sleep(log, out);
            }
        }
        SleepShape::Unsupported => {}
    }
}

/// Unsupported shapes yield zero records rather than an error.
pub fn parse_sleep(bytes: &[u8]) -> Result<Vec<RawSleep>, ParseError> {
    let doc: Value = serde_json::from_slice(bytes)?;
    let mut out = Vec::new();
    collect_sleep(&doc, &mut out);
    Ok(out)
}

// ═══════════════════════════════════════════════════════════════════════
// Daily summary
// ═══════════════════════════════════════════════════════════════════════

/// Plain CSV rows. The first column whose name contains "date"
/// (case-insensitive) becomes the row key.
pub fn parse_daily(bytes: &[u8]) -> Result<Vec<RawDaily>, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();
    let date_column = headers
        .iter()
        .position(|h| h.to_lowercase().contains("date"));

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut date = None;
        let mut values = BTreeMap::new();
        for (idx, field) in record.iter().enumerate() {
            if field.is_empty() {
                continue;
            }
            if Some(idx) == date_column {
                date = Some(field.to_string());
                continue;
            }
            let name = headers
                .get(idx)
                .map(str::to_string)
                .unwrap_or_else(|| format!("column_{}", idx));
            values.insert(name, field.to_string());
        }
        if date.is_none() && values.is_empty() {
            continue;
        }
        rows.push(RawDaily { date, values });
    }
    Ok(rows)
}
