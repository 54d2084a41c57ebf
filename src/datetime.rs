//! Timestamp normalization.
//!
//! Exports mix full ISO datetimes, minute-precision variants, bare dates and
//! bare times of day. [`normalize`] resolves a batch in two tiers: a fixed list
//! of explicit formats is tried against the still-unresolved elements after
//! each pass, and only what every explicit format rejected goes through the
//! slower heuristic parser.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

/// Date assigned to time-of-day values whose date could not be recovered.
const TIME_ONLY_DATE: (i32, u32, u32) = (1900, 1, 1);

/// Timestamps of at most this many characters carry only a time of day.
const TIME_OF_DAY_MAX_LEN: usize = 8;

#[derive(Debug, Clone, Copy)]
enum Format {
    DateTime(&'static str),
    Date(&'static str),
    Time(&'static str),
}

/// Explicit formats, in the order they are attempted.
const EXPLICIT_FORMATS: &[Format] = &[
    Format::DateTime("%Y-%m-%dT%H:%M:%S%.f"),
    Format::DateTime("%Y-%m-%dT%H:%M:%S"),
    Format::DateTime("%Y-%m-%dT%H:%M"),
    Format::DateTime("%Y-%m-%d %H:%M:%S"),
    Format::Date("%Y-%m-%d"),
    Format::Time("%H:%M:%S"),
    Format::Time("%H:%M"),
];

const FALLBACK_OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%z",
];

const FALLBACK_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%Y/%m/%d %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%b %d %Y %H:%M:%S",
];

const FALLBACK_DATE_FORMATS: &[&str] = &[
    "%m/%d/%Y",
    "%m/%d/%y",
    "%Y/%m/%d",
    "%d %b %Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

impl Format {
    fn parse(&self, s: &str) -> Option<NaiveDateTime> {
        match self {
            Format::DateTime(fmt) => NaiveDateTime::parse_from_str(s, fmt).ok(),
            Format::Date(fmt) => NaiveDate::parse_from_str(s, fmt)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            Format::Time(fmt) => NaiveTime::parse_from_str(s, fmt)
                .ok()
                .and_then(|t| time_only_date().map(|d| d.and_time(t))),
        }
    }
}

fn time_only_date() -> Option<NaiveDate> {
    let (y, m, d) = TIME_ONLY_DATE;
    NaiveDate::from_ymd_opt(y, m, d)
}

/// Parses a batch of timestamp strings. The output has the same length as the
/// input; unparsable elements are `None`.
pub fn normalize<S: AsRef<str>>(inputs: &[S]) -> Vec<Option<NaiveDateTime>> {
    let mut out: Vec<Option<NaiveDateTime>> = vec![None; inputs.len()];
    let mut pending: Vec<usize> = (0..inputs.len())
        .filter(|&i| !inputs[i].as_ref().trim().is_empty())
        .collect();

    for format in EXPLICIT_FORMATS {
        if pending.is_empty() {
            break;
        }
        pending.retain(|&i| match format.parse(inputs[i].as_ref().trim()) {
            Some(parsed) => {
                out[i] = Some(parsed);
                false
            }
            None => true,
        });
    }

    if !pending.is_empty() {
        tracing::debug!(
            unresolved = pending.len(),
            total = inputs.len(),
            "falling back to heuristic timestamp parsing"
        );
    }
    for i in pending {
        out[i] = parse_heuristic(inputs[i].as_ref().trim());
    }
    out
}

/// Parses a single timestamp with the same policy as [`normalize`].
pub fn parse_one(input: &str) -> Option<NaiveDateTime> {
    normalize(&[input]).pop().flatten()
}

/// Slow path for anything the explicit formats rejected.
fn parse_heuristic(s: &str) -> Option<NaiveDateTime> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.naive_utc());
    }
    if let Some(dt) = parse_epoch(s) {
        return Some(dt);
    }
    for fmt in FALLBACK_OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.naive_utc());
        }
    }
    for fmt in FALLBACK_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    FALLBACK_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Epoch seconds (10 digits) or milliseconds (13 digits).
fn parse_epoch(s: &str) -> Option<NaiveDateTime> {
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: i64 = s.parse().ok()?;
    let dt = match s.len() {
        10 => DateTime::from_timestamp(value, 0)?,
        13 => DateTime::from_timestamp_millis(value)?,
        _ => return None,
    };
    Some(dt.naive_utc())
}

/// First `YYYY-MM-DD`-shaped substring of a file name.
pub fn filename_date(name: &str) -> Option<&str> {
    const SHAPE: &[u8; 10] = b"dddd-dd-dd";
    let bytes = name.as_bytes();
    if bytes.len() < SHAPE.len() {
        return None;
    }
    (0..=bytes.len() - SHAPE.len())
        .find(|&start| {
            SHAPE.iter().enumerate().all(|(k, &shape)| {
                let b = bytes[start + k];
                match shape {
                    b'd' => b.is_ascii_digit(),
                    _ => b == shape,
                }
            })
        })
        .map(|start| &name[start..start + SHAPE.len()])
}

/// Prefixes a time-of-day timestamp with the date found in `file_name`.
///
/// Timestamps longer than a time of day, and file names without a date, are
/// returned unchanged.
pub fn with_filename_date(timestamp: &str, file_name: &str) -> String {
    if timestamp.len() <= TIME_OF_DAY_MAX_LEN {
        if let Some(date) = filename_date(file_name) {
            return format!("{}T{}", date, timestamp);
        }
    }
    timestamp.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    #[test]
    fn explicit_formats_cover_common_exports() {
        let parsed = normalize(&[
            "2023-06-01T14:03:00.250",
            "2023-06-01T14:03:00",
            "2023-06-01T14:03",
            "2023-06-01 14:03:00",
            "2023-06-01",
        ]);
        assert_eq!(
            parsed,
            vec![
                Some(at("2023-06-01 14:03:00.250")),
                Some(at("2023-06-01 14:03:00")),
                Some(at("2023-06-01 14:03:00")),
                Some(at("2023-06-01 14:03:00")),
                Some(at("2023-06-01 00:00:00")),
            ]
        );
    }

    #[test]
    fn time_only_without_date_lands_on_placeholder_day() {
        assert_eq!(parse_one("14:03:00"), Some(at("1900-01-01 14:03:00")));
        assert_eq!(parse_one("07:15"), Some(at("1900-01-01 07:15:00")));
    }

    #[test]
    fn heuristic_tier_handles_offsets_and_legacy_formats() {
        assert_eq!(
            parse_one("2023-06-01T14:03:00Z"),
            Some(at("2023-06-01 14:03:00"))
        );
        assert_eq!(
            parse_one("2023-06-01T16:03:00+02:00"),
            Some(at("2023-06-01 14:03:00"))
        );
        assert_eq!(
            parse_one("06/01/23 14:03:00"),
            Some(at("2023-06-01 14:03:00"))
        );
        assert_eq!(parse_one("1685628180"), Some(at("2023-06-01 14:03:00")));
    }

    #[test]
    fn unparsable_elements_stay_aligned() {
        let parsed = normalize(&["garbage", "", "2023-06-01T00:00:00"]);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], None);
        assert_eq!(parsed[1], None);
        assert_eq!(parsed[2], Some(at("2023-06-01 00:00:00")));
    }

    #[test]
    fn filename_date_finds_first_iso_date() {
        assert_eq!(
            filename_date("heart_rate-2023-06-01.json"),
            Some("2023-06-01")
        );
        assert_eq!(
            filename_date("steps-2022-12-31-to-2023-01-30.json"),
            Some("2022-12-31")
        );
        assert_eq!(filename_date("heart_rate-latest.json"), None);
        assert_eq!(filename_date(""), None);
    }

    #[test]
    fn time_of_day_is_prefixed_with_filename_date() {
        assert_eq!(
            with_filename_date("14:03:00", "heart_rate-2023-06-01.json"),
            "2023-06-01T14:03:00"
        );
        assert_eq!(
            with_filename_date("2023-05-01T10:00:00", "heart_rate-2023-06-01.json"),
            "2023-05-01T10:00:00"
        );
        assert_eq!(with_filename_date("14:03:00", "heart_rate.json"), "14:03:00");
    }
}
