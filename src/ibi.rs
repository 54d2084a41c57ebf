//! Derived inter-beat-interval series.

use crate::models::{HeartRateRecord, IbiPoint};

/// IBI in milliseconds for every record with a positive bpm. Missing and
/// non-positive bpm values are undefined and excluded.
pub fn derive_ibi(heart_rate: &[HeartRateRecord]) -> Vec<IbiPoint> {
    heart_rate
        .iter()
        .filter_map(|record| match record.bpm {
            Some(bpm) if bpm > 0.0 => Some(IbiPoint {
                instant: record.instant,
                ibi_ms: 60_000.0 / bpm,
            }),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn record(s: &str, bpm: Option<f64>) -> HeartRateRecord {
        HeartRateRecord {
            instant: NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap(),
            bpm,
            confidence: None,
        }
    }

    #[test]
    fn zero_negative_and_missing_bpm_are_excluded() {
        let hr = vec![
            record("2023-06-01T10:00:00", Some(60.0)),
            record("2023-06-01T10:00:05", Some(0.0)),
            record("2023-06-01T10:00:10", None),
            record("2023-06-01T10:00:15", Some(-5.0)),
            record("2023-06-01T10:00:20", Some(120.0)),
        ];
        let ibi = derive_ibi(&hr);
        assert_eq!(ibi.len(), 2);
        assert_eq!(ibi[0].instant, hr[0].instant);
        assert_eq!(ibi[0].ibi_ms, 1000.0);
        assert_eq!(ibi[1].ibi_ms, 500.0);
    }

    #[test]
    fn empty_input_yields_empty_series() {
        assert!(derive_ibi(&[]).is_empty());
    }
}
