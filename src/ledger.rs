//! Processed-source ledger.
//!
//! Maps each ingested source identifier to the modified time (epoch seconds)
//! it had when it was ingested. Persisted as a JSON object in
//! `processed_sources.json` next to the dataset artifacts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::models::SourceRef;
use crate::store::write_atomic;

pub const LEDGER_FILE_NAME: &str = "processed_sources.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    entries: BTreeMap<String, i64>,
}

impl Ledger {
    /// Loads the ledger at `path`. A missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ledger: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse ledger: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, |file| {
            file.write_all(json.as_bytes())?;
            Ok(())
        })
    }

    /// True when the source was already ingested at (or after) its current
    /// modified time.
    pub fn is_current(&self, source: &SourceRef) -> bool {
        self.entries
            .get(&source.id)
            .is_some_and(|&recorded| recorded >= source.modified)
    }

    pub fn record(&mut self, source: &SourceRef) {
        self.entries.insert(source.id.clone(), source.modified);
    }

    pub fn get(&self, id: &str) -> Option<i64> {
        self.entries.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reprocess_only_when_strictly_newer() {
        let mut ledger = Ledger::default();
        let source = SourceRef::new("a.zip!heart_rate-1.json", 100);
        assert!(!ledger.is_current(&source));

        ledger.record(&source);
        assert!(ledger.is_current(&source));
        assert!(ledger.is_current(&SourceRef::new("a.zip!heart_rate-1.json", 99)));
        assert!(!ledger.is_current(&SourceRef::new("a.zip!heart_rate-1.json", 101)));
    }

    #[test]
    fn persists_as_flat_json_object() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache").join(LEDGER_FILE_NAME);
        let mut ledger = Ledger::default();
        ledger.record(&SourceRef::new("steps-1.json", 1_700_000_000));
        ledger.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["steps-1.json"], 1_700_000_000);
        assert_eq!(Ledger::load(&path).unwrap(), ledger);
    }

    #[test]
    fn missing_file_is_empty_and_corrupt_file_errors() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(LEDGER_FILE_NAME);
        assert!(Ledger::load(&path).unwrap().is_empty());
        std::fs::write(&path, "{not json").unwrap();
        assert!(Ledger::load(&path).is_err());
    }
}
