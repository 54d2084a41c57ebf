//! On-disk inventory and cache freshness.
//!
//! Read-only introspection behind `trk inventory` and `trk status`: what the
//! root contains, and whether each category's cache artifact is older than
//! the newest source feeding it. Nothing here raises; unreadable entries are
//! left out and missing artifacts are reported as absent.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::enumerate::{system_time_secs, CategoryMatcher, SourceEnumerator};
use crate::models::Category;
use crate::store::DatasetStore;

/// One listed file: a root-relative path (or `archive.zip!member`) and its
/// size in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileInventory {
    pub archives: Vec<FileEntry>,
    /// Sources matching a category pattern, loose or inside archives.
    pub data_files: Vec<FileEntry>,
    pub total_count: usize,
}

/// Status of one category's cache artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub exists: bool,
    pub size: u64,
    pub modified: Option<i64>,
    /// Latest modified time among the sources matching the category.
    pub source_modified: Option<i64>,
    pub fresh: bool,
}

pub fn file_inventory(enumerator: &SourceEnumerator, matcher: &CategoryMatcher) -> FileInventory {
    let archives: Vec<FileEntry> = enumerator
        .archives()
        .into_iter()
        .map(|(path, size)| FileEntry { path, size })
        .collect();

    let data_files: Vec<FileEntry> = enumerator
        .scan(|_| false)
        .filter_map(Result::ok)
        .filter(|source| matcher.matches_any(&source.reference))
        .map(|source| FileEntry {
            path: source.reference.id,
            size: source.size,
        })
        .collect();

    let total_count = archives.len() + data_files.len();
    FileInventory {
        archives,
        data_files,
        total_count,
    }
}

pub fn cache_status(
    enumerator: &SourceEnumerator,
    store: &DatasetStore,
    matcher: &CategoryMatcher,
) -> BTreeMap<Category, CacheStatus> {
    let mut latest: BTreeMap<Category, i64> = BTreeMap::new();
    for source in enumerator.scan(|_| false).filter_map(Result::ok) {
        if let Some(category) = matcher.classify(&source.reference) {
            let entry = latest.entry(category).or_insert(source.reference.modified);
            *entry = (*entry).max(source.reference.modified);
        }
    }

    Category::ALL
        .into_iter()
        .map(|category| {
            let source_modified = latest.get(&category).copied();
            let status = match std::fs::metadata(store.artifact_path(category)) {
                Ok(meta) => {
                    let modified = system_time_secs(meta.modified());
                    let rows = store.row_count(category).unwrap_or(0);
                    CacheStatus {
                        exists: true,
                        size: meta.len(),
                        modified: Some(modified),
                        source_modified,
                        fresh: rows > 0 && source_modified.map_or(true, |s| modified >= s),
                    }
                }
                Err(_) => CacheStatus {
                    source_modified,
                    ..CacheStatus::default()
                },
            };
            (category, status)
        })
        .collect()
}

/// Prints the per-category status table.
pub fn print_status(statuses: &BTreeMap<Category, CacheStatus>) {
    println!(
        "  {:<12} {:>10} {:>18} {:>18}   {}",
        "CATEGORY", "SIZE", "CACHED", "NEWEST SOURCE", "FRESH"
    );
    println!("  {}", "-".repeat(70));
    for (category, status) in statuses {
        let size = if status.exists {
            format_bytes(status.size)
        } else {
            "-".to_string()
        };
        println!(
            "  {:<12} {:>10} {:>18} {:>18}   {}",
            category.key(),
            size,
            status.modified.map(format_ts).unwrap_or_else(|| "never".to_string()),
            status
                .source_modified
                .map(format_ts)
                .unwrap_or_else(|| "none".to_string()),
            if status.fresh { "yes" } else { "no" }
        );
    }
}

pub fn print_inventory(inventory: &FileInventory) {
    if !inventory.archives.is_empty() {
        println!("Archives:");
        for entry in &inventory.archives {
            println!("  {:<60} {:>10}", entry.path, format_bytes(entry.size));
        }
    }
    if !inventory.data_files.is_empty() {
        println!("Data files:");
        for entry in &inventory.data_files {
            println!("  {:<60} {:>10}", entry.path, format_bytes(entry.size));
        }
    }
    println!("Total: {}", inventory.total_count);
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
