//! Failure kinds recovered during an ingestion pass.
//!
//! None of these escape [`crate::ingest::CacheManager::run_full_pass`]; each
//! one degrades to an empty or partial result plus a progress event.

use thiserror::Error;

use crate::models::Category;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    /// A file or archive member could not be opened or decoded.
    #[error("source unreadable: {reason}")]
    SourceUnreadable { reason: String },

    /// Content matched a category's name pattern but none of its shapes.
    #[error("{category} parse failure: {reason}")]
    ParseFailure { category: Category, reason: String },

    /// A dataset artifact or the ledger could not be written.
    #[error("cache write failure for {target}: {reason}")]
    CacheWriteFailure { target: String, reason: String },

    /// The ingestion root does not exist.
    #[error("root does not exist")]
    RootMissing,
}
