//! # Tracker Harness
//!
//! Incremental ingestion of fitness-tracker exports into local, merged
//! per-category datasets.
//!
//! An export is a directory tree (or a single `.zip`) holding heart-rate,
//! step-count and sleep JSON files plus daily-summary CSVs, often wrapped in
//! archives. Tracker Harness discovers those files, decodes every shape they
//! come in, normalizes their heterogeneous timestamps, and merges the records
//! into deduplicated datasets persisted in a cache directory. A ledger of
//! processed sources makes repeated passes cheap: only new or modified files
//! are parsed again.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────────┐
//! │ Enumerator  │──▶│   Parsers    │──▶│ Normalizer │──▶│ CacheManager │
//! │ dirs + zips │   │ HR/steps/... │   │ timestamps │   │ merge+persist│
//! └─────────────┘   └─────────────┘   └────────────┘   └──────┬───────┘
//!                                                             │
//!                                      ┌──────────────────────┤
//!                                      ▼                      ▼
//!                                ┌──────────┐           ┌──────────┐
//!                                │   IBI    │           │   CLI    │
//!                                │  series  │           │  (trk)   │
//!                                └──────────┘           └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! trk sync                # ingest new or modified sources
//! trk status              # per-category cache freshness
//! trk inventory           # archives and data files under the root
//! trk ibi --limit 20      # derived inter-beat intervals
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Categories, records, merge policies |
//! | [`enumerate`] | Source discovery through directories and archives |
//! | [`parse`] | Per-category content decoding |
//! | [`datetime`] | Timestamp normalization |
//! | [`store`] | CSV dataset artifacts |
//! | [`ledger`] | Processed-source ledger |
//! | [`ingest`] | Incremental ingestion pass |
//! | [`ibi`] | Derived inter-beat-interval series |
//! | [`inventory`] | File inventory and cache status |
//! | [`progress`] | Progress events and reporters |
//! | [`error`] | Recovered failure kinds |

pub mod config;
pub mod datetime;
pub mod enumerate;
pub mod error;
pub mod ibi;
pub mod ingest;
pub mod inventory;
pub mod ledger;
pub mod models;
pub mod parse;
pub mod progress;
pub mod store;
