//! Core domain logic for tally, a personal time tracker.
//!
//! This crate contains:
//! - Records and settings, with validation of untyped input
//! - Last-writer-wins reconciliation against authority-stamped versions
//! - A multi-level binned index for range and per-tag aggregate queries
//! - The [`RecordStore`] facade tying them together, plus [`SharedStore`]
//!   for concurrent access

pub mod heap;
pub mod items;
pub mod reconcile;
pub mod record;
pub mod running;
mod shared;
pub mod store;
pub mod tag;
pub mod types;
pub mod validate;

pub use heap::{BinnedIndex, DEFAULT_BIN_WIDTH, TagDurations};
pub use items::{ItemStore, StoredItem};
pub use reconcile::{Verdict, Versioned, decide};
pub use record::{HIDDEN_MARKER, Record, Setting};
pub use shared::SharedStore;
pub use store::{Applied, ReceiveSummary, RecordStore, now_secs};
pub use tag::{UNTAGGED, parse_tags, tag_key};
pub use types::ValidationError;
