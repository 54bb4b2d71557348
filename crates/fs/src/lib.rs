//! Google Cloud Storage presented as a hierarchical filesystem.
//!
//! Object keys are flat; this crate synthesizes directories from key
//! prefixes, caches listings per directory, and moves bytes with
//! integrity checking and resumable uploads.
//!
//! # Architecture
//!
//! - [`GcsFs`]: the filesystem session — listing, metadata, transfers,
//!   bulk deletion. Owns the listing cache and the transport.
//! - [`ReadHandle`] / [`WriteHandle`]: per-object transfer handles. Reads
//!   go through a block cache chosen at open time; writes buffer locally
//!   and switch to a resumable upload session past the single-shot
//!   threshold.
//! - [`ConsistencyChecker`]: pluggable end-to-end integrity check
//!   (none/size/md5/crc32c) applied to both directions of transfer.
//!
//! All I/O is async and flows through the `Transport` seam in
//! `cumulo-transport`, so the whole engine runs unmodified against an
//! in-memory transport in tests.

mod cache;
mod checker;
mod client;
mod config;
mod delete;
mod error;
mod fs;
mod path;
mod read;
mod record;
mod write;

pub use cache::{CacheStats, ListingCache, ListingCacheConfig};
pub use checker::{Consistency, ConsistencyChecker};
pub use client::GcsClient;
pub use config::GcsConfig;
pub use error::GcsError;
pub use fs::GcsFs;
pub use path::{coalesce_generation, norm_path, parent, quote, split_path};
pub use read::ReadHandle;
pub use record::{EntryKind, FixedKeyMetadata, ObjectRecord, ObjectResource};
pub use write::{WriteHandle, WriteOptions};

/// Server-imposed granularity for resumable upload chunks. Every
/// non-final chunk must be a multiple of this.
pub const GCS_MIN_BLOCK_SIZE: usize = 1 << 18;

/// Largest chunk a single resumable request may carry.
pub const GCS_MAX_BLOCK_SIZE: usize = 5 << 30;

/// Payloads below this go up in one multipart request instead of a
/// resumable session.
pub const SIMPLE_UPLOAD_THRESHOLD: usize = 5 << 20;

/// Officially supported listing page size.
pub const DEFAULT_PAGE_SIZE: u32 = 5000;

/// Hard API limit on sub-requests per batch call.
pub const MAX_BATCH_SIZE: usize = 100;
