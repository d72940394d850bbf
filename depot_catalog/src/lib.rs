//! The package metadata catalog engine: the authoritative, signed,
//! incrementally-synchronizable index of every known package version
//! available from one or more publishers.
//!
//! A [`Catalog`] owns an in-memory entry store keyed by package stem,
//! persists itself as named, individually-signed parts under a `meta_root`
//! directory, records every mutation into an append-only update log so a
//! stale replica can catch up without re-transferring the whole catalog,
//! and answers action queries (dependencies, summaries) over lazily
//! acquired manifests, filtered by variant and locale.

use std::path::PathBuf;

use thiserror::Error;

pub mod catalog;
pub mod log;
pub mod matcher;
pub mod query;
pub(crate) mod serialize;

pub use catalog::{Catalog, CatalogBuilder, CatalogEntry, Metadata};
pub use log::{PackageOp, UpdatePartInfo, UpdateRecord, UpdateSequence};
pub use matcher::extract_matching_fmris;
pub use query::{ActionClass, EntryActions};

/// File name of the attrs part: global counters, part digests, and the
/// update-log position. Always written last so readers fail closed.
pub const CATALOG_ATTRS: &str = "catalog.attrs";

/// File name of the base entry part for the `C` locale.
pub const CATALOG_BASE_C: &str = "catalog.base.C";

/// File name prefix of update-log parts; the suffix is the decimal update
/// sequence.
pub const UPDATE_PREFIX: &str = "update.";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog file '{}' has unexpected permissions {mode:03o}", path.display())]
    BadCatalogPermissions { path: PathBuf, mode: u32 },

    #[error("catalog part '{part}' failed signature verification")]
    BadCatalogSignatures { part: String },

    #[error("unknown package '{fmri}'")]
    UnknownPackage { fmri: String },

    #[error("FMRI '{fmri}' carries no version")]
    UnversionedFmri { fmri: String },

    #[error("corrupt catalog part '{part}': {source}")]
    CorruptPart {
        part: String,
        source: serde_json::Error,
    },

    #[error("failed to serialize catalog state: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("catalog I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T, E = CatalogError> = std::result::Result<T, E>;
