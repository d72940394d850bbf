//! The append-only update log: per-save delta records identified by a
//! monotonically increasing sequence, and the replica-synchronization
//! protocol built on them.
//!
//! Replay is a pure fold of records into the entry store; replaying every
//! record from an empty catalog reproduces the origin's entry store
//! exactly, which is what makes "replica plus missing updates equals
//! origin" hold by construction.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use depot_types::Fmri;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{Catalog, CatalogEntry, Metadata};
use crate::serialize::{load_attrs, part_digests, read_part};
use crate::{CatalogError, Result, UPDATE_PREFIX};

/// The sequence number of one update-log record. Zero means "no updates
/// yet"; the first save of a logging catalog writes sequence one.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UpdateSequence(u64);

impl UpdateSequence {
    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The update part name carrying this sequence, e.g. `update.3`.
    pub fn part_name(&self) -> String {
        format!("{UPDATE_PREFIX}{}", self.0)
    }
}

/// One logged mutation of the entry store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PackageOp {
    Add {
        fmri: Fmri,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        signatures: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Metadata>,
    },
    Remove {
        fmri: Fmri,
    },
}

/// One update-log part: the delta of a single save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub sequence: UpdateSequence,
    #[serde(rename = "last-modified")]
    pub last_modified: DateTime<Utc>,
    pub ops: Vec<PackageOp>,
}

/// Attrs-recorded description of one on-disk update part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePartInfo {
    pub sequence: UpdateSequence,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signatures: BTreeMap<String, String>,
}

impl Catalog {
    /// The update identifiers this catalog would have to apply, in order,
    /// to reach the state of the catalog stored at `remote_meta_root`.
    ///
    /// A catalog with no on-disk parts of its own cannot be updated
    /// incrementally; the result is empty and the caller falls back to a
    /// full transfer.
    pub fn get_updates_needed(&self, remote_meta_root: &Path) -> Result<Vec<String>> {
        if !self.has_catalog_state() {
            return Ok(Vec::new());
        }
        let attrs = load_attrs(remote_meta_root)?;
        Ok(self.missing_updates(&attrs.updates))
    }

    /// Apply, in order, every update record this catalog is missing from
    /// the catalog stored at `remote_meta_root`. A catalog that is already
    /// up to date is left untouched. Update parts with recorded digests are
    /// verified before being applied.
    pub fn apply_updates(&mut self, remote_meta_root: &Path) -> Result<()> {
        let attrs = load_attrs(remote_meta_root)?;
        let needed = self.missing_updates(&attrs.updates);
        for name in needed {
            let info = &attrs.updates[&name];
            let bytes = read_part(remote_meta_root, &name)?;
            verify_part(&name, &bytes, &info.signatures)?;
            let record: UpdateRecord =
                serde_json::from_slice(&bytes).map_err(|source| CatalogError::CorruptPart {
                    part: name.clone(),
                    source,
                })?;
            debug!(part = %name, ops = record.ops.len(), "applying update record");
            self.apply_record(&record)?;
        }
        Ok(())
    }

    /// Update part names with a sequence beyond ours, in sequence order.
    fn missing_updates(&self, remote: &BTreeMap<String, UpdatePartInfo>) -> Vec<String> {
        let mut needed: Vec<(&UpdatePartInfo, &String)> = remote
            .iter()
            .filter(|(_, info)| info.sequence > self.sequence())
            .map(|(name, info)| (info, name))
            .collect();
        needed.sort_by_key(|(info, _)| info.sequence);
        needed.into_iter().map(|(_, name)| name.clone()).collect()
    }

    fn apply_record(&mut self, record: &UpdateRecord) -> Result<()> {
        for op in &record.ops {
            match op {
                PackageOp::Add {
                    fmri,
                    signatures,
                    metadata,
                } => {
                    let entry = CatalogEntry::with_parts(signatures.clone(), metadata.clone());
                    self.insert_entry(fmri.clone(), entry)?;
                }
                PackageOp::Remove { fmri } => {
                    // Removal of an entry we never saw is a no-op on replay.
                    let _ = self.remove_entry(fmri);
                }
            }
        }
        self.set_sequence(record.sequence);
        self.touch();
        Ok(())
    }
}

pub(crate) fn verify_part(
    name: &str,
    bytes: &[u8],
    recorded: &BTreeMap<String, String>,
) -> Result<()> {
    if recorded.is_empty() {
        return Ok(());
    }
    if part_digests(bytes) != *recorded {
        return Err(CatalogError::BadCatalogSignatures {
            part: name.to_string(),
        });
    }
    Ok(())
}
