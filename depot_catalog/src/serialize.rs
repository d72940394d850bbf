//! On-disk catalog parts: serialization snapshots, part digests, file
//! permission enforcement, and the save/load/validate cycle.
//!
//! Parts are JSON. Every part is written to a temporary sibling and renamed
//! into place; `catalog.attrs` is always written last so a reader that sees
//! new attrs also sees every part it names, and fails closed (missing or
//! mismatched digest) otherwise.

use std::collections::BTreeMap;
use std::fs;
use std::mem;
use std::path::Path;

use chrono::{DateTime, Utc};
use depot_types::{Fmri, Version};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::catalog::{Catalog, CatalogEntry, Metadata};
use crate::log::{UpdatePartInfo, UpdateRecord, UpdateSequence};
use crate::{CATALOG_ATTRS, CATALOG_BASE_C, CatalogError, Result};

const CATALOG_FORMAT_VERSION: u32 = 1;

/// Signature algorithm key recorded for catalog part digests.
const SIGNATURE_SHA256: &str = "sha-256";

/// File mode for every catalog part: owner read/write, group/other read.
#[cfg(unix)]
const PART_MODE: u32 = 0o644;

/// The `catalog.attrs` part: global counters, the update-log position, and
/// the digests of every other part. Its own digest is embedded, computed
/// over the serialization with the `_signature` field empty.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AttrsSnapshot {
    pub(crate) version: u32,
    pub(crate) created: DateTime<Utc>,
    #[serde(rename = "last-modified")]
    pub(crate) last_modified: DateTime<Utc>,
    #[serde(rename = "package-count")]
    pub(crate) package_count: usize,
    #[serde(rename = "package-version-count")]
    pub(crate) package_version_count: usize,
    pub(crate) sequence: UpdateSequence,
    pub(crate) parts: BTreeMap<String, BTreeMap<String, String>>,
    pub(crate) updates: BTreeMap<String, UpdatePartInfo>,
    #[serde(
        rename = "_signature",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub(crate) signature: BTreeMap<String, String>,
}

/// A `catalog.base.<locale>` part: entries per package stem, version-sorted.
#[derive(Debug, Serialize, Deserialize)]
struct BasePartSnapshot {
    packages: BTreeMap<String, Vec<EntrySnapshot>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntrySnapshot {
    version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    publisher: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    signatures: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<Metadata>,
}

impl BasePartSnapshot {
    fn from_catalog(catalog: &Catalog) -> Self {
        let packages = catalog
            .entries
            .iter()
            .map(|(stem, versions)| {
                let entries = versions
                    .iter()
                    .map(|(fmri, entry)| EntrySnapshot {
                        version: fmri
                            .version()
                            .expect("catalog entries always carry a version")
                            .clone(),
                        publisher: fmri.publisher().map(str::to_string),
                        signatures: entry.signatures.clone(),
                        metadata: entry.metadata.clone(),
                    })
                    .collect();
                (stem.clone(), entries)
            })
            .collect();
        Self { packages }
    }

    fn apply_to(self, catalog: &mut Catalog) -> Result<()> {
        for (stem, entries) in self.packages {
            for snap in entries {
                let fmri = Fmri::new(snap.publisher, stem.clone(), Some(snap.version));
                let entry = CatalogEntry::with_parts(snap.signatures, snap.metadata);
                catalog.insert_entry(fmri, entry)?;
            }
        }
        Ok(())
    }
}

impl Catalog {
    /// Serialize the catalog into its parts, advancing the update log and
    /// recording part signatures.
    ///
    /// Saving a read-only catalog is a programming-contract violation.
    /// Without a `meta_root`, signatures are computed (per the `sign`
    /// option) but nothing is written.
    pub fn save(&mut self) -> Result<()> {
        assert!(!self.read_only, "cannot save a read-only catalog");
        self.touch();

        // Update part first: a reader must never see attrs naming a part
        // that is not yet on disk.
        if self.log_updates {
            let sequence = self.sequence.next();
            let record = UpdateRecord {
                sequence,
                last_modified: self.last_modified,
                ops: mem::take(&mut self.pending),
            };
            let bytes = serde_json::to_vec(&record)?;
            let signatures = if self.sign {
                part_digests(&bytes)
            } else {
                BTreeMap::new()
            };
            let name = sequence.part_name();
            if let Some(root) = self.meta_root.clone() {
                write_part(&root, &name, &bytes)?;
            }
            self.updates.insert(
                name,
                UpdatePartInfo {
                    sequence,
                    signatures,
                },
            );
            self.set_sequence(sequence);
        } else {
            self.pending.clear();
        }

        let base = BasePartSnapshot::from_catalog(self);
        let base_bytes = serde_json::to_vec(&base)?;
        let base_digests = if self.sign {
            part_digests(&base_bytes)
        } else {
            BTreeMap::new()
        };
        if let Some(root) = self.meta_root.clone() {
            write_part(&root, CATALOG_BASE_C, &base_bytes)?;
        }

        let mut attrs = AttrsSnapshot {
            version: CATALOG_FORMAT_VERSION,
            created: self.created,
            last_modified: self.last_modified,
            package_count: self.package_count(),
            package_version_count: self.package_version_count,
            sequence: self.sequence,
            parts: BTreeMap::from([(CATALOG_BASE_C.to_string(), base_digests)]),
            updates: self.updates.clone(),
            signature: BTreeMap::new(),
        };
        if self.sign {
            attrs.signature = part_digests(&serde_json::to_vec(&attrs)?);
        }
        let attrs_bytes = serde_json::to_vec(&attrs)?;
        if let Some(root) = self.meta_root.clone() {
            write_part(&root, CATALOG_ATTRS, &attrs_bytes)?;
        }

        self.part_signatures = exposed_signatures(&attrs);
        debug!(
            meta_root = ?self.meta_root,
            sequence = self.sequence.as_u64(),
            "saved catalog"
        );
        Ok(())
    }

    /// Recompute the digest of every part physically present and compare it
    /// against the recorded signatures. A catalog without signature data
    /// validates trivially.
    pub fn validate(&self) -> Result<()> {
        let Some(root) = self.meta_root.as_deref() else {
            return Ok(());
        };

        let attrs_path = root.join(CATALOG_ATTRS);
        if attrs_path.exists() {
            let bytes = read_part(root, CATALOG_ATTRS)?;
            let mut attrs: AttrsSnapshot =
                serde_json::from_slice(&bytes).map_err(|source| CatalogError::CorruptPart {
                    part: CATALOG_ATTRS.to_string(),
                    source,
                })?;
            let recorded = mem::take(&mut attrs.signature);
            if !recorded.is_empty() && part_digests(&serde_json::to_vec(&attrs)?) != recorded {
                return Err(CatalogError::BadCatalogSignatures {
                    part: CATALOG_ATTRS.to_string(),
                });
            }
        }

        for (name, recorded) in &self.part_signatures {
            if name == CATALOG_ATTRS || recorded.is_empty() {
                continue;
            }
            if !root.join(name).exists() {
                continue;
            }
            let bytes = read_part(root, name)?;
            if part_digests(&bytes) != *recorded {
                return Err(CatalogError::BadCatalogSignatures { part: name.clone() });
            }
        }
        Ok(())
    }
}

/// Populate a freshly built catalog from the parts under its `meta_root`,
/// enforcing part file permissions along the way. A directory with no attrs
/// part yields an empty catalog.
pub(crate) fn load(catalog: &mut Catalog) -> Result<()> {
    let Some(root) = catalog.meta_root.clone() else {
        return Ok(());
    };
    let attrs_path = root.join(CATALOG_ATTRS);
    if !attrs_path.exists() {
        return Ok(());
    }
    enforce_part_mode(&attrs_path, catalog.read_only)?;

    let bytes = read_part(&root, CATALOG_ATTRS)?;
    let attrs: AttrsSnapshot =
        serde_json::from_slice(&bytes).map_err(|source| CatalogError::CorruptPart {
            part: CATALOG_ATTRS.to_string(),
            source,
        })?;

    for name in attrs.parts.keys().chain(attrs.updates.keys()) {
        let path = root.join(name);
        if path.exists() {
            enforce_part_mode(&path, catalog.read_only)?;
        }
    }

    if attrs.parts.contains_key(CATALOG_BASE_C) && root.join(CATALOG_BASE_C).exists() {
        let bytes = read_part(&root, CATALOG_BASE_C)?;
        let base: BasePartSnapshot =
            serde_json::from_slice(&bytes).map_err(|source| CatalogError::CorruptPart {
                part: CATALOG_BASE_C.to_string(),
                source,
            })?;
        base.apply_to(catalog)?;
    }

    catalog.created = attrs.created;
    catalog.last_modified = attrs.last_modified;
    catalog.set_sequence(attrs.sequence);
    catalog.updates = attrs.updates.clone();
    catalog.part_signatures = exposed_signatures(&attrs);
    debug!(
        meta_root = %root.display(),
        packages = catalog.package_version_count(),
        "loaded catalog"
    );
    Ok(())
}

/// Read a catalog's attrs part directly from a `meta_root` directory, as
/// the update protocol does for remote catalogs.
pub(crate) fn load_attrs(meta_root: &Path) -> Result<AttrsSnapshot> {
    let bytes = read_part(meta_root, CATALOG_ATTRS)?;
    serde_json::from_slice(&bytes).map_err(|source| CatalogError::CorruptPart {
        part: CATALOG_ATTRS.to_string(),
        source,
    })
}

/// The `signatures()` view of an attrs snapshot: the attrs entry is always
/// present (empty for unsigned catalogs); other parts appear only with
/// recorded digests.
fn exposed_signatures(attrs: &AttrsSnapshot) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut exposed = BTreeMap::from([(CATALOG_ATTRS.to_string(), attrs.signature.clone())]);
    for (name, digests) in &attrs.parts {
        if !digests.is_empty() {
            exposed.insert(name.clone(), digests.clone());
        }
    }
    for (name, info) in &attrs.updates {
        if !info.signatures.is_empty() {
            exposed.insert(name.clone(), info.signatures.clone());
        }
    }
    exposed
}

pub(crate) fn part_digests(bytes: &[u8]) -> BTreeMap<String, String> {
    BTreeMap::from([(
        SIGNATURE_SHA256.to_string(),
        hex::encode(Sha256::digest(bytes)),
    )])
}

pub(crate) fn read_part(root: &Path, name: &str) -> Result<Vec<u8>> {
    let path = root.join(name);
    fs::read(&path).map_err(|source| io_error(&path, source))
}

fn write_part(root: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    fs::create_dir_all(root).map_err(|source| io_error(root, source))?;
    let tmp = root.join(format!("{name}.tmp"));
    fs::write(&tmp, bytes).map_err(|source| io_error(&tmp, source))?;
    set_part_mode(&tmp)?;
    let path = root.join(name);
    fs::rename(&tmp, &path).map_err(|source| io_error(&path, source))?;
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> CatalogError {
    CatalogError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(unix)]
fn set_part_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(PART_MODE))
        .map_err(|source| io_error(path, source))
}

#[cfg(not(unix))]
fn set_part_mode(_path: &Path) -> Result<()> {
    Ok(())
}

/// Self-heal the permission bits of an existing part, unless the catalog is
/// read-only, in which case non-conformant permissions are an error.
#[cfg(unix)]
fn enforce_part_mode(path: &Path, read_only: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = fs::metadata(path).map_err(|source| io_error(path, source))?;
    let mode = metadata.permissions().mode() & 0o7777;
    if mode == PART_MODE {
        return Ok(());
    }
    if read_only {
        return Err(CatalogError::BadCatalogPermissions {
            path: path.to_path_buf(),
            mode,
        });
    }
    warn!(
        path = %path.display(),
        mode = format_args!("{mode:03o}"),
        "repairing catalog part permissions"
    );
    fs::set_permissions(path, fs::Permissions::from_mode(PART_MODE))
        .map_err(|source| io_error(path, source))
}

#[cfg(not(unix))]
fn enforce_part_mode(_path: &Path, _read_only: bool) -> Result<()> {
    Ok(())
}
