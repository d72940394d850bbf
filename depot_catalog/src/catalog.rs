//! The in-memory catalog: entry store, derived counters, the mutation API,
//! and the two-phase append/merge protocol.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use depot_manifest::{Manifest, ManifestSource};
use depot_types::{Fmri, Version};
use serde_json::Value;
use tracing::debug;

use crate::log::{PackageOp, UpdatePartInfo, UpdateSequence};
use crate::{CATALOG_ATTRS, CatalogError, Result, serialize};

/// Caller-attached entry state, e.g. installation state flags. Never
/// interpreted by the catalog and never inherited through a plain
/// [`Catalog::append`].
pub type Metadata = serde_json::Map<String, Value>;

/// One catalog entry, keyed by its FMRI in the store.
///
/// `signatures` holds the manifest content digests recorded when the
/// package was added (empty for unsigned entries). The manifest reference
/// is in-memory only and never serialized.
#[derive(Debug, Clone, Default)]
pub struct CatalogEntry {
    pub(crate) signatures: BTreeMap<String, String>,
    pub(crate) metadata: Option<Metadata>,
    pub(crate) manifest: Option<Arc<Manifest>>,
}

impl CatalogEntry {
    pub(crate) fn with_parts(
        signatures: BTreeMap<String, String>,
        metadata: Option<Metadata>,
    ) -> Self {
        Self {
            signatures,
            metadata,
            manifest: None,
        }
    }

    /// Manifest signature algorithm to digest; empty for unsigned entries.
    pub fn signatures(&self) -> &BTreeMap<String, String> {
        &self.signatures
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// The embedded manifest, when the package was added with one.
    pub fn manifest(&self) -> Option<&Arc<Manifest>> {
        self.manifest.as_ref()
    }
}

/// Configures and constructs a [`Catalog`].
pub struct CatalogBuilder {
    meta_root: Option<PathBuf>,
    log_updates: bool,
    sign: bool,
    read_only: bool,
    manifest_source: Option<Box<dyn ManifestSource>>,
}

impl Default for CatalogBuilder {
    fn default() -> Self {
        Self {
            meta_root: None,
            log_updates: false,
            sign: true,
            read_only: false,
            manifest_source: None,
        }
    }
}

impl fmt::Debug for CatalogBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogBuilder")
            .field("meta_root", &self.meta_root)
            .field("log_updates", &self.log_updates)
            .field("sign", &self.sign)
            .field("read_only", &self.read_only)
            .field("manifest_source", &self.manifest_source.is_some())
            .finish()
    }
}

impl CatalogBuilder {
    /// Directory the catalog parts live in. Existing parts are loaded by
    /// [`CatalogBuilder::build`].
    pub fn meta_root(mut self, meta_root: impl Into<PathBuf>) -> Self {
        self.meta_root = Some(meta_root.into());
        self
    }

    /// Record every mutation into the update log and write one update part
    /// per save.
    pub fn log_updates(mut self, log_updates: bool) -> Self {
        self.log_updates = log_updates;
        self
    }

    /// Compute part digests at save time. Defaults to on.
    pub fn sign(mut self, sign: bool) -> Self {
        self.sign = sign;
        self
    }

    /// Refuse to repair part permissions on load and refuse to save.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Capability used to acquire manifests on demand during action
    /// queries.
    pub fn manifest_source(mut self, source: impl ManifestSource + 'static) -> Self {
        self.manifest_source = Some(Box::new(source));
        self
    }

    pub fn build(self) -> Result<Catalog> {
        let now = Utc::now();
        let mut catalog = Catalog {
            meta_root: self.meta_root,
            log_updates: self.log_updates,
            sign: self.sign,
            read_only: self.read_only,
            manifest_source: self.manifest_source,
            entries: BTreeMap::new(),
            package_version_count: 0,
            created: now,
            last_modified: now,
            sequence: UpdateSequence::default(),
            updates: BTreeMap::new(),
            part_signatures: BTreeMap::from([(CATALOG_ATTRS.to_string(), BTreeMap::new())]),
            pending: Vec::new(),
            staged: Vec::new(),
        };
        if catalog.meta_root.is_some() {
            serialize::load(&mut catalog)?;
        }
        Ok(catalog)
    }
}

/// The versioned index of known package FMRIs and associated metadata.
pub struct Catalog {
    pub(crate) meta_root: Option<PathBuf>,
    pub(crate) log_updates: bool,
    pub(crate) sign: bool,
    pub(crate) read_only: bool,
    manifest_source: Option<Box<dyn ManifestSource>>,
    /// Stem to version-sorted entries; no two entries share an FMRI.
    pub(crate) entries: BTreeMap<String, Vec<(Fmri, CatalogEntry)>>,
    pub(crate) package_version_count: usize,
    pub(crate) created: DateTime<Utc>,
    pub(crate) last_modified: DateTime<Utc>,
    /// Sequence of the last update record written or applied.
    pub(crate) sequence: UpdateSequence,
    /// On-disk update parts, by part name.
    pub(crate) updates: BTreeMap<String, UpdatePartInfo>,
    /// Part name to algorithm to digest, as exposed by
    /// [`Catalog::signatures`].
    pub(crate) part_signatures: BTreeMap<String, BTreeMap<String, String>>,
    /// Ops recorded since the last save, drained into the next update part.
    pub(crate) pending: Vec<PackageOp>,
    /// Entries staged by append, invisible until finalized.
    staged: Vec<(Fmri, CatalogEntry)>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("meta_root", &self.meta_root)
            .field("package_count", &self.package_count())
            .field("package_version_count", &self.package_version_count)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    /// An empty, in-memory catalog with default options.
    pub fn new() -> Self {
        CatalogBuilder::default()
            .build()
            .expect("building an in-memory catalog performs no I/O")
    }

    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    pub fn meta_root(&self) -> Option<&Path> {
        self.meta_root.as_deref()
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Number of distinct package names.
    pub fn package_count(&self) -> usize {
        self.entries.len()
    }

    /// Total number of catalog entries across all names.
    pub fn package_version_count(&self) -> usize {
        self.package_version_count
    }

    /// Part name to algorithm to digest, reflecting the bytes written by
    /// the last save (or recorded by the loaded attrs part). An unsaved or
    /// unsigned catalog maps only `catalog.attrs` to an empty digest set.
    pub fn signatures(&self) -> &BTreeMap<String, BTreeMap<String, String>> {
        &self.part_signatures
    }

    /// The on-disk update parts this catalog knows about, by part name.
    pub fn update_parts(&self) -> &BTreeMap<String, UpdatePartInfo> {
        &self.updates
    }

    /// Sequence of the last update record written or applied.
    pub fn sequence(&self) -> UpdateSequence {
        self.sequence
    }

    /// Insert or replace the entry for `fmri`. When a manifest is supplied
    /// its content signatures are recorded on the entry and the manifest is
    /// kept for action queries.
    pub fn add_package(&mut self, fmri: Fmri, manifest: Option<Arc<Manifest>>) -> Result<()> {
        let signatures = manifest
            .as_ref()
            .map(|m| m.signatures().clone())
            .unwrap_or_default();
        let entry = CatalogEntry {
            signatures: signatures.clone(),
            metadata: None,
            manifest,
        };
        debug!(fmri = %fmri, "adding package");
        self.insert_entry(fmri.clone(), entry)?;
        if self.log_updates {
            self.pending.push(PackageOp::Add {
                fmri,
                signatures,
                metadata: None,
            });
        }
        self.touch();
        Ok(())
    }

    /// Remove the entry for `fmri`, failing when it is absent.
    pub fn remove_package(&mut self, fmri: &Fmri) -> Result<()> {
        if !self.remove_entry(fmri) {
            return Err(CatalogError::UnknownPackage {
                fmri: fmri.to_string(),
            });
        }
        if self.log_updates {
            self.pending.push(PackageOp::Remove { fmri: fmri.clone() });
        }
        self.touch();
        Ok(())
    }

    pub fn get_entry(&self, fmri: &Fmri) -> Result<&CatalogEntry> {
        self.entries
            .get(fmri.stem())
            .and_then(|versions| {
                versions
                    .binary_search_by(|(existing, _)| existing.cmp(fmri))
                    .ok()
                    .map(|i| &versions[i].1)
            })
            .ok_or_else(|| CatalogError::UnknownPackage {
                fmri: fmri.to_string(),
            })
    }

    /// All FMRIs, in stem order and version order within a stem. Lazy and
    /// restartable.
    pub fn fmris(&self) -> impl Iterator<Item = &Fmri> {
        self.entries.values().flatten().map(|(fmri, _)| fmri)
    }

    /// All `(fmri, entry)` pairs, in the same order as [`Catalog::fmris`].
    pub fn entries(&self) -> impl Iterator<Item = (&Fmri, &CatalogEntry)> {
        self.entries
            .values()
            .flatten()
            .map(|(fmri, entry)| (fmri, entry))
    }

    /// The set of distinct package names.
    pub fn names(&self) -> BTreeSet<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Entries of the requested names grouped per distinct version, each
    /// version's entries returned together.
    pub fn entries_by_version<'a>(
        &'a self,
        names: &[&str],
    ) -> impl Iterator<Item = (&'a Version, Vec<(&'a Fmri, &'a CatalogEntry)>)> + use<'a> {
        let mut groups: Vec<(&Version, Vec<(&Fmri, &CatalogEntry)>)> = Vec::new();
        for name in names {
            let Some(versions) = self.entries.get(*name) else {
                continue;
            };
            let mut current: Option<(&Version, Vec<(&Fmri, &CatalogEntry)>)> = None;
            for (fmri, entry) in versions {
                let version = fmri
                    .version()
                    .expect("catalog entries always carry a version");
                match &mut current {
                    Some((v, group)) if *v == version => group.push((fmri, entry)),
                    _ => {
                        if let Some(done) = current.take() {
                            groups.push(done);
                        }
                        current = Some((version, vec![(fmri, entry)]));
                    }
                }
            }
            if let Some(done) = current.take() {
                groups.push(done);
            }
        }
        groups.into_iter()
    }

    /// Like [`Catalog::entries_by_version`], keeping only the FMRIs.
    pub fn fmris_by_version<'a>(
        &'a self,
        names: &[&str],
    ) -> impl Iterator<Item = (&'a Version, Vec<&'a Fmri>)> + use<'a> {
        self.entries_by_version(names)
            .map(|(version, group)| (version, group.into_iter().map(|(fmri, _)| fmri).collect()))
    }

    /// Stage every entry of `source` for inclusion, dropping caller
    /// metadata. Staged entries become queryable at [`Catalog::finalize`].
    pub fn append(&mut self, source: &Catalog) {
        self.append_with(source, |_, _| (true, None), None);
    }

    /// Stage entries of `source`, consulting `cb` per FMRI (or exactly
    /// once, for `pfmri`, when one is given). The callback returns whether
    /// to include the FMRI and, optionally, metadata to attach to the
    /// staged entry.
    pub fn append_with<F>(&mut self, source: &Catalog, mut cb: F, pfmri: Option<&Fmri>)
    where
        F: FnMut(&Fmri, &CatalogEntry) -> (bool, Option<Metadata>),
    {
        for (fmri, entry) in source.entries() {
            if let Some(pfmri) = pfmri {
                if fmri != pfmri {
                    continue;
                }
            }
            let (include, metadata) = cb(fmri, entry);
            if !include {
                continue;
            }
            let mut staged = CatalogEntry {
                signatures: entry.signatures.clone(),
                metadata: None,
                manifest: entry.manifest.clone(),
            };
            if let Some(metadata) = metadata {
                if !metadata.is_empty() {
                    staged.metadata = Some(metadata);
                }
            }
            self.staged.push((fmri.clone(), staged));
        }
    }

    /// Merge staged entries into the store and rebuild derived state.
    /// Several appends may be batched before one finalize.
    pub fn finalize(&mut self) -> Result<()> {
        for (fmri, entry) in mem::take(&mut self.staged) {
            if self.log_updates {
                self.pending.push(PackageOp::Add {
                    fmri: fmri.clone(),
                    signatures: entry.signatures.clone(),
                    metadata: entry.metadata.clone(),
                });
            }
            self.insert_entry(fmri, entry)?;
        }
        self.touch();
        Ok(())
    }

    /// The manifest for `fmri`: the embedded one when present, otherwise
    /// whatever the manifest source produces, otherwise an empty manifest.
    pub fn entry_manifest(&self, fmri: &Fmri) -> Result<Arc<Manifest>> {
        let entry = self.get_entry(fmri)?;
        Ok(self.manifest_for_entry(fmri, entry))
    }

    pub(crate) fn manifest_for_entry(&self, fmri: &Fmri, entry: &CatalogEntry) -> Arc<Manifest> {
        if let Some(manifest) = &entry.manifest {
            return Arc::clone(manifest);
        }
        if let Some(source) = &self.manifest_source {
            return source.fetch(fmri);
        }
        Arc::new(Manifest::new())
    }

    pub(crate) fn insert_entry(&mut self, fmri: Fmri, entry: CatalogEntry) -> Result<bool> {
        if fmri.version().is_none() {
            return Err(CatalogError::UnversionedFmri {
                fmri: fmri.to_string(),
            });
        }
        let versions = self.entries.entry(fmri.stem().to_string()).or_default();
        match versions.binary_search_by(|(existing, _)| existing.cmp(&fmri)) {
            Ok(i) => {
                versions[i] = (fmri, entry);
                Ok(false)
            }
            Err(i) => {
                versions.insert(i, (fmri, entry));
                self.package_version_count += 1;
                Ok(true)
            }
        }
    }

    pub(crate) fn remove_entry(&mut self, fmri: &Fmri) -> bool {
        let Some(versions) = self.entries.get_mut(fmri.stem()) else {
            return false;
        };
        let Ok(i) = versions.binary_search_by(|(existing, _)| existing.cmp(fmri)) else {
            return false;
        };
        versions.remove(i);
        self.package_version_count -= 1;
        if versions.is_empty() {
            self.entries.remove(fmri.stem());
        }
        true
    }

    pub(crate) fn set_sequence(&mut self, sequence: UpdateSequence) {
        self.sequence = sequence;
    }

    pub(crate) fn touch(&mut self) {
        self.last_modified = Utc::now();
    }

    /// Whether this catalog has any persistent state to update
    /// incrementally from.
    pub(crate) fn has_catalog_state(&self) -> bool {
        self.sequence.as_u64() > 0
            || self
                .meta_root
                .as_deref()
                .is_some_and(|root| root.join(CATALOG_ATTRS).exists())
    }
}
