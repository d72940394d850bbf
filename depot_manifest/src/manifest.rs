//! Manifest content: an ordered action sequence plus content signatures,
//! and the [`ManifestSource`] capability the catalog uses to acquire
//! manifests on demand.

use std::collections::BTreeMap;
use std::sync::Arc;

use depot_types::Fmri;
use sha2::{Digest, Sha256};

use crate::action::{Action, ActionError};

/// Signature algorithm key recorded for manifest content digests.
pub const SIGNATURE_SHA256: &str = "sha-256";

/// A parsed package manifest: actions in declaration order, plus a digest
/// of the content they were parsed from. A default manifest is empty and
/// unsigned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    actions: Vec<Action>,
    signatures: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace this manifest's actions by parsing `content`, one action per
    /// line; blank lines and `#` comments are skipped. Records the content
    /// digest into [`Manifest::signatures`].
    pub fn set_content(&mut self, content: &str) -> Result<(), ActionError> {
        let mut actions = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            actions.push(line.parse()?);
        }
        self.actions = actions;
        self.signatures = BTreeMap::from([(
            SIGNATURE_SHA256.to_string(),
            hex::encode(Sha256::digest(content.as_bytes())),
        )]);
        Ok(())
    }

    /// Actions in declaration order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Algorithm name to hex digest of the manifest content; empty until
    /// content has been set.
    pub fn signatures(&self) -> &BTreeMap<String, String> {
        &self.signatures
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Sorted values of the named variant declared by this manifest, or
    /// `None` when no action declares it.
    pub fn variant_values(&self, variant: &str) -> Option<Vec<String>> {
        let mut values: Vec<String> = self
            .actions
            .iter()
            .filter(|a| a.kind() == "set" && a.name() == Some(variant))
            .flat_map(|a| a.attr_values("value").unwrap_or(&[]).iter().cloned())
            .collect();
        if values.is_empty() {
            return None;
        }
        values.sort();
        values.dedup();
        Some(values)
    }

    /// Every variant this manifest declares, as `(name, sorted values)`
    /// pairs in name order.
    pub fn all_variants(&self) -> impl Iterator<Item = (String, Vec<String>)> {
        let mut by_name: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for action in &self.actions {
            if action.kind() != "set" {
                continue;
            }
            let Some(name) = action.name() else { continue };
            if !name.starts_with("variant.") {
                continue;
            }
            let values = by_name.entry(name.to_string()).or_default();
            values.extend(action.attr_values("value").unwrap_or(&[]).iter().cloned());
        }
        by_name.into_iter().map(|(name, mut values)| {
            values.sort();
            values.dedup();
            (name, values)
        })
    }
}

/// Capability for acquiring a manifest per FMRI on demand.
///
/// Invoked synchronously during action queries; the catalog does not cache
/// the result, so a source that wants caching caches internally. A source
/// with nothing to offer for an FMRI returns an empty manifest.
pub trait ManifestSource {
    fn fetch(&self, pfmri: &Fmri) -> Arc<Manifest>;
}

impl<F> ManifestSource for F
where
    F: Fn(&Fmri) -> Arc<Manifest>,
{
    fn fetch(&self, pfmri: &Fmri) -> Arc<Manifest> {
        self(pfmri)
    }
}
