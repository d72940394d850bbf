//! The manifest collaborator model the catalog consumes: parsed actions
//! with queryable attributes, manifest content signatures, the
//! [`ManifestSource`] acquisition capability, and the [`Variants`] predicate
//! used to exclude actions by variant tag.
//!
//! The catalog treats a manifest as an opaque, already-parsed sequence of
//! actions; nothing here interprets action semantics beyond attribute
//! lookup.

pub mod action;
pub mod manifest;
pub mod variant;

pub use action::{Action, ActionError, Attr};
pub use manifest::{Manifest, ManifestSource};
pub use variant::Variants;
