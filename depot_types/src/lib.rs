//! Core identifier types for the package catalog: package versions, FMRIs,
//! and their pattern-matching algebras.
//!
//! Version *ordering* and version *pattern matching* are deliberately
//! separate operations over the same component representation: the former is
//! a total order used to keep catalog entries sorted, the latter a partial
//! match used to filter FMRI lists.

pub mod fmri;
pub mod version;

pub use fmri::Fmri;
pub use version::{DotSequence, Version, VersionPattern};
