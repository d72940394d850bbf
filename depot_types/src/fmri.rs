//! Package FMRIs: structured `publisher / stem @ version` identifiers and
//! the successor-matching rule used by `patterns=` filtering.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version::{Version, VersionError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FmriError {
    #[error("illegal FMRI '{0}'")]
    IllegalFmri(String),

    #[error("illegal FMRI '{fmri}': {source}")]
    IllegalVersion {
        fmri: String,
        source: VersionError,
    },
}

type Result<T, E = FmriError> = std::result::Result<T, E>;

/// A package FMRI: `pkg://publisher/stem@version`, with publisher and
/// version both optional (pattern FMRIs may omit either).
///
/// FMRIs order by `(stem, version)` with the publisher as a final
/// deterministic tiebreak; equality covers the same fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fmri {
    publisher: Option<String>,
    stem: String,
    version: Option<Version>,
}

impl Fmri {
    pub fn new(
        publisher: Option<String>,
        stem: impl Into<String>,
        version: Option<Version>,
    ) -> Self {
        Self {
            publisher,
            stem: stem.into(),
            version,
        }
    }

    /// The package stem, e.g. `web/browser`.
    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn publisher(&self) -> Option<&str> {
        self.publisher.as_deref()
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn set_publisher(&mut self, publisher: impl Into<String>) {
        self.publisher = Some(publisher.into());
    }

    /// True when both FMRIs name the same package, at any version.
    pub fn is_same_package(&self, other: &Fmri) -> bool {
        self.stem == other.stem
    }

    /// True when this FMRI satisfies `pattern`: the stem matches (exact, or
    /// `*` glob in the pattern), the publisher matches if the pattern names
    /// one, and this version is the pattern's version or a successor of it
    /// under the version order. A pattern timestamp therefore excludes
    /// entries older than it.
    pub fn is_successor(&self, pattern: &Fmri) -> bool {
        if !glob_match(&pattern.stem, &self.stem) {
            return false;
        }
        if pattern.publisher.is_some() && self.publisher != pattern.publisher {
            return false;
        }
        match (&self.version, &pattern.version) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(v), Some(p)) => v >= p,
        }
    }

    /// Render without a publisher, the "anarchic" form: `pkg:/stem@version`.
    pub fn display_anarchic(&self) -> String {
        match &self.version {
            Some(v) => format!("pkg:/{}@{v}", self.stem),
            None => format!("pkg:/{}", self.stem),
        }
    }
}

impl FromStr for Fmri {
    type Err = FmriError;

    fn from_str(s: &str) -> Result<Self> {
        let illegal = || FmriError::IllegalFmri(s.to_string());

        let (publisher, rest) = if let Some(rest) = s.strip_prefix("pkg://") {
            let (publisher, rest) = rest.split_once('/').ok_or_else(illegal)?;
            if publisher.is_empty() {
                return Err(illegal());
            }
            (Some(publisher.to_string()), rest)
        } else if let Some(rest) = s.strip_prefix("pkg:/") {
            (None, rest)
        } else {
            (None, s)
        };

        let (stem, version) = match rest.split_once('@') {
            Some((stem, version)) => {
                let version = version
                    .parse()
                    .map_err(|source| FmriError::IllegalVersion {
                        fmri: s.to_string(),
                        source,
                    })?;
                (stem, Some(version))
            }
            None => (rest, None),
        };
        if stem.is_empty() {
            return Err(illegal());
        }

        Ok(Self {
            publisher,
            stem: stem.to_string(),
            version,
        })
    }
}

impl fmt::Display for Fmri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.publisher {
            Some(publisher) => write!(f, "pkg://{publisher}/{}", self.stem)?,
            None => write!(f, "pkg:/{}", self.stem)?,
        }
        if let Some(v) = &self.version {
            write!(f, "@{v}")?;
        }
        Ok(())
    }
}

impl Ord for Fmri {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stem
            .cmp(&other.stem)
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| self.publisher.cmp(&other.publisher))
    }
}

impl PartialOrd for Fmri {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Fmri {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fmri {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Anchored `*` glob match; no other metacharacters.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == candidate,
        Some((prefix, rest_pattern)) => {
            let Some(mut rest) = candidate.strip_prefix(prefix) else {
                return false;
            };
            let segments: Vec<&str> = rest_pattern.split('*').collect();
            let last = segments.len() - 1;
            for (i, seg) in segments.iter().enumerate() {
                if seg.is_empty() {
                    continue;
                }
                if i == last {
                    return rest.ends_with(seg);
                }
                match rest.find(seg) {
                    Some(pos) => rest = &rest[pos + seg.len()..],
                    None => return false,
                }
            }
            true
        }
    }
}
