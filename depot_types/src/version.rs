//! Package version model: dotted component sequences, the version total
//! order, and the wildcard pattern algebra used by `versions=` matching.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire form of a version timestamp, second granularity, always UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("illegal version '{0}'")]
    IllegalVersion(String),

    #[error("illegal version pattern '{0}'")]
    IllegalPattern(String),
}

type Result<T, E = VersionError> = std::result::Result<T, E>;

/// A dotted sequence of non-negative integers, e.g. `3.2.1`.
///
/// The derived order is positional; a sequence that is a strict prefix of
/// another sorts first (`1 < 1.1`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DotSequence(Vec<u32>);

impl DotSequence {
    pub fn components(&self) -> &[u32] {
        &self.0
    }
}

impl FromStr for DotSequence {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(VersionError::IllegalVersion(s.to_string()));
        }
        s.split('.')
            .map(|c| {
                c.parse::<u32>()
                    .map_err(|_| VersionError::IllegalVersion(s.to_string()))
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}

impl fmt::Display for DotSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for c in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{c}")?;
            first = false;
        }
        Ok(())
    }
}

/// A package version: `release[,build_release[-branch]][:timestamp]`.
///
/// The total order compares release, then branch, then timestamp (an absent
/// timestamp sorts lowest). `build_release` records the OS release a package
/// was built for and takes no part in ordering or equality; `Eq`, `Ord` and
/// `Hash` are all defined over the same `(release, branch, timestamp)`
/// triple.
#[derive(Debug, Clone)]
pub struct Version {
    release: DotSequence,
    build_release: Option<DotSequence>,
    branch: Option<DotSequence>,
    timestamp: Option<DateTime<Utc>>,
}

impl Version {
    pub fn release(&self) -> &DotSequence {
        &self.release
    }

    pub fn build_release(&self) -> Option<&DotSequence> {
        self.build_release.as_ref()
    }

    pub fn branch(&self) -> Option<&DotSequence> {
        self.branch.as_ref()
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        let illegal = || VersionError::IllegalVersion(s.to_string());

        let (body, ts) = match s.split_once(':') {
            Some((body, ts)) => (body, Some(ts)),
            None => (s, None),
        };
        let (head, branch) = match body.split_once('-') {
            Some((head, branch)) => (head, Some(branch)),
            None => (body, None),
        };
        let (release, build) = match head.split_once(',') {
            Some((release, build)) => (release, Some(build)),
            None => (head, None),
        };

        let timestamp = ts
            .map(|t| {
                NaiveDateTime::parse_from_str(t, TIMESTAMP_FORMAT)
                    .map(|n| n.and_utc())
                    .map_err(|_| illegal())
            })
            .transpose()?;

        Ok(Self {
            release: release.parse()?,
            build_release: build.map(str::parse).transpose()?,
            branch: branch.map(str::parse).transpose()?,
            timestamp,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.release)?;
        if let Some(build) = &self.build_release {
            write!(f, ",{build}")?;
        }
        if let Some(branch) = &self.branch {
            write!(f, "-{branch}")?;
        }
        if let Some(ts) = self.timestamp {
            write!(f, ":{}", ts.format(TIMESTAMP_FORMAT))?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release
            .cmp(&other.release)
            .then_with(|| self.branch.cmp(&other.branch))
            .then_with(|| self.timestamp.cmp(&other.timestamp))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.release.hash(state);
        self.branch.hash(state);
        self.timestamp.hash(state);
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternComponent {
    Exact(u32),
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SequencePattern(Vec<PatternComponent>);

impl SequencePattern {
    fn parse(s: &str, source: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(VersionError::IllegalPattern(source.to_string()));
        }
        s.split('.')
            .map(|c| match c {
                "*" => Ok(PatternComponent::Any),
                _ => c
                    .parse::<u32>()
                    .map(PatternComponent::Exact)
                    .map_err(|_| VersionError::IllegalPattern(source.to_string())),
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Positional match. A trailing `*` matches all remaining components,
    /// including none; otherwise the pattern must account for every
    /// component of the candidate.
    fn matches(&self, seq: Option<&DotSequence>) -> bool {
        let comps = seq.map(DotSequence::components).unwrap_or(&[]);
        let pats = &self.0;
        for (i, pat) in pats.iter().enumerate() {
            match pat {
                PatternComponent::Any => {
                    if i == pats.len() - 1 {
                        return true;
                    }
                    if i >= comps.len() {
                        return false;
                    }
                }
                PatternComponent::Exact(n) => {
                    if comps.get(i) != Some(n) {
                        return false;
                    }
                }
            }
        }
        pats.len() >= comps.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimestampPattern {
    Exact(DateTime<Utc>),
    Any,
}

/// A version pattern, e.g. `*`, `1.0`, `3.*`, `*,5.11`, `*,*-1.2.*` or
/// `*,*-*:*`.
///
/// Each axis (release, build release, branch, timestamp) that the pattern
/// omits is unconstrained; within an axis, components follow the positional
/// rules of [`SequencePattern::matches`]. `Display` reproduces the source
/// string, which also serves as the counthash key during matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPattern {
    source: String,
    release: SequencePattern,
    build_release: Option<SequencePattern>,
    branch: Option<SequencePattern>,
    timestamp: Option<TimestampPattern>,
}

impl VersionPattern {
    pub fn matches(&self, version: &Version) -> bool {
        if !self.release.matches(Some(version.release())) {
            return false;
        }
        if let Some(build) = &self.build_release {
            if !build.matches(version.build_release()) {
                return false;
            }
        }
        if let Some(branch) = &self.branch {
            if !branch.matches(version.branch()) {
                return false;
            }
        }
        match self.timestamp {
            None | Some(TimestampPattern::Any) => true,
            Some(TimestampPattern::Exact(ts)) => version.timestamp() == Some(ts),
        }
    }
}

impl FromStr for VersionPattern {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        let (body, ts) = match s.split_once(':') {
            Some((body, ts)) => (body, Some(ts)),
            None => (s, None),
        };
        let (head, branch) = match body.split_once('-') {
            Some((head, branch)) => (head, Some(branch)),
            None => (body, None),
        };
        let (release, build) = match head.split_once(',') {
            Some((release, build)) => (release, Some(build)),
            None => (head, None),
        };

        let timestamp = ts
            .map(|t| match t {
                "*" => Ok(TimestampPattern::Any),
                _ => NaiveDateTime::parse_from_str(t, TIMESTAMP_FORMAT)
                    .map(|n| TimestampPattern::Exact(n.and_utc()))
                    .map_err(|_| VersionError::IllegalPattern(s.to_string())),
            })
            .transpose()?;

        Ok(Self {
            source: s.to_string(),
            release: SequencePattern::parse(release, s)?,
            build_release: build.map(|b| SequencePattern::parse(b, s)).transpose()?,
            branch: branch.map(|b| SequencePattern::parse(b, s)).transpose()?,
            timestamp,
        })
    }
}

impl fmt::Display for VersionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
