//! Solidity version detection
//!
//! Two rule families are version-conditional: storage-pointer defaults were
//! removed in 0.5.0 and checked arithmetic arrived in 0.8.0. The version comes
//! from the `pragma solidity` line (lower bound of the constraint) unless the
//! caller overrides it.

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SolidityVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SolidityVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn is_at_least(&self, major: u32, minor: u32, patch: u32) -> bool {
        *self >= Self::new(major, minor, patch)
    }

    pub fn has_builtin_overflow_protection(&self) -> bool {
        self.is_at_least(0, 8, 0)
    }

    /// Before 0.5.0 a reference-type local without a data location was a
    /// storage pointer, and an uninitialized one pointed at slot 0.
    pub fn has_implicit_storage_pointers(&self) -> bool {
        !self.is_at_least(0, 5, 0)
    }
}

impl fmt::Display for SolidityVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl PartialOrd for SolidityVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SolidityVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

pub fn parse_solidity_version(source: &str) -> Option<SolidityVersion> {
    let pragma_start = source.find("pragma solidity")?;
    let pragma_section = &source[pragma_start..];

    let pragma_end = pragma_section.find(';')?;
    let pragma = &pragma_section[..pragma_end];

    parse_version(pragma.trim_start_matches("pragma solidity"))
}

/// Parses `0.8.19`, `^0.4.24`, `>=0.7.0 <0.9.0` and similar; a range yields its
/// first bound.
pub fn parse_version(constraint: &str) -> Option<SolidityVersion> {
    let cleaned = constraint
        .trim()
        .trim_start_matches(['^', '~', '>', '<', '='])
        .trim();

    let version_part = cleaned.split_whitespace().next()?;
    let mut parts = version_part.split('.');

    let major = parts.next()?.parse::<u32>().ok()?;
    let minor = parts.next().and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);
    let patch = parts.next().and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);

    Some(SolidityVersion::new(major, minor, patch))
}
