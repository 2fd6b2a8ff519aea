// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Human-readable runtime buffer sizes.
//!
//! A [`MemoryBudget`] is the byte size of one runtime arena. Configuration
//! files and callers spell it the way embedded toolchains do (`"16M"`,
//! `"512K"`), so parsing accepts the common suffixes.

use crate::MemoryError;
use std::fmt;

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// A runtime arena size in bytes.
///
/// # Parsing
/// - `"16M"` or `"16MB"` → 16 × 1024² bytes
/// - `"1G"` or `"1GB"` → 1 × 1024³ bytes
/// - `"512K"` or `"512KB"` → 512 × 1024 bytes
/// - `"65536"` or `"65536B"` → raw byte count
///
/// # Examples
/// ```
/// use memory_manager::MemoryBudget;
///
/// let b = MemoryBudget::parse("16M").unwrap();
/// assert_eq!(b.as_bytes(), 16 * 1024 * 1024);
/// assert_eq!(b.to_string(), "16 MB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    /// Creates a budget from a byte count.
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    /// Creates a budget from kilobytes.
    pub fn from_kb(kb: usize) -> Self {
        Self { bytes: kb * KB }
    }

    /// Creates a budget from megabytes.
    pub fn from_mb(mb: usize) -> Self {
        Self { bytes: mb * MB }
    }

    /// Returns the budget in bytes.
    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Returns the budget in megabytes (truncated).
    pub fn as_mb(&self) -> usize {
        self.bytes / MB
    }

    /// Parses a human-readable size string. Case-insensitive; surrounding
    /// whitespace is ignored. Zero is rejected.
    pub fn parse(s: &str) -> Result<Self, MemoryError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MemoryError::InvalidSize {
                input: s.to_string(),
                reason: "empty string".into(),
            });
        }

        let upper = s.to_uppercase();
        let (digits, multiplier) = [("GB", GB), ("G", GB), ("MB", MB), ("M", MB), ("KB", KB), ("K", KB), ("B", 1)]
            .iter()
            .find(|(suffix, _)| upper.ends_with(suffix))
            .map(|(suffix, mult)| (&s[..s.len() - suffix.len()], *mult))
            .unwrap_or((s, 1));

        let value: usize = digits.trim().parse().map_err(|_| MemoryError::InvalidSize {
            input: s.to_string(),
            reason: "expected a number followed by an optional K, M or G suffix".into(),
        })?;

        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| MemoryError::InvalidSize {
                input: s.to_string(),
                reason: "size overflows usize".into(),
            })?;

        if bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }

        Ok(Self { bytes })
    }
}

impl std::str::FromStr for MemoryBudget {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bytes >= GB && self.bytes % GB == 0 {
            write!(f, "{} GB", self.bytes / GB)
        } else if self.bytes >= MB && self.bytes % MB == 0 {
            write!(f, "{} MB", self.bytes / MB)
        } else if self.bytes >= KB && self.bytes % KB == 0 {
            write!(f, "{} KB", self.bytes / KB)
        } else {
            write!(f, "{} B", self.bytes)
        }
    }
}
