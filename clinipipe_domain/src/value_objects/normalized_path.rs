// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Normalized Paths
//!
//! A single normalization point for file paths crossing a trust boundary:
//! bookmark inserts, bookmark queries, and duplicate-detection sets all go
//! through [`normalize_path`]. Callers must never compare raw OS paths.
//!
//! Normalization replaces backslashes with forward slashes so that the same
//! file observed on Windows and Unix produces the same bookmark key.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Normalizes a path to the canonical forward-slash form.
pub fn normalize_path(path: impl AsRef<Path>) -> String {
    path.as_ref().to_string_lossy().replace('\\', "/")
}

/// A path already in canonical forward-slash form.
///
/// Constructed only through [`NormalizedPath::new`], so a value of this
/// type is proof that normalization happened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedPath(String);

impl NormalizedPath {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self(normalize_path(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_backslashes_replaced() {
        assert_eq!(normalize_path(r"C:\data\incoming\a.json"), "C:/data/incoming/a.json");
    }

    #[test]
    fn test_forward_slashes_untouched() {
        assert_eq!(normalize_path("/data/incoming/a.json"), "/data/incoming/a.json");
    }

    #[test]
    fn test_equality_across_separators() {
        assert_eq!(NormalizedPath::new(r"data\a.json"), NormalizedPath::new("data/a.json"));
    }

    proptest! {
        #[test]
        fn prop_normalized_path_never_contains_backslash(s in "\\PC*") {
            let normalized = normalize_path(&s);
            prop_assert!(!normalized.contains('\\'));
        }

        #[test]
        fn prop_normalization_is_idempotent(s in "\\PC*") {
            let once = normalize_path(&s);
            let twice = normalize_path(&once);
            prop_assert_eq!(once, twice);
        }
    }
}
