//! Reference-hash table for known card printings.
//!
//! Keyed by `(set, collector number)`. Built once at startup and shared
//! read-only; the agent compares an upload's hash against every reference
//! hash under the same key and keeps the best similarity.

use std::collections::HashMap;

use super::phash::PerceptualHash;

/// Normalized lookup key.
fn key(set: &str, number: &str) -> (String, String) {
    (
        set.trim().to_ascii_lowercase(),
        number.trim().to_ascii_lowercase(),
    )
}

/// Read-only map from `(set, number)` to known-good hashes.
#[derive(Debug, Clone, Default)]
pub struct ReferenceHashTable {
    entries: HashMap<(String, String), Vec<PerceptualHash>>,
}

impl ReferenceHashTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(set, number, hash)` triples.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String, PerceptualHash)>,
    {
        let mut table = Self::new();
        for (set, number, hash) in entries {
            table.insert(&set, &number, hash);
        }
        table
    }

    /// Add a reference hash during table construction.
    pub fn insert(&mut self, set: &str, number: &str, hash: PerceptualHash) {
        self.entries.entry(key(set, number)).or_default().push(hash);
    }

    /// Reference hashes for a printing, if any are known.
    pub fn lookup(&self, set: &str, number: &str) -> Option<&[PerceptualHash]> {
        self.entries.get(&key(set, number)).map(Vec::as_slice)
    }

    /// Best similarity of `hash` against the references for a printing.
    pub fn best_similarity(&self, set: &str, number: &str, hash: &PerceptualHash) -> Option<f64> {
        self.lookup(set, number).map(|references| {
            references
                .iter()
                .map(|reference| hash.similarity(reference))
                .fold(0.0f64, f64::max)
        })
    }

    /// Number of printings with at least one reference hash.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no references.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
