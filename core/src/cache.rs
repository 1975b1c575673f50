//! Per-document token cache, persisted between builds.
//!
//! Entries are keyed by document id and checked against a fingerprint of the
//! raw body, so an edited document is analyzed again instead of reusing stale
//! tokens. Workers only read the cache; new entries are merged in one step
//! after the parallel stage has finished.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hasher;
use std::path::Path;
use twox_hash::XxHash64;

use crate::{Document, Result, TokenSequence};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub doc_id: String,
    pub fingerprint: u64,
}

impl CacheKey {
    pub fn new(doc_id: impl Into<String>, body: &str) -> Self {
        Self { doc_id: doc_id.into(), fingerprint: fingerprint(body) }
    }

    pub fn for_document(doc: &Document) -> Self { Self::new(doc.id.clone(), &doc.body) }
}

pub fn fingerprint(body: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(body.as_bytes());
    hasher.finish()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CachedTokens {
    fingerprint: u64,
    tokens: TokenSequence,
}

#[derive(Debug, Default)]
pub struct AnalysisCache {
    entries: HashMap<String, CachedTokens>,
    dirty: bool,
}

impl AnalysisCache {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// True once any entry was added or replaced since load.
    pub fn is_dirty(&self) -> bool { self.dirty }

    pub fn get(&self, key: &CacheKey) -> Option<&TokenSequence> {
        self.entries.get(&key.doc_id).filter(|c| c.fingerprint == key.fingerprint).map(|c| &c.tokens)
    }

    pub fn get_or_compute<F>(&mut self, key: &CacheKey, compute: F) -> TokenSequence
    where
        F: FnOnce() -> TokenSequence,
    {
        if let Some(tokens) = self.get(key) {
            return tokens.clone();
        }
        let tokens = compute();
        self.insert(key.clone(), tokens.clone());
        tokens
    }

    /// Returns whether the entry changed the cache.
    pub fn insert(&mut self, key: CacheKey, tokens: TokenSequence) -> bool {
        let entry = CachedTokens { fingerprint: key.fingerprint, tokens };
        if self.entries.get(&key.doc_id) == Some(&entry) {
            return false;
        }
        self.entries.insert(key.doc_id, entry);
        self.dirty = true;
        true
    }

    /// Merge freshly computed entries; returns whether anything changed.
    pub fn merge<I>(&mut self, fresh: I) -> bool
    where
        I: IntoIterator<Item = (CacheKey, TokenSequence)>,
    {
        let mut changed = false;
        for (key, tokens) in fresh {
            changed |= self.insert(key, tokens);
        }
        changed
    }

    /// Drop entries of documents outside `live`; returns how many were removed.
    pub fn retain_ids(&mut self, live: &HashSet<&str>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|id, _| live.contains(id.as_str()));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Missing file → empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = std::fs::read(path)?;
        let entries = bincode::deserialize(&bytes)?;
        Ok(Self { entries, dirty: false })
    }

    /// Write the cache only when it changed; returns whether it was written.
    pub fn save_if_changed(&mut self, path: &Path) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let bytes = bincode::serialize(&self.entries)?;
        std::fs::write(path, bytes)?;
        self.dirty = false;
        tracing::info!(entries = self.entries.len(), path = %path.display(), "analysis cache written");
        Ok(true)
    }
}
