// SPDX-License-Identifier: Apache-2.0
//! Asset providers, the shared table cache, and backing-store readers.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::{AssetError, AssetTable};

/// Resolves an asset reference to a normalized table.
pub trait AssetProvider: Send + Sync {
    /// Load the table for `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::NotFound`] when the reference does not resolve,
    /// [`AssetError::Malformed`] when the document fails to deserialize.
    fn load(&self, reference: &str) -> Result<AssetTable, AssetError>;
}

/// Provider over a directory of JSON table documents.
///
/// `reference` is resolved as `<root>/<reference>.json`. References are
/// rejected if they try to escape the root.
#[derive(Debug, Clone)]
pub struct FsAssetProvider {
    root: PathBuf,
}

impl FsAssetProvider {
    /// Provider rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, AssetError> {
        if reference.is_empty()
            || Path::new(reference)
                .components()
                .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Err(AssetError::NotFound(reference.to_owned()));
        }
        Ok(self.root.join(format!("{reference}.json")))
    }
}

impl AssetProvider for FsAssetProvider {
    fn load(&self, reference: &str) -> Result<AssetTable, AssetError> {
        let path = self.resolve(reference)?;
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(AssetError::NotFound(reference.to_owned()));
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_str(&text).map_err(|source| AssetError::Malformed {
            reference: reference.to_owned(),
            source,
        })
    }
}

/// Process-wide cache of loaded tables, shared across sessions.
///
/// Tables are immutable once loaded; sessions hold `Arc`s and never copy.
#[derive(Default)]
pub struct AssetCache {
    tables: Mutex<HashMap<String, Arc<AssetTable>>>,
}

impl AssetCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch `reference` from the cache, loading through `provider` on miss.
    ///
    /// # Errors
    ///
    /// Propagates the provider error on miss; cached entries never fail.
    pub fn fetch(
        &self,
        provider: &dyn AssetProvider,
        reference: &str,
    ) -> Result<Arc<AssetTable>, AssetError> {
        if let Some(hit) = self.lock().get(reference).cloned() {
            return Ok(hit);
        }
        // Load outside the lock; a racing duplicate load is harmless.
        let table = Arc::new(provider.load(reference)?);
        self.lock().insert(reference.to_owned(), Arc::clone(&table));
        Ok(table)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AssetTable>>> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Random-access reads over named backing stores.
///
/// The scheduler re-reads each chunk's exact byte range on emit, so a reader
/// only needs positioned reads, no buffering of its own.
pub trait RangeReader {
    /// Read `len` bytes of `store` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::UnknownStore`] for unknown keys and
    /// [`AssetError::ShortRead`] when the store ends inside the range.
    fn read_range(&mut self, store: &str, offset: u64, len: u64) -> Result<Vec<u8>, AssetError>;
}

/// Reader over files below an asset root, with open handles kept per store.
#[derive(Debug)]
pub struct FsRangeReader {
    root: PathBuf,
    open: HashMap<String, File>,
}

impl FsRangeReader {
    /// Reader rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open: HashMap::new(),
        }
    }
}

impl RangeReader for FsRangeReader {
    fn read_range(&mut self, store: &str, offset: u64, len: u64) -> Result<Vec<u8>, AssetError> {
        if store.is_empty()
            || Path::new(store)
                .components()
                .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Err(AssetError::UnknownStore(store.to_owned()));
        }
        if !self.open.contains_key(store) {
            let file = match File::open(self.root.join(store)) {
                Ok(file) => file,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Err(AssetError::UnknownStore(store.to_owned()));
                }
                Err(err) => return Err(err.into()),
            };
            self.open.insert(store.to_owned(), file);
        }
        let file = self
            .open
            .get_mut(store)
            .ok_or_else(|| AssetError::UnknownStore(store.to_owned()))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; usize::try_from(len).unwrap_or(usize::MAX)];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(AssetError::ShortRead {
                    store: store.to_owned(),
                    offset,
                    want: len,
                    got: filled as u64,
                });
            }
            filled += n;
        }
        Ok(buf)
    }
}

/// In-memory reader over named byte slabs. Intended for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryRangeReader {
    stores: HashMap<String, Vec<u8>>,
}

impl MemoryRangeReader {
    /// Empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `bytes` under `store`.
    pub fn insert(&mut self, store: impl Into<String>, bytes: Vec<u8>) {
        self.stores.insert(store.into(), bytes);
    }
}

impl RangeReader for MemoryRangeReader {
    fn read_range(&mut self, store: &str, offset: u64, len: u64) -> Result<Vec<u8>, AssetError> {
        let slab = self
            .stores
            .get(store)
            .ok_or_else(|| AssetError::UnknownStore(store.to_owned()))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let want = usize::try_from(len).unwrap_or(usize::MAX);
        let end = start.saturating_add(want);
        if end > slab.len() {
            return Err(AssetError::ShortRead {
                store: store.to_owned(),
                offset,
                want: len,
                got: slab.len().saturating_sub(start) as u64,
            });
        }
        Ok(slab[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProvider(AssetTable);

    impl AssetProvider for StaticProvider {
        fn load(&self, reference: &str) -> Result<AssetTable, AssetError> {
            if reference == "scene" {
                Ok(self.0.clone())
            } else {
                Err(AssetError::NotFound(reference.to_owned()))
            }
        }
    }

    #[test]
    fn cache_returns_same_table_across_fetches() {
        let cache = AssetCache::new();
        let provider = StaticProvider(AssetTable::default());
        let a = cache.fetch(&provider, "scene").expect("first");
        let b = cache.fetch(&provider, "scene").expect("second");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn cache_propagates_not_found() {
        let cache = AssetCache::new();
        let provider = StaticProvider(AssetTable::default());
        assert!(matches!(
            cache.fetch(&provider, "missing"),
            Err(AssetError::NotFound(_))
        ));
    }

    #[test]
    fn memory_reader_serves_exact_ranges() {
        let mut reader = MemoryRangeReader::new();
        reader.insert("data.bin", (0u8..32).collect());
        assert_eq!(reader.read_range("data.bin", 4, 3).expect("range"), vec![4, 5, 6]);
        assert!(matches!(
            reader.read_range("data.bin", 30, 4),
            Err(AssetError::ShortRead { got: 2, .. })
        ));
        assert!(matches!(
            reader.read_range("other.bin", 0, 1),
            Err(AssetError::UnknownStore(_))
        ));
    }

    #[test]
    fn fs_provider_rejects_escaping_references() {
        let provider = FsAssetProvider::new("/tmp/assets");
        assert!(matches!(
            provider.load("../etc/passwd"),
            Err(AssetError::NotFound(_))
        ));
    }
}
