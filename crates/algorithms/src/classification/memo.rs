//! Memoized clustering
//!
//! Affinity propagation is quadratic in the pixel count, and the same field
//! is often re-analysed with an unchanged stack. [`MemoizedClusterer`] keys
//! each outcome by a SHA-256 of the engine fingerprint and the exact pixel
//! matrix, and looks it up in a [`LabelCache`] before running the engine.

use lru::LruCache;
use ndarray::Array2;
use sha2::{Digest, Sha256};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use fieldprod_core::{Error, Result};

use super::cluster::{ClusterEngine, ClusterOutcome};

/// Cache key of a clustering run: hex SHA-256 over the engine fingerprint,
/// the matrix shape and every value as little-endian f64 bytes.
pub fn cache_key(fingerprint: &str, pixel_matrix: &Array2<f64>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    hasher.update((pixel_matrix.nrows() as u64).to_le_bytes());
    hasher.update((pixel_matrix.ncols() as u64).to_le_bytes());
    for v in pixel_matrix.iter() {
        hasher.update(v.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Storage for clustering outcomes.
pub trait LabelCache {
    fn get(&self, key: &str) -> Option<ClusterOutcome>;
    fn put(&self, key: &str, outcome: &ClusterOutcome) -> Result<()>;
}

/// Bounded in-process LRU cache.
pub struct InMemoryLabelCache {
    inner: Mutex<LruCache<String, ClusterOutcome>>,
}

impl InMemoryLabelCache {
    /// Create a cache holding at most `capacity` outcomes (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LabelCache for InMemoryLabelCache {
    fn get(&self, key: &str) -> Option<ClusterOutcome> {
        self.inner.lock().ok()?.get(key).cloned()
    }

    fn put(&self, key: &str, outcome: &ClusterOutcome) -> Result<()> {
        let mut cache = self
            .inner
            .lock()
            .map_err(|_| Error::Other("label cache lock poisoned".into()))?;
        cache.put(key.to_string(), outcome.clone());
        Ok(())
    }
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct DirectoryLabelCache {
    dir: PathBuf,
}

impl DirectoryLabelCache {
    /// Use `dir`, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl LabelCache for DirectoryLabelCache {
    fn get(&self, key: &str) -> Option<ClusterOutcome> {
        let text = fs::read_to_string(self.path_for(key)).ok()?;
        match serde_json::from_str(&text) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Ignoring unreadable cache entry {key}: {e}");
                None
            }
        }
    }

    fn put(&self, key: &str, outcome: &ClusterOutcome) -> Result<()> {
        let json = serde_json::to_string(outcome).map_err(|e| Error::Other(e.to_string()))?;
        // Write then rename so a concurrent reader never sees a partial file
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.path_for(key))?;
        Ok(())
    }
}

/// A [`ClusterEngine`] that consults a [`LabelCache`] first.
pub struct MemoizedClusterer<E, C> {
    engine: E,
    cache: C,
}

impl<E: ClusterEngine, C: LabelCache> MemoizedClusterer<E, C> {
    pub fn new(engine: E, cache: C) -> Self {
        Self { engine, cache }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }
}

impl<E: ClusterEngine, C: LabelCache> ClusterEngine for MemoizedClusterer<E, C> {
    fn cluster(&self, pixel_matrix: &Array2<f64>) -> Result<ClusterOutcome> {
        let key = cache_key(&self.engine.fingerprint(), pixel_matrix);
        if let Some(hit) = self.cache.get(&key) {
            debug!("Cluster cache hit {}", &key[..12]);
            return Ok(hit);
        }

        let outcome = self.engine.cluster(pixel_matrix)?;
        if let Err(e) = self.cache.put(&key, &outcome) {
            warn!("Could not store clustering result: {e}");
        }
        Ok(outcome)
    }

    fn fingerprint(&self) -> String {
        self.engine.fingerprint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::AffinityClusterer;
    use ndarray::array;
    use std::cell::Cell;

    /// Engine that counts how often it actually runs.
    struct CountingEngine {
        runs: Cell<usize>,
    }

    impl ClusterEngine for CountingEngine {
        fn cluster(&self, pixel_matrix: &Array2<f64>) -> Result<ClusterOutcome> {
            self.runs.set(self.runs.get() + 1);
            Ok(ClusterOutcome {
                labels: vec![0; pixel_matrix.nrows()],
                threshold: 0.5,
                exemplar_count: 1,
                exemplars: vec![0],
                cluster_means: vec![0.5],
                iterations: 3,
                converged: true,
            })
        }

        fn fingerprint(&self) -> String {
            "counting".into()
        }
    }

    #[test]
    fn test_cache_key_sensitivity() {
        let a = array![[0.1, 0.2], [0.3, 0.4]];
        let b = array![[0.1, 0.2, 0.3, 0.4]];
        assert_eq!(cache_key("x", &a), cache_key("x", &a.clone()));
        assert_ne!(cache_key("x", &a), cache_key("x", &b), "shape is part of the key");
        assert_ne!(cache_key("x", &a), cache_key("y", &a));
        assert_eq!(cache_key("x", &a).len(), 64);
    }

    #[test]
    fn test_memoized_runs_engine_once() {
        let engine = CountingEngine { runs: Cell::new(0) };
        let memo = MemoizedClusterer::new(&engine, InMemoryLabelCache::new(4));
        let x = array![[0.1, 0.2], [0.3, 0.4]];

        let first = memo.cluster(&x).unwrap();
        let second = memo.cluster(&x).unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.runs.get(), 1);

        memo.cluster(&array![[0.9, 0.9]]).unwrap();
        assert_eq!(engine.runs.get(), 2);
        assert_eq!(memo.cache().len(), 2);
    }

    #[test]
    fn test_lru_eviction() {
        let engine = CountingEngine { runs: Cell::new(0) };
        let memo = MemoizedClusterer::new(&engine, InMemoryLabelCache::new(1));
        let a = array![[0.1]];
        let b = array![[0.2]];

        memo.cluster(&a).unwrap();
        memo.cluster(&b).unwrap();
        memo.cluster(&a).unwrap();
        assert_eq!(engine.runs.get(), 3);
    }

    #[test]
    fn test_directory_cache_persists() {
        let dir = tempfile::tempdir().unwrap();
        let x = array![[0.2, 0.3], [0.6, 0.7], [0.21, 0.3]];

        let outcome = {
            let memo = MemoizedClusterer::new(
                AffinityClusterer::default(),
                DirectoryLabelCache::new(dir.path().join("labels")).unwrap(),
            );
            memo.cluster(&x).unwrap()
        };

        // A new cache over the same directory answers without the engine
        let key = cache_key(&AffinityClusterer::default().fingerprint(), &x);
        let cache = DirectoryLabelCache::new(dir.path().join("labels")).unwrap();
        let stored = cache.get(&key).unwrap();
        assert_eq!(stored.labels, outcome.labels);
        assert_eq!(stored.exemplar_count, outcome.exemplar_count);
        assert!((stored.threshold - outcome.threshold).abs() < 1e-12);
        assert!(cache.get("missing").is_none());
    }
}
