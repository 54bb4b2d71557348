//! Per-directory listing cache with implied-directory synthesis.
//!
//! Keys are normalized `{bucket}/{key}` directory paths without a
//! trailing slash; `""` is the root (bucket listing). Absence of an entry
//! means "unknown, must fetch"; a present entry with zero elements means
//! "known empty". Only full, unprefixed listings are ever inserted, so a
//! hit is always a complete view.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::path::parent;
use crate::record::ObjectRecord;

#[derive(Debug, Clone, Default)]
pub struct ListingCacheConfig {
    /// Expiry for entries; `None` keeps them for the session lifetime.
    pub ttl: Option<Duration>,
}

#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    /// Ordered by name, unique by name.
    entries: BTreeMap<String, ObjectRecord>,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => self.inserted_at.elapsed() >= ttl,
            None => false,
        }
    }
}

#[derive(Debug)]
pub struct ListingCache {
    entries: HashMap<String, CacheEntry>,
    config: ListingCacheConfig,
    stats: CacheStats,
}

impl ListingCache {
    pub fn new(config: ListingCacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            stats: CacheStats::default(),
        }
    }

    fn normalize(path: &str) -> &str {
        path.trim_end_matches('/')
    }

    /// Cached listing for a directory, if present and fresh.
    pub fn get(&mut self, path: &str) -> Option<Vec<ObjectRecord>> {
        let key = Self::normalize(path);
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(self.config.ttl) => {
                self.entries.remove(key);
                self.stats.misses += 1;
                None
            }
            Some(entry) => {
                self.stats.hits += 1;
                Some(entry.entries.values().cloned().collect())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        match self.entries.get(Self::normalize(path)) {
            Some(entry) => !entry.is_expired(self.config.ttl),
            None => false,
        }
    }

    /// Store a complete listing for a directory.
    pub fn insert(&mut self, path: &str, records: Vec<ObjectRecord>) {
        let entries = records
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();
        self.entries.insert(
            Self::normalize(path).to_string(),
            CacheEntry {
                entries,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop the entry for `path` and for every strict ancestor up to the
    /// root, since an ancestor's cached listing may now be stale.
    pub fn invalidate(&mut self, path: &str) {
        let mut current = Self::normalize(path).to_string();
        while !current.is_empty() {
            if self.entries.remove(&current).is_some() {
                self.stats.invalidations += 1;
            }
            current = parent(&current);
        }
    }

    pub fn invalidate_all(&mut self) {
        debug!("clearing listing cache");
        self.stats.invalidations += self.entries.len() as u64;
        self.entries.clear();
    }

    /// Register a flat set of objects from a recursive traversal.
    ///
    /// Walks each object's ancestor chain down to (but not above) `root`,
    /// synthesizing an implied directory at every level and recording each
    /// entry under its nearest ancestor. Returns the synthesized
    /// directories, ordered by name.
    pub fn update_from_walk(
        &mut self,
        root: &str,
        objects: &[ObjectRecord],
    ) -> Vec<ObjectRecord> {
        let root = Self::normalize(root);
        let mut dirs: BTreeMap<String, ObjectRecord> = BTreeMap::new();
        let mut listings: HashMap<String, BTreeMap<String, ObjectRecord>> = HashMap::new();

        for object in objects {
            let mut child = object.clone();
            let mut dir = parent(&object.name);
            loop {
                // Stop above the query root or at the bucket level.
                if !dir.contains('/') || dir.len() < root.len() {
                    break;
                }
                let implied = dirs
                    .entry(dir.clone())
                    .or_insert_with(|| ObjectRecord::implied_directory(&dir))
                    .clone();
                listings
                    .entry(dir.clone())
                    .or_default()
                    .entry(child.name.clone())
                    .or_insert(child);
                child = implied;
                dir = parent(&dir);
            }
        }

        let now = Instant::now();
        for (dir, entries) in listings {
            self.entries.insert(
                dir,
                CacheEntry {
                    entries,
                    inserted_at: now,
                },
            );
        }
        dirs.into_values().collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ListingCache {
    fn default() -> Self {
        Self::new(ListingCacheConfig::default())
    }
}
