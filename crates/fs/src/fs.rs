//! The filesystem session: paths in, records and bytes out.
//!
//! Buckets are top-level directories; everything below them is
//! synthesized from object keys. Listings are cached per directory and
//! invalidated on any mutation under them. Paths may pin an object
//! generation with a `#<gen>` fragment or `?generation=` query.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::Mutex;
use tracing::debug;
use transport::{HttpTransport, TokenProvider, Transport, TransportConfig};

use crate::cache::{CacheStats, ListingCache, ListingCacheConfig};
use crate::checker::ConsistencyChecker;
use crate::client::{GcsClient, ListQuery};
use crate::config::GcsConfig;
use crate::delete::bulk_delete;
use crate::error::GcsError;
use crate::path::{norm_path, parent, split_path};
use crate::read::ReadHandle;
use crate::record::{parse_timestamp, FixedKeyMetadata, ObjectRecord};
use crate::write::{WriteHandle, WriteOptions};

pub struct GcsFs {
    client: GcsClient,
    cache: Arc<Mutex<ListingCache>>,
}

impl GcsFs {
    /// Session over the real API without credentials.
    pub fn new(config: GcsConfig) -> Self {
        Self::with_transport(Arc::new(HttpTransport::anonymous()), config)
    }

    /// Session over the real API with a token source.
    pub fn with_tokens(tokens: Arc<dyn TokenProvider>, config: GcsConfig) -> Self {
        let transport = HttpTransport::new(tokens, TransportConfig::default());
        Self::with_transport(Arc::new(transport), config)
    }

    /// Session over an arbitrary transport. This is the seam tests use.
    pub fn with_transport(transport: Arc<dyn Transport>, config: GcsConfig) -> Self {
        let cache = ListingCache::new(ListingCacheConfig {
            ttl: config.cache_ttl,
        });
        Self {
            client: GcsClient::new(transport, Arc::new(config)),
            cache: Arc::new(Mutex::new(cache)),
        }
    }

    pub fn config(&self) -> &GcsConfig {
        self.client.config()
    }

    fn split(&self, path: &str) -> Result<(String, String, Option<String>), GcsError> {
        let (bucket, key, generation) = split_path(path, true);
        if bucket.is_empty() {
            return Err(GcsError::InvalidPath(path.to_string()));
        }
        Ok((bucket, key, generation))
    }

    fn object_path(&self, path: &str) -> Result<(String, String, Option<String>), GcsError> {
        let (bucket, key, generation) = self.split(path)?;
        if key.is_empty() {
            return Err(GcsError::InvalidPath(format!("{path}: not an object path")));
        }
        Ok((bucket, key, generation))
    }

    /// List one directory level. Serves from cache when a fresh complete
    /// listing is held; a path naming a plain object lists as itself.
    pub async fn ls(&self, path: &str) -> Result<Vec<ObjectRecord>, GcsError> {
        let norm = norm_path(path);
        if norm.is_empty() {
            return self.ls_buckets().await;
        }
        if let Some(cached) = self.cache.lock().await.get(&norm) {
            return Ok(cached);
        }

        let (bucket, key, _) = split_path(&norm, false);
        let query = ListQuery {
            prefix: (!key.is_empty()).then(|| format!("{key}/")),
            delimiter: Some("/".into()),
            ..Default::default()
        };
        let listing = self.client.list_all(&bucket, &query).await?;

        let mut records: Vec<ObjectRecord> = listing
            .items
            .iter()
            // Zero-byte `key/` placeholders duplicate the prefix entries.
            .filter(|item| !item.name.ends_with('/'))
            .map(|item| ObjectRecord::from_resource(&bucket, item))
            .collect();
        for prefix in &listing.prefixes {
            let name = format!("{bucket}/{}", prefix.trim_end_matches('/'));
            records.push(ObjectRecord::implied_directory(&name));
        }

        if records.is_empty() {
            // Not a non-empty directory; maybe an object, maybe nothing.
            return match self.info(&norm).await? {
                record if record.is_directory() => Ok(Vec::new()),
                record => Ok(vec![record]),
            };
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        records.dedup_by(|a, b| a.name == b.name);
        self.cache.lock().await.insert(&norm, records.clone());
        Ok(records)
    }

    async fn ls_buckets(&self) -> Result<Vec<ObjectRecord>, GcsError> {
        if let Some(cached) = self.cache.lock().await.get("") {
            return Ok(cached);
        }
        let mut records: Vec<ObjectRecord> = self
            .client
            .list_buckets()
            .await?
            .iter()
            .map(|bucket| {
                let mut record = ObjectRecord::bucket_directory(&bucket.name);
                record.ctime = bucket.time_created.as_deref().and_then(parse_timestamp);
                record.mtime = bucket.updated.as_deref().and_then(parse_timestamp);
                record
            })
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        self.cache.lock().await.insert("", records.clone());
        Ok(records)
    }

    /// Metadata for one path: a bucket, an object (optionally
    /// generation-pinned), or an implied directory.
    pub async fn info(&self, path: &str) -> Result<ObjectRecord, GcsError> {
        let (bucket, key, generation) = self.split(path)?;
        if key.is_empty() {
            return Ok(ObjectRecord::bucket_directory(&bucket));
        }
        let name = format!("{bucket}/{key}");

        // A fresh complete listing of the parent is authoritative, except
        // for generation-pinned lookups, which always hit the server.
        if generation.is_none() {
            let mut cache = self.cache.lock().await;
            if let Some(entries) = cache.get(&parent(&name)) {
                return entries
                    .into_iter()
                    .find(|record| record.name == name)
                    .ok_or(GcsError::NotFound(name));
            }
            // The path itself may already be known as a directory, e.g.
            // from a prior recursive walk.
            if cache.contains(&name) {
                return Ok(ObjectRecord::implied_directory(&name));
            }
        }

        match self
            .client
            .get_object_resource(&bucket, &key, generation.as_deref())
            .await
        {
            Ok(resource) => Ok(ObjectRecord::from_resource(&bucket, &resource)),
            Err(GcsError::NotFound(_)) => self.directory_probe(&bucket, &key, &name).await,
            Err(GcsError::PermissionDenied(_)) => {
                // Metadata access denied but listing may be allowed. The
                // call back into `ls` is boxed to break the async cycle
                // between `ls` and `info`.
                debug!(%name, "metadata denied, falling back to parent listing");
                let entries = Box::pin(self.ls(&parent(&name))).await?;
                entries
                    .into_iter()
                    .find(|record| record.name == name)
                    .ok_or(GcsError::PermissionDenied(name))
            }
            Err(e) => Err(e),
        }
    }

    /// One-result listing probe: does anything live under `key/`?
    async fn directory_probe(
        &self,
        bucket: &str,
        key: &str,
        name: &str,
    ) -> Result<ObjectRecord, GcsError> {
        let query = ListQuery {
            prefix: Some(format!("{key}/")),
            delimiter: Some("/".into()),
            max_results: Some(1),
            ..Default::default()
        };
        let page = self.client.list_page(bucket, &query).await?;
        if page.items.is_empty() && page.prefixes.is_empty() {
            Err(GcsError::NotFound(name.to_string()))
        } else {
            Ok(ObjectRecord::implied_directory(name))
        }
    }

    pub async fn exists(&self, path: &str) -> Result<bool, GcsError> {
        match self.info(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn is_dir(&self, path: &str) -> Result<bool, GcsError> {
        match self.info(path).await {
            Ok(record) => Ok(record.is_directory()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Recursive listing of every object under `path`. Directory
    /// structure discovered along the way lands in the listing cache;
    /// `include_dirs` also returns the synthesized directories inline.
    pub async fn find(
        &self,
        path: &str,
        include_dirs: bool,
    ) -> Result<Vec<ObjectRecord>, GcsError> {
        let norm = norm_path(path);
        let (bucket, key, _) = self.split(&norm)?;
        let query = ListQuery {
            prefix: (!key.is_empty()).then(|| format!("{key}/")),
            ..Default::default()
        };
        let listing = self.client.list_all(&bucket, &query).await?;
        let mut files: Vec<ObjectRecord> = listing
            .items
            .iter()
            .filter(|item| !item.name.ends_with('/'))
            .map(|item| ObjectRecord::from_resource(&bucket, item))
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let dirs = self.cache.lock().await.update_from_walk(&norm, &files);

        if files.is_empty() && !key.is_empty() {
            // The path itself may name a single object.
            match self.info(&norm).await {
                Ok(record) if !record.is_directory() => return Ok(vec![record]),
                Ok(_) | Err(GcsError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if include_dirs {
            files.extend(dirs);
            files.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Ok(files)
    }

    /// Recursive listing fanned out across key-range partitions.
    ///
    /// `bounds` are sorted key names from a prior snapshot; they split
    /// the keyspace into `bounds.len() + 1` windows which are listed
    /// concurrently and merged in name order. Useful when one flat
    /// listing of a huge prefix is too slow.
    pub async fn find_partitioned(
        &self,
        path: &str,
        bounds: &[&str],
    ) -> Result<Vec<ObjectRecord>, GcsError> {
        let norm = norm_path(path);
        let mut windows = Vec::with_capacity(bounds.len() + 1);
        let mut lower: Option<&str> = None;
        for &bound in bounds {
            windows.push((lower.take(), Some(bound)));
            lower = Some(bound);
        }
        windows.push((lower, None));

        let partitions: Vec<Vec<ObjectRecord>> = stream::iter(
            windows
                .iter()
                .map(|(start, end)| self.list_range(&norm, *start, *end)),
        )
        .buffered(self.client.config().bulk_concurrency.max(1))
        .try_collect()
        .await?;

        let mut records: Vec<ObjectRecord> = partitions.into_iter().flatten().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Uncached recursive listing restricted to a lexicographic key
    /// window: keys at or after `start`, strictly before `end`.
    pub async fn list_range(
        &self,
        path: &str,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Vec<ObjectRecord>, GcsError> {
        let norm = norm_path(path);
        let (bucket, key, _) = self.split(&norm)?;
        let query = ListQuery {
            prefix: (!key.is_empty()).then(|| format!("{key}/")),
            start_offset: start.map(str::to_string),
            end_offset: end.map(str::to_string),
            ..Default::default()
        };
        let listing = self.client.list_all(&bucket, &query).await?;
        let mut records: Vec<ObjectRecord> = listing
            .items
            .iter()
            .filter(|item| !item.name.ends_with('/'))
            .map(|item| ObjectRecord::from_resource(&bucket, item))
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Whole-object read with integrity checking against the response
    /// headers. Transcoded objects skip the check, since server digests
    /// describe the encoded bytes.
    pub async fn cat(&self, path: &str) -> Result<Bytes, GcsError> {
        let record = self.info(path).await?;
        if record.is_directory() {
            return Err(GcsError::InvalidPath(format!(
                "{}: is a directory",
                record.name
            )));
        }
        let response = self
            .client
            .download(
                &record.bucket,
                &record.key,
                record.generation.as_deref(),
                None,
            )
            .await?;
        if !record.is_transcoded() {
            let mut checker = ConsistencyChecker::new(self.config().consistency);
            checker.update(&response.body);
            checker.validate_headers(&response.headers)?;
        }
        Ok(response.body)
    }

    /// Open a path for random-access reads, pinned to the generation
    /// observed now.
    pub async fn open_read(&self, path: &str) -> Result<ReadHandle, GcsError> {
        let record = self.info(path).await?;
        if record.is_directory() {
            return Err(GcsError::InvalidPath(format!(
                "{}: is a directory",
                record.name
            )));
        }
        Ok(ReadHandle::new(self.client.clone(), record))
    }

    /// Open a path for writing. Generation pins are rejected: a write
    /// always creates a new generation.
    pub fn open_write(
        &self,
        path: &str,
        options: WriteOptions,
    ) -> Result<WriteHandle, GcsError> {
        let (bucket, key, generation) = self.object_path(path)?;
        if generation.is_some() {
            return Err(GcsError::InvalidPath(format!(
                "{path}: cannot write to a pinned generation"
            )));
        }
        Ok(WriteHandle::new(
            self.client.clone(),
            self.cache.clone(),
            bucket,
            key,
            options,
        ))
    }

    /// Write a complete object in one call.
    pub async fn pipe(
        &self,
        path: &str,
        data: &[u8],
        options: WriteOptions,
    ) -> Result<ObjectRecord, GcsError> {
        let mut handle = self.open_write(path, options)?;
        handle.write(data).await?;
        let resource = handle.close().await?;
        let (bucket, _, _) = self.object_path(path)?;
        Ok(ObjectRecord::from_resource(&bucket, &resource))
    }

    /// Delete one object, honoring a generation pin.
    pub async fn rm_file(&self, path: &str) -> Result<(), GcsError> {
        let (bucket, key, generation) = self.object_path(path)?;
        self.client
            .delete_object(&bucket, &key, generation.as_deref())
            .await?;
        self.cache
            .lock()
            .await
            .invalidate(&format!("{bucket}/{key}"));
        Ok(())
    }

    /// Batch-delete many paths. Paths already gone are tolerated unless
    /// nothing at all was deleted. Returns the number deleted.
    pub async fn rm(&self, paths: &[&str]) -> Result<usize, GcsError> {
        let mut targets = Vec::with_capacity(paths.len());
        for path in paths {
            let (bucket, key, generation) = self.object_path(path)?;
            targets.push((bucket, key, generation));
        }
        let result = bulk_delete(&self.client, &targets).await;
        // Partial success is common: even a failed batch may have deleted
        // some objects, so every attempted path's listing goes stale.
        let mut cache = self.cache.lock().await;
        for (bucket, key, _) in &targets {
            cache.invalidate(&format!("{bucket}/{key}"));
        }
        drop(cache);
        Ok(result?.deleted.len())
    }

    /// Delete everything under a path.
    pub async fn rm_recursive(&self, path: &str) -> Result<usize, GcsError> {
        let files = self.find(path, false).await?;
        let targets: Vec<_> = files
            .iter()
            .map(|record| (record.bucket.clone(), record.key.clone(), None))
            .collect();
        let result = bulk_delete(&self.client, &targets).await;
        let mut cache = self.cache.lock().await;
        for (bucket, key, _) in &targets {
            cache.invalidate(&format!("{bucket}/{key}"));
        }
        cache.invalidate(&norm_path(path));
        drop(cache);
        Ok(result?.deleted.len())
    }

    /// Server-side copy.
    pub async fn cp(&self, src: &str, dst: &str) -> Result<ObjectRecord, GcsError> {
        let (src_bucket, src_key, _) = self.object_path(src)?;
        let (dst_bucket, dst_key, dst_generation) = self.object_path(dst)?;
        if dst_generation.is_some() {
            return Err(GcsError::InvalidPath(format!(
                "{dst}: cannot write to a pinned generation"
            )));
        }
        let resource = self
            .client
            .rewrite_object(&src_bucket, &src_key, &dst_bucket, &dst_key)
            .await?;
        self.cache
            .lock()
            .await
            .invalidate(&format!("{dst_bucket}/{dst_key}"));
        Ok(ObjectRecord::from_resource(&dst_bucket, &resource))
    }

    /// Copy then delete the source.
    pub async fn mv(&self, src: &str, dst: &str) -> Result<ObjectRecord, GcsError> {
        let record = self.cp(src, dst).await?;
        self.rm_file(src).await?;
        Ok(record)
    }

    /// Replace user metadata and/or fixed-key attributes in one patch.
    pub async fn setxattrs(
        &self,
        path: &str,
        metadata: Option<HashMap<String, String>>,
        fixed_key: FixedKeyMetadata,
    ) -> Result<ObjectRecord, GcsError> {
        let (bucket, key, _) = self.object_path(path)?;
        let mut payload = serde_json::Map::new();
        if let Some(metadata) = metadata {
            payload.insert("metadata".into(), serde_json::to_value(metadata)?);
        }
        fixed_key.apply_to(&mut payload);
        let resource = self
            .client
            .patch_object(&bucket, &key, &serde_json::Value::Object(payload))
            .await?;
        self.cache
            .lock()
            .await
            .invalidate(&format!("{bucket}/{key}"));
        Ok(ObjectRecord::from_resource(&bucket, &resource))
    }

    /// One user metadata value, if set.
    pub async fn getxattr(&self, path: &str, attr: &str) -> Result<Option<String>, GcsError> {
        let record = self.info(path).await?;
        Ok(record.metadata.get(attr).cloned())
    }

    /// Drop cached listings for a subtree, or everything.
    pub async fn invalidate_cache(&self, path: Option<&str>) {
        let mut cache = self.cache.lock().await;
        match path {
            Some(path) => cache.invalidate(&norm_path(path)),
            None => cache.invalidate_all(),
        }
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }

    /// Release transport resources. The session stays usable; the next
    /// request reconnects.
    pub async fn shutdown(&self) {
        self.client.transport().shutdown().await;
    }
}

impl std::fmt::Debug for GcsFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsFs")
            .field("config", self.client.config())
            .finish_non_exhaustive()
    }
}
