// SPDX-License-Identifier: Apache-2.0

use super::{ReportAsset, ReportFiles};
use runlens_model::{ArtifactId, ArtifactRef};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// A cache belongs to one credential and one artifact. Two users viewing the
/// same artifact never share entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: String,
    pub artifact_id: ArtifactId,
}

struct NamedCache {
    name: String,
    entry_point: String,
    assets: HashMap<String, ReportAsset>,
    holders: HashSet<String>,
}

/// Named in-memory caches (`report-{id}`) consulted by the interception route.
#[derive(Default)]
pub struct ReportCacheStore {
    caches: RwLock<HashMap<CacheKey, NamedCache>>,
}

impl ReportCacheStore {
    /// Installs a freshly decoded report and registers `holder` as a user of it.
    /// Replaces any earlier contents under the same key.
    pub async fn put(
        &self,
        key: CacheKey,
        artifact: &ArtifactRef,
        holder: &str,
        files: &ReportFiles,
    ) {
        let assets = files
            .iter()
            .map(|(path, asset)| (path.to_string(), asset.clone()))
            .collect();
        let mut caches = self.caches.write().await;
        let entry = caches.entry(key).or_insert_with(|| NamedCache {
            name: artifact.cache_name(),
            entry_point: files.entry_point().to_string(),
            assets: HashMap::new(),
            holders: HashSet::new(),
        });
        entry.assets = assets;
        entry.entry_point = files.entry_point().to_string();
        entry.holders.insert(holder.to_string());
    }

    /// Looks up one asset. An empty path resolves to the entry document.
    pub async fn match_asset(&self, key: &CacheKey, path: &str) -> Option<ReportAsset> {
        let caches = self.caches.read().await;
        let cache = caches.get(key)?;
        let path = path.trim_start_matches('/');
        let path = if path.is_empty() {
            cache.entry_point.as_str()
        } else {
            path
        };
        cache.assets.get(path).cloned()
    }

    /// Drops `holder`'s claim; the cache is deleted once nobody holds it.
    /// Returns `true` when the cache was deleted.
    pub async fn release(&self, key: &CacheKey, holder: &str) -> bool {
        let mut caches = self.caches.write().await;
        let Some(cache) = caches.get_mut(key) else {
            return false;
        };
        cache.holders.remove(holder);
        if cache.holders.is_empty() {
            caches.remove(key);
            true
        } else {
            false
        }
    }

    pub async fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .caches
            .read()
            .await
            .values()
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.caches.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::archive::test_support::zip_of;
    use crate::materialize::{decode_archive, ArchiveLimits};

    fn files() -> ReportFiles {
        decode_archive(
            &zip_of(&[("index.html", b"<html/>"), ("app.js", b"run()")]),
            &ArchiveLimits {
                strip_prefix: "playwright-report/".to_string(),
                entry_point: "index.html".to_string(),
                max_entries: 10,
                max_extracted_bytes: 1024,
            },
        )
        .expect("decode")
    }

    #[tokio::test]
    async fn cache_is_scoped_and_released_by_last_holder() {
        let store = ReportCacheStore::default();
        let artifact = ArtifactRef::new("11", "octo", "site").expect("ref");
        let key = CacheKey {
            fingerprint: "fp-a".to_string(),
            artifact_id: artifact.id,
        };
        store.put(key.clone(), &artifact, "viewer-1", &files()).await;
        store.put(key.clone(), &artifact, "viewer-2", &files()).await;
        assert_eq!(store.cache_names().await, vec!["report-11".to_string()]);

        let other_user = CacheKey {
            fingerprint: "fp-b".to_string(),
            artifact_id: artifact.id,
        };
        assert!(store.match_asset(&other_user, "app.js").await.is_none());
        assert_eq!(
            store
                .match_asset(&key, "")
                .await
                .map(|a| a.content_type),
            Some("text/html; charset=utf-8")
        );

        assert!(!store.release(&key, "viewer-1").await);
        assert!(store.match_asset(&key, "app.js").await.is_some());
        assert!(store.release(&key, "viewer-2").await);
        assert_eq!(store.len().await, 0);
    }
}
