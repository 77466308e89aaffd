use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::db::Repository;
use crate::error::Result;
use crate::stackexchange::StackExchangeClient;

/// Slug → internal id mapping with a process-lifetime cache. Sites are never
/// renamed or removed upstream, so cached ids never go stale.
pub struct SiteRegistry {
    cache: Mutex<HashMap<String, i64>>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a slug to its internal id, inserting a row on first reference.
    /// The cache mutex is held across the store call, so concurrent resolves
    /// of the same unseen slug are serialized.
    pub async fn resolve(&self, repo: &Repository, slug: &str) -> Result<i64> {
        let mut cache = self.cache.lock().await;
        if let Some(&id) = cache.get(slug) {
            return Ok(id);
        }

        let id = repo.upsert_site(slug).await?;
        cache.insert(slug.to_string(), id);
        Ok(id)
    }

    /// Pull the external site catalog and resolve every slug into the store.
    pub async fn sync_catalog(
        &self,
        repo: &Repository,
        client: &StackExchangeClient,
    ) -> Result<usize> {
        let slugs = client.fetch_sites().await?;
        for slug in &slugs {
            self.resolve(repo, slug).await?;
        }
        Ok(slugs.len())
    }

    pub async fn known_slugs(&self) -> Vec<String> {
        let cache = self.cache.lock().await;
        let mut slugs: Vec<String> = cache.keys().cloned().collect();
        slugs.sort();
        slugs
    }
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self::new()
    }
}
