//! Configured collections and the registry that routes reads to them.

use std::{collections::HashMap, sync::Arc};

use tracing::info;

use crate::{
    cache::{RefreshPolicy, RefreshingCache},
    config::CollectionSettings,
    domain::{KeyPrefix, Record},
};

use super::{
    query::QueryFilter,
    reader::{CollectionReader, DirectReader, ReadError},
    store::StoreHandle,
};

enum Source {
    Direct(DirectReader),
    Cached(RefreshingCache),
}

impl Source {
    fn reader(&self) -> &dyn CollectionReader {
        match self {
            Source::Direct(reader) => reader,
            Source::Cached(cache) => cache,
        }
    }
}

/// One URL path served from one key prefix.
pub struct Collection {
    uri: String,
    prefix: KeyPrefix,
    source: Source,
}

impl Collection {
    pub fn direct(uri: impl Into<String>, prefix: KeyPrefix, store: StoreHandle) -> Self {
        Self {
            uri: uri.into(),
            source: Source::Direct(DirectReader::new(prefix.clone(), store)),
            prefix,
        }
    }

    /// Serve from a [`RefreshingCache`]; spawns its refresh loop on the current runtime.
    pub fn cached(
        uri: impl Into<String>,
        prefix: KeyPrefix,
        store: StoreHandle,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            uri: uri.into(),
            source: Source::Cached(RefreshingCache::spawn(prefix.clone(), store, policy)),
            prefix,
        }
    }

    pub fn from_settings(settings: &CollectionSettings, store: StoreHandle) -> Self {
        let prefix = KeyPrefix::new(settings.key_prefix.as_str());
        match settings.cache.as_ref() {
            Some(cache) => Self::cached(
                settings.uri.as_str(),
                prefix,
                store,
                RefreshPolicy::from(cache),
            ),
            None => Self::direct(settings.uri.as_str(), prefix, store),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn prefix(&self) -> &KeyPrefix {
        &self.prefix
    }

    pub fn cache(&self) -> Option<&RefreshingCache> {
        match &self.source {
            Source::Cached(cache) => Some(cache),
            Source::Direct(_) => None,
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cache().is_some()
    }

    /// Every record in the collection that passes `filter`.
    pub async fn list(&self, filter: &QueryFilter) -> Result<Vec<Record>, ReadError> {
        let records = self.source.reader().get_all().await?;
        Ok(filter.apply(records))
    }

    pub async fn get(&self, id: &str) -> Result<Option<Record>, ReadError> {
        self.source.reader().get_by_id(id).await
    }

    pub fn shutdown(&self) {
        if let Some(cache) = self.cache() {
            cache.shutdown();
        }
    }
}

/// All configured collections, addressable by key prefix.
#[derive(Default)]
pub struct CollectionRegistry {
    collections: Vec<Arc<Collection>>,
    by_prefix: HashMap<KeyPrefix, usize>,
}

impl CollectionRegistry {
    pub fn new(collections: impl IntoIterator<Item = Collection>) -> Self {
        let mut registry = Self::default();
        for collection in collections {
            registry
                .by_prefix
                .insert(collection.prefix().clone(), registry.collections.len());
            registry.collections.push(Arc::new(collection));
        }
        registry
    }

    /// Build every configured collection. Cached collections start refreshing immediately.
    pub fn from_settings(settings: &[CollectionSettings], store: &StoreHandle) -> Self {
        Self::new(settings.iter().map(|collection| {
            info!(
                target = "kvgate::collections",
                uri = %collection.uri,
                prefix = %collection.key_prefix,
                cached = collection.cache.is_some(),
                refresh_interval_ms = collection
                    .cache
                    .map(|cache| cache.refresh_interval.as_millis() as u64),
                entry_ttl_ms = collection
                    .cache
                    .map(|cache| cache.entry_ttl.as_millis() as u64),
                "collection configured"
            );
            Collection::from_settings(collection, store.clone())
        }))
    }

    pub fn get(&self, prefix: &str) -> Option<&Arc<Collection>> {
        self.by_prefix
            .get(&KeyPrefix::new(prefix))
            .and_then(|index| self.collections.get(*index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Collection>> {
        self.collections.iter()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Every record under `prefix` that passes `filter`.
    pub async fn get_all(
        &self,
        prefix: &str,
        filter: &QueryFilter,
    ) -> Result<Vec<Record>, ReadError> {
        self.lookup(prefix)?.list(filter).await
    }

    pub async fn get_by_id(&self, prefix: &str, id: &str) -> Result<Option<Record>, ReadError> {
        self.lookup(prefix)?.get(id).await
    }

    /// Stop every refresh loop.
    pub fn shutdown(&self) {
        for collection in &self.collections {
            collection.shutdown();
        }
    }

    fn lookup(&self, prefix: &str) -> Result<&Arc<Collection>, ReadError> {
        self.get(prefix).ok_or_else(|| ReadError::UnknownCollection {
            prefix: prefix.to_string(),
        })
    }
}
