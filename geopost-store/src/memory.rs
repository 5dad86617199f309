//! In-process blob store and search index.
//!
//! Nothing is persisted; everything is lost when the process exits. Used for
//! local development and as substitutable fakes in tests.

use crate::{
    blob::{self, BlobStore, Image},
    search::{self, GeoQuery, IndexStatus, SearchError, SearchIndex},
};
use async_trait::async_trait;
use dashmap::DashMap;
use geopost_common::{
    geo::distance_km,
    model::{
        Id,
        post::{Post, PostMarker},
    },
};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    base_url: String,
    blobs: DashMap<String, Image>,
}

impl MemoryBlobStore {
    /// Creates an empty store whose object URLs are `<base_url>/<key>`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            blobs: DashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Image> {
        self.blobs.get(key).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(&self, key: &str, image: Image) -> blob::Result<String> {
        debug!(key, size = image.bytes.len(), "Storing blob in memory");
        self.blobs.insert(key.to_owned(), image);

        Ok(format!("{}/{key}", self.base_url))
    }
}

#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    name: String,
    creations: AtomicUsize,
    documents: DashMap<Id<PostMarker>, Post>,
}

impl MemorySearchIndex {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// How many times the index was created. Stays at most one no matter how
    /// often [`SearchIndex::ensure_index`] runs.
    #[must_use]
    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn get(&self, id: Id<PostMarker>) -> Option<Post> {
        self.documents.get(&id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn check_exists(&self) -> search::Result<()> {
        if self.creations() == 0 {
            return Err(SearchError::IndexMissing(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn ensure_index(&self) -> search::Result<IndexStatus> {
        let created = self
            .creations
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        if created {
            debug!(index = %self.name, "Created in-memory index");
            Ok(IndexStatus::Created)
        } else {
            Ok(IndexStatus::AlreadyExists)
        }
    }

    async fn index_post(&self, id: Id<PostMarker>, post: &Post) -> search::Result<()> {
        self.check_exists()?;
        self.documents.insert(id, post.clone());
        Ok(())
    }

    async fn geo_search(&self, query: &GeoQuery) -> search::Result<Vec<Post>> {
        self.check_exists()?;

        let mut matches: Vec<(f64, Post)> = self
            .documents
            .iter()
            .filter_map(|entry| {
                let distance = distance_km(query.center, entry.value().location);
                (distance <= query.radius.km()).then(|| (distance, entry.value().clone()))
            })
            .collect();
        matches.sort_by(|(a, _), (b, _)| a.total_cmp(b));

        Ok(matches.into_iter().map(|(_, post)| post).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        blob::{BlobStore, Image},
        memory::{MemoryBlobStore, MemorySearchIndex},
        search::{GeoQuery, IndexStatus, SearchError, SearchIndex},
    };
    use bytes::Bytes;
    use geopost_common::{
        geo::{Radius, distance_km},
        model::{Id, location::Location, post::Post},
    };

    fn post_at(user: &str, lat: f64, lon: f64) -> Post {
        Post {
            user: user.to_owned(),
            message: format!("{user} was here"),
            location: Location { lat, lon },
            url: format!("memory://images/{user}"),
        }
    }

    #[tokio::test]
    async fn ensure_index_is_idempotent() {
        let index = MemorySearchIndex::new("post");

        assert_eq!(index.ensure_index().await.unwrap(), IndexStatus::Created);
        assert_eq!(
            index.ensure_index().await.unwrap(),
            IndexStatus::AlreadyExists
        );
        assert_eq!(index.creations(), 1);
    }

    #[tokio::test]
    async fn missing_index_is_an_error() {
        let index = MemorySearchIndex::new("post");

        let result = index.index_post(Id::generate(), &post_at("a", 0.0, 0.0)).await;
        assert!(matches!(result, Err(SearchError::IndexMissing(name)) if name == "post"));

        let result = index.geo_search(&GeoQuery::default()).await;
        assert!(matches!(result, Err(SearchError::IndexMissing(_))));
    }

    #[tokio::test]
    async fn geo_search_is_inclusive_and_nearest_first() {
        let index = MemorySearchIndex::new("post");
        index.ensure_index().await.unwrap();

        let center = Location { lat: 37.0, lon: -122.0 };
        let near = post_at("near", 37.001, -122.0);
        let edge = post_at("edge", 37.05, -122.0);
        let far = post_at("far", 38.0, -122.0);
        for post in [&far, &edge, &near] {
            index.index_post(Id::generate(), post).await.unwrap();
        }

        let radius = Radius::from_km_unchecked(distance_km(center, edge.location));
        let posts = index.geo_search(&GeoQuery { center, radius }).await.unwrap();
        assert_eq!(posts, vec![near.clone(), edge]);

        let radius = Radius::from_km_unchecked(radius.km() - 0.001);
        let posts = index.geo_search(&GeoQuery { center, radius }).await.unwrap();
        assert_eq!(posts, vec![near]);
    }

    #[tokio::test]
    async fn index_post_upserts() {
        let index = MemorySearchIndex::new("post");
        index.ensure_index().await.unwrap();
        let id = Id::generate();

        index.index_post(id, &post_at("first", 0.0, 0.0)).await.unwrap();
        index.index_post(id, &post_at("second", 0.0, 0.0)).await.unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.get(id).unwrap().user, "second");
    }

    #[tokio::test]
    async fn blob_store_overwrites_reused_key() {
        let store = MemoryBlobStore::new("memory://post-images/");

        let url = store
            .store(
                "key",
                Image {
                    bytes: Bytes::from_static(b"first"),
                    content_type: Some("image/png".to_owned()),
                },
            )
            .await
            .unwrap();
        store
            .store(
                "key",
                Image {
                    bytes: Bytes::from_static(b"second"),
                    content_type: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(url, "memory://post-images/key");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("key").unwrap().bytes, Bytes::from_static(b"second"));
    }
}
