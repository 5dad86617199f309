use async_trait::async_trait;
use geopost_common::{
    geo::Radius,
    model::{
        Id,
        location::Location,
        post::{Post, PostMarker},
    },
};
use thiserror::Error;

pub type Result<T, E = SearchError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Invalid search engine URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Failed to build transport: {0}")]
    TransportBuild(#[from] elasticsearch::http::transport::BuildError),
    #[error("Transport error: {0}")]
    Transport(#[from] elasticsearch::Error),
    #[error("Search engine rejected the request with status {status}: {reason}")]
    Rejected { status: u16, reason: String },
    #[error("Index {0} does not exist")]
    IndexMissing(String),
}

/// Outcome of [`SearchIndex::ensure_index`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum IndexStatus {
    Created,
    AlreadyExists,
}

/// A geo-distance query: all posts within `radius` of `center`.
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct GeoQuery {
    pub center: Location,
    pub radius: Radius,
}

/// A search index of posts with a geo-point `location` field.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Creates the index with its geo-point mapping unless it exists already.
    async fn ensure_index(&self) -> Result<IndexStatus>;

    /// Upserts `post` under `id`. Returns once the document is visible to
    /// searches.
    async fn index_post(&self, id: Id<PostMarker>, post: &Post) -> Result<()>;

    /// Returns all posts within the query radius, nearest first. A post at
    /// exactly the radius matches.
    async fn geo_search(&self, query: &GeoQuery) -> Result<Vec<Post>>;
}
