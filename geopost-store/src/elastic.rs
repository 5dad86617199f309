//! Search index backed by Elasticsearch.

use crate::search::{GeoQuery, IndexStatus, Result, SearchError, SearchIndex};
use async_trait::async_trait;
use elasticsearch::{
    Elasticsearch, IndexParts, SearchParts,
    http::{
        StatusCode,
        response::Response,
        transport::{SingleNodeConnectionPool, TransportBuilder},
    },
    indices::{IndicesCreateParts, IndicesExistsParts},
    params::Refresh,
};
use geopost_common::model::{
    Id,
    post::{Post, PostMarker},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_MAX_RESULTS: u32 = 10_000;

const ALREADY_EXISTS: &str = "resource_already_exists_exception";

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct ElasticsearchConfig {
    pub url: String,
    pub index: String,
    pub max_results: u32,
}

#[derive(Clone, Debug)]
pub struct ElasticsearchIndex {
    client: Elasticsearch,
    index: String,
    max_results: u32,
}

impl ElasticsearchIndex {
    pub fn new(config: ElasticsearchConfig) -> Result<Self> {
        let url = Url::parse(&config.url)?;
        let pool = SingleNodeConnectionPool::new(url);
        let transport = TransportBuilder::new(pool).disable_proxy().build()?;

        Ok(Self {
            client: Elasticsearch::new(transport),
            index: config.index,
            max_results: config.max_results,
        })
    }

    #[must_use]
    pub fn index(&self) -> &str {
        &self.index
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn ensure_index(&self) -> Result<IndexStatus> {
        let exists_response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[self.index.as_str()]))
            .send()
            .await?;

        let status = exists_response.status_code();
        if status.is_success() {
            debug!(index = %self.index, "Index exists");
            return Ok(IndexStatus::AlreadyExists);
        }
        if status != StatusCode::NOT_FOUND {
            return Err(rejection(exists_response).await);
        }

        let create_response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(&self.index))
            .body(index_mapping())
            .send()
            .await?;

        if create_response.status_code().is_success() {
            info!(index = %self.index, "Created index");
            return Ok(IndexStatus::Created);
        }

        // Another process may have created the index in between.
        let status = create_response.status_code().as_u16();
        let body = create_response.text().await?;
        if error_type(&body).as_deref() == Some(ALREADY_EXISTS) {
            debug!(index = %self.index, "Index was created concurrently");
            return Ok(IndexStatus::AlreadyExists);
        }

        Err(rejected(status, &body))
    }

    async fn index_post(&self, id: Id<PostMarker>, post: &Post) -> Result<()> {
        let id = id.to_string();
        let response = self
            .client
            .index(IndexParts::IndexId(&self.index, &id))
            .body(post)
            .refresh(Refresh::WaitFor)
            .send()
            .await?;

        if !response.status_code().is_success() {
            return Err(rejection(response).await);
        }

        info!(index = %self.index, %id, text = %post.message, "Post is saved to index");
        Ok(())
    }

    async fn geo_search(&self, query: &GeoQuery) -> Result<Vec<Post>> {
        let response = self
            .client
            .search(SearchParts::Index(&[self.index.as_str()]))
            .body(geo_distance_query(query, self.max_results))
            .send()
            .await?;

        if !response.status_code().is_success() {
            return Err(rejection(response).await);
        }

        let response: SearchResponse = response.json().await?;
        debug!(
            took_ms = response.took,
            hits = response.hits.hits.len(),
            "Geo query finished"
        );

        Ok(collect_posts(response.hits.hits))
    }
}

fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "location": { "type": "geo_point" }
            }
        }
    })
}

fn geo_distance_query(query: &GeoQuery, size: u32) -> Value {
    let center = json!({ "lat": query.center.lat, "lon": query.center.lon });

    json!({
        "size": size,
        "query": {
            "bool": {
                "filter": {
                    "geo_distance": {
                        "distance": query.radius.to_string(),
                        "location": center,
                    }
                }
            }
        },
        "sort": [
            {
                "_geo_distance": {
                    "location": center,
                    "order": "asc",
                    "unit": "km",
                }
            }
        ]
    })
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    took: u64,
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source")]
    source: Option<Value>,
}

/// Deserializes each hit into a post. Hits without a source or with a
/// source of a different shape are skipped and logged.
fn collect_posts(hits: Vec<Hit>) -> Vec<Post> {
    hits.into_iter()
        .filter_map(|hit| {
            let Some(source) = hit.source else {
                warn!(id = %hit.id, "Skipping search hit without source");
                return None;
            };

            serde_json::from_value(source)
                .inspect_err(|err| warn!(id = %hit.id, error = %err, "Skipping malformed search hit"))
                .ok()
        })
        .collect()
}

async fn rejection(response: Response) -> SearchError {
    let status = response.status_code().as_u16();
    match response.text().await {
        Ok(body) => rejected(status, &body),
        Err(err) => err.into(),
    }
}

fn rejected(status: u16, body: &str) -> SearchError {
    let reason = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/reason")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| body.to_owned());

    SearchError::Rejected { status, reason }
}

fn error_type(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/type")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use crate::{
        elastic::{
            DEFAULT_MAX_RESULTS, ElasticsearchConfig, ElasticsearchIndex, SearchResponse,
            collect_posts, error_type, geo_distance_query, index_mapping, rejected,
        },
        search::{GeoQuery, IndexStatus, SearchError, SearchIndex},
    };
    use elasticsearch::indices::IndicesDeleteParts;
    use geopost_common::{
        geo::{self, Radius},
        model::{
            Id,
            location::Location,
            post::{Post, PostMarker},
        },
    };
    use serde_json::json;

    #[test]
    fn mapping_declares_geo_point() {
        assert_eq!(
            index_mapping()["mappings"]["properties"]["location"]["type"],
            "geo_point"
        );
    }

    #[test]
    fn query_filters_and_sorts_by_distance() {
        let query = GeoQuery {
            center: Location { lat: 37.0, lon: -122.0 },
            radius: Radius::from_km_unchecked(1.0),
        };

        let body = geo_distance_query(&query, 50);

        assert_eq!(body["size"], 50);
        assert_eq!(
            body["query"]["bool"]["filter"]["geo_distance"],
            json!({
                "distance": "1km",
                "location": { "lat": 37.0, "lon": -122.0 },
            })
        );
        assert_eq!(body["sort"][0]["_geo_distance"]["order"], "asc");
        assert_eq!(
            body["sort"][0]["_geo_distance"]["location"],
            json!({ "lat": 37.0, "lon": -122.0 })
        );
    }

    #[test]
    fn default_radius_query() {
        let body = geo_distance_query(&GeoQuery::default(), 10);

        assert_eq!(
            body["query"]["bool"]["filter"]["geo_distance"]["distance"],
            "200km"
        );
    }

    #[test]
    fn malformed_hits_are_skipped() {
        let response: SearchResponse = serde_json::from_value(json!({
            "took": 3,
            "hits": {
                "hits": [
                    {
                        "_id": "a",
                        "_source": {
                            "user": "alice",
                            "message": "hi",
                            "location": { "lat": 37.0, "lon": -122.0 },
                            "url": "https://example.com/a",
                        },
                    },
                    { "_id": "b", "_source": { "user": "bob", "location": "somewhere" } },
                    { "_id": "c" },
                ]
            }
        }))
        .unwrap();

        let posts = collect_posts(response.hits.hits);

        assert_eq!(
            posts,
            vec![Post {
                user: "alice".to_owned(),
                message: "hi".to_owned(),
                location: Location { lat: 37.0, lon: -122.0 },
                url: "https://example.com/a".to_owned(),
            }]
        );
    }

    #[test]
    fn engine_errors() {
        let body = json!({
            "error": {
                "type": "resource_already_exists_exception",
                "reason": "index [post/abc] already exists",
            },
            "status": 400,
        })
        .to_string();

        assert_eq!(
            error_type(&body).as_deref(),
            Some("resource_already_exists_exception")
        );
        let SearchError::Rejected { status, reason } = rejected(400, &body) else {
            panic!("Expected a rejection");
        };
        assert_eq!(status, 400);
        assert_eq!(reason, "index [post/abc] already exists");

        let SearchError::Rejected { reason, .. } = rejected(502, "Bad Gateway") else {
            panic!("Expected a rejection");
        };
        assert_eq!(reason, "Bad Gateway");
        assert_eq!(error_type("Bad Gateway"), None);
    }

    /// Needs a live node at `ELASTICSEARCH_URL`. Stored geo points are
    /// quantized towards the grid origin, so a post at exactly the radius
    /// still matches.
    #[tokio::test]
    #[ignore = "needs a running Elasticsearch"]
    async fn live_radius_boundary_is_inclusive() {
        let url = std::env::var("ELASTICSEARCH_URL")
            .unwrap_or_else(|_| "http://localhost:9200".to_owned());
        let index = ElasticsearchIndex::new(ElasticsearchConfig {
            url,
            index: format!("geopost-boundary-{}", Id::<PostMarker>::generate()),
            max_results: DEFAULT_MAX_RESULTS,
        })
        .unwrap();

        assert_eq!(index.ensure_index().await.unwrap(), IndexStatus::Created);
        assert_eq!(
            index.ensure_index().await.unwrap(),
            IndexStatus::AlreadyExists
        );

        let center = Location { lat: 0.0, lon: 0.0 };
        let post = Post {
            user: "alice".to_owned(),
            message: "on the edge".to_owned(),
            location: Location { lat: 0.0, lon: 1.0 },
            url: "https://example.com/edge".to_owned(),
        };
        index.index_post(Id::generate(), &post).await.unwrap();
        let distance = geo::distance_km(center, post.location);

        let at_edge = index
            .geo_search(&GeoQuery {
                center,
                radius: Radius::from_km_unchecked(distance),
            })
            .await;
        let inside_edge = index
            .geo_search(&GeoQuery {
                center,
                radius: Radius::from_km_unchecked(distance - 0.01),
            })
            .await;

        index
            .client
            .indices()
            .delete(IndicesDeleteParts::Index(&[index.index()]))
            .send()
            .await
            .unwrap();

        assert_eq!(at_edge.unwrap(), vec![post]);
        assert_eq!(inside_edge.unwrap(), vec![]);
    }
}
