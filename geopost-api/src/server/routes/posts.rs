use crate::server::{
    Result, ServerError, ServerRouter,
    json::Json,
    params::ParamSettings,
};
use axum::extract::{Multipart, Query, State};
use axum_extra::{
    extract::WithRejection,
    routing::{RouterExt, TypedPath},
};
use geopost_common::model::{
    Id,
    post::{IndexedPost, Post, PostMarker},
};
use geopost_store::{
    blob::{BlobStore, Image},
    search::{GeoQuery, SearchIndex},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(submit_post)
        .typed_get(search_posts)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/post", rejection(ServerError))]
struct SubmitPostPath();

/// The fields of a submission form. Unknown fields are ignored and the first
/// occurrence of a repeated field wins.
#[derive(Debug, Default)]
struct SubmitPostForm {
    user: Option<String>,
    message: Option<String>,
    lat: Option<String>,
    lon: Option<String>,
    image: Option<Image>,
}

impl SubmitPostForm {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };

            match name.as_str() {
                "user" if form.user.is_none() => form.user = Some(field.text().await?),
                "message" if form.message.is_none() => form.message = Some(field.text().await?),
                "lat" if form.lat.is_none() => form.lat = Some(field.text().await?),
                "lon" if form.lon.is_none() => form.lon = Some(field.text().await?),
                // Only a file part counts as the image.
                "image" if form.image.is_none() && field.file_name().is_some() => {
                    let content_type = field.content_type().map(str::to_owned);
                    let bytes = field.bytes().await?;
                    form.image = Some(Image {
                        bytes,
                        content_type,
                    });
                }
                _ => {}
            }
        }

        Ok(form)
    }
}

async fn submit_post(
    SubmitPostPath(): SubmitPostPath,
    State(blob_store): State<Arc<dyn BlobStore>>,
    State(search_index): State<Arc<dyn SearchIndex>>,
    State(params): State<ParamSettings>,
    WithRejection(multipart, _): WithRejection<Multipart, ServerError>,
) -> Result<Json<IndexedPost>> {
    debug!("Received one post request");

    let form = SubmitPostForm::read(multipart).await?;
    let image = form.image.ok_or(ServerError::MissingImage)?;
    let location = params
        .coordinates
        .location(form.lat.as_deref(), form.lon.as_deref())?;

    let id = Id::<PostMarker>::generate();
    let url = blob_store.store(&id.to_string(), image).await?;

    let post = Post {
        user: form.user.unwrap_or_default(),
        message: form.message.unwrap_or_default(),
        location,
        url,
    };
    search_index
        .index_post(id, &post)
        .await
        .map_err(ServerError::IndexPost)?;

    info!(%id, text = %post.message, "Saved one post");
    Ok(Json(IndexedPost { id, post }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/search", rejection(ServerError))]
struct SearchPostsPath();

#[derive(Clone, Eq, PartialEq, Debug, Default, Deserialize)]
struct SearchParams {
    lat: Option<String>,
    lon: Option<String>,
    /// Kilometres.
    range: Option<String>,
}

async fn search_posts(
    SearchPostsPath(): SearchPostsPath,
    State(search_index): State<Arc<dyn SearchIndex>>,
    State(params): State<ParamSettings>,
    WithRejection(Query(query), _): WithRejection<Query<SearchParams>, ServerError>,
) -> Result<Json<Vec<Post>>> {
    debug!(?query, "Received one request for search");

    let center = params
        .coordinates
        .location(query.lat.as_deref(), query.lon.as_deref())?;
    let radius = params.radius(query.range.as_deref())?;

    let posts = search_index
        .geo_search(&GeoQuery { center, radius })
        .await
        .map_err(ServerError::SearchPosts)?;

    info!(lat = center.lat, lon = center.lon, %radius, found = posts.len(), "Searched posts");
    Ok(Json(posts))
}
