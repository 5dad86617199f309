use axum::{
    Router,
    extract::{
        DefaultBodyLimit, FromRef, Request,
        multipart::{MultipartError, MultipartRejection},
        rejection::{PathRejection, QueryRejection},
    },
    http::{
        HeaderValue, Method, StatusCode, Uri,
        header::{ACCESS_CONTROL_ALLOW_HEADERS, AUTHORIZATION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use geopost_common::geo::InvalidRadiusError;
use geopost_store::{
    blob::{BlobError, BlobStore},
    search::{SearchError, SearchIndex},
};
use json::Json;
use params::{InvalidCoordinateError, ParamSettings};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tower_http::{
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
};
use tracing::{error, warn};

mod json;
pub mod params;
mod routes;

pub type ServerRouter = Router<ServerState>;

/// Process-wide clients and settings shared by all handlers.
#[derive(Clone, FromRef)]
pub struct ServerState {
    pub blob_store: Arc<dyn BlobStore>,
    pub search_index: Arc<dyn SearchIndex>,
    pub params: ParamSettings,
}

pub fn routes() -> ServerRouter {
    routes::routes().fallback(fallback)
}

/// The complete application: routes, body limit and CORS, bound to `state`.
pub fn app(state: ServerState, max_upload_bytes: usize) -> Router {
    routes()
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors())
        .layer(SetResponseHeaderLayer::if_not_present(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        ))
        .with_state(state)
}

/// Sent on every response, not only on preflight.
const ALLOWED_HEADERS: &str = "Content-Type,Authorization";

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Query string rejected: {0}")]
    QueryRejection(#[from] QueryRejection),
    #[error("Multipart request rejected: {0}")]
    MultipartRejection(#[from] MultipartRejection),
    #[error("Reading multipart field failed: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Image is not available")]
    MissingImage,
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinate(#[from] InvalidCoordinateError),
    #[error(transparent)]
    InvalidRange(#[from] InvalidRadiusError),
    #[error("Failed to save image to blob storage: {0}")]
    Storage(#[from] BlobError),
    #[error("Failed to save post to search index: {0}")]
    IndexPost(SearchError),
    #[error("Failed to read posts from search index: {0}")]
    SearchPosts(SearchError),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_) | ServerError::PathRejection(_) => StatusCode::NOT_FOUND,
            ServerError::QueryRejection(rejection) => rejection.status(),
            ServerError::MultipartRejection(rejection) => rejection.status(),
            ServerError::Multipart(err) => err.status(),
            ServerError::MissingImage
            | ServerError::InvalidCoordinate(_)
            | ServerError::InvalidRange(_) => StatusCode::BAD_REQUEST,
            ServerError::Storage(_)
            | ServerError::IndexPost(_)
            | ServerError::SearchPosts(_)
            | ServerError::JsonResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The fixed message sent to the client. Details only go to the log.
    pub fn message(&self) -> &'static str {
        match self {
            ServerError::UnknownRoute(_) | ServerError::PathRejection(_) => "Unknown route",
            ServerError::QueryRejection(_) => "Invalid query string",
            ServerError::Multipart(err) if err.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                "Request body is too large"
            }
            ServerError::MultipartRejection(_) | ServerError::Multipart(_) => {
                "Invalid multipart form"
            }
            ServerError::MissingImage => "Image is not available",
            ServerError::InvalidCoordinate(_) => "Invalid coordinates",
            ServerError::InvalidRange(_) => "Invalid range",
            ServerError::Storage(_) => "Failed to save image to blob storage",
            ServerError::IndexPost(_) => "Failed to save post to search index",
            ServerError::SearchPosts(_) => "Failed to read posts from search index",
            ServerError::JsonResponse(_) => "Failed to parse posts into JSON format",
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
struct ErrorResponse {
    status: u16,
    message: &'static str,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(error = %self, %status, "Replying with error");
        } else {
            warn!(error = %self, %status, "Rejecting request");
        }

        let error_response = ErrorResponse {
            status: status.as_u16(),
            message: self.message(),
        };
        (status, Json(error_response)).into_response()
    }
}
