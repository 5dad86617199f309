use geopost_common::geo::{DEFAULT_RADIUS_KM, InvalidRadiusError, Radius};
use geopost_store::{
    blob::BlobStore,
    elastic::{DEFAULT_MAX_RESULTS, ElasticsearchConfig, ElasticsearchIndex},
    memory::{MemoryBlobStore, MemorySearchIndex},
    s3::{S3BlobStore, S3Config},
    search::{SearchError, SearchIndex},
};
use serde::Deserialize;
use server::{
    ServerState,
    params::{CoordinatePolicy, ParamSettings},
};
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use thiserror::Error;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Invalid default search range: {0}")]
    DefaultRange(#[from] InvalidRadiusError),
    #[error("Error building search client: {0}")]
    SearchClient(SearchError),
    #[error("Error ensuring the search index exists: {0}")]
    EnsureIndex(SearchError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Backend {
    /// S3 for images, Elasticsearch for posts.
    #[default]
    Remote,
    /// Everything in process memory.
    Memory,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    #[serde(default)]
    backend: Backend,
    #[serde(default = "default_elasticsearch_url")]
    elasticsearch_url: String,
    #[serde(default = "default_post_index")]
    post_index: String,
    #[serde(default = "default_search_max_results")]
    search_max_results: u32,
    #[serde(default = "default_s3_bucket")]
    s3_bucket: String,
    s3_endpoint: Option<String>,
    s3_public_url: Option<String>,
    #[serde(default = "default_memory_blob_url")]
    memory_blob_url: String,
    #[serde(default)]
    coordinates: CoordinatePolicy,
    #[serde(default = "default_range_km")]
    default_range_km: f64,
    #[serde(default = "default_max_upload_bytes")]
    max_upload_bytes: usize,
}

fn default_elasticsearch_url() -> String {
    "http://localhost:9200".to_owned()
}

fn default_post_index() -> String {
    "post".to_owned()
}

fn default_search_max_results() -> u32 {
    DEFAULT_MAX_RESULTS
}

fn default_s3_bucket() -> String {
    "post-images".to_owned()
}

fn default_memory_blob_url() -> String {
    "memory://post-images".to_owned()
}

fn default_range_km() -> f64 {
    DEFAULT_RADIUS_KM
}

fn default_max_upload_bytes() -> usize {
    32 * 1024 * 1024
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "geopost_api=debug,\
                geopost_common=debug,\
                geopost_store=debug,\
                tower_http=debug,axum::rejection=trace"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

async fn connect_backend(
    env: &Env,
) -> Result<(Arc<dyn BlobStore>, Arc<dyn SearchIndex>), InitError> {
    match env.backend {
        Backend::Remote => {
            let blob_store = S3BlobStore::connect(S3Config {
                bucket: env.s3_bucket.clone(),
                endpoint: env.s3_endpoint.clone(),
                public_url: env.s3_public_url.clone(),
            })
            .await;
            let search_index = ElasticsearchIndex::new(ElasticsearchConfig {
                url: env.elasticsearch_url.clone(),
                index: env.post_index.clone(),
                max_results: env.search_max_results,
            })
            .map_err(InitError::SearchClient)?;
            info!(
                bucket = blob_store.bucket(),
                index = search_index.index(),
                "Connected remote backend"
            );

            Ok((Arc::new(blob_store), Arc::new(search_index)))
        }
        Backend::Memory => Ok((
            Arc::new(MemoryBlobStore::new(env.memory_blob_url.clone())),
            Arc::new(MemorySearchIndex::new(env.post_index.clone())),
        )),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            debug!(error = %err, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                debug!(error = %err, "Terminate handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;
    let default_radius = Radius::try_from(env.default_range_km)?;

    info!(backend = ?env.backend, "Started service");
    let (blob_store, search_index) = connect_backend(&env).await?;

    let status = search_index
        .ensure_index()
        .await
        .map_err(InitError::EnsureIndex)?;
    info!(index = %env.post_index, ?status, "Search index is ready");

    let state = ServerState {
        blob_store,
        search_index,
        params: ParamSettings {
            coordinates: env.coordinates,
            default_radius,
        },
    };

    let tracing_layer = TraceLayer::new_for_http();
    let app = server::app(state, env.max_upload_bytes).layer(tracing_layer);

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
