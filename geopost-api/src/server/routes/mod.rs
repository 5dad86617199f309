use crate::server::ServerRouter;
use axum::Router;

mod posts;

pub fn routes() -> ServerRouter {
    Router::new().merge(posts::routes())
}
