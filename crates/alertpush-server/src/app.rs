use crate::state::AppState;
use crate::{api, logging};
use axum::middleware;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub fn build_http_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api::api_routes()
        .layer(cors)
        .merge(api::lifecycle_routes())
        .merge(api::webhook_routes())
        .with_state(state)
        .layer(middleware::from_fn(logging::request_logging))
}
