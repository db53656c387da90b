use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{self, AppState};
use crate::connect;
use crate::middleware::require_auth;
use crate::threads;

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/connect", get(connect::connect))
        .route("/threads", get(threads::list_threads))
        .route("/threads/{sender}", get(threads::get_thread_messages))
        .route("/threads/{sender}/read", post(threads::read_thread))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
