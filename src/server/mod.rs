//! HTTP boundary: router assembly, authentication, and the trigger
//! endpoints.

use axum::{
    http::{header, Method},
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod routes_api;
pub mod routes_webhook;

use crate::state::AppContext;

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes(&ctx))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn api_routes(ctx: &AppContext) -> Router<AppContext> {
    let protected = routes_api::api_routes();

    // Apply auth middleware to protected routes only if enabled
    let protected = if ctx.config.server.auth.enabled {
        protected.layer(middleware::from_fn_with_state(
            ctx.clone(),
            auth::api_auth_middleware,
        ))
    } else {
        protected
    };

    // Webhooks authenticate with their own signature scheme, not the API
    // key, so they sit outside the middleware.
    protected.nest("/webhook", routes_webhook::webhook_routes(ctx))
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
