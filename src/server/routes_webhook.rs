//! Webhook trigger endpoints. A site (or a plugin on it) posts here to
//! request a run ahead of the scheduled sweep.

use altsmith_common::{ClientId, Error, RunScope, TriggerSource};
use altsmith_db::pool::get_conn;
use altsmith_db::queries::clients;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::server::auth::verify_webhook_signature;
use crate::state::AppContext;

const SIGNATURE_HEADER: &str = "x-altsmith-signature";

pub fn webhook_routes(ctx: &AppContext) -> Router<AppContext> {
    // Use the raw body handler when signature verification is enabled; the
    // HMAC is computed over the exact bytes on the wire.
    if ctx.config.server.webhook_security.signature_verification {
        Router::new().route("/:client_id", post(handle_webhook_with_signature))
    } else {
        Router::new().route("/:client_id", post(handle_webhook))
    }
}

async fn handle_webhook_with_signature(
    State(ctx): State<AppContext>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let security = &ctx.config.server.webhook_security;

    if let Some(ref secret) = security.signature_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    format!("Missing {} header", SIGNATURE_HEADER),
                )
            })?;

        if !verify_webhook_signature(secret, &body, signature) {
            tracing::warn!(client = %client_id, "webhook signature verification failed");
            return Err((StatusCode::UNAUTHORIZED, "Invalid signature".to_string()));
        }
    }

    process_webhook(ctx, client_id).await
}

async fn handle_webhook(
    State(ctx): State<AppContext>,
    Path(client_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    process_webhook(ctx, client_id).await
}

async fn process_webhook(
    ctx: AppContext,
    client_id: String,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let scope = if client_id == "all" {
        RunScope::All
    } else {
        let id = ClientId::parse(&client_id)
            .map_err(|_| (StatusCode::NOT_FOUND, format!("Unknown client: {client_id}")))?;

        let conn = get_conn(&ctx.db)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        let client = clients::get_client(&conn, &id).map_err(|e| match e {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, format!("Unknown client: {client_id}")),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;

        if !client.enabled {
            return Err((StatusCode::CONFLICT, "Client is disabled".to_string()));
        }
        if !client.auth_ok {
            return Err((
                StatusCode::CONFLICT,
                "Client credentials were rejected; re-register to resume".to_string(),
            ));
        }

        RunScope::Client(id)
    };

    let run = ctx
        .scheduler
        .submit(TriggerSource::Webhook, scope)
        .await
        .map_err(|e| match e {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
            Error::InvalidInput(_) => (StatusCode::CONFLICT, e.to_string()),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;

    tracing::info!(run_id = %run.id, client = %client_id, "webhook accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "run_id": run.id,
            "status": "accepted",
        })),
    ))
}
