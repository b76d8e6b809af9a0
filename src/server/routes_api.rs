use altsmith_common::{ClientId, Error, RunId, RunScope, TriggerSource};
use altsmith_db::pool::get_conn;
use altsmith_db::queries::{clients, runs, stats};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::config::KNOWN_PROVIDERS;
use crate::state::AppContext;

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/process", post(process_client))
        .route("/stats", get(get_stats))
        .route("/runs", get(list_runs))
        .route("/runs/:id", get(get_run))
        .route("/runs/:id/cancel", post(cancel_run))
        .route("/clients", get(list_clients))
}

/// Most runs an operator can page back through in one request.
const MAX_RUN_LISTING: usize = 100;

fn error_status(e: &Error) -> StatusCode {
    match e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Unauthorized => StatusCode::UNAUTHORIZED,
        Error::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: Error) -> (StatusCode, String) {
    (error_status(&e), e.to_string())
}

#[derive(Deserialize)]
struct ProcessRequest {
    client_id: String,
    wp_url: String,
    wp_user: String,
    wp_password: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    providers: Option<Vec<String>>,
}

#[derive(Serialize)]
struct AcceptedResponse {
    run_id: Uuid,
    status: &'static str,
}

/// Register (or re-register) a client and start a run for it.
///
/// Validation happens before anything is persisted; a bad registration is
/// rejected with 422 and never enqueued. Re-registration restores a client
/// whose credentials were revoked.
async fn process_client(
    State(ctx): State<AppContext>,
    Json(payload): Json<ProcessRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), (StatusCode, String)> {
    let client_id = ClientId::parse(&payload.client_id)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    if client_id.as_str() == "all" {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "Client ID 'all' is reserved".to_string(),
        ));
    }

    let wp_url = payload.wp_url.trim();
    if !wp_url.starts_with("http://") && !wp_url.starts_with("https://") {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "wp_url must be an http(s) URL".to_string(),
        ));
    }
    if payload.wp_user.trim().is_empty() || payload.wp_password.trim().is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "wp_user and wp_password are required".to_string(),
        ));
    }

    if let Some(order) = &payload.providers {
        for name in order {
            if !KNOWN_PROVIDERS.contains(&name.as_str()) {
                return Err((
                    StatusCode::UNPROCESSABLE_ENTITY,
                    format!("Unknown provider '{name}'"),
                ));
            }
        }
    }

    let language = payload
        .language
        .as_deref()
        .unwrap_or(&ctx.config.providers.language);

    {
        let conn = get_conn(&ctx.db).map_err(error_response)?;
        clients::upsert_client(
            &conn,
            &client_id,
            wp_url,
            payload.wp_user.trim(),
            &payload.wp_password,
            language,
            payload.providers.as_deref(),
        )
        .map_err(error_response)?;
    }
    tracing::info!(client = %client_id, "client registered");

    let run = ctx
        .scheduler
        .submit(TriggerSource::Manual, RunScope::Client(client_id))
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            run_id: run.id.into(),
            status: "accepted",
        }),
    ))
}

async fn get_stats(
    State(ctx): State<AppContext>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let conn = get_conn(&ctx.db).map_err(error_response)?;
    let global = stats::global_stats(&conn).map_err(error_response)?;
    let per_client = stats::list_client_stats(&conn).map_err(error_response)?;
    let active = clients::list_processable_clients(&conn)
        .map_err(error_response)?
        .len();

    let mut by_client = serde_json::Map::new();
    for entry in per_client {
        let Some(id) = &entry.client_id else { continue };
        by_client.insert(
            id.to_string(),
            json!({
                "processed": entry.processed,
                "failed": entry.failed,
                "skipped": entry.skipped,
                "avg_latency_ms": entry.avg_latency_ms(),
                "last_run_at": entry.last_run_at,
            }),
        );
    }

    Ok(Json(json!({
        "total_processed": global.processed,
        "total_failed": global.failed,
        "total_skipped": global.skipped,
        "active_clients": active,
        "clients": by_client,
    })))
}

#[derive(Deserialize)]
struct ListRunsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

/// Recent runs, newest first.
async fn list_runs(
    State(ctx): State<AppContext>,
    Query(query): Query<ListRunsQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(20).clamp(1, MAX_RUN_LISTING);
    let conn = get_conn(&ctx.db).map_err(error_response)?;
    let runs = runs::list_recent_runs(&conn, limit).map_err(error_response)?;
    Ok(Json(runs))
}

async fn get_run(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let run_id = RunId::parse(&id).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let conn = get_conn(&ctx.db).map_err(error_response)?;
    let run = runs::get_run(&conn, run_id).map_err(error_response)?;
    Ok(Json(run))
}

async fn cancel_run(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let run_id = RunId::parse(&id).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    if ctx.scheduler.cancel(run_id) {
        tracing::info!(run_id = %run_id, "run cancellation requested");
        return Ok(Json(json!({ "run_id": run_id, "status": "cancelling" })));
    }

    // Not active: distinguish an unknown run from one that already finished.
    let conn = get_conn(&ctx.db).map_err(error_response)?;
    let run = runs::get_run(&conn, run_id).map_err(error_response)?;
    Err((
        StatusCode::CONFLICT,
        format!("Run is already {}", run.status),
    ))
}

async fn list_clients(
    State(ctx): State<AppContext>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let conn = get_conn(&ctx.db).map_err(error_response)?;
    // Client serialization skips app_password, so credentials never leave
    // the process.
    let all = clients::list_clients(&conn).map_err(error_response)?;
    Ok(Json(all))
}
