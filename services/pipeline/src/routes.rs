use crate::infra::AppState;
use axum::extract::Query;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use valorimob::error::AppError;
use valorimob::features::normalize_key;
use valorimob::pipeline::load_ranking;
use valorimob::ranking::{RankingRow, RankingSummary};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RankingQuery {
    #[serde(default)]
    pub(crate) bairro: Option<String>,
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RankingResponse {
    pub(crate) summary: RankingSummary,
    pub(crate) rows: Vec<RankingRow>,
}

pub(crate) fn router() -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/ranking", get(ranking_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Staged ranking, optionally filtered to one neighborhood and truncated.
/// The summary describes the returned rows.
pub(crate) async fn ranking_endpoint(
    Extension(state): Extension<AppState>,
    Query(query): Query<RankingQuery>,
) -> Result<Json<RankingResponse>, AppError> {
    let mut rows = load_ranking(state.staging.as_ref())?;

    if let Some(bairro) = query.bairro.as_deref().map(normalize_key) {
        if !bairro.is_empty() {
            rows.retain(|row| normalize_key(&row.bairro) == bairro);
        }
    }
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }

    Ok(Json(RankingResponse {
        summary: RankingSummary::of(&rows),
        rows,
    }))
}
