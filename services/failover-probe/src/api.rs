use std::sync::Arc;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use dbkit::database::ScyllaDriver;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::probe::Prober;

pub type AppState = Arc<Prober<ScyllaDriver>>;

pub fn router(prober: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/stats", get(handle_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(prober)
}

pub async fn start_server(prober: AppState, port: u16) -> anyhow::Result<()> {
    let app = router(prober);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_health(State(prober): State<AppState>) -> impl IntoResponse {
    let stats = prober.get_stats();
    let (status, label) = if stats.is_healthy() {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        status,
        Json(json!({
            "status": label,
            "service": "failover-probe",
            "consecutive_failures": stats.consecutive_failures,
            "last_success": stats.last_success,
            "timestamp": chrono::Utc::now(),
        })),
    )
}

async fn handle_metrics(State(prober): State<AppState>) -> impl IntoResponse {
    match prober.registry().encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn handle_stats(State(prober): State<AppState>) -> impl IntoResponse {
    let stats = prober.get_stats();
    Json(json!({
        "total_probes": stats.total_probes,
        "successful_probes": stats.successful_probes,
        "failed_probes": stats.failed_probes,
        "unknown_probes": stats.unknown_probes,
        "failovers_observed": stats.failovers_observed,
        "last_error": stats.last_error,
        "success_rate": stats.success_rate(),
    }))
}
