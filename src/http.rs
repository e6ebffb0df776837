use crate::collectors::{CollectError, MetricsCollector};
use crate::hub::SubscriptionRegistry;
use crate::metrics::Metrics;
use crate::ws::{ws_handler, WsChannel};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub collector: Arc<dyn MetricsCollector>,
    pub hub: Arc<SubscriptionRegistry>,
    pub channel: Arc<WsChannel>,
}

pub fn build_router(state: HttpAppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/static", get(static_handler))
        .route("/api/dynamic", get(dynamic_handler))
        .route("/api/combined", get(combined_handler))
        .route("/api/observers", get(observers_handler))
        .route("/api/observers/:conn_id/groups", get(observer_groups_handler))
        .route("/api/groups/:group", get(group_members_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn static_handler(State(state): State<HttpAppState>) -> Response {
    snapshot_response(&state.metrics, state.collector.get_static().await)
}

async fn dynamic_handler(State(state): State<HttpAppState>) -> Response {
    snapshot_response(&state.metrics, state.collector.get_dynamic().await)
}

async fn combined_handler(State(state): State<HttpAppState>) -> Response {
    snapshot_response(&state.metrics, state.collector.get_combined().await)
}

#[derive(Debug, Serialize)]
struct ObserversSummary {
    observers: usize,
    connections: usize,
}

async fn observers_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    Json(ObserversSummary {
        observers: state.hub.observer_count().await,
        connections: state.channel.connection_count().await,
    })
}

async fn observer_groups_handler(
    State(state): State<HttpAppState>,
    Path(conn_id): Path<String>,
) -> Response {
    match state.hub.groups_of(&conn_id).await {
        Some(groups) => Json(groups).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("наблюдатель {conn_id} не подключён"),
        )
            .into_response(),
    }
}

async fn group_members_handler(
    State(state): State<HttpAppState>,
    Path(group): Path<String>,
) -> impl IntoResponse {
    Json(state.hub.group_members(&group).await)
}

fn snapshot_response<T: Serialize>(
    metrics: &Metrics,
    result: Result<T, CollectError>,
) -> Response {
    match result {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => {
            metrics.inc_collect_error("api");
            warn!(error = %err, "не удалось собрать телеметрию для HTTP-запроса");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("телеметрия недоступна: {err}"),
            )
                .into_response()
        }
    }
}
