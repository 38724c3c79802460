//! REST API handlers for group and deployment management.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::debug;

use switchyard_control::{ControlError, ReconcileStatus};
use switchyard_state::{epoch_ms, DeploymentRecord, GroupRecord, PoolHealth};

use crate::ApiState;

/// Response wrapper shared by all endpoints.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn api_error(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn control_error(err: &ControlError) -> Response {
    let status = match err {
        ControlError::GroupBusy(_) | ControlError::ReconcileConflict(_) => StatusCode::CONFLICT,
        ControlError::GroupNotFound(_) | ControlError::DeploymentNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        ControlError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(&err.to_string(), status)
}

/// Group state plus the live router split.
#[derive(serde::Serialize)]
pub struct GroupView {
    #[serde(flatten)]
    pub record: GroupRecord,
    /// What the router is serving right now (may differ from the
    /// steady-state weights while a deployment shifts).
    pub current_weights: BTreeMap<String, u8>,
}

/// Result of a reconcile pass.
#[derive(serde::Serialize)]
pub struct ReconcileView {
    pub group_id: String,
    pub status: &'static str,
    pub repaired: Vec<String>,
}

fn status_str(status: ReconcileStatus) -> &'static str {
    match status {
        ReconcileStatus::Created => "created",
        ReconcileStatus::Updated => "updated",
        ReconcileStatus::Unchanged => "unchanged",
    }
}

/// PUT /api/v1/groups
pub async fn reconcile_group(
    State(state): State<ApiState>,
    Json(spec): Json<switchyard_state::GroupSpec>,
) -> impl IntoResponse {
    match state.manager.reconcile(&spec) {
        Ok(outcome) => {
            let code = match outcome.status {
                ReconcileStatus::Created => StatusCode::CREATED,
                _ => StatusCode::OK,
            };
            (
                code,
                ApiResponse::ok(ReconcileView {
                    group_id: outcome.group_id,
                    status: status_str(outcome.status),
                    repaired: outcome.repaired,
                }),
            )
                .into_response()
        }
        Err(e) => control_error(&e).into_response(),
    }
}

/// GET /api/v1/groups
pub async fn list_groups(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_groups() {
        Ok(groups) => {
            let views: Vec<GroupView> = groups
                .into_iter()
                .map(|record| {
                    let current_weights = state
                        .router
                        .weights(&record.spec.rule_set)
                        .unwrap_or_default();
                    GroupView {
                        record,
                        current_weights,
                    }
                })
                .collect();
            ApiResponse::ok(views).into_response()
        }
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/groups/:id
pub async fn get_group(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_group(&id) {
        Ok(Some(record)) => {
            let current_weights = state
                .router
                .weights(&record.spec.rule_set)
                .unwrap_or_default();
            ApiResponse::ok(GroupView {
                record,
                current_weights,
            })
            .into_response()
        }
        Ok(None) => api_error("group not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// DELETE /api/v1/groups/:id
pub async fn teardown_group(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.teardown(&id) {
        Ok(()) => ApiResponse::ok(serde_json::json!({ "deleted": id })).into_response(),
        Err(e) => control_error(&e).into_response(),
    }
}

/// Request body to start a deployment.
#[derive(serde::Deserialize)]
pub struct StartDeploymentRequest {
    /// Release artifact reference (image tag, digest, ...).
    pub release_ref: String,
}

/// POST /api/v1/groups/:id/deployments
pub async fn start_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<StartDeploymentRequest>,
) -> impl IntoResponse {
    match state.controller.start_deployment(&id, &req.release_ref).await {
        Ok(deployment_id) => (
            StatusCode::CREATED,
            ApiResponse::ok(serde_json::json!({ "deployment_id": deployment_id })),
        )
            .into_response(),
        Err(e) => control_error(&e).into_response(),
    }
}

/// GET /api/v1/deployments/:id
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_deployment(&id) {
        Ok(Some(record)) => ApiResponse::<DeploymentRecord>::ok(record).into_response(),
        Ok(None) => api_error("deployment not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/deployments/:id/cancel
pub async fn cancel_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.cancel(&id).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({ "cancelled": id })).into_response(),
        Err(e) => control_error(&e).into_response(),
    }
}

/// Request body for a pool health report.
#[derive(serde::Deserialize)]
pub struct HealthReport {
    pub health: PoolHealth,
}

/// POST /api/v1/pools/:id/health
pub async fn report_pool_health(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(report): Json<HealthReport>,
) -> impl IntoResponse {
    match state.store.get_pool(&id) {
        Ok(Some(_)) => {
            state.controller.report_pool_health(&id, report.health);
            ApiResponse::ok(serde_json::json!({ "pool": id, "health": report.health }))
                .into_response()
        }
        Ok(None) => api_error("pool not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// Request body for an alarm metric sample.
#[derive(serde::Deserialize)]
pub struct MetricSample {
    pub metric: String,
    pub value: f64,
    /// Sample timestamp; defaults to the server clock.
    pub at_epoch_ms: Option<u64>,
}

/// POST /api/v1/pools/:id/metrics
pub async fn report_metric(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(sample): Json<MetricSample>,
) -> impl IntoResponse {
    if !state.monitor.is_registered(&id) {
        return api_error("no alarm registered for pool", StatusCode::NOT_FOUND).into_response();
    }
    let at = sample.at_epoch_ms.unwrap_or_else(epoch_ms);
    debug!(pool = %id, metric = %sample.metric, value = sample.value, "metric sample received");
    state.monitor.record(&id, &sample.metric, sample.value, at);
    ApiResponse::ok(serde_json::json!({
        "pool": id,
        "breaching": state.monitor.is_breaching(&id),
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use switchyard_health::HealthMonitor;
    use switchyard_router::{MemoryRouter, TrafficRouter};
    use switchyard_state::{AlarmConfig, DeployConfig, GroupSpec, ShiftPolicy, StateStore};

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        let router = Arc::new(MemoryRouter::new()) as Arc<dyn TrafficRouter>;
        ApiState::new(store, router, HealthMonitor::new())
    }

    fn test_spec(id: &str) -> GroupSpec {
        GroupSpec {
            id: id.to_string(),
            service: "nginx".to_string(),
            rule_set: format!("{id}-prod"),
            config: DeployConfig {
                policy: ShiftPolicy::AllAtOnce,
                validation_window_secs: 1,
                termination_wait_secs: 1,
                provision_timeout_secs: 300,
            },
            alarm: AlarmConfig::default(),
        }
    }

    #[tokio::test]
    async fn reconcile_creates_then_unchanged() {
        let state = test_state();

        let resp = reconcile_group(State(state.clone()), Json(test_spec("web"))).await;
        assert_eq!(resp.into_response().status(), StatusCode::CREATED);

        let resp = reconcile_group(State(state), Json(test_spec("web"))).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_group_includes_current_weights() {
        let state = test_state();
        reconcile_group(State(state.clone()), Json(test_spec("web"))).await;

        let resp = get_group(State(state), Path("web".to_string())).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["current_weights"]["web:blue"], 100);
        assert_eq!(json["data"]["active_pool"], "blue");
    }

    #[tokio::test]
    async fn get_missing_group_not_found() {
        let state = test_state();
        let resp = get_group(State(state), Path("nope".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_groups_returns_all() {
        let state = test_state();
        reconcile_group(State(state.clone()), Json(test_spec("web"))).await;
        reconcile_group(State(state.clone()), Json(test_spec("queue"))).await;

        let resp = list_groups(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn start_deployment_twice_conflicts() {
        let state = test_state();
        reconcile_group(State(state.clone()), Json(test_spec("web"))).await;

        let resp = start_deployment(
            State(state.clone()),
            Path("web".to_string()),
            Json(StartDeploymentRequest {
                release_ref: "app:v2".to_string(),
            }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::CREATED);

        let resp = start_deployment(
            State(state),
            Path("web".to_string()),
            Json(StartDeploymentRequest {
                release_ref: "app:v3".to_string(),
            }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn start_deployment_unknown_group_not_found() {
        let state = test_state();
        let resp = start_deployment(
            State(state),
            Path("nope".to_string()),
            Json(StartDeploymentRequest {
                release_ref: "app:v2".to_string(),
            }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_deployment_shows_transitions() {
        let state = test_state();
        reconcile_group(State(state.clone()), Json(test_spec("web"))).await;

        let resp = start_deployment(
            State(state.clone()),
            Path("web".to_string()),
            Json(StartDeploymentRequest {
                release_ref: "app:v2".to_string(),
            }),
        )
        .await
        .into_response();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let id = json["data"]["deployment_id"].as_str().unwrap().to_string();

        let resp = get_deployment(State(state), Path(id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"]["release_ref"], "app:v2");
        assert!(!json["data"]["transitions"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn teardown_busy_group_conflicts() {
        let state = test_state();
        reconcile_group(State(state.clone()), Json(test_spec("web"))).await;
        start_deployment(
            State(state.clone()),
            Path("web".to_string()),
            Json(StartDeploymentRequest {
                release_ref: "app:v2".to_string(),
            }),
        )
        .await;

        let resp = teardown_group(State(state), Path("web".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn teardown_then_group_gone() {
        let state = test_state();
        reconcile_group(State(state.clone()), Json(test_spec("web"))).await;

        let resp = teardown_group(State(state.clone()), Path("web".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);

        let resp = get_group(State(state), Path("web".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn error_envelope_carries_message() {
        let state = test_state();
        let resp = teardown_group(State(state), Path("ghost".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn cancel_unknown_deployment_not_found() {
        let state = test_state();
        let resp = cancel_deployment(State(state), Path("nope-1".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn report_health_persists_to_pool_record() {
        let state = test_state();
        reconcile_group(State(state.clone()), Json(test_spec("web"))).await;

        let resp = report_pool_health(
            State(state.clone()),
            Path("web:green".to_string()),
            Json(HealthReport {
                health: PoolHealth::Healthy,
            }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);

        let pool = state.store.get_pool("web:green").unwrap().unwrap();
        assert_eq!(pool.health, PoolHealth::Healthy);
    }

    #[tokio::test]
    async fn report_health_unknown_pool_not_found() {
        let state = test_state();
        let resp = report_pool_health(
            State(state),
            Path("web:green".to_string()),
            Json(HealthReport {
                health: PoolHealth::Healthy,
            }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metric_sample_reports_breach() {
        let state = test_state();
        reconcile_group(State(state.clone()), Json(test_spec("web"))).await;

        let resp = report_metric(
            State(state.clone()),
            Path("web:green".to_string()),
            Json(MetricSample {
                metric: "client_error_count".to_string(),
                value: 5.0,
                at_epoch_ms: Some(1_000),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"]["breaching"], true);
        assert!(state.monitor.is_breaching("web:green"));
    }

    #[tokio::test]
    async fn metric_for_unregistered_pool_not_found() {
        let state = test_state();
        let resp = report_metric(
            State(state),
            Path("web:green".to_string()),
            Json(MetricSample {
                metric: "client_error_count".to_string(),
                value: 1.0,
                at_epoch_ms: None,
            }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }
}
