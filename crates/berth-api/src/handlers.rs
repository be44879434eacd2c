//! REST API handlers.
//!
//! Reads go straight to the `StateStore`; anything that touches capacity
//! goes through the `Engine` so it happens under the cluster lock.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use berth_scheduler::{AdmitRequest, SchedulerError};
use berth_state::*;

use crate::{ApiState, USER_HEADER};

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn scheduler_error(err: SchedulerError) -> Response {
    let status = match &err {
        SchedulerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        SchedulerError::NotFound(_) => StatusCode::NOT_FOUND,
        SchedulerError::Forbidden(_) => StatusCode::FORBIDDEN,
        SchedulerError::TransientStoreFault(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    if err.is_retryable() {
        warn!(error = %err, "request failed on a store fault");
    }
    error_response(&err.to_string(), status).into_response()
}

fn state_error(err: StateError) -> Response {
    scheduler_error(err.into())
}

/// Resolve the caller from the `x-berth-user` header.
fn caller(state: &ApiState, headers: &HeaderMap) -> Result<UserRecord, Response> {
    let unauthorized =
        |msg: &str| error_response(msg, StatusCode::UNAUTHORIZED).into_response();

    let raw = headers
        .get(USER_HEADER)
        .ok_or_else(|| unauthorized("missing x-berth-user header"))?;
    let id: UserId = raw
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| unauthorized("malformed x-berth-user header"))?;

    match state.engine.store().get_user(id) {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(unauthorized("unknown user")),
        Err(e) => Err(state_error(e)),
    }
}

fn require_writer(user: &UserRecord, action: &str) -> Result<(), Response> {
    if user.role.can_write() {
        return Ok(());
    }
    warn!(user_id = user.id, role = ?user.role, action, "write attempted by read-only user");
    Err(error_response(
        &format!("only ADMIN and DEVELOPER users can {action}"),
        StatusCode::FORBIDDEN,
    )
    .into_response())
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

// ── Clusters ───────────────────────────────────────────────────

/// A cluster together with its free capacity.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClusterView {
    pub id: ClusterId,
    pub name: String,
    pub organization_id: OrganizationId,
    pub total: ResourceVector,
    pub allocated: ResourceVector,
    pub available: ResourceVector,
}

impl From<ClusterRecord> for ClusterView {
    fn from(c: ClusterRecord) -> Self {
        let available = c.available();
        Self {
            id: c.id,
            name: c.name,
            organization_id: c.organization_id,
            total: c.total,
            allocated: c.allocated,
            available,
        }
    }
}

/// Cluster creation request body.
#[derive(Debug, Deserialize)]
pub struct CreateClusterRequest {
    pub name: String,
    pub total: ResourceVector,
}

/// GET /api/v1/clusters
pub async fn list_clusters(State(state): State<ApiState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(resp) = caller(&state, &headers) {
        return resp;
    }
    match state.engine.store().list_clusters() {
        Ok(clusters) => {
            let views: Vec<ClusterView> = clusters.into_iter().map(ClusterView::from).collect();
            ApiResponse::ok(views).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/clusters
pub async fn create_cluster(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<CreateClusterRequest>,
) -> impl IntoResponse {
    let user = match caller(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_writer(&user, "create clusters") {
        return resp;
    }
    let Some(organization_id) = user.organization_id else {
        return error_response("user is not a member of any organization", StatusCode::BAD_REQUEST)
            .into_response();
    };
    if req.name.trim().is_empty() {
        return error_response("cluster name is required", StatusCode::BAD_REQUEST).into_response();
    }

    let new = NewCluster {
        name: req.name,
        organization_id,
        created_by: user.id,
        total: req.total,
    };
    match state.engine.store().create_cluster(&new) {
        Ok(cluster) => {
            info!(cluster_id = cluster.id, name = %cluster.name, total = %cluster.total, "cluster created");
            (StatusCode::CREATED, ApiResponse::ok(ClusterView::from(cluster))).into_response()
        }
        Err(StateError::Conflict(msg)) => error_response(&msg, StatusCode::BAD_REQUEST).into_response(),
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/clusters/{id}
pub async fn get_cluster(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<ClusterId>,
) -> impl IntoResponse {
    if let Err(resp) = caller(&state, &headers) {
        return resp;
    }
    match state.engine.store().get_cluster(id) {
        Ok(Some(cluster)) => ApiResponse::ok(ClusterView::from(cluster)).into_response(),
        Ok(None) => error_response("cluster not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/clusters/{id}/deployments
pub async fn list_cluster_deployments(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<ClusterId>,
) -> impl IntoResponse {
    if let Err(resp) = caller(&state, &headers) {
        return resp;
    }
    match state.engine.store().get_cluster(id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response("cluster not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => return state_error(e),
    }
    match state.engine.store().list_deployments_for_cluster(id) {
        Ok(deployments) => ApiResponse::ok(deployments).into_response(),
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/clusters/{id}/dispatch
pub async fn trigger_dispatch(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<ClusterId>,
) -> impl IntoResponse {
    let user = match caller(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_writer(&user, "trigger dispatch") {
        return resp;
    }
    match state.engine.store().get_cluster(id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response("cluster not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => return state_error(e),
    }
    match state.engine.trigger_dispatch(id).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => scheduler_error(e),
    }
}

// ── Deployments ────────────────────────────────────────────────

/// Deployment submission body. The requester comes from the header.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateDeploymentRequest {
    pub name: String,
    pub image: String,
    pub demand: ResourceVector,
    pub priority: i64,
    pub cluster_id: ClusterId,
}

/// GET /api/v1/deployments
pub async fn list_deployments(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(resp) = caller(&state, &headers) {
        return resp;
    }
    match state.engine.store().list_deployments() {
        Ok(deployments) => ApiResponse::ok(deployments).into_response(),
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/deployments
pub async fn create_deployment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<CreateDeploymentRequest>,
) -> impl IntoResponse {
    let user = match caller(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_writer(&user, "create deployments") {
        return resp;
    }

    let request = AdmitRequest {
        name: req.name,
        image: req.image,
        demand: req.demand,
        priority: req.priority,
        cluster_id: req.cluster_id,
        requester_id: user.id,
    };
    match state.engine.admit(request).await {
        Ok(admission) => (StatusCode::CREATED, ApiResponse::ok(admission)).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// GET /api/v1/deployments/{id}
pub async fn get_deployment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<DeploymentId>,
) -> impl IntoResponse {
    if let Err(resp) = caller(&state, &headers) {
        return resp;
    }
    match state.engine.store().get_deployment(id) {
        Ok(Some(deployment)) => ApiResponse::ok(deployment).into_response(),
        Ok(None) => error_response("deployment not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => state_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::HeaderValue;
    use berth_core::BerthConfig;
    use berth_scheduler::Engine;
    use serde_json::Value;

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_organization(&OrganizationRecord {
                id: 1,
                name: "acme".to_string(),
                invite_code: None,
            })
            .unwrap();
        let users = [
            (1, Some(1), Role::Developer),
            (2, Some(1), Role::Viewer),
            (3, None, Role::Admin),
        ];
        for (id, organization_id, role) in users {
            store
                .put_user(&UserRecord {
                    id,
                    username: format!("user{id}"),
                    organization_id,
                    role,
                })
                .unwrap();
        }
        ApiState {
            engine: Engine::from_config(store, &BerthConfig::default()),
        }
    }

    fn as_user(id: u64) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        headers
    }

    fn cluster_body(name: &str) -> CreateClusterRequest {
        CreateClusterRequest {
            name: name.to_string(),
            total: ResourceVector::new(10, 20, 5),
        }
    }

    fn deployment_body(cluster_id: ClusterId, demand: ResourceVector) -> CreateDeploymentRequest {
        CreateDeploymentRequest {
            name: "train".to_string(),
            image: "registry.local/train:1".to_string(),
            demand,
            priority: 0,
            cluster_id,
        }
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_ok() {
        let resp = healthz().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_or_unknown_caller_is_unauthorized() {
        let state = test_state();
        let resp = list_clusters(State(state.clone()), HeaderMap::new())
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = list_clusters(State(state.clone()), as_user(99))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let mut garbled = HeaderMap::new();
        garbled.insert(USER_HEADER, HeaderValue::from_static("abc"));
        let resp = list_clusters(State(state), garbled).await.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_and_get_cluster() {
        let state = test_state();
        let resp = create_cluster(State(state.clone()), as_user(1), Json(cluster_body("gpu-a")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        let id = body["data"]["id"].as_u64().unwrap();

        let resp = get_cluster(State(state), as_user(2), Path(id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["name"], "gpu-a");
        assert_eq!(body["data"]["available"]["cpu"], 10);
    }

    #[tokio::test]
    async fn viewer_cannot_create_cluster() {
        let state = test_state();
        let resp = create_cluster(State(state), as_user(2), Json(cluster_body("nope")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn cluster_requires_organization_and_unique_name() {
        let state = test_state();
        let resp = create_cluster(State(state.clone()), as_user(3), Json(cluster_body("orphan")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = create_cluster(State(state.clone()), as_user(1), Json(cluster_body("dup")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp = create_cluster(State(state), as_user(1), Json(cluster_body("dup")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn get_nonexistent_cluster() {
        let state = test_state();
        let resp = get_cluster(State(state), as_user(1), Path(42)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admit_reports_initial_status() {
        let state = test_state();
        let resp = create_cluster(State(state.clone()), as_user(1), Json(cluster_body("a")))
            .await
            .into_response();
        let cluster_id = body_json(resp).await["data"]["id"].as_u64().unwrap();

        let resp = create_deployment(
            State(state.clone()),
            as_user(1),
            Json(deployment_body(cluster_id, ResourceVector::new(3, 5, 1))),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["status"], "running");
        let id = body["data"]["id"].as_u64().unwrap();

        let resp = create_deployment(
            State(state.clone()),
            as_user(1),
            Json(deployment_body(cluster_id, ResourceVector::new(15, 25, 10))),
        )
        .await
        .into_response();
        assert_eq!(body_json(resp).await["data"]["status"], "rejected");

        let resp = get_deployment(State(state.clone()), as_user(2), Path(id))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["data"]["image"], "registry.local/train:1");

        let resp = list_cluster_deployments(State(state), as_user(2), Path(cluster_id))
            .await
            .into_response();
        assert_eq!(body_json(resp).await["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn admission_errors_map_to_status_codes() {
        let state = test_state();
        let resp = create_cluster(State(state.clone()), as_user(1), Json(cluster_body("a")))
            .await
            .into_response();
        let cluster_id = body_json(resp).await["data"]["id"].as_u64().unwrap();

        let mut bad_tier = deployment_body(cluster_id, ResourceVector::new(1, 1, 0));
        bad_tier.priority = 5;
        let resp = create_deployment(State(state.clone()), as_user(1), Json(bad_tier))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = create_deployment(
            State(state.clone()),
            as_user(1),
            Json(deployment_body(999, ResourceVector::new(1, 1, 0))),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        // Admin without an organization does not belong to the cluster's.
        let resp = create_deployment(
            State(state.clone()),
            as_user(3),
            Json(deployment_body(cluster_id, ResourceVector::new(1, 1, 0))),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = create_deployment(
            State(state),
            as_user(2),
            Json(deployment_body(cluster_id, ResourceVector::new(1, 1, 0))),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn dispatch_requires_writer_and_existing_cluster() {
        let state = test_state();
        let resp = create_cluster(State(state.clone()), as_user(1), Json(cluster_body("a")))
            .await
            .into_response();
        let cluster_id = body_json(resp).await["data"]["id"].as_u64().unwrap();

        let resp = trigger_dispatch(State(state.clone()), as_user(2), Path(cluster_id))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = trigger_dispatch(State(state.clone()), as_user(1), Path(404))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = trigger_dispatch(State(state), as_user(1), Path(cluster_id))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["outcome"]["kind"], "completed");
        assert_eq!(body["data"]["started"].as_array().unwrap().len(), 0);
    }
}
