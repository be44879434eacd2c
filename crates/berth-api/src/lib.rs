//! berth-api: REST API for berth.
//!
//! Every `/api/v1` route identifies its caller by the `x-berth-user`
//! header, which carries a user id. The header is trusted: authentication
//! happens in front of this service.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/clusters` | List clusters |
//! | POST | `/api/v1/clusters` | Create a cluster in the caller's organization |
//! | GET | `/api/v1/clusters/{id}` | Cluster with total, allocated and available |
//! | GET | `/api/v1/clusters/{id}/deployments` | Deployments on a cluster |
//! | POST | `/api/v1/clusters/{id}/dispatch` | Run a dispatch pass |
//! | GET | `/api/v1/deployments` | List deployments |
//! | POST | `/api/v1/deployments` | Admit a deployment |
//! | GET | `/api/v1/deployments/{id}` | Get a deployment |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use berth_scheduler::Engine;

/// Header carrying the caller's user id.
pub const USER_HEADER: &str = "x-berth-user";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Engine,
}

/// Build the complete API router.
pub fn build_router(engine: Engine) -> Router {
    let api_state = ApiState { engine };

    let api_routes = Router::new()
        .route("/clusters", get(handlers::list_clusters).post(handlers::create_cluster))
        .route("/clusters/{id}", get(handlers::get_cluster))
        .route("/clusters/{id}/deployments", get(handlers::list_cluster_deployments))
        .route("/clusters/{id}/dispatch", post(handlers::trigger_dispatch))
        .route("/deployments", get(handlers::list_deployments).post(handlers::create_deployment))
        .route("/deployments/{id}", get(handlers::get_deployment))
        .with_state(api_state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
