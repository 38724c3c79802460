//! switchyard-api — REST API for Switchyard.
//!
//! Provides axum route handlers for managing deployment groups,
//! driving blue/green deployments, and feeding pool health and
//! metric signals.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | PUT | `/api/v1/groups` | Reconcile a group toward its spec |
//! | GET | `/api/v1/groups` | List all groups |
//! | GET | `/api/v1/groups/:id` | Group state incl. current weights |
//! | DELETE | `/api/v1/groups/:id` | Tear a group down |
//! | POST | `/api/v1/groups/:id/deployments` | Start a deployment |
//! | GET | `/api/v1/deployments/:id` | Deployment state and transitions |
//! | POST | `/api/v1/deployments/:id/cancel` | Cancel and roll back |
//! | POST | `/api/v1/pools/:id/health` | Report pool health |
//! | POST | `/api/v1/pools/:id/metrics` | Feed an alarm metric sample |

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;

use switchyard_control::{DeploymentController, GroupManager};
use switchyard_health::HealthMonitor;
use switchyard_router::TrafficRouter;
use switchyard_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub router: Arc<dyn TrafficRouter>,
    pub monitor: HealthMonitor,
    pub manager: GroupManager,
    pub controller: DeploymentController,
}

impl ApiState {
    pub fn new(store: StateStore, router: Arc<dyn TrafficRouter>, monitor: HealthMonitor) -> Self {
        let manager = GroupManager::new(store.clone(), Arc::clone(&router), monitor.clone());
        let controller = DeploymentController::new(store.clone(), Arc::clone(&router), monitor.clone());
        Self {
            store,
            router,
            monitor,
            manager,
            controller,
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/groups", put(handlers::reconcile_group).get(handlers::list_groups))
        .route("/groups/{id}", get(handlers::get_group).delete(handlers::teardown_group))
        .route("/groups/{id}/deployments", post(handlers::start_deployment))
        .route("/deployments/{id}", get(handlers::get_deployment))
        .route("/deployments/{id}/cancel", post(handlers::cancel_deployment))
        .route("/pools/{id}/health", post(handlers::report_pool_health))
        .route("/pools/{id}/metrics", post(handlers::report_metric))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
