//! Small internal axum surface used to drive and observe deployments:
//! request a change, apply pending changes (which queues and starts a
//! deployment), cancel a change or an in-flight deployment, and read a
//! deployment's current status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument};
use zane_common::log::LogRecorder;
use zane_common::model::{ChangeType, Deployment, Environment};
use zane_common::{ChangeId, DeploymentId, ErrorKind, ServiceId};
use zane_docker::ContainerDriver;
use zane_orchestrator::deployment::{self, CancellationSignal, DeploymentContext};
use zane_orchestrator::ledger::{ChangeLedger, NewChange};
use zane_orchestrator::{Error as OrchestratorError, Persistence, SemaphoreRegistry};
use zane_proxy::ProxyAdminClient;

/// Everything a request handler needs to build a [`DeploymentContext`] and
/// drive the change ledger, shared across requests behind an `Arc`.
pub struct AppState {
    pub persistence: Persistence,
    pub driver: Arc<dyn ContainerDriver>,
    pub proxy: ProxyAdminClient,
    pub semaphore: SemaphoreRegistry,
    pub log_recorder: Arc<dyn LogRecorder>,
    pub http_client: reqwest::Client,
    pub root_domain: String,
    pub git_token: Option<String>,
    pub frontend_internal_hostname: String,
    /// Cancellation signal for every deployment run currently in flight, so
    /// a `/cancel` request reaches the task actually driving it.
    cancellations: Mutex<HashMap<DeploymentId, CancellationSignal>>,
}

impl AppState {
    pub fn new(
        persistence: Persistence,
        driver: Arc<dyn ContainerDriver>,
        proxy: ProxyAdminClient,
        semaphore: SemaphoreRegistry,
        log_recorder: Arc<dyn LogRecorder>,
        http_client: reqwest::Client,
        root_domain: String,
        git_token: Option<String>,
        frontend_internal_hostname: String,
    ) -> Self {
        Self {
            persistence,
            driver,
            proxy,
            semaphore,
            log_recorder,
            http_client,
            root_domain,
            git_token,
            frontend_internal_hostname,
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    /// Builds the borrowed bundle a deployment workflow run needs, scoped to
    /// one service's environment.
    fn context_for<'a>(&'a self, project_slug: String, environment: &Environment) -> DeploymentContext<'a> {
        DeploymentContext {
            persistence: &self.persistence,
            driver: &*self.driver,
            proxy: &self.proxy,
            semaphore: &self.semaphore,
            log_recorder: &*self.log_recorder,
            http_client: self.http_client.clone(),
            root_domain: self.root_domain.clone(),
            project_slug,
            environment_id: environment.id,
            environment_network_name: environment.network_name.clone(),
            git_token: self.git_token.clone(),
            frontend_internal_hostname: self.frontend_internal_hostname.clone(),
        }
    }

    fn register_cancellation(&self, id: DeploymentId) -> CancellationSignal {
        let signal = CancellationSignal::new();
        self.cancellations.lock().unwrap().insert(id, signal.clone());
        signal
    }

    fn cancellation_for(&self, id: DeploymentId) -> Option<CancellationSignal> {
        self.cancellations.lock().unwrap().get(&id).cloned()
    }

    fn forget_cancellation(&self, id: DeploymentId) {
        self.cancellations.lock().unwrap().remove(&id);
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/services/:service_id/changes", post(request_change))
        .route("/services/:service_id/changes/:change_id", delete(cancel_change))
        .route("/services/:service_id/deploy", post(deploy))
        .route("/deployments/:deployment_id", get(get_deployment))
        .route("/deployments/:deployment_id/cancel", post(cancel_deployment))
        .with_state(state)
}

/// Maps an [`OrchestratorError`] onto the HTTP status its `ErrorKind`
/// represents, folded onto a single JSON body.
pub struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidChange | ErrorKind::Conflict | ErrorKind::EtagConflict => StatusCode::CONFLICT,
            ErrorKind::Fatal => StatusCode::BAD_REQUEST,
            ErrorKind::Cancelled => StatusCode::GONE,
            ErrorKind::CloneFailed
            | ErrorKind::CheckoutFailed
            | ErrorKind::BuildFailed
            | ErrorKind::ImagePullFailed
            | ErrorKind::HealthcheckUnhealthy
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ApiErrorBody { kind: self.0.kind(), message: self.0.reason() })).into_response()
    }
}

#[derive(Serialize)]
struct ApiErrorBody {
    kind: ErrorKind,
    message: String,
}

#[derive(Deserialize)]
struct RequestChangeBody {
    field: String,
    change_type: ChangeType,
    new_value: Value,
    #[serde(default)]
    old_value: Option<Value>,
    #[serde(default)]
    item_id: Option<String>,
}

#[instrument(skip(state, body))]
async fn request_change(
    State(state): State<Arc<AppState>>,
    Path(service_id): Path<ServiceId>,
    Json(body): Json<RequestChangeBody>,
) -> Result<Json<zane_common::Change>, ApiError> {
    let ledger = ChangeLedger::new(&state.persistence);
    let change = ledger
        .request_change(
            service_id,
            NewChange {
                field: body.field,
                change_type: body.change_type,
                new_value: body.new_value,
                old_value: body.old_value,
                item_id: body.item_id,
            },
        )
        .await?;
    Ok(Json(change))
}

#[instrument(skip(state))]
async fn cancel_change(
    State(state): State<Arc<AppState>>,
    Path((service_id, change_id)): Path<(ServiceId, ChangeId)>,
) -> Result<StatusCode, ApiError> {
    let ledger = ChangeLedger::new(&state.persistence);
    ledger.cancel_change(service_id, change_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Applies every pending change for a service, then spawns the deployment
/// workflow for the resulting deployment and returns it immediately in its
/// `Queued` state. The workflow itself runs in the background, holding the
/// per-service semaphore for the duration of the run.
#[instrument(skip(state))]
async fn deploy(State(state): State<Arc<AppState>>, Path(service_id): Path<ServiceId>) -> Result<Json<Deployment>, ApiError> {
    let ledger = ChangeLedger::new(&state.persistence);
    let (_snapshot, queued) = ledger.apply(service_id).await?;

    let service = state.persistence.get_service(service_id).await?;
    let environment = state.persistence.get_environment(service.environment_id).await?;
    let project_slug = state.persistence.project_slug_for_service(service_id).await?;

    let signal = state.register_cancellation(queued.id);
    let deployment_id = queued.id;
    let spawned_state = Arc::clone(&state);
    tokio::spawn(async move {
        let permit = spawned_state.semaphore.acquire(&SemaphoreRegistry::deploy_key(&service_id.to_string())).await;
        let ctx = spawned_state.context_for(project_slug.clone(), &environment);
        if let Err(err) = deployment::run(&ctx, &project_slug, deployment_id, &signal).await {
            error!(%err, %deployment_id, "deployment workflow failed");
        } else {
            info!(%deployment_id, "deployment workflow finished");
        }
        spawned_state.semaphore.release(permit);
        spawned_state.forget_cancellation(deployment_id);
    });

    Ok(Json(queued))
}

#[instrument(skip(state))]
async fn get_deployment(
    State(state): State<Arc<AppState>>,
    Path(deployment_id): Path<DeploymentId>,
) -> Result<Json<Deployment>, ApiError> {
    let deployment = state.persistence.get_deployment(deployment_id).await?;
    Ok(Json(deployment))
}

/// Requests cancellation of a deployment that's currently being driven by
/// this process. A deployment this process isn't running (already finished,
/// or owned by a different replica) has no registered signal and is
/// reported as not found rather than silently accepted.
#[instrument(skip(state))]
async fn cancel_deployment(
    State(state): State<Arc<AppState>>,
    Path(deployment_id): Path<DeploymentId>,
) -> Result<StatusCode, ApiError> {
    let signal = state.cancellation_for(deployment_id).ok_or_else(|| {
        OrchestratorError::from(zane_common::Error::custom(
            ErrorKind::NotFound,
            format!("deployment {deployment_id} is not in flight on this node"),
        ))
    })?;

    let deployment = state.persistence.get_deployment(deployment_id).await?;
    let service = state.persistence.get_service(deployment.service_id).await?;
    let environment = state.persistence.get_environment(service.environment_id).await?;
    let project_slug = state.persistence.project_slug_for_service(deployment.service_id).await?;

    let ctx = state.context_for(project_slug, &environment);
    deployment::request_cancellation(&ctx, deployment_id, &signal).await?;
    Ok(StatusCode::ACCEPTED)
}
