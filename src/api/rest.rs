//! REST API Handlers
//!
//! Volume endpoints over a single [`VolumeDriver`]. Paths carry logical
//! volume names; the driver maps them to storage-side names.

use crate::domain::ports::VolumeDriverRef;
use crate::domain::types::{
    AccessInfo, CreateOutcome, HostInfo, Snapshot, StoragePool, VolumeRecord, VolumeRequest,
};
use crate::error::{Error, ErrorKind, Result};
use crate::metrics::DriverMetrics;
use crate::sizing::parse_size;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Volume create request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeRequest {
    pub name: String,
    /// Size (e.g. "1Gi", "1073741824"); empty uses the pool default
    #[serde(default)]
    pub size: String,
    /// Pool to create in; defaults to the first pool. Clones stay with
    /// their source and ignore it.
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Logical name of the volume to clone
    #[serde(default)]
    pub clone_source: Option<String>,
    #[serde(default)]
    pub clone_snapshot: Option<String>,
}

/// Volume create response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeResponse {
    pub name: String,
    pub internal_name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeVolumeRequest {
    pub size: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeVolumeResponse {
    pub size_bytes: u64,
    pub resized: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameVolumeRequest {
    pub new_name: String,
}

/// Import of a volume created outside the driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportVolumeRequest {
    /// Storage-side name of the existing volume
    pub original_name: String,
    /// Logical name to adopt it under
    pub name: String,
    #[serde(default)]
    pub not_managed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportVolumeResponse {
    pub name: String,
    pub internal_name: String,
    pub size_bytes: u64,
    pub managed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSnapshotRequest {
    pub name: String,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    driver: VolumeDriverRef,
    metrics: DriverMetrics,
}

impl RestRouter {
    pub fn new(driver: VolumeDriverRef, metrics: DriverMetrics) -> Self {
        Self { driver, metrics }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            driver: self.driver,
            metrics: self.metrics,
        };

        Router::new()
            .route("/v1/volumes", post(create_volume).get(list_volumes))
            .route("/v1/volumes/import", post(import_volume))
            .route("/v1/volumes/:name", get(get_volume).delete(delete_volume))
            .route("/v1/volumes/:name/resize", post(resize_volume))
            .route("/v1/volumes/:name/rename", post(rename_volume))
            .route("/v1/volumes/:name/publish", post(publish_volume))
            .route(
                "/v1/volumes/:name/snapshots",
                get(list_snapshots).post(create_snapshot),
            )
            .route("/v1/volumes/:name/snapshots/:snapshot", delete(delete_snapshot))
            .route(
                "/v1/volumes/:name/snapshots/:snapshot/restore",
                post(restore_snapshot),
            )
            .route("/v1/pools", get(list_pools))
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    driver: VolumeDriverRef,
    metrics: DriverMetrics,
}

impl AppState {
    fn internal_name(&self, name: &str) -> String {
        self.driver.internal_volume_name(name)
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

fn status_for(error: &Error) -> StatusCode {
    match error.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AdoptionValidationFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::AggregatedPlacementFailure => StatusCode::INSUFFICIENT_STORAGE,
        ErrorKind::RemoteOperationFailed => StatusCode::BAD_GATEWAY,
        ErrorKind::Configuration | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(operation: &str, e: &Error) -> Response {
    let status = status_for(e);
    if status.is_server_error() {
        error!(operation = %operation, error = %e, "Request failed");
    } else {
        warn!(operation = %operation, error = %e, "Request rejected");
    }
    (
        status,
        Json(ApiErrorResponse {
            error: format!("{}_failed", operation),
            message: e.to_string(),
            details: e.is_retryable().then(|| "retryable".to_string()),
        }),
    )
        .into_response()
}

/// Record the outcome and turn it into a response
fn respond<T>(
    state: &AppState,
    operation: &str,
    started: Instant,
    result: Result<T>,
    ok: impl FnOnce(T) -> Response,
) -> Response {
    state.metrics.observe(operation, started, &result);
    match result {
        Ok(value) => ok(value),
        Err(e) => error_response(operation, &e),
    }
}

fn select_pool(state: &AppState, name: Option<&str>) -> Result<StoragePool> {
    let pools = state.driver.storage_pools();
    match name {
        Some(name) => pools.into_iter().find(|p| p.name == name).ok_or_else(|| {
            Error::InvalidOption {
                name: "pool".to_string(),
                reason: format!("unknown pool {}", name),
            }
        }),
        None => pools
            .into_iter()
            .next()
            .ok_or_else(|| Error::Configuration("backend offers no pools".into())),
    }
}

/// The pool pinned to an aggregate, used to find a source volume's pool
fn pool_of_aggregate(state: &AppState, aggregate: &str) -> Option<StoragePool> {
    state
        .driver
        .storage_pools()
        .into_iter()
        .find(|p| p.aggregate.as_deref() == Some(aggregate))
}

// =============================================================================
// Handlers
// =============================================================================

/// What a create or clone call produced
struct CreateReply {
    status: StatusCode,
    label: &'static str,
    aggregate: Option<String>,
    size_bytes: Option<u64>,
    warnings: Vec<String>,
    access: Option<AccessInfo>,
}

impl CreateReply {
    fn unchanged(status: StatusCode, label: &'static str) -> Self {
        Self {
            status,
            label,
            aggregate: None,
            size_bytes: None,
            warnings: Vec::new(),
            access: None,
        }
    }
}

async fn create_or_clone(
    state: &AppState,
    body: &CreateVolumeRequest,
    request: &mut VolumeRequest,
) -> Result<CreateReply> {
    if let Some(source) = body.clone_source.as_deref() {
        request.clone_source_internal = Some(state.internal_name(source));
        request.clone_source_snapshot = body.clone_snapshot.clone();
        let source_record = state
            .driver
            .get_volume_external(&state.internal_name(source))
            .await?;
        let source_pool = pool_of_aggregate(state, &source_record.pool);
        state.driver.create_clone(request, source_pool.as_ref()).await?;

        let clone_record = state.driver.get_volume_external(&request.internal_name).await?;
        return Ok(CreateReply {
            aggregate: Some(clone_record.pool),
            size_bytes: Some(clone_record.size_bytes),
            access: state.driver.create_followup(request).await?,
            ..CreateReply::unchanged(StatusCode::CREATED, "cloned")
        });
    }

    let pool = select_pool(state, body.pool.as_deref())?;
    match state.driver.create(request, &pool).await? {
        CreateOutcome::Created {
            aggregate,
            size_bytes,
            warnings,
        } => Ok(CreateReply {
            status: StatusCode::CREATED,
            label: "created",
            aggregate: Some(aggregate),
            size_bytes: Some(size_bytes),
            warnings: warnings.iter().map(ToString::to_string).collect(),
            access: state.driver.create_followup(request).await?,
        }),
        CreateOutcome::AlreadyExists => Ok(CreateReply::unchanged(StatusCode::OK, "exists")),
        CreateOutcome::CreateJobExists => {
            Ok(CreateReply::unchanged(StatusCode::ACCEPTED, "pending"))
        }
    }
}

/// Create a volume, or clone one when a source is given
async fn create_volume(
    State(state): State<AppState>,
    Json(body): Json<CreateVolumeRequest>,
) -> Response {
    info!(volume = %body.name, "Creating volume");
    let started = Instant::now();
    let mut request = VolumeRequest::new(&body.name, state.internal_name(&body.name), &body.size);
    request.options = body.options.clone();

    let result = create_or_clone(&state, &body, &mut request).await;
    respond(&state, "create", started, result, |reply| {
        (
            reply.status,
            Json(CreateVolumeResponse {
                name: body.name,
                internal_name: request.internal_name,
                status: reply.label.to_string(),
                aggregate: reply.aggregate,
                size_bytes: reply.size_bytes,
                warnings: reply.warnings,
                access: reply.access,
            }),
        )
            .into_response()
    })
}

/// List every managed volume
async fn list_volumes(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let result: Result<Vec<VolumeRecord>> = state.driver.enumerate().try_collect().await;
    respond(&state, "list", started, result, |records| {
        (StatusCode::OK, Json(records)).into_response()
    })
}

async fn get_volume(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let started = Instant::now();
    let result = state.driver.get_volume_external(&state.internal_name(&name)).await;
    respond(&state, "get", started, result, |record| {
        (StatusCode::OK, Json(record)).into_response()
    })
}

async fn delete_volume(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    info!(volume = %name, "Deleting volume");
    let started = Instant::now();
    let result = state.driver.destroy(&state.internal_name(&name)).await;
    respond(&state, "delete", started, result, |_| {
        StatusCode::NO_CONTENT.into_response()
    })
}

async fn resize_volume(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ResizeVolumeRequest>,
) -> Response {
    let started = Instant::now();
    let internal_name = state.internal_name(&name);
    let result = match parse_size(&body.size) {
        Ok(size_bytes) => state.driver.resize(&internal_name, size_bytes).await,
        Err(e) => Err(e),
    };
    respond(&state, "resize", started, result, |outcome| {
        (
            StatusCode::OK,
            Json(ResizeVolumeResponse {
                size_bytes: outcome.size_bytes,
                resized: outcome.resized,
                warnings: outcome.warnings.iter().map(ToString::to_string).collect(),
            }),
        )
            .into_response()
    })
}

async fn rename_volume(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<RenameVolumeRequest>,
) -> Response {
    let started = Instant::now();
    let result = state
        .driver
        .rename(&state.internal_name(&name), &state.internal_name(&body.new_name))
        .await;
    respond(&state, "rename", started, result, |()| {
        StatusCode::NO_CONTENT.into_response()
    })
}

async fn publish_volume(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(host): Json<HostInfo>,
) -> Response {
    let started = Instant::now();
    let result = state.driver.publish(&state.internal_name(&name), &host).await;
    respond(&state, "publish", started, result, |access| {
        (StatusCode::OK, Json(access)).into_response()
    })
}

async fn import_volume(
    State(state): State<AppState>,
    Json(body): Json<ImportVolumeRequest>,
) -> Response {
    info!(volume = %body.original_name, name = %body.name, "Importing volume");
    let started = Instant::now();
    let internal_name = if body.not_managed {
        body.original_name.clone()
    } else {
        state.internal_name(&body.name)
    };
    let mut request = VolumeRequest::new(&body.name, &internal_name, "");
    request.import_not_managed = body.not_managed;

    let result = state.driver.import(&request, &body.original_name).await;
    let name = body.name.clone();
    respond(&state, "import", started, result, |outcome| {
        (
            StatusCode::OK,
            Json(ImportVolumeResponse {
                name,
                internal_name,
                size_bytes: outcome.size_bytes,
                managed: outcome.managed,
            }),
        )
            .into_response()
    })
}

async fn list_snapshots(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let started = Instant::now();
    let result = state.driver.list_snapshots(&state.internal_name(&name)).await;
    respond(&state, "list_snapshots", started, result, |snapshots: Vec<Snapshot>| {
        (StatusCode::OK, Json(snapshots)).into_response()
    })
}

async fn create_snapshot(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<CreateSnapshotRequest>,
) -> Response {
    let started = Instant::now();
    let result = state
        .driver
        .create_snapshot(&state.internal_name(&name), &body.name)
        .await;
    respond(&state, "create_snapshot", started, result, |snapshot| {
        (StatusCode::CREATED, Json(snapshot)).into_response()
    })
}

async fn delete_snapshot(
    State(state): State<AppState>,
    Path((name, snapshot)): Path<(String, String)>,
) -> Response {
    let started = Instant::now();
    let result = state
        .driver
        .delete_snapshot(&state.internal_name(&name), &snapshot)
        .await;
    respond(&state, "delete_snapshot", started, result, |()| {
        StatusCode::NO_CONTENT.into_response()
    })
}

async fn restore_snapshot(
    State(state): State<AppState>,
    Path((name, snapshot)): Path<(String, String)>,
) -> Response {
    let started = Instant::now();
    let result = state
        .driver
        .restore_snapshot(&state.internal_name(&name), &snapshot)
        .await;
    respond(&state, "restore_snapshot", started, result, |()| {
        StatusCode::NO_CONTENT.into_response()
    })
}

async fn list_pools(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.driver.storage_pools()))
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
