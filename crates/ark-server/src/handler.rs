use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use ark_batch::{BatchCoordinator, BatchSnapshot, UnitCounts};
use ark_fixity::FixityResult;
use ark_storage::AggregatedStorageState;
use ark_types::{BatchId, BatchState, SipId, Timestamp};

use crate::error::{ServerError, ServerResult};

/// Body of `POST /v1/batches`: either a directory holding one SIP per
/// entry, or an explicit SIP list.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateBatchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sips: Vec<SipSource>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SipSource {
    pub sip_id: SipId,
    pub source: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreatedBatch {
    pub batch_id: BatchId,
}

/// One line of the batch listing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub state: BatchState,
    pub units: UnitCounts,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<&BatchSnapshot> for BatchSummary {
    fn from(snapshot: &BatchSnapshot) -> Self {
        Self {
            batch_id: snapshot.batch_id,
            state: snapshot.state,
            units: snapshot.counts(),
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        }
    }
}

fn batch_id(raw: &str) -> ServerResult<BatchId> {
    raw.parse()
        .map_err(|e| ServerError::BadRequest(format!("invalid batch id {raw:?}: {e}")))
}

/// Health check handler.
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "name": "ark-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn list_batches(State(coordinator): State<BatchCoordinator>) -> Json<Vec<BatchSummary>> {
    let summaries = coordinator
        .list_batches()
        .iter()
        .map(BatchSummary::from)
        .collect();
    Json(summaries)
}

pub async fn create_batch(
    State(coordinator): State<BatchCoordinator>,
    Json(request): Json<CreateBatchRequest>,
) -> ServerResult<(StatusCode, Json<CreatedBatch>)> {
    let batch_id = match (request.root, request.sips.is_empty()) {
        (Some(root), true) => {
            tokio::task::spawn_blocking(move || coordinator.create_batch_from_dir(&root))
                .await
                .map_err(|e| ServerError::Internal(e.to_string()))??
        }
        (None, false) => coordinator.create_batch(
            request
                .sips
                .into_iter()
                .map(|s| (s.sip_id, s.source))
                .collect(),
        )?,
        _ => {
            return Err(ServerError::BadRequest(
                "give exactly one of `root` or `sips`".into(),
            ))
        }
    };
    Ok((StatusCode::CREATED, Json(CreatedBatch { batch_id })))
}

pub async fn batch_status(
    State(coordinator): State<BatchCoordinator>,
    Path(id): Path<String>,
) -> ServerResult<Json<BatchSnapshot>> {
    Ok(Json(coordinator.status(batch_id(&id)?)?))
}

pub async fn start_batch(
    State(coordinator): State<BatchCoordinator>,
    Path(id): Path<String>,
) -> ServerResult<Json<BatchSummary>> {
    let id = batch_id(&id)?;
    coordinator.start(id).await?;
    Ok(Json(BatchSummary::from(&coordinator.status(id)?)))
}

pub async fn suspend_batch(
    State(coordinator): State<BatchCoordinator>,
    Path(id): Path<String>,
) -> ServerResult<Json<BatchSummary>> {
    let id = batch_id(&id)?;
    coordinator.suspend(id).await?;
    Ok(Json(BatchSummary::from(&coordinator.status(id)?)))
}

pub async fn resume_batch(
    State(coordinator): State<BatchCoordinator>,
    Path(id): Path<String>,
) -> ServerResult<Json<BatchSummary>> {
    let id = batch_id(&id)?;
    coordinator.resume(id).await?;
    Ok(Json(BatchSummary::from(&coordinator.status(id)?)))
}

pub async fn cancel_batch(
    State(coordinator): State<BatchCoordinator>,
    Path(id): Path<String>,
) -> ServerResult<Json<BatchSummary>> {
    let id = batch_id(&id)?;
    coordinator.cancel(id).await?;
    Ok(Json(BatchSummary::from(&coordinator.status(id)?)))
}

/// Fresh poll of every storage node.
pub async fn storage_state(
    State(coordinator): State<BatchCoordinator>,
) -> Json<AggregatedStorageState> {
    Json(coordinator.storage_state().await)
}

pub async fn sip_fixity(
    State(coordinator): State<BatchCoordinator>,
    Path(sip): Path<String>,
) -> ServerResult<Json<FixityResult>> {
    let sip_id = SipId::new(sip).map_err(|e| ServerError::BadRequest(e.to_string()))?;
    Ok(Json(coordinator.aggregated_fixity(&sip_id).await?))
}
