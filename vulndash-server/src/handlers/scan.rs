use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::info;
use vulndash_core::{JobId, JobStatusView, ScanRequest};

use crate::infra::{app_state::AppState, errors::AppResult};

#[derive(Debug, Serialize)]
pub struct ScanAcceptedResponse {
    #[serde(rename = "ID")]
    pub id: JobId,
}

/// `POST /scan`: validate, record and queue. The scan itself runs later.
pub async fn enqueue_scan_handler(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> AppResult<impl IntoResponse> {
    let job = state.enqueuer.enqueue(request).await?;
    info!(job_id = %job.id, image = %job.image, "scan request accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(ScanAcceptedResponse { id: job.id }),
    ))
}

/// `GET /scan/status`: live jobs grouped by status name.
pub async fn scan_status_histogram_handler(
    State(state): State<AppState>,
) -> AppResult<Json<BTreeMap<String, u64>>> {
    Ok(Json(state.status.aggregate_status().await?))
}

pub async fn scan_status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<JobStatusView>> {
    // Malformed ids are InvalidInput, i.e. 400.
    let id: JobId = id.parse()?;
    Ok(Json(state.status.job_status(id).await?))
}
