use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use vulndash_core::{
    DashboardTotals, Report, RepositoryKey, SeverityCounts, Summary,
    cache::SummaryFailure,
};

use crate::infra::{app_state::AppState, errors::AppResult};

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub summaries: Vec<Summary>,
    pub failures: Vec<SummaryFailure>,
    pub totals: DashboardTotals,
    /// Live jobs grouped by status, same as `GET /scan/status`.
    pub jobs: BTreeMap<String, u64>,
}

/// `GET /summary`: every cached repository summary plus roll-ups.
pub async fn dashboard_handler(State(state): State<AppState>) -> AppResult<Json<DashboardResponse>> {
    let mut listing = state.cache.list_summaries().await?;
    listing
        .summaries
        .sort_by(|a, b| a.repository.cmp(&b.repository));
    let totals = listing.totals();
    let jobs = state.status.aggregate_status().await?;

    Ok(Json(DashboardResponse {
        summaries: listing.summaries,
        failures: listing.failures,
        totals,
        jobs,
    }))
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub repository: RepositoryKey,
    pub last_scan: String,
    pub age_secs: u64,
    pub counts: SeverityCounts,
    pub total: u64,
    pub report: Report,
}

/// `GET /report/{*image}`: the cached report for one repository.
pub async fn report_handler(
    State(state): State<AppState>,
    Path(image): Path<String>,
) -> AppResult<Json<ReportResponse>> {
    let repository = RepositoryKey::parse(&image)?;
    let cached = state.cache.get_report(&repository).await?;

    Ok(Json(ReportResponse {
        last_scan: vulndash_core::format_age(cached.age),
        age_secs: cached.age.as_secs(),
        total: cached.counts.total(),
        counts: cached.counts,
        report: cached.report,
        repository,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub image: RepositoryKey,
    /// True when the last scan found any CRITICAL or HIGH vulnerability.
    pub vulnerable: bool,
    pub counts: SeverityCounts,
    pub last_scan: String,
}

/// `POST /summary/check`: gate on the latest summary for one image.
pub async fn check_handler(
    State(state): State<AppState>,
    Json(request): Json<CheckRequest>,
) -> AppResult<Json<CheckResponse>> {
    let repository = RepositoryKey::parse(&request.image)?;
    let summary = state.cache.get_summary(&repository).await?;

    Ok(Json(CheckResponse {
        vulnerable: summary.counts.has_blocking(),
        counts: summary.counts,
        last_scan: summary.last_scan,
        image: repository,
    }))
}
