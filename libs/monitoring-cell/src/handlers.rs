// =====================================================================================
// MONITORING CELL HANDLERS
// =====================================================================================

use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    AlertFilter, CallLogEntry, CallLogQuery, CallOutcome, ClearJobsResponse, ConnectorHealth,
    JobFilter, MaintenanceRequest, MonitoringAlert, MonitoringError, QualityScorecard,
    RemediationJob, RemediationReason, ScenarioQuery, ScenarioReport, ScorecardPeriod,
    ScorecardQuery, SystemSummary, TriggerRemediationRequest,
};
use crate::services::{MonitoringService, Scenario};
use shared_models::error::AppError;

const DEFAULT_CALL_PAGE: usize = 50;
const MAX_CALL_PAGE: usize = 500;

pub struct MonitoringHandlers {
    service: MonitoringService,
}

impl MonitoringHandlers {
    pub fn new(service: MonitoringService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &MonitoringService {
        &self.service
    }
}

impl From<MonitoringError> for AppError {
    fn from(err: MonitoringError) -> Self {
        match err {
            MonitoringError::ConnectorNotFound(_)
            | MonitoringError::AlertNotFound(_)
            | MonitoringError::JobNotFound(_)
            | MonitoringError::UnknownScenario(_) => AppError::NotFound(err.to_string()),
            MonitoringError::InvalidInput(_) => AppError::BadRequest(err.to_string()),
            MonitoringError::Persistence(_) => AppError::Internal(err.to_string()),
        }
    }
}

fn parse_alert_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid alert id: {}", raw)))
}

// =====================================================================================
// OUTCOMES & HEALTH
// =====================================================================================

#[instrument(skip(handlers, outcome), fields(connector_id = %outcome.connector_id))]
pub async fn submit_outcome(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Json(outcome): Json<CallOutcome>,
) -> Result<Json<ConnectorHealth>, AppError> {
    let health = handlers.service.submit_outcome(outcome).await?;
    Ok(Json(health))
}

pub async fn list_health(
    State(handlers): State<Arc<MonitoringHandlers>>,
) -> Result<Json<Vec<ConnectorHealth>>, AppError> {
    Ok(Json(handlers.service.list_health().await))
}

pub async fn get_connector_health(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Path(connector_id): Path<String>,
) -> Result<Json<ConnectorHealth>, AppError> {
    handlers
        .service
        .get_health(&connector_id)
        .await
        .map(Json)
        .ok_or_else(|| MonitoringError::ConnectorNotFound(connector_id).into())
}

#[instrument(skip(handlers))]
pub async fn test_connector(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Path(connector_id): Path<String>,
) -> Result<Json<ConnectorHealth>, AppError> {
    let health = handlers.service.test_connector(&connector_id).await?;
    Ok(Json(health))
}

#[instrument(skip(handlers, request))]
pub async fn set_maintenance(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Path(connector_id): Path<String>,
    Json(request): Json<MaintenanceRequest>,
) -> Result<Json<ConnectorHealth>, AppError> {
    let health = handlers
        .service
        .set_maintenance(&connector_id, request.enabled)
        .await?;
    Ok(Json(health))
}

// =====================================================================================
// ALERTS
// =====================================================================================

pub async fn list_alerts(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Query(filter): Query<AlertFilter>,
) -> Result<Json<Vec<MonitoringAlert>>, AppError> {
    Ok(Json(handlers.service.get_alerts(&filter).await))
}

#[instrument(skip(handlers))]
pub async fn acknowledge_alert(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Path(alert_id): Path<String>,
) -> Result<Json<MonitoringAlert>, AppError> {
    let alert = handlers
        .service
        .acknowledge_alert(parse_alert_id(&alert_id)?)
        .await?;
    Ok(Json(alert))
}

#[instrument(skip(handlers))]
pub async fn resolve_alert(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Path(alert_id): Path<String>,
) -> Result<Json<MonitoringAlert>, AppError> {
    let alert = handlers
        .service
        .resolve_alert(parse_alert_id(&alert_id)?)
        .await?;
    Ok(Json(alert))
}

// =====================================================================================
// SCORECARDS, SUMMARY & CALL LOG
// =====================================================================================

pub async fn get_scorecard(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Path(source_id): Path<String>,
    Query(query): Query<ScorecardQuery>,
) -> Result<Json<QualityScorecard>, AppError> {
    let period = match query.period.as_deref() {
        Some(raw) => raw.parse::<ScorecardPeriod>()?,
        None => ScorecardPeriod::Daily,
    };
    handlers
        .service
        .get_scorecard(&source_id, period)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No connectors for source: {}", source_id)))
}

pub async fn get_summary(
    State(handlers): State<Arc<MonitoringHandlers>>,
) -> Result<Json<SystemSummary>, AppError> {
    Ok(Json(handlers.service.get_system_summary().await))
}

pub async fn query_calls(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Query(query): Query<CallLogQuery>,
) -> Result<Json<Vec<CallLogEntry>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_CALL_PAGE).min(MAX_CALL_PAGE);
    let offset = query.offset.unwrap_or(0);
    Ok(Json(handlers.service.query_calls(limit, offset).await))
}

// =====================================================================================
// REMEDIATION
// =====================================================================================

#[instrument(skip(handlers, request), fields(connector_id = %request.connector_id))]
pub async fn trigger_remediation(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Json(request): Json<TriggerRemediationRequest>,
) -> Result<Json<RemediationJob>, AppError> {
    let job = handlers
        .service
        .trigger_remediation(
            &request.connector_id,
            request.source_id.as_deref(),
            request.reason.unwrap_or(RemediationReason::ManualTrigger),
        )
        .await?;
    Ok(Json(job))
}

pub async fn list_jobs(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Query(filter): Query<JobFilter>,
) -> Result<Json<Vec<RemediationJob>>, AppError> {
    Ok(Json(handlers.service.get_jobs(&filter).await))
}

#[instrument(skip(handlers))]
pub async fn clear_completed_jobs(
    State(handlers): State<Arc<MonitoringHandlers>>,
) -> Result<Json<ClearJobsResponse>, AppError> {
    let cleared = handlers.service.clear_completed_jobs().await;
    Ok(Json(ClearJobsResponse { cleared }))
}

// =====================================================================================
// TEST HARNESS
// =====================================================================================

#[instrument(skip(handlers))]
pub async fn run_scenario(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Path(name): Path<String>,
    Query(query): Query<ScenarioQuery>,
) -> Result<Json<ScenarioReport>, AppError> {
    let scenario = name.parse::<Scenario>()?;
    let report = handlers
        .service
        .run_scenario(scenario, query.connector_id.as_deref())
        .await?;
    Ok(Json(report))
}

#[instrument(skip(handlers))]
pub async fn reset_scenarios(
    State(handlers): State<Arc<MonitoringHandlers>>,
) -> Result<Json<SystemSummary>, AppError> {
    handlers.service.reset().await;
    info!("monitoring state reset via API");
    Ok(Json(handlers.service.get_system_summary().await))
}
