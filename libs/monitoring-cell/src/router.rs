// =====================================================================================
// MONITORING CELL ROUTER
// =====================================================================================

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers::{
    acknowledge_alert, clear_completed_jobs, get_connector_health, get_scorecard, get_summary,
    list_alerts, list_health, list_jobs, query_calls, reset_scenarios, resolve_alert,
    run_scenario, set_maintenance, submit_outcome, test_connector, trigger_remediation,
    MonitoringHandlers,
};

pub fn create_monitoring_router(handlers: Arc<MonitoringHandlers>) -> Router {
    // Read-only views for the dashboard
    let query_routes = Router::new()
        .route("/health", get(list_health))
        .route("/health/{connector_id}", get(get_connector_health))
        .route("/alerts", get(list_alerts))
        .route("/scorecards/{source_id}", get(get_scorecard))
        .route("/summary", get(get_summary))
        .route("/calls", get(query_calls))
        .route("/remediation/jobs", get(list_jobs))
        .with_state(handlers.clone());

    // Commands from the host and operators
    let command_routes = Router::new()
        .route("/outcomes", post(submit_outcome))
        .route("/health/{connector_id}/test", post(test_connector))
        .route("/health/{connector_id}/maintenance", post(set_maintenance))
        .route("/alerts/{id}/acknowledge", post(acknowledge_alert))
        .route("/alerts/{id}/resolve", post(resolve_alert))
        .route("/remediation", post(trigger_remediation))
        .route("/remediation/jobs/clear", post(clear_completed_jobs))
        .with_state(handlers.clone());

    let scenario_routes = Router::new()
        .route("/scenarios/reset", post(reset_scenarios))
        .route("/scenarios/{name}", post(run_scenario))
        .with_state(handlers);

    Router::new()
        .merge(query_routes)
        .merge(command_routes)
        .merge(scenario_routes)
        .layer(CorsLayer::permissive())
}
