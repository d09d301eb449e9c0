//! Status HTTP server.
//!
//! Read-only view of the daemon's job reports for dashboards and scripts.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use thiserror::Error;

use crate::job::JobReport;
use crate::pipeline::SharedReports;

/// Errors that can occur when running the status server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind status server: {0}")]
    Bind(#[from] std::io::Error),
}

async fn get_health() -> &'static str {
    "ok"
}

/// Returns every job report from this daemon run, oldest first.
async fn get_jobs(State(reports): State<SharedReports>) -> Json<Vec<JobReport>> {
    let reports = reports.read().await.clone();
    Json(reports)
}

/// Creates the axum router for the status endpoints.
pub fn create_status_router(reports: SharedReports) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/jobs", get(get_jobs))
        .with_state(reports)
}

/// Runs the status HTTP server on 127.0.0.1:7979.
pub async fn run_status_server(reports: SharedReports) -> Result<(), ServerError> {
    let app = create_status_router(reports);
    let addr = SocketAddr::from(([127, 0, 0, 1], 7979));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
