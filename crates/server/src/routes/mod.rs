use axum::{
    Router,
    extract::State,
    http::{Method, StatusCode, header},
    response::IntoResponse,
    routing::{IntoMakeService, get},
};
use deployment::Deployment;
use tower_http::cors::{Any, CorsLayer};

use crate::{DeploymentImpl, metrics};

pub mod artifacts;
pub mod health;
pub mod stream;
pub mod tasks;

/// Handler for the /metrics endpoint that exposes Prometheus metrics
async fn metrics_handler(State(deployment): State<DeploymentImpl>) -> impl IntoResponse {
    metrics::RUNNING_WORKERS.set(deployment.registry().running_count() as i64);
    match metrics::export_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to export metrics: {}", e),
        ),
    }
}

pub fn router(deployment: DeploymentImpl) -> IntoMakeService<Router> {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(Any);

    let router = Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics_handler))
        .merge(tasks::router(&deployment))
        .merge(artifacts::router(&deployment))
        .merge(stream::router(&deployment))
        .layer(cors)
        .with_state(deployment);

    router.into_make_service()
}
