use crate::infra::{resolve_caller, AppState};
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use registrar::accounts::{accounts_router, AccountService, CredentialVerifier};
use registrar::catalog::{catalog_router, CatalogService};
use registrar::config::TransitionPolicy;
use registrar::enrollment::{enrollment_router, EnrollmentWorkflow};
use registrar::storage::RegistrarStore;
use serde_json::json;
use std::sync::Arc;

/// All registrar routes behind the credential resolver, plus the unauthenticated
/// health, readiness and metrics endpoints.
pub(crate) fn build_app<R, V>(store: Arc<R>, verifier: Arc<V>, policy: TransitionPolicy) -> Router
where
    R: RegistrarStore + 'static,
    V: CredentialVerifier + 'static,
{
    let catalog = Arc::new(CatalogService::new(store.clone()));
    let workflow = Arc::new(EnrollmentWorkflow::new(store.clone(), policy));
    let accounts = Arc::new(AccountService::new(store, verifier));

    catalog_router(catalog)
        .merge(enrollment_router(workflow))
        .merge(accounts_router(accounts.clone()))
        .layer(middleware::from_fn_with_state(
            accounts,
            resolve_caller::<R, V>,
        ))
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
