use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};

use super::service::{EnrollmentRequest, EnrollmentWorkflow, ValidationRequest};
use crate::access::AccessContext;
use crate::blocking::call;
use crate::domain::EnrollmentId;
use crate::storage::RegistrarStore;

type Caller = Option<Extension<AccessContext>>;

/// Router builder exposing submission, review queue, and validation endpoints.
pub fn enrollment_router<R>(workflow: Arc<EnrollmentWorkflow<R>>) -> Router
where
    R: RegistrarStore + 'static,
{
    Router::new()
        .route("/api/v1/enrollments", post(submit_handler::<R>))
        .route("/api/v1/enrollments/pending", get(pending_handler::<R>))
        .route("/api/v1/enrollments/:enrollment_id", get(show_handler::<R>))
        .route(
            "/api/v1/enrollments/:enrollment_id/validate",
            post(validate_handler::<R>),
        )
        .with_state(workflow)
}

pub(crate) async fn submit_handler<R>(
    State(workflow): State<Arc<EnrollmentWorkflow<R>>>,
    context: Caller,
    Json(request): Json<EnrollmentRequest>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(workflow, context, move |workflow, caller| {
        workflow.submit(caller, request)
    })
    .await;
    match result {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(error) => {
            tracing::debug!(%error, "enrollment submission refused");
            error.into_response()
        }
    }
}

pub(crate) async fn pending_handler<R>(
    State(workflow): State<Arc<EnrollmentWorkflow<R>>>,
    context: Caller,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(workflow, context, move |workflow, caller| {
        workflow.list_pending(caller)
    })
    .await;
    match result {
        Ok(pending) => (StatusCode::OK, Json(pending)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn show_handler<R>(
    State(workflow): State<Arc<EnrollmentWorkflow<R>>>,
    context: Caller,
    Path(enrollment_id): Path<i64>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(workflow, context, move |workflow, caller| {
        workflow.get(caller, EnrollmentId(enrollment_id))
    })
    .await;
    match result {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn validate_handler<R>(
    State(workflow): State<Arc<EnrollmentWorkflow<R>>>,
    context: Caller,
    Path(enrollment_id): Path<i64>,
    Json(request): Json<ValidationRequest>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let id = EnrollmentId(enrollment_id);
    let result = call(workflow, context, move |workflow, caller| {
        workflow.validate_action(caller, id, &request.action)
    })
    .await;
    match result {
        Ok(enrollment) => (StatusCode::OK, Json(enrollment)).into_response(),
        Err(error) => {
            tracing::debug!(enrollment = %id, %error, "validation refused");
            error.into_response()
        }
    }
}
