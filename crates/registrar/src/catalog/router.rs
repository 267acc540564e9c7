use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use serde::Serialize;

use super::service::CatalogService;
use crate::access::AccessContext;
use crate::blocking::call;
use crate::domain::{
    NewClassSchedule, NewProgram, NewSubject, Program, ProgramId, ScheduleId, SubjectId,
};
use crate::error::RegistrarError;
use crate::storage::RegistrarStore;

type Caller = Option<Extension<AccessContext>>;
type Catalog<R> = State<Arc<CatalogService<R>>>;

/// Router exposing catalog CRUD. The caller's [`AccessContext`] is read from request
/// extensions; requests without one are treated as anonymous.
pub fn catalog_router<R>(service: Arc<CatalogService<R>>) -> Router
where
    R: RegistrarStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/catalog/programs",
            get(list_programs::<R>).post(create_program::<R>),
        )
        .route(
            "/api/v1/catalog/programs/:program_id",
            get(show_program::<R>)
                .put(update_program::<R>)
                .delete(delete_program::<R>),
        )
        .route(
            "/api/v1/catalog/subjects",
            get(list_subjects::<R>).post(create_subject::<R>),
        )
        .route(
            "/api/v1/catalog/subjects/:subject_id",
            get(show_subject::<R>)
                .put(update_subject::<R>)
                .delete(delete_subject::<R>),
        )
        .route(
            "/api/v1/catalog/subjects/:subject_id/prerequisites",
            get(subject_prerequisites::<R>),
        )
        .route(
            "/api/v1/catalog/schedules",
            get(list_schedules::<R>).post(create_schedule::<R>),
        )
        .route(
            "/api/v1/catalog/schedules/:schedule_id",
            get(show_schedule::<R>)
                .put(update_schedule::<R>)
                .delete(delete_schedule::<R>),
        )
        .with_state(service)
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, RegistrarError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => {
            tracing::debug!(%error, "catalog request failed");
            error.into_response()
        }
    }
}

fn respond_empty(result: Result<(), RegistrarError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => {
            tracing::debug!(%error, "catalog request failed");
            error.into_response()
        }
    }
}

pub(crate) async fn list_programs<R>(State(service): Catalog<R>, context: Caller) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.list_programs(caller)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn create_program<R>(
    State(service): Catalog<R>,
    context: Caller,
    Json(program): Json<NewProgram>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.add_program(caller, program)
    })
    .await;
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn show_program<R>(
    State(service): Catalog<R>,
    context: Caller,
    Path(program_id): Path<i64>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.get_program(caller, ProgramId(program_id))
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn update_program<R>(
    State(service): Catalog<R>,
    context: Caller,
    Path(program_id): Path<i64>,
    Json(program): Json<NewProgram>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let program = Program {
        id: ProgramId(program_id),
        code: program.code,
        name: program.name,
    };
    let result = call(service, context, move |service, caller| {
        service.edit_program(caller, program)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn delete_program<R>(
    State(service): Catalog<R>,
    context: Caller,
    Path(program_id): Path<i64>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.delete_program(caller, ProgramId(program_id))
    })
    .await;
    respond_empty(result)
}

pub(crate) async fn list_subjects<R>(State(service): Catalog<R>, context: Caller) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.list_subjects(caller)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn create_subject<R>(
    State(service): Catalog<R>,
    context: Caller,
    Json(subject): Json<NewSubject>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.add_subject(caller, subject)
    })
    .await;
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn show_subject<R>(
    State(service): Catalog<R>,
    context: Caller,
    Path(subject_id): Path<i64>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.get_subject(caller, SubjectId(subject_id))
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn update_subject<R>(
    State(service): Catalog<R>,
    context: Caller,
    Path(subject_id): Path<i64>,
    Json(subject): Json<NewSubject>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let subject = subject.with_id(SubjectId(subject_id));
    let result = call(service, context, move |service, caller| {
        service.edit_subject(caller, subject)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn delete_subject<R>(
    State(service): Catalog<R>,
    context: Caller,
    Path(subject_id): Path<i64>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.delete_subject(caller, SubjectId(subject_id))
    })
    .await;
    respond_empty(result)
}

pub(crate) async fn subject_prerequisites<R>(
    State(service): Catalog<R>,
    context: Caller,
    Path(subject_id): Path<i64>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.prerequisites_of(caller, SubjectId(subject_id))
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn list_schedules<R>(State(service): Catalog<R>, context: Caller) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.list_schedules(caller)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn create_schedule<R>(
    State(service): Catalog<R>,
    context: Caller,
    Json(schedule): Json<NewClassSchedule>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.add_schedule(caller, schedule)
    })
    .await;
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn show_schedule<R>(
    State(service): Catalog<R>,
    context: Caller,
    Path(schedule_id): Path<i64>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.get_schedule(caller, ScheduleId(schedule_id))
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn update_schedule<R>(
    State(service): Catalog<R>,
    context: Caller,
    Path(schedule_id): Path<i64>,
    Json(schedule): Json<NewClassSchedule>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let schedule = schedule.with_id(ScheduleId(schedule_id));
    let result = call(service, context, move |service, caller| {
        service.edit_schedule(caller, schedule)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn delete_schedule<R>(
    State(service): Catalog<R>,
    context: Caller,
    Path(schedule_id): Path<i64>,
) -> Response
where
    R: RegistrarStore + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.delete_schedule(caller, ScheduleId(schedule_id))
    })
    .await;
    respond_empty(result)
}
