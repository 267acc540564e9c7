use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};

use super::service::{
    AccountService, CredentialVerifier, NewAccount, StudentRegistration, UserUpdate,
};
use crate::access::{require_any, AccessContext};
use crate::blocking::{call, run_blocking};
use crate::domain::{StudentId, StudentProfile, UserId};
use crate::error::RegistrarError;
use crate::storage::RegistrarStore;

type Caller = Option<Extension<AccessContext>>;
type Accounts<R, V> = State<Arc<AccountService<R, V>>>;

pub fn accounts_router<R, V>(service: Arc<AccountService<R, V>>) -> Router
where
    R: RegistrarStore + 'static,
    V: CredentialVerifier + 'static,
{
    Router::new()
        .route("/api/v1/accounts/register", post(register_handler::<R, V>))
        .route(
            "/api/v1/accounts/users",
            get(list_users_handler::<R, V>).post(create_user_handler::<R, V>),
        )
        .route(
            "/api/v1/accounts/users/:user_id",
            put(edit_user_handler::<R, V>).delete(delete_user_handler::<R, V>),
        )
        .route(
            "/api/v1/accounts/students",
            get(list_students_handler::<R, V>),
        )
        .route(
            "/api/v1/accounts/students/:student_id",
            put(edit_student_handler::<R, V>),
        )
        .route(
            "/api/v1/accounts/me",
            get(me_handler).put(update_me_handler::<R, V>),
        )
        .route(
            "/api/v1/accounts/me/profile",
            get(my_profile_handler::<R, V>),
        )
        .with_state(service)
}

fn reply<T: serde::Serialize>(status: StatusCode, result: Result<T, RegistrarError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn register_handler<R, V>(
    State(service): Accounts<R, V>,
    Json(registration): Json<StudentRegistration>,
) -> Response
where
    R: RegistrarStore + 'static,
    V: CredentialVerifier + 'static,
{
    let result = run_blocking(move || service.register_student(registration)).await;
    reply(StatusCode::CREATED, result)
}

pub(crate) async fn list_users_handler<R, V>(
    State(service): Accounts<R, V>,
    context: Caller,
) -> Response
where
    R: RegistrarStore + 'static,
    V: CredentialVerifier + 'static,
{
    let result = call(service, context, |service, caller| {
        service.list_users(caller)
    })
    .await;
    reply(StatusCode::OK, result)
}

pub(crate) async fn create_user_handler<R, V>(
    State(service): Accounts<R, V>,
    context: Caller,
    Json(account): Json<NewAccount>,
) -> Response
where
    R: RegistrarStore + 'static,
    V: CredentialVerifier + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.create_user(caller, account)
    })
    .await;
    reply(StatusCode::CREATED, result)
}

pub(crate) async fn edit_user_handler<R, V>(
    State(service): Accounts<R, V>,
    context: Caller,
    Path(user_id): Path<i64>,
    Json(update): Json<UserUpdate>,
) -> Response
where
    R: RegistrarStore + 'static,
    V: CredentialVerifier + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.edit_user(caller, UserId(user_id), update)
    })
    .await;
    reply(StatusCode::OK, result)
}

pub(crate) async fn delete_user_handler<R, V>(
    State(service): Accounts<R, V>,
    context: Caller,
    Path(user_id): Path<i64>,
) -> Response
where
    R: RegistrarStore + 'static,
    V: CredentialVerifier + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.delete_user(caller, UserId(user_id))
    })
    .await;
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn list_students_handler<R, V>(
    State(service): Accounts<R, V>,
    context: Caller,
) -> Response
where
    R: RegistrarStore + 'static,
    V: CredentialVerifier + 'static,
{
    let result = call(service, context, |service, caller| {
        service.list_students(caller)
    })
    .await;
    reply(StatusCode::OK, result)
}

pub(crate) async fn edit_student_handler<R, V>(
    State(service): Accounts<R, V>,
    context: Caller,
    Path(student_id): Path<i64>,
    Json(profile): Json<StudentProfile>,
) -> Response
where
    R: RegistrarStore + 'static,
    V: CredentialVerifier + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.edit_student(caller, StudentId(student_id), profile)
    })
    .await;
    reply(StatusCode::OK, result)
}

pub(crate) async fn me_handler(context: Caller) -> Response {
    let context = context.as_ref().map(|Extension(context)| context);
    match require_any(context) {
        Ok(context) => (StatusCode::OK, Json(context.clone())).into_response(),
        Err(denied) => RegistrarError::from(denied).into_response(),
    }
}

pub(crate) async fn update_me_handler<R, V>(
    State(service): Accounts<R, V>,
    context: Caller,
    Json(update): Json<UserUpdate>,
) -> Response
where
    R: RegistrarStore + 'static,
    V: CredentialVerifier + 'static,
{
    let result = call(service, context, move |service, caller| {
        service.update_own_account(caller, update)
    })
    .await;
    reply(StatusCode::OK, result)
}

pub(crate) async fn my_profile_handler<R, V>(
    State(service): Accounts<R, V>,
    context: Caller,
) -> Response
where
    R: RegistrarStore + 'static,
    V: CredentialVerifier + 'static,
{
    let result = call(service, context, |service, caller| {
        service.my_profile(caller)
    })
    .await;
    reply(StatusCode::OK, result)
}
