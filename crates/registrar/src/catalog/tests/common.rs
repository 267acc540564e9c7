use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response};
use chrono::NaiveTime;
use serde_json::Value;

use crate::access::{AccessContext, Role};
use crate::catalog::CatalogService;
use crate::domain::{
    NewClassSchedule, NewProgram, NewSubject, ProgramId, StudentId, SubjectId, UserId,
};
use crate::storage::InMemoryRegistrarStore;

pub(super) fn admin() -> AccessContext {
    AccessContext::new(Role::Admin, "admin", UserId(1))
}

pub(super) fn student() -> AccessContext {
    AccessContext::new(Role::Student, "ana", UserId(2)).with_student(StudentId(5))
}

pub(super) fn build_service() -> (
    Arc<CatalogService<InMemoryRegistrarStore>>,
    Arc<InMemoryRegistrarStore>,
) {
    let store = Arc::new(InMemoryRegistrarStore::new());
    let service = Arc::new(CatalogService::new(store.clone()));
    (service, store)
}

pub(super) fn bscs() -> NewProgram {
    NewProgram {
        code: "BSCS".to_string(),
        name: "Bachelor of Science in Computer Science".to_string(),
    }
}

pub(super) fn subject(
    code: &str,
    program_id: ProgramId,
    prerequisite_id: Option<SubjectId>,
) -> NewSubject {
    NewSubject {
        code: code.to_string(),
        title: format!("{code} lecture"),
        units: 3,
        program_id,
        year_level: 1,
        semester: "1st".to_string(),
        prerequisite_id,
    }
}

pub(super) fn schedule(
    subject_id: SubjectId,
    start: (u32, u32),
    end: (u32, u32),
) -> NewClassSchedule {
    NewClassSchedule {
        subject_id,
        semester: "1st".to_string(),
        day: "Tuesday".to_string(),
        time_start: NaiveTime::from_hms_opt(start.0, start.1, 0).expect("valid time"),
        time_end: NaiveTime::from_hms_opt(end.0, end.1, 0).expect("valid time"),
        room: "LAB-1".to_string(),
        instructor: Some("Prof. Santos".to_string()),
        section: Some("A".to_string()),
    }
}

pub(super) fn json_request(
    method: &str,
    uri: &str,
    context: Option<AccessContext>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(context) = context {
        builder = builder.extension(context);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).expect("serialize body")))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

pub(super) async fn read_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}
