use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response};
use serde_json::Value;

use crate::access::{AccessContext, Role};
use crate::config::TransitionPolicy;
use crate::domain::{NewProgram, NewSubject, NewUser, Program, StudentProfile, Subject, UserId};
use crate::enrollment::{EnrollmentRequest, EnrollmentWorkflow};
use crate::storage::{InMemoryRegistrarStore, ProgramRepository, SubjectRepository, UserRepository};

pub(super) struct Fixture {
    pub(super) store: Arc<InMemoryRegistrarStore>,
    pub(super) workflow: Arc<EnrollmentWorkflow<InMemoryRegistrarStore>>,
    pub(super) program: Program,
    pub(super) subjects: Vec<Subject>,
    pub(super) student: AccessContext,
}

pub(super) fn registrar() -> AccessContext {
    AccessContext::new(Role::Registrar, "registrar", UserId(900))
}

pub(super) fn fixture(policy: TransitionPolicy) -> Fixture {
    let store = Arc::new(InMemoryRegistrarStore::new());
    let program = store
        .insert_program(NewProgram {
            code: "BSCS".to_string(),
            name: "Computer Science".to_string(),
        })
        .expect("program");
    let subjects = ["CS101", "MATH101", "ENG101"]
        .into_iter()
        .map(|code| {
            store
                .insert_subject(NewSubject {
                    code: code.to_string(),
                    title: format!("{code} lecture"),
                    units: 3,
                    program_id: program.id,
                    year_level: 1,
                    semester: "1st".to_string(),
                    prerequisite_id: None,
                })
                .expect("subject")
        })
        .collect();
    let student = enrolled_student(&store, "ana", "Ana", "Reyes");

    Fixture {
        workflow: Arc::new(EnrollmentWorkflow::new(store.clone(), policy)),
        store,
        program,
        subjects,
        student,
    }
}

pub(super) fn enrolled_student(
    store: &InMemoryRegistrarStore,
    username: &str,
    first_name: &str,
    last_name: &str,
) -> AccessContext {
    let (user, student) = store
        .insert_user(
            NewUser {
                username: username.to_string(),
                password_hash: "unused".to_string(),
                role: Role::Student,
            },
            Some(StudentProfile {
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                ..StudentProfile::default()
            }),
        )
        .expect("student account");
    let student = student.expect("linked student");
    AccessContext::new(Role::Student, user.username, user.id).with_student(student.id)
}

impl Fixture {
    pub(super) fn request(&self, subject_count: usize) -> EnrollmentRequest {
        EnrollmentRequest {
            program_id: self.program.id,
            year_level: 1,
            semester: "1st".to_string(),
            school_year: "2024-2025".to_string(),
            subject_ids: self
                .subjects
                .iter()
                .take(subject_count)
                .map(|subject| subject.id)
                .collect(),
        }
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
