use std::sync::Arc;

use registrar::access::{AccessContext, Role};
use registrar::catalog::CatalogService;
use registrar::config::TransitionPolicy;
use registrar::domain::{
    EnrollmentStatus, NewProgram, NewSubject, NewUser, StudentProfile, UserId, ValidationAction,
};
use registrar::enrollment::{EnrollmentRequest, EnrollmentWorkflow};
use registrar::storage::{
    EnrollmentRepository, InMemoryRegistrarStore, ProgramRepository, RegistrarStore,
    SqliteRegistrarStore, SubjectRepository, UserRepository,
};
use registrar::RegistrarError;

fn admin() -> AccessContext {
    AccessContext::new(Role::Admin, "admin", UserId(1))
}

fn registrar() -> AccessContext {
    AccessContext::new(Role::Registrar, "registrar", UserId(2))
}

fn seed_student<R: RegistrarStore>(store: &R) -> AccessContext {
    let (user, student) = store
        .insert_user(
            NewUser {
                username: "juan".to_string(),
                password_hash: "hash".to_string(),
                role: Role::Student,
            },
            Some(StudentProfile {
                first_name: "Juan".to_string(),
                last_name: "Dela Cruz".to_string(),
                ..StudentProfile::default()
            }),
        )
        .expect("student account");
    let student = student.expect("student row");
    AccessContext::new(Role::Student, user.username, user.id).with_student(student.id)
}

fn run_scenario<R: RegistrarStore + 'static>(store: Arc<R>) {
    let catalog = CatalogService::new(store.clone());
    let workflow = EnrollmentWorkflow::new(store.clone(), TransitionPolicy::Strict);
    let admin = admin();

    let program = catalog
        .add_program(
            Some(&admin),
            NewProgram {
                code: "BSCS".to_string(),
                name: "Computer Science".to_string(),
            },
        )
        .expect("program");
    let subject_ids: Vec<_> = ["CS101", "MATH101"]
        .into_iter()
        .map(|code| {
            catalog
                .add_subject(
                    Some(&admin),
                    NewSubject {
                        code: code.to_string(),
                        title: format!("{code} lecture"),
                        units: 3,
                        program_id: program.id,
                        year_level: 1,
                        semester: "1st".to_string(),
                        prerequisite_id: None,
                    },
                )
                .expect("subject")
                .id
        })
        .collect();
    let student = seed_student(store.as_ref());

    let record = workflow
        .submit(
            Some(&student),
            EnrollmentRequest {
                program_id: program.id,
                year_level: 1,
                semester: "1st".to_string(),
                school_year: "2024-2025".to_string(),
                subject_ids: subject_ids.clone(),
            },
        )
        .expect("submitted");
    assert_eq!(record.enrollment.status, EnrollmentStatus::Pending);

    let stored = store
        .fetch_enrollment(record.enrollment.id)
        .expect("fetch")
        .expect("enrollment row");
    assert_eq!(stored.subject_ids, subject_ids);

    let queue = workflow.list_pending(Some(&registrar())).expect("queue");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].student_name, "Juan Dela Cruz");

    let approved = workflow
        .validate(
            Some(&registrar()),
            record.enrollment.id,
            ValidationAction::Approve,
        )
        .expect("approved");
    assert_eq!(approved.status, EnrollmentStatus::Approved);
    assert!(workflow
        .list_pending(Some(&registrar()))
        .expect("queue")
        .is_empty());

    let second = workflow.validate(
        Some(&registrar()),
        record.enrollment.id,
        ValidationAction::Reject,
    );
    assert!(matches!(
        second,
        Err(RegistrarError::InvalidStateTransition { .. })
    ));
}

#[test]
fn scenario_runs_against_the_memory_store() {
    run_scenario(Arc::new(InMemoryRegistrarStore::new()));
}

#[test]
fn scenario_runs_against_sqlite() {
    let store = SqliteRegistrarStore::open_in_memory().expect("sqlite store");
    run_scenario(Arc::new(store));
}

#[test]
fn sqlite_store_keeps_rows_across_reopen() {
    let path = std::env::temp_dir().join(format!(
        "registrar-reopen-{}-{}.db",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));

    {
        let store = SqliteRegistrarStore::open(&path).expect("open");
        store
            .insert_program(NewProgram {
                code: "BSIT".to_string(),
                name: "Information Technology".to_string(),
            })
            .expect("program");
    }

    let reopened = SqliteRegistrarStore::open(&path).expect("reopen");
    let programs = reopened.list_programs().expect("list");
    assert_eq!(programs.len(), 1);
    assert_eq!(programs[0].code, "BSIT");
    assert!(reopened.list_subjects().expect("subjects").is_empty());

    drop(reopened);
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
    }
}

#[test]
fn student_catalog_writes_change_nothing_in_sqlite() {
    let store = Arc::new(SqliteRegistrarStore::open_in_memory().expect("sqlite store"));
    let catalog = CatalogService::new(store.clone());
    let student = seed_student(store.as_ref());

    let err = catalog
        .add_program(
            Some(&student),
            NewProgram {
                code: "BSCS".to_string(),
                name: "Computer Science".to_string(),
            },
        )
        .expect_err("student denied");
    assert!(matches!(err, RegistrarError::Unauthorized(_)));
    assert!(store.list_programs().expect("list").is_empty());
}
