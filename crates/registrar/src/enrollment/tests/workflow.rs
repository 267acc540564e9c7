use super::common::*;

use crate::access::{AccessContext, AccessDenied, Role};
use crate::config::TransitionPolicy;
use crate::domain::{EnrollmentId, EnrollmentStatus, SubjectId, UserId, ValidationAction};
use crate::error::RegistrarError;
use crate::storage::StudentRepository;

#[test]
fn submitted_enrollment_is_pending_with_every_subject() {
    let fx = fixture(TransitionPolicy::Strict);

    let record = fx
        .workflow
        .submit(Some(&fx.student), fx.request(2))
        .expect("submitted");

    assert_eq!(record.enrollment.status, EnrollmentStatus::Pending);
    assert_eq!(record.subject_ids.len(), 2);
    assert_eq!(fx.store.enrollment_subject_rows().expect("rows"), 2);

    let fetched = fx
        .workflow
        .get(Some(&fx.student), record.enrollment.id)
        .expect("owner can read");
    assert_eq!(fetched.subject_ids, record.subject_ids);

    let student_id = fx.student.student_id.expect("linked");
    let student = fx
        .store
        .fetch_student(student_id)
        .expect("fetch")
        .expect("student");
    assert_eq!(student.program_id, Some(fx.program.id));
    assert_eq!(student.year_level, Some(1));
}

#[test]
fn approval_removes_the_enrollment_from_the_queue() {
    let fx = fixture(TransitionPolicy::Strict);
    let registrar = registrar();
    let record = fx
        .workflow
        .submit(Some(&fx.student), fx.request(2))
        .expect("submitted");

    let pending = fx.workflow.list_pending(Some(&registrar)).expect("queue");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].student_name, "Ana Reyes");
    assert_eq!(pending[0].enrollment_id, record.enrollment.id);

    let approved = fx
        .workflow
        .validate(
            Some(&registrar),
            record.enrollment.id,
            ValidationAction::Approve,
        )
        .expect("approved");
    assert_eq!(approved.status, EnrollmentStatus::Approved);
    assert!(fx
        .workflow
        .list_pending(Some(&registrar))
        .expect("queue")
        .is_empty());
}

#[test]
fn strict_policy_refuses_a_second_decision() {
    let fx = fixture(TransitionPolicy::Strict);
    let registrar = registrar();
    let id = fx
        .workflow
        .submit(Some(&fx.student), fx.request(1))
        .expect("submitted")
        .enrollment
        .id;

    fx.workflow
        .validate(Some(&registrar), id, ValidationAction::Approve)
        .expect("approve");
    let err = fx
        .workflow
        .validate(Some(&registrar), id, ValidationAction::Reject)
        .expect_err("already decided");

    match err {
        RegistrarError::InvalidStateTransition { from, to, .. } => {
            assert_eq!(from, EnrollmentStatus::Approved);
            assert_eq!(to, EnrollmentStatus::Rejected);
        }
        other => panic!("unexpected error: {other}"),
    }
    let stored = fx.workflow.get(Some(&registrar), id).expect("fetch");
    assert_eq!(stored.enrollment.status, EnrollmentStatus::Approved);
}

#[test]
fn permissive_policy_keeps_the_last_decision() {
    let fx = fixture(TransitionPolicy::Permissive);
    let registrar = registrar();
    let id = fx
        .workflow
        .submit(Some(&fx.student), fx.request(1))
        .expect("submitted")
        .enrollment
        .id;

    fx.workflow
        .validate(Some(&registrar), id, ValidationAction::Approve)
        .expect("approve");
    let rejected = fx
        .workflow
        .validate(Some(&registrar), id, ValidationAction::Reject)
        .expect("overwrite");
    assert_eq!(rejected.status, EnrollmentStatus::Rejected);

    let again = fx
        .workflow
        .validate(Some(&registrar), id, ValidationAction::Reject)
        .expect("repeat");
    assert_eq!(again.status, EnrollmentStatus::Rejected);
}

#[test]
fn admin_is_not_a_registrar() {
    let fx = fixture(TransitionPolicy::Strict);
    let admin = AccessContext::new(Role::Admin, "root", UserId(1));
    let id = fx
        .workflow
        .submit(Some(&fx.student), fx.request(1))
        .expect("submitted")
        .enrollment
        .id;

    let err = fx
        .workflow
        .validate(Some(&admin), id, ValidationAction::Approve)
        .expect_err("admin denied");
    assert!(matches!(
        err,
        RegistrarError::Unauthorized(AccessDenied::RoleMismatch { .. })
    ));
    assert!(matches!(
        fx.workflow.list_pending(Some(&admin)),
        Err(RegistrarError::Unauthorized(_))
    ));
}

#[test]
fn only_students_submit() {
    let fx = fixture(TransitionPolicy::Strict);
    let err = fx
        .workflow
        .submit(Some(&registrar()), fx.request(1))
        .expect_err("registrar cannot submit");
    assert!(matches!(err, RegistrarError::Unauthorized(_)));
    assert!(fx.workflow.submit(None, fx.request(1)).is_err());
    assert_eq!(fx.store.enrollment_subject_rows().expect("rows"), 0);
}

#[test]
fn empty_or_repeated_selections_are_refused() {
    let fx = fixture(TransitionPolicy::Strict);

    let empty = fx
        .workflow
        .submit(Some(&fx.student), fx.request(0))
        .expect_err("empty");
    assert!(matches!(empty, RegistrarError::InvalidInput(_)));

    let mut repeated = fx.request(1);
    repeated.subject_ids.push(repeated.subject_ids[0]);
    let err = fx
        .workflow
        .submit(Some(&fx.student), repeated)
        .expect_err("repeated");
    assert!(matches!(err, RegistrarError::DuplicateKey(_)));
}

#[test]
fn unknown_subject_leaves_nothing_behind() {
    let fx = fixture(TransitionPolicy::Strict);
    let mut request = fx.request(2);
    request.subject_ids.push(SubjectId(4040));

    let err = fx
        .workflow
        .submit(Some(&fx.student), request)
        .expect_err("missing subject");
    assert!(matches!(
        err,
        RegistrarError::InvalidReference {
            entity: "subject",
            id: 4040
        }
    ));
    assert_eq!(fx.store.enrollment_subject_rows().expect("rows"), 0);
    assert!(fx
        .workflow
        .list_pending(Some(&registrar()))
        .expect("queue")
        .is_empty());
}

#[test]
fn students_cannot_read_each_others_enrollments() {
    let fx = fixture(TransitionPolicy::Strict);
    let other = enrolled_student(&fx.store, "ben", "Ben", "Cruz");
    let id = fx
        .workflow
        .submit(Some(&fx.student), fx.request(1))
        .expect("submitted")
        .enrollment
        .id;

    let err = fx.workflow.get(Some(&other), id).expect_err("not owner");
    assert!(matches!(
        err,
        RegistrarError::Unauthorized(AccessDenied::NotOwner { .. })
    ));
}

#[test]
fn queue_is_ordered_oldest_first() {
    let fx = fixture(TransitionPolicy::Strict);
    let other = enrolled_student(&fx.store, "ben", "Ben", "Cruz");
    let first = fx
        .workflow
        .submit(Some(&fx.student), fx.request(1))
        .expect("first");
    let second = fx
        .workflow
        .submit(Some(&other), fx.request(2))
        .expect("second");

    let queue = fx.workflow.list_pending(Some(&registrar())).expect("queue");
    let ids: Vec<EnrollmentId> = queue.iter().map(|row| row.enrollment_id).collect();
    assert_eq!(ids, vec![first.enrollment.id, second.enrollment.id]);
}

#[test]
fn unknown_action_text_is_invalid_input() {
    let fx = fixture(TransitionPolicy::Strict);
    let id = fx
        .workflow
        .submit(Some(&fx.student), fx.request(1))
        .expect("submitted")
        .enrollment
        .id;

    let err = fx
        .workflow
        .validate_action(Some(&registrar()), id, "archive")
        .expect_err("unknown action");
    assert!(matches!(err, RegistrarError::InvalidInput(_)));

    let missing = fx
        .workflow
        .validate_action(Some(&registrar()), EnrollmentId(9999), "approve")
        .expect_err("missing enrollment");
    assert!(matches!(missing, RegistrarError::NotFound { .. }));
}
