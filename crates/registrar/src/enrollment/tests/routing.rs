use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;

use super::common::*;
use crate::config::TransitionPolicy;
use crate::enrollment::enrollment_router;

#[tokio::test]
async fn submit_review_and_approve_over_http() {
    let fx = fixture(TransitionPolicy::Strict);
    let router = enrollment_router(fx.workflow.clone());
    let subject_ids: Vec<i64> = fx.subjects.iter().take(2).map(|s| s.id.0).collect();

    let submitted = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/enrollments",
            Some(fx.student.clone()),
            Some(json!({
                "program_id": fx.program.id,
                "year_level": 1,
                "semester": "1st",
                "school_year": "2024-2025",
                "subject_ids": subject_ids,
            })),
        ))
        .await
        .expect("response");
    assert_eq!(submitted.status(), StatusCode::CREATED);
    let body = read_json(submitted).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["subject_ids"].as_array().expect("ids").len(), 2);
    let id = body["id"].as_i64().expect("enrollment id");

    let queue = router
        .clone()
        .oneshot(json_request(
            "GET",
            "/api/v1/enrollments/pending",
            Some(registrar()),
            None,
        ))
        .await
        .expect("response");
    assert_eq!(queue.status(), StatusCode::OK);
    let queue = read_json(queue).await;
    assert_eq!(queue[0]["enrollment_id"], id);
    assert_eq!(queue[0]["student_name"], "Ana Reyes");

    let approved = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/enrollments/{id}/validate"),
            Some(registrar()),
            Some(json!({ "action": "approve" })),
        ))
        .await
        .expect("response");
    assert_eq!(approved.status(), StatusCode::OK);
    assert_eq!(read_json(approved).await["status"], "approved");

    let repeat = router
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/enrollments/{id}/validate"),
            Some(registrar()),
            Some(json!({ "action": "reject" })),
        ))
        .await
        .expect("response");
    assert_eq!(repeat.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn student_cannot_open_the_review_queue() {
    let fx = fixture(TransitionPolicy::Strict);
    let router = enrollment_router(fx.workflow.clone());

    let response = router
        .oneshot(json_request(
            "GET",
            "/api/v1/enrollments/pending",
            Some(fx.student.clone()),
            None,
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn missing_enrollment_is_not_found() {
    let fx = fixture(TransitionPolicy::Strict);
    let router = enrollment_router(fx.workflow.clone());

    let response = router
        .oneshot(json_request(
            "GET",
            "/api/v1/enrollments/424242",
            Some(registrar()),
            None,
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
