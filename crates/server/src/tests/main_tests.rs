use super::*;
use axum::{body, body::Body, http::Request};
use serde_json::{json, Value};
use shared::domain::{AdminIdentity, NewSubmission};
use storage::MemoryStorage;
use tower::ServiceExt;

async fn test_app() -> (Router, Arc<MemoryStorage>, i64) {
    let backend = Arc::new(MemoryStorage::new());
    let store = CommentLogStore::new(backend.clone());
    let submission = store
        .create_submission(NewSubmission {
            title: "Old City Walls".into(),
            director_name: "Pim".into(),
            applicant_email: "pim@example.test".into(),
            category: "documentary".into(),
        })
        .await
        .expect("submission");
    let app = build_router(Arc::new(AppState {
        api: ReviewContext::new(store),
    }));
    (app, backend, submission.id.0)
}

fn admin_json(id: &str) -> Value {
    json!({ "id": id, "name": format!("Admin {id}"), "email": format!("{id}@festival.test") })
}

fn json_request(method: &str, uri: String, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, backend, _id) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");

    backend.set_available(false);
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn comment_routes_add_and_filter() {
    let (app, _backend, id) = test_app().await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            format!("/submissions/{id}/comments"),
            json!({ "admin": admin_json("A"), "content": "Nice pacing" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = read_json(response).await;
    assert_eq!(created["body"]["kind"], "general");

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            format!("/submissions/{id}/flag"),
            json!({ "admin": admin_json("A"), "flagged": true, "reason": "runtime" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::get(format!("/submissions/{id}/comments?filter=flag"))
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let flags = read_json(response).await;
    assert_eq!(flags.as_array().map(Vec::len), Some(1));

    let request = Request::get(format!("/submissions/{id}/comments"))
        .body(Body::empty())
        .expect("request");
    let all = read_json(app.clone().oneshot(request).await.expect("response")).await;
    assert_eq!(all.as_array().map(Vec::len), Some(2));

    let request = Request::get(format!("/submissions/{id}/comments?filter=bogus"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rescoring_replaces_entry_and_updates_summary() {
    let (app, _backend, id) = test_app().await;
    for scores in [
        json!({ "technical": 5, "story": 5, "creativity": 5, "chiangmai": 5, "humanEffort": 5 }),
        json!({ "technical": 8, "story": 7, "creativity": 9, "chiangmai": 6, "humanEffort": 10, "totalScore": 40 }),
    ] {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                format!("/submissions/{id}/scores"),
                json!({ "admin": admin_json("A"), "scores": scores }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let request = Request::get(format!("/submissions/{id}/scores/summary"))
        .body(Body::empty())
        .expect("request");
    let summary = read_json(app.clone().oneshot(request).await.expect("response")).await;
    assert_eq!(summary["count"], 1);
    assert_eq!(summary["average_total"], 40.0);

    let request = Request::get(format!("/submissions/{id}/scores/latest?admin_id=A"))
        .body(Body::empty())
        .expect("request");
    let latest = read_json(app.clone().oneshot(request).await.expect("response")).await;
    assert_eq!(latest["totalScore"], 40);

    let request = Request::get(format!("/submissions/{id}/scores/latest?admin_id=B"))
        .body(Body::empty())
        .expect("request");
    let none = read_json(app.oneshot(request).await.expect("response")).await;
    assert!(none.is_null());
}

#[tokio::test]
async fn mismatched_total_is_a_bad_request() {
    let (app, _backend, id) = test_app().await;
    let response = app
        .oneshot(json_request(
            "POST",
            format!("/submissions/{id}/scores"),
            json!({
                "admin": admin_json("A"),
                "scores": { "technical": 8, "story": 7, "creativity": 9, "chiangmai": 6, "humanEffort": 10, "totalScore": 41 }
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = read_json(response).await;
    assert_eq!(error["code"], "validation");
}

#[tokio::test]
async fn oversized_or_negative_criteria_are_validation_errors() {
    let (app, _backend, id) = test_app().await;
    for scores in [
        json!({ "technical": 300, "story": 0, "creativity": 0, "chiangmai": 0, "humanEffort": 0 }),
        json!({ "technical": 0, "story": -2, "creativity": 0, "chiangmai": 0, "humanEffort": 0 }),
    ] {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                format!("/submissions/{id}/scores"),
                json!({ "admin": admin_json("A"), "scores": scores }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["code"], "validation");
    }
}

#[tokio::test]
async fn only_author_may_edit_then_delete() {
    let (app, _backend, id) = test_app().await;
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            format!("/submissions/{id}/comments"),
            json!({ "admin": admin_json("A"), "content": "draft" }),
        ))
        .await
        .expect("response");
    let event_id = read_json(response).await["id"].as_i64().expect("event id");

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            format!("/submissions/{id}/comments/{event_id}"),
            json!({ "admin": admin_json("B"), "content": "hijack" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            format!("/submissions/{id}/comments/{event_id}"),
            json!({ "admin": admin_json("A"), "content": "final" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["is_edited"], true);

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(json_request(
                "DELETE",
                format!("/submissions/{id}/comments/{event_id}"),
                json!({ "admin": admin_json("A") }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}

#[tokio::test]
async fn status_change_and_export_download() {
    let (app, _backend, id) = test_app().await;
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            format!("/submissions/{id}/status"),
            json!({ "admin": admin_json("A"), "new_status": "under_review" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let update = read_json(response).await;
    assert_eq!(update["record"]["status"], "under_review");

    let request = Request::get(format!("/submissions/{id}/export"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    assert_eq!(
        disposition.as_deref(),
        Some(format!("attachment; filename=\"submission-{id}-review.json\"").as_str())
    );
    let export = read_json(response).await;
    assert_eq!(
        export["comments"][0]["content"],
        "Status changed from submitted to under_review"
    );
    assert_eq!(export["comments"][0]["metadata"]["newStatus"], "under_review");
}

#[tokio::test]
async fn unknown_submission_and_offline_storage_map_to_statuses() {
    let (app, backend, _id) = test_app().await;
    let request = Request::get("/submissions/999")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    backend.set_available(false);
    let response = app
        .oneshot(json_request(
            "POST",
            "/submissions/1/comments".to_string(),
            json!({ "admin": admin_json("A"), "content": "lost" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(read_json(response).await["code"], "storage_unavailable");
}

#[tokio::test]
async fn notes_update_returns_record() {
    let (app, _backend, id) = test_app().await;
    let response = app
        .oneshot(json_request(
            "PUT",
            format!("/submissions/{id}/notes"),
            json!({ "admin": admin_json("A"), "notes": "check subtitles" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["admin_notes"], "check subtitles");
}

#[tokio::test]
async fn snapshot_feed_holds_only_the_newest_set_for_a_slow_reader() {
    let backend = Arc::new(MemoryStorage::new());
    let api = ReviewContext::new(CommentLogStore::new(backend));
    let submission = api
        .store
        .create_submission(NewSubmission {
            title: "Flower Festival".into(),
            director_name: "Ton".into(),
            applicant_email: "ton@example.test".into(),
            category: "short".into(),
        })
        .await
        .expect("submission");
    let (_subscription, mut feed) = snapshot_feed(&api, submission.id);

    for n in 0..5 {
        let admin = AdminIdentity::new("A", "Admin A", "A@festival.test");
        add_comment(&api, submission.id, admin, &format!("note {n}"))
            .await
            .expect("comment");
    }

    let pending = |feed: &SnapshotFeed| feed.borrow().as_ref().map_or(0, Vec::len);
    tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while pending(&feed) < 5 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("all comments delivered");

    let newest = feed.borrow_and_update().clone().expect("snapshot");
    assert_eq!(newest.len(), 5);
    assert_eq!(newest[0].content(), "note 4");
    assert!(!feed.has_changed().expect("feed open"));
}
