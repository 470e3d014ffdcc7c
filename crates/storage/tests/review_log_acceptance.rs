use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{
        AdminIdentity, CommentKind, EventBody, KindFilter, NewCommentEvent, NewSubmission,
        ScoreEntry, ScorePayload,
    },
    scoring::{latest_score_by_author, score_drift},
};
use storage::{CommentLogStore, RecordChange, SqliteStorage};

fn score_event(
    author: &AdminIdentity,
    submission_id: shared::domain::SubmissionId,
    payload: ScorePayload,
) -> (NewCommentEvent, RecordChange) {
    let entry = ScoreEntry {
        author_id: author.id.clone(),
        author_name: author.name.clone(),
        scores: payload,
        comment: None,
        scored_at: Utc::now(),
    };
    (
        NewCommentEvent::now(
            submission_id,
            author.clone(),
            EventBody::Scoring {
                scores: payload,
                content: None,
            },
        ),
        RecordChange::ReplaceScore(entry),
    )
}

#[tokio::test]
async fn rescoring_replaces_list_entry_and_survives_reopen() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("review.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let admin = AdminIdentity::new("admin-a", "Arthit", "arthit@festival.test");
    let submission_id = {
        let store = CommentLogStore::new(Arc::new(
            SqliteStorage::new(&database_url).await.expect("db"),
        ));
        let submission_id = store
            .create_submission(NewSubmission {
                title: "Doi Suthep at Dawn".into(),
                director_name: "Mali".into(),
                applicant_email: "mali@example.test".into(),
                category: "open".into(),
            })
            .await
            .expect("submission")
            .id;

        for payload in [ScorePayload::new(5, 5, 5, 5, 5), ScorePayload::new(8, 7, 9, 6, 10)] {
            let (event, change) = score_event(&admin, submission_id, payload);
            store
                .append_with_change(event, change)
                .await
                .expect("score");
        }
        submission_id
    };

    let reopened = CommentLogStore::new(Arc::new(
        SqliteStorage::new(&database_url).await.expect("reopen"),
    ));
    let record = reopened
        .get_submission(submission_id)
        .await
        .expect("record");
    assert_eq!(record.scores.len(), 1);
    assert_eq!(record.scores[0].scores.total_score, 40);

    let events = reopened
        .list(submission_id, KindFilter::Only(CommentKind::Scoring))
        .await
        .expect("events");
    assert_eq!(events.len(), 2);
    assert_eq!(
        latest_score_by_author(&events, &admin.id).map(|s| s.total_score),
        Some(40)
    );
    assert!(score_drift(&events, &record.scores).is_empty());
}
