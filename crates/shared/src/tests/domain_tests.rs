use chrono::TimeZone;

use super::*;

fn admin() -> AdminIdentity {
    AdminIdentity::new("uid-1", "Ploy", "ploy@festival.test")
}

#[test]
fn kind_filter_parses_every_ui_value() {
    assert_eq!("all".parse::<KindFilter>(), Ok(KindFilter::All));
    assert_eq!("".parse::<KindFilter>(), Ok(KindFilter::All));
    assert_eq!(
        "status_change".parse::<KindFilter>(),
        Ok(KindFilter::Only(CommentKind::StatusChange))
    );
    assert_eq!(
        "flag".parse::<KindFilter>(),
        Ok(KindFilter::Only(CommentKind::Flag))
    );
    assert!("flags".parse::<KindFilter>().is_err());
}

#[test]
fn kind_filter_round_trips_through_json_as_plain_string() {
    let filter = KindFilter::Only(CommentKind::Scoring);
    let json = serde_json::to_string(&filter).expect("serialize");
    assert_eq!(json, "\"scoring\"");
    let back: KindFilter = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, filter);
}

#[test]
fn synthesized_content_describes_status_and_flag_changes() {
    let status = EventBody::StatusChange {
        old_status: SubmissionStatus::Submitted,
        new_status: SubmissionStatus::UnderReview,
        reason: None,
    };
    assert_eq!(
        status.content(),
        "Status changed from submitted to under_review"
    );

    let flag = EventBody::Flag {
        flagged: true,
        reason: Some("duplicate entry".into()),
    };
    assert_eq!(flag.content(), "Flagged: duplicate entry");
    assert_eq!(
        EventBody::Flag {
            flagged: false,
            reason: None
        }
        .content(),
        "Flag removed"
    );

    let scoring = EventBody::Scoring {
        scores: ScorePayload::new(8, 7, 9, 6, 10),
        content: None,
    };
    assert_eq!(scoring.content(), "Scored 40/50");
}

#[test]
fn change_metadata_uses_camel_case_keys() {
    let status = EventBody::StatusChange {
        old_status: SubmissionStatus::Submitted,
        new_status: SubmissionStatus::Rejected,
        reason: Some("late".into()),
    };
    let meta = status.change_metadata().expect("metadata");
    assert_eq!(meta["oldStatus"], "submitted");
    assert_eq!(meta["newStatus"], "rejected");
    assert_eq!(meta["reason"], "late");

    let general = EventBody::General {
        content: "hi".into(),
    };
    assert!(general.change_metadata().is_none());
}

#[test]
fn event_body_serializes_with_kind_tag() {
    let body = EventBody::Flag {
        flagged: true,
        reason: None,
    };
    let json = serde_json::to_value(&body).expect("serialize");
    assert_eq!(json["kind"], "flag");
    assert_eq!(json["flagged"], true);
}

#[test]
fn timestamp_prefers_server_time() {
    let local = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let server = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();
    let pending = EventTimestamp::local(local);
    assert_eq!(pending.instant(), local);
    assert_eq!(pending.source(), TimeSource::LocalFallback);

    let confirmed = EventTimestamp {
        server_time: Some(server),
        local_fallback: local,
    };
    assert_eq!(confirmed.instant(), server);
    assert_eq!(confirmed.source(), TimeSource::Server);
}

#[test]
fn sort_newest_first_breaks_ties_by_id() {
    let when = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let event = |id: i64| CommentEvent {
        id: EventId(id),
        submission_id: SubmissionId(1),
        author: admin(),
        created_at: EventTimestamp {
            server_time: Some(when),
            local_fallback: when,
        },
        updated_at: None,
        is_edited: false,
        is_deleted: false,
        body: EventBody::General {
            content: format!("comment {id}"),
        },
    };
    let mut events = vec![event(1), event(3), event(2)];
    sort_newest_first(&mut events);
    let ids: Vec<_> = events.iter().map(|e| e.id.0).collect();
    assert_eq!(ids, vec![3, 2, 1]);
}

#[test]
fn patch_applies_only_present_fields() {
    let now = Utc::now();
    let mut record = SubmissionRecord {
        id: SubmissionId(4),
        title: "Rain on Nimman".into(),
        director_name: "Kaew".into(),
        applicant_email: "kaew@example.test".into(),
        category: "student".into(),
        status: SubmissionStatus::Submitted,
        flagged: true,
        flag_reason: Some("check rights".into()),
        admin_notes: "first pass".into(),
        scores: Vec::new(),
        submitted_at: now,
        updated_at: now,
    };
    SubmissionPatch {
        flagged: Some(false),
        flag_reason: Some(None),
        ..SubmissionPatch::default()
    }
    .apply_to(&mut record);
    assert!(!record.flagged);
    assert_eq!(record.flag_reason, None);
    assert_eq!(record.status, SubmissionStatus::Submitted);
    assert_eq!(record.admin_notes, "first pass");
}

#[test]
fn status_parses_dashed_and_snake_forms() {
    assert_eq!(
        "under-review".parse::<SubmissionStatus>(),
        Ok(SubmissionStatus::UnderReview)
    );
    assert_eq!(
        "Accepted".parse::<SubmissionStatus>(),
        Ok(SubmissionStatus::Accepted)
    );
    assert!("pending".parse::<SubmissionStatus>().is_err());
}
