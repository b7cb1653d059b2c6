use super::*;

#[test]
fn test_decodes_full_frame() {
    let event = ProgressEvent::from_payload(
        r#"{"step":"fetching_comments","percent":35,"message":"Fetched 120 of 500",
            "comments_fetched":120,"total_comments":500,"video_id":"abc123","video_title":"Demo"}"#,
    )
    .unwrap();

    assert_eq!(event.step, ProgressStep::FetchingComments);
    assert_eq!(event.percent, 35);
    assert_eq!(event.display_message(), "Fetched 120 of 500");
    assert_eq!(
        event.counters,
        Some(ProgressCounters {
            comments_fetched: 120,
            total_comments: 500
        })
    );
    assert_eq!(event.video_id.as_deref(), Some("abc123"));
    assert_eq!(event.video_title.as_deref(), Some("Demo"));
    assert!(!event.is_terminal());
}

#[test]
fn test_accepts_alternate_field_names() {
    let event = ProgressEvent::from_payload(r#"{"step":"classifying","progress":60,"step_label":"Sorting"}"#).unwrap();
    assert_eq!(event.percent, 60);
    assert_eq!(event.message.as_deref(), Some("Sorting"));
}

#[test]
fn test_missing_message_uses_step_label() {
    let event = ProgressEvent::from_payload(r#"{"step":"saving","percent":95,"message":""}"#).unwrap();
    assert!(event.message.is_none());
    assert_eq!(event.display_message(), "Saving results");
}

#[test]
fn test_unknown_step_is_tolerated() {
    let event = ProgressEvent::from_payload(r#"{"step":"transcribing_audio","percent":40}"#).unwrap();
    assert_eq!(event.step, ProgressStep::Unknown);
    assert_eq!(event.display_message(), "Processing");
}

#[test]
fn test_partial_counters() {
    let event = ProgressEvent::from_payload(r#"{"step":"fetching","percent":10,"total_comments":800}"#).unwrap();
    assert_eq!(
        event.counters,
        Some(ProgressCounters {
            comments_fetched: 0,
            total_comments: 800
        })
    );

    let none = ProgressEvent::from_payload(r#"{"step":"fetching","percent":10}"#).unwrap();
    assert!(none.counters.is_none());
}

#[test]
fn test_failed_step_carries_error() {
    let event =
        ProgressEvent::from_payload(r#"{"step":"failed","percent":50,"error":"Comments are disabled"}"#).unwrap();
    assert!(event.is_terminal());
    assert_eq!(event.error.as_deref(), Some("Comments are disabled"));
}

#[test]
fn test_rejects_invalid_frames() {
    assert!(ProgressEvent::from_payload("not json").is_err());
    assert!(ProgressEvent::from_payload(r#"{"percent":10}"#).is_err());
    assert!(ProgressEvent::from_payload(r#"{"step":"queued"}"#).is_err());
    assert!(ProgressEvent::from_payload(r#"{"step":"queued","percent":101}"#).is_err());
    assert!(ProgressEvent::from_payload(r#"{"step":"queued","percent":-1}"#).is_err());
}

#[test]
fn test_percent_bounds_are_inclusive() {
    assert_eq!(ProgressEvent::from_payload(r#"{"step":"queued","percent":0}"#).unwrap().percent, 0);
    assert_eq!(ProgressEvent::from_payload(r#"{"step":"completed","percent":100}"#).unwrap().percent, 100);
}

#[test]
fn test_step_names_round_trip_through_display() {
    let steps = [
        ProgressStep::Queued,
        ProgressStep::FetchingVideo,
        ProgressStep::AnalyzingSentiment,
        ProgressStep::GeneratingSummary,
        ProgressStep::Completed,
    ];
    for step in steps {
        let json = format!("\"{}\"", step);
        let parsed: ProgressStep = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, step);
    }
}

#[test]
fn test_only_completed_and_failed_are_terminal() {
    assert!(ProgressStep::Completed.is_terminal());
    assert!(ProgressStep::Failed.is_terminal());
    assert!(!ProgressStep::Saving.is_terminal());
    assert!(!ProgressStep::Unknown.is_terminal());
}
