//! Dev session scenario tests.

use std::time::Duration;

use enumset::EnumSet;

use super::*;
use crate::compiler::tests::{Probe, n, tape};
use crate::plugin::Stage;

const WAIT: Duration = Duration::from_secs(5);

fn options() -> DevOptions {
    DevOptions {
        debounce: Duration::from_millis(5),
    }
}

async fn next(session: &mut DevSession) -> DevEvent {
    tokio::time::timeout(WAIT, session.next_event())
        .await
        .expect("timed out waiting for a dev event")
        .expect("dev session stopped")
}

/// Skip the `Start` that precedes every pass and return how it ended.
async fn finished(session: &mut DevSession) -> DevEvent {
    let start = next(session).await;
    assert_eq!(start.name(), "start");
    next(session).await
}

#[test]
fn test_state_stays_busy_from_update_to_compile() {
    let state = DevState::default();
    state.pending.fetch_add(1, Ordering::SeqCst);
    assert!(state.is_busy());

    state.applied(true);
    assert!(state.is_busy());
    state.compiling();
    assert!(state.is_busy());
    state.compiled();
    assert!(!state.is_busy());

    state.pending.fetch_add(1, Ordering::SeqCst);
    state.applied(false);
    assert!(!state.is_busy());
}

const SITE: &[(&str, &str)] = &[
    (
        "/index.html",
        r#"<link rel="stylesheet" href="style.css"><link rel="stylesheet" href="other.css"><style>p {}</style>"#,
    ),
    ("/style.css", "body {}"),
    ("/other.css", "a {}"),
];

#[tokio::test]
async fn test_initial_pass_then_update() {
    let (probe, counts) = Probe::new("probe", &[], EnumSet::only(Stage::Transform));
    let mut session = tape(SITE, vec![probe]).dev(options());

    let ready = finished(&mut session).await;
    assert_eq!(ready.name(), "ready");
    assert_eq!(ready.output().unwrap().entry, "/index.html");
    assert_eq!(n(&counts.transform), 4);
    assert!(!session.is_busy());

    let ids = session
        .update(
            Update::new()
                .file("/style.css", "@import 'new.css';")
                .file("/new.css", "b {}"),
        )
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert!(session.is_busy());

    let DevEvent::Update { ids: event_ids } = next(&mut session).await else {
        panic!("expected an update event");
    };
    assert_eq!(event_ids, ids);

    let DevEvent::End(report) = finished(&mut session).await else {
        panic!("expected the pass to succeed");
    };
    assert!(report.is_latest);
    assert!(!session.is_busy());
    assert!(report.ended_at >= report.started_at);
    assert_eq!(report.output.content("/new.css"), Some("b {}"));
    assert_eq!(report.output.content("/style.css"), Some("@import '/new.css';"));
    // style, new, index and its inline style
    assert_eq!(n(&counts.transform), 8);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_on_change_follows_dependants() {
    let (probe, counts) = Probe::new("probe", &[], EnumSet::only(Stage::Change));
    let mut session = tape(
        &[
            (
                "/index.html",
                r#"<link rel="stylesheet" href="style.css"><link rel="stylesheet" href="not-triggered.css"><style>p {}</style>"#,
            ),
            ("/style.css", "@import 'reset.css';"),
            ("/reset.css", "* {}"),
            ("/not-triggered.css", "a {}"),
        ],
        vec![probe],
    )
    .dev(options());
    assert_eq!(finished(&mut session).await.name(), "ready");

    session
        .update(Update::new().file("/reset.css", "* { margin: 0 }"))
        .await
        .unwrap();
    assert_eq!(n(&counts.change), 4);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_each_kind_of_update_reports_one_id() {
    let mut session = tape(SITE, vec![]).dev(options());
    finished(&mut session).await;

    let updates = [
        Update::new().file("/created.css", ""),
        Update::new().file("/other.css", "a { color: red }"),
        Update::new().remove("/created.css"),
        Update::new().entry("/style.css"),
    ];
    for update in updates {
        let ids = session.update(update).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(next(&mut session).await.name(), "update");
        assert_eq!(finished(&mut session).await.name(), "end");
    }

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_update_emits_nothing() {
    let mut session = tape(SITE, vec![]).dev(options());
    finished(&mut session).await;

    assert!(session.update(Update::new()).await.unwrap().is_empty());
    assert!(
        session
            .update(Update::new().file("/style.css", "body {}"))
            .await
            .unwrap()
            .is_empty()
    );
    session
        .update(Update::new().file("/style.css", "body { margin: 0 }"))
        .await
        .unwrap();

    let DevEvent::Update { ids } = next(&mut session).await else {
        panic!("expected the real update to be the next event");
    };
    assert_eq!(ids.len(), 1);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_pass_recovers_on_next_edit() {
    let mut session = tape(SITE, vec![]).dev(options());
    finished(&mut session).await;

    session.update(Update::new().remove("/style.css")).await.unwrap();
    assert_eq!(next(&mut session).await.name(), "update");
    let DevEvent::Error { error, .. } = finished(&mut session).await else {
        panic!("expected the pass to fail");
    };
    assert!(error.to_string().contains("not found"));

    session
        .update(Update::new().file("/style.css", "body { color: blue }"))
        .await
        .unwrap();
    assert_eq!(next(&mut session).await.name(), "update");
    let DevEvent::End(report) = finished(&mut session).await else {
        panic!("expected the pass to succeed");
    };
    assert_eq!(report.output.content("/style.css"), Some("body { color: blue }"));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_update_is_rejected() {
    let mut session = tape(SITE, vec![]).dev(options());
    finished(&mut session).await;

    let err = session
        .update(Update::new().file("/bad|name.css", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, TapeError::Validation(_)));
    assert!(!session.is_busy());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_close_runs_cleanup() {
    let (probe, counts) = Probe::new("probe", &[".none"], EnumSet::only(Stage::Cleanup));
    let mut session = tape(SITE, vec![probe]).dev(options());
    finished(&mut session).await;

    assert!(session.close().await.unwrap().is_empty());
    assert_eq!(n(&counts.cleanup), 1);
}
