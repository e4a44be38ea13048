//! Reconciliation pass scenarios

use channel_keeper::cadence::DepartureRecord;
use channel_keeper::gateway::MemberStatus;
use channel_keeper::Reconciler;
use tempfile::TempDir;

use crate::support::{self, MockGateway};

const X: i64 = 1001;
const Y: i64 = 1002;
const Z: i64 = 1003;

#[tokio::test]
async fn test_departed_member_follows_first_contact_then_daily_cadence() {
    let dir = TempDir::new().unwrap();
    support::write_known_members(dir.path(), &[X]);
    let gateway = MockGateway::new();
    gateway.set_status(X, MemberStatus::Left);
    gateway.set_name(X, "Xena");
    let ctx = support::context(gateway.clone(), dir.path()).await;
    let reconciler = Reconciler::new(ctx.clone());

    let summary = reconciler.run_pass(0.0).await.unwrap();
    assert_eq!(summary.departed, 1);
    assert_eq!(summary.notices_sent, 0);
    assert_eq!(
        ctx.store.departure(X).await,
        Some(DepartureRecord {
            occurrence_count: 0,
            first_notice_at: Some(0.0),
            last_notice_at: None,
        })
    );

    let summary = reconciler.run_pass(65.0).await.unwrap();
    assert_eq!(summary.notices_sent, 1);
    let record = ctx.store.departure(X).await.unwrap();
    assert_eq!(record.occurrence_count, 1);
    assert_eq!(record.last_notice_at, Some(65.0));
    assert_eq!(record.first_notice_at, Some(0.0));

    let summary = reconciler.run_pass(100.0).await.unwrap();
    assert_eq!(summary.notices_sent, 0);
    assert_eq!(gateway.sent_to(X), 1);

    let summary = reconciler.run_pass(86_466.0).await.unwrap();
    assert_eq!(summary.notices_sent, 1);
    let record = ctx.store.departure(X).await.unwrap();
    assert_eq!(record.occurrence_count, 2);
    assert_eq!(record.last_notice_at, Some(86_466.0));

    let sent = gateway.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].1.text.contains("Xena"));
}

#[tokio::test]
async fn test_no_first_notice_before_delay() {
    let dir = TempDir::new().unwrap();
    support::write_known_members(dir.path(), &[X]);
    let gateway = MockGateway::new();
    gateway.set_status(X, MemberStatus::Kicked);
    let ctx = support::context(gateway.clone(), dir.path()).await;
    let reconciler = Reconciler::new(ctx);

    reconciler.run_pass(1_000.0).await.unwrap();
    reconciler.run_pass(1_059.0).await.unwrap();
    assert_eq!(gateway.sent_to(X), 0);

    reconciler.run_pass(1_060.0).await.unwrap();
    assert_eq!(gateway.sent_to(X), 1);
}

#[tokio::test]
async fn test_followup_waits_full_interval() {
    let dir = TempDir::new().unwrap();
    support::write_known_members(dir.path(), &[X]);
    support::write_departures(
        dir.path(),
        r#"{"1001": {"count": 3, "first_sent_at": 10.0, "last_sent_at": 5000.0}}"#,
    );
    let gateway = MockGateway::new();
    gateway.set_status(X, MemberStatus::Left);
    let ctx = support::context(gateway.clone(), dir.path()).await;
    let reconciler = Reconciler::new(ctx.clone());

    reconciler.run_pass(5_000.0 + 86_399.0).await.unwrap();
    assert_eq!(gateway.sent_to(X), 0);

    reconciler.run_pass(5_000.0 + 86_400.0).await.unwrap();
    assert_eq!(gateway.sent_to(X), 1);
    assert_eq!(ctx.store.departure(X).await.unwrap().occurrence_count, 4);
}

#[tokio::test]
async fn test_capped_member_is_never_messaged() {
    let dir = TempDir::new().unwrap();
    support::write_known_members(dir.path(), &[Y]);
    support::write_departures(
        dir.path(),
        r#"{"1002": {"count": 30, "first_sent_at": 1.0, "last_sent_at": 2.0}}"#,
    );
    let gateway = MockGateway::new();
    gateway.set_status(Y, MemberStatus::Left);
    let ctx = support::context(gateway.clone(), dir.path()).await;
    let reconciler = Reconciler::new(ctx.clone());

    for day in 1..=5 {
        let summary = reconciler.run_pass(day as f64 * 1_000_000.0).await.unwrap();
        assert_eq!(summary.capped, 1);
        assert_eq!(summary.notices_sent, 0);
    }

    assert_eq!(gateway.sent_to(Y), 0);
    let record = ctx.store.departure(Y).await.unwrap();
    assert_eq!(record.occurrence_count, 30);
    assert_eq!(record.last_notice_at, Some(2.0));
}

#[tokio::test]
async fn test_rejoined_member_record_is_dropped_and_restarts_fresh() {
    let dir = TempDir::new().unwrap();
    support::write_known_members(dir.path(), &[Z]);
    let gateway = MockGateway::new();
    gateway.set_status(Z, MemberStatus::Left);
    let ctx = support::context(gateway.clone(), dir.path()).await;
    let reconciler = Reconciler::new(ctx.clone());

    reconciler.run_pass(0.0).await.unwrap();
    reconciler.run_pass(60.0).await.unwrap();
    assert_eq!(gateway.sent_to(Z), 1);

    gateway.set_status(Z, MemberStatus::Member);
    let summary = reconciler.run_pass(120.0).await.unwrap();
    assert_eq!(summary.rejoined, 1);
    assert_eq!(ctx.store.departure(Z).await, None);
    assert!(support::read_departures(dir.path()).get("1003").is_none());

    gateway.set_status(Z, MemberStatus::Left);
    reconciler.run_pass(500.0).await.unwrap();
    assert_eq!(
        ctx.store.departure(Z).await,
        Some(DepartureRecord {
            occurrence_count: 0,
            first_notice_at: Some(500.0),
            last_notice_at: None,
        })
    );
}

#[tokio::test]
async fn test_restricted_and_admin_count_as_members() {
    let dir = TempDir::new().unwrap();
    support::write_known_members(dir.path(), &[X, Y]);
    support::write_departures(dir.path(), r#"{"1001": {"count": 1}, "1002": {"count": 2}}"#);
    let gateway = MockGateway::new();
    gateway.set_status(X, MemberStatus::Restricted);
    gateway.set_status(Y, MemberStatus::Administrator);
    let ctx = support::context(gateway.clone(), dir.path()).await;

    let summary = Reconciler::new(ctx.clone()).run_pass(10.0).await.unwrap();

    assert_eq!(summary.rejoined, 2);
    assert_eq!(summary.departed, 0);
    assert!(ctx.store.departures().await.is_empty());
}

#[tokio::test]
async fn test_lookup_failure_does_not_stop_pass() {
    let dir = TempDir::new().unwrap();
    support::write_known_members(dir.path(), &[X, Y, Z]);
    let gateway = MockGateway::new();
    gateway.set_status(X, MemberStatus::Left);
    gateway.fail_lookups_for(Y);
    gateway.set_status(Z, MemberStatus::Left);
    let ctx = support::context(gateway.clone(), dir.path()).await;

    let summary = Reconciler::new(ctx.clone()).run_pass(0.0).await.unwrap();

    assert_eq!(summary.checked, 3);
    assert_eq!(summary.lookup_failures, 1);
    assert_eq!(summary.departed, 2);
    assert_eq!(gateway.status_calls(), 3);
    assert!(ctx.store.departure(X).await.is_some());
    assert!(ctx.store.departure(Y).await.is_none());
    assert!(ctx.store.departure(Z).await.is_some());
}

#[tokio::test]
async fn test_failed_send_is_retried_next_pass() {
    let dir = TempDir::new().unwrap();
    support::write_known_members(dir.path(), &[X]);
    let gateway = MockGateway::new();
    gateway.set_status(X, MemberStatus::Left);
    gateway.fail_sends_to(X);
    let ctx = support::context(gateway.clone(), dir.path()).await;
    let reconciler = Reconciler::new(ctx.clone());

    reconciler.run_pass(0.0).await.unwrap();
    let summary = reconciler.run_pass(70.0).await.unwrap();
    assert_eq!(summary.send_failures, 1);
    let record = ctx.store.departure(X).await.unwrap();
    assert_eq!(record.occurrence_count, 0);
    assert_eq!(record.last_notice_at, None);

    gateway.allow_sends_to(X);
    let summary = reconciler.run_pass(80.0).await.unwrap();
    assert_eq!(summary.notices_sent, 1);
    assert_eq!(ctx.store.departure(X).await.unwrap().occurrence_count, 1);
}

#[tokio::test]
async fn test_pass_persists_departures_file() {
    let dir = TempDir::new().unwrap();
    support::write_known_members(dir.path(), &[X]);
    let gateway = MockGateway::new();
    gateway.set_status(X, MemberStatus::Left);
    let ctx = support::context(gateway, dir.path()).await;
    let reconciler = Reconciler::new(ctx);

    reconciler.run_pass(0.0).await.unwrap();
    reconciler.run_pass(61.0).await.unwrap();

    let on_disk = support::read_departures(dir.path());
    assert_eq!(on_disk["1001"]["count"], 1);
    assert_eq!(on_disk["1001"]["first_sent_at"], 0.0);
    assert_eq!(on_disk["1001"]["last_sent_at"], 61.0);
}

#[tokio::test]
async fn test_fallback_name_used_when_lookup_has_no_name() {
    let dir = TempDir::new().unwrap();
    support::write_known_members(dir.path(), &[X]);
    let gateway = MockGateway::new();
    gateway.set_status(X, MemberStatus::Left);
    let ctx = support::context(gateway.clone(), dir.path()).await;
    let reconciler = Reconciler::new(ctx);

    reconciler.run_pass(0.0).await.unwrap();
    reconciler.run_pass(60.0).await.unwrap();

    let sent = gateway.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.text.contains("there"));
    assert!(!sent[0].1.text.contains("{first_name}"));
}

#[tokio::test]
async fn test_empty_store_pass_is_noop() {
    let dir = TempDir::new().unwrap();
    let gateway = MockGateway::new();
    let ctx = support::context(gateway.clone(), dir.path()).await;

    let summary = Reconciler::new(ctx).run_pass(0.0).await.unwrap();

    assert_eq!(summary, Default::default());
    assert_eq!(gateway.status_calls(), 0);
    assert_eq!(support::read_departures(dir.path()), serde_json::json!({}));
}

#[tokio::test]
async fn test_rejoin_during_send_keeps_record_removed() {
    let dir = TempDir::new().unwrap();
    support::write_known_members(dir.path(), &[X]);
    let gateway = MockGateway::new();
    gateway.set_status(X, MemberStatus::Left);
    let ctx = support::context(gateway.clone(), dir.path()).await;

    Reconciler::new(ctx.clone()).run_pass(0.0).await.unwrap();
    assert!(ctx.store.departure(X).await.is_some());

    let gate = gateway.pause_sends();
    let reconciler = Reconciler::new(ctx.clone());
    let pass = tokio::spawn(async move { reconciler.run_pass(100.0).await });

    gate.entered.notified().await;
    assert!(ctx.store.clear_departure(X).await.unwrap());
    gate.release.notify_one();

    let summary = pass.await.unwrap().unwrap();
    assert_eq!(summary.notices_sent, 1);
    assert_eq!(gateway.sent_to(X), 1);
    assert!(ctx.store.departure(X).await.is_none());
    assert!(support::read_departures(dir.path()).get("1001").is_none());
}

#[tokio::test]
async fn test_capped_legacy_record_is_kept_unchanged() {
    let dir = TempDir::new().unwrap();
    support::write_known_members(dir.path(), &[Y]);
    support::write_departures(dir.path(), r#"{"1002": {"count": 30}}"#);
    let gateway = MockGateway::new();
    gateway.set_status(Y, MemberStatus::Left);
    let ctx = support::context(gateway.clone(), dir.path()).await;

    let summary = Reconciler::new(ctx.clone()).run_pass(500.0).await.unwrap();

    assert_eq!(summary.capped, 1);
    assert_eq!(
        ctx.store.departure(Y).await,
        Some(DepartureRecord {
            occurrence_count: 30,
            first_notice_at: None,
            last_notice_at: None,
        })
    );
    let on_disk = support::read_departures(dir.path());
    assert!(on_disk["1002"]["first_sent_at"].is_null());
    assert_eq!(gateway.sent_to(Y), 0);
}
