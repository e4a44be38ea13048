//! Join request and membership update flows

use channel_keeper::gateway::MemberStatus;
use channel_keeper::handlers::{
    handle_join_request, handle_member_update, JoinOutcome, JoinRequest, LeaveOutcome,
    MemberUpdate,
};
use channel_keeper::templates::LinkButton;
use tempfile::TempDir;

use crate::support::{self, MockGateway, CHANNEL};

fn join_request(user: i64, name: &str) -> JoinRequest {
    JoinRequest {
        chat: CHANNEL,
        user,
        first_name: name.to_string(),
    }
}

fn member_update(user: i64, status: MemberStatus) -> MemberUpdate {
    MemberUpdate {
        chat: CHANNEL,
        user,
        first_name: "Lea".to_string(),
        status,
    }
}

#[tokio::test]
async fn test_join_request_approves_records_and_welcomes() {
    let dir = TempDir::new().unwrap();
    let gateway = MockGateway::new();
    let ctx = support::context(gateway.clone(), dir.path()).await;

    let outcome = handle_join_request(&ctx, &join_request(42, "Ann")).await;

    assert_eq!(outcome, JoinOutcome::Welcomed);
    assert_eq!(gateway.approved(), vec![(CHANNEL, 42)]);
    assert_eq!(support::read_known_members(dir.path()), vec![42]);
    let sent = gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 42);
    assert!(sent[0].1.text.contains("Ann"));
}

#[tokio::test]
async fn test_repeated_join_request_does_not_duplicate_member() {
    let dir = TempDir::new().unwrap();
    let gateway = MockGateway::new();
    let ctx = support::context(gateway.clone(), dir.path()).await;

    handle_join_request(&ctx, &join_request(42, "Ann")).await;
    handle_join_request(&ctx, &join_request(42, "Ann")).await;

    assert_eq!(support::read_known_members(dir.path()), vec![42]);
    assert_eq!(gateway.approved().len(), 2);
    assert_eq!(gateway.sent_to(42), 2);
}

#[tokio::test]
async fn test_join_request_clears_departure_record() {
    let dir = TempDir::new().unwrap();
    support::write_known_members(dir.path(), &[42]);
    support::write_departures(
        dir.path(),
        r#"{"42": {"count": 5, "first_sent_at": 1.0, "last_sent_at": 2.0}, "7": {"count": 1}}"#,
    );
    let gateway = MockGateway::new();
    let ctx = support::context(gateway, dir.path()).await;

    handle_join_request(&ctx, &join_request(42, "Ann")).await;

    assert!(ctx.store.departure(42).await.is_none());
    let on_disk = support::read_departures(dir.path());
    assert!(on_disk.get("42").is_none());
    assert_eq!(on_disk["7"]["count"], 1);
}

#[tokio::test]
async fn test_failed_approval_stops_the_flow() {
    let dir = TempDir::new().unwrap();
    let gateway = MockGateway::new();
    gateway.fail_approval_for(42);
    let ctx = support::context(gateway.clone(), dir.path()).await;

    let outcome = handle_join_request(&ctx, &join_request(42, "Ann")).await;

    assert_eq!(outcome, JoinOutcome::ApprovalFailed);
    assert!(support::read_known_members(dir.path()).is_empty());
    assert!(gateway.sent().is_empty());
}

#[tokio::test]
async fn test_welcome_failure_keeps_member() {
    let dir = TempDir::new().unwrap();
    let gateway = MockGateway::new();
    gateway.fail_sends_to(42);
    let ctx = support::context(gateway.clone(), dir.path()).await;

    let outcome = handle_join_request(&ctx, &join_request(42, "Ann")).await;

    assert_eq!(outcome, JoinOutcome::WelcomeFailed);
    assert_eq!(gateway.approved(), vec![(CHANNEL, 42)]);
    assert!(ctx.store.is_known(42).await);
}

#[tokio::test]
async fn test_welcome_carries_configured_button() {
    let dir = TempDir::new().unwrap();
    let mut config = support::test_config(dir.path());
    config.templates.welcome.button = Some(LinkButton::new("Admin", "https://t.me/admin"));
    let gateway = MockGateway::new();
    let ctx = support::context_with(gateway.clone(), &config).await;

    handle_join_request(&ctx, &join_request(42, "Ann")).await;

    let sent = gateway.sent();
    assert_eq!(
        sent[0].1.button,
        Some(LinkButton::new("Admin", "https://t.me/admin"))
    );
}

#[tokio::test]
async fn test_blank_name_falls_back() {
    let dir = TempDir::new().unwrap();
    let gateway = MockGateway::new();
    let ctx = support::context(gateway.clone(), dir.path()).await;

    handle_join_request(&ctx, &join_request(42, "   ")).await;

    assert!(gateway.sent()[0].1.text.contains("there"));
}

#[tokio::test]
async fn test_leave_sends_farewell() {
    let dir = TempDir::new().unwrap();
    let gateway = MockGateway::new();
    let ctx = support::context(gateway.clone(), dir.path()).await;

    let outcome = handle_member_update(&ctx, &member_update(9, MemberStatus::Left)).await;

    assert_eq!(outcome, LeaveOutcome::FarewellSent);
    let sent = gateway.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.text.contains("Lea"));
}

#[tokio::test]
async fn test_kick_sends_farewell() {
    let dir = TempDir::new().unwrap();
    let gateway = MockGateway::new();
    let ctx = support::context(gateway.clone(), dir.path()).await;

    let outcome = handle_member_update(&ctx, &member_update(9, MemberStatus::Kicked)).await;

    assert_eq!(outcome, LeaveOutcome::FarewellSent);
}

#[tokio::test]
async fn test_leave_does_not_touch_store() {
    let dir = TempDir::new().unwrap();
    support::write_known_members(dir.path(), &[9]);
    let gateway = MockGateway::new();
    let ctx = support::context(gateway, dir.path()).await;

    handle_member_update(&ctx, &member_update(9, MemberStatus::Left)).await;

    assert!(ctx.store.departure(9).await.is_none());
    assert!(ctx.store.is_known(9).await);
}

#[tokio::test]
async fn test_non_departure_update_is_ignored() {
    let dir = TempDir::new().unwrap();
    let gateway = MockGateway::new();
    let ctx = support::context(gateway.clone(), dir.path()).await;

    for status in [
        MemberStatus::Member,
        MemberStatus::Restricted,
        MemberStatus::Administrator,
    ] {
        let outcome = handle_member_update(&ctx, &member_update(9, status)).await;
        assert_eq!(outcome, LeaveOutcome::NotDeparted);
    }
    assert!(gateway.sent().is_empty());
}

#[tokio::test]
async fn test_update_from_other_chat_is_ignored() {
    let dir = TempDir::new().unwrap();
    let gateway = MockGateway::new();
    let ctx = support::context(gateway.clone(), dir.path()).await;

    let mut update = member_update(9, MemberStatus::Left);
    update.chat = -100999;
    let outcome = handle_member_update(&ctx, &update).await;

    assert_eq!(outcome, LeaveOutcome::OtherChat);
    assert!(gateway.sent().is_empty());
}

#[tokio::test]
async fn test_disabled_farewell_is_not_sent() {
    let dir = TempDir::new().unwrap();
    let mut config = support::test_config(dir.path());
    config.farewell_enabled = false;
    let gateway = MockGateway::new();
    let ctx = support::context_with(gateway.clone(), &config).await;

    let outcome = handle_member_update(&ctx, &member_update(9, MemberStatus::Left)).await;

    assert_eq!(outcome, LeaveOutcome::Disabled);
    assert!(gateway.sent().is_empty());
}

#[tokio::test]
async fn test_farewell_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let gateway = MockGateway::new();
    gateway.fail_sends_to(9);
    let ctx = support::context(gateway, dir.path()).await;

    let outcome = handle_member_update(&ctx, &member_update(9, MemberStatus::Left)).await;

    assert_eq!(outcome, LeaveOutcome::FarewellFailed);
}
