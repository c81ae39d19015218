//! 工作流端到端测试：脚本化浏览器 + 内存 SQLite + 手动时钟

mod common;

use chrono::Duration;

use cadence::config::{DelayBand, HourWindowConfig};
use cadence::core::{Clock, CycleError, Phase};
use cadence::outreach::TargetState;
use cadence::phases::discover_targets;
use cadence::store::{
    ActionKind, MessageStatus, NewEvent, OutreachStore, Outcome, RequestStatus, TargetDraft,
};

use common::*;

const ALICE: &str = "https://site.test/in/alice";
const BOB: &str = "https://site.test/in/bob";
const CAROL: &str = "https://site.test/in/carol";

fn two_results() -> Vec<ResultItem> {
    vec![
        ResultItem::new("/in/alice/?trk=search", "Alice Smith", "Engineer at Acme"),
        ResultItem::new("https://site.test/in/bob", "Bob Jones", "Researcher"),
    ]
}

fn events(h: &Harness, kind: ActionKind, outcome: Outcome) -> Vec<cadence::store::ActivityEvent> {
    h.store
        .recent_events(500)
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == kind && e.outcome == outcome)
        .collect()
}

fn state(h: &Harness, url: &str) -> TargetState {
    h.orchestrator.outreach().state_of(url).unwrap()
}

#[tokio::test]
async fn test_hourly_cap_sends_one_request_and_logs_quota_skip() {
    let driver = ScriptedInteraction::new();
    driver.page(&search_url(), Page::default().results(two_results()));
    driver.page(ALICE, Page::profile());
    driver.page(BOB, Page::profile());
    let h = harness(driver, |cfg| {
        cfg.rate_limits.connections.per_hour = 1;
    });

    let report = h.orchestrator.run_cycle().await.unwrap();

    let connect = report.phase(Phase::Connect).unwrap();
    assert_eq!(connect.processed, 1);
    assert_eq!(connect.succeeded, 1);
    assert!(connect.quota_exhausted);
    assert_eq!(state(&h, ALICE), TargetState::Requested(RequestStatus::Pending));
    assert_eq!(state(&h, BOB), TargetState::Discovered);

    let skipped = events(&h, ActionKind::ConnectionRequest, Outcome::QuotaBlocked);
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].target_url.as_deref(), Some(BOB));
    assert_eq!(h.driver.visit_count(BOB), 0);
}

#[tokio::test]
async fn test_failed_request_leaves_target_eligible() {
    let driver = ScriptedInteraction::new();
    driver.page(&search_url(), Page::default().results(two_results()));
    driver.page(ALICE, Page::profile());
    // 没有连接按钮
    driver.page(BOB, Page::default());
    let h = harness(driver, |_| {});

    let report = h.orchestrator.run_cycle().await.unwrap();
    let connect = report.phase(Phase::Connect).unwrap();
    assert_eq!((connect.succeeded, connect.failed), (1, 1));
    assert!(h.store.request_for(BOB).unwrap().is_none());
    let failures = events(&h, ActionKind::ConnectionRequest, Outcome::Failure);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].target_url.as_deref(), Some(BOB));

    h.driver.page(BOB, Page::profile());
    h.clock.advance(Duration::minutes(10));
    let report = h.orchestrator.run_cycle().await.unwrap();
    let connect = report.phase(Phase::Connect).unwrap();
    assert_eq!((connect.processed, connect.succeeded), (1, 1));
    assert_eq!(state(&h, BOB), TargetState::Requested(RequestStatus::Pending));
    assert_eq!(h.driver.visit_count(ALICE), 1);
}

#[tokio::test]
async fn test_challenge_page_aborts_cycle_with_snapshot() {
    let driver = ScriptedInteraction::new();
    driver.page(&search_url(), Page::default().results(two_results()));
    driver.page(ALICE, Page::profile().with(CAPTCHA));
    driver.page(BOB, Page::profile());
    let h = harness(driver, |_| {});

    let err = h.orchestrator.run_cycle().await.unwrap_err();
    let CycleError::Blocked { snapshot, .. } = &err else {
        panic!("expected a blocked cycle, got {err:?}");
    };
    let snapshot = snapshot.clone().expect("snapshot path");
    assert!(snapshot.exists());
    assert!(snapshot.starts_with(h.snapshots.path()));

    let blocked = events(&h, ActionKind::ConnectionRequest, Outcome::Blocked);
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].target_url.as_deref(), Some(ALICE));
    assert!(h.store.request_for(ALICE).unwrap().is_none());
    // 中止后不再处理后续目标
    assert_eq!(h.driver.visit_count(BOB), 0);
}

#[tokio::test]
async fn test_follow_up_waits_for_acceptance_dwell() {
    let driver = ScriptedInteraction::new();
    driver.page(ALICE, Page::profile().with(MESSAGE_INPUT).with(MESSAGE_SEND));
    let h = harness(driver, |cfg| {
        cfg.search.queries.clear();
    });

    let outreach = h.orchestrator.outreach();
    let target = outreach
        .discover(&TargetDraft::new(ALICE).with_name("Alice Smith"), start())
        .unwrap();
    outreach.confirm_request(&target, None, start()).unwrap();
    outreach
        .record_response(ALICE, RequestStatus::Accepted, start())
        .unwrap();

    let report = h.orchestrator.run_cycle().await.unwrap();
    let message = report.phase(Phase::Message).unwrap();
    assert_eq!((message.processed, message.skipped), (0, 1));
    assert_eq!(state(&h, ALICE), TargetState::Requested(RequestStatus::Accepted));

    h.clock.advance(Duration::hours(25));
    let report = h.orchestrator.run_cycle().await.unwrap();
    let message = report.phase(Phase::Message).unwrap();
    assert_eq!((message.processed, message.succeeded), (1, 1));

    let sent = h.store.messages_for(ALICE).unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content, "Thanks for connecting, Alice!");
    assert_eq!(sent[0].status, MessageStatus::Sent);
    assert_eq!(h.driver.typed(ALICE, MESSAGE_INPUT), sent[0].content);
    assert_eq!(state(&h, ALICE), TargetState::Messaged(MessageStatus::Sent));

    // 已发过不再发送
    let report = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(report.phase(Phase::Message).unwrap().processed, 0);
}

#[tokio::test]
async fn test_cancellation_finishes_current_target_then_stops() {
    let driver = ScriptedInteraction::new();
    driver.page(&search_url(), Page::default().results(two_results()));
    driver.page(ALICE, Page::profile());
    driver.page(BOB, Page::profile());
    let h = harness(driver, |_| {});
    h.driver.cancel_on_click(CONNECT, h.cancel.clone());

    let report = h.orchestrator.run_cycle().await.unwrap();

    assert!(report.cancelled);
    let connect = report.phase(Phase::Connect).unwrap();
    assert_eq!((connect.processed, connect.succeeded), (1, 1));
    assert!(connect.cancelled);
    assert!(report.phase(Phase::Message).is_none());
    assert_eq!(state(&h, ALICE), TargetState::Requested(RequestStatus::Pending));
    assert_eq!(state(&h, BOB), TargetState::Discovered);
}

#[tokio::test]
async fn test_window_closing_mid_cycle_stops_before_next_send() {
    let driver = ScriptedInteraction::new();
    driver.page(&search_url(), Page::default().results(two_results()));
    driver.page(ALICE, Page::profile());
    driver.page(BOB, Page::profile());
    // 06:00 -> 07:00，每次打开页面停 10 分钟
    let h = harness(driver, |cfg| {
        cfg.scheduling.active_hours = HourWindowConfig { start: 6, end: 7 };
        cfg.pacing
            .delays
            .insert("action".into(), DelayBand::new(600_000, 600_000));
    });
    let closes = start() + Duration::hours(1);

    let report = h.orchestrator.run_cycle().await.unwrap();

    assert!(report.window_closed);
    assert!(!report.cancelled);
    let connect = report.phase(Phase::Connect).unwrap();
    assert!(connect.window_closed);
    assert_eq!(connect.succeeded, 1);
    assert!(report.phase(Phase::Message).is_none());

    let sent = events(&h, ActionKind::ConnectionRequest, Outcome::Success);
    assert_eq!(sent.len(), 1);
    assert!(sent.iter().all(|e| e.at < closes));
    // Bob 的页面在 07:00 之后才打开，连接按钮没有被点击
    assert!(h.clock.now_utc() >= closes);
    assert!(!h.driver.clicked(BOB, CONNECT));
    assert_eq!(state(&h, BOB), TargetState::Discovered);
}

#[tokio::test]
async fn test_cancel_during_search_leaves_remaining_pages_unvisited() {
    let page_two = "https://site.test/search?q=Engineer+robotics&page=2";
    let driver = ScriptedInteraction::new();
    driver.page(
        &search_url(),
        Page::default().results(two_results()).next(page_two),
    );
    driver.page(
        page_two,
        Page::default().results(vec![ResultItem::new("/in/carol", "Carol White", "CTO")]),
    );
    let h = harness(driver, |_| {});
    h.driver.cancel_on_visit(&search_url(), 1, h.cancel.clone());

    let report = h.orchestrator.run_cycle().await.unwrap();

    assert!(report.cancelled);
    assert!(report.phase(Phase::Discover).unwrap().cancelled);
    assert!(report.phase(Phase::Connect).is_none());
    assert_eq!(h.driver.visit_count(page_two), 0);
    assert!(!h.driver.clicked(&search_url(), NEXT_PAGE));
    assert!(h.store.targets_awaiting_request(10).unwrap().is_empty());

    let searches = events(&h, ActionKind::Search, Outcome::Success);
    assert_eq!(searches.len(), 1);
    assert!(searches[0].detail.ends_with("(cancelled)"));
}

#[tokio::test]
async fn test_note_uses_fallback_first_name_and_query_keywords() {
    let driver = ScriptedInteraction::new();
    driver.page(
        &search_url(),
        Page::default().results(vec![ResultItem::new("/in/carol", "", "Engineer")]),
    );
    driver.page(CAROL, Page::profile());
    let h = harness(driver, |_| {});

    h.orchestrator.run_cycle().await.unwrap();

    let request = h.store.request_for(CAROL).unwrap().expect("request recorded");
    let note = "Hi there, let's connect about robotics.";
    assert_eq!(request.note.as_deref(), Some(note));
    assert_eq!(h.driver.typed(CAROL, NOTE_INPUT), note);
    assert!(h.driver.clicked(CAROL, SEND_NOTE));
}

#[tokio::test]
async fn test_discovery_follows_pages_and_deduplicates() {
    let page_two = "https://site.test/search?q=Engineer+robotics&page=2";
    let driver = ScriptedInteraction::new();
    driver.page(
        &search_url(),
        Page::default().results(two_results()).next(page_two),
    );
    driver.page(
        page_two,
        Page::default().results(vec![
            ResultItem::new("https://site.test/in/bob/", "Bob Jones", "Researcher"),
            ResultItem::new("/in/carol#about", "Carol White", "CTO at Robo"),
        ]),
    );
    let h = harness(driver, |_| {});
    let search = test_config(h.snapshots.path()).search;
    let ctx = h.orchestrator.context();

    let report = discover_targets(ctx, &search).await.unwrap();
    assert_eq!((report.processed, report.succeeded), (1, 1));

    let targets = h.store.targets_awaiting_request(10).unwrap();
    let urls: Vec<&str> = targets.iter().map(|t| t.url.as_str()).collect();
    assert_eq!(urls, vec![ALICE, BOB, CAROL]);
    assert_eq!(targets[0].role, "Engineer");
    assert_eq!(targets[0].organization, "Acme");
    assert_eq!(targets[2].keywords, "robotics");

    let searches = events(&h, ActionKind::Search, Outcome::Success);
    assert_eq!(searches.len(), 1);
    assert!(searches[0].detail.contains("3 targets"));

    // 重复发现是幂等的
    discover_targets(ctx, &search).await.unwrap();
    assert_eq!(h.store.targets_awaiting_request(10).unwrap().len(), 3);
}

#[tokio::test]
async fn test_search_quota_ends_discovery() {
    let driver = ScriptedInteraction::new();
    let h = harness(driver, |cfg| {
        cfg.rate_limits.searches.per_hour = 1;
    });
    let search = {
        let mut search = test_config(h.snapshots.path()).search;
        search.queries.push(query());
        search
    };

    let report = discover_targets(h.orchestrator.context(), &search).await.unwrap();
    assert_eq!(report.processed, 1);
    assert!(report.quota_exhausted);
    assert_eq!(events(&h, ActionKind::Search, Outcome::QuotaBlocked).len(), 1);
}

#[tokio::test]
async fn test_login_with_credentials_when_no_session() {
    let driver = ScriptedInteraction::new();
    driver.page(HOME, Page::default());
    driver.page(
        LOGIN,
        Page::default()
            .with("input#user")
            .with("input#pass")
            .with("button.login")
            .with(LOGGED_IN),
    );
    let h = harness(driver, |cfg| {
        cfg.search.queries.clear();
        cfg.site.username_input = vec!["input#user".into()];
        cfg.site.password_input = vec!["input#pass".into()];
        cfg.site.login_submit = vec!["button.login".into()];
        cfg.credentials.email = Some("me@example.com".into());
        cfg.credentials.password = Some("hunter2".into());
    });

    h.orchestrator.run_cycle().await.unwrap();

    assert_eq!(h.driver.typed(LOGIN, "input#user"), "me@example.com");
    assert_eq!(h.driver.typed(LOGIN, "input#pass"), "hunter2");
    assert!(h.driver.clicked(LOGIN, "button.login"));
    let auth = events(&h, ActionKind::Authentication, Outcome::Success);
    assert_eq!(auth.len(), 1);
    assert_eq!(auth[0].detail, "logged in with credentials");
}

#[tokio::test]
async fn test_missing_credentials_is_a_config_error() {
    let driver = ScriptedInteraction::new();
    driver.page(HOME, Page::default());
    let h = harness(driver, |_| {});

    let err = h.orchestrator.run_forever().await.unwrap_err();
    assert!(matches!(err, CycleError::Config(_)));
    assert_eq!(h.driver.visit_count(LOGIN), 0);
    assert_eq!(events(&h, ActionKind::Authentication, Outcome::Failure).len(), 1);
}

#[tokio::test]
async fn test_run_forever_stops_on_detection_signal() {
    let driver = ScriptedInteraction::new();
    driver.page(HOME, Page::default().with(LOGGED_IN).with(CAPTCHA));
    let h = harness(driver, |_| {});

    let err = h.orchestrator.run_forever().await.unwrap_err();
    assert!(matches!(err, CycleError::Blocked { .. }));
    assert_eq!(events(&h, ActionKind::Authentication, Outcome::Blocked).len(), 1);
    assert_eq!(h.driver.screenshots(), 1);
    assert_eq!(h.driver.visit_count(HOME), 1);
}

#[tokio::test]
async fn test_run_forever_repeats_cycles_until_cancelled() {
    let driver = ScriptedInteraction::new();
    let h = harness(driver, |_| {});
    h.driver.cancel_on_visit(HOME, 2, h.cancel.clone());

    h.orchestrator.run_forever().await.unwrap();

    assert_eq!(h.driver.visit_count(HOME), 2);
    assert_eq!(events(&h, ActionKind::Authentication, Outcome::Success).len(), 2);
    // 第二轮在登录后即停止
    assert_eq!(events(&h, ActionKind::Search, Outcome::Success).len(), 1);
}

#[tokio::test]
async fn test_run_forever_pauses_while_daily_outreach_is_exhausted() {
    let driver = ScriptedInteraction::new();
    let h = harness_with_limit(driver, Some(2), |cfg| {
        cfg.rate_limits.connections.per_day = 2;
        cfg.rate_limits.messages.per_day = 1;
    });
    for kind in [
        ActionKind::ConnectionRequest,
        ActionKind::ConnectionRequest,
        ActionKind::Message,
    ] {
        h.store
            .log_event(&NewEvent::new(kind, Outcome::Success, start()))
            .unwrap();
    }

    h.orchestrator.run_forever().await.unwrap();

    assert!(h.driver.visits().is_empty());
    assert_eq!(h.clock.now_utc(), start() + Duration::hours(2));
    assert_eq!(h.sleeper.calls(), 3);
}
