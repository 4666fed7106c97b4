//! End-to-end dialing scenarios against a mock provider

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use dialer_engine::prelude::*;
use std::time::Duration;

const LIMIT: Duration = Duration::from_secs(5);

#[tokio::test(start_paused = true)]
async fn test_near_simultaneous_answers_bridge_only_one() {
    init_tracing();
    let provider = MockProvider::new();
    let notifier = CountingNotifier::new();
    let engine = build_engine(test_config(3), provider.clone(), notifier.clone()).await;

    engine.enqueue_all(vec![
        Contact::new("c-1", "+15550000001"),
        Contact::new("c-2", "+15550000002"),
        Contact::new("c-3", "+15550000003"),
    ]);
    engine.start();

    let lines = dialing_lines(&engine, 3).await;
    let (first, second) = (&lines[0], &lines[1]);
    for (_, handle, _) in [first, second] {
        engine
            .handle_provider_event(&ProviderEvent::new(handle.0.clone(), ProviderEventKind::Ringing))
            .unwrap();
    }

    // The later delivery carries the earlier answer time and must win
    let t0 = Utc::now();
    engine
        .handle_provider_event(&answered(&first.1, "human").at(t0 + ChronoDuration::milliseconds(50)))
        .unwrap();
    engine.handle_provider_event(&answered(&second.1, "human").at(t0)).unwrap();

    assert!(wait_for(LIMIT, || engine.stats().arbitration_losses == 1).await);
    assert_eq!(engine.bridged_line(), Some(second.0));
    let bridged = engine
        .line_snapshots()
        .iter()
        .filter(|s| s.state == LineState::Connected)
        .count();
    assert_eq!(bridged, 1);
    assert!(provider.was_disconnected(&first.1));

    assert!(wait_for(LIMIT, || notifier.attempts() >= 1).await);
    let notice = &notifier.notices()[0];
    assert_eq!(notice.call_sid, first.1);
    assert_eq!(notice.reason, "agent_busy");

    let records = session_records(&engine).await;
    let loser = records
        .iter()
        .find(|r| r.provider_handle.as_ref() == Some(&first.1))
        .unwrap();
    assert_eq!(loser.status, RecordStatus::Canceled);
    assert_eq!(loser.disposition, Some(CallOutcome::Canceled));
    assert_eq!(loser.end_reason, Some(EndReason::AgentBusy));
    assert!(loser.drop_latency_ms.is_some());

    let report = engine
        .verify(Utc::now() - ChronoDuration::hours(1), Utc::now() + ChronoDuration::minutes(1))
        .await
        .unwrap();
    assert!(report.single_connection.violations.is_empty());
    assert_eq!(report.single_connection.secondary_calls, 1);
    assert_eq!(report.single_connection.drop_success_rate, 1.0);
    assert!(report.passed);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_winner_hangup_frees_the_agent() {
    let provider = MockProvider::new();
    let engine = build_engine(test_config(1), provider.clone(), CountingNotifier::new()).await;
    engine.enqueue(Contact::new("c-1", "+15550000001"));
    engine.start();

    let lines = dialing_lines(&engine, 1).await;
    let handle = &lines[0].1;
    engine.handle_provider_event(&answered(handle, "human")).unwrap();
    assert!(wait_for(LIMIT, || engine.bridged_line().is_some()).await);

    engine.handle_provider_event(&ended(handle, "completed", 95)).unwrap();
    assert!(wait_for(LIMIT, || engine.stats().connected == 1).await);
    assert_eq!(engine.bridged_line(), None);

    let stats = engine.stats();
    assert_eq!(stats.talk_time_secs, 95);
    assert_eq!(stats.connect_rate, 1.0);

    let records = session_records(&engine).await;
    assert_eq!(records[0].status, RecordStatus::Completed);
    assert_eq!(records[0].answered_by, Some(AnsweredBy::Human));
    assert!(records[0].connected_at.is_some());
    assert!(records[0].ring_duration_secs.is_some());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_machine_answer_is_skipped_as_voicemail() {
    let provider = MockProvider::new();
    let mut config = test_config(1);
    config.amd_enabled = true;
    config.auto_skip_voicemail = true;
    let engine = build_engine(config, provider.clone(), CountingNotifier::new()).await;
    let mut updates = engine.subscribe();

    engine.enqueue(Contact::new("c-1", "+15550000001"));
    engine.start();
    let lines = dialing_lines(&engine, 1).await;
    let handle = lines[0].1.clone();

    engine
        .handle_provider_event(&ProviderEvent::new(handle.0.clone(), ProviderEventKind::Ringing))
        .unwrap();
    engine.handle_provider_event(&answered(&handle, "machine_start")).unwrap();

    assert!(wait_for(LIMIT, || engine.stats().voicemails == 1).await);
    assert!(wait_for(LIMIT, || engine.line_snapshots()[0].state.is_idle()).await);

    let mut states = Vec::new();
    while let Ok(update) = updates.try_recv() {
        if let SessionUpdate::LineChanged(snapshot) = update {
            if states.last() != Some(&snapshot.state) {
                states.push(snapshot.state);
            }
        }
    }
    assert!(!states.contains(&LineState::Connected));
    let tail: Vec<_> = states
        .iter()
        .skip_while(|s| **s != LineState::MachineDetected)
        .copied()
        .collect();
    assert_eq!(
        tail,
        vec![
            LineState::MachineDetected,
            LineState::Finished(CallOutcome::Voicemail),
            LineState::Idle
        ]
    );

    let stats = engine.stats();
    assert_eq!(stats.connected, 0);
    assert_eq!(engine.bridged_line(), None);
    assert!(provider.was_disconnected(&handle));

    let records = session_records(&engine).await;
    assert_eq!(records[0].status, RecordStatus::Completed);
    assert_eq!(records[0].disposition, Some(CallOutcome::Voicemail));
    assert_eq!(records[0].answered_by, Some(AnsweredBy::Machine));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pause_holds_dialing_until_resume() {
    let provider = MockProvider::new();
    let engine = build_engine(test_config(2), provider.clone(), CountingNotifier::new()).await;
    engine.enqueue_all((1..=6).map(|i| Contact::new(format!("c-{}", i), format!("+1555000000{}", i))));
    engine.start();

    let lines = dialing_lines(&engine, 2).await;
    engine.pause();
    assert_eq!(engine.status(), SessionStatus::Paused);

    for (_, handle, _) in &lines {
        engine.handle_provider_event(&ended(handle, "failed", 0)).unwrap();
    }
    assert!(wait_for(LIMIT, || engine.line_snapshots().iter().all(|s| s.state.is_idle())).await);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.stats().total_dialed, 2);
    assert_eq!(provider.dial_count(), 2);

    engine.resume();
    assert!(wait_for(LIMIT, || engine.stats().total_dialed == 4).await);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_replayed_terminal_event_counts_once() {
    let provider = MockProvider::new();
    let engine = build_engine(test_config(1), provider.clone(), CountingNotifier::new()).await;
    engine.enqueue(Contact::new("c-1", "+15550000001"));
    engine.start();

    let handle = dialing_lines(&engine, 1).await[0].1.clone();
    let init = ProviderEvent::new(handle.0.clone(), ProviderEventKind::Init).with_event_id("evt-init");
    assert_eq!(engine.handle_provider_event(&init).unwrap(), EventDisposition::Accepted);

    engine.handle_provider_event(&answered(&handle, "human")).unwrap();
    assert!(wait_for(LIMIT, || engine.bridged_line().is_some()).await);

    let hangup = ended(&handle, "completed", 30).with_event_id("evt-end");
    assert_eq!(engine.handle_provider_event(&hangup).unwrap(), EventDisposition::Accepted);
    assert_eq!(engine.handle_provider_event(&hangup).unwrap(), EventDisposition::Duplicate);

    // Redelivery under a fresh id is still applied only once
    let redelivered = ended(&handle, "completed", 30).with_event_id("evt-end-retry");
    let _ = engine.handle_provider_event(&redelivered).unwrap();

    assert!(wait_for(LIMIT, || engine.stats().connected >= 1).await);
    tokio::time::sleep(Duration::from_millis(500)).await;
    let stats = engine.stats();
    assert_eq!(stats.total_dialed, 1);
    assert_eq!(stats.connected, 1);
    assert_eq!(stats.talk_time_secs, 30);

    let records = session_records(&engine).await;
    assert_eq!(records.len(), 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_answer_is_requeued_until_max_attempts() {
    let provider = MockProvider::new();
    let mut config = test_config(1);
    config.scheduler.max_attempts = 2;
    let engine = build_engine(config, provider.clone(), CountingNotifier::new()).await;
    engine.enqueue(Contact::new("c-1", "+1 (555) 000-0001"));
    engine.start();

    assert!(wait_for(LIMIT, || provider.dial_count() == 1).await);
    let first = dialing_lines(&engine, 1).await[0].1.clone();
    engine.handle_provider_event(&ended(&first, "no-answer", 0)).unwrap();

    assert!(wait_for(LIMIT, || provider.dial_count() == 2).await);
    let second = provider.last_handle().unwrap();
    assert_ne!(first, second);
    assert!(wait_for(LIMIT, || engine.line_snapshots()[0].handle.as_ref() == Some(&second)).await);
    engine.handle_provider_event(&ended(&second, "no-answer", 0)).unwrap();

    assert!(wait_for(LIMIT, || engine.stats().skipped_max_attempts == 1).await);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let stats = engine.stats();
    assert_eq!(stats.skipped_max_attempts, 1);
    assert_eq!(stats.no_answer, 2);
    assert_eq!(stats.total_dialed, 2);
    assert_eq!(provider.dial_count(), 2);
    assert_eq!(provider.dialed_numbers(), vec!["+15550000001", "+15550000001"]);
    assert_eq!(engine.queue_len(), 0);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_policy_skips_are_counted() {
    let provider = MockProvider::new();
    let mut config = test_config(2);
    config.scheduler.do_not_call = vec!["+1 555 000 0009".to_string()];
    let engine = build_engine(config, provider.clone(), CountingNotifier::new()).await;

    engine.enqueue_all(vec![
        Contact::new("bad", "12345"),
        Contact::new("dnc", "+15550000009"),
        Contact::new("a", "+15550000001"),
        Contact::new("a-again", "+1-555-000-0001"),
        Contact::new("tired", "+15550000002").with_attempts(3),
    ]);
    engine.start();

    assert!(wait_for(LIMIT, || engine.stats().total_skipped() == 4).await);
    let stats = engine.stats();
    assert_eq!(stats.skipped_invalid, 1);
    assert_eq!(stats.skipped_do_not_call, 1);
    assert_eq!(stats.skipped_duplicate, 1);
    assert_eq!(stats.skipped_max_attempts, 1);
    assert_eq!(provider.dialed_numbers(), vec!["+15550000001"]);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_with_hangup_tears_lines_down() {
    let provider = MockProvider::new();
    let mut config = test_config(2);
    config.scheduler.hangup_on_stop = true;
    let engine = build_engine(config, provider.clone(), CountingNotifier::new()).await;
    engine.enqueue_all((1..=5).map(|i| Contact::new(format!("c-{}", i), format!("+1555000000{}", i))));
    engine.start();

    let lines = dialing_lines(&engine, 2).await;
    engine.stop();
    assert_eq!(engine.queue_len(), 0);
    assert!(engine.wait_stopped(LIMIT).await);

    for (_, handle, _) in &lines {
        assert!(provider.was_disconnected(handle));
    }
    let records = session_records(&engine).await;
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.end_reason == Some(EndReason::SessionStopped) && r.status == RecordStatus::Canceled));
    assert_eq!(provider.dial_count(), 2);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_recycles_stale_line() {
    let provider = MockProvider::new();
    let mut config = test_config(1);
    config.lines.max_line_age_secs = 2;
    let engine = build_engine(config, provider.clone(), CountingNotifier::new()).await;
    engine.enqueue(Contact::new("c-1", "+15550000001"));
    engine.start();

    let handle = dialing_lines(&engine, 1).await[0].1.clone();
    assert!(wait_for(Duration::from_secs(10), || engine.stats().watchdog_recycles == 1).await);
    assert!(wait_for(LIMIT, || engine.line_snapshots()[0].state.is_idle()).await);
    assert!(provider.was_disconnected(&handle));

    let records = session_records(&engine).await;
    assert_eq!(records[0].status, RecordStatus::Failed);
    assert_eq!(records[0].end_reason, Some(EndReason::WatchdogTimeout));

    // Late events for the recycled call are ignored
    engine.handle_provider_event(&answered(&handle, "human")).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.bridged_line(), None);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_dial_fails_the_attempt() {
    let provider = MockProvider::new();
    provider.reject("+15550000001");
    let engine = build_engine(test_config(1), provider.clone(), CountingNotifier::new()).await;
    engine.enqueue(Contact::new("c-1", "+15550000001"));
    engine.start();

    assert!(wait_for(LIMIT, || engine.stats().failed == 1).await);
    assert!(wait_for(LIMIT, || engine.line_snapshots()[0].state.is_idle()).await);

    let stats = engine.stats();
    assert_eq!(stats.total_dialed, 1);
    let records = session_records(&engine).await;
    assert_eq!(records[0].status, RecordStatus::Failed);
    assert_eq!(records[0].end_reason, Some(EndReason::DialRejected));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_bridged_call_outlives_line_age() {
    let provider = MockProvider::new();
    let mut config = test_config(1);
    config.lines.max_line_age_secs = 2;
    let engine = build_engine(config, provider.clone(), CountingNotifier::new()).await;
    engine.enqueue(Contact::new("c-1", "+15550000001"));
    engine.start();

    let (line, handle, _) = dialing_lines(&engine, 1).await.remove(0);
    engine.handle_provider_event(&answered(&handle, "human")).unwrap();
    assert!(wait_for(LIMIT, || engine.bridged_line() == Some(line)).await);

    // Well past maxLineAge while the agent is talking
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(engine.bridged_line(), Some(line));
    assert_eq!(engine.stats().watchdog_recycles, 0);
    assert!(!provider.was_disconnected(&handle));

    engine.handle_provider_event(&ended(&handle, "completed", 300)).unwrap();
    assert!(wait_for(LIMIT, || engine.stats().connected == 1).await);
    assert_eq!(engine.stats().talk_time_secs, 300);
    assert_eq!(engine.stats().failed, 0);

    let records = session_records(&engine).await;
    assert_eq!(records[0].status, RecordStatus::Completed);
    assert_eq!(records[0].end_reason, Some(EndReason::Completed));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_amd_report_scores_provider_unknown() {
    let provider = MockProvider::new();
    let engine = build_engine(test_config(1), provider, CountingNotifier::new()).await;
    engine.enqueue(Contact::new("c-1", "+15550000001"));
    engine.start();

    let handle = dialing_lines(&engine, 1).await[0].1.clone();
    engine.handle_provider_event(&answered(&handle, "unknown")).unwrap();
    // Standard sensitivity bridges an undetermined answer as human
    assert!(wait_for(LIMIT, || engine.bridged_line().is_some()).await);
    engine.handle_provider_event(&ended(&handle, "completed", 40)).unwrap();
    assert!(wait_for(LIMIT, || engine.stats().connected == 1).await);

    let records = session_records(&engine).await;
    assert_eq!(records[0].answered_by, Some(AnsweredBy::Human));
    assert_eq!(records[0].metadata["reportedAnsweredBy"], "unknown");

    let report = engine
        .verify(Utc::now() - ChronoDuration::hours(1), Utc::now() + ChronoDuration::minutes(1))
        .await
        .unwrap();
    assert_eq!(report.amd.answered, 1);
    assert_eq!(report.amd.unknown, 1);
    assert_eq!(report.amd.human, 0);
    assert_eq!(report.amd.classification_rate, 0.0);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_hangup_before_dial_returns_is_applied() {
    let provider = MockProvider::new();
    provider.set_dial_delay(Duration::from_millis(500));
    let engine = build_engine(test_config(1), provider.clone(), CountingNotifier::new()).await;
    engine.enqueue(Contact::new("c-1", "+15550000001"));
    engine.start();

    assert!(wait_for(LIMIT, || provider.dial_count() == 1).await);
    let handle = provider.last_handle().unwrap();
    assert!(engine.line_snapshots()[0].handle.is_none());

    let disposition = engine.handle_provider_event(&ended(&handle, "busy", 0)).unwrap();
    assert_eq!(disposition, EventDisposition::Deferred);

    assert!(wait_for(LIMIT, || engine.stats().busy == 1).await);
    let records = session_records(&engine).await;
    let first = records
        .iter()
        .find(|r| r.provider_handle.as_ref() == Some(&handle))
        .unwrap();
    assert_eq!(first.status, RecordStatus::Busy);
    assert_eq!(first.end_reason, Some(EndReason::Busy));

    // Busy is retryable, so the contact comes round again
    assert!(wait_for(LIMIT, || provider.dial_count() == 2).await);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_answer_after_stop_is_not_requeued() {
    let provider = MockProvider::new();
    let engine = build_engine(test_config(1), provider.clone(), CountingNotifier::new()).await;
    engine.enqueue_all(vec![
        Contact::new("c-1", "+15550000001"),
        Contact::new("c-2", "+15550000002"),
    ]);
    engine.start();

    let handle = dialing_lines(&engine, 1).await[0].1.clone();
    engine.stop();
    assert_eq!(engine.queue_len(), 0);

    engine.handle_provider_event(&ended(&handle, "no-answer", 0)).unwrap();
    assert!(engine.wait_stopped(LIMIT).await);
    assert_eq!(engine.stats().no_answer, 1);
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(provider.dial_count(), 1);

    engine.shutdown().await;
}
