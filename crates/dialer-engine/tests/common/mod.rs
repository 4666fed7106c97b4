//! Shared fixtures for dialer-engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use dialer_engine::arbiter::{RejectionNotice, RejectionNotifier};
use dialer_engine::prelude::*;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Provider that accepts every dial and records what it was asked to do
#[derive(Default)]
pub struct MockProvider {
    next: AtomicUsize,
    dials: Mutex<Vec<(String, CallHandle)>>,
    disconnects: Mutex<Vec<CallHandle>>,
    rejected: Mutex<HashSet<String>>,
    dial_delay: Mutex<Option<Duration>>,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuse dials to this (normalized) number
    pub fn reject(&self, phone: &str) {
        self.rejected.lock().insert(phone.to_string());
    }

    /// Hold each `dial` this long after the handle is issued, as a slow
    /// provider API would
    pub fn set_dial_delay(&self, delay: Duration) {
        *self.dial_delay.lock() = Some(delay);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.lock().len()
    }

    pub fn dialed_numbers(&self) -> Vec<String> {
        self.dials.lock().iter().map(|(phone, _)| phone.clone()).collect()
    }

    pub fn last_handle(&self) -> Option<CallHandle> {
        self.dials.lock().last().map(|(_, handle)| handle.clone())
    }

    pub fn disconnected(&self) -> Vec<CallHandle> {
        self.disconnects.lock().clone()
    }

    pub fn was_disconnected(&self, handle: &CallHandle) -> bool {
        self.disconnects.lock().contains(handle)
    }
}

#[async_trait]
impl TelephonyProvider for MockProvider {
    async fn dial(&self, number: &str, _caller_id: &str, _options: &DialOptions) -> Result<CallHandle> {
        if self.rejected.lock().contains(number) {
            return Err(DialerError::provider(format!("number {} rejected", number)));
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = CallHandle(format!("CA{:04}", n));
        self.dials.lock().push((number.to_string(), handle.clone()));
        let delay = *self.dial_delay.lock();
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        Ok(handle)
    }

    async fn disconnect(&self, handle: &CallHandle) -> Result<()> {
        self.disconnects.lock().push(handle.clone());
        Ok(())
    }
}

/// Notifier that counts deliveries, optionally failing every attempt
#[derive(Default)]
pub struct CountingNotifier {
    attempts: AtomicUsize,
    failing: bool,
    notices: Mutex<Vec<RejectionNotice>>,
}

impl CountingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            failing: true,
            ..Default::default()
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn notices(&self) -> Vec<RejectionNotice> {
        self.notices.lock().clone()
    }
}

#[async_trait]
impl RejectionNotifier for CountingNotifier {
    async fn notify(&self, notice: &RejectionNotice) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(DialerError::network("notify", "connection refused"));
        }
        self.notices.lock().push(notice.clone());
        Ok(())
    }
}

/// Fast timings so scenarios finish in a few virtual seconds
pub fn test_config(lines: usize) -> DialerConfig {
    let mut config = DialerConfig::default();
    config.parallel_lines = lines;
    config.scheduler.dial_rate_per_second = 100.0;
    config.scheduler.tick_interval_ms = 10;
    config.lines.cool_down_ms = 50;
    config.lines.watchdog_interval_ms = 100;
    config.arbiter.race_window_ms = 150;
    config.arbiter.notification_initial_delay_ms = 10;
    config
}

pub async fn build_engine(
    config: DialerConfig,
    provider: Arc<MockProvider>,
    notifier: Arc<CountingNotifier>,
) -> DialerEngine {
    DialerEngineBuilder::new()
        .with_config(config)
        .with_provider(provider)
        .with_notifier(notifier)
        .build()
        .await
        .expect("engine builds")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("dialer_engine=debug")
        .try_init();
}

/// Poll `check` until it holds or `limit` elapses
pub async fn wait_for<F: FnMut() -> bool>(limit: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Async variant of [`wait_for`] for checks that hit the store
pub async fn wait_for_async<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until `n` lines carry a provider handle, returning (line, handle, phone)
pub async fn dialing_lines(engine: &DialerEngine, n: usize) -> Vec<(LineId, CallHandle, String)> {
    let ready = wait_for(Duration::from_secs(5), || {
        engine.line_snapshots().iter().filter(|s| s.handle.is_some()).count() >= n
    })
    .await;
    assert!(ready, "expected {} lines dialing", n);

    engine
        .line_snapshots()
        .into_iter()
        .filter_map(|s| Some((s.line_id, s.handle?, s.phone?)))
        .collect()
}

pub fn answered(handle: &CallHandle, by: &str) -> ProviderEvent {
    ProviderEvent::new(
        handle.0.clone(),
        ProviderEventKind::Answered {
            answered_by: by.to_string(),
        },
    )
}

pub fn ended(handle: &CallHandle, reason: &str, duration: u64) -> ProviderEvent {
    ProviderEvent::new(
        handle.0.clone(),
        ProviderEventKind::Ended {
            reason: reason.to_string(),
            duration: Some(duration),
        },
    )
}

pub async fn session_records(engine: &DialerEngine) -> Vec<CallRecord> {
    engine
        .store()
        .by_session(&engine.session().id)
        .await
        .expect("store query")
}
