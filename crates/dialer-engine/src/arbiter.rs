//! # Single-Connection Arbiter
//!
//! The agent can talk to one callee at a time. When several lines detect an
//! answer close together, each line claims the agent and the arbiter picks one.
//!
//! ## Protocol
//!
//! 1. The first claim on a vacant arbiter opens a decision round lasting
//!    `race_window`. Claims arriving during the round join it.
//! 2. When the round closes, the contender with the earliest answer timestamp
//!    wins; ties go to the lowest line id.
//! 3. The winner is committed with a compare-and-swap on the winner slot, so at
//!    most one line is ever bridged.
//! 4. A claim made while a winner is bridged loses immediately.
//! 5. The winner releases the slot when its call ends.
//!
//! With a zero race window the protocol degenerates to first-claim-wins.
//!
//! Losers are disconnected by their own line worker. The arbiter only supplies
//! the verdict and the instant the loss took effect, from which the worker
//! measures drop latency. Rejection notices are delivered out of band by
//! [`spawn_rejection_notice`], so a slow webhook never delays arbitration.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use chrono::{DateTime, Utc};

use crate::error::{DialerError, Result};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::stats::StatsAggregator;
use crate::types::{CallHandle, LineId};

const VACANT: usize = 0;

/// Result of a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The line is now the bridged line
    Won,
    /// Another line holds the agent
    Lost {
        winner: LineId,
        /// When the loss became effective; drop latency is measured from here
        since: Instant,
    },
}

impl Verdict {
    pub fn is_won(&self) -> bool {
        matches!(self, Self::Won)
    }
}

struct Contender {
    line: LineId,
    at: DateTime<Utc>,
    reply: oneshot::Sender<Verdict>,
}

enum Entry {
    Decided(Verdict),
    Joined(oneshot::Receiver<Verdict>),
    Opened(oneshot::Receiver<Verdict>),
}

/// Per-session arbiter
pub struct Arbiter {
    winner: AtomicUsize,
    round: Mutex<Option<Vec<Contender>>>,
    race_window: Duration,
}

impl Arbiter {
    pub fn new(race_window: Duration) -> Self {
        Self {
            winner: AtomicUsize::new(VACANT),
            round: Mutex::new(None),
            race_window,
        }
    }

    /// The currently bridged line, if any
    pub fn winner(&self) -> Option<LineId> {
        match self.winner.load(Ordering::Acquire) {
            VACANT => None,
            line => Some(LineId(line)),
        }
    }

    fn lost_to(winner: usize) -> Verdict {
        Verdict::Lost {
            winner: LineId(winner),
            since: Instant::now(),
        }
    }

    fn commit(&self, line: LineId) -> std::result::Result<usize, usize> {
        self.winner
            .compare_exchange(VACANT, line.0, Ordering::AcqRel, Ordering::Acquire)
    }

    /// Claim the agent for `line`, whose call was answered at `at`
    pub async fn claim(&self, line: LineId, at: DateTime<Utc>) -> Verdict {
        let entry = self.enter(line, at);
        let rx = match entry {
            Entry::Decided(verdict) => return verdict,
            Entry::Joined(rx) => rx,
            Entry::Opened(rx) => {
                sleep(self.race_window).await;
                self.close_round();
                rx
            }
        };
        match rx.await {
            Ok(verdict) => verdict,
            Err(_) => Self::lost_to(self.winner.load(Ordering::Acquire)),
        }
    }

    fn enter(&self, line: LineId, at: DateTime<Utc>) -> Entry {
        let mut round = self.round.lock();

        let current = self.winner.load(Ordering::Acquire);
        if current == line.0 {
            return Entry::Decided(Verdict::Won);
        }
        if current != VACANT {
            debug!(line_id = %line, winner = current, "Claim while agent is bridged");
            return Entry::Decided(Self::lost_to(current));
        }

        if self.race_window.is_zero() {
            return Entry::Decided(match self.commit(line) {
                Ok(_) => {
                    info!(line_id = %line, "Agent bridged");
                    Verdict::Won
                }
                Err(current) => Self::lost_to(current),
            });
        }

        let (tx, rx) = oneshot::channel();
        let contender = Contender { line, at, reply: tx };
        match round.as_mut() {
            Some(contenders) => {
                contenders.push(contender);
                debug!(line_id = %line, contenders = contenders.len(), "Joined decision round");
                Entry::Joined(rx)
            }
            None => {
                debug!(line_id = %line, window_ms = self.race_window.as_millis() as u64, "Opened decision round");
                *round = Some(vec![contender]);
                Entry::Opened(rx)
            }
        }
    }

    fn close_round(&self) {
        let mut round = self.round.lock();
        let Some(mut contenders) = round.take() else {
            return;
        };
        contenders.sort_by(|a, b| a.at.cmp(&b.at).then(a.line.cmp(&b.line)));

        let mut iter = contenders.into_iter();
        let Some(first) = iter.next() else {
            return;
        };

        let winner = match self.commit(first.line) {
            Ok(_) => {
                info!(line_id = %first.line, "Agent bridged");
                let _ = first.reply.send(Verdict::Won);
                first.line.0
            }
            Err(current) => {
                let _ = first.reply.send(Self::lost_to(current));
                current
            }
        };

        for loser in iter {
            info!(line_id = %loser.line, winner = winner, "Lost arbitration");
            let _ = loser.reply.send(Self::lost_to(winner));
        }
    }

    /// Free the agent when the bridged call ends. Returns false if `line` was
    /// not the winner.
    pub fn release(&self, line: LineId) -> bool {
        let released = self
            .winner
            .compare_exchange(line.0, VACANT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if released {
            info!(line_id = %line, "Agent released");
        }
        released
    }
}

/// Body of a rejection notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionNotice {
    pub call_sid: CallHandle,
    pub line_id: LineId,
    pub phone: String,
    pub reason: String,
}

impl RejectionNotice {
    pub fn agent_busy(handle: CallHandle, line_id: LineId, phone: impl Into<String>) -> Self {
        Self {
            call_sid: handle,
            line_id,
            phone: phone.into(),
            reason: "agent_busy".to_string(),
        }
    }
}

/// Tells an external party that a dropped call lost the agent race
#[async_trait]
pub trait RejectionNotifier: Send + Sync {
    async fn notify(&self, notice: &RejectionNotice) -> Result<()>;
}

/// Posts rejection notices as JSON
pub struct HttpRejectionNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpRejectionNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| DialerError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RejectionNotifier for HttpRejectionNotifier {
    async fn notify(&self, notice: &RejectionNotice) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notice)
            .send()
            .await
            .map_err(|e| DialerError::network("rejection_notice", e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(DialerError::network(
                "rejection_notice",
                format!("receiver answered {}", status),
            ));
        }
        Err(DialerError::provider(format!(
            "rejection notice refused with {}",
            status
        )))
    }
}

/// Deliver a rejection notice in the background, retrying with backoff
pub fn spawn_rejection_notice(
    notifier: Arc<dyn RejectionNotifier>,
    notice: RejectionNotice,
    retry: RetryConfig,
    stats: Arc<StatsAggregator>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let result = retry_with_backoff("rejection_notice", &retry, |_| {
            let notifier = notifier.clone();
            let notice = notice.clone();
            async move { notifier.notify(&notice).await }
        })
        .await;

        match result {
            Ok(()) => {
                debug!(handle = %notice.call_sid, line_id = %notice.line_id, "Rejection notice delivered");
                stats.record_notification(true);
            }
            Err(e) => {
                warn!(handle = %notice.call_sid, line_id = %notice.line_id, error = %e, "Rejection notice abandoned");
                stats.record_notification(false);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ProcessedEvents;
    use std::sync::atomic::AtomicU32;

    #[tokio::test(start_paused = true)]
    async fn test_earliest_answer_wins_the_round() {
        let arbiter = Arc::new(Arbiter::new(Duration::from_millis(150)));
        let t0 = Utc::now();

        // Line 3 claims first but answered later than line 2
        let a = arbiter.clone();
        let late = tokio::spawn(async move { a.claim(LineId(3), t0 + chrono::Duration::milliseconds(80)).await });
        tokio::task::yield_now().await;
        let a = arbiter.clone();
        let early = tokio::spawn(async move { a.claim(LineId(2), t0).await });

        let (late, early) = (late.await.unwrap(), early.await.unwrap());
        assert!(early.is_won());
        assert!(matches!(late, Verdict::Lost { winner: LineId(2), .. }));
        assert_eq!(arbiter.winner(), Some(LineId(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ties_go_to_lowest_line() {
        let arbiter = Arc::new(Arbiter::new(Duration::from_millis(150)));
        let at = Utc::now();
        let handles: Vec<_> = [3usize, 1, 2]
            .into_iter()
            .map(|l| {
                let a = arbiter.clone();
                tokio::spawn(async move { (l, a.claim(LineId(l), at).await) })
            })
            .collect();

        let mut winners = Vec::new();
        for h in handles {
            let (line, verdict) = h.await.unwrap();
            if verdict.is_won() {
                winners.push(line);
            }
        }
        assert_eq!(winners, vec![1]);
    }

    #[tokio::test]
    async fn test_claim_while_bridged_loses_and_release_frees() {
        let arbiter = Arbiter::new(Duration::ZERO);
        assert!(arbiter.claim(LineId(1), Utc::now()).await.is_won());
        assert!(!arbiter.claim(LineId(2), Utc::now()).await.is_won());

        assert!(!arbiter.release(LineId(2)));
        assert!(arbiter.release(LineId(1)));
        assert_eq!(arbiter.winner(), None);
        assert!(arbiter.claim(LineId(2), Utc::now()).await.is_won());
    }

    struct FlakyNotifier {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl RejectionNotifier for FlakyNotifier {
        async fn notify(&self, _notice: &RejectionNotice) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(DialerError::network("notify", "connection reset"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_rejection_notice_is_retried() {
        let stats = Arc::new(StatsAggregator::new(Arc::new(ProcessedEvents::new())));
        let notifier = Arc::new(FlakyNotifier { calls: AtomicU32::new(0), fail_first: 2 });
        let notice = RejectionNotice::agent_busy(CallHandle::from("CA7"), LineId(2), "+15550001111");

        spawn_rejection_notice(notifier.clone(), notice, RetryConfig::immediate(3), stats.clone())
            .await
            .unwrap();

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.snapshot().notifications_sent, 1);
    }

    #[tokio::test]
    async fn test_rejection_notice_failure_is_counted() {
        let stats = Arc::new(StatsAggregator::new(Arc::new(ProcessedEvents::new())));
        let notifier = Arc::new(FlakyNotifier { calls: AtomicU32::new(0), fail_first: 10 });
        let notice = RejectionNotice::agent_busy(CallHandle::from("CA8"), LineId(3), "+15550002222");

        spawn_rejection_notice(notifier.clone(), notice, RetryConfig::immediate(3), stats.clone())
            .await
            .unwrap();

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.snapshot().notifications_failed, 1);
    }

    #[test]
    fn test_notice_wire_format() {
        let notice = RejectionNotice::agent_busy(CallHandle::from("CA1"), LineId(2), "+15550001111");
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["callSid"], "CA1");
        assert_eq!(json["lineId"], 2);
        assert_eq!(json["reason"], "agent_busy");
    }
}
