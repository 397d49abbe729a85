//! Client poll loop: `waiting -> resolved | timed_out`.
//!
//! Polls every `interval`; stops with the reply once the endpoint reports ready, or
//! with a locally generated notice once `deadline` has elapsed. A failed poll counts
//! as "not ready" for that tick and does not touch the deadline clock. Each poll is
//! given at most one `interval` to answer; a poll that hangs longer is abandoned and
//! also counts as "not ready". The loop has no cancel hook and always ends in one of
//! the two terminal states.

use crate::client::error::ClientError;
use crate::config::RelayConfig;
use crate::gateway::PollResponse;
use crate::message::{MessageView, Role};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Anything that can answer "is this reply ready yet".
#[async_trait]
pub trait PollSource: Send + Sync {
    async fn poll(&self, msg_id: &str) -> Result<PollResponse, ClientError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

impl PollSettings {
    pub fn from_config(relay: &RelayConfig) -> Self {
        Self {
            interval: relay.poll_interval(),
            deadline: relay.poll_deadline(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Resolved { message: MessageView, attempts: u32 },
    /// `notice` is synthesized locally; it was never stored.
    TimedOut { notice: MessageView, attempts: u32 },
}

impl PollOutcome {
    /// The message to display in either terminal state.
    pub fn message(&self) -> &MessageView {
        match self {
            PollOutcome::Resolved { message, .. } => message,
            PollOutcome::TimedOut { notice, .. } => notice,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Resolved { attempts, .. } | PollOutcome::TimedOut { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// The notice shown in place of a reply that never came.
pub fn timeout_notice(text: &str) -> MessageView {
    MessageView {
        id: format!("timeout-{}", uuid::Uuid::new_v4()),
        content: text.to_string(),
        role: Role::Agent,
        created_at: chrono::Utc::now(),
        agent_id: None,
    }
}

pub struct PollLoop<'a, S: PollSource + ?Sized> {
    source: &'a S,
    settings: PollSettings,
    notice: String,
}

impl<'a, S: PollSource + ?Sized> PollLoop<'a, S> {
    pub fn new(source: &'a S, settings: PollSettings, notice: impl Into<String>) -> Self {
        Self {
            source,
            settings,
            notice: notice.into(),
        }
    }

    /// Wait for `msg_id` to resolve.
    pub async fn run(&self, msg_id: &str) -> PollOutcome {
        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            tokio::time::sleep(self.settings.interval).await;
            attempts += 1;
            let polled = tokio::time::timeout(self.settings.interval, self.source.poll(msg_id)).await;
            match polled {
                Ok(Ok(PollResponse {
                    ready: true,
                    message: Some(message),
                })) => {
                    log::debug!("reply {} resolved after {} poll(s)", msg_id, attempts);
                    return PollOutcome::Resolved { message, attempts };
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => log::debug!("poll {} failed, treating as not ready: {}", msg_id, e),
                Err(_) => log::debug!(
                    "poll {} gave no answer within {:?}, treating as not ready",
                    msg_id,
                    self.settings.interval
                ),
            }
            if started.elapsed() >= self.settings.deadline {
                log::info!(
                    "reply {} timed out after {} poll(s) ({:?})",
                    msg_id,
                    attempts,
                    self.settings.deadline
                );
                return PollOutcome::TimedOut {
                    notice: timeout_notice(&self.notice),
                    attempts,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Never answers.
    struct Stuck;

    #[async_trait]
    impl PollSource for Stuck {
        async fn poll(&self, _msg_id: &str) -> Result<PollResponse, ClientError> {
            std::future::pending().await
        }
    }

    /// Becomes ready on the given attempt (never when None); optionally fails every call before it.
    struct Scripted {
        calls: AtomicU32,
        ready_on: Option<u32>,
        fail: bool,
        seen_at: Mutex<Vec<Duration>>,
        started: Instant,
    }

    impl Scripted {
        fn new(ready_on: Option<u32>, fail: bool) -> Self {
            Self {
                calls: AtomicU32::new(0),
                ready_on,
                fail,
                seen_at: Mutex::new(Vec::new()),
                started: Instant::now(),
            }
        }
    }

    fn reply(content: &str) -> MessageView {
        MessageView {
            id: "msg-1".into(),
            content: content.into(),
            role: Role::Agent,
            created_at: chrono::Utc::now(),
            agent_id: Some("a1".into()),
        }
    }

    #[async_trait]
    impl PollSource for Scripted {
        async fn poll(&self, _msg_id: &str) -> Result<PollResponse, ClientError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen_at.lock().unwrap().push(self.started.elapsed());
            if self.ready_on == Some(n) {
                return Ok(PollResponse::ready(reply("hi there")));
            }
            if self.fail {
                return Err(ClientError::Api {
                    status: 502,
                    message: "bad gateway".into(),
                });
            }
            Ok(PollResponse::pending())
        }
    }

    fn settings() -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(2_000),
            deadline: Duration::from_millis(35_000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_times_out_after_eighteen_polls() {
        let source = Scripted::new(None, false);
        let out = PollLoop::new(&source, settings(), "timed out").run("msg-1").await;
        match &out {
            PollOutcome::TimedOut { notice, attempts } => {
                assert_eq!(*attempts, 18);
                assert_eq!(notice.content, "timed out");
                assert_eq!(notice.role, Role::Agent);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        let seen = source.seen_at.lock().unwrap();
        assert_eq!(seen.first().copied(), Some(Duration::from_millis(2_000)));
        assert_eq!(seen.last().copied(), Some(Duration::from_millis(36_000)));
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_on_first_ready_poll() {
        let source = Scripted::new(Some(3), false);
        let out = PollLoop::new(&source, settings(), "timed out").run("msg-1").await;
        assert_eq!(out.attempts(), 3);
        assert_eq!(out.message().content, "hi there");
        assert!(matches!(out, PollOutcome::Resolved { .. }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_count_as_not_ready_without_moving_deadline() {
        let source = Scripted::new(None, true);
        let out = PollLoop::new(&source, settings(), "timed out").run("msg-1").await;
        assert!(matches!(out, PollOutcome::TimedOut { attempts: 18, .. }));

        let recovering = Scripted::new(Some(5), true);
        let out = PollLoop::new(&recovering, settings(), "timed out")
            .run("msg-1")
            .await;
        assert!(matches!(out, PollOutcome::Resolved { attempts: 5, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn settings_come_from_config() {
        let mut relay = RelayConfig::default();
        relay.poll_interval_ms = 500;
        relay.poll_deadline_ms = 2_000;
        let source = Scripted::new(None, false);
        let out = PollLoop::new(&source, PollSettings::from_config(&relay), "late")
            .run("msg-1")
            .await;
        assert_eq!(out.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_poll_counts_as_not_ready_and_loop_still_times_out() {
        let started = Instant::now();
        let out = tokio::time::timeout(
            Duration::from_secs(600),
            PollLoop::new(&Stuck, settings(), "timed out").run("msg-1"),
        )
        .await
        .expect("loop ends near its deadline even when polls never answer");
        assert!(matches!(out, PollOutcome::TimedOut { .. }));
        assert_eq!(out.message().content, "timed out");
        // Each attempt is one interval of sleep plus at most one interval of waiting.
        assert_eq!(out.attempts(), 9);
        assert!(started.elapsed() <= Duration::from_millis(35_000 + 4_000));
    }
}
