//! Reconnect state machine for the persistent transport
//!
//! `Connected -> (failure) -> Retrying(n) -> Connected | Disconnected`
//!
//! The machine is pure: the reconnect task feeds it failures, successful
//! connects and resume signals and acts on the decisions it returns.

use std::time::Duration;

use tracing::{info, warn};

use pulse_core::{PersistentConfig, Timestamp};

/// Supervisor position in the reconnect cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Not yet attempted
    Idle,
    Connected,
    /// Consecutive failures so far
    Retrying(u32),
    /// Gave up; waits for a resume signal
    Disconnected,
}

/// Decision after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Wait, then attempt again
    Backoff(Duration),
    /// Invalidate in-flight requests and stop retrying
    GiveUp,
}

/// Decision after connectivity regained or user activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAction {
    /// Attempt immediately
    Reconnect,
    /// Attempt once the minimum interval since the last attempt elapses
    Defer(Duration),
    /// Connection is up, nothing to do
    Ignore,
}

/// Retry and backoff bookkeeping
#[derive(Debug, Clone)]
pub struct ReconnectSupervisor {
    config: PersistentConfig,
    state: SupervisorState,
    failures: u32,
    last_attempt: Option<Timestamp>,
}

impl ReconnectSupervisor {
    pub fn new(config: &PersistentConfig) -> Self {
        Self {
            config: config.clone(),
            state: SupervisorState::Idle,
            failures: 0,
            last_attempt: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_attempt(&mut self, now: Timestamp) {
        self.last_attempt = Some(now);
    }

    pub fn on_connected(&mut self) {
        if self.failures > 0 {
            info!(failures = self.failures, "connection recovered");
        }
        self.failures = 0;
        self.state = SupervisorState::Connected;
    }

    /// Count a connect or link failure
    pub fn on_failure(&mut self) -> FailureAction {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.config.max_retries {
            warn!(failures = self.failures, "retry budget exhausted, giving up");
            self.state = SupervisorState::Disconnected;
            return FailureAction::GiveUp;
        }
        self.state = SupervisorState::Retrying(self.failures);
        let delay = self.config.backoff_for(self.failures);
        info!(
            failures = self.failures,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        FailureAction::Backoff(delay)
    }

    /// Connectivity regained or user activity
    pub fn on_resume_signal(&mut self, now: Timestamp) -> ResumeAction {
        if self.state == SupervisorState::Connected {
            return ResumeAction::Ignore;
        }
        self.failures = 0;
        let since_last = self
            .last_attempt
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);
        let min_interval = self.config.min_reconnect_interval();
        if since_last >= min_interval {
            ResumeAction::Reconnect
        } else {
            ResumeAction::Defer(min_interval - since_last)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_supervisor() -> ReconnectSupervisor {
        let config = PersistentConfig {
            max_retries: 3,
            backoff_base_ms: 5_000,
            min_reconnect_interval_ms: 60_000,
            ..PersistentConfig::default()
        };
        ReconnectSupervisor::new(&config)
    }

    #[test]
    fn test_backoff_grows_with_retry_count() {
        let mut supervisor = create_test_supervisor();
        assert_eq!(supervisor.on_failure(), FailureAction::Backoff(Duration::from_secs(5)));
        assert_eq!(supervisor.state(), SupervisorState::Retrying(1));
        assert_eq!(supervisor.on_failure(), FailureAction::Backoff(Duration::from_secs(10)));
        assert_eq!(supervisor.state(), SupervisorState::Retrying(2));
    }

    #[test]
    fn test_gives_up_after_exactly_max_retries() {
        let mut supervisor = create_test_supervisor();
        supervisor.on_failure();
        supervisor.on_failure();
        assert_eq!(supervisor.on_failure(), FailureAction::GiveUp);
        assert_eq!(supervisor.state(), SupervisorState::Disconnected);
    }

    #[test]
    fn test_success_resets_failures() {
        let mut supervisor = create_test_supervisor();
        supervisor.on_failure();
        supervisor.on_failure();
        supervisor.on_connected();
        assert_eq!(supervisor.failures(), 0);
        assert_eq!(supervisor.on_failure(), FailureAction::Backoff(Duration::from_secs(5)));
    }

    #[test]
    fn test_resume_respects_min_interval() {
        let mut supervisor = create_test_supervisor();
        supervisor.record_attempt(Timestamp::from_millis(100_000));
        for _ in 0..3 {
            supervisor.on_failure();
        }

        assert_eq!(
            supervisor.on_resume_signal(Timestamp::from_millis(130_000)),
            ResumeAction::Defer(Duration::from_secs(30))
        );
        assert_eq!(supervisor.failures(), 0);
        assert_eq!(
            supervisor.on_resume_signal(Timestamp::from_millis(160_000)),
            ResumeAction::Reconnect
        );
    }

    #[test]
    fn test_resume_ignored_while_connected() {
        let mut supervisor = create_test_supervisor();
        supervisor.on_connected();
        assert_eq!(
            supervisor.on_resume_signal(Timestamp::from_millis(0)),
            ResumeAction::Ignore
        );
    }
}
