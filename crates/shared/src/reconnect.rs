//! Reconnect backoff state machine
//!
//! Realtime clients own their reconnect loop: the server takes no action
//! toward a dropped connection beyond marking presence. This module models
//! that loop as an explicit state machine — disconnected, reconnecting with
//! an attempt counter, connected — with a bounded exponential delay
//! schedule. Entering `Connected` always yields a `Resync` action: the
//! client must re-fetch authoritative state before trusting live events.

use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;

/// Connection state as seen by the reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Reconnecting { attempt: u32 },
    Connected,
}

/// What the client must do after a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Wait this long, then attempt to connect.
    Backoff(Duration),
    /// Connection established: perform the authoritative resync fetch now.
    Resync,
    /// Attempt budget exhausted; surface the failure to the user.
    GiveUp,
}

/// Bounded-exponential-backoff reconnect policy.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    state: ConnectionState,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The connection dropped (or was never up). Moves into `Reconnecting`
    /// and returns the delay before the next attempt.
    pub fn on_disconnect(&mut self) -> ReconnectAction {
        let attempt = match self.state {
            ConnectionState::Reconnecting { attempt } => attempt + 1,
            _ => 1,
        };

        if attempt > self.max_attempts {
            self.state = ConnectionState::Disconnected;
            return ReconnectAction::GiveUp;
        }

        self.state = ConnectionState::Reconnecting { attempt };
        ReconnectAction::Backoff(self.delay_for(attempt))
    }

    /// A connection attempt succeeded. Resets the attempt counter; the
    /// mandatory follow-up is a resync fetch, whether this is a cold start
    /// or a recovery.
    pub fn on_connected(&mut self) -> ReconnectAction {
        self.state = ConnectionState::Connected;
        ReconnectAction::Resync
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        ExponentialBackoff::from_millis(self.base_delay.as_millis() as u64)
            .max_delay(self.max_delay)
            .nth(attempt.saturating_sub(1) as usize)
            .unwrap_or(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(15), 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_from_cold_start_requires_resync() {
        let mut policy = ReconnectPolicy::default();
        assert_eq!(policy.state(), ConnectionState::Disconnected);
        assert_eq!(policy.on_connected(), ReconnectAction::Resync);
        assert_eq!(policy.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_attempts_count_up_and_reset() {
        let mut policy = ReconnectPolicy::default();

        policy.on_disconnect();
        assert_eq!(policy.state(), ConnectionState::Reconnecting { attempt: 1 });
        policy.on_disconnect();
        assert_eq!(policy.state(), ConnectionState::Reconnecting { attempt: 2 });

        policy.on_connected();
        policy.on_disconnect();
        assert_eq!(policy.state(), ConnectionState::Reconnecting { attempt: 1 });
    }

    #[test]
    fn test_delays_grow_but_stay_bounded() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(100), Duration::from_secs(2), 20);

        let mut last = Duration::ZERO;
        for _ in 0..10 {
            match policy.on_disconnect() {
                ReconnectAction::Backoff(delay) => {
                    assert!(delay >= last || delay == Duration::from_secs(2));
                    assert!(delay <= Duration::from_secs(2));
                    last = delay;
                }
                other => panic!("expected backoff, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_gives_up_after_budget() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(10), Duration::from_secs(1), 2);

        assert!(matches!(policy.on_disconnect(), ReconnectAction::Backoff(_)));
        assert!(matches!(policy.on_disconnect(), ReconnectAction::Backoff(_)));
        assert_eq!(policy.on_disconnect(), ReconnectAction::GiveUp);
        assert_eq!(policy.state(), ConnectionState::Disconnected);
    }
}
