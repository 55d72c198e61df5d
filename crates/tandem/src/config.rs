//! Session configuration.

use std::time::Duration;

use tandem_sync::ProtocolConfig;

/// Configuration shared by host and client sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Host: how often authorized connections are re-challenged.
    pub challenge_interval: Duration,
    /// Host: how often a changed document is archived.
    pub save_interval: Duration,
    /// Client: how long to wait for a challenge with a stored grant.
    pub handshake_timeout: Duration,
    /// Client: reconnects allowed after authorization failures.
    pub max_reconnect_attempts: u32,
    /// Client: first reconnect delay, doubled per attempt.
    pub reconnect_backoff: Duration,
    /// Client: clear the view when the host link closes.
    pub reset_on_disconnect: bool,
    /// Capacity of the command and notice channels.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            challenge_interval: Duration::from_secs(30),
            save_interval: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 3,
            reconnect_backoff: Duration::from_millis(500),
            reset_on_disconnect: true,
            event_buffer: 256,
        }
    }
}

impl SessionConfig {
    pub fn challenge_interval(mut self, interval: Duration) -> Self {
        self.challenge_interval = interval;
        self
    }

    pub fn save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn reset_on_disconnect(mut self, reset: bool) -> Self {
        self.reset_on_disconnect = reset;
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// The subset the sans-IO protocol layer needs.
    pub fn protocol(&self) -> ProtocolConfig {
        ProtocolConfig {
            handshake_timeout: self.handshake_timeout,
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_backoff: self.reconnect_backoff,
            reset_on_disconnect: self.reset_on_disconnect,
        }
    }
}
