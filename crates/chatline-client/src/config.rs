use std::time::Duration;

/// Reconnection attempts made after a drop before giving up.
pub const DEFAULT_RECONNECTION_ATTEMPTS: u32 = 5;

/// First reconnection delay; doubled on each further attempt.
pub const DEFAULT_RECONNECTION_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for the reconnection delay.
pub const DEFAULT_RECONNECTION_DELAY_MAX: Duration = Duration::from_secs(5);

/// Bound on the whole handshake (WebSocket upgrade + Engine.IO open + Socket.IO connect).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport tuning. The application never retries on its own; every
/// reconnection happens here.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub reconnection: bool,
    pub reconnection_attempts: u32,
    pub reconnection_delay: Duration,
    pub reconnection_delay_max: Duration,
    pub timeout: Duration,
    /// Socket.IO endpoint path on the server.
    pub path: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnection: true,
            reconnection_attempts: DEFAULT_RECONNECTION_ATTEMPTS,
            reconnection_delay: DEFAULT_RECONNECTION_DELAY,
            reconnection_delay_max: DEFAULT_RECONNECTION_DELAY_MAX,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            path: "/socket.io/".to_string(),
        }
    }
}

impl TransportConfig {
    /// Delay before reconnection attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.reconnection_delay
            .saturating_mul(1u32 << shift)
            .min(self.reconnection_delay_max)
    }
}
