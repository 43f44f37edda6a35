// ── Runtime connection configuration ──
//
// Describes *how* to reach a bridge: address, timeouts, and reconnect
// tuning. Credential data lives in `leap_api::TlsCredentials`; the CLI
// constructs both and hands them in. Core never touches disk.

use std::time::Duration;

use leap_api::LEAP_PORT;

/// Configuration for connecting to a single bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bridge address (IP or hostname).
    pub host: String,
    /// LEAP port, 8081 unless the bridge is unusual.
    pub port: u16,
    /// Deadline for the TCP connect and TLS handshake.
    pub connect_timeout: Duration,
    /// Deadline for a single request/response exchange.
    pub request_timeout: Duration,
    /// Keepalive ping cadence.
    pub ping_interval: Duration,
    /// Reconnect backoff tuning.
    pub backoff: BackoffConfig,
}

impl BridgeConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: LEAP_PORT,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
        }
    }
}

// ── Backoff ─────────────────────────────────────────────────────────

/// Exponential backoff configuration for the reconnect supervisor.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnection attempt.
    pub initial: Duration,
    /// Upper bound on the backoff delay.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl BackoffConfig {
    /// `delay = min(initial * 2^attempt, max) ± 20% jitter`
    ///
    /// Jitter is deterministic, seeded from the attempt number; it only
    /// has to spread reconnection storms, not be unpredictable.
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial.as_secs_f64() * 2.0_f64.powi(attempt.min(31) as i32);
        let capped = base.min(self.max.as_secs_f64());
        let jitter_factor = 1.0 + 0.20 * ((attempt as f64 * 7.3).sin());
        Duration::from_secs_f64((capped * jitter_factor).max(0.0))
    }
}
