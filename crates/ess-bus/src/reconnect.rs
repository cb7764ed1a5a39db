//! Connection state machine and reconnect delay policy.
//!
//! ```text
//! Disconnected --begin_attempt--> Connecting --connected--> Connected
//!      ^                              |                        |
//!      +-------connect_failed---------+                        |
//!      +-----------------------connection_lost-----------------+
//! ```
//!
//! [`Reconnector`] only tracks state and computes delays; the supervisor
//! does the waiting.

use std::fmt;
use std::time::Duration;

use ess_core::config::BusConfig;

/// Where the connection currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected {
        /// Consecutive failed connect attempts since the last success.
        failures: u32,
    },
    /// A connect attempt is in flight.
    Connecting {
        /// 1-based attempt number since the last success.
        attempt: u32,
    },
    /// Connected and consuming.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected { failures } => write!(f, "disconnected ({failures} failures)"),
            Self::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            Self::Connected => f.write_str("connected"),
        }
    }
}

/// Delay between reconnect attempts.
///
/// Attempt `k` waits `initial_delay * multiplier^(k-1)`, capped at
/// `max_delay`. A multiplier of 1 gives a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: u32,
}

impl ReconnectPolicy {
    /// Fixed delay between every attempt.
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1,
        }
    }

    /// Policy from the bus config section.
    pub const fn from_config(config: &BusConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.reconnect_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            multiplier: config.reconnect_multiplier,
        }
    }

    /// Delay after the `attempt`-th consecutive failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay.max(self.initial_delay))
    }
}

/// Tracks [`ConnectionState`] and hands out delays.
#[derive(Debug, Clone)]
pub struct Reconnector {
    policy: ReconnectPolicy,
    state: ConnectionState,
}

impl Reconnector {
    /// Start disconnected with no failures.
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected { failures: 0 },
        }
    }

    /// Current state.
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Policy in force.
    pub const fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Enter `Connecting`; returns the attempt number.
    pub const fn begin_attempt(&mut self) -> u32 {
        let attempt = match self.state {
            ConnectionState::Disconnected { failures } => failures.saturating_add(1),
            ConnectionState::Connecting { attempt } => attempt,
            ConnectionState::Connected => 1,
        };
        self.state = ConnectionState::Connecting { attempt };
        attempt
    }

    /// Enter `Connected`.
    pub const fn connected(&mut self) {
        self.state = ConnectionState::Connected;
    }

    /// Record a failed connect; returns how long to wait before retrying.
    pub fn connect_failed(&mut self) -> Duration {
        let failures = match self.state {
            ConnectionState::Connecting { attempt } => attempt,
            ConnectionState::Disconnected { failures } => failures.saturating_add(1),
            ConnectionState::Connected => 1,
        };
        self.state = ConnectionState::Disconnected { failures };
        self.policy.delay_for(failures)
    }

    /// Record a lost connection; returns how long to wait before
    /// reconnecting.
    pub fn connection_lost(&mut self) -> Duration {
        self.state = ConnectionState::Disconnected { failures: 0 };
        self.policy.delay_for(1)
    }
}
