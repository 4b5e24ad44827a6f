//! Logging and tracing initialization.
//!
//! Structured logging via the `tracing` ecosystem, either as pretty console
//! output or as JSON for log aggregation.
//!
//! Severity conventions: socket faults are `error`, rejected commands are
//! `warn`, lifecycle events are `info` and per-message traffic is `debug`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{LogLevel, ServerConfig};

/// Configuration for the logging system.
#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Default threshold when `RUST_LOG` is not set
    pub level: LogLevel,
}

impl From<&ServerConfig> for LogConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            json: config.json_logs,
            level: config.log_level,
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once, early in `main()`, after config is loaded. `RUST_LOG` overrides
/// the configured level. Returns an error if a subscriber is already set.
pub fn init(config: LogConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let level = tracing::Level::from(config.level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("taskrelay={}", level.as_str().to_lowercase()))
    });

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .try_init()
    }
}

/// Rate limiter for a log line that can repeat in a tight loop, such as a
/// listener whose accept keeps failing.
pub struct LogThrottle {
    interval_ms: u64,
    /// Last log time in ms since `start`, or `NEVER_LOGGED`
    last_log_ms: AtomicU64,
    start: Instant,
}

const NEVER_LOGGED: u64 = u64::MAX;

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_log_ms: AtomicU64::new(NEVER_LOGGED),
            start: Instant::now(),
        }
    }

    /// Returns true if enough time has passed since the last log.
    pub fn should_log(&self) -> bool {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let last = self.last_log_ms.load(Ordering::Relaxed);

        let due = last == NEVER_LOGGED || now_ms.saturating_sub(last) >= self.interval_ms;
        due && self
            .last_log_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// Allow the next log immediately.
    pub fn reset(&self) {
        self.last_log_ms.store(NEVER_LOGGED, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_allows_first_log() {
        let throttle = LogThrottle::new(Duration::from_secs(1));
        assert!(throttle.should_log());
    }

    #[test]
    fn throttle_blocks_repeat_within_interval() {
        let throttle = LogThrottle::new(Duration::from_secs(1));
        assert!(throttle.should_log());
        assert!(!throttle.should_log());
    }

    #[test]
    fn throttle_reset_allows_log() {
        let throttle = LogThrottle::new(Duration::from_secs(100));
        assert!(throttle.should_log());
        throttle.reset();
        assert!(throttle.should_log());
    }

    #[test]
    fn log_config_follows_server_config() {
        let server = ServerConfig {
            json_logs: true,
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        let config = LogConfig::from(&server);
        assert!(config.json);
        assert_eq!(tracing::Level::from(config.level), tracing::Level::WARN);
    }
}
