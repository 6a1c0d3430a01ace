//! Backoff between failed refresh attempts
//!
//! A refresh that fails transiently is retried until the caller's deadline
//! elapses. The handler here spaces those retries out so a flapping provider
//! is not hammered for the whole deadline.

use std::time::Duration;

/// Configuration for how retry delays grow after consecutive errors
#[derive(Clone, Debug)]
pub struct ErrorBackoffConfig {
    initial_error_delay: Duration,
    max_error_delay: Duration,
    multiplier: u64,
}

impl Default for ErrorBackoffConfig {
    /// 100 ms initial delay, doubling per error, capped at 15 seconds
    fn default() -> Self {
        Self {
            initial_error_delay: Duration::from_millis(100),
            max_error_delay: Duration::from_secs(15),
            multiplier: 2,
        }
    }
}

impl ErrorBackoffConfig {
    /// Constructs a new backoff configuration
    ///
    /// The first error is delayed by `initial_error_delay`; each subsequent
    /// error multiplies the previous delay by `multiplier`, capped at
    /// `max_error_delay`.
    pub fn new(initial_error_delay: Duration, max_error_delay: Duration, multiplier: u64) -> Self {
        Self {
            initial_error_delay,
            max_error_delay,
            multiplier,
        }
    }
}

/// Tracks consecutive errors and reports the delay before the next attempt
#[derive(Debug)]
pub struct ErrorBackoffHandler {
    config: ErrorBackoffConfig,
    last_delay: Option<Duration>,
}

impl ErrorBackoffHandler {
    /// Constructs a handler with no errors recorded
    pub fn new(config: ErrorBackoffConfig) -> Self {
        Self {
            config,
            last_delay: None,
        }
    }

    /// Reports a success, resetting the delay state
    pub fn success(&mut self) {
        self.last_delay = None;
    }

    /// Reports a failure and returns the delay to wait before retrying
    pub fn error(&mut self) -> Duration {
        let next = match self.last_delay {
            Some(last) => {
                Duration::from_millis(last.as_millis() as u64 * self.config.multiplier)
                    .min(self.config.max_error_delay)
            }
            None => self.config.initial_error_delay,
        };
        self.last_delay = Some(next);
        next
    }
}

impl From<ErrorBackoffConfig> for ErrorBackoffHandler {
    fn from(config: ErrorBackoffConfig) -> Self {
        Self::new(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_to_the_cap_and_reset_on_success() {
        let config = ErrorBackoffConfig::new(
            Duration::from_millis(100),
            Duration::from_millis(350),
            2,
        );
        let mut handler = ErrorBackoffHandler::new(config);

        assert_eq!(handler.error(), Duration::from_millis(100));
        assert_eq!(handler.error(), Duration::from_millis(200));
        assert_eq!(handler.error(), Duration::from_millis(350));
        assert_eq!(handler.error(), Duration::from_millis(350));

        handler.success();
        assert_eq!(handler.error(), Duration::from_millis(100));
    }
}
