//! Retry with exponential backoff for transient control-plane errors.

use crate::error::{Error, Result};
use crate::types::RetryConfig;
use std::thread;

/// Notified before each retry.
pub trait RetryCallback {
    /// `attempt` is 1-indexed; `delay_ms` is the pause before the next attempt.
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay_ms: u64);
}

/// No-op callback.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _attempt: u32, _max_attempts: u32, _error: &Error, _delay_ms: u64) {}
}

/// Callback that logs each retry as a warning.
pub struct LogCallback<'a> {
    /// What is being retried, e.g. `"build web"`
    pub operation: &'a str,
}

impl RetryCallback for LogCallback<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay_ms: u64) {
        log::warn!(
            "{} failed (attempt {attempt}/{max_attempts}): {error}. Retrying in {delay_ms}ms",
            self.operation
        );
    }
}

/// Run `operation`, retrying retryable errors with exponential backoff.
///
/// Non-retryable errors are returned immediately; otherwise the last error is
/// returned once `config.max_attempts` is reached.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        let error = match operation() {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !error.is_retryable() || attempt + 1 >= config.max_attempts {
            return Err(error);
        }

        let delay = config.delay_for_attempt(attempt);
        if let Some(cb) = callback {
            cb.on_retry(
                attempt + 1,
                config.max_attempts,
                &error,
                u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            );
        }
        thread::sleep(delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    fn quick(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(10),
        }
    }

    fn timeout() -> Error {
        Error::Network {
            message: "i/o timeout".to_string(),
        }
    }

    #[test]
    fn test_success_first_try() {
        let result = with_retry(&RetryConfig::no_retry(), None, || Ok::<_, Error>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_non_retryable_error_fails_fast() {
        let attempts = Cell::new(0);
        let result: Result<()> = with_retry(&RetryConfig::default(), None, || {
            attempts.set(attempts.get() + 1);
            Err(Error::NotFound {
                name: "web".to_string(),
            })
        });

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_eventual_success() {
        let attempts = Cell::new(0);
        let result = with_retry(&quick(3), None, || {
            let current = attempts.get();
            attempts.set(current + 1);
            if current < 2 { Err(timeout()) } else { Ok(42) }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_callback_sees_every_retry() {
        struct Counting(Cell<u32>);
        impl RetryCallback for Counting {
            fn on_retry(&self, _: u32, _: u32, _: &Error, _: u64) {
                self.0.set(self.0.get() + 1);
            }
        }

        let callback = Counting(Cell::new(0));
        let result: Result<()> = with_retry(&quick(3), Some(&callback), || Err(timeout()));

        assert!(result.is_err());
        // Not before the first attempt, not after the last
        assert_eq!(callback.0.get(), 2);
    }
}
