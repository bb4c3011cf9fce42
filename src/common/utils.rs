//! Utility functions for tpckv

use crate::common::{Error, Result};
use std::time::Duration;

/// Maximum key length in bytes
pub const MAX_KEY_LEN: usize = 256;

/// Maximum value length in bytes
pub const MAX_VALUE_LEN: usize = 256 * 1024;

/// Validate key (must be non-empty, at most [`MAX_KEY_LEN`] bytes)
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::OversizedKey);
    }
    Ok(())
}

/// Validate value (must be non-empty, at most [`MAX_VALUE_LEN`] bytes)
pub fn validate_value(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidValue);
    }
    if value.len() > MAX_VALUE_LEN {
        return Err(Error::OversizedValue);
    }
    Ok(())
}

/// Exponential backoff that never gives up, doubling from `initial` up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial,
            max: max.max(initial),
        }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub async fn wait(&mut self) {
        tokio::time::sleep(self.next_delay()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("normal-key").is_ok());
        assert!(validate_key(&"x".repeat(MAX_KEY_LEN)).is_ok());
        assert!(matches!(validate_key(""), Err(Error::InvalidKey)));
        assert!(matches!(
            validate_key(&"x".repeat(MAX_KEY_LEN + 1)),
            Err(Error::OversizedKey)
        ));
    }

    #[test]
    fn test_validate_value() {
        assert!(validate_value("v").is_ok());
        assert!(validate_value(&"x".repeat(MAX_VALUE_LEN)).is_ok());
        assert!(matches!(validate_value(""), Err(Error::InvalidValue)));
        assert!(matches!(
            validate_value(&"x".repeat(MAX_VALUE_LEN + 1)),
            Err(Error::OversizedValue)
        ));
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
    }
}
