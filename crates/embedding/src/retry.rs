use std::time::Duration;

/// Retry schedule for embedding requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
  /// Retry attempts after the first try.
  pub max_retries: u32,
  pub initial_backoff: Duration,
  pub max_backoff: Duration,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      initial_backoff: Duration::from_secs(1),
      max_backoff: Duration::from_secs(10),
    }
  }
}

impl RetryConfig {
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  /// Backoff before retry `attempt` (0-based): doubles from the initial
  /// value, capped at the maximum.
  pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
    let exp = self.initial_backoff.as_secs_f64() * 2f64.powi(attempt.min(16) as i32);
    Duration::from_secs_f64(exp.min(self.max_backoff.as_secs_f64()))
  }
}
