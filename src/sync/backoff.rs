//! Retry scheduling for the sync engine
//!
//! Delays grow exponentially per attempt up to a hard cap; once the
//! automatic attempt budget is spent the record is parked and only an
//! externally triggered pass picks it up again.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::SyncConfig;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
	base: Duration,
	factor: u32,
	cap: Duration,
	max_auto_attempts: u32,
}

impl BackoffPolicy {
	pub fn new(base: Duration, factor: u32, cap: Duration, max_auto_attempts: u32) -> Self {
		Self {
			base,
			factor,
			cap,
			max_auto_attempts,
		}
	}

	pub fn max_auto_attempts(&self) -> u32 {
		self.max_auto_attempts
	}

	/// Delay before retry number `retry_count` (1-based)
	pub fn delay_for(&self, retry_count: u32) -> Duration {
		let exponent = retry_count.saturating_sub(1).min(16);
		let multiplier = self.factor.max(1).saturating_pow(exponent);
		self.base.saturating_mul(multiplier).min(self.cap)
	}

	/// Due time after a failed attempt, or `None` once the record parks
	pub fn next_attempt(&self, retry_count: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
		if retry_count >= self.max_auto_attempts {
			return None;
		}
		let delay = chrono::Duration::from_std(self.delay_for(retry_count))
			.unwrap_or_else(|_| chrono::Duration::seconds(self.cap.as_secs() as i64));
		Some(now + delay)
	}
}

impl From<&SyncConfig> for BackoffPolicy {
	fn from(config: &SyncConfig) -> Self {
		Self::new(
			config.backoff_base(),
			config.backoff_factor,
			config.backoff_cap(),
			config.max_auto_attempts,
		)
	}
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		BackoffPolicy::from(&SyncConfig::default())
	}
}
