//! Live aggregation view
//!
//! Consumes the remote change stream and keeps a deduplicated index of
//! canonical reports keyed by correlation id (canonical id when a change
//! carries none). Every change replaces-or-inserts its key, so repeated or
//! reordered events can never produce duplicate visible entries.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{GeoPoint, IncidentType, ReportStatus, Severity};
use crate::infrastructure::events::{Event, EventBus};
use crate::sync::remote::{RemoteChange, RemoteError, RemoteStore};

/// Dedup key for one visible feed entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedKey {
	Correlation(Uuid),
	Canonical(String),
}

impl FeedKey {
	fn for_change(change: &RemoteChange) -> Self {
		match change.correlation_id {
			Some(id) => FeedKey::Correlation(id),
			None => FeedKey::Canonical(change.canonical_id.clone()),
		}
	}
}

/// One visible incident in the operator feed
#[derive(Debug, Clone)]
pub struct FeedEntry {
	pub canonical_id: String,
	pub correlation_id: Option<Uuid>,
	pub incident_type: IncidentType,
	pub severity: Severity,
	pub status: ReportStatus,
	pub description: Option<String>,
	pub location: Option<GeoPoint>,
	pub attachment_url: Option<String>,
	/// Client-side creation time; drives the Newest ordering
	pub reported_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl From<RemoteChange> for FeedEntry {
	fn from(change: RemoteChange) -> Self {
		Self {
			canonical_id: change.canonical_id,
			correlation_id: change.correlation_id,
			incident_type: change.incident_type,
			severity: change.severity,
			status: change.status,
			description: change.description,
			location: change.location,
			attachment_url: change.attachment_url,
			reported_at: change.client_timestamp,
			updated_at: change.server_timestamp,
		}
	}
}

/// Operator-selectable orderings, mutually exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SortPolicy {
	/// Creation time descending
	#[default]
	Newest,
	/// Severity ascending
	Severity,
	/// Unacknowledged first
	Status,
}

/// Severity bands as the dashboard groups them
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SeverityBand {
	/// Severity 1-2
	Low,
	/// Severity 3
	Medium,
	/// Severity 4-5
	High,
}

impl SeverityBand {
	fn matches(self, severity: Severity) -> bool {
		match self {
			SeverityBand::Low => severity.get() <= 2,
			SeverityBand::Medium => severity.get() == 3,
			SeverityBand::High => severity.get() >= 4,
		}
	}
}

/// Conjunctive feed filters; `None` means "all"
#[derive(Debug, Clone, Default)]
pub struct FeedFilter {
	pub incident_type: Option<IncidentType>,
	pub status: Option<ReportStatus>,
	pub severity: Option<SeverityBand>,
	/// Case-insensitive match over canonical id and description
	pub search: Option<String>,
}

impl FeedFilter {
	fn matches(&self, entry: &FeedEntry) -> bool {
		if let Some(incident_type) = self.incident_type {
			if entry.incident_type != incident_type {
				return false;
			}
		}
		if let Some(status) = self.status {
			if entry.status != status {
				return false;
			}
		}
		if let Some(band) = self.severity {
			if !band.matches(entry.severity) {
				return false;
			}
		}
		if let Some(needle) = &self.search {
			let needle = needle.to_lowercase();
			let in_id = entry.canonical_id.to_lowercase().contains(&needle);
			let in_description = entry
				.description
				.as_deref()
				.map(|d| d.to_lowercase().contains(&needle))
				.unwrap_or(false);
			if !in_id && !in_description {
				return false;
			}
		}
		true
	}
}

/// Acknowledge failures surfaced to the operator
#[derive(Error, Debug)]
pub enum AckError {
	#[error("No feed entry for canonical id {0}")]
	UnknownReport(String),

	/// The optimistic local update was rolled back
	#[error("Acknowledge failed and was rolled back: {0}")]
	Remote(#[from] RemoteError),
}

/// The deduplicating consumer behind the operator feed
#[derive(Clone)]
pub struct FeedView {
	entries: Arc<RwLock<HashMap<FeedKey, FeedEntry>>>,
	events: Arc<EventBus>,
}

impl FeedView {
	pub fn new(events: Arc<EventBus>) -> Self {
		Self {
			entries: Arc::new(RwLock::new(HashMap::new())),
			events,
		}
	}

	/// Replace-or-insert one change; the index never holds two entries per key
	pub async fn apply(&self, change: RemoteChange) {
		let key = FeedKey::for_change(&change);
		debug!("Feed upsert {:?} -> {}", key, change.canonical_id);
		self.entries.write().await.insert(key, change.into());
	}

	/// Pump a change subscription until it closes
	pub async fn run(&self, mut changes: broadcast::Receiver<RemoteChange>) {
		loop {
			match changes.recv().await {
				Ok(change) => self.apply(change).await,
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					// Upserts are idempotent per key; later events repair
					// whatever we missed.
					warn!("Feed lagged behind the change stream by {} events", skipped);
				}
				Err(broadcast::error::RecvError::Closed) => break,
			}
		}
	}

	pub async fn len(&self) -> usize {
		self.entries.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.entries.read().await.is_empty()
	}

	pub async fn get(&self, canonical_id: &str) -> Option<FeedEntry> {
		self.entries
			.read()
			.await
			.values()
			.find(|e| e.canonical_id == canonical_id)
			.cloned()
	}

	/// Filtered, ordered view of the index
	///
	/// All orderings break ties on canonical id, so a snapshot is
	/// deterministic and stable under insertion of unrelated entries.
	pub async fn snapshot(&self, sort: SortPolicy, filter: &FeedFilter) -> Vec<FeedEntry> {
		let mut entries: Vec<FeedEntry> = self
			.entries
			.read()
			.await
			.values()
			.filter(|e| filter.matches(e))
			.cloned()
			.collect();

		match sort {
			SortPolicy::Newest => entries.sort_by(|a, b| {
				b.reported_at
					.cmp(&a.reported_at)
					.then_with(|| a.canonical_id.cmp(&b.canonical_id))
			}),
			SortPolicy::Severity => entries.sort_by(|a, b| {
				a.severity
					.cmp(&b.severity)
					.then_with(|| b.reported_at.cmp(&a.reported_at))
					.then_with(|| a.canonical_id.cmp(&b.canonical_id))
			}),
			SortPolicy::Status => entries.sort_by(|a, b| {
				status_rank(a.status)
					.cmp(&status_rank(b.status))
					.then_with(|| b.reported_at.cmp(&a.reported_at))
					.then_with(|| a.canonical_id.cmp(&b.canonical_id))
			}),
		}

		entries
	}

	/// NEW -> ACK with optimistic local update
	///
	/// The entry flips to ACK immediately; a remote failure compensates by
	/// restoring NEW and surfacing the error. Already-acknowledged entries
	/// are a no-op.
	pub async fn acknowledge(
		&self,
		canonical_id: &str,
		remote: &dyn RemoteStore,
	) -> Result<(), AckError> {
		let key = {
			let entries = self.entries.read().await;
			let (key, entry) = entries
				.iter()
				.find(|(_, e)| e.canonical_id == canonical_id)
				.ok_or_else(|| AckError::UnknownReport(canonical_id.to_owned()))?;
			if entry.status == ReportStatus::Ack {
				return Ok(());
			}
			key.clone()
		};

		// Phase one: tentative local state.
		self.set_status(&key, ReportStatus::Ack).await;

		// Phase two: confirm remotely, compensate on failure.
		match remote.acknowledge(canonical_id).await {
			Ok(()) => {
				self.events.emit(Event::ReportAcknowledged {
					canonical_id: canonical_id.to_owned(),
				});
				Ok(())
			}
			Err(e) => {
				warn!("Acknowledge of {} failed, rolling back: {}", canonical_id, e);
				self.set_status(&key, ReportStatus::New).await;
				Err(AckError::Remote(e))
			}
		}
	}

	async fn set_status(&self, key: &FeedKey, status: ReportStatus) {
		if let Some(entry) = self.entries.write().await.get_mut(key) {
			entry.status = status;
		}
	}
}

fn status_rank(status: ReportStatus) -> u8 {
	match status {
		ReportStatus::New => 0,
		ReportStatus::Ack => 1,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sync::remote::MemoryRemoteStore;
	use chrono::Duration;

	fn change(canonical: &str, correlation: Option<Uuid>, severity: u8, minutes_ago: i64) -> RemoteChange {
		let reported = Utc::now() - Duration::minutes(minutes_ago);
		RemoteChange {
			canonical_id: canonical.to_owned(),
			correlation_id: correlation,
			incident_type: IncidentType::Flood,
			severity: Severity::new(severity).unwrap(),
			status: ReportStatus::New,
			description: None,
			location: None,
			attachment_url: None,
			client_timestamp: reported,
			server_timestamp: reported,
		}
	}

	fn feed() -> FeedView {
		FeedView::new(Arc::new(EventBus::default()))
	}

	#[tokio::test]
	async fn repeated_upserts_keep_one_entry() {
		let feed = feed();
		let correlation = Uuid::new_v4();

		for _ in 0..5 {
			feed.apply(change("INC-0001", Some(correlation), 2, 10)).await;
		}
		let mut latest = change("INC-0001", Some(correlation), 2, 10);
		latest.status = ReportStatus::Ack;
		feed.apply(latest).await;

		assert_eq!(feed.len().await, 1);
		let entry = feed.get("INC-0001").await.unwrap();
		assert_eq!(entry.status, ReportStatus::Ack);
	}

	#[tokio::test]
	async fn newest_ordering_is_stable_under_unrelated_inserts() {
		let feed = feed();
		feed.apply(change("INC-0001", Some(Uuid::new_v4()), 3, 30)).await;
		feed.apply(change("INC-0002", Some(Uuid::new_v4()), 3, 20)).await;

		let before = feed.snapshot(SortPolicy::Newest, &FeedFilter::default()).await;
		let before_ids: Vec<_> = before.iter().map(|e| e.canonical_id.clone()).collect();
		assert_eq!(before_ids, vec!["INC-0002", "INC-0001"]);

		// An unrelated newer record must not reorder the existing pair.
		feed.apply(change("INC-0003", Some(Uuid::new_v4()), 3, 5)).await;
		let after = feed.snapshot(SortPolicy::Newest, &FeedFilter::default()).await;
		let after_ids: Vec<_> = after.iter().map(|e| e.canonical_id.clone()).collect();
		assert_eq!(after_ids, vec!["INC-0003", "INC-0002", "INC-0001"]);
	}

	#[tokio::test]
	async fn severity_and_status_orderings() {
		let feed = feed();
		feed.apply(change("INC-0001", Some(Uuid::new_v4()), 5, 10)).await;
		feed.apply(change("INC-0002", Some(Uuid::new_v4()), 1, 10)).await;
		let mut acked = change("INC-0003", Some(Uuid::new_v4()), 3, 1);
		acked.status = ReportStatus::Ack;
		feed.apply(acked).await;

		let by_severity = feed.snapshot(SortPolicy::Severity, &FeedFilter::default()).await;
		assert_eq!(by_severity[0].canonical_id, "INC-0002");
		assert_eq!(by_severity[2].canonical_id, "INC-0001");

		let by_status = feed.snapshot(SortPolicy::Status, &FeedFilter::default()).await;
		assert_eq!(by_status.last().unwrap().canonical_id, "INC-0003");
		assert_eq!(by_status[0].status, ReportStatus::New);
	}

	#[tokio::test]
	async fn filters_compose() {
		let feed = feed();
		feed.apply(change("INC-0001", Some(Uuid::new_v4()), 1, 10)).await;
		feed.apply(change("INC-0002", Some(Uuid::new_v4()), 4, 10)).await;

		let filter = FeedFilter {
			severity: Some(SeverityBand::High),
			..Default::default()
		};
		let high = feed.snapshot(SortPolicy::Newest, &filter).await;
		assert_eq!(high.len(), 1);
		assert_eq!(high[0].canonical_id, "INC-0002");

		let filter = FeedFilter {
			search: Some("0001".to_owned()),
			..Default::default()
		};
		let found = feed.snapshot(SortPolicy::Newest, &filter).await;
		assert_eq!(found.len(), 1);
	}

	#[tokio::test]
	async fn acknowledge_rolls_back_on_remote_failure() {
		let remote = MemoryRemoteStore::new();
		let feed = feed();

		let ack = remote
			.create_report(crate::sync::remote::CreateReport {
				correlation_id: Uuid::new_v4(),
				incident_type: IncidentType::Landslide,
				severity: Severity::new(4).unwrap(),
				description: None,
				location: None,
				attachment_url: None,
				client_timestamp: Utc::now(),
			})
			.await
			.unwrap();
		feed.apply(change(&ack.canonical_id, None, 4, 0)).await;

		remote.fail_next_acknowledges(1);
		let err = feed.acknowledge(&ack.canonical_id, &remote).await;
		assert!(err.is_err());
		assert_eq!(
			feed.get(&ack.canonical_id).await.unwrap().status,
			ReportStatus::New
		);

		feed.acknowledge(&ack.canonical_id, &remote).await.unwrap();
		assert_eq!(
			feed.get(&ack.canonical_id).await.unwrap().status,
			ReportStatus::Ack
		);
	}
}
