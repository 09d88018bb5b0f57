//! Remote ingestion store interface
//!
//! The canonical record store is append-only and MUST deduplicate writes by
//! correlation id: a retried submission whose prior write succeeded but whose
//! acknowledgment was lost must not create a second canonical record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{GeoPoint, IncidentType, ReportStatus, Severity};

/// Remote write request; `correlation_id` is the idempotency key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReport {
	pub correlation_id: Uuid,
	pub incident_type: IncidentType,
	pub severity: Severity,
	pub description: Option<String>,
	pub location: Option<GeoPoint>,
	pub attachment_url: Option<String>,
	pub client_timestamp: DateTime<Utc>,
}

/// Acknowledgment of a successful (or deduplicated) remote write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAck {
	pub canonical_id: String,
	pub server_timestamp: DateTime<Utc>,
}

/// One upsert on the remote change stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteChange {
	pub canonical_id: String,
	pub correlation_id: Option<Uuid>,
	pub incident_type: IncidentType,
	pub severity: Severity,
	pub status: ReportStatus,
	pub description: Option<String>,
	pub location: Option<GeoPoint>,
	pub attachment_url: Option<String>,
	pub client_timestamp: DateTime<Utc>,
	pub server_timestamp: DateTime<Utc>,
}

/// Remote store errors, split by retryability
#[derive(Error, Debug, Clone)]
pub enum RemoteError {
	/// Transient; the record stays pending and is retried with backoff
	#[error("Network error: {0}")]
	Network(String),

	/// Permanent; the record is marked failed and surfaced for manual resolution
	#[error("Remote rejected the request: {0}")]
	Rejected(String),
}

/// The central ingestion store the sync engine drains into
#[async_trait]
pub trait RemoteStore: Send + Sync {
	/// Idempotent create keyed on `correlation_id`
	async fn create_report(&self, request: CreateReport) -> Result<CreateAck, RemoteError>;

	/// NEW -> ACK status update on a canonical record
	async fn acknowledge(&self, canonical_id: &str) -> Result<(), RemoteError>;

	/// Ordered upsert stream of canonical records
	fn subscribe(&self) -> broadcast::Receiver<RemoteChange>;
}

struct CanonicalRecord {
	change: RemoteChange,
}

/// In-process remote store with correlation-keyed dedup
///
/// Backs the CLI's local mode and the integration tests. The `fail_*` /
/// `drop_*` knobs inject failures deterministically; they count down per
/// call and are inert at zero.
pub struct MemoryRemoteStore {
	records: Mutex<HashMap<Uuid, CanonicalRecord>>,
	changes: broadcast::Sender<RemoteChange>,
	next_seq: AtomicU32,
	create_calls: AtomicU32,
	fail_creates: AtomicU32,
	reject_creates: AtomicU32,
	drop_acks: AtomicU32,
	fail_acknowledges: AtomicU32,
}

impl MemoryRemoteStore {
	pub fn new() -> Self {
		let (changes, _) = broadcast::channel(256);
		Self {
			records: Mutex::new(HashMap::new()),
			changes,
			next_seq: AtomicU32::new(1),
			create_calls: AtomicU32::new(0),
			fail_creates: AtomicU32::new(0),
			reject_creates: AtomicU32::new(0),
			drop_acks: AtomicU32::new(0),
			fail_acknowledges: AtomicU32::new(0),
		}
	}

	/// Total `create_report` invocations, retries included
	pub fn create_calls(&self) -> u32 {
		self.create_calls.load(Ordering::SeqCst)
	}

	/// Number of canonical records held
	pub async fn record_count(&self) -> usize {
		self.records.lock().await.len()
	}

	/// Fail the next `n` creates with a network error before any write
	pub fn fail_next_creates(&self, n: u32) {
		self.fail_creates.store(n, Ordering::SeqCst);
	}

	/// Reject the next `n` creates permanently
	pub fn reject_next_creates(&self, n: u32) {
		self.reject_creates.store(n, Ordering::SeqCst);
	}

	/// Perform the next `n` writes but lose the acknowledgment
	pub fn drop_next_acks(&self, n: u32) {
		self.drop_acks.store(n, Ordering::SeqCst);
	}

	/// Fail the next `n` acknowledge calls
	pub fn fail_next_acknowledges(&self, n: u32) {
		self.fail_acknowledges.store(n, Ordering::SeqCst);
	}

	fn take(counter: &AtomicU32) -> bool {
		counter
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok()
	}
}

impl Default for MemoryRemoteStore {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
	async fn create_report(&self, request: CreateReport) -> Result<CreateAck, RemoteError> {
		self.create_calls.fetch_add(1, Ordering::SeqCst);

		if Self::take(&self.fail_creates) {
			return Err(RemoteError::Network("injected network failure".into()));
		}
		if Self::take(&self.reject_creates) {
			return Err(RemoteError::Rejected("injected rejection".into()));
		}

		let mut records = self.records.lock().await;

		// Dedup: a repeated correlation id returns the original record.
		if let Some(existing) = records.get(&request.correlation_id) {
			debug!(
				"Deduplicated create for {} -> {}",
				request.correlation_id, existing.change.canonical_id
			);
			return Ok(CreateAck {
				canonical_id: existing.change.canonical_id.clone(),
				server_timestamp: existing.change.server_timestamp,
			});
		}

		let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
		let change = RemoteChange {
			canonical_id: format!("INC-{seq:04}"),
			correlation_id: Some(request.correlation_id),
			incident_type: request.incident_type,
			severity: request.severity,
			status: ReportStatus::New,
			description: request.description,
			location: request.location,
			attachment_url: request.attachment_url,
			client_timestamp: request.client_timestamp,
			server_timestamp: Utc::now(),
		};
		let ack = CreateAck {
			canonical_id: change.canonical_id.clone(),
			server_timestamp: change.server_timestamp,
		};

		records.insert(
			request.correlation_id,
			CanonicalRecord {
				change: change.clone(),
			},
		);
		drop(records);

		let _ = self.changes.send(change);

		if Self::take(&self.drop_acks) {
			// The write landed; the caller never hears about it.
			return Err(RemoteError::Network("acknowledgment lost".into()));
		}

		Ok(ack)
	}

	async fn acknowledge(&self, canonical_id: &str) -> Result<(), RemoteError> {
		if Self::take(&self.fail_acknowledges) {
			return Err(RemoteError::Network("injected acknowledge failure".into()));
		}

		let mut records = self.records.lock().await;
		let record = records
			.values_mut()
			.find(|r| r.change.canonical_id == canonical_id)
			.ok_or_else(|| RemoteError::Rejected(format!("unknown canonical id {canonical_id}")))?;

		record.change.status = ReportStatus::Ack;
		record.change.server_timestamp = Utc::now();
		let change = record.change.clone();
		drop(records);

		let _ = self.changes.send(change);
		Ok(())
	}

	fn subscribe(&self) -> broadcast::Receiver<RemoteChange> {
		self.changes.subscribe()
	}
}
