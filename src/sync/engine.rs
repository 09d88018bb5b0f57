//! Sync engine
//!
//! Drains the local queue against the remote store. Command-driven: a single
//! consumer loop processes connectivity changes and sync triggers one at a
//! time, so at most one drain pass runs per device. Failure handling is
//! per-record; one record can never block the rest of a pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::domain::ReportRecord;
use crate::infrastructure::events::{Event, EventBus};
use crate::queue::{QueueError, ReportQueue};
use crate::sync::media::{MediaError, MediaUploader};
use crate::sync::remote::{CreateReport, RemoteError, RemoteStore};

/// What woke the engine up
///
/// External reasons retry parked records; `Queued` passes are the automatic
/// follow-up to a local submission and respect the backoff schedule only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TriggerReason {
	Startup,
	Reconnect,
	Manual,
	Foreground,
	Queued,
}

impl TriggerReason {
	/// Parked records only run on externally triggered passes
	pub fn includes_parked(self) -> bool {
		!matches!(self, TriggerReason::Queued)
	}

	/// Manual passes run even while the device believes itself offline
	fn runs_offline(self) -> bool {
		matches!(self, TriggerReason::Manual)
	}
}

/// Commands delivered to the engine's single-consumer inbox
#[derive(Debug, Clone)]
pub enum SyncCommand {
	Trigger(TriggerReason),
	SetConnectivity(bool),
	Shutdown,
}

/// Aggregate result of one drain pass
#[derive(Debug, Clone, Copy, Default)]
pub struct PassSummary {
	pub attempted: usize,
	pub synced: usize,
	pub deferred: usize,
	pub parked: usize,
	pub rejected: usize,
}

/// Sync engine errors
#[derive(Error, Debug)]
pub enum SyncError {
	/// The engine task has stopped and the inbox is closed
	#[error("Sync engine is not running")]
	EngineStopped,

	/// Local persistence failed; the whole pass retries on the next trigger
	#[error("Queue error: {0}")]
	Queue(#[from] QueueError),
}

enum RecordOutcome {
	Synced,
	Deferred,
	Parked,
	Rejected,
}

/// Handle for driving a started engine
#[derive(Clone)]
pub struct SyncHandle {
	tx: mpsc::UnboundedSender<SyncCommand>,
	running: Arc<AtomicBool>,
}

impl SyncHandle {
	/// Ask for a drain pass
	pub fn trigger(&self, reason: TriggerReason) -> Result<(), SyncError> {
		self.tx
			.send(SyncCommand::Trigger(reason))
			.map_err(|_| SyncError::EngineStopped)
	}

	/// Deliver a connectivity transition; going online triggers a pass
	pub fn set_connectivity(&self, online: bool) -> Result<(), SyncError> {
		self.tx
			.send(SyncCommand::SetConnectivity(online))
			.map_err(|_| SyncError::EngineStopped)
	}

	/// Stop the engine after the in-flight command settles
	pub fn shutdown(&self) -> Result<(), SyncError> {
		self.tx
			.send(SyncCommand::Shutdown)
			.map_err(|_| SyncError::EngineStopped)
	}

	/// Whether a drain pass is currently in flight
	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}
}

/// The engine proper; consumed by `start`
pub struct SyncEngine {
	queue: Arc<ReportQueue>,
	remote: Arc<dyn RemoteStore>,
	media: Arc<dyn MediaUploader>,
	events: Arc<EventBus>,
	online: AtomicBool,
	running: Arc<AtomicBool>,
}

impl SyncEngine {
	pub fn new(
		queue: Arc<ReportQueue>,
		remote: Arc<dyn RemoteStore>,
		media: Arc<dyn MediaUploader>,
		events: Arc<EventBus>,
	) -> Self {
		Self {
			queue,
			remote,
			media,
			events,
			online: AtomicBool::new(true),
			running: Arc::new(AtomicBool::new(false)),
		}
	}

	/// Spawn the consumer loop and hand back the command handle
	pub fn start(self) -> SyncHandle {
		let (tx, rx) = mpsc::unbounded_channel();
		let handle = SyncHandle {
			tx,
			running: self.running.clone(),
		};

		tokio::spawn(self.run(rx));
		handle
	}

	async fn run(self, mut inbox: mpsc::UnboundedReceiver<SyncCommand>) {
		info!("Sync engine started");

		while let Some(command) = inbox.recv().await {
			match command {
				SyncCommand::Trigger(reason) => self.drain(reason).await,
				SyncCommand::SetConnectivity(online) => {
					let was_online = self.online.swap(online, Ordering::SeqCst);
					if was_online != online {
						info!("Connectivity changed: online={}", online);
						self.events.emit(Event::ConnectivityChanged { online });
					}
					if online && !was_online {
						self.drain(TriggerReason::Reconnect).await;
					}
				}
				SyncCommand::Shutdown => break,
			}
		}

		info!("Sync engine stopped");
	}

	/// One drain pass over a single eligibility snapshot
	///
	/// Records becoming due mid-pass wait for the next trigger; the pass
	/// terminates once the snapshot is exhausted.
	async fn drain(&self, reason: TriggerReason) {
		if !self.online.load(Ordering::SeqCst) && !reason.runs_offline() {
			debug!("Skipping {} pass while offline", reason);
			return;
		}

		self.running.store(true, Ordering::SeqCst);
		self.events.emit(Event::SyncPassStarted { reason });

		let snapshot = match self
			.queue
			.get_pending(chrono::Utc::now(), reason.includes_parked())
			.await
		{
			Ok(records) => records,
			Err(e) => {
				// Local persistence failure is pass-fatal; everything is
				// still queued and the next trigger retries wholesale.
				error!("Drain pass aborted, queue unavailable: {}", e);
				self.running.store(false, Ordering::SeqCst);
				return;
			}
		};

		let mut summary = PassSummary {
			attempted: snapshot.len(),
			..Default::default()
		};

		for record in snapshot {
			let correlation_id = record.correlation_id;
			match self.sync_one(record).await {
				Ok(RecordOutcome::Synced) => summary.synced += 1,
				Ok(RecordOutcome::Deferred) => summary.deferred += 1,
				Ok(RecordOutcome::Parked) => summary.parked += 1,
				Ok(RecordOutcome::Rejected) => summary.rejected += 1,
				Err(e) => {
					// Per-record queue failure; the row is untouched or
					// recoverable as Syncing on restart. Keep going.
					error!("Queue error while syncing {}: {}", correlation_id, e);
					summary.deferred += 1;
				}
			}
		}

		info!(
			"Sync pass ({}) done: {} attempted, {} synced, {} deferred, {} parked, {} rejected",
			reason,
			summary.attempted,
			summary.synced,
			summary.deferred,
			summary.parked,
			summary.rejected
		);
		self.events.emit(Event::SyncPassCompleted { summary });
		self.running.store(false, Ordering::SeqCst);
	}

	async fn sync_one(&self, mut record: ReportRecord) -> Result<RecordOutcome, QueueError> {
		let correlation_id = record.correlation_id;
		self.queue.mark_syncing(correlation_id).await?;

		// Resolve the attachment before the remote write counts.
		if let Some(path) = record.attachment_path.clone().filter(|_| record.needs_upload()) {
			match self.media.upload(&path).await {
				Ok(url) => {
					self.queue.set_attachment_url(correlation_id, &url).await?;
					record.attachment_url = Some(url);
				}
				Err(MediaError::Transient(e)) => {
					return self.defer(correlation_id, &e).await;
				}
				Err(MediaError::Permanent(e)) => {
					// Attachment is unrecoverable; sync the scalar fields
					// without it rather than stranding the record.
					self.queue.clear_attachment(correlation_id, &e).await?;
					record.attachment_path = None;
					record.attachment_url = None;
				}
			}
		}

		let request = CreateReport {
			correlation_id,
			incident_type: record.incident_type,
			severity: record.severity,
			description: record.description.clone(),
			location: record.location,
			attachment_url: record.attachment_url.clone(),
			client_timestamp: record.created_at,
		};

		match self.remote.create_report(request).await {
			Ok(ack) => {
				self.queue
					.mark_synced(correlation_id, &ack.canonical_id)
					.await?;
				self.events.emit(Event::ReportSynced {
					correlation_id,
					canonical_id: ack.canonical_id,
				});
				Ok(RecordOutcome::Synced)
			}
			Err(RemoteError::Network(e)) => self.defer(correlation_id, &e).await,
			Err(RemoteError::Rejected(e)) => {
				self.queue.mark_rejected(correlation_id, &e).await?;
				self.events.emit(Event::ReportRejected {
					correlation_id,
					error: e,
				});
				Ok(RecordOutcome::Rejected)
			}
		}
	}

	async fn defer(
		&self,
		correlation_id: uuid::Uuid,
		error: &str,
	) -> Result<RecordOutcome, QueueError> {
		let updated = self.queue.mark_failed(correlation_id, error).await?;
		if updated.is_parked() {
			self.events.emit(Event::ReportParked { correlation_id });
			Ok(RecordOutcome::Parked)
		} else {
			warn!(
				"Report {} deferred (attempt {}): {}",
				correlation_id, updated.retry_count, error
			);
			self.events.emit(Event::ReportDeferred {
				correlation_id,
				retry_count: updated.retry_count,
				error: error.to_owned(),
			});
			Ok(RecordOutcome::Deferred)
		}
	}
}
