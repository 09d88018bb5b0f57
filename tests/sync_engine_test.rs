//! Sync engine integration tests
//!
//! These drive the engine through its command inbox and observe results via
//! the event bus, the queue database and the in-process remote store.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use aegis_core::domain::{IncidentType, ReportDraft, Severity, SyncState};
use aegis_core::feed::{FeedFilter, FeedView, SortPolicy};
use aegis_core::infrastructure::database::Database;
use aegis_core::infrastructure::events::{Event, EventBus};
use aegis_core::queue::ReportQueue;
use aegis_core::sync::{
	BackoffPolicy, FsMediaUploader, MediaError, MediaUploader, MemoryRemoteStore, PassSummary,
	RemoteStore, SyncEngine, SyncHandle, TriggerReason,
};

struct Harness {
	queue: Arc<ReportQueue>,
	remote: Arc<MemoryRemoteStore>,
	events: Arc<EventBus>,
	feed: FeedView,
	handle: SyncHandle,
	_dir: TempDir,
}

/// Zero-delay backoff so deferred records are due again immediately
fn instant_backoff(max_auto_attempts: u32) -> BackoffPolicy {
	BackoffPolicy::new(Duration::ZERO, 2, Duration::ZERO, max_auto_attempts)
}

async fn harness(backoff: BackoffPolicy, media: Option<Arc<dyn MediaUploader>>) -> Harness {
	let dir = TempDir::new().unwrap();
	let db = Database::open(&dir.path().join("queue.db")).await.unwrap();
	db.migrate().await.unwrap();

	let queue = Arc::new(ReportQueue::new(Arc::new(db), backoff));
	let remote = Arc::new(MemoryRemoteStore::new());
	let events = Arc::new(EventBus::default());

	let feed = FeedView::new(events.clone());
	let changes = remote.subscribe();
	let pump = feed.clone();
	tokio::spawn(async move { pump.run(changes).await });

	let media = media
		.unwrap_or_else(|| Arc::new(FsMediaUploader::new(dir.path().join("attachments"))));
	let engine = SyncEngine::new(queue.clone(), remote.clone(), media, events.clone());
	let handle = engine.start();

	Harness {
		queue,
		remote,
		events,
		feed,
		handle,
		_dir: dir,
	}
}

/// Trigger one pass and wait for its completion summary
async fn pass(h: &Harness, reason: TriggerReason) -> PassSummary {
	let mut rx = h.events.subscribe();
	h.handle.trigger(reason).unwrap();
	wait_for_summary(&mut rx).await
}

async fn wait_for_summary(
	rx: &mut tokio::sync::broadcast::Receiver<Event>,
) -> PassSummary {
	loop {
		let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
			.await
			.expect("timed out waiting for a sync pass")
			.expect("event bus closed");
		if let Event::SyncPassCompleted { summary } = event {
			// Let the feed pump catch up with the change stream.
			tokio::time::sleep(Duration::from_millis(50)).await;
			return summary;
		}
	}
}

fn draft(incident_type: IncidentType, severity: u8) -> ReportDraft {
	ReportDraft::new(incident_type, Severity::new(severity).unwrap())
}

struct FlakyUploader {
	transient_failures: AtomicU32,
}

impl FlakyUploader {
	fn failing(n: u32) -> Self {
		Self {
			transient_failures: AtomicU32::new(n),
		}
	}
}

#[async_trait::async_trait]
impl MediaUploader for FlakyUploader {
	async fn upload(&self, local_path: &Path) -> Result<String, MediaError> {
		let failing = self
			.transient_failures
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if failing {
			Err(MediaError::Transient("uplink saturated".into()))
		} else {
			Ok(format!("file://uploaded/{}", local_path.display()))
		}
	}
}

#[tokio::test]
async fn offline_captures_sync_exactly_once_on_reconnect() {
	let h = harness(instant_backoff(5), None).await;

	h.handle.set_connectivity(false).unwrap();

	for incident_type in [
		IncidentType::Flood,
		IncidentType::Landslide,
		IncidentType::RoadBlock,
	] {
		h.queue.put(draft(incident_type, 3)).await.unwrap();
	}

	// Automatic triggers do nothing while offline.
	h.handle.trigger(TriggerReason::Queued).unwrap();
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(h.remote.create_calls(), 0);

	// Reconnect drains everything in one pass.
	let mut rx = h.events.subscribe();
	h.handle.set_connectivity(true).unwrap();
	let summary = wait_for_summary(&mut rx).await;

	assert_eq!(summary.attempted, 3);
	assert_eq!(summary.synced, 3);
	assert_eq!(h.remote.create_calls(), 3);
	assert_eq!(h.remote.record_count().await, 3);

	for record in h.queue.list_all().await.unwrap() {
		assert_eq!(record.sync_state, SyncState::Synced);
		assert!(record.canonical_id.is_some());
	}

	// The operator feed shows 3 unique incidents, no duplicates.
	let entries = h.feed.snapshot(SortPolicy::Newest, &FeedFilter::default()).await;
	assert_eq!(entries.len(), 3);
}

#[tokio::test]
async fn lost_acknowledgment_does_not_duplicate_the_record() {
	let h = harness(instant_backoff(5), None).await;
	let record = h.queue.put(draft(IncidentType::Flood, 4)).await.unwrap();

	// The first write lands remotely but the ack never arrives.
	h.remote.drop_next_acks(1);
	let first = pass(&h, TriggerReason::Manual).await;
	assert_eq!(first.synced, 0);
	assert_eq!(first.deferred, 1);
	assert_eq!(h.remote.record_count().await, 1);

	// The retry is deduplicated by correlation id.
	let second = pass(&h, TriggerReason::Manual).await;
	assert_eq!(second.synced, 1);
	assert_eq!(h.remote.create_calls(), 2);
	assert_eq!(h.remote.record_count().await, 1);

	let synced = h.queue.get(record.correlation_id).await.unwrap();
	assert_eq!(synced.sync_state, SyncState::Synced);
	assert_eq!(synced.canonical_id.as_deref(), Some("INC-0001"));

	// One feed entry despite two upserts for the key.
	assert_eq!(h.feed.len().await, 1);
}

#[tokio::test]
async fn rejection_fails_one_record_without_blocking_the_rest() {
	let h = harness(instant_backoff(5), None).await;

	let doomed = h.queue.put(draft(IncidentType::Landslide, 2)).await.unwrap();
	let fine = h.queue.put(draft(IncidentType::Flood, 5)).await.unwrap();

	// Queue order means the older record eats the injected rejection.
	h.remote.reject_next_creates(1);
	let summary = pass(&h, TriggerReason::Manual).await;
	assert_eq!(summary.rejected, 1);
	assert_eq!(summary.synced, 1);

	let failed = h.queue.get(doomed.correlation_id).await.unwrap();
	assert_eq!(failed.sync_state, SyncState::Failed);
	assert!(failed.last_error.is_some());

	let synced = h.queue.get(fine.correlation_id).await.unwrap();
	assert_eq!(synced.sync_state, SyncState::Synced);

	// Terminal failures sit out further passes until manually requeued.
	let idle = pass(&h, TriggerReason::Manual).await;
	assert_eq!(idle.attempted, 0);

	h.queue.requeue(doomed.correlation_id).await.unwrap();
	let retried = pass(&h, TriggerReason::Manual).await;
	assert_eq!(retried.synced, 1);
	assert_eq!(h.remote.record_count().await, 2);
}

#[tokio::test]
async fn transient_failure_waits_out_the_backoff() {
	// Real 5s backoff: after one failure the record is not yet due.
	let h = harness(
		BackoffPolicy::new(Duration::from_secs(5), 2, Duration::from_secs(30), 5),
		None,
	)
	.await;
	let record = h.queue.put(draft(IncidentType::RoadBlock, 3)).await.unwrap();

	h.remote.fail_next_creates(1);
	let first = pass(&h, TriggerReason::Manual).await;
	assert_eq!(first.deferred, 1);

	let deferred = h.queue.get(record.correlation_id).await.unwrap();
	assert_eq!(deferred.sync_state, SyncState::Pending);
	assert_eq!(deferred.retry_count, 1);
	assert!(deferred.next_attempt_at.unwrap() > chrono::Utc::now());

	// An immediate follow-up pass finds nothing due; no retry storm.
	let second = pass(&h, TriggerReason::Manual).await;
	assert_eq!(second.attempted, 0);
	assert_eq!(h.remote.create_calls(), 1);
}

#[tokio::test]
async fn exhausted_records_park_until_an_external_pass() {
	let h = harness(instant_backoff(2), None).await;
	let record = h.queue.put(draft(IncidentType::Flood, 3)).await.unwrap();

	h.remote.fail_next_creates(2);
	let first = pass(&h, TriggerReason::Queued).await;
	assert_eq!(first.deferred, 1);
	let second = pass(&h, TriggerReason::Queued).await;
	assert_eq!(second.parked, 1);

	let parked = h.queue.get(record.correlation_id).await.unwrap();
	assert!(parked.is_parked());
	assert_eq!(parked.retry_count, 2);

	// Automatic passes no longer touch it.
	let automatic = pass(&h, TriggerReason::Queued).await;
	assert_eq!(automatic.attempted, 0);
	assert_eq!(h.remote.create_calls(), 2);

	// An external trigger picks the parked record back up.
	let manual = pass(&h, TriggerReason::Manual).await;
	assert_eq!(manual.synced, 1);
	assert_eq!(h.remote.record_count().await, 1);
}

#[tokio::test]
async fn transient_media_failure_blocks_only_the_attachment_record() {
	let dir = TempDir::new().unwrap();
	let photo = dir.path().join("slip.jpg");
	tokio::fs::write(&photo, b"jpeg bytes").await.unwrap();

	let uploader: Arc<dyn MediaUploader> = Arc::new(FlakyUploader::failing(1));
	let h = harness(instant_backoff(5), Some(uploader)).await;

	let mut with_photo = draft(IncidentType::Landslide, 5);
	with_photo.description = Some("slope failure above the bridge".into());
	with_photo.attachment_path = Some(photo.clone());
	let blocked = h.queue.put(with_photo).await.unwrap();
	let plain = h.queue.put(draft(IncidentType::Flood, 2)).await.unwrap();

	let first = pass(&h, TriggerReason::Manual).await;
	assert_eq!(first.deferred, 1);
	assert_eq!(first.synced, 1);

	// Scalar fields are untouched by the failed attachment step.
	let deferred = h.queue.get(blocked.correlation_id).await.unwrap();
	assert_eq!(deferred.sync_state, SyncState::Pending);
	assert_eq!(
		deferred.description.as_deref(),
		Some("slope failure above the bridge")
	);
	assert_eq!(deferred.attachment_path.as_deref(), Some(photo.as_path()));
	assert_eq!(
		h.queue.get(plain.correlation_id).await.unwrap().sync_state,
		SyncState::Synced
	);

	// Next pass the upload succeeds and the record finishes.
	let second = pass(&h, TriggerReason::Manual).await;
	assert_eq!(second.synced, 1);
	let synced = h.queue.get(blocked.correlation_id).await.unwrap();
	assert_eq!(synced.sync_state, SyncState::Synced);
	assert!(synced.attachment_url.is_some());
}

#[tokio::test]
async fn permanent_media_failure_syncs_scalars_without_the_attachment() {
	// FsMediaUploader treats a missing source file as permanent.
	let h = harness(instant_backoff(5), None).await;

	let mut broken = draft(IncidentType::PowerLineDown, 4);
	broken.attachment_path = Some(PathBuf::from("/nonexistent/photo.jpg"));
	let record = h.queue.put(broken).await.unwrap();

	let summary = pass(&h, TriggerReason::Manual).await;
	assert_eq!(summary.synced, 1);

	let synced = h.queue.get(record.correlation_id).await.unwrap();
	assert_eq!(synced.sync_state, SyncState::Synced);
	assert!(synced.attachment_path.is_none());
	assert!(synced.attachment_url.is_none());
	// The drop reason stays on the record for the operator.
	assert!(synced
		.last_error
		.as_deref()
		.is_some_and(|e| e.contains("attachment missing")));
	assert_eq!(h.remote.record_count().await, 1);
}

#[tokio::test]
async fn restart_mid_drain_resumes_where_it_left_off() {
	let h = harness(instant_backoff(5), None).await;
	let record = h.queue.put(draft(IncidentType::Flood, 3)).await.unwrap();

	// Simulate a crash after the record was claimed but before completion.
	h.queue.mark_syncing(record.correlation_id).await.unwrap();
	let stuck = pass(&h, TriggerReason::Manual).await;
	assert_eq!(stuck.attempted, 0);

	// Startup recovery makes it eligible again.
	assert_eq!(h.queue.recover_interrupted().await.unwrap(), 1);
	let resumed = pass(&h, TriggerReason::Startup).await;
	assert_eq!(resumed.synced, 1);
	assert_eq!(h.remote.record_count().await, 1);
}
