//! Aegis core
//!
//! Offline-first incident reporting: a durable local submission queue, an
//! idempotent retrying sync engine draining it into a remote store, and the
//! deduplicating aggregation view operators watch. Capture works with no
//! connectivity at all; every record eventually reaches the remote store
//! exactly once.

pub mod config;
pub mod domain;
pub mod feed;
pub mod infrastructure;
pub mod queue;
pub mod sync;

use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::domain::{ReportDraft, ReportRecord};
use crate::feed::FeedView;
use crate::infrastructure::database::Database;
use crate::infrastructure::events::{Event, EventBus};
use crate::queue::{QueueError, ReportQueue};
use crate::sync::{
	BackoffPolicy, MediaUploader, RemoteStore, SyncEngine, SyncHandle, TriggerReason,
};

/// The wired-up core: queue, engine, feed and event bus for one device
pub struct Core {
	config: AppConfig,

	/// Event bus
	pub events: Arc<EventBus>,

	/// Local durable queue
	pub queue: Arc<ReportQueue>,

	/// Live aggregation view fed by the remote change stream
	pub feed: FeedView,

	/// Remote ingestion store
	pub remote: Arc<dyn RemoteStore>,

	sync: SyncHandle,
}

impl Core {
	/// Open the queue database, recover interrupted work, start the engine
	pub async fn init(
		config: AppConfig,
		remote: Arc<dyn RemoteStore>,
		media: Arc<dyn MediaUploader>,
	) -> anyhow::Result<Self> {
		config.ensure_directories()?;

		let db = Arc::new(Database::open(&config.queue_db_path()).await?);
		db.migrate().await?;

		let backoff = BackoffPolicy::from(&config.sync);
		let queue = Arc::new(ReportQueue::new(db, backoff));

		// Records stranded in Syncing by a crash become Pending again.
		queue.recover_interrupted().await?;

		let events = Arc::new(EventBus::default());

		let feed = FeedView::new(events.clone());
		let changes = remote.subscribe();
		let pump = feed.clone();
		tokio::spawn(async move { pump.run(changes).await });

		let engine = SyncEngine::new(queue.clone(), remote.clone(), media, events.clone());
		let sync = engine.start();

		events.emit(Event::CoreStarted);
		sync.trigger(TriggerReason::Startup)?;

		info!("Core initialized with data dir {:?}", config.data_dir);

		Ok(Self {
			config,
			events,
			queue,
			feed,
			remote,
			sync,
		})
	}

	pub fn config(&self) -> &AppConfig {
		&self.config
	}

	/// Handle for triggering passes and delivering connectivity transitions
	pub fn sync(&self) -> &SyncHandle {
		&self.sync
	}

	/// Capture a report: persist locally, then nudge the engine
	///
	/// The local write is the durable step; the sync trigger is best-effort
	/// and a dead engine just means the next external trigger drains it.
	pub async fn submit(&self, draft: ReportDraft) -> Result<ReportRecord, QueueError> {
		let record = self.queue.put(draft).await?;
		self.events.emit(Event::ReportQueued {
			correlation_id: record.correlation_id,
		});
		let _ = self.sync.trigger(TriggerReason::Queued);
		Ok(record)
	}

	/// Stop the engine once its in-flight command settles
	pub async fn shutdown(&self) {
		info!("Shutting down core");
		self.events.emit(Event::CoreShutdown);
		let _ = self.sync.shutdown();
	}
}
