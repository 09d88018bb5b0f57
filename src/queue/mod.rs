//! Local Durable Queue
//!
//! The single source of truth for unsynced work. Every submission lands here
//! first with `SyncState::Pending`; only the sync engine mutates state,
//! canonical id and retry bookkeeping, and rows leave the queue solely
//! through an operator-confirmed purge.

use chrono::{DateTime, Utc};
use sea_orm::{
	ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, EntityTrait, IntoActiveModel,
	QueryFilter, QueryOrder,
};
use sea_orm::sea_query::Expr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{GeoPoint, IncidentType, ReportDraft, ReportRecord, Severity, SyncState};
use crate::infrastructure::database::entities::report::{ActiveModel, Column, Model};
use crate::infrastructure::database::{entities::Report, Database};
use crate::sync::BackoffPolicy;

/// Queue operation errors
#[derive(Error, Debug)]
pub enum QueueError {
	/// No queue entry for the given correlation id
	#[error("Report not found: {0}")]
	NotFound(Uuid),

	/// A submission with this correlation id is already queued
	#[error("Report {0} is already queued")]
	Duplicate(Uuid),

	/// Destructive operations need an explicit operator confirmation
	#[error("purge_all is destructive and requires explicit confirmation")]
	ConfirmationRequired,

	/// The record's current state does not admit the requested transition
	#[error("Operation not valid for report {correlation_id} in state {state}")]
	InvalidState {
		correlation_id: Uuid,
		state: SyncState,
	},

	/// A stored row no longer parses into a valid report
	#[error("Corrupt queue entry: {0}")]
	Corrupt(String),

	/// Database error
	#[error("Database error: {0}")]
	Database(#[from] sea_orm::DbErr),
}

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;

/// The on-device report queue
pub struct ReportQueue {
	db: Arc<Database>,
	backoff: BackoffPolicy,
}

impl ReportQueue {
	pub fn new(db: Arc<Database>, backoff: BackoffPolicy) -> Self {
		Self { db, backoff }
	}

	/// Persist a new submission as `Pending`, due immediately
	///
	/// Assigns a correlation id when the draft carries none. A duplicate
	/// correlation id is rejected; the unique index backs this up.
	pub async fn put(&self, draft: ReportDraft) -> Result<ReportRecord> {
		let correlation_id = draft.correlation_id.unwrap_or_else(Uuid::new_v4);

		if self.find(correlation_id).await?.is_some() {
			return Err(QueueError::Duplicate(correlation_id));
		}

		let now = Utc::now();
		let model = ActiveModel {
			correlation_id: Set(correlation_id),
			canonical_id: Set(None),
			incident_type: Set(draft.incident_type.to_string()),
			severity: Set(i16::from(draft.severity.get())),
			description: Set(draft.description),
			latitude: Set(draft.location.map(|p| p.latitude)),
			longitude: Set(draft.location.map(|p| p.longitude)),
			attachment_path: Set(draft
				.attachment_path
				.map(|p| p.to_string_lossy().into_owned())),
			attachment_url: Set(None),
			sync_state: Set(SyncState::Pending),
			retry_count: Set(0),
			next_attempt_at: Set(Some(now)),
			created_at: Set(now),
			synced_at: Set(None),
			last_error: Set(None),
			..Default::default()
		};

		let inserted = model.insert(self.db.conn()).await?;
		debug!("Queued report {} ({})", correlation_id, inserted.incident_type);

		model_to_record(inserted)
	}

	/// Fetch one record by correlation id
	pub async fn get(&self, correlation_id: Uuid) -> Result<ReportRecord> {
		let model = self
			.find(correlation_id)
			.await?
			.ok_or(QueueError::NotFound(correlation_id))?;
		model_to_record(model)
	}

	/// Records eligible for a drain pass, oldest-created-first
	///
	/// Eligible means `Pending` and due (`next_attempt_at <= now`); parked
	/// records (`next_attempt_at` unset) join only when `include_parked` is
	/// set, i.e. on externally triggered passes.
	pub async fn get_pending(
		&self,
		now: DateTime<Utc>,
		include_parked: bool,
	) -> Result<Vec<ReportRecord>> {
		let mut due = Condition::any().add(Column::NextAttemptAt.lte(now));
		if include_parked {
			due = due.add(Column::NextAttemptAt.is_null());
		}

		let models = Report::find()
			.filter(Column::SyncState.eq(SyncState::Pending))
			.filter(due)
			.order_by_asc(Column::CreatedAt)
			.order_by_asc(Column::Id)
			.all(self.db.conn())
			.await?;

		models.into_iter().map(model_to_record).collect()
	}

	/// Pending -> Syncing, marking the start of a remote attempt
	pub async fn mark_syncing(&self, correlation_id: Uuid) -> Result<()> {
		let model = self
			.find(correlation_id)
			.await?
			.ok_or(QueueError::NotFound(correlation_id))?;

		let mut active = model.into_active_model();
		active.sync_state = Set(SyncState::Syncing);
		active.update(self.db.conn()).await?;
		Ok(())
	}

	/// Record a successful remote write
	///
	/// Idempotent: a record that is already `Synced` is left untouched, and
	/// an existing canonical id is never overwritten. `last_error` is kept
	/// as-is so a dropped-attachment reason survives the partial sync.
	pub async fn mark_synced(&self, correlation_id: Uuid, canonical_id: &str) -> Result<()> {
		let model = self
			.find(correlation_id)
			.await?
			.ok_or(QueueError::NotFound(correlation_id))?;

		if model.sync_state == SyncState::Synced {
			return Ok(());
		}

		let keep_existing = model.canonical_id.clone();
		if let Some(existing) = &keep_existing {
			if existing != canonical_id {
				warn!(
					"Report {} already has canonical id {}, ignoring {}",
					correlation_id, existing, canonical_id
				);
			}
		}

		let mut active = model.into_active_model();
		active.sync_state = Set(SyncState::Synced);
		active.canonical_id = Set(Some(
			keep_existing.unwrap_or_else(|| canonical_id.to_owned()),
		));
		active.synced_at = Set(Some(Utc::now()));
		active.next_attempt_at = Set(None);
		active.update(self.db.conn()).await?;

		info!("Report {} synced as {}", correlation_id, canonical_id);
		Ok(())
	}

	/// Record a transient failure: bump the retry count and reschedule
	///
	/// Once the automatic attempt cap is reached the record is parked
	/// (`next_attempt_at` cleared) and only external triggers retry it.
	pub async fn mark_failed(&self, correlation_id: Uuid, error: &str) -> Result<ReportRecord> {
		let model = self
			.find(correlation_id)
			.await?
			.ok_or(QueueError::NotFound(correlation_id))?;

		let retries = model.retry_count.saturating_add(1);
		let next_attempt = self.backoff.next_attempt(retries as u32, Utc::now());

		let mut active = model.into_active_model();
		active.sync_state = Set(SyncState::Pending);
		active.retry_count = Set(retries);
		active.next_attempt_at = Set(next_attempt);
		active.last_error = Set(Some(error.to_owned()));
		let updated = active.update(self.db.conn()).await?;

		if next_attempt.is_none() {
			warn!(
				"Report {} parked after {} attempts: {}",
				correlation_id, retries, error
			);
		}

		model_to_record(updated)
	}

	/// Record a permanent rejection: terminal `Failed`, manual resolution only
	pub async fn mark_rejected(&self, correlation_id: Uuid, error: &str) -> Result<()> {
		let model = self
			.find(correlation_id)
			.await?
			.ok_or(QueueError::NotFound(correlation_id))?;

		let mut active = model.into_active_model();
		active.sync_state = Set(SyncState::Failed);
		active.next_attempt_at = Set(None);
		active.last_error = Set(Some(error.to_owned()));
		active.update(self.db.conn()).await?;

		warn!("Report {} rejected by remote: {}", correlation_id, error);
		Ok(())
	}

	/// Store the durable attachment reference after a successful upload
	pub async fn set_attachment_url(&self, correlation_id: Uuid, url: &str) -> Result<()> {
		let model = self
			.find(correlation_id)
			.await?
			.ok_or(QueueError::NotFound(correlation_id))?;

		let mut active = model.into_active_model();
		active.attachment_url = Set(Some(url.to_owned()));
		active.update(self.db.conn()).await?;
		Ok(())
	}

	/// Drop a permanently failed attachment so scalar fields can still sync
	pub async fn clear_attachment(&self, correlation_id: Uuid, reason: &str) -> Result<()> {
		let model = self
			.find(correlation_id)
			.await?
			.ok_or(QueueError::NotFound(correlation_id))?;

		let mut active = model.into_active_model();
		active.attachment_path = Set(None);
		active.attachment_url = Set(None);
		active.last_error = Set(Some(reason.to_owned()));
		active.update(self.db.conn()).await?;

		warn!(
			"Dropped attachment for report {}: {}",
			correlation_id, reason
		);
		Ok(())
	}

	/// Manual resolution: requeue a terminally failed record
	///
	/// Only `Failed` rows qualify; Synced is terminal and Pending/Syncing
	/// rows are already owned by the engine.
	pub async fn requeue(&self, correlation_id: Uuid) -> Result<()> {
		let model = self
			.find(correlation_id)
			.await?
			.ok_or(QueueError::NotFound(correlation_id))?;

		if model.sync_state != SyncState::Failed {
			return Err(QueueError::InvalidState {
				correlation_id,
				state: model.sync_state,
			});
		}

		let mut active = model.into_active_model();
		active.sync_state = Set(SyncState::Pending);
		active.retry_count = Set(0);
		active.next_attempt_at = Set(Some(Utc::now()));
		active.last_error = Set(None);
		active.update(self.db.conn()).await?;

		info!("Report {} requeued for sync", correlation_id);
		Ok(())
	}

	/// Reset records stranded in `Syncing` by a crash mid-drain
	pub async fn recover_interrupted(&self) -> Result<u64> {
		let result = Report::update_many()
			.col_expr(Column::SyncState, Expr::value(SyncState::Pending))
			.col_expr(Column::NextAttemptAt, Expr::value(Some(Utc::now())))
			.filter(Column::SyncState.eq(SyncState::Syncing))
			.exec(self.db.conn())
			.await?;

		if result.rows_affected > 0 {
			info!(
				"Recovered {} report(s) interrupted mid-sync",
				result.rows_affected
			);
		}
		Ok(result.rows_affected)
	}

	/// Every queued record, newest-created-first (synced rows included)
	pub async fn list_all(&self) -> Result<Vec<ReportRecord>> {
		let models = Report::find()
			.order_by_desc(Column::CreatedAt)
			.order_by_desc(Column::Id)
			.all(self.db.conn())
			.await?;

		models.into_iter().map(model_to_record).collect()
	}

	/// Destructive: delete every row. Refuses without explicit confirmation
	/// and is never invoked automatically.
	pub async fn purge_all(&self, confirmed: bool) -> Result<u64> {
		if !confirmed {
			return Err(QueueError::ConfirmationRequired);
		}

		let result = Report::delete_many().exec(self.db.conn()).await?;
		warn!("Purged {} report(s) from the local queue", result.rows_affected);
		Ok(result.rows_affected)
	}

	async fn find(&self, correlation_id: Uuid) -> Result<Option<Model>> {
		Ok(Report::find()
			.filter(Column::CorrelationId.eq(correlation_id))
			.one(self.db.conn())
			.await?)
	}
}

fn model_to_record(model: Model) -> Result<ReportRecord> {
	let incident_type: IncidentType = model
		.incident_type
		.parse()
		.map_err(|_| QueueError::Corrupt(format!("unknown incident type {:?}", model.incident_type)))?;

	let severity = u8::try_from(model.severity)
		.ok()
		.and_then(|level| Severity::new(level).ok())
		.ok_or_else(|| QueueError::Corrupt(format!("severity {} out of range", model.severity)))?;

	let location = match (model.latitude, model.longitude) {
		(Some(latitude), Some(longitude)) => Some(GeoPoint {
			latitude,
			longitude,
		}),
		_ => None,
	};

	Ok(ReportRecord {
		correlation_id: model.correlation_id,
		canonical_id: model.canonical_id,
		incident_type,
		severity,
		description: model.description,
		location,
		attachment_path: model.attachment_path.map(PathBuf::from),
		attachment_url: model.attachment_url,
		sync_state: model.sync_state,
		retry_count: model.retry_count.max(0) as u32,
		next_attempt_at: model.next_attempt_at,
		created_at: model.created_at,
		synced_at: model.synced_at,
		last_error: model.last_error,
	})
}
