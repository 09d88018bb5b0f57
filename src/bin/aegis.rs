//! Aegis command line
//!
//! Local-mode frontend for the queue and sync engine: submissions land in
//! the on-disk queue, a manual `sync` drains them into the in-process remote
//! store, and `feed` renders the operator view.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::Table;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use aegis_core::config::{default_data_dir, AppConfig};
use aegis_core::domain::{GeoPoint, IncidentType, ReportDraft, ReportStatus, Severity};
use aegis_core::feed::{FeedFilter, SeverityBand, SortPolicy};
use aegis_core::infrastructure::events::Event;
use aegis_core::sync::{FsMediaUploader, MemoryRemoteStore, TriggerReason};
use aegis_core::Core;

#[derive(Parser)]
#[command(name = "aegis", version, about = "Offline-first incident report queue")]
struct Cli {
	/// Data directory (queue database, config, attachments)
	#[arg(long, global = true, env = "AEGIS_DATA_DIR")]
	data_dir: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Capture a report into the local queue
	Submit {
		#[arg(long, value_enum)]
		incident_type: CliIncidentType,

		/// Severity 1 (low) to 5 (high)
		#[arg(long, default_value_t = 3)]
		severity: u8,

		#[arg(long)]
		description: Option<String>,

		#[arg(long, requires = "lng")]
		lat: Option<f64>,

		#[arg(long, requires = "lat")]
		lng: Option<f64>,

		/// Local photo to upload during sync
		#[arg(long)]
		attachment: Option<PathBuf>,

		/// Capture only; skip the automatic sync pass
		#[arg(long)]
		offline: bool,
	},

	/// List queued reports
	Queue {
		/// Include synced and failed rows
		#[arg(long)]
		all: bool,
	},

	/// Run a drain pass now
	Sync,

	/// Requeue a terminally failed report
	Retry { correlation_id: Uuid },

	/// Show the aggregated operator feed
	Feed {
		#[arg(long, value_enum, default_value_t = CliSort::Newest)]
		sort: CliSort,

		#[arg(long, value_enum)]
		status: Option<CliStatus>,

		#[arg(long, value_enum)]
		incident_type: Option<CliIncidentType>,

		#[arg(long, value_enum)]
		severity: Option<CliSeverityBand>,

		#[arg(long)]
		search: Option<String>,
	},

	/// Acknowledge a canonical report
	Ack { canonical_id: String },

	/// Delete every local queue entry
	Purge {
		/// Confirm the destructive purge
		#[arg(long)]
		yes: bool,
	},
}

// Wrappers for clap ValueEnum; the domain enums stay clap-free.

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliIncidentType {
	Landslide,
	Flood,
	RoadBlock,
	PowerLineDown,
}

impl From<CliIncidentType> for IncidentType {
	fn from(value: CliIncidentType) -> Self {
		match value {
			CliIncidentType::Landslide => IncidentType::Landslide,
			CliIncidentType::Flood => IncidentType::Flood,
			CliIncidentType::RoadBlock => IncidentType::RoadBlock,
			CliIncidentType::PowerLineDown => IncidentType::PowerLineDown,
		}
	}
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliSort {
	Newest,
	Severity,
	Status,
}

impl From<CliSort> for SortPolicy {
	fn from(value: CliSort) -> Self {
		match value {
			CliSort::Newest => SortPolicy::Newest,
			CliSort::Severity => SortPolicy::Severity,
			CliSort::Status => SortPolicy::Status,
		}
	}
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliStatus {
	New,
	Ack,
}

impl From<CliStatus> for ReportStatus {
	fn from(value: CliStatus) -> Self {
		match value {
			CliStatus::New => ReportStatus::New,
			CliStatus::Ack => ReportStatus::Ack,
		}
	}
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliSeverityBand {
	/// Severity 1-2
	Low,
	/// Severity 3
	Medium,
	/// Severity 4-5
	High,
}

impl From<CliSeverityBand> for SeverityBand {
	fn from(value: CliSeverityBand) -> Self {
		match value {
			CliSeverityBand::Low => SeverityBand::Low,
			CliSeverityBand::Medium => SeverityBand::Medium,
			CliSeverityBand::High => SeverityBand::High,
		}
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.with_target(false)
		.init();

	let data_dir = match &cli.data_dir {
		Some(dir) => dir.clone(),
		None => default_data_dir()?,
	};
	let config = AppConfig::load_from(&data_dir)?;

	let remote = Arc::new(MemoryRemoteStore::new());
	let media = Arc::new(FsMediaUploader::new(config.attachments_dir()));
	let core = Core::init(config, remote, media).await?;

	match cli.command {
		Command::Submit {
			incident_type,
			severity,
			description,
			lat,
			lng,
			attachment,
			offline,
		} => {
			if offline {
				core.sync().set_connectivity(false)?;
			}

			let mut draft = ReportDraft::new(incident_type.into(), Severity::new(severity)?);
			draft.description = description;
			draft.location = match (lat, lng) {
				(Some(latitude), Some(longitude)) => Some(GeoPoint {
					latitude,
					longitude,
				}),
				_ => None,
			};
			draft.attachment_path = attachment;

			// Subscribe before submitting so the pass summary is not missed.
			let events = core.events.subscribe();
			let record = core.submit(draft).await?;
			println!("Queued report {}", record.correlation_id);

			if offline {
				println!("Offline capture; will sync on the next pass.");
			} else {
				wait_for_pass(events).await;
			}
		}

		Command::Queue { all } => {
			let records = core.queue.list_all().await?;
			let mut table = Table::new();
			table.set_header(vec![
				"correlation id",
				"type",
				"sev",
				"state",
				"retries",
				"canonical id",
				"created",
			]);
			for r in records {
				if !all && r.sync_state == aegis_core::domain::SyncState::Synced {
					continue;
				}
				table.add_row(vec![
					r.correlation_id.to_string(),
					r.incident_type.to_string(),
					r.severity.to_string(),
					r.sync_state.to_string(),
					r.retry_count.to_string(),
					r.canonical_id.unwrap_or_else(|| "-".into()),
					r.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
				]);
			}
			println!("{table}");
		}

		Command::Sync => {
			let summary = run_pass(&core).await?;
			println!(
				"Sync pass: {} attempted, {} synced, {} deferred, {} parked, {} rejected",
				summary.attempted, summary.synced, summary.deferred, summary.parked, summary.rejected
			);
		}

		Command::Retry { correlation_id } => {
			core.queue.requeue(correlation_id).await?;
			let summary = run_pass(&core).await?;
			println!(
				"Requeued {}; pass synced {} of {}",
				correlation_id, summary.synced, summary.attempted
			);
		}

		Command::Feed {
			sort,
			status,
			incident_type,
			severity,
			search,
		} => {
			// Drain first so this process's remote has the queued records.
			run_pass(&core).await?;

			let filter = FeedFilter {
				incident_type: incident_type.map(Into::into),
				status: status.map(Into::into),
				severity: severity.map(Into::into),
				search,
			};
			let entries = core.feed.snapshot(sort.into(), &filter).await;

			let mut table = Table::new();
			table.set_header(vec!["canonical id", "type", "sev", "status", "reported"]);
			for e in &entries {
				table.add_row(vec![
					e.canonical_id.clone(),
					e.incident_type.to_string(),
					e.severity.to_string(),
					e.status.to_string(),
					e.reported_at.format("%Y-%m-%d %H:%M:%S").to_string(),
				]);
			}
			println!("{table}");
			println!("{} incident(s)", entries.len());
		}

		Command::Ack { canonical_id } => {
			run_pass(&core).await?;
			core.feed
				.acknowledge(&canonical_id, core.remote.as_ref())
				.await?;
			println!("Acknowledged {canonical_id}");
		}

		Command::Purge { yes } => {
			let removed = core.queue.purge_all(yes).await?;
			println!("Purged {removed} report(s)");
		}
	}

	core.shutdown().await;
	Ok(())
}

/// Trigger a manual pass and wait for its summary
async fn run_pass(core: &Core) -> Result<aegis_core::sync::PassSummary> {
	let mut events = core.events.subscribe();
	core.sync().trigger(TriggerReason::Manual)?;

	let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
	loop {
		let event = tokio::time::timeout_at(deadline, events.recv())
			.await
			.map_err(|_| anyhow!("timed out waiting for the sync pass"))??;
		if let Event::SyncPassCompleted { summary } = event {
			// Give the feed pump a beat to apply the change stream.
			tokio::time::sleep(Duration::from_millis(50)).await;
			return Ok(summary);
		}
	}
}

/// Wait for the automatic pass a submission triggers
async fn wait_for_pass(mut events: tokio::sync::broadcast::Receiver<Event>) {
	let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
	while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
		if let Event::SyncPassCompleted { summary } = event {
			if summary.synced > 0 {
				println!("Synced {} report(s).", summary.synced);
			}
			return;
		}
	}
	println!("Saved locally; sync will retry on the next pass.");
}
