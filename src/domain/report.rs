//! Incident report domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;
use uuid::Uuid;

pub use crate::infrastructure::database::entities::report::SyncState;

/// Incident categories a responder can submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "title_case")]
#[serde(try_from = "String", into = "String")]
pub enum IncidentType {
	Landslide,
	Flood,
	RoadBlock,
	PowerLineDown,
}

impl From<IncidentType> for String {
	fn from(value: IncidentType) -> Self {
		value.to_string()
	}
}

impl TryFrom<String> for IncidentType {
	type Error = strum::ParseError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}

/// Ordinal severity, 1 (low) to 5 (high)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Severity(u8);

#[derive(Error, Debug)]
#[error("severity must be between 1 and 5, got {0}")]
pub struct InvalidSeverity(pub u8);

impl Severity {
	pub const MIN: Severity = Severity(1);
	pub const MAX: Severity = Severity(5);

	pub fn new(level: u8) -> Result<Self, InvalidSeverity> {
		if (1..=5).contains(&level) {
			Ok(Self(level))
		} else {
			Err(InvalidSeverity(level))
		}
	}

	pub fn get(self) -> u8 {
		self.0
	}
}

impl From<Severity> for u8 {
	fn from(value: Severity) -> Self {
		value.0
	}
}

impl TryFrom<u8> for Severity {
	type Error = InvalidSeverity;

	fn try_from(value: u8) -> Result<Self, Self::Error> {
		Severity::new(value)
	}
}

impl std::fmt::Display for Severity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// WGS84 coordinates attached to a report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
	pub latitude: f64,
	pub longitude: f64,
}

/// Operator-facing status of a canonical report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
	New,
	Ack,
}

/// Input for a new submission; the queue fills in the rest
#[derive(Debug, Clone)]
pub struct ReportDraft {
	/// Idempotency key; generated on `put` when absent
	pub correlation_id: Option<Uuid>,
	pub incident_type: IncidentType,
	pub severity: Severity,
	pub description: Option<String>,
	pub location: Option<GeoPoint>,
	pub attachment_path: Option<PathBuf>,
}

impl ReportDraft {
	pub fn new(incident_type: IncidentType, severity: Severity) -> Self {
		Self {
			correlation_id: None,
			incident_type,
			severity,
			description: None,
			location: None,
			attachment_path: None,
		}
	}
}

/// A queued report as stored in the local durable queue
#[derive(Debug, Clone)]
pub struct ReportRecord {
	pub correlation_id: Uuid,
	/// Assigned by the remote store on first acceptance; set at most once
	pub canonical_id: Option<String>,
	pub incident_type: IncidentType,
	pub severity: Severity,
	pub description: Option<String>,
	pub location: Option<GeoPoint>,
	pub attachment_path: Option<PathBuf>,
	pub attachment_url: Option<String>,
	pub sync_state: SyncState,
	pub retry_count: u32,
	/// `None` while parked or finished; parked records only run on external triggers
	pub next_attempt_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub synced_at: Option<DateTime<Utc>>,
	pub last_error: Option<String>,
}

impl ReportRecord {
	/// Whether the attachment still needs resolving before the remote write
	pub fn needs_upload(&self) -> bool {
		self.attachment_path.is_some() && self.attachment_url.is_none()
	}

	/// Parked records exhausted their automatic attempts
	pub fn is_parked(&self) -> bool {
		self.sync_state == SyncState::Pending && self.next_attempt_at.is_none()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn severity_bounds() {
		assert!(Severity::new(0).is_err());
		assert!(Severity::new(6).is_err());
		assert_eq!(Severity::new(3).unwrap().get(), 3);
	}

	#[test]
	fn incident_type_round_trips_display() {
		assert_eq!(IncidentType::PowerLineDown.to_string(), "Power Line Down");
		assert_eq!(
			"Road Block".parse::<IncidentType>().unwrap(),
			IncidentType::RoadBlock
		);
	}

	#[test]
	fn status_uses_wire_casing() {
		assert_eq!(ReportStatus::New.to_string(), "NEW");
		assert_eq!("ACK".parse::<ReportStatus>().unwrap(), ReportStatus::Ack);
	}
}
