//! Domain model for incident reporting

pub mod report;

pub use report::{
	GeoPoint, IncidentType, InvalidSeverity, ReportDraft, ReportRecord, ReportStatus, Severity,
	SyncState,
};
