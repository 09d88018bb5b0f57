//! Queued incident report entity, the single table behind the local durable queue

use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reports")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Client-generated idempotency key; one queue row per submission
    #[sea_orm(unique)]
    pub correlation_id: Uuid,

    /// Remote-assigned identifier, absent until the first successful write
    pub canonical_id: Option<String>,

    #[sea_orm(indexed)]
    pub incident_type: String,

    pub severity: i16,

    pub description: Option<String>,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    /// Local attachment awaiting upload
    pub attachment_path: Option<String>,
    /// Durable reference once the media uploader has resolved it
    pub attachment_url: Option<String>,

    #[sea_orm(indexed)]
    pub sync_state: SyncState,

    pub retry_count: i32,
    pub next_attempt_at: Option<DateTimeUtc>,

    pub created_at: DateTimeUtc,
    pub synced_at: Option<DateTimeUtc>,

    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum SyncState {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "syncing")]
    Syncing,
    #[sea_orm(string_value = "synced")]
    Synced,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncState::Pending => "pending",
            SyncState::Syncing => "syncing",
            SyncState::Synced => "synced",
            SyncState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {
    fn new() -> Self {
        Self {
            correlation_id: Set(Uuid::new_v4()),
            sync_state: Set(SyncState::Pending),
            retry_count: Set(0),
            created_at: Set(chrono::Utc::now()),
            ..ActiveModelTrait::default()
        }
    }
}
