//! Synchronization: backoff policy, engine, remote store and media uploader

pub mod backoff;
pub mod engine;
pub mod media;
pub mod remote;

pub use backoff::BackoffPolicy;
pub use engine::{PassSummary, SyncCommand, SyncEngine, SyncError, SyncHandle, TriggerReason};
pub use media::{FsMediaUploader, MediaError, MediaUploader};
pub use remote::{
	CreateAck, CreateReport, MemoryRemoteStore, RemoteChange, RemoteError, RemoteStore,
};
