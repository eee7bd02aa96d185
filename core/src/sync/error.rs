//! Sync orchestration errors

use crate::remote::RemoteError;
use crate::store::credentials::CredentialError;
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SyncError {
	#[error("store {store_uuid} not found")]
	StoreNotFound { store_uuid: Uuid },

	#[error("store {store_uuid} is deactivated")]
	StoreInactive { store_uuid: Uuid },

	#[error("a sync is already in progress for store {store_uuid}")]
	SyncInProgress { store_uuid: Uuid },

	#[error("store {store_uuid} has a diff awaiting review (run {run_uuid})")]
	DiffPending { store_uuid: Uuid, run_uuid: Uuid },

	#[error("no diff review in progress for store {store_uuid}")]
	NoDiffReview { store_uuid: Uuid },

	#[error("sync run {run_uuid} not found")]
	RunNotFound { run_uuid: Uuid },

	#[error("sync run {run_uuid} is not awaiting review (status: {status})")]
	NotAwaitingReview { run_uuid: Uuid, status: String },

	#[error("sync run {run_uuid} has no diff payload")]
	MissingDiffPayload { run_uuid: Uuid },

	#[error("could not generate a unique barcode prefix after {attempts} attempts")]
	BarcodePrefixExhausted { attempts: u32 },

	#[error(transparent)]
	Remote(#[from] RemoteError),

	#[error(transparent)]
	Credential(#[from] CredentialError),

	#[error("database error: {0}")]
	Database(#[from] DbErr),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}
