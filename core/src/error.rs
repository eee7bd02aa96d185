//! Top-level error type for the engine surface

use crate::{config::ConfigError, store::CredentialError, store::StoreError, sync::SyncError};
use sea_orm::DbErr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Credential(#[from] CredentialError),

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error(transparent)]
	Sync(#[from] SyncError),

	#[error("database error: {0}")]
	Database(#[from] DbErr),

	#[error("logging setup failed: {0}")]
	Logging(String),
}
