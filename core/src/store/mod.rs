//! Store management
//!
//! CRUD for connected stores. API tokens pass through the credential vault
//! on the way into the database and are only decrypted again for the sync
//! orchestrator's remote client.

pub mod credentials;

pub use credentials::{CredentialError, CredentialVault};

use crate::{
	infra::{
		db::entities::{self, catalog_entry, sync_run, CatalogEntry, Store, SyncRun},
		event::{Event, EventBus},
	},
	remote::{StoreCredentials, DEFAULT_API_VERSION},
};
use sea_orm::{
	ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
	QueryFilter, QueryOrder, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
	#[error("store {store_uuid} not found")]
	NotFound { store_uuid: Uuid },

	#[error("store name cannot be empty")]
	EmptyName,

	#[error("store domain cannot be empty")]
	EmptyDomain,

	#[error("a store is already connected for domain {domain}")]
	DuplicateDomain { domain: String },

	#[error(transparent)]
	Credential(#[from] CredentialError),

	#[error("database error: {0}")]
	Database(#[from] DbErr),
}

/// Arguments for connecting a new store
#[derive(Debug, Clone, Deserialize)]
pub struct CreateStoreArgs {
	pub name: String,
	pub domain: String,
	/// Plaintext admin API token; encrypted before it reaches the database
	pub api_token: String,
	#[serde(default = "default_api_version")]
	pub api_version: String,
}

fn default_api_version() -> String {
	DEFAULT_API_VERSION.to_string()
}

#[derive(Clone)]
pub struct StoreService {
	db: Arc<DatabaseConnection>,
	events: EventBus,
	vault: Arc<CredentialVault>,
}

impl StoreService {
	pub fn new(db: Arc<DatabaseConnection>, events: EventBus, vault: Arc<CredentialVault>) -> Self {
		Self { db, events, vault }
	}

	/// Connect a new store. Status starts at NEVER; the first sync decides
	/// whether it is an initial load or a resync.
	pub async fn create_store(
		&self,
		args: CreateStoreArgs,
	) -> Result<entities::store::Model, StoreError> {
		let name = args.name.trim();
		if name.is_empty() {
			return Err(StoreError::EmptyName);
		}
		let domain = args.domain.trim().to_lowercase();
		if domain.is_empty() {
			return Err(StoreError::EmptyDomain);
		}

		let existing = Store::find()
			.filter(entities::store::Column::Domain.eq(domain.as_str()))
			.filter(entities::store::Column::Active.eq(true))
			.one(self.db.as_ref())
			.await?;
		if existing.is_some() {
			return Err(StoreError::DuplicateDomain { domain });
		}

		let cipher = self.vault.encrypt(&args.api_token)?;
		let now = chrono::Utc::now();

		let store = entities::store::ActiveModel {
			id: ActiveValue::NotSet,
			uuid: ActiveValue::Set(Uuid::new_v4()),
			name: ActiveValue::Set(name.to_string()),
			domain: ActiveValue::Set(domain),
			credential_cipher: ActiveValue::Set(cipher),
			api_version: ActiveValue::Set(args.api_version),
			product_count: ActiveValue::Set(0),
			last_synced_at: ActiveValue::Set(None),
			status: ActiveValue::Set(entities::store::StoreStatus::Never.to_string()),
			active: ActiveValue::Set(true),
			created_at: ActiveValue::Set(now),
			updated_at: ActiveValue::Set(now),
		}
		.insert(self.db.as_ref())
		.await?;

		self.events.emit(Event::StoreCreated {
			store_id: store.uuid,
			name: store.name.clone(),
		});
		info!("Connected store {} ({})", store.name, store.uuid);
		Ok(store)
	}

	pub async fn get_store(&self, store_uuid: Uuid) -> Result<entities::store::Model, StoreError> {
		Store::find()
			.filter(entities::store::Column::Uuid.eq(store_uuid))
			.one(self.db.as_ref())
			.await?
			.ok_or(StoreError::NotFound { store_uuid })
	}

	pub async fn list_stores(&self) -> Result<Vec<entities::store::Model>, StoreError> {
		Ok(Store::find()
			.order_by_asc(entities::store::Column::Id)
			.all(self.db.as_ref())
			.await?)
	}

	/// Sync run history for one store, newest first
	pub async fn get_sync_logs(
		&self,
		store_uuid: Uuid,
	) -> Result<Vec<sync_run::Model>, StoreError> {
		let store = self.get_store(store_uuid).await?;
		Ok(SyncRun::find()
			.filter(sync_run::Column::StoreId.eq(store.id))
			.order_by_desc(sync_run::Column::StartedAt)
			.all(self.db.as_ref())
			.await?)
	}

	/// Disconnect a store and soft-retire its active catalog entries in the
	/// same transaction. Returns the number of entries retired. Run history
	/// stays readable.
	pub async fn deactivate_store(&self, store_uuid: Uuid) -> Result<u64, StoreError> {
		let store = self.get_store(store_uuid).await?;
		if !store.active {
			return Ok(0);
		}

		let now = chrono::Utc::now();
		let txn = self.db.begin().await?;

		let retired = CatalogEntry::update_many()
			.filter(catalog_entry::Column::StoreId.eq(store.id))
			.filter(catalog_entry::Column::Active.eq(true))
			.set(catalog_entry::ActiveModel {
				active: ActiveValue::Set(false),
				updated_at: ActiveValue::Set(now),
				..Default::default()
			})
			.exec(&txn)
			.await?
			.rows_affected;

		entities::store::ActiveModel {
			id: ActiveValue::Unchanged(store.id),
			active: ActiveValue::Set(false),
			product_count: ActiveValue::Set(0),
			updated_at: ActiveValue::Set(now),
			..Default::default()
		}
		.update(&txn)
		.await?;

		txn.commit().await?;

		self.events.emit(Event::StoreDeactivated {
			store_id: store.uuid,
			name: store.name.clone(),
			retired_entries: retired,
		});
		info!(
			"Deactivated store {} ({} entries retired)",
			store.uuid, retired
		);
		Ok(retired)
	}

	/// Decrypt the store's API token for the remote client. The plaintext
	/// never leaves the returned value.
	pub fn decrypted_credentials(
		&self,
		store: &entities::store::Model,
	) -> Result<StoreCredentials, CredentialError> {
		let token = self.vault.decrypt(&store.credential_cipher)?;
		Ok(StoreCredentials {
			domain: store.domain.clone(),
			token,
			api_version: store.api_version.clone(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use serde_json::json;

	#[test]
	fn create_args_default_api_version() {
		let args: CreateStoreArgs = serde_json::from_value(json!({
			"name": "Acme Outfitters",
			"domain": "acme.example-commerce.com",
			"api_token": "tok_secret",
		}))
		.unwrap();
		assert_eq!(args.api_version, DEFAULT_API_VERSION);
	}
}
