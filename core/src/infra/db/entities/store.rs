//! Store entity
//!
//! One external catalog source. Identity fields are managed by store CRUD;
//! sync status, product count and last-synced timestamp are owned by the
//! sync orchestrator.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Store-level sync status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreStatus {
	/// Never synced
	Never,
	/// A sync run is currently fetching/processing
	InProgress,
	/// Catalog is synchronized
	Synced,
	/// A diff is awaiting human review
	DiffReview,
	/// Last sync attempt failed
	Failed,
}

impl std::fmt::Display for StoreStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Never => write!(f, "never"),
			Self::InProgress => write!(f, "in_progress"),
			Self::Synced => write!(f, "synced"),
			Self::DiffReview => write!(f, "diff_review"),
			Self::Failed => write!(f, "failed"),
		}
	}
}

impl From<String> for StoreStatus {
	fn from(s: String) -> Self {
		match s.as_str() {
			"never" => Self::Never,
			"in_progress" => Self::InProgress,
			"synced" => Self::Synced,
			"diff_review" => Self::DiffReview,
			"failed" => Self::Failed,
			_ => Self::Never,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stores")]
pub struct Model {
	#[sea_orm(primary_key)]
	#[serde(default)]
	pub id: i32,
	pub uuid: Uuid,
	pub name: String,

	/// Remote endpoint, e.g. `acme.example-commerce.com`
	pub domain: String,

	/// AES-GCM encrypted API token, hex encoded. Never exposed in plaintext
	/// outside the credential vault.
	#[serde(skip_serializing)]
	pub credential_cipher: String,

	pub api_version: String,

	/// Number of active catalog entries after the last completed sync
	pub product_count: i32,

	pub last_synced_at: Option<DateTimeUtc>,

	/// Current status
	pub status: String, // StoreStatus as string

	pub active: bool,

	#[serde(default)]
	pub created_at: DateTimeUtc,
	#[serde(default)]
	pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(has_many = "super::catalog_entry::Entity")]
	CatalogEntries,
	#[sea_orm(has_many = "super::sync_run::Entity")]
	SyncRuns,
}

impl Related<super::catalog_entry::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::CatalogEntries.def()
	}
}

impl Related<super::sync_run::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::SyncRuns.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
	/// Get the status as enum
	pub fn store_status(&self) -> StoreStatus {
		StoreStatus::from(self.status.clone())
	}

	/// A sync may only start when no other sync is in flight
	pub fn sync_in_flight(&self) -> bool {
		self.store_status() == StoreStatus::InProgress
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_roundtrip() {
		for status in [
			StoreStatus::Never,
			StoreStatus::InProgress,
			StoreStatus::Synced,
			StoreStatus::DiffReview,
			StoreStatus::Failed,
		] {
			assert_eq!(StoreStatus::from(status.to_string()), status);
		}
	}

	#[test]
	fn test_unknown_status_falls_back_to_never() {
		assert_eq!(StoreStatus::from("bogus".to_string()), StoreStatus::Never);
	}
}
