//! Sync run entity
//!
//! One attempt to synchronize a store's catalog. Carries lifecycle status,
//! classification counts, the frozen diff payload awaiting review, and the
//! latest progress snapshot. Append-only: rows are immutable once terminal.

use sea_orm::{entity::prelude::*, ActiveValue};
use serde::{Deserialize, Serialize};

/// Whether a run seeds an empty catalog or reconciles an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncKind {
	Initial,
	Resync,
}

impl std::fmt::Display for SyncKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Initial => write!(f, "initial"),
			Self::Resync => write!(f, "resync"),
		}
	}
}

impl From<String> for SyncKind {
	fn from(s: String) -> Self {
		match s.as_str() {
			"initial" => Self::Initial,
			"resync" => Self::Resync,
			_ => Self::Resync,
		}
	}
}

/// Lifecycle status of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
	/// Pulling pages from the remote catalog
	Fetching,
	/// Transforming and writing entries, or computing the diff
	Processing,
	/// Frozen diff persisted, waiting for a human to apply it
	DiffReview,
	/// An approved diff subset is being applied
	Applying,
	Completed,
	Failed,
}

impl RunStatus {
	/// Non-terminal statuses; at most one run per store may hold one
	pub const OPEN: [RunStatus; 4] = [
		Self::Fetching,
		Self::Processing,
		Self::DiffReview,
		Self::Applying,
	];

	/// Terminal runs are immutable history
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Completed | Self::Failed)
	}

	/// Open runs hold the per-store concurrency guard
	pub fn is_open(&self) -> bool {
		!self.is_terminal()
	}
}

impl std::fmt::Display for RunStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Fetching => write!(f, "fetching"),
			Self::Processing => write!(f, "processing"),
			Self::DiffReview => write!(f, "diff_review"),
			Self::Applying => write!(f, "applying"),
			Self::Completed => write!(f, "completed"),
			Self::Failed => write!(f, "failed"),
		}
	}
}

impl From<String> for RunStatus {
	fn from(s: String) -> Self {
		match s.as_str() {
			"fetching" => Self::Fetching,
			"processing" => Self::Processing,
			"diff_review" => Self::DiffReview,
			"applying" => Self::Applying,
			"completed" => Self::Completed,
			"failed" => Self::Failed,
			_ => Self::Failed,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_runs")]
pub struct Model {
	#[sea_orm(primary_key)]
	#[serde(default)]
	pub id: i32,
	pub uuid: Uuid,
	pub store_id: i32,

	pub kind: String, // SyncKind as string

	/// Current status
	pub status: String, // RunStatus as string

	pub fetched_count: i32,
	pub new_count: i32,
	pub modified_count: i32,
	pub removed_count: i32,
	pub unchanged_count: i32,
	pub applied_count: i32,

	/// Error message if status is "failed"
	pub error_message: Option<String>,

	/// Frozen diff payload (CatalogDiff as JSON), set at diff-review time
	pub diff_payload: Option<Json>,

	/// Latest progress snapshot (SyncProgress as JSON)
	pub progress: Option<Json>,

	pub started_at: DateTimeUtc,
	pub completed_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(
		belongs_to = "super::store::Entity",
		from = "Column::StoreId",
		to = "super::store::Column::Id",
		on_delete = "Cascade"
	)]
	Store,
}

impl Related<super::store::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Store.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
	/// Fresh run in the fetching state, ready to insert
	pub fn new_fetching(store_id: i32, kind: SyncKind) -> Self {
		Self {
			id: ActiveValue::NotSet,
			uuid: ActiveValue::Set(Uuid::new_v4()),
			store_id: ActiveValue::Set(store_id),
			kind: ActiveValue::Set(kind.to_string()),
			status: ActiveValue::Set(RunStatus::Fetching.to_string()),
			fetched_count: ActiveValue::Set(0),
			new_count: ActiveValue::Set(0),
			modified_count: ActiveValue::Set(0),
			removed_count: ActiveValue::Set(0),
			unchanged_count: ActiveValue::Set(0),
			applied_count: ActiveValue::Set(0),
			error_message: ActiveValue::Set(None),
			diff_payload: ActiveValue::Set(None),
			progress: ActiveValue::Set(None),
			started_at: ActiveValue::Set(chrono::Utc::now()),
			completed_at: ActiveValue::Set(None),
		}
	}
}

impl Model {
	/// Get the kind as enum
	pub fn sync_kind(&self) -> SyncKind {
		SyncKind::from(self.kind.clone())
	}

	/// Get the status as enum
	pub fn run_status(&self) -> RunStatus {
		RunStatus::from(self.status.clone())
	}

	/// Calculate run duration
	pub fn duration(&self) -> Option<chrono::Duration> {
		self.completed_at.map(|end| end - self.started_at)
	}

	/// Age of the run since it started
	pub fn age(&self) -> chrono::Duration {
		chrono::Utc::now() - self.started_at
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_roundtrip() {
		for status in [
			RunStatus::Fetching,
			RunStatus::Processing,
			RunStatus::DiffReview,
			RunStatus::Applying,
			RunStatus::Completed,
			RunStatus::Failed,
		] {
			assert_eq!(RunStatus::from(status.to_string()), status);
		}
	}

	#[test]
	fn test_terminal_states() {
		assert!(RunStatus::Completed.is_terminal());
		assert!(RunStatus::Failed.is_terminal());
		assert!(RunStatus::Fetching.is_open());
		assert!(RunStatus::Processing.is_open());
		assert!(RunStatus::DiffReview.is_open());
		assert!(RunStatus::Applying.is_open());
	}

	#[test]
	fn test_new_fetching_defaults() {
		let run = ActiveModel::new_fetching(7, SyncKind::Initial);
		assert!(run.id.is_not_set());
		assert_eq!(run.store_id.clone().unwrap(), 7);
		assert_eq!(run.kind.clone().unwrap(), "initial");
		assert_eq!(run.status.clone().unwrap(), "fetching");
		assert_eq!(run.fetched_count.clone().unwrap(), 0);
		assert_eq!(run.completed_at.clone().unwrap(), None);
		assert_eq!(run.diff_payload.clone().unwrap(), None);
	}
}
