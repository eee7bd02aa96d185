//! Sync orchestration service
//!
//! Owns the per-store sync lifecycle: the concurrency guard, run creation,
//! the fire-and-forget hand-off to the runner, lazy staleness reclamation,
//! diff retrieval for review, and the progress read paths. The caller of
//! `start_sync` gets the run id back immediately; everything after that is
//! observable through the run row and the event bus.

use crate::{
	catalog::CatalogDiff,
	config::CoreConfig,
	infra::{
		db::entities::{
			self, catalog_entry,
			store::StoreStatus,
			sync_run,
			sync_run::{RunStatus, SyncKind},
			CatalogEntry, SyncRun,
		},
		event::{Event, EventBus},
	},
	remote::CatalogSource,
	store::StoreService,
	sync::{
		apply::{self, ActionChoice, ApplyOutcome},
		error::SyncError,
		progress::SyncProgress,
		runner::{self, SyncContext},
	},
};
use sea_orm::{
	ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
	QueryFilter, QueryOrder,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Returned by `start_sync`: the run is created and the work is already
/// detached by the time the caller sees this
#[derive(Debug, Clone, Serialize)]
pub struct StartedSync {
	pub sync_run_uuid: Uuid,
	pub status: String,
}

/// A diff awaiting review, deserialized from the run's frozen payload
#[derive(Debug, Clone, Serialize)]
pub struct DiffReview {
	pub sync_run_uuid: Uuid,
	pub started_at: chrono::DateTime<chrono::Utc>,
	pub diff: CatalogDiff,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncAllFailure {
	pub store_uuid: Uuid,
	pub error: String,
}

/// Accounting for a sync-all sweep. Guard rejections are skips, not errors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncAllOutcome {
	pub started: Vec<Uuid>,
	pub skipped: Vec<Uuid>,
	pub failed: Vec<SyncAllFailure>,
}

pub struct SyncService {
	db: Arc<DatabaseConnection>,
	events: EventBus,
	source: Arc<dyn CatalogSource>,
	stores: StoreService,
	config: CoreConfig,
}

impl SyncService {
	pub fn new(
		db: Arc<DatabaseConnection>,
		events: EventBus,
		source: Arc<dyn CatalogSource>,
		stores: StoreService,
		config: CoreConfig,
	) -> Self {
		Self {
			db,
			events,
			source,
			stores,
			config,
		}
	}

	/// Start a sync for one store and return immediately; the fetch and
	/// processing work continues in a background task.
	///
	/// The store status is flipped to IN_PROGRESS synchronously before this
	/// returns, which is the concurrency guard a second caller will hit.
	pub async fn start_sync(&self, store_uuid: Uuid) -> Result<StartedSync, SyncError> {
		let store = self.store_by_uuid(store_uuid).await?;
		if !store.active {
			return Err(SyncError::StoreInactive { store_uuid });
		}

		// Lazy staleness pass: an abandoned open run is reclaimed here
		// instead of blocking this store forever.
		let store = self.reclaim_if_stale(store).await?;

		if store.sync_in_flight() {
			return Err(SyncError::SyncInProgress { store_uuid });
		}
		if store.store_status() == StoreStatus::DiffReview {
			if let Some(run) = self.open_run(store.id).await? {
				return Err(SyncError::DiffPending {
					store_uuid,
					run_uuid: run.uuid,
				});
			}
			// Review status with no open run left behind; overwrite it.
		}

		let kind = if self.active_entry_count(store.id).await? == 0 {
			SyncKind::Initial
		} else {
			SyncKind::Resync
		};
		let credentials = self.stores.decrypted_credentials(&store)?;

		let previous_status = store.store_status();
		runner::set_store_status(self.db.as_ref(), store.id, StoreStatus::InProgress).await?;

		let mut active = sync_run::ActiveModel::new_fetching(store.id, kind);
		active.progress = ActiveValue::Set(Some(serde_json::to_value(SyncProgress::new(
			RunStatus::Fetching,
		))?));

		let run = match active.insert(self.db.as_ref()).await {
			Ok(run) => run,
			Err(e) => {
				// Give the guard back rather than leaving the store stuck.
				let _ =
					runner::set_store_status(self.db.as_ref(), store.id, previous_status).await;
				return Err(e.into());
			}
		};

		let ctx = SyncContext {
			db: self.db.clone(),
			events: self.events.clone(),
			source: self.source.clone(),
			config: self.config.clone(),
		};
		let task_store = store.clone();
		let task_run = run.clone();
		tokio::spawn(async move {
			let result = runner::execute(
				ctx.clone(),
				task_store.clone(),
				task_run.clone(),
				credentials,
			)
			.await;
			if let Err(e) = result {
				runner::mark_run_failed(
					ctx.db.as_ref(),
					&ctx.events,
					&task_store,
					&task_run,
					&e.to_string(),
				)
				.await;
			}
		});

		self.events.emit(Event::SyncStarted {
			store_id: store.uuid,
			run_id: run.uuid,
			kind: kind.to_string(),
		});
		info!(
			"Started {} sync for store {} (run {})",
			kind, store.uuid, run.uuid
		);

		Ok(StartedSync {
			sync_run_uuid: run.uuid,
			status: StoreStatus::InProgress.to_string(),
		})
	}

	/// Sequentially start a sync for every active store. Stores already
	/// syncing or holding a pending diff are skipped; other per-store
	/// failures are collected without aborting the sweep.
	pub async fn sync_all_stores(&self) -> Result<SyncAllOutcome, SyncError> {
		let stores = entities::store::Entity::find()
			.filter(entities::store::Column::Active.eq(true))
			.order_by_asc(entities::store::Column::Id)
			.all(self.db.as_ref())
			.await?;

		let mut outcome = SyncAllOutcome::default();
		for store in stores {
			match self.start_sync(store.uuid).await {
				Ok(started) => outcome.started.push(started.sync_run_uuid),
				Err(SyncError::SyncInProgress { .. }) | Err(SyncError::DiffPending { .. }) => {
					outcome.skipped.push(store.uuid);
				}
				Err(e) => {
					warn!("sync-all could not start store {}: {}", store.uuid, e);
					outcome.failed.push(SyncAllFailure {
						store_uuid: store.uuid,
						error: e.to_string(),
					});
				}
			}
		}

		info!(
			"sync-all: {} started, {} skipped, {} failed",
			outcome.started.len(),
			outcome.skipped.len(),
			outcome.failed.len()
		);
		Ok(outcome)
	}

	/// Force the staleness transition for a store's open run regardless of
	/// its age. Returns the reclaimed run's id, if there was one.
	pub async fn reset_stuck_sync(&self, store_uuid: Uuid) -> Result<Option<Uuid>, SyncError> {
		let store = self.store_by_uuid(store_uuid).await?;

		match self.open_run(store.id).await? {
			Some(run) => {
				info!(
					"Manually resetting stuck run {} for store {}",
					run.uuid, store.uuid
				);
				runner::mark_run_failed(
					self.db.as_ref(),
					&self.events,
					&store,
					&run,
					"sync manually reset by operator",
				)
				.await;
				Ok(Some(run.uuid))
			}
			None => {
				// No run holds the guard, but the store status itself may
				// be stranded.
				if matches!(
					store.store_status(),
					StoreStatus::InProgress | StoreStatus::DiffReview
				) {
					runner::set_store_status(self.db.as_ref(), store.id, StoreStatus::Failed)
						.await?;
				}
				Ok(None)
			}
		}
	}

	/// Fetch the store's diff awaiting review, deserialized from the frozen
	/// payload persisted at DIFF_REVIEW time
	pub async fn get_diff(&self, store_uuid: Uuid) -> Result<DiffReview, SyncError> {
		let store = self.store_by_uuid(store_uuid).await?;
		let store = self.reclaim_if_stale(store).await?;

		let run = SyncRun::find()
			.filter(sync_run::Column::StoreId.eq(store.id))
			.filter(sync_run::Column::Status.eq(RunStatus::DiffReview.to_string()))
			.order_by_desc(sync_run::Column::StartedAt)
			.one(self.db.as_ref())
			.await?
			.ok_or(SyncError::NoDiffReview { store_uuid })?;

		let run_uuid = run.uuid;
		let payload = run
			.diff_payload
			.ok_or(SyncError::MissingDiffPayload { run_uuid })?;
		let diff: CatalogDiff = serde_json::from_value(payload)?;

		Ok(DiffReview {
			sync_run_uuid: run_uuid,
			started_at: run.started_at,
			diff,
		})
	}

	/// Apply a reviewed subset of diff actions against the frozen payload
	/// of the named run
	pub async fn apply_diff(
		&self,
		store_uuid: Uuid,
		run_uuid: Uuid,
		actions: Vec<ActionChoice>,
	) -> Result<ApplyOutcome, SyncError> {
		let store = self.store_by_uuid(store_uuid).await?;
		let store = self.reclaim_if_stale(store).await?;

		let run = SyncRun::find()
			.filter(sync_run::Column::Uuid.eq(run_uuid))
			.one(self.db.as_ref())
			.await?
			.ok_or(SyncError::RunNotFound { run_uuid })?;
		if run.store_id != store.id {
			return Err(SyncError::RunNotFound { run_uuid });
		}

		apply::apply_diff(
			self.db.as_ref(),
			&self.events,
			&self.config,
			&store,
			&run,
			&actions,
		)
		.await
	}

	/// Latest progress snapshot for a run, or `None` when the run does not
	/// exist or has no snapshot yet
	pub async fn get_progress(&self, run_uuid: Uuid) -> Result<Option<SyncProgress>, SyncError> {
		let run = SyncRun::find()
			.filter(sync_run::Column::Uuid.eq(run_uuid))
			.one(self.db.as_ref())
			.await?;

		Ok(run
			.and_then(|r| r.progress)
			.and_then(|json| serde_json::from_value(json).ok()))
	}

	/// Push-style progress: a background poller reads the run row at the
	/// configured interval and forwards each changed snapshot. The channel
	/// closes after the terminal snapshot is delivered, or when the run
	/// vanishes, or when the receiver is dropped.
	pub fn subscribe_progress(&self, run_uuid: Uuid) -> mpsc::Receiver<SyncProgress> {
		let (tx, rx) = mpsc::channel(64);
		let db = self.db.clone();
		let interval = self.config.poll_interval();

		tokio::spawn(async move {
			let mut last: Option<SyncProgress> = None;
			loop {
				let run = match SyncRun::find()
					.filter(sync_run::Column::Uuid.eq(run_uuid))
					.one(db.as_ref())
					.await
				{
					Ok(Some(run)) => run,
					Ok(None) => break,
					Err(e) => {
						warn!("Progress poll failed for run {}: {}", run_uuid, e);
						break;
					}
				};

				let status = run.run_status();
				let snapshot = run
					.progress
					.and_then(|json| serde_json::from_value::<SyncProgress>(json).ok());

				if let Some(snapshot) = snapshot {
					if last.as_ref() != Some(&snapshot) {
						if tx.send(snapshot.clone()).await.is_err() {
							break;
						}
						last = Some(snapshot);
					}
				}

				if status.is_terminal() {
					break;
				}
				tokio::time::sleep(interval).await;
			}
		});

		rx
	}

	async fn store_by_uuid(&self, store_uuid: Uuid) -> Result<entities::store::Model, SyncError> {
		entities::store::Entity::find()
			.filter(entities::store::Column::Uuid.eq(store_uuid))
			.one(self.db.as_ref())
			.await?
			.ok_or(SyncError::StoreNotFound { store_uuid })
	}

	async fn active_entry_count(&self, store_id: i32) -> Result<u64, SyncError> {
		Ok(CatalogEntry::find()
			.filter(catalog_entry::Column::StoreId.eq(store_id))
			.filter(catalog_entry::Column::Active.eq(true))
			.count(self.db.as_ref())
			.await?)
	}

	/// Most recent open run for a store, if any. At most one should exist.
	async fn open_run(&self, store_id: i32) -> Result<Option<sync_run::Model>, SyncError> {
		Ok(SyncRun::find()
			.filter(sync_run::Column::StoreId.eq(store_id))
			.filter(sync_run::Column::Status.is_in(RunStatus::OPEN.map(|s| s.to_string())))
			.order_by_desc(sync_run::Column::StartedAt)
			.one(self.db.as_ref())
			.await?)
	}

	/// Reclaim the store's open run if it outlived the staleness window:
	/// mark it FAILED with a timeout reason and reset the store. Returns
	/// the store re-read from the database when a reclaim happened.
	async fn reclaim_if_stale(
		&self,
		store: entities::store::Model,
	) -> Result<entities::store::Model, SyncError> {
		let Some(run) = self.open_run(store.id).await? else {
			return Ok(store);
		};
		if run.age() <= self.config.stale_window() {
			return Ok(store);
		}

		info!(
			"Reclaiming stale run {} for store {} (started {})",
			run.uuid, store.uuid, run.started_at
		);
		let message = format!(
			"sync timed out after {} minutes without completing",
			self.config.stale_run_minutes
		);
		runner::mark_run_failed(self.db.as_ref(), &self.events, &store, &run, &message).await;

		self.store_by_uuid(store.uuid).await
	}
}
