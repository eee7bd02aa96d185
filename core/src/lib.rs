//! Stockroom core
//!
//! Catalog synchronization and diff-reconciliation engine for a multi-store
//! inventory dashboard. Remote product catalogs are fetched page by page,
//! normalized into local catalog entries, and kept current through sync
//! runs: the first sync seeds the catalog directly, every later sync stops
//! at a frozen diff that a human reviews and applies. All state lives in
//! SQLite; progress and lifecycle transitions are mirrored on an event bus.

pub mod catalog;
pub mod config;
pub mod error;
pub mod infra;
pub mod remote;
pub mod store;
pub mod sync;

pub use config::{default_data_dir, CoreConfig};
pub use error::CoreError;
pub use infra::event::{Event, EventBus, EventSubscriber, SubscriptionFilter};

use crate::{
	infra::db::{entities::sync_run, Database},
	remote::{CatalogSource, RemoteCatalogClient},
	store::{CreateStoreArgs, CredentialVault, StoreService},
	sync::{
		ActionChoice, ApplyOutcome, DiffReview, StartedSync, SyncAllOutcome, SyncProgress,
		SyncService,
	},
};
use sea_orm::DatabaseConnection;
use std::{
	path::{Path, PathBuf},
	sync::Arc,
};
use tokio::sync::mpsc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

pub const DB_FILE_NAME: &str = "stockroom.db";

/// The main context for all engine operations
pub struct Core {
	pub config: CoreConfig,

	/// Event bus carrying sync lifecycle and progress events
	pub events: EventBus,

	/// Store CRUD and credential access
	pub stores: StoreService,

	/// Sync orchestration and diff review
	pub sync: SyncService,

	db: Arc<DatabaseConnection>,
}

impl Core {
	/// Initialize at the platform default data directory
	pub async fn new() -> Result<Self, CoreError> {
		let data_dir = config::default_data_dir()?;
		Self::new_at(data_dir).await
	}

	/// Initialize at a custom data directory, loading (or seeding) the
	/// config file stored there
	pub async fn new_at(data_dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
		let data_dir = data_dir.into();
		let config = CoreConfig::load_or_create(&data_dir)?;
		Self::new_with_config(data_dir, config).await
	}

	/// Initialize with an explicit config, talking to the real remote API
	pub async fn new_with_config(
		data_dir: impl Into<PathBuf>,
		config: CoreConfig,
	) -> Result<Self, CoreError> {
		let source = Arc::new(RemoteCatalogClient::new(
			config.remote_page_size,
			config.remote_retry_attempts,
			config.retry_delay(),
		));
		Self::new_with_source(data_dir, config, source).await
	}

	/// Initialize with a caller-provided catalog source. This is the seam
	/// embedders and tests use to substitute the remote transport.
	pub async fn new_with_source(
		data_dir: impl Into<PathBuf>,
		config: CoreConfig,
		source: Arc<dyn CatalogSource>,
	) -> Result<Self, CoreError> {
		let data_dir = data_dir.into();
		info!("Initializing core at {}", data_dir.display());

		// 1. Open the database and bring the schema current
		let database = Database::open(&data_dir.join(DB_FILE_NAME)).await?;
		database.migrate().await?;
		let db = Arc::new(database.into_connection());

		// 2. Create the event bus
		let events = EventBus::default();

		// 3. Load the credential vault; the master key lives next to the db
		let vault = Arc::new(CredentialVault::load_or_create(&data_dir)?);

		// 4. Wire up services
		let stores = StoreService::new(db.clone(), events.clone(), vault);
		let sync = SyncService::new(
			db.clone(),
			events.clone(),
			source,
			stores.clone(),
			config.clone(),
		);

		// 5. Announce readiness
		events.emit(Event::CoreStarted);
		info!("Core initialized");

		Ok(Self {
			config,
			events,
			stores,
			sync,
			db,
		})
	}

	/// Direct read access for embedding dashboards and tests
	pub fn db(&self) -> &DatabaseConnection {
		self.db.as_ref()
	}

	// Store management

	pub async fn create_store(
		&self,
		args: CreateStoreArgs,
	) -> Result<infra::db::entities::store::Model, CoreError> {
		Ok(self.stores.create_store(args).await?)
	}

	pub async fn get_store(
		&self,
		store_uuid: Uuid,
	) -> Result<infra::db::entities::store::Model, CoreError> {
		Ok(self.stores.get_store(store_uuid).await?)
	}

	pub async fn list_stores(&self) -> Result<Vec<infra::db::entities::store::Model>, CoreError> {
		Ok(self.stores.list_stores().await?)
	}

	pub async fn deactivate_store(&self, store_uuid: Uuid) -> Result<u64, CoreError> {
		Ok(self.stores.deactivate_store(store_uuid).await?)
	}

	// Sync control surface

	pub async fn start_sync(&self, store_uuid: Uuid) -> Result<StartedSync, CoreError> {
		Ok(self.sync.start_sync(store_uuid).await?)
	}

	pub async fn sync_all_stores(&self) -> Result<SyncAllOutcome, CoreError> {
		Ok(self.sync.sync_all_stores().await?)
	}

	pub async fn get_diff(&self, store_uuid: Uuid) -> Result<DiffReview, CoreError> {
		Ok(self.sync.get_diff(store_uuid).await?)
	}

	pub async fn apply_diff(
		&self,
		store_uuid: Uuid,
		run_uuid: Uuid,
		actions: Vec<ActionChoice>,
	) -> Result<ApplyOutcome, CoreError> {
		Ok(self.sync.apply_diff(store_uuid, run_uuid, actions).await?)
	}

	pub async fn get_sync_logs(&self, store_uuid: Uuid) -> Result<Vec<sync_run::Model>, CoreError> {
		Ok(self.stores.get_sync_logs(store_uuid).await?)
	}

	pub async fn get_sync_progress(
		&self,
		run_uuid: Uuid,
	) -> Result<Option<SyncProgress>, CoreError> {
		Ok(self.sync.get_progress(run_uuid).await?)
	}

	/// Push-style progress stream; the channel closes after the terminal
	/// snapshot
	pub fn stream_sync_progress(&self, run_uuid: Uuid) -> mpsc::Receiver<SyncProgress> {
		self.sync.subscribe_progress(run_uuid)
	}

	pub async fn reset_stuck_sync(&self, store_uuid: Uuid) -> Result<Option<Uuid>, CoreError> {
		Ok(self.sync.reset_stuck_sync(store_uuid).await?)
	}

	/// Graceful shutdown. In-flight runs keep their rows; an interrupted run
	/// is reclaimed by the staleness pass on the next start.
	pub fn shutdown(&self) {
		info!("Shutting down core...");
		self.events.emit(Event::CoreShutdown);
		info!("Core shutdown complete");
	}
}

/// Install the global tracing subscriber: stdout plus a daily-rolling file
/// under `<data_dir>/logs`. Returns the appender guard, which must be held
/// for the lifetime of the process or buffered log lines are lost.
pub fn init_logging(data_dir: &Path) -> Result<WorkerGuard, CoreError> {
	let (file_writer, guard) =
		tracing_appender::non_blocking(tracing_appender::rolling::daily(
			data_dir.join("logs"),
			"stockroom.log",
		));

	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new("info,stockroom_core=debug"));

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer())
		.with(fmt::layer().with_writer(file_writer).with_ansi(false))
		.try_init()
		.map_err(|e| CoreError::Logging(e.to_string()))?;

	Ok(guard)
}
