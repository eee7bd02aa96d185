//! Background sync execution
//!
//! The body of the spawned task behind `SyncService::start_sync`. Drives one
//! run through fetch, transform and either the initial catalog load or the
//! diff computation, persisting progress onto the run row as it goes. All
//! state transitions are written to the database first; events mirror them
//! for observers. Errors bubble to the caller's boundary, which records the
//! FAILED terminal state.

use crate::{
	catalog::{generate_diff, transform_all, TransformedEntry},
	config::CoreConfig,
	infra::{
		db::entities::{
			self, catalog_entry, product_group, sync_run,
			sync_run::{RunStatus, SyncKind},
			vendor, CatalogEntry, ProductGroup, Vendor,
		},
		event::{Event, EventBus},
	},
	remote::{CatalogSource, RemoteProduct, StoreCredentials},
	sync::{
		error::SyncError,
		progress::{LogLevel, SyncProgress},
	},
};
use rand::{thread_rng, Rng};
use sea_orm::{
	sea_query::OnConflict, ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection,
	DbErr, EntityTrait, PaginatorTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const BARCODE_PREFIX_LENGTH: usize = 6;
// Ambiguous characters (0/O, 1/I) excluded for label legibility
const BARCODE_PREFIX_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const MAX_PREFIX_ATTEMPTS: u32 = 10;

/// Everything a spawned run needs, cloneable into the task
#[derive(Clone)]
pub(crate) struct SyncContext {
	pub db: Arc<DatabaseConnection>,
	pub events: EventBus,
	pub source: Arc<dyn CatalogSource>,
	pub config: CoreConfig,
}

/// Execute one sync run to its next resting state: COMPLETED for INITIAL,
/// DIFF_REVIEW for RESYNC
pub(crate) async fn execute(
	ctx: SyncContext,
	store: entities::store::Model,
	run: sync_run::Model,
	credentials: StoreCredentials,
) -> Result<(), SyncError> {
	let kind = run.sync_kind();

	let mut progress = SyncProgress::new(RunStatus::Fetching)
		.with_log_capacity(ctx.config.sync_log_capacity);
	progress.push_log(
		LogLevel::Info,
		format!("{kind} sync started for {}", store.domain),
	);
	persist_progress(ctx.db.as_ref(), &ctx.events, &store, &run, &progress).await?;

	let products = fetch_catalog(&ctx, &store, &run, &credentials, &mut progress).await?;

	transition_run(
		ctx.db.as_ref(),
		&ctx.events,
		&store,
		&run,
		RunStatus::Fetching,
		RunStatus::Processing,
	)
	.await?;
	progress.set_phase(RunStatus::Processing);

	let entries = transform_all(products, store.id);
	progress.set_fetched(entries.len() as u64);
	progress.set_counts(0, entries.len() as u64);
	progress.push_log(
		LogLevel::Info,
		format!("transformed into {} catalog entries", entries.len()),
	);
	persist_progress(ctx.db.as_ref(), &ctx.events, &store, &run, &progress).await?;

	match kind {
		SyncKind::Initial => run_initial(&ctx, &store, &run, entries, &mut progress).await,
		SyncKind::Resync => run_resync(&ctx, &store, &run, entries, &mut progress).await,
	}
}

/// Pull the full remote catalog page by page, persisting progress after
/// every page. Pagination is sequential to respect remote rate limits.
async fn fetch_catalog(
	ctx: &SyncContext,
	store: &entities::store::Model,
	run: &sync_run::Model,
	credentials: &StoreCredentials,
	progress: &mut SyncProgress,
) -> Result<Vec<RemoteProduct>, SyncError> {
	let mut products: Vec<RemoteProduct> = Vec::new();
	let mut cursor: Option<String> = None;
	let mut page: u32 = 0;

	loop {
		let fetched = ctx
			.source
			.fetch_page(credentials, cursor.as_deref())
			.await?;
		page += 1;
		products.extend(fetched.products);

		progress.set_fetched(products.len() as u64);
		progress.push_log(
			LogLevel::Info,
			format!("page {page}: {} products fetched", products.len()),
		);
		persist_progress(ctx.db.as_ref(), &ctx.events, store, run, progress).await?;
		debug!(
			"Fetched page {} for store {} ({} products so far)",
			page,
			store.uuid,
			products.len()
		);

		match fetched.next_cursor {
			Some(next) if !next.is_empty() => cursor = Some(next),
			_ => break,
		}
	}

	info!(
		"Fetched {} products across {} pages for store {}",
		products.len(),
		page,
		store.uuid
	);
	Ok(products)
}

/// INITIAL path: seed the catalog. Vendors are upserted first, then one
/// entry per transformed record with a fresh barcode prefix. A single
/// failed entry fails the whole run; already-written entries stay visible
/// as a partial catalog.
async fn run_initial(
	ctx: &SyncContext,
	store: &entities::store::Model,
	run: &sync_run::Model,
	entries: Vec<TransformedEntry>,
	progress: &mut SyncProgress,
) -> Result<(), SyncError> {
	let total = entries.len();
	let db = ctx.db.as_ref();

	let vendor_names: Vec<String> = entries
		.iter()
		.filter_map(|entry| entry.vendor_name.clone())
		.collect();
	let vendors = upsert_vendor_names(db, vendor_names).await?;
	debug!("Ensured {} vendors for store {}", vendors, store.uuid);

	let stride = ctx.config.progress_persist_stride.max(1);
	let mut created: Vec<catalog_entry::Model> = Vec::with_capacity(total);
	for (index, entry) in entries.iter().enumerate() {
		let model = insert_catalog_entry(db, entry).await?;
		created.push(model);

		let processed = index + 1;
		if processed % stride == 0 || processed == total {
			progress.set_counts(processed as u64, total as u64);
			progress.set_current_item(entry.display_label());
			persist_progress(db, &ctx.events, store, run, progress).await?;
		}
	}

	// Enrichment only; entry-level failures here must not fail the run.
	let mapped = map_product_groups(db, &created).await;
	if mapped > 0 {
		debug!("Mapped {} entries to product groups", mapped);
	}

	let now = chrono::Utc::now();
	progress.set_phase(RunStatus::Completed);
	progress.percentage = 1.0;
	progress.push_log(
		LogLevel::Info,
		format!("initial sync complete: {total} entries created"),
	);

	sync_run::ActiveModel {
		id: ActiveValue::Unchanged(run.id),
		status: ActiveValue::Set(RunStatus::Completed.to_string()),
		fetched_count: ActiveValue::Set(total as i32),
		new_count: ActiveValue::Set(total as i32),
		applied_count: ActiveValue::Set(total as i32),
		progress: ActiveValue::Set(Some(serde_json::to_value(&*progress)?)),
		completed_at: ActiveValue::Set(Some(now)),
		..Default::default()
	}
	.update(db)
	.await?;

	entities::store::ActiveModel {
		id: ActiveValue::Unchanged(store.id),
		status: ActiveValue::Set(entities::store::StoreStatus::Synced.to_string()),
		product_count: ActiveValue::Set(total as i32),
		last_synced_at: ActiveValue::Set(Some(now)),
		updated_at: ActiveValue::Set(now),
		..Default::default()
	}
	.update(db)
	.await?;

	emit_state_change(&ctx.events, store, run, RunStatus::Processing, RunStatus::Completed);
	ctx.events.emit(Event::SyncCompleted {
		store_id: store.uuid,
		run_id: run.uuid,
		entry_count: total as u64,
	});

	info!(
		"Initial sync completed for store {}: {} entries created",
		store.uuid, total
	);
	Ok(())
}

/// RESYNC path: compute the diff and freeze it onto the run, then stop in
/// DIFF_REVIEW until a human applies it.
async fn run_resync(
	ctx: &SyncContext,
	store: &entities::store::Model,
	run: &sync_run::Model,
	entries: Vec<TransformedEntry>,
	progress: &mut SyncProgress,
) -> Result<(), SyncError> {
	let db = ctx.db.as_ref();

	let local = CatalogEntry::find()
		.filter(catalog_entry::Column::StoreId.eq(store.id))
		.filter(catalog_entry::Column::Active.eq(true))
		.all(db)
		.await?;

	let diff = generate_diff(&entries, &local);
	let summary = diff.summary;
	let total = entries.len();

	progress.set_counts(total as u64, total as u64);
	progress.set_summary(summary);
	progress.set_phase(RunStatus::DiffReview);
	progress.push_log(
		LogLevel::Info,
		format!(
			"diff ready: {} new, {} modified, {} removed, {} unchanged",
			summary.new, summary.modified, summary.removed, summary.unchanged
		),
	);

	// Frozen snapshot: the payload written here is exactly what apply will
	// read back, never recomputed.
	sync_run::ActiveModel {
		id: ActiveValue::Unchanged(run.id),
		status: ActiveValue::Set(RunStatus::DiffReview.to_string()),
		fetched_count: ActiveValue::Set(total as i32),
		new_count: ActiveValue::Set(summary.new as i32),
		modified_count: ActiveValue::Set(summary.modified as i32),
		removed_count: ActiveValue::Set(summary.removed as i32),
		unchanged_count: ActiveValue::Set(summary.unchanged as i32),
		diff_payload: ActiveValue::Set(Some(serde_json::to_value(&diff)?)),
		progress: ActiveValue::Set(Some(serde_json::to_value(&*progress)?)),
		..Default::default()
	}
	.update(db)
	.await?;

	set_store_status(db, store.id, entities::store::StoreStatus::DiffReview).await?;

	emit_state_change(&ctx.events, store, run, RunStatus::Processing, RunStatus::DiffReview);
	ctx.events.emit(Event::DiffReady {
		store_id: store.uuid,
		run_id: run.uuid,
		new: summary.new as u64,
		modified: summary.modified as u64,
		removed: summary.removed as u64,
		unchanged: summary.unchanged as u64,
	});

	info!(
		"Diff ready for store {}: {} new, {} modified, {} removed, {} unchanged",
		store.uuid, summary.new, summary.modified, summary.removed, summary.unchanged
	);
	Ok(())
}

/// Insert one catalog entry from its transformed record, assigning a fresh
/// collision-checked barcode prefix. A soft-retired row still holding the
/// same natural key is revived in place instead, keeping its id and prefix.
pub(crate) async fn insert_catalog_entry(
	db: &DatabaseConnection,
	entry: &TransformedEntry,
) -> Result<catalog_entry::Model, SyncError> {
	let now = chrono::Utc::now();

	let variant_options = if entry.variant_options.is_empty() {
		None
	} else {
		serde_json::to_value(&entry.variant_options).ok()
	};

	// The natural key stays unique across retired rows; a re-listed
	// product reuses the row that still holds it
	let existing = CatalogEntry::find()
		.filter(catalog_entry::Column::StoreId.eq(entry.store_id))
		.filter(catalog_entry::Column::ExternalProductId.eq(entry.external_product_id.as_str()))
		.filter(catalog_entry::Column::ExternalVariantId.eq(entry.external_variant_id.as_str()))
		.one(db)
		.await?;

	if let Some(existing) = existing {
		let revived = catalog_entry::ActiveModel {
			id: ActiveValue::Unchanged(existing.id),
			name: ActiveValue::Set(entry.name.clone()),
			description: ActiveValue::Set(entry.description.clone()),
			image_url: ActiveValue::Set(entry.image_url.clone()),
			category: ActiveValue::Set(entry.category.clone()),
			vendor_name: ActiveValue::Set(entry.vendor_name.clone()),
			sku: ActiveValue::Set(entry.sku.clone()),
			barcode: ActiveValue::Set(entry.barcode.clone()),
			price: ActiveValue::Set(entry.price.clone()),
			compare_at_price: ActiveValue::Set(entry.compare_at_price.clone()),
			variant_title: ActiveValue::Set(entry.variant_title.clone()),
			variant_options: ActiveValue::Set(variant_options),
			active: ActiveValue::Set(true),
			updated_at: ActiveValue::Set(now),
			..Default::default()
		};
		return Ok(revived.update(db).await?);
	}

	let prefix = generate_barcode_prefix(db).await?;
	let model = catalog_entry::ActiveModel {
		id: ActiveValue::NotSet,
		store_id: ActiveValue::Set(entry.store_id),
		name: ActiveValue::Set(entry.name.clone()),
		description: ActiveValue::Set(entry.description.clone()),
		image_url: ActiveValue::Set(entry.image_url.clone()),
		category: ActiveValue::Set(entry.category.clone()),
		vendor_name: ActiveValue::Set(entry.vendor_name.clone()),
		sku: ActiveValue::Set(entry.sku.clone()),
		barcode: ActiveValue::Set(entry.barcode.clone()),
		barcode_prefix: ActiveValue::Set(prefix),
		price: ActiveValue::Set(entry.price.clone()),
		compare_at_price: ActiveValue::Set(entry.compare_at_price.clone()),
		variant_title: ActiveValue::Set(entry.variant_title.clone()),
		variant_options: ActiveValue::Set(variant_options),
		external_product_id: ActiveValue::Set(entry.external_product_id.clone()),
		external_variant_id: ActiveValue::Set(entry.external_variant_id.clone()),
		product_group_id: ActiveValue::Set(None),
		active: ActiveValue::Set(true),
		created_at: ActiveValue::Set(now),
		updated_at: ActiveValue::Set(now),
	};

	Ok(model.insert(db).await?)
}

/// Generate a barcode prefix no existing entry uses. Bounded attempts;
/// exhaustion fails the caller.
pub(crate) async fn generate_barcode_prefix(db: &DatabaseConnection) -> Result<String, SyncError> {
	for _ in 0..MAX_PREFIX_ATTEMPTS {
		let candidate = random_prefix();
		let taken = CatalogEntry::find()
			.filter(catalog_entry::Column::BarcodePrefix.eq(candidate.as_str()))
			.count(db)
			.await?;
		if taken == 0 {
			return Ok(candidate);
		}
	}

	Err(SyncError::BarcodePrefixExhausted {
		attempts: MAX_PREFIX_ATTEMPTS,
	})
}

fn random_prefix() -> String {
	let mut rng = thread_rng();
	(0..BARCODE_PREFIX_LENGTH)
		.map(|_| {
			let index = rng.gen_range(0..BARCODE_PREFIX_CHARSET.len());
			BARCODE_PREFIX_CHARSET[index] as char
		})
		.collect()
}

/// Create any missing vendors by name. Idempotent: existing names are left
/// untouched.
pub(crate) async fn upsert_vendor_names(
	db: &DatabaseConnection,
	mut names: Vec<String>,
) -> Result<usize, SyncError> {
	names.sort();
	names.dedup();
	if names.is_empty() {
		return Ok(0);
	}

	let now = chrono::Utc::now();
	let models: Vec<vendor::ActiveModel> = names
		.iter()
		.map(|name| vendor::ActiveModel {
			id: ActiveValue::NotSet,
			name: ActiveValue::Set(name.clone()),
			created_at: ActiveValue::Set(now),
		})
		.collect();

	Vendor::insert_many(models)
		.on_conflict(
			OnConflict::column(vendor::Column::Name)
				.do_nothing()
				.to_owned(),
		)
		.exec_without_returning(db)
		.await?;

	Ok(names.len())
}

/// Best-effort product-group mapping for newly created entries, matching by
/// SKU first, then barcode. Individual failures are logged and skipped.
pub(crate) async fn map_product_groups(
	db: &DatabaseConnection,
	created: &[catalog_entry::Model],
) -> usize {
	let mut mapped = 0;

	for entry in created {
		let group_id = match resolve_product_group(
			db,
			entry.sku.as_deref(),
			entry.barcode.as_deref(),
		)
		.await
		{
			Ok(Some(group_id)) => group_id,
			Ok(None) => continue,
			Err(e) => {
				warn!("Product group lookup failed for entry {}: {}", entry.id, e);
				continue;
			}
		};

		let update = catalog_entry::ActiveModel {
			id: ActiveValue::Unchanged(entry.id),
			product_group_id: ActiveValue::Set(Some(group_id)),
			..Default::default()
		};
		match update.update(db).await {
			Ok(_) => mapped += 1,
			Err(e) => warn!("Product group mapping failed for entry {}: {}", entry.id, e),
		}
	}

	mapped
}

async fn resolve_product_group(
	db: &DatabaseConnection,
	sku: Option<&str>,
	barcode: Option<&str>,
) -> Result<Option<i32>, DbErr> {
	if let Some(sku) = sku {
		if let Some(group) = ProductGroup::find()
			.filter(product_group::Column::Sku.eq(sku))
			.one(db)
			.await?
		{
			return Ok(Some(group.id));
		}
	}

	if let Some(barcode) = barcode {
		if let Some(group) = ProductGroup::find()
			.filter(product_group::Column::Barcode.eq(barcode))
			.one(db)
			.await?
		{
			return Ok(Some(group.id));
		}
	}

	Ok(None)
}

/// Write the progress snapshot onto the run row and mirror it on the bus
pub(crate) async fn persist_progress(
	db: &DatabaseConnection,
	events: &EventBus,
	store: &entities::store::Model,
	run: &sync_run::Model,
	progress: &SyncProgress,
) -> Result<(), SyncError> {
	sync_run::ActiveModel {
		id: ActiveValue::Unchanged(run.id),
		progress: ActiveValue::Set(Some(serde_json::to_value(progress)?)),
		..Default::default()
	}
	.update(db)
	.await?;

	events.emit(Event::SyncProgress {
		store_id: store.uuid,
		run_id: run.uuid,
		snapshot: progress.clone(),
	});
	Ok(())
}

pub(crate) async fn transition_run(
	db: &DatabaseConnection,
	events: &EventBus,
	store: &entities::store::Model,
	run: &sync_run::Model,
	previous: RunStatus,
	next: RunStatus,
) -> Result<(), SyncError> {
	sync_run::ActiveModel {
		id: ActiveValue::Unchanged(run.id),
		status: ActiveValue::Set(next.to_string()),
		..Default::default()
	}
	.update(db)
	.await?;

	emit_state_change(events, store, run, previous, next);
	Ok(())
}

pub(crate) fn emit_state_change(
	events: &EventBus,
	store: &entities::store::Model,
	run: &sync_run::Model,
	previous: RunStatus,
	next: RunStatus,
) {
	events.emit(Event::SyncStateChanged {
		store_id: store.uuid,
		run_id: run.uuid,
		previous_state: previous.to_string(),
		new_state: next.to_string(),
		timestamp: chrono::Utc::now().to_rfc3339(),
	});
}

pub(crate) async fn set_store_status(
	db: &DatabaseConnection,
	store_id: i32,
	status: entities::store::StoreStatus,
) -> Result<(), SyncError> {
	entities::store::ActiveModel {
		id: ActiveValue::Unchanged(store_id),
		status: ActiveValue::Set(status.to_string()),
		updated_at: ActiveValue::Set(chrono::Utc::now()),
		..Default::default()
	}
	.update(db)
	.await?;
	Ok(())
}

/// Record the FAILED terminal state for a run that did not finish, and
/// reset its store. Best-effort: a failure to record the failure is logged,
/// never propagated, so callers can use this inside error boundaries.
pub(crate) async fn mark_run_failed(
	db: &DatabaseConnection,
	events: &EventBus,
	store: &entities::store::Model,
	run: &sync_run::Model,
	message: &str,
) {
	warn!("Sync run {} failed: {}", run.uuid, message);

	// Re-read the run for its latest persisted snapshot; the failure may
	// come from a context that no longer holds one.
	let mut progress = match sync_run::Entity::find_by_id(run.id)
		.one(db)
		.await
	{
		Ok(Some(current)) => current
			.progress
			.and_then(|json| serde_json::from_value::<SyncProgress>(json).ok())
			.unwrap_or_else(|| SyncProgress::new(RunStatus::Failed)),
		_ => SyncProgress::new(RunStatus::Failed),
	};
	progress.fail(message);

	let update = sync_run::ActiveModel {
		id: ActiveValue::Unchanged(run.id),
		status: ActiveValue::Set(RunStatus::Failed.to_string()),
		error_message: ActiveValue::Set(Some(message.to_string())),
		progress: ActiveValue::Set(serde_json::to_value(&progress).ok()),
		completed_at: ActiveValue::Set(Some(chrono::Utc::now())),
		..Default::default()
	};
	if let Err(e) = update.update(db).await {
		error!("Failed to record failure for run {}: {}", run.uuid, e);
	}

	if let Err(e) = set_store_status(db, store.id, entities::store::StoreStatus::Failed).await {
		error!(
			"Failed to reset store {} after run failure: {}",
			store.uuid, e
		);
	}

	events.emit(Event::SyncFailed {
		store_id: store.uuid,
		run_id: run.uuid,
		error: message.to_string(),
	});
}
