//! Applying a reviewed diff
//!
//! Consumes the frozen diff payload on a DIFF_REVIEW run and replays the
//! reviewer's per-item decisions against the local catalog. The payload on
//! the run row is the single source of truth here; nothing is refetched or
//! recomputed, so what the reviewer saw is exactly what gets applied.
//! Individual item failures are counted and logged, never fatal: one bad
//! row must not discard an otherwise reviewed batch.

use crate::{
	catalog::{CatalogDiff, DiffAction, DiffItem, FieldChange},
	config::CoreConfig,
	infra::{
		db::entities::{self, catalog_entry, sync_run, sync_run::RunStatus, CatalogEntry},
		event::{Event, EventBus},
	},
	sync::{
		error::SyncError,
		progress::{LogLevel, SyncProgress},
		runner,
	},
};
use sea_orm::{
	ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
	QueryFilter,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// One reviewed decision: which diff item, and what to do with it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionChoice {
	pub diff_item_id: String,
	pub action: DiffAction,
}

/// Counts from a finished apply
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
	pub applied: usize,
	pub kept: usize,
	pub mismatched: usize,
	pub status: String,
}

impl ApplyOutcome {
	/// Items that produced no catalog change, deliberate or not
	pub fn skipped(&self) -> usize {
		self.kept + self.mismatched
	}
}

/// Apply reviewed actions against the frozen diff of a DIFF_REVIEW run.
/// Synchronous from the caller's point of view: the run is COMPLETED or
/// FAILED by the time this returns.
pub(crate) async fn apply_diff(
	db: &DatabaseConnection,
	events: &EventBus,
	config: &CoreConfig,
	store: &entities::store::Model,
	run: &sync_run::Model,
	actions: &[ActionChoice],
) -> Result<ApplyOutcome, SyncError> {
	if run.run_status() != RunStatus::DiffReview {
		return Err(SyncError::NotAwaitingReview {
			run_uuid: run.uuid,
			status: run.status.clone(),
		});
	}

	let payload = run
		.diff_payload
		.clone()
		.ok_or(SyncError::MissingDiffPayload { run_uuid: run.uuid })?;
	let diff: CatalogDiff = serde_json::from_value(payload)?;

	// The store re-enters the guard while actions are written; readers see
	// IN_PROGRESS, not a half-applied SYNCED.
	runner::transition_run(
		db,
		events,
		store,
		run,
		RunStatus::DiffReview,
		RunStatus::Applying,
	)
	.await?;
	runner::set_store_status(db, store.id, entities::store::StoreStatus::InProgress).await?;

	match apply_actions(db, events, config, store, run, &diff, actions).await {
		Ok(outcome) => Ok(outcome),
		Err(e) => {
			runner::mark_run_failed(db, events, store, run, &e.to_string()).await;
			Err(e)
		}
	}
}

async fn apply_actions(
	db: &DatabaseConnection,
	events: &EventBus,
	config: &CoreConfig,
	store: &entities::store::Model,
	run: &sync_run::Model,
	diff: &CatalogDiff,
	actions: &[ActionChoice],
) -> Result<ApplyOutcome, SyncError> {
	let total = actions.len();

	let mut progress = run
		.progress
		.clone()
		.and_then(|json| serde_json::from_value::<SyncProgress>(json).ok())
		.unwrap_or_else(|| SyncProgress::new(RunStatus::Applying))
		.with_log_capacity(config.sync_log_capacity);
	progress.set_phase(RunStatus::Applying);
	progress.set_counts(0, total as u64);
	progress.push_log(LogLevel::Info, format!("applying {total} reviewed actions"));
	runner::persist_progress(db, events, store, run, &progress).await?;

	let items: HashMap<&str, &DiffItem> =
		diff.items.iter().map(|item| (item.id(), item)).collect();

	// Vendors for entries about to be added, ensured up front in one batch
	let vendor_names: Vec<String> = actions
		.iter()
		.filter(|choice| choice.action == DiffAction::Add)
		.filter_map(|choice| match items.get(choice.diff_item_id.as_str()) {
			Some(DiffItem::New { entry, .. }) => entry.vendor_name.clone(),
			_ => None,
		})
		.collect();
	runner::upsert_vendor_names(db, vendor_names).await?;

	let stride = config.progress_persist_stride.max(1);
	let mut applied = 0usize;
	let mut kept = 0usize;
	let mut mismatched = 0usize;
	let mut created: Vec<catalog_entry::Model> = Vec::new();

	for (index, choice) in actions.iter().enumerate() {
		match items.get(choice.diff_item_id.as_str()) {
			None => {
				mismatched += 1;
				warn!(
					"Unknown diff item {} in apply request for run {}",
					choice.diff_item_id, run.uuid
				);
				progress.push_log(
					LogLevel::Warning,
					format!("unknown diff item {}", choice.diff_item_id),
				);
			}
			Some(DiffItem::New { entry, .. }) if choice.action == DiffAction::Add => {
				match runner::insert_catalog_entry(db, entry).await {
					Ok(model) => {
						created.push(model);
						applied += 1;
					}
					Err(e) => {
						mismatched += 1;
						warn!("Failed to add {}: {}", choice.diff_item_id, e);
						progress.push_log(
							LogLevel::Warning,
							format!("add failed for {}: {e}", choice.diff_item_id),
						);
					}
				}
			}
			Some(DiffItem::Modified {
				entry_id, changes, ..
			}) if choice.action == DiffAction::Update => {
				match patch_entry(db, *entry_id, changes).await {
					Ok(()) => applied += 1,
					Err(e) => {
						mismatched += 1;
						warn!("Failed to update entry {}: {}", entry_id, e);
						progress.push_log(
							LogLevel::Warning,
							format!("update failed for {}: {e}", choice.diff_item_id),
						);
					}
				}
			}
			Some(DiffItem::Removed { entry_id, .. })
				if choice.action == DiffAction::Deactivate =>
			{
				match deactivate_entry(db, *entry_id).await {
					Ok(()) => applied += 1,
					Err(e) => {
						mismatched += 1;
						warn!("Failed to deactivate entry {}: {}", entry_id, e);
						progress.push_log(
							LogLevel::Warning,
							format!("deactivate failed for {}: {e}", choice.diff_item_id),
						);
					}
				}
			}
			Some(_) if choice.action == DiffAction::Keep => {
				kept += 1;
			}
			Some(item) => {
				// Action does not fit the item kind
				mismatched += 1;
				debug!(
					"Action {} does not apply to item {}",
					choice.action,
					item.id()
				);
				progress.push_log(
					LogLevel::Warning,
					format!(
						"action {} does not apply to {}",
						choice.action, choice.diff_item_id
					),
				);
			}
		}

		let processed = index + 1;
		if processed % stride == 0 || processed == total {
			progress.set_counts(processed as u64, total as u64);
			progress.set_current_item(choice.diff_item_id.clone());
			runner::persist_progress(db, events, store, run, &progress).await?;
		}
	}

	// Enrichment only; per-entry failures are logged inside.
	runner::map_product_groups(db, &created).await;

	let active_count = CatalogEntry::find()
		.filter(catalog_entry::Column::StoreId.eq(store.id))
		.filter(catalog_entry::Column::Active.eq(true))
		.count(db)
		.await?;

	let now = chrono::Utc::now();
	progress.set_phase(RunStatus::Completed);
	progress.percentage = 1.0;
	progress.push_log(
		LogLevel::Info,
		format!("apply complete: {applied} applied, {kept} kept, {mismatched} mismatched"),
	);

	sync_run::ActiveModel {
		id: ActiveValue::Unchanged(run.id),
		status: ActiveValue::Set(RunStatus::Completed.to_string()),
		applied_count: ActiveValue::Set(applied as i32),
		progress: ActiveValue::Set(Some(serde_json::to_value(&progress)?)),
		completed_at: ActiveValue::Set(Some(now)),
		..Default::default()
	}
	.update(db)
	.await?;

	entities::store::ActiveModel {
		id: ActiveValue::Unchanged(store.id),
		status: ActiveValue::Set(entities::store::StoreStatus::Synced.to_string()),
		product_count: ActiveValue::Set(active_count as i32),
		last_synced_at: ActiveValue::Set(Some(now)),
		updated_at: ActiveValue::Set(now),
		..Default::default()
	}
	.update(db)
	.await?;

	runner::emit_state_change(events, store, run, RunStatus::Applying, RunStatus::Completed);

	let outcome = ApplyOutcome {
		applied,
		kept,
		mismatched,
		status: RunStatus::Completed.to_string(),
	};
	events.emit(Event::DiffApplied {
		store_id: store.uuid,
		run_id: run.uuid,
		applied: applied as u64,
		skipped: outcome.skipped() as u64,
	});

	info!(
		"Diff applied for store {}: {} applied, {} kept, {} mismatched",
		store.uuid, applied, kept, mismatched
	);
	Ok(outcome)
}

/// Patch an existing entry with the reviewed field changes. Unknown field
/// names in the payload are skipped with a warning.
async fn patch_entry(
	db: &DatabaseConnection,
	entry_id: i32,
	changes: &[FieldChange],
) -> Result<(), SyncError> {
	let mut active = catalog_entry::ActiveModel {
		id: ActiveValue::Unchanged(entry_id),
		updated_at: ActiveValue::Set(chrono::Utc::now()),
		..Default::default()
	};

	for change in changes {
		match change.field.as_str() {
			// name is non-nullable; null here means a malformed payload
			"name" => {
				if let Some(name) = string_value(&change.new) {
					active.name = ActiveValue::Set(name);
				}
			}
			"description" => active.description = ActiveValue::Set(string_value(&change.new)),
			"sku" => active.sku = ActiveValue::Set(string_value(&change.new)),
			"barcode" => active.barcode = ActiveValue::Set(string_value(&change.new)),
			"category" => active.category = ActiveValue::Set(string_value(&change.new)),
			"price" => active.price = ActiveValue::Set(string_value(&change.new)),
			"compare_at_price" => {
				active.compare_at_price = ActiveValue::Set(string_value(&change.new))
			}
			"image_url" => active.image_url = ActiveValue::Set(string_value(&change.new)),
			"vendor_name" => active.vendor_name = ActiveValue::Set(string_value(&change.new)),
			"variant_title" => active.variant_title = ActiveValue::Set(string_value(&change.new)),
			other => warn!("Ignoring unknown field {} in diff payload", other),
		}
	}

	active.update(db).await?;
	Ok(())
}

fn string_value(value: &serde_json::Value) -> Option<String> {
	match value {
		serde_json::Value::String(s) => Some(s.clone()),
		serde_json::Value::Null => None,
		other => Some(other.to_string()),
	}
}

/// Soft-retire: the row stays for history but leaves the active catalog
async fn deactivate_entry(db: &DatabaseConnection, entry_id: i32) -> Result<(), SyncError> {
	catalog_entry::ActiveModel {
		id: ActiveValue::Unchanged(entry_id),
		active: ActiveValue::Set(false),
		updated_at: ActiveValue::Set(chrono::Utc::now()),
		..Default::default()
	}
	.update(db)
	.await?;
	Ok(())
}
