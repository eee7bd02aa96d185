//! End-to-end sync lifecycle tests
//!
//! Drives a real core (SQLite in a temp dir) against a scripted catalog
//! source and covers:
//! - Initial sync: fetch, transform, direct apply, store bookkeeping
//! - Resync: diff classification, frozen payload, review-then-apply
//! - Guard rejections: concurrent start, pending diff, inactive store
//! - Staleness reclamation and manual reset of stuck runs
//! - sync-all sweep accounting
//! - Progress snapshots, the progress stream and lifecycle events

use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
	time::Duration,
};

use async_trait::async_trait;
use sea_orm::{ActiveModelTrait, ActiveValue, ColumnTrait, EntityTrait, QueryFilter};
use stockroom_core::{
	catalog::{DiffAction, DiffItem},
	infra::db::entities::{self, catalog_entry, sync_run, CatalogEntry, SyncRun, Vendor},
	remote::{
		CatalogSource, RemoteError, RemotePage, RemoteProduct, RemoteVariant, StoreCredentials,
	},
	store::{CreateStoreArgs, StoreError},
	sync::{ActionChoice, SyncError},
	Core, CoreConfig, CoreError, Event,
};
use tempfile::TempDir;
use tokio::sync::watch;
use uuid::Uuid;

const DOMAIN: &str = "acme.example-commerce.com";
// One product per page so every multi-product sync walks the cursor chain
const PAGE_SIZE: usize = 1;

/// Scripted catalog source keyed by store domain.
///
/// Cursors are plain page indexes, so every run replays the domain's current
/// catalog from the first page. An optional watch-channel gate parks
/// `fetch_page` until released, which lets tests hold a run open while they
/// poke at the guard.
struct MockSource {
	catalogs: Mutex<HashMap<String, Vec<RemotePage>>>,
	gate: Mutex<Option<watch::Receiver<bool>>>,
}

impl MockSource {
	fn new() -> Self {
		Self {
			catalogs: Mutex::new(HashMap::new()),
			gate: Mutex::new(None),
		}
	}

	fn set_catalog(&self, domain: &str, products: Vec<RemoteProduct>) {
		let mut pages: Vec<RemotePage> = products
			.chunks(PAGE_SIZE)
			.map(|chunk| RemotePage {
				products: chunk.to_vec(),
				next_cursor: None,
			})
			.collect();
		if pages.is_empty() {
			pages.push(RemotePage::default());
		}
		let last = pages.len() - 1;
		for (index, page) in pages.iter_mut().enumerate() {
			if index < last {
				page.next_cursor = Some((index + 1).to_string());
			}
		}
		self.catalogs
			.lock()
			.unwrap()
			.insert(domain.to_string(), pages);
	}

	fn hold_until(&self, release: watch::Receiver<bool>) {
		*self.gate.lock().unwrap() = Some(release);
	}
}

#[async_trait]
impl CatalogSource for MockSource {
	async fn fetch_page(
		&self,
		credentials: &StoreCredentials,
		cursor: Option<&str>,
	) -> Result<RemotePage, RemoteError> {
		// Clone the gate out so the lock guard is dropped before awaiting
		let gate = self.gate.lock().unwrap().clone();
		if let Some(mut release) = gate {
			while !*release.borrow() {
				if release.changed().await.is_err() {
					break;
				}
			}
		}

		let index: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
		Ok(self
			.catalogs
			.lock()
			.unwrap()
			.get(&credentials.domain)
			.and_then(|pages| pages.get(index).cloned())
			.unwrap_or_default())
	}
}

fn variant(id: &str, sku: &str, price: &str) -> RemoteVariant {
	RemoteVariant {
		id: format!("gid://catalog/ProductVariant/{id}"),
		title: None,
		sku: Some(sku.to_string()),
		barcode: None,
		price: Some(price.to_string()),
		compare_at_price: None,
		options: vec![],
	}
}

fn product(id: &str, title: &str, vendor: &str, variants: Vec<RemoteVariant>) -> RemoteProduct {
	RemoteProduct {
		id: format!("gid://catalog/Product/{id}"),
		title: title.to_string(),
		description: None,
		image_url: None,
		category: None,
		vendor: Some(vendor.to_string()),
		variants,
	}
}

/// Three entries across two products and two vendors
fn initial_catalog() -> Vec<RemoteProduct> {
	vec![
		product(
			"100",
			"Widget",
			"Acme",
			vec![variant("200", "W-1", "10.00"), variant("201", "W-2", "12.00")],
		),
		product("101", "Gadget", "Bolt", vec![variant("300", "G-1", "5.00")]),
	]
}

/// Same catalog with one price change, one new product, one product gone.
/// Against `initial_catalog` this diffs to exactly one NEW, one MODIFIED,
/// one REMOVED and one unchanged entry.
fn changed_catalog() -> Vec<RemoteProduct> {
	vec![
		product(
			"100",
			"Widget",
			"Acme",
			vec![variant("200", "W-1", "11.00"), variant("201", "W-2", "12.00")],
		),
		product("102", "Sprocket", "Acme", vec![variant("400", "S-1", "7.50")]),
	]
}

/// Tight intervals so tests observe intermediate state quickly
fn test_config() -> CoreConfig {
	CoreConfig {
		progress_persist_stride: 1,
		progress_poll_interval_ms: 25,
		remote_retry_delay_ms: 10,
		..Default::default()
	}
}

async fn setup(
	products: Vec<RemoteProduct>,
) -> (TempDir, Arc<MockSource>, Core, entities::store::Model) {
	let temp = TempDir::new().expect("temp dir");
	let source = Arc::new(MockSource::new());
	source.set_catalog(DOMAIN, products);

	let core = Core::new_with_source(temp.path(), test_config(), source.clone())
		.await
		.expect("core init");
	let store = core
		.create_store(CreateStoreArgs {
			name: "Acme Outfitters".to_string(),
			domain: DOMAIN.to_string(),
			api_token: "tok_acme_test".to_string(),
			api_version: "2026-01".to_string(),
		})
		.await
		.expect("store created");

	(temp, source, core, store)
}

/// Poll the run row until it reaches `expected`, failing fast if it lands on
/// a different terminal status first
async fn wait_for_run(core: &Core, run_uuid: Uuid, expected: &str) -> sync_run::Model {
	let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
	loop {
		let run = SyncRun::find()
			.filter(sync_run::Column::Uuid.eq(run_uuid))
			.one(core.db())
			.await
			.expect("run query")
			.expect("run row exists");
		if run.status == expected {
			return run;
		}
		assert!(
			!run.run_status().is_terminal(),
			"run settled at {:?} (error: {:?}) while waiting for {expected}",
			run.status,
			run.error_message,
		);
		assert!(
			tokio::time::Instant::now() < deadline,
			"timed out waiting for run {run_uuid} to reach {expected}, still at {}",
			run.status,
		);
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
}

async fn store_row(core: &Core, store_uuid: Uuid) -> entities::store::Model {
	core.get_store(store_uuid).await.expect("store exists")
}

async fn active_entries(core: &Core, store_id: i32) -> Vec<catalog_entry::Model> {
	CatalogEntry::find()
		.filter(catalog_entry::Column::StoreId.eq(store_id))
		.filter(catalog_entry::Column::Active.eq(true))
		.all(core.db())
		.await
		.expect("entry query")
}

#[tokio::test]
async fn test_initial_sync_seeds_catalog() -> Result<(), Box<dyn std::error::Error>> {
	let (_temp, _source, core, store) = setup(initial_catalog()).await;

	// 1. Kick off the sync; the call returns before the work finishes
	let started = core.start_sync(store.uuid).await?;
	assert_eq!(started.status, "in_progress");

	// 2. Initial runs go straight to completed, no review stop
	let run = wait_for_run(&core, started.sync_run_uuid, "completed").await;
	assert_eq!(run.kind, "initial");
	assert_eq!(run.fetched_count, 3);
	assert_eq!(run.new_count, 3);
	assert_eq!(run.applied_count, 3);
	assert!(run.completed_at.is_some());

	// 3. Store bookkeeping reflects the completed run
	let store = store_row(&core, store.uuid).await;
	assert_eq!(store.status, "synced");
	assert_eq!(store.product_count, 3);
	assert!(store.last_synced_at.is_some());

	// 4. Entries were written with unique scan prefixes
	let entries = active_entries(&core, store.id).await;
	assert_eq!(entries.len(), 3);
	let mut prefixes: Vec<&str> = entries.iter().map(|e| e.barcode_prefix.as_str()).collect();
	assert!(prefixes.iter().all(|p| p.len() == 6));
	prefixes.sort();
	prefixes.dedup();
	assert_eq!(prefixes.len(), 3);

	// 5. Vendors referenced by the catalog exist
	let vendors: Vec<String> = Vendor::find()
		.all(core.db())
		.await?
		.into_iter()
		.map(|v| v.name)
		.collect();
	assert!(vendors.contains(&"Acme".to_string()));
	assert!(vendors.contains(&"Bolt".to_string()));

	// 6. The final progress snapshot survives on the run row
	let progress = core
		.get_sync_progress(run.uuid)
		.await?
		.expect("progress snapshot persisted");
	assert_eq!(progress.phase, "completed");
	assert!((progress.percentage - 1.0).abs() < f32::EPSILON);
	assert!(!progress.logs.is_empty());

	Ok(())
}

#[tokio::test]
async fn test_resync_freezes_diff_then_applies_reviewed_actions(
) -> Result<(), Box<dyn std::error::Error>> {
	let (_temp, source, core, store) = setup(initial_catalog()).await;

	// 1. Seed the catalog with an initial sync
	let first = core.start_sync(store.uuid).await?;
	wait_for_run(&core, first.sync_run_uuid, "completed").await;

	// 2. Change the remote and resync; the run must stop at review
	source.set_catalog(DOMAIN, changed_catalog());
	let resync = core.start_sync(store.uuid).await?;
	let run = wait_for_run(&core, resync.sync_run_uuid, "diff_review").await;
	assert_eq!(run.kind, "resync");
	assert_eq!(run.fetched_count, 3);
	assert_eq!(run.new_count, 1);
	assert_eq!(run.modified_count, 1);
	assert_eq!(run.removed_count, 1);
	assert_eq!(run.unchanged_count, 1);
	assert!(run.diff_payload.is_some());
	assert_eq!(store_row(&core, store.uuid).await.status, "diff_review");

	// 3. A new sync cannot start while the diff awaits review
	let err = core.start_sync(store.uuid).await.unwrap_err();
	assert!(matches!(err, CoreError::Sync(SyncError::DiffPending { .. })));

	// 4. The reviewable diff comes from the frozen payload, stable across reads
	let review = core.get_diff(store.uuid).await?;
	assert_eq!(review.sync_run_uuid, resync.sync_run_uuid);
	let ids: Vec<&str> = review.diff.items.iter().map(|item| item.id()).collect();
	assert_eq!(ids, vec!["mod_100:200", "new_102:400", "rem_101:300"]);
	let again = core.get_diff(store.uuid).await?;
	assert_eq!(again.diff, review.diff);

	let changes = review
		.diff
		.items
		.iter()
		.find_map(|item| match item {
			DiffItem::Modified { changes, .. } => Some(changes.clone()),
			_ => None,
		})
		.expect("modified item present");
	assert_eq!(changes.len(), 1);
	assert_eq!(changes[0].field, "price");
	assert_eq!(changes[0].old, serde_json::json!("10.00"));
	assert_eq!(changes[0].new, serde_json::json!("11.00"));

	// 5. Apply a mixed review: add, update, keep, plus one unknown id
	let actions = vec![
		ActionChoice {
			diff_item_id: "new_102:400".to_string(),
			action: DiffAction::Add,
		},
		ActionChoice {
			diff_item_id: "mod_100:200".to_string(),
			action: DiffAction::Update,
		},
		ActionChoice {
			diff_item_id: "rem_101:300".to_string(),
			action: DiffAction::Keep,
		},
		ActionChoice {
			diff_item_id: "new_999:999".to_string(),
			action: DiffAction::Add,
		},
	];
	let outcome = core
		.apply_diff(store.uuid, resync.sync_run_uuid, actions)
		.await?;
	assert_eq!(outcome.applied, 2);
	assert_eq!(outcome.kept, 1);
	assert_eq!(outcome.mismatched, 1);
	assert_eq!(outcome.skipped(), 2);
	assert_eq!(outcome.status, "completed");

	let run = wait_for_run(&core, resync.sync_run_uuid, "completed").await;
	assert_eq!(run.applied_count, 2);

	// 6. The store settles back to synced with the new entry counted
	let store_after = store_row(&core, store.uuid).await;
	assert_eq!(store_after.status, "synced");
	assert_eq!(store_after.product_count, 4);

	let entries = active_entries(&core, store.id).await;
	assert_eq!(entries.len(), 4);
	let updated = entries
		.iter()
		.find(|e| e.external_variant_id == "200")
		.expect("updated entry");
	assert_eq!(updated.price.as_deref(), Some("11.00"));
	let added = entries
		.iter()
		.find(|e| e.external_variant_id == "400")
		.expect("added entry");
	assert_eq!(added.name, "Sprocket");
	assert_eq!(added.barcode_prefix.len(), 6);
	// The kept entry was not deactivated
	assert!(entries.iter().any(|e| e.external_variant_id == "300"));

	// 7. The frozen diff is consumed: no second apply, nothing left to review
	let err = core
		.apply_diff(store.uuid, resync.sync_run_uuid, vec![])
		.await
		.unwrap_err();
	assert!(matches!(
		err,
		CoreError::Sync(SyncError::NotAwaitingReview { .. })
	));
	let err = core.get_diff(store.uuid).await.unwrap_err();
	assert!(matches!(err, CoreError::Sync(SyncError::NoDiffReview { .. })));

	Ok(())
}

#[tokio::test]
async fn test_resync_with_identical_catalog_reviews_empty_diff(
) -> Result<(), Box<dyn std::error::Error>> {
	let (_temp, _source, core, store) = setup(initial_catalog()).await;

	let first = core.start_sync(store.uuid).await?;
	wait_for_run(&core, first.sync_run_uuid, "completed").await;

	// Identical remote: zero items, everything counted as unchanged, but the
	// run still stops for review
	let resync = core.start_sync(store.uuid).await?;
	let run = wait_for_run(&core, resync.sync_run_uuid, "diff_review").await;
	assert_eq!(run.new_count, 0);
	assert_eq!(run.modified_count, 0);
	assert_eq!(run.removed_count, 0);
	assert_eq!(run.unchanged_count, 3);

	let review = core.get_diff(store.uuid).await?;
	assert!(review.diff.items.is_empty());
	assert_eq!(review.diff.summary.unchanged, 3);

	// Applying the empty review completes the run without touching entries
	let outcome = core
		.apply_diff(store.uuid, resync.sync_run_uuid, vec![])
		.await?;
	assert_eq!(outcome.applied, 0);
	assert_eq!(outcome.skipped(), 0);
	assert_eq!(outcome.status, "completed");

	let store_after = store_row(&core, store.uuid).await;
	assert_eq!(store_after.status, "synced");
	assert_eq!(store_after.product_count, 3);

	Ok(())
}

#[tokio::test]
async fn test_apply_add_revives_deactivated_entry() -> Result<(), Box<dyn std::error::Error>> {
	let (_temp, source, core, store) = setup(initial_catalog()).await;

	// 1. Seed the catalog and remember the Gadget entry's identity
	let first = core.start_sync(store.uuid).await?;
	wait_for_run(&core, first.sync_run_uuid, "completed").await;
	let original = active_entries(&core, store.id)
		.await
		.into_iter()
		.find(|e| e.external_variant_id == "300")
		.expect("gadget entry");

	// 2. The remote drops product 101; the reviewer approves the removal
	source.set_catalog(
		DOMAIN,
		vec![product(
			"100",
			"Widget",
			"Acme",
			vec![variant("200", "W-1", "10.00"), variant("201", "W-2", "12.00")],
		)],
	);
	let resync = core.start_sync(store.uuid).await?;
	wait_for_run(&core, resync.sync_run_uuid, "diff_review").await;
	let outcome = core
		.apply_diff(
			store.uuid,
			resync.sync_run_uuid,
			vec![ActionChoice {
				diff_item_id: "rem_101:300".to_string(),
				action: DiffAction::Deactivate,
			}],
		)
		.await?;
	assert_eq!(outcome.applied, 1);
	assert_eq!(store_row(&core, store.uuid).await.product_count, 2);

	// 3. The remote re-lists product 101; against active rows it is NEW again
	source.set_catalog(DOMAIN, initial_catalog());
	let readd = core.start_sync(store.uuid).await?;
	let run = wait_for_run(&core, readd.sync_run_uuid, "diff_review").await;
	assert_eq!(run.new_count, 1);
	let review = core.get_diff(store.uuid).await?;
	assert!(review.diff.items.iter().any(|i| i.id() == "new_101:300"));

	// 4. The approved add revives the retired row instead of colliding with it
	let outcome = core
		.apply_diff(
			store.uuid,
			readd.sync_run_uuid,
			vec![ActionChoice {
				diff_item_id: "new_101:300".to_string(),
				action: DiffAction::Add,
			}],
		)
		.await?;
	assert_eq!(outcome.applied, 1);
	assert_eq!(outcome.mismatched, 0);
	assert_eq!(outcome.status, "completed");

	let revived = active_entries(&core, store.id)
		.await
		.into_iter()
		.find(|e| e.external_variant_id == "300")
		.expect("gadget entry active again");
	assert_eq!(revived.id, original.id);
	assert_eq!(revived.barcode_prefix, original.barcode_prefix);
	assert_eq!(revived.name, "Gadget");
	assert_eq!(revived.price.as_deref(), Some("5.00"));

	// 5. The natural key still maps to exactly one row, active or not
	let rows = CatalogEntry::find()
		.filter(catalog_entry::Column::StoreId.eq(store.id))
		.filter(catalog_entry::Column::ExternalProductId.eq("101"))
		.filter(catalog_entry::Column::ExternalVariantId.eq("300"))
		.all(core.db())
		.await?;
	assert_eq!(rows.len(), 1);
	assert_eq!(store_row(&core, store.uuid).await.product_count, 3);

	Ok(())
}

#[tokio::test]
async fn test_initial_sync_with_empty_catalog_completes() -> Result<(), Box<dyn std::error::Error>>
{
	let (_temp, _source, core, store) = setup(vec![]).await;

	let started = core.start_sync(store.uuid).await?;
	let run = wait_for_run(&core, started.sync_run_uuid, "completed").await;
	assert_eq!(run.fetched_count, 0);
	assert_eq!(run.applied_count, 0);

	let store_after = store_row(&core, store.uuid).await;
	assert_eq!(store_after.status, "synced");
	assert_eq!(store_after.product_count, 0);
	assert!(active_entries(&core, store.id).await.is_empty());

	Ok(())
}

#[tokio::test]
async fn test_second_start_rejected_while_sync_runs() -> Result<(), Box<dyn std::error::Error>> {
	let (_temp, source, core, store) = setup(initial_catalog()).await;

	// 1. Park the runner inside its first page fetch
	let (release, gate) = watch::channel(false);
	source.hold_until(gate);
	let started = core.start_sync(store.uuid).await?;

	// 2. The store holds the guard, so a second start is rejected
	let err = core.start_sync(store.uuid).await.unwrap_err();
	assert!(matches!(
		err,
		CoreError::Sync(SyncError::SyncInProgress { .. })
	));

	// 3. sync-all counts the busy store as skipped, not failed
	let outcome = core.sync_all_stores().await?;
	assert!(outcome.started.is_empty());
	assert_eq!(outcome.skipped, vec![store.uuid]);
	assert!(outcome.failed.is_empty());

	// 4. Rejections never created additional run rows
	let runs = SyncRun::find()
		.filter(sync_run::Column::StoreId.eq(store.id))
		.all(core.db())
		.await?;
	assert_eq!(runs.len(), 1);

	// 5. Released, the original run finishes normally
	release.send(true)?;
	wait_for_run(&core, started.sync_run_uuid, "completed").await;

	Ok(())
}

#[tokio::test]
async fn test_sync_all_sweeps_active_stores_and_skips_pending_review(
) -> Result<(), Box<dyn std::error::Error>> {
	let temp = TempDir::new()?;
	let source = Arc::new(MockSource::new());
	source.set_catalog("north.example-commerce.com", initial_catalog());
	source.set_catalog(
		"south.example-commerce.com",
		vec![product(
			"500",
			"Anvil",
			"Coyote",
			vec![variant("600", "A-1", "99.00")],
		)],
	);
	let core = Core::new_with_source(temp.path(), test_config(), source.clone()).await?;

	let north = core
		.create_store(CreateStoreArgs {
			name: "North".to_string(),
			domain: "north.example-commerce.com".to_string(),
			api_token: "tok_north".to_string(),
			api_version: "2026-01".to_string(),
		})
		.await?;
	let south = core
		.create_store(CreateStoreArgs {
			name: "South".to_string(),
			domain: "south.example-commerce.com".to_string(),
			api_token: "tok_south".to_string(),
			api_version: "2026-01".to_string(),
		})
		.await?;

	// 1. Leave north holding a reviewable diff
	let seeded = core.start_sync(north.uuid).await?;
	wait_for_run(&core, seeded.sync_run_uuid, "completed").await;
	source.set_catalog("north.example-commerce.com", changed_catalog());
	let resync = core.start_sync(north.uuid).await?;
	wait_for_run(&core, resync.sync_run_uuid, "diff_review").await;

	// 2. The sweep starts south and skips north without failing
	let outcome = core.sync_all_stores().await?;
	assert_eq!(outcome.skipped, vec![north.uuid]);
	assert_eq!(outcome.started.len(), 1);
	assert!(outcome.failed.is_empty());

	wait_for_run(&core, outcome.started[0], "completed").await;
	let south_row = store_row(&core, south.uuid).await;
	assert_eq!(south_row.status, "synced");
	assert_eq!(south_row.product_count, 1);

	// 3. North's diff is still waiting, untouched by the sweep
	assert_eq!(store_row(&core, north.uuid).await.status, "diff_review");

	Ok(())
}

#[tokio::test]
async fn test_stale_abandoned_run_reclaimed_on_next_start() -> Result<(), Box<dyn std::error::Error>>
{
	let (_temp, _source, core, store) = setup(initial_catalog()).await;

	// 1. Fabricate a crash: an open run past the staleness window with no
	// task behind it, and the store still holding the guard
	let abandoned_uuid = Uuid::new_v4();
	sync_run::ActiveModel {
		id: ActiveValue::NotSet,
		uuid: ActiveValue::Set(abandoned_uuid),
		store_id: ActiveValue::Set(store.id),
		kind: ActiveValue::Set("initial".to_string()),
		status: ActiveValue::Set("fetching".to_string()),
		fetched_count: ActiveValue::Set(0),
		new_count: ActiveValue::Set(0),
		modified_count: ActiveValue::Set(0),
		removed_count: ActiveValue::Set(0),
		unchanged_count: ActiveValue::Set(0),
		applied_count: ActiveValue::Set(0),
		error_message: ActiveValue::Set(None),
		diff_payload: ActiveValue::Set(None),
		progress: ActiveValue::Set(None),
		started_at: ActiveValue::Set(chrono::Utc::now() - chrono::Duration::minutes(20)),
		completed_at: ActiveValue::Set(None),
	}
	.insert(core.db())
	.await?;
	entities::store::ActiveModel {
		id: ActiveValue::Unchanged(store.id),
		status: ActiveValue::Set("in_progress".to_string()),
		..Default::default()
	}
	.update(core.db())
	.await?;

	// 2. The next start reclaims the stale run and proceeds with a fresh one
	let started = core.start_sync(store.uuid).await?;
	assert_ne!(started.sync_run_uuid, abandoned_uuid);
	wait_for_run(&core, started.sync_run_uuid, "completed").await;

	let reclaimed = SyncRun::find()
		.filter(sync_run::Column::Uuid.eq(abandoned_uuid))
		.one(core.db())
		.await?
		.expect("abandoned run still recorded");
	assert_eq!(reclaimed.status, "failed");
	assert!(reclaimed
		.error_message
		.as_deref()
		.unwrap_or_default()
		.contains("timed out"));
	assert!(reclaimed.completed_at.is_some());

	assert_eq!(store_row(&core, store.uuid).await.status, "synced");

	Ok(())
}

#[tokio::test]
async fn test_stale_diff_review_reclaimed_on_get_diff() -> Result<(), Box<dyn std::error::Error>> {
	let (_temp, source, core, store) = setup(initial_catalog()).await;

	// 1. Park a real diff at review, frozen payload and all
	let first = core.start_sync(store.uuid).await?;
	wait_for_run(&core, first.sync_run_uuid, "completed").await;
	source.set_catalog(DOMAIN, changed_catalog());
	let resync = core.start_sync(store.uuid).await?;
	let run = wait_for_run(&core, resync.sync_run_uuid, "diff_review").await;
	assert!(run.diff_payload.is_some());

	// 2. Age the review past the staleness window
	sync_run::ActiveModel {
		id: ActiveValue::Unchanged(run.id),
		started_at: ActiveValue::Set(chrono::Utc::now() - chrono::Duration::minutes(20)),
		..Default::default()
	}
	.update(core.db())
	.await?;

	// 3. The next reader reclaims it instead of serving the abandoned diff
	let err = core.get_diff(store.uuid).await.unwrap_err();
	assert!(matches!(err, CoreError::Sync(SyncError::NoDiffReview { .. })));

	let reclaimed = SyncRun::find()
		.filter(sync_run::Column::Uuid.eq(resync.sync_run_uuid))
		.one(core.db())
		.await?
		.expect("run row exists");
	assert_eq!(reclaimed.status, "failed");
	assert!(reclaimed
		.error_message
		.as_deref()
		.unwrap_or_default()
		.contains("timed out"));
	assert!(reclaimed.completed_at.is_some());
	assert_eq!(store_row(&core, store.uuid).await.status, "failed");

	// 4. The store is unblocked: a fresh sync starts and reaches review
	let fresh = core.start_sync(store.uuid).await?;
	assert_ne!(fresh.sync_run_uuid, resync.sync_run_uuid);
	wait_for_run(&core, fresh.sync_run_uuid, "diff_review").await;

	Ok(())
}

#[tokio::test]
async fn test_reset_stuck_sync_fails_open_run() -> Result<(), Box<dyn std::error::Error>> {
	let (_temp, source, core, store) = setup(initial_catalog()).await;

	// Keep the sender alive so the parked runner never resumes
	let (_release, gate) = watch::channel(false);
	source.hold_until(gate);

	let started = core.start_sync(store.uuid).await?;
	let reset = core.reset_stuck_sync(store.uuid).await?;
	assert_eq!(reset, Some(started.sync_run_uuid));

	let run = SyncRun::find()
		.filter(sync_run::Column::Uuid.eq(started.sync_run_uuid))
		.one(core.db())
		.await?
		.expect("run row exists");
	assert_eq!(run.status, "failed");
	assert!(run
		.error_message
		.as_deref()
		.unwrap_or_default()
		.contains("manually reset"));

	assert_eq!(store_row(&core, store.uuid).await.status, "failed");

	// Nothing left to reset
	assert_eq!(core.reset_stuck_sync(store.uuid).await?, None);

	Ok(())
}

#[tokio::test]
async fn test_deactivate_retires_entries_and_blocks_sync() -> Result<(), Box<dyn std::error::Error>>
{
	let (_temp, _source, core, store) = setup(initial_catalog()).await;

	let started = core.start_sync(store.uuid).await?;
	wait_for_run(&core, started.sync_run_uuid, "completed").await;

	let retired = core.deactivate_store(store.uuid).await?;
	assert_eq!(retired, 3);

	let store_after = store_row(&core, store.uuid).await;
	assert!(!store_after.active);
	assert_eq!(store_after.product_count, 0);
	assert!(active_entries(&core, store.id).await.is_empty());

	let err = core.start_sync(store.uuid).await.unwrap_err();
	assert!(matches!(err, CoreError::Sync(SyncError::StoreInactive { .. })));

	// History stays readable after deactivation
	let logs = core.get_sync_logs(store.uuid).await?;
	assert_eq!(logs.len(), 1);
	assert_eq!(logs[0].status, "completed");

	Ok(())
}

#[tokio::test]
async fn test_get_diff_without_review_pending() -> Result<(), Box<dyn std::error::Error>> {
	let (_temp, _source, core, store) = setup(initial_catalog()).await;

	let err = core.get_diff(store.uuid).await.unwrap_err();
	assert!(matches!(err, CoreError::Sync(SyncError::NoDiffReview { .. })));

	Ok(())
}

#[tokio::test]
async fn test_store_creation_validates_input() -> Result<(), Box<dyn std::error::Error>> {
	let temp = TempDir::new()?;
	let source = Arc::new(MockSource::new());
	let core = Core::new_with_source(temp.path(), test_config(), source).await?;

	let err = core
		.create_store(CreateStoreArgs {
			name: "   ".to_string(),
			domain: "x.example-commerce.com".to_string(),
			api_token: "tok".to_string(),
			api_version: "2026-01".to_string(),
		})
		.await
		.unwrap_err();
	assert!(matches!(err, CoreError::Store(StoreError::EmptyName)));

	let store = core
		.create_store(CreateStoreArgs {
			name: "First".to_string(),
			domain: "X.Example-Commerce.com".to_string(),
			api_token: "tok_first".to_string(),
			api_version: "2026-01".to_string(),
		})
		.await?;
	// Domain is normalized and the token never stored in the clear
	assert_eq!(store.domain, "x.example-commerce.com");
	assert!(!store.credential_cipher.contains("tok_first"));

	let err = core
		.create_store(CreateStoreArgs {
			name: "Second".to_string(),
			domain: "x.example-commerce.com".to_string(),
			api_token: "tok_second".to_string(),
			api_version: "2026-01".to_string(),
		})
		.await
		.unwrap_err();
	assert!(matches!(
		err,
		CoreError::Store(StoreError::DuplicateDomain { .. })
	));

	Ok(())
}

#[tokio::test]
async fn test_lifecycle_events_are_broadcast() -> Result<(), Box<dyn std::error::Error>> {
	let (_temp, _source, core, store) = setup(initial_catalog()).await;

	// Subscribe before starting so nothing is missed
	let mut subscriber = core.events.subscribe();
	let started = core.start_sync(store.uuid).await?;

	let mut saw_started = false;
	let mut saw_fetch_to_process = false;
	let mut saw_progress = false;
	let mut saw_completed = false;
	while !(saw_started && saw_fetch_to_process && saw_progress && saw_completed) {
		let event = tokio::time::timeout(Duration::from_secs(10), subscriber.recv())
			.await
			.expect("event stream stalled")?;
		match event {
			Event::SyncStarted { run_id, kind, .. } if run_id == started.sync_run_uuid => {
				assert_eq!(kind, "initial");
				saw_started = true;
			}
			Event::SyncStateChanged {
				previous_state,
				new_state,
				..
			} => {
				if previous_state == "fetching" && new_state == "processing" {
					saw_fetch_to_process = true;
				}
			}
			Event::SyncProgress { snapshot, .. } => {
				assert!(!snapshot.phase.is_empty());
				saw_progress = true;
			}
			Event::SyncCompleted { entry_count, .. } => {
				assert_eq!(entry_count, 3);
				saw_completed = true;
			}
			_ => {}
		}
	}

	Ok(())
}

#[tokio::test]
async fn test_progress_stream_delivers_terminal_snapshot(
) -> Result<(), Box<dyn std::error::Error>> {
	let (_temp, _source, core, store) = setup(initial_catalog()).await;
	let started = core.start_sync(store.uuid).await?;

	// The stream polls the run row and closes after the terminal snapshot
	let mut stream = core.stream_sync_progress(started.sync_run_uuid);
	let mut last = None;
	let delivered = tokio::time::timeout(Duration::from_secs(10), async {
		let mut count = 0usize;
		while let Some(snapshot) = stream.recv().await {
			count += 1;
			last = Some(snapshot);
		}
		count
	})
	.await
	.expect("stream did not close after the terminal snapshot");

	assert!(delivered >= 1);
	let last = last.expect("at least one snapshot");
	assert_eq!(last.phase, "completed");
	assert!((last.percentage - 1.0).abs() < f32::EPSILON);
	assert!(!last.logs.is_empty());

	Ok(())
}
