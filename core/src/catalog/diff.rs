//! Diff engine
//!
//! Classifies every entry of a freshly fetched remote catalog against the
//! current local catalog as NEW, MODIFIED, REMOVED or UNCHANGED, matching on
//! the natural key and comparing a fixed field set. Pure and synchronous;
//! item ids are deterministic so repeated runs over the same inputs produce
//! identical diffs.

use super::transform::TransformedEntry;
use crate::infra::db::entities::catalog_entry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Default action attached to a diff item; also the verb a reviewer submits
/// back when applying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffAction {
	Add,
	Update,
	Keep,
	Deactivate,
}

impl std::fmt::Display for DiffAction {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Add => write!(f, "add"),
			Self::Update => write!(f, "update"),
			Self::Keep => write!(f, "keep"),
			Self::Deactivate => write!(f, "deactivate"),
		}
	}
}

/// One changed field on a matched entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
	pub field: String,
	pub old: Value,
	pub new: Value,
}

/// One classified difference between remote and local catalog state.
///
/// Each variant carries only the payload its application needs: the full
/// frozen record for NEW, the field-change list plus the local entry id for
/// MODIFIED, minimal identifying data for REMOVED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum DiffItem {
	New {
		id: String,
		external_product_id: String,
		external_variant_id: String,
		default_action: DiffAction,
		entry: TransformedEntry,
	},
	Modified {
		id: String,
		external_product_id: String,
		external_variant_id: String,
		default_action: DiffAction,
		/// Local catalog entry this change applies to
		entry_id: i32,
		name: String,
		changes: Vec<FieldChange>,
	},
	Removed {
		id: String,
		external_product_id: String,
		external_variant_id: String,
		default_action: DiffAction,
		entry_id: i32,
		name: String,
	},
}

impl DiffItem {
	/// Deterministic id derived from the item kind and natural key
	pub fn id(&self) -> &str {
		match self {
			Self::New { id, .. } | Self::Modified { id, .. } | Self::Removed { id, .. } => id,
		}
	}

	pub fn default_action(&self) -> DiffAction {
		match self {
			Self::New { default_action, .. }
			| Self::Modified { default_action, .. }
			| Self::Removed { default_action, .. } => *default_action,
		}
	}
}

/// Classification counts for one diff run. `unchanged` entries are counted
/// here but never materialized as items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
	pub new: usize,
	pub modified: usize,
	pub removed: usize,
	pub unchanged: usize,
	pub total_fetched: usize,
}

/// A complete diff: the reviewable items plus summary counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDiff {
	pub items: Vec<DiffItem>,
	pub summary: DiffSummary,
}

fn json_of(value: Option<&str>) -> Value {
	value
		.map(|v| Value::String(v.to_string()))
		.unwrap_or(Value::Null)
}

fn compare_field(
	field: &str,
	old: Option<&str>,
	new: Option<&str>,
	changes: &mut Vec<FieldChange>,
) {
	if old != new {
		changes.push(FieldChange {
			field: field.to_string(),
			old: json_of(old),
			new: json_of(new),
		});
	}
}

/// Compare the fixed field set with string-coerced equality. Absent values
/// are `None` on both sides, never an empty string, so a missing remote
/// field never spuriously differs from a null local column.
fn field_changes(remote: &TransformedEntry, local: &catalog_entry::Model) -> Vec<FieldChange> {
	let mut changes = Vec::new();

	compare_field("name", Some(&local.name), Some(&remote.name), &mut changes);
	compare_field(
		"description",
		local.description.as_deref(),
		remote.description.as_deref(),
		&mut changes,
	);
	compare_field("sku", local.sku.as_deref(), remote.sku.as_deref(), &mut changes);
	compare_field(
		"barcode",
		local.barcode.as_deref(),
		remote.barcode.as_deref(),
		&mut changes,
	);
	compare_field(
		"category",
		local.category.as_deref(),
		remote.category.as_deref(),
		&mut changes,
	);
	compare_field("price", local.price.as_deref(), remote.price.as_deref(), &mut changes);
	compare_field(
		"compare_at_price",
		local.compare_at_price.as_deref(),
		remote.compare_at_price.as_deref(),
		&mut changes,
	);
	compare_field(
		"image_url",
		local.image_url.as_deref(),
		remote.image_url.as_deref(),
		&mut changes,
	);
	compare_field(
		"vendor_name",
		local.vendor_name.as_deref(),
		remote.vendor_name.as_deref(),
		&mut changes,
	);
	compare_field(
		"variant_title",
		local.variant_title.as_deref(),
		remote.variant_title.as_deref(),
		&mut changes,
	);

	changes
}

/// Generate the diff between a freshly transformed remote set and the
/// current local set.
///
/// Remote-only keys classify NEW (default add), matched keys with differing
/// fields MODIFIED (default update), local-only keys REMOVED (default keep;
/// removal from the remote catalog never defaults to local deactivation).
pub fn generate_diff(
	remote: &[TransformedEntry],
	local: &[catalog_entry::Model],
) -> CatalogDiff {
	let local_by_key: HashMap<(&str, &str), &catalog_entry::Model> = local
		.iter()
		.map(|entry| (entry.natural_key(), entry))
		.collect();

	let mut matched: HashSet<(&str, &str)> = HashSet::new();
	let mut items = Vec::new();
	let mut summary = DiffSummary {
		total_fetched: remote.len(),
		..Default::default()
	};

	for entry in remote {
		let key = entry.natural_key();
		match local_by_key.get(&key) {
			None => {
				summary.new += 1;
				items.push(DiffItem::New {
					id: format!("new_{}:{}", key.0, key.1),
					external_product_id: entry.external_product_id.clone(),
					external_variant_id: entry.external_variant_id.clone(),
					default_action: DiffAction::Add,
					entry: entry.clone(),
				});
			}
			Some(local_entry) => {
				matched.insert(key);
				let changes = field_changes(entry, local_entry);
				if changes.is_empty() {
					summary.unchanged += 1;
				} else {
					summary.modified += 1;
					items.push(DiffItem::Modified {
						id: format!("mod_{}:{}", key.0, key.1),
						external_product_id: entry.external_product_id.clone(),
						external_variant_id: entry.external_variant_id.clone(),
						default_action: DiffAction::Update,
						entry_id: local_entry.id,
						name: local_entry.name.clone(),
						changes,
					});
				}
			}
		}
	}

	for entry in local {
		let key = entry.natural_key();
		if !matched.contains(&key) {
			summary.removed += 1;
			items.push(DiffItem::Removed {
				id: format!("rem_{}:{}", key.0, key.1),
				external_product_id: entry.external_product_id.clone(),
				external_variant_id: entry.external_variant_id.clone(),
				default_action: DiffAction::Keep,
				entry_id: entry.id,
				name: entry.name.clone(),
			});
		}
	}

	CatalogDiff { items, summary }
}
