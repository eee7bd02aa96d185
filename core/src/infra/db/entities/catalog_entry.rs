//! Catalog entry entity
//!
//! One locally persisted product variant. The pair
//! (external_product_id, external_variant_id) correlates local entries with
//! remote entries across sync runs and is unique within a store's catalog.
//! Entries are soft-retired by clearing `active`, never hard-deleted by the
//! sync path.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "catalog_entries")]
pub struct Model {
	#[sea_orm(primary_key)]
	#[serde(default)]
	pub id: i32,
	pub store_id: i32,

	pub name: String,
	pub description: Option<String>,
	pub image_url: Option<String>,
	pub category: Option<String>,
	pub vendor_name: Option<String>,

	pub sku: Option<String>,

	/// Barcode carried by the remote variant, if any
	pub barcode: Option<String>,

	/// Locally generated identifier used as the label barcode prefix.
	/// Unique across all entries; assigned once at creation.
	pub barcode_prefix: String,

	/// Decimal amounts kept in their remote string form
	pub price: Option<String>,
	pub compare_at_price: Option<String>,

	pub variant_title: Option<String>,
	pub variant_options: Option<Json>, // Vec<String> as JSON

	pub external_product_id: String,
	pub external_variant_id: String,

	pub product_group_id: Option<i32>,

	pub active: bool,

	#[serde(default)]
	pub created_at: DateTimeUtc,
	#[serde(default)]
	pub updated_at: DateTimeUtc,
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
	#[sea_orm(
		belongs_to = "super::product_group::Entity",
		from = "Column::ProductGroupId",
		to = "super::product_group::Column::Id",
		on_delete = "SetNull"
	)]
	ProductGroup,
}

impl Related<super::store::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Store.def()
	}
}

impl Related<super::product_group::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::ProductGroup.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
	/// Natural key correlating this entry with its remote counterpart
	pub fn natural_key(&self) -> (&str, &str) {
		(&self.external_product_id, &self.external_variant_id)
	}
}
