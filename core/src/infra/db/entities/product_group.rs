//! Product group entity
//!
//! Optional cross-store canonical grouping of catalog entries sharing a SKU
//! or barcode. Maintained by a best-effort post-sync mapping step; not
//! required for sync/diff correctness.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "product_groups")]
pub struct Model {
	#[sea_orm(primary_key)]
	#[serde(default)]
	pub id: i32,
	pub name: String,
	pub sku: Option<String>,
	pub barcode: Option<String>,
	#[serde(default)]
	pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(has_many = "super::catalog_entry::Entity")]
	CatalogEntries,
}

impl Related<super::catalog_entry::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::CatalogEntries.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
