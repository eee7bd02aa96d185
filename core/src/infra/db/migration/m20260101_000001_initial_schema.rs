//! Initial schema
//!
//! Creates the five catalog tables:
//! - stores: external catalog sources with sync status
//! - vendors: name-keyed parties referenced by entries
//! - product_groups: optional cross-store grouping by SKU/barcode
//! - catalog_entries: locally persisted product variants
//! - sync_runs: append-only history of sync attempts

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		// Create stores table
		manager
			.create_table(
				Table::create()
					.table(Stores::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Stores::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Stores::Uuid).uuid().not_null().unique_key())
					.col(ColumnDef::new(Stores::Name).string().not_null())
					.col(ColumnDef::new(Stores::Domain).string().not_null())
					.col(
						ColumnDef::new(Stores::CredentialCipher)
							.string()
							.not_null(),
					)
					.col(ColumnDef::new(Stores::ApiVersion).string().not_null())
					.col(
						ColumnDef::new(Stores::ProductCount)
							.integer()
							.not_null()
							.default(0),
					)
					.col(ColumnDef::new(Stores::LastSyncedAt).timestamp_with_time_zone())
					.col(
						ColumnDef::new(Stores::Status)
							.string()
							.not_null()
							.default("never"),
					)
					.col(
						ColumnDef::new(Stores::Active)
							.boolean()
							.not_null()
							.default(true),
					)
					.col(
						ColumnDef::new(Stores::CreatedAt)
							.timestamp_with_time_zone()
							.not_null()
							.default(Expr::current_timestamp()),
					)
					.col(
						ColumnDef::new(Stores::UpdatedAt)
							.timestamp_with_time_zone()
							.not_null()
							.default(Expr::current_timestamp()),
					)
					.to_owned(),
			)
			.await?;

		// Create vendors table
		manager
			.create_table(
				Table::create()
					.table(Vendors::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Vendors::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Vendors::Name).string().not_null().unique_key())
					.col(
						ColumnDef::new(Vendors::CreatedAt)
							.timestamp_with_time_zone()
							.not_null()
							.default(Expr::current_timestamp()),
					)
					.to_owned(),
			)
			.await?;

		// Create product_groups table
		manager
			.create_table(
				Table::create()
					.table(ProductGroups::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(ProductGroups::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(ProductGroups::Name).string().not_null())
					.col(ColumnDef::new(ProductGroups::Sku).string())
					.col(ColumnDef::new(ProductGroups::Barcode).string())
					.col(
						ColumnDef::new(ProductGroups::CreatedAt)
							.timestamp_with_time_zone()
							.not_null()
							.default(Expr::current_timestamp()),
					)
					.to_owned(),
			)
			.await?;

		// Create catalog_entries table
		manager
			.create_table(
				Table::create()
					.table(CatalogEntries::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(CatalogEntries::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(
						ColumnDef::new(CatalogEntries::StoreId)
							.integer()
							.not_null(),
					)
					.col(ColumnDef::new(CatalogEntries::Name).string().not_null())
					.col(ColumnDef::new(CatalogEntries::Description).string())
					.col(ColumnDef::new(CatalogEntries::ImageUrl).string())
					.col(ColumnDef::new(CatalogEntries::Category).string())
					.col(ColumnDef::new(CatalogEntries::VendorName).string())
					.col(ColumnDef::new(CatalogEntries::Sku).string())
					.col(ColumnDef::new(CatalogEntries::Barcode).string())
					.col(
						ColumnDef::new(CatalogEntries::BarcodePrefix)
							.string()
							.not_null()
							.unique_key(),
					)
					.col(ColumnDef::new(CatalogEntries::Price).string())
					.col(ColumnDef::new(CatalogEntries::CompareAtPrice).string())
					.col(ColumnDef::new(CatalogEntries::VariantTitle).string())
					.col(ColumnDef::new(CatalogEntries::VariantOptions).json())
					.col(
						ColumnDef::new(CatalogEntries::ExternalProductId)
							.string()
							.not_null(),
					)
					.col(
						ColumnDef::new(CatalogEntries::ExternalVariantId)
							.string()
							.not_null(),
					)
					.col(ColumnDef::new(CatalogEntries::ProductGroupId).integer())
					.col(
						ColumnDef::new(CatalogEntries::Active)
							.boolean()
							.not_null()
							.default(true),
					)
					.col(
						ColumnDef::new(CatalogEntries::CreatedAt)
							.timestamp_with_time_zone()
							.not_null()
							.default(Expr::current_timestamp()),
					)
					.col(
						ColumnDef::new(CatalogEntries::UpdatedAt)
							.timestamp_with_time_zone()
							.not_null()
							.default(Expr::current_timestamp()),
					)
					.foreign_key(
						ForeignKey::create()
							.name("fk_catalog_entries_store")
							.from(CatalogEntries::Table, CatalogEntries::StoreId)
							.to(Stores::Table, Stores::Id)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.foreign_key(
						ForeignKey::create()
							.name("fk_catalog_entries_product_group")
							.from(CatalogEntries::Table, CatalogEntries::ProductGroupId)
							.to(ProductGroups::Table, ProductGroups::Id)
							.on_delete(ForeignKeyAction::SetNull),
					)
					.to_owned(),
			)
			.await?;

		// Create sync_runs table
		manager
			.create_table(
				Table::create()
					.table(SyncRuns::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(SyncRuns::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(SyncRuns::Uuid).uuid().not_null().unique_key())
					.col(ColumnDef::new(SyncRuns::StoreId).integer().not_null())
					.col(ColumnDef::new(SyncRuns::Kind).string().not_null())
					.col(
						ColumnDef::new(SyncRuns::Status)
							.string()
							.not_null()
							.default("fetching"),
					)
					.col(
						ColumnDef::new(SyncRuns::FetchedCount)
							.integer()
							.not_null()
							.default(0),
					)
					.col(
						ColumnDef::new(SyncRuns::NewCount)
							.integer()
							.not_null()
							.default(0),
					)
					.col(
						ColumnDef::new(SyncRuns::ModifiedCount)
							.integer()
							.not_null()
							.default(0),
					)
					.col(
						ColumnDef::new(SyncRuns::RemovedCount)
							.integer()
							.not_null()
							.default(0),
					)
					.col(
						ColumnDef::new(SyncRuns::UnchangedCount)
							.integer()
							.not_null()
							.default(0),
					)
					.col(
						ColumnDef::new(SyncRuns::AppliedCount)
							.integer()
							.not_null()
							.default(0),
					)
					.col(ColumnDef::new(SyncRuns::ErrorMessage).string())
					.col(ColumnDef::new(SyncRuns::DiffPayload).json())
					.col(ColumnDef::new(SyncRuns::Progress).json())
					.col(
						ColumnDef::new(SyncRuns::StartedAt)
							.timestamp_with_time_zone()
							.not_null()
							.default(Expr::current_timestamp()),
					)
					.col(ColumnDef::new(SyncRuns::CompletedAt).timestamp_with_time_zone())
					.foreign_key(
						ForeignKey::create()
							.name("fk_sync_runs_store")
							.from(SyncRuns::Table, SyncRuns::StoreId)
							.to(Stores::Table, Stores::Id)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		// Natural key is unique within a store's catalog
		manager
			.create_index(
				Index::create()
					.name("idx_catalog_entries_natural_key")
					.table(CatalogEntries::Table)
					.col(CatalogEntries::StoreId)
					.col(CatalogEntries::ExternalProductId)
					.col(CatalogEntries::ExternalVariantId)
					.unique()
					.to_owned(),
			)
			.await?;

		// Active-entry scans per store (diff input, store counts)
		manager
			.create_index(
				Index::create()
					.name("idx_catalog_entries_store_active")
					.table(CatalogEntries::Table)
					.col(CatalogEntries::StoreId)
					.col(CatalogEntries::Active)
					.to_owned(),
			)
			.await?;

		// Sync history queries by store and time
		manager
			.create_index(
				Index::create()
					.name("idx_sync_runs_store_started")
					.table(SyncRuns::Table)
					.col(SyncRuns::StoreId)
					.col(SyncRuns::StartedAt)
					.to_owned(),
			)
			.await?;

		// Open-run lookup (concurrency guard, staleness checks)
		manager
			.create_index(
				Index::create()
					.name("idx_sync_runs_store_status")
					.table(SyncRuns::Table)
					.col(SyncRuns::StoreId)
					.col(SyncRuns::Status)
					.to_owned(),
			)
			.await?;

		// Group mapping looks up by SKU or barcode
		manager
			.create_index(
				Index::create()
					.name("idx_product_groups_sku")
					.table(ProductGroups::Table)
					.col(ProductGroups::Sku)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_product_groups_barcode")
					.table(ProductGroups::Table)
					.col(ProductGroups::Barcode)
					.to_owned(),
			)
			.await?;

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		// Drop tables in reverse order (dependencies first)
		manager
			.drop_table(Table::drop().table(SyncRuns::Table).to_owned())
			.await?;

		manager
			.drop_table(Table::drop().table(CatalogEntries::Table).to_owned())
			.await?;

		manager
			.drop_table(Table::drop().table(ProductGroups::Table).to_owned())
			.await?;

		manager
			.drop_table(Table::drop().table(Vendors::Table).to_owned())
			.await?;

		manager
			.drop_table(Table::drop().table(Stores::Table).to_owned())
			.await?;

		Ok(())
	}
}

#[derive(DeriveIden)]
enum Stores {
	Table,
	Id,
	Uuid,
	Name,
	Domain,
	CredentialCipher,
	ApiVersion,
	ProductCount,
	LastSyncedAt,
	Status,
	Active,
	CreatedAt,
	UpdatedAt,
}

#[derive(DeriveIden)]
enum Vendors {
	Table,
	Id,
	Name,
	CreatedAt,
}

#[derive(DeriveIden)]
enum ProductGroups {
	Table,
	Id,
	Name,
	Sku,
	Barcode,
	CreatedAt,
}

#[derive(DeriveIden)]
enum CatalogEntries {
	Table,
	Id,
	StoreId,
	Name,
	Description,
	ImageUrl,
	Category,
	VendorName,
	Sku,
	Barcode,
	BarcodePrefix,
	Price,
	CompareAtPrice,
	VariantTitle,
	VariantOptions,
	ExternalProductId,
	ExternalVariantId,
	ProductGroupId,
	Active,
	CreatedAt,
	UpdatedAt,
}

#[derive(DeriveIden)]
enum SyncRuns {
	Table,
	Id,
	Uuid,
	StoreId,
	Kind,
	Status,
	FetchedCount,
	NewCount,
	ModifiedCount,
	RemovedCount,
	UnchangedCount,
	AppliedCount,
	ErrorMessage,
	DiffPayload,
	Progress,
	StartedAt,
	CompletedAt,
}
