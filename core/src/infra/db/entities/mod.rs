//! Sea-ORM entity definitions
//!
//! These map the catalog domain to database tables.

pub mod catalog_entry;
pub mod product_group;
pub mod store;
pub mod sync_run;
pub mod vendor;

// Re-export all entities
pub use catalog_entry::Entity as CatalogEntry;
pub use product_group::Entity as ProductGroup;
pub use store::Entity as Store;
pub use sync_run::Entity as SyncRun;
pub use vendor::Entity as Vendor;

// Re-export active models for easy access
pub use catalog_entry::ActiveModel as CatalogEntryActive;
pub use product_group::ActiveModel as ProductGroupActive;
pub use store::ActiveModel as StoreActive;
pub use sync_run::ActiveModel as SyncRunActive;
pub use vendor::ActiveModel as VendorActive;
