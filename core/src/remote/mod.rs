//! Remote catalog access
//!
//! `remote` fetches a store's full product catalog from its external
//! e-commerce API: cursor pagination, bearer-token auth, and bounded retry
//! on transient failures. Network I/O only; nothing here persists.

mod client;
mod error;
mod types;

pub use client::{fetch_all_catalog, CatalogSource, RemoteCatalogClient};
pub use error::RemoteError;
pub use types::{
	extract_external_id, RemotePage, RemoteProduct, RemoteVariant, StoreCredentials,
	DEFAULT_API_VERSION, DEFAULT_VARIANT_TITLE,
};
