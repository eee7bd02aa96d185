//! Wire types for the remote catalog API

use serde::{Deserialize, Serialize};

/// Placeholder title the remote uses for products without real variants
pub const DEFAULT_VARIANT_TITLE: &str = "Default Title";

/// Admin API version used when a store does not pin one
pub const DEFAULT_API_VERSION: &str = "2026-01";

/// Decrypted per-store API credentials. Never persisted in this form.
#[derive(Debug, Clone)]
pub struct StoreCredentials {
	/// Remote endpoint, e.g. `acme.example-commerce.com`
	pub domain: String,
	/// Bearer token
	pub token: String,
	/// API version path segment, e.g. `2026-01`
	pub api_version: String,
}

/// A product variant as returned by the remote admin API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteVariant {
	/// Global identifier, e.g. `gid://catalog/ProductVariant/200`
	pub id: String,
	/// Variant title (combination of option values)
	pub title: Option<String>,
	pub sku: Option<String>,
	pub barcode: Option<String>,
	/// Decimal amount as a string, e.g. `"29.99"`
	pub price: Option<String>,
	pub compare_at_price: Option<String>,
	/// Selected option values
	#[serde(default)]
	pub options: Vec<String>,
}

/// A product with its variants as returned by the remote admin API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProduct {
	/// Global identifier, e.g. `gid://catalog/Product/100`
	pub id: String,
	pub title: String,
	pub description: Option<String>,
	/// Featured image URL
	pub image_url: Option<String>,
	/// Product type/category
	pub category: Option<String>,
	/// Vendor name
	pub vendor: Option<String>,
	#[serde(default)]
	pub variants: Vec<RemoteVariant>,
}

/// One page of the paginated catalog query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemotePage {
	#[serde(default)]
	pub products: Vec<RemoteProduct>,
	/// Cursor for the next page; `None` on the last page
	pub next_cursor: Option<String>,
}

/// Extract the stable trailing id segment from a remote global identifier.
///
/// `gid://catalog/Product/100` becomes `100`; plain ids pass through.
pub fn extract_external_id(gid: &str) -> &str {
	gid.rsplit('/').next().unwrap_or(gid)
}
