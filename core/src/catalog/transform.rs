//! Catalog transformer
//!
//! Flattens one remote "product with variants" into one locally-normalized
//! record per variant. Variant-level fields come from the variant, the rest
//! is inherited from the product. Absent remote values normalize to `None`,
//! never to an empty string; that distinction is what keeps the diff engine
//! from flagging spurious changes.

use crate::remote::{extract_external_id, RemoteProduct, DEFAULT_VARIANT_TITLE};
use serde::{Deserialize, Serialize};

/// One flattened remote product-variant record, shape-identical in
/// comparable fields to a local catalog entry. Produced fresh on every sync
/// run and discarded after diffing or application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformedEntry {
	pub store_id: i32,
	pub name: String,
	pub description: Option<String>,
	pub image_url: Option<String>,
	pub category: Option<String>,
	pub vendor_name: Option<String>,
	pub sku: Option<String>,
	pub barcode: Option<String>,
	pub price: Option<String>,
	pub compare_at_price: Option<String>,
	pub variant_title: Option<String>,
	pub variant_options: Vec<String>,
	pub external_product_id: String,
	pub external_variant_id: String,
}

impl TransformedEntry {
	/// Natural key correlating this record with a local catalog entry
	pub fn natural_key(&self) -> (&str, &str) {
		(&self.external_product_id, &self.external_variant_id)
	}

	/// Human-readable label for progress display
	pub fn display_label(&self) -> String {
		match &self.variant_title {
			Some(variant) => format!("{} / {}", self.name, variant),
			None => self.name.clone(),
		}
	}
}

fn none_if_empty(value: Option<String>) -> Option<String> {
	value.filter(|v| !v.is_empty())
}

/// The remote uses a sentinel title for products without real variants
fn normalize_variant_title(title: Option<String>) -> Option<String> {
	none_if_empty(title).filter(|t| t != DEFAULT_VARIANT_TITLE)
}

/// Transform one remote product into one entry per variant
pub fn transform(product: RemoteProduct, store_id: i32) -> Vec<TransformedEntry> {
	let external_product_id = extract_external_id(&product.id).to_string();

	product
		.variants
		.into_iter()
		.map(|variant| TransformedEntry {
			store_id,
			name: product.title.clone(),
			description: none_if_empty(product.description.clone()),
			image_url: none_if_empty(product.image_url.clone()),
			category: none_if_empty(product.category.clone()),
			vendor_name: none_if_empty(product.vendor.clone()),
			sku: none_if_empty(variant.sku),
			barcode: none_if_empty(variant.barcode),
			price: none_if_empty(variant.price),
			compare_at_price: none_if_empty(variant.compare_at_price),
			variant_title: normalize_variant_title(variant.title),
			variant_options: variant.options,
			external_product_id: external_product_id.clone(),
			external_variant_id: extract_external_id(&variant.id).to_string(),
		})
		.collect()
}

/// Transform a whole fetched catalog
pub fn transform_all(products: Vec<RemoteProduct>, store_id: i32) -> Vec<TransformedEntry> {
	products
		.into_iter()
		.flat_map(|product| transform(product, store_id))
		.collect()
}
