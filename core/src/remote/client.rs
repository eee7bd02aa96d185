//! Remote catalog client
//!
//! Pages through a store's full product catalog over a cursor-based query
//! protocol. Transient failures (rate limit, 5xx) are retried with linear
//! backoff per page; authentication failures surface immediately.

use super::error::RemoteError;
use super::types::{RemotePage, RemoteProduct, StoreCredentials};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

/// Seam between the sync orchestrator and the remote catalog transport.
///
/// Page N+1 is only requested after page N completes; implementations are
/// responsible for per-page retry policy, not pagination.
#[async_trait]
pub trait CatalogSource: Send + Sync {
	/// Fetch one page of the store's catalog
	async fn fetch_page(
		&self,
		credentials: &StoreCredentials,
		cursor: Option<&str>,
	) -> Result<RemotePage, RemoteError>;
}

/// Fetch every page of a store's catalog, accumulated into one list.
///
/// Pages are requested strictly in sequence. `on_page` observes
/// `(page_number, cumulative_count)` after each page lands; pass a no-op
/// closure when page progress is not interesting.
pub async fn fetch_all_catalog<S>(
	source: &S,
	credentials: &StoreCredentials,
	mut on_page: impl FnMut(u32, usize),
) -> Result<Vec<RemoteProduct>, RemoteError>
where
	S: CatalogSource + ?Sized,
{
	let mut products: Vec<RemoteProduct> = Vec::new();
	let mut cursor: Option<String> = None;
	let mut page_number = 0u32;

	loop {
		let page = source.fetch_page(credentials, cursor.as_deref()).await?;
		page_number += 1;
		products.extend(page.products);
		on_page(page_number, products.len());

		match page.next_cursor {
			Some(next) if !next.is_empty() => cursor = Some(next),
			_ => break,
		}
	}

	Ok(products)
}

/// What to do with a response while paging
#[derive(Debug, PartialEq, Eq)]
enum StatusAction {
	/// Response is usable, parse the page
	Parse,
	/// Transient failure, retry after the delay
	Retry(Duration),
	/// Bad credential, fail immediately without retry
	AuthFailed,
	/// Rate-limit retries exhausted
	RateLimited,
	/// Server-error retries exhausted
	ServerExhausted,
	/// Non-retryable response, surface with the body
	Api,
}

/// Decide how to handle a response status on the given attempt (1-based).
///
/// Rate limits honor the server-provided delay when present, the default
/// otherwise; both rate limits and 5xx back off linearly with the attempt
/// number.
fn evaluate_status(
	status: StatusCode,
	retry_after: Option<Duration>,
	attempt: u32,
	max_attempts: u32,
	default_delay: Duration,
) -> StatusAction {
	if status.is_success() {
		return StatusAction::Parse;
	}

	match status {
		StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StatusAction::AuthFailed,
		StatusCode::TOO_MANY_REQUESTS => {
			if attempt >= max_attempts {
				StatusAction::RateLimited
			} else {
				let base = retry_after.unwrap_or(default_delay);
				StatusAction::Retry(base * attempt)
			}
		}
		s if s.is_server_error() => {
			if attempt >= max_attempts {
				StatusAction::ServerExhausted
			} else {
				StatusAction::Retry(default_delay * attempt)
			}
		}
		_ => StatusAction::Api,
	}
}

/// Parse a `Retry-After` header given in whole seconds
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	headers
		.get(RETRY_AFTER)?
		.to_str()
		.ok()?
		.parse::<u64>()
		.ok()
		.map(Duration::from_secs)
}

/// HTTP client for the remote catalog admin API
#[derive(Debug, Clone)]
pub struct RemoteCatalogClient {
	http: reqwest::Client,
	page_size: u32,
	max_attempts: u32,
	default_retry_delay: Duration,
}

impl RemoteCatalogClient {
	pub fn new(page_size: u32, max_attempts: u32, default_retry_delay: Duration) -> Self {
		Self {
			http: reqwest::Client::new(),
			page_size,
			max_attempts,
			default_retry_delay,
		}
	}

	fn products_url(&self, credentials: &StoreCredentials) -> String {
		format!(
			"https://{}/api/{}/catalog/products.json",
			credentials.domain, credentials.api_version
		)
	}
}

#[async_trait]
impl CatalogSource for RemoteCatalogClient {
	async fn fetch_page(
		&self,
		credentials: &StoreCredentials,
		cursor: Option<&str>,
	) -> Result<RemotePage, RemoteError> {
		let url = self.products_url(credentials);

		for attempt in 1..=self.max_attempts {
			let mut request = self
				.http
				.get(&url)
				.bearer_auth(&credentials.token)
				.query(&[("limit", self.page_size.to_string())]);
			if let Some(cursor) = cursor {
				request = request.query(&[("cursor", cursor)]);
			}

			let response = request.send().await?;
			let status = response.status();
			let retry_after = parse_retry_after(response.headers());

			match evaluate_status(
				status,
				retry_after,
				attempt,
				self.max_attempts,
				self.default_retry_delay,
			) {
				StatusAction::Parse => {
					let page = response.json::<RemotePage>().await?;
					debug!(
						domain = %credentials.domain,
						products = page.products.len(),
						has_next = page.next_cursor.is_some(),
						"Fetched catalog page"
					);
					return Ok(page);
				}
				StatusAction::Retry(delay) => {
					warn!(
						domain = %credentials.domain,
						status = status.as_u16(),
						attempt,
						delay_ms = delay.as_millis() as u64,
						"Transient catalog API failure, retrying"
					);
					tokio::time::sleep(delay).await;
				}
				StatusAction::AuthFailed => {
					return Err(RemoteError::AuthFailed {
						status: status.as_u16(),
					});
				}
				StatusAction::RateLimited => {
					return Err(RemoteError::RateLimited {
						attempts: self.max_attempts,
					});
				}
				StatusAction::ServerExhausted => {
					return Err(RemoteError::Server {
						status: status.as_u16(),
						attempts: self.max_attempts,
					});
				}
				StatusAction::Api => {
					let message = response.text().await.unwrap_or_default();
					return Err(RemoteError::Api {
						status: status.as_u16(),
						message,
					});
				}
			}
		}

		// The loop always returns before attempts run out
		Err(RemoteError::RateLimited {
			attempts: self.max_attempts,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use reqwest::header::HeaderValue;
	use std::sync::Mutex;

	const DELAY: Duration = Duration::from_millis(100);

	#[test]
	fn test_success_parses() {
		assert_eq!(
			evaluate_status(StatusCode::OK, None, 1, 3, DELAY),
			StatusAction::Parse
		);
	}

	#[test]
	fn test_auth_fails_immediately() {
		assert_eq!(
			evaluate_status(StatusCode::UNAUTHORIZED, None, 1, 3, DELAY),
			StatusAction::AuthFailed
		);
		assert_eq!(
			evaluate_status(StatusCode::FORBIDDEN, None, 1, 3, DELAY),
			StatusAction::AuthFailed
		);
	}

	#[test]
	fn test_rate_limit_honors_server_delay() {
		assert_eq!(
			evaluate_status(
				StatusCode::TOO_MANY_REQUESTS,
				Some(Duration::from_secs(2)),
				1,
				3,
				DELAY
			),
			StatusAction::Retry(Duration::from_secs(2))
		);
	}

	#[test]
	fn test_rate_limit_backs_off_linearly() {
		assert_eq!(
			evaluate_status(StatusCode::TOO_MANY_REQUESTS, None, 2, 3, DELAY),
			StatusAction::Retry(DELAY * 2)
		);
	}

	#[test]
	fn test_rate_limit_exhausts() {
		assert_eq!(
			evaluate_status(StatusCode::TOO_MANY_REQUESTS, None, 3, 3, DELAY),
			StatusAction::RateLimited
		);
	}

	#[test]
	fn test_server_error_retries_then_exhausts() {
		assert_eq!(
			evaluate_status(StatusCode::SERVICE_UNAVAILABLE, None, 1, 3, DELAY),
			StatusAction::Retry(DELAY)
		);
		assert_eq!(
			evaluate_status(StatusCode::SERVICE_UNAVAILABLE, None, 2, 3, DELAY),
			StatusAction::Retry(DELAY * 2)
		);
		assert_eq!(
			evaluate_status(StatusCode::INTERNAL_SERVER_ERROR, None, 3, 3, DELAY),
			StatusAction::ServerExhausted
		);
	}

	#[test]
	fn test_other_statuses_surface_as_api_error() {
		assert_eq!(
			evaluate_status(StatusCode::NOT_FOUND, None, 1, 3, DELAY),
			StatusAction::Api
		);
		assert_eq!(
			evaluate_status(StatusCode::UNPROCESSABLE_ENTITY, None, 1, 3, DELAY),
			StatusAction::Api
		);
	}

	#[test]
	fn test_parse_retry_after() {
		let mut headers = HeaderMap::new();
		headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
		assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

		let empty = HeaderMap::new();
		assert_eq!(parse_retry_after(&empty), None);

		let mut bad = HeaderMap::new();
		bad.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
		assert_eq!(parse_retry_after(&bad), None);
	}

	/// Serves pre-built pages by cursor; cursor `"N"` is page index N.
	struct ScriptedSource {
		pages: Vec<RemotePage>,
		fail_on_call: Option<usize>,
		calls: Mutex<usize>,
	}

	#[async_trait]
	impl CatalogSource for ScriptedSource {
		async fn fetch_page(
			&self,
			_credentials: &StoreCredentials,
			cursor: Option<&str>,
		) -> Result<RemotePage, RemoteError> {
			let call = {
				let mut calls = self.calls.lock().unwrap();
				let call = *calls;
				*calls += 1;
				call
			};
			if self.fail_on_call == Some(call) {
				return Err(RemoteError::Server {
					status: 503,
					attempts: 3,
				});
			}
			let index = cursor.map(|c| c.parse::<usize>().unwrap()).unwrap_or(0);
			Ok(self.pages[index].clone())
		}
	}

	fn scripted(counts: &[usize], fail_on_call: Option<usize>) -> ScriptedSource {
		let mut next_id = 0;
		let pages = counts
			.iter()
			.enumerate()
			.map(|(index, count)| {
				let products = (0..*count)
					.map(|_| {
						next_id += 1;
						RemoteProduct {
							id: format!("gid://catalog/Product/{}", next_id),
							title: format!("Product {}", next_id),
							description: None,
							image_url: None,
							category: None,
							vendor: None,
							variants: vec![],
						}
					})
					.collect();
				RemotePage {
					products,
					next_cursor: (index + 1 < counts.len()).then(|| (index + 1).to_string()),
				}
			})
			.collect();
		ScriptedSource {
			pages,
			fail_on_call,
			calls: Mutex::new(0),
		}
	}

	fn credentials() -> StoreCredentials {
		StoreCredentials {
			domain: "acme.example-commerce.com".to_string(),
			token: "tok_test".to_string(),
			api_version: "2026-01".to_string(),
		}
	}

	#[tokio::test]
	async fn test_fetch_all_accumulates_pages_in_order() {
		let source = scripted(&[2, 2, 1], None);
		let mut observed = Vec::new();

		let products = fetch_all_catalog(&source, &credentials(), |page, total| {
			observed.push((page, total));
		})
		.await
		.unwrap();

		assert_eq!(products.len(), 5);
		assert_eq!(products[0].id, "gid://catalog/Product/1");
		assert_eq!(products[4].id, "gid://catalog/Product/5");
		assert_eq!(observed, vec![(1, 2), (2, 4), (3, 5)]);
		assert_eq!(*source.calls.lock().unwrap(), 3);
	}

	#[tokio::test]
	async fn test_fetch_all_stops_on_missing_cursor() {
		let source = scripted(&[3], None);

		let products = fetch_all_catalog(&source, &credentials(), |_, _| {})
			.await
			.unwrap();

		assert_eq!(products.len(), 3);
		assert_eq!(*source.calls.lock().unwrap(), 1);
	}

	#[tokio::test]
	async fn test_fetch_all_surfaces_mid_pagination_error() {
		let source = scripted(&[1, 1], Some(1));
		let mut observed = Vec::new();

		let err = fetch_all_catalog(&source, &credentials(), |page, total| {
			observed.push((page, total));
		})
		.await
		.unwrap_err();

		assert!(matches!(err, RemoteError::Server { status: 503, .. }));
		assert_eq!(observed, vec![(1, 1)]);
	}

	#[tokio::test]
	async fn test_fetch_all_treats_empty_cursor_as_end() {
		let mut source = scripted(&[2, 1], None);
		source.pages[0].next_cursor = Some(String::new());

		let products = fetch_all_catalog(&source, &credentials(), |_, _| {})
			.await
			.unwrap();

		assert_eq!(products.len(), 2);
		assert_eq!(*source.calls.lock().unwrap(), 1);
	}
}
