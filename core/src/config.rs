//! Engine configuration
//!
//! Tunables that operators may change without rebuilding: the staleness
//! window, remote paging/retry behavior, and progress persistence cadence.
//! Persisted as TOML next to the database; missing fields fall back to
//! defaults so older config files keep working.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "stockroom.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("config io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("config parse error: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("config serialize error: {0}")]
	Serialize(#[from] toml::ser::Error),

	#[error("could not determine a data directory for this platform")]
	NoDataDir,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
	/// Minutes before an open sync run is considered abandoned
	pub stale_run_minutes: u64,

	/// Entries requested per remote catalog page
	pub remote_page_size: u32,

	/// Attempts per page for rate-limit and server-error responses
	pub remote_retry_attempts: u32,

	/// Base retry delay when the remote does not send one
	pub remote_retry_delay_ms: u64,

	/// Persist the progress snapshot every N processed entries
	pub progress_persist_stride: usize,

	/// Poll interval for push-style progress subscriptions
	pub progress_poll_interval_ms: u64,

	/// Log lines retained per sync run
	pub sync_log_capacity: usize,
}

impl Default for CoreConfig {
	fn default() -> Self {
		Self {
			stale_run_minutes: 15,
			remote_page_size: 250,
			remote_retry_attempts: 3,
			remote_retry_delay_ms: 1000,
			progress_persist_stride: 5,
			progress_poll_interval_ms: 500,
			sync_log_capacity: 100,
		}
	}
}

impl CoreConfig {
	/// Load the config from `<data_dir>/stockroom.toml`, writing defaults
	/// there on first run
	pub fn load_or_create(data_dir: &Path) -> Result<Self, ConfigError> {
		let path = data_dir.join(CONFIG_FILE_NAME);

		if path.exists() {
			let raw = fs::read_to_string(&path)?;
			Ok(toml::from_str(&raw)?)
		} else {
			let config = Self::default();
			config.save(data_dir)?;
			Ok(config)
		}
	}

	pub fn save(&self, data_dir: &Path) -> Result<(), ConfigError> {
		fs::create_dir_all(data_dir)?;
		let raw = toml::to_string_pretty(self)?;
		fs::write(data_dir.join(CONFIG_FILE_NAME), raw)?;
		Ok(())
	}

	pub fn stale_window(&self) -> chrono::Duration {
		chrono::Duration::minutes(self.stale_run_minutes as i64)
	}

	pub fn retry_delay(&self) -> Duration {
		Duration::from_millis(self.remote_retry_delay_ms)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.progress_poll_interval_ms)
	}
}

/// Platform-specific default data directory
pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
	#[cfg(target_os = "macos")]
	let dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?.join("stockroom");

	#[cfg(target_os = "windows")]
	let dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?.join("Stockroom");

	#[cfg(not(any(target_os = "macos", target_os = "windows")))]
	let dir = dirs::data_local_dir()
		.ok_or(ConfigError::NoDataDir)?
		.join("stockroom");

	fs::create_dir_all(&dir)?;

	Ok(dir)
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use tempfile::TempDir;

	#[test]
	fn test_defaults() {
		let config = CoreConfig::default();
		assert_eq!(config.stale_run_minutes, 15);
		assert_eq!(config.remote_page_size, 250);
		assert_eq!(config.remote_retry_attempts, 3);
		assert_eq!(config.progress_persist_stride, 5);
		assert_eq!(config.sync_log_capacity, 100);
	}

	#[test]
	fn test_partial_file_fills_defaults() {
		let config: CoreConfig = toml::from_str("stale_run_minutes = 30\n").unwrap();
		assert_eq!(config.stale_run_minutes, 30);
		assert_eq!(config.remote_page_size, 250);
	}

	#[test]
	fn test_first_load_writes_file_and_roundtrips() {
		let dir = TempDir::new().unwrap();

		let config = CoreConfig::load_or_create(dir.path()).unwrap();
		assert!(dir.path().join(CONFIG_FILE_NAME).exists());
		assert_eq!(config, CoreConfig::default());

		let mut changed = config;
		changed.stale_run_minutes = 45;
		changed.save(dir.path()).unwrap();

		let reloaded = CoreConfig::load_or_create(dir.path()).unwrap();
		assert_eq!(reloaded.stale_run_minutes, 45);
	}
}
