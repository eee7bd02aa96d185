//! Progress snapshots for sync runs
//!
//! A [`SyncProgress`] is the serializable state of one run at a point in
//! time. The runner mutates a single snapshot as it works and periodically
//! persists it onto the run row and emits it on the event bus, so the latest
//! snapshot survives process restarts and late subscribers read it from the
//! database instead of missing broadcast events.

use crate::catalog::DiffSummary;
use crate::infra::db::entities::sync_run::RunStatus;
use serde::{Deserialize, Serialize};

/// Log lines kept per run. Older lines are dropped first.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

fn default_log_capacity() -> usize {
	DEFAULT_LOG_CAPACITY
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	Info,
	Warning,
	Error,
}

impl std::fmt::Display for LogLevel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Info => write!(f, "info"),
			Self::Warning => write!(f, "warning"),
			Self::Error => write!(f, "error"),
		}
	}
}

/// One timestamped line in a run's log ring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
	pub timestamp: chrono::DateTime<chrono::Utc>,
	pub level: LogLevel,
	pub message: String,
}

/// Point-in-time progress state of a sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
	/// Mirrors the run status string ("fetching", "processing", ...)
	pub phase: String,

	/// Entries pulled from the remote so far
	pub fetched_count: u64,

	/// Entries transformed / written / diffed so far
	pub processed_count: u64,

	/// Total entries once fetching finished; 0 while still unknown
	pub total_count: u64,

	/// Label of the entry currently being worked on
	pub current_item: Option<String>,

	/// Completion ratio (0.0 to 1.0); stays 0.0 until the total is known
	pub percentage: f32,

	/// Bounded log ring, oldest lines dropped beyond capacity
	pub logs: Vec<LogEntry>,

	/// Set when the run failed
	pub error: Option<String>,

	/// Classification counts, present once the diff phase finished
	pub summary: Option<DiffSummary>,

	#[serde(skip, default = "default_log_capacity")]
	log_capacity: usize,
}

impl SyncProgress {
	pub fn new(phase: RunStatus) -> Self {
		Self {
			phase: phase.to_string(),
			fetched_count: 0,
			processed_count: 0,
			total_count: 0,
			current_item: None,
			percentage: 0.0,
			logs: Vec::new(),
			error: None,
			summary: None,
			log_capacity: DEFAULT_LOG_CAPACITY,
		}
	}

	pub fn with_log_capacity(mut self, capacity: usize) -> Self {
		self.log_capacity = capacity.max(1);
		self
	}

	pub fn set_phase(&mut self, phase: RunStatus) {
		self.phase = phase.to_string();
	}

	pub fn set_fetched(&mut self, fetched: u64) {
		self.fetched_count = fetched;
	}

	/// Update processed/total counts and recompute the percentage
	pub fn set_counts(&mut self, processed: u64, total: u64) {
		self.processed_count = processed;
		self.total_count = total;
		if total > 0 {
			self.percentage = (processed as f32 / total as f32).clamp(0.0, 1.0);
		}
	}

	pub fn set_current_item(&mut self, item: impl Into<String>) {
		self.current_item = Some(item.into());
	}

	pub fn set_summary(&mut self, summary: DiffSummary) {
		self.summary = Some(summary);
	}

	/// Append a log line, dropping the oldest lines beyond capacity
	pub fn push_log(&mut self, level: LogLevel, message: impl Into<String>) {
		self.logs.push(LogEntry {
			timestamp: chrono::Utc::now(),
			level,
			message: message.into(),
		});
		if self.logs.len() > self.log_capacity {
			let overflow = self.logs.len() - self.log_capacity;
			self.logs.drain(..overflow);
		}
	}

	/// Mark the run failed, recording the error on the snapshot
	pub fn fail(&mut self, error: impl Into<String>) {
		let error = error.into();
		self.phase = RunStatus::Failed.to_string();
		self.push_log(LogLevel::Error, error.clone());
		self.error = Some(error);
	}

	/// Formatted progress string for display
	pub fn format_progress(&self) -> String {
		if self.total_count > 0 {
			format!(
				"{}: {}/{} ({:.0}%)",
				self.phase,
				self.processed_count,
				self.total_count,
				self.percentage * 100.0
			)
		} else {
			format!("{}: {} fetched", self.phase, self.fetched_count)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn test_counts_drive_percentage() {
		let mut progress = SyncProgress::new(RunStatus::Processing);
		assert_eq!(progress.percentage, 0.0);

		progress.set_counts(25, 100);
		assert_eq!(progress.percentage, 0.25);
		assert_eq!(progress.format_progress(), "processing: 25/100 (25%)");
	}

	#[test]
	fn test_unknown_total_keeps_percentage_at_zero() {
		let mut progress = SyncProgress::new(RunStatus::Fetching);
		progress.set_fetched(250);
		progress.set_counts(0, 0);

		assert_eq!(progress.percentage, 0.0);
		assert_eq!(progress.format_progress(), "fetching: 250 fetched");
	}

	#[test]
	fn test_log_ring_drops_oldest() {
		let mut progress = SyncProgress::new(RunStatus::Fetching).with_log_capacity(3);
		for n in 0..5 {
			progress.push_log(LogLevel::Info, format!("line {n}"));
		}

		assert_eq!(progress.logs.len(), 3);
		let lines: Vec<&str> = progress.logs.iter().map(|l| l.message.as_str()).collect();
		assert_eq!(lines, vec!["line 2", "line 3", "line 4"]);
	}

	#[test]
	fn test_fail_records_error_and_phase() {
		let mut progress = SyncProgress::new(RunStatus::Fetching);
		progress.fail("remote returned 401");

		assert_eq!(progress.phase, "failed");
		assert_eq!(progress.error.as_deref(), Some("remote returned 401"));
		assert_eq!(progress.logs.last().map(|l| l.level), Some(LogLevel::Error));
	}

	#[test]
	fn test_snapshot_roundtrips_through_json() {
		let mut progress = SyncProgress::new(RunStatus::Processing);
		progress.set_counts(10, 40);
		progress.set_current_item("Product A / Small");
		progress.push_log(LogLevel::Info, "page 1 fetched");

		let json = serde_json::to_value(&progress).unwrap();
		let back: SyncProgress = serde_json::from_value(json).unwrap();
		assert_eq!(back, progress);
	}
}
