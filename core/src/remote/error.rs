//! Typed errors for the remote catalog client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
	#[error("Authentication failed (status {status})")]
	AuthFailed { status: u16 },

	#[error("Rate limited after {attempts} attempts")]
	RateLimited { attempts: u32 },

	#[error("Server error {status} after {attempts} attempts")]
	Server { status: u16, attempts: u32 },

	#[error("API error {status}: {message}")]
	Api { status: u16, message: String },

	#[error("Request failed: {0}")]
	Transport(#[from] reqwest::Error),
}

impl RemoteError {
	/// Machine-readable code for callers to branch on
	pub fn code(&self) -> &'static str {
		match self {
			Self::AuthFailed { .. } => "AUTH_FAILED",
			Self::RateLimited { .. } => "RATE_LIMIT",
			Self::Server { .. } => "SERVER_ERROR",
			Self::Api { .. } | Self::Transport(_) => "API_ERROR",
		}
	}

	/// HTTP status that produced this error, where one exists
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::AuthFailed { status } | Self::Server { status, .. } | Self::Api { status, .. } => {
				Some(*status)
			}
			Self::RateLimited { .. } => Some(429),
			Self::Transport(e) => e.status().map(|s| s.as_u16()),
		}
	}
}
