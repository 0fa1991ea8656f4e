// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the telemetry SDK.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Failures reported by a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
	/// HTTP request failed before a response was received.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	/// Collector answered with a non-success status.
	#[error("server error ({status}): {message}")]
	ServerError { status: u16, message: String },

	/// Rate limited by the collector.
	#[error("rate limited, retry after {retry_after_secs:?} seconds")]
	RateLimited { retry_after_secs: Option<u64> },

	/// A custom transport refused the request.
	#[error("transport rejected request: {0}")]
	Rejected(String),
}

/// Telemetry SDK errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
	/// Configuration could not be resolved.
	#[error("invalid telemetry configuration: {0}")]
	InvalidConfig(String),

	/// A batch could not be delivered; the queue is kept for a later attempt.
	#[error("delivery failed: {0}")]
	Delivery(#[from] TransportError),

	/// Error data was withheld from an endpoint that is neither HTTPS nor loopback.
	#[error("refusing to send error reports to insecure endpoint {endpoint}")]
	InsecureEndpoint { endpoint: String },

	/// A payload could not be serialized.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// A configuration file could not be read.
	#[error("failed to read config file {path}: {source}")]
	ConfigFileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// A configuration file could not be parsed.
	#[error("failed to parse config file {path}: {source}")]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn transport_error_converts_to_delivery() {
		let err: TelemetryError = TransportError::ServerError {
			status: 503,
			message: "unavailable".to_string(),
		}
		.into();
		assert!(matches!(err, TelemetryError::Delivery(_)));
		assert_eq!(
			err.to_string(),
			"delivery failed: server error (503): unavailable"
		);
	}

	#[test]
	fn insecure_endpoint_message_names_endpoint() {
		let err = TelemetryError::InsecureEndpoint {
			endpoint: "http://example.com".to_string(),
		};
		assert!(err.to_string().contains("http://example.com"));
	}
}
