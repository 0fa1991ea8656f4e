// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Callbacks for delivery failures and issue thresholds.

use loom_telemetry_core::IssueReport;
use tracing::warn;

use crate::error::TelemetryError;

/// Receives recoverable runtime failures: delivery errors and refused sends.
pub trait ErrorHandler: Send + Sync {
	fn on_error(&self, error: &TelemetryError);
}

impl<F> ErrorHandler for F
where
	F: Fn(&TelemetryError) + Send + Sync,
{
	fn on_error(&self, error: &TelemetryError) {
		self(error)
	}
}

/// Default handler: logs at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
	fn on_error(&self, error: &TelemetryError) {
		warn!(error = %error, "Telemetry delivery problem");
	}
}

/// Notified when an error fingerprint reaches the configured occurrence count
/// inside the aggregation window.
pub trait IssueThresholdHandler: Send + Sync {
	fn on_threshold(&self, report: &IssueReport);
}

impl<F> IssueThresholdHandler for F
where
	F: Fn(&IssueReport) + Send + Sync,
{
	fn on_threshold(&self, report: &IssueReport) {
		self(report)
	}
}
