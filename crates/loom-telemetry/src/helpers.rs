// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Channel-pinned and disabled client constructors.

use std::sync::Arc;

use async_trait::async_trait;
use loom_telemetry_core::{Channel, Runtime};

use crate::client::{TelemetryClient, TelemetryClientBuilder};
use crate::config::TelemetryConfigLayer;
use crate::error::{Result, TransportError};
use crate::host::HostCapabilities;
use crate::store::NoopStore;
use crate::transport::{Transport, TransportRequest};

/// Builder for a client on the frontend channel.
pub fn frontend_builder(layer: TelemetryConfigLayer) -> TelemetryClientBuilder {
	TelemetryClient::builder(layer.with_channel(Channel::Frontend))
}

/// Builder for a client on the backend channel in the server runtime.
pub fn backend_builder(layer: TelemetryConfigLayer) -> TelemetryClientBuilder {
	TelemetryClient::builder(
		layer
			.with_channel(Channel::Backend)
			.with_runtime(Runtime::Server),
	)
	.host(HostCapabilities::server())
}

/// A frontend client with default capabilities.
pub fn frontend_client(layer: TelemetryConfigLayer) -> Result<TelemetryClient> {
	frontend_builder(layer).build()
}

/// A backend client with default capabilities.
pub fn backend_client(layer: TelemetryConfigLayer) -> Result<TelemetryClient> {
	backend_builder(layer).build()
}

/// A client whose operations are all no-ops. Nothing is stored or sent.
pub fn disabled_client(source: impl Into<String>) -> Result<TelemetryClient> {
	TelemetryClient::builder(TelemetryConfigLayer::for_source(source).with_enabled(false))
		.host(HostCapabilities::minimal())
		.store(Arc::new(NoopStore))
		.transport(Arc::new(DisabledTransport))
		.build()
}

struct DisabledTransport;

#[async_trait]
impl Transport for DisabledTransport {
	async fn send(&self, _request: TransportRequest) -> std::result::Result<(), TransportError> {
		Err(TransportError::Rejected("telemetry is disabled".to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crash::ErrorReport;
	use crate::client::TrackEvent;
	use crate::scheduler::FlushOutcome;

	#[test]
	fn frontend_builder_pins_channel() {
		let client = frontend_builder(
			TelemetryConfigLayer::for_source("web").with_channel(Channel::Backend),
		)
		.transport(Arc::new(DisabledTransport))
		.build()
		.unwrap();
		assert_eq!(client.config().channel, Channel::Frontend);
		assert_eq!(client.config().storage_key, "loom-telemetry:frontend:web");
	}

	#[test]
	fn backend_builder_pins_channel_and_runtime() {
		let client = backend_builder(TelemetryConfigLayer::for_source("api"))
			.host(HostCapabilities::browser(Default::default()))
			.transport(Arc::new(DisabledTransport))
			.build()
			.unwrap();
		assert_eq!(client.config().channel, Channel::Backend);
		assert_eq!(client.config().runtime, Runtime::Server);
	}

	#[tokio::test]
	async fn disabled_client_does_nothing() {
		let client = disabled_client("web").unwrap();
		assert!(!client.config().enabled);
		assert_eq!(client.track(TrackEvent::new("Button", "click")), None);
		assert_eq!(client.report_error(ErrorReport::new("boom")), None);
		assert_eq!(client.queue_len(), 0);
		assert_eq!(client.flush().await, FlushOutcome::Skipped);
		assert!(client.issue_reports().is_empty());
	}
}
