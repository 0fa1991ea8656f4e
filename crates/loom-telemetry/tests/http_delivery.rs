// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use loom_telemetry::{
	backend_builder, ErrorReport, FlushOutcome, HttpTransport, MemoryStore, TelemetryConfigLayer,
	TrackEvent,
};
use serde_json::Value;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn collector(status: u16) -> MockServer {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/v1/events"))
		.and(header("content-type", "application/json"))
		.respond_with(ResponseTemplate::new(status))
		.mount(&server)
		.await;
	server
}

#[tokio::test]
async fn delivers_batches_to_a_collector() {
	let server = collector(202).await;
	let store = MemoryStore::new();
	let client = backend_builder(
		TelemetryConfigLayer::for_source("billing").with_endpoint(format!("{}/v1/events", server.uri())),
	)
	.store(Arc::new(store.clone()))
	.transport(Arc::new(HttpTransport::new().unwrap()))
	.build()
	.unwrap();

	client.track(TrackEvent::new("Invoice", "create")).unwrap();
	client
		.report_error(ErrorReport::new("ledger unavailable").boundary("InvoiceJob"))
		.unwrap();

	assert_eq!(client.flush().await, FlushOutcome::Delivered { count: 2 });
	assert_eq!(client.queue_len(), 0);

	let received = server.received_requests().await.unwrap();
	assert_eq!(received.len(), 1);
	let body: Value = serde_json::from_slice(&received[0].body).unwrap();
	assert_eq!(body["source"], "billing");
	assert_eq!(body["channel"], "backend");
	assert_eq!(body["runtime"], "server");
	assert_eq!(body["events"].as_array().unwrap().len(), 2);
	assert_eq!(body["events"][1]["kind"], "error");
	assert_eq!(body["events"][1]["error"]["boundary"], "InvoiceJob");
}

#[tokio::test]
async fn collector_errors_keep_the_queue() {
	let server = collector(500).await;
	let client = backend_builder(
		TelemetryConfigLayer::for_source("billing").with_endpoint(format!("{}/v1/events", server.uri())),
	)
	.transport(Arc::new(HttpTransport::new().unwrap()))
	.build()
	.unwrap();

	client.track(TrackEvent::new("Invoice", "create")).unwrap();
	assert_eq!(client.flush().await, FlushOutcome::Failed);
	assert_eq!(client.queue_len(), 1);
}
