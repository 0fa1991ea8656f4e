// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outbound delivery capabilities and the wire payload.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::mpsc;
use std::time::Duration;

use async_trait::async_trait;
use loom_telemetry_core::{Channel, EventRecord, Runtime};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};
use url::{Host, Url};

use crate::error::{Result, TelemetryError, TransportError};

/// SDK version for identification.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BEACON_TIMEOUT: Duration = Duration::from_secs(5);
const BEACON_GRACE: Duration = Duration::from_millis(500);

/// User agent sent by the built-in transports.
pub fn user_agent() -> String {
	format!("loom-telemetry/{SDK_VERSION}")
}

/// Body sent to the collector for one batch.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePayload<'a> {
	pub source: &'a str,
	pub channel: Channel,
	pub runtime: Runtime,
	/// Epoch ms at which the batch left the client.
	pub sent_at: i64,
	pub events: &'a [EventRecord],
}

/// One delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
	pub endpoint: String,
	/// Serialized [`WirePayload`].
	pub body: String,
	pub headers: BTreeMap<String, String>,
	/// The request should outlive the host if it is tearing down.
	pub keepalive: bool,
}

/// Asynchronous delivery of a batch to the collector.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn send(&self, request: TransportRequest) -> std::result::Result<(), TransportError>;
}

/// Best-effort delivery used while the host is going away.
///
/// Returning true hands the batch off for good: the client evicts it from
/// the queue and storage. Implementations must only do so once the batch can
/// no longer be lost by the process exiting.
pub trait BeaconSender: Send + Sync {
	fn send_beacon(&self, endpoint: &str, body: &str) -> bool;
}

/// Whether error data may be sent to `endpoint`: HTTPS anywhere, or plain HTTP
/// to a loopback host.
pub fn is_secure_endpoint(endpoint: &str) -> bool {
	let Ok(url) = Url::parse(endpoint) else {
		return false;
	};
	match url.scheme() {
		"https" => true,
		"http" => match url.host() {
			Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
			Some(Host::Ipv4(addr)) => IpAddr::V4(addr).is_loopback(),
			Some(Host::Ipv6(addr)) => IpAddr::V6(addr).is_loopback(),
			None => false,
		},
		_ => false,
	}
}

/// A client that cannot be built is a setup problem, not a delivery failure.
fn client_build_error(e: reqwest::Error) -> TelemetryError {
	TelemetryError::InvalidConfig(format!("failed to build HTTP client: {e}"))
}

/// Default [`Transport`]: a JSON POST with reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
	client: Client,
}

impl HttpTransport {
	pub fn new() -> Result<Self> {
		let client = Client::builder()
			.user_agent(user_agent())
			.timeout(REQUEST_TIMEOUT)
			.build()
			.map_err(client_build_error)?;
		Ok(Self { client })
	}

	/// Use a preconfigured client.
	pub fn with_client(client: Client) -> Self {
		Self { client }
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn send(&self, request: TransportRequest) -> std::result::Result<(), TransportError> {
		debug!(endpoint = %request.endpoint, bytes = request.body.len(), "Sending telemetry batch");

		let mut builder = self
			.client
			.post(&request.endpoint)
			.header(reqwest::header::CONTENT_TYPE, "application/json");
		for (name, value) in &request.headers {
			builder = builder.header(name.as_str(), value.as_str());
		}
		let response = builder.body(request.body).send().await?;

		if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
			let retry_after = response
				.headers()
				.get(reqwest::header::RETRY_AFTER)
				.and_then(|v| v.to_str().ok())
				.and_then(|s| s.parse().ok());
			return Err(TransportError::RateLimited {
				retry_after_secs: retry_after,
			});
		}

		if !response.status().is_success() {
			let status = response.status().as_u16();
			let message = response.text().await.unwrap_or_default();
			return Err(TransportError::ServerError { status, message });
		}

		Ok(())
	}
}

/// [`BeaconSender`] that posts with a blocking client and waits for the
/// collector's answer.
///
/// The request runs on its own thread so the blocking client never lives on
/// a tokio worker; the caller waits at most [`BEACON_TIMEOUT`]. A batch only
/// counts as sent once the collector answered with a success status, so a
/// process exiting right after a panic cannot lose a batch that was already
/// removed from storage.
#[derive(Debug, Clone, Default)]
pub struct BlockingHttpBeacon {
	headers: BTreeMap<String, String>,
}

impl BlockingHttpBeacon {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_headers(headers: BTreeMap<String, String>) -> Self {
		Self { headers }
	}
}

impl BeaconSender for BlockingHttpBeacon {
	fn send_beacon(&self, endpoint: &str, body: &str) -> bool {
		let endpoint = endpoint.to_string();
		let body = body.to_string();
		let headers = self.headers.clone();
		let (tx, rx) = mpsc::channel();

		let spawned = std::thread::Builder::new()
			.name("loom-telemetry-beacon".to_string())
			.spawn(move || {
				let _ = tx.send(post_blocking(&endpoint, body, &headers));
			});
		if let Err(e) = spawned {
			warn!(error = %e, "Failed to start beacon thread");
			return false;
		}

		match rx.recv_timeout(BEACON_TIMEOUT + BEACON_GRACE) {
			Ok(delivered) => delivered,
			Err(_) => {
				warn!("Beacon timed out");
				false
			}
		}
	}
}

fn post_blocking(endpoint: &str, body: String, headers: &BTreeMap<String, String>) -> bool {
	let client = match reqwest::blocking::Client::builder()
		.user_agent(user_agent())
		.timeout(BEACON_TIMEOUT)
		.build()
	{
		Ok(client) => client,
		Err(e) => {
			warn!(error = %e, "Failed to build beacon client");
			return false;
		}
	};

	let mut builder = client
		.post(endpoint)
		.header(reqwest::header::CONTENT_TYPE, "application/json");
	for (name, value) in headers {
		builder = builder.header(name.as_str(), value.as_str());
	}
	match builder.body(body).send() {
		Ok(response) if response.status().is_success() => {
			debug!("Beacon delivered");
			true
		}
		Ok(response) => {
			warn!(status = response.status().as_u16(), "Beacon rejected by collector");
			false
		}
		Err(e) => {
			warn!(error = %e, "Beacon request failed");
			false
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::matchers::{body_partial_json, header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	#[test]
	fn secure_endpoint_rules() {
		assert!(is_secure_endpoint("https://collect.example.com/v1"));
		assert!(is_secure_endpoint("http://localhost:8080/events"));
		assert!(is_secure_endpoint("http://127.0.0.1/events"));
		assert!(is_secure_endpoint("http://127.10.0.3/events"));
		assert!(is_secure_endpoint("http://[::1]:9000/events"));
		assert!(!is_secure_endpoint("http://example.com"));
		assert!(!is_secure_endpoint("http://10.0.0.1/events"));
		assert!(!is_secure_endpoint("ftp://localhost/events"));
		assert!(!is_secure_endpoint("not a url"));
	}

	#[test]
	fn wire_payload_is_camel_case() {
		let payload = WirePayload {
			source: "web",
			channel: Channel::Frontend,
			runtime: Runtime::Browser,
			sent_at: 42,
			events: &[],
		};
		let json = serde_json::to_value(&payload).unwrap();
		assert_eq!(
			json,
			serde_json::json!({
				"source": "web",
				"channel": "frontend",
				"runtime": "browser",
				"sentAt": 42,
				"events": []
			})
		);
	}

	fn request(endpoint: String) -> TransportRequest {
		TransportRequest {
			endpoint,
			body: r#"{"source":"web","events":[]}"#.to_string(),
			headers: BTreeMap::from([("x-api-key".to_string(), "k".to_string())]),
			keepalive: false,
		}
	}

	#[tokio::test]
	async fn http_transport_posts_json_with_headers() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/events"))
			.and(header("content-type", "application/json"))
			.and(header("x-api-key", "k"))
			.and(header("user-agent", user_agent().as_str()))
			.and(body_partial_json(serde_json::json!({ "source": "web" })))
			.respond_with(ResponseTemplate::new(202))
			.expect(1)
			.mount(&server)
			.await;

		let transport = HttpTransport::new().unwrap();
		transport
			.send(request(format!("{}/v1/events", server.uri())))
			.await
			.unwrap();
	}

	#[test]
	fn client_build_failure_is_a_config_error() {
		let err = Client::new().get("not a url").build().unwrap_err();
		assert!(matches!(
			client_build_error(err),
			TelemetryError::InvalidConfig(_)
		));
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn beacon_reports_success_after_collector_answered() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/events"))
			.and(header("x-api-key", "k"))
			.respond_with(ResponseTemplate::new(204))
			.mount(&server)
			.await;

		let beacon = BlockingHttpBeacon::with_headers(BTreeMap::from([(
			"x-api-key".to_string(),
			"k".to_string(),
		)]));
		let endpoint = format!("{}/v1/events", server.uri());
		assert!(beacon.send_beacon(&endpoint, r#"{"events":[]}"#));
		assert_eq!(server.received_requests().await.unwrap().len(), 1);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn beacon_reports_rejection() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(500))
			.mount(&server)
			.await;

		assert!(!BlockingHttpBeacon::new().send_beacon(&server.uri(), "{}"));
	}

	#[test]
	fn beacon_reports_unreachable_collector() {
		assert!(!BlockingHttpBeacon::new().send_beacon("http://127.0.0.1:9/v1/events", "{}"));
	}

	#[tokio::test]
	async fn http_transport_maps_rate_limit() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
			.mount(&server)
			.await;

		let err = HttpTransport::new()
			.unwrap()
			.send(request(server.uri()))
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			TransportError::RateLimited {
				retry_after_secs: Some(30)
			}
		));
	}

	#[tokio::test]
	async fn http_transport_maps_server_errors() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(500).set_body_string("down"))
			.mount(&server)
			.await;

		let err = HttpTransport::new()
			.unwrap()
			.send(request(server.uri()))
			.await
			.unwrap_err();
		match err {
			TransportError::ServerError { status, message } => {
				assert_eq!(status, 500);
				assert_eq!(message, "down");
			}
			other => panic!("unexpected error: {other}"),
		}
	}
}
