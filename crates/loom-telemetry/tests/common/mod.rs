// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use loom_telemetry::{
	BeaconSender, Clock, ErrorHandler, EventRecord, HostCapabilities, KeyValueStore, MemoryStore,
	TelemetryClient, TelemetryClientBuilder, TelemetryConfigLayer, TelemetryError, Transport,
	TransportError, TransportRequest,
};
use serde_json::Value;
use tokio::sync::Semaphore;

pub const ENDPOINT: &str = "https://collect.example.com/v1/events";
pub const START_MS: i64 = 1_700_000_000_000;

/// Transport that records every request and can fail or block on demand.
#[derive(Default)]
pub struct MockTransport {
	requests: Mutex<Vec<TransportRequest>>,
	should_fail: AtomicBool,
	gate: Option<Arc<Semaphore>>,
	current: AtomicUsize,
	max_concurrent: AtomicUsize,
}

impl MockTransport {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// A transport whose sends wait until the returned semaphore gets permits.
	pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
		let gate = Arc::new(Semaphore::new(0));
		let transport = Arc::new(Self {
			gate: Some(Arc::clone(&gate)),
			..Self::default()
		});
		(transport, gate)
	}

	pub fn set_should_fail(&self, fail: bool) {
		self.should_fail.store(fail, Ordering::SeqCst);
	}

	pub fn calls(&self) -> usize {
		self.requests.lock().unwrap().len()
	}

	pub fn max_concurrent(&self) -> usize {
		self.max_concurrent.load(Ordering::SeqCst)
	}

	pub fn requests(&self) -> Vec<TransportRequest> {
		self.requests.lock().unwrap().clone()
	}

	/// Events of every request, one vector per call.
	pub fn batches(&self) -> Vec<Vec<EventRecord>> {
		self
			.requests()
			.iter()
			.map(|r| events_of(&r.body))
			.collect()
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn send(&self, request: TransportRequest) -> Result<(), TransportError> {
		let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_concurrent.fetch_max(now, Ordering::SeqCst);
		self.requests.lock().unwrap().push(request);

		if let Some(gate) = &self.gate {
			let permit = gate.acquire().await.unwrap();
			permit.forget();
		}

		self.current.fetch_sub(1, Ordering::SeqCst);
		if self.should_fail.load(Ordering::SeqCst) {
			Err(TransportError::ServerError {
				status: 503,
				message: "unavailable".to_string(),
			})
		} else {
			Ok(())
		}
	}
}

/// Beacon that records bodies and accepts or refuses them.
pub struct MockBeacon {
	pub accept: AtomicBool,
	bodies: Mutex<Vec<String>>,
}

impl MockBeacon {
	pub fn new(accept: bool) -> Arc<Self> {
		Arc::new(Self {
			accept: AtomicBool::new(accept),
			bodies: Mutex::new(Vec::new()),
		})
	}

	pub fn bodies(&self) -> Vec<String> {
		self.bodies.lock().unwrap().clone()
	}
}

impl BeaconSender for MockBeacon {
	fn send_beacon(&self, _endpoint: &str, body: &str) -> bool {
		self.bodies.lock().unwrap().push(body.to_string());
		self.accept.load(Ordering::SeqCst)
	}
}

/// Clock that only moves when told to.
pub struct FixedClock(AtomicI64);

impl FixedClock {
	pub fn new(ms: i64) -> Arc<Self> {
		Arc::new(Self(AtomicI64::new(ms)))
	}

	pub fn advance(&self, ms: i64) {
		self.0.fetch_add(ms, Ordering::SeqCst);
	}
}

impl Clock for FixedClock {
	fn now_ms(&self) -> i64 {
		self.0.load(Ordering::SeqCst)
	}
}

/// Error handler that keeps the rendered errors.
#[derive(Default)]
pub struct CollectingHandler(Mutex<Vec<String>>);

impl CollectingHandler {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn messages(&self) -> Vec<String> {
		self.0.lock().unwrap().clone()
	}
}

impl ErrorHandler for CollectingHandler {
	fn on_error(&self, error: &TelemetryError) {
		self.0.lock().unwrap().push(error.to_string());
	}
}

pub fn builder(
	layer: TelemetryConfigLayer,
	store: &MemoryStore,
	transport: &Arc<MockTransport>,
	clock: &Arc<FixedClock>,
) -> TelemetryClientBuilder {
	TelemetryClient::builder(layer)
		.host(HostCapabilities::server())
		.store(Arc::new(store.clone()))
		.transport(Arc::clone(transport) as Arc<dyn Transport>)
		.clock(Arc::clone(clock) as Arc<dyn Clock>)
}

pub fn client(
	layer: TelemetryConfigLayer,
	store: &MemoryStore,
	transport: &Arc<MockTransport>,
) -> TelemetryClient {
	builder(layer, store, transport, &FixedClock::new(START_MS))
		.build()
		.unwrap()
}

pub fn events_of(body: &str) -> Vec<EventRecord> {
	let payload: Value = serde_json::from_str(body).unwrap();
	serde_json::from_value(payload["events"].clone()).unwrap()
}

pub fn stored_records(store: &MemoryStore, key: &str) -> Option<Vec<EventRecord>> {
	store
		.get(key)
		.unwrap()
		.map(|raw| serde_json::from_str(&raw).unwrap())
}

/// Let spawned tasks run until they block.
pub async fn settle() {
	for _ in 0..20 {
		tokio::task::yield_now().await;
	}
}
