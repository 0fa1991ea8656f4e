// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flush scheduling: the in-flight guard, coalesced retries, immediate flushes
//! on batch-size pressure, and the periodic timer.
//!
//! Lock order is `flush_state` before `queue`. No lock is held across the
//! transport await.

use std::collections::HashSet;
use std::sync::Arc;

use loom_telemetry_core::EventRecord;
use tokio::runtime::Handle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::client::ClientInner;
use crate::config::TelemetryConfig;
use crate::error::TelemetryError;
use crate::transport::{is_secure_endpoint, TransportRequest, WirePayload};

/// Where the scheduler is between flushes.
#[derive(Debug, Default)]
pub(crate) struct FlushState {
	in_flight: bool,
	pending_retry: bool,
}

/// Result of a [`TelemetryClient::flush`](crate::TelemetryClient::flush) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
	/// Nothing to do: destroyed, disabled, no endpoint, or empty queue.
	Skipped,
	/// Another flush was in flight; it will make one more attempt when done.
	Coalesced,
	/// The last attempt delivered; `count` records were delivered in total.
	Delivered { count: usize },
	/// The last attempt failed; the queue is unchanged.
	Failed,
	/// The batch held error data and the endpoint failed the secure check.
	Refused,
}

enum Attempt {
	Empty,
	Delivered(usize),
	Failed,
	Refused,
}

/// Whether `batch` may be sent to `endpoint` under the secure-endpoint rule.
pub(crate) fn batch_allowed(config: &TelemetryConfig, endpoint: &str, batch: &[EventRecord]) -> bool {
	!config.error_reporting.secure_endpoint_only
		|| is_secure_endpoint(endpoint)
		|| !batch.iter().any(EventRecord::is_error)
}

pub(crate) fn serialize_batch(
	config: &TelemetryConfig,
	batch: &[EventRecord],
	sent_at: i64,
) -> serde_json::Result<String> {
	serde_json::to_string(&WirePayload {
		source: &config.source,
		channel: config.channel,
		runtime: config.runtime,
		sent_at,
		events: batch,
	})
}

impl ClientInner {
	/// Run a flush, looping once more for every request that arrived while it
	/// was in flight.
	pub(crate) async fn run_flush(self: &Arc<Self>, allow_destroyed: bool) -> FlushOutcome {
		{
			let mut state = self.flush_state.lock();
			if state.in_flight {
				state.pending_retry = true;
				return FlushOutcome::Coalesced;
			}
			if (!allow_destroyed && self.is_destroyed()) || !self.has_deliverable() {
				return FlushOutcome::Skipped;
			}
			state.in_flight = true;
		}

		let mut delivered = 0;
		let mut outcome;
		loop {
			outcome = match self.attempt().await {
				Attempt::Empty if delivered > 0 => FlushOutcome::Delivered { count: delivered },
				Attempt::Empty => FlushOutcome::Skipped,
				Attempt::Delivered(count) => {
					delivered += count;
					FlushOutcome::Delivered { count: delivered }
				}
				Attempt::Failed => FlushOutcome::Failed,
				Attempt::Refused => FlushOutcome::Refused,
			};

			let mut state = self.flush_state.lock();
			let retry = std::mem::take(&mut state.pending_retry) && !self.queue.lock().is_empty();
			if !retry {
				state.in_flight = false;
				break;
			}
			debug!("Retrying telemetry flush requested while in flight");
		}

		outcome
	}

	fn has_deliverable(&self) -> bool {
		let config = self.config();
		config.enabled && config.endpoint.is_some() && !self.queue.lock().is_empty()
	}

	async fn attempt(&self) -> Attempt {
		let config = self.config();
		let Some(endpoint) = config.endpoint.clone() else {
			return Attempt::Empty;
		};
		if !config.enabled {
			return Attempt::Empty;
		}

		let batch = self.queue.lock().peek(config.batch_size);
		if batch.is_empty() {
			return Attempt::Empty;
		}

		if !batch_allowed(&config, &endpoint, &batch) {
			debug!(endpoint = %endpoint, "Refusing to send error batch to insecure endpoint");
			self.notify(&TelemetryError::InsecureEndpoint { endpoint });
			return Attempt::Refused;
		}

		let body = match serialize_batch(&config, &batch, self.clock.now_ms()) {
			Ok(body) => body,
			Err(e) => {
				self.notify(&TelemetryError::Serialization(e));
				return Attempt::Failed;
			}
		};

		debug!(count = batch.len(), endpoint = %endpoint, "Flushing telemetry batch");
		let request = TransportRequest {
			endpoint,
			body,
			headers: config.headers.clone(),
			keepalive: false,
		};
		match self.transport.send(request).await {
			Ok(()) => {
				let ids: HashSet<String> = batch.into_iter().map(|r| r.id).collect();
				let removed = self.queue.lock().remove_delivered(&ids);
				debug!(count = removed, "Telemetry batch delivered");
				Attempt::Delivered(ids.len())
			}
			Err(e) => {
				debug!(count = batch.len(), error = %e, "Telemetry batch delivery failed");
				self.notify(&TelemetryError::Delivery(e));
				Attempt::Failed
			}
		}
	}

	/// Spawn a flush on the ambient runtime, if the host has timers and there
	/// is a runtime to spawn on.
	pub(crate) fn request_flush(self: &Arc<Self>) {
		if !self.host.has_timers {
			return;
		}
		let Ok(handle) = Handle::try_current() else {
			debug!("No tokio runtime, deferring telemetry flush");
			return;
		};
		let inner = Arc::clone(self);
		handle.spawn(async move {
			inner.run_flush(false).await;
		});
	}

	/// (Re)start the periodic flush timer from the current config. Clears it
	/// when the client is disabled or destroyed.
	pub(crate) fn restart_timer(self: &Arc<Self>) {
		let mut timer = self.timer.lock();
		if let Some(handle) = timer.take() {
			handle.abort();
		}

		let config = self.config();
		if !config.enabled || self.is_destroyed() || !self.host.has_timers {
			return;
		}
		let Ok(handle) = Handle::try_current() else {
			debug!("No tokio runtime, periodic telemetry flush disabled");
			return;
		};

		let period = config.flush_interval();
		let weak = Arc::downgrade(self);
		*timer = Some(handle.spawn(async move {
			let mut ticker = interval_at(Instant::now() + period, period);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				let Some(inner) = weak.upgrade() else {
					break;
				};
				inner.run_flush(false).await;
			}
		}));
		debug!(interval_ms = config.flush_interval_ms, "Telemetry flush timer started");
	}

	pub(crate) fn stop_timer(&self) {
		if let Some(handle) = self.timer.lock().take() {
			handle.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{resolve, ErrorReportingLayer, TelemetryConfigLayer};
	use crate::host::HostCapabilities;
	use loom_telemetry_core::{Channel, ErrorDetail, EventKind, Runtime, Severity};
	use serde_json::Map;

	fn record(kind: EventKind) -> EventRecord {
		EventRecord {
			id: "r1".to_string(),
			kind,
			component: "C".to_string(),
			action: "a".to_string(),
			channel: Channel::Backend,
			runtime: Runtime::Server,
			session_id: "s".to_string(),
			source: "api".to_string(),
			timestamp: 1,
			label: None,
			href: None,
			variant: None,
			request_id: None,
			context: Map::new(),
			error: (kind == EventKind::Error).then(|| ErrorDetail {
				boundary: "global".to_string(),
				name: "Error".to_string(),
				message: "boom".to_string(),
				stack: None,
				component_stack: None,
				handled: true,
				severity: Severity::Error,
				tags: None,
				fingerprint: "00000000".to_string(),
				identity: None,
			}),
		}
	}

	fn config(secure_only: bool) -> TelemetryConfig {
		let layer = TelemetryConfigLayer::for_source("api").with_error_reporting(ErrorReportingLayer {
			secure_endpoint_only: Some(secure_only),
			..Default::default()
		});
		resolve(&layer, None, &HostCapabilities::server()).unwrap()
	}

	#[test]
	fn secure_gate_only_applies_to_error_batches() {
		let config = config(true);
		let insecure = "http://example.com";
		assert!(batch_allowed(&config, insecure, &[record(EventKind::Interaction)]));
		assert!(!batch_allowed(
			&config,
			insecure,
			&[record(EventKind::Interaction), record(EventKind::Error)]
		));
		assert!(batch_allowed(&config, "https://example.com", &[record(EventKind::Error)]));
	}

	#[test]
	fn secure_gate_can_be_disabled() {
		assert!(batch_allowed(&config(false), "http://example.com", &[record(EventKind::Error)]));
	}

	#[test]
	fn serialized_batch_carries_envelope() {
		let config = config(true);
		let body = serialize_batch(&config, &[record(EventKind::Interaction)], 99).unwrap();
		let json: serde_json::Value = serde_json::from_str(&body).unwrap();
		assert_eq!(json["source"], "api");
		assert_eq!(json["channel"], "backend");
		assert_eq!(json["sentAt"], 99);
		assert_eq!(json["events"][0]["id"], "r1");
	}
}
