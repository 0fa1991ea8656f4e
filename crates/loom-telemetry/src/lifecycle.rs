// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host teardown signals and best-effort delivery while the host goes away.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::client::ClientInner;
use crate::scheduler::{batch_allowed, serialize_batch};

/// A host signal that the page or process may be about to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleSignal {
	/// The document became hidden.
	VisibilityHidden,
	PageHide,
	BeforeUnload,
}

impl fmt::Display for LifecycleSignal {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LifecycleSignal::VisibilityHidden => write!(f, "visibilitychange"),
			LifecycleSignal::PageHide => write!(f, "pagehide"),
			LifecycleSignal::BeforeUnload => write!(f, "beforeunload"),
		}
	}
}

/// Attachment state of the lifecycle listeners.
#[derive(Debug)]
pub(crate) struct LifecycleHooks {
	attached: AtomicBool,
}

impl LifecycleHooks {
	pub(crate) fn attached() -> Self {
		Self {
			attached: AtomicBool::new(true),
		}
	}

	pub(crate) fn is_attached(&self) -> bool {
		self.attached.load(Ordering::SeqCst)
	}

	pub(crate) fn detach(&self) {
		self.attached.store(false, Ordering::SeqCst);
	}
}

impl ClientInner {
	/// React to a teardown signal: one batch by beacon if possible, otherwise
	/// a normal flush in the background. Returns true if a beacon was accepted.
	pub(crate) fn handle_lifecycle(self: &Arc<Self>, signal: LifecycleSignal) -> bool {
		if !self.hooks.is_attached() || self.is_destroyed() {
			return false;
		}
		debug!(signal = %signal, "Telemetry lifecycle signal");

		if self.try_beacon() {
			return true;
		}
		self.request_flush();
		false
	}

	/// Send the head batch through the beacon and evict it on acceptance.
	pub(crate) fn try_beacon(&self) -> bool {
		let Some(beacon) = self.beacon.as_ref() else {
			return false;
		};
		if !self.host.has_beacon {
			return false;
		}

		let config = self.config();
		let Some(endpoint) = config.endpoint.as_deref() else {
			return false;
		};
		if !config.enabled {
			return false;
		}

		let batch = self.queue.lock().peek(config.batch_size);
		if batch.is_empty() || !batch_allowed(&config, endpoint, &batch) {
			return false;
		}
		let Ok(body) = serialize_batch(&config, &batch, self.clock.now_ms()) else {
			return false;
		};

		if !beacon.send_beacon(endpoint, &body) {
			debug!(count = batch.len(), "Beacon refused telemetry batch");
			return false;
		}
		let ids: HashSet<String> = batch.into_iter().map(|r| r.id).collect();
		self.queue.lock().remove_delivered(&ids);
		debug!(count = ids.len(), "Telemetry batch handed to beacon");
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hooks_detach_once() {
		let hooks = LifecycleHooks::attached();
		assert!(hooks.is_attached());
		hooks.detach();
		assert!(!hooks.is_attached());
	}

	#[test]
	fn signal_names_match_host_events() {
		assert_eq!(LifecycleSignal::VisibilityHidden.to_string(), "visibilitychange");
		assert_eq!(LifecycleSignal::PageHide.to_string(), "pagehide");
		assert_eq!(LifecycleSignal::BeforeUnload.to_string(), "beforeunload");
	}
}
