// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host environment detection and the injectable clock.

use loom_telemetry_core::Runtime;
use serde::{Deserialize, Serialize};

/// Device and browser descriptors attached to crash identity envelopes in
/// browser-like runtimes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub user_agent: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub language: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub platform: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub screen: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timezone: Option<String>,
}

/// What the hosting environment offers the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCapabilities {
	/// A document is present (browser-like host).
	pub has_document: bool,
	/// Persistent key-value storage is available.
	pub has_storage: bool,
	/// A beacon-style fire-and-forget send is available.
	pub has_beacon: bool,
	/// Timers can be scheduled.
	pub has_timers: bool,
	pub device: Option<DeviceInfo>,
}

impl HostCapabilities {
	/// A server process: timers and storage, no document or beacon.
	pub fn server() -> Self {
		Self {
			has_document: false,
			has_storage: true,
			has_beacon: false,
			has_timers: true,
			device: None,
		}
	}

	/// A browser-like host with every capability.
	pub fn browser(device: DeviceInfo) -> Self {
		Self {
			has_document: true,
			has_storage: true,
			has_beacon: true,
			has_timers: true,
			device: Some(device),
		}
	}

	/// No storage, beacon or timers. Delivery only happens on explicit flush.
	pub fn minimal() -> Self {
		Self {
			has_document: false,
			has_storage: false,
			has_beacon: false,
			has_timers: false,
			device: None,
		}
	}

	pub fn detect_runtime(&self) -> Runtime {
		if self.has_document {
			Runtime::Browser
		} else {
			Runtime::Server
		}
	}
}

impl Default for HostCapabilities {
	fn default() -> Self {
		Self::server()
	}
}

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
	fn now_ms(&self) -> i64;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now_ms(&self) -> i64 {
		chrono::Utc::now().timestamp_millis()
	}
}
