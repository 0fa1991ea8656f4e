// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration snapshots and partial updates.
//!
//! A [`TelemetryConfigLayer`] is a partial update: every field is optional.
//! [`resolve`] folds a layer onto the previous snapshot (or the defaults) and
//! produces an immutable [`TelemetryConfig`]. Numeric options that are zero or
//! negative fall back to the previous value or the default; positive values
//! are raised to a per-option floor.

use std::collections::BTreeMap;
use std::time::Duration;

use loom_telemetry_core::{Channel, ContextLimits, Runtime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, TelemetryError};
use crate::host::HostCapabilities;

pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;
pub const MIN_FLUSH_INTERVAL_MS: u64 = 250;
pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 500;

pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 500;
pub const MIN_MAX_MESSAGE_LENGTH: usize = 32;
pub const DEFAULT_MAX_STACK_LENGTH: usize = 4_000;
pub const DEFAULT_MAX_COMPONENT_STACK_LENGTH: usize = 2_000;
pub const MIN_STACK_LENGTH: usize = 128;
pub const DEFAULT_MAX_TAGS: usize = 10;
pub const DEFAULT_MAX_CONTEXT_DEPTH: usize = 4;
pub const DEFAULT_MAX_CONTEXT_KEYS: usize = 25;
pub const DEFAULT_THRESHOLD_COUNT: usize = 5;
pub const DEFAULT_WINDOW_MS: u64 = 60_000;
pub const MIN_WINDOW_MS: u64 = 1_000;

pub const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
	"email",
	"token",
	"password",
	"secret",
	"authorization",
	"cookie",
	"session",
	"phone",
	"ssn",
	"apikey",
	"api_key",
];

const STORAGE_KEY_PREFIX: &str = "loom-telemetry";

/// Resolved error-reporting settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReportingConfig {
	pub enabled: bool,
	/// Only deliver error data to HTTPS or loopback HTTP endpoints.
	pub secure_endpoint_only: bool,
	pub max_message_length: usize,
	pub max_stack_length: usize,
	pub max_component_stack_length: usize,
	pub max_tags: usize,
	pub max_context_depth: usize,
	pub max_context_keys: usize,
	/// Occurrences within `window_ms` that trigger the threshold handler.
	pub threshold_count: usize,
	pub window_ms: u64,
	pub sensitive_keys: Vec<String>,
}

impl Default for ErrorReportingConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			secure_endpoint_only: true,
			max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
			max_stack_length: DEFAULT_MAX_STACK_LENGTH,
			max_component_stack_length: DEFAULT_MAX_COMPONENT_STACK_LENGTH,
			max_tags: DEFAULT_MAX_TAGS,
			max_context_depth: DEFAULT_MAX_CONTEXT_DEPTH,
			max_context_keys: DEFAULT_MAX_CONTEXT_KEYS,
			threshold_count: DEFAULT_THRESHOLD_COUNT,
			window_ms: DEFAULT_WINDOW_MS,
			sensitive_keys: DEFAULT_SENSITIVE_KEYS.iter().map(|s| s.to_string()).collect(),
		}
	}
}

impl ErrorReportingConfig {
	pub fn context_limits(&self) -> ContextLimits {
		ContextLimits {
			max_depth: self.max_context_depth,
			max_keys: self.max_context_keys,
			max_string_length: self.max_message_length,
			sensitive_keys: self.sensitive_keys.clone(),
		}
	}
}

/// An immutable, fully resolved configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryConfig {
	pub source: String,
	pub endpoint: Option<String>,
	pub channel: Channel,
	/// The caller chose `channel`; otherwise it follows `runtime`.
	pub channel_explicit: bool,
	pub runtime: Runtime,
	pub session_id: String,
	/// Merged under each event's own context.
	pub default_context: Map<String, Value>,
	/// Sent with every delivery request.
	pub headers: BTreeMap<String, String>,
	pub flush_interval_ms: u64,
	pub batch_size: usize,
	pub max_queue_size: usize,
	pub storage_key: String,
	/// The caller chose `storage_key`; it is never re-derived.
	pub storage_key_explicit: bool,
	pub enabled: bool,
	pub error_reporting: ErrorReportingConfig,
}

impl TelemetryConfig {
	pub fn flush_interval(&self) -> Duration {
		Duration::from_millis(self.flush_interval_ms)
	}

	pub fn endpoint(&self) -> Option<&str> {
		self.endpoint.as_deref()
	}
}

/// Partial error-reporting settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorReportingLayer {
	pub enabled: Option<bool>,
	pub secure_endpoint_only: Option<bool>,
	pub max_message_length: Option<i64>,
	pub max_stack_length: Option<i64>,
	pub max_component_stack_length: Option<i64>,
	pub max_tags: Option<i64>,
	pub max_context_depth: Option<i64>,
	pub max_context_keys: Option<i64>,
	pub threshold_count: Option<i64>,
	pub window_ms: Option<i64>,
	pub sensitive_keys: Option<Vec<String>>,
}

impl ErrorReportingLayer {
	pub fn merge(&mut self, other: Self) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.secure_endpoint_only.is_some() {
			self.secure_endpoint_only = other.secure_endpoint_only;
		}
		if other.max_message_length.is_some() {
			self.max_message_length = other.max_message_length;
		}
		if other.max_stack_length.is_some() {
			self.max_stack_length = other.max_stack_length;
		}
		if other.max_component_stack_length.is_some() {
			self.max_component_stack_length = other.max_component_stack_length;
		}
		if other.max_tags.is_some() {
			self.max_tags = other.max_tags;
		}
		if other.max_context_depth.is_some() {
			self.max_context_depth = other.max_context_depth;
		}
		if other.max_context_keys.is_some() {
			self.max_context_keys = other.max_context_keys;
		}
		if other.threshold_count.is_some() {
			self.threshold_count = other.threshold_count;
		}
		if other.window_ms.is_some() {
			self.window_ms = other.window_ms;
		}
		if other.sensitive_keys.is_some() {
			self.sensitive_keys = other.sensitive_keys;
		}
	}

	fn resolve(&self, previous: Option<&ErrorReportingConfig>) -> ErrorReportingConfig {
		let defaults = ErrorReportingConfig::default();
		let base = previous.unwrap_or(&defaults);
		ErrorReportingConfig {
			enabled: self.enabled.unwrap_or(base.enabled),
			secure_endpoint_only: self.secure_endpoint_only.unwrap_or(base.secure_endpoint_only),
			max_message_length: coerce(self.max_message_length, base.max_message_length, MIN_MAX_MESSAGE_LENGTH),
			max_stack_length: coerce(self.max_stack_length, base.max_stack_length, MIN_STACK_LENGTH),
			max_component_stack_length: coerce(
				self.max_component_stack_length,
				base.max_component_stack_length,
				MIN_STACK_LENGTH,
			),
			max_tags: coerce(self.max_tags, base.max_tags, 1),
			max_context_depth: coerce(self.max_context_depth, base.max_context_depth, 1),
			max_context_keys: coerce(self.max_context_keys, base.max_context_keys, 1),
			threshold_count: coerce(self.threshold_count, base.threshold_count, 1),
			window_ms: coerce(self.window_ms, base.window_ms, MIN_WINDOW_MS),
			sensitive_keys: match &self.sensitive_keys {
				Some(keys) => keys
					.iter()
					.map(|k| k.trim().to_lowercase())
					.filter(|k| !k.is_empty())
					.collect(),
				None => base.sensitive_keys.clone(),
			},
		}
	}
}

/// A partial configuration update.
///
/// Deserializable from TOML, so the same type backs [`crate::sources`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfigLayer {
	pub source: Option<String>,
	/// An empty string clears the endpoint.
	pub endpoint: Option<String>,
	pub channel: Option<Channel>,
	pub runtime: Option<Runtime>,
	pub session_id: Option<String>,
	pub default_context: Option<Map<String, Value>>,
	pub headers: Option<BTreeMap<String, String>>,
	pub flush_interval_ms: Option<i64>,
	pub batch_size: Option<i64>,
	pub max_queue_size: Option<i64>,
	/// An empty string reverts to the derived default key.
	pub storage_key: Option<String>,
	pub enabled: Option<bool>,
	pub error_reporting: Option<ErrorReportingLayer>,
}

impl TelemetryConfigLayer {
	/// A layer setting only the source identifier.
	pub fn for_source(source: impl Into<String>) -> Self {
		Self {
			source: Some(source.into()),
			..Self::default()
		}
	}

	pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.endpoint = Some(endpoint.into());
		self
	}

	pub fn with_channel(mut self, channel: Channel) -> Self {
		self.channel = Some(channel);
		self
	}

	pub fn with_runtime(mut self, runtime: Runtime) -> Self {
		self.runtime = Some(runtime);
		self
	}

	pub fn with_batch_size(mut self, batch_size: i64) -> Self {
		self.batch_size = Some(batch_size);
		self
	}

	pub fn with_max_queue_size(mut self, max_queue_size: i64) -> Self {
		self.max_queue_size = Some(max_queue_size);
		self
	}

	pub fn with_flush_interval_ms(mut self, flush_interval_ms: i64) -> Self {
		self.flush_interval_ms = Some(flush_interval_ms);
		self
	}

	pub fn with_storage_key(mut self, storage_key: impl Into<String>) -> Self {
		self.storage_key = Some(storage_key.into());
		self
	}

	pub fn with_enabled(mut self, enabled: bool) -> Self {
		self.enabled = Some(enabled);
		self
	}

	pub fn with_error_reporting(mut self, error_reporting: ErrorReportingLayer) -> Self {
		self.error_reporting = Some(error_reporting);
		self
	}

	pub fn merge(&mut self, other: Self) {
		if other.source.is_some() {
			self.source = other.source;
		}
		if other.endpoint.is_some() {
			self.endpoint = other.endpoint;
		}
		if other.channel.is_some() {
			self.channel = other.channel;
		}
		if other.runtime.is_some() {
			self.runtime = other.runtime;
		}
		if other.session_id.is_some() {
			self.session_id = other.session_id;
		}
		if other.default_context.is_some() {
			self.default_context = other.default_context;
		}
		if other.headers.is_some() {
			self.headers = other.headers;
		}
		if other.flush_interval_ms.is_some() {
			self.flush_interval_ms = other.flush_interval_ms;
		}
		if other.batch_size.is_some() {
			self.batch_size = other.batch_size;
		}
		if other.max_queue_size.is_some() {
			self.max_queue_size = other.max_queue_size;
		}
		if other.storage_key.is_some() {
			self.storage_key = other.storage_key;
		}
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		match (&mut self.error_reporting, other.error_reporting) {
			(Some(mine), Some(theirs)) => mine.merge(theirs),
			(mine @ None, Some(theirs)) => *mine = Some(theirs),
			_ => {}
		}
	}
}

/// Resolve `layer` on top of `previous` (or the defaults when there is none).
///
/// Fails only when the resulting source identifier is empty.
pub fn resolve(
	layer: &TelemetryConfigLayer,
	previous: Option<&TelemetryConfig>,
	host: &HostCapabilities,
) -> Result<TelemetryConfig> {
	let source = layer
		.source
		.as_deref()
		.map(str::trim)
		.or_else(|| previous.map(|p| p.source.as_str()))
		.unwrap_or_default()
		.to_string();
	if source.is_empty() {
		return Err(TelemetryError::InvalidConfig(
			"source must be a non-empty string".to_string(),
		));
	}

	let endpoint = match &layer.endpoint {
		Some(e) if e.trim().is_empty() => None,
		Some(e) => Some(e.trim().to_string()),
		None => previous.and_then(|p| p.endpoint.clone()),
	};

	let runtime = layer
		.runtime
		.or_else(|| previous.map(|p| p.runtime))
		.unwrap_or_else(|| host.detect_runtime());
	let (channel, channel_explicit) = match (layer.channel, previous) {
		(Some(channel), _) => (channel, true),
		(None, Some(p)) if p.channel_explicit => (p.channel, true),
		_ => (runtime.default_channel(), false),
	};

	let session_id = match &layer.session_id {
		Some(id) if !id.trim().is_empty() => id.trim().to_string(),
		_ => previous
			.map(|p| p.session_id.clone())
			.unwrap_or_else(|| Uuid::new_v4().to_string()),
	};

	let (storage_key, storage_key_explicit) = match layer.storage_key.as_deref().map(str::trim) {
		Some("") => (default_storage_key(channel, &source), false),
		Some(key) => (key.to_string(), true),
		None => match previous {
			Some(p) if p.storage_key_explicit => (p.storage_key.clone(), true),
			_ => (default_storage_key(channel, &source), false),
		},
	};

	let error_reporting = layer
		.error_reporting
		.clone()
		.unwrap_or_default()
		.resolve(previous.map(|p| &p.error_reporting));

	Ok(TelemetryConfig {
		source,
		endpoint,
		channel,
		channel_explicit,
		runtime,
		session_id,
		default_context: layer
			.default_context
			.clone()
			.or_else(|| previous.map(|p| p.default_context.clone()))
			.unwrap_or_default(),
		headers: layer
			.headers
			.clone()
			.or_else(|| previous.map(|p| p.headers.clone()))
			.unwrap_or_default(),
		flush_interval_ms: coerce(
			layer.flush_interval_ms,
			previous.map_or(DEFAULT_FLUSH_INTERVAL_MS, |p| p.flush_interval_ms),
			MIN_FLUSH_INTERVAL_MS,
		),
		batch_size: coerce(
			layer.batch_size,
			previous.map_or(DEFAULT_BATCH_SIZE, |p| p.batch_size),
			1,
		),
		max_queue_size: coerce(
			layer.max_queue_size,
			previous.map_or(DEFAULT_MAX_QUEUE_SIZE, |p| p.max_queue_size),
			1,
		),
		storage_key,
		storage_key_explicit,
		enabled: layer
			.enabled
			.or_else(|| previous.map(|p| p.enabled))
			.unwrap_or(true),
		error_reporting,
	})
}

/// `loom-telemetry:{channel}:{source}` with the source lowercased and every
/// character outside `[a-z0-9._-]` replaced by `-`.
pub fn default_storage_key(channel: Channel, source: &str) -> String {
	let sanitized: String = source
		.trim()
		.chars()
		.map(|c| {
			if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
				c.to_ascii_lowercase()
			} else {
				'-'
			}
		})
		.collect();
	format!("{STORAGE_KEY_PREFIX}:{channel}:{sanitized}")
}

fn coerce<T>(value: Option<i64>, fallback: T, floor: T) -> T
where
	T: TryFrom<i64> + Ord + Copy,
{
	match value {
		Some(v) if v > 0 => T::try_from(v).map_or(fallback, |v| v.max(floor)),
		_ => fallback,
	}
}
