// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: TOML files and environment variables.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace, warn};

use crate::config::{ErrorReportingLayer, TelemetryConfigLayer};
use crate::error::{Result, TelemetryError};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
	Explicit = 100,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<TelemetryConfigLayer>;
}

/// A fixed layer supplied in code. Overrides files and the environment.
pub struct ExplicitSource(pub TelemetryConfigLayer);

impl ConfigSource for ExplicitSource {
	fn name(&self) -> &'static str {
		"explicit"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Explicit
	}

	fn load(&self) -> Result<TelemetryConfigLayer> {
		Ok(self.0.clone())
	}
}

/// TOML file configuration source. A missing file yields an empty layer.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// `telemetry.toml` in the user's loom config directory, if one exists.
	pub fn user() -> Option<Self> {
		dirs::config_dir().map(|dir| Self::new(dir.join("loom").join("telemetry.toml")))
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<TelemetryConfigLayer> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(TelemetryConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content =
			std::fs::read_to_string(&self.path).map_err(|e| TelemetryError::ConfigFileRead {
				path: self.path.clone(),
				source: e,
			})?;

		let layer: TelemetryConfigLayer =
			toml::from_str(&content).map_err(|e| TelemetryError::ConfigParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed telemetry config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: LOOM_TELEMETRY_<FIELD>. Values that fail to parse are ignored
/// with a warning.
pub struct EnvSource {
	vars: Option<HashMap<String, String>>,
}

impl EnvSource {
	/// Reads the process environment.
	pub fn new() -> Self {
		Self { vars: None }
	}

	/// Reads from a fixed map instead of the process environment.
	pub fn from_vars<I, K, V>(vars: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		Self {
			vars: Some(
				vars
					.into_iter()
					.map(|(k, v)| (k.into(), v.into()))
					.collect(),
			),
		}
	}

	fn var(&self, name: &str) -> Option<String> {
		let value = match &self.vars {
			Some(vars) => vars.get(name).cloned(),
			None => std::env::var(name).ok(),
		};
		value.filter(|s| !s.is_empty())
	}

	fn bool(&self, name: &str) -> Option<bool> {
		self
			.var(name)
			.map(|v| v.eq_ignore_ascii_case("true") || v == "1")
	}

	fn parsed<T: FromStr>(&self, name: &str) -> Option<T> {
		let raw = self.var(name)?;
		match raw.trim().parse() {
			Ok(v) => Some(v),
			Err(_) => {
				warn!(key = name, value = %raw, "ignoring unparseable telemetry setting");
				None
			}
		}
	}

	fn list(&self, name: &str) -> Option<Vec<String>> {
		self.var(name).map(|v| {
			v.split(',')
				.map(|s| s.trim().to_string())
				.filter(|s| !s.is_empty())
				.collect()
		})
	}
}

impl Default for EnvSource {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<TelemetryConfigLayer> {
		debug!("loading telemetry environment variables");
		let error_reporting = ErrorReportingLayer {
			enabled: self.bool("LOOM_TELEMETRY_ERROR_REPORTING_ENABLED"),
			secure_endpoint_only: self.bool("LOOM_TELEMETRY_SECURE_ENDPOINT_ONLY"),
			max_message_length: self.parsed("LOOM_TELEMETRY_MAX_MESSAGE_LENGTH"),
			max_stack_length: self.parsed("LOOM_TELEMETRY_MAX_STACK_LENGTH"),
			max_component_stack_length: self.parsed("LOOM_TELEMETRY_MAX_COMPONENT_STACK_LENGTH"),
			max_tags: self.parsed("LOOM_TELEMETRY_MAX_TAGS"),
			max_context_depth: self.parsed("LOOM_TELEMETRY_MAX_CONTEXT_DEPTH"),
			max_context_keys: self.parsed("LOOM_TELEMETRY_MAX_CONTEXT_KEYS"),
			threshold_count: self.parsed("LOOM_TELEMETRY_THRESHOLD_COUNT"),
			window_ms: self.parsed("LOOM_TELEMETRY_WINDOW_MS"),
			sensitive_keys: self.list("LOOM_TELEMETRY_SENSITIVE_KEYS"),
		};

		Ok(TelemetryConfigLayer {
			source: self.var("LOOM_TELEMETRY_SOURCE"),
			endpoint: self.var("LOOM_TELEMETRY_ENDPOINT"),
			channel: self.parsed("LOOM_TELEMETRY_CHANNEL"),
			runtime: self.parsed("LOOM_TELEMETRY_RUNTIME"),
			session_id: self.var("LOOM_TELEMETRY_SESSION_ID"),
			default_context: None,
			headers: None,
			flush_interval_ms: self.parsed("LOOM_TELEMETRY_FLUSH_INTERVAL_MS"),
			batch_size: self.parsed("LOOM_TELEMETRY_BATCH_SIZE"),
			max_queue_size: self.parsed("LOOM_TELEMETRY_MAX_QUEUE_SIZE"),
			storage_key: self.var("LOOM_TELEMETRY_STORAGE_KEY"),
			enabled: self.bool("LOOM_TELEMETRY_ENABLED"),
			error_reporting: (error_reporting != ErrorReportingLayer::default())
				.then_some(error_reporting),
		})
	}
}

/// Load every source and merge them in precedence order into one layer.
pub fn load_layer(sources: Vec<Box<dyn ConfigSource>>) -> Result<TelemetryConfigLayer> {
	let mut sources = sources;
	sources.sort_by_key(|s| s.precedence());

	let mut merged = TelemetryConfigLayer::default();
	for source in sources {
		trace!(source = source.name(), "merging telemetry config source");
		merged.merge(source.load()?);
	}
	Ok(merged)
}
