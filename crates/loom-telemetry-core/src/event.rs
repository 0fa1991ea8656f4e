// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event records as queued, persisted, and transmitted by the telemetry SDK.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Logical origin of an event, independent of where the code runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
	Frontend,
	Backend,
}

impl fmt::Display for Channel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Frontend => write!(f, "frontend"),
			Self::Backend => write!(f, "backend"),
		}
	}
}

impl FromStr for Channel {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"frontend" => Ok(Self::Frontend),
			"backend" => Ok(Self::Backend),
			_ => Err(CoreError::InvalidChannel(s.to_string())),
		}
	}
}

/// Execution environment of the reporting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
	Browser,
	Server,
}

impl Runtime {
	/// The channel a client running here reports on unless told otherwise.
	pub fn default_channel(self) -> Channel {
		match self {
			Self::Browser => Channel::Frontend,
			Self::Server => Channel::Backend,
		}
	}
}

impl fmt::Display for Runtime {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Browser => write!(f, "browser"),
			Self::Server => write!(f, "server"),
		}
	}
}

impl FromStr for Runtime {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"browser" => Ok(Self::Browser),
			"server" => Ok(Self::Server),
			_ => Err(CoreError::InvalidRuntime(s.to_string())),
		}
	}
}

/// What an event record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
	Interaction,
	Error,
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Interaction => write!(f, "interaction"),
			Self::Error => write!(f, "error"),
		}
	}
}

impl FromStr for EventKind {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"interaction" => Ok(Self::Interaction),
			"error" => Ok(Self::Error),
			_ => Err(CoreError::InvalidEventKind(s.to_string())),
		}
	}
}

/// Severity of a reported error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
	#[default]
	Error,
	Fatal,
}

impl fmt::Display for Severity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Error => write!(f, "error"),
			Self::Fatal => write!(f, "fatal"),
		}
	}
}

impl FromStr for Severity {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"error" => Ok(Self::Error),
			"fatal" => Ok(Self::Fatal),
			_ => Err(CoreError::InvalidSeverity(s.to_string())),
		}
	}
}

fn default_handled() -> bool {
	true
}

/// Structured, sanitized description of a reported error.
///
/// Every text field has already been sanitized and redacted by the time a
/// detail is constructed; `fingerprint` groups equivalent errors together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
	pub boundary: String,
	pub name: String,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub component_stack: Option<String>,
	#[serde(default = "default_handled")]
	pub handled: bool,
	#[serde(default)]
	pub severity: Severity,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tags: Option<Vec<String>>,
	pub fingerprint: String,
	/// Storage-prepared crash identity envelope.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub identity: Option<Value>,
}

/// A single telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
	pub id: String,
	pub kind: EventKind,
	pub component: String,
	pub action: String,
	pub channel: Channel,
	pub runtime: Runtime,
	pub session_id: String,
	pub source: String,
	/// Milliseconds since the Unix epoch. Queue order, not this value, is
	/// authoritative for ordering.
	pub timestamp: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub label: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub href: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub variant: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub request_id: Option<String>,
	#[serde(default)]
	pub context: Map<String, Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorDetail>,
}

impl EventRecord {
	/// Returns true for records carrying an error detail.
	pub fn is_error(&self) -> bool {
		self.kind == EventKind::Error
	}
}
