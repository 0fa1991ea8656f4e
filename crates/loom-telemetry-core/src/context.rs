// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded, redacted copies of caller-supplied diagnostic context.
//!
//! Context is an owned JSON tree, so a value can never contain itself; shared
//! sub-objects in the caller's data arrive here as independent copies and each
//! branch is sanitized on its own.

use serde_json::{Map, Value};

use crate::redact::redact;
use crate::sanitize::{sanitize_single_line, truncate};

/// Placeholder for values under a sensitive key.
pub const REDACTED: &str = "[REDACTED]";
/// Marker for content cut off by the depth or breadth limits.
pub const TRUNCATED: &str = "[Truncated]";

/// Limits applied while sanitizing a context map.
#[derive(Debug, Clone)]
pub struct ContextLimits {
	/// Deepest nesting level that is still copied; containers below it become
	/// [`TRUNCATED`].
	pub max_depth: usize,
	/// Maximum entries copied from any single object or array.
	pub max_keys: usize,
	/// Maximum length of string leaves.
	pub max_string_length: usize,
	/// Case-insensitive substrings marking a key as sensitive.
	pub sensitive_keys: Vec<String>,
}

impl Default for ContextLimits {
	fn default() -> Self {
		Self {
			max_depth: 4,
			max_keys: 25,
			max_string_length: 500,
			sensitive_keys: ["email", "token", "password", "secret", "authorization"]
				.iter()
				.map(|s| s.to_string())
				.collect(),
		}
	}
}

impl ContextLimits {
	fn is_sensitive(&self, key: &str) -> bool {
		let key = key.to_lowercase();
		self
			.sensitive_keys
			.iter()
			.any(|needle| !needle.is_empty() && key.contains(&needle.to_lowercase()))
	}
}

/// Output of [`sanitize_context`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SanitizedContext {
	pub context: Map<String, Value>,
	/// Raw values found under sensitive keys, in traversal order.
	pub identifiers: Vec<String>,
}

/// Produce a storage-safe copy of `input`.
///
/// Sensitive keys are replaced wholesale with [`REDACTED`] and their original
/// values collected into `identifiers`. String leaves are sanitized and
/// pattern-redacted. Containers nested beyond `max_depth` and entries beyond
/// `max_keys` are replaced by [`TRUNCATED`] markers.
pub fn sanitize_context(input: &Map<String, Value>, limits: &ContextLimits) -> SanitizedContext {
	let mut identifiers = Vec::new();
	let context = sanitize_object(input, 1, limits, &mut identifiers);
	SanitizedContext {
		context,
		identifiers,
	}
}

fn sanitize_object(
	input: &Map<String, Value>,
	depth: usize,
	limits: &ContextLimits,
	identifiers: &mut Vec<String>,
) -> Map<String, Value> {
	let mut out = Map::new();
	for (key, value) in input.iter().take(limits.max_keys) {
		if limits.is_sensitive(key) {
			collect_identifiers(value, identifiers);
			out.insert(key.clone(), Value::String(REDACTED.to_string()));
			continue;
		}
		out.insert(key.clone(), sanitize_value(value, depth, limits, identifiers));
	}
	let omitted = input.len().saturating_sub(limits.max_keys);
	if omitted > 0 {
		out.insert(TRUNCATED.to_string(), Value::from(omitted));
	}
	out
}

fn sanitize_value(
	value: &Value,
	depth: usize,
	limits: &ContextLimits,
	identifiers: &mut Vec<String>,
) -> Value {
	match value {
		Value::String(s) => {
			// Cap after redacting so no pattern is cut in half.
			let cleaned = sanitize_single_line(s, usize::MAX);
			Value::String(truncate(&redact(&cleaned), limits.max_string_length))
		}
		Value::Object(map) => {
			if depth >= limits.max_depth {
				return Value::String(TRUNCATED.to_string());
			}
			Value::Object(sanitize_object(map, depth + 1, limits, identifiers))
		}
		Value::Array(items) => {
			if depth >= limits.max_depth {
				return Value::String(TRUNCATED.to_string());
			}
			let mut out: Vec<Value> = items
				.iter()
				.take(limits.max_keys)
				.map(|item| sanitize_value(item, depth + 1, limits, identifiers))
				.collect();
			if items.len() > limits.max_keys {
				out.push(Value::String(TRUNCATED.to_string()));
			}
			Value::Array(out)
		}
		other => other.clone(),
	}
}

fn collect_identifiers(value: &Value, identifiers: &mut Vec<String>) {
	match value {
		Value::Null => {}
		Value::String(s) => {
			let s = s.trim();
			if !s.is_empty() {
				identifiers.push(s.to_string());
			}
		}
		Value::Array(items) => {
			for item in items {
				collect_identifiers(item, identifiers);
			}
		}
		Value::Object(map) => {
			for item in map.values() {
				collect_identifiers(item, identifiers);
			}
		}
		other => identifiers.push(other.to_string()),
	}
}
