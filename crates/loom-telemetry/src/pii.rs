// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Storage preparation for crash identity envelopes.
//!
//! The client never decides how identity fields are protected. It hands the
//! envelope to a [`PiiTransform`] together with a [`FieldProtector`] that
//! supplies the hash and encrypt primitives.

use std::collections::HashMap;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Hash and encrypt primitives supplied by the caller.
pub trait FieldProtector: Send + Sync {
	fn hash(&self, value: &str) -> String;

	/// `None` when encryption is unavailable.
	fn encrypt(&self, _value: &str) -> Option<String> {
		None
	}
}

/// Turns a structured record into a storage-safe one.
pub trait PiiTransform: Send + Sync {
	fn prepare_for_storage(
		&self,
		record: Map<String, Value>,
		protector: &dyn FieldProtector,
	) -> Map<String, Value>;
}

/// How one top-level field is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTreatment {
	Keep,
	Hash,
	/// Encrypted, or dropped when the protector cannot encrypt.
	Encrypt,
	Drop,
}

/// [`PiiTransform`] driven by a declared per-field policy.
#[derive(Debug, Clone)]
pub struct FieldPolicyTransform {
	policies: HashMap<String, FieldTreatment>,
	unlisted: FieldTreatment,
}

impl FieldPolicyTransform {
	/// An empty policy that applies `unlisted` to every field.
	pub fn new(unlisted: FieldTreatment) -> Self {
		Self {
			policies: HashMap::new(),
			unlisted,
		}
	}

	pub fn with_field(mut self, field: impl Into<String>, treatment: FieldTreatment) -> Self {
		self.policies.insert(field.into(), treatment);
		self
	}

	pub fn treatment_for(&self, field: &str) -> FieldTreatment {
		self.policies.get(field).copied().unwrap_or(self.unlisted)
	}
}

impl Default for FieldPolicyTransform {
	/// Policy for crash identity envelopes: session and collected identifiers
	/// hashed, descriptors kept, anything else dropped.
	fn default() -> Self {
		Self::new(FieldTreatment::Drop)
			.with_field("sessionId", FieldTreatment::Hash)
			.with_field("identifiers", FieldTreatment::Hash)
			.with_field("runtime", FieldTreatment::Keep)
			.with_field("device", FieldTreatment::Keep)
	}
}

impl PiiTransform for FieldPolicyTransform {
	fn prepare_for_storage(
		&self,
		record: Map<String, Value>,
		protector: &dyn FieldProtector,
	) -> Map<String, Value> {
		record
			.into_iter()
			.filter_map(|(field, value)| {
				let value = match self.treatment_for(&field) {
					FieldTreatment::Keep => Some(value),
					FieldTreatment::Drop => None,
					FieldTreatment::Hash => Some(map_leaves(value, &|s| Some(protector.hash(s)))),
					FieldTreatment::Encrypt => encrypt_value(value, protector),
				}?;
				Some((field, value))
			})
			.collect()
	}
}

fn encrypt_value(value: Value, protector: &dyn FieldProtector) -> Option<Value> {
	// Probe once so an unavailable cipher drops the whole field.
	protector.encrypt("")?;
	Some(map_leaves(value, &|s| protector.encrypt(s)))
}

/// Apply `f` to every scalar leaf, rendering non-strings as JSON text first.
/// Leaves for which `f` returns `None` become null.
fn map_leaves(value: Value, f: &dyn Fn(&str) -> Option<String>) -> Value {
	match value {
		Value::Null => Value::Null,
		Value::String(s) => f(&s).map_or(Value::Null, Value::String),
		Value::Array(items) => Value::Array(items.into_iter().map(|v| map_leaves(v, f)).collect()),
		Value::Object(map) => Value::Object(
			map
				.into_iter()
				.map(|(k, v)| (k, map_leaves(v, f)))
				.collect(),
		),
		other => f(&other.to_string()).map_or(Value::Null, Value::String),
	}
}

/// Salted SHA-256 hashing, no encryption.
#[derive(Debug, Clone, Default)]
pub struct Sha256Protector {
	salt: String,
}

impl Sha256Protector {
	pub fn new(salt: impl Into<String>) -> Self {
		Self { salt: salt.into() }
	}
}

impl FieldProtector for Sha256Protector {
	fn hash(&self, value: &str) -> String {
		let mut hasher = Sha256::new();
		hasher.update(self.salt.as_bytes());
		hasher.update(value.as_bytes());
		hex::encode(hasher.finalize())
	}
}
