// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The persistent event queue.
//!
//! The in-memory queue is authoritative. Every mutation rewrites the whole
//! snapshot under the storage key; store failures are logged and ignored.

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use std::sync::Arc;

use loom_telemetry_core::{Channel, ErrorDetail, EventKind, EventRecord, Runtime};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::store::KeyValueStore;

/// Ordered, bounded queue of records mirrored into a [`KeyValueStore`].
pub struct PersistentQueue {
	store: Arc<dyn KeyValueStore>,
	key: String,
	records: VecDeque<EventRecord>,
}

impl PersistentQueue {
	/// Load the snapshot stored under `key`.
	///
	/// Unparseable snapshots yield an empty queue. Entries failing structural
	/// validation are dropped; legacy entries without `channel`, `runtime` or
	/// `kind` get the supplied defaults.
	pub fn load(
		store: Arc<dyn KeyValueStore>,
		key: impl Into<String>,
		max_size: usize,
		channel: Channel,
		runtime: Runtime,
	) -> Self {
		let key = key.into();
		let records = match store.get(&key) {
			Ok(Some(raw)) => parse_snapshot(&raw, channel, runtime),
			Ok(None) => VecDeque::new(),
			Err(e) => {
				debug!(key = %key, error = %e, "failed to read telemetry queue");
				VecDeque::new()
			}
		};

		let mut queue = Self {
			store,
			key,
			records,
		};
		if queue.records.len() > max_size {
			queue.trim(max_size);
		}
		debug!(key = %queue.key, count = queue.records.len(), "loaded telemetry queue");
		queue
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
		self.records.iter()
	}

	/// Append a record, dropping the oldest ones beyond `max_size`.
	pub fn push(&mut self, record: EventRecord, max_size: usize) {
		self.records.push_back(record);
		self.evict_overflow(max_size);
		self.persist();
	}

	/// Clone up to `n` records from the head of the queue.
	pub fn peek(&self, n: usize) -> Vec<EventRecord> {
		self.records.iter().take(n).cloned().collect()
	}

	/// Remove delivered records by id. Returns how many were removed.
	pub fn remove_delivered(&mut self, ids: &HashSet<String>) -> usize {
		let before = self.records.len();
		self.records.retain(|r| !ids.contains(&r.id));
		let removed = before - self.records.len();
		if removed > 0 {
			self.persist();
		}
		removed
	}

	/// Drop the oldest records until at most `max_size` remain.
	pub fn trim(&mut self, max_size: usize) {
		if self.records.len() > max_size {
			self.evict_overflow(max_size);
			self.persist();
		}
	}

	/// Move the queue to a new storage key, clearing the old one.
	pub fn migrate(&mut self, new_key: impl Into<String>) {
		let new_key = new_key.into();
		if new_key == self.key {
			return;
		}
		if let Err(e) = self.store.remove(&self.key) {
			debug!(key = %self.key, error = %e, "failed to clear old telemetry queue key");
		}
		debug!(from = %self.key, to = %new_key, "migrating telemetry queue");
		self.key = new_key;
		self.persist();
	}

	fn evict_overflow(&mut self, max_size: usize) {
		while self.records.len() > max_size {
			if let Some(dropped) = self.records.pop_front() {
				warn!(
					id = %dropped.id,
					kind = %dropped.kind,
					component = %dropped.component,
					"Dropped telemetry event due to queue overflow"
				);
			}
		}
	}

	fn persist(&self) {
		let result = if self.records.is_empty() {
			self.store.remove(&self.key)
		} else {
			match serde_json::to_string(&self.records) {
				Ok(raw) => self.store.set(&self.key, &raw),
				Err(e) => {
					debug!(error = %e, "failed to serialize telemetry queue");
					return;
				}
			}
		};
		if let Err(e) = result {
			debug!(key = %self.key, error = %e, "failed to persist telemetry queue");
		}
	}
}

fn parse_snapshot(raw: &str, channel: Channel, runtime: Runtime) -> VecDeque<EventRecord> {
	let entries = match serde_json::from_str::<Value>(raw) {
		Ok(Value::Array(entries)) => entries,
		Ok(_) => {
			debug!("stored telemetry queue is not an array, discarding");
			return VecDeque::new();
		}
		Err(e) => {
			debug!(error = %e, "stored telemetry queue is not valid JSON, discarding");
			return VecDeque::new();
		}
	};

	let total = entries.len();
	let records: VecDeque<EventRecord> = entries
		.iter()
		.filter_map(|entry| normalize_entry(entry, channel, runtime))
		.collect();
	if records.len() < total {
		debug!(
			dropped = total - records.len(),
			"discarded malformed telemetry queue entries"
		);
	}
	records
}

/// Validate one persisted entry and fill legacy defaults.
pub(crate) fn normalize_entry(
	entry: &Value,
	channel: Channel,
	runtime: Runtime,
) -> Option<EventRecord> {
	let obj = entry.as_object()?;

	let id = required_str(obj, "id")?;
	if id.trim().is_empty() {
		return None;
	}
	let component = required_str(obj, "component")?;
	let action = required_str(obj, "action")?;
	let session_id = required_str(obj, "sessionId")?;
	let source = required_str(obj, "source")?;
	let timestamp = obj.get("timestamp")?.as_f64().filter(|t| t.is_finite())? as i64;

	let error = obj
		.get("error")
		.filter(|e| e.is_object())
		.map(|e| serde_json::from_value::<ErrorDetail>(e.clone()).ok());
	let kind = match obj.get("kind").and_then(Value::as_str) {
		Some(kind) => EventKind::from_str(kind).ok()?,
		None if error.is_some() => EventKind::Error,
		None => EventKind::Interaction,
	};
	let error = match kind {
		EventKind::Error => Some(error.flatten()?),
		EventKind::Interaction => error.flatten(),
	};

	Some(EventRecord {
		id: id.to_string(),
		kind,
		component: component.to_string(),
		action: action.to_string(),
		channel: parse_or(obj, "channel", channel),
		runtime: parse_or(obj, "runtime", runtime),
		session_id: session_id.to_string(),
		source: source.to_string(),
		timestamp,
		label: optional_str(obj, "label"),
		href: optional_str(obj, "href"),
		variant: optional_str(obj, "variant"),
		request_id: optional_str(obj, "requestId"),
		context: obj
			.get("context")
			.and_then(Value::as_object)
			.cloned()
			.unwrap_or_default(),
		error,
	})
}

fn required_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
	obj.get(key)?.as_str()
}

fn optional_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
	obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_or<T: FromStr>(obj: &Map<String, Value>, key: &str, default: T) -> T {
	obj
		.get(key)
		.and_then(Value::as_str)
		.and_then(|v| v.parse().ok())
		.unwrap_or(default)
}
