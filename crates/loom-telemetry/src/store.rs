// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Synchronous key-value stores backing the persistent queue.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

/// Errors raised by a [`KeyValueStore`].
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("I/O error: {0}")]
	Io(#[from] io::Error),

	#[error("quota exceeded writing {key}: {size} bytes (max: {max})")]
	QuotaExceeded { key: String, size: usize, max: usize },

	#[error("storage unavailable: {0}")]
	Unavailable(String),
}

/// A synchronous string key-value store supplied by the host.
///
/// Every call may fail; the queue treats failures as non-fatal.
pub trait KeyValueStore: Send + Sync {
	fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
	fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
	fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store. Clones share the same map, so a second client built on a
/// clone sees what the first one persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
	entries: Arc<Mutex<HashMap<String, String>>>,
	max_value_bytes: Option<usize>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// A store that rejects values larger than `max` bytes, mimicking a host
	/// storage quota.
	pub fn with_quota(max: usize) -> Self {
		Self {
			entries: Arc::default(),
			max_value_bytes: Some(max),
		}
	}

	/// Returns true if `key` currently has a value.
	pub fn contains(&self, key: &str) -> bool {
		self.entries.lock().contains_key(key)
	}
}

impl KeyValueStore for MemoryStore {
	fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		Ok(self.entries.lock().get(key).cloned())
	}

	fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
		if let Some(max) = self.max_value_bytes {
			if value.len() > max {
				return Err(StoreError::QuotaExceeded {
					key: key.to_string(),
					size: value.len(),
					max,
				});
			}
		}
		self
			.entries
			.lock()
			.insert(key.to_string(), value.to_string());
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<(), StoreError> {
		self.entries.lock().remove(key);
		Ok(())
	}
}

/// File-backed store: one file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
	dir: PathBuf,
}

impl FileStore {
	/// Creates the directory if needed.
	pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let dir = dir.into();
		fs::create_dir_all(&dir)?;
		Ok(Self { dir })
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, key: &str) -> PathBuf {
		let file_name: String = key
			.chars()
			.map(|c| {
				if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
					c
				} else {
					'_'
				}
			})
			.collect();
		self.dir.join(format!("{file_name}.json"))
	}
}

impl KeyValueStore for FileStore {
	fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		match fs::read_to_string(self.path_for(key)) {
			Ok(content) => Ok(Some(content)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
		let path = self.path_for(key);
		let tmp = path.with_extension("json.tmp");
		fs::write(&tmp, value)?;
		fs::rename(&tmp, &path)?;
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<(), StoreError> {
		match fs::remove_file(self.path_for(key)) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}

/// Store for hosts without persistent storage: reads nothing, writes nowhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStore;

impl KeyValueStore for NoopStore {
	fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
		Ok(None)
	}

	fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
		Ok(())
	}

	fn remove(&self, _key: &str) -> Result<(), StoreError> {
		Ok(())
	}
}
