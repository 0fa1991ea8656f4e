// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for telemetry core types.

use thiserror::Error;

/// Errors produced when parsing telemetry core types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
	#[error("invalid channel: {0}")]
	InvalidChannel(String),

	#[error("invalid runtime: {0}")]
	InvalidRuntime(String),

	#[error("invalid event kind: {0}")]
	InvalidEventKind(String),

	#[error("invalid severity: {0}")]
	InvalidSeverity(String),
}

/// Result type for telemetry core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
