// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for Loom client telemetry.
//!
//! This crate holds the data model shared by the telemetry SDK (`loom-telemetry`)
//! and anything that consumes its wire format, plus the pure transforms applied
//! to error reports before they are queued:
//!
//! - [`EventRecord`] / [`ErrorDetail`]: the persisted and transmitted record shape
//! - [`IssueReport`]: a windowed occurrence summary for one error fingerprint
//! - [`sanitize`]: control-character stripping, whitespace collapsing, length caps
//! - [`redact`]: pattern redaction of emails, tokens, and identifiers in free text
//! - [`context`]: bounded, redacted copies of caller-supplied context maps
//! - [`fingerprint`]: the deterministic grouping key for equivalent errors
//!
//! Nothing in here performs I/O or depends on an async runtime.

pub mod context;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod issue;
pub mod redact;
pub mod sanitize;

pub use context::{sanitize_context, ContextLimits, SanitizedContext, REDACTED, TRUNCATED};
pub use error::{CoreError, Result};
pub use event::{Channel, ErrorDetail, EventKind, EventRecord, Runtime, Severity};
pub use fingerprint::{compute_fingerprint, first_stack_frame};
pub use issue::IssueReport;
pub use redact::redact;
pub use sanitize::{sanitize_multiline, sanitize_single_line, sanitize_tags, truncate};
