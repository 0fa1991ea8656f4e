// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Windowed occurrence summaries for grouped errors.

use serde::{Deserialize, Serialize};

use crate::event::{ErrorDetail, Severity};

/// Snapshot of one fingerprint's occurrences within the aggregation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueReport {
	pub fingerprint: String,
	pub boundary: String,
	/// Occurrences inside the trailing window.
	pub count: usize,
	/// Epoch ms of the oldest occurrence still inside the window.
	pub first_seen: i64,
	/// Epoch ms of the newest occurrence.
	pub last_seen: i64,
	pub severity: Severity,
	/// Representative error for this fingerprint.
	pub sample: ErrorDetail,
}

impl IssueReport {
	/// Ordering used when listing issues: higher count first, then most recent.
	pub fn cmp_by_priority(a: &IssueReport, b: &IssueReport) -> std::cmp::Ordering {
		b.count
			.cmp(&a.count)
			.then_with(|| b.last_seen.cmp(&a.last_seen))
	}
}
