// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory aggregation of error occurrences by fingerprint.

use std::collections::HashMap;

use loom_telemetry_core::{ErrorDetail, IssueReport};

#[derive(Debug, Clone)]
struct Aggregate {
	occurrences: Vec<i64>,
	sample: ErrorDetail,
	last_fired_at: Option<i64>,
}

impl Aggregate {
	fn prune(&mut self, now: i64, window_ms: u64) {
		let cutoff = now.saturating_sub(window_ms as i64);
		self.occurrences.retain(|&t| t >= cutoff);
	}

	fn snapshot(&self, fingerprint: &str) -> Option<IssueReport> {
		let first_seen = *self.occurrences.iter().min()?;
		let last_seen = *self.occurrences.iter().max()?;
		Some(IssueReport {
			fingerprint: fingerprint.to_string(),
			boundary: self.sample.boundary.clone(),
			count: self.occurrences.len(),
			first_seen,
			last_seen,
			severity: self.sample.severity,
			sample: self.sample.clone(),
		})
	}
}

/// Sliding-window occurrence counts per fingerprint, with a cooldown on
/// threshold notifications.
#[derive(Debug, Default)]
pub struct IssueAggregator {
	aggregates: HashMap<String, Aggregate>,
}

impl IssueAggregator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record one occurrence of `detail` at `occurred_at`.
	///
	/// Returns a report when a newly reported error (not `replayed` from
	/// storage) brings the windowed count to `threshold` and no notification
	/// for this fingerprint fired within the last `window_ms`.
	pub fn record(
		&mut self,
		detail: &ErrorDetail,
		occurred_at: i64,
		now: i64,
		window_ms: u64,
		threshold: usize,
		replayed: bool,
	) -> Option<IssueReport> {
		let aggregate = self
			.aggregates
			.entry(detail.fingerprint.clone())
			.or_insert_with(|| Aggregate {
				occurrences: Vec::new(),
				sample: detail.clone(),
				last_fired_at: None,
			});
		aggregate.occurrences.push(occurred_at);
		aggregate.sample = detail.clone();
		self.sweep(now, window_ms);

		let aggregate = self.aggregates.get_mut(&detail.fingerprint)?;
		if replayed || aggregate.occurrences.len() < threshold {
			return None;
		}
		let cooled_down = aggregate
			.last_fired_at
			.map_or(true, |fired| now.saturating_sub(fired) >= window_ms as i64);
		if !cooled_down {
			return None;
		}
		aggregate.last_fired_at = Some(now);
		aggregate.snapshot(&detail.fingerprint)
	}

	/// All non-empty aggregates, pruned to the window, highest count first and
	/// then most recent first.
	pub fn reports(&mut self, now: i64, window_ms: u64) -> Vec<IssueReport> {
		self.sweep(now, window_ms);

		let mut reports: Vec<IssueReport> = self
			.aggregates
			.iter()
			.filter_map(|(fingerprint, a)| a.snapshot(fingerprint))
			.collect();
		reports.sort_by(IssueReport::cmp_by_priority);
		reports
	}

	/// Prune every aggregate to the window and drop the empty ones. An
	/// aggregate with no occurrences left has also cooled down.
	fn sweep(&mut self, now: i64, window_ms: u64) {
		for aggregate in self.aggregates.values_mut() {
			aggregate.prune(now, window_ms);
		}
		self.aggregates.retain(|_, a| !a.occurrences.is_empty());
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use loom_telemetry_core::Severity;

	const WINDOW: u64 = 60_000;

	fn detail(fingerprint: &str) -> ErrorDetail {
		ErrorDetail {
			boundary: "App".to_string(),
			name: "Error".to_string(),
			message: "boom".to_string(),
			stack: None,
			component_stack: None,
			handled: true,
			severity: Severity::Error,
			tags: None,
			fingerprint: fingerprint.to_string(),
			identity: None,
		}
	}

	#[test]
	fn threshold_fires_once_per_window() {
		let mut agg = IssueAggregator::new();
		let d = detail("abc");

		assert!(agg.record(&d, 1_000, 1_000, WINDOW, 3, false).is_none());
		assert!(agg.record(&d, 2_000, 2_000, WINDOW, 3, false).is_none());
		let fired = agg.record(&d, 3_000, 3_000, WINDOW, 3, false).unwrap();
		assert_eq!(fired.count, 3);
		assert_eq!(fired.first_seen, 1_000);
		assert_eq!(fired.last_seen, 3_000);

		assert!(agg.record(&d, 4_000, 4_000, WINDOW, 3, false).is_none());
	}

	#[test]
	fn threshold_fires_again_after_cooldown() {
		let mut agg = IssueAggregator::new();
		let d = detail("abc");
		for t in [0, 1, 2] {
			agg.record(&d, t, t, WINDOW, 3, false);
		}
		let later = WINDOW as i64 + 10;
		for t in [later, later + 1] {
			assert!(agg.record(&d, t, t, WINDOW, 3, false).is_none());
		}
		assert!(agg.record(&d, later + 2, later + 2, WINDOW, 3, false).is_some());
	}

	#[test]
	fn replayed_occurrences_count_but_never_fire() {
		let mut agg = IssueAggregator::new();
		let d = detail("abc");
		for t in 0..5 {
			assert!(agg.record(&d, t, 10, WINDOW, 2, true).is_none());
		}
		assert_eq!(agg.reports(10, WINDOW)[0].count, 5);
		assert!(agg.record(&d, 11, 11, WINDOW, 2, false).is_some());
	}

	#[test]
	fn recording_drops_expired_fingerprints() {
		let mut agg = IssueAggregator::new();
		for i in 0..1_000 {
			let t = i * 600_000;
			agg.record(&detail(&format!("fp-{i}")), t, t, WINDOW, 99, false);
		}
		assert_eq!(agg.aggregates.len(), 1);
		assert!(agg.aggregates.contains_key("fp-999"));
	}

	#[test]
	fn stale_occurrence_is_not_kept() {
		let mut agg = IssueAggregator::new();
		agg.record(&detail("abc"), 0, WINDOW as i64 + 1, WINDOW, 1, true);
		assert!(agg.aggregates.is_empty());
		assert!(agg.record(&detail("abc"), 0, WINDOW as i64 + 1, WINDOW, 1, false).is_none());
	}

	#[test]
	fn reports_prune_and_sort() {
		let mut agg = IssueAggregator::new();
		agg.record(&detail("old"), 0, 0, WINDOW, 99, false);
		agg.record(&detail("one"), 70_000, 70_000, WINDOW, 99, false);
		agg.record(&detail("two"), 65_000, 65_000, WINDOW, 99, false);
		agg.record(&detail("two"), 66_000, 66_000, WINDOW, 99, false);

		let reports = agg.reports(70_000, WINDOW);
		let order: Vec<_> = reports.iter().map(|r| r.fingerprint.as_str()).collect();
		assert_eq!(order, vec!["two", "one"]);
	}
}
