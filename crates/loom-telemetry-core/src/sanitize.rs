// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Text normalization for values that end up in persisted records.

use std::collections::HashSet;

/// Maximum length of a single tag after sanitization.
pub const MAX_TAG_LENGTH: usize = 64;

const ELLIPSIS: &str = "...";

/// Truncate a string to at most `max_len` characters, ending with an ellipsis
/// when anything was cut. Counts characters, not bytes.
pub fn truncate(s: &str, max_len: usize) -> String {
	if s.chars().count() <= max_len {
		return s.to_string();
	}
	if max_len <= ELLIPSIS.len() {
		return s.chars().take(max_len).collect();
	}
	let mut out: String = s.chars().take(max_len - ELLIPSIS.len()).collect();
	out.push_str(ELLIPSIS);
	out
}

fn strip_controls(line: &str) -> String {
	line
		.chars()
		.map(|c| if c.is_control() { ' ' } else { c })
		.collect()
}

/// Normalize a single-line field: control characters become spaces, runs of
/// whitespace collapse to one space, and the result is trimmed and capped.
pub fn sanitize_single_line(input: &str, max_len: usize) -> String {
	let cleaned = strip_controls(input);
	let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
	truncate(&collapsed, max_len)
}

/// Normalize a multi-line field such as a stack trace: each line is stripped of
/// control characters and trimmed, blank lines are dropped, and the joined
/// result is capped.
pub fn sanitize_multiline(input: &str, max_len: usize) -> String {
	let lines: Vec<String> = input
		.lines()
		.map(|line| strip_controls(line).trim().to_string())
		.filter(|line| !line.is_empty())
		.collect();
	truncate(&lines.join("\n"), max_len)
}

/// Sanitize, deduplicate, and cap a tag list. Order of first occurrence is kept.
pub fn sanitize_tags<I, S>(tags: I, max_tags: usize) -> Vec<String>
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut seen = HashSet::new();
	let mut out = Vec::new();
	for tag in tags {
		if out.len() >= max_tags {
			break;
		}
		let tag = sanitize_single_line(tag.as_ref(), MAX_TAG_LENGTH);
		if tag.is_empty() || !seen.insert(tag.clone()) {
			continue;
		}
		out.push(tag);
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn truncate_short_string() {
		assert_eq!(truncate("hello", 10), "hello");
	}

	#[test]
	fn truncate_long_string() {
		assert_eq!(
			truncate("hello world this is a long string", 15),
			"hello world ..."
		);
	}

	#[test]
	fn truncate_is_char_safe() {
		assert_eq!(truncate("ééééé", 4), "é...");
	}

	#[test]
	fn single_line_collapses_whitespace_and_controls() {
		assert_eq!(
			sanitize_single_line("  Cannot\tread\n\nproperty \u{0007}'x'  ", 100),
			"Cannot read property 'x'"
		);
	}

	#[test]
	fn multiline_drops_blank_lines() {
		let stack = "TypeError: boom\n\n    at handleClick (app.js:10:5)\n   \n    at dispatch (react.js:1:1)\n";
		assert_eq!(
			sanitize_multiline(stack, 1000),
			"TypeError: boom\nat handleClick (app.js:10:5)\nat dispatch (react.js:1:1)"
		);
	}

	#[test]
	fn tags_dedupe_and_cap() {
		let tags = sanitize_tags(["checkout", " checkout ", "", "payments", "beta", "x"], 3);
		assert_eq!(tags, vec!["checkout", "payments", "beta"]);
	}

	proptest! {
		#[test]
		fn single_line_never_exceeds_cap(input in ".{0,400}", cap in 4usize..200) {
			let out = sanitize_single_line(&input, cap);
			prop_assert!(out.chars().count() <= cap);
			prop_assert!(!out.contains('\n'));
		}

		#[test]
		fn multiline_has_no_blank_lines(input in "[a-z \n\t]{0,300}") {
			let out = sanitize_multiline(&input, 1000);
			prop_assert!(out.lines().all(|l| !l.trim().is_empty()));
		}
	}
}
