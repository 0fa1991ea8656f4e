// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fingerprinting for grouping equivalent error reports into issues.

use crate::event::Severity;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Find the first stack line that describes a frame rather than repeating the
/// error header (`Name` or `Name: message`). Returns an empty string when the
/// stack has no such line.
pub fn first_stack_frame<'a>(stack: Option<&'a str>, name: &str) -> &'a str {
	let Some(stack) = stack else {
		return "";
	};
	let header_prefix = format!("{name}:");
	stack
		.lines()
		.map(str::trim)
		.find(|line| !line.is_empty() && *line != name && !line.starts_with(&header_prefix))
		.unwrap_or("")
}

/// Compute the fingerprint of an error.
///
/// The fingerprint is a 32-bit FNV-1a hash, rendered as 8 hex characters, of
/// `boundary|name|message|first-stack-line|severity`. It is a grouping key, not
/// a unique identifier: distinct errors can collide.
pub fn compute_fingerprint(
	boundary: &str,
	name: &str,
	message: &str,
	first_stack_line: &str,
	severity: Severity,
) -> String {
	let severity = severity.to_string();
	let mut hash = FNV_OFFSET_BASIS;
	let parts = [boundary, name, message, first_stack_line, severity.as_str()];
	for (i, part) in parts.iter().enumerate() {
		if i > 0 {
			hash ^= u32::from(b'|');
			hash = hash.wrapping_mul(FNV_PRIME);
		}
		for byte in part.as_bytes() {
			hash ^= u32::from(*byte);
			hash = hash.wrapping_mul(FNV_PRIME);
		}
	}
	format!("{hash:08x}")
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn fingerprint_is_short_hex() {
		let fp = compute_fingerprint("App", "TypeError", "boom", "at a (x.js:1:1)", Severity::Error);
		assert_eq!(fp.len(), 8);
		assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn fnv_matches_reference_value() {
		// FNV-1a("a|b|c|d|error")
		let mut hash = FNV_OFFSET_BASIS;
		for byte in b"a|b|c|d|error" {
			hash ^= u32::from(*byte);
			hash = hash.wrapping_mul(FNV_PRIME);
		}
		assert_eq!(
			compute_fingerprint("a", "b", "c", "d", Severity::Error),
			format!("{hash:08x}")
		);
	}

	#[test]
	fn severity_changes_fingerprint() {
		let a = compute_fingerprint("App", "Error", "boom", "", Severity::Error);
		let b = compute_fingerprint("App", "Error", "boom", "", Severity::Fatal);
		assert_ne!(a, b);
	}

	#[test]
	fn boundary_changes_fingerprint() {
		let a = compute_fingerprint("Header", "Error", "boom", "", Severity::Error);
		let b = compute_fingerprint("Footer", "Error", "boom", "", Severity::Error);
		assert_ne!(a, b);
	}

	#[test]
	fn first_frame_skips_header_line() {
		let stack = "TypeError: Cannot read property 'x'\nat handleClick (app.js:10:5)\nat dispatch (react.js:1:1)";
		assert_eq!(
			first_stack_frame(Some(stack), "TypeError"),
			"at handleClick (app.js:10:5)"
		);
	}

	#[test]
	fn first_frame_without_header() {
		let stack = "at main (index.js:1:1)";
		assert_eq!(first_stack_frame(Some(stack), "Error"), "at main (index.js:1:1)");
	}

	#[test]
	fn first_frame_of_missing_stack_is_empty() {
		assert_eq!(first_stack_frame(None, "Error"), "");
		assert_eq!(first_stack_frame(Some("Error"), "Error"), "");
	}

	proptest! {
		#[test]
		fn identical_inputs_fingerprint_identically(
			boundary in "[A-Za-z]{1,20}",
			name in "[A-Za-z]{1,20}",
			message in ".{0,80}",
			frame in ".{0,80}",
		) {
			let a = compute_fingerprint(&boundary, &name, &message, &frame, Severity::Error);
			let b = compute_fingerprint(&boundary, &name, &message, &frame, Severity::Error);
			prop_assert_eq!(a, b);
		}
	}
}
