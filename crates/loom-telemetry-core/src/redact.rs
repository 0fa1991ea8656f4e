// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pattern redaction of sensitive values in free text.
//!
//! Matches are replaced with `[REDACTED:<rule-id>]` placeholders. Rules run in a
//! fixed order so that broader patterns (query parameters, bearer tokens) claim
//! their text before narrower ones (JWTs, digit runs) see it.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

struct Rule {
	regex: Regex,
	replacement: &'static str,
}

fn rule(pattern: &str, replacement: &'static str) -> Rule {
	Rule {
		regex: Regex::new(pattern).expect("redaction pattern must compile"),
		replacement,
	}
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
	vec![
		rule(
			r"(?i)([?&;](?:access_token|id_token|refresh_token|token|password|passwd|secret|api_key|apikey|key|auth|code|session|sig|signature)=)[^&#\s]*",
			"${1}[REDACTED:query-param]",
		),
		rule(
			r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]+=*",
			"[REDACTED:bearer]",
		),
		rule(
			r"\beyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+",
			"[REDACTED:jwt]",
		),
		rule(
			r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b",
			"[REDACTED:email]",
		),
		rule(r"\b\d{9,}\b", "[REDACTED:number]"),
	]
});

/// Redact emails, bearer tokens, JWT-shaped triples, long digit runs, and
/// sensitive query-string parameters from `input`.
pub fn redact(input: &str) -> Cow<'_, str> {
	let mut out = Cow::Borrowed(input);
	for rule in RULES.iter() {
		let replaced = match rule.regex.replace_all(&out, rule.replacement) {
			Cow::Borrowed(_) => None,
			Cow::Owned(s) => Some(s),
		};
		if let Some(s) = replaced {
			out = Cow::Owned(s);
		}
	}
	out
}
