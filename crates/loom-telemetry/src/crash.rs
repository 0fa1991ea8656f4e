// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error report inputs and the normalization pipeline that turns them into
//! storage-safe [`ErrorDetail`]s.

use std::error::Error as StdError;

use loom_telemetry_core::{
	compute_fingerprint, first_stack_frame, redact, sanitize_context, sanitize_multiline,
	sanitize_single_line, sanitize_tags, truncate, ErrorDetail, Runtime, Severity,
};
use serde_json::{Map, Value};

use crate::config::TelemetryConfig;
use crate::host::HostCapabilities;
use crate::pii::{FieldProtector, PiiTransform};

/// Boundary used when the caller names none.
pub const DEFAULT_BOUNDARY: &str = "global";
/// Message used when nothing usable can be extracted from the input.
pub const UNKNOWN_ERROR: &str = "Unknown error";

const DEFAULT_ERROR_NAME: &str = "Error";
const MAX_NAME_LENGTH: usize = 128;

/// Anything that can be reported as an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorInput {
	/// A native error: type name, display message, and source chain.
	Native {
		name: String,
		message: String,
		stack: Option<String>,
	},
	/// A bare message.
	Message(String),
	/// An error-shaped object with optional `name`, `message`, `stack`, and
	/// `componentStack` fields.
	Structured(Map<String, Value>),
	/// Any other value; stringified.
	Unknown(Value),
}

impl ErrorInput {
	/// Capture a typed error. The name is the error's type name without its
	/// module path.
	pub fn from_error<E: StdError + 'static>(err: &E) -> Self {
		let mut input = Self::from_dyn_error(err);
		if let Self::Native { name, .. } = &mut input {
			*name = short_type_name(std::any::type_name::<E>()).to_string();
		}
		input
	}

	/// Capture a type-erased error. The source chain becomes the stack.
	pub fn from_dyn_error(err: &(dyn StdError + 'static)) -> Self {
		let mut lines = Vec::new();
		let mut source = err.source();
		while let Some(cause) = source {
			lines.push(format!("caused by: {cause}"));
			source = cause.source();
		}
		Self::Native {
			name: DEFAULT_ERROR_NAME.to_string(),
			message: err.to_string(),
			stack: (!lines.is_empty()).then(|| lines.join("\n")),
		}
	}

	fn extract(&self) -> Extracted {
		match self {
			Self::Native {
				name,
				message,
				stack,
			} => Extracted {
				name: name.clone(),
				message: message.clone(),
				stack: stack.clone(),
				component_stack: None,
			},
			Self::Message(message) => Extracted {
				name: DEFAULT_ERROR_NAME.to_string(),
				message: message.clone(),
				stack: None,
				component_stack: None,
			},
			Self::Structured(obj) => {
				let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
				Extracted {
					name: text("name").unwrap_or_else(|| DEFAULT_ERROR_NAME.to_string()),
					message: text("message").unwrap_or_else(|| stringify(&Value::Object(obj.clone()))),
					stack: text("stack"),
					component_stack: text("componentStack"),
				}
			}
			Self::Unknown(value) => Extracted {
				name: DEFAULT_ERROR_NAME.to_string(),
				message: stringify(value),
				stack: None,
				component_stack: None,
			},
		}
	}
}

impl From<&str> for ErrorInput {
	fn from(message: &str) -> Self {
		Self::Message(message.to_string())
	}
}

impl From<String> for ErrorInput {
	fn from(message: String) -> Self {
		Self::Message(message)
	}
}

impl From<Value> for ErrorInput {
	fn from(value: Value) -> Self {
		match value {
			Value::String(s) => Self::Message(s),
			Value::Object(obj) => Self::Structured(obj),
			other => Self::Unknown(other),
		}
	}
}

impl From<&(dyn StdError + 'static)> for ErrorInput {
	fn from(err: &(dyn StdError + 'static)) -> Self {
		Self::from_dyn_error(err)
	}
}

impl From<Box<dyn StdError + Send + Sync>> for ErrorInput {
	fn from(err: Box<dyn StdError + Send + Sync>) -> Self {
		Self::from_dyn_error(err.as_ref())
	}
}

struct Extracted {
	name: String,
	message: String,
	stack: Option<String>,
	component_stack: Option<String>,
}

fn stringify(value: &Value) -> String {
	match value {
		Value::Null => UNKNOWN_ERROR.to_string(),
		Value::String(s) => s.clone(),
		other => serde_json::to_string(other).unwrap_or_else(|_| UNKNOWN_ERROR.to_string()),
	}
}

fn short_type_name(full: &str) -> &str {
	let base = full.split('<').next().unwrap_or(full);
	base.rsplit("::").next().unwrap_or(base)
}

/// An error report with its options.
///
/// ```ignore
/// client.report_error(
///     ErrorReport::new(&err)
///         .boundary("CheckoutForm")
///         .severity(Severity::Fatal)
///         .tag("payments"),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct ErrorReport {
	pub(crate) input: ErrorInput,
	pub(crate) boundary: Option<String>,
	pub(crate) handled: bool,
	pub(crate) severity: Severity,
	pub(crate) tags: Vec<String>,
	pub(crate) context: Map<String, Value>,
	pub(crate) component_stack: Option<String>,
	pub(crate) component: Option<String>,
	pub(crate) action: Option<String>,
	pub(crate) label: Option<String>,
	pub(crate) request_id: Option<String>,
}

impl ErrorReport {
	pub fn new(input: impl Into<ErrorInput>) -> Self {
		Self {
			input: input.into(),
			boundary: None,
			handled: true,
			severity: Severity::Error,
			tags: Vec::new(),
			context: Map::new(),
			component_stack: None,
			component: None,
			action: None,
			label: None,
			request_id: None,
		}
	}

	/// Report a typed error.
	pub fn from_error<E: StdError + 'static>(err: &E) -> Self {
		Self::new(ErrorInput::from_error(err))
	}

	pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
		self.boundary = Some(boundary.into());
		self
	}

	pub fn handled(mut self, handled: bool) -> Self {
		self.handled = handled;
		self
	}

	pub fn severity(mut self, severity: Severity) -> Self {
		self.severity = severity;
		self
	}

	pub fn tag(mut self, tag: impl Into<String>) -> Self {
		self.tags.push(tag.into());
		self
	}

	pub fn tags<I, S>(mut self, tags: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.tags.extend(tags.into_iter().map(Into::into));
		self
	}

	pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.context.insert(key.into(), value.into());
		self
	}

	pub fn context_map(mut self, context: Map<String, Value>) -> Self {
		self.context.extend(context);
		self
	}

	pub fn component_stack(mut self, component_stack: impl Into<String>) -> Self {
		self.component_stack = Some(component_stack.into());
		self
	}

	/// Component recorded on the event; defaults to the boundary.
	pub fn component(mut self, component: impl Into<String>) -> Self {
		self.component = Some(component.into());
		self
	}

	/// Action recorded on the event; defaults to `"error"`.
	pub fn action(mut self, action: impl Into<String>) -> Self {
		self.action = Some(action.into());
		self
	}

	pub fn label(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());
		self
	}

	pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
		self.request_id = Some(request_id.into());
		self
	}
}

/// Output of [`prepare_error`].
#[derive(Debug, Clone)]
pub(crate) struct PreparedError {
	pub detail: ErrorDetail,
	/// Default context overlaid with the report's context, sanitized.
	pub context: Map<String, Value>,
}

/// Normalize a report into a storage-safe detail and context.
pub(crate) fn prepare_error(
	report: &ErrorReport,
	config: &TelemetryConfig,
	host: &HostCapabilities,
	pii: &dyn PiiTransform,
	protector: &dyn FieldProtector,
) -> PreparedError {
	let limits = &config.error_reporting;
	let extracted = report.input.extract();

	let boundary = clean_line(report.boundary.as_deref().unwrap_or(DEFAULT_BOUNDARY), MAX_NAME_LENGTH)
		.unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());
	let name = clean_line(&extracted.name, MAX_NAME_LENGTH)
		.unwrap_or_else(|| DEFAULT_ERROR_NAME.to_string());
	let message = clean_line(&extracted.message, limits.max_message_length)
		.unwrap_or_else(|| UNKNOWN_ERROR.to_string());
	let stack = extracted
		.stack
		.as_deref()
		.and_then(|s| clean_lines(s, limits.max_stack_length));
	let component_stack = report
		.component_stack
		.as_deref()
		.or(extracted.component_stack.as_deref())
		.and_then(|s| clean_lines(s, limits.max_component_stack_length));
	let tags = sanitize_tags(&report.tags, limits.max_tags);

	let fingerprint = compute_fingerprint(
		&boundary,
		&name,
		&message,
		first_stack_frame(stack.as_deref(), &name),
		report.severity,
	);

	let mut merged = config.default_context.clone();
	merged.extend(report.context.clone());
	let sanitized = sanitize_context(&merged, &limits.context_limits());

	let envelope = identity_envelope(config, host, sanitized.identifiers);
	let identity = pii.prepare_for_storage(envelope, protector);

	PreparedError {
		detail: ErrorDetail {
			boundary,
			name,
			message,
			stack,
			component_stack,
			handled: report.handled,
			severity: report.severity,
			tags: (!tags.is_empty()).then_some(tags),
			fingerprint,
			identity: (!identity.is_empty()).then_some(Value::Object(identity)),
		},
		context: sanitized.context,
	}
}

fn identity_envelope(
	config: &TelemetryConfig,
	host: &HostCapabilities,
	identifiers: Vec<String>,
) -> Map<String, Value> {
	let mut envelope = Map::new();
	envelope.insert("sessionId".to_string(), Value::from(config.session_id.clone()));
	envelope.insert("runtime".to_string(), Value::from(config.runtime.to_string()));
	if config.runtime == Runtime::Browser {
		if let Some(device) = host.device.as_ref().and_then(|d| serde_json::to_value(d).ok()) {
			envelope.insert("device".to_string(), device);
		}
	}
	if !identifiers.is_empty() {
		envelope.insert("identifiers".to_string(), Value::from(identifiers));
	}
	envelope
}

/// Sanitize, redact, then cap. Patterns must see the whole value.
fn clean_line(input: &str, max_len: usize) -> Option<String> {
	let cleaned = sanitize_single_line(input, usize::MAX);
	let out = truncate(&redact(&cleaned), max_len);
	(!out.is_empty()).then_some(out)
}

fn clean_lines(input: &str, max_len: usize) -> Option<String> {
	let cleaned = sanitize_multiline(input, usize::MAX);
	let out = truncate(&redact(&cleaned), max_len);
	(!out.is_empty()).then_some(out)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{resolve, ErrorReportingLayer, TelemetryConfigLayer};
	use crate::host::DeviceInfo;
	use crate::pii::{FieldPolicyTransform, Sha256Protector};
	use serde_json::json;
	use std::fmt;

	fn config(layer: TelemetryConfigLayer) -> TelemetryConfig {
		resolve(&layer, None, &HostCapabilities::server()).unwrap()
	}

	fn prepare(report: &ErrorReport) -> PreparedError {
		let config = config(TelemetryConfigLayer::for_source("api"));
		prepare_error(
			report,
			&config,
			&HostCapabilities::server(),
			&FieldPolicyTransform::default(),
			&Sha256Protector::new("salt"),
		)
	}

	#[derive(Debug)]
	struct Inner;

	impl fmt::Display for Inner {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			write!(f, "connection reset")
		}
	}

	impl StdError for Inner {}

	#[derive(Debug)]
	struct SyncFailed(Inner);

	impl fmt::Display for SyncFailed {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			write!(f, "sync failed")
		}
	}

	impl StdError for SyncFailed {
		fn source(&self) -> Option<&(dyn StdError + 'static)> {
			Some(&self.0)
		}
	}

	#[test]
	fn native_error_uses_type_name_and_source_chain() {
		let input = ErrorInput::from_error(&SyncFailed(Inner));
		assert_eq!(
			input,
			ErrorInput::Native {
				name: "SyncFailed".to_string(),
				message: "sync failed".to_string(),
				stack: Some("caused by: connection reset".to_string()),
			}
		);
	}

	#[test]
	fn unknown_values_are_stringified() {
		assert_eq!(ErrorInput::from(json!(42)).extract().message, "42");
		assert_eq!(ErrorInput::from(Value::Null).extract().message, UNKNOWN_ERROR);
		assert_eq!(ErrorInput::from("  ").extract().name, "Error");
	}

	#[test]
	fn structured_input_reads_known_fields() {
		let input = ErrorInput::from(json!({
			"name": "TypeError",
			"message": "x is undefined",
			"stack": "TypeError: x is undefined\n  at render (app.js:1:1)",
			"componentStack": "\n  in Header\n  in App"
		}));
		let prepared = prepare(&ErrorReport::new(input).boundary("Header"));
		let detail = prepared.detail;
		assert_eq!(detail.name, "TypeError");
		assert_eq!(detail.message, "x is undefined");
		assert_eq!(
			detail.stack.as_deref(),
			Some("TypeError: x is undefined\nat render (app.js:1:1)")
		);
		assert_eq!(detail.component_stack.as_deref(), Some("in Header\nin App"));
	}

	#[test]
	fn defaults_and_fallbacks() {
		let detail = prepare(&ErrorReport::new("")).detail;
		assert_eq!(detail.boundary, DEFAULT_BOUNDARY);
		assert_eq!(detail.message, UNKNOWN_ERROR);
		assert!(detail.handled);
		assert_eq!(detail.severity, Severity::Error);
		assert_eq!(detail.tags, None);
	}

	#[test]
	fn message_is_sanitized_redacted_and_capped() {
		let long = format!("user jane@example.com failed\n\t{}", "x".repeat(1_000));
		let detail = prepare(&ErrorReport::new(long)).detail;
		assert!(detail.message.starts_with("user [REDACTED:email] failed x"));
		assert_eq!(detail.message.chars().count(), 500);
		assert!(detail.message.ends_with("..."));
	}

	#[test]
	fn tags_are_deduplicated_and_capped() {
		let layer = TelemetryConfigLayer::for_source("api").with_error_reporting(ErrorReportingLayer {
			max_tags: Some(2),
			..Default::default()
		});
		let report = ErrorReport::new("boom").tags(["a", "a", "b", "c"]);
		let prepared = prepare_error(
			&report,
			&config(layer),
			&HostCapabilities::server(),
			&FieldPolicyTransform::default(),
			&Sha256Protector::default(),
		);
		assert_eq!(prepared.detail.tags, Some(vec!["a".to_string(), "b".to_string()]));
	}

	#[test]
	fn identical_reports_share_fingerprint() {
		let a = prepare(&ErrorReport::new("boom").boundary("App").context("n", 1)).detail;
		let b = prepare(&ErrorReport::new("boom").boundary("App").context("n", 2)).detail;
		let c = prepare(&ErrorReport::new("boom").boundary("App").severity(Severity::Fatal)).detail;
		assert_eq!(a.fingerprint, b.fingerprint);
		assert_ne!(a.fingerprint, c.fingerprint);
	}

	#[test]
	fn sensitive_context_feeds_identity_envelope() {
		let protector = Sha256Protector::new("salt");
		let prepared = prepare(&ErrorReport::new("boom").context("userEmail", "jane@example.com"));

		assert_eq!(prepared.context["userEmail"], "[REDACTED]");
		let identity = prepared.detail.identity.unwrap();
		assert_eq!(identity["runtime"], "server");
		assert_eq!(
			identity["identifiers"],
			json!([protector.hash("jane@example.com")])
		);
		assert!(identity.get("device").is_none());
		assert_ne!(identity["sessionId"], Value::Null);
	}

	#[test]
	fn browser_runtime_includes_device() {
		let host = HostCapabilities::browser(DeviceInfo {
			user_agent: Some("Mozilla/5.0".to_string()),
			..Default::default()
		});
		let config = resolve(&TelemetryConfigLayer::for_source("web"), None, &host).unwrap();
		let prepared = prepare_error(
			&ErrorReport::new("boom"),
			&config,
			&host,
			&FieldPolicyTransform::default(),
			&Sha256Protector::default(),
		);
		let identity = prepared.detail.identity.unwrap();
		assert_eq!(identity["device"]["userAgent"], "Mozilla/5.0");
	}

	#[test]
	fn default_context_is_merged_under_report_context() {
		let mut layer = TelemetryConfigLayer::for_source("api");
		layer.default_context = Some(
			json!({ "release": "1.2.3", "route": "/" })
				.as_object()
				.cloned()
				.unwrap(),
		);
		let prepared = prepare_error(
			&ErrorReport::new("boom").context("route", "/checkout"),
			&config(layer),
			&HostCapabilities::server(),
			&FieldPolicyTransform::default(),
			&Sha256Protector::default(),
		);
		assert_eq!(prepared.context["release"], "1.2.3");
		assert_eq!(prepared.context["route"], "/checkout");
	}
}
