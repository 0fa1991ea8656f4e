// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Panic hook integration for automatic crash reporting.

use std::backtrace::Backtrace;
use std::panic::PanicHookInfo;
use std::sync::{Arc, Weak};

use loom_telemetry_core::Severity;

use crate::client::ClientInner;
use crate::crash::{ErrorInput, ErrorReport};

/// Boundary recorded for panics.
pub const PANIC_BOUNDARY: &str = "panic";

/// Install a panic hook that records panics as fatal errors.
///
/// Wraps the existing hook: the panic is queued (and persisted), one batch is
/// offered to the beacon, then the previous hook runs.
pub(crate) fn install_panic_hook(client: Weak<ClientInner>) {
	let previous = std::panic::take_hook();

	std::panic::set_hook(Box::new(move |info| {
		let backtrace = Backtrace::force_capture();
		if let Some(client) = client.upgrade() {
			report_panic(&client, info, &backtrace);
		}
		previous(info);
	}));
}

fn report_panic(client: &Arc<ClientInner>, info: &PanicHookInfo<'_>, backtrace: &Backtrace) {
	// A panic raised while this thread holds one of these locks would deadlock.
	if client.state_locked() {
		eprintln!("Skipping telemetry panic report: client state is locked");
		return;
	}

	let report = ErrorReport::new(panic_input(info, backtrace))
		.boundary(PANIC_BOUNDARY)
		.severity(Severity::Fatal)
		.handled(false);
	if client.report(&report).is_some() {
		client.try_beacon();
	}
}

fn panic_input(info: &PanicHookInfo<'_>, backtrace: &Backtrace) -> ErrorInput {
	let mut stack = Vec::new();
	if let Some(location) = info.location() {
		stack.push(format!(
			"at {}:{}:{}",
			location.file(),
			location.line(),
			location.column()
		));
	}
	stack.push(backtrace.to_string());

	ErrorInput::Native {
		name: "panic".to_string(),
		message: extract_panic_message(info),
		stack: Some(stack.join("\n")),
	}
}

/// Extract the panic message from panic info.
fn extract_panic_message(info: &PanicHookInfo<'_>) -> String {
	if let Some(s) = info.payload().downcast_ref::<&str>() {
		s.to_string()
	} else if let Some(s) = info.payload().downcast_ref::<String>() {
		s.clone()
	} else {
		"Box<dyn Any>".to_string()
	}
}
