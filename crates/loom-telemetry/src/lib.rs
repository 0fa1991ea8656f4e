// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client telemetry SDK for Loom.
//!
//! Records interaction events and error reports, keeps them in a persistent
//! queue backed by a synchronous key-value store, and delivers them to a
//! collector in batches.
//!
//! # Features
//!
//! - **Persistent queue**: survives restarts and offline periods; malformed
//!   stored data is filtered on load and the oldest events are dropped when
//!   the queue is full
//! - **Flush scheduling**: periodic timer, immediate flush on a full batch,
//!   at most one delivery in flight, coalesced retries
//! - **Error reporting**: sanitization, pattern redaction, bounded context,
//!   fingerprinting, and threshold notifications per issue
//! - **Lifecycle hooks**: beacon delivery when the host is tearing down
//!
//! # Example
//!
//! ```ignore
//! use loom_telemetry::{ErrorReport, TelemetryClient, TelemetryConfigLayer, TrackEvent};
//!
//! let client = TelemetryClient::new(
//!     TelemetryConfigLayer::for_source("dashboard")
//!         .with_endpoint("https://collect.example.com/v1/events"),
//! )?;
//!
//! client.track(TrackEvent::new("NavBar", "open").label("settings"));
//! client.report_error(ErrorReport::from_error(&err).boundary("SettingsPage"));
//!
//! client.destroy().await;
//! ```

mod client;
pub mod config;
mod crash;
mod error;
mod handlers;
mod helpers;
pub mod host;
mod issues;
mod lifecycle;
mod panic_hook;
pub mod pii;
mod queue;
mod scheduler;
pub mod sources;
pub mod store;
mod transport;

pub use client::{ReportedError, TelemetryClient, TelemetryClientBuilder, TrackEvent};
pub use config::{
	default_storage_key, resolve, ErrorReportingConfig, ErrorReportingLayer, TelemetryConfig,
	TelemetryConfigLayer,
};
pub use crash::{ErrorInput, ErrorReport, DEFAULT_BOUNDARY, UNKNOWN_ERROR};
pub use error::{Result, TelemetryError, TransportError};
pub use handlers::{ErrorHandler, IssueThresholdHandler, LogErrorHandler};
pub use helpers::{backend_builder, backend_client, disabled_client, frontend_builder, frontend_client};
pub use host::{Clock, DeviceInfo, HostCapabilities, SystemClock};
pub use issues::IssueAggregator;
pub use lifecycle::LifecycleSignal;
pub use panic_hook::PANIC_BOUNDARY;
pub use pii::{FieldPolicyTransform, FieldProtector, FieldTreatment, PiiTransform, Sha256Protector};
pub use queue::PersistentQueue;
pub use scheduler::FlushOutcome;
pub use sources::{load_layer, ConfigSource, EnvSource, ExplicitSource, Precedence, TomlSource};
pub use store::{FileStore, KeyValueStore, MemoryStore, NoopStore, StoreError};
pub use transport::{
	is_secure_endpoint, user_agent, BeaconSender, BlockingHttpBeacon, HttpTransport, Transport,
	TransportRequest, WirePayload, SDK_VERSION,
};

pub use loom_telemetry_core::{
	Channel, ErrorDetail, EventKind, EventRecord, IssueReport, Runtime, Severity,
};
