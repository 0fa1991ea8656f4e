// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The telemetry client: tracking, error reporting, and configuration updates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use loom_telemetry_core::{sanitize_single_line, Channel, EventKind, EventRecord, IssueReport};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{resolve, TelemetryConfig, TelemetryConfigLayer};
use crate::crash::{prepare_error, ErrorReport};
use crate::error::{Result, TelemetryError};
use crate::handlers::{ErrorHandler, IssueThresholdHandler, LogErrorHandler};
use crate::host::{Clock, HostCapabilities, SystemClock};
use crate::issues::IssueAggregator;
use crate::lifecycle::{LifecycleHooks, LifecycleSignal};
use crate::pii::{FieldPolicyTransform, FieldProtector, PiiTransform, Sha256Protector};
use crate::queue::PersistentQueue;
use crate::scheduler::{FlushOutcome, FlushState};
use crate::store::{KeyValueStore, MemoryStore, NoopStore};
use crate::transport::{is_secure_endpoint, BeaconSender, BlockingHttpBeacon, HttpTransport, Transport};

const MAX_IDENTIFIER_LENGTH: usize = 128;
const DEFAULT_ERROR_ACTION: &str = "error";

/// An interaction to track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackEvent {
	pub component: String,
	pub action: String,
	pub label: Option<String>,
	pub href: Option<String>,
	pub variant: Option<String>,
	pub request_id: Option<String>,
	/// Overlaid on the configured default context.
	pub context: Map<String, Value>,
	/// Overrides the configured channel for this event.
	pub channel: Option<Channel>,
}

impl TrackEvent {
	pub fn new(component: impl Into<String>, action: impl Into<String>) -> Self {
		Self {
			component: component.into(),
			action: action.into(),
			label: None,
			href: None,
			variant: None,
			request_id: None,
			context: Map::new(),
			channel: None,
		}
	}

	pub fn label(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());
		self
	}

	pub fn href(mut self, href: impl Into<String>) -> Self {
		self.href = Some(href.into());
		self
	}

	pub fn variant(mut self, variant: impl Into<String>) -> Self {
		self.variant = Some(variant.into());
		self
	}

	pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
		self.request_id = Some(request_id.into());
		self
	}

	pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.context.insert(key.into(), value.into());
		self
	}

	pub fn channel(mut self, channel: Channel) -> Self {
		self.channel = Some(channel);
		self
	}
}

/// What [`TelemetryClient::report_error`] recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedError {
	/// Id of the queued record; `None` when the configured endpoint failed the
	/// secure-endpoint check and the report was only aggregated locally.
	pub record_id: Option<String>,
	pub fingerprint: String,
}

/// Builder for constructing a [`TelemetryClient`].
pub struct TelemetryClientBuilder {
	layer: TelemetryConfigLayer,
	host: HostCapabilities,
	store: Option<Arc<dyn KeyValueStore>>,
	transport: Option<Arc<dyn Transport>>,
	beacon: Option<Arc<dyn BeaconSender>>,
	error_handler: Option<Arc<dyn ErrorHandler>>,
	threshold_handler: Option<Arc<dyn IssueThresholdHandler>>,
	pii: Option<Arc<dyn PiiTransform>>,
	protector: Option<Arc<dyn FieldProtector>>,
	clock: Option<Arc<dyn Clock>>,
}

impl TelemetryClientBuilder {
	pub fn new(layer: TelemetryConfigLayer) -> Self {
		Self {
			layer,
			host: HostCapabilities::default(),
			store: None,
			transport: None,
			beacon: None,
			error_handler: None,
			threshold_handler: None,
			pii: None,
			protector: None,
			clock: None,
		}
	}

	/// Sets the host capabilities. Defaults to [`HostCapabilities::server`].
	pub fn host(mut self, host: HostCapabilities) -> Self {
		self.host = host;
		self
	}

	/// Sets the key-value store. Defaults to a [`MemoryStore`], or a
	/// [`NoopStore`] when the host has no storage.
	pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
		self.store = Some(store);
		self
	}

	/// Sets the transport. Defaults to [`HttpTransport`].
	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Sets the beacon. Defaults to [`BlockingHttpBeacon`] when the host has one.
	pub fn beacon(mut self, beacon: Arc<dyn BeaconSender>) -> Self {
		self.beacon = Some(beacon);
		self
	}

	pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
		self.error_handler = Some(handler);
		self
	}

	pub fn threshold_handler(mut self, handler: Arc<dyn IssueThresholdHandler>) -> Self {
		self.threshold_handler = Some(handler);
		self
	}

	/// Sets the storage-prep transform for crash identity envelopes.
	pub fn pii_transform(mut self, pii: Arc<dyn PiiTransform>) -> Self {
		self.pii = Some(pii);
		self
	}

	pub fn field_protector(mut self, protector: Arc<dyn FieldProtector>) -> Self {
		self.protector = Some(protector);
		self
	}

	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);
		self
	}

	/// Builds the client.
	///
	/// Loads the persisted queue, replays stored errors into issue aggregation,
	/// and starts the flush timer when a tokio runtime is available.
	pub fn build(self) -> Result<TelemetryClient> {
		let config = resolve(&self.layer, None, &self.host)?;

		let store = self.store.unwrap_or_else(|| -> Arc<dyn KeyValueStore> {
			if self.host.has_storage {
				Arc::new(MemoryStore::new())
			} else {
				Arc::new(NoopStore)
			}
		});
		let transport: Arc<dyn Transport> = match self.transport {
			Some(transport) => transport,
			None => Arc::new(HttpTransport::new()?),
		};
		let beacon = self.beacon.or_else(|| -> Option<Arc<dyn BeaconSender>> {
			self
				.host
				.has_beacon
				.then(|| Arc::new(BlockingHttpBeacon::new()) as Arc<dyn BeaconSender>)
		});
		let protector = self
			.protector
			.unwrap_or_else(|| Arc::new(Sha256Protector::new(config.source.clone())));

		let queue = PersistentQueue::load(
			store,
			config.storage_key.clone(),
			config.max_queue_size,
			config.channel,
			config.runtime,
		);

		info!(
			source = %config.source,
			channel = %config.channel,
			runtime = %config.runtime,
			queued = queue.len(),
			"Telemetry client initialized"
		);

		let inner = Arc::new(ClientInner {
			config: Mutex::new(Arc::new(config)),
			host: self.host,
			queue: Mutex::new(queue),
			flush_state: Mutex::new(FlushState::default()),
			issues: Mutex::new(IssueAggregator::new()),
			transport,
			beacon,
			error_handler: self.error_handler.unwrap_or_else(|| Arc::new(LogErrorHandler)),
			threshold_handler: self.threshold_handler,
			pii: self.pii.unwrap_or_else(|| Arc::new(FieldPolicyTransform::default())),
			protector,
			clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
			destroyed: AtomicBool::new(false),
			hooks: LifecycleHooks::attached(),
			timer: Mutex::new(None),
		});

		inner.replay_persisted_errors();
		inner.restart_timer();

		Ok(TelemetryClient { inner })
	}
}

/// Shared state behind a [`TelemetryClient`].
pub(crate) struct ClientInner {
	config: Mutex<Arc<TelemetryConfig>>,
	pub(crate) host: HostCapabilities,
	pub(crate) queue: Mutex<PersistentQueue>,
	pub(crate) flush_state: Mutex<FlushState>,
	pub(crate) issues: Mutex<IssueAggregator>,
	pub(crate) transport: Arc<dyn Transport>,
	pub(crate) beacon: Option<Arc<dyn BeaconSender>>,
	error_handler: Arc<dyn ErrorHandler>,
	threshold_handler: Option<Arc<dyn IssueThresholdHandler>>,
	pii: Arc<dyn PiiTransform>,
	protector: Arc<dyn FieldProtector>,
	pub(crate) clock: Arc<dyn Clock>,
	destroyed: AtomicBool,
	pub(crate) hooks: LifecycleHooks,
	pub(crate) timer: Mutex<Option<JoinHandle<()>>>,
}

impl ClientInner {
	pub(crate) fn config(&self) -> Arc<TelemetryConfig> {
		self.config.lock().clone()
	}

	pub(crate) fn is_destroyed(&self) -> bool {
		self.destroyed.load(Ordering::SeqCst)
	}

	/// True if any client lock is currently held.
	pub(crate) fn state_locked(&self) -> bool {
		self.config.is_locked()
			|| self.queue.is_locked()
			|| self.issues.is_locked()
			|| self.flush_state.is_locked()
	}

	pub(crate) fn notify(&self, error: &TelemetryError) {
		self.error_handler.on_error(error);
	}

	/// Append a record and ask for a flush once a full batch is waiting.
	fn enqueue(self: &Arc<Self>, record: EventRecord, config: &TelemetryConfig) {
		let len = {
			let mut queue = self.queue.lock();
			queue.push(record, config.max_queue_size);
			queue.len()
		};
		if len >= config.batch_size {
			self.request_flush();
		}
	}

	fn replay_persisted_errors(&self) {
		let config = self.config();
		let now = self.clock.now_ms();
		let er = &config.error_reporting;
		let queue = self.queue.lock();
		let mut issues = self.issues.lock();
		let mut replayed = 0;
		for record in queue.iter() {
			if let Some(detail) = record.error.as_ref() {
				issues.record(detail, record.timestamp, now, er.window_ms, er.threshold_count, true);
				replayed += 1;
			}
		}
		if replayed > 0 {
			debug!(count = replayed, "Replayed persisted error reports");
		}
	}

	/// Record a report. Used by the public API and the panic hook.
	pub(crate) fn report(self: &Arc<Self>, report: &ErrorReport) -> Option<ReportedError> {
		if self.is_destroyed() {
			return None;
		}
		let config = self.config();
		if !config.enabled || !config.error_reporting.enabled {
			return None;
		}

		let prepared = prepare_error(
			report,
			&config,
			&self.host,
			self.pii.as_ref(),
			self.protector.as_ref(),
		);
		let detail = prepared.detail;
		let now = self.clock.now_ms();
		let fingerprint = detail.fingerprint.clone();

		let deliverable = !config.error_reporting.secure_endpoint_only
			|| config.endpoint.as_deref().map_or(true, is_secure_endpoint);
		let record_id = if deliverable {
			let id = Uuid::now_v7().to_string();
			let record = EventRecord {
				id: id.clone(),
				kind: EventKind::Error,
				component: report
					.component
					.as_deref()
					.map(|c| sanitize_single_line(c, MAX_IDENTIFIER_LENGTH))
					.filter(|c| !c.is_empty())
					.unwrap_or_else(|| detail.boundary.clone()),
				action: report
					.action
					.as_deref()
					.map(|a| sanitize_single_line(a, MAX_IDENTIFIER_LENGTH))
					.filter(|a| !a.is_empty())
					.unwrap_or_else(|| DEFAULT_ERROR_ACTION.to_string()),
				channel: config.channel,
				runtime: config.runtime,
				session_id: config.session_id.clone(),
				source: config.source.clone(),
				timestamp: now,
				label: report.label.clone(),
				href: None,
				variant: None,
				request_id: report.request_id.clone(),
				context: prepared.context,
				error: Some(detail.clone()),
			};
			self.enqueue(record, &config);
			Some(id)
		} else {
			let endpoint = config.endpoint.clone().unwrap_or_default();
			debug!(endpoint = %endpoint, "Withholding error report from insecure endpoint");
			self.notify(&TelemetryError::InsecureEndpoint { endpoint });
			None
		};

		let er = &config.error_reporting;
		let fired = self
			.issues
			.lock()
			.record(&detail, now, now, er.window_ms, er.threshold_count, false);
		if let Some(issue) = fired {
			info!(
				fingerprint = %issue.fingerprint,
				count = issue.count,
				"Error threshold reached"
			);
			if let Some(handler) = &self.threshold_handler {
				handler.on_threshold(&issue);
			}
		}

		Some(ReportedError {
			record_id,
			fingerprint,
		})
	}
}

impl Drop for ClientInner {
	fn drop(&mut self) {
		if let Some(handle) = self.timer.get_mut().take() {
			handle.abort();
		}
	}
}

/// Client for tracking interactions and reporting errors.
///
/// Cheap to clone; clones share the same queue and configuration.
///
/// # Example
///
/// ```ignore
/// use loom_telemetry::{TelemetryClient, TelemetryConfigLayer, TrackEvent, ErrorReport};
///
/// let client = TelemetryClient::builder(
///     TelemetryConfigLayer::for_source("dashboard")
///         .with_endpoint("https://collect.example.com/v1/events"),
/// )
/// .build()?;
///
/// client.track(TrackEvent::new("CheckoutButton", "click").label("Pay now"));
/// client.report_error(ErrorReport::new("payment declined").boundary("Checkout"));
///
/// client.flush().await;
/// client.destroy().await;
/// ```
#[derive(Clone)]
pub struct TelemetryClient {
	pub(crate) inner: Arc<ClientInner>,
}

impl TelemetryClient {
	/// Creates a new builder for constructing a TelemetryClient.
	pub fn builder(layer: TelemetryConfigLayer) -> TelemetryClientBuilder {
		TelemetryClientBuilder::new(layer)
	}

	/// Builds a client with default capabilities.
	pub fn new(layer: TelemetryConfigLayer) -> Result<Self> {
		Self::builder(layer).build()
	}

	/// Tracks an interaction. Returns the record id, or `None` when the client
	/// is disabled or destroyed or the event has no component or action.
	pub fn track(&self, event: TrackEvent) -> Option<String> {
		if self.inner.is_destroyed() {
			return None;
		}
		let config = self.inner.config();
		if !config.enabled {
			return None;
		}

		let component = sanitize_single_line(&event.component, MAX_IDENTIFIER_LENGTH);
		let action = sanitize_single_line(&event.action, MAX_IDENTIFIER_LENGTH);
		if component.is_empty() || action.is_empty() {
			debug!("Ignoring telemetry event without component or action");
			return None;
		}

		let mut context = config.default_context.clone();
		context.extend(event.context);

		let id = Uuid::now_v7().to_string();
		let record = EventRecord {
			id: id.clone(),
			kind: EventKind::Interaction,
			component,
			action,
			channel: event.channel.unwrap_or(config.channel),
			runtime: config.runtime,
			session_id: config.session_id.clone(),
			source: config.source.clone(),
			timestamp: self.inner.clock.now_ms(),
			label: event.label,
			href: event.href,
			variant: event.variant,
			request_id: event.request_id,
			context,
			error: None,
		};
		self.inner.enqueue(record, &config);
		Some(id)
	}

	/// Tracks an interaction on the frontend channel.
	pub fn track_frontend(&self, event: TrackEvent) -> Option<String> {
		self.track(event.channel(Channel::Frontend))
	}

	/// Tracks an interaction on the backend channel.
	pub fn track_backend(&self, event: TrackEvent) -> Option<String> {
		self.track(event.channel(Channel::Backend))
	}

	/// Reports an error.
	///
	/// Returns `None` when error reporting is off or the client is disabled or
	/// destroyed. When the endpoint fails the secure-endpoint check, the error
	/// still counts toward issue aggregation but is not queued for delivery.
	pub fn report_error(&self, report: ErrorReport) -> Option<ReportedError> {
		self.inner.report(&report)
	}

	/// Current issue summaries, highest count first.
	pub fn issue_reports(&self) -> Vec<IssueReport> {
		if self.inner.is_destroyed() {
			return Vec::new();
		}
		let window_ms = self.inner.config().error_reporting.window_ms;
		let now = self.inner.clock.now_ms();
		self.inner.issues.lock().reports(now, window_ms)
	}

	/// Delivers queued records now.
	pub async fn flush(&self) -> FlushOutcome {
		self.inner.run_flush(false).await
	}

	/// Applies a partial configuration update.
	///
	/// Fails only when the update would leave the source empty. Moving to a new
	/// storage key migrates the queue; shrinking the queue cap trims it.
	pub fn update_config(&self, layer: TelemetryConfigLayer) -> Result<()> {
		if self.inner.is_destroyed() {
			return Ok(());
		}
		let previous = self.inner.config();
		let next = Arc::new(resolve(&layer, Some(&previous), &self.inner.host)?);
		*self.inner.config.lock() = Arc::clone(&next);

		{
			let mut queue = self.inner.queue.lock();
			if next.storage_key != previous.storage_key {
				queue.migrate(next.storage_key.clone());
			}
			if next.max_queue_size < previous.max_queue_size {
				queue.trim(next.max_queue_size);
			}
		}

		if next.flush_interval_ms != previous.flush_interval_ms || next.enabled != previous.enabled {
			self.inner.restart_timer();
		}
		debug!(source = %next.source, "Telemetry config updated");
		Ok(())
	}

	/// The current configuration snapshot.
	pub fn config(&self) -> Arc<TelemetryConfig> {
		self.inner.config()
	}

	/// Number of records waiting for delivery.
	pub fn queue_len(&self) -> usize {
		self.inner.queue.lock().len()
	}

	pub fn is_destroyed(&self) -> bool {
		self.inner.is_destroyed()
	}

	/// Delivers a host teardown signal. Returns true if a batch was handed to
	/// the beacon.
	pub fn handle_lifecycle(&self, signal: LifecycleSignal) -> bool {
		self.inner.handle_lifecycle(signal)
	}

	/// Reports panics as fatal, unhandled errors before running the previous
	/// panic hook.
	pub fn install_panic_hook(&self) {
		crate::panic_hook::install_panic_hook(Arc::downgrade(&self.inner));
	}

	/// Destroys the client when the process receives Ctrl-C. Returns `None`
	/// outside a tokio runtime.
	pub fn spawn_shutdown_listener(&self) -> Option<JoinHandle<()>> {
		let handle = Handle::try_current().ok()?;
		let weak = Arc::downgrade(&self.inner);
		Some(handle.spawn(async move {
			if let Err(e) = tokio::signal::ctrl_c().await {
				warn!(error = %e, "Failed to listen for shutdown signal");
				return;
			}
			if let Some(inner) = weak.upgrade() {
				info!("Shutdown signal received, flushing telemetry");
				TelemetryClient { inner }.destroy().await;
			}
		}))
	}

	/// Stops the timer, detaches lifecycle hooks, and makes one final delivery
	/// attempt. Every later call is a no-op.
	pub async fn destroy(&self) {
		if self.inner.destroyed.swap(true, Ordering::SeqCst) {
			return;
		}
		self.inner.stop_timer();
		self.inner.hooks.detach();
		info!(queued = self.queue_len(), "Destroying telemetry client");
		self.inner.run_flush(true).await;
	}
}

impl std::fmt::Debug for TelemetryClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let config = self.inner.config();
		f.debug_struct("TelemetryClient")
			.field("source", &config.source)
			.field("channel", &config.channel)
			.field("runtime", &config.runtime)
			.field("destroyed", &self.inner.is_destroyed())
			.finish()
	}
}
