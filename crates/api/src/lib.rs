//! labsync control-plane façade.
//!
//! This crate defines the traits the synchronization engine depends on: a
//! [`ControlPlane`] serving snapshots and change channels, and a [`Notifier`]
//! rendering user-facing alerts. Implementations live elsewhere (kube adapter,
//! UI layer); an in-memory mock is provided for tests.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

pub use labsync_core::{ResourceKind, ResourceList, WireEvent};

/// Scope of one live collection: a kind, an optional namespace and an opaque
/// label selector forwarded as-is to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Selector {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
}

impl Selector {
    pub fn new(kind: ResourceKind) -> Self { Self { kind, namespace: None, label_selector: None } }

    pub fn in_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    pub fn with_labels(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ns={}", self.kind, self.namespace.as_deref().unwrap_or("(all)"))?;
        if let Some(l) = &self.label_selector {
            write!(f, " labels={}", l)?;
        }
        Ok(())
    }
}

/// API errors suitable for transport over RPC.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ApiError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Failure reported in-band by a change channel. The channel is unusable afterwards.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The server can no longer resume from our position (HTTP 410).
    #[error("gone: {0}")]
    Gone(String),
    #[error("transport: {0}")]
    Transport(String),
}

pub type ChannelMessage = Result<WireEvent, ChannelError>;

// ----------------- Streaming primitives -----------------

/// Cancellation handle that aborts the task feeding a channel.
#[derive(Debug, Default)]
pub struct CancelHandle { task: Option<tokio::task::JoinHandle<()>> }

impl CancelHandle {
    pub fn new(task: tokio::task::JoinHandle<()>) -> Self { Self { task: Some(task) } }
    pub fn noop() -> Self { Self { task: None } }
    pub fn cancel(mut self) { if let Some(h) = self.task.take() { h.abort(); } }
}

impl Drop for CancelHandle {
    fn drop(&mut self) { if let Some(h) = self.task.take() { h.abort(); } }
}

/// Ordered push stream of change notifications for one selector.
#[derive(Debug)]
pub struct Channel {
    rx: mpsc::Receiver<ChannelMessage>,
    cancel: CancelHandle,
}

impl Channel {
    pub fn new(rx: mpsc::Receiver<ChannelMessage>, cancel: CancelHandle) -> Self { Self { rx, cancel } }

    /// Next message in delivery order; `None` once the producer is gone.
    pub async fn recv(&mut self) -> Option<ChannelMessage> { self.rx.recv().await }

    /// Stop delivery. Closes the receiver before aborting the producer so nothing
    /// buffered can be observed afterwards.
    pub fn cancel(mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
        self.cancel.cancel();
    }
}

/// A listed collection and the control-plane version it was read at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub items: ResourceList,
    /// Opaque resume point; a channel opened from it misses nothing after the list.
    pub resource_version: Option<String>,
}

impl Snapshot {
    pub fn new(items: ResourceList) -> Self { Self { items, resource_version: None } }

    pub fn at(mut self, resource_version: impl Into<String>) -> Self {
        self.resource_version = Some(resource_version.into());
        self
    }
}

/// Point-in-time queries and live change channels.
#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    /// One-shot list of everything matching the selector.
    async fn snapshot(&self, selector: &Selector) -> ApiResult<Snapshot>;

    /// Open an ordered change channel for the selector, delivering every change
    /// after `since` (a snapshot's resource version) when given.
    async fn subscribe(&self, selector: &Selector, since: Option<&str>) -> ApiResult<Channel>;
}

// ----------------- Notifications -----------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Success,
    Warning,
    Error,
}

impl NotifyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyLevel::Success => "success",
            NotifyLevel::Warning => "warning",
            NotifyLevel::Error => "error",
        }
    }
}

/// A user-facing alert, rendered by the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationDirective {
    pub level: NotifyLevel,
    pub title: String,
    pub description: String,
    pub action_link: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("notify: {0}")]
pub struct NotifyError(pub String);

/// Renders alerts. Failures are reported back but never retried by the engine.
pub trait Notifier: Send + Sync {
    fn notify(&self, directive: &NotificationDirective) -> Result<(), NotifyError>;
}

// ----------------- Mock implementation -----------------

/// Scripted in-memory control plane for tests: snapshots and channels are
/// handed out in the order they were queued.
#[derive(Default)]
pub struct MockControlPlane {
    snapshots: Mutex<VecDeque<ApiResult<Snapshot>>>,
    subscribed_from: Mutex<Vec<Option<String>>>,
    channels: Mutex<VecDeque<mpsc::Receiver<ChannelMessage>>>,
    snapshot_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
}

impl MockControlPlane {
    pub fn new() -> Self { Self::default() }

    pub fn push_snapshot(&self, snap: ApiResult<ResourceList>) {
        self.snapshots.lock().unwrap_or_else(|e| e.into_inner()).push_back(snap.map(Snapshot::new));
    }

    /// Queue a successful snapshot read at `resource_version`.
    pub fn push_snapshot_at(&self, items: ResourceList, resource_version: &str) {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(Snapshot::new(items).at(resource_version)));
    }

    /// Queue a channel for the next `subscribe`; the returned sender feeds it.
    pub fn push_channel(&self, cap: usize) -> mpsc::Sender<ChannelMessage> {
        let (tx, rx) = mpsc::channel(cap.max(1));
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).push_back(rx);
        tx
    }

    pub fn snapshot_calls(&self) -> usize { self.snapshot_calls.load(Ordering::SeqCst) }
    pub fn subscribe_calls(&self) -> usize { self.subscribe_calls.load(Ordering::SeqCst) }

    /// The `since` argument of every `subscribe` call, in order.
    pub fn subscribed_from(&self) -> Vec<Option<String>> {
        self.subscribed_from.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl ControlPlane for MockControlPlane {
    async fn snapshot(&self, _selector: &Selector) -> ApiResult<Snapshot> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::NotFound("no snapshot".into())))
    }

    async fn subscribe(&self, _selector: &Selector, since: Option<&str>) -> ApiResult<Channel> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.subscribed_from.lock().unwrap_or_else(|e| e.into_inner()).push(since.map(str::to_string));
        let rx = self
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| ApiError::Unavailable("no channel".into()))?;
        Ok(Channel::new(rx, CancelHandle::noop()))
    }
}

/// Notifier that records every directive; can be switched to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<NotificationDirective>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self { Self::default() }
    pub fn failing() -> Self { Self { seen: Mutex::new(Vec::new()), fail: AtomicBool::new(true) } }
    pub fn set_failing(&self, fail: bool) { self.fail.store(fail, Ordering::SeqCst); }
    pub fn seen(&self) -> Vec<NotificationDirective> { self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone() }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, d: &NotificationDirective) -> Result<(), NotifyError> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).push(d.clone());
        if self.fail.load(Ordering::SeqCst) {
            warn!(title = %d.title, "notify: recording notifier set to fail");
            return Err(NotifyError("renderer unavailable".into()));
        }
        Ok(())
    }
}
