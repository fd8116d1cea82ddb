//! labsync kubehub: the control plane served by a Kubernetes API server.
//!
//! Snapshots are plain label-selected lists; change channels are raw watches
//! opened at the list's resource version, whose events are forwarded verbatim
//! as [`WireEvent`]s.

#![forbid(unsafe_code)]

use std::sync::Mutex;
use std::time::Instant;

use anyhow::{anyhow, Result};
use futures::{StreamExt, TryStreamExt};
use kube::{
    api::{Api, ListParams, ObjectList, WatchEvent, WatchParams},
    core::{ApiResource, DynamicObject, ErrorResponse, GroupVersionKind},
    discovery::Discovery,
    Client,
};
use labsync_api::{
    ApiError, ApiResult, CancelHandle, Channel, ChannelError, ChannelMessage, ControlPlane, Selector, Snapshot,
};
use labsync_core::{ChangeKind, Resource, ResourceKind, ResourceList, WireEvent};
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const DEFAULT_QUEUE_CAP: usize = 2048;

/// Kubernetes-backed [`ControlPlane`].
pub struct KubeControlPlane {
    client: Client,
    queue_cap: usize,
    resolved: Mutex<FxHashMap<String, ApiResource>>,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self { client, queue_cap: DEFAULT_QUEUE_CAP, resolved: Mutex::new(FxHashMap::default()) }
    }

    /// Connect using the ambient kubeconfig or in-cluster config.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    pub fn with_queue_cap(mut self, cap: usize) -> Self {
        self.queue_cap = cap.max(1);
        self
    }

    async fn api_resource(&self, kind: &ResourceKind) -> ApiResource {
        let key = kind.gvk_key();
        if let Some(ar) = self.resolved.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return ar.clone();
        }
        let gvk = GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind);
        let ar = match find_api_resource(self.client.clone(), &gvk).await {
            Ok(ar) => ar,
            Err(e) => {
                debug!(gvk = %key, error = %e, "kubehub: discovery miss; guessing plural");
                ApiResource::from_gvk(&gvk)
            }
        };
        self.resolved.lock().unwrap_or_else(|e| e.into_inner()).insert(key, ar.clone());
        ar
    }

    async fn api_for(&self, selector: &Selector) -> Api<DynamicObject> {
        let ar = self.api_resource(&selector.kind).await;
        match (selector.kind.namespaced, selector.namespace.as_deref()) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<ApiResource> {
    let discovery = Discovery::new(client).filter(&[gvk.group.as_str()]).run().await?;
    for group in discovery.groups() {
        for (ar, _caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                return Ok(ar);
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
}

fn to_raw(obj: &DynamicObject) -> serde_json::Value {
    let mut raw = serde_json::to_value(obj).unwrap_or(serde_json::Value::Null);
    strip_managed_fields(&mut raw);
    raw
}

/// All-or-nothing: one unusable object fails the whole snapshot.
fn to_list(objs: &[DynamicObject]) -> ApiResult<ResourceList> {
    objs.iter()
        .map(|o| Resource::from_raw(to_raw(o)).map_err(|e| ApiError::Internal(format!("decoding object: {}", e))))
        .collect::<ApiResult<Vec<_>>>()
        .map(ResourceList::from_items)
}

fn to_snapshot(list: &ObjectList<DynamicObject>) -> ApiResult<Snapshot> {
    Ok(Snapshot { items: to_list(&list.items)?, resource_version: list.metadata.resource_version.clone() })
}

/// Watch start: right after the snapshot, or "any cached point" when there is none.
fn resume_point(since: Option<&str>) -> &str {
    since.filter(|rv| !rv.is_empty()).unwrap_or("0")
}

fn api_error(e: kube::Error) -> ApiError {
    match e {
        kube::Error::Api(resp) => match resp.code {
            404 => ApiError::NotFound(resp.message),
            400 | 422 => ApiError::Validation(resp.message),
            _ => ApiError::Unavailable(format!("{} ({})", resp.message, resp.code)),
        },
        other => ApiError::Unavailable(other.to_string()),
    }
}

fn channel_error(resp: &ErrorResponse) -> ChannelError {
    if resp.code == 410 {
        ChannelError::Gone(resp.message.clone())
    } else {
        ChannelError::Transport(format!("{} ({})", resp.message, resp.code))
    }
}

fn stream_error(e: kube::Error) -> ChannelError {
    match e {
        kube::Error::Api(resp) => channel_error(&resp),
        other => ChannelError::Transport(other.to_string()),
    }
}

/// Translate one watch event. Bookmarks carry no change and yield `None`.
fn wire_from(ev: WatchEvent<DynamicObject>) -> Option<ChannelMessage> {
    match ev {
        WatchEvent::Added(o) => Some(Ok(WireEvent::new(ChangeKind::Added, to_raw(&o)))),
        WatchEvent::Modified(o) => Some(Ok(WireEvent::new(ChangeKind::Modified, to_raw(&o)))),
        WatchEvent::Deleted(o) => Some(Ok(WireEvent::new(ChangeKind::Deleted, to_raw(&o)))),
        WatchEvent::Bookmark(_) => None,
        WatchEvent::Error(resp) => Some(Err(channel_error(&resp))),
    }
}

#[async_trait::async_trait]
impl ControlPlane for KubeControlPlane {
    async fn snapshot(&self, selector: &Selector) -> ApiResult<Snapshot> {
        let t0 = Instant::now();
        let api = self.api_for(selector).await;
        let mut lp = ListParams::default();
        if let Some(l) = selector.label_selector.as_deref() {
            lp = lp.labels(l);
        }
        let list = api.list(&lp).await.map_err(api_error)?;
        let out = to_snapshot(&list)?;
        info!(selector = %selector, items = out.items.len(), rv = ?out.resource_version, took_ms = %t0.elapsed().as_millis(), "kubehub: list ok");
        Ok(out)
    }

    async fn subscribe(&self, selector: &Selector, since: Option<&str>) -> ApiResult<Channel> {
        let api = self.api_for(selector).await;
        let mut wp = WatchParams::default();
        if let Some(l) = selector.label_selector.as_deref() {
            wp = wp.labels(l);
        }
        let from = resume_point(since);
        let stream = api.watch(&wp, from).await.map_err(api_error)?.boxed();
        let (tx, rx) = mpsc::channel::<ChannelMessage>(self.queue_cap);
        let sel = selector.to_string();
        info!(selector = %sel, rv = %from, "kubehub: watch started");
        let task = tokio::spawn(async move {
            let mut stream = stream;
            loop {
                let msg = match stream.try_next().await {
                    Ok(Some(ev)) => match wire_from(ev) {
                        Some(m) => m,
                        None => continue,
                    },
                    Ok(None) => {
                        debug!(selector = %sel, "kubehub: watch ended");
                        break;
                    }
                    Err(e) => Err(stream_error(e)),
                };
                let fatal = msg.is_err();
                if let Err(e) = &msg {
                    warn!(selector = %sel, error = %e, "kubehub: watch error");
                    counter!("labsync_watch_errors_total", 1u64);
                }
                if tx.send(msg).await.is_err() || fatal {
                    break;
                }
            }
        });
        Ok(Channel::new(rx, CancelHandle::new(task)))
    }
}
