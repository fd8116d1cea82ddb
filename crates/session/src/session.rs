//! Subscription session: snapshot, arm the channel once, apply events in order,
//! tear down synchronously.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use labsync_api::{Channel, ControlPlane, NotificationDirective, Notifier, Selector, Snapshot};
use labsync_core::{ChangeEvent, ChangeKind, Classification, Identity, Resource, ResourceList, WireEvent};
use metrics::{counter, histogram};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{NotificationPolicy, SessionConfig, SessionError, SessionResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Live,
    Closed,
    /// Snapshot could not be (re)acquired.
    Failed(String),
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Loading => f.write_str("loading"),
            SessionState::Live => f.write_str("live"),
            SessionState::Closed => f.write_str("closed"),
            SessionState::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// What happened to one channel message.
#[derive(Debug, Clone, PartialEq)]
pub struct EventOutcome {
    /// `None` for malformed messages.
    pub kind: Option<ChangeKind>,
    pub identity: Option<Identity>,
    pub classification: Classification,
    /// The committed list changed.
    pub changed: bool,
    /// Alert handed to the notifier, if any.
    pub directive: Option<NotificationDirective>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Initial snapshot committed and channel armed.
    Opened { items: usize },
    Event(EventOutcome),
    /// Channel was lost; a fresh snapshot replaced the list.
    Resynced { items: usize, attempts: u32 },
    /// Resnapshot gave up; the session is `Failed`.
    Failed { reason: String },
}

/// Read side of a session's list: the last committed list plus an epoch counter
/// bumped on every commit.
#[derive(Clone)]
pub struct ListHandle {
    snap: Arc<ArcSwap<Vec<Resource>>>,
    epoch_rx: watch::Receiver<u64>,
}

impl ListHandle {
    pub fn current(&self) -> ResourceList { ResourceList::from(self.snap.load_full()) }
    pub fn epoch(&self) -> u64 { *self.epoch_rx.borrow() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }
}

/// One live view of a selector. Owns its list and channel; nothing is shared with
/// other sessions.
pub struct Session {
    id: Uuid,
    selector: Selector,
    control_plane: Arc<dyn ControlPlane>,
    notifier: Arc<dyn Notifier>,
    policy: NotificationPolicy,
    config: SessionConfig,
    state: SessionState,
    list: ResourceList,
    /// Version of the last snapshot; the channel resumes from it.
    resume_from: Option<String>,
    channel: Option<Channel>,
    snap: Arc<ArcSwap<Vec<Resource>>>,
    epoch: u64,
    epoch_tx: watch::Sender<u64>,
}

impl Session {
    pub fn new(selector: Selector, control_plane: Arc<dyn ControlPlane>, notifier: Arc<dyn Notifier>) -> Self {
        let list = ResourceList::new();
        let (epoch_tx, _) = watch::channel(0u64);
        Self {
            id: Uuid::new_v4(),
            selector,
            control_plane,
            notifier,
            policy: NotificationPolicy::default(),
            config: SessionConfig::default(),
            state: SessionState::Idle,
            snap: Arc::new(ArcSwap::new(list.shared())),
            list,
            resume_from: None,
            channel: None,
            epoch: 0,
            epoch_tx,
        }
    }

    pub fn with_policy(mut self, policy: NotificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn selector(&self) -> &Selector { &self.selector }
    pub fn state(&self) -> &SessionState { &self.state }
    pub fn list(&self) -> &ResourceList { &self.list }
    pub fn is_armed(&self) -> bool { self.channel.is_some() }

    pub fn handle(&self) -> ListHandle {
        ListHandle { snap: Arc::clone(&self.snap), epoch_rx: self.epoch_tx.subscribe() }
    }

    /// Idle → Loading → Live. Calling it again on a live session is a no-op.
    pub async fn open(&mut self) -> SessionResult<()> {
        match &self.state {
            SessionState::Idle => {}
            SessionState::Live => return Ok(()),
            other => return Err(SessionError::InvalidState { op: "open", state: other.to_string() }),
        }
        self.state = SessionState::Loading;
        info!(session = %self.id, selector = %self.selector, "session: opening");
        let snapshot = match self.load_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.state = SessionState::Failed(e.to_string());
                return Err(e.into());
            }
        };
        self.commit_snapshot(snapshot);
        if let Err(e) = self.arm().await {
            self.state = SessionState::Failed(e.to_string());
            return Err(e);
        }
        self.state = SessionState::Live;
        info!(session = %self.id, items = self.list.len(), "session: live");
        Ok(())
    }

    /// Subscribe to the change channel unless already armed.
    pub async fn arm(&mut self) -> SessionResult<()> {
        if !matches!(self.state, SessionState::Loading | SessionState::Live) {
            return Err(SessionError::InvalidState { op: "arm", state: self.state.to_string() });
        }
        if self.channel.is_some() {
            debug!(session = %self.id, "session: channel already armed");
            return Ok(());
        }
        let ch = self.control_plane.subscribe(&self.selector, self.resume_from.as_deref()).await?;
        self.channel = Some(ch);
        debug!(session = %self.id, since = ?self.resume_from, "session: channel armed");
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Snapshot, labsync_api::ApiError> {
        let t0 = Instant::now();
        let res = self.control_plane.snapshot(&self.selector).await;
        histogram!("labsync_snapshot_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(snap) => info!(session = %self.id, items = snap.items.len(), rv = ?snap.resource_version, took_ms = %t0.elapsed().as_millis(), "session: snapshot ok"),
            Err(e) => warn!(session = %self.id, error = %e, took_ms = %t0.elapsed().as_millis(), "session: snapshot failed"),
        }
        res
    }

    fn commit_snapshot(&mut self, snapshot: Snapshot) {
        self.resume_from = snapshot.resource_version;
        self.commit(snapshot.items);
    }

    fn commit(&mut self, list: ResourceList) {
        debug_assert!(list.identities_unique());
        self.list = list;
        self.snap.store(self.list.shared());
        self.epoch = self.epoch.saturating_add(1);
        self.epoch_tx.send_replace(self.epoch);
    }

    /// Classify, reconcile, commit, then notify. Returns `None` unless live.
    pub fn apply_event(&mut self, event: ChangeEvent) -> Option<EventOutcome> {
        if self.state != SessionState::Live {
            debug!(session = %self.id, state = %self.state, "session: event ignored");
            return None;
        }
        let out = labsync_store::reconcile(&self.list, &event);
        let classification = out.classification;
        let changed = out.changed(&self.list);
        counter!("labsync_events_total", 1u64, "classification" => classification.as_str());
        debug!(
            session = %self.id,
            kind = event.kind.as_str(),
            identity = %event.resource.identity(),
            %classification,
            diff = ?out.diff,
            "session: event applied"
        );
        if changed {
            self.commit(out.list);
        }
        // The list is committed before the notifier runs.
        let directive = self.policy.decide(classification, &event.resource);
        if let Some(d) = &directive {
            self.emit(d);
        }
        Some(EventOutcome {
            kind: Some(event.kind),
            identity: Some(event.resource.identity()),
            classification,
            changed,
            directive,
        })
    }

    /// Validate a raw channel message, dropping it when malformed.
    pub fn apply_wire(&mut self, wire: WireEvent) -> Option<EventOutcome> {
        if self.state != SessionState::Live {
            return None;
        }
        match ChangeEvent::try_from(wire) {
            Ok(ev) => self.apply_event(ev),
            Err(e) => {
                warn!(session = %self.id, error = %e, "session: malformed event dropped");
                counter!("labsync_malformed_events_total", 1u64);
                counter!("labsync_events_total", 1u64, "classification" => Classification::Drop.as_str());
                Some(EventOutcome { kind: None, identity: None, classification: Classification::Drop, changed: false, directive: None })
            }
        }
    }

    fn emit(&self, d: &NotificationDirective) {
        match self.notifier.notify(d) {
            Ok(()) => counter!("labsync_notifications_total", 1u64, "level" => d.level.as_str()),
            Err(e) => {
                warn!(session = %self.id, title = %d.title, error = %e, "session: notifier failed");
                counter!("labsync_notify_failures_total", 1u64);
            }
        }
    }

    /// Await and process the next channel message. `None` once the session is not live.
    pub async fn next(&mut self) -> Option<SessionUpdate> {
        if self.state != SessionState::Live {
            return None;
        }
        let msg = match self.channel.as_mut() {
            Some(ch) => ch.recv().await,
            None => None,
        };
        match msg {
            Some(Ok(wire)) => self.apply_wire(wire).map(SessionUpdate::Event),
            Some(Err(e)) => {
                warn!(session = %self.id, error = %e, "session: channel error");
                Some(self.resync(&e.to_string()).await)
            }
            None => {
                warn!(session = %self.id, "session: channel closed");
                Some(self.resync("channel closed").await)
            }
        }
    }

    /// Drop the channel, take a fresh snapshot and re-arm, backing off between attempts.
    async fn resync(&mut self, reason: &str) -> SessionUpdate {
        if let Some(ch) = self.channel.take() {
            ch.cancel();
        }
        self.state = SessionState::Loading;
        counter!("labsync_resnapshots_total", 1u64);
        info!(session = %self.id, reason, "session: resnapshot");
        let max = self.config.resync_max_attempts.max(1);
        let mut last_err = String::new();
        for attempt in 1..=max {
            match self.load_snapshot().await {
                Ok(snapshot) => {
                    self.commit_snapshot(snapshot);
                    match self.arm().await {
                        Ok(()) => {
                            self.state = SessionState::Live;
                            info!(session = %self.id, items = self.list.len(), attempt, "session: resynced");
                            return SessionUpdate::Resynced { items: self.list.len(), attempts: attempt };
                        }
                        Err(e) => last_err = e.to_string(),
                    }
                }
                Err(e) => last_err = e.to_string(),
            }
            if attempt < max {
                let delay = self.config.backoff_for(attempt);
                debug!(session = %self.id, attempt, delay_ms = %delay.as_millis(), "session: resnapshot backoff");
                tokio::time::sleep(delay).await;
            }
        }
        warn!(session = %self.id, error = %last_err, "session: resnapshot gave up");
        self.state = SessionState::Failed(last_err.clone());
        SessionUpdate::Failed { reason: last_err }
    }

    /// Tear down: the channel is cancelled before this returns.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(ch) = self.channel.take() {
            ch.cancel();
        }
        info!(session = %self.id, from = %self.state, "session: closed");
        self.state = SessionState::Closed;
    }

    /// Close this session and start a new idle one for a different label selector.
    pub fn resubscribe(mut self, label_selector: Option<String>) -> Session {
        self.close();
        let mut selector = self.selector.clone();
        selector.label_selector = label_selector;
        Session::new(selector, Arc::clone(&self.control_plane), Arc::clone(&self.notifier))
            .with_policy(self.policy.clone())
            .with_config(self.config.clone())
    }

    /// Open, then process updates until `stop` fires or the session fails.
    /// Each update is reported together with the list it left behind.
    pub async fn run<F>(&mut self, mut stop: oneshot::Receiver<()>, mut on_update: F) -> SessionResult<()>
    where
        F: FnMut(&ResourceList, &SessionUpdate),
    {
        let opened = tokio::select! {
            res = self.open() => Some(res),
            _ = &mut stop => None,
        };
        match opened {
            None => {
                self.close();
                return Ok(());
            }
            Some(res) => res?,
        }
        on_update(&self.list, &SessionUpdate::Opened { items: self.list.len() });
        loop {
            let update = tokio::select! {
                u = self.next() => u,
                _ = &mut stop => None,
            };
            match update {
                Some(u) => {
                    on_update(&self.list, &u);
                    if let SessionUpdate::Failed { reason } = u {
                        return Err(SessionError::Failed(reason));
                    }
                }
                None => break,
            }
        }
        self.close();
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) { self.close(); }
}
