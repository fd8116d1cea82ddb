//! Which changes interrupt the user.
//!
//! Only additions and status updates are eligible, only inside the viewer's
//! scope, and only when the resource lands on an alerting phase: the "ready"
//! phase with the desired-running flag set, or (opt-in) the "stopped" phase
//! with it cleared. Deletions are announced by the consuming view itself.

use std::sync::Arc;

use labsync_api::{NotificationDirective, NotifyLevel};
use labsync_core::{Classification, Resource};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::{SessionError, SessionResult};

/// Namespaces whose resources may raise alerts for this viewer.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Scope {
    /// The viewer's own namespace.
    OwnNamespace(String),
    /// Any namespace the viewer manages.
    Namespaces(FxHashSet<String>),
    Everyone,
    /// Viewer namespace unknown.
    #[default]
    Nobody,
    /// Caller-supplied rule over the resource namespace.
    #[serde(skip)]
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl Scope {
    pub fn own(ns: impl Into<String>) -> Self { Scope::OwnNamespace(ns.into()) }

    pub fn namespaces<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Scope::Namespaces(items.into_iter().map(Into::into).collect())
    }

    pub fn custom<F: Fn(&str) -> bool + Send + Sync + 'static>(f: F) -> Self { Scope::Custom(Arc::new(f)) }

    /// Cluster-scoped resources only pass `Everyone`.
    pub fn admits(&self, namespace: Option<&str>) -> bool {
        match (self, namespace) {
            (Scope::Everyone, _) => true,
            (Scope::Nobody, _) | (_, None) => false,
            (Scope::OwnNamespace(own), Some(ns)) => own == ns,
            (Scope::Namespaces(set), Some(ns)) => set.contains(ns),
            (Scope::Custom(f), Some(ns)) => f(ns),
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::OwnNamespace(ns) => f.debug_tuple("OwnNamespace").field(ns).finish(),
            Scope::Namespaces(set) => f.debug_tuple("Namespaces").field(set).finish(),
            Scope::Everyone => f.write_str("Everyone"),
            Scope::Nobody => f.write_str("Nobody"),
            Scope::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn default_ready_phase() -> String { "Ready".to_string() }
fn default_stopped_phase() -> String { "Off".to_string() }

/// Notification rules, loadable from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub scope: Scope,
    #[serde(default = "default_ready_phase")]
    pub ready_phase: String,
    #[serde(default = "default_stopped_phase")]
    pub stopped_phase: String,
    #[serde(default)]
    pub alert_on_stopped: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            scope: Scope::default(),
            ready_phase: default_ready_phase(),
            stopped_phase: default_stopped_phase(),
            alert_on_stopped: false,
        }
    }
}

impl PolicyConfig {
    pub fn from_yaml_str(s: &str) -> SessionResult<Self> {
        serde_yaml::from_str(s).map_err(|e| SessionError::Config(e.to_string()))
    }

    pub fn from_yaml_file(path: &std::path::Path) -> SessionResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SessionError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotificationPolicy {
    config: PolicyConfig,
}

impl NotificationPolicy {
    pub fn new(config: PolicyConfig) -> Self { Self { config } }

    /// Default policy scoped to the viewer's own namespace.
    pub fn for_namespace(ns: impl Into<String>) -> Self {
        Self::new(PolicyConfig { scope: Scope::own(ns), ..PolicyConfig::default() })
    }

    pub fn config(&self) -> &PolicyConfig { &self.config }

    pub fn decide(&self, classification: Classification, resource: &Resource) -> Option<NotificationDirective> {
        // Deletions are announced by the consuming view.
        if classification.is_cosmetic() || classification == Classification::Deletion {
            return None;
        }
        if !self.config.scope.admits(resource.namespace()) {
            return None;
        }
        let phase = resource.phase()?;
        let running = resource.running().unwrap_or(false);
        if phase == self.config.ready_phase && running {
            Some(directive(NotifyLevel::Success, "ready", resource, phase, action_link(resource)))
        } else if self.config.alert_on_stopped && phase == self.config.stopped_phase && !running {
            Some(directive(NotifyLevel::Warning, "stopped", resource, phase, None))
        } else {
            None
        }
    }
}

fn directive(level: NotifyLevel, what: &str, r: &Resource, phase: &str, link: Option<String>) -> NotificationDirective {
    let title = match r.namespace() {
        Some(ns) => format!("{}/{}/{}", ns, r.name(), what),
        None => format!("{}/{}", r.name(), what),
    };
    let description = match r.template_pretty_name() {
        Some(t) => format!("{}: instance {} is {}", t, r.display_name(), phase),
        None => format!("instance {} is {}", r.display_name(), phase),
    };
    NotificationDirective { level, title, description, action_link: link }
}

/// Status URL; with a single environment the link points straight at it.
fn action_link(r: &Resource) -> Option<String> {
    let url = r.url()?;
    let envs = r.environments();
    match envs.as_slice() {
        [only] => match &only.name {
            Some(env) => Some(format!("{}/{}/", url.trim_end_matches('/'), env)),
            None => Some(url.to_string()),
        },
        _ => Some(url.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inst(ns: &str, phase: &str, running: bool) -> Resource {
        Resource::from_raw(json!({
            "metadata": { "name": "vm", "namespace": ns },
            "spec": { "running": running, "prettyName": "Lab VM" },
            "status": { "phase": phase, "url": "https://labs/vm/" }
        }))
        .unwrap()
    }

    #[test]
    fn ready_in_own_namespace_fires() {
        let p = NotificationPolicy::for_namespace("ns1");
        let d = p.decide(Classification::UpdatedInfo, &inst("ns1", "Ready", true)).unwrap();
        assert_eq!(d.level, NotifyLevel::Success);
        assert_eq!(d.title, "ns1/vm/ready");
        assert_eq!(d.description, "instance Lab VM is Ready");
        assert_eq!(d.action_link.as_deref(), Some("https://labs/vm/"));
        assert!(p.decide(Classification::Addition, &inst("ns1", "Ready", true)).is_some());
    }

    #[test]
    fn out_of_scope_or_intermediate_is_suppressed() {
        let p = NotificationPolicy::for_namespace("ns1");
        assert!(p.decide(Classification::UpdatedInfo, &inst("ns2", "Ready", true)).is_none());
        assert!(p.decide(Classification::UpdatedInfo, &inst("ns1", "Starting", true)).is_none());
        assert!(p.decide(Classification::UpdatedInfo, &inst("ns1", "Ready", false)).is_none());
        assert!(p.decide(Classification::UpdatedInfo, &inst("ns1", "Off", false)).is_none());
    }

    #[test]
    fn non_eligible_classifications_never_fire() {
        let p = NotificationPolicy::new(PolicyConfig { scope: Scope::Everyone, ..PolicyConfig::default() });
        let r = inst("ns1", "Ready", true);
        for c in [
            Classification::Deletion,
            Classification::PrettyNameOnly,
            Classification::PublicExposureOnly,
            Classification::Drop,
        ] {
            assert!(p.decide(c, &r).is_none(), "{}", c);
        }
    }

    #[test]
    fn managed_namespaces_and_custom_scope() {
        let managed = Scope::namespaces(["ws-a", "ws-b"]);
        assert!(managed.admits(Some("ws-b")));
        assert!(!managed.admits(Some("ws-c")));
        assert!(!managed.admits(None));
        let prefix = Scope::custom(|ns| ns.starts_with("workspace-"));
        assert!(prefix.admits(Some("workspace-x")));
        assert!(!prefix.admits(Some("tenant-x")));
        assert!(!Scope::Nobody.admits(Some("ns")));
        assert!(Scope::Everyone.admits(None));
    }

    #[test]
    fn stopped_alert_is_opt_in() {
        let mut cfg = PolicyConfig { scope: Scope::own("ns1"), ..PolicyConfig::default() };
        assert!(NotificationPolicy::new(cfg.clone()).decide(Classification::UpdatedInfo, &inst("ns1", "Off", false)).is_none());
        cfg.alert_on_stopped = true;
        let d = NotificationPolicy::new(cfg).decide(Classification::UpdatedInfo, &inst("ns1", "Off", false)).unwrap();
        assert_eq!(d.level, NotifyLevel::Warning);
        assert_eq!(d.title, "ns1/vm/stopped");
        assert!(d.action_link.is_none());
    }

    #[test]
    fn single_environment_link_and_template_name() {
        let r = Resource::from_raw(json!({
            "metadata": { "name": "vm", "namespace": "ns1" },
            "spec": {
                "running": true,
                "templateCrownlabsPolitoItTemplateRef": {
                    "templateWrapper": { "itPolitoCrownlabsV1alpha2Template": { "spec": { "prettyName": "Ubuntu" } } }
                }
            },
            "status": { "phase": "Ready", "url": "https://labs/vm/", "environments": [{ "name": "desktop", "phase": "Ready" }] }
        }))
        .unwrap();
        let d = NotificationPolicy::for_namespace("ns1").decide(Classification::Addition, &r).unwrap();
        assert_eq!(d.action_link.as_deref(), Some("https://labs/vm/desktop/"));
        assert_eq!(d.description, "Ubuntu: instance vm is Ready");
    }

    #[test]
    fn policy_from_yaml() {
        let cfg = PolicyConfig::from_yaml_str(
            "scope:\n  type: namespaces\n  value: [ws-a, ws-b]\nalert_on_stopped: true\n",
        )
        .unwrap();
        assert!(cfg.scope.admits(Some("ws-a")));
        assert_eq!(cfg.ready_phase, "Ready");
        assert!(cfg.alert_on_stopped);

        let own = PolicyConfig::from_yaml_str("scope:\n  type: own_namespace\n  value: tenant-alice\n").unwrap();
        assert!(own.scope.admits(Some("tenant-alice")));
        assert!(PolicyConfig::from_yaml_str("scope: 3").is_err());
        assert!(!PolicyConfig::default().scope.admits(Some("x")));
    }
}
