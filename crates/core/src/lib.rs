//! labsync core types: resources, identities, change events and classifications.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

mod error;
mod identity;
mod list;
mod resource;

pub use error::{CoreError, CoreResult};
pub use identity::{match_predicate, same_identity, Identity};
pub use list::ResourceList;
pub use resource::{EnvironmentStatus, PublicExposure, Resource, StatusFacets};

/// API group served by the lab operators.
pub const LAB_GROUP: &str = "crownlabs.polito.it";
/// Served version of the lab CRDs.
pub const LAB_VERSION: &str = "v1alpha2";

/// A served resource kind, addressed as `group/version/Kind` (or `version/Kind` for core).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespaced: bool,
}

impl ResourceKind {
    pub fn new(group: &str, version: &str, kind: &str, namespaced: bool) -> Self {
        Self { group: group.to_string(), version: version.to_string(), kind: kind.to_string(), namespaced }
    }

    /// Lab instances, one per running environment set.
    pub fn instance() -> Self { Self::new(LAB_GROUP, LAB_VERSION, "Instance", true) }
    /// Templates instances are created from.
    pub fn template() -> Self { Self::new(LAB_GROUP, LAB_VERSION, "Template", true) }
    /// Tenants are cluster-scoped.
    pub fn tenant() -> Self { Self::new(LAB_GROUP, LAB_VERSION, "Tenant", false) }

    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    /// Parse a short alias (`instance`, `template`, `tenant`) or a gvk key.
    /// Gvk keys are assumed namespaced unless `namespaced` says otherwise.
    pub fn parse(key: &str, namespaced: bool) -> CoreResult<Self> {
        match key.to_ascii_lowercase().as_str() {
            "instance" | "instances" => return Ok(Self::instance()),
            "template" | "templates" => return Ok(Self::template()),
            "tenant" | "tenants" => return Ok(Self::tenant()),
            _ => {}
        }
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(Self::new("", version, kind, namespaced)),
            [group, version, kind] if !group.is_empty() && !version.is_empty() && !kind.is_empty() => {
                Ok(Self::new(group, version, kind, namespaced))
            }
            _ => Err(CoreError::InvalidKind(key.to_string())),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.gvk_key())
    }
}

/// Kind of change carried by a channel notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "ADDED",
            ChangeKind::Modified => "MODIFIED",
            ChangeKind::Deleted => "DELETED",
        }
    }
}

/// A validated change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub resource: Resource,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, resource: Resource) -> Self { Self { kind, resource } }
    pub fn added(resource: Resource) -> Self { Self::new(ChangeKind::Added, resource) }
    pub fn modified(resource: Resource) -> Self { Self::new(ChangeKind::Modified, resource) }
    pub fn deleted(resource: Resource) -> Self { Self::new(ChangeKind::Deleted, resource) }
}

/// Change notification as delivered on the wire, before validation.
/// Either field may be absent on a malformed message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WireEvent {
    #[serde(rename = "updateType", default)]
    pub update_type: Option<ChangeKind>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl WireEvent {
    pub fn new(kind: ChangeKind, payload: serde_json::Value) -> Self {
        Self { update_type: Some(kind), payload: Some(payload) }
    }
}

impl TryFrom<WireEvent> for ChangeEvent {
    type Error = CoreError;

    fn try_from(w: WireEvent) -> CoreResult<Self> {
        let kind = w.update_type.ok_or(CoreError::MissingField("updateType"))?;
        let raw = w.payload.filter(|v| !v.is_null()).ok_or(CoreError::MissingField("payload"))?;
        Ok(ChangeEvent { kind, resource: Resource::from_raw(raw)? })
    }
}

/// How significant an incoming change is relative to the current list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Classification {
    Deletion,
    Addition,
    PrettyNameOnly,
    PublicExposureOnly,
    UpdatedInfo,
    Drop,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Deletion => "deletion",
            Classification::Addition => "addition",
            Classification::PrettyNameOnly => "pretty_name_only",
            Classification::PublicExposureOnly => "public_exposure_only",
            Classification::UpdatedInfo => "updated_info",
            Classification::Drop => "drop",
        }
    }

    /// Changes that never interrupt the user.
    pub fn is_cosmetic(&self) -> bool {
        matches!(self, Classification::PrettyNameOnly | Classification::PublicExposureOnly | Classification::Drop)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_aliases_and_keys() {
        assert_eq!(ResourceKind::parse("Instances", true).unwrap(), ResourceKind::instance());
        assert!(!ResourceKind::parse("tenant", true).unwrap().namespaced);
        let cm = ResourceKind::parse("v1/ConfigMap", true).unwrap();
        assert_eq!(cm.gvk_key(), "v1/ConfigMap");
        assert_eq!(ResourceKind::instance().gvk_key(), "crownlabs.polito.it/v1alpha2/Instance");
        assert!(ResourceKind::parse("a/b/c/d", true).is_err());
        assert!(ResourceKind::parse("v1/", true).is_err());
    }

    #[test]
    fn wire_event_validation() {
        let raw = serde_json::json!({ "metadata": { "name": "a", "namespace": "ns" } });
        let ok = ChangeEvent::try_from(WireEvent::new(ChangeKind::Modified, raw.clone())).unwrap();
        assert_eq!(ok.kind, ChangeKind::Modified);
        assert_eq!(ok.resource.name(), "a");

        let no_kind = WireEvent { update_type: None, payload: Some(raw) };
        assert_eq!(ChangeEvent::try_from(no_kind), Err(CoreError::MissingField("updateType")));
        let no_payload = WireEvent { update_type: Some(ChangeKind::Added), payload: None };
        assert_eq!(ChangeEvent::try_from(no_payload), Err(CoreError::MissingField("payload")));
    }

    #[test]
    fn wire_event_decodes_upper_case_kinds() {
        let w: WireEvent = serde_json::from_str(r#"{"updateType":"DELETED","payload":{"metadata":{"name":"x"}}}"#).unwrap();
        assert_eq!(w.update_type, Some(ChangeKind::Deleted));
        let empty: WireEvent = serde_json::from_str("{}").unwrap();
        assert!(empty.update_type.is_none() && empty.payload.is_none());
    }
}
