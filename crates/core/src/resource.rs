use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use crate::{CoreError, CoreResult, Identity};

const TEMPLATE_PRETTY_NAME: &str =
    "/spec/templateCrownlabsPolitoItTemplateRef/templateWrapper/itPolitoCrownlabsV1alpha2Template/spec/prettyName";

/// A control-plane object: stable identity plus a raw spec/status payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Resource {
    name: String,
    namespace: Option<String>,
    raw: Value,
}

/// Per-environment status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentStatus<'a> {
    pub name: Option<&'a str>,
    pub phase: Option<&'a str>,
}

/// Fields whose change is surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFacets<'a> {
    pub phase: Option<&'a str>,
    pub url: Option<&'a str>,
    pub ip: Option<&'a str>,
    pub running: Option<bool>,
    pub environment_phases: SmallVec<[Option<&'a str>; 2]>,
}

/// Public exposure as requested (spec) and as realized (status).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublicExposure<'a> {
    pub spec: Option<&'a Value>,
    pub status: Option<&'a Value>,
}

impl Resource {
    /// Build from a raw object; `metadata.name` is required.
    pub fn from_raw(raw: Value) -> CoreResult<Self> {
        let meta = raw.get("metadata").ok_or(CoreError::MissingField("metadata"))?;
        let name = meta
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(CoreError::MissingField("metadata.name"))?
            .to_string();
        let namespace = meta
            .get("namespace")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(Self { name, namespace, raw })
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn namespace(&self) -> Option<&str> { self.namespace.as_deref() }
    pub fn identity(&self) -> Identity { Identity { namespace: self.namespace.clone(), name: self.name.clone() } }
    pub fn raw(&self) -> &Value { &self.raw }
    pub fn into_raw(self) -> Value { self.raw }

    fn value_at(&self, pointer: &str) -> Option<&Value> {
        self.raw.pointer(pointer).filter(|v| !v.is_null())
    }

    fn str_at(&self, pointer: &str) -> Option<&str> {
        self.value_at(pointer).and_then(Value::as_str)
    }

    pub fn pretty_name(&self) -> Option<&str> { self.str_at("/spec/prettyName") }

    /// Pretty name when set, object name otherwise.
    pub fn display_name(&self) -> &str {
        self.pretty_name().filter(|s| !s.is_empty()).unwrap_or(self.name.as_str())
    }

    pub fn template_pretty_name(&self) -> Option<&str> { self.str_at(TEMPLATE_PRETTY_NAME) }

    pub fn phase(&self) -> Option<&str> { self.str_at("/status/phase") }
    pub fn url(&self) -> Option<&str> { self.str_at("/status/url") }
    pub fn ip(&self) -> Option<&str> { self.str_at("/status/ip") }

    /// Desired running flag (`spec.running`).
    pub fn running(&self) -> Option<bool> { self.value_at("/spec/running").and_then(Value::as_bool) }

    pub fn environments(&self) -> SmallVec<[EnvironmentStatus<'_>; 2]> {
        self.value_at("/status/environments")
            .and_then(Value::as_array)
            .map(|envs| {
                envs.iter()
                    .map(|e| EnvironmentStatus {
                        name: e.get("name").and_then(Value::as_str),
                        phase: e.get("phase").and_then(Value::as_str),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn status_facets(&self) -> StatusFacets<'_> {
        StatusFacets {
            phase: self.phase(),
            url: self.url(),
            ip: self.ip(),
            running: self.running(),
            environment_phases: self.environments().iter().map(|e| e.phase).collect(),
        }
    }

    pub fn public_exposure(&self) -> PublicExposure<'_> {
        PublicExposure {
            spec: self.value_at("/spec/publicExposure"),
            status: self.value_at("/status/publicExposure"),
        }
    }

    /// `metadata.creationTimestamp` as unix seconds.
    pub fn creation_ts(&self) -> Option<i64> {
        self.str_at("/metadata/creationTimestamp")
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp())
    }
}

impl TryFrom<Value> for Resource {
    type Error = CoreError;
    fn try_from(raw: Value) -> CoreResult<Self> { Resource::from_raw(raw) }
}

impl From<Resource> for Value {
    fn from(r: Resource) -> Self { r.raw }
}
