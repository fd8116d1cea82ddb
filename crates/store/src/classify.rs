use labsync_core::{ChangeKind, Classification, Resource, ResourceList};
use serde::{Deserialize, Serialize};

/// Which facets differ between the listed element and the incoming one.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FacetDiff {
    pub pretty_name: bool,
    /// phase, url, ip, running flag or any environment phase
    pub status: bool,
    pub exposure: bool,
}

impl FacetDiff {
    pub fn between(old: &Resource, new: &Resource) -> Self {
        Self {
            pretty_name: old.pretty_name() != new.pretty_name(),
            status: old.status_facets() != new.status_facets(),
            exposure: old.public_exposure() != new.public_exposure(),
        }
    }

    /// Status beats display name beats exposure.
    pub fn classification(&self) -> Classification {
        if self.status {
            Classification::UpdatedInfo
        } else if self.pretty_name {
            Classification::PrettyNameOnly
        } else if self.exposure {
            Classification::PublicExposureOnly
        } else {
            Classification::Drop
        }
    }
}

pub fn classify(list: &ResourceList, incoming: &Resource, kind: ChangeKind) -> Classification {
    classify_with_diff(list, incoming, kind).0
}

/// Classify and return the facet diff against the listed element, when there is one.
pub fn classify_with_diff(
    list: &ResourceList,
    incoming: &Resource,
    kind: ChangeKind,
) -> (Classification, Option<FacetDiff>) {
    if kind == ChangeKind::Deleted {
        return (Classification::Deletion, None);
    }
    match list.find(incoming) {
        // Modified without a listed element is a creation we missed.
        None => (Classification::Addition, None),
        Some(existing) => {
            let diff = FacetDiff::between(existing, incoming);
            (diff.classification(), Some(diff))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inst(pretty: &str, phase: &str, exposure: Option<serde_json::Value>) -> Resource {
        let mut raw = json!({
            "metadata": { "name": "vm", "namespace": "ns" },
            "spec": { "prettyName": pretty, "running": true },
            "status": { "phase": phase, "url": "https://x/vm" }
        });
        if let Some(pe) = exposure {
            raw["spec"]["publicExposure"] = pe;
        }
        Resource::from_raw(raw).unwrap()
    }

    fn list_of(r: Resource) -> ResourceList { ResourceList::from_items(vec![r]) }

    #[test]
    fn deleted_is_deletion_even_when_absent() {
        let r = inst("a", "Ready", None);
        assert_eq!(classify(&ResourceList::new(), &r, ChangeKind::Deleted), Classification::Deletion);
        assert_eq!(classify(&list_of(r.clone()), &r, ChangeKind::Deleted), Classification::Deletion);
    }

    #[test]
    fn unknown_identity_is_addition_for_added_and_modified() {
        let r = inst("a", "Ready", None);
        assert_eq!(classify(&ResourceList::new(), &r, ChangeKind::Added), Classification::Addition);
        assert_eq!(classify(&ResourceList::new(), &r, ChangeKind::Modified), Classification::Addition);
    }

    #[test]
    fn single_facet_changes() {
        let base = list_of(inst("a", "Pending", None));
        assert_eq!(classify(&base, &inst("a", "Ready", None), ChangeKind::Modified), Classification::UpdatedInfo);
        assert_eq!(classify(&base, &inst("b", "Pending", None), ChangeKind::Modified), Classification::PrettyNameOnly);
        assert_eq!(
            classify(&base, &inst("a", "Pending", Some(json!({ "ports": [] }))), ChangeKind::Modified),
            Classification::PublicExposureOnly
        );
        assert_eq!(classify(&base, &inst("a", "Pending", None), ChangeKind::Modified), Classification::Drop);
    }

    #[test]
    fn precedence_when_facets_change_together() {
        let base = list_of(inst("a", "Pending", None));
        let all = inst("b", "Ready", Some(json!({ "ports": [] })));
        let (c, diff) = classify_with_diff(&base, &all, ChangeKind::Modified);
        assert_eq!(c, Classification::UpdatedInfo);
        assert_eq!(diff, Some(FacetDiff { pretty_name: true, status: true, exposure: true }));
        // name + exposure, no status change
        let cosmetic = inst("b", "Pending", Some(json!({ "ports": [] })));
        assert_eq!(classify(&base, &cosmetic, ChangeKind::Modified), Classification::PrettyNameOnly);
    }

    #[test]
    fn running_flag_and_environment_phase_are_status() {
        let base = list_of(inst("a", "Ready", None));
        let mut stopped = inst("a", "Ready", None).into_raw();
        stopped["spec"]["running"] = json!(false);
        let stopped = Resource::from_raw(stopped).unwrap();
        assert_eq!(classify(&base, &stopped, ChangeKind::Modified), Classification::UpdatedInfo);

        let mut env = inst("a", "Ready", None).into_raw();
        env["status"]["environments"] = json!([{ "name": "desktop", "phase": "Starting" }]);
        let env = Resource::from_raw(env).unwrap();
        assert_eq!(classify(&base, &env, ChangeKind::Modified), Classification::UpdatedInfo);
    }

    #[test]
    fn duplicate_added_with_same_payload_drops() {
        let r = inst("a", "Ready", None);
        assert_eq!(classify(&list_of(r.clone()), &r, ChangeKind::Added), Classification::Drop);
    }

    #[test]
    fn unrelated_field_change_drops() {
        let base = list_of(inst("a", "Ready", None));
        let mut labeled = inst("a", "Ready", None).into_raw();
        labeled["metadata"]["labels"] = json!({ "x": "y" });
        assert_eq!(classify(&base, &Resource::from_raw(labeled).unwrap(), ChangeKind::Modified), Classification::Drop);
    }
}
