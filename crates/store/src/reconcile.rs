use labsync_core::{match_predicate, ChangeEvent, Classification, Resource, ResourceList};
use tracing::debug;

use crate::classify::{classify_with_diff, FacetDiff};

/// Result of reconciling one event.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub classification: Classification,
    pub diff: Option<FacetDiff>,
    pub list: ResourceList,
}

impl Reconciled {
    /// The list changed allocation, i.e. readers should refresh.
    pub fn changed(&self, before: &ResourceList) -> bool { !ResourceList::ptr_eq(before, &self.list) }
}

/// Apply one classified change. Never mutates `list`; `Drop` and no-op deletions
/// return the same allocation.
pub fn apply(list: &ResourceList, classification: Classification, resource: &Resource) -> ResourceList {
    match classification {
        Classification::Drop => list.clone(),
        Classification::Deletion => list.retain(match_predicate(resource, true)),
        Classification::Addition => match list.position_of(resource) {
            Some(idx) => {
                debug!(identity = %resource.identity(), idx, "store: duplicate addition replaced in place");
                list.with_replaced(idx, resource.clone())
            }
            None => list.with_appended(resource.clone()),
        },
        Classification::PrettyNameOnly | Classification::PublicExposureOnly | Classification::UpdatedInfo => {
            match list.position_of(resource) {
                Some(idx) => list.with_replaced(idx, resource.clone()),
                None => {
                    debug!(identity = %resource.identity(), %classification, "store: update for unlisted resource appended");
                    list.with_appended(resource.clone())
                }
            }
        }
    }
}

/// Classify `event` against `list` and apply it.
pub fn reconcile(list: &ResourceList, event: &ChangeEvent) -> Reconciled {
    let (classification, diff) = classify_with_diff(list, &event.resource, event.kind);
    let next = apply(list, classification, &event.resource);
    Reconciled { classification, diff, list: next }
}
