//! Copy-on-write ordered resource list, unique by identity.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::{same_identity, Identity, Resource};

/// Ordered sequence of resources, at most one per identity.
///
/// Cloning is cheap (shared `Arc`); every `with_*` / `without` operation returns a new
/// list and leaves `self` untouched. Operations that change nothing hand back the same
/// allocation so callers can skip work on `ptr_eq`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceList {
    items: Arc<Vec<Resource>>,
}

impl ResourceList {
    pub fn new() -> Self { Self::default() }

    /// Build from snapshot items. Later duplicates replace earlier ones in place.
    pub fn from_items<I: IntoIterator<Item = Resource>>(items: I) -> Self {
        let mut out: Vec<Resource> = Vec::new();
        let mut index: FxHashMap<Identity, usize> = FxHashMap::default();
        for r in items {
            match index.get(&r.identity()) {
                Some(&i) => out[i] = r,
                None => {
                    index.insert(r.identity(), out.len());
                    out.push(r);
                }
            }
        }
        Self { items: Arc::new(out) }
    }

    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn iter(&self) -> std::slice::Iter<'_, Resource> { self.items.iter() }
    pub fn as_slice(&self) -> &[Resource] { &self.items }
    pub fn get(&self, idx: usize) -> Option<&Resource> { self.items.get(idx) }

    /// Index of the element sharing `target`'s identity.
    pub fn position_of(&self, target: &Resource) -> Option<usize> {
        self.items.iter().position(|r| same_identity(r, target))
    }

    pub fn find(&self, target: &Resource) -> Option<&Resource> {
        self.position_of(target).and_then(|i| self.items.get(i))
    }

    pub fn contains(&self, target: &Resource) -> bool { self.position_of(target).is_some() }

    /// True when both lists share the same allocation.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool { Arc::ptr_eq(&a.items, &b.items) }

    /// Shared backing storage, for publishing through `ArcSwap`.
    pub fn shared(&self) -> Arc<Vec<Resource>> { Arc::clone(&self.items) }

    pub fn with_appended(&self, r: Resource) -> Self {
        let mut next = Vec::with_capacity(self.items.len() + 1);
        next.extend(self.items.iter().cloned());
        next.push(r);
        Self { items: Arc::new(next) }
    }

    /// Replace the element at `idx`; out-of-range returns `self` unchanged.
    pub fn with_replaced(&self, idx: usize, r: Resource) -> Self {
        if idx >= self.items.len() {
            return self.clone();
        }
        let mut next = self.items.as_ref().clone();
        next[idx] = r;
        Self { items: Arc::new(next) }
    }

    /// Keep only elements for which `keep` holds; returns `self` when nothing is removed.
    pub fn retain<F: Fn(&Resource) -> bool>(&self, keep: F) -> Self {
        if self.items.iter().all(&keep) {
            return self.clone();
        }
        let next: Vec<Resource> = self.items.iter().filter(|&r| keep(r)).cloned().collect();
        Self { items: Arc::new(next) }
    }

    /// No two elements share an identity.
    pub fn identities_unique(&self) -> bool {
        let mut seen = rustc_hash::FxHashSet::default();
        self.items.iter().all(|r| seen.insert(r.identity()))
    }
}

impl From<Arc<Vec<Resource>>> for ResourceList {
    fn from(items: Arc<Vec<Resource>>) -> Self { Self { items } }
}

impl FromIterator<Resource> for ResourceList {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self { Self::from_items(iter) }
}

impl<'a> IntoIterator for &'a ResourceList {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;
    fn into_iter(self) -> Self::IntoIter { self.items.iter() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(name: &str, phase: &str) -> Resource {
        Resource::from_raw(serde_json::json!({
            "metadata": { "name": name, "namespace": "ns" },
            "status": { "phase": phase }
        }))
        .unwrap()
    }

    #[test]
    fn snapshot_duplicates_collapse_in_place() {
        let l = ResourceList::from_items(vec![res("a", "Pending"), res("b", "Off"), res("a", "Ready")]);
        assert_eq!(l.len(), 2);
        assert_eq!(l.get(0).unwrap().phase(), Some("Ready"));
        assert_eq!(l.get(1).unwrap().name(), "b");
        assert!(l.identities_unique());
    }

    #[test]
    fn copy_on_write_leaves_source_untouched() {
        let l = ResourceList::from_items(vec![res("a", "Pending")]);
        let l2 = l.with_replaced(0, res("a", "Ready"));
        let l3 = l2.with_appended(res("b", "Off"));
        assert_eq!(l.get(0).unwrap().phase(), Some("Pending"));
        assert_eq!(l2.get(0).unwrap().phase(), Some("Ready"));
        assert_eq!(l3.len(), 2);
        assert!(!ResourceList::ptr_eq(&l, &l2));
    }

    #[test]
    fn retain_without_removal_shares_allocation() {
        let l = ResourceList::from_items(vec![res("a", "Ready"), res("b", "Ready")]);
        let same = l.retain(|_| true);
        assert!(ResourceList::ptr_eq(&l, &same));
        let fewer = l.retain(|r| r.name() != "a");
        assert_eq!(fewer.len(), 1);
        assert_eq!(l.len(), 2);
    }

    #[test]
    fn out_of_range_replace_is_noop() {
        let l = ResourceList::from_items(vec![res("a", "Ready")]);
        assert!(ResourceList::ptr_eq(&l, &l.with_replaced(5, res("z", "Ready"))));
    }
}
