//! labsync store: classifies incoming changes against the current list and
//! applies them copy-on-write.
//!
//! Both halves are pure. The session crate owns the list and feeds events in
//! arrival order; nothing here keeps state between calls.

#![forbid(unsafe_code)]

mod classify;
mod reconcile;

pub use classify::{classify, classify_with_diff, FacetDiff};
pub use reconcile::{apply, reconcile, Reconciled};
