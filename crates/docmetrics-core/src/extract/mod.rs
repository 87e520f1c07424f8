//! Specialized extractors.
//!
//! Some sub-documents do not fit the path-to-name rule of the flattener:
//! their keys are data (lock resources, lock modes) rather than field
//! names, or the interesting number is an aggregate of several fields.
//! Each extractor here owns one such structure and a distinct range of
//! metric names (see `naming::RESERVED_STEMS`), so its samples never
//! collide with generic ones.

pub mod cache;
pub mod legacy;
pub mod locks;
pub mod routing;

pub use cache::cache_evicted_total;
pub use legacy::{legacy_metrics, profile_entries};
pub use locks::lock_stats;
pub use routing::routing_metrics;

use crate::document::Document;

/// Looks `path` up at the document root, then below each of `roots`.
///
/// Diagnostic-data style replies wrap the server status in a
/// `serverStatus` sub-document; plain `serverStatus` replies do not.
pub(crate) fn locate<'a>(doc: &'a Document, roots: &[&str], path: &[&str]) -> Option<&'a Document> {
    if let Some(found) = doc.get_path(path).and_then(|v| v.as_document()) {
        return Some(found);
    }
    roots.iter().find_map(|root| {
        doc.get_document(root)?
            .get_path(path)
            .and_then(|v| v.as_document())
    })
}
