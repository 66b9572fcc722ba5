//! Per-import index from portable keys to the entities created for them.
//!
//! The tracker holds no policy. The import passes populate it, and the
//! copy-provenance passes consult [`resolve_copied_from`] to decide how a
//! chain of ancestor keys maps back onto the graph.

use std::collections::HashMap;
use std::hash::Hash;

use crate::model::{
    CollectionInstanceId, ElementId, ImplicitCollectionJobsId, InstanceId, JobId, LibraryId,
};

/// An instance waiting for a hid from the destination history's block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiresHid {
    Dataset(InstanceId),
    Collection(CollectionInstanceId),
}

#[derive(Debug, Default)]
pub struct ObjectImportTracker {
    pub libraries_by_key: HashMap<String, LibraryId>,
    /// Every dataset instance, history or library kind.
    pub hdas_by_key: HashMap<String, InstanceId>,
    /// Existing instances updated in place, by their internal id.
    pub hdas_by_id: HashMap<u64, InstanceId>,
    pub lddas_by_key: HashMap<String, InstanceId>,
    pub hdcas_by_key: HashMap<String, CollectionInstanceId>,
    pub hdcas_by_id: HashMap<u64, CollectionInstanceId>,
    pub dces_by_key: HashMap<String, ElementId>,
    pub jobs_by_key: HashMap<String, JobId>,
    pub implicit_collection_jobs_by_key: HashMap<String, ImplicitCollectionJobsId>,
    /// Unresolvable ancestor key -> key of the first instance that claimed it.
    pub hda_copied_from_sinks: HashMap<String, String>,
    pub hdca_copied_from_sinks: HashMap<String, String>,
    pub requires_hid: Vec<RequiresHid>,
}

impl ObjectImportTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_hda(&self, key: &str) -> Option<InstanceId> {
        lookup_with_sink(key, &self.hdas_by_key, &self.hda_copied_from_sinks)
    }

    pub fn find_hdca(&self, key: &str) -> Option<CollectionInstanceId> {
        lookup_with_sink(key, &self.hdcas_by_key, &self.hdca_copied_from_sinks)
    }
}

/// Look `key` up directly, then through the sink table.
pub fn lookup_with_sink<T: Copy>(
    key: &str,
    by_key: &HashMap<String, T>,
    sinks: &HashMap<String, String>,
) -> Option<T> {
    by_key
        .get(key)
        .or_else(|| sinks.get(key).and_then(|claimant| by_key.get(claimant)))
        .copied()
}

/// Outcome of resolving one copy chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopiedFrom<T> {
    /// No ancestry recorded.
    Unlinked,
    /// The ancestor was imported by this operation.
    Local(T),
    /// The ancestor lies outside the archive and this instance is the first
    /// to descend from it; later descendants will be redirected here.
    ClaimedSink { ancestor: String },
    /// The ancestor lies outside the archive and was already claimed.
    Sink { ancestor: String, claimant: T },
}

impl<T: Copy> CopiedFrom<T> {
    /// The instance to store as `copied_from`, if any.
    pub fn source(&self) -> Option<T> {
        match self {
            CopiedFrom::Local(id) | CopiedFrom::Sink { claimant: id, .. } => Some(*id),
            CopiedFrom::Unlinked | CopiedFrom::ClaimedSink { .. } => None,
        }
    }
}

/// Resolve the ancestor of `self_key` from its newest-first copy chain.
///
/// Links absent from this archive are dropped, except the chain's last
/// (oldest) link, which always survives. The first surviving link is the
/// ancestor. When it was not imported, the first record to reach it claims
/// the sink and every later record with the same ancestor becomes a copy of
/// that claimant. The result therefore depends on record order.
pub fn resolve_copied_from<T: Copy + Eq + Hash>(
    chain: &[String],
    self_key: &str,
    by_key: &HashMap<String, T>,
    sinks: &mut HashMap<String, String>,
) -> CopiedFrom<T> {
    let last = chain.len().saturating_sub(1);
    let ancestor = chain
        .iter()
        .enumerate()
        .find(|(index, key)| by_key.contains_key(key.as_str()) || *index == last)
        .map(|(_, key)| key);

    let ancestor = match ancestor {
        Some(key) if key != self_key => key,
        _ => return CopiedFrom::Unlinked,
    };

    if let Some(id) = by_key.get(ancestor) {
        return CopiedFrom::Local(*id);
    }

    match sinks.get(ancestor) {
        Some(claimant) if claimant != self_key => match by_key.get(claimant) {
            Some(id) => CopiedFrom::Sink {
                ancestor: ancestor.clone(),
                claimant: *id,
            },
            None => CopiedFrom::Unlinked,
        },
        Some(_) => CopiedFrom::ClaimedSink {
            ancestor: ancestor.clone(),
        },
        None => {
            sinks.insert(ancestor.clone(), self_key.to_string());
            CopiedFrom::ClaimedSink {
                ancestor: ancestor.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn index(entries: &[(&str, u32)]) -> HashMap<String, u32> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_direct_parent_in_archive() {
        let by_key = index(&[("a", 1), ("b", 2), ("c", 3)]);
        let mut sinks = HashMap::new();
        let resolved = resolve_copied_from(&keys(&["b", "c"]), "a", &by_key, &mut sinks);
        assert_eq!(resolved, CopiedFrom::Local(2));
        assert!(sinks.is_empty());
    }

    #[test]
    fn test_intermediate_links_outside_archive_are_skipped() {
        let by_key = index(&[("a", 1), ("c", 3)]);
        let mut sinks = HashMap::new();
        let resolved = resolve_copied_from(&keys(&["x", "c"]), "a", &by_key, &mut sinks);
        assert_eq!(resolved, CopiedFrom::Local(3));
    }

    #[test]
    fn test_first_record_claims_sink_and_later_ones_collapse() {
        let by_key = index(&[("b", 2), ("a", 1)]);
        let mut sinks = HashMap::new();

        let first = resolve_copied_from(&keys(&["x"]), "b", &by_key, &mut sinks);
        assert_eq!(
            first,
            CopiedFrom::ClaimedSink {
                ancestor: "x".to_string()
            }
        );
        assert_eq!(first.source(), None);

        let second = resolve_copied_from(&keys(&["x"]), "a", &by_key, &mut sinks);
        assert_eq!(second.source(), Some(2));
        assert_eq!(sinks.get("x").map(String::as_str), Some("b"));
    }

    #[test]
    fn test_terminal_link_survives_filtering() {
        let by_key = index(&[("a", 1)]);
        let mut sinks = HashMap::new();
        resolve_copied_from(&keys(&["y", "z"]), "a", &by_key, &mut sinks);
        assert_eq!(sinks.get("z").map(String::as_str), Some("a"));
        assert!(!sinks.contains_key("y"));
    }

    #[test]
    fn test_empty_chain_is_unlinked() {
        let by_key = index(&[("a", 1)]);
        let mut sinks = HashMap::new();
        let resolved: CopiedFrom<u32> = resolve_copied_from(&[], "a", &by_key, &mut sinks);
        assert_eq!(resolved, CopiedFrom::Unlinked);
    }

    #[test]
    fn test_lookup_falls_back_to_sink() {
        let by_key = index(&[("b", 2)]);
        let sinks: HashMap<String, String> =
            [("x".to_string(), "b".to_string())].into_iter().collect();
        assert_eq!(lookup_with_sink("b", &by_key, &sinks), Some(2));
        assert_eq!(lookup_with_sink("x", &by_key, &sinks), Some(2));
        assert_eq!(lookup_with_sink("y", &by_key, &sinks), None);
    }
}
