//! The record-store collaborator seen by the import and export stores.
//!
//! A [`LiveSession`] is attached to a persistent graph: objects become
//! queryable by id only after a flush. A [`SessionlessContext`] has no backing
//! store; it keeps its own graph and answers queries with a linear scan of the
//! objects it has seen, and it cannot allocate hids.

use tracing::debug;

use super::{ModelGraph, ObjectKind, ObjectRef};
use crate::errors::ModelStoreResult;

pub trait ModelSession {
    fn graph(&self) -> &ModelGraph;
    fn graph_mut(&mut self) -> &mut ModelGraph;

    /// Write pending objects so their identifiers are visible to later queries.
    fn flush(&mut self) -> ModelStoreResult<()>;

    /// Look up a persisted object by kind and internal id.
    fn query(&self, kind: ObjectKind, id: u64) -> Option<ObjectRef>;

    fn is_sessionless(&self) -> bool {
        false
    }
}

pub struct LiveSession<'a> {
    graph: &'a mut ModelGraph,
}

impl<'a> LiveSession<'a> {
    pub fn new(graph: &'a mut ModelGraph) -> Self {
        Self { graph }
    }
}

impl ModelSession for LiveSession<'_> {
    fn graph(&self) -> &ModelGraph {
        &*self.graph
    }

    fn graph_mut(&mut self) -> &mut ModelGraph {
        &mut *self.graph
    }

    fn flush(&mut self) -> ModelStoreResult<()> {
        let written = self.graph.commit_pending();
        debug!(written, "flushed session");
        Ok(())
    }

    fn query(&self, kind: ObjectKind, id: u64) -> Option<ObjectRef> {
        let object = object_ref(kind, id);
        (self.graph.contains(object) && self.graph.is_persisted(object)).then_some(object)
    }
}

#[derive(Debug, Default)]
pub struct SessionlessContext {
    graph: ModelGraph,
}

impl SessionlessContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_graph(self) -> ModelGraph {
        self.graph
    }
}

impl ModelSession for SessionlessContext {
    fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    fn graph_mut(&mut self) -> &mut ModelGraph {
        &mut self.graph
    }

    fn flush(&mut self) -> ModelStoreResult<()> {
        Ok(())
    }

    fn query(&self, kind: ObjectKind, id: u64) -> Option<ObjectRef> {
        self.graph
            .objects()
            .iter()
            .copied()
            .find(|object| object.kind() == kind && object.raw_id() == id)
    }

    fn is_sessionless(&self) -> bool {
        true
    }
}

fn object_ref(kind: ObjectKind, id: u64) -> ObjectRef {
    use super::*;
    match kind {
        ObjectKind::User => ObjectRef::User(UserId(id)),
        ObjectKind::History => ObjectRef::History(HistoryId(id)),
        ObjectKind::Dataset => ObjectRef::Dataset(DatasetId(id)),
        ObjectKind::Instance => ObjectRef::Instance(InstanceId(id)),
        ObjectKind::Collection => ObjectRef::Collection(CollectionId(id)),
        ObjectKind::Element => ObjectRef::Element(ElementId(id)),
        ObjectKind::CollectionInstance => ObjectRef::CollectionInstance(CollectionInstanceId(id)),
        ObjectKind::Library => ObjectRef::Library(LibraryId(id)),
        ObjectKind::Folder => ObjectRef::Folder(FolderId(id)),
        ObjectKind::LibraryDataset => ObjectRef::LibraryDataset(LibraryDatasetId(id)),
        ObjectKind::Job => ObjectRef::Job(JobId(id)),
        ObjectKind::ImplicitCollectionJobs => {
            ObjectRef::ImplicitCollectionJobs(ImplicitCollectionJobsId(id))
        }
    }
}
