//! Live object graph: histories, datasets, collections, libraries and jobs.
//!
//! [`ModelGraph`] owns every entity in typed arenas. Ids are assigned when an
//! entity is added and double as the internal (database) identifier; they are
//! never reused. Cross references between entities are stored as typed ids.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod collection;
pub mod dataset;
pub mod history;
pub mod item_attrs;
pub mod job;
pub mod library;
pub mod session;

pub use collection::{
    CollectionElement, CollectionInstance, DatasetCollection, ElementObject, ImplicitInput,
    PopulatedState,
};
pub use dataset::{Dataset, DatasetHash, DatasetInstance, DatasetSource, DatasetState, InstanceKind};
pub use history::{History, User};
pub use item_attrs::{AnnotationStore, ItemAttributes, ItemRef};
pub use job::{
    ImplicitCollectionJobs, ImplicitCollectionJobsJob, Job, JobCollectionAssociation,
    JobDatasetAssociation, JobState,
};
pub use library::{Library, LibraryDataset, LibraryFolder};
pub use session::{LiveSession, ModelSession, SessionlessContext};

macro_rules! model_id {
    ($($(#[$meta:meta])* $name:ident;)+) => {
        $(
            $(#[$meta])*
            #[derive(
                Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
                Deserialize,
            )]
            pub struct $name(pub u64);

            impl $name {
                pub fn get(self) -> u64 {
                    self.0
                }

                fn index(self) -> usize {
                    (self.0 as usize).saturating_sub(1)
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )+
    };
}

model_id! {
    UserId;
    HistoryId;
    DatasetId;
    /// Id of a history or library dataset instance. Both kinds share one sequence.
    InstanceId;
    CollectionId;
    ElementId;
    CollectionInstanceId;
    LibraryId;
    FolderId;
    LibraryDatasetId;
    JobId;
    ImplicitCollectionJobsId;
}

/// Typed reference to any entity held by a [`ModelGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    User(UserId),
    History(HistoryId),
    Dataset(DatasetId),
    Instance(InstanceId),
    Collection(CollectionId),
    Element(ElementId),
    CollectionInstance(CollectionInstanceId),
    Library(LibraryId),
    Folder(FolderId),
    LibraryDataset(LibraryDatasetId),
    Job(JobId),
    ImplicitCollectionJobs(ImplicitCollectionJobsId),
}

/// Entity category used for query-by-identifier lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    User,
    History,
    Dataset,
    Instance,
    Collection,
    Element,
    CollectionInstance,
    Library,
    Folder,
    LibraryDataset,
    Job,
    ImplicitCollectionJobs,
}

impl ObjectRef {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectRef::User(_) => ObjectKind::User,
            ObjectRef::History(_) => ObjectKind::History,
            ObjectRef::Dataset(_) => ObjectKind::Dataset,
            ObjectRef::Instance(_) => ObjectKind::Instance,
            ObjectRef::Collection(_) => ObjectKind::Collection,
            ObjectRef::Element(_) => ObjectKind::Element,
            ObjectRef::CollectionInstance(_) => ObjectKind::CollectionInstance,
            ObjectRef::Library(_) => ObjectKind::Library,
            ObjectRef::Folder(_) => ObjectKind::Folder,
            ObjectRef::LibraryDataset(_) => ObjectKind::LibraryDataset,
            ObjectRef::Job(_) => ObjectKind::Job,
            ObjectRef::ImplicitCollectionJobs(_) => ObjectKind::ImplicitCollectionJobs,
        }
    }

    pub fn raw_id(&self) -> u64 {
        match self {
            ObjectRef::User(id) => id.get(),
            ObjectRef::History(id) => id.get(),
            ObjectRef::Dataset(id) => id.get(),
            ObjectRef::Instance(id) => id.get(),
            ObjectRef::Collection(id) => id.get(),
            ObjectRef::Element(id) => id.get(),
            ObjectRef::CollectionInstance(id) => id.get(),
            ObjectRef::Library(id) => id.get(),
            ObjectRef::Folder(id) => id.get(),
            ObjectRef::LibraryDataset(id) => id.get(),
            ObjectRef::Job(id) => id.get(),
            ObjectRef::ImplicitCollectionJobs(id) => id.get(),
        }
    }
}

/// In-memory record store for the whole object graph.
///
/// Accessors taking a typed id index straight into the arena and panic on ids
/// that were not produced by this graph, like slice indexing. Use the
/// `get_*` variants for ids that come from outside (archive records, callers).
#[derive(Debug, Default, Clone)]
pub struct ModelGraph {
    users: Vec<User>,
    histories: Vec<History>,
    datasets: Vec<Dataset>,
    instances: Vec<DatasetInstance>,
    collections: Vec<DatasetCollection>,
    elements: Vec<CollectionElement>,
    collection_instances: Vec<CollectionInstance>,
    libraries: Vec<Library>,
    folders: Vec<LibraryFolder>,
    library_datasets: Vec<LibraryDataset>,
    jobs: Vec<Job>,
    implicit_collection_jobs: Vec<ImplicitCollectionJobs>,
    item_attrs: ItemAttributes,
    added: Vec<ObjectRef>,
    persisted: HashSet<ObjectRef>,
    flushed_upto: usize,
}

macro_rules! arena_access {
    ($($field:ident: $ty:ty, $id:ident, $variant:ident, $add:ident, $get:ident, $get_mut:ident, $by_id:ident, $by_id_mut:ident;)+) => {
        impl ModelGraph {
            $(
                pub fn $add(&mut self, mut value: $ty) -> $id {
                    let id = $id(self.$field.len() as u64 + 1);
                    value.id = id;
                    self.$field.push(value);
                    self.added.push(ObjectRef::$variant(id));
                    id
                }

                pub fn $by_id(&self, id: $id) -> &$ty {
                    &self.$field[id.index()]
                }

                pub fn $by_id_mut(&mut self, id: $id) -> &mut $ty {
                    &mut self.$field[id.index()]
                }

                pub fn $get(&self, raw_id: u64) -> Option<&$ty> {
                    if raw_id == 0 {
                        return None;
                    }
                    self.$field.get(raw_id as usize - 1)
                }

                pub fn $get_mut(&mut self, raw_id: u64) -> Option<&mut $ty> {
                    if raw_id == 0 {
                        return None;
                    }
                    self.$field.get_mut(raw_id as usize - 1)
                }
            )+
        }
    };
}

arena_access! {
    users: User, UserId, User, add_user, get_user, get_user_mut, user, user_mut;
    histories: History, HistoryId, History, add_history, get_history, get_history_mut, history, history_mut;
    datasets: Dataset, DatasetId, Dataset, add_dataset, get_dataset, get_dataset_mut, dataset, dataset_mut;
    instances: DatasetInstance, InstanceId, Instance, add_instance, get_instance, get_instance_mut, instance, instance_mut;
    collections: DatasetCollection, CollectionId, Collection, add_collection, get_collection, get_collection_mut, collection, collection_mut;
    elements: CollectionElement, ElementId, Element, add_element_row, get_element, get_element_mut, element, element_mut;
    collection_instances: CollectionInstance, CollectionInstanceId, CollectionInstance, add_collection_instance, get_collection_instance, get_collection_instance_mut, collection_instance, collection_instance_mut;
    libraries: Library, LibraryId, Library, add_library, get_library, get_library_mut, library, library_mut;
    folders: LibraryFolder, FolderId, Folder, add_folder_row, get_folder, get_folder_mut, folder, folder_mut;
    library_datasets: LibraryDataset, LibraryDatasetId, LibraryDataset, add_library_dataset_row, get_library_dataset, get_library_dataset_mut, library_dataset, library_dataset_mut;
    jobs: Job, JobId, Job, add_job, get_job, get_job_mut, job, job_mut;
    implicit_collection_jobs: ImplicitCollectionJobs, ImplicitCollectionJobsId, ImplicitCollectionJobs, add_implicit_collection_jobs, get_implicit_collection_jobs, get_implicit_collection_jobs_mut, implicit_collection_jobs, implicit_collection_jobs_mut;
}

impl ModelGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item_attrs(&self) -> &ItemAttributes {
        &self.item_attrs
    }

    pub fn item_attrs_mut(&mut self) -> &mut ItemAttributes {
        &mut self.item_attrs
    }

    /// Every object ever added, in insertion order.
    pub fn objects(&self) -> &[ObjectRef] {
        &self.added
    }

    /// Objects added since the last flush.
    pub fn pending(&self) -> &[ObjectRef] {
        &self.added[self.flushed_upto..]
    }

    /// Mark every pending object as persisted and return how many were written.
    pub(crate) fn commit_pending(&mut self) -> usize {
        let pending = self.added.len() - self.flushed_upto;
        self.persisted
            .extend(self.added[self.flushed_upto..].iter().copied());
        self.flushed_upto = self.added.len();
        pending
    }

    pub fn is_persisted(&self, object: ObjectRef) -> bool {
        self.persisted.contains(&object)
    }

    pub fn contains(&self, object: ObjectRef) -> bool {
        let raw = object.raw_id();
        let len = match object.kind() {
            ObjectKind::User => self.users.len(),
            ObjectKind::History => self.histories.len(),
            ObjectKind::Dataset => self.datasets.len(),
            ObjectKind::Instance => self.instances.len(),
            ObjectKind::Collection => self.collections.len(),
            ObjectKind::Element => self.elements.len(),
            ObjectKind::CollectionInstance => self.collection_instances.len(),
            ObjectKind::Library => self.libraries.len(),
            ObjectKind::Folder => self.folders.len(),
            ObjectKind::LibraryDataset => self.library_datasets.len(),
            ObjectKind::Job => self.jobs.len(),
            ObjectKind::ImplicitCollectionJobs => self.implicit_collection_jobs.len(),
        };
        raw >= 1 && raw as usize <= len
    }

    pub fn instances(&self) -> impl Iterator<Item = &DatasetInstance> {
        self.instances.iter()
    }

    pub fn collection_instances(&self) -> impl Iterator<Item = &CollectionInstance> {
        self.collection_instances.iter()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn libraries(&self) -> impl Iterator<Item = &Library> {
        self.libraries.iter()
    }

    pub fn histories(&self) -> impl Iterator<Item = &History> {
        self.histories.iter()
    }

    pub fn all_implicit_collection_jobs(&self) -> impl Iterator<Item = &ImplicitCollectionJobs> {
        self.implicit_collection_jobs.iter()
    }

    /// Dataset instances of a history ordered by hid, unnumbered ones last.
    pub fn history_instances(&self, history: HistoryId) -> Vec<InstanceId> {
        let mut ids: Vec<&DatasetInstance> = self
            .instances
            .iter()
            .filter(|i| i.history == Some(history))
            .collect();
        ids.sort_by_key(|i| (i.hid.unwrap_or(u32::MAX), i.id));
        ids.into_iter().map(|i| i.id).collect()
    }

    /// Collection instances of a history ordered by hid, unnumbered ones last.
    pub fn history_collection_instances(&self, history: HistoryId) -> Vec<CollectionInstanceId> {
        let mut ids: Vec<&CollectionInstance> = self
            .collection_instances
            .iter()
            .filter(|c| c.history == Some(history))
            .collect();
        ids.sort_by_key(|c| (c.hid.unwrap_or(u32::MAX), c.id));
        ids.into_iter().map(|c| c.id).collect()
    }

    /// Attach an instance to a history with an explicit hid (or none yet).
    pub fn attach_instance(&mut self, instance: InstanceId, history: HistoryId, hid: Option<u32>) {
        let row = self.instance_mut(instance);
        row.history = Some(history);
        row.hid = hid;
        if let Some(hid) = hid {
            self.history_mut(history).observe_hid(hid);
        }
    }

    pub fn attach_collection_instance(
        &mut self,
        instance: CollectionInstanceId,
        history: HistoryId,
        hid: Option<u32>,
    ) {
        let row = self.collection_instance_mut(instance);
        row.history = Some(history);
        row.hid = hid;
        if let Some(hid) = hid {
            self.history_mut(history).observe_hid(hid);
        }
    }

    /// Add an instance to a history, numbering it with the next free hid.
    /// Returns `None` and leaves the instance alone once the history has run out of hids.
    pub fn add_to_history(&mut self, instance: InstanceId, history: HistoryId) -> Option<u32> {
        let hid = self.history_mut(history).reserve_hids(1)?;
        let row = self.instance_mut(instance);
        row.history = Some(history);
        row.hid = Some(hid);
        Some(hid)
    }

    pub fn add_collection_to_history(
        &mut self,
        instance: CollectionInstanceId,
        history: HistoryId,
    ) -> Option<u32> {
        let hid = self.history_mut(history).reserve_hids(1)?;
        let row = self.collection_instance_mut(instance);
        row.history = Some(history);
        row.hid = Some(hid);
        Some(hid)
    }

    /// Append an element to a collection; its index is the current element count.
    pub fn add_element(
        &mut self,
        collection: CollectionId,
        element_identifier: impl Into<String>,
        object: ElementObject,
    ) -> ElementId {
        let element_index = self.collection(collection).elements.len() as u32;
        let id = self.add_element_row(CollectionElement {
            id: ElementId::default(),
            collection,
            element_index,
            element_identifier: element_identifier.into(),
            object,
        });
        let row = self.collection_mut(collection);
        row.elements.push(id);
        row.element_count = Some(row.elements.len() as u32);
        id
    }

    /// Elements of a collection in `element_index` order.
    pub fn collection_elements(&self, collection: CollectionId) -> Vec<&CollectionElement> {
        let mut elements: Vec<&CollectionElement> = self
            .collection(collection)
            .elements
            .iter()
            .map(|id| self.element(*id))
            .collect();
        elements.sort_by_key(|e| e.element_index);
        elements
    }

    /// Every dataset instance reachable from a collection, depth first.
    pub fn collection_dataset_instances(&self, collection: CollectionId) -> Vec<InstanceId> {
        let mut out = Vec::new();
        self.collect_dataset_instances(collection, &mut out);
        out
    }

    fn collect_dataset_instances(&self, collection: CollectionId, out: &mut Vec<InstanceId>) {
        for element in self.collection_elements(collection) {
            match element.object {
                ElementObject::Dataset(instance) => out.push(instance),
                ElementObject::Collection(child) => self.collect_dataset_instances(child, out),
            }
        }
    }

    pub fn add_folder(&mut self, parent: Option<FolderId>, folder: LibraryFolder) -> FolderId {
        let id = self.add_folder_row(LibraryFolder { parent, ..folder });
        if let Some(parent) = parent {
            self.folder_mut(parent).folders.push(id);
        }
        id
    }

    pub fn add_library_dataset(
        &mut self,
        folder: FolderId,
        library_dataset: LibraryDataset,
    ) -> LibraryDatasetId {
        let instance = library_dataset.instance;
        let id = self.add_library_dataset_row(LibraryDataset {
            folder,
            ..library_dataset
        });
        self.folder_mut(folder).datasets.push(id);
        self.instance_mut(instance).library_dataset = Some(id);
        id
    }

    pub fn add_job_input_dataset(&mut self, job: JobId, name: impl Into<String>, dataset: InstanceId) {
        self.job_mut(job).input_datasets.push(JobDatasetAssociation {
            name: name.into(),
            dataset,
        });
    }

    /// Record a job output; the first job to claim an instance becomes its creating job.
    pub fn add_job_output_dataset(
        &mut self,
        job: JobId,
        name: impl Into<String>,
        dataset: InstanceId,
    ) {
        self.job_mut(job).output_datasets.push(JobDatasetAssociation {
            name: name.into(),
            dataset,
        });
        let instance = self.instance_mut(dataset);
        if instance.creating_job.is_none() {
            instance.creating_job = Some(job);
        }
    }

    pub fn add_job_input_collection(
        &mut self,
        job: JobId,
        name: impl Into<String>,
        collection: CollectionInstanceId,
    ) {
        self.job_mut(job)
            .input_collections
            .push(JobCollectionAssociation {
                name: name.into(),
                collection,
            });
    }

    /// Record a job output collection; the first job to claim an ungrouped
    /// collection becomes its creating job.
    pub fn add_job_output_collection(
        &mut self,
        job: JobId,
        name: impl Into<String>,
        collection: CollectionInstanceId,
    ) {
        self.link_job_output_collection(job, name, collection);
        let instance = self.collection_instance_mut(collection);
        if instance.job.is_none() && instance.implicit_collection_jobs.is_none() {
            instance.job = Some(job);
        }
    }

    /// Record a job output collection without touching the collection's creating job.
    pub fn link_job_output_collection(
        &mut self,
        job: JobId,
        name: impl Into<String>,
        collection: CollectionInstanceId,
    ) {
        self.job_mut(job)
            .output_collections
            .push(JobCollectionAssociation {
                name: name.into(),
                collection,
            });
    }

    /// Follow `copied_from` links to the oldest reachable ancestor.
    pub fn instance_copy_root(&self, instance: InstanceId) -> InstanceId {
        let mut current = instance;
        let mut steps = 0;
        while let Some(parent) = self.instance(current).copied_from {
            current = parent;
            steps += 1;
            if steps > self.instances.len() {
                break;
            }
        }
        current
    }

    pub fn collection_instance_copy_root(&self, instance: CollectionInstanceId) -> CollectionInstanceId {
        let mut current = instance;
        let mut steps = 0;
        while let Some(parent) = self.collection_instance(current).copied_from {
            current = parent;
            steps += 1;
            if steps > self.collection_instances.len() {
                break;
            }
        }
        current
    }

    /// Walk the folder tree below `folder`, yielding library datasets depth first.
    pub fn folder_library_datasets(&self, folder: FolderId) -> Vec<LibraryDatasetId> {
        let mut out = Vec::new();
        let row = self.folder(folder);
        out.extend(row.datasets.iter().copied());
        for child in &row.folders {
            out.extend(self.folder_library_datasets(*child));
        }
        out
    }
}
