use super::{FolderId, InstanceId, LibraryDatasetId, LibraryId};

#[derive(Debug, Clone, PartialEq)]
pub struct Library {
    pub id: LibraryId,
    pub name: String,
    pub description: Option<String>,
    pub synopsis: Option<String>,
    pub root_folder: FolderId,
    pub deleted: bool,
}

impl Library {
    pub fn new(name: impl Into<String>, root_folder: FolderId) -> Self {
        Self {
            id: LibraryId::default(),
            name: name.into(),
            description: None,
            synopsis: None,
            root_folder,
            deleted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LibraryFolder {
    pub id: FolderId,
    pub name: String,
    pub description: Option<String>,
    pub genome_build: Option<String>,
    pub deleted: bool,
    pub parent: Option<FolderId>,
    pub folders: Vec<FolderId>,
    pub datasets: Vec<LibraryDatasetId>,
}

impl LibraryFolder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Leaf of a library folder tree wrapping one library dataset instance.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryDataset {
    pub id: LibraryDatasetId,
    pub folder: FolderId,
    pub name: String,
    pub info: Option<String>,
    pub order_id: Option<u32>,
    pub instance: InstanceId,
}

impl LibraryDataset {
    pub fn new(name: impl Into<String>, instance: InstanceId) -> Self {
        Self {
            id: LibraryDatasetId::default(),
            folder: FolderId::default(),
            name: name.into(),
            info: None,
            order_id: None,
            instance,
        }
    }
}
