mod common;

use anyhow::Result;
use common::{Destination, Fixture};
use modelstore::model::{DatasetInstance, InstanceKind, Library, LibraryDataset, LibraryFolder};
use modelstore::store::{ExportFiles, ImportOptions, ModelExportStore, SerializationOptions};

#[test]
fn library_import_rebuilds_folders_and_resolves_leaves() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let genome = fixture.stored_library_instance("hg38.fa", ">chr1\nACGT\n")?;
    let reads = fixture.stored_library_instance("reads.fastq", "@r\nACGT\n+\nIIII\n")?;
    // Second library instance over the same physical dataset as `genome`.
    let genome_dataset = fixture.graph.instance(genome).dataset;
    let alias = fixture.graph.add_instance(
        DatasetInstance::new_ldda("hg38 again", genome_dataset).with_extension("txt"),
    );

    let root = fixture.graph.add_folder(None, LibraryFolder::new("root"));
    let sub = fixture.graph.add_folder(Some(root), LibraryFolder::new("sequencing"));
    let mut library = Library::new("Reference data", root);
    library.synopsis = Some("shared references".to_string());
    let library = fixture.graph.add_library(library);
    fixture
        .graph
        .add_library_dataset(root, LibraryDataset::new("genome", genome));
    let mut leaf = LibraryDataset::new("run 1", reads);
    leaf.order_id = Some(1);
    fixture.graph.add_library_dataset(sub, leaf);
    fixture
        .graph
        .add_library_dataset(sub, LibraryDataset::new("genome copy", alias));

    let archive = fixture.path("archive");
    let exported = ModelExportStore::new(
        &fixture.graph,
        &fixture.store,
        &archive,
        SerializationOptions::default(),
        ExportFiles::Copy,
    )?
    .run(|export| export.export_library(library, false, false))?;
    assert_eq!(exported.libraries, 1);
    assert_eq!(exported.datasets, 2);

    let mut refused = Destination::new()?;
    let err = refused
        .import(&archive, ImportOptions::default())
        .expect_err("library creation is opt-in");
    assert!(err.to_string().contains("library"));

    let mut destination = Destination::new()?;
    let summary = destination.import(
        &archive,
        ImportOptions {
            allow_library_creation: true,
            ..ImportOptions::default()
        },
    )?;
    assert_eq!(summary.libraries, 1);
    assert!(summary.history.is_none());

    let graph = &destination.graph;
    assert_eq!(graph.instances().count(), 2);
    let imported = graph.libraries().next().expect("library imported");
    assert_eq!(imported.name, "Reference data");
    assert_eq!(imported.synopsis.as_deref(), Some("shared references"));

    let new_root = graph.folder(imported.root_folder);
    assert_eq!(new_root.name, "root");
    assert_eq!(new_root.datasets.len(), 1);
    let root_leaf = graph.library_dataset(new_root.datasets[0]);
    assert_eq!(root_leaf.name, "genome");
    let new_genome = root_leaf.instance;
    assert_eq!(
        graph.instance(new_genome).kind,
        InstanceKind::LibraryDatasetDatasetAssociation
    );
    assert_eq!(graph.instance(new_genome).history, None);
    assert_eq!(destination.payload(new_genome)?, ">chr1\nACGT\n");

    assert_eq!(new_root.folders.len(), 1);
    let new_sub = graph.folder(new_root.folders[0]);
    assert_eq!(new_sub.name, "sequencing");
    let leaves: Vec<&LibraryDataset> = new_sub
        .datasets
        .iter()
        .map(|id| graph.library_dataset(*id))
        .collect();
    assert_eq!(leaves.len(), 2);
    assert_eq!(leaves[0].name, "run 1");
    assert_eq!(leaves[0].order_id, Some(1));
    assert_eq!(destination.payload(leaves[0].instance)?, "@r\nACGT\n+\nIIII\n");
    assert_eq!(leaves[1].name, "genome copy");
    assert_eq!(leaves[1].instance, new_genome);
    Ok(())
}
