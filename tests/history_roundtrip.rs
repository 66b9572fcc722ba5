mod common;

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::Result;
use common::{key, Destination, Fixture};
use modelstore::common::read_json_file;
use modelstore::model::{
    AnnotationStore, CollectionInstance, DatasetCollection, DatasetState, ElementObject, History,
    ItemRef, Job, JobState, ModelSession, SessionlessContext, User,
};
use modelstore::object_store::DiskObjectStore;
use modelstore::store::{
    open_archive, DatasetRecord, ExportContainer, ExportFiles, ExportTarget, ImportOptions,
    ModelExportStore, ModelImportStore, SerializationOptions, ATTRS_FILENAME_DATASETS,
    PROVENANCE_SUFFIX,
};
use serde_json::json;

#[test]
fn history_roundtrip_preserves_structure() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let owner = fixture.graph.add_user(User::new("owner@example.org"));
    let mut history = History::new("RNA-seq");
    history.user = Some(owner);
    let history = fixture.graph.add_history(history);

    let forward = fixture.stored_instance("reads_1", "@r1\nACGT\n")?;
    let reverse = fixture.stored_instance("reads_2", "@r2\nTGCA\n")?;
    let counts = fixture.stored_instance("counts", "gene\t4\n")?;
    for instance in [forward, reverse, counts] {
        fixture.graph.add_to_history(instance, history);
    }
    fixture.graph.instance_mut(forward).tags = vec!["name:forward".to_string()];
    fixture
        .graph
        .item_attrs_mut()
        .add_annotation(owner, ItemRef::Dataset(forward), "first mate");

    let collection = fixture.graph.add_collection(DatasetCollection::new("list"));
    fixture
        .graph
        .add_element(collection, "second", ElementObject::Dataset(reverse));
    fixture
        .graph
        .add_element(collection, "first", ElementObject::Dataset(forward));
    let pair = fixture
        .graph
        .add_collection_instance(CollectionInstance::new("mates", collection));
    fixture.graph.add_collection_to_history(pair, history);

    let mut job = Job::new("featurecounts");
    job.state = JobState::Ok;
    job.params = serde_json::from_value(json!({
        "alignment": {"src": "hda", "id": forward.get()},
        "strand": "reverse"
    }))?;
    let job = fixture.graph.add_job(job);
    fixture.graph.add_job_input_dataset(job, "alignment", forward);
    fixture.graph.add_job_input_dataset(job, "alignment", reverse);
    fixture.graph.add_job_output_dataset(job, "counts", counts);

    let archive = fixture.path("archive");
    let exported = ModelExportStore::new(
        &fixture.graph,
        &fixture.store,
        &archive,
        SerializationOptions::default(),
        ExportFiles::Copy,
    )?
    .with_user(owner)
    .run(|export| export.export_history(history, false, false))?;
    assert_eq!(exported.datasets, 3);
    assert_eq!(exported.collections, 1);
    assert_eq!(exported.jobs, 1);

    let mut destination = Destination::new()?;
    let importer = destination.graph.add_user(User::new("importer@example.org"));
    let summary = destination.import(
        &archive,
        ImportOptions {
            user: Some(importer),
            ..ImportOptions::default()
        },
    )?;
    let graph = &destination.graph;
    let new_history = summary.history.expect("history recreated");
    assert!(summary.new_history);
    assert_eq!(graph.history(new_history).name, "RNA-seq");
    assert_eq!(graph.instances().count(), 3);
    assert_eq!(graph.collection_instances().count(), 1);
    assert_eq!(graph.jobs().count(), 1);

    let new_pair = graph.history_collection_instances(new_history)[0];
    let elements = graph.collection_elements(graph.collection_instance(new_pair).collection);
    let order: Vec<(u32, &str, &str)> = elements
        .iter()
        .map(|element| {
            let name = match element.object {
                ElementObject::Dataset(instance) => graph.instance(instance).name.as_str(),
                ElementObject::Collection(_) => "",
            };
            (element.element_index, element.element_identifier.as_str(), name)
        })
        .collect();
    assert_eq!(
        order,
        vec![(0, "second", "reads_2"), (1, "first", "reads_1")]
    );

    let new_forward = summary.tracker.hdas_by_key[&key(forward)];
    assert_eq!(destination.payload(new_forward)?, "@r1\nACGT\n");
    assert_eq!(
        graph.instance(new_forward).tags,
        vec!["name:forward".to_string()]
    );
    assert_eq!(
        graph
            .item_attrs()
            .get_annotation_string(importer, ItemRef::Dataset(new_forward))
            .as_deref(),
        Some("first mate")
    );

    let new_job = graph.jobs().next().expect("job imported");
    assert_eq!(new_job.state, JobState::Ok);
    assert_eq!(new_job.input_datasets.len(), 2);
    assert_eq!(new_job.params["alignment"]["id"], json!(new_forward.get()));
    assert_eq!(new_job.params["strand"], json!("reverse"));
    let new_counts = summary.tracker.hdas_by_key[&key(counts)];
    assert_eq!(graph.instance(new_counts).creating_job, Some(new_job.id));
    Ok(())
}

#[test]
fn copy_chain_links_each_instance_to_its_parent() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let history = fixture.graph.add_history(History::new("copies"));
    let original = fixture.stored_instance("reference.fa", ">chr1\nACGT\n")?;
    fixture.graph.add_to_history(original, history);
    let middle = fixture.copy_instance(original);
    fixture.graph.add_to_history(middle, history);
    let latest = fixture.copy_instance(middle);
    fixture.graph.add_to_history(latest, history);

    let archive = fixture.path("archive");
    fixture.export_history(history, &archive, false)?;

    let records: Vec<DatasetRecord> = read_json_file(&archive.join(ATTRS_FILENAME_DATASETS))?;
    let latest_record = records
        .iter()
        .find(|record| record.encoded_id.as_deref() == Some(key(latest).as_str()))
        .expect("latest exported");
    assert_eq!(
        latest_record.copied_from_history_dataset_association_id_chain,
        vec![key(middle), key(original)]
    );

    let mut destination = Destination::new()?;
    let summary = destination.import(&archive, ImportOptions::default())?;
    let new_original = summary.tracker.hdas_by_key[&key(original)];
    let new_middle = summary.tracker.hdas_by_key[&key(middle)];
    let new_latest = summary.tracker.hdas_by_key[&key(latest)];

    let graph = &destination.graph;
    assert_eq!(graph.instance(new_latest).copied_from, Some(new_middle));
    assert_eq!(graph.instance(new_middle).copied_from, Some(new_original));
    assert_eq!(graph.instance(new_original).copied_from, None);
    Ok(())
}

#[test]
fn copies_of_an_unexported_dataset_collapse_onto_the_first() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let elsewhere = fixture.graph.add_history(History::new("shared data"));
    let external = fixture.stored_instance("genome.fa", ">chr1\n")?;
    fixture.graph.add_to_history(external, elsewhere);

    let history = fixture.graph.add_history(History::new("analysis"));
    let first_copy = fixture.copy_instance(external);
    fixture.graph.add_to_history(first_copy, history);
    let second_copy = fixture.copy_instance(external);
    fixture.graph.add_to_history(second_copy, history);

    let archive = fixture.path("archive");
    let exported = fixture.export_history(history, &archive, false)?;
    assert_eq!(exported.datasets, 2);

    let mut destination = Destination::new()?;
    let summary = destination.import(&archive, ImportOptions::default())?;
    let new_first = summary.tracker.hdas_by_key[&key(first_copy)];
    let new_second = summary.tracker.hdas_by_key[&key(second_copy)];

    assert_eq!(destination.graph.instance(new_first).copied_from, None);
    assert_eq!(
        destination.graph.instance(new_second).copied_from,
        Some(new_first)
    );
    assert_eq!(
        summary.tracker.hda_copied_from_sinks.get(&key(external)),
        Some(&key(first_copy))
    );
    assert_eq!(summary.tracker.find_hda(&key(external)), Some(new_first));
    Ok(())
}

#[test]
fn original_hids_survive_only_in_a_recreated_history() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let history = fixture.graph.add_history(History::new("gapped"));
    for (name, hid) in [("one", 1), ("three", 3), ("seven", 7)] {
        let instance = fixture.stored_instance(name, name)?;
        fixture.graph.attach_instance(instance, history, Some(hid));
    }
    let archive = fixture.path("archive");
    fixture.export_history(history, &archive, false)?;

    let mut recreated = Destination::new()?;
    let summary = recreated.import(&archive, ImportOptions::default())?;
    let new_history = summary.history.expect("history recreated");
    assert_eq!(recreated.hids(new_history), vec![Some(1), Some(3), Some(7)]);
    assert_eq!(recreated.graph.history(new_history).hid_counter, 8);
    assert_eq!(summary.hid_block_start, None);

    let mut existing = Destination::new()?;
    let target = existing.graph.add_history(History::new("already in use"));
    existing.graph.history_mut(target).reserve_hids(4);
    let summary = existing.import(
        &archive,
        ImportOptions {
            import_history: Some(target),
            ..ImportOptions::default()
        },
    )?;
    assert_eq!(summary.history, Some(target));
    assert!(!summary.new_history);
    assert_eq!(summary.hid_block_start, Some(5));
    assert_eq!(existing.hids(target), vec![Some(5), Some(6), Some(7)]);
    let names: Vec<&str> = existing
        .graph
        .history_instances(target)
        .into_iter()
        .map(|instance| existing.graph.instance(instance).name.as_str())
        .collect();
    assert_eq!(names, vec!["one", "three", "seven"]);
    assert_eq!(existing.graph.history(target).hid_counter, 8);
    Ok(())
}

#[test]
fn missing_payload_is_discarded_not_fatal() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let history = fixture.graph.add_history(History::new("partial"));
    let kept = fixture.stored_instance("kept", "kept")?;
    let lost = fixture.stored_instance("lost", "lost")?;
    fixture.graph.add_to_history(kept, history);
    fixture.graph.add_to_history(lost, history);
    let archive = fixture.path("archive");
    fixture.export_history(history, &archive, false)?;

    let records: Vec<DatasetRecord> = read_json_file(&archive.join(ATTRS_FILENAME_DATASETS))?;
    let lost_record = records
        .iter()
        .find(|record| record.name == "lost")
        .expect("lost exported");
    fs::remove_file(archive.join(lost_record.file_name.as_deref().expect("payload written")))?;

    let mut destination = Destination::new()?;
    let summary = destination.import(&archive, ImportOptions::default())?;
    assert_eq!(summary.discarded_datasets, 1);

    let graph = &destination.graph;
    let new_lost = graph.dataset(graph.instance(summary.tracker.hdas_by_key[&key(lost)]).dataset);
    assert_eq!(new_lost.state, DatasetState::Discarded);
    assert!(new_lost.deleted && new_lost.purged);

    let new_kept = summary.tracker.hdas_by_key[&key(kept)];
    assert_eq!(graph.dataset(graph.instance(new_kept).dataset).state, DatasetState::Ok);
    assert_eq!(destination.payload(new_kept)?, "kept");
    Ok(())
}

fn keys_in(dir: &Path, name: &str) -> Result<BTreeSet<String>> {
    let records: Vec<DatasetRecord> = read_json_file(&dir.join(name))?;
    Ok(records.into_iter().filter_map(|r| r.encoded_id).collect())
}

#[test]
fn deleted_dataset_goes_to_the_provenance_file() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let history = fixture.graph.add_history(History::new("cleanup"));
    let live = fixture.stored_instance("live", "live")?;
    let removed = fixture.stored_instance("removed", "removed")?;
    fixture.graph.add_to_history(live, history);
    fixture.graph.add_to_history(removed, history);
    fixture.graph.instance_mut(removed).deleted = true;

    let provenance = format!("{}{}", ATTRS_FILENAME_DATASETS, PROVENANCE_SUFFIX);

    let first = fixture.path("first");
    let second = fixture.path("second");
    let summary = fixture.export_history(history, &first, false)?;
    fixture.export_history(history, &second, false)?;
    assert_eq!(summary.datasets, 1);
    assert_eq!(summary.provenance_datasets, 1);

    assert_eq!(
        keys_in(&first, ATTRS_FILENAME_DATASETS)?,
        BTreeSet::from([key(live)])
    );
    assert_eq!(
        keys_in(&first, &provenance)?,
        BTreeSet::from([key(removed)])
    );
    assert_eq!(
        keys_in(&first, ATTRS_FILENAME_DATASETS)?,
        keys_in(&second, ATTRS_FILENAME_DATASETS)?
    );
    assert_eq!(keys_in(&first, &provenance)?, keys_in(&second, &provenance)?);
    assert_eq!(
        fs::read(first.join(ATTRS_FILENAME_DATASETS))?,
        fs::read(second.join(ATTRS_FILENAME_DATASETS))?
    );

    let records: Vec<DatasetRecord> = read_json_file(&first.join(&provenance))?;
    assert!(!records[0].exported);
    assert!(records[0].file_name.is_none());
    Ok(())
}

#[test]
fn tar_gz_container_roundtrip() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let history = fixture.graph.add_history(History::new("packed"));
    for name in ["a", "b"] {
        let instance = fixture.stored_instance(name, name)?;
        fixture.graph.add_to_history(instance, history);
    }

    let output = fixture.path("history.tar.gz");
    let target = ExportTarget::new(ExportContainer::Tar { gzip: true }, &output)?;
    ModelExportStore::new(
        &fixture.graph,
        &fixture.store,
        target.directory(),
        SerializationOptions::default(),
        ExportFiles::Copy,
    )?
    .run(|export| export.export_history(history, false, false))?;
    target.finish()?;
    assert!(output.is_file());

    let unpacked = open_archive(&output)?;
    let mut destination = Destination::new()?;
    let summary = destination.import(unpacked.root(), ImportOptions::default())?;
    assert_eq!(summary.datasets, 2);
    let new_history = summary.history.expect("history recreated");
    assert_eq!(destination.graph.history_instances(new_history).len(), 2);
    assert_eq!(destination.hids(new_history), vec![Some(1), Some(2)]);
    Ok(())
}

#[test]
fn sessionless_import_leaves_untrusted_hids_unassigned() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let history = fixture.graph.add_history(History::new("main"));
    let other = fixture.graph.add_history(History::new("other"));
    let own = fixture.stored_instance("own", "own")?;
    fixture.graph.add_to_history(own, history);
    let foreign = fixture.stored_instance("foreign", "foreign")?;
    fixture.graph.add_to_history(foreign, other);

    // Written for in-place editing: records keep their internal ids.
    let archive = fixture.path("archive");
    ModelExportStore::new(
        &fixture.graph,
        &fixture.store,
        &archive,
        SerializationOptions {
            for_edit: true,
            ..SerializationOptions::default()
        },
        ExportFiles::Copy,
    )?
    .run(|export| {
        export.export_history(history, false, false)?;
        export.add_dataset(foreign, true);
        Ok(())
    })?;

    let objects = tempfile::tempdir()?;
    let mut store = DiskObjectStore::new(objects.path())?;
    let mut context = SessionlessContext::new();
    let options = ImportOptions {
        allow_edit: true,
        ..ImportOptions::default()
    };
    let summary = ModelImportStore::new(&mut context, &mut store, &archive, options)?
        .perform_import()?;
    assert!(context.is_sessionless());
    assert_eq!(summary.hid_block_start, None);

    let graph = context.into_graph();
    assert_eq!(graph.instances().count(), 2);
    let new_own = summary.tracker.hdas_by_key[&key(own)];
    let new_foreign = summary.tracker.hdas_by_key[&key(foreign)];
    assert_eq!(graph.instance(new_own).hid, Some(1));
    assert_eq!(graph.instance(new_foreign).hid, None);
    assert_eq!(
        graph.instance(new_foreign).history,
        summary.history,
    );
    Ok(())
}
