mod common;

use std::fs;
use std::path::Path;

use anyhow::Result;
use common::{Destination, Fixture};
use modelstore::common::{read_json_file, write_json_file};
use modelstore::model::{History, Job, JobState, ModelGraph};
use modelstore::store::{
    ArchiveFormat, ImportOptions, ATTRS_FILENAME_DATASETS, ATTRS_FILENAME_EXPORT,
    ATTRS_FILENAME_JOBS,
};
use serde_json::{json, Map, Value};

/// (input name, dataset name) pairs and output dataset names of the only job.
fn job_wiring(graph: &ModelGraph) -> (Vec<(String, String)>, Vec<String>) {
    let job = graph.jobs().next().expect("one job imported");
    let inputs = job
        .input_datasets
        .iter()
        .map(|a| (a.name.clone(), graph.instance(a.dataset).name.clone()))
        .collect();
    let outputs = job
        .output_datasets
        .iter()
        .map(|a| graph.instance(a.dataset).name.clone())
        .collect();
    (inputs, outputs)
}

/// Rewrite a current archive into the shape written before `export_attrs.txt`
/// existed: hid-keyed datasets and flat job mappings.
fn downgrade_to_legacy(archive: &Path) -> Result<()> {
    fs::remove_file(archive.join(ATTRS_FILENAME_EXPORT))?;

    let mut datasets: Vec<Map<String, Value>> =
        read_json_file(&archive.join(ATTRS_FILENAME_DATASETS))?;
    let mut hid_by_key = Map::new();
    for record in &mut datasets {
        let key = record.remove("encoded_id").expect("current record is keyed");
        record.remove("model_class");
        hid_by_key.insert(
            key.as_str().unwrap_or_default().to_string(),
            record["hid"].clone(),
        );
    }
    write_json_file(&archive.join(ATTRS_FILENAME_DATASETS), &datasets)?;

    let mut jobs: Vec<Map<String, Value>> = read_json_file(&archive.join(ATTRS_FILENAME_JOBS))?;
    for job in &mut jobs {
        let inputs = job
            .remove("input_dataset_mapping")
            .unwrap_or_else(|| json!({}));
        let outputs = job
            .remove("output_dataset_mapping")
            .unwrap_or_else(|| json!({}));
        job.remove("input_dataset_collection_mapping");
        job.remove("output_dataset_collection_mapping");

        let mut input_mapping = Map::new();
        for (name, keys) in inputs.as_object().into_iter().flatten() {
            for key in keys.as_array().into_iter().flatten() {
                let hid = hid_by_key[key.as_str().unwrap_or_default()].clone();
                input_mapping.insert(name.clone(), hid);
            }
        }
        let output_datasets: Vec<Value> = outputs
            .as_object()
            .into_iter()
            .flat_map(|mapping| mapping.values())
            .flat_map(|keys| keys.as_array().cloned().unwrap_or_default())
            .map(|key| hid_by_key[key.as_str().unwrap_or_default()].clone())
            .collect();
        job.insert("input_mapping".to_string(), Value::Object(input_mapping));
        job.insert("output_datasets".to_string(), Value::Array(output_datasets));
    }
    write_json_file(&archive.join(ATTRS_FILENAME_JOBS), &jobs)?;
    Ok(())
}

#[test]
fn legacy_and_current_job_mappings_rebuild_the_same_wiring() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let history = fixture.graph.add_history(History::new("minimal"));
    let input = fixture.stored_instance("input.fastq", "@r\nACGT\n+\nIIII\n")?;
    let output = fixture.stored_instance("trimmed.fastq", "@r\nACG\n+\nIII\n")?;
    fixture.graph.add_to_history(input, history);
    fixture.graph.add_to_history(output, history);
    let mut job = Job::new("trimmer");
    job.state = JobState::Ok;
    let job = fixture.graph.add_job(job);
    fixture.graph.add_job_input_dataset(job, "input1", input);
    fixture.graph.add_job_output_dataset(job, "out_file1", output);

    let current = fixture.path("current");
    let legacy = fixture.path("legacy");
    fixture.export_history(history, &current, false)?;
    fixture.export_history(history, &legacy, false)?;
    downgrade_to_legacy(&legacy)?;
    assert_eq!(ArchiveFormat::detect(&current), ArchiveFormat::Current);
    assert_eq!(ArchiveFormat::detect(&legacy), ArchiveFormat::Legacy);

    let mut from_current = Destination::new()?;
    let current_summary = from_current.import(&current, ImportOptions::default())?;
    let mut from_legacy = Destination::new()?;
    let legacy_summary = from_legacy.import(&legacy, ImportOptions::default())?;
    assert_eq!(current_summary.format, "current");
    assert_eq!(legacy_summary.format, "legacy");

    let (current_inputs, current_outputs) = job_wiring(&from_current.graph);
    let (legacy_inputs, legacy_outputs) = job_wiring(&from_legacy.graph);
    assert_eq!(
        current_inputs,
        vec![("input1".to_string(), "input.fastq".to_string())]
    );
    assert_eq!(current_inputs, legacy_inputs);
    assert_eq!(current_outputs, vec!["trimmed.fastq".to_string()]);
    assert_eq!(current_outputs, legacy_outputs);

    // Legacy outputs carry no name.
    let legacy_job = from_legacy.graph.jobs().next().expect("one job imported");
    assert_eq!(legacy_job.output_datasets[0].name, "");

    for destination in [&from_current, &from_legacy] {
        let produced = destination
            .graph
            .instances()
            .find(|instance| instance.name == "trimmed.fastq")
            .expect("output imported");
        assert!(produced.creating_job.is_some());
        assert_eq!(destination.payload(produced.id)?, "@r\nACG\n+\nIII\n");
    }
    Ok(())
}
