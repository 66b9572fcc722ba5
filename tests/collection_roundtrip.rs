mod common;

use anyhow::Result;
use common::{collection_key, Destination, Fixture};
use modelstore::model::{
    CollectionId, CollectionInstance, DatasetCollection, ElementObject, History,
    ImplicitCollectionJobs, ImplicitInput, InstanceId, Job, JobState, ModelGraph, PopulatedState,
};
use modelstore::store::ImportOptions;

fn element_names(graph: &ModelGraph, collection: CollectionId) -> Vec<String> {
    graph
        .collection_elements(collection)
        .iter()
        .map(|element| element.element_identifier.clone())
        .collect()
}

fn list_of(
    fixture: &mut Fixture,
    name: &str,
    members: &[(&str, InstanceId)],
) -> CollectionInstance {
    let collection = fixture.graph.add_collection(DatasetCollection::new("list"));
    for (identifier, instance) in members {
        fixture
            .graph
            .add_element(collection, *identifier, ElementObject::Dataset(*instance));
    }
    CollectionInstance::new(name, collection)
}

#[test]
fn nested_collection_roundtrip_keeps_structure() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let history = fixture.graph.add_history(History::new("paired samples"));
    let outer = fixture.graph.add_collection(DatasetCollection::new("list:paired"));
    for sample in ["sample1", "sample2"] {
        let pair = fixture.graph.add_collection(DatasetCollection::new("paired"));
        for mate in ["forward", "reverse"] {
            let instance = fixture.stored_instance(
                &format!("{}_{}", sample, mate),
                &format!("{} {}", sample, mate),
            )?;
            fixture.graph.add_to_history(instance, history);
            fixture
                .graph
                .add_element(pair, mate, ElementObject::Dataset(instance));
        }
        fixture
            .graph
            .add_element(outer, sample, ElementObject::Collection(pair));
    }
    let hdca = fixture
        .graph
        .add_collection_instance(CollectionInstance::new("samples", outer));
    fixture.graph.add_collection_to_history(hdca, history);

    let archive = fixture.path("archive");
    let exported = fixture.export_history(history, &archive, false)?;
    assert_eq!(exported.collections, 1);
    assert_eq!(exported.datasets, 4);

    let mut destination = Destination::new()?;
    let summary = destination.import(&archive, ImportOptions::default())?;
    let graph = &destination.graph;
    let new_hdca = summary.tracker.hdcas_by_key[&collection_key(hdca)];
    let new_outer = graph.collection_instance(new_hdca).collection;
    assert_eq!(graph.collection(new_outer).collection_type, "list:paired");
    assert_eq!(element_names(graph, new_outer), vec!["sample1", "sample2"]);

    for (index, element) in graph.collection_elements(new_outer).iter().enumerate() {
        assert_eq!(element.element_index, index as u32);
        let pair = match element.object {
            ElementObject::Collection(pair) => pair,
            ElementObject::Dataset(_) => panic!("expected a nested pair"),
        };
        assert_eq!(graph.collection(pair).collection_type, "paired");
        assert_eq!(element_names(graph, pair), vec!["forward", "reverse"]);
        let names: Vec<&str> = graph
            .collection_dataset_instances(pair)
            .into_iter()
            .map(|instance| graph.instance(instance).name.as_str())
            .collect();
        let sample = element.element_identifier.as_str();
        assert_eq!(
            names,
            vec![format!("{}_forward", sample), format!("{}_reverse", sample)]
        );
    }
    let first = graph.collection_dataset_instances(new_outer)[0];
    assert_eq!(destination.payload(first)?, "sample1 forward");
    Ok(())
}

#[test]
fn mapped_over_collection_keeps_its_job_grouping() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let history = fixture.graph.add_history(History::new("map over"));
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    for name in ["a", "b"] {
        let input = fixture.stored_instance(&format!("in_{}", name), name)?;
        fixture.graph.add_to_history(input, history);
        inputs.push((name, input));
        let output = fixture.stored_instance(&format!("out_{}", name), &name.repeat(2))?;
        fixture.graph.add_to_history(output, history);
        outputs.push((name, output));
    }

    let input_list = list_of(&mut fixture, "inputs", &inputs);
    let input_hdca = fixture.graph.add_collection_instance(input_list);
    fixture.graph.add_collection_to_history(input_hdca, history);

    let mut jobs = Vec::new();
    for ((_, input), (_, output)) in inputs.iter().zip(&outputs) {
        let mut job = Job::new("cat1");
        job.state = JobState::Ok;
        let job = fixture.graph.add_job(job);
        fixture.graph.add_job_input_dataset(job, "input1", *input);
        fixture.graph.add_job_output_dataset(job, "out_file1", *output);
        jobs.push(job);
    }
    // Grouping order differs from creation order.
    let mut grouping = ImplicitCollectionJobs::new(PopulatedState::Ok);
    grouping.add_job(jobs[1]);
    grouping.add_job(jobs[0]);
    let grouping = fixture.graph.add_implicit_collection_jobs(grouping);

    let mut output_list = list_of(&mut fixture, "outputs", &outputs);
    output_list.implicit_output_name = Some("out_file1".to_string());
    output_list.implicit_collection_jobs = Some(grouping);
    output_list.implicit_input_collections = vec![ImplicitInput {
        name: "input1".to_string(),
        input: input_hdca,
    }];
    let output_hdca = fixture.graph.add_collection_instance(output_list);
    fixture.graph.add_collection_to_history(output_hdca, history);
    for job in &jobs {
        fixture
            .graph
            .add_job_input_collection(*job, "input1", input_hdca);
        fixture
            .graph
            .add_job_output_collection(*job, "out_file1", output_hdca);
    }
    assert_eq!(fixture.graph.collection_instance(output_hdca).job, None);

    let archive = fixture.path("archive");
    let exported = fixture.export_history(history, &archive, false)?;
    assert_eq!(exported.jobs, 2);
    assert_eq!(exported.implicit_collection_jobs, 1);

    let mut destination = Destination::new()?;
    let summary = destination.import(&archive, ImportOptions::default())?;
    assert_eq!(summary.implicit_collection_jobs, 1);
    let graph = &destination.graph;
    let new_input = summary.tracker.hdcas_by_key[&collection_key(input_hdca)];
    let new_output = summary.tracker.hdcas_by_key[&collection_key(output_hdca)];

    let produced = graph.collection_instance(new_output);
    assert_eq!(
        produced.implicit_input_collections,
        vec![ImplicitInput {
            name: "input1".to_string(),
            input: new_input,
        }]
    );
    assert_eq!(produced.implicit_output_name.as_deref(), Some("out_file1"));
    assert_eq!(produced.job, None);
    let new_grouping = produced.implicit_collection_jobs.expect("grouping relinked");
    assert_eq!(graph.all_implicit_collection_jobs().count(), 1);

    let order: Vec<(u32, String)> = graph
        .implicit_collection_jobs(new_grouping)
        .jobs
        .iter()
        .map(|entry| {
            let job = graph.job(entry.job);
            (
                entry.order_index,
                graph.instance(job.output_datasets[0].dataset).name.clone(),
            )
        })
        .collect();
    assert_eq!(
        order,
        vec![(0, "out_b".to_string()), (1, "out_a".to_string())]
    );
    for job in graph.jobs() {
        assert_eq!(job.output_collections.len(), 1);
        assert_eq!(job.output_collections[0].collection, new_output);
        assert_eq!(job.input_collections[0].collection, new_input);
    }
    Ok(())
}

#[test]
fn implicit_input_outside_the_archive_is_skipped() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let elsewhere = fixture.graph.add_history(History::new("inputs"));
    let history = fixture.graph.add_history(History::new("outputs"));
    let input = fixture.stored_instance("in", "in")?;
    fixture.graph.add_to_history(input, elsewhere);
    let input_list = list_of(&mut fixture, "inputs", &[("in", input)]);
    let input_hdca = fixture.graph.add_collection_instance(input_list);
    fixture.graph.add_collection_to_history(input_hdca, elsewhere);

    let output = fixture.stored_instance("out", "out")?;
    fixture.graph.add_to_history(output, history);
    let mut output_list = list_of(&mut fixture, "outputs", &[("out", output)]);
    output_list.implicit_input_collections = vec![ImplicitInput {
        name: "input1".to_string(),
        input: input_hdca,
    }];
    let output_hdca = fixture.graph.add_collection_instance(output_list);
    fixture.graph.add_collection_to_history(output_hdca, history);

    let archive = fixture.path("archive");
    fixture.export_history(history, &archive, false)?;

    let mut destination = Destination::new()?;
    let summary = destination.import(&archive, ImportOptions::default())?;
    let new_output = summary.tracker.hdcas_by_key[&collection_key(output_hdca)];
    assert!(destination
        .graph
        .collection_instance(new_output)
        .implicit_input_collections
        .is_empty());
    Ok(())
}

#[test]
fn collection_copies_link_to_parent_and_collapse_on_sink() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let elsewhere = fixture.graph.add_history(History::new("shared"));
    let history = fixture.graph.add_history(History::new("analysis"));

    let local = fixture.stored_instance("local", "local")?;
    fixture.graph.add_to_history(local, history);
    let original = list_of(&mut fixture, "original", &[("local", local)]);
    let original_collection = original.collection;
    let original = fixture.graph.add_collection_instance(original);
    fixture.graph.add_collection_to_history(original, history);
    let mut copy = CollectionInstance::new("copy", original_collection);
    copy.copied_from = Some(original);
    let copy = fixture.graph.add_collection_instance(copy);
    fixture.graph.add_collection_to_history(copy, history);

    let shared = fixture.stored_instance("shared", "shared")?;
    fixture.graph.add_to_history(shared, elsewhere);
    let external = list_of(&mut fixture, "external", &[("shared", shared)]);
    let external_collection = external.collection;
    let external = fixture.graph.add_collection_instance(external);
    fixture.graph.add_collection_to_history(external, elsewhere);
    let mut claimants = Vec::new();
    for name in ["first copy", "second copy"] {
        let mut copy = CollectionInstance::new(name, external_collection);
        copy.copied_from = Some(external);
        let copy = fixture.graph.add_collection_instance(copy);
        fixture.graph.add_collection_to_history(copy, history);
        claimants.push(copy);
    }

    let archive = fixture.path("archive");
    let exported = fixture.export_history(history, &archive, false)?;
    assert_eq!(exported.collections, 4);

    let mut destination = Destination::new()?;
    let summary = destination.import(&archive, ImportOptions::default())?;
    let graph = &destination.graph;
    let tracked = |id| summary.tracker.hdcas_by_key[&collection_key(id)];

    assert_eq!(graph.collection_instance(tracked(original)).copied_from, None);
    assert_eq!(
        graph.collection_instance(tracked(copy)).copied_from,
        Some(tracked(original))
    );
    assert_eq!(
        graph.collection_instance(tracked(claimants[0])).copied_from,
        None
    );
    assert_eq!(
        graph.collection_instance(tracked(claimants[1])).copied_from,
        Some(tracked(claimants[0]))
    );
    assert_eq!(
        summary.tracker.hdca_copied_from_sinks.get(&collection_key(external)),
        Some(&collection_key(claimants[0]))
    );
    Ok(())
}
