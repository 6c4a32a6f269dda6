mod common;

use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    english, kb_index, knowledge_base, sig_index, sig_json, sig_json_without_english,
    verdict_json, OfflineEmbedder, Reply, ScriptedProvider, VocabEmbedder,
};
use medwiz::classifier::NO_ENTRY;
use medwiz::{
    Embedder, Outcome, Pipeline, PipelineError, PipelineRecord, PipelineSettings, RecordSink,
    Result, SigInput, Silent, SnapshotWriter, Stage,
};
use pretty_assertions::assert_eq;

#[derive(Default)]
struct MemorySink {
    published: Vec<Vec<PipelineRecord>>,
    stop_after: Option<(usize, Arc<AtomicBool>)>,
}

impl RecordSink for MemorySink {
    fn publish(&mut self, records: &[PipelineRecord]) -> io::Result<()> {
        self.published.push(records.to_vec());
        if let Some((limit, stop)) = &self.stop_after {
            if self.published.len() >= *limit {
                stop.store(true, Ordering::Release);
            }
        }
        Ok(())
    }
}

fn pipeline_with(provider: ScriptedProvider, query_embedder: Arc<dyn Embedder>) -> Pipeline {
    paced_pipeline(provider, query_embedder, PipelineSettings::default())
}

fn paced_pipeline(
    provider: ScriptedProvider,
    query_embedder: Arc<dyn Embedder>,
    settings: PipelineSettings,
) -> Pipeline {
    Pipeline::new(
        sig_index(Arc::clone(&query_embedder)),
        kb_index(query_embedder, knowledge_base()),
        Box::new(provider),
        settings,
    )
}

fn pipeline(provider: ScriptedProvider) -> Pipeline {
    pipeline_with(provider, Arc::new(VocabEmbedder))
}

fn prescription(sig: &str, drug: &str) -> SigInput {
    SigInput {
        sig_text: sig.to_string(),
        patient_name: Some("Carlos Diaz".to_string()),
        drug_name: Some(drug.to_string()),
        drug_code: None,
    }
}

fn amoxicillin_script() -> ScriptedProvider {
    ScriptedProvider::new()
        .translate(
            "500 mg po tid",
            Reply::Text(sig_json("amoxicillin", 500.0, "mg", "tid")),
        )
        .translate(
            "2000 mg po qd",
            Reply::Text(sig_json("amoxicillin", 2000.0, "mg", "once daily")),
        )
        .verdict(
            "amoxicillin",
            Reply::Text(verdict_json(true, "looks fine")),
        )
}

#[test]
fn every_record_ends_terminal_with_expected_outcome() {
    let provider = amoxicillin_script()
        .translate(
            "1 tab po q6h",
            Reply::Text(sig_json("paracetamol", 1.0, "tab", "q6h")),
        )
        .verdict("paracetamol", Reply::Text(verdict_json(true, "ok")))
        .translate("take something", Reply::Text("Sorry, I cannot help.".into()))
        .translate(
            "5 mg po daily",
            Reply::Text(sig_json("warfarin", 5.0, "mg", "daily")),
        )
        .verdict("warfarin", Reply::Text(verdict_json(true, "ok")));
    let inputs = vec![
        prescription("1 tab po q6h", "Paracetamol 500mg"),
        prescription("500 mg po tid", "Amoxicillin 500mg"),
        prescription("2000 mg po qd", "Amoxicillin 500mg"),
        prescription("take something", "Amoxicillin 500mg"),
        prescription("5 mg po daily", "Warfarin 5mg"),
    ];
    let mut pipeline = pipeline(provider);
    let mut sink = MemorySink::default();
    let stop = AtomicBool::new(false);

    let summary = pipeline
        .run(&inputs, &stop, &mut sink, &mut Silent)
        .expect("run");

    assert_eq!(summary.processed, 5);
    assert_eq!((summary.passed, summary.flagged, summary.failed), (2, 2, 1));
    assert!(!summary.stopped_early);
    let rows = pipeline.results().rows();
    assert!(rows.iter().all(|r| r.stage_reached.is_terminal()));
    let outcomes: Vec<Outcome> = rows.iter().map(PipelineRecord::outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            Outcome::Passed,
            Outcome::Passed,
            Outcome::Flagged,
            Outcome::Failed,
            Outcome::Flagged,
        ]
    );

    let overdose = &rows[2];
    let verdict = overdose.verdict.as_ref().expect("verdict");
    assert_eq!(verdict.reason, "dose 2000 mg outside expected range 250-500 mg");
    assert_eq!(
        overdose.model_verdict.as_ref().map(|v| v.passed),
        Some(true),
        "model opinion is kept even when the classifier disagrees"
    );
    assert_eq!(
        overdose.structured_sig.as_ref().map(|s| s.raw_source.as_str()),
        Some("2000 mg po qd")
    );
    assert_eq!(
        overdose.english_instructions,
        Some(english("amoxicillin", 2000.0, "mg", "once daily"))
    );

    let unparsable = &rows[3];
    assert!(unparsable.structured_sig.is_none());
    assert!(unparsable.english_instructions.is_none());
    assert!(unparsable
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with("schema violation")));

    let unknown = rows[4].verdict.as_ref().expect("verdict");
    assert_eq!(unknown.reason, NO_ENTRY);
    assert!(unknown.matched_facts.is_empty());

    assert_eq!(sink.published.len(), 5);
    assert_eq!(sink.published[2].len(), 3);
}

#[test]
fn unavailable_model_fails_one_record_and_run_continues() {
    let provider = amoxicillin_script().translate("1 cap po tid", Reply::Unavailable);
    let inputs = vec![
        prescription("1 cap po tid", "Amoxicillin 500mg"),
        prescription("500 mg po tid", "Amoxicillin 500mg"),
    ];
    let mut pipeline = pipeline(provider);
    let stop = AtomicBool::new(false);

    let summary = pipeline
        .run(&inputs, &stop, &mut MemorySink::default(), &mut Silent)
        .expect("run");

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.passed, 1);
    let failed = &pipeline.results().rows()[0];
    assert_eq!(failed.stage_reached, Stage::Failed);
    assert!(failed
        .error
        .as_deref()
        .is_some_and(|e| e.contains("model unavailable")));
}

#[test]
fn validation_failure_keeps_translation() {
    let provider = ScriptedProvider::new()
        .translate(
            "1 tab po bid",
            Reply::Text(sig_json("metformin", 1.0, "tablet", "bid")),
        )
        .verdict("metformin", Reply::Unavailable);
    let pipeline = pipeline(provider);

    let record = pipeline
        .process(&prescription("1 tab po bid", "Metformin 500mg"), &mut Silent)
        .expect("per-record failures are not fatal");

    assert_eq!(record.stage_reached, Stage::Failed);
    let sig = record.structured_sig.expect("translation kept");
    assert_eq!(sig.frequency, "twice daily");
    assert!(record.verdict.is_none());
}

#[test]
fn translation_without_english_fails_as_schema_violation() {
    let provider = ScriptedProvider::new()
        .translate(
            "1 tab po bid",
            Reply::Text(sig_json_without_english("metformin", 1.0, "tablet", "bid")),
        )
        .verdict("metformin", Reply::Text(verdict_json(true, "ok")));
    let pipeline = pipeline(provider);

    let record = pipeline
        .process(&prescription("1 tab po bid", "Metformin 500mg"), &mut Silent)
        .expect("per-record failures are not fatal");

    assert_eq!(record.stage_reached, Stage::Failed);
    assert!(record.structured_sig.is_none());
    assert!(record.english_instructions.is_none());
    let error = record.error.expect("error recorded");
    assert!(error.starts_with("schema violation"), "{error}");
    assert!(error.contains("english_instructions"), "{error}");
}

#[test]
fn stage_delay_paces_each_record() {
    let delay = Duration::from_millis(30);
    let settings = PipelineSettings::new(3, 3, 0.1, 256, delay);
    let pipeline = paced_pipeline(amoxicillin_script(), Arc::new(VocabEmbedder), settings);

    let started = Instant::now();
    let record = pipeline
        .process(&prescription("500 mg po tid", "Amoxicillin 500mg"), &mut Silent)
        .expect("process");
    let elapsed = started.elapsed();

    assert_eq!(record.stage_reached, Stage::Validated);
    // One pause after examples, translation and facts.
    assert!(elapsed >= delay * 3, "finished in {elapsed:?}");
}

#[test]
fn offline_embedding_endpoint_fails_records_not_the_run() {
    let mut pipeline = pipeline_with(amoxicillin_script(), Arc::new(OfflineEmbedder));
    let inputs = vec![
        prescription("500 mg po tid", "Amoxicillin 500mg"),
        prescription("2000 mg po qd", "Amoxicillin 500mg"),
    ];
    let stop = AtomicBool::new(false);

    let summary = pipeline
        .run(&inputs, &stop, &mut MemorySink::default(), &mut Silent)
        .expect("run");

    assert_eq!(summary.failed, 2);
    assert!(pipeline
        .results()
        .rows()
        .iter()
        .all(|r| r.stage_reached == Stage::Failed));
}

struct NarrowEmbedder;

impl Embedder for NarrowEmbedder {
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

#[test]
fn mismatched_query_model_aborts_the_run() {
    let mut pipeline = pipeline_with(amoxicillin_script(), Arc::new(NarrowEmbedder));
    let stop = AtomicBool::new(false);

    let err = pipeline
        .run(
            &[prescription("500 mg po tid", "Amoxicillin 500mg")],
            &stop,
            &mut MemorySink::default(),
            &mut Silent,
        )
        .expect_err("dimension mismatch is fatal");

    assert!(matches!(err, PipelineError::IndexUnavailable { .. }));
    assert!(pipeline.results().is_empty());
}

#[test]
fn stop_signal_is_honored_between_records() {
    let inputs = vec![
        prescription("500 mg po tid", "Amoxicillin 500mg"),
        prescription("2000 mg po qd", "Amoxicillin 500mg"),
    ];
    let stop = Arc::new(AtomicBool::new(false));
    let mut sink = MemorySink {
        stop_after: Some((1, Arc::clone(&stop))),
        ..MemorySink::default()
    };
    let mut pipeline = pipeline(amoxicillin_script());

    let summary = pipeline
        .run(&inputs, &stop, &mut sink, &mut Silent)
        .expect("run");

    assert!(summary.stopped_early);
    assert_eq!(summary.processed, 1);
    assert_eq!(pipeline.results().len(), 1);
    assert_eq!(
        pipeline.results().rows()[0].stage_reached,
        Stage::Validated
    );
}

#[test]
fn snapshot_file_tracks_results_table() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("results.jsonl");
    let inputs = vec![
        prescription("500 mg po tid", "Amoxicillin 500mg"),
        prescription("2000 mg po qd", "Amoxicillin 500mg"),
        prescription("500 mg po tid", "Amoxicillin 500mg"),
    ];
    let mut pipeline = pipeline(amoxicillin_script());
    let mut sink = SnapshotWriter::new(&path);
    let stop = AtomicBool::new(false);

    let summary = pipeline
        .run(&inputs, &stop, &mut sink, &mut Silent)
        .expect("run");
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.publish_failures, 0);

    let contents = fs::read_to_string(&path).expect("snapshot");
    let rows: Vec<PipelineRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("row"))
        .collect();
    assert_eq!(rows.len(), 2, "duplicate sig text replaces its row");
    assert_eq!(rows, pipeline.results().rows().to_vec());
    assert_eq!(rows[0].patient_name.as_deref(), Some("Carlos Diaz"));
}

#[test]
fn translate_prompt_carries_drug_and_closest_example() {
    let provider = amoxicillin_script();
    let log = provider.prompt_log();
    let pipeline = pipeline(provider);

    pipeline
        .process(&prescription("500 mg po tid", "Amoxicillin 500mg"), &mut Silent)
        .expect("process");

    let prompts = log.borrow();
    assert_eq!(prompts.len(), 2);
    let translate = &prompts[0];
    assert!(translate.contains("Prescribed drug: Amoxicillin 500mg"));
    assert!(translate.ends_with("Raw sig: 500 mg po tid\nStructured:"));
    assert!(translate.contains("English: Take 500 mg of amoxicillin by mouth three times daily."));
    let validate = &prompts[1];
    assert!(validate.starts_with("You are a cautious clinical pharmacist."));
    assert!(validate.contains("Reference 1: Drug: Amoxicillin."));
    assert!(validate.ends_with("Verdict:"));
}
