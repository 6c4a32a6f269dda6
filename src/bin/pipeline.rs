use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::Parser;
use medwiz::logging::init_tracing;
use medwiz::{
    load_inputs, Cli, Embedder, KnowledgeFact, ModelVerdict, Pipeline, PipelineError,
    PipelineObserver, PipelineRecord, Scored, SigExample, SigInput, SimilarityIndex,
    SnapshotWriter, StructuredSig, ValidationVerdict,
};
use tokio::runtime::Builder;
use tracing::{info, warn};

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let embedder: Arc<dyn Embedder> = Arc::new(
        cli.runtime
            .build_embedder()
            .context("failed to build embedding client")?,
    );
    let sig_index: SimilarityIndex<SigExample> =
        SimilarityIndex::load(&cli.sig_index, Arc::clone(&embedder)).map_err(setup_error)?;
    let kb_index: SimilarityIndex<KnowledgeFact> =
        SimilarityIndex::load(&cli.kb_index, Arc::clone(&embedder)).map_err(setup_error)?;
    info!(
        sig_examples = sig_index.len(),
        kb_facts = kb_index.len(),
        dimensions = sig_index.dimensions(),
        "indexes loaded"
    );

    let inputs = load_inputs(&cli.input)
        .with_context(|| format!("failed to read prescriptions from {:?}", cli.input))?;
    if inputs.is_empty() {
        bail!("no prescriptions found in {:?}", cli.input);
    }

    let chat = cli.build_chat().context("failed to build chat client")?;
    let mut pipeline = Pipeline::new(sig_index, kb_index, Box::new(chat), cli.build_settings());
    let mut sink = SnapshotWriter::new(&cli.output);
    let stop = Arc::new(AtomicBool::new(false));
    install_stop_handler(Arc::clone(&stop))?;

    println!(
        "Processing {} prescription(s); results stream to {}",
        inputs.len(),
        cli.output.display()
    );
    let mut summary = pipeline
        .run(&inputs, &stop, &mut sink, &mut Narrator)
        .map_err(setup_error)?;

    if cli.follow_input && !summary.stopped_early {
        println!(
            "\nWatching {} for new prescriptions (Ctrl-C to stop)",
            cli.input.display()
        );
        let mut seen = inputs.len();
        while !stop.load(Ordering::Acquire) {
            thread::sleep(cli.poll_interval());
            let latest = match load_inputs(&cli.input) {
                Ok(latest) => latest,
                Err(err) => {
                    warn!(
                        error = %err,
                        path = %cli.input.display(),
                        "failed to re-read prescriptions"
                    );
                    continue;
                }
            };
            if latest.len() <= seen {
                continue;
            }
            info!(count = latest.len() - seen, "new prescriptions found");
            summary += pipeline
                .run(&latest[seen..], &stop, &mut sink, &mut Narrator)
                .map_err(setup_error)?;
            seen = latest.len();
        }
    }

    println!(
        "\nDone: {} processed, {} passed, {} flagged, {} failed{}",
        summary.processed,
        summary.passed,
        summary.flagged,
        summary.failed,
        if summary.stopped_early {
            " (stopped early)"
        } else {
            ""
        }
    );
    if summary.publish_failures > 0 {
        warn!(
            count = summary.publish_failures,
            path = %cli.output.display(),
            "some result snapshots could not be written"
        );
    }
    Ok(())
}

fn setup_error(err: PipelineError) -> anyhow::Error {
    match err {
        PipelineError::IndexUnavailable { .. } => {
            anyhow::Error::new(err).context("indexes must be built first; run medwiz-index")
        }
        other => anyhow::Error::new(other),
    }
}

/// First Ctrl-C finishes the current record and stops; a second exits at once.
fn install_stop_handler(stop: Arc<AtomicBool>) -> Result<()> {
    let rt = Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    thread::Builder::new()
        .name("medwiz-signal".into())
        .spawn(move || {
            rt.block_on(async {
                loop {
                    if tokio::signal::ctrl_c().await.is_err() {
                        warn!("unable to listen for Ctrl-C");
                        return;
                    }
                    if stop.swap(true, Ordering::AcqRel) {
                        eprintln!("second interrupt; exiting");
                        process::exit(130);
                    }
                    eprintln!("interrupt received; finishing current prescription");
                }
            });
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

/// Prints each stage to stdout for a live audience.
struct Narrator;

impl PipelineObserver for Narrator {
    fn on_dispatch(&mut self, index: usize, total: usize, input: &SigInput) {
        println!("\n=== Prescription {index}/{total} ===");
        if let Some(patient) = &input.patient_name {
            println!("Patient: {patient}");
        }
        if let Some(drug) = &input.drug_name {
            match &input.drug_code {
                Some(code) => println!("Drug: {drug} ({code})"),
                None => println!("Drug: {drug}"),
            }
        }
        println!("Sig: {}", input.sig_text);
    }

    fn on_examples(&mut self, examples: &[Scored<SigExample>]) {
        println!("-- Similar sigs --");
        for hit in examples {
            println!("  [{:.3}] {}", hit.score, hit.item.raw_text);
        }
    }

    fn on_translation(&mut self, sig: &StructuredSig, english_instructions: &str) {
        println!("-- Translation --");
        println!("  {english_instructions}");
        println!("  {}", sig.summary());
    }

    fn on_facts(&mut self, facts: &[Scored<KnowledgeFact>]) {
        println!("-- Knowledge base --");
        if facts.is_empty() {
            println!("  (no facts retrieved)");
        }
        for hit in facts {
            println!("  [{:.3}] {}", hit.score, hit.item.index_text());
        }
    }

    fn on_verdict(&mut self, verdict: &ValidationVerdict, model: &ModelVerdict) {
        let label = if verdict.passed { "PASS" } else { "FLAG" };
        println!("-- Verdict: {label} --");
        println!("  {}", verdict.reason);
        if model.passed != verdict.passed {
            println!("  model disagreed: {}", model.reason);
        }
    }

    fn on_failure(&mut self, error: &PipelineError) {
        println!("-- FAILED --");
        println!("  {error}");
    }

    fn on_commit(&mut self, record: &PipelineRecord) {
        println!("  stage reached: {}", record.stage_reached);
    }
}
