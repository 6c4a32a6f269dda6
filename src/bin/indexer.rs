use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use medwiz::index::{build_entries, write_index};
use medwiz::logging::init_tracing;
use medwiz::{KnowledgeFact, OllamaEmbedder, RuntimeArgs, SigExample};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "medwiz-index",
    about = "Embed sig examples and knowledge-base facts into the pipeline's indexes"
)]
struct IndexCli {
    /// JSONL corpus of translated sig examples
    #[arg(long, env = "MEDWIZ_SIG_SOURCE", default_value = "data/sig_examples.jsonl")]
    sig_source: PathBuf,

    /// JSONL corpus of dosing facts
    #[arg(long, env = "MEDWIZ_KB_SOURCE", default_value = "data/knowledge_base.jsonl")]
    kb_source: PathBuf,

    /// Output index for sig examples
    #[arg(long, env = "MEDWIZ_SIG_INDEX", default_value = "indexes/sig_examples.jsonl")]
    sig_index: PathBuf,

    /// Output index for knowledge-base facts
    #[arg(long, env = "MEDWIZ_KB_INDEX", default_value = "indexes/knowledge_base.jsonl")]
    kb_index: PathBuf,

    #[command(flatten)]
    runtime: RuntimeArgs,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = IndexCli::parse();
    let embedder = cli
        .runtime
        .build_embedder()
        .context("failed to build embedding client")?;
    info!(model = embedder.model(), batch = embedder.batch_size(), "indexing corpora");

    let examples: Vec<SigExample> = read_corpus(&cli.sig_source)?;
    for example in &examples {
        if let Err(err) = example.structured.validate() {
            warn!(raw = %example.raw_text, error = %err, "sig example has an invalid translation");
        }
    }
    let items = examples
        .into_iter()
        .map(|example| (example.raw_text.clone(), example))
        .collect();
    build_index(&embedder, items, &cli.sig_index)?;

    let facts: Vec<KnowledgeFact> = read_corpus(&cli.kb_source)?;
    for fact in &facts {
        if let Err(err) = fact.check() {
            warn!(drug = %fact.drug, error = %err, "knowledge-base fact will fail every check");
        }
    }
    let items = facts
        .into_iter()
        .map(|fact| (fact.index_text(), fact))
        .collect();
    build_index(&embedder, items, &cli.kb_index)?;
    Ok(())
}

fn read_corpus<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("failed to open {path:?}"))?;
    let mut rows = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line)
            .with_context(|| format!("invalid row at {}:{}", path.display(), line_no + 1))?;
        rows.push(row);
    }
    if rows.is_empty() {
        bail!("{path:?} contains no rows");
    }
    Ok(rows)
}

fn build_index<T: Serialize>(
    embedder: &OllamaEmbedder,
    items: Vec<(String, T)>,
    dest: &Path,
) -> Result<()> {
    let started = Instant::now();
    let count = items.len();
    let entries = build_entries(embedder, items, embedder.batch_size())
        .with_context(|| format!("failed to embed rows for {dest:?}"))?;
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("failed to create {parent:?}"))?;
    }
    let file = File::create(dest).with_context(|| format!("failed to create {dest:?}"))?;
    let written = write_index(file, &entries).with_context(|| format!("failed to write {dest:?}"))?;
    info!(
        path = %dest.display(),
        rows = count,
        written,
        dimensions = entries.first().map(|e| e.embedding.len()).unwrap_or(0),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "index written"
    );
    println!("wrote {written} entries to {}", dest.display());
    Ok(())
}
