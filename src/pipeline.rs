//! Sequential orchestration of retrieval, translation, and validation.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{debug, info, info_span, warn};

use crate::classifier::classify;
use crate::config::PipelineSettings;
use crate::error::{PipelineError, Result};
use crate::index::{Scored, SimilarityIndex};
use crate::knowledge::{facts_for_drug, KnowledgeFact};
use crate::parser::{parse_translation, parse_verdict};
use crate::prompt::{PromptComposer, PromptTask};
use crate::providers::{LlmProvider, ProviderRequest};
use crate::record::{ModelVerdict, Outcome, PipelineRecord, SigInput, Stage, ValidationVerdict};
use crate::sig::{SigExample, StructuredSig, Translation};

/// Reads prescription rows from a JSON Lines file, skipping blank lines.
pub fn load_inputs(path: &Path) -> io::Result<Vec<SigInput>> {
    let reader = BufReader::new(File::open(path)?);
    let mut inputs = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let input: SigInput = serde_json::from_str(&line).map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}:{}: {err}", path.display(), line_no + 1),
            )
        })?;
        inputs.push(input);
    }
    Ok(inputs)
}

/// Appends one prescription row to a JSON Lines input file, creating it if needed.
///
/// A running pipeline in follow mode picks the row up on its next poll.
pub fn append_input(path: &Path, input: &SigInput) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_string(input)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    // One write per row so a concurrent reader never sees half a line.
    file.write_all(line.as_bytes())
}

/// Receives the committed results table after every record.
pub trait RecordSink {
    /// Publishes the full, ordered table of terminal records.
    fn publish(&mut self, records: &[PipelineRecord]) -> io::Result<()>;
}

/// Hooks for narrating a run as it happens. Every method defaults to a no-op.
pub trait PipelineObserver {
    /// A record is about to be processed.
    fn on_dispatch(&mut self, _index: usize, _total: usize, _input: &SigInput) {}
    /// Similar sig examples were retrieved.
    fn on_examples(&mut self, _examples: &[Scored<SigExample>]) {}
    /// The translation parsed successfully.
    fn on_translation(&mut self, _sig: &StructuredSig, _english_instructions: &str) {}
    /// Knowledge-base facts were retrieved.
    fn on_facts(&mut self, _facts: &[Scored<KnowledgeFact>]) {}
    /// Both the model and the classifier have judged the sig.
    fn on_verdict(&mut self, _verdict: &ValidationVerdict, _model: &ModelVerdict) {}
    /// A stage failed; the record is being marked failed.
    fn on_failure(&mut self, _error: &PipelineError) {}
    /// The record has been committed to the results table.
    fn on_commit(&mut self, _record: &PipelineRecord) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl PipelineObserver for Silent {}

/// Append-only table of terminal records, unique by input text.
#[derive(Debug, Default, Clone)]
pub struct ResultsTable {
    rows: Vec<PipelineRecord>,
    keys: HashMap<String, usize>,
}

impl ResultsTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `record`, replacing any earlier row with the same input text.
    ///
    /// Returns the row's position.
    pub fn commit(&mut self, record: PipelineRecord) -> usize {
        if let Some(&position) = self.keys.get(&record.input_raw_text) {
            self.rows[position] = record;
            return position;
        }
        let position = self.rows.len();
        self.keys.insert(record.input_raw_text.clone(), position);
        self.rows.push(record);
        position
    }

    /// Rows in processing order.
    pub fn rows(&self) -> &[PipelineRecord] {
        &self.rows
    }

    /// Row keyed by `input_raw_text`.
    pub fn get(&self, input_raw_text: &str) -> Option<&PipelineRecord> {
        self.keys.get(input_raw_text).map(|&i| &self.rows[i])
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Writes the table as JSON Lines, replacing the file atomically.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    /// Writer targeting `path`; parent directories are created on first publish.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for SnapshotWriter {
    fn publish(&mut self, records: &[PipelineRecord]) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for record in records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Records that reached a terminal state.
    pub processed: usize,
    /// Validated and plausible.
    pub passed: usize,
    /// Validated but clinically flagged.
    pub flagged: usize,
    /// Failed for a technical reason.
    pub failed: usize,
    /// Snapshot publications that could not be written.
    pub publish_failures: usize,
    /// Whether the stop signal ended the run before the input was exhausted.
    pub stopped_early: bool,
}

impl AddAssign for RunSummary {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.passed += other.passed;
        self.flagged += other.flagged;
        self.failed += other.failed;
        self.publish_failures += other.publish_failures;
        self.stopped_early |= other.stopped_early;
    }
}

/// Drives each sig through every stage and owns the results.
pub struct Pipeline {
    sig_index: SimilarityIndex<SigExample>,
    kb_index: SimilarityIndex<KnowledgeFact>,
    provider: Box<dyn LlmProvider>,
    composer: PromptComposer,
    settings: PipelineSettings,
    results: ResultsTable,
}

impl Pipeline {
    /// Assembles a pipeline from loaded indexes and a model provider.
    pub fn new(
        sig_index: SimilarityIndex<SigExample>,
        kb_index: SimilarityIndex<KnowledgeFact>,
        provider: Box<dyn LlmProvider>,
        settings: PipelineSettings,
    ) -> Self {
        let composer = PromptComposer::new(settings.sig_k().max(settings.kb_k()));
        Self {
            sig_index,
            kb_index,
            provider,
            composer,
            settings,
            results: ResultsTable::new(),
        }
    }

    /// Read-only view of the committed records.
    pub fn results(&self) -> &ResultsTable {
        &self.results
    }

    /// Processes `inputs` in order, checking `stop` between records.
    ///
    /// Per-record failures are stored on the record and the run continues;
    /// only an unavailable index aborts it.
    pub fn run(
        &mut self,
        inputs: &[SigInput],
        stop: &AtomicBool,
        sink: &mut dyn RecordSink,
        observer: &mut dyn PipelineObserver,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for (index, input) in inputs.iter().enumerate() {
            if stop.load(Ordering::Acquire) {
                info!(remaining = inputs.len() - index, "stop requested; ending run");
                summary.stopped_early = true;
                break;
            }
            observer.on_dispatch(index + 1, inputs.len(), input);
            let record = self.process(input, observer)?;
            match record.outcome() {
                Outcome::Passed => summary.passed += 1,
                Outcome::Flagged => summary.flagged += 1,
                Outcome::Failed | Outcome::Pending => summary.failed += 1,
            }
            summary.processed += 1;
            let position = self.results.commit(record);
            observer.on_commit(&self.results.rows()[position]);
            if let Err(err) = sink.publish(self.results.rows()) {
                warn!(error = %err, "failed to publish results snapshot");
                summary.publish_failures += 1;
            }
        }
        info!(
            processed = summary.processed,
            passed = summary.passed,
            flagged = summary.flagged,
            failed = summary.failed,
            "run finished"
        );
        Ok(summary)
    }

    /// Advances one input to a terminal record.
    ///
    /// Returns `Err` only for fatal errors.
    pub fn process(
        &self,
        input: &SigInput,
        observer: &mut dyn PipelineObserver,
    ) -> Result<PipelineRecord> {
        let span = info_span!("record", sig = %input.sig_text);
        let _entered = span.enter();
        let mut record = PipelineRecord::dispatch(input);
        match self.advance(&mut record, input, observer) {
            Ok(()) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(stage = %record.stage_reached, error = %err, "record failed");
                observer.on_failure(&err);
                record.fail(&err);
            }
        }
        debug_assert!(record.stage_reached.is_terminal());
        Ok(record)
    }

    fn advance(
        &self,
        record: &mut PipelineRecord,
        input: &SigInput,
        observer: &mut dyn PipelineObserver,
    ) -> Result<()> {
        let examples = self.sig_index.query(&input.sig_text, self.settings.sig_k())?;
        observer.on_examples(&examples);
        self.pause();

        let answer = self.invoke(&PromptTask::Translate {
            raw_sig: &input.sig_text,
            drug_hint: input.drug_name.as_deref(),
            examples: &examples,
        })?;
        record.advance(Stage::Translated);
        info!(stage = %record.stage_reached, "translation received");

        let Translation {
            mut sig,
            english_instructions,
        } = parse_translation(&answer)?;
        sig.raw_source = input.sig_text.clone();
        record.structured_sig = Some(sig.clone());
        record.english_instructions = Some(english_instructions.clone());
        record.advance(Stage::Parsed);
        info!(stage = %record.stage_reached, sig = %sig.summary(), "translation parsed");
        observer.on_translation(&sig, &english_instructions);
        self.pause();

        let retrieved = self.kb_index.query(&sig.drug, self.settings.kb_k())?;
        observer.on_facts(&retrieved);
        self.pause();

        let answer = self.invoke(&PromptTask::Validate {
            sig: &sig,
            facts: &retrieved,
        })?;
        let model_verdict = parse_verdict(&answer)?;
        record.model_verdict = Some(model_verdict.clone());

        let mut facts = facts_for_drug(&sig.drug, &retrieved);
        if facts.is_empty() {
            if let Some(prescribed) = input.drug_name.as_deref() {
                facts = facts_for_drug(prescribed, &retrieved);
            }
        }
        let verdict = classify(&sig, &facts);
        info!(
            passed = verdict.passed,
            model_passed = model_verdict.passed,
            reason = %verdict.reason,
            "sig validated"
        );
        observer.on_verdict(&verdict, &model_verdict);
        record.verdict = Some(verdict);
        record.advance(Stage::Validated);
        Ok(())
    }

    fn invoke(&self, task: &PromptTask<'_>) -> Result<String> {
        let prompt = self.composer.compose(task);
        let request = ProviderRequest::new(
            &prompt,
            self.settings.temperature(),
            self.settings.max_tokens(),
        );
        debug!(
            provider = self.provider.name(),
            mode = ?task.mode(),
            prompt_chars = prompt.len(),
            "invoking model"
        );
        let answer = self.provider.invoke(&request)?;
        debug!(mode = ?task.mode(), answer_chars = answer.len(), "model answered");
        Ok(answer)
    }

    fn pause(&self) {
        let delay = self.settings.stage_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}
