use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use medwiz::logging::init_tracing;
use medwiz::{append_input, load_inputs, Outcome, PipelineRecord, SigInput};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "medwiz-display",
    about = "Render incoming prescriptions and the pipeline's results as tables"
)]
struct DisplayCli {
    /// Results snapshot written by medwiz-pipeline
    #[arg(long, env = "MEDWIZ_OUTPUT", default_value = "data/results.jsonl")]
    results: PathBuf,

    /// Prescriptions file the pipeline reads from
    #[arg(long, env = "MEDWIZ_INPUT", default_value = "data/input_sigs.jsonl")]
    inputs: PathBuf,

    /// Keep redrawing as the pipeline publishes new snapshots
    #[arg(long, default_value_t = false)]
    follow: bool,

    /// Milliseconds between redraws in follow mode
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Truncate long cells to this many characters
    #[arg(long, default_value_t = 48)]
    width: usize,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append a prescription to the inputs file
    Add(AddArgs),
}

#[derive(Args, Debug)]
struct AddArgs {
    /// Free-text dosing instructions
    sig: String,

    /// Patient the prescription belongs to
    #[arg(long)]
    patient: Option<String>,

    /// Prescribed drug as written on the order
    #[arg(long)]
    drug: Option<String>,

    /// Drug code, if known
    #[arg(long)]
    code: Option<String>,
}

impl AddArgs {
    fn into_input(self) -> Result<SigInput> {
        let sig_text = self.sig.trim().to_string();
        if sig_text.is_empty() {
            bail!("sig text must not be empty");
        }
        Ok(SigInput {
            sig_text,
            patient_name: non_blank(self.patient),
            drug_name: non_blank(self.drug),
            drug_code: non_blank(self.code),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = DisplayCli::parse();
    let width = cli.width.max(8);

    if let Some(Command::Add(args)) = cli.command {
        let input = args.into_input()?;
        append_input(&cli.inputs, &input)
            .with_context(|| format!("failed to append to {:?}", cli.inputs))?;
        info!(path = %cli.inputs.display(), sig = %input.sig_text, "prescription added");
        println!("Added \"{}\" to {}", input.sig_text, cli.inputs.display());
        return Ok(());
    }

    if !cli.follow {
        print!("{}", screen(&cli.inputs, &cli.results, width)?);
        return Ok(());
    }

    let interval = Duration::from_millis(cli.interval_ms.max(100));
    let mut last = None;
    loop {
        let frame = screen(&cli.inputs, &cli.results, width)?;
        if last.as_deref() != Some(frame.as_str()) {
            // Clear screen and home the cursor before redrawing.
            print!("\x1b[2J\x1b[H{frame}");
            io::stdout().flush().context("failed to flush stdout")?;
            last = Some(frame);
        }
        thread::sleep(interval);
    }
}

fn screen(inputs: &Path, results: &Path, width: usize) -> Result<String> {
    let inputs = read_inputs(inputs)?;
    let records = read_snapshot(results)?;
    Ok(format!(
        "{}\n{}",
        render_inputs(&inputs, width),
        render(&records, width)
    ))
}

fn read_inputs(path: &Path) -> Result<Vec<SigInput>> {
    match load_inputs(path) {
        Ok(inputs) => Ok(inputs),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no inputs yet");
            Ok(Vec::new())
        }
        // A row may be mid-append; the next poll reads it whole.
        Err(err) if err.kind() == ErrorKind::InvalidData => {
            warn!(error = %err, "skipping unreadable inputs file");
            Ok(Vec::new())
        }
        Err(err) => Err(err).with_context(|| format!("failed to read {path:?}")),
    }
}

fn read_snapshot(path: &Path) -> Result<Vec<PipelineRecord>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no snapshot yet");
            return Ok(Vec::new());
        }
        Err(err) => return Err(err).with_context(|| format!("failed to read {path:?}")),
    };
    let mut records = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PipelineRecord>(line) {
            Ok(record) => records.push(record),
            Err(err) => warn!(line = line_no + 1, error = %err, "skipping unreadable row"),
        }
    }
    Ok(records)
}

fn render_inputs(inputs: &[SigInput], width: usize) -> String {
    let mut out = String::from("INCOMING PRESCRIPTIONS\n");
    out.push_str(&format!(
        "{:<16} {:<14} {:<10} {}\n",
        "PATIENT", "DRUG", "CODE", "SIG"
    ));
    for input in inputs {
        out.push_str(&format!(
            "{:<16} {:<14} {:<10} {}\n",
            clip(input.patient_name.as_deref().unwrap_or("-"), 16),
            clip(input.drug_name.as_deref().unwrap_or("-"), 14),
            clip(input.drug_code.as_deref().unwrap_or("-"), 10),
            clip(&input.sig_text, width),
        ));
    }
    out.push_str(&format!("{} prescription(s)\n", inputs.len()));
    out
}

fn render(records: &[PipelineRecord], width: usize) -> String {
    let mut out = String::from("RESULTS\n");
    let (mut passed, mut flagged, mut failed) = (0usize, 0usize, 0usize);
    out.push_str(&format!(
        "{:<6} {:<16} {:<14} {:<w$} {:<w$} {:<w$} {}\n",
        "STATUS",
        "PATIENT",
        "DRUG",
        "SIG",
        "ENGLISH",
        "TRANSLATION",
        "DETAIL",
        w = width
    ));
    for record in records {
        let outcome = record.outcome();
        match outcome {
            Outcome::Passed => passed += 1,
            Outcome::Flagged => flagged += 1,
            Outcome::Failed => failed += 1,
            Outcome::Pending => {}
        }
        let translation = record
            .structured_sig
            .as_ref()
            .map(|sig| sig.summary())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<6} {:<16} {:<14} {:<w$} {:<w$} {:<w$} {}\n",
            status_label(outcome),
            clip(record.patient_name.as_deref().unwrap_or("-"), 16),
            clip(record.drug_name.as_deref().unwrap_or("-"), 14),
            clip(&record.input_raw_text, width),
            clip(record.english_instructions.as_deref().unwrap_or("-"), width),
            clip(&translation, width),
            detail(record),
            w = width
        ));
    }
    out.push_str(&format!(
        "\n{} rows: {passed} passed, {flagged} flagged, {failed} failed\n",
        records.len()
    ));
    out
}

fn status_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Passed => "PASS",
        Outcome::Flagged => "FLAG",
        Outcome::Failed => "ERROR",
        Outcome::Pending => "...",
    }
}

fn detail(record: &PipelineRecord) -> String {
    match record.outcome() {
        Outcome::Failed => format!(
            "[{}] {}",
            record.stage_reached,
            record.error.as_deref().unwrap_or("unknown error")
        ),
        _ => record
            .verdict
            .as_ref()
            .map(|verdict| verdict.reason.clone())
            .unwrap_or_default(),
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max.saturating_sub(3)).collect();
    clipped.push_str("...");
    clipped
}
