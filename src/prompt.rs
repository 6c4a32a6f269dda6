//! Deterministic prompt construction for the translate and validate stages.

use std::fmt::Write as _;

use crate::index::Scored;
use crate::knowledge::KnowledgeFact;
use crate::sig::{SigExample, StructuredSig};

const TRANSLATE_PREAMBLE: &str = "You are an expert clinical pharmacist. You translate compact, messy \
prescription instructions (sigs) into clear English and a structured JSON record.";

const TRANSLATE_SCHEMA: &str = r#"Return ONLY one JSON object with exactly these keys and no other text:
{"drug": string, "dose_value": number greater than 0, "dose_unit": one of "mg", "g", "mcg", "mL", "L", "tablet", "capsule", "drop", "puff", "unit", "frequency": string such as "twice daily", "route": string such as "oral" (empty string if not stated), "english_instructions": one clear sentence for the patient, e.g. "Take one tablet by mouth twice a day."}"#;

const VALIDATE_PREAMBLE: &str = "You are a cautious clinical pharmacist. You check whether dosing \
instructions (sigs) are reasonable for a specific drug, using only the reference information given.";

const VALIDATE_SCHEMA: &str = r#"Return ONLY one JSON object with exactly these keys and no other text:
{"passed": true or false, "reason": short explanation}"#;

/// Which stage a prompt is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Raw sig text to structured JSON.
    Translate,
    /// Structured sig to plausibility verdict.
    Validate,
}

/// Subject and retrieved context for one prompt.
#[derive(Debug, Clone, Copy)]
pub enum PromptTask<'a> {
    /// Few-shot translation of a raw sig.
    Translate {
        /// Sig text to translate.
        raw_sig: &'a str,
        /// Prescribed drug, when the prescription row names it.
        drug_hint: Option<&'a str>,
        /// Retrieved examples, most similar first.
        examples: &'a [Scored<SigExample>],
    },
    /// Plausibility judgement for a parsed sig.
    Validate {
        /// Parsed sig under review.
        sig: &'a StructuredSig,
        /// Retrieved knowledge-base facts, most similar first.
        facts: &'a [Scored<KnowledgeFact>],
    },
}

impl PromptTask<'_> {
    /// Stage this task belongs to.
    pub fn mode(&self) -> PromptMode {
        match self {
            Self::Translate { .. } => PromptMode::Translate,
            Self::Validate { .. } => PromptMode::Validate,
        }
    }
}

/// Builds prompts from retrieved context.
///
/// Holds no state beyond its limits, so identical tasks always render
/// identical prompts.
#[derive(Debug, Clone, Copy)]
pub struct PromptComposer {
    max_context: usize,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self { max_context: 3 }
    }
}

impl PromptComposer {
    /// Composer that embeds at most `max_context` retrieved items per prompt.
    pub fn new(max_context: usize) -> Self {
        Self { max_context }
    }

    /// Renders the prompt for `task`.
    pub fn compose(&self, task: &PromptTask<'_>) -> String {
        match *task {
            PromptTask::Translate {
                raw_sig,
                drug_hint,
                examples,
            } => self.translate(raw_sig, drug_hint, examples),
            PromptTask::Validate { sig, facts } => self.validate(sig, facts),
        }
    }

    fn translate(
        &self,
        raw_sig: &str,
        drug_hint: Option<&str>,
        examples: &[Scored<SigExample>],
    ) -> String {
        let mut prompt = String::new();
        prompt.push_str(TRANSLATE_PREAMBLE);
        prompt.push_str("\n\n");
        prompt.push_str(TRANSLATE_SCHEMA);
        prompt.push_str("\n\nHere are similar past examples to guide you:\n\n");
        prompt.push_str(&render_examples(&examples[..examples.len().min(self.max_context)]));
        prompt.push_str("\n\nNow translate this new sig.\n");
        if let Some(drug) = drug_hint.map(str::trim).filter(|d| !d.is_empty()) {
            let _ = writeln!(prompt, "Prescribed drug: {drug}");
        }
        let _ = write!(prompt, "Raw sig: {}\nStructured:", raw_sig.trim());
        prompt
    }

    fn validate(&self, sig: &StructuredSig, facts: &[Scored<KnowledgeFact>]) -> String {
        let mut prompt = String::new();
        prompt.push_str(VALIDATE_PREAMBLE);
        prompt.push_str("\n\n");
        prompt.push_str(VALIDATE_SCHEMA);
        prompt.push_str("\n\n");
        let _ = writeln!(prompt, "Drug: {}", sig.drug);
        let _ = writeln!(prompt, "Dose: {} {}", sig.dose_value, sig.dose_unit);
        let _ = writeln!(prompt, "Frequency: {}", sig.frequency);
        if !sig.route.is_empty() {
            let _ = writeln!(prompt, "Route: {}", sig.route);
        }
        prompt.push_str("\nReference information about this and similar drugs:\n\n");
        prompt.push_str(&render_facts(&facts[..facts.len().min(self.max_context)]));
        prompt.push_str(
            "\n\nBased ONLY on the reference information, decide whether the dose and \
frequency are acceptable for this drug. Set passed to true only if clearly acceptable.\nVerdict:",
        );
        prompt
    }
}

fn render_examples(examples: &[Scored<SigExample>]) -> String {
    if examples.is_empty() {
        return String::from("(No prior examples available.)");
    }
    examples
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            let mut block = format!("Example {}:\nRaw sig: {}\n", i + 1, hit.item.raw_text.trim());
            let english = hit.item.english_instructions.trim();
            if !english.is_empty() {
                let _ = writeln!(block, "English: {english}");
            }
            let _ = write!(block, "Structured: {}", hit.item.answer_json());
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_facts(facts: &[Scored<KnowledgeFact>]) -> String {
    if facts.is_empty() {
        return String::from("(No reference information available.)");
    }
    facts
        .iter()
        .enumerate()
        .map(|(i, hit)| format!("Reference {}: {}", i + 1, hit.item.index_text()))
        .collect::<Vec<_>>()
        .join("\n")
}
