//! Per-prescription records handed from the pipeline to the presentation layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::knowledge::KnowledgeFact;
use crate::sig::StructuredSig;

/// One prescription row awaiting processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigInput {
    /// Free-text dosing instructions.
    pub sig_text: String,
    /// Patient the prescription belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    /// Prescribed drug as written on the order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drug_name: Option<String>,
    /// Local drug code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drug_code: Option<String>,
}

impl SigInput {
    /// Input with only sig text.
    pub fn new(sig_text: impl Into<String>) -> Self {
        Self {
            sig_text: sig_text.into(),
            patient_name: None,
            drug_name: None,
            drug_code: None,
        }
    }
}

/// The model's own pass/fail opinion; informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVerdict {
    /// Whether the model judged the sig acceptable.
    pub passed: bool,
    /// The model's short justification.
    pub reason: String,
}

/// Authoritative outcome of the rule-based plausibility check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// Sig that was judged.
    pub sig: StructuredSig,
    /// Facts considered, most similar first.
    pub matched_facts: Vec<KnowledgeFact>,
    /// Whether the sig is plausible.
    pub passed: bool,
    /// Human-readable reason.
    pub reason: String,
}

/// Furthest stage a record has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Dispatched; example retrieval under way.
    Retrieved,
    /// Translation model call succeeded.
    Translated,
    /// Translation parsed into a structured sig.
    Parsed,
    /// A verdict was produced. Terminal.
    Validated,
    /// A stage errored. Terminal.
    Failed,
}

impl Stage {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Validated | Self::Failed)
    }

    fn can_advance_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Self::Retrieved, Self::Translated)
                | (Self::Translated, Self::Parsed)
                | (Self::Parsed, Self::Validated)
        ) || (!self.is_terminal() && next == Self::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Retrieved => "retrieved",
            Self::Translated => "translated",
            Self::Parsed => "parsed",
            Self::Validated => "validated",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// The three outcomes a viewer must keep visually distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Validated and clinically plausible.
    Passed,
    /// Validated but flagged for a clinical reason.
    Flagged,
    /// The pipeline itself failed for a technical reason.
    Failed,
    /// Still in flight.
    Pending,
}

/// Row tracked for each input sig.
///
/// Field order is the serialized order of the hand-off file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRecord {
    /// Sig text as received; unique key of the row.
    pub input_raw_text: String,
    /// Patient the prescription belongs to.
    pub patient_name: Option<String>,
    /// Prescribed drug from the order.
    pub drug_name: Option<String>,
    /// Local drug code.
    pub drug_code: Option<String>,
    /// Parsed translation, once available.
    pub structured_sig: Option<StructuredSig>,
    /// Plain-English rendering produced alongside the translation.
    #[serde(default)]
    pub english_instructions: Option<String>,
    /// The model's own opinion from the validation stage.
    pub model_verdict: Option<ModelVerdict>,
    /// Authoritative classifier verdict.
    pub verdict: Option<ValidationVerdict>,
    /// Furthest stage reached.
    pub stage_reached: Stage,
    /// Failure message when `stage_reached` is `failed`.
    pub error: Option<String>,
}

impl PipelineRecord {
    /// Freshly dispatched record.
    pub fn dispatch(input: &SigInput) -> Self {
        Self {
            input_raw_text: input.sig_text.clone(),
            patient_name: input.patient_name.clone(),
            drug_name: input.drug_name.clone(),
            drug_code: input.drug_code.clone(),
            structured_sig: None,
            english_instructions: None,
            model_verdict: None,
            verdict: None,
            stage_reached: Stage::Retrieved,
            error: None,
        }
    }

    /// Moves to `next` if the transition is legal; returns whether it was.
    pub fn advance(&mut self, next: Stage) -> bool {
        if !self.stage_reached.can_advance_to(next) {
            return false;
        }
        self.stage_reached = next;
        true
    }

    /// Marks the record as failed with `error`'s message.
    pub fn fail(&mut self, error: &PipelineError) {
        if self.advance(Stage::Failed) {
            self.error = Some(error.to_string());
        }
    }

    /// Which outcome a viewer should show.
    pub fn outcome(&self) -> Outcome {
        match (self.stage_reached, &self.verdict) {
            (Stage::Validated, Some(verdict)) if verdict.passed => Outcome::Passed,
            (Stage::Validated, Some(_)) => Outcome::Flagged,
            (Stage::Failed, _) => Outcome::Failed,
            _ => Outcome::Pending,
        }
    }
}
