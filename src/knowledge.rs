//! Knowledge-base facts used as ground truth for plausibility checks.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::index::Scored;
use crate::sig::{normalize_frequency, DoseUnit};

/// Inclusive per-administration dose bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoseRange {
    /// Lowest typical dose.
    pub min: f64,
    /// Highest typical dose.
    pub max: f64,
}

impl DoseRange {
    /// Whether `value` lies within the bounds.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Dosing facts for one drug, loaded from the offline knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeFact {
    /// Drug the fact describes, possibly with strength ("Amoxicillin 500mg").
    pub drug: String,
    /// Typical per-administration dose, in `unit`.
    pub typical_dose_range: DoseRange,
    /// Acceptable frequency phrases.
    pub typical_frequency: BTreeSet<String>,
    /// Unit of `typical_dose_range`.
    pub unit: DoseUnit,
    /// Free-text clinical notes.
    #[serde(default)]
    pub notes: String,
}

impl KnowledgeFact {
    /// Rejects entries whose data cannot support a classification.
    pub fn check(&self) -> Result<()> {
        let DoseRange { min, max } = self.typical_dose_range;
        if !min.is_finite() || !max.is_finite() {
            return Err(PipelineError::Classification(format!(
                "{}: dose range bounds must be finite",
                self.drug
            )));
        }
        if min <= 0.0 || min > max {
            return Err(PipelineError::Classification(format!(
                "{}: invalid dose range {min}-{max}",
                self.drug
            )));
        }
        if self.typical_frequency.is_empty() {
            return Err(PipelineError::Classification(format!(
                "{}: no typical frequency listed",
                self.drug
            )));
        }
        Ok(())
    }

    /// Normalized frequency set, comparable with a parsed sig's frequency.
    pub fn normalized_frequencies(&self) -> BTreeSet<String> {
        self.typical_frequency
            .iter()
            .map(|f| normalize_frequency(f))
            .collect()
    }

    /// Text embedded into the index for this fact.
    pub fn index_text(&self) -> String {
        let frequencies = self
            .typical_frequency
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Drug: {}. Typical dose: {}-{} {}. Typical frequency: {}. Notes: {}",
            self.drug,
            self.typical_dose_range.min,
            self.typical_dose_range.max,
            self.unit,
            frequencies,
            self.notes
        )
    }
}

/// Lowercased drug name with strength tokens ("500mg", "20 mg") removed.
///
/// Unit words are only dropped in a run right after a number ("20 mg
/// capsule"), so names like "L-Thyroxine" keep every token.
pub fn normalize_drug_name(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut after_number = false;
    for token in name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
    {
        let token = token.to_lowercase();
        if token.starts_with(|c: char| c.is_ascii_digit()) {
            after_number = true;
            continue;
        }
        if after_number && token.parse::<DoseUnit>().is_ok() {
            continue;
        }
        after_number = false;
        tokens.push(token);
    }
    tokens
}

/// Whether two drug names refer to the same drug.
///
/// Names match when one normalized token sequence appears whole inside the
/// other, so "Amoxicillin 500mg" matches "amoxicillin".
pub fn same_drug(a: &str, b: &str) -> bool {
    let a = normalize_drug_name(a);
    let b = normalize_drug_name(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    long.windows(short.len()).any(|window| window == short.as_slice())
}

/// Keeps the retrieved facts that describe `drug`, preserving similarity order.
pub fn facts_for_drug(drug: &str, retrieved: &[Scored<KnowledgeFact>]) -> Vec<KnowledgeFact> {
    retrieved
        .iter()
        .filter(|hit| same_drug(drug, &hit.item.drug))
        .map(|hit| hit.item.clone())
        .collect()
}
