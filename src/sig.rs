//! Structured sig types plus the unit and frequency vocabularies they use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Dose units understood by the parser and the knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DoseUnit {
    /// Milligram.
    Mg,
    /// Gram.
    G,
    /// Microgram.
    Mcg,
    /// Millilitre.
    Ml,
    /// Litre.
    L,
    /// Tablet.
    Tablet,
    /// Capsule.
    Capsule,
    /// Drop.
    Drop,
    /// Inhaler puff.
    Puff,
    /// International unit.
    Unit,
}

/// Physical quantity a unit measures; only units sharing one convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    /// Weight, based on milligrams.
    Mass,
    /// Volume, based on millilitres.
    Volume,
    /// Discrete dosage forms; never convertible between kinds.
    Count,
}

impl DoseUnit {
    /// Canonical spelling used on the wire and in prompts.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mg => "mg",
            Self::G => "g",
            Self::Mcg => "mcg",
            Self::Ml => "mL",
            Self::L => "L",
            Self::Tablet => "tablet",
            Self::Capsule => "capsule",
            Self::Drop => "drop",
            Self::Puff => "puff",
            Self::Unit => "unit",
        }
    }

    /// Dimension this unit measures.
    pub fn dimension(self) -> Dimension {
        match self {
            Self::Mg | Self::G | Self::Mcg => Dimension::Mass,
            Self::Ml | Self::L => Dimension::Volume,
            Self::Tablet | Self::Capsule | Self::Drop | Self::Puff | Self::Unit => {
                Dimension::Count
            }
        }
    }

    fn base_factor(self) -> f64 {
        match self {
            Self::Mcg => 0.001,
            Self::G | Self::L => 1000.0,
            _ => 1.0,
        }
    }

    /// Converts `value` expressed in `self` into `target`.
    ///
    /// Returns `None` when the two units cannot be compared.
    pub fn convert(self, value: f64, target: DoseUnit) -> Option<f64> {
        if self == target {
            return Some(value);
        }
        match (self.dimension(), target.dimension()) {
            (Dimension::Mass, Dimension::Mass) | (Dimension::Volume, Dimension::Volume) => {
                Some(value * self.base_factor() / target.base_factor())
            }
            _ => None,
        }
    }
}

impl fmt::Display for DoseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DoseUnit {
    type Err = PipelineError;

    fn from_str(raw: &str) -> Result<Self> {
        let unit = match raw.trim().to_lowercase().as_str() {
            "mg" | "milligram" | "milligrams" => Self::Mg,
            "g" | "gram" | "grams" => Self::G,
            "mcg" | "µg" | "ug" | "microgram" | "micrograms" => Self::Mcg,
            "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" | "cc" => {
                Self::Ml
            }
            "l" | "liter" | "liters" | "litre" | "litres" => Self::L,
            "tablet" | "tablets" | "tab" | "tabs" => Self::Tablet,
            "capsule" | "capsules" | "cap" | "caps" => Self::Capsule,
            "drop" | "drops" | "gtt" | "gtts" => Self::Drop,
            "puff" | "puffs" => Self::Puff,
            "unit" | "units" | "iu" => Self::Unit,
            other => {
                return Err(PipelineError::schema(format!(
                    "unknown dose unit '{other}'"
                )))
            }
        };
        Ok(unit)
    }
}

impl TryFrom<String> for DoseUnit {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DoseUnit> for String {
    fn from(unit: DoseUnit) -> Self {
        unit.as_str().to_string()
    }
}

/// Schema-conformant representation of one sig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredSig {
    /// Drug name as extracted.
    pub drug: String,
    /// Amount per administration; always positive.
    pub dose_value: f64,
    /// Unit for `dose_value`.
    pub dose_unit: DoseUnit,
    /// Normalized frequency phrase, e.g. "twice daily".
    pub frequency: String,
    /// Route of administration; may be empty when the sig omits it.
    pub route: String,
    /// Raw sig text this record was derived from.
    #[serde(default)]
    pub raw_source: String,
}

impl StructuredSig {
    /// Checks the invariants every structured sig must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.drug.trim().is_empty() {
            return Err(PipelineError::schema("drug must be non-empty"));
        }
        if !self.dose_value.is_finite() || self.dose_value <= 0.0 {
            return Err(PipelineError::schema(format!(
                "dose_value must be > 0, got {}",
                self.dose_value
            )));
        }
        if self.frequency.trim().is_empty() {
            return Err(PipelineError::schema("frequency must be non-empty"));
        }
        Ok(())
    }

    /// JSON object in the exact shape the model is asked to emit.
    pub fn schema_json(&self) -> String {
        self.payload_json("")
    }

    fn payload_json(&self, english_instructions: &str) -> String {
        let payload = SigPayload {
            drug: &self.drug,
            dose_value: JsonDose(self.dose_value),
            dose_unit: self.dose_unit.as_str(),
            frequency: &self.frequency,
            route: &self.route,
            english_instructions,
        };
        // Plain struct of strings and a float; serialization cannot fail.
        serde_json::to_string(&payload).unwrap_or_default()
    }

    /// One-line human rendering, e.g. "500 mg amoxicillin three times daily (oral)".
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} {} {} {}",
            self.dose_value, self.dose_unit, self.drug, self.frequency
        );
        if !self.route.is_empty() {
            out.push_str(&format!(" ({})", self.route));
        }
        out
    }
}

#[derive(Serialize)]
struct SigPayload<'a> {
    drug: &'a str,
    dose_value: JsonDose,
    dose_unit: &'a str,
    frequency: &'a str,
    route: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    english_instructions: &'a str,
}

fn is_blank(text: &&str) -> bool {
    text.is_empty()
}

/// Integral doses serialize as JSON integers, so prompts read `500` not `500.0`.
struct JsonDose(f64);

impl Serialize for JsonDose {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let value = self.0;
        if value.fract() == 0.0 && value.abs() < 1e15 {
            serializer.serialize_i64(value as i64)
        } else {
            serializer.serialize_f64(value)
        }
    }
}

/// Annotated corpus entry used as a few-shot example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigExample {
    /// Sig as written by the prescriber.
    pub raw_text: String,
    /// Ground-truth structure for `raw_text`.
    pub structured: StructuredSig,
    /// Plain-English rendering of `raw_text`.
    #[serde(default)]
    pub english_instructions: String,
}

impl SigExample {
    /// The answer a model should give for this example, as one JSON object.
    pub fn answer_json(&self) -> String {
        self.structured.payload_json(self.english_instructions.trim())
    }
}

/// Output of the translation stage: the structured sig plus its English reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    /// Schema-conformant sig.
    pub sig: StructuredSig,
    /// Clear patient-facing instructions, e.g. "Take one tablet by mouth twice a day."
    pub english_instructions: String,
}

/// Canonicalizes a frequency phrase.
///
/// Common Latin abbreviations and English spellings collapse onto one phrase;
/// anything unrecognized comes back lowercased with whitespace collapsed.
pub fn normalize_frequency(raw: &str) -> String {
    let cleaned = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let cleaned = cleaned.trim_end_matches(['.', ',', ';']).to_string();
    let key = cleaned.replace('.', "");
    let canonical = match key.as_str() {
        "qd" | "od" | "daily" | "once daily" | "once a day" | "once per day" | "every day"
        | "q24h" | "every 24 hours" | "1x daily" | "1x/day" => "once daily",
        "bid" | "twice daily" | "twice a day" | "twice per day" | "two times daily"
        | "two times a day" | "q12h" | "every 12 hours" | "2x daily" | "2x/day" => {
            "twice daily"
        }
        "tid" | "three times daily" | "three times a day" | "three times per day"
        | "3 times daily" | "3 times a day" | "q8h" | "every 8 hours" | "3x daily"
        | "3x/day" => "three times daily",
        "qid" | "four times daily" | "four times a day" | "four times per day"
        | "4 times daily" | "4 times a day" | "q6h" | "every 6 hours" | "4x daily"
        | "4x/day" => "four times daily",
        "q4h" | "every 4 hours" | "every four hours" => "every 4 hours",
        "q2h" | "every 2 hours" | "every two hours" => "every 2 hours",
        "qhs" | "hs" | "at bedtime" | "nightly" | "every night" | "every night at bedtime" => {
            "at bedtime"
        }
        "qam" | "every morning" | "in the morning" | "once every morning" => "every morning",
        "prn" | "as needed" | "when needed" => "as needed",
        _ => return cleaned,
    };
    canonical.to_string()
}
