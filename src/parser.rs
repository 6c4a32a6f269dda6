//! Strict parsing of free-form model output into typed records.
//!
//! Models wrap their JSON in prose or markdown fences often enough that the
//! first well-formed object in the text is taken as the payload. Everything
//! past that point is checked without coercion: a numeric string is not a
//! number, and a missing field is an error rather than a default.

use serde_json::{Map, Value};

use crate::error::{PipelineError, Result};
use crate::record::ModelVerdict;
use crate::sig::{normalize_frequency, DoseUnit, StructuredSig, Translation};

type Object = Map<String, Value>;

/// Parses a translation answer into a [`StructuredSig`].
///
/// `raw_source` is left empty; the caller knows which sig was translated.
pub fn parse_sig(raw_text: &str) -> Result<StructuredSig> {
    sig_from_object(&first_json_object(raw_text)?)
}

/// Parses a full translation answer: the sig fields plus `english_instructions`.
pub fn parse_translation(raw_text: &str) -> Result<Translation> {
    let object = first_json_object(raw_text)?;
    let sig = sig_from_object(&object)?;
    let english_instructions = required_str(&object, "english_instructions", false)?;
    Ok(Translation {
        sig,
        english_instructions,
    })
}

fn sig_from_object(object: &Object) -> Result<StructuredSig> {
    let drug = required_str(object, "drug", false)?;
    let dose_value = required_number(object, "dose_value")?;
    if !dose_value.is_finite() || dose_value <= 0.0 {
        return Err(PipelineError::schema(format!(
            "dose_value must be > 0, got {dose_value}"
        )));
    }
    let dose_unit: DoseUnit = required_str(object, "dose_unit", false)?.parse()?;
    let frequency = normalize_frequency(&required_str(object, "frequency", false)?);
    let route = required_str(object, "route", true)?;

    let sig = StructuredSig {
        drug,
        dose_value,
        dose_unit,
        frequency,
        route,
        raw_source: String::new(),
    };
    sig.validate()?;
    Ok(sig)
}

/// Parses a validation answer into the model's own verdict.
pub fn parse_verdict(raw_text: &str) -> Result<ModelVerdict> {
    let object = first_json_object(raw_text)?;
    let passed = match object.get("passed") {
        Some(Value::Bool(passed)) => *passed,
        Some(other) => {
            return Err(PipelineError::schema(format!(
                "passed must be a boolean, got {}",
                kind(other)
            )))
        }
        None => return Err(PipelineError::schema("missing required field 'passed'")),
    };
    let reason = required_str(&object, "reason", false)?;
    Ok(ModelVerdict { passed, reason })
}

/// Finds the first balanced `{...}` span in `text` that parses as a JSON object.
pub fn first_json_object(text: &str) -> Result<Object> {
    let bytes = text.as_bytes();
    let mut start = 0usize;
    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(close) = matching_brace(bytes, open) {
            if let Ok(Value::Object(object)) = serde_json::from_str(&text[open..=close]) {
                return Ok(object);
            }
        }
        start = open + 1;
    }
    Err(PipelineError::schema("no JSON object found in model output"))
}

/// Index of the brace closing the one at `open`, skipping string contents.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, &byte) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn required_str(object: &Object, field: &str, allow_blank: bool) -> Result<String> {
    match object.get(field) {
        Some(Value::String(value)) => {
            let value = value.trim();
            if value.is_empty() && !allow_blank {
                Err(PipelineError::schema(format!("{field} must be non-empty")))
            } else {
                Ok(value.to_string())
            }
        }
        Some(other) => Err(PipelineError::schema(format!(
            "{field} must be a string, got {}",
            kind(other)
        ))),
        None => Err(PipelineError::schema(format!(
            "missing required field '{field}'"
        ))),
    }
}

fn required_number(object: &Object, field: &str) -> Result<f64> {
    match object.get(field) {
        Some(Value::Number(number)) => number
            .as_f64()
            .ok_or_else(|| PipelineError::schema(format!("{field} is not representable"))),
        Some(other) => Err(PipelineError::schema(format!(
            "{field} must be a number, got {}",
            kind(other)
        ))),
        None => Err(PipelineError::schema(format!(
            "missing required field '{field}'"
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
