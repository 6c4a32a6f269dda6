#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use medwiz::index::build_entries;
use medwiz::{
    DoseRange, DoseUnit, Embedder, KnowledgeFact, LlmProvider, PipelineError, ProviderRequest,
    Result, SigExample, SimilarityIndex, StructuredSig,
};

const VOCAB: [&str; 8] = [
    "paracetamol",
    "ibuprofen",
    "amoxicillin",
    "atorvastatin",
    "metformin",
    "omeprazole",
    "tab",
    "cap",
];

/// Counts vocabulary words, plus a constant axis so no vector is zero.
pub struct VocabEmbedder;

impl Embedder for VocabEmbedder {
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let mut vector: Vec<f32> = VOCAB
                    .iter()
                    .map(|word| lower.matches(word).count() as f32)
                    .collect();
                vector.push(0.1);
                vector
            })
            .collect())
    }
}

/// Embedder whose every call fails as if the runtime were down.
pub struct OfflineEmbedder;

impl Embedder for OfflineEmbedder {
    fn embed_batch(&self, _inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        Err(PipelineError::ModelUnavailable {
            reason: "connection refused".into(),
        })
    }
}

/// One canned model answer.
#[derive(Clone)]
pub enum Reply {
    Text(String),
    Unavailable,
}

/// Provider answering from a script keyed by raw sig (translation) or drug (validation).
#[derive(Default)]
pub struct ScriptedProvider {
    translations: HashMap<String, Reply>,
    verdicts: HashMap<String, Reply>,
    prompts: Rc<RefCell<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared log of every prompt received, readable after the provider is boxed.
    pub fn prompt_log(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.prompts)
    }

    pub fn translate(mut self, raw_sig: &str, reply: Reply) -> Self {
        self.translations.insert(raw_sig.to_string(), reply);
        self
    }

    pub fn verdict(mut self, drug: &str, reply: Reply) -> Self {
        self.verdicts.insert(drug.to_string(), reply);
        self
    }
}

impl LlmProvider for ScriptedProvider {
    fn invoke(&self, request: &ProviderRequest<'_>) -> Result<String> {
        let prompt = request.prompt;
        self.prompts.borrow_mut().push(prompt.to_string());
        let reply = if prompt.ends_with("Structured:") {
            let subject = prompt
                .rsplit("Raw sig: ")
                .next()
                .and_then(|tail| tail.lines().next())
                .unwrap_or_default();
            self.translations.get(subject)
        } else {
            let drug = prompt
                .lines()
                .find_map(|line| line.strip_prefix("Drug: "))
                .unwrap_or_default();
            self.verdicts.get(drug)
        };
        match reply {
            Some(Reply::Text(text)) => Ok(text.clone()),
            Some(Reply::Unavailable) => Err(PipelineError::ModelUnavailable {
                reason: "timed out".into(),
            }),
            None => Ok("I am not sure.".to_string()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn sig_json(drug: &str, dose: f64, unit: &str, frequency: &str) -> String {
    format!(
        r#"Here you go: {{"drug": "{drug}", "dose_value": {dose}, "dose_unit": "{unit}", "frequency": "{frequency}", "route": "oral", "english_instructions": "{}"}}"#,
        english(drug, dose, unit, frequency)
    )
}

/// Translation answer that leaves out the patient-facing sentence.
pub fn sig_json_without_english(drug: &str, dose: f64, unit: &str, frequency: &str) -> String {
    format!(
        r#"{{"drug": "{drug}", "dose_value": {dose}, "dose_unit": "{unit}", "frequency": "{frequency}", "route": "oral"}}"#
    )
}

/// Patient-facing sentence the scripted model pairs with each translation.
pub fn english(drug: &str, dose: f64, unit: &str, frequency: &str) -> String {
    format!("Take {dose} {unit} of {drug} by mouth {frequency}.")
}

pub fn verdict_json(passed: bool, reason: &str) -> String {
    format!(r#"{{"passed": {passed}, "reason": "{reason}"}}"#)
}

pub fn fact(drug: &str, min: f64, max: f64, unit: DoseUnit, frequencies: &[&str]) -> KnowledgeFact {
    KnowledgeFact {
        drug: drug.to_string(),
        typical_dose_range: DoseRange { min, max },
        typical_frequency: frequencies.iter().map(|f| f.to_string()).collect(),
        unit,
        notes: String::new(),
    }
}

pub fn knowledge_base() -> Vec<KnowledgeFact> {
    vec![
        fact("Paracetamol 500mg", 1.0, 2.0, DoseUnit::Tablet, &["four times daily", "every 4 hours"]),
        fact("Amoxicillin", 250.0, 500.0, DoseUnit::Mg, &["three times daily", "twice daily"]),
        fact("Metformin 500mg", 1.0, 2.0, DoseUnit::Tablet, &["once daily", "twice daily"]),
    ]
}

pub fn sig_examples() -> Vec<SigExample> {
    let example = |raw: &str, drug: &str, dose: f64, unit: DoseUnit, frequency: &str| SigExample {
        raw_text: raw.to_string(),
        structured: StructuredSig {
            drug: drug.to_string(),
            dose_value: dose,
            dose_unit: unit,
            frequency: frequency.to_string(),
            route: "oral".to_string(),
            raw_source: String::new(),
        },
        english_instructions: format!("Take {dose} {unit} of {drug} by mouth {frequency}."),
    };
    vec![
        example("Paracetamol 1 tab po q6h", "paracetamol", 1.0, DoseUnit::Tablet, "four times daily"),
        example("Amoxicillin 500 mg po tid", "amoxicillin", 500.0, DoseUnit::Mg, "three times daily"),
        example("Metformin 1 tab po bid", "metformin", 1.0, DoseUnit::Tablet, "twice daily"),
    ]
}

pub fn sig_index(embedder: Arc<dyn Embedder>) -> SimilarityIndex<SigExample> {
    let items = sig_examples()
        .into_iter()
        .map(|example| (example.raw_text.clone(), example))
        .collect();
    let entries = build_entries(&VocabEmbedder, items, 8).expect("embed examples");
    SimilarityIndex::from_entries(Path::new("sig_examples.jsonl"), entries, embedder)
        .expect("sig index")
}

pub fn kb_index(embedder: Arc<dyn Embedder>, facts: Vec<KnowledgeFact>) -> SimilarityIndex<KnowledgeFact> {
    let items = facts
        .into_iter()
        .map(|fact| (fact.index_text(), fact))
        .collect();
    let entries = build_entries(&VocabEmbedder, items, 8).expect("embed facts");
    SimilarityIndex::from_entries(Path::new("knowledge_base.jsonl"), entries, embedder)
        .expect("kb index")
}
