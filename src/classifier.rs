//! Rule-based dose plausibility checks.
//!
//! The model's own verdict is advisory. Pass/fail shown to the operator is
//! decided here so that reruns give identical results regardless of sampling.

use tracing::warn;

use crate::knowledge::{DoseRange, KnowledgeFact};
use crate::record::ValidationVerdict;
use crate::sig::{normalize_frequency, StructuredSig};

/// Reason given when nothing in the knowledge base describes the drug.
pub const NO_ENTRY: &str = "no knowledge-base entry for drug";
/// Prefix for fail-safe verdicts caused by malformed knowledge-base data.
pub const DATA_ERROR: &str = "knowledge-base data error";
/// Prefix for sigs whose unit cannot be compared with the fact's.
pub const UNIT_MISMATCH: &str = "unit mismatch";
/// Prefix for sigs with a frequency outside the fact's list.
pub const ATYPICAL_FREQUENCY: &str = "atypical frequency";

/// Judges `sig` against `facts`, which must be ordered best match first.
///
/// Only `facts[0]` decides the outcome; the rest are kept for display.
pub fn classify(sig: &StructuredSig, facts: &[KnowledgeFact]) -> ValidationVerdict {
    let (passed, reason) = decide(sig, facts);
    ValidationVerdict {
        sig: sig.clone(),
        matched_facts: facts.to_vec(),
        passed,
        reason,
    }
}

fn decide(sig: &StructuredSig, facts: &[KnowledgeFact]) -> (bool, String) {
    let Some(fact) = facts.first() else {
        return (false, NO_ENTRY.to_string());
    };
    if let Err(err) = fact.check() {
        warn!(drug = %fact.drug, error = %err, "unusable knowledge-base entry");
        return (false, format!("{DATA_ERROR}: {err}"));
    }

    let Some(dose) = sig.dose_unit.convert(sig.dose_value, fact.unit) else {
        return (
            false,
            format!(
                "{UNIT_MISMATCH}: sig uses {}, knowledge base uses {}",
                sig.dose_unit, fact.unit
            ),
        );
    };
    let range = fact.typical_dose_range;
    let dose_label = if sig.dose_unit == fact.unit {
        format!("{} {}", sig.dose_value, sig.dose_unit)
    } else {
        format!("{} {} ({} {})", sig.dose_value, sig.dose_unit, dose, fact.unit)
    };
    if !within(range, dose) {
        return (
            false,
            format!(
                "dose {dose_label} outside expected range {}-{} {}",
                range.min, range.max, fact.unit
            ),
        );
    }

    let frequency = normalize_frequency(&sig.frequency);
    let expected = fact.normalized_frequencies();
    if !expected.contains(&frequency) {
        let listed = expected.into_iter().collect::<Vec<_>>().join(" or ");
        return (
            false,
            format!("{ATYPICAL_FREQUENCY}: {frequency} (expected {listed})"),
        );
    }

    (
        true,
        format!(
            "dose {dose_label} within {}-{} {} taken {frequency}",
            range.min, range.max, fact.unit
        ),
    )
}

fn within(range: DoseRange, value: f64) -> bool {
    // Absorbs rounding from unit conversion.
    let slack = 1e-9 * range.max.abs().max(1.0);
    DoseRange {
        min: range.min - slack,
        max: range.max + slack,
    }
    .contains(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sig::DoseUnit;
    use pretty_assertions::assert_eq;

    fn amoxicillin_fact() -> KnowledgeFact {
        KnowledgeFact {
            drug: "amoxicillin".into(),
            typical_dose_range: DoseRange {
                min: 250.0,
                max: 500.0,
            },
            typical_frequency: ["three times daily", "twice daily"]
                .into_iter()
                .map(String::from)
                .collect(),
            unit: DoseUnit::Mg,
            notes: String::new(),
        }
    }

    fn sig(dose: f64, unit: DoseUnit, frequency: &str) -> StructuredSig {
        StructuredSig {
            drug: "amoxicillin".into(),
            dose_value: dose,
            dose_unit: unit,
            frequency: frequency.into(),
            route: "oral".into(),
            raw_source: String::new(),
        }
    }

    #[test]
    fn typical_dose_passes() {
        let verdict = classify(
            &sig(500.0, DoseUnit::Mg, "three times daily"),
            &[amoxicillin_fact()],
        );
        assert!(verdict.passed, "{}", verdict.reason);
        assert_eq!(verdict.matched_facts.len(), 1);
    }

    #[test]
    fn dose_outside_range_cites_range() {
        let verdict = classify(
            &sig(2000.0, DoseUnit::Mg, "once daily"),
            &[amoxicillin_fact()],
        );
        assert!(!verdict.passed);
        assert_eq!(
            verdict.reason,
            "dose 2000 mg outside expected range 250-500 mg"
        );
    }

    #[test]
    fn empty_facts_fail_fast() {
        let verdict = classify(&sig(500.0, DoseUnit::Mg, "twice daily"), &[]);
        assert!(!verdict.passed);
        assert!(verdict.reason.contains("no knowledge-base entry"));
        assert!(verdict.matched_facts.is_empty());
    }

    #[test]
    fn converts_compatible_units() {
        let verdict = classify(
            &sig(0.5, DoseUnit::G, "bid"),
            &[amoxicillin_fact()],
        );
        assert!(verdict.passed, "{}", verdict.reason);
        assert!(verdict.reason.contains("0.5 g (500 mg)"));
    }

    #[test]
    fn incompatible_units_fail() {
        let verdict = classify(
            &sig(1.0, DoseUnit::Capsule, "three times daily"),
            &[amoxicillin_fact()],
        );
        assert!(!verdict.passed);
        assert!(verdict.reason.starts_with(UNIT_MISMATCH));
    }

    #[test]
    fn atypical_frequency_fails() {
        let verdict = classify(
            &sig(250.0, DoseUnit::Mg, "every 2 hours"),
            &[amoxicillin_fact()],
        );
        assert!(!verdict.passed);
        assert!(verdict.reason.starts_with(ATYPICAL_FREQUENCY));
    }

    #[test]
    fn malformed_fact_is_fail_safe() {
        let mut broken = amoxicillin_fact();
        broken.typical_dose_range = DoseRange {
            min: 0.0,
            max: 500.0,
        };
        let verdict = classify(&sig(500.0, DoseUnit::Mg, "twice daily"), &[broken]);
        assert!(!verdict.passed);
        assert!(verdict.reason.starts_with(DATA_ERROR));
    }

    #[test]
    fn only_first_fact_decides() {
        let mut narrow = amoxicillin_fact();
        narrow.typical_dose_range = DoseRange {
            min: 100.0,
            max: 200.0,
        };
        let facts = [narrow, amoxicillin_fact()];
        let verdict = classify(&sig(500.0, DoseUnit::Mg, "twice daily"), &facts);
        assert!(!verdict.passed);
        assert!(verdict.reason.contains("100-200"));
    }

    #[test]
    fn deterministic_for_identical_input() {
        let input = sig(300.0, DoseUnit::Mg, "tid");
        let facts = [amoxicillin_fact()];
        assert_eq!(classify(&input, &facts), classify(&input, &facts));
    }
}
