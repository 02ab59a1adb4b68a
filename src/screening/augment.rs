//! Advisory reasoning stage.
//!
//! The provider sees the allergy profile, the resolved medicines and every
//! rule finding, and answers with a structured judgment. Its concerns can only
//! add warnings; rule findings are never removed or downgraded.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::entities::patient::{AllergyRecord, PatientAllergyProfile};
use crate::entities::rules::AliasTable;
use crate::error::RxScreenError;
use crate::screening::types::{
    AiAnalysis, Confidence, Contraindication, ResolvedMedicine, RiskLevel, Warning, WarningKind,
};
use crate::utils::text::normalize_key;

const MIN_SUMMARY_CHARS: usize = 10;

/// External reasoning capability. Implementations do not impose their own
/// deadline; the orchestrator bounds every call.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &str;

    async fn analyze(&self, request: &ReasoningRequest) -> Result<ReasoningJudgment, RxScreenError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicineStatus {
    Contraindicated,
    Flagged,
    Clear,
}

#[derive(Debug, Clone, Serialize)]
pub struct MedicineBrief {
    pub name: String,
    pub drug_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generic_name: Option<String>,
    pub active_ingredients: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drug_family: Option<String>,
    pub status: MedicineStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasoningRequest {
    pub patient_name: String,
    pub allergies: Vec<AllergyRecord>,
    pub medicines: Vec<MedicineBrief>,
    pub unresolved: Vec<String>,
    pub contraindications: Vec<Contraindication>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningConcern {
    pub medicine: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allergen: Option<String>,
    pub reason: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningJudgment {
    pub summary: String,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
    pub concerns: Vec<ReasoningConcern>,
}

/// `None` when there is nothing resolved to reason about.
pub(crate) fn build_request(
    profile: &PatientAllergyProfile,
    medicines: &[ResolvedMedicine],
    contraindications: &[Contraindication],
    warnings: &[Warning],
) -> Option<ReasoningRequest> {
    let briefs = medicines
        .iter()
        .filter_map(|medicine| {
            let entry = medicine.entry()?;
            let status = if contraindications.iter().any(|c| c.medicine == medicine.input) {
                MedicineStatus::Contraindicated
            } else if warnings
                .iter()
                .any(|w| w.medicine.as_deref() == Some(medicine.input.as_str()))
            {
                MedicineStatus::Flagged
            } else {
                MedicineStatus::Clear
            };
            Some(MedicineBrief {
                name: medicine.input.clone(),
                drug_name: entry.drug_name.clone(),
                generic_name: entry.generic_name.clone(),
                active_ingredients: entry.active_ingredients.clone(),
                drug_family: entry.drug_family.clone(),
                status,
            })
        })
        .collect::<Vec<_>>();
    if briefs.is_empty() {
        return None;
    }

    Some(ReasoningRequest {
        patient_name: profile.patient_name.clone(),
        allergies: profile.active_allergies().cloned().collect(),
        medicines: briefs,
        unresolved: medicines
            .iter()
            .filter(|m| !m.is_resolved())
            .map(|m| m.input.clone())
            .collect(),
        contraindications: contraindications.to_vec(),
        warnings: warnings.to_vec(),
    })
}

/// Runs the provider under `timeout`, racing `cancel`.
///
/// Provider failure and timeout both yield `Ok(None)`; only cancellation is an error.
pub(crate) async fn request_judgment(
    provider: &dyn ReasoningProvider,
    request: &ReasoningRequest,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Option<ReasoningJudgment>, RxScreenError> {
    let call = tokio::time::timeout(timeout, provider.analyze(request));
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RxScreenError::Cancelled),
        outcome = call => match outcome {
            Ok(Ok(judgment)) => Ok(Some(judgment)),
            Ok(Err(err)) => {
                warn!(
                    patient = %request.patient_name,
                    provider = provider.name(),
                    stage = "augment",
                    "Reasoning unavailable, skipping augmentation: {err}"
                );
                Ok(None)
            }
            Err(_) => {
                warn!(
                    patient = %request.patient_name,
                    provider = provider.name(),
                    stage = "augment",
                    timeout_secs = timeout.as_secs_f64(),
                    "Reasoning timed out, skipping augmentation"
                );
                Ok(None)
            }
        },
    }
}

/// Warnings for concerns the rule stages did not already cover.
pub(crate) fn concern_warnings(
    concerns: &[ReasoningConcern],
    medicines: &[ResolvedMedicine],
    contraindications: &[Contraindication],
    warnings: &[Warning],
    aliases: &AliasTable,
) -> Vec<Warning> {
    let mut added: Vec<Warning> = Vec::new();
    for concern in concerns {
        let Some(medicine) = match_medicine(&concern.medicine, medicines) else {
            continue;
        };
        let allergen = concern
            .allergen
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty());

        let same_allergen = |other: &str| allergen.is_none_or(|a| aliases.same_compound(a, other));
        let covered = contraindications
            .iter()
            .any(|c| c.medicine == medicine && same_allergen(&c.allergen))
            || warnings.iter().chain(&added).any(|w| {
                w.medicine.as_deref() == Some(medicine)
                    && match (allergen, w.allergen.as_deref()) {
                        (None, _) => true,
                        (Some(a), Some(b)) => aliases.same_compound(a, b),
                        (Some(_), None) => false,
                    }
            });
        if covered {
            continue;
        }

        let mut warning = Warning::new(WarningKind::Reasoning, concern.reason.trim())
            .for_medicine(medicine)
            .with_confidence(concern.confidence);
        if let Some(allergen) = allergen {
            warning = warning.with_allergen(allergen);
        }
        added.push(warning);
    }
    added
}

/// Concern medicine names may use the input, catalog or generic spelling.
fn match_medicine<'a>(name: &str, medicines: &'a [ResolvedMedicine]) -> Option<&'a str> {
    let key = normalize_key(name);
    if key.is_empty() {
        return None;
    }
    medicines
        .iter()
        .find(|medicine| {
            medicine.entry().is_some_and(|entry| {
                normalize_key(&medicine.input) == key
                    || normalize_key(&entry.drug_name) == key
                    || entry
                        .generic_name
                        .as_deref()
                        .is_some_and(|g| normalize_key(g) == key)
            })
        })
        .map(|medicine| medicine.input.as_str())
}

/// Summary block for the result, with deterministic text where the judgment
/// left the summary too short or gave no recommendations.
pub(crate) fn ai_analysis(
    judgment: ReasoningJudgment,
    medicines: &[ResolvedMedicine],
    contraindications: &[Contraindication],
    warnings: &[Warning],
) -> AiAnalysis {
    let summary = judgment.summary.trim();
    let summary = if summary.chars().count() < MIN_SUMMARY_CHARS {
        fallback_summary(medicines, contraindications, warnings)
    } else {
        summary.to_string()
    };

    let recommendations = if judgment.recommendations.is_empty() {
        fallback_recommendations(contraindications, warnings)
    } else {
        judgment.recommendations
    };

    AiAnalysis {
        summary,
        risk_level: judgment.risk_level,
        recommendations,
    }
}

fn fallback_summary(
    medicines: &[ResolvedMedicine],
    contraindications: &[Contraindication],
    warnings: &[Warning],
) -> String {
    if !contraindications.is_empty() {
        let mut affected: Vec<&str> = Vec::new();
        for c in contraindications {
            if !affected.contains(&c.medicine.as_str()) {
                affected.push(&c.medicine);
            }
        }
        format!(
            "Critical allergy conflicts detected for {} medicine(s). Immediate review required.",
            affected.len()
        )
    } else if !warnings.is_empty() {
        format!(
            concat!(
                "Prescription contains {} warning(s) that require attention. ",
                "Overall assessment suggests caution."
            ),
            warnings.len()
        )
    } else {
        format!(
            concat!(
                "All {} prescribed medicine(s) appear safe for this patient ",
                "based on known allergy profile."
            ),
            medicines.len()
        )
    }
}

fn fallback_recommendations(
    contraindications: &[Contraindication],
    warnings: &[Warning],
) -> Vec<String> {
    let lines: &[&str] = if !contraindications.is_empty() {
        &[
            "Do not administer contraindicated medicines",
            "Find alternative medications",
            "Consult with allergist",
        ]
    } else if !warnings.is_empty() {
        &[
            "Monitor patient closely",
            "Consider alternative medications if available",
            "Have emergency protocols ready",
        ]
    } else {
        &[
            "Proceed with prescription as planned",
            "Monitor for any unexpected reactions",
        ]
    };
    lines.iter().map(|line| line.to_string()).collect()
}
