//! Typestate pipeline: `Initialized → DirectChecked → CrossChecked →
//! (Augmented) → Finalized`.
//!
//! Each transition consumes the previous state. Findings only ever grow.

use std::collections::HashSet;
use std::fmt;

use tracing::debug;

use crate::entities::patient::PatientAllergyProfile;
use crate::entities::reference::ReferenceData;
use crate::screening::augment::{self, ReasoningJudgment, ReasoningRequest};
use crate::screening::cross::cross_reactivity_warnings;
use crate::screening::direct::direct_matches;
use crate::screening::resolver::{resolve, unresolved_warning};
use crate::screening::types::{
    AiAnalysis, AnalysisResult, Contraindication, ResolvedMedicine, Warning,
};
use crate::utils::text::{clean_input, normalize_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initialized,
    DirectChecked,
    CrossChecked,
    Augmented,
    Finalized,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::DirectChecked => "direct_checked",
            Self::CrossChecked => "cross_checked",
            Self::Augmented => "augmented",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulated rule and reasoning findings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Findings {
    contraindications: Vec<Contraindication>,
    warnings: Vec<Warning>,
}

impl Findings {
    pub fn contraindications(&self) -> &[Contraindication] {
        &self.contraindications
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    fn with_contraindications(mut self, more: Vec<Contraindication>) -> Self {
        self.contraindications.extend(more);
        self
    }

    fn with_warnings(mut self, more: Vec<Warning>) -> Self {
        self.warnings.extend(more);
        self
    }

    fn mentions(&self, medicine: &str) -> bool {
        self.contraindications.iter().any(|c| c.medicine == medicine)
            || self
                .warnings
                .iter()
                .any(|w| w.medicine.as_deref() == Some(medicine))
    }
}

#[derive(Debug, Clone)]
pub struct Initialized {
    profile: PatientAllergyProfile,
    medicines: Vec<ResolvedMedicine>,
    findings: Findings,
}

#[derive(Debug, Clone)]
pub struct DirectChecked {
    profile: PatientAllergyProfile,
    medicines: Vec<ResolvedMedicine>,
    findings: Findings,
}

#[derive(Debug, Clone)]
pub struct CrossChecked {
    profile: PatientAllergyProfile,
    medicines: Vec<ResolvedMedicine>,
    findings: Findings,
}

#[derive(Debug, Clone)]
pub struct Augmented {
    profile: PatientAllergyProfile,
    medicines: Vec<ResolvedMedicine>,
    findings: Findings,
    ai_analysis: AiAnalysis,
}

#[derive(Debug, Clone)]
pub struct Finalized {
    medicines: Vec<ResolvedMedicine>,
    result: AnalysisResult,
}

impl Initialized {
    /// Cleans and de-duplicates the names (first spelling wins), resolves
    /// each one and records a warning for every name the catalog lacks.
    pub fn new(
        profile: PatientAllergyProfile,
        medicine_names: &[String],
        reference: &ReferenceData,
    ) -> Self {
        let mut seen = HashSet::new();
        let medicines = medicine_names
            .iter()
            .map(|name| clean_input(name))
            .filter(|name| !name.is_empty() && seen.insert(normalize_key(name)))
            .map(|name| resolve(reference.catalog(), &name))
            .collect::<Vec<_>>();
        let unresolved = medicines.iter().filter_map(unresolved_warning).collect();

        debug!(
            patient = %profile.patient_name,
            stage = %Stage::Initialized,
            medicines = medicines.len(),
            "Analysis initialized"
        );
        Self {
            profile,
            medicines,
            findings: Findings::default().with_warnings(unresolved),
        }
    }

    pub fn medicines(&self) -> &[ResolvedMedicine] {
        &self.medicines
    }

    pub fn findings(&self) -> &Findings {
        &self.findings
    }

    pub fn check_direct(self, reference: &ReferenceData) -> DirectChecked {
        let found = direct_matches(&self.medicines, &self.profile, reference.aliases());
        debug!(
            patient = %self.profile.patient_name,
            stage = %Stage::DirectChecked,
            contraindications = found.len(),
            "Direct allergy check complete"
        );
        DirectChecked {
            profile: self.profile,
            medicines: self.medicines,
            findings: self.findings.with_contraindications(found),
        }
    }
}

impl DirectChecked {
    pub fn findings(&self) -> &Findings {
        &self.findings
    }

    pub fn check_cross(self, reference: &ReferenceData) -> CrossChecked {
        let found = cross_reactivity_warnings(
            &self.medicines,
            &self.profile,
            reference,
            self.findings.contraindications(),
        );
        debug!(
            patient = %self.profile.patient_name,
            stage = %Stage::CrossChecked,
            warnings = found.len(),
            "Cross-reactivity check complete"
        );
        CrossChecked {
            profile: self.profile,
            medicines: self.medicines,
            findings: self.findings.with_warnings(found),
        }
    }
}

impl CrossChecked {
    pub fn findings(&self) -> &Findings {
        &self.findings
    }

    /// Input for the reasoning stage; `None` when no medicine resolved.
    pub fn reasoning_request(&self) -> Option<ReasoningRequest> {
        augment::build_request(
            &self.profile,
            &self.medicines,
            self.findings.contraindications(),
            self.findings.warnings(),
        )
    }

    pub fn augment(self, judgment: ReasoningJudgment, reference: &ReferenceData) -> Augmented {
        let added = augment::concern_warnings(
            &judgment.concerns,
            &self.medicines,
            self.findings.contraindications(),
            self.findings.warnings(),
            reference.aliases(),
        );
        debug!(
            patient = %self.profile.patient_name,
            stage = %Stage::Augmented,
            concerns = judgment.concerns.len(),
            added = added.len(),
            "Reasoning judgment merged"
        );
        let findings = self.findings.with_warnings(added);
        let ai_analysis = augment::ai_analysis(
            judgment,
            &self.medicines,
            findings.contraindications(),
            findings.warnings(),
        );
        Augmented {
            profile: self.profile,
            medicines: self.medicines,
            findings,
            ai_analysis,
        }
    }

    /// Finalizes without a reasoning judgment.
    pub fn finalize(self) -> Finalized {
        Finalized::new(self.profile, self.medicines, self.findings, None)
    }
}

impl Augmented {
    pub fn findings(&self) -> &Findings {
        &self.findings
    }

    pub fn ai_analysis(&self) -> &AiAnalysis {
        &self.ai_analysis
    }

    pub fn finalize(self) -> Finalized {
        Finalized::new(
            self.profile,
            self.medicines,
            self.findings,
            Some(self.ai_analysis),
        )
    }
}

impl Finalized {
    fn new(
        profile: PatientAllergyProfile,
        medicines: Vec<ResolvedMedicine>,
        findings: Findings,
        ai_analysis: Option<AiAnalysis>,
    ) -> Self {
        let safe_medicines = medicines
            .iter()
            .filter(|m| m.is_resolved() && !findings.mentions(&m.input))
            .map(|m| m.input.clone())
            .collect();
        let Findings {
            contraindications,
            warnings,
        } = findings;

        let result = AnalysisResult {
            patient_name: profile.patient_name,
            is_safe: contraindications.is_empty(),
            contraindications,
            warnings,
            safe_medicines,
            ai_analysis,
        };
        debug!(
            patient = %result.patient_name,
            stage = %Stage::Finalized,
            is_safe = result.is_safe,
            "Analysis finalized"
        );
        Self { medicines, result }
    }

    pub fn medicines(&self) -> &[ResolvedMedicine] {
        &self.medicines
    }

    pub fn result(&self) -> &AnalysisResult {
        &self.result
    }

    pub fn into_result(self) -> AnalysisResult {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::entities::drug::{DrugCatalog, DrugCatalogEntry};
    use crate::entities::patient::{AllergyRecord, Severity};
    use crate::entities::rules::{AliasTable, CrossReactivityRule, RuleTable};
    use crate::screening::augment::ReasoningConcern;
    use crate::screening::types::{Confidence, RiskLevel, WarningKind};

    fn reference() -> ReferenceData {
        ReferenceData::new(
            DrugCatalog::new(
                "test",
                vec![
                    DrugCatalogEntry::new("Amoxicillin 500mg")
                        .with_generic("Amoxicillin")
                        .with_ingredients(["Amoxicillin", "Penicillin"])
                        .with_family("penicillin"),
                    DrugCatalogEntry::new("Cephalexin 500mg")
                        .with_generic("Cephalexin")
                        .with_ingredients(["Cephalexin"])
                        .with_family("cephalosporin"),
                    DrugCatalogEntry::new("Ibuprofen 200mg")
                        .with_generic("Ibuprofen")
                        .with_ingredients(["Ibuprofen"])
                        .with_family("nsaid"),
                ],
            )
            .unwrap(),
            RuleTable::new(
                "test",
                vec![CrossReactivityRule::new(
                    "penicillin",
                    "cephalosporin",
                    Severity::Moderate,
                )],
            )
            .unwrap(),
            AliasTable::default(),
            HashMap::new(),
        )
    }

    fn jane() -> PatientAllergyProfile {
        PatientAllergyProfile::new(
            "Jane Doe",
            vec![AllergyRecord::new("Penicillin", Severity::Severe).with_family("penicillin")],
        )
        .unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn run(profile: PatientAllergyProfile, meds: &[&str]) -> CrossChecked {
        let reference = reference();
        Initialized::new(profile, &names(meds), &reference)
            .check_direct(&reference)
            .check_cross(&reference)
    }

    #[test]
    fn initialized_dedupes_and_drops_blank_names() {
        let reference = reference();
        let init = Initialized::new(
            jane(),
            &names(&["Ibuprofen", " ", "IBUPROFEN", "'ibuprofen'", "Amoxicillin"]),
            &reference,
        );
        let inputs = init
            .medicines()
            .iter()
            .map(|m| m.input.as_str())
            .collect::<Vec<_>>();
        assert_eq!(inputs, vec!["Ibuprofen", "Amoxicillin"]);
        assert!(init.findings().warnings().is_empty());
    }

    #[test]
    fn findings_only_grow_across_stages() {
        let reference = reference();
        let init = Initialized::new(
            jane(),
            &names(&["Amoxicillin", "Cephalexin", "Xyzzy"]),
            &reference,
        );
        let before = init.findings().clone();

        let direct = init.check_direct(&reference);
        assert_eq!(direct.findings().warnings(), before.warnings());
        assert_eq!(direct.findings().contraindications().len(), 1);
        let after_direct = direct.findings().clone();

        let cross = direct.check_cross(&reference);
        assert_eq!(
            cross.findings().contraindications(),
            after_direct.contraindications()
        );
        assert!(cross.findings().warnings().starts_with(after_direct.warnings()));
        assert_eq!(cross.findings().warnings().len(), 2);
    }

    #[test]
    fn penicillin_patient_with_amoxicillin_and_ibuprofen() {
        let result = run(jane(), &["Amoxicillin", "Ibuprofen"]).finalize().into_result();
        assert!(!result.is_safe);
        assert_eq!(result.contraindications.len(), 1);
        assert_eq!(result.contraindications[0].medicine, "Amoxicillin");
        assert_eq!(result.safe_medicines, vec!["Ibuprofen"]);
        assert!(result.ai_analysis.is_none());
    }

    #[test]
    fn family_only_match_is_a_warning() {
        let result = run(jane(), &["Cephalexin"]).finalize().into_result();
        assert!(result.is_safe);
        assert!(result.contraindications.is_empty());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].severity, Some(Severity::Moderate));
        assert!(result.safe_medicines.is_empty());
    }

    #[test]
    fn unresolved_names_never_count_as_safe() {
        let result = run(jane(), &["Xyzzy", "Ibuprofen"]).finalize().into_result();
        assert_eq!(result.safe_medicines, vec!["Ibuprofen"]);
        assert_eq!(result.warnings[0].kind, WarningKind::Unresolved);
        assert!(result.warnings[0].reason.contains("Xyzzy"));
    }

    #[test]
    fn augmentation_adds_warnings_and_summary_but_keeps_rule_findings() {
        let reference = reference();
        let cross = run(jane(), &["Amoxicillin", "Ibuprofen"]);
        let rule_findings = cross.findings().clone();

        let judgment = ReasoningJudgment {
            summary: "Amoxicillin is contraindicated; ibuprofen needs GI monitoring.".into(),
            risk_level: RiskLevel::Critical,
            recommendations: vec!["Switch to a macrolide".into()],
            concerns: vec![
                ReasoningConcern {
                    medicine: "Ibuprofen".into(),
                    allergen: None,
                    reason: "History of gastric bleeding is not recorded".into(),
                    confidence: Confidence::Low,
                },
                ReasoningConcern {
                    medicine: "Amoxicillin".into(),
                    allergen: Some("Penicillin".into()),
                    reason: "Duplicate of rule finding".into(),
                    confidence: Confidence::High,
                },
            ],
        };
        let augmented = cross.augment(judgment, &reference);
        assert_eq!(augmented.ai_analysis().risk_level, RiskLevel::Critical);

        let result = augmented.finalize().into_result();
        assert_eq!(result.contraindications, rule_findings.contraindications());
        assert_eq!(result.warnings.len(), rule_findings.warnings().len() + 1);
        assert_eq!(result.warnings.last().unwrap().kind, WarningKind::Reasoning);
        assert!(result.safe_medicines.is_empty());
        assert!(!result.is_safe);
        assert_eq!(
            result.ai_analysis.unwrap().recommendations,
            vec!["Switch to a macrolide"]
        );
    }

    #[test]
    fn patient_without_allergies_clears_every_resolved_medicine() {
        let none = PatientAllergyProfile::new("Sam Lee", Vec::new()).unwrap();
        let result = run(none, &["Amoxicillin", "Cephalexin", "Ibuprofen"])
            .finalize()
            .into_result();
        assert!(result.is_safe);
        assert!(result.warnings.is_empty());
        assert_eq!(
            result.safe_medicines,
            vec!["Amoxicillin", "Cephalexin", "Ibuprofen"]
        );
    }
}
