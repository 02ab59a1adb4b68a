use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use rxscreen::RxScreenError;
use rxscreen::entities::drug::{DrugCatalog, DrugCatalogEntry};
use rxscreen::entities::patient::{
    AllergyRecord, InMemoryPatientStore, PatientAllergyProfile, Severity,
};
use rxscreen::entities::reference::{ReferenceData, ReferenceStore};
use rxscreen::entities::rules::{AliasTable, CrossReactivityRule, RuleTable};
use rxscreen::screening::augment::{
    ReasoningConcern, ReasoningJudgment, ReasoningProvider, ReasoningRequest,
};
use rxscreen::screening::types::{AnalysisResult, Confidence, RiskLevel, WarningKind};
use rxscreen::screening::{Screener, ScreeningOptions};

fn reference(version: &str) -> ReferenceData {
    let catalog = DrugCatalog::new(
        version,
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
            DrugCatalogEntry::new("Aspirin 325mg")
                .with_generic("Aspirin")
                .with_ingredients(["Acetylsalicylic acid"])
                .with_family("nsaid"),
        ],
    )
    .unwrap();
    let rules = RuleTable::new(
        version,
        vec![CrossReactivityRule::new(
            "penicillin",
            "cephalosporin",
            Severity::Moderate,
        )],
    )
    .unwrap();
    let aliases = AliasTable::new(vec![vec![
        "Aspirin".to_string(),
        "Acetylsalicylic acid".to_string(),
    ]])
    .unwrap();
    let families = HashMap::from([("Penicillin".to_string(), "penicillin".to_string())]);
    ReferenceData::new(catalog, rules, aliases, families)
}

fn patients() -> InMemoryPatientStore {
    InMemoryPatientStore::new(vec![
        PatientAllergyProfile::new(
            "Jane Doe",
            vec![AllergyRecord::new("Penicillin", Severity::Severe)],
        )
        .unwrap(),
        PatientAllergyProfile::new(
            "Mary Johnson",
            vec![AllergyRecord::new("Aspirin", Severity::Moderate)],
        )
        .unwrap(),
        PatientAllergyProfile::new("Sam Lee", Vec::new()).unwrap(),
    ])
    .unwrap()
}

fn screener() -> Screener {
    Screener::new(
        Arc::new(ReferenceStore::new(reference("test"))),
        Arc::new(patients()),
    )
}

fn meds(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn assert_core_invariants(result: &AnalysisResult) {
    assert_eq!(result.is_safe, result.contraindications.is_empty());
    for safe in &result.safe_medicines {
        assert!(result.contraindications.iter().all(|c| &c.medicine != safe));
        assert!(
            result
                .warnings
                .iter()
                .all(|w| w.medicine.as_deref() != Some(safe.as_str()))
        );
    }
}

enum Behavior {
    Neutral,
    Fail,
    Concern(ReasoningConcern),
    Slow(Duration),
}

struct FakeProvider {
    behavior: Behavior,
}

impl FakeProvider {
    fn shared(behavior: Behavior) -> Arc<dyn ReasoningProvider> {
        Arc::new(Self { behavior })
    }
}

#[async_trait]
impl ReasoningProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn analyze(
        &self,
        _request: &ReasoningRequest,
    ) -> Result<ReasoningJudgment, RxScreenError> {
        let concerns = match &self.behavior {
            Behavior::Neutral => Vec::new(),
            Behavior::Fail => {
                return Err(RxScreenError::Reasoning {
                    provider: "fake".into(),
                    message: "HTTP 503".into(),
                });
            }
            Behavior::Concern(concern) => vec![concern.clone()],
            Behavior::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Vec::new()
            }
        };
        Ok(ReasoningJudgment {
            summary: "Reviewed every prescribed medicine against the allergy list.".into(),
            risk_level: RiskLevel::Moderate,
            recommendations: vec!["Review with the prescriber".into()],
            concerns,
        })
    }
}

#[tokio::test]
async fn direct_allergen_match_makes_prescription_unsafe() {
    let result = screener()
        .check_prescription("Jane Doe", &meds(&["Amoxicillin", "Ibuprofen"]))
        .await
        .unwrap();

    assert!(!result.is_safe);
    assert_eq!(result.contraindications.len(), 1);
    assert_eq!(result.contraindications[0].medicine, "Amoxicillin");
    assert_eq!(result.contraindications[0].severity, Severity::Severe);
    assert_eq!(result.safe_medicines, vec!["Ibuprofen"]);
    assert!(result.ai_analysis.is_none());
    assert_core_invariants(&result);
}

#[tokio::test]
async fn family_only_match_warns_without_contraindication() {
    let result = screener()
        .check_prescription("Jane Doe", &meds(&["Cephalexin"]))
        .await
        .unwrap();

    assert!(result.is_safe);
    assert!(result.contraindications.is_empty());
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].kind, WarningKind::CrossReactivity);
    assert_eq!(result.warnings[0].severity, Some(Severity::Moderate));
    assert!(result.safe_medicines.is_empty());
    assert_core_invariants(&result);
}

#[tokio::test]
async fn patient_without_allergies_gets_all_resolved_medicines_safe() {
    let result = screener()
        .check_prescription(
            "sam lee",
            &meds(&["Amoxicillin", "Cephalexin", "Ibuprofen"]),
        )
        .await
        .unwrap();

    assert!(result.is_safe);
    assert!(result.warnings.is_empty());
    assert_eq!(
        result.safe_medicines,
        vec!["Amoxicillin", "Cephalexin", "Ibuprofen"]
    );
}

#[tokio::test]
async fn alias_names_match_the_same_compound() {
    let result = screener()
        .check_prescription("Mary Johnson", &meds(&["Aspirin 325mg"]))
        .await
        .unwrap();

    assert!(!result.is_safe);
    assert_eq!(result.contraindications[0].allergen, "Aspirin");
}

#[tokio::test]
async fn unresolved_medicine_is_a_general_warning() {
    let result = screener()
        .check_prescription("Jane Doe", &meds(&["Xyzzyquil", "Ibuprofen"]))
        .await
        .unwrap();

    let warning = result
        .warnings
        .iter()
        .find(|w| w.kind == WarningKind::Unresolved)
        .unwrap();
    assert!(warning.medicine.is_none());
    assert!(warning.reason.contains("Xyzzyquil"));
    assert!(!result.safe_medicines.iter().any(|m| m == "Xyzzyquil"));
    assert!(result.contraindications.is_empty());
    assert_eq!(result.safe_medicines, vec!["Ibuprofen"]);
}

#[tokio::test]
async fn unknown_patient_is_an_error() {
    let err = screener()
        .check_prescription("Nobody Here", &meds(&["Ibuprofen"]))
        .await
        .unwrap_err();
    assert!(matches!(err, RxScreenError::PatientNotFound { .. }));
}

#[tokio::test]
async fn reasoning_failure_matches_neutral_judgment_apart_from_summary() {
    let prescription = meds(&["Amoxicillin", "Cephalexin", "Ibuprofen"]);
    let failed = screener()
        .with_reasoning(FakeProvider::shared(Behavior::Fail))
        .check_prescription("Jane Doe", &prescription)
        .await
        .unwrap();
    let neutral = screener()
        .with_reasoning(FakeProvider::shared(Behavior::Neutral))
        .check_prescription("Jane Doe", &prescription)
        .await
        .unwrap();

    assert!(failed.ai_analysis.is_none());
    let analysis = neutral.ai_analysis.clone().unwrap();
    assert_eq!(analysis.risk_level, RiskLevel::Moderate);
    assert_eq!(analysis.recommendations, vec!["Review with the prescriber"]);

    assert_eq!(failed.is_safe, neutral.is_safe);
    assert_eq!(failed.contraindications, neutral.contraindications);
    assert_eq!(failed.warnings, neutral.warnings);
    assert_eq!(failed.safe_medicines, neutral.safe_medicines);
}

#[tokio::test]
async fn reasoning_concern_adds_warning_but_never_a_contraindication() {
    let concern = ReasoningConcern {
        medicine: "Ibuprofen 200mg".into(),
        allergen: None,
        reason: "History of NSAID-exacerbated respiratory disease".into(),
        confidence: Confidence::Medium,
    };
    let result = screener()
        .with_reasoning(FakeProvider::shared(Behavior::Concern(concern)))
        .check_prescription("Jane Doe", &meds(&["Ibuprofen"]))
        .await
        .unwrap();

    assert!(result.is_safe);
    assert!(result.contraindications.is_empty());
    let warning = result
        .warnings
        .iter()
        .find(|w| w.kind == WarningKind::Reasoning)
        .unwrap();
    assert_eq!(warning.medicine.as_deref(), Some("Ibuprofen"));
    assert_eq!(warning.confidence, Some(Confidence::Medium));
    assert!(result.safe_medicines.is_empty());
    assert_core_invariants(&result);
}

#[tokio::test]
async fn slow_reasoning_times_out_and_is_skipped() {
    let screener = screener()
        .with_reasoning(FakeProvider::shared(Behavior::Slow(Duration::from_secs(5))))
        .with_options(ScreeningOptions {
            reasoning_timeout: Duration::from_millis(50),
            reasoning_enabled: true,
        });

    let start = Instant::now();
    let result = screener
        .check_prescription("Jane Doe", &meds(&["Amoxicillin"]))
        .await
        .unwrap();
    assert!(start.elapsed() < Duration::from_secs(4));
    assert!(result.ai_analysis.is_none());
    assert!(!result.is_safe);
}

#[tokio::test]
async fn cancellation_abandons_the_reasoning_call() {
    let screener = screener()
        .with_reasoning(FakeProvider::shared(Behavior::Slow(Duration::from_secs(5))));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = screener
        .check_prescription_with_cancel("Jane Doe", &meds(&["Ibuprofen"]), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RxScreenError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn is_safe_tracks_contraindications_across_inputs() {
    let screener = screener();
    let cases: &[(&str, &[&str])] = &[
        ("Jane Doe", &["Amoxicillin"]),
        ("Jane Doe", &["Cephalexin", "Ibuprofen"]),
        ("Jane Doe", &[]),
        ("Mary Johnson", &["Ibuprofen", "Aspirin"]),
        ("Mary Johnson", &["amoxicilin"]),
        ("Sam Lee", &["Aspirin", "Nonexistent"]),
    ];
    for (patient, names) in cases {
        let result = screener
            .check_prescription(patient, &meds(names))
            .await
            .unwrap();
        assert_core_invariants(&result);
    }
}

#[tokio::test]
async fn concurrent_checks_survive_reference_reload() {
    let screener = Arc::new(screener());
    let mut handles = Vec::new();
    for _ in 0..16 {
        let screener = screener.clone();
        handles.push(tokio::spawn(async move {
            screener
                .check_prescription("Jane Doe", &meds(&["Amoxicillin", "Ibuprofen"]))
                .await
        }));
    }
    screener.reload_reference_data(None).await.unwrap();

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert!(!result.is_safe);
        assert_eq!(result.contraindications[0].medicine, "Amoxicillin");
    }
    assert_ne!(screener.reference().catalog().version(), "test");
}
