use std::collections::{HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RxScreenError;
use crate::utils::text::normalize_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
    #[serde(alias = "life-threatening", alias = "life threatening")]
    LifeThreatening,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Mild,
        Severity::Moderate,
        Severity::Severe,
        Severity::LifeThreatening,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mild => "mild",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
            Self::LifeThreatening => "life_threatening",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllergyStatus {
    #[default]
    Active,
    Inactive,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllergyRecord {
    pub allergen_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allergen_family: Option<String>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<String>,
    #[serde(default)]
    pub status: AllergyStatus,
}

impl AllergyRecord {
    pub fn new(allergen_name: impl Into<String>, severity: Severity) -> Self {
        Self {
            allergen_name: allergen_name.into(),
            allergen_family: None,
            severity,
            reaction: None,
            status: AllergyStatus::Active,
        }
    }

    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.allergen_family = Some(family.into());
        self
    }

    pub fn with_reaction(mut self, reaction: impl Into<String>) -> Self {
        self.reaction = Some(reaction.into());
        self
    }

    pub fn with_status(mut self, status: AllergyStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == AllergyStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientAllergyProfile {
    pub patient_name: String,
    #[serde(default)]
    pub allergies: Vec<AllergyRecord>,
}

impl PatientAllergyProfile {
    /// Builds a profile, rejecting blank or duplicate (case-insensitive) allergen names.
    pub fn new(
        patient_name: impl Into<String>,
        allergies: Vec<AllergyRecord>,
    ) -> Result<Self, RxScreenError> {
        let patient_name = patient_name.into();
        if patient_name.trim().is_empty() {
            return Err(RxScreenError::InvalidArgument(
                "Patient name is required".into(),
            ));
        }

        let mut seen: HashSet<String> = HashSet::new();
        for allergy in &allergies {
            let key = normalize_key(&allergy.allergen_name);
            if key.is_empty() {
                return Err(RxScreenError::InvalidArgument(format!(
                    "Allergy record for '{patient_name}' has an empty allergen name"
                )));
            }
            if !seen.insert(key) {
                return Err(RxScreenError::InvalidArgument(format!(
                    "Duplicate allergen '{}' for patient '{patient_name}'",
                    allergy.allergen_name.trim()
                )));
            }
        }

        Ok(Self {
            patient_name,
            allergies,
        })
    }

    pub fn active_allergies(&self) -> impl Iterator<Item = &AllergyRecord> {
        self.allergies.iter().filter(|a| a.is_active())
    }
}

/// Read side of the patient record store.
#[async_trait]
pub trait PatientStore: Send + Sync {
    async fn get_patient_allergies(
        &self,
        patient_name: &str,
    ) -> Result<Option<PatientAllergyProfile>, RxScreenError>;

    /// Close matches for a name that was not found.
    async fn suggest_patients(&self, _patient_name: &str) -> Result<Vec<String>, RxScreenError> {
        Ok(Vec::new())
    }

    /// Every profile, for population-level analytics.
    async fn list_patients(&self) -> Result<Vec<PatientAllergyProfile>, RxScreenError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPatientStore {
    profiles: Vec<PatientAllergyProfile>,
    by_name: HashMap<String, usize>,
}

impl InMemoryPatientStore {
    pub fn new(profiles: Vec<PatientAllergyProfile>) -> Result<Self, RxScreenError> {
        let mut by_name = HashMap::with_capacity(profiles.len());
        for (idx, profile) in profiles.iter().enumerate() {
            let key = normalize_key(&profile.patient_name);
            if by_name.insert(key, idx).is_some() {
                return Err(RxScreenError::InvalidArgument(format!(
                    "Duplicate patient '{}'",
                    profile.patient_name.trim()
                )));
            }
        }
        Ok(Self { profiles, by_name })
    }

    pub fn profiles(&self) -> &[PatientAllergyProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    fn lookup(&self, patient_name: &str) -> Option<&PatientAllergyProfile> {
        self.by_name
            .get(&normalize_key(patient_name))
            .and_then(|idx| self.profiles.get(*idx))
    }
}

#[async_trait]
impl PatientStore for InMemoryPatientStore {
    async fn get_patient_allergies(
        &self,
        patient_name: &str,
    ) -> Result<Option<PatientAllergyProfile>, RxScreenError> {
        Ok(self.lookup(patient_name).cloned())
    }

    async fn suggest_patients(&self, patient_name: &str) -> Result<Vec<String>, RxScreenError> {
        let query = normalize_key(patient_name);
        let Some(first) = query.split_whitespace().next() else {
            return Ok(Vec::new());
        };

        // First token of the query against any part of a stored name.
        let mut out = Vec::new();
        for profile in &self.profiles {
            let key = normalize_key(&profile.patient_name);
            if key.split_whitespace().any(|part| part == first) {
                out.push(profile.patient_name.clone());
            }
            if out.len() >= 3 {
                break;
            }
        }
        Ok(out)
    }

    async fn list_patients(&self) -> Result<Vec<PatientAllergyProfile>, RxScreenError> {
        Ok(self.profiles.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AllergenCount {
    pub allergen: String,
    pub patient_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeverityCount {
    pub severity: Severity,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllergyPatterns {
    pub patients: usize,
    pub common_allergies: Vec<AllergenCount>,
    pub severity_distribution: Vec<SeverityCount>,
}

/// Most common allergens (by patient count, ties by name) and the severity
/// distribution across every recorded allergy.
pub fn allergy_patterns(profiles: &[PatientAllergyProfile], top: usize) -> AllergyPatterns {
    let mut counts: HashMap<String, (String, usize)> = HashMap::new();
    let mut severities: HashMap<Severity, usize> = HashMap::new();

    for profile in profiles {
        for allergy in &profile.allergies {
            let display = allergy.allergen_name.trim().to_string();
            let entry = counts
                .entry(normalize_key(&display))
                .or_insert_with(|| (display, 0));
            entry.1 += 1;
            *severities.entry(allergy.severity).or_default() += 1;
        }
    }

    let mut common_allergies = counts
        .into_values()
        .map(|(allergen, patient_count)| AllergenCount {
            allergen,
            patient_count,
        })
        .collect::<Vec<_>>();
    common_allergies.sort_by(|a, b| {
        b.patient_count
            .cmp(&a.patient_count)
            .then_with(|| a.allergen.to_lowercase().cmp(&b.allergen.to_lowercase()))
    });
    common_allergies.truncate(top);

    let severity_distribution = Severity::ALL
        .iter()
        .filter_map(|severity| {
            severities.get(severity).map(|count| SeverityCount {
                severity: *severity,
                count: *count,
            })
        })
        .collect();

    AllergyPatterns {
        patients: profiles.len(),
        common_allergies,
        severity_distribution,
    }
}
