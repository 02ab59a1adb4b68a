use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entities::drug::DrugCatalogEntry;
use crate::entities::patient::Severity;

/// How a free-text medicine name reached its catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Generic,
    StrengthStripped,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Resolved {
        entry: DrugCatalogEntry,
        matched_by: MatchKind,
    },
    Unresolved {
        suggestions: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedMedicine {
    /// Cleaned input name; findings and `safe_medicines` refer to it.
    pub input: String,
    #[serde(flatten)]
    pub resolution: Resolution,
}

impl ResolvedMedicine {
    pub fn entry(&self) -> Option<&DrugCatalogEntry> {
        match &self.resolution {
            Resolution::Resolved { entry, .. } => Some(entry),
            Resolution::Unresolved { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.entry().is_some()
    }

    pub fn suggestions(&self) -> &[String] {
        match &self.resolution {
            Resolution::Unresolved { suggestions } => suggestions,
            Resolution::Resolved { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contraindication {
    pub medicine: String,
    pub allergen: String,
    pub severity: Severity,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    CrossReactivity,
    FamilyUnknown,
    Reasoning,
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    #[serde(alias = "moderate")]
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medicine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allergen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    pub reason: String,
}

impl Warning {
    pub(crate) fn new(kind: WarningKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            medicine: None,
            allergen: None,
            severity: None,
            confidence: None,
            reason: reason.into(),
        }
    }

    pub(crate) fn for_medicine(mut self, medicine: impl Into<String>) -> Self {
        self.medicine = Some(medicine.into());
        self
    }

    pub(crate) fn with_allergen(mut self, allergen: impl Into<String>) -> Self {
        self.allergen = Some(allergen.into());
        self
    }

    pub(crate) fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub(crate) fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    #[serde(alias = "medium")]
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AiAnalysis {
    pub summary: String,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisResult {
    pub patient_name: String,
    pub is_safe: bool,
    pub contraindications: Vec<Contraindication>,
    pub warnings: Vec<Warning>,
    pub safe_medicines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<AiAnalysis>,
}
