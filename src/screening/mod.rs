//! Prescription screening: resolve medicines, match allergies, evaluate
//! cross-reactivity, consult the reasoning provider, and finalize a verdict.

pub mod augment;
mod cross;
mod direct;
pub mod resolver;
pub mod state;
pub mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::entities::drug::DrugCatalogEntry;
use crate::entities::patient::{
    AllergyPatterns, PatientAllergyProfile, PatientStore, allergy_patterns,
};
use crate::entities::reference::{ReferenceData, ReferenceStore};
use crate::error::RxScreenError;
use crate::screening::augment::ReasoningProvider;
use crate::screening::state::Initialized;
use crate::screening::types::AnalysisResult;
use crate::sources::datafile;
use crate::utils::text::clean_input;

pub const DEFAULT_REASONING_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy)]
pub struct ScreeningOptions {
    pub reasoning_timeout: Duration,
    pub reasoning_enabled: bool,
}

impl Default for ScreeningOptions {
    fn default() -> Self {
        Self {
            reasoning_timeout: DEFAULT_REASONING_TIMEOUT,
            reasoning_enabled: true,
        }
    }
}

/// Entry point for screening requests. Cheap to share behind an `Arc`;
/// each request takes its own reference snapshot.
#[derive(Clone)]
pub struct Screener {
    reference: Arc<ReferenceStore>,
    patients: Arc<dyn PatientStore>,
    reasoning: Option<Arc<dyn ReasoningProvider>>,
    options: ScreeningOptions,
}

impl Screener {
    pub fn new(reference: Arc<ReferenceStore>, patients: Arc<dyn PatientStore>) -> Self {
        Self {
            reference,
            patients,
            reasoning: None,
            options: ScreeningOptions::default(),
        }
    }

    /// Loads reference data and patient records from `config.data_dir`
    /// (embedded defaults for missing files) and attaches the configured
    /// reasoning provider when `reasoning_enabled` and an API key is set.
    pub async fn from_config(
        config: &Config,
        reasoning_enabled: bool,
    ) -> Result<Self, RxScreenError> {
        let dir = Some(config.data_dir.as_path());
        let reference = datafile::load_reference_data(dir).await?;
        let patients = datafile::load_patient_store(dir).await?;

        let store = Arc::new(ReferenceStore::new(reference));
        let mut screener = Self::new(store, Arc::new(patients))
            .with_options(config.screening_options(reasoning_enabled));
        if !reasoning_enabled {
            return Ok(screener);
        }
        match config.reasoning_provider()? {
            Some(provider) => screener = screener.with_reasoning(provider),
            None => debug!("No reasoning API key configured; reasoning disabled"),
        }
        Ok(screener)
    }

    pub fn with_reasoning(mut self, provider: Arc<dyn ReasoningProvider>) -> Self {
        self.reasoning = Some(provider);
        self
    }

    pub fn with_options(mut self, options: ScreeningOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> ScreeningOptions {
        self.options
    }

    pub fn reasoning_provider(&self) -> Option<&str> {
        self.reasoning.as_deref().map(|p| p.name())
    }

    pub fn reference(&self) -> Arc<ReferenceData> {
        self.reference.snapshot()
    }

    pub async fn check_prescription(
        &self,
        patient_name: &str,
        medicines: &[String],
    ) -> Result<AnalysisResult, RxScreenError> {
        self.check_prescription_with_cancel(patient_name, medicines, &CancellationToken::new())
            .await
    }

    /// Screens `medicines` for `patient_name`.
    ///
    /// Fails only when the patient is unknown or `cancel` fires; unresolved
    /// medicines and reasoning failures are reported inside the result.
    pub async fn check_prescription_with_cancel(
        &self,
        patient_name: &str,
        medicines: &[String],
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, RxScreenError> {
        if cancel.is_cancelled() {
            return Err(RxScreenError::Cancelled);
        }
        let reference = self.reference.snapshot();
        let profile = self.require_patient(patient_name).await?;

        let cross = Initialized::new(profile, medicines, &reference)
            .check_direct(&reference)
            .check_cross(&reference);

        let provider = self
            .reasoning
            .as_deref()
            .filter(|_| self.options.reasoning_enabled);
        let finalized = match (provider, cross.reasoning_request()) {
            (Some(provider), Some(request)) => {
                match augment::request_judgment(
                    provider,
                    &request,
                    self.options.reasoning_timeout,
                    cancel,
                )
                .await?
                {
                    Some(judgment) => cross.augment(judgment, &reference).finalize(),
                    None => cross.finalize(),
                }
            }
            _ => cross.finalize(),
        };

        let result = finalized.into_result();
        info!(
            patient = %result.patient_name,
            is_safe = result.is_safe,
            contraindications = result.contraindications.len(),
            warnings = result.warnings.len(),
            augmented = result.ai_analysis.is_some(),
            "Prescription screened"
        );
        Ok(result)
    }

    pub fn search_drugs(&self, query: &str, limit: usize) -> Vec<DrugCatalogEntry> {
        self.reference
            .snapshot()
            .catalog()
            .search_drugs(query, limit)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn patient_profile(
        &self,
        patient_name: &str,
    ) -> Result<PatientAllergyProfile, RxScreenError> {
        self.require_patient(patient_name).await
    }

    pub async fn allergy_patterns(&self, top: usize) -> Result<AllergyPatterns, RxScreenError> {
        let profiles = self.patients.list_patients().await?;
        Ok(allergy_patterns(&profiles, top))
    }

    /// Re-reads reference files from `data_dir` (embedded defaults for any
    /// missing file) and swaps them in. Requests already running keep the
    /// snapshot they started with.
    pub async fn reload_reference_data(
        &self,
        data_dir: Option<&Path>,
    ) -> Result<(), RxScreenError> {
        let data = datafile::load_reference_data(data_dir).await?;
        self.reference.replace(data);
        Ok(())
    }

    async fn require_patient(
        &self,
        patient_name: &str,
    ) -> Result<PatientAllergyProfile, RxScreenError> {
        let name = clean_input(patient_name);
        if !name.is_empty()
            && let Some(profile) = self.patients.get_patient_allergies(&name).await?
        {
            return Ok(profile);
        }

        let suggestions = if name.is_empty() {
            Vec::new()
        } else {
            self.patients.suggest_patients(&name).await.unwrap_or_else(|err| {
                warn!(patient = %name, "Patient suggestions unavailable: {err}");
                Vec::new()
            })
        };
        let suggestion = if suggestions.is_empty() {
            "Check the spelling of the patient name.".to_string()
        } else {
            format!("Did you mean: {}?", suggestions.join(", "))
        };
        Err(RxScreenError::PatientNotFound { name, suggestion })
    }
}
