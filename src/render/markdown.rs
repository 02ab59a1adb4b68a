use std::sync::OnceLock;

use minijinja::{Environment, context};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::entities::drug::DrugCatalogEntry;
use crate::entities::patient::{AllergyPatterns, PatientAllergyProfile};
use crate::entities::reference::ReferenceData;
use crate::error::RxScreenError;
use crate::screening::augment::ReasoningRequest;
use crate::screening::types::AnalysisResult;

static ENV: OnceLock<Environment<'static>> = OnceLock::new();

fn env() -> Result<&'static Environment<'static>, RxScreenError> {
    if let Some(env) = ENV.get() {
        return Ok(env);
    }

    let mut env = Environment::new();
    env.add_filter("truncate", |s: String, max_bytes: usize| -> String {
        if s.len() <= max_bytes {
            return s;
        }
        if max_bytes == 0 {
            return "…".to_string();
        }
        let mut boundary = max_bytes;
        while boundary > 0 && !s.is_char_boundary(boundary) {
            boundary -= 1;
        }
        let mut out = s[..boundary].trim_end().to_string();
        out.push('…');
        out
    });
    // snake_case enum tags read better hyphenated: life_threatening -> life-threatening
    env.add_filter("label", |s: String| -> String { s.replace('_', "-") });
    env.add_template(
        "analysis.md.j2",
        include_str!("../../templates/analysis.md.j2"),
    )?;
    env.add_template(
        "drug_search.md.j2",
        include_str!("../../templates/drug_search.md.j2"),
    )?;
    env.add_template(
        "patient.md.j2",
        include_str!("../../templates/patient.md.j2"),
    )?;
    env.add_template(
        "patterns.md.j2",
        include_str!("../../templates/patterns.md.j2"),
    )?;
    env.add_template("rules.md.j2", include_str!("../../templates/rules.md.j2"))?;
    env.add_template(
        "reasoning_prompt.md.j2",
        include_str!("../../templates/reasoning_prompt.md.j2"),
    )?;

    let _ = ENV.set(env);
    Ok(ENV
        .get()
        .expect("ENV should be initialized by the time this is reached"))
}

fn generated_at() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown time".to_string())
}

pub fn analysis_markdown(result: &AnalysisResult) -> Result<String, RxScreenError> {
    let tmpl = env()?.get_template("analysis.md.j2")?;
    let body = tmpl.render(context! {
        patient_name => &result.patient_name,
        is_safe => result.is_safe,
        contraindications => &result.contraindications,
        warnings => &result.warnings,
        safe_medicines => &result.safe_medicines,
        ai_analysis => &result.ai_analysis,
        generated_at => generated_at(),
    })?;
    Ok(body)
}

pub fn drug_search_markdown(
    query: &str,
    results: &[DrugCatalogEntry],
) -> Result<String, RxScreenError> {
    let tmpl = env()?.get_template("drug_search.md.j2")?;
    let body = tmpl.render(context! {
        query => query.trim(),
        results => results,
    })?;
    Ok(body)
}

pub fn patient_markdown(profile: &PatientAllergyProfile) -> Result<String, RxScreenError> {
    let tmpl = env()?.get_template("patient.md.j2")?;
    let body = tmpl.render(context! {
        patient_name => &profile.patient_name,
        allergies => &profile.allergies,
        active => profile.active_allergies().count(),
    })?;
    Ok(body)
}

pub fn patterns_markdown(patterns: &AllergyPatterns) -> Result<String, RxScreenError> {
    let tmpl = env()?.get_template("patterns.md.j2")?;
    let body = tmpl.render(context! {
        patients => patterns.patients,
        common_allergies => &patterns.common_allergies,
        severity_distribution => &patterns.severity_distribution,
    })?;
    Ok(body)
}

pub fn rules_markdown(reference: &ReferenceData) -> Result<String, RxScreenError> {
    let tmpl = env()?.get_template("rules.md.j2")?;
    let body = tmpl.render(context! {
        catalog_version => reference.catalog().version(),
        drugs => reference.catalog().len(),
        rules_version => reference.rules().version(),
        rules => reference.rules().rules(),
        alias_groups => reference.aliases().len(),
        allergen_families => reference.allergen_family_count(),
    })?;
    Ok(body)
}

/// User message sent to the reasoning provider.
pub fn reasoning_prompt(request: &ReasoningRequest) -> Result<String, RxScreenError> {
    let tmpl = env()?.get_template("reasoning_prompt.md.j2")?;
    let body = tmpl.render(context! {
        patient_name => &request.patient_name,
        allergies => &request.allergies,
        medicines => &request.medicines,
        unresolved => &request.unresolved,
        contraindications => &request.contraindications,
        warnings => &request.warnings,
    })?;
    Ok(body)
}
