//! On-disk reference file shapes → validated domain tables.

use std::collections::HashMap;

use serde::Deserialize;

use crate::entities::drug::{DrugCatalog, DrugCatalogEntry};
use crate::entities::patient::PatientAllergyProfile;
use crate::entities::rules::{AliasTable, CrossReactivityRule, RuleTable};
use crate::error::RxScreenError;

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    version: String,
    #[serde(default)]
    drugs: Vec<DrugCatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    version: String,
    #[serde(default)]
    rules: Vec<CrossReactivityRule>,
    #[serde(default)]
    aliases: Vec<Vec<String>>,
    #[serde(default)]
    allergen_families: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PatientsFile {
    #[serde(default)]
    patients: Vec<PatientAllergyProfile>,
}

/// Parsed contents of the rules file.
#[derive(Debug)]
pub(crate) struct RuleSet {
    pub rules: RuleTable,
    pub aliases: AliasTable,
    pub allergen_families: HashMap<String, String>,
}

fn invalid(origin: &str) -> impl Fn(RxScreenError) -> RxScreenError + '_ {
    move |err| match err {
        RxScreenError::InvalidArgument(message) => RxScreenError::reference(origin, message),
        other => other,
    }
}

fn parse<T: serde::de::DeserializeOwned>(origin: &str, text: &str) -> Result<T, RxScreenError> {
    serde_json::from_str(text).map_err(|err| RxScreenError::reference(origin, err.to_string()))
}

pub(crate) fn catalog_from_json(origin: &str, text: &str) -> Result<DrugCatalog, RxScreenError> {
    let file: CatalogFile = parse(origin, text)?;
    if file.drugs.is_empty() {
        return Err(RxScreenError::reference(origin, "catalog contains no drugs"));
    }
    DrugCatalog::new(version_or_unversioned(file.version), file.drugs).map_err(invalid(origin))
}

pub(crate) fn rules_from_json(origin: &str, text: &str) -> Result<RuleSet, RxScreenError> {
    let file: RulesFile = parse(origin, text)?;
    Ok(RuleSet {
        rules: RuleTable::new(version_or_unversioned(file.version), file.rules)
            .map_err(invalid(origin))?,
        aliases: AliasTable::new(file.aliases).map_err(invalid(origin))?,
        allergen_families: file.allergen_families,
    })
}

/// Profiles are re-validated: serde alone would accept duplicate allergens.
pub(crate) fn patients_from_json(
    origin: &str,
    text: &str,
) -> Result<Vec<PatientAllergyProfile>, RxScreenError> {
    let file: PatientsFile = parse(origin, text)?;
    file.patients
        .into_iter()
        .map(|p| PatientAllergyProfile::new(p.patient_name, p.allergies).map_err(invalid(origin)))
        .collect()
}

fn version_or_unversioned(version: String) -> String {
    let version = version.trim();
    if version.is_empty() {
        "unversioned".to_string()
    } else {
        version.to_string()
    }
}
