//! Reference and patient JSON files: a data directory overrides the
//! defaults compiled into the binary, file by file.

use std::borrow::Cow;
use std::path::Path;

use rust_embed::RustEmbed;
use tracing::debug;

use crate::entities::patient::InMemoryPatientStore;
use crate::entities::reference::ReferenceData;
use crate::error::RxScreenError;
use crate::transform::reference::{catalog_from_json, patients_from_json, rules_from_json};

pub(crate) const CATALOG_FILE: &str = "catalog.json";
pub(crate) const RULES_FILE: &str = "rules.json";
pub(crate) const PATIENTS_FILE: &str = "patients.json";

#[derive(RustEmbed)]
#[folder = "data/"]
struct EmbeddedData;

/// Where a data file was (or would be) read from.
pub(crate) fn origin(dir: Option<&Path>, file: &str) -> String {
    match dir.map(|d| d.join(file)) {
        Some(path) if path.is_file() => path.display().to_string(),
        _ => format!("embedded:{file}"),
    }
}

async fn read_data(dir: Option<&Path>, file: &str) -> Result<(String, String), RxScreenError> {
    if let Some(dir) = dir {
        let path = dir.join(file);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => return Ok((path.display().to_string(), text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Data file missing, using embedded default");
            }
            Err(err) => return Err(err.into()),
        }
    }

    let label = format!("embedded:{file}");
    let Some(asset) = EmbeddedData::get(file) else {
        return Err(RxScreenError::reference(&label, "embedded default is missing"));
    };
    let bytes: Cow<'static, [u8]> = asset.data;
    let text = String::from_utf8(bytes.into_owned())
        .map_err(|_| RxScreenError::reference(&label, "embedded default is not valid UTF-8"))?;
    Ok((label, text))
}

pub async fn load_reference_data(dir: Option<&Path>) -> Result<ReferenceData, RxScreenError> {
    let (catalog_origin, catalog_text) = read_data(dir, CATALOG_FILE).await?;
    let (rules_origin, rules_text) = read_data(dir, RULES_FILE).await?;

    let catalog = catalog_from_json(&catalog_origin, &catalog_text)?;
    let rule_set = rules_from_json(&rules_origin, &rules_text)?;
    debug!(
        catalog = %catalog_origin,
        rules = %rules_origin,
        drugs = catalog.len(),
        rule_count = rule_set.rules.len(),
        "Reference data loaded"
    );
    Ok(ReferenceData::new(
        catalog,
        rule_set.rules,
        rule_set.aliases,
        rule_set.allergen_families,
    ))
}

pub async fn load_patient_store(dir: Option<&Path>) -> Result<InMemoryPatientStore, RxScreenError> {
    let (origin, text) = read_data(dir, PATIENTS_FILE).await?;
    let profiles = patients_from_json(&origin, &text)?;
    InMemoryPatientStore::new(profiles).map_err(|err| match err {
        RxScreenError::InvalidArgument(message) => RxScreenError::reference(&origin, message),
        other => other,
    })
}
