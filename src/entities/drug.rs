use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::RxScreenError;
use crate::utils::text::{normalize_key, strip_strength, tokens};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugCatalogEntry {
    pub drug_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_ingredients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drug_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage_form: Option<String>,
}

impl DrugCatalogEntry {
    pub fn new(drug_name: impl Into<String>) -> Self {
        Self {
            drug_name: drug_name.into(),
            generic_name: None,
            active_ingredients: Vec::new(),
            drug_family: None,
            strength: None,
            dosage_form: None,
        }
    }

    pub fn with_generic(mut self, generic_name: impl Into<String>) -> Self {
        self.generic_name = Some(generic_name.into());
        self
    }

    pub fn with_ingredients<I, S>(mut self, ingredients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.active_ingredients = ingredients.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.drug_family = Some(family.into());
        self
    }
}

/// Precomputed lookup keys for one catalog entry.
#[derive(Debug, Clone)]
pub(crate) struct EntryKeys {
    pub name: String,
    pub name_stripped: String,
    pub name_tokens: Vec<String>,
    pub generic: Option<String>,
    pub generic_stripped: Option<String>,
    pub generic_tokens: Vec<String>,
}

impl EntryKeys {
    fn for_entry(entry: &DrugCatalogEntry) -> Self {
        let name = normalize_key(&entry.drug_name);
        let name_stripped = strip_strength(&name);
        let name_tokens = tokens(&name_stripped);
        let generic = entry
            .generic_name
            .as_deref()
            .map(normalize_key)
            .filter(|g| !g.is_empty());
        let generic_stripped = generic.as_deref().map(strip_strength);
        let generic_tokens = generic_stripped.as_deref().map(tokens).unwrap_or_default();
        Self {
            name,
            name_stripped,
            name_tokens,
            generic,
            generic_stripped,
            generic_tokens,
        }
    }
}

/// Arena of catalog entries with name indexes; immutable once built.
#[derive(Debug, Clone, Default)]
pub struct DrugCatalog {
    version: String,
    entries: Vec<DrugCatalogEntry>,
    keys: Vec<EntryKeys>,
    by_name: HashMap<String, usize>,
    by_generic: HashMap<String, Vec<usize>>,
    by_stripped: HashMap<String, Vec<usize>>,
}

impl DrugCatalog {
    pub fn new(
        version: impl Into<String>,
        entries: Vec<DrugCatalogEntry>,
    ) -> Result<Self, RxScreenError> {
        let mut keys = Vec::with_capacity(entries.len());
        let mut by_name = HashMap::with_capacity(entries.len());
        let mut by_generic: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_stripped: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, entry) in entries.iter().enumerate() {
            let entry_keys = EntryKeys::for_entry(entry);
            if entry_keys.name.is_empty() {
                return Err(RxScreenError::InvalidArgument(format!(
                    "Catalog entry #{idx} has an empty drug name"
                )));
            }
            if by_name.insert(entry_keys.name.clone(), idx).is_some() {
                return Err(RxScreenError::InvalidArgument(format!(
                    "Duplicate catalog drug name '{}'",
                    entry.drug_name.trim()
                )));
            }
            if let Some(generic) = entry_keys.generic.clone() {
                by_generic.entry(generic).or_default().push(idx);
            }
            if !entry_keys.name_stripped.is_empty() {
                by_stripped
                    .entry(entry_keys.name_stripped.clone())
                    .or_default()
                    .push(idx);
            }
            if let Some(generic_stripped) = entry_keys
                .generic_stripped
                .clone()
                .filter(|g| !g.is_empty())
            {
                let slot = by_stripped.entry(generic_stripped).or_default();
                if !slot.contains(&idx) {
                    slot.push(idx);
                }
            }
            keys.push(entry_keys);
        }

        Ok(Self {
            version: version.into(),
            entries,
            keys,
            by_name,
            by_generic,
            by_stripped,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn entries(&self) -> &[DrugCatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact, case-insensitive lookup on `drug_name`.
    pub fn get_drug(&self, name: &str) -> Option<&DrugCatalogEntry> {
        self.by_name
            .get(&normalize_key(name))
            .and_then(|idx| self.entries.get(*idx))
    }

    /// Substring search over drug name, generic name and ingredients, in catalog order.
    pub fn search_drugs(&self, query: &str, limit: usize) -> Vec<&DrugCatalogEntry> {
        let query = normalize_key(query);
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }

        self.entries
            .iter()
            .zip(&self.keys)
            .filter(|(entry, keys)| {
                keys.name.contains(&query)
                    || keys.generic.as_deref().is_some_and(|g| g.contains(&query))
                    || entry
                        .active_ingredients
                        .iter()
                        .any(|i| normalize_key(i).contains(&query))
            })
            .map(|(entry, _)| entry)
            .take(limit)
            .collect()
    }

    pub(crate) fn first_by_generic(&self, key: &str) -> Option<usize> {
        self.by_generic.get(key).and_then(|ids| ids.first().copied())
    }

    pub(crate) fn first_by_name(&self, key: &str) -> Option<usize> {
        self.by_name.get(key).copied()
    }

    pub(crate) fn stripped_matches(&self, key: &str) -> &[usize] {
        self.by_stripped.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn entry(&self, idx: usize) -> Option<&DrugCatalogEntry> {
        self.entries.get(idx)
    }

    pub(crate) fn entry_keys(&self, idx: usize) -> Option<&EntryKeys> {
        self.keys.get(idx)
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = (usize, &EntryKeys)> {
        self.keys.iter().enumerate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> DrugCatalog {
        DrugCatalog::new(
            "test",
            vec![
                DrugCatalogEntry::new("Amoxicillin 500mg")
                    .with_generic("Amoxicillin")
                    .with_ingredients(["Amoxicillin", "Penicillin"])
                    .with_family("penicillin"),
                DrugCatalogEntry::new("Bactrim DS")
                    .with_generic("Sulfamethoxazole/Trimethoprim")
                    .with_ingredients(["Sulfamethoxazole"])
                    .with_family("sulfonamide_antibiotic"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn get_drug_is_case_insensitive() {
        let catalog = catalog();
        let entry = catalog.get_drug("  amoxicillin 500MG ").unwrap();
        assert_eq!(entry.drug_name, "Amoxicillin 500mg");
        assert!(catalog.get_drug("Amoxicillin").is_none());
    }

    #[test]
    fn search_drugs_matches_ingredients_and_respects_limit() {
        let catalog = catalog();
        let hits = catalog.search_drugs("sulfa", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].drug_name, "Bactrim DS");

        assert_eq!(catalog.search_drugs("i", 1).len(), 1);
        assert!(catalog.search_drugs("  ", 5).is_empty());
    }

    #[test]
    fn duplicate_drug_names_are_rejected() {
        let err = DrugCatalog::new(
            "test",
            vec![
                DrugCatalogEntry::new("Ibuprofen 200mg"),
                DrugCatalogEntry::new("ibuprofen 200MG"),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate catalog drug name"));
    }

    #[test]
    fn stripped_index_covers_names_and_generics() {
        let catalog = catalog();
        assert_eq!(catalog.stripped_matches("amoxicillin"), &[0]);
        assert_eq!(catalog.stripped_matches("bactrim ds"), &[1]);
        assert!(catalog.stripped_matches("ibuprofen").is_empty());
    }
}
