use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::entities::drug::DrugCatalog;
use crate::entities::patient::AllergyRecord;
use crate::entities::rules::{AliasTable, RuleTable};
use crate::utils::text::normalize_key;

/// One consistent snapshot of the drug catalog, rule table, alias groups and
/// allergen family index.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    catalog: DrugCatalog,
    rules: RuleTable,
    aliases: AliasTable,
    allergen_families: HashMap<String, String>,
}

impl ReferenceData {
    pub fn new(
        catalog: DrugCatalog,
        rules: RuleTable,
        aliases: AliasTable,
        allergen_families: HashMap<String, String>,
    ) -> Self {
        let allergen_families = allergen_families
            .into_iter()
            .map(|(allergen, family)| (normalize_key(&allergen), family.trim().to_string()))
            .filter(|(allergen, family)| !allergen.is_empty() && !family.is_empty())
            .collect();
        Self {
            catalog,
            rules,
            aliases,
            allergen_families,
        }
    }

    pub fn catalog(&self) -> &DrugCatalog {
        &self.catalog
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn allergen_family_count(&self) -> usize {
        self.allergen_families.len()
    }

    /// Family of an allergy: the record's own family, else the reference
    /// lookup by allergen name (alias-canonical name tried second).
    pub fn allergen_family(&self, record: &AllergyRecord) -> Option<String> {
        if let Some(family) = record
            .allergen_family
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
        {
            return Some(family.to_string());
        }

        let key = normalize_key(&record.allergen_name);
        self.allergen_families
            .get(&key)
            .or_else(|| {
                self.allergen_families
                    .get(&self.aliases.canonical(&record.allergen_name))
            })
            .cloned()
    }
}

/// Shared handle to the current reference snapshot.
///
/// Readers clone the `Arc` and keep working on that snapshot; `replace`
/// swaps in a new one without disturbing requests already in flight.
#[derive(Debug)]
pub struct ReferenceStore {
    current: RwLock<Arc<ReferenceData>>,
}

impl ReferenceStore {
    pub fn new(data: ReferenceData) -> Self {
        Self {
            current: RwLock::new(Arc::new(data)),
        }
    }

    pub fn snapshot(&self) -> Arc<ReferenceData> {
        self.current.read().clone()
    }

    /// Installs `data` and returns the snapshot it replaced.
    pub fn replace(&self, data: ReferenceData) -> Arc<ReferenceData> {
        let next = Arc::new(data);
        info!(
            catalog_version = next.catalog().version(),
            rules_version = next.rules().version(),
            drugs = next.catalog().len(),
            rules = next.rules().len(),
            "Reference data replaced"
        );
        std::mem::replace(&mut *self.current.write(), next)
    }
}
