//! Cross-reactivity rules and same-compound alias groups.
//!
//! Both tables are authoritative static data: nothing here is inferred from
//! drug names at runtime.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::entities::patient::Severity;
use crate::error::RxScreenError;
use crate::utils::text::normalize_key;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossReactivityRule {
    pub allergen_family: String,
    pub drug_family: String,
    pub severity: Severity,
    /// Also applies with the families swapped.
    #[serde(default)]
    pub bidirectional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CrossReactivityRule {
    pub fn new(
        allergen_family: impl Into<String>,
        drug_family: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            allergen_family: allergen_family.into(),
            drug_family: drug_family.into(),
            severity,
            bidirectional: false,
            note: None,
        }
    }

    pub fn bidirectional(mut self) -> Self {
        self.bidirectional = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    version: String,
    rules: Vec<CrossReactivityRule>,
    index: HashMap<(String, String), usize>,
}

impl RuleTable {
    /// Indexes rules by `(allergen_family, drug_family)`.
    ///
    /// Declared directions are indexed first; the reverse direction of a
    /// bidirectional rule only fills a pair no declared rule covers. Two
    /// declared rules for the same pair are rejected.
    pub fn new(
        version: impl Into<String>,
        rules: Vec<CrossReactivityRule>,
    ) -> Result<Self, RxScreenError> {
        let mut index = HashMap::with_capacity(rules.len() * 2);

        for (idx, rule) in rules.iter().enumerate() {
            let allergen = normalize_key(&rule.allergen_family);
            let drug = normalize_key(&rule.drug_family);
            if allergen.is_empty() || drug.is_empty() {
                return Err(RxScreenError::InvalidArgument(format!(
                    "Cross-reactivity rule #{idx} is missing a family"
                )));
            }
            if index.insert((allergen, drug), idx).is_some() {
                return Err(RxScreenError::InvalidArgument(format!(
                    "Duplicate cross-reactivity rule {} -> {}",
                    rule.allergen_family.trim(),
                    rule.drug_family.trim()
                )));
            }
        }

        for (idx, rule) in rules.iter().enumerate() {
            if !rule.bidirectional {
                continue;
            }
            let reverse = (
                normalize_key(&rule.drug_family),
                normalize_key(&rule.allergen_family),
            );
            index.entry(reverse).or_insert(idx);
        }

        Ok(Self {
            version: version.into(),
            rules,
            index,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn rules(&self) -> &[CrossReactivityRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn lookup(&self, allergen_family: &str, drug_family: &str) -> Option<&CrossReactivityRule> {
        let key = (normalize_key(allergen_family), normalize_key(drug_family));
        self.index.get(&key).and_then(|idx| self.rules.get(*idx))
    }
}

/// Groups of names for one and the same compound (brand, generic, INN).
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    canonical: HashMap<String, String>,
    groups: usize,
}

impl AliasTable {
    pub fn new(groups: Vec<Vec<String>>) -> Result<Self, RxScreenError> {
        let mut canonical = HashMap::new();
        let mut count = 0;
        for group in groups {
            let names = group
                .iter()
                .map(|n| normalize_key(n))
                .filter(|n| !n.is_empty())
                .collect::<Vec<_>>();
            let Some(head) = names.first().cloned() else {
                continue;
            };
            for name in names {
                if let Some(existing) = canonical.get(&name)
                    && existing != &head
                {
                    return Err(RxScreenError::InvalidArgument(format!(
                        "Alias '{name}' appears in more than one alias group"
                    )));
                }
                canonical.insert(name, head.clone());
            }
            count += 1;
        }
        Ok(Self {
            canonical,
            groups: count,
        })
    }

    pub fn len(&self) -> usize {
        self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups == 0
    }

    /// Canonical lookup key: the group head for a known alias, else the normalized name.
    pub fn canonical(&self, name: &str) -> String {
        let key = normalize_key(name);
        self.canonical.get(&key).cloned().unwrap_or(key)
    }

    pub fn same_compound(&self, a: &str, b: &str) -> bool {
        self.canonical(a) == self.canonical(b)
    }
}
