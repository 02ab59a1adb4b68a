//! Free-text medicine name → catalog entry.

use std::cmp::Reverse;

use tracing::debug;

use crate::entities::drug::DrugCatalog;
use crate::screening::types::{MatchKind, Resolution, ResolvedMedicine, Warning, WarningKind};
use crate::utils::text::{clean_input, strip_strength, tokens};

const MIN_FUZZY_LEN: usize = 3;
const FUZZY_SIMILARITY: f64 = 0.75;
const SUGGESTION_SIMILARITY: f64 = 0.80;
const MAX_SUGGESTIONS: usize = 3;

/// Resolves one medicine name against `catalog`. Never fails; names that
/// match nothing come back unresolved with "did you mean" suggestions.
pub fn resolve(catalog: &DrugCatalog, raw: &str) -> ResolvedMedicine {
    let input = clean_input(raw);
    let key = input.to_lowercase();

    if let Some((idx, matched_by)) = locate(catalog, &key)
        && let Some(entry) = catalog.entry(idx)
    {
        debug!(medicine = %input, drug = %entry.drug_name, ?matched_by, "Resolved medicine");
        return ResolvedMedicine {
            input,
            resolution: Resolution::Resolved {
                entry: entry.clone(),
                matched_by,
            },
        };
    }

    let suggestions = suggestions(catalog, &key);
    debug!(medicine = %input, suggestions = suggestions.len(), "Medicine not in catalog");
    ResolvedMedicine {
        input,
        resolution: Resolution::Unresolved { suggestions },
    }
}

/// General warning for a name the catalog does not know.
pub(crate) fn unresolved_warning(medicine: &ResolvedMedicine) -> Option<Warning> {
    if medicine.is_resolved() {
        return None;
    }
    let mut reason = format!(
        "Medicine '{}' was not found in the drug catalog and could not be screened.",
        medicine.input
    );
    let suggestions = medicine.suggestions();
    if !suggestions.is_empty() {
        reason.push_str(&format!(" Did you mean: {}?", suggestions.join(", ")));
    }
    Some(Warning::new(WarningKind::Unresolved, reason))
}

fn locate(catalog: &DrugCatalog, key: &str) -> Option<(usize, MatchKind)> {
    if key.is_empty() {
        return None;
    }
    if let Some(idx) = catalog.first_by_name(key) {
        return Some((idx, MatchKind::Exact));
    }
    if let Some(idx) = catalog.first_by_generic(key) {
        return Some((idx, MatchKind::Generic));
    }

    let stripped = strip_strength(key);
    if !stripped.is_empty() {
        let candidates = catalog.stripped_matches(&stripped);
        let by_name = candidates.iter().copied().find(|idx| {
            catalog
                .entry_keys(*idx)
                .is_some_and(|k| k.name_stripped == stripped)
        });
        let by_generic = candidates.iter().copied().find(|idx| {
            catalog
                .entry_keys(*idx)
                .is_some_and(|k| k.generic_stripped.as_deref() == Some(stripped.as_str()))
        });
        if let Some(idx) = by_name.or(by_generic) {
            return Some((idx, MatchKind::StrengthStripped));
        }
    }

    let query = if stripped.is_empty() { key } else { stripped.as_str() };
    fuzzy(catalog, query).map(|idx| (idx, MatchKind::Fuzzy))
}

/// Token containment or normalized Levenshtein similarity against the name
/// and generic fields. Ranked by edit distance, then shared tokens, then
/// catalog position.
fn fuzzy(catalog: &DrugCatalog, query: &str) -> Option<usize> {
    if query.chars().count() < MIN_FUZZY_LEN {
        return None;
    }
    let query_tokens = tokens(query);

    let mut best: Option<(usize, Reverse<usize>, usize)> = None;
    for (idx, keys) in catalog.keys() {
        let fields = [
            Some((keys.name_stripped.as_str(), keys.name_tokens.as_slice())),
            keys.generic_stripped
                .as_deref()
                .map(|g| (g, keys.generic_tokens.as_slice())),
        ];
        for (field, field_tokens) in fields.into_iter().flatten() {
            if field.is_empty() {
                continue;
            }
            let contained = (!query_tokens.is_empty()
                && query_tokens.iter().all(|t| field_tokens.contains(t)))
                || (field.chars().count() >= MIN_FUZZY_LEN && query.contains(field));
            let similar = strsim::normalized_levenshtein(query, field) >= FUZZY_SIMILARITY;
            if !contained && !similar {
                continue;
            }

            let overlap = query_tokens
                .iter()
                .filter(|t| field_tokens.contains(t))
                .count();
            let rank = (strsim::levenshtein(query, field), Reverse(overlap), idx);
            if best.is_none_or(|current| rank < current) {
                best = Some(rank);
            }
        }
    }
    best.map(|(_, _, idx)| idx)
}

fn suggestions(catalog: &DrugCatalog, key: &str) -> Vec<String> {
    let stripped = strip_strength(key);
    let query = if stripped.is_empty() { key } else { stripped.as_str() };
    if query.is_empty() {
        return Vec::new();
    }
    let prefix = (query.chars().count() >= MIN_FUZZY_LEN)
        .then(|| query.chars().take(MIN_FUZZY_LEN).collect::<String>());

    catalog
        .keys()
        .filter(|(_, keys)| {
            let fields = [Some(keys.name_stripped.as_str()), keys.generic_stripped.as_deref()];
            fields.into_iter().flatten().any(|field| {
                prefix.as_deref().is_some_and(|p| field.starts_with(p))
                    || strsim::jaro_winkler(query, field) >= SUGGESTION_SIMILARITY
            })
        })
        .filter_map(|(idx, _)| catalog.entry(idx))
        .map(|entry| entry.drug_name.clone())
        .take(MAX_SUGGESTIONS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::drug::DrugCatalogEntry;

    fn catalog() -> DrugCatalog {
        DrugCatalog::new(
            "test",
            vec![
                DrugCatalogEntry::new("Amoxicillin 500mg")
                    .with_generic("Amoxicillin")
                    .with_ingredients(["Amoxicillin", "Penicillin"])
                    .with_family("penicillin"),
                DrugCatalogEntry::new("Penicillin V 250mg")
                    .with_generic("Penicillin V")
                    .with_ingredients(["Penicillin"])
                    .with_family("penicillin"),
                DrugCatalogEntry::new("Cephalexin 500mg")
                    .with_generic("Cephalexin")
                    .with_ingredients(["Cephalexin"])
                    .with_family("cephalosporin"),
                DrugCatalogEntry::new("Ibuprofen 200mg")
                    .with_generic("Ibuprofen")
                    .with_ingredients(["Ibuprofen"])
                    .with_family("nsaid"),
                DrugCatalogEntry::new("Ibuprofen 400mg")
                    .with_generic("Ibuprofen")
                    .with_ingredients(["Ibuprofen"])
                    .with_family("nsaid"),
                DrugCatalogEntry::new("Bactrim DS")
                    .with_generic("Sulfamethoxazole/Trimethoprim")
                    .with_ingredients(["Sulfamethoxazole", "Trimethoprim"])
                    .with_family("sulfonamide_antibiotic"),
            ],
        )
        .unwrap()
    }

    fn matched(med: &ResolvedMedicine) -> (&str, MatchKind) {
        match &med.resolution {
            Resolution::Resolved { entry, matched_by } => (entry.drug_name.as_str(), *matched_by),
            Resolution::Unresolved { .. } => panic!("{} did not resolve", med.input),
        }
    }

    #[test]
    fn exact_name_wins_over_generic() {
        let med = resolve(&catalog(), " \"amoxicillin 500MG\" ");
        assert_eq!(med.input, "amoxicillin 500MG");
        assert_eq!(matched(&med), ("Amoxicillin 500mg", MatchKind::Exact));
    }

    #[test]
    fn generic_name_resolves_to_first_entry_in_catalog_order() {
        let med = resolve(&catalog(), "Ibuprofen");
        assert_eq!(matched(&med), ("Ibuprofen 200mg", MatchKind::Generic));
    }

    #[test]
    fn strength_tokens_are_ignored_on_both_sides() {
        let med = resolve(&catalog(), "Cephalexin 250 mg");
        assert_eq!(
            matched(&med),
            ("Cephalexin 500mg", MatchKind::StrengthStripped)
        );
    }

    #[test]
    fn misspelling_resolves_fuzzily() {
        let med = resolve(&catalog(), "Amoxicilin");
        assert_eq!(matched(&med), ("Amoxicillin 500mg", MatchKind::Fuzzy));
    }

    #[test]
    fn partial_brand_name_resolves_by_token_containment() {
        let med = resolve(&catalog(), "bactrim");
        assert_eq!(matched(&med), ("Bactrim DS", MatchKind::Fuzzy));
    }

    #[test]
    fn fuzzy_ties_fall_back_to_catalog_order() {
        let med = resolve(&catalog(), "Ibuprofn");
        assert_eq!(matched(&med), ("Ibuprofen 200mg", MatchKind::Fuzzy));
    }

    #[test]
    fn unknown_name_is_unresolved_with_suggestions() {
        let med = resolve(&catalog(), "Amoxyl");
        assert!(!med.is_resolved());
        assert_eq!(med.suggestions(), &["Amoxicillin 500mg".to_string()]);

        let warning = unresolved_warning(&med).unwrap();
        assert_eq!(warning.kind, WarningKind::Unresolved);
        assert!(warning.medicine.is_none());
        assert!(warning.reason.contains("'Amoxyl'"));
        assert!(warning.reason.contains("Did you mean: Amoxicillin 500mg?"));
    }

    #[test]
    fn short_garbage_never_matches() {
        let med = resolve(&catalog(), "zq");
        assert!(!med.is_resolved());
        assert!(med.suggestions().is_empty());
        let warning = unresolved_warning(&med).unwrap();
        assert!(!warning.reason.contains("Did you mean"));
    }

    #[test]
    fn resolution_is_deterministic() {
        let catalog = catalog();
        for name in ["Amoxicilin", "bactrim", "Ibuprofn", "Amoxyl"] {
            assert_eq!(resolve(&catalog, name), resolve(&catalog, name));
        }
    }
}
