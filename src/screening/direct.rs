use tracing::debug;

use crate::entities::patient::{AllergyRecord, PatientAllergyProfile};
use crate::entities::rules::AliasTable;
use crate::screening::types::{Contraindication, ResolvedMedicine};

/// Ingredient-level conflicts between resolved medicines and active allergies.
///
/// One contraindication per (medicine, allergen), carrying the severity the
/// patient's record states. Drug families are not consulted here.
pub(crate) fn direct_matches(
    medicines: &[ResolvedMedicine],
    profile: &PatientAllergyProfile,
    aliases: &AliasTable,
) -> Vec<Contraindication> {
    let allergies = profile
        .active_allergies()
        .map(|record| (aliases.canonical(&record.allergen_name), record))
        .collect::<Vec<_>>();
    if allergies.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    for medicine in medicines {
        let Some(entry) = medicine.entry() else {
            continue;
        };
        let ingredients = entry
            .active_ingredients
            .iter()
            .map(|ingredient| (aliases.canonical(ingredient), ingredient.trim()))
            .collect::<Vec<_>>();

        for (allergen_key, record) in &allergies {
            let Some((_, ingredient)) = ingredients.iter().find(|(key, _)| key == allergen_key)
            else {
                continue;
            };
            debug!(
                medicine = %medicine.input,
                allergen = %record.allergen_name,
                severity = %record.severity,
                "Direct allergy match"
            );
            out.push(Contraindication {
                medicine: medicine.input.clone(),
                allergen: record.allergen_name.trim().to_string(),
                severity: record.severity,
                reason: reason(&medicine.input, ingredient, record),
            });
        }
    }
    out
}

fn reason(medicine: &str, ingredient: &str, record: &AllergyRecord) -> String {
    let allergen = record.allergen_name.trim();
    let mut reason = if ingredient.eq_ignore_ascii_case(allergen) {
        format!("{medicine} contains {ingredient};")
    } else {
        format!("{medicine} contains {ingredient} (same compound as {allergen});")
    };
    reason.push_str(&format!(
        " patient has a {} {allergen} allergy.",
        record.severity
    ));
    if let Some(reaction) = record
        .reaction
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
    {
        reason.push_str(&format!(" Recorded reaction: {reaction}."));
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::drug::DrugCatalogEntry;
    use crate::entities::patient::{AllergyStatus, Severity};
    use crate::screening::types::{MatchKind, Resolution};

    fn resolved(input: &str, entry: DrugCatalogEntry) -> ResolvedMedicine {
        ResolvedMedicine {
            input: input.to_string(),
            resolution: Resolution::Resolved {
                entry,
                matched_by: MatchKind::Exact,
            },
        }
    }

    fn aliases() -> AliasTable {
        AliasTable::new(vec![vec!["Aspirin".into(), "Acetylsalicylic acid".into()]]).unwrap()
    }

    #[test]
    fn ingredient_match_uses_recorded_severity_and_reaction() {
        let profile = PatientAllergyProfile::new(
            "Jane Doe",
            vec![
                AllergyRecord::new("Penicillin", Severity::Severe)
                    .with_reaction("Severe rash, difficulty breathing"),
            ],
        )
        .unwrap();
        let meds = vec![
            resolved(
                "Amoxicillin",
                DrugCatalogEntry::new("Amoxicillin 500mg")
                    .with_ingredients(["Amoxicillin", "Penicillin"])
                    .with_family("penicillin"),
            ),
            resolved(
                "Ibuprofen",
                DrugCatalogEntry::new("Ibuprofen 200mg").with_ingredients(["Ibuprofen"]),
            ),
        ];

        let found = direct_matches(&meds, &profile, &aliases());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].medicine, "Amoxicillin");
        assert_eq!(found[0].allergen, "Penicillin");
        assert_eq!(found[0].severity, Severity::Severe);
        assert!(found[0].reason.contains("Severe rash, difficulty breathing"));
    }

    #[test]
    fn alias_ingredients_match_and_count_once() {
        let profile = PatientAllergyProfile::new(
            "Mary Johnson",
            vec![AllergyRecord::new("aspirin", Severity::Moderate)],
        )
        .unwrap();
        let meds = vec![resolved(
            "Aspirin 325mg",
            DrugCatalogEntry::new("Aspirin 325mg")
                .with_ingredients(["Acetylsalicylic acid", "Aspirin"]),
        )];

        let found = direct_matches(&meds, &profile, &aliases());
        assert_eq!(found.len(), 1);
        assert!(found[0].reason.contains("Acetylsalicylic acid"));
        assert!(found[0].reason.contains("same compound"));
    }

    #[test]
    fn independent_allergens_each_produce_a_contraindication() {
        let profile = PatientAllergyProfile::new(
            "Lisa Wilson",
            vec![
                AllergyRecord::new("Codeine", Severity::Severe),
                AllergyRecord::new("Acetaminophen", Severity::Mild),
            ],
        )
        .unwrap();
        let meds = vec![resolved(
            "Tylenol with Codeine #3",
            DrugCatalogEntry::new("Tylenol with Codeine #3")
                .with_ingredients(["Acetaminophen", "Codeine"]),
        )];

        let found = direct_matches(&meds, &profile, &aliases());
        let allergens = found.iter().map(|c| c.allergen.as_str()).collect::<Vec<_>>();
        assert_eq!(allergens, vec!["Codeine", "Acetaminophen"]);
    }

    #[test]
    fn inactive_allergies_and_unresolved_medicines_are_skipped() {
        let profile = PatientAllergyProfile::new(
            "Robert Davis",
            vec![
                AllergyRecord::new("Sulfamethoxazole", Severity::Mild)
                    .with_status(AllergyStatus::Inactive),
            ],
        )
        .unwrap();
        let meds = vec![
            resolved(
                "Bactrim DS",
                DrugCatalogEntry::new("Bactrim DS").with_ingredients(["Sulfamethoxazole"]),
            ),
            ResolvedMedicine {
                input: "Sulfamethoxazole?".into(),
                resolution: Resolution::Unresolved {
                    suggestions: Vec::new(),
                },
            },
        ];

        assert!(direct_matches(&meds, &profile, &aliases()).is_empty());
    }

    #[test]
    fn drug_family_alone_never_contraindicates() {
        let profile = PatientAllergyProfile::new(
            "Jane Doe",
            vec![AllergyRecord::new("Penicillin", Severity::Severe).with_family("penicillin")],
        )
        .unwrap();
        let meds = vec![resolved(
            "Cephalexin",
            DrugCatalogEntry::new("Cephalexin 500mg")
                .with_ingredients(["Cephalexin"])
                .with_family("penicillin"),
        )];

        assert!(direct_matches(&meds, &profile, &aliases()).is_empty());
    }
}
