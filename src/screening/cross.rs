use tracing::debug;

use crate::entities::patient::{AllergyRecord, PatientAllergyProfile};
use crate::entities::reference::ReferenceData;
use crate::screening::types::{Confidence, Contraindication, ResolvedMedicine, Warning, WarningKind};

/// Family-level warnings from the rule table.
///
/// Pairs that already produced a contraindication are skipped. A resolved
/// medicine with no drug family gets a `family_unknown` warning when the
/// patient has family-tagged allergies, since the rule table cannot speak for it.
pub(crate) fn cross_reactivity_warnings(
    medicines: &[ResolvedMedicine],
    profile: &PatientAllergyProfile,
    reference: &ReferenceData,
    contraindications: &[Contraindication],
) -> Vec<Warning> {
    let families = profile
        .active_allergies()
        .filter_map(|record| reference.allergen_family(record).map(|family| (family, record)))
        .collect::<Vec<_>>();
    if families.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    for medicine in medicines {
        let Some(entry) = medicine.entry() else {
            continue;
        };

        let Some(drug_family) = entry
            .drug_family
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
        else {
            if !contraindications
                .iter()
                .any(|c| c.medicine == medicine.input)
            {
                out.push(family_unknown(&medicine.input, &families));
            }
            continue;
        };

        for (allergen_family, record) in &families {
            let allergen = record.allergen_name.trim();
            if contraindications
                .iter()
                .any(|c| c.medicine == medicine.input && c.allergen == allergen)
            {
                continue;
            }
            let Some(rule) = reference.rules().lookup(allergen_family, drug_family) else {
                continue;
            };

            debug!(
                medicine = %medicine.input,
                allergen = %allergen,
                allergen_family = %allergen_family,
                drug_family = %drug_family,
                severity = %rule.severity,
                "Cross-reactivity rule hit"
            );
            let mut reason = format!(
                "{allergen_family}-class allergy ({allergen}); {drug_family} cross-reactivity risk."
            );
            if let Some(note) = rule.note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                reason.push(' ');
                reason.push_str(note);
            }
            out.push(
                Warning::new(WarningKind::CrossReactivity, reason)
                    .for_medicine(medicine.input.clone())
                    .with_allergen(allergen)
                    .with_severity(rule.severity),
            );
        }
    }
    out
}

fn family_unknown(medicine: &str, families: &[(String, &AllergyRecord)]) -> Warning {
    let mut names = Vec::new();
    for (family, _) in families {
        if !names.contains(family) {
            names.push(family.clone());
        }
    }
    Warning::new(
        WarningKind::FamilyUnknown,
        format!(
            concat!(
                "Drug family of {} is unknown; cross-reactivity with the patient's ",
                "{} allergies could not be evaluated."
            ),
            medicine,
            names.join(", ")
        ),
    )
    .for_medicine(medicine)
    .with_confidence(Confidence::Low)
}
