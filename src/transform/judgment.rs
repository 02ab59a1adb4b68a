use serde::Deserialize;

use crate::error::RxScreenError;
use crate::screening::augment::{ReasoningConcern, ReasoningJudgment};
use crate::screening::types::{Confidence, RiskLevel};
use crate::utils::serde::StringOrVec;

#[derive(Debug, Deserialize)]
struct RawJudgment {
    #[serde(default)]
    summary: Option<String>,
    risk_level: RiskLevel,
    #[serde(default)]
    recommendations: StringOrVec,
    #[serde(default)]
    concerns: Vec<RawConcern>,
}

#[derive(Debug, Deserialize)]
struct RawConcern {
    #[serde(default)]
    medicine: String,
    #[serde(default)]
    allergen: Option<String>,
    #[serde(default, alias = "explanation")]
    reason: String,
    #[serde(default)]
    confidence: Option<Confidence>,
}

/// Parses the provider's message content into a judgment.
///
/// The JSON object may be wrapped in a Markdown fence or surrounded by prose.
/// Unknown risk levels or confidences are malformed; concerns without a
/// medicine or reason are dropped.
pub(crate) fn parse_judgment(
    provider: &str,
    content: &str,
) -> Result<ReasoningJudgment, RxScreenError> {
    let Some(json) = json_object(content) else {
        return Err(RxScreenError::reasoning(
            provider,
            "response contained no JSON object",
        ));
    };
    let raw: RawJudgment =
        serde_json::from_str(json).map_err(|source| RxScreenError::ReasoningJson {
            provider: provider.to_string(),
            source,
        })?;

    let concerns = raw
        .concerns
        .into_iter()
        .filter_map(|c| {
            let medicine = c.medicine.trim().to_string();
            let reason = c.reason.trim().to_string();
            if medicine.is_empty() || reason.is_empty() {
                return None;
            }
            Some(ReasoningConcern {
                medicine,
                allergen: c
                    .allergen
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty()),
                reason,
                confidence: c.confidence.unwrap_or(Confidence::Low),
            })
        })
        .collect();

    Ok(ReasoningJudgment {
        summary: raw.summary.unwrap_or_default().trim().to_string(),
        risk_level: raw.risk_level,
        recommendations: raw.recommendations.into_clean_vec(),
        concerns,
    })
}

fn json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}
