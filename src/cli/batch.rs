//! Screening many prescriptions from a JSON lines file.
//!
//! Each non-blank line is `{"patient_name": "...", "medicines": [...]}`;
//! `medicines` may also be a single comma-separated string. Lines starting
//! with `#` are comments.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::error::RxScreenError;
use crate::screening::Screener;
use crate::screening::types::AnalysisResult;
use crate::utils::serde::StringOrVec;

pub const MAX_CONCURRENCY: usize = 32;

#[derive(Debug, Deserialize)]
struct RawBatchLine {
    #[serde(alias = "patient")]
    patient_name: String,
    #[serde(default, alias = "medications")]
    medicines: StringOrVec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub line: usize,
    pub patient_name: String,
    pub medicines: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub line: usize,
    pub patient_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parses the whole file up front so a malformed line fails before any screening runs.
pub fn parse_requests(text: &str) -> Result<Vec<BatchRequest>, RxScreenError> {
    let mut requests = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parsed: RawBatchLine = serde_json::from_str(trimmed).map_err(|err| {
            RxScreenError::InvalidArgument(format!("Batch line {line}: {err}"))
        })?;
        let medicines = parsed
            .medicines
            .into_clean_vec()
            .iter()
            .flat_map(|entry| entry.split(','))
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>();
        if medicines.is_empty() {
            return Err(RxScreenError::InvalidArgument(format!(
                "Batch line {line}: no medicines listed"
            )));
        }
        requests.push(BatchRequest {
            line,
            patient_name: parsed.patient_name,
            medicines,
        });
    }
    if requests.is_empty() {
        return Err(RxScreenError::InvalidArgument(
            "Batch file contains no prescriptions".into(),
        ));
    }
    Ok(requests)
}

/// Lowers `requested` when reasoning is active so every queued reasoning
/// request clears the spacer before its deadline.
pub fn effective_concurrency(requested: usize, reasoning_active: bool, config: &Config) -> usize {
    if !reasoning_active {
        return requested;
    }
    let limit = config.reasoning_concurrency_limit();
    if requested > limit {
        warn!(
            requested,
            limit,
            min_interval_ms = config.reasoning.min_interval.as_millis() as u64,
            timeout_secs = config.reasoning.timeout.as_secs_f64(),
            "Lowering batch concurrency to fit the reasoning deadline"
        );
        return limit;
    }
    requested
}

/// Screens every request with at most `concurrency` in flight; outcomes keep input order.
///
/// Per-line failures (unknown patient) become outcome errors. Cancellation
/// aborts the whole batch.
pub async fn run_batch(
    screener: &Screener,
    requests: Vec<BatchRequest>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<Vec<BatchOutcome>, RxScreenError> {
    if concurrency == 0 || concurrency > MAX_CONCURRENCY {
        return Err(RxScreenError::InvalidArgument(format!(
            "--concurrency must be between 1 and {MAX_CONCURRENCY}"
        )));
    }

    let outcomes = stream::iter(requests)
        .map(|request| async move {
            let result = screener
                .check_prescription_with_cancel(&request.patient_name, &request.medicines, cancel)
                .await;
            (request, result)
        })
        .buffered(concurrency)
        .collect::<Vec<_>>()
        .await;

    let mut out = Vec::with_capacity(outcomes.len());
    for (request, result) in outcomes {
        match result {
            Ok(result) => out.push(BatchOutcome {
                line: request.line,
                patient_name: result.patient_name.clone(),
                result: Some(result),
                error: None,
            }),
            Err(RxScreenError::Cancelled) => return Err(RxScreenError::Cancelled),
            Err(err) => {
                warn!(
                    line = request.line,
                    patient = %request.patient_name,
                    "Batch line failed: {err}"
                );
                out.push(BatchOutcome {
                    line: request.line,
                    patient_name: request.patient_name,
                    result: None,
                    error: Some(err.to_string()),
                });
            }
        }
    }
    Ok(out)
}

pub fn outcomes_json_lines(outcomes: &[BatchOutcome]) -> Result<String, RxScreenError> {
    let mut lines = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        lines.push(crate::render::json::to_json_line(outcome)?);
    }
    Ok(lines.join("\n"))
}

pub fn outcomes_markdown(outcomes: &[BatchOutcome]) -> Result<String, RxScreenError> {
    let mut sections = Vec::with_capacity(outcomes.len() + 1);
    for outcome in outcomes {
        match (&outcome.result, &outcome.error) {
            (Some(result), _) => {
                sections.push(crate::render::markdown::analysis_markdown(result)?);
            }
            (None, error) => sections.push(format!(
                "# Prescription Check: {}\n\nLine {} failed: {}\n",
                outcome.patient_name,
                outcome.line,
                error.as_deref().unwrap_or("unknown error")
            )),
        }
    }
    sections.push(summary_line(outcomes));
    Ok(sections.join("\n\n"))
}

pub fn summary_line(outcomes: &[BatchOutcome]) -> String {
    let unsafe_count = outcomes
        .iter()
        .filter(|o| o.result.as_ref().is_some_and(|r| !r.is_safe))
        .count();
    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    format!(
        "Screened {} prescription(s): {} unsafe, {} failed.",
        outcomes.len(),
        unsafe_count,
        failed
    )
}
