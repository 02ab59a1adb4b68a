use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::RxScreenError;
use crate::sources::datafile::{self, CATALOG_FILE, PATIENTS_FILE, RULES_FILE};

const PING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthRow {
    pub component: String,
    pub status: String,
    pub detail: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub healthy: usize,
    pub total: usize,
    pub rows: Vec<HealthRow>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.healthy == self.total
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# RxScreen Health Check\n\n");
        out.push_str("| Component | Status | Detail |\n");
        out.push_str("|-----------|--------|--------|\n");
        for row in &self.rows {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                row.component, row.status, row.detail
            ));
        }
        out.push_str(&format!(
            "\nStatus: {}/{} checks healthy\n",
            self.healthy, self.total
        ));
        out
    }
}

fn row(component: String, status: &str, detail: String) -> HealthRow {
    HealthRow {
        component,
        status: status.into(),
        detail,
    }
}

async fn check_reference(config: &Config) -> HealthRow {
    let dir = Some(config.data_dir.as_path());
    let component = format!(
        "Reference data ({}, {})",
        datafile::origin(dir, CATALOG_FILE),
        datafile::origin(dir, RULES_FILE)
    );
    let start = Instant::now();
    match datafile::load_reference_data(dir).await {
        Ok(data) => row(
            component,
            "ok",
            format!(
                "{} drugs ({}), {} rules ({}) in {}ms",
                data.catalog().len(),
                data.catalog().version(),
                data.rules().len(),
                data.rules().version(),
                start.elapsed().as_millis()
            ),
        ),
        Err(err) => row(component, "error", err.to_string()),
    }
}

async fn check_patients(config: &Config) -> HealthRow {
    let dir = Some(config.data_dir.as_path());
    let component = format!("Patient records ({})", datafile::origin(dir, PATIENTS_FILE));
    match datafile::load_patient_store(dir).await {
        Ok(store) => row(component, "ok", format!("{} patients", store.len())),
        Err(err) => row(component, "error", err.to_string()),
    }
}

async fn check_reasoning(config: &Config) -> HealthRow {
    let component = format!("Reasoning ({})", config.reasoning.base);
    let client = match config.reasoning_client() {
        Ok(Some(client)) => client,
        Ok(None) => return row(component, "skipped", "no API key configured".into()),
        Err(err) => return row(component, "error", err.to_string()),
    };

    let start = Instant::now();
    match tokio::time::timeout(PING_TIMEOUT, client.ping()).await {
        Ok(Ok(models)) => row(
            component,
            "ok",
            format!(
                "{}ms, {models} models, using {}",
                start.elapsed().as_millis(),
                client.model()
            ),
        ),
        Ok(Err(err)) => row(component, "error", err.to_string()),
        Err(_) => row(
            component,
            "error",
            format!("timeout after {}s", PING_TIMEOUT.as_secs()),
        ),
    }
}

/// Checks the reference files, patient records, and (when a key is
/// configured) the reasoning endpoint. Skipped checks are not counted.
///
/// # Errors
///
/// Currently infallible; individual failures are reported as rows.
pub async fn check(config: &Config) -> Result<HealthReport, RxScreenError> {
    let (reference, patients, reasoning) = tokio::join!(
        check_reference(config),
        check_patients(config),
        check_reasoning(config),
    );

    let rows = vec![reference, patients, reasoning];
    let counted = rows.iter().filter(|r| r.status != "skipped");
    let total = counted.clone().count();
    let healthy = counted.filter(|r| r.status == "ok").count();
    Ok(HealthReport {
        healthy,
        total,
        rows,
    })
}
