//! Command-line surface: argument parsing and command dispatch.
//!
//! Every command returns its rendered output; `main` prints it.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::entities::rules::CrossReactivityRule;
use crate::error::RxScreenError;
use crate::render::{json, markdown};
use crate::screening::Screener;

pub mod batch;
pub mod health;

#[derive(Parser, Debug)]
#[command(
    name = "rxscreen",
    version,
    about = "Screen prescriptions against patient allergy records",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Print JSON instead of Markdown
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory with catalog.json, rules.json and patients.json
    /// (default: $RXSCREEN_DATA_DIR, then the platform data directory)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Screen one prescription for a patient
    Check {
        /// Patient name as recorded (case-insensitive)
        #[arg(long)]
        patient: String,

        /// Prescribed medicine names
        #[arg(required = true)]
        medicines: Vec<String>,

        /// Skip the reasoning provider even when an API key is configured
        #[arg(long)]
        no_reasoning: bool,

        /// Reasoning deadline in seconds (default: 20)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Screen prescriptions from a JSON lines file
    Batch {
        /// One {"patient_name": ..., "medicines": [...]} object per line
        file: PathBuf,

        /// Prescriptions screened at the same time
        #[arg(long, default_value = "4")]
        concurrency: usize,

        /// Write the report here instead of printing it
        #[arg(long)]
        output: Option<PathBuf>,

        /// Skip the reasoning provider even when an API key is configured
        #[arg(long)]
        no_reasoning: bool,

        /// Reasoning deadline in seconds (default: 20)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Search the drug catalog by name, generic name or ingredient
    Drugs {
        query: String,

        /// Maximum results (1-100)
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Show a patient's recorded allergies
    Patient { name: String },

    /// Most common allergens and the severity distribution across patients
    Patterns {
        /// Number of allergens to list
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Show the loaded cross-reactivity rules and reference data versions
    Rules,

    /// Check reference data, patient records and the reasoning endpoint
    Health,
}

#[derive(Serialize)]
struct RulesView<'a> {
    catalog_version: &'a str,
    drugs: usize,
    rules_version: &'a str,
    alias_groups: usize,
    allergen_families: usize,
    rules: &'a [CrossReactivityRule],
}

/// Cancels the returned token on Ctrl-C until the guard is dropped.
struct CtrlCGuard {
    token: CancellationToken,
    watcher: tokio::task::JoinHandle<()>,
}

impl CtrlCGuard {
    fn install() -> Self {
        let token = CancellationToken::new();
        let child = token.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, cancelling");
                child.cancel();
            }
        });
        Self { token, watcher }
    }
}

impl Drop for CtrlCGuard {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

fn validate_limit(limit: usize) -> Result<usize, RxScreenError> {
    if !(1..=100).contains(&limit) {
        return Err(RxScreenError::InvalidArgument(
            "--limit must be between 1 and 100".into(),
        ));
    }
    Ok(limit)
}

/// Runs one parsed command and returns what should be printed.
///
/// # Errors
///
/// Returns an error when configuration or data files are invalid, the
/// patient is unknown, or the command was interrupted.
pub async fn run(cli: Cli) -> anyhow::Result<String> {
    let Cli {
        command,
        json: json_output,
        data_dir,
    } = cli;
    let config = Config::from_env()?.with_data_dir(data_dir);
    debug!(?config, "Configuration resolved");

    match command {
        Commands::Check {
            patient,
            medicines,
            no_reasoning,
            timeout_secs,
        } => {
            let config = config.with_timeout_secs(timeout_secs)?;
            let screener = Screener::from_config(&config, !no_reasoning).await?;
            let guard = CtrlCGuard::install();
            let result = screener
                .check_prescription_with_cancel(&patient, &medicines, &guard.token)
                .await?;
            if json_output {
                Ok(json::to_pretty(&result)?)
            } else {
                Ok(markdown::analysis_markdown(&result)?)
            }
        }
        Commands::Batch {
            file,
            concurrency,
            output,
            no_reasoning,
            timeout_secs,
        } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read batch file {}", file.display()))?;
            let requests = batch::parse_requests(&text)?;
            let config = config.with_timeout_secs(timeout_secs)?;
            let screener = Screener::from_config(&config, !no_reasoning).await?;
            let concurrency = batch::effective_concurrency(
                concurrency,
                screener.reasoning_provider().is_some(),
                &config,
            );
            let guard = CtrlCGuard::install();
            let outcomes =
                batch::run_batch(&screener, requests, concurrency, &guard.token).await?;

            let report = if json_output {
                batch::outcomes_json_lines(&outcomes)?
            } else {
                batch::outcomes_markdown(&outcomes)?
            };
            match output {
                Some(path) => {
                    crate::utils::fs::write_atomic(&path, &report).await?;
                    Ok(format!(
                        "{}\nReport written to {}",
                        batch::summary_line(&outcomes),
                        path.display()
                    ))
                }
                None => Ok(report),
            }
        }
        Commands::Drugs { query, limit } => {
            let limit = validate_limit(limit)?;
            let screener = Screener::from_config(&config, false).await?;
            let results = screener.search_drugs(&query, limit);
            if json_output {
                Ok(json::to_pretty(&results)?)
            } else {
                Ok(markdown::drug_search_markdown(&query, &results)?)
            }
        }
        Commands::Patient { name } => {
            let screener = Screener::from_config(&config, false).await?;
            let profile = screener.patient_profile(&name).await?;
            if json_output {
                Ok(json::to_pretty(&profile)?)
            } else {
                Ok(markdown::patient_markdown(&profile)?)
            }
        }
        Commands::Patterns { top } => {
            let screener = Screener::from_config(&config, false).await?;
            let patterns = screener.allergy_patterns(top).await?;
            if json_output {
                Ok(json::to_pretty(&patterns)?)
            } else {
                Ok(markdown::patterns_markdown(&patterns)?)
            }
        }
        Commands::Rules => {
            let screener = Screener::from_config(&config, false).await?;
            let reference = screener.reference();
            if json_output {
                let view = RulesView {
                    catalog_version: reference.catalog().version(),
                    drugs: reference.catalog().len(),
                    rules_version: reference.rules().version(),
                    alias_groups: reference.aliases().len(),
                    allergen_families: reference.allergen_family_count(),
                    rules: reference.rules().rules(),
                };
                Ok(json::to_pretty(&view)?)
            } else {
                Ok(markdown::rules_markdown(&reference)?)
            }
        }
        Commands::Health => {
            let report = health::check(&config).await?;
            if json_output {
                Ok(json::to_pretty(&report)?)
            } else {
                Ok(report.to_markdown())
            }
        }
    }
}
