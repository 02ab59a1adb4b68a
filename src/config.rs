//! Runtime configuration read from `RXSCREEN_*` environment variables.
//!
//! Values are trimmed and an empty value counts as unset. CLI flags override
//! what is read here.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RxScreenError;
use crate::screening::augment::ReasoningProvider;
use crate::screening::{DEFAULT_REASONING_TIMEOUT, ScreeningOptions};
use crate::sources::reasoning::{
    ChatReasoningClient, DEFAULT_REASONING_BASE, DEFAULT_REASONING_MODEL,
};

pub const DATA_DIR_ENV: &str = "RXSCREEN_DATA_DIR";
pub const REASONING_BASE_ENV: &str = "RXSCREEN_REASONING_BASE";
pub const REASONING_MODEL_ENV: &str = "RXSCREEN_REASONING_MODEL";
pub const REASONING_API_KEY_ENV: &str = "RXSCREEN_REASONING_API_KEY";
pub const REASONING_TIMEOUT_ENV: &str = "RXSCREEN_REASONING_TIMEOUT_SECS";
pub const REASONING_MIN_INTERVAL_ENV: &str = "RXSCREEN_REASONING_MIN_INTERVAL_MS";

const DEFAULT_REASONING_MIN_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Clone)]
pub struct ReasoningConfig {
    pub base: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Minimum spacing between requests to the reasoning endpoint.
    pub min_interval: Duration,
}

impl std::fmt::Debug for ReasoningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningConfig")
            .field("base", &self.base)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub reasoning: ReasoningConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, RxScreenError> {
        Self::from_lookup(crate::sources::env_value)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RxScreenError> {
        let timeout = match lookup(REASONING_TIMEOUT_ENV) {
            Some(raw) => parse_timeout_secs(&raw)?,
            None => DEFAULT_REASONING_TIMEOUT,
        };
        Ok(Self {
            data_dir: lookup(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(crate::utils::fs::rxscreen_data_dir),
            reasoning: ReasoningConfig {
                base: lookup(REASONING_BASE_ENV).unwrap_or_else(|| DEFAULT_REASONING_BASE.into()),
                model: lookup(REASONING_MODEL_ENV)
                    .unwrap_or_else(|| DEFAULT_REASONING_MODEL.into()),
                api_key: lookup(REASONING_API_KEY_ENV),
                timeout,
                min_interval: parse_min_interval(lookup(REASONING_MIN_INTERVAL_ENV)),
            },
        })
    }

    pub fn with_data_dir(mut self, data_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = data_dir {
            self.data_dir = dir;
        }
        self
    }

    pub fn with_timeout_secs(mut self, secs: Option<u64>) -> Result<Self, RxScreenError> {
        if let Some(secs) = secs {
            self.reasoning.timeout = timeout_from_secs(secs)?;
        }
        Ok(self)
    }

    pub fn screening_options(&self, reasoning_enabled: bool) -> ScreeningOptions {
        ScreeningOptions {
            reasoning_timeout: self.reasoning.timeout,
            reasoning_enabled,
        }
    }

    /// Largest number of checks that may queue on the reasoning spacer at
    /// once while the last one still leaves it before its deadline, i.e.
    /// `limit * min_interval < timeout`. Never below 1.
    pub fn reasoning_concurrency_limit(&self) -> usize {
        let interval = self.reasoning.min_interval.as_millis();
        if interval == 0 {
            return usize::MAX;
        }
        let timeout = self.reasoning.timeout.as_millis();
        usize::try_from(timeout.saturating_sub(1) / interval)
            .unwrap_or(usize::MAX)
            .max(1)
    }

    /// The configured chat-completions client, or `None` when no API key is set.
    pub fn reasoning_provider(&self) -> Result<Option<Arc<dyn ReasoningProvider>>, RxScreenError> {
        Ok(self
            .reasoning_client()?
            .map(|client| Arc::new(client) as Arc<dyn ReasoningProvider>))
    }

    pub(crate) fn reasoning_client(&self) -> Result<Option<ChatReasoningClient>, RxScreenError> {
        let Some(api_key) = self.reasoning.api_key.as_deref() else {
            return Ok(None);
        };
        let client = ChatReasoningClient::new(api_key)?
            .with_base(self.reasoning.base.clone())
            .with_model(self.reasoning.model.clone());
        Ok(Some(client))
    }
}

/// Spacing read from the environment; the request spacer is process-wide.
pub(crate) fn reasoning_min_interval() -> Duration {
    parse_min_interval(crate::sources::env_value(REASONING_MIN_INTERVAL_ENV))
}

fn parse_min_interval(raw: Option<String>) -> Duration {
    raw.and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_REASONING_MIN_INTERVAL)
}

fn parse_timeout_secs(raw: &str) -> Result<Duration, RxScreenError> {
    let secs = raw.trim().parse::<u64>().map_err(|_| {
        RxScreenError::InvalidArgument(format!(
            "{REASONING_TIMEOUT_ENV} must be a whole number of seconds, got '{raw}'"
        ))
    })?;
    timeout_from_secs(secs)
}

fn timeout_from_secs(secs: u64) -> Result<Duration, RxScreenError> {
    if secs == 0 {
        return Err(RxScreenError::InvalidArgument(
            "Reasoning timeout must be at least 1 second".into(),
        ));
    }
    Ok(Duration::from_secs(secs))
}
