#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum RxScreenError {
    #[error("HTTP client initialization failed: {0}")]
    HttpClientInit(reqwest::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    #[error("Patient '{name}' not found.\n\n{suggestion}")]
    PatientNotFound { name: String, suggestion: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid reference data in {path}: {message}")]
    ReferenceData { path: String, message: String },

    #[error("Reasoning provider {provider} failed: {message}")]
    Reasoning { provider: String, message: String },

    #[error("Reasoning provider {provider} returned malformed JSON: {source}")]
    ReasoningJson {
        provider: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Analysis cancelled before completion")]
    Cancelled,

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RxScreenError {
    pub(crate) fn reasoning(provider: &str, message: impl Into<String>) -> Self {
        Self::Reasoning {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn reference(path: &str, message: impl Into<String>) -> Self {
        Self::ReferenceData {
            path: path.to_string(),
            message: message.into(),
        }
    }
}
