use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Processing error: {0}")]
    Processing(String),
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Publish error: {0}")]
    Publish(String),
    #[error("DOM smoothie error: {0}")]
    DomSmoothie(#[from] dom_smoothie::ReadabilityError),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether a failed external call is worth repeating.
    ///
    /// Network failures, timeouts and 5xx/429 responses are transient; everything
    /// else (bad payloads, rejected credentials, missing records) is not.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Reqwest(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.is_request()
                    || err.status().is_some_and(|status| {
                        status.is_server_error() || status.as_u16() == 429
                    })
            }
            AppError::OpenAI(OpenAIError::Reqwest(_)) | AppError::Provider(_) => true,
            AppError::OpenAI(OpenAIError::ApiError(api)) => api
                .r#type
                .as_deref()
                .is_some_and(|kind| kind.contains("server") || kind.contains("rate")),
            _ => false,
        }
    }
}
