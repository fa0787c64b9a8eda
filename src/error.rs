use crate::models::Backend;

#[derive(Debug, thiserror::Error)]
pub enum ImageGenError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("{} API error: {}", .backend.vendor_name(), .message)]
    Backend { backend: Backend, message: String },
    #[error("Error preparing download: {0}")]
    Download(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Unknown model: {0}")]
    UnknownModel(String),
}

impl ImageGenError {
    pub fn backend(backend: Backend, message: impl Into<String>) -> Self {
        ImageGenError::Backend {
            backend,
            message: message.into(),
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, ImageGenError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, ImageGenError>;
