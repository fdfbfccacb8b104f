//! Azure platform error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AzureError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("az CLI not found. Please install: https://aka.ms/azure-cli")]
    AzCliNotFound,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Azure API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Long-running operation failed: {0}")]
    OperationFailed(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cloud error: {0}")]
    CloudError(#[from] ciflow_cloud::CloudError),
}

impl From<AzureError> for ciflow_cloud::CloudError {
    fn from(err: AzureError) -> Self {
        use ciflow_cloud::CloudError;
        match err {
            AzureError::CloudError(e) => e,
            AzureError::MissingEnvVar(_) | AzureError::InvalidConfig(_) => {
                CloudError::InvalidConfig(err.to_string())
            }
            AzureError::AzCliNotFound | AzureError::AuthenticationFailed(_) => {
                CloudError::AuthenticationFailed(err.to_string())
            }
            AzureError::JsonError(e) => CloudError::Json(e),
            AzureError::IoError(e) => CloudError::Io(e),
            other => CloudError::ApiError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AzureError>;
