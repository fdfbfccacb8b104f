//! AWS platform error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("EC2 {operation} failed: {message}")]
    Sdk { operation: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cloud error: {0}")]
    CloudError(#[from] ciflow_cloud::CloudError),
}

impl From<AwsError> for ciflow_cloud::CloudError {
    fn from(err: AwsError) -> Self {
        match err {
            AwsError::CloudError(e) => e,
            AwsError::InvalidConfig(msg) => ciflow_cloud::CloudError::InvalidConfig(msg),
            sdk @ AwsError::Sdk { .. } => ciflow_cloud::CloudError::ApiError(sdk.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AwsError>;
