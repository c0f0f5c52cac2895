use thiserror::Error;

use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum AuthError {
    /// The session endpoint rejected the credentials or could not be reached
    #[error("Authentication failed: {0}")]
    Authentication(#[from] ApiError),

    /// A signed-in session is required for this operation
    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Credential storage failed: {0:#}")]
    Storage(anyhow::Error),

    #[error("Failed to serialize user profile: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuthError {
    /// True when the backend said the email/password pair is wrong
    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, AuthError::Authentication(ApiError::InvalidCredentials))
    }
}
