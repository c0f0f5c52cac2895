use thiserror::Error;

use crate::models::{Credential, UserProfile};

/// The session controller's working memory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    /// No token and no user
    #[default]
    Empty,
    Active(Credential),
}

impl AuthState {
    pub fn is_active(&self) -> bool {
        matches!(self, AuthState::Active(_))
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            AuthState::Active(credential) => Some(credential.token.as_str()),
            AuthState::Empty => None,
        }
    }

    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            AuthState::Active(credential) => Some(&credential.user),
            AuthState::Empty => None,
        }
    }

    /// Build state from raw persisted values. Anything short of a non-empty
    /// token plus a parseable user is `Empty`.
    pub fn from_persisted(token: Option<&str>, user: Option<&str>) -> Result<Self, CorruptCredential> {
        match (token, user) {
            (None, None) => Ok(AuthState::Empty),
            (Some(token), Some(user)) => {
                if token.trim().is_empty() {
                    return Err(CorruptCredential::EmptyToken);
                }
                let user = serde_json::from_str(user).map_err(CorruptCredential::MalformedUser)?;
                Ok(AuthState::Active(Credential {
                    token: token.to_string(),
                    user,
                }))
            }
            (Some(_), None) => Err(CorruptCredential::MissingUser),
            (None, Some(_)) => Err(CorruptCredential::MissingToken),
        }
    }
}

/// Why persisted credentials could not be restored. Never surfaced to
/// callers; restoring falls back to `AuthState::Empty`.
#[derive(Error, Debug)]
pub enum CorruptCredential {
    #[error("token present without user")]
    MissingUser,

    #[error("user present without token")]
    MissingToken,

    #[error("stored token is empty")]
    EmptyToken,

    #[error("stored user is malformed: {0}")]
    MalformedUser(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER_JSON: &str = r#"{"id":"1","name":"A","email":"a@x.com"}"#;

    #[test]
    fn test_from_persisted_active() {
        let state = AuthState::from_persisted(Some("t1"), Some(USER_JSON)).unwrap();
        assert!(state.is_active());
        assert_eq!(state.token(), Some("t1"));
        assert_eq!(state.user(), Some(&UserProfile::new("1", "A", "a@x.com")));
    }

    #[test]
    fn test_from_persisted_nothing_stored() {
        let state = AuthState::from_persisted(None, None).unwrap();
        assert_eq!(state, AuthState::Empty);
        assert_eq!(state.token(), None);
        assert_eq!(state.user(), None);
    }

    #[test]
    fn test_from_persisted_partial_or_corrupt() {
        assert!(matches!(
            AuthState::from_persisted(Some("t1"), None),
            Err(CorruptCredential::MissingUser)
        ));
        assert!(matches!(
            AuthState::from_persisted(None, Some(USER_JSON)),
            Err(CorruptCredential::MissingToken)
        ));
        assert!(matches!(
            AuthState::from_persisted(Some(""), Some(USER_JSON)),
            Err(CorruptCredential::EmptyToken)
        ));
        assert!(matches!(
            AuthState::from_persisted(Some("t1"), Some("{not json")),
            Err(CorruptCredential::MalformedUser(_))
        ));
        assert!(matches!(
            AuthState::from_persisted(Some("t1"), Some(r#"{"id":"1"}"#)),
            Err(CorruptCredential::MalformedUser(_))
        ));
    }

    #[test]
    fn test_corrupt_credential_is_an_error_with_source() {
        use std::error::Error as _;

        let err = AuthState::from_persisted(Some("t1"), Some("{not json")).unwrap_err();
        assert!(err.to_string().starts_with("stored user is malformed: "));
        assert!(err.source().is_some());

        let err = AuthState::from_persisted(Some("t1"), None).unwrap_err();
        assert_eq!(err.to_string(), "token present without user");
        assert!(err.source().is_none());
    }

    #[test]
    fn test_debug_output_hides_token() {
        let state = AuthState::from_persisted(Some("secret-token"), Some(USER_JSON)).unwrap();
        let debug = format!("{:?}", state);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("a@x.com"));
    }
}
