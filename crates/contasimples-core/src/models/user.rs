use serde::{Deserialize, Serialize};

/// A user as returned by the backend. The backend is the source of truth;
/// the client only caches the last copy it saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }

    /// Copy with `name` and/or `email` replaced. Blank values are ignored.
    pub fn with_changes(&self, name: Option<String>, email: Option<String>) -> Self {
        let keep_or = |current: &str, new: Option<String>| match new {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => current.to_string(),
        };
        Self {
            id: self.id.clone(),
            name: keep_or(&self.name, name),
            email: keep_or(&self.email, email),
        }
    }

    /// Name and email in the usual `Name <email>` form
    pub fn display(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

/// An issued bearer token together with the user it belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub user: UserProfile,
}

// Token stays out of debug output and logs
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

/// Body of `POST /sessions`.
#[derive(Clone, Serialize)]
pub struct SignInCredentials {
    pub email: String,
    pub password: String,
}

impl SignInCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

// Keep the password out of debug output and logs
impl std::fmt::Debug for SignInCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignInCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body of `POST /users`.
#[derive(Clone, Serialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}
