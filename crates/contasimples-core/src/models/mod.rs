//! Data models shared between the API client and the session controller.
//!
//! - `UserProfile`: the signed-in user as returned by the backend
//! - `Credential`: a bearer token paired with its user
//! - `SignInCredentials`, `NewUser`: request bodies

pub mod user;

pub use user::{Credential, NewUser, SignInCredentials, UserProfile};
