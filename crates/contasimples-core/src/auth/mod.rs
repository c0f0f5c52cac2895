//! Authentication module for managing the signed-in session.
//!
//! This module provides:
//! - `SessionController`: sign-in, sign-out and profile updates, with the
//!   current token and user persisted through a `CredentialStore`
//! - `AuthState`: the controller's in-memory state
//! - `AuthEvents`: a subscription to committed state transitions
//!
//! The controller is the only writer of the persisted `token`/`user` keys
//! and the only source of the bearer token attached to API requests.

pub mod error;
pub mod events;
pub mod session;
pub mod state;

pub use error::AuthError;
pub use events::{AuthEvent, AuthEvents};
pub use session::{SessionController, SessionHandle};
pub use state::AuthState;
