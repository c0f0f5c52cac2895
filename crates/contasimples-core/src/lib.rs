//! Core library for the ContaSimples client.
//!
//! - `auth`: the session controller and its state machine
//! - `store`: device-local credential persistence
//! - `api`: HTTP client for the backend, with bearer token injection
//! - `config`: client configuration
//! - `models`: user and request types

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod store;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthError, AuthEvent, AuthEvents, AuthState, SessionController};
pub use config::{Config, StorageBackend};
pub use models::{Credential, UserProfile};
pub use store::{open_store, CredentialStore, StoreKey};
