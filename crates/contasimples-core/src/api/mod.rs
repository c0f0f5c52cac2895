//! REST API client module for the ContaSimples backend.
//!
//! This module provides the `ApiClient` used to open sessions and make
//! authenticated calls. Authentication is a bearer token obtained from
//! `POST /sessions`; the client asks a `TokenSource` for the current
//! token each time it sends a request.

pub mod client;
pub mod error;

pub use client::{ApiClient, SessionResponse, TokenSource};
pub use error::ApiError;
