//! API client for the ContaSimples REST API.
//!
//! `ApiClient` opens sessions and makes authenticated JSON requests. The
//! bearer token is not stored on the client; a `TokenSource` is asked for
//! it every time a request goes out, so a sign-out takes effect on the
//! very next request.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{NewUser, SignInCredentials, UserProfile};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Supplies the bearer token at send time.
pub trait TokenSource: Send + Sync {
    /// Current token, or `None` when no one is signed in
    fn bearer_token(&self) -> Option<String>;
}

/// Body returned by `POST /sessions`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: UserProfile,
}

/// API client for the ContaSimples backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    tokens: Option<Arc<dyn TokenSource>>,
    initial_backoff: Duration,
}

impl ApiClient {
    /// Create a new API client rooted at `base_url`
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens: None,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Create a client that authenticates through `source`, sharing the connection pool.
    pub fn with_token_source(&self, source: Arc<dyn TokenSource>) -> Self {
        Self {
            client: self.client.clone(), // Cheap clone, shares connection pool
            base_url: self.base_url.clone(),
            tokens: Some(source),
            initial_backoff: self.initial_backoff,
        }
    }

    /// Override the first rate-limit backoff delay (doubles on each retry)
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Exchange email and password for a token and user profile.
    ///
    /// Not retried: a rejected or failed attempt is reported as is.
    pub async fn create_session(
        &self,
        credentials: &SignInCredentials,
    ) -> Result<SessionResponse, ApiError> {
        let url = self.url("sessions");
        debug!(email = %credentials.email, "Creating session");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(credentials)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let session: SessionResponse = Self::parse_json(response, &url).await?;

        if session.token.trim().is_empty() {
            return Err(ApiError::InvalidResponse(
                "Session response did not contain a token".to_string(),
            ));
        }
        Ok(session)
    }

    /// Create an account through `POST /users`
    pub async fn register_user(&self, new_user: &NewUser) -> Result<UserProfile, ApiError> {
        debug!(email = %new_user.email, "Registering user");
        self.post("users", new_user).await
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(token) = self.tokens.as_ref().and_then(|t| t.bearer_token()) {
            let mut value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(
        response: reqwest::Response,
        url: &str,
    ) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    async fn send<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            // Headers are rebuilt per attempt so the token is read at send time
            let mut request = self
                .client
                .request(method.clone(), &url)
                .headers(self.auth_headers()?);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Self::parse_json(response, &url).await,
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(
                        url = %url,
                        retry = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2; // Exponential backoff
                }
            }
        }
    }

    /// Authenticated GET, decoding the JSON body
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send::<T, ()>(Method::GET, path, None).await
    }

    /// Authenticated POST with a JSON body
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::POST, path, Some(body)).await
    }

    /// Authenticated PUT with a JSON body
    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::PUT, path, Some(body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    struct FixedToken(Option<&'static str>);

    impl TokenSource for FixedToken {
        fn bearer_token(&self) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    #[test]
    fn test_url_joining() {
        let client = ApiClient::new("http://localhost:3333/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:3333");
        assert_eq!(client.url("sessions"), "http://localhost:3333/sessions");
        assert_eq!(client.url("/users"), "http://localhost:3333/users");
    }

    #[test]
    fn test_auth_headers() {
        let client = ApiClient::new("http://localhost").unwrap();
        assert!(client.auth_headers().unwrap().get(header::AUTHORIZATION).is_none());

        let signed_in = client.with_token_source(Arc::new(FixedToken(Some("t1"))));
        let headers = signed_in.auth_headers().unwrap();
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer t1");

        let signed_out = client.with_token_source(Arc::new(FixedToken(None)));
        assert!(signed_out.auth_headers().unwrap().get(header::AUTHORIZATION).is_none());

        let broken = client.with_token_source(Arc::new(FixedToken(Some("bad\ntoken"))));
        assert!(matches!(broken.auth_headers(), Err(ApiError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_create_session() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/sessions")
            .match_body(Matcher::Json(serde_json::json!({
                "email": "a@x.com",
                "password": "secret"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token":"t1","user":{"id":"1","name":"A","email":"a@x.com"}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let session = client
            .create_session(&SignInCredentials::new("a@x.com", "secret"))
            .await
            .expect("session created");

        mock.assert_async().await;
        assert_eq!(session.token, "t1");
        assert_eq!(session.user, UserProfile::new("1", "A", "a@x.com"));
    }

    #[tokio::test]
    async fn test_create_session_rejected() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/sessions")
            .with_status(401)
            .with_body(r#"{"status":"error","message":"Incorrect email/password combination."}"#)
            .expect(1)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client
            .create_session(&SignInCredentials::new("a@x.com", "wrong"))
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, ApiError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_create_session_empty_token() {
        let mut server = Server::new_async().await;
        let _session = server
            .mock("POST", "/sessions")
            .with_status(200)
            .with_body(r#"{"token":"","user":{"id":"1","name":"A","email":"a@x.com"}}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client
            .create_session(&SignInCredentials::new("a@x.com", "secret"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_get_retries_rate_limit() {
        let mut server = Server::new_async().await;
        let limited = server
            .mock("GET", "/profile")
            .with_status(429)
            .expect(MAX_RATE_LIMIT_RETRIES as usize + 1)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url())
            .unwrap()
            .with_initial_backoff(Duration::from_millis(1));
        let err = client.get::<UserProfile>("profile").await.unwrap_err();

        limited.assert_async().await;
        assert!(matches!(err, ApiError::RateLimited));
    }

    #[tokio::test]
    async fn test_register_user() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/users")
            .match_header("authorization", Matcher::Missing)
            .match_body(Matcher::Json(serde_json::json!({
                "name": "Maria",
                "email": "maria@example.com",
                "password": "secret"
            })))
            .with_status(200)
            .with_body(r#"{"id":"9","name":"Maria","email":"maria@example.com"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let user = client
            .register_user(&NewUser {
                name: "Maria".to_string(),
                email: "maria@example.com".to_string(),
                password: "secret".to_string(),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(user.id, "9");
    }
}
