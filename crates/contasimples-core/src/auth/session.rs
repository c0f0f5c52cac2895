use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, TokenSource};
use crate::models::{Credential, SignInCredentials, UserProfile};
use crate::store::{CredentialStore, StoreKey};

use super::events::Subscribers;
use super::{AuthError, AuthEvent, AuthEvents, AuthState};

/// Shared read access to the controller's state.
///
/// This is what the API client holds as its `TokenSource`: the bearer
/// header is derived from the state at send time, so it disappears as soon
/// as the session is signed out.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    state: Arc<RwLock<AuthState>>,
}

impl SessionHandle {
    pub fn state(&self) -> AuthState {
        self.read().clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.read().user().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_active()
    }

    fn read(&self) -> RwLockReadGuard<'_, AuthState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AuthState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokenSource for SessionHandle {
    fn bearer_token(&self) -> Option<String> {
        self.read().token().map(str::to_string)
    }
}

/// Owns the signed-in session.
///
/// State is restored from the credential store on construction, and every
/// transition writes through to the store before it becomes visible in
/// memory. Subscribers see each committed transition once, in commit order,
/// before the operation returns.
pub struct SessionController {
    store: Box<dyn CredentialStore>,
    api: ApiClient,
    handle: SessionHandle,
    subscribers: Subscribers,
}

impl SessionController {
    /// Restore the session from `store` and attach it to `api`.
    ///
    /// Missing, partial or malformed stored credentials give a signed-out
    /// controller rather than an error.
    pub fn new<S: CredentialStore + 'static>(store: S, api: &ApiClient) -> Self {
        let store: Box<dyn CredentialStore> = Box::new(store);
        let state = Self::restore(store.as_ref());
        let handle = SessionHandle {
            state: Arc::new(RwLock::new(state)),
        };
        let api = api.with_token_source(Arc::new(handle.clone()));

        Self {
            store,
            api,
            handle,
            subscribers: Subscribers::default(),
        }
    }

    fn restore(store: &dyn CredentialStore) -> AuthState {
        let token = match store.get(StoreKey::Token) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read stored token, starting signed out");
                return AuthState::Empty;
            }
        };
        let user = match store.get(StoreKey::User) {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "Failed to read stored user, starting signed out");
                return AuthState::Empty;
            }
        };

        match AuthState::from_persisted(token.as_deref(), user.as_deref()) {
            Ok(state) => {
                match state.user() {
                    Some(user) => info!(user_id = %user.id, "Session restored"),
                    None => debug!("No stored session"),
                }
                state
            }
            Err(reason) => {
                warn!(%reason, "Discarding stored credentials");
                if let Err(e) = Self::clear_persisted(store) {
                    warn!(error = %e, "Failed to remove discarded credentials");
                }
                AuthState::Empty
            }
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> AuthState {
        self.handle.state()
    }

    /// Signed-in user, `None` when signed out
    pub fn user(&self) -> Option<UserProfile> {
        self.handle.user()
    }

    pub fn token(&self) -> Option<String> {
        self.handle.bearer_token()
    }

    pub fn is_authenticated(&self) -> bool {
        self.handle.is_authenticated()
    }

    /// API client that carries this session's bearer token
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Receive every transition committed from now on
    pub fn subscribe(&self) -> AuthEvents {
        self.subscribers.subscribe()
    }

    /// Open a session with the backend and make it current.
    ///
    /// Replaces any existing session. On failure nothing changes, in memory
    /// or in the store. Overlapping calls are not deduplicated; the last one
    /// to complete wins.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserProfile, AuthError> {
        let credentials = SignInCredentials::new(email, password);
        let session = match self.api.create_session(&credentials).await {
            Ok(session) => session,
            Err(e) => {
                warn!(email = %email, error = %e, "Sign-in failed");
                return Err(AuthError::Authentication(e));
            }
        };

        self.commit_sign_in(Credential {
            token: session.token,
            user: session.user,
        })
    }

    fn commit_sign_in(&self, credential: Credential) -> Result<UserProfile, AuthError> {
        let mut state = self.handle.write();

        if let Err(e) = self.persist(&credential) {
            error!(error = %e, "Failed to persist session, restoring previous credentials");
            self.rollback(&state);
            return Err(e);
        }

        let user = credential.user.clone();
        *state = AuthState::Active(credential);
        info!(user_id = %user.id, "Signed in");
        self.subscribers.publish(AuthEvent::SignedIn(user.clone()));
        Ok(user)
    }

    /// End the session. Signing out while signed out is a no-op.
    ///
    /// Memory is cleared even if the store cannot be; the storage error is
    /// still returned.
    pub fn sign_out(&self) -> Result<(), AuthError> {
        let mut state = self.handle.write();
        let result = Self::clear_persisted(self.store.as_ref());

        if std::mem::take(&mut *state).is_active() {
            info!("Signed out");
            self.subscribers.publish(AuthEvent::SignedOut);
        }

        result.map_err(|e| {
            error!(error = %e, "Failed to remove stored credentials");
            AuthError::Storage(e)
        })
    }

    /// Replace the signed-in user's profile, keeping the token.
    ///
    /// Fails with `AuthError::NotAuthenticated` when signed out; nothing is
    /// written in that case.
    pub fn update_user(&self, user: UserProfile) -> Result<(), AuthError> {
        let mut state = self.handle.write();
        let credential = match &mut *state {
            AuthState::Active(credential) => credential,
            AuthState::Empty => {
                warn!("Profile update attempted while signed out");
                return Err(AuthError::NotAuthenticated);
            }
        };

        let json = serde_json::to_string(&user)?;
        self.store
            .set(StoreKey::User, &json)
            .map_err(AuthError::Storage)?;

        credential.user = user.clone();
        info!(user_id = %user.id, "User profile updated");
        self.subscribers.publish(AuthEvent::UserUpdated(user));
        Ok(())
    }

    /// Write token then user. The user is serialized first so a
    /// serialization failure writes nothing.
    fn persist(&self, credential: &Credential) -> Result<(), AuthError> {
        let user = serde_json::to_string(&credential.user)?;
        self.store
            .set(StoreKey::Token, &credential.token)
            .map_err(AuthError::Storage)?;
        self.store
            .set(StoreKey::User, &user)
            .map_err(AuthError::Storage)?;
        Ok(())
    }

    /// Put the store back to match `previous` after a failed write
    fn rollback(&self, previous: &AuthState) {
        let result = match previous {
            AuthState::Active(credential) => self.persist(credential),
            AuthState::Empty => Self::clear_persisted(self.store.as_ref()).map_err(AuthError::Storage),
        };
        if let Err(e) = result {
            error!(error = %e, "Failed to restore previous credentials");
        }
    }

    /// Remove user then token, attempting both even if the first fails
    fn clear_persisted(store: &dyn CredentialStore) -> anyhow::Result<()> {
        let user = store.remove(StoreKey::User);
        let token = store.remove(StoreKey::Token);
        user.and(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const NAMESPACE: &str = "ContaSimples";

    fn api() -> ApiClient {
        ApiClient::new("http://127.0.0.1:9").unwrap()
    }

    fn active_store(token: &str, user: &UserProfile) -> MemoryStore {
        let store = MemoryStore::new(NAMESPACE);
        store.set(StoreKey::Token, token).unwrap();
        store
            .set(StoreKey::User, &serde_json::to_string(user).unwrap())
            .unwrap();
        store
    }

    /// Store whose writes to one key always fail
    struct FailingStore {
        inner: MemoryStore,
        fail_on: StoreKey,
    }

    impl CredentialStore for FailingStore {
        fn get(&self, key: StoreKey) -> anyhow::Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: StoreKey, value: &str) -> anyhow::Result<()> {
            if key == self.fail_on {
                anyhow::bail!("disk full");
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: StoreKey) -> anyhow::Result<()> {
            if key == self.fail_on {
                anyhow::bail!("read-only");
            }
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_restore_active() {
        let user = UserProfile::new("1", "A", "a@x.com");
        let controller = SessionController::new(active_store("t1", &user), &api());
        assert!(controller.is_authenticated());
        assert_eq!(controller.user(), Some(user));
        assert_eq!(controller.token().as_deref(), Some("t1"));
    }

    #[test]
    fn test_restore_discards_partial_credentials() {
        let store = MemoryStore::new(NAMESPACE);
        store.set(StoreKey::User, r#"{"id":"1","name":"A","email":"a@x.com"}"#).unwrap();

        let controller = SessionController::new(store.clone(), &api());
        assert_eq!(controller.state(), AuthState::Empty);
        assert!(store.is_empty());
    }

    #[test]
    fn test_commit_sign_in_rolls_back_on_store_failure() {
        let user = UserProfile::new("1", "A", "a@x.com");
        let inner = active_store("t1", &user);
        let store = FailingStore {
            inner: inner.clone(),
            fail_on: StoreKey::User,
        };
        let controller = SessionController::new(store, &api());

        let err = controller
            .commit_sign_in(Credential {
                token: "t2".to_string(),
                user: UserProfile::new("2", "B", "b@x.com"),
            })
            .unwrap_err();

        assert!(matches!(err, AuthError::Storage(_)));
        assert_eq!(controller.token().as_deref(), Some("t1"));
        assert_eq!(inner.get(StoreKey::Token).unwrap().as_deref(), Some("t1"));
        assert_eq!(controller.user(), Some(user));
    }

    #[test]
    fn test_update_user_store_failure_keeps_memory() {
        let user = UserProfile::new("1", "A", "a@x.com");
        let store = FailingStore {
            inner: active_store("t1", &user),
            fail_on: StoreKey::User,
        };
        let controller = SessionController::new(store, &api());
        let mut events = controller.subscribe();

        let err = controller
            .update_user(UserProfile::new("1", "Renamed", "a@x.com"))
            .unwrap_err();
        assert!(matches!(err, AuthError::Storage(_)));
        assert_eq!(controller.user(), Some(user));
        assert_eq!(events.try_recv(), None);
    }

    #[test]
    fn test_sign_out_clears_memory_when_store_fails() {
        let user = UserProfile::new("1", "A", "a@x.com");
        let inner = active_store("t1", &user);
        let store = FailingStore {
            inner: inner.clone(),
            fail_on: StoreKey::User,
        };
        let controller = SessionController::new(store, &api());
        let mut events = controller.subscribe();

        assert!(matches!(controller.sign_out(), Err(AuthError::Storage(_))));
        assert_eq!(controller.state(), AuthState::Empty);
        assert_eq!(events.try_recv(), Some(AuthEvent::SignedOut));
        // Token removal is still attempted after the user removal failed
        assert_eq!(inner.get(StoreKey::Token).unwrap(), None);
    }

    #[test]
    fn test_handle_tracks_controller() {
        let user = UserProfile::new("1", "A", "a@x.com");
        let controller = SessionController::new(active_store("t1", &user), &api());
        let handle = controller.handle();

        assert_eq!(handle.bearer_token().as_deref(), Some("t1"));
        controller.sign_out().unwrap();
        assert_eq!(handle.bearer_token(), None);
        assert!(!handle.is_authenticated());
    }
}
