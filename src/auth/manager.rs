use chrono::Duration;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::proxy::AuthenticationProxy;
use super::types::AuthToken;
use crate::error::AuthenticationError;

/// Default token refresh threshold in seconds
pub const DEFAULT_REFRESH_THRESHOLD: i64 = 60;

type TokenResult = Result<AuthToken, AuthenticationError>;
type TokenFlight = Shared<BoxFuture<'static, TokenResult>>;

/// Cached tokens and authentication calls still running, keyed by account
#[derive(Default)]
struct TokenState {
    tokens: HashMap<String, AuthToken>,
    in_flight: HashMap<String, (u64, TokenFlight)>,
    next_flight_id: u64,
}

impl TokenState {
    /// Drop the in-flight entry only if it still belongs to flight `id`
    fn finish_flight(&mut self, account: &str, id: u64) {
        if matches!(self.in_flight.get(account), Some((current, _)) if *current == id) {
            self.in_flight.remove(account);
        }
    }
}

fn lock_state(state: &Mutex<TokenState>) -> MutexGuard<'_, TokenState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Clears the in-flight entry if the authentication task dies early
struct FlightGuard {
    state: Arc<Mutex<TokenState>>,
    account: String,
    id: u64,
    completed: bool,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.completed {
            lock_state(&self.state).finish_flight(&self.account, self.id);
        }
    }
}

/// Access token manager
///
/// Caches one token per account and guarantees that concurrent callers for
/// the same account share a single authentication call.
pub struct AccessTokenManager {
    /// Performs the login call
    authentication_proxy: Arc<dyn AuthenticationProxy>,

    /// Token cache and in-flight registry, always updated together
    state: Arc<Mutex<TokenState>>,

    /// Tokens expiring within this window are refreshed before use
    refresh_threshold: Duration,
}

impl AccessTokenManager {
    pub fn new(authentication_proxy: Arc<dyn AuthenticationProxy>) -> Self {
        Self::with_refresh_threshold(authentication_proxy, DEFAULT_REFRESH_THRESHOLD as u64)
    }

    /// Create a manager with a custom refresh threshold in seconds
    pub fn with_refresh_threshold(
        authentication_proxy: Arc<dyn AuthenticationProxy>,
        refresh_threshold: u64,
    ) -> Self {
        Self {
            authentication_proxy,
            state: Arc::new(Mutex::new(TokenState::default())),
            refresh_threshold: Duration::seconds(refresh_threshold as i64),
        }
    }

    /// Get a valid access token, authenticating if necessary
    ///
    /// All callers racing on the same account observe the result of exactly
    /// one authentication call.
    pub async fn get_token(&self, account_number: &str) -> Result<AuthToken, AuthenticationError> {
        let flight = {
            let mut state = lock_state(&self.state);

            if let Some(token) = state.tokens.get(account_number) {
                if !token.expires_within(self.refresh_threshold) {
                    return Ok(token.clone());
                }
                tracing::debug!("Access token expiring soon, refreshing");
                state.tokens.remove(account_number);
            }

            let pending = state
                .in_flight
                .get(account_number)
                .map(|(_, flight)| flight.clone());

            match pending {
                Some(flight) => {
                    tracing::debug!("Joining in-flight authentication");
                    flight
                }
                None => self.start_flight(&mut state, account_number),
            }
        };

        flight.await
    }

    /// Replace a token the API refused
    ///
    /// The cached token is only dropped if it is still `stale`, so callers
    /// holding an older rejected token join the refresh instead of
    /// discarding a newer one.
    pub async fn refresh_token(
        &self,
        account_number: &str,
        stale: &AuthToken,
    ) -> Result<AuthToken, AuthenticationError> {
        {
            let mut state = lock_state(&self.state);
            let is_stale = state
                .tokens
                .get(account_number)
                .map(|cached| cached.value == stale.value)
                .unwrap_or(false);

            if is_stale {
                tracing::debug!("Invalidating rejected access token");
                state.tokens.remove(account_number);
            }
        }

        self.get_token(account_number).await
    }

    /// Forget the cached token for an account
    pub fn invalidate(&self, account_number: &str) {
        lock_state(&self.state).tokens.remove(account_number);
    }

    /// Cached token, if any, without triggering authentication
    pub fn cached_token(&self, account_number: &str) -> Option<AuthToken> {
        lock_state(&self.state).tokens.get(account_number).cloned()
    }

    /// Seed the cache with a known token
    #[cfg(any(test, feature = "test-utils"))]
    pub fn insert_token(&self, token: AuthToken) {
        lock_state(&self.state)
            .tokens
            .insert(token.account_number.clone(), token);
    }

    /// Spawn the authentication call and register it; caller holds the lock
    ///
    /// The task writes the cache and removes its registry entry in one
    /// critical section before publishing its result.
    fn start_flight(&self, state: &mut TokenState, account_number: &str) -> TokenFlight {
        let id = state.next_flight_id;
        state.next_flight_id += 1;

        let proxy = Arc::clone(&self.authentication_proxy);
        let mut guard = FlightGuard {
            state: Arc::clone(&self.state),
            account: account_number.to_string(),
            id,
            completed: false,
        };

        let task = tokio::spawn(async move {
            let result = proxy.authenticate(&guard.account).await;

            {
                let mut state = lock_state(&guard.state);
                state.finish_flight(&guard.account, guard.id);
                match &result {
                    Ok(token) => {
                        state.tokens.insert(guard.account.clone(), token.clone());
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Authentication failed");
                        state.tokens.remove(&guard.account);
                    }
                }
            }
            guard.completed = true;

            result
        });

        let flight = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "Authentication task failed");
                    Err(AuthenticationError::Aborted)
                }
            }
        }
        .boxed()
        .shared();

        state
            .in_flight
            .insert(account_number.to_string(), (id, flight.clone()));
        flight
    }
}
