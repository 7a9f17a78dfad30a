//! Shared authentication state
//!
//! An [`AuthSession`] owns the current [`Credential`] and the count of completed
//! pipeline attempts. Both sit behind one [`RwLock`]: workers take the read lock to
//! clone the credential for a request, and [`AuthSession::record_completion`] takes
//! the write lock for the whole increment / compare / refresh sequence. Two workers
//! finishing at the same time therefore cannot both see the threshold, and nobody
//! reads a credential while it is being replaced.

use crate::client::AnonymizationApi;
use crate::error::{Error, Result};
use crate::types::Credential;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

struct SessionState {
    credential: Credential,
    completed: u64,
}

/// Credential holder with periodic re-authentication
pub struct AuthSession {
    api: Arc<dyn AnonymizationApi>,
    username: String,
    password: String,
    reauth_every: u64,
    state: RwLock<SessionState>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("username", &self.username)
            .field("reauth_every", &self.reauth_every)
            .finish_non_exhaustive()
    }
}

impl AuthSession {
    /// Sign in and create the session
    ///
    /// `reauth_every` is clamped to at least 1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`](crate::Error::Auth) when the service rejects the
    /// credentials. The caller must treat this as fatal.
    pub async fn authenticate(
        api: Arc<dyn AnonymizationApi>,
        username: impl Into<String>,
        password: impl Into<String>,
        reauth_every: u64,
    ) -> Result<Self> {
        let username = username.into();
        let password = password.into();

        let credential = api.sign_in(&username, &password).await.inspect_err(|e| {
            tracing::error!(error = %e, "Login failed");
        })?;
        tracing::info!(username = %username, "Successfully authenticated and token received");

        Ok(Self {
            api,
            username,
            password,
            reauth_every: reauth_every.max(1),
            state: RwLock::new(SessionState {
                credential,
                completed: 0,
            }),
        })
    }

    /// Snapshot of the current credential
    ///
    /// Waits while a refresh is in progress, so a caller never sees a credential
    /// that is about to be replaced on the threshold it just crossed.
    pub async fn credential(&self) -> Credential {
        self.state.read().await.credential.clone()
    }

    /// Number of completed pipeline attempts so far
    pub async fn completed(&self) -> u64 {
        self.state.read().await.completed
    }

    /// Sign in again and replace the credential
    ///
    /// # Errors
    ///
    /// [`Error::Auth`](crate::Error::Auth) when the sign-in fails, or
    /// [`Error::Cancelled`](crate::Error::Cancelled) when `cancel` fires first.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<()> {
        let mut state = self.state.write().await;
        state.credential = self.sign_in_again(cancel).await?;
        Ok(())
    }

    /// Count one completed pipeline attempt, successful or not
    ///
    /// The credential is refreshed before this returns when the new count is a
    /// multiple of the cadence, or when the validity reported at sign-in has run
    /// out. Returns `true` if a refresh happened.
    ///
    /// # Errors
    ///
    /// A failed refresh is returned as [`Error::Auth`](crate::Error::Auth) and a
    /// refresh interrupted by `cancel` as [`Error::Cancelled`](crate::Error::Cancelled).
    /// The count is kept either way so the next threshold is unaffected.
    pub async fn record_completion(&self, cancel: &CancellationToken) -> Result<bool> {
        let mut state = self.state.write().await;
        state.completed += 1;
        let on_cadence = state.completed % self.reauth_every == 0;
        let expired = state.credential.is_expired_at(Utc::now());
        if !on_cadence && !expired {
            return Ok(false);
        }

        if on_cadence {
            tracing::info!(
                completed = state.completed,
                "Re-authenticating after {} completed items",
                self.reauth_every
            );
        } else {
            tracing::info!(completed = state.completed, "Credential expired, re-authenticating");
        }
        state.credential = self.sign_in_again(cancel).await?;
        Ok(true)
    }

    /// Runs under the write lock; gives up as soon as `cancel` fires
    async fn sign_in_again(&self, cancel: &CancellationToken) -> Result<Credential> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Re-authentication interrupted, run cancelled");
                return Err(Error::Cancelled);
            }
            result = self.api.sign_in(&self.username, &self.password) => result,
        };
        let credential =
            result.inspect_err(|e| tracing::error!(error = %e, "Re-authentication failed"))?;
        tracing::info!("Credential refreshed");
        Ok(credential)
    }
}
