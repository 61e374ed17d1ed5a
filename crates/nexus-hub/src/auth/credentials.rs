//! Credential store
//!
//! Owns the single admin principal: first-run setup (loopback or ticket
//! gated), login, password change, and bearer verification. All password
//! comparisons go through the constant-time PBKDF2 verify.

use thiserror::Error;

use nexus_core::error::AuthError;
use nexus_core::secure::constant_time_eq;
use nexus_core::time::current_time_millis;

use crate::auth::password::{hash_password, verify_password, PasswordRecord};
use crate::auth::token::{Claims, TokenSigner};
use crate::store::{AuthRecord, AuthRepository};

/// Minimum accepted password length
pub const MIN_PASSWORD_LEN: usize = 8;

/// Principal name for the single admin identity
pub const ADMIN_PRINCIPAL: &str = "admin";

/// Failures from credential operations
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Domain-level authentication failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The backing store failed
    #[error("Credential store failure: {0}")]
    Store(#[from] anyhow::Error),
}

/// The credential store
#[derive(Clone)]
pub struct CredentialStore {
    repo: AuthRepository,
    signer: TokenSigner,
    setup_token: Option<String>,
}

impl CredentialStore {
    /// Create a credential store
    pub fn new(repo: AuthRepository, signer: TokenSigner, setup_token: Option<String>) -> Self {
        Self {
            repo,
            signer,
            setup_token,
        }
    }

    /// Whether first-run setup is still required
    pub async fn needs_setup(&self) -> Result<bool, CredentialError> {
        Ok(self.repo.get().await?.is_none())
    }

    /// Bootstrap the principal from a configured admin password.
    ///
    /// No-op when a credential already exists, so a stale ADMIN_PASSWORD in
    /// the environment cannot overwrite a rotated one.
    pub async fn bootstrap(&self, password: &str) -> Result<bool, CredentialError> {
        if !self.needs_setup().await? {
            return Ok(false);
        }
        check_strength(password)?;
        self.store_password(password).await?;
        Ok(true)
    }

    /// First-run setup.
    ///
    /// Accepted only from a loopback peer, or with a setup ticket matching
    /// the configured one exactly (constant-time). Returns a bearer token
    /// for the new principal.
    pub async fn setup(
        &self,
        password: &str,
        ticket: Option<&str>,
        loopback: bool,
    ) -> Result<String, CredentialError> {
        if !self.needs_setup().await? {
            return Err(AuthError::AlreadyConfigured.into());
        }
        if !loopback && !self.ticket_matches(ticket) {
            return Err(AuthError::SetupForbidden.into());
        }
        check_strength(password)?;

        self.store_password(password).await?;
        Ok(self.signer.issue(ADMIN_PRINCIPAL, true)?)
    }

    /// Log in with the admin password, returning a bearer token
    pub async fn login(&self, password: &str) -> Result<String, CredentialError> {
        let record = self
            .repo
            .get()
            .await?
            .ok_or(AuthError::NotConfigured)?;

        if !verify_password(password, &decode_record(&record)?) {
            return Err(AuthError::InvalidCredentials.into());
        }
        Ok(self.signer.issue(ADMIN_PRINCIPAL, true)?)
    }

    /// Change the admin password
    pub async fn change(&self, current: &str, new: &str) -> Result<(), CredentialError> {
        let record = self
            .repo
            .get()
            .await?
            .ok_or(AuthError::NotConfigured)?;

        if !verify_password(current, &decode_record(&record)?) {
            return Err(AuthError::InvalidCredentials.into());
        }
        check_strength(new)?;
        self.store_password(new).await?;
        Ok(())
    }

    /// Verify a bearer token and return its claims
    pub fn verify_bearer(&self, token: &str) -> Result<Claims, AuthError> {
        self.signer.verify(token)
    }

    fn ticket_matches(&self, presented: Option<&str>) -> bool {
        match (&self.setup_token, presented) {
            (Some(expected), Some(presented)) => {
                constant_time_eq(expected.as_bytes(), presented.as_bytes())
            }
            _ => false,
        }
    }

    async fn store_password(&self, password: &str) -> Result<(), CredentialError> {
        let derived = hash_password(password);
        self.repo
            .upsert(&AuthRecord {
                hash: hex::encode(&derived.hash),
                salt: hex::encode(&derived.salt),
                iterations: derived.iterations,
                updated_at: current_time_millis(),
            })
            .await?;
        Ok(())
    }
}

fn check_strength(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }
    Ok(())
}

fn decode_record(record: &AuthRecord) -> Result<PasswordRecord, AuthError> {
    let hash = hex::decode(&record.hash).map_err(|_| AuthError::InvalidCredentials)?;
    let salt = hex::decode(&record.salt).map_err(|_| AuthError::InvalidCredentials)?;
    Ok(PasswordRecord {
        hash,
        salt,
        iterations: record.iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    async fn store_with(setup_token: Option<&str>) -> CredentialStore {
        let db = Database::in_memory().await.unwrap();
        CredentialStore::new(
            AuthRepository::new(db.pool().clone()),
            TokenSigner::new("test-secret"),
            setup_token.map(str::to_string),
        )
    }

    fn is_auth_err(result: &CredentialError, expected: &AuthError) -> bool {
        matches!(result, CredentialError::Auth(e) if e == expected)
    }

    #[tokio::test]
    async fn test_first_run_setup_and_login() {
        let store = store_with(None).await;
        assert!(store.needs_setup().await.unwrap());

        let token = store
            .setup("hunter2hunter", None, true)
            .await
            .unwrap();
        assert!(!store.needs_setup().await.unwrap());

        let claims = store.verify_bearer(&token).unwrap();
        assert_eq!(claims.sub, ADMIN_PRINCIPAL);
        assert!(claims.admin);

        let relogin = store.login("hunter2hunter").await.unwrap();
        assert!(store.verify_bearer(&relogin).is_ok());
    }

    #[tokio::test]
    async fn test_setup_twice_rejected() {
        let store = store_with(None).await;
        store.setup("hunter2hunter", None, true).await.unwrap();

        let err = store
            .setup("anotherpassword", None, true)
            .await
            .unwrap_err();
        assert!(is_auth_err(&err, &AuthError::AlreadyConfigured));
    }

    #[tokio::test]
    async fn test_setup_from_remote_requires_ticket() {
        let store = store_with(Some("golden-ticket")).await;

        let err = store
            .setup("hunter2hunter", None, false)
            .await
            .unwrap_err();
        assert!(is_auth_err(&err, &AuthError::SetupForbidden));

        let err = store
            .setup("hunter2hunter", Some("wrong"), false)
            .await
            .unwrap_err();
        assert!(is_auth_err(&err, &AuthError::SetupForbidden));

        store
            .setup("hunter2hunter", Some("golden-ticket"), false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_setup_remote_without_configured_ticket() {
        let store = store_with(None).await;
        let err = store
            .setup("hunter2hunter", Some("anything"), false)
            .await
            .unwrap_err();
        assert!(is_auth_err(&err, &AuthError::SetupForbidden));
    }

    #[tokio::test]
    async fn test_weak_password_rejected() {
        let store = store_with(None).await;
        let err = store.setup("short", None, true).await.unwrap_err();
        assert!(is_auth_err(&err, &AuthError::WeakPassword));
    }

    #[tokio::test]
    async fn test_login_before_setup() {
        let store = store_with(None).await;
        let err = store.login("whatever1").await.unwrap_err();
        assert!(is_auth_err(&err, &AuthError::NotConfigured));
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let store = store_with(None).await;
        store.setup("hunter2hunter", None, true).await.unwrap();

        let err = store.login("hunter2wrong!").await.unwrap_err();
        assert!(is_auth_err(&err, &AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_change_password() {
        let store = store_with(None).await;
        store.setup("hunter2hunter", None, true).await.unwrap();

        store
            .change("hunter2hunter", "new-password-1")
            .await
            .unwrap();

        assert!(store.login("hunter2hunter").await.is_err());
        store.login("new-password-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_change_requires_current() {
        let store = store_with(None).await;
        store.setup("hunter2hunter", None, true).await.unwrap();

        let err = store
            .change("not-the-password", "new-password-1")
            .await
            .unwrap_err();
        assert!(is_auth_err(&err, &AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_bootstrap_only_when_unconfigured() {
        let store = store_with(None).await;
        assert!(store.bootstrap("bootpassword").await.unwrap());
        assert!(!store.bootstrap("otherpassword").await.unwrap());

        store.login("bootpassword").await.unwrap();
    }
}
