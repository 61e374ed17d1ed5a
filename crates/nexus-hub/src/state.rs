//! Global hub state
//!
//! All registries, the session catalogue, the credential store, and the
//! audit log live here as fields of one `HubState` passed around by `Arc`.

use std::sync::Arc;

use rand::RngCore;
use tokio_util::sync::CancellationToken;

use nexus_core::config::HubConfig;
use nexus_core::error::FatalError;
use nexus_core::secure::constant_time_eq;

use crate::auth::{CredentialStore, TokenSigner};
use crate::reconciler::Reconciler;
use crate::registry::{AgentRegistry, ClientRegistry, Rooms};
use crate::sessions::SessionService;
use crate::store::{AuthRepository, Database, SessionRepository};
use crate::store::audit::AuditLog;

/// Global state for the hub daemon
pub struct HubState {
    /// Configuration
    pub config: HubConfig,
    /// Admin credential store (C1)
    pub credentials: CredentialStore,
    /// Session catalogue and tails (C2)
    pub sessions: SessionService,
    /// Connected agent catalogue (C3)
    pub agents: AgentRegistry,
    /// Connected client set
    pub clients: ClientRegistry,
    /// Per-session viewer rooms
    pub rooms: Rooms,
    /// Viewport reconciler (C7)
    pub reconciler: Arc<Reconciler>,
    /// Append-only audit log
    pub audit: AuditLog,
    /// Hub-wide shutdown token; per-connection tokens are children of it
    /// so a graceful shutdown closes every link
    pub shutdown: CancellationToken,
}

impl HubState {
    /// Create hub state over an opened database.
    ///
    /// Outside development a missing `NEXUS_JWT_SECRET` is a fatal boot
    /// error; in development a per-process secret is generated, which
    /// invalidates outstanding tokens on every restart.
    pub fn new(config: HubConfig, db: Database) -> Result<Self, FatalError> {
        let secret = match &config.jwt_secret {
            Some(secret) => secret.clone(),
            None if config.production => return Err(FatalError::MissingSecret),
            None => {
                tracing::warn!(
                    "NEXUS_JWT_SECRET is not set; using an ephemeral development secret"
                );
                generate_secret()
            }
        };
        let signer = TokenSigner::new(&secret);

        let credentials = CredentialStore::new(
            AuthRepository::new(db.pool().clone()),
            signer,
            config.setup_token.clone(),
        );
        let sessions = SessionService::new(SessionRepository::new(db.pool().clone()));
        let audit = AuditLog::new(db.pool().clone());

        Ok(Self {
            config,
            credentials,
            sessions,
            agents: AgentRegistry::new(),
            clients: ClientRegistry::new(),
            rooms: Rooms::new(),
            reconciler: Arc::new(Reconciler::new()),
            audit,
            shutdown: CancellationToken::new(),
        })
    }

    /// Check a presented agent credential against the configured one.
    ///
    /// With no credential configured, agents are accepted only when the
    /// insecure-workers policy is explicitly enabled.
    pub fn agent_credential_ok(&self, presented: &str) -> bool {
        match &self.config.worker_token {
            Some(expected) => constant_time_eq(expected.as_bytes(), presented.as_bytes()),
            None => self.config.allow_unauthenticated_workers,
        }
    }
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
