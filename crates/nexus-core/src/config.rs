//! Environment-driven configuration
//!
//! All recognised options are environment variables; the binaries layer
//! clap flag overrides on top. Parsing goes through a lookup closure so
//! tests can feed synthetic environments without touching process state.

use std::path::PathBuf;
use std::time::Duration;

/// Allowed browser origins for the HTTP surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOrigin {
    /// Allow any origin
    Any,
    /// Allow the listed origins only
    List(Vec<String>),
}

impl ClientOrigin {
    fn parse(raw: &str) -> Self {
        if raw.trim() == "*" {
            ClientOrigin::Any
        } else {
            ClientOrigin::List(
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            )
        }
    }
}

impl Default for ClientOrigin {
    fn default() -> Self {
        ClientOrigin::Any
    }
}

/// Configuration for the hub daemon
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Listen port (PORT)
    pub port: u16,

    /// Allowed browser origins (CLIENT_ORIGIN, CSV or `*`)
    pub client_origin: ClientOrigin,

    /// Bearer token signing secret (NEXUS_JWT_SECRET)
    pub jwt_secret: Option<String>,

    /// First-boot admin password bootstrap (ADMIN_PASSWORD)
    pub admin_password: Option<String>,

    /// Pre-shared setup ticket for non-loopback setup (NEXUS_SETUP_TOKEN)
    pub setup_token: Option<String>,

    /// Shared agent credential (WORKER_TOKEN)
    pub worker_token: Option<String>,

    /// Accept agents without a credential (ALLOW_UNAUTHENTICATED_WORKERS)
    pub allow_unauthenticated_workers: bool,

    /// Agent liveness timeout (WORKER_HEALTH_TIMEOUT_MS)
    pub worker_health_timeout: Duration,

    /// Expected agent heartbeat cadence (WORKER_HEARTBEAT_MS)
    pub worker_heartbeat: Duration,

    /// Path of the embedded store (NEXUS_DB_PATH)
    pub database_path: PathBuf,

    /// Optional directory of static client assets (NEXUS_STATIC_DIR)
    pub static_dir: Option<PathBuf>,

    /// Whether this process runs in production mode (NEXUS_ENV)
    pub production: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: 3002,
            client_origin: ClientOrigin::Any,
            jwt_secret: None,
            admin_password: None,
            setup_token: None,
            worker_token: None,
            allow_unauthenticated_workers: false,
            worker_health_timeout: Duration::from_millis(15_000),
            worker_heartbeat: Duration::from_millis(5_000),
            database_path: PathBuf::from("nexus.db"),
            static_dir: None,
            production: true,
        }
    }
}

impl HubConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parse_or(&lookup, "PORT", defaults.port),
            client_origin: lookup("CLIENT_ORIGIN")
                .map(|v| ClientOrigin::parse(&v))
                .unwrap_or(defaults.client_origin),
            jwt_secret: non_empty(lookup("NEXUS_JWT_SECRET")),
            admin_password: non_empty(lookup("ADMIN_PASSWORD")),
            setup_token: non_empty(lookup("NEXUS_SETUP_TOKEN")),
            worker_token: non_empty(lookup("WORKER_TOKEN")),
            allow_unauthenticated_workers: parse_bool(
                &lookup,
                "ALLOW_UNAUTHENTICATED_WORKERS",
                defaults.allow_unauthenticated_workers,
            ),
            worker_health_timeout: Duration::from_millis(parse_or(
                &lookup,
                "WORKER_HEALTH_TIMEOUT_MS",
                defaults.worker_health_timeout.as_millis() as u64,
            )),
            worker_heartbeat: Duration::from_millis(parse_or(
                &lookup,
                "WORKER_HEARTBEAT_MS",
                defaults.worker_heartbeat.as_millis() as u64,
            )),
            database_path: lookup("NEXUS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            static_dir: lookup("NEXUS_STATIC_DIR").map(PathBuf::from),
            production: lookup("NEXUS_ENV")
                .map(|v| v.trim() != "development")
                .unwrap_or(defaults.production),
        }
    }

    /// Socket address to bind
    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

/// Configuration for the agent daemon
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Websocket URL of the hub's agent endpoint (NEXUS_HUB_URL)
    pub hub_url: String,

    /// Shared agent credential (WORKER_TOKEN)
    pub worker_token: Option<String>,

    /// Display name this agent registers under (WORKER_NAME)
    pub name: String,

    /// Respawn the shell after it exits (AUTO_RESTART_SHELL)
    pub auto_restart_shell: bool,

    /// Spawn shells as this user via a login mechanism (RUN_AS_USER)
    pub run_as_user: Option<String>,

    /// Shell override (SHELL)
    pub shell: Option<String>,

    /// Heartbeat cadence (WORKER_HEARTBEAT_MS)
    pub heartbeat: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://127.0.0.1:3002/ws/agent".to_string(),
            worker_token: None,
            name: String::new(),
            auto_restart_shell: true,
            run_as_user: None,
            shell: None,
            heartbeat: Duration::from_millis(5_000),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            hub_url: lookup("NEXUS_HUB_URL").unwrap_or(defaults.hub_url),
            worker_token: non_empty(lookup("WORKER_TOKEN")),
            name: lookup("WORKER_NAME").unwrap_or(defaults.name),
            auto_restart_shell: parse_bool(
                &lookup,
                "AUTO_RESTART_SHELL",
                defaults.auto_restart_shell,
            ),
            run_as_user: non_empty(lookup("RUN_AS_USER")),
            shell: non_empty(lookup("SHELL")),
            heartbeat: Duration::from_millis(parse_or(
                &lookup,
                "WORKER_HEARTBEAT_MS",
                defaults.heartbeat.as_millis() as u64,
            )),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparsable value for {}: {:?}", key, raw);
            default
        }),
        None => default,
    }
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key) {
        Some(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
        None => default,
    }
}
