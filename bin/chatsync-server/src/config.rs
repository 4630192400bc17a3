//! Server configuration, loaded from environment variables at startup.

use chatsync_core::SessionKind;

/// Runtime configuration for chatsync-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// SQLite URL of the durable session store (default: `"sqlite://chatsync.db"`).
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Directory for a daily-rolling log file, in addition to stdout.
    pub log_dir: Option<String>,

    /// Comma-separated list of allowed CORS origins; unset means any.
    pub cors_allowed_origins: Option<String>,

    /// Mount Swagger UI and the OpenAPI document.
    pub enable_swagger: bool,

    /// Backend used when a request does not name one.
    pub default_session_kind: SessionKind,

    /// Lifetime of issued bearer tokens, in hours.
    pub token_ttl_hours: i64,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("CHATSYNC_BIND", "0.0.0.0:3000"),
            database_url: env_or("CHATSYNC_DATABASE_URL", "sqlite://chatsync.db"),
            log_level: env_or("CHATSYNC_LOG", "info"),
            log_json: env_flag("CHATSYNC_LOG_JSON", false),
            log_dir: env_opt("CHATSYNC_LOG_DIR"),
            cors_allowed_origins: env_opt("CHATSYNC_CORS_ORIGINS"),
            enable_swagger: env_flag("CHATSYNC_ENABLE_SWAGGER", true),
            default_session_kind: parse_env("CHATSYNC_DEFAULT_SESSION_KIND", SessionKind::Ephemeral),
            token_ttl_hours: parse_env("CHATSYNC_TOKEN_TTL_HOURS", 168),
        }
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.token_ttl_hours.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_owned(),
            database_url: "sqlite://chatsync.db".to_owned(),
            log_level: "info".to_owned(),
            log_json: false,
            log_dir: None,
            cors_allowed_origins: None,
            enable_swagger: true,
            default_session_kind: SessionKind::Ephemeral,
            token_ttl_hours: 168,
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().to_ascii_lowercase().parse().ok())
        .unwrap_or(default)
}
