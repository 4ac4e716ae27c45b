use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path of the durable disk image. The in-memory image mirrors it.
    pub db_path: PathBuf,
    /// When true (default) the store runs on a memory image synced to disk;
    /// when false all operations hit the disk image directly.
    pub use_memory_db: bool,
    /// Base URL of the external page-rendering service.
    pub crawl4ai_url: String,
    pub server_host: String,
    pub server_port: u16,
    /// Bearer token for the request-authentication layer. Required in server
    /// mode; startup is fatal without it.
    pub local_api_key: Option<String>,
    pub rate_limit_per_minute: u32,
    /// Authorisation secret for blocklist removals.
    pub blocked_domain_keyword: Option<String>,
    /// true → server mode; false → client-forwarding mode.
    pub is_server: bool,
    /// Base URL of the downstream knowledge-graph service. Queue records are
    /// only emitted when this is set.
    pub kg_service_url: Option<String>,
    /// Append-only structured error journal.
    pub error_log_path: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let db_path = std::env::var("DB_PATH").map(PathBuf::from).unwrap_or_else(|_| {
            dirs::data_local_dir()
                .map(|d| d.join("ragstore").join("ragstore.db"))
                .unwrap_or_else(|| PathBuf::from("ragstore.db"))
        });

        let error_log_path = std::env::var("ERROR_LOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                db_path
                    .parent()
                    .map(|d| d.join("ragstore_errors.log"))
                    .unwrap_or_else(|| PathBuf::from("ragstore_errors.log"))
            });

        Self {
            db_path,
            use_memory_db: env_bool("USE_MEMORY_DB", true),
            crawl4ai_url: std::env::var("CRAWL4AI_URL")
                .unwrap_or_else(|_| "http://localhost:11235".to_string()),
            server_host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            local_api_key: std::env::var("LOCAL_API_KEY").ok().filter(|v| !v.is_empty()),
            rate_limit_per_minute: std::env::var("RATE_LIMIT_PER_MINUTE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            blocked_domain_keyword: std::env::var("BLOCKED_DOMAIN_KEYWORD")
                .ok()
                .filter(|v| !v.is_empty()),
            is_server: env_bool("IS_SERVER", true),
            kg_service_url: std::env::var("KG_SERVICE_URL").ok().filter(|v| !v.is_empty()),
            error_log_path,
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_bool_defaults_when_unset() {
        assert!(env_bool("RAGSTORE_TEST_UNSET_VAR", true));
        assert!(!env_bool("RAGSTORE_TEST_UNSET_VAR", false));
    }
}
