//! Environment-driven scheduler settings.

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: String,
    /// Scheduler identity used for lease ownership.
    pub owner: String,
    pub lease_ttl_secs: i64,
    pub worker_offline_ttl_secs: i64,
    pub worker_refresh_secs: i64,
    pub log_dir: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Settings {
            db_path: env_or("DURAFLOW_DB", "duraflow.db"),
            owner: std::env::var("DURAFLOW_OWNER").unwrap_or_else(|_| default_owner()),
            lease_ttl_secs: env_i64("DURAFLOW_LEASE_TTL_SEC", 3),
            worker_offline_ttl_secs: env_i64("DURAFLOW_WORKER_OFFLINE_TTL_SEC", 15),
            worker_refresh_secs: env_i64("DURAFLOW_WORKER_REFRESH_SEC", 5),
            log_dir: env_or("DURAFLOW_LOG_DIR", "logs"),
        }
    }
}

fn default_owner() -> String {
    format!("scheduler-{}-{}", std::process::id(), Uuid::new_v4())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::from_env();
        assert!(!s.db_path.is_empty());
        assert!(s.owner.starts_with("scheduler-") || !s.owner.is_empty());
        assert!(s.lease_ttl_secs > 0);
        assert!(s.worker_offline_ttl_secs > 0);
    }

    #[test]
    fn test_owner_ids_are_unique() {
        assert_ne!(default_owner(), default_owner());
    }
}
