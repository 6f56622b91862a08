//! Daemon configuration loaded from environment variables.
//!
//! Everything has a default so the sidecar can start with zero
//! configuration in local development.

/// Runtime configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Institution name printed on report cards.
    /// Env: `CAMPUSD_INSTITUTION`
    /// Default: `"GLOBAL UNIVERSITY OF OS"`
    pub institution_name: String,

    /// Sender address stamped on outbound credential mail.
    /// Env: `CAMPUSD_MAIL_SENDER`
    /// Default: `"admissions@campus.local"`
    pub mail_sender: String,

    /// Maximum accepted attachment size in bytes.
    /// Env: `CAMPUSD_MAX_UPLOAD_BYTES`
    /// Default: 16 MiB
    pub max_upload_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            institution_name: "GLOBAL UNIVERSITY OF OS".to_string(),
            mail_sender: "admissions@campus.local".to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            institution_name: std::env::var("CAMPUSD_INSTITUTION")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.institution_name),
            mail_sender: std::env::var("CAMPUSD_MAIL_SENDER")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.mail_sender),
            max_upload_bytes: std::env::var("CAMPUSD_MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_upload_bytes),
        }
    }
}
