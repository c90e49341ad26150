use std::env;
use std::path::PathBuf;

use thiserror::Error;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub destination: DestinationConfig,
    pub email: EmailConfig,
    pub sidecar: SidecarConfig,
    /// When set, failed resolutions and the ready event log the full chat
    /// listing for diagnostics.
    pub debug: bool,
}

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_lookup(&lookup)?,
            destination: DestinationConfig {
                chat_name: lookup("DESTINATION_CHAT_NAME").unwrap_or_default(),
                chat_id: lookup("DESTINATION_CHAT_ID").unwrap_or_default(),
            },
            email: EmailConfig {
                api_key: lookup("RESEND_API_KEY").and_then(non_empty),
                from: lookup("EMAIL_FROM")
                    .and_then(non_empty)
                    .unwrap_or_else(default_email_from),
                qr_notify_to: lookup("QR_EMAIL_TO").and_then(non_empty),
            },
            sidecar: SidecarConfig {
                dir: lookup("SIDECAR_DIR").and_then(non_empty).map(PathBuf::from),
                auth_dir: lookup("SIDECAR_AUTH_DIR")
                    .and_then(non_empty)
                    .map(PathBuf::from),
            },
            debug: lookup("DEBUG").is_some_and(|v| parse_bool(&v)),
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() { None } else { Some(value) }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "true" | "1" | "yes")
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
}

impl ServerConfig {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match lookup("SERVER_PORT").and_then(non_empty) {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidPort(raw))?,
            None => default_port(),
        };
        let request_timeout_seconds = match lookup("REQUEST_TIMEOUT_SECONDS").and_then(non_empty) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout(raw))?,
            None => default_request_timeout(),
        };
        Ok(Self {
            host: lookup("SERVER_HOST").and_then(non_empty).unwrap_or_else(default_host),
            port,
            request_timeout_seconds,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_request_timeout() -> u64 {
    30
}

// ============================================================================
// DestinationConfig
// ============================================================================

/// The default destination chat for `POST /send`. Either field may be empty;
/// the id wins when both are set.
#[derive(Debug, Clone, Default)]
pub struct DestinationConfig {
    pub chat_name: String,
    pub chat_id: String,
}

// ============================================================================
// EmailConfig
// ============================================================================

#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key. Unset disables the mailer entirely.
    pub api_key: Option<String>,
    pub from: String,
    /// Operator address that receives pairing QR codes. Unset means QR codes
    /// are shown on the terminal only.
    pub qr_notify_to: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            from: default_email_from(),
            qr_notify_to: None,
        }
    }
}

fn default_email_from() -> String {
    "onboarding@resend.dev".to_string()
}

// ============================================================================
// SidecarConfig
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SidecarConfig {
    /// Directory containing the sidecar package. When unset, well-known
    /// locations relative to the working directory are probed.
    pub dir: Option<PathBuf>,
    /// Where the sidecar persists session credentials between restarts.
    pub auth_dir: Option<PathBuf>,
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SERVER_PORT is not a valid port: {0}")]
    InvalidPort(String),

    #[error("REQUEST_TIMEOUT_SECONDS is not a valid duration: {0}")]
    InvalidTimeout(String),
}

// ============================================================================
// Tests
// ============================================================================
