use crate::rate_limit::MAX_WINDOW;
use http::HeaderValue;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_PORT: u16 = 5001;
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_COLLECTION: &str = "airdropQualifiers";
pub const DEFAULT_DATABASE: &str = "(default)";

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Invalid allowed origin: {0}")]
    InvalidOrigin(String),

    #[error("Rate limit window cannot be 0")]
    EmptyWindow,

    #[error("Rate limit window cannot exceed {max_secs} seconds")]
    WindowTooLong { max_secs: u64 },

    #[error("Firestore project id cannot be empty")]
    EmptyProjectId,

    #[error("Firestore collection cannot be empty")]
    EmptyCollection,
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Per-address request budget for the submission route.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RateLimit {
    /// Requests allowed per address per window. 0 disables limiting.
    pub max_requests: u64,
    pub window_secs: u64,
}

impl Default for RateLimit {
    fn default() -> Self {
        RateLimit {
            max_requests: 100,
            window_secs: 15 * 60,
        }
    }
}

impl RateLimit {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FirestoreConfig {
    pub project_id: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Service account key. Application Default Credentials are used when unset.
    pub credentials_file: Option<PathBuf>,
    /// `host:port` of a Firestore emulator. Disables Google authentication.
    pub emulator_host: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl FirestoreConfig {
    pub fn new<P: Into<String>>(project_id: P) -> Self {
        FirestoreConfig {
            project_id: project_id.into(),
            database: default_database(),
            collection: default_collection(),
            credentials_file: None,
            emulator_host: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_database() -> String {
    DEFAULT_DATABASE.into()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.into()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_allowed_origin() -> String {
    DEFAULT_ALLOWED_ORIGIN.into()
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreConfig {
    #[default]
    Memory,
    Firestore(FirestoreConfig),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    /// Serves `/health` and `/ready` on a separate port when set.
    pub admin_listener: Option<Listener>,
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
    #[serde(default)]
    pub rate_limit: RateLimit,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            admin_listener: None,
            allowed_origin: default_allowed_origin(),
            rate_limit: RateLimit::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        if let Some(admin) = &self.admin_listener {
            admin.validate()?;
        }

        self.origin_header()?;

        if self.rate_limit.window_secs == 0 {
            return Err(ValidationError::EmptyWindow);
        }
        if self.rate_limit.window() > MAX_WINDOW {
            return Err(ValidationError::WindowTooLong {
                max_secs: MAX_WINDOW.as_secs(),
            });
        }

        if let StoreConfig::Firestore(firestore) = &self.store {
            if firestore.project_id.trim().is_empty() {
                return Err(ValidationError::EmptyProjectId);
            }
            if firestore.collection.trim().is_empty() {
                return Err(ValidationError::EmptyCollection);
            }
        }

        Ok(())
    }

    /// The allowed origin as a CORS header value. Must be a bare
    /// `scheme://host[:port]` origin.
    pub fn origin_header(&self) -> Result<HeaderValue, ValidationError> {
        let invalid = || ValidationError::InvalidOrigin(self.allowed_origin.clone());

        let url = Url::parse(&self.allowed_origin).map_err(|_| invalid())?;
        if url.host_str().is_none() || url.origin().ascii_serialization() != self.allowed_origin {
            return Err(invalid());
        }

        HeaderValue::from_str(&self.allowed_origin).map_err(|_| invalid())
    }
}
