use intake::config::{Config as IntakeConfig, FirestoreConfig, StoreConfig};
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    #[serde(default = "default_statsd_port")]
    pub statsd_port: u16,
}

fn default_statsd_port() -> u16 {
    8125
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(flatten)]
    pub intake: IntakeConfig,
}

impl Config {
    /// Reads `path` when given, otherwise starts from defaults, then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Overrides file values with `PORT`, `CLIENT_URL`, `SENTRY_DSN` and the
    /// Firestore variables. Setting `FIRESTORE_PROJECT_ID` selects the
    /// Firestore store.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = var("PORT") {
            self.intake.listener.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { key: "PORT", value: port })?;
        }

        if let Some(origin) = var("CLIENT_URL") {
            self.intake.allowed_origin = origin;
        }

        if let Some(dsn) = var("SENTRY_DSN") {
            let logging = self.common.logging.get_or_insert_with(Default::default);
            logging.sentry_dsn = Some(dsn);
        }

        if let Some(project_id) = var("FIRESTORE_PROJECT_ID") {
            match &mut self.intake.store {
                StoreConfig::Firestore(firestore) => firestore.project_id = project_id,
                StoreConfig::Memory => {
                    self.intake.store = StoreConfig::Firestore(FirestoreConfig::new(project_id))
                }
            }
        }

        if let StoreConfig::Firestore(firestore) = &mut self.intake.store {
            if let Some(database) = var("FIRESTORE_DATABASE") {
                firestore.database = database;
            }
            if let Some(host) = var("FIRESTORE_EMULATOR_HOST") {
                firestore.emulator_host = Some(host);
            }
            if let Some(path) = var("GOOGLE_APPLICATION_CREDENTIALS") {
                firestore.credentials_file = Some(PathBuf::from(path));
            }
        }

        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
}
