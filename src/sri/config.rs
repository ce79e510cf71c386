use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::core::{Environment, FiscalError};

const TEST_HOST: &str = "https://celcer.sri.gob.ec";
const PRODUCTION_HOST: &str = "https://cel.sri.gob.ec";
const RECEPTION_PATH: &str =
    "/comprobantes-electronicos-ws/RecepcionComprobantesOffline";
const AUTHORIZATION_PATH: &str =
    "/comprobantes-electronicos-ws/AutorizacionComprobantesOffline";

/// Connection settings for the Authority's web services.
///
/// ```
/// use comprobantes::sri::SriConfig;
///
/// let config = SriConfig::from_toml_str(r#"
///     environment = "production"
///     request_timeout_secs = 240
/// "#).unwrap();
/// assert!(config.reception_url().starts_with("https://cel.sri.gob.ec"));
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SriConfig {
    pub environment: Environment,
    /// Overrides the reception endpoint derived from `environment`.
    pub reception_url: Option<String>,
    /// Overrides the authorization endpoint derived from `environment`.
    pub authorization_url: Option<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Root directory of the filesystem artifact store.
    pub artifact_root: PathBuf,
}

impl Default for SriConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Test,
            reception_url: None,
            authorization_url: None,
            connect_timeout_secs: 30,
            request_timeout_secs: 180,
            artifact_root: PathBuf::from("comprobantes"),
        }
    }
}

impl SriConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, FiscalError> {
        let config: Self =
            toml::from_str(s).map_err(|e| FiscalError::Config(format!("invalid TOML: {e}")))?;
        config.check()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, FiscalError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FiscalError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    fn check(&self) -> Result<(), FiscalError> {
        if self.request_timeout_secs == 0 {
            return Err(FiscalError::Config("request_timeout_secs must be positive".into()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(FiscalError::Config("connect_timeout_secs must be positive".into()));
        }
        for url in [&self.reception_url, &self.authorization_url].into_iter().flatten() {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(FiscalError::Config(format!("endpoint {url:?} is not an HTTP URL")));
            }
        }
        Ok(())
    }

    fn host(&self) -> &'static str {
        match self.environment {
            Environment::Test => TEST_HOST,
            Environment::Production => PRODUCTION_HOST,
        }
    }

    pub fn reception_url(&self) -> String {
        self.reception_url
            .clone()
            .unwrap_or_else(|| format!("{}{RECEPTION_PATH}", self.host()))
    }

    pub fn authorization_url(&self) -> String {
        self.authorization_url
            .clone()
            .unwrap_or_else(|| format!("{}{AUTHORIZATION_PATH}", self.host()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
