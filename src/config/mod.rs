use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

pub mod provisioning;

pub use provisioning::{
    ClientTemplate, CompensationPolicy, ConfigError, PermissionMatrix, ProvisioningConfig,
    ResourceTemplate, RoleTemplate,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub iap: IapConfig,
    pub api: ApiConfig,
    /// Path of the provisioning YAML; the embedded default is used when unset.
    pub provisioning_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct IapConfig {
    pub base_url: String,
    pub admin_realm: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub token_refresh_margin_secs: u64,
    pub request_timeout_secs: u64,
}

// Credentials never reach logs: the database URL loses its password and the
// client secret is masked.
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_deref().map(redact_url))
            .field("max_connections", &self.max_connections)
            .field("connection_timeout", &self.connection_timeout)
            .finish()
    }
}

impl fmt::Debug for IapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IapConfig")
            .field("base_url", &self.base_url)
            .field("admin_realm", &self.admin_realm)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_refresh_margin_secs", &self.token_refresh_margin_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() && parsed.set_password(Some("redacted")).is_err() {
                return "<redacted>".to_string();
            }
            parsed.to_string()
        }
        Err(_) => "<redacted>".to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_request_logging: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Identity provider overrides
        if let Ok(v) = env::var("IAP_BASE_URL") {
            self.iap.base_url = v;
        }
        if let Ok(v) = env::var("IAP_ADMIN_REALM") {
            self.iap.admin_realm = v;
        }
        if let Ok(v) = env::var("IAP_CLIENT_ID") {
            self.iap.client_id = v;
        }
        if let Ok(v) = env::var("IAP_CLIENT_SECRET") {
            self.iap.client_secret = v;
        }
        if let Ok(v) = env::var("IAP_TOKEN_REFRESH_MARGIN_SECS") {
            self.iap.token_refresh_margin_secs = v.parse().unwrap_or(self.iap.token_refresh_margin_secs);
        }
        if let Ok(v) = env::var("IAP_REQUEST_TIMEOUT_SECS") {
            self.iap.request_timeout_secs = v.parse().unwrap_or(self.iap.request_timeout_secs);
        }

        // API overrides; PORT is honoured for platforms that inject it
        if let Ok(v) = env::var("API_PORT").or_else(|_| env::var("PORT")) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }

        if let Ok(v) = env::var("PROVISIONING_CONFIG") {
            self.provisioning_path = Some(v);
        }

        self
    }

    fn iap_defaults(base_url: &str, request_timeout_secs: u64) -> IapConfig {
        IapConfig {
            base_url: base_url.to_string(),
            admin_realm: "master".to_string(),
            client_id: "admin-cli".to_string(),
            client_secret: String::new(),
            token_refresh_margin_secs: 10,
            request_timeout_secs,
        }
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
            },
            iap: Self::iap_defaults("http://localhost:8080", 30),
            api: ApiConfig {
                port: 9001,
                enable_request_logging: true,
            },
            provisioning_path: None,
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                connection_timeout: 10,
            },
            iap: Self::iap_defaults("https://iam.staging.example.com", 15),
            api: ApiConfig {
                port: 9001,
                enable_request_logging: true,
            },
            provisioning_path: None,
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                url: None,
                max_connections: 50,
                connection_timeout: 5,
            },
            iap: Self::iap_defaults("https://iam.example.com", 10),
            api: ApiConfig {
                port: 9001,
                enable_request_logging: false,
            },
            provisioning_path: None,
        }
    }

    /// Provisioning document from `provisioning_path`, or the embedded default.
    pub fn load_provisioning(&self) -> Result<ProvisioningConfig, ConfigError> {
        match &self.provisioning_path {
            Some(path) => ProvisioningConfig::load(path),
            None => ProvisioningConfig::embedded(),
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_development {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Development)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.iap.admin_realm, "master");
        assert_eq!(config.iap.token_refresh_margin_secs, 10);
        assert!(config.api.enable_request_logging);
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert_eq!(config.database.max_connections, 50);
        assert!(!config.api.enable_request_logging);
        assert!(config.iap.base_url.starts_with("https://"));
    }

    #[test]
    fn client_secret_is_never_serialized() {
        let mut config = AppConfig::development();
        config.iap.client_secret = "s3cr3t".to_string();

        let rendered = serde_json::to_string(&config).unwrap();
        assert!(!rendered.contains("s3cr3t"));
    }

    #[test]
    fn debug_output_hides_credentials() {
        let mut config = AppConfig::development();
        config.iap.client_secret = "s3cr3t".to_string();
        config.database.url = Some("postgres://platform:hunter2@db:5432/platform".to_string());

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("s3cr3t"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("postgres://platform:redacted@db:5432/platform"));
    }

    #[test]
    fn falls_back_to_embedded_provisioning_document() {
        let config = AppConfig::development();
        let provisioning = config.load_provisioning().unwrap();
        assert!(!provisioning.roles.is_empty());
    }
}
