use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub schema: SchemaConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

/// How tenant ids are read out of the request host name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressingMode {
    /// `acme.localhost:3000`
    Development,
    /// `acme.app.example.com`
    Production,
}

impl AddressingMode {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "development" | "dev" | "localhost" => Some(AddressingMode::Development),
            "production" | "prod" => Some(AddressingMode::Production),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub addressing: AddressingMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Control-plane database holding the tenant directory
    #[serde(skip_serializing)]
    pub control_plane_url: Option<String>,
    /// Per-tenant pool size
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub idle_timeout_secs: u64,
    pub reaper_interval_secs: u64,
    /// How long a cached pool is trusted before its tenant's status is read again
    pub revalidate_secs: u64,
}

impl DatabaseConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn revalidate_after(&self) -> Duration {
        Duration::from_secs(self.revalidate_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_url: String,
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    pub region: Option<String>,
    pub request_timeout_secs: u64,
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Tenant schema snapshot; the embedded snapshot is used when unset
    pub snapshot_path: Option<PathBuf>,
    pub apply_timeout_secs: u64,
}

impl SchemaConfig {
    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Master secret the credential key is derived from
    #[serde(skip_serializing)]
    pub master_secret: Option<String>,
    pub kdf_salt: String,
    pub kdf_memory_kib: u32,
    pub kdf_iterations: u32,
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
        // Server overrides
        if let Ok(v) = env::var("PORT") {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }
        if let Ok(v) = env::var("TENANT_ADDRESSING") {
            self.server.addressing = AddressingMode::parse(&v).unwrap_or(self.server.addressing);
        }

        // Database overrides
        if let Ok(v) = env::var("CONTROL_PLANE_DATABASE_URL") {
            self.database.control_plane_url = Some(v);
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Ok(v) = env::var("TENANT_POOL_IDLE_TIMEOUT_SECS") {
            self.database.idle_timeout_secs = v.parse().unwrap_or(self.database.idle_timeout_secs);
        }
        if let Ok(v) = env::var("TENANT_POOL_REAPER_INTERVAL_SECS") {
            self.database.reaper_interval_secs = v.parse().unwrap_or(self.database.reaper_interval_secs);
        }
        if let Ok(v) = env::var("TENANT_POOL_REVALIDATE_SECS") {
            self.database.revalidate_secs = v.parse().unwrap_or(self.database.revalidate_secs);
        }

        // Provider overrides
        if let Ok(v) = env::var("PROVIDER_API_URL") {
            self.provider.api_url = v;
        }
        if let Ok(v) = env::var("PROVIDER_API_TOKEN") {
            self.provider.api_token = Some(v);
        }
        if let Ok(v) = env::var("PROVIDER_REGION") {
            self.provider.region = Some(v);
        }
        if let Ok(v) = env::var("PROVIDER_REQUEST_TIMEOUT_SECS") {
            self.provider.request_timeout_secs = v.parse().unwrap_or(self.provider.request_timeout_secs);
        }

        // Schema overrides
        if let Ok(v) = env::var("TENANT_SCHEMA_PATH") {
            self.schema.snapshot_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = env::var("SCHEMA_APPLY_TIMEOUT_SECS") {
            self.schema.apply_timeout_secs = v.parse().unwrap_or(self.schema.apply_timeout_secs);
        }

        // Security overrides
        if let Ok(v) = env::var("TENANT_MASTER_SECRET") {
            self.security.master_secret = Some(v);
        }
        if let Ok(v) = env::var("TENANT_KDF_SALT") {
            self.security.kdf_salt = v;
        }
        if let Ok(v) = env::var("TENANT_KDF_MEMORY_KIB") {
            self.security.kdf_memory_kib = v.parse().unwrap_or(self.security.kdf_memory_kib);
        }
        if let Ok(v) = env::var("TENANT_KDF_ITERATIONS") {
            self.security.kdf_iterations = v.parse().unwrap_or(self.security.kdf_iterations);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                port: 3000,
                addressing: AddressingMode::Development,
            },
            database: DatabaseConfig {
                control_plane_url: None,
                max_connections: 5,
                connection_timeout: 30,
                idle_timeout_secs: 5 * 60,
                reaper_interval_secs: 30,
                revalidate_secs: 5,
            },
            provider: ProviderConfig {
                api_url: "http://localhost:4010/api/v2".to_string(),
                api_token: None,
                region: None,
                request_timeout_secs: 60,
            },
            schema: SchemaConfig {
                snapshot_path: None,
                apply_timeout_secs: 60,
            },
            security: SecurityConfig {
                master_secret: None,
                kdf_salt: "tenantdb-dev-salt".to_string(),
                kdf_memory_kib: 19 * 1024,
                kdf_iterations: 2,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            server: ServerConfig {
                port: 3000,
                addressing: AddressingMode::Production,
            },
            database: DatabaseConfig {
                control_plane_url: None,
                max_connections: 10,
                connection_timeout: 10,
                idle_timeout_secs: 10 * 60,
                reaper_interval_secs: 60,
                revalidate_secs: 10,
            },
            provider: ProviderConfig {
                api_url: "https://console.neon.tech/api/v2".to_string(),
                api_token: None,
                region: None,
                request_timeout_secs: 30,
            },
            schema: SchemaConfig {
                snapshot_path: None,
                apply_timeout_secs: 60,
            },
            security: SecurityConfig {
                master_secret: None,
                kdf_salt: "tenantdb-staging-salt".to_string(),
                kdf_memory_kib: 64 * 1024,
                kdf_iterations: 3,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig {
                port: 8080,
                addressing: AddressingMode::Production,
            },
            database: DatabaseConfig {
                control_plane_url: None,
                max_connections: 10,
                connection_timeout: 5,
                idle_timeout_secs: 15 * 60,
                reaper_interval_secs: 60,
                revalidate_secs: 10,
            },
            provider: ProviderConfig {
                api_url: "https://console.neon.tech/api/v2".to_string(),
                api_token: None,
                region: None,
                request_timeout_secs: 30,
            },
            schema: SchemaConfig {
                snapshot_path: None,
                apply_timeout_secs: 120,
            },
            security: SecurityConfig {
                master_secret: None,
                kdf_salt: "tenantdb-production-salt".to_string(),
                kdf_memory_kib: 64 * 1024,
                kdf_iterations: 3,
            },
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
