use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub query: QueryConfig,
    pub auth: AuthConfig,
    pub errors: ErrorConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    pub request_timeout_secs: u64,
    pub ws_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub default_limit: u64,
    pub max_limit: Option<u64>,
    pub max_nested_depth: u32,
    pub allow_raw_where: bool,
    pub debug_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub required: bool,
    pub jwt_expiry_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorConfig {
    pub expose_stack: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
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
        if let Ok(v) = env::var("SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env::var("SERVER_PORT").or_else(|_| env::var("PORT")) {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }
        if let Ok(v) = env::var("SERVER_MAX_BODY_BYTES") {
            self.server.max_body_bytes = v.parse().unwrap_or(self.server.max_body_bytes);
        }
        if let Ok(v) = env::var("SERVER_REQUEST_TIMEOUT_SECS") {
            self.server.request_timeout_secs = v.parse().unwrap_or(self.server.request_timeout_secs);
        }
        if let Ok(v) = env::var("SERVER_WS_PATH") {
            self.server.ws_path = v;
        }

        // Query overrides
        if let Ok(v) = env::var("QUERY_DEFAULT_LIMIT") {
            self.query.default_limit = v.parse().unwrap_or(self.query.default_limit);
        }
        if let Ok(v) = env::var("QUERY_MAX_LIMIT") {
            self.query.max_limit = v.parse().ok();
        }
        if let Ok(v) = env::var("QUERY_MAX_NESTED_DEPTH") {
            self.query.max_nested_depth = v.parse().unwrap_or(self.query.max_nested_depth);
        }
        if let Ok(v) = env::var("QUERY_ALLOW_RAW_WHERE") {
            self.query.allow_raw_where = v.parse().unwrap_or(self.query.allow_raw_where);
        }
        if let Ok(v) = env::var("QUERY_DEBUG_LOGGING") {
            self.query.debug_logging = v.parse().unwrap_or(self.query.debug_logging);
        }

        // Auth overrides
        if let Ok(v) = env::var("AUTH_JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Ok(v) = env::var("AUTH_REQUIRED") {
            self.auth.required = v.parse().unwrap_or(self.auth.required);
        }
        if let Ok(v) = env::var("AUTH_JWT_EXPIRY_HOURS") {
            self.auth.jwt_expiry_hours = v.parse().unwrap_or(self.auth.jwt_expiry_hours);
        }

        // Error overrides
        if let Ok(v) = env::var("ERRORS_EXPOSE_STACK") {
            self.errors.expose_stack = v.parse().unwrap_or(self.errors.expose_stack);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v).filter(|url| !url.is_empty());
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                max_body_bytes: 10 * 1024 * 1024, // 10MB
                request_timeout_secs: 60,
                ws_path: "/ws".to_string(),
            },
            query: QueryConfig {
                default_limit: 10,
                max_limit: Some(1000),
                max_nested_depth: 10,
                allow_raw_where: true,
                debug_logging: true,
            },
            auth: AuthConfig {
                jwt_secret: "development-secret".to_string(),
                required: false,
                jwt_expiry_hours: 24 * 7, // 1 week
            },
            errors: ErrorConfig { expose_stack: true },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["*".to_string()],
            },
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                max_body_bytes: 5 * 1024 * 1024, // 5MB
                request_timeout_secs: 30,
                ws_path: "/ws".to_string(),
            },
            query: QueryConfig {
                default_limit: 10,
                max_limit: Some(500),
                max_nested_depth: 5,
                allow_raw_where: false,
                debug_logging: false,
            },
            auth: AuthConfig {
                jwt_secret: String::new(),
                required: true,
                jwt_expiry_hours: 24,
            },
            errors: ErrorConfig { expose_stack: true },
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                connection_timeout: 10,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
            },
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                max_body_bytes: 2 * 1024 * 1024, // 2MB
                request_timeout_secs: 15,
                ws_path: "/ws".to_string(),
            },
            query: QueryConfig {
                default_limit: 10,
                max_limit: Some(100),
                max_nested_depth: 3,
                allow_raw_where: false,
                debug_logging: false,
            },
            auth: AuthConfig {
                jwt_secret: String::new(),
                required: true,
                jwt_expiry_hours: 4,
            },
            errors: ErrorConfig { expose_stack: false },
            database: DatabaseConfig {
                url: None,
                max_connections: 50,
                connection_timeout: 5,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://app.example.com".to_string()],
            },
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

// Global config for the binary - library code receives an explicit AppConfig
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert!(config.query.allow_raw_where);
        assert_eq!(config.query.max_limit, Some(1000));
        assert!(!config.auth.required);
        assert!(config.errors.expose_stack);
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert!(!config.query.allow_raw_where);
        assert_eq!(config.query.max_limit, Some(100));
        assert!(config.auth.required);
        assert!(!config.errors.expose_stack);
    }

    #[test]
    fn test_bind_address() {
        let config = AppConfig::development();
        assert_eq!(config.bind_address(), "0.0.0.0:3000");
    }
}
