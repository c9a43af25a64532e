use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::server::auth::{AuthGate, AuthorizationHandler};
use crate::server::handler::{
    DefaultErrorHandler, ErrorHandler, HandlerFactory, NullRequestLogger, RequestHandler,
    RequestLogger, RouteTarget,
};
use crate::server::routes::RouteTable;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 65536;

/// Static settings as read from a YAML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub listen_addr: String,
    /// Negative means unbounded.
    pub max_connections: i64,
    pub max_request_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            max_connections: -1,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        }
    }
}

impl ServerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let port = self
            .listen_addr
            .rsplit_once(':')
            .map(|(host, port)| (host, port.parse::<u16>()));
        match port {
            Some((host, Ok(_))) if !host.is_empty() => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "listen_addr must be host:port, got {:?}",
                    self.listen_addr
                )));
            }
        }
        if self.max_connections < -1 {
            return Err(ConfigError::Invalid(
                "max_connections must be -1 (unbounded) or non-negative".to_string(),
            ));
        }
        if self.max_request_size == 0 {
            return Err(ConfigError::Invalid(
                "max_request_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Server configuration.
///
/// Built once with the consuming builder methods and then shared by every
/// connection. The route table and the authorization handlers stay mutable
/// through `&self` while the server runs.
pub struct ServerConfig {
    listen_addr: String,
    max_connections: i64,
    max_request_size: usize,
    error_handler: Arc<dyn ErrorHandler>,
    logger: Arc<dyn RequestLogger>,
    routes: RouteTable,
    auth: AuthGate,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::from_settings(&ServerSettings::default())
    }

    /// Reads `LISTEN`, `MAX_CONNECTIONS` and `MAX_REQUEST_SIZE` from the
    /// environment, falling back to defaults for missing or unparsable values.
    pub fn load() -> Self {
        let defaults = ServerSettings::default();
        let listen_addr =
            std::env::var("LISTEN")
                .unwrap_or_else(|_| defaults.listen_addr.clone());
        let max_connections = std::env::var("MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_connections);
        let max_request_size = std::env::var("MAX_REQUEST_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_request_size);

        Self::from_settings(&ServerSettings {
            listen_addr,
            max_connections,
            max_request_size,
        })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.server.validate()?;
        Ok(Self::from_settings(&settings.server))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            listen_addr: settings.listen_addr.clone(),
            max_connections: settings.max_connections,
            max_request_size: settings.max_request_size,
            error_handler: Arc::new(DefaultErrorHandler),
            logger: Arc::new(NullRequestLogger),
            routes: RouteTable::new(),
            auth: AuthGate::new(),
        }
    }

    /// Set the server listen address.
    pub fn address(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of client connections (-1 for no limit).
    pub fn max_connections(mut self, max: i64) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the maximum request size in bytes, head and body together.
    pub fn max_request_size(mut self, max: usize) -> Self {
        self.max_request_size = max;
        self
    }

    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn logger(mut self, logger: impl RequestLogger + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// Add a request handler for the given path prefix.
    pub fn request_handler(self, prefix: &str, handler: impl RequestHandler + 'static) -> Self {
        self.routes.register(prefix, RouteTarget::handler(handler));
        self
    }

    /// Add a request handler factory for the given path prefix.
    pub fn request_handler_factory(
        self,
        prefix: &str,
        factory: impl HandlerFactory + 'static,
    ) -> Self {
        self.routes.register(prefix, RouteTarget::factory(factory));
        self
    }

    pub fn authorization_handler(self, handler: impl AuthorizationHandler + 'static) -> Self {
        self.auth.register(Arc::new(handler));
        self
    }

    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    pub fn connection_limit(&self) -> i64 {
        self.max_connections
    }

    pub fn request_size_limit(&self) -> usize {
        self.max_request_size
    }

    pub fn error_reporter(&self) -> &Arc<dyn ErrorHandler> {
        &self.error_handler
    }

    pub fn request_logger(&self) -> &Arc<dyn RequestLogger> {
        &self.logger
    }

    /// Live route table; safe to change while the server runs.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Live authorization handlers; safe to change while the server runs.
    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    pub fn add_request_handler(&self, prefix: &str, handler: impl RequestHandler + 'static) {
        self.routes.register(prefix, RouteTarget::handler(handler));
    }

    pub fn remove_request_handler(&self, prefix: &str) -> Option<RouteTarget> {
        self.routes.unregister(prefix)
    }

    pub fn add_authorization_handler(&self, handler: impl AuthorizationHandler + 'static) {
        self.auth.register(Arc::new(handler));
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_addr", &self.listen_addr)
            .field("max_connections", &self.max_connections)
            .field("max_request_size", &self.max_request_size)
            .field("routes", &self.routes)
            .field("auth", &self.auth)
            .finish()
    }
}
