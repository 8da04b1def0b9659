use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Path segment the resource graph is served under
    pub route_prefix: String,
    /// Public origin used in `Location` headers; the bind address when unset
    pub base_url: Option<String>,
    pub load_seed_data: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            route_prefix: "odata".to_string(),
            base_url: None,
            load_seed_data: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional config file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        config = config.add_source(config::File::with_name("config").required(false));

        // Environment variables with prefix "ODATA_", e.g. ODATA_SERVICE__ROUTE_PREFIX
        config = config.add_source(
            config::Environment::with_prefix("ODATA")
                .separator("__")
                .prefix_separator("_")
                .try_parsing(true),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    /// Get the server bind address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Route prefix without surrounding slashes
    pub fn route_prefix(&self) -> &str {
        self.service.route_prefix.trim_matches('/')
    }

    /// Absolute root of the resource graph, e.g. `http://127.0.0.1:3001/odata`
    pub fn service_root(&self) -> String {
        let base = match &self.service.base_url {
            Some(base_url) => base_url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.server_address()),
        };
        match self.route_prefix() {
            "" => base,
            prefix => format!("{}/{}", base, prefix),
        }
    }
}
