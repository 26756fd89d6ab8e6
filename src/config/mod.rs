pub mod validate;

use std::collections::HashMap;
use std::fs;

use serde::Deserialize;

pub use validate::ConfigError;

pub const DEFAULT_INDEX: &str = "index.html";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub name: String,
    pub version: String,
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub server_name: String,
    pub host: String,
    pub ports: Vec<u16>,
    pub max_body_size: usize,
    #[serde(default)]
    pub default_server: bool,
    #[serde(default)]
    pub error_pages: HashMap<String, String>,
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    pub path: String,
    pub redirect_to: Option<String>,
    pub redirect_status_code: Option<u16>,
    pub root: Option<String>,
    pub methods: Option<Vec<String>>,
    pub index: Option<String>,
    pub directory_listing: Option<bool>,
    pub cgi_extension: Option<String>,
}

impl AppConfig {
    /// Loads and validates the configuration file. The returned value is
    /// frozen: nothing mutates it after this point.
    pub fn load(path: &str) -> Result<AppConfig, ConfigError> {
        let content = fs::read_to_string(path)?;
        AppConfig::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<AppConfig, ConfigError> {
        let config: AppConfig = serde_json::from_str(content)?;
        validate::validate(&config)?;
        Ok(config)
    }
}

impl ServerConfig {
    pub fn error_page(&self, code: u16) -> Option<&String> {
        self.error_pages.get(&code.to_string())
    }
}

impl RouteConfig {
    pub fn is_redirect(&self) -> bool {
        self.redirect_to.is_some()
    }

    pub fn allows(&self, method: &str) -> bool {
        match &self.methods {
            Some(list) => list.iter().any(|m| m == method),
            None => true,
        }
    }

    pub fn index_file(&self) -> &str {
        self.index.as_deref().unwrap_or(DEFAULT_INDEX)
    }

    /// Configured extension without a leading dot ("py", not ".py").
    pub fn cgi_ext(&self) -> Option<&str> {
        self.cgi_extension
            .as_deref()
            .map(|e| e.trim_start_matches('.'))
    }
}
