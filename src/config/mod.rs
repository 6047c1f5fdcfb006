use dashmap::DashMap;
use serde::Deserialize;
use std::env;
use std::sync::Arc;

/// Port used when neither the caller, the options nor `PORT` name one.
pub const DEFAULT_PORT: u16 = 7001;

const DEFAULT_HOST: &str = "0.0.0.0";

/// Options recognized at application construction.
///
/// The request-facing fields are not interpreted by the lifecycle core;
/// they are handed to every request [`Context`](crate::Context), which uses
/// them for client address and subdomain resolution.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppOptions {
    /// Runtime environment label
    pub env: String,

    /// Signing keys for signed cookies
    pub keys: Vec<String>,

    /// Trust proxy headers
    pub proxy: bool,

    /// Number of host labels that are not subdomains
    pub subdomain_offset: usize,

    /// Header carrying the client address chain when `proxy` is set
    pub proxy_ip_header: String,

    /// Max addresses read from `proxy_ip_header`, 0 means unlimited
    pub max_ips_count: usize,

    /// Bind address, falls back to `HOST`
    pub host: Option<String>,

    /// Listen port, falls back to `PORT`
    pub port: Option<u16>,

    /// Exit the process with status 0 once a signal-triggered stop finished
    pub exit_on_stop: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            env: "development".to_string(),
            keys: Vec::new(),
            proxy: false,
            subdomain_offset: 2,
            proxy_ip_header: "X-Forwarded-For".to_string(),
            max_ips_count: 0,
            host: None,
            port: None,
            exit_on_stop: false,
        }
    }
}

impl AppOptions {
    /// Defaults with `env` taken from `APP_ENV` when set.
    pub fn from_config(config: &ConfigService) -> Self {
        let mut options = Self::default();
        if let Some(env) = config.get("APP_ENV") {
            options.env = env;
        }
        options
    }
}

/// Configuration service
///
/// Snapshot of the process environment taken at construction. Values can be
/// overridden with [`ConfigService::set`] without touching the real
/// environment.
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    pub fn new() -> Self {
        let service = Self::default();
        for (key, value) in env::vars() {
            service.set(&key, &value);
        }
        service
    }

    /// An empty configuration, ignoring the process environment.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    /// `PORT`, ignored when it is not a valid port number.
    pub fn port(&self) -> Option<u16> {
        let raw = self.get("PORT")?;
        match raw.trim().parse() {
            Ok(port) => Some(port),
            Err(_) => {
                tracing::warn!(value = %raw, "Ignoring invalid PORT");
                None
            }
        }
    }

    pub fn host(&self) -> Option<String> {
        self.get("HOST").filter(|host| !host.is_empty())
    }

    /// `APP_NAME`, falling back to the host name.
    pub fn app_name(&self) -> String {
        self.get("APP_NAME")
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.hostname())
    }

    fn hostname(&self) -> String {
        self.get("HOSTNAME")
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }

    /// Port precedence: explicit argument, options, `PORT`, then 7001.
    pub fn resolve_port(&self, explicit: Option<u16>, options: &AppOptions) -> u16 {
        explicit
            .or(options.port)
            .or_else(|| self.port())
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn resolve_host(&self, options: &AppOptions) -> String {
        options
            .host
            .clone()
            .or_else(|| self.host())
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_precedence() {
        let config = ConfigService::empty();
        let mut options = AppOptions::default();
        assert_eq!(config.resolve_port(None, &options), DEFAULT_PORT);

        config.set("PORT", "8080");
        assert_eq!(config.resolve_port(None, &options), 8080);

        options.port = Some(9090);
        assert_eq!(config.resolve_port(None, &options), 9090);
        assert_eq!(config.resolve_port(Some(0), &options), 0);
    }

    #[test]
    fn invalid_port_is_ignored() {
        let config = ConfigService::empty();
        config.set("PORT", "http");
        assert_eq!(config.resolve_port(None, &AppOptions::default()), DEFAULT_PORT);
    }

    #[test]
    fn app_name_prefers_app_name_variable() {
        let config = ConfigService::empty();
        config.set("HOSTNAME", "box-1");
        assert_eq!(config.app_name(), "box-1");

        config.set("APP_NAME", "billing");
        assert_eq!(config.app_name(), "billing");
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: AppOptions =
            serde_json::from_str(r#"{ "proxy": true, "max_ips_count": 2 }"#).unwrap();
        assert!(options.proxy);
        assert_eq!(options.max_ips_count, 2);
        assert_eq!(options.env, "development");
        assert_eq!(options.subdomain_offset, 2);
        assert_eq!(options.proxy_ip_header, "X-Forwarded-For");
    }

    #[test]
    fn env_label_comes_from_app_env() {
        let config = ConfigService::empty();
        config.set("APP_ENV", "production");
        assert_eq!(AppOptions::from_config(&config).env, "production");
    }
}
