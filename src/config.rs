use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Gateway settings, loadable from a TOML file with every field optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub host: String,
    pub port: u16,

    /// Embedded database file. Used unless `postgres_url` is set.
    pub sqlite_path: PathBuf,
    /// Client/server backend. When set, the SQLite file (if any) is migrated
    /// over once and renamed aside.
    pub postgres_url: Option<String>,

    /// Upstream content store (Pulp) base URL.
    pub pulp_endpoint: String,
    /// TLS client identity for upstream content-store requests.
    pub pulp_client_ssl_cert: Option<PathBuf>,
    pub pulp_client_ssl_key: Option<PathBuf>,
    pub pulp_client_ssl_ca: Option<PathBuf>,

    /// Upstream identity provider (Foreman) base URL.
    pub foreman_url: String,
    /// Path under `foreman_url` where the registry token endpoint lives.
    pub registry_token_path: String,

    /// Host clients are redirected to for manifest/blob downloads. Defaults
    /// to `pulp_endpoint`.
    pub client_endpoint: Option<String>,

    /// Shared secret for the administrative endpoints. When unset, the
    /// administrative surface refuses every request.
    pub admin_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            sqlite_path: PathBuf::from("./data/gangway.db"),
            postgres_url: None,
            pulp_endpoint: "https://localhost".to_string(),
            pulp_client_ssl_cert: None,
            pulp_client_ssl_key: None,
            pulp_client_ssl_ca: None,
            foreman_url: "https://localhost".to_string(),
            registry_token_path: "/v2/token".to_string(),
            client_endpoint: None,
            admin_key: None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address: {e}")))
    }

    pub fn client_endpoint(&self) -> &str {
        self.client_endpoint.as_deref().unwrap_or(&self.pulp_endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let settings: Settings = toml::from_str("port = 9000").unwrap();
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.host, "127.0.0.1");
        assert!(settings.postgres_url.is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed: std::result::Result<Settings, _> = toml::from_str("no_such_setting = 1");
        assert!(parsed.is_err());
    }

    #[test]
    fn client_endpoint_falls_back_to_pulp() {
        let settings = Settings::default();
        assert_eq!(settings.client_endpoint(), settings.pulp_endpoint);
    }
}
