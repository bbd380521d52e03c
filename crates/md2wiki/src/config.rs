//! Configuration loading and resolution.
//!
//! Connection settings come from three layers, lowest priority first: an
//! optional `md2wiki.toml` next to the corpus, `CONFLUENCE_*` environment
//! variables, and command-line flags. If no config file exists the system
//! falls back to environment and flags alone.

use crate::error::ConfigError;
use crate::remote::types::ApiFlavor;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_BASE_PATH: &str = "/wiki/";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Root configuration structure loaded from `md2wiki.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    /// Confluence host, e.g. `example.atlassian.net` (no scheme, no path).
    pub domain: Option<String>,
    /// URL prefix for the wiki, wrapped in slashes (default: `/wiki/`).
    pub base_path: Option<String>,
    /// Account name for basic authentication; omit for bearer tokens.
    pub user_name: Option<String>,
    /// API token. Prefer the environment variable over the file.
    pub api_key: Option<String>,
    /// Default space key for documents that do not declare one.
    pub space_key: Option<String>,
    /// REST shape: "cloud" or "server".
    pub api_flavor: Option<String>,
    /// Per-request timeout in seconds (default: 30).
    pub timeout_secs: Option<u64>,
    /// Transport retry budget (default: 2).
    pub max_retries: Option<u32>,
    /// Represent index-less directories as grouping pages (default: false).
    pub keep_hierarchy: Option<bool>,
}

impl FileConfig {
    /// Loads `md2wiki.toml` from the given directory if present.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join("md2wiki.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config =
            toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }
}

/// Values supplied on the command line; `None` means not given.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub domain: Option<String>,
    pub base_path: Option<String>,
    pub user_name: Option<String>,
    pub api_key: Option<String>,
    pub space_key: Option<String>,
    pub api_flavor: Option<ApiFlavor>,
}

/// Fully resolved connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub domain: String,
    pub base_path: String,
    pub user_name: Option<String>,
    pub api_key: String,
    pub space_key: String,
    pub flavor: ApiFlavor,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl ConnectionConfig {
    /// Resolves settings from file, environment, and CLI layers.
    pub fn resolve(file: &FileConfig, cli: &Overrides) -> Result<Self> {
        let domain = cli
            .domain
            .clone()
            .or_else(|| env_var("CONFLUENCE_DOMAIN"))
            .or_else(|| file.domain.clone())
            .ok_or_else(|| {
                usage("Confluence domain not configured (set CONFLUENCE_DOMAIN or pass --domain)")
            })?;
        validate_domain(&domain)?;

        let base_path = cli
            .base_path
            .clone()
            .or_else(|| env_var("CONFLUENCE_PATH"))
            .or_else(|| file.base_path.clone())
            .unwrap_or_else(|| DEFAULT_BASE_PATH.to_string());
        validate_base_path(&base_path)?;

        let user_name = cli
            .user_name
            .clone()
            .or_else(|| env_var("CONFLUENCE_USER_NAME"))
            .or_else(|| file.user_name.clone());

        let api_key = cli
            .api_key
            .clone()
            .or_else(|| env_var("CONFLUENCE_API_KEY"))
            .or_else(|| file.api_key.clone())
            .ok_or_else(|| usage("Confluence API key not configured (set CONFLUENCE_API_KEY)"))?;

        let space_key = cli
            .space_key
            .clone()
            .or_else(|| env_var("CONFLUENCE_SPACE_KEY"))
            .or_else(|| file.space_key.clone())
            .ok_or_else(|| {
                usage("Confluence space key not configured (set CONFLUENCE_SPACE_KEY)")
            })?;

        let flavor = match cli.api_flavor {
            Some(flavor) => flavor,
            None => {
                let raw = env_var("CONFLUENCE_API_FLAVOR").or_else(|| file.api_flavor.clone());
                match raw {
                    Some(raw) => raw
                        .parse()
                        .map_err(|e: String| usage(format!("invalid CONFLUENCE_API_FLAVOR: {e}")))?,
                    None => ApiFlavor::Cloud,
                }
            }
        };

        Ok(Self {
            domain,
            base_path,
            user_name,
            api_key,
            space_key,
            flavor,
            timeout_secs: file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            max_retries: file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        })
    }

    /// `https://{domain}{base_path}`, the prefix every endpoint hangs off.
    pub fn site_url(&self) -> String {
        format!("https://{}{}", self.domain, self.base_path)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn usage(message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(ConfigError(message.into()))
}

fn validate_domain(domain: &str) -> Result<()> {
    if domain.contains("://") {
        return Err(usage(format!(
            "domain must be a bare host without scheme: '{domain}'"
        )));
    }
    if domain.contains('/') {
        return Err(usage(format!(
            "domain must not contain a path component: '{domain}'"
        )));
    }
    if domain.is_empty() {
        return Err(usage("domain must not be empty"));
    }
    Ok(())
}

fn validate_base_path(path: &str) -> Result<()> {
    if !path.starts_with('/') || !path.ends_with('/') {
        return Err(usage(format!(
            "base path must start and end with '/': '{path}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn overrides_with_required() -> Overrides {
        Overrides {
            domain: Some("wiki.example.com".into()),
            api_key: Some("secret".into()),
            space_key: Some("DOCS".into()),
            ..Overrides::default()
        }
    }

    #[test]
    fn resolves_from_cli_overrides() {
        let config = ConnectionConfig::resolve(&FileConfig::default(), &overrides_with_required())
            .unwrap();
        assert_eq!(config.domain, "wiki.example.com");
        assert_eq!(config.base_path, DEFAULT_BASE_PATH);
        assert_eq!(config.flavor, ApiFlavor::Cloud);
        assert_eq!(config.site_url(), "https://wiki.example.com/wiki/");
    }

    #[test]
    fn file_supplies_missing_values() {
        let file = FileConfig {
            base_path: Some("/confluence/".into()),
            api_flavor: Some("server".into()),
            timeout_secs: Some(10),
            ..FileConfig::default()
        };
        let config = ConnectionConfig::resolve(&file, &overrides_with_required()).unwrap();
        assert_eq!(config.base_path, "/confluence/");
        assert_eq!(config.flavor, ApiFlavor::Server);
        assert_eq!(config.timeout_secs, 10);
    }

    #[test]
    fn cli_outranks_file() {
        let file = FileConfig {
            domain: Some("other.example.com".into()),
            ..FileConfig::default()
        };
        let config = ConnectionConfig::resolve(&file, &overrides_with_required()).unwrap();
        assert_eq!(config.domain, "wiki.example.com");
    }

    #[test]
    fn rejects_domain_with_scheme_or_path() {
        let mut cli = overrides_with_required();
        cli.domain = Some("https://wiki.example.com".into());
        assert!(ConnectionConfig::resolve(&FileConfig::default(), &cli).is_err());

        cli.domain = Some("wiki.example.com/wiki".into());
        assert!(ConnectionConfig::resolve(&FileConfig::default(), &cli).is_err());
    }

    #[test]
    fn rejects_unwrapped_base_path() {
        let mut cli = overrides_with_required();
        cli.base_path = Some("wiki/".into());
        assert!(ConnectionConfig::resolve(&FileConfig::default(), &cli).is_err());
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let cli = Overrides {
            domain: Some("wiki.example.com".into()),
            space_key: Some("DOCS".into()),
            ..Overrides::default()
        };
        // Guard against ambient environment.
        if std::env::var("CONFLUENCE_API_KEY").is_err() {
            assert!(ConnectionConfig::resolve(&FileConfig::default(), &cli).is_err());
        }
    }

    #[test]
    fn missing_domain_is_a_typed_usage_error() {
        let cli = Overrides {
            api_key: Some("secret".into()),
            space_key: Some("DOCS".into()),
            ..Overrides::default()
        };
        if std::env::var("CONFLUENCE_DOMAIN").is_err() {
            let err = ConnectionConfig::resolve(&FileConfig::default(), &cli).unwrap_err();
            assert!(err.downcast_ref::<ConfigError>().is_some());
        }
    }

    #[test]
    fn invalid_domain_is_a_typed_usage_error() {
        let mut cli = overrides_with_required();
        cli.domain = Some("https://wiki.example.com".into());
        let err = ConnectionConfig::resolve(&FileConfig::default(), &cli).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn loads_file_config_from_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("md2wiki.toml"),
            "domain = \"wiki.example.com\"\nspace_key = \"DOCS\"\nkeep_hierarchy = true\n",
        )
        .unwrap();
        let file = FileConfig::load(dir.path()).unwrap();
        assert_eq!(file.domain.as_deref(), Some("wiki.example.com"));
        assert_eq!(file.keep_hierarchy, Some(true));
    }

    #[test]
    fn missing_file_config_is_default() {
        let dir = TempDir::new().unwrap();
        let file = FileConfig::load(dir.path()).unwrap();
        assert!(file.domain.is_none());
    }

    #[test]
    fn malformed_file_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("md2wiki.toml"), "[broken syntax").unwrap();
        assert!(FileConfig::load(dir.path()).is_err());
    }
}
