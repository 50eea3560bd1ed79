//! Application configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Blob storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Thumbnail generation.
    #[serde(default)]
    pub thumbnails: ThumbnailConfig,
    /// URL preview generation.
    #[serde(default)]
    pub url_previews: UrlPreviewSettings,
    /// Upload limits.
    #[serde(default)]
    pub uploads: UploadConfig,
    /// Administrators and access tokens.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Server name this repository serves as the local origin.
    pub name: String,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Blob storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory that holds content-addressed objects.
    #[serde(default = "default_storage_path")]
    pub base_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_storage_path(),
        }
    }
}

/// Thumbnail generation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    /// Largest width a caller may request; bigger requests are clamped.
    #[serde(default = "default_max_thumbnail_dimension")]
    pub max_width: u32,
    /// Largest height a caller may request; bigger requests are clamped.
    #[serde(default = "default_max_thumbnail_dimension")]
    pub max_height: u32,
    /// Content types whose thumbnails may keep the animated flag.
    #[serde(default = "default_animated_types")]
    pub animated_types: Vec<String>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_thumbnail_dimension(),
            max_height: default_max_thumbnail_dimension(),
            animated_types: default_animated_types(),
        }
    }
}

/// URL preview settings.
#[derive(Debug, Clone, Deserialize)]
pub struct UrlPreviewSettings {
    /// Whether previews are generated at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Width of a cache bucket in milliseconds.
    #[serde(default = "default_bucket_ms")]
    pub bucket_ms: i64,
    /// Request timeout in seconds.
    #[serde(default = "default_preview_timeout")]
    pub timeout_secs: u64,
    /// Maximum page or image body size in bytes.
    #[serde(default = "default_preview_max_bytes")]
    pub max_page_bytes: u64,
    /// User agent sent to remote servers.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// CIDR ranges that are always permitted, even inside a denied range.
    #[serde(default)]
    pub allowed_networks: Vec<String>,
    /// CIDR ranges previews may never reach.
    #[serde(default = "default_denied_networks")]
    pub denied_networks: Vec<String>,
}

impl Default for UrlPreviewSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket_ms: default_bucket_ms(),
            timeout_secs: default_preview_timeout(),
            max_page_bytes: default_preview_max_bytes(),
            user_agent: default_user_agent(),
            allowed_networks: Vec::new(),
            denied_networks: default_denied_networks(),
        }
    }
}

/// Upload limits.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Largest accepted upload in bytes.
    #[serde(default = "default_max_upload")]
    pub max_size_bytes: i64,
    /// Limit advertised to clients when it differs from the enforced one.
    #[serde(default)]
    pub reported_max_size_bytes: Option<i64>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_upload(),
            reported_max_size_bytes: None,
        }
    }
}

impl UploadConfig {
    /// Upload size reported to clients. `None` when the effective value is
    /// negative, which means "unlimited/unspecified".
    #[must_use]
    pub fn public_max_size(&self) -> Option<i64> {
        let size = self.reported_max_size_bytes.unwrap_or(self.max_size_bytes);
        (size >= 0).then_some(size)
    }
}

/// Administrators and access tokens.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Bearer token that authenticates as a global administrator.
    #[serde(default)]
    pub shared_secret: Option<String>,
    /// Users with authority over every origin.
    #[serde(default)]
    pub global_admins: Vec<String>,
    /// Users with authority over a single origin, keyed by origin.
    #[serde(default)]
    pub origin_admins: HashMap<String, Vec<String>>,
    /// Bearer token to user ID.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8000
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./media")
}

const fn default_max_thumbnail_dimension() -> u32 {
    1600
}

fn default_animated_types() -> Vec<String> {
    vec!["image/gif".to_string()]
}

const fn default_true() -> bool {
    true
}

const fn default_bucket_ms() -> i64 {
    60 * 60 * 1000
}

const fn default_preview_timeout() -> u64 {
    10
}

const fn default_preview_max_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_user_agent() -> String {
    format!("mediarepo/{} (URL preview)", env!("CARGO_PKG_VERSION"))
}

fn default_denied_networks() -> Vec<String> {
    [
        "127.0.0.0/8",
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "100.64.0.0/10",
        "169.254.0.0/16",
        "0.0.0.0/8",
        "::1/128",
        "fe80::/10",
        "fc00::/7",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

const fn default_max_upload() -> i64 {
    100 * 1024 * 1024
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `MEDIAREPO_ENV`)
    /// 3. Environment variables with `MEDIAREPO_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("MEDIAREPO_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("MEDIAREPO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("MEDIAREPO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Build a configuration from an in-memory TOML document.
    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [server]
        name = "media.example.org"

        [database]
        url = "postgres://localhost/mediarepo"
    "#;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();

        assert_eq!(config.server.name, "media.example.org");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.thumbnails.animated_types, vec!["image/gif"]);
        assert_eq!(config.url_previews.bucket_ms, 3_600_000);
        assert!(config.url_previews.enabled);
        assert!(config.url_previews.denied_networks.iter().any(|n| n == "10.0.0.0/8"));
        assert!(config.auth.global_admins.is_empty());
    }

    #[test]
    fn test_nested_auth_tables() {
        let source = format!(
            "{MINIMAL}\n[auth]\nglobal_admins = [\"@root:media.example.org\"]\n\n[auth.origin_admins]\notherhost = [\"@mod:otherhost\"]\n\n[auth.tokens]\nabc = \"@alice:media.example.org\"\n"
        );
        let config = Config::from_toml(&source).unwrap();

        assert_eq!(config.auth.global_admins, vec!["@root:media.example.org"]);
        assert_eq!(config.auth.origin_admins["otherhost"], vec!["@mod:otherhost"]);
        assert_eq!(config.auth.tokens["abc"], "@alice:media.example.org");
    }

    #[test]
    fn test_public_max_size_prefers_reported_value() {
        let uploads = UploadConfig {
            max_size_bytes: 100,
            reported_max_size_bytes: Some(50),
        };
        assert_eq!(uploads.public_max_size(), Some(50));

        let uploads = UploadConfig {
            max_size_bytes: 100,
            reported_max_size_bytes: None,
        };
        assert_eq!(uploads.public_max_size(), Some(100));
    }

    #[test]
    fn test_public_max_size_hides_negative_values() {
        let uploads = UploadConfig {
            max_size_bytes: -1,
            reported_max_size_bytes: None,
        };
        assert_eq!(uploads.public_max_size(), None);
    }
}
