//! Server configuration management.
//!
//! Configuration is stored as TOML. The path is the first command-line
//! argument, else `$SLICEDROP_CONFIG`, else `slicedrop.toml` in the working
//! directory. A missing file is created with defaults.

use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use slicedrop_server::ServerConfig;

const CONFIG_ENV: &str = "SLICEDROP_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "slicedrop.toml";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on.
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// HTTP port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding `chunks/` and `files/`.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// URL prefix merged files are served under.
    #[serde(default = "default_href_prefix")]
    pub href_prefix: String,

    /// Largest accepted chunk, in bytes.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    3000
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./storage")
}

fn default_href_prefix() -> String {
    "/files".into()
}

fn default_max_chunk_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            storage_root: default_storage_root(),
            href_prefix: default_href_prefix(),
            max_chunk_bytes: default_max_chunk_bytes(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or creates a default there if not found.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            port: self.port,
            storage_root: self.storage_root.clone(),
            href_prefix: self.href_prefix.clone(),
            max_chunk_bytes: self.max_chunk_bytes,
        }
    }
}

/// Resolves the configuration file path.
pub fn config_path(arg: Option<OsString>) -> PathBuf {
    arg.or_else(|| std::env::var_os(CONFIG_ENV))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
