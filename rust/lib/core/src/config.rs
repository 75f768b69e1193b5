use std::path::PathBuf;

use crate::error::ServiceError;

/// Local storage and remote settings shared by everything that opens an
/// inventory store.
///
/// Binaries parse these from command-line arguments or their own config
/// file, then pass them to storage initialization.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory holding the local databases.
    pub data_dir: Option<PathBuf>,

    /// Path to the primary redb database file.
    /// Defaults to `{data_dir}/data.redb` if not specified.
    pub db_path: Option<PathBuf>,

    /// Path to the mirror redb database file.
    /// Defaults to `{data_dir}/mirror.redb` if not specified.
    pub mirror_path: Option<PathBuf>,

    /// Base URL of the remote system of record. Empty means none.
    pub server: String,

    /// Active user identity. Every persisted key is namespaced by it.
    pub user: String,

    /// Optional byte budget for the primary store.
    pub quota_bytes: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            db_path: None,
            mirror_path: None,
            server: String::new(),
            user: "default".to_string(),
            quota_bytes: None,
        }
    }
}

impl ServiceConfig {
    /// Parse configuration from command-line arguments.
    ///
    /// Supported flags:
    /// - `--data-dir=PATH`
    /// - `--db=PATH`
    /// - `--mirror=PATH`
    /// - `--server=URL`
    /// - `--user=NAME`
    /// - `--quota=BYTES`
    ///
    /// Unknown flags are ignored. A malformed `--quota` is rejected.
    pub fn from_args(args: &[String]) -> Result<Self, ServiceError> {
        let mut config = ServiceConfig::default();

        for arg in args {
            if let Some(val) = arg.strip_prefix("--data-dir=") {
                config.data_dir = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--db=") {
                config.db_path = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--mirror=") {
                config.mirror_path = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--server=") {
                config.server = val.trim_end_matches('/').to_string();
            } else if let Some(val) = arg.strip_prefix("--user=") {
                config.user = val.to_string();
            } else if let Some(val) = arg.strip_prefix("--quota=") {
                let bytes = val.parse().map_err(|_| {
                    ServiceError::Validation(format!("--quota expects a byte count, got '{}'", val))
                })?;
                config.quota_bytes = Some(bytes);
            }
        }

        Ok(config)
    }

    /// Resolve the primary database path, falling back to `{data_dir}/data.redb`.
    pub fn resolve_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.resolve_data_subpath("data.redb"))
    }

    /// Resolve the mirror database path, falling back to `{data_dir}/mirror.redb`.
    pub fn resolve_mirror_path(&self) -> PathBuf {
        self.mirror_path
            .clone()
            .unwrap_or_else(|| self.resolve_data_subpath("mirror.redb"))
    }

    pub fn has_server(&self) -> bool {
        !self.server.is_empty()
    }

    fn resolve_data_subpath(&self, name: &str) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(|d| d.join(name))
            .unwrap_or_else(|| PathBuf::from(name))
    }
}
