//! Environment and configuration loading.
//!
//! A `.env` file is loaded once at process start. The canonical store is
//! configured through the `EDGEDB_USER` / `EDGEDB_PASS` / `EDGEDB_HOST` /
//! `EDGEDB_PORT` variables, treated as opaque connection parameters: the
//! embedded backend interprets the host as a filesystem location and keeps
//! the rest for deployments where the document store is remote.
//!
//! `sources.yml` can replace the interactive source setup; it is a list of
//! `{source, root, to_db, output}` actions.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::domain::{AppError, Result};

/// Opaque connection parameters for the canonical store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub user: Option<String>,
    pub pass: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl StoreConfig {
    /// Read the store parameters from the environment.
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("EDGEDB_PORT") {
            Ok(raw) => Some(raw.parse().map_err(|_| AppError::Config {
                message: format!("EDGEDB_PORT is not a port number: {raw}"),
            })?),
            Err(_) => None,
        };
        Ok(Self {
            user: std::env::var("EDGEDB_USER").ok(),
            pass: std::env::var("EDGEDB_PASS").ok(),
            host: std::env::var("EDGEDB_HOST").ok(),
            port,
        })
    }

    /// Render the connection parameters for debug logging. The password is
    /// never included, only whether one is set.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "user={} host={} port={} pass={}",
            self.user.as_deref().unwrap_or("-"),
            self.host.as_deref().unwrap_or("-"),
            self.port.map_or_else(|| "-".to_string(), |p| p.to_string()),
            if self.pass.is_some() { "set" } else { "unset" },
        )
    }

    /// Resolve where the embedded backend keeps its database file.
    ///
    /// The host parameter doubles as the store location; without it the
    /// store lives in the platform data directory.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        if let Some(host) = self.host.as_deref().filter(|h| !h.is_empty()) {
            let host_path = Path::new(host);
            if host_path.extension().is_some() {
                return host_path.to_path_buf();
            }
            return host_path.join("canonical.db");
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nimika")
            .join("canonical.db")
    }
}

/// Load `.env` (if present) exactly once; existing variables win.
pub fn load_environment() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("failed to load .env: {e}"),
    }
}

/// One configured fetch action from `sources.yml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SourceAction {
    /// Adapter name (discord, telegram, reddit, youtube, forum, publication).
    pub source: String,
    /// Dump root directory.
    pub root: PathBuf,
    /// Persist to the canonical store when true.
    pub to_db: bool,
    /// JSON-lines destination when `to_db` is false.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl SourceAction {
    fn validate(&self) -> Result<()> {
        self.source
            .parse::<crate::infrastructure::sources::SourceKind>()
            .map_err(|message| AppError::Config { message })?;
        if !self.to_db && self.output.is_none() {
            return Err(AppError::Config {
                message: format!(
                    "source {:?} has to_db: false but no output file",
                    self.source
                ),
            });
        }
        Ok(())
    }
}

/// Parse a `sources.yml` file into validated actions.
pub fn load_source_actions(path: &Path) -> Result<Vec<SourceAction>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("failed to read {}", path.display()), e))?;
    let actions: Vec<SourceAction> =
        serde_yaml::from_str(&content).map_err(|e| AppError::Config {
            message: format!("failed to parse {}: {e}", path.display()),
        })?;
    for action in &actions {
        action.validate()?;
    }
    Ok(actions)
}
