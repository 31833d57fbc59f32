//! Configuration loading from `<root>/ax.yaml`.
//!
//! Unlike most local errors, a malformed config at startup is fatal: the
//! operator asked for specific policy and silently falling back to defaults
//! would run with the wrong one. A missing file just means defaults.

use ax_types::config::AxConfig;
use ax_types::{AxError, AxResult};
use std::path::{Path, PathBuf};
use tracing::info;

/// Config file name under the state root.
pub const CONFIG_FILE: &str = "ax.yaml";

/// Resolve the state root: explicit override, or `~/.ax`.
pub fn default_state_root() -> PathBuf {
    if let Ok(root) = std::env::var("AX_HOME") {
        return PathBuf::from(root);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    Path::new(&home).join(".ax")
}

/// Load configuration from `<root>/ax.yaml`.
///
/// A missing file yields defaults; an unreadable or malformed file is a
/// fatal configuration error.
pub fn load_config(root: &Path) -> AxResult<AxConfig> {
    let path = root.join(CONFIG_FILE);
    if !path.exists() {
        info!(path = %path.display(), "No config file, using defaults");
        let mut config = AxConfig::default();
        config.state_root = Some(root.to_path_buf());
        return Ok(config);
    }

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| AxError::Config(format!("cannot read {}: {e}", path.display())))?;
    let mut config: AxConfig = serde_yaml::from_str(&contents)
        .map_err(|e| AxError::Config(format!("cannot parse {}: {e}", path.display())))?;

    if config.state_root.is_none() {
        config.state_root = Some(root.to_path_buf());
    }
    info!(path = %path.display(), profile = %config.profile, "Loaded configuration");
    Ok(config)
}

/// Layout of the persisted state under the root.
#[derive(Debug, Clone)]
pub struct StateLayout {
    pub root: PathBuf,
}

impl StateLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn env_file(&self) -> PathBuf {
        self.root.join(".env")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn conversations_db(&self) -> PathBuf {
        self.data_dir().join("conversations.db")
    }

    pub fn memory_db(&self) -> PathBuf {
        self.data_dir().join("memory.db")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.data_dir().join("audit.ndjson")
    }

    pub fn cron_jobs(&self) -> PathBuf {
        self.data_dir().join("cron_jobs.json")
    }

    pub fn workspaces_root(&self) -> PathBuf {
        self.data_dir().join("workspaces")
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.root.join("agents")
    }

    pub fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.agents_dir().join(agent_id)
    }

    pub fn skills_dir(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("skills")
    }

    pub fn ipc_socket(&self) -> PathBuf {
        self.root.join("ipc.sock")
    }

    pub fn proxy_socket(&self) -> PathBuf {
        self.root.join("proxy.sock")
    }

    pub fn api_socket(&self) -> PathBuf {
        self.root.join("api.sock")
    }

    /// Create every directory the host expects.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.workspaces_root())?;
        std::fs::create_dir_all(self.agents_dir())
    }
}
