use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.auto-tundra/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub patrol: PatrolConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            cache: CacheConfig::default(),
            agents: AgentsConfig::default(),
            security: SecurityConfig::default(),
            daemon: DaemonConfig::default(),
            ui: UiConfig::default(),
            scheduler: SchedulerConfig::default(),
            patrol: PatrolConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `~/.auto-tundra/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Io(e.to_string()))?;
            let cfg: Config =
                toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(cfg)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text =
            std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".auto-tundra")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub workspace_root: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            log_level: default_log_level(),
            workspace_root: None,
        }
    }
}

fn default_project_name() -> String {
    "auto-tundra".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: String,
    #[serde(default = "default_cache_max_mb")]
    pub max_size_mb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            max_size_mb: default_cache_max_mb(),
        }
    }
}

fn default_cache_path() -> String {
    "~/.auto-tundra/cache.db".into()
}
fn default_cache_max_mb() -> u64 {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "default_max_agents")]
    pub max_concurrent: u32,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval_secs: u64,
    #[serde(default)]
    pub auto_restart: bool,
    /// Command line used to launch a polecat's agent runtime inside its PTY.
    #[serde(default = "default_launch_command")]
    pub launch_command: String,
    #[serde(default)]
    pub launch_args: Vec<String>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_agents(),
            heartbeat_interval_secs: default_heartbeat(),
            auto_restart: false,
            launch_command: default_launch_command(),
            launch_args: Vec::new(),
        }
    }
}

fn default_launch_command() -> String {
    "claude".into()
}

fn default_max_agents() -> u32 {
    8
}
fn default_heartbeat() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub allow_shell_exec: bool,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_shell_exec: false,
            sandbox: true,
            allowed_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_port")]
    pub port: u16,
    #[serde(default = "default_daemon_host")]
    pub host: String,
    #[serde(default)]
    pub tls: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: default_daemon_port(),
            host: default_daemon_host(),
            tls: false,
        }
    }
}

fn default_daemon_port() -> u16 {
    9876
}
fn default_daemon_host() -> String {
    "127.0.0.1".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_ui_theme")]
    pub theme: String,
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,
    #[serde(default)]
    pub show_token_costs: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            theme: default_ui_theme(),
            refresh_ms: default_refresh_ms(),
            show_token_costs: false,
        }
    }
}

fn default_ui_theme() -> String {
    "dark".into()
}
fn default_refresh_ms() -> u64 {
    500
}

/// Capacity scheduler settings (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// `-1` or `0` = direct dispatch (scheduler transparent, callers spawn
    /// inline); positive = cap on concurrent ephemeral workers town-wide and
    /// enables deferred dispatch via context beads.
    #[serde(default = "default_max_polecats")]
    pub max_polecats: i32,
    /// Context beads processed per dispatch-loop invocation.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Dispatch-failure count at which a context bead's circuit trips.
    #[serde(default = "default_max_dispatch_failures")]
    pub max_dispatch_failures: u32,
    /// Backoff base (seconds) for bead-store retry; actual wait is
    /// `attempt * retry_backoff_secs`.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_polecats: default_max_polecats(),
            batch_size: default_batch_size(),
            max_dispatch_failures: default_max_dispatch_failures(),
            retry_backoff_secs: default_retry_backoff_secs(),
        }
    }
}

fn default_max_polecats() -> i32 {
    -1
}
fn default_batch_size() -> usize {
    10
}
fn default_max_dispatch_failures() -> u32 {
    3
}
fn default_retry_backoff_secs() -> u64 {
    2
}

/// Event-driven patrol loop settings (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatrolConfig {
    #[serde(default = "default_patrol_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_patrol_debounce")]
    pub debounce_secs: u64,
}

impl Default for PatrolConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_patrol_interval(),
            debounce_secs: default_patrol_debounce(),
        }
    }
}

fn default_patrol_interval() -> u64 {
    300
}
fn default_patrol_debounce() -> u64 {
    2
}
