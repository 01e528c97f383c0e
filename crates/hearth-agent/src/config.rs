use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use uuid::Uuid;

const DEFAULT_START_GRACE_MS: u64 = 1000;
const DEFAULT_STOP_POLL_MS: u64 = 250;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_KILL_GRACE_MS: u64 = 5000;
const DEFAULT_TOOL_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_TOOL_COOLDOWN_MS: u64 = 60_000;
const DEFAULT_SINK_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_SINK_BACKOFF_MS: u64 = 100;

pub(crate) fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

pub(crate) fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u32>().ok())
}

/// Timing knobs for the lifecycle state machine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long a freshly spawned process must survive to count as started.
    pub start_grace_ms: u64,
    pub stop_poll_ms: u64,
    /// Time allowed for a graceful stop before escalating to a kill.
    pub stop_timeout_ms: u64,
    /// Time to wait for the exit after a kill before giving up on it.
    pub kill_grace_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            start_grace_ms: DEFAULT_START_GRACE_MS,
            stop_poll_ms: DEFAULT_STOP_POLL_MS,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
        }
    }
}

impl LifecycleConfig {
    pub fn start_grace(&self) -> Duration {
        Duration::from_millis(self.start_grace_ms)
    }

    pub fn stop_poll(&self) -> Duration {
        Duration::from_millis(self.stop_poll_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Explicit SteamCMD entrypoint. When unset the agent bootstraps its own copy.
    pub steamcmd_path: Option<PathBuf>,
    pub max_attempts: u32,
    pub cooldown_ms: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            steamcmd_path: None,
            max_attempts: DEFAULT_TOOL_MAX_ATTEMPTS,
            cooldown_ms: DEFAULT_TOOL_COOLDOWN_MS,
        }
    }
}

impl ToolConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_SINK_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_SINK_BACKOFF_MS,
        }
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct SteamCredentials {
    pub username: String,
    pub password: String,
}

impl SteamCredentials {
    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for SteamCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SteamCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub database_url: Option<String>,
    pub data_root: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub steam: Option<SteamCredentials>,
    pub lifecycle: LifecycleConfig,
    pub tool: ToolConfig,
    pub sink: SinkConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            data_root: PathBuf::from("./data"),
            log_dir: None,
            steam: None,
            lifecycle: LifecycleConfig::default(),
            tool: ToolConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Loads the optional TOML file, then applies `HEARTH_*` / `DATABASE_URL`
    /// overrides from the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env_string("HEARTH_CONFIG").map(PathBuf::from));

        let mut cfg = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(&p)
                    .with_context(|| format!("read config {}", p.display()))?;
                Self::from_toml(&raw).with_context(|| format!("parse config {}", p.display()))?
            }
            None => Self::default(),
        };
        cfg.apply_env();
        cfg.clamp();
        Ok(cfg)
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let mut cfg: Self = toml::from_str(raw)?;
        cfg.clamp();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_string("DATABASE_URL") {
            self.database_url = Some(v);
        }
        if let Some(v) = env_string("HEARTH_DATA_ROOT") {
            self.data_root = PathBuf::from(v);
        }
        if let Some(v) = env_string("HEARTH_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env_string("HEARTH_STEAMCMD_PATH") {
            self.tool.steamcmd_path = Some(PathBuf::from(v));
        }
        if let Some(user) = env_string("HEARTH_STEAM_USERNAME") {
            let steam = self.steam.get_or_insert_with(SteamCredentials::default);
            steam.username = user;
        }
        if let Ok(pass) = std::env::var("HEARTH_STEAM_PASSWORD")
            && !pass.is_empty()
        {
            let steam = self.steam.get_or_insert_with(SteamCredentials::default);
            steam.password = pass;
        }

        if let Some(v) = env_u64("HEARTH_START_GRACE_MS") {
            self.lifecycle.start_grace_ms = v;
        }
        if let Some(v) = env_u64("HEARTH_STOP_POLL_MS") {
            self.lifecycle.stop_poll_ms = v;
        }
        if let Some(v) = env_u64("HEARTH_STOP_TIMEOUT_MS") {
            self.lifecycle.stop_timeout_ms = v;
        }
        if let Some(v) = env_u64("HEARTH_KILL_GRACE_MS") {
            self.lifecycle.kill_grace_ms = v;
        }
        if let Some(v) = env_u32("HEARTH_TOOL_MAX_ATTEMPTS") {
            self.tool.max_attempts = v;
        }
        if let Some(v) = env_u64("HEARTH_TOOL_COOLDOWN_MS") {
            self.tool.cooldown_ms = v;
        }
        if let Some(v) = env_u32("HEARTH_SINK_MAX_ATTEMPTS") {
            self.sink.max_attempts = v;
        }
        if let Some(v) = env_u64("HEARTH_SINK_BACKOFF_MS") {
            self.sink.backoff_ms = v;
        }
    }

    fn clamp(&mut self) {
        let l = &mut self.lifecycle;
        l.start_grace_ms = l.start_grace_ms.clamp(0, 60_000);
        l.stop_poll_ms = l.stop_poll_ms.clamp(1, 10_000);
        l.stop_timeout_ms = l.stop_timeout_ms.clamp(0, 30 * 60 * 1000);
        l.kill_grace_ms = l.kill_grace_ms.clamp(100, 60_000);

        self.tool.max_attempts = self.tool.max_attempts.clamp(1, 20);
        self.tool.cooldown_ms = self.tool.cooldown_ms.clamp(0, 60 * 60 * 1000);

        self.sink.max_attempts = self.sink.max_attempts.clamp(1, 20);
        self.sink.backoff_ms = self.sink.backoff_ms.clamp(0, 60_000);
    }

    pub fn install_dir(&self, server_id: Uuid) -> PathBuf {
        self.data_root.join("servers").join(server_id.to_string())
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_root.join("cache")
    }

    pub fn steam_credentials(&self) -> Option<&SteamCredentials> {
        self.steam.as_ref().filter(|c| c.is_complete())
    }
}
