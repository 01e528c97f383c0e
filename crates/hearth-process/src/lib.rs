use std::{fmt, str::FromStr};

/// Opaque identity of whoever triggered a mutating call.
///
/// `None` wherever an `Option<Actor>` is expected means the agent itself
/// (crash handling, boot recovery).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Actor(pub uuid::Uuid);

impl Actor {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for Actor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ServerStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ServerStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ServerStatus::Stopped => "stopped",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
        }
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// `Running -> Stopped` is only taken by the exit handler when the
    /// process dies on its own.
    pub fn can_transition_to(self, next: ServerStatus) -> bool {
        matches!(
            (self, next),
            (ServerStatus::Stopped, ServerStatus::Starting)
                | (ServerStatus::Starting, ServerStatus::Running)
                | (ServerStatus::Starting, ServerStatus::Stopped)
                | (ServerStatus::Running, ServerStatus::Stopping)
                | (ServerStatus::Running, ServerStatus::Stopped)
                | (ServerStatus::Stopping, ServerStatus::Stopped)
        )
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stopped" => Ok(ServerStatus::Stopped),
            "starting" => Ok(ServerStatus::Starting),
            "running" => Ok(ServerStatus::Running),
            "stopping" => Ok(ServerStatus::Stopping),
            other => Err(format!("unknown server status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Operation {
    Start,
    Stop,
    InstallOrUpgrade,
    UpdateConfiguration,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::InstallOrUpgrade => "install_or_upgrade",
            Operation::UpdateConfiguration => "update_configuration",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" | "information" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_is_unique() {
        assert_ne!(Actor::new(), Actor::new());
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            ServerStatus::Stopped,
            ServerStatus::Starting,
            ServerStatus::Running,
            ServerStatus::Stopping,
        ] {
            assert_eq!(s.as_str().parse::<ServerStatus>().unwrap(), s);
        }
        assert!("crashed".parse::<ServerStatus>().is_err());
    }

    #[test]
    fn no_transition_skips_starting() {
        assert!(!ServerStatus::Stopped.can_transition_to(ServerStatus::Running));
        assert!(!ServerStatus::Stopped.can_transition_to(ServerStatus::Stopping));
        assert!(!ServerStatus::Stopping.can_transition_to(ServerStatus::Running));
        assert!(ServerStatus::Running.can_transition_to(ServerStatus::Stopped));
    }

    #[test]
    fn log_level_accepts_long_names() {
        assert_eq!("Information".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
    }
}
