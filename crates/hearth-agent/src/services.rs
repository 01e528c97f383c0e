use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    audit::AuditSink,
    config::AgentConfig,
    config_store::ConfigStore,
    retry::RetryPolicy,
    tool_runner::{ToolRunner, ToolRunnerOptions},
};

/// Shared collaborators handed to every controller. Cheap to clone.
#[derive(Clone)]
pub struct AgentServices {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AgentConfig>,
    pub store: ConfigStore,
    pub sink: AuditSink,
    pub tool: Arc<ToolRunner>,
}

impl AgentServices {
    pub fn new(db: Arc<DatabaseConnection>, config: AgentConfig) -> Self {
        let sink = AuditSink::new(
            db.clone(),
            RetryPolicy::new(config.sink.max_attempts, config.sink.backoff_ms),
        );
        let tool = ToolRunner::new(
            ToolRunnerOptions {
                program: config.tool.steamcmd_path.clone(),
                cache_dir: config.cache_dir(),
                max_attempts: config.tool.max_attempts,
                cooldown: config.tool.cooldown(),
            },
            sink.clone(),
        );

        Self {
            store: ConfigStore::new(db.clone()),
            sink,
            tool: Arc::new(tool),
            config: Arc::new(config),
            db,
        }
    }
}
