use std::sync::Arc;

use chrono::{DateTime, Utc};
use hearth_db::entities::{lifetime_events, server_instances, server_logs};
use hearth_process::{Actor, LogLevel, ServerStatus};
use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::retry::{RetryPolicy, with_retry};

/// Source tag for lines the agent writes about itself.
pub const AGENT_SOURCE: &str = "hearth-agent";

/// Durable, best-effort sink for server output and lifecycle transitions.
///
/// Writes are retried a bounded number of times and then dropped with a
/// local `tracing` record; no method here ever returns a write error.
#[derive(Clone)]
pub struct AuditSink {
    db: Arc<DatabaseConnection>,
    policy: RetryPolicy,
}

impl AuditSink {
    pub fn new(db: Arc<DatabaseConnection>, policy: RetryPolicy) -> Self {
        Self { db, policy }
    }

    pub async fn append(
        &self,
        server_id: Uuid,
        level: LogLevel,
        message: impl Into<String>,
        source: &str,
        timestamp: DateTime<Utc>,
    ) {
        let model = server_logs::ActiveModel {
            id: NotSet,
            server_instance_id: Set(server_id),
            time_stamp: Set(timestamp.into()),
            log_level: Set(level.as_str().to_string()),
            message: Set(message.into()),
            source: Set(source.to_string()),
        };

        let res = with_retry(self.policy, |_| {
            let model = model.clone();
            async move { server_logs::Entity::insert(model).exec(&*self.db).await }
        })
        .await;

        if let Err(err) = res {
            tracing::warn!(
                %err,
                %server_id,
                source,
                attempts = self.policy.max_attempts,
                "dropping server log line"
            );
        }
    }

    /// Same as [`append`](Self::append), stamped with the current time.
    pub async fn log(&self, server_id: Uuid, level: LogLevel, message: impl Into<String>, source: &str) {
        self.append(server_id, level, message, source, Utc::now()).await;
    }

    pub async fn lifetime_event(
        &self,
        server_id: Uuid,
        status: ServerStatus,
        executed_by: Option<Actor>,
    ) {
        let model = lifetime_events::ActiveModel {
            id: NotSet,
            server_instance_id: Set(server_id),
            time_stamp: Set(Utc::now().into()),
            status: Set(status.as_str().to_string()),
            executed_by: Set(executed_by.map(|a| a.0)),
        };

        let res = with_retry(self.policy, |_| {
            let model = model.clone();
            async move { lifetime_events::Entity::insert(model).exec(&*self.db).await }
        })
        .await;

        if let Err(err) = res {
            tracing::error!(
                %err,
                %server_id,
                %status,
                attempts = self.policy.max_attempts,
                "failed to record lifetime event"
            );
        }
    }

    /// Mirrors the in-memory status into `server_instances.status`.
    pub async fn persist_status(&self, server_id: Uuid, status: ServerStatus) {
        let res = with_retry(self.policy, |_| async move {
            server_instances::Entity::update_many()
                .col_expr(
                    server_instances::Column::Status,
                    sea_orm::sea_query::Expr::value(status.as_str()),
                )
                .filter(server_instances::Column::Id.eq(server_id))
                .exec(&*self.db)
                .await
        })
        .await;

        if let Err(err) = res {
            tracing::error!(%err, %server_id, %status, "failed to persist server status");
        }
    }

    pub async fn lifetime_events(&self, server_id: Uuid) -> Result<Vec<lifetime_events::Model>, DbErr> {
        lifetime_events::Entity::find()
            .filter(lifetime_events::Column::ServerInstanceId.eq(server_id))
            .order_by_asc(lifetime_events::Column::Id)
            .all(&*self.db)
            .await
    }

    /// The newest `limit` log lines, oldest first.
    pub async fn recent_logs(&self, server_id: Uuid, limit: u64) -> Result<Vec<server_logs::Model>, DbErr> {
        let mut rows = server_logs::Entity::find()
            .filter(server_logs::Column::ServerInstanceId.eq(server_id))
            .order_by_desc(server_logs::Column::Id)
            .limit(limit)
            .all(&*self.db)
            .await?;
        rows.reverse();
        Ok(rows)
    }
}
