//! Shared fixtures for unit tests.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use hearth_db::entities::{mod_packs, server_instances};
use hearth_migration::{Migrator, MigratorTrait};
use hearth_process::{Actor, ServerStatus};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Set};
use uuid::Uuid;

use crate::{
    config::{AgentConfig, SteamCredentials},
    config_store::ActiveConfiguration,
    games::{
        ConfigurationEntryDefinition, EntryKind, GameContext, GameController, GameDescriptor,
        GamePolicy, Locale,
    },
    process::LaunchSpec,
    services::AgentServices,
};

pub(crate) const STUB_IDENTIFIER: &str = "stub";
pub(crate) const STUB_APP_ID: u32 = 4242;

pub(crate) async fn memory_db() -> Arc<DatabaseConnection> {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    // One connection, otherwise every pool member sees its own empty database.
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opts).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    Arc::new(db)
}

pub(crate) async fn insert_server(db: &DatabaseConnection, controller: &str) -> server_instances::Model {
    insert_server_with_status(db, controller, ServerStatus::Stopped).await
}

pub(crate) async fn insert_server_with_status(
    db: &DatabaseConnection,
    controller: &str,
    status: ServerStatus,
) -> server_instances::Model {
    let id = Uuid::new_v4();
    server_instances::Entity::insert(server_instances::ActiveModel {
        id: Set(id),
        title: Set(format!("Server {}", &id.to_string()[..8])),
        controller_identifier: Set(controller.to_string()),
        status: Set(status.as_str().to_string()),
        selected_mod_pack_id: Set(None),
        active_mod_pack_id: Set(None),
        created_at: Set(Utc::now().into()),
        upgraded_at: Set(None),
        is_active: Set(true),
    })
    .exec(db)
    .await
    .unwrap();

    server_instances::Entity::find_by_id(id)
        .one(db)
        .await
        .unwrap()
        .unwrap()
}

pub(crate) async fn insert_mod_pack(db: &DatabaseConnection, html: &str) -> mod_packs::Model {
    let id = Uuid::new_v4();
    mod_packs::Entity::insert(mod_packs::ActiveModel {
        id: Set(id),
        title: Set("Test pack".to_string()),
        html: Set(html.to_string()),
        is_active: Set(true),
        created_at: Set(Utc::now().into()),
    })
    .exec(db)
    .await
    .unwrap();

    mod_packs::Entity::find_by_id(id).one(db).await.unwrap().unwrap()
}

pub(crate) async fn set_mod_packs(
    db: &DatabaseConnection,
    server_id: Uuid,
    selected: Option<Uuid>,
    active: Option<Uuid>,
) {
    server_instances::Entity::update(server_instances::ActiveModel {
        id: Set(server_id),
        selected_mod_pack_id: Set(selected),
        active_mod_pack_id: Set(active),
        ..Default::default()
    })
    .exec(db)
    .await
    .unwrap();
}

pub(crate) async fn exec(db: &DatabaseConnection, sql: &str) {
    db.execute_unprepared(sql).await.unwrap();
}

pub(crate) async fn server_row(db: &DatabaseConnection, id: Uuid) -> server_instances::Model {
    server_instances::Entity::find_by_id(id)
        .one(db)
        .await
        .unwrap()
        .unwrap()
}

/// Fast timings, no tool cooldown, and a complete set of Steam credentials.
pub(crate) fn test_config(root: &Path) -> AgentConfig {
    let mut cfg = AgentConfig {
        data_root: root.to_path_buf(),
        steam: Some(SteamCredentials {
            username: "ops".to_string(),
            password: "hunter2".to_string(),
        }),
        ..AgentConfig::default()
    };
    cfg.lifecycle.start_grace_ms = 200;
    cfg.lifecycle.stop_poll_ms = 20;
    cfg.lifecycle.stop_timeout_ms = 2_000;
    cfg.lifecycle.kill_grace_ms = 2_000;
    cfg.tool.cooldown_ms = 0;
    cfg.sink.backoff_ms = 0;
    cfg
}

pub(crate) fn services(db: Arc<DatabaseConnection>, config: AgentConfig) -> AgentServices {
    AgentServices::new(db, config)
}

/// Writes an executable `steamcmd-stub.sh` with the given shell body.
#[cfg(unix)]
pub(crate) fn tool_stub(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("steamcmd-stub.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StubBehavior {
    /// Prints a line and sleeps until signalled.
    Sleep,
    /// Dies inside the start grace period.
    ExitImmediately,
    /// Ignores SIGTERM so only a kill gets rid of it.
    IgnoreTerm,
}

/// Game whose "server" is a shell one-liner.
pub(crate) struct StubGame {
    ctx: GameContext,
    behavior: StubBehavior,
}

impl StubGame {
    pub(crate) fn new(ctx: GameContext, behavior: StubBehavior) -> Arc<dyn GameController> {
        Arc::new(Self { ctx, behavior })
    }

    pub(crate) fn create(ctx: GameContext) -> Arc<dyn GameController> {
        Self::new(ctx, StubBehavior::Sleep)
    }

    pub(crate) fn descriptor() -> GameDescriptor {
        GameDescriptor {
            identifier: STUB_IDENTIFIER,
            create: Self::create,
            definitions: stub_definitions,
        }
    }
}

fn stub_definitions(_locale: &Locale) -> Vec<ConfigurationEntryDefinition> {
    vec![
        ConfigurationEntryDefinition::new("server", "password", EntryKind::Password, "Password"),
        ConfigurationEntryDefinition::new("server", "hostname", EntryKind::String, "Hostname"),
    ]
}

#[async_trait]
impl GameController for StubGame {
    fn identifier(&self) -> &'static str {
        STUB_IDENTIFIER
    }

    fn policy(&self) -> GamePolicy {
        GamePolicy {
            server_app_id: STUB_APP_ID,
            workshop_app_id: None,
            install_requires_login: false,
            workshop_requires_purchase: false,
        }
    }

    fn configuration_entry_definitions(&self, locale: &Locale) -> Vec<ConfigurationEntryDefinition> {
        stub_definitions(locale)
    }

    async fn build_launch_spec(
        &self,
        _active: &ActiveConfiguration,
        _actor: Option<Actor>,
    ) -> anyhow::Result<LaunchSpec> {
        let script = match self.behavior {
            StubBehavior::Sleep => "echo started; exec sleep 30",
            StubBehavior::ExitImmediately => "echo fatal >&2; exit 3",
            StubBehavior::IgnoreTerm => "trap '' TERM; echo started; exec sleep 30",
        };
        Ok(LaunchSpec::new("/bin/sh", std::env::temp_dir()).args(["-c", script]))
    }

    async fn materialize_config_files(&self) -> anyhow::Result<Vec<PathBuf>> {
        let path = self.ctx.install_dir.join("stub.cfg");
        tokio::fs::create_dir_all(&self.ctx.install_dir).await?;
        tokio::fs::write(&path, b"").await?;
        Ok(vec![path])
    }

    async fn on_install_or_upgrade(&self, _actor: Option<Actor>) -> anyhow::Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}
