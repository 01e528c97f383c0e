use std::{
    fmt,
    path::PathBuf,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use hearth_db::entities::server_instances;
use hearth_process::{Actor, LogLevel, Operation, ServerStatus};
use sea_orm::{EntityTrait, Set};
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

use crate::{
    Error, Result,
    audit::AGENT_SOURCE,
    config_store::ConfigurationChange,
    games::{ConfigurationEntryDefinition, EntryKind, GameContext, GameController, Locale},
    process,
    services::AgentServices,
    tool_runner::ToolInvocation,
};

#[derive(Default)]
pub struct OperationGate {
    lock: tokio::sync::Mutex<()>,
    holders: AtomicUsize,
    peak: AtomicUsize,
}

pub struct GateGuard<'a> {
    gate: &'a OperationGate,
    _guard: tokio::sync::MutexGuard<'a, ()>,
}

impl OperationGate {
    pub async fn acquire(&self) -> GateGuard<'_> {
        let guard = self.lock.lock().await;
        let holders = self.holders.fetch_add(1, Ordering::SeqCst) + 1;
        debug_assert_eq!(holders, 1, "operation gate entered twice");
        self.peak.fetch_max(holders, Ordering::SeqCst);
        GateGuard {
            gate: self,
            _guard: guard,
        }
    }

    pub fn is_held(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.holders.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitRecord {
    pub code: Option<i32>,
    pub at: DateTime<Utc>,
}

impl ExitRecord {
    fn describe_code(&self) -> String {
        self.code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none (signalled)".to_string())
    }
}

struct RunningProcess {
    generation: u64,
    pid: Option<u32>,
    exit: Option<ExitRecord>,
    kill: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct Runtime {
    status: ServerStatus,
    generation: u64,
    process: Option<RunningProcess>,
    last_exit: Option<ExitRecord>,
}

// Taken under one lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSnapshot {
    pub server_id: Uuid,
    pub status: ServerStatus,
    pub pid: Option<u32>,
    pub busy: bool,
    pub can_start: bool,
    pub can_stop: bool,
    pub last_exit: Option<ExitRecord>,
}

/// Lifecycle state machine of one server instance.
///
/// The `can_*` predicates are hints only: the real precondition check
/// happens after the gate is acquired, so a `true` hint may still end in
/// [`Error::Precondition`].
pub struct ServerController {
    server_id: Uuid,
    title: String,
    install_dir: PathBuf,
    game: Arc<dyn GameController>,
    services: AgentServices,
    gate: OperationGate,
    runtime: Mutex<Runtime>,
    status_tx: watch::Sender<ServerStatus>,
}

impl fmt::Debug for ServerController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerController")
            .field("server_id", &self.server_id)
            .field("identifier", &self.game.identifier())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ServerController {
    pub fn new(ctx: GameContext, game: Arc<dyn GameController>) -> Arc<Self> {
        let (status_tx, _) = watch::channel(ServerStatus::Stopped);
        Arc::new(Self {
            server_id: ctx.server_id,
            title: ctx.title,
            install_dir: ctx.install_dir,
            game,
            services: ctx.services,
            gate: OperationGate::default(),
            runtime: Mutex::new(Runtime::default()),
            status_tx,
        })
    }

    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn identifier(&self) -> &'static str {
        self.game.identifier()
    }

    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> ServerStatus {
        self.runtime().status
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.status_tx.subscribe()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let rt = self.runtime();
        let busy = self.gate.is_held();
        let stopped = rt.status == ServerStatus::Stopped;
        ControllerSnapshot {
            server_id: self.server_id,
            status: rt.status,
            pid: rt
                .process
                .as_ref()
                .filter(|p| p.exit.is_none())
                .and_then(|p| p.pid),
            busy,
            can_start: stopped && !busy,
            can_stop: !stopped && !busy,
            last_exit: rt.last_exit,
        }
    }

    pub fn can_start(&self) -> bool {
        self.snapshot().can_start
    }

    pub fn can_stop(&self) -> bool {
        self.snapshot().can_stop
    }

    pub fn can_install_or_upgrade(&self) -> bool {
        self.can_start()
    }

    pub fn can_update_configuration(&self) -> bool {
        self.can_start()
    }

    pub fn is_running(&self) -> bool {
        self.status() == ServerStatus::Running
    }

    pub fn max_concurrent_operations(&self) -> usize {
        self.gate.peak()
    }

    pub fn configuration_entry_definitions(&self, locale: &Locale) -> Vec<ConfigurationEntryDefinition> {
        self.game.configuration_entry_definitions(locale)
    }

    pub async fn set_configuration(
        &self,
        mut changes: Vec<ConfigurationChange>,
        actor: Option<Actor>,
    ) -> Result<()> {
        let defs = self.game.configuration_entry_definitions(&Locale::default());
        for change in &mut changes {
            let is_password = defs
                .iter()
                .any(|d| d.realm == change.realm && d.path == change.path && d.kind == EntryKind::Password);
            if is_password {
                change.is_sensitive = true;
            }
        }
        self.services
            .store
            .set_many(self.server_id, &changes, actor)
            .await?;
        Ok(())
    }

    pub async fn start(self: &Arc<Self>, actor: Option<Actor>) -> Result<()> {
        let _gate = self.gate.acquire().await;
        self.ensure_stopped(Operation::Start)?;

        self.transition(ServerStatus::Starting, actor).await;
        match self.launch(actor).await {
            Ok(pid) => {
                self.transition(ServerStatus::Running, actor).await;
                self.log(LogLevel::Info, format!("server started (pid {})", describe_pid(pid)))
                    .await;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(server_id = %self.server_id, error = %err, "start failed");
                self.log(LogLevel::Error, format!("start failed: {err}")).await;
                self.force_kill().await;
                self.transition(ServerStatus::Stopped, actor).await;
                Err(err)
            }
        }
    }

    pub async fn stop(&self, actor: Option<Actor>) -> Result<()> {
        let _gate = self.gate.acquire().await;
        let status = self.status();
        if status == ServerStatus::Stopped {
            return Err(Error::Precondition {
                operation: Operation::Stop,
                status,
            });
        }

        self.transition(ServerStatus::Stopping, actor).await;
        self.terminate().await;
        self.force_kill().await;
        self.transition(ServerStatus::Stopped, actor).await;
        Ok(())
    }

    pub async fn install_or_upgrade(&self, actor: Option<Actor>) -> Result<Vec<PathBuf>> {
        let _gate = self.gate.acquire().await;
        self.ensure_stopped(Operation::InstallOrUpgrade)?;

        let policy = self.game.policy();
        tokio::fs::create_dir_all(&self.install_dir)
            .await
            .with_context(|| format!("create install dir {}", self.install_dir.display()))?;
        self.log(
            LogLevel::Info,
            format!(
                "installing app {} into {}",
                policy.server_app_id,
                self.install_dir.display()
            ),
        )
        .await;

        let inv = ToolInvocation::new(
            self.server_id,
            [
                "+app_update".to_string(),
                policy.server_app_id.to_string(),
                "validate".to_string(),
            ],
        )
        .in_dir(&self.install_dir);
        self.services
            .tool
            .run(
                &inv,
                policy.install_requires_login,
                self.services.config.steam_credentials(),
            )
            .await?;

        let mods = self.game.on_install_or_upgrade(actor).await?;
        self.record_upgrade().await?;

        self.log(
            LogLevel::Info,
            format!("install finished with {} mod item(s)", mods.len()),
        )
        .await;
        Ok(mods)
    }

    pub async fn update_configuration(&self, actor: Option<Actor>) -> Result<Vec<PathBuf>> {
        let _gate = self.gate.acquire().await;
        self.ensure_stopped(Operation::UpdateConfiguration)?;

        let written = self.game.materialize_config_files().await?;
        tracing::info!(server_id = %self.server_id, files = written.len(), actor = ?actor, "configuration materialized");
        self.log(
            LogLevel::Info,
            format!("wrote {} configuration file(s)", written.len()),
        )
        .await;
        Ok(written)
    }

    fn ensure_stopped(&self, operation: Operation) -> Result<()> {
        let status = self.status();
        if status != ServerStatus::Stopped {
            return Err(Error::Precondition { operation, status });
        }
        Ok(())
    }

    async fn transition(&self, to: ServerStatus, actor: Option<Actor>) {
        let from = {
            let mut rt = self.runtime();
            std::mem::replace(&mut rt.status, to)
        };
        if !from.can_transition_to(to) {
            tracing::warn!(server_id = %self.server_id, %from, %to, "unexpected status transition");
        }
        self.status_tx.send_replace(to);
        tracing::info!(server_id = %self.server_id, %from, %to, "status changed");

        self.services.sink.persist_status(self.server_id, to).await;
        self.services
            .sink
            .lifetime_event(self.server_id, to, actor)
            .await;
    }

    async fn log(&self, level: LogLevel, message: String) {
        self.services
            .sink
            .log(self.server_id, level, message, AGENT_SOURCE)
            .await;
    }

    async fn launch(self: &Arc<Self>, actor: Option<Actor>) -> Result<Option<u32>> {
        let active = self
            .services
            .store
            .active_configuration(self.server_id)
            .await?;
        let spec = self.game.build_launch_spec(&active, actor).await?;
        self.log(LogLevel::Info, format!("launching {spec}")).await;

        let mut child = process::spawn(&spec).map_err(|e| Error::ProcessStart(format!("{e:#}")))?;
        let pid = child.id();

        if let Some(out) = child.stdout.take() {
            process::pump_lines(
                out,
                self.services.sink.clone(),
                self.server_id,
                LogLevel::Info,
                self.title.clone(),
            );
        }
        if let Some(err) = child.stderr.take() {
            process::pump_lines(
                err,
                self.services.sink.clone(),
                self.server_id,
                LogLevel::Warning,
                self.title.clone(),
            );
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let generation = {
            let mut rt = self.runtime();
            rt.generation += 1;
            rt.process = Some(RunningProcess {
                generation: rt.generation,
                pid,
                exit: None,
                kill: Some(kill_tx),
            });
            rt.generation
        };

        // Owns the child; fires no matter which path ends the process.
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let res = tokio::select! {
                r = child.wait() => r,
                _ = kill_rx => {
                    child.start_kill().ok();
                    child.wait().await
                }
            };
            let code = match res {
                Ok(status) => status.code(),
                Err(err) => {
                    tracing::warn!(server_id = %this.server_id, %err, "failed to wait for server process");
                    None
                }
            };
            this.on_process_exit(generation, code).await;
        });

        let grace = self.services.config.lifecycle.start_grace();
        tokio::time::sleep(grace).await;
        if let Some(exit) = self.exit_of(generation) {
            return Err(Error::ProcessStart(format!(
                "process exited within {}ms with code {}",
                grace.as_millis(),
                exit.describe_code()
            )));
        }
        Ok(pid)
    }

    async fn on_process_exit(self: Arc<Self>, generation: u64, code: Option<i32>) {
        let record = ExitRecord {
            code,
            at: Utc::now(),
        };
        {
            let mut rt = self.runtime();
            if let Some(p) = rt.process.as_mut()
                && p.generation == generation
            {
                p.exit = Some(record);
            }
            rt.last_exit = Some(record);
        }

        tracing::info!(server_id = %self.server_id, exit_code = ?code, "server process exited");
        let level = if code == Some(0) {
            LogLevel::Info
        } else {
            LogLevel::Warning
        };
        self.log(
            level,
            format!(
                "process exited with code {} at {}",
                record.describe_code(),
                record.at.to_rfc3339()
            ),
        )
        .await;

        // Start and Stop notice the exit themselves while they hold the gate;
        // only a death while Running is left for us.
        let _gate = self.gate.acquire().await;
        let crashed = {
            let mut rt = self.runtime();
            let current = rt
                .process
                .as_ref()
                .is_some_and(|p| p.generation == generation);
            if current && rt.status == ServerStatus::Running {
                rt.process = None;
                true
            } else {
                false
            }
        };
        if crashed {
            tracing::warn!(server_id = %self.server_id, exit_code = ?code, "server process died unexpectedly");
            self.transition(ServerStatus::Stopped, None).await;
        }
    }

    fn exit_of(&self, generation: u64) -> Option<ExitRecord> {
        let rt = self.runtime();
        rt.process
            .as_ref()
            .filter(|p| p.generation == generation)
            .and_then(|p| p.exit)
    }

    async fn wait_for_exit(&self, generation: u64, timeout: Duration) -> bool {
        let poll = self.services.config.lifecycle.stop_poll();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.exit_of(generation).is_some() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(poll).await;
        }
    }

    // Game hook, SIGTERM to the group, then poll.
    async fn terminate(&self) {
        let target = {
            let rt = self.runtime();
            rt.process
                .as_ref()
                .filter(|p| p.exit.is_none())
                .and_then(|p| p.pid.map(|pid| (p.generation, pid)))
        };
        let Some((generation, pid)) = target else {
            return;
        };

        if let Err(err) = self.game.on_stop(pid).await {
            tracing::warn!(server_id = %self.server_id, error = %err, "stop hook failed");
            self.log(LogLevel::Warning, format!("stop hook failed: {err:#}"))
                .await;
        }

        if let Err(err) = process::terminate_group(pid) {
            tracing::warn!(server_id = %self.server_id, pid, %err, "graceful termination failed");
            self.log(
                LogLevel::Warning,
                format!("graceful termination failed: {err}"),
            )
            .await;
            return;
        }

        let timeout = self.services.config.lifecycle.stop_timeout();
        if !self.wait_for_exit(generation, timeout).await {
            self.log(
                LogLevel::Warning,
                format!(
                    "process did not exit within {}ms; killing",
                    timeout.as_millis()
                ),
            )
            .await;
        }
    }

    async fn force_kill(&self) {
        let target = {
            let mut rt = self.runtime();
            match rt.process.as_mut() {
                Some(p) if p.exit.is_none() => Some((p.generation, p.pid, p.kill.take())),
                _ => None,
            }
        };

        if let Some((generation, pid, kill)) = target {
            if let Some(pid) = pid
                && let Err(err) = process::kill_group(pid)
            {
                tracing::debug!(server_id = %self.server_id, pid, %err, "group kill failed");
            }
            if let Some(tx) = kill {
                let _ = tx.send(());
            }
            if !self
                .wait_for_exit(generation, self.services.config.lifecycle.kill_grace())
                .await
            {
                tracing::error!(server_id = %self.server_id, pid = ?pid, "process did not exit after kill");
                self.log(
                    LogLevel::Error,
                    "process did not exit after kill".to_string(),
                )
                .await;
            }
        }

        self.runtime().process = None;
    }

    async fn record_upgrade(&self) -> Result<()> {
        let db = &*self.services.db;
        let server = server_instances::Entity::find_by_id(self.server_id)
            .one(db)
            .await?
            .ok_or(Error::ServerNotFound(self.server_id))?;

        server_instances::Entity::update(server_instances::ActiveModel {
            id: Set(self.server_id),
            active_mod_pack_id: Set(server.selected_mod_pack_id),
            upgraded_at: Set(Some(Utc::now().into())),
            ..Default::default()
        })
        .exec(db)
        .await?;
        Ok(())
    }
}

fn describe_pid(pid: Option<u32>) -> String {
    pid.map(|p| p.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
