use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use hearth_db::entities::server_instances;
use hearth_process::{Actor, LogLevel, ServerStatus};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::{
    Error, Result,
    audit::AGENT_SOURCE,
    games::{self, ConfigurationEntryDefinition, GameContext, GameDescriptor, Locale},
    lifecycle::ServerController,
    services::AgentServices,
};

/// Maps controller identifiers to games and caches one controller per
/// server instance.
pub struct ControllerRegistry {
    services: AgentServices,
    games: BTreeMap<&'static str, GameDescriptor>,
    controllers: Mutex<HashMap<Uuid, Arc<ServerController>>>,
}

impl ControllerRegistry {
    pub fn new(services: AgentServices) -> Self {
        let mut registry = Self {
            services,
            games: BTreeMap::new(),
            controllers: Mutex::new(HashMap::new()),
        };
        for game in games::builtin() {
            registry.register(game);
        }
        registry
    }

    /// Adds a game, replacing any previous one with the same identifier.
    pub fn register(&mut self, game: GameDescriptor) -> &mut Self {
        self.games.insert(game.identifier, game);
        self
    }

    pub fn services(&self) -> &AgentServices {
        &self.services
    }

    pub fn supported_controller_identifiers(&self) -> Vec<&'static str> {
        self.games.keys().copied().collect()
    }

    pub fn definitions(&self, identifier: &str, locale: &Locale) -> Result<Vec<ConfigurationEntryDefinition>> {
        let game = self
            .games
            .get(identifier)
            .ok_or_else(|| Error::UnknownController(identifier.to_string()))?;
        Ok((game.definitions)(locale))
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<ServerController>>> {
        self.controllers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the cached controller for `server`, creating it on first use.
    pub fn get_controller(&self, server: &server_instances::Model) -> Result<Arc<ServerController>> {
        if !server.is_active {
            return Err(Error::ServerInactive(server.id));
        }

        let mut cache = self.cache();
        if let Some(c) = cache.get(&server.id) {
            return Ok(c.clone());
        }

        let game = self
            .games
            .get(server.controller_identifier.as_str())
            .ok_or_else(|| Error::UnknownController(server.controller_identifier.clone()))?;

        let ctx = GameContext {
            server_id: server.id,
            title: server.title.clone(),
            install_dir: self.services.config.install_dir(server.id),
            services: self.services.clone(),
        };
        let controller = ServerController::new(ctx.clone(), (game.create)(ctx));
        cache.insert(server.id, controller.clone());

        tracing::debug!(server_id = %server.id, controller = game.identifier, "controller created");
        Ok(controller)
    }

    pub async fn controller_for(&self, server_id: Uuid) -> Result<Arc<ServerController>> {
        let server = server_instances::Entity::find_by_id(server_id)
            .one(&*self.services.db)
            .await?
            .ok_or(Error::ServerNotFound(server_id))?;
        self.get_controller(&server)
    }

    pub fn cached(&self) -> Vec<Arc<ServerController>> {
        self.cache().values().cloned().collect()
    }

    /// Resets servers left in a non-`Stopped` state by a previous agent run.
    /// Their processes died with that agent, so each gets a system-initiated
    /// `Stopped` event.
    pub async fn recover_stale_statuses(&self) -> Result<usize> {
        let stale = server_instances::Entity::find()
            .filter(server_instances::Column::IsActive.eq(true))
            .filter(server_instances::Column::Status.ne(ServerStatus::Stopped.as_str()))
            .all(&*self.services.db)
            .await?;

        let live: Vec<Uuid> = self
            .cached()
            .iter()
            .filter(|c| c.status() != ServerStatus::Stopped)
            .map(|c| c.server_id())
            .collect();

        let mut recovered = 0;
        for server in stale.iter().filter(|s| !live.contains(&s.id)) {
            tracing::warn!(server_id = %server.id, status = %server.status, "resetting stale server status");
            let sink = &self.services.sink;
            sink.persist_status(server.id, ServerStatus::Stopped).await;
            sink.lifetime_event(server.id, ServerStatus::Stopped, None)
                .await;
            sink.log(
                server.id,
                LogLevel::Warning,
                format!("agent restarted while server was {}; marked stopped", server.status),
                AGENT_SOURCE,
            )
            .await;
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Stops every cached controller that is not already stopped. Failures
    /// are logged; returns how many servers were stopped.
    pub async fn stop_all(&self, actor: Option<Actor>) -> usize {
        let mut stopped = 0;
        for controller in self.cached() {
            if controller.status() == ServerStatus::Stopped {
                continue;
            }
            match controller.stop(actor).await {
                Ok(()) => stopped += 1,
                // Raced with another stop or an exit.
                Err(Error::Precondition { .. }) => {}
                Err(err) => {
                    tracing::error!(server_id = %controller.server_id(), error = %err, "stop failed during shutdown");
                }
            }
        }
        stopped
    }
}
