use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use hearth_agent::{
    Actor, AgentServices, ControllerRegistry, ServerStatus,
    config::AgentConfig,
    config_store::ConfigurationChange,
    games::{self, Locale},
};
use hearth_migration::{Migrator, MigratorTrait};
use uuid::Uuid;

/// Supervises game server processes and keeps their audit trail.
#[derive(Parser)]
#[command(name = "hearth-agent", version, about, long_about = None)]
struct Cli {
    /// TOML config file (falls back to HEARTH_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations.
    Migrate,
    /// List supported controller identifiers.
    Controllers,
    /// Print the configuration entries a controller understands.
    Definitions {
        controller: String,
        #[arg(long, default_value = "en")]
        locale: String,
    },
    /// Store one configuration value.
    Set {
        server: Uuid,
        realm: String,
        path: String,
        value: String,
        #[arg(long)]
        sensitive: bool,
        #[arg(long)]
        actor: Option<Uuid>,
    },
    /// Install or update the server files and its selected mod pack.
    Install {
        server: Uuid,
        #[arg(long)]
        actor: Option<Uuid>,
    },
    /// Write configuration files from the active entries.
    Configure {
        server: Uuid,
        #[arg(long)]
        actor: Option<Uuid>,
    },
    /// Show status, configuration and recent output of a server.
    Status {
        server: Uuid,
        /// Show sensitive values in clear text.
        #[arg(long)]
        privileged: bool,
        #[arg(long, default_value = "20")]
        logs: u64,
    },
    /// Start servers and supervise them until Ctrl-C or until all exit.
    Run {
        #[arg(required = true)]
        servers: Vec<Uuid>,
        #[arg(long)]
        actor: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AgentConfig::load(cli.config.as_deref())?;
    let _log_guard = hearth_agent::telemetry::init(config.log_dir.as_deref())?;

    match cli.command {
        Command::Controllers => {
            for game in games::builtin() {
                println!("{}", game.identifier);
            }
            Ok(())
        }
        Command::Definitions { controller, locale } => {
            let locale = Locale::new(&locale);
            let game = games::builtin()
                .into_iter()
                .find(|g| g.identifier == controller)
                .ok_or_else(|| hearth_agent::Error::UnknownController(controller.clone()))?;
            for def in (game.definitions)(&locale) {
                println!(
                    "{:<8} {:<24} {:<10} {:<12} {}",
                    def.realm,
                    def.path,
                    def.kind.as_str(),
                    def.group,
                    def.label
                );
            }
            Ok(())
        }
        command => {
            let registry = boot(config).await?;
            run_command(&registry, command).await
        }
    }
}

async fn boot(config: AgentConfig) -> anyhow::Result<ControllerRegistry> {
    let database_url = config
        .database_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required"))?;
    let db = hearth_db::connect(&database_url)
        .await
        .context("connect database")?;

    // Apply migrations on boot (idempotent).
    Migrator::up(&db, None).await?;

    Ok(ControllerRegistry::new(AgentServices::new(Arc::new(db), config)))
}

async fn run_command(registry: &ControllerRegistry, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Migrate => {
            tracing::info!("migrations applied");
        }
        Command::Set {
            server,
            realm,
            path,
            value,
            sensitive,
            actor,
        } => {
            let controller = registry.controller_for(server).await?;
            let mut change = ConfigurationChange::new(realm, path, value);
            if sensitive {
                change = change.sensitive();
            }
            controller
                .set_configuration(vec![change], actor.map(Actor))
                .await?;
        }
        Command::Install { server, actor } => {
            let controller = registry.controller_for(server).await?;
            let mods = controller.install_or_upgrade(actor.map(Actor)).await?;
            for path in mods {
                println!("{}", path.display());
            }
        }
        Command::Configure { server, actor } => {
            let controller = registry.controller_for(server).await?;
            for path in controller.update_configuration(actor.map(Actor)).await? {
                println!("{}", path.display());
            }
        }
        Command::Status {
            server,
            privileged,
            logs,
        } => print_status(registry, server, privileged, logs).await?,
        Command::Run { servers, actor } => supervise(registry, &servers, actor.map(Actor)).await?,
        Command::Controllers | Command::Definitions { .. } => {}
    }
    Ok(())
}

async fn print_status(
    registry: &ControllerRegistry,
    server: Uuid,
    privileged: bool,
    logs: u64,
) -> anyhow::Result<()> {
    let controller = registry.controller_for(server).await?;
    let services = registry.services();

    println!("{} ({})", controller.title(), controller.identifier());
    if let Some(event) = services.sink.lifetime_events(server).await?.last() {
        println!("status: {} since {}", event.status, event.time_stamp);
    }

    println!("configuration:");
    for entry in services.store.display_entries(server, privileged).await? {
        println!("  {}/{} = {}", entry.realm, entry.path, entry.value);
    }

    println!("output:");
    for line in services.sink.recent_logs(server, logs).await? {
        println!(
            "  {} [{}] {}: {}",
            line.time_stamp, line.log_level, line.source, line.message
        );
    }
    Ok(())
}

async fn supervise(registry: &ControllerRegistry, servers: &[Uuid], actor: Option<Actor>) -> anyhow::Result<()> {
    let recovered = registry.recover_stale_statuses().await?;
    if recovered > 0 {
        tracing::warn!(recovered, "reset servers left running by a previous agent");
    }

    let mut controllers = Vec::with_capacity(servers.len());
    for id in servers {
        let controller = registry.controller_for(*id).await?;
        if let Err(err) = controller.start(actor).await {
            registry.stop_all(actor).await;
            return Err(err).with_context(|| format!("start server {id}"));
        }
        tracing::info!(server_id = %id, title = controller.title(), "server running");
        controllers.push(controller);
    }

    let all_exited = futures_util::future::join_all(controllers.iter().map(|c| {
        let mut rx = c.subscribe();
        async move {
            let _ = rx.wait_for(|s| *s == ServerStatus::Stopped).await;
        }
    }));

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("listen for ctrl-c")?;
            tracing::info!("shutdown requested");
        }
        _ = all_exited => {
            tracing::info!("all servers exited");
        }
    }

    let stopped = registry.stop_all(actor).await;
    tracing::info!(stopped, "agent stopped");
    Ok(())
}
