use std::{
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use anyhow::Context;
use async_trait::async_trait;
use hearth_db::entities::{mod_packs, server_instances};
use hearth_process::Actor;
use regex::Regex;
use sea_orm::EntityTrait;
use tokio::io::AsyncWriteExt;

use super::{
    ConfigurationEntryDefinition as Def, EntryKind, GameContext, GameController, GameDescriptor,
    GamePolicy, Locale, find_definition,
};
use crate::{
    config_store::ActiveConfiguration, error::ConfigurationError, process::LaunchSpec,
    tool_runner::ToolInvocation,
};

pub const IDENTIFIER: &str = "arma3";
pub const SERVER_APP_ID: u32 = 233780;
pub const WORKSHOP_APP_ID: u32 = 107410;

pub const REALM_SERVER: &str = "server";
pub const REALM_BASIC: &str = "basic";
/// Launch arguments only; never written to a file.
pub const REALM_LAUNCH: &str = "launch";

const DEFAULT_PORT: u16 = 2302;
const CONFIG_DIR: &str = "hearth";

#[cfg(windows)]
const SERVER_BINARY: &str = "arma3server_x64.exe";
#[cfg(not(windows))]
const SERVER_BINARY: &str = "arma3server_x64";

// Boolean `launch` entries that turn into bare `-flag` switches.
const LAUNCH_FLAGS: &[&str] = &[
    "autoInit",
    "loadMissionToMemory",
    "enableHT",
    "hugePages",
    "filePatching",
    "netlog",
];

pub fn descriptor() -> GameDescriptor {
    GameDescriptor {
        identifier: IDENTIFIER,
        create: Arma3::create,
        definitions,
    }
}

fn realm_file(realm: &str) -> Option<&'static str> {
    match realm {
        REALM_SERVER => Some("server.cfg"),
        REALM_BASIC => Some("basic.cfg"),
        _ => None,
    }
}

pub fn definitions(locale: &Locale) -> Vec<Def> {
    use EntryKind::{Boolean, Number, Password, Raw, Selection};

    let general = locale.pick("General", "Allgemein");
    let security = locale.pick("Security", "Sicherheit");
    let gameplay = locale.pick("Gameplay", "Spielablauf");
    let network = locale.pick("Network", "Netzwerk");
    let launch = locale.pick("Launch", "Start");

    vec![
        // server.cfg
        Def::new(REALM_SERVER, "hostname", EntryKind::String, locale.pick("Server name", "Servername"))
            .group(general),
        Def::new(REALM_SERVER, "password", Password, locale.pick("Join password", "Beitrittspasswort"))
            .group(security),
        Def::new(REALM_SERVER, "passwordAdmin", Password, locale.pick("Admin password", "Adminpasswort"))
            .group(security),
        Def::new(
            REALM_SERVER,
            "serverCommandPassword",
            Password,
            locale.pick("Server command password", "Serverbefehlspasswort"),
        )
        .group(security),
        Def::new(REALM_SERVER, "maxPlayers", Number, locale.pick("Maximum players", "Maximale Spieler"))
            .group(general)
            .pattern(r"^\d{1,3}$")
            .default_value("32"),
        Def::new(REALM_SERVER, "motd[]", Raw, locale.pick("Message of the day", "Nachricht des Tages"))
            .group(general)
            .default_value("{}"),
        Def::new(
            REALM_SERVER,
            "motdInterval",
            Number,
            locale.pick("Message interval (seconds)", "Nachrichtenintervall (Sekunden)"),
        )
        .group(general)
        .pattern(r"^\d+$"),
        Def::new(REALM_SERVER, "BattlEye", Boolean, locale.pick("Enable BattlEye", "BattlEye aktivieren"))
            .group(security)
            .default_value("true"),
        Def::new(
            REALM_SERVER,
            "verifySignatures",
            Selection,
            locale.pick("Verify signatures", "Signaturen prüfen"),
        )
        .group(security)
        .options(&["0", "2"])
        .default_value("2"),
        Def::new(
            REALM_SERVER,
            "kickDuplicate",
            Boolean,
            locale.pick("Kick duplicate IDs", "Doppelte IDs entfernen"),
        )
        .group(security),
        Def::new(
            REALM_SERVER,
            "allowedFilePatching",
            Selection,
            locale.pick("Allowed file patching", "Erlaubtes File-Patching"),
        )
        .group(security)
        .options(&["0", "1", "2"])
        .default_value("0"),
        Def::new(REALM_SERVER, "persistent", Boolean, locale.pick("Persistent mission", "Persistente Mission"))
            .group(gameplay),
        Def::new(
            REALM_SERVER,
            "forcedDifficulty",
            Selection,
            locale.pick("Forced difficulty", "Erzwungener Schwierigkeitsgrad"),
        )
        .group(gameplay)
        .options(&["Recruit", "Regular", "Veteran", "Custom"]),
        Def::new(REALM_SERVER, "disableVoN", Boolean, locale.pick("Disable voice chat", "Sprachchat deaktivieren"))
            .group(gameplay),
        Def::new(
            REALM_SERVER,
            "vonCodecQuality",
            Number,
            locale.pick("Voice codec quality", "Sprachcodec-Qualität"),
        )
        .group(gameplay)
        .pattern(r"^([0-9]|[12][0-9]|30)$"),
        Def::new(
            REALM_SERVER,
            "timeStampFormat",
            Selection,
            locale.pick("Log timestamp format", "Zeitstempelformat im Log"),
        )
        .group(general)
        .options(&["none", "short", "full"]),
        Def::new(REALM_SERVER, "logFile", EntryKind::String, locale.pick("Log file", "Logdatei"))
            .group(general),
        // basic.cfg
        Def::new(REALM_BASIC, "MaxMsgSend", Number, locale.pick("Max messages per frame", "Max. Nachrichten pro Frame"))
            .group(network)
            .pattern(r"^\d+$")
            .default_value("128"),
        Def::new(
            REALM_BASIC,
            "MaxSizeGuaranteed",
            Number,
            locale.pick("Max guaranteed packet size", "Max. garantierte Paketgröße"),
        )
        .group(network)
        .pattern(r"^\d+$"),
        Def::new(
            REALM_BASIC,
            "MaxSizeNonguaranteed",
            Number,
            locale.pick("Max non-guaranteed packet size", "Max. nicht garantierte Paketgröße"),
        )
        .group(network)
        .pattern(r"^\d+$"),
        Def::new(REALM_BASIC, "MinBandwidth", Number, locale.pick("Minimum bandwidth", "Minimale Bandbreite"))
            .group(network)
            .pattern(r"^\d+$"),
        Def::new(REALM_BASIC, "MaxBandwidth", Number, locale.pick("Maximum bandwidth", "Maximale Bandbreite"))
            .group(network)
            .pattern(r"^\d+$"),
        Def::new(REALM_BASIC, "MinErrorToSend", Raw, locale.pick("Minimum error to send", "Minimaler Sendefehler"))
            .group(network)
            .pattern(r"^\d+(\.\d+)?$"),
        Def::new(
            REALM_BASIC,
            "MinErrorToSendNear",
            Raw,
            locale.pick("Minimum error to send (near)", "Minimaler Sendefehler (nah)"),
        )
        .group(network)
        .pattern(r"^\d+(\.\d+)?$"),
        Def::new(
            REALM_BASIC,
            "MaxCustomFileSize",
            Number,
            locale.pick("Max custom file size", "Max. Größe eigener Dateien"),
        )
        .group(network)
        .pattern(r"^\d+$"),
        // launch arguments
        Def::new(REALM_LAUNCH, "port", Number, locale.pick("Game port", "Spielport"))
            .group(launch)
            .pattern(r"^\d{1,5}$")
            .default_value("2302"),
        Def::new(REALM_LAUNCH, "name", EntryKind::String, locale.pick("Profile name", "Profilname"))
            .group(launch)
            .default_value("server"),
        Def::new(REALM_LAUNCH, "limitFPS", Number, locale.pick("FPS limit", "FPS-Limit"))
            .group(launch)
            .pattern(r"^\d{1,4}$"),
        Def::new(REALM_LAUNCH, "serverMod", EntryKind::String, locale.pick("Server-side mods", "Serverseitige Mods"))
            .group(launch),
        Def::new(REALM_LAUNCH, "autoInit", Boolean, locale.pick("Start mission automatically", "Mission automatisch starten"))
            .group(launch),
        Def::new(
            REALM_LAUNCH,
            "loadMissionToMemory",
            Boolean,
            locale.pick("Load mission into memory", "Mission in den Speicher laden"),
        )
        .group(launch),
        Def::new(REALM_LAUNCH, "enableHT", Boolean, locale.pick("Use hyper-threading", "Hyper-Threading nutzen"))
            .group(launch),
        Def::new(REALM_LAUNCH, "hugePages", Boolean, locale.pick("Use huge pages", "Huge Pages nutzen"))
            .group(launch),
        Def::new(REALM_LAUNCH, "filePatching", Boolean, locale.pick("Allow file patching", "File-Patching erlauben"))
            .group(launch),
        Def::new(REALM_LAUNCH, "netlog", Boolean, locale.pick("Network logging", "Netzwerkprotokoll"))
            .group(launch),
    ]
}

/// Arma string literal: wrapped in double quotes, embedded quotes doubled.
pub fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn parse_bool(realm: &str, path: &str, value: &str) -> Result<bool, ConfigurationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(ConfigurationError {
            realm: realm.to_string(),
            path: path.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

fn format_value(kind: EntryKind, realm: &str, path: &str, value: &str) -> Result<String, ConfigurationError> {
    Ok(match kind {
        EntryKind::String | EntryKind::Password => quote(value),
        EntryKind::Boolean => {
            if parse_bool(realm, path, value)? {
                "1".to_string()
            } else {
                "0".to_string()
            }
        }
        EntryKind::Raw | EntryKind::Number | EntryKind::Selection => value.to_string(),
    })
}

/// Renders the `path = value;` body of one realm file.
pub fn render_realm<'a>(
    defs: &[Def],
    allow_any: bool,
    realm: &str,
    entries: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<String, ConfigurationError> {
    let mut out = String::from("// Generated by hearth-agent. Manual edits are overwritten.\n");
    for (path, value) in entries {
        let kind = match find_definition(defs, realm, path) {
            Some(def) => def.kind,
            None if allow_any => EntryKind::Raw,
            None => {
                tracing::warn!(realm, path, "ignoring undeclared configuration entry");
                continue;
            }
        };
        out.push_str(&format!("{path} = {};\n", format_value(kind, realm, path, value)?));
    }
    Ok(out)
}

fn workshop_id_regex() -> anyhow::Result<&'static Regex> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    // Loose capture so malformed ids reach the parser and get reported.
    RE.get_or_init(|| Regex::new(r#"filedetails/\?id=([^&"'<>\s#]*)"#))
        .as_ref()
        .map_err(|e| anyhow::anyhow!("compile workshop link pattern: {e}"))
}

/// Workshop item ids referenced by a mod pack export, in first-seen order.
/// Links whose id does not parse are skipped.
pub fn extract_workshop_ids(html: &str) -> anyhow::Result<Vec<u64>> {
    let mut ids: Vec<u64> = Vec::new();
    for cap in workshop_id_regex()?.captures_iter(html) {
        let raw = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
        match raw.parse::<u64>() {
            Ok(id) if !ids.contains(&id) => ids.push(id),
            Ok(_) => {}
            Err(err) => tracing::warn!(raw, %err, "skipping malformed workshop link"),
        }
    }
    Ok(ids)
}

pub fn workshop_path(install_dir: &Path, id: u64) -> PathBuf {
    install_dir
        .join("steamapps")
        .join("workshop")
        .join("content")
        .join(WORKSHOP_APP_ID.to_string())
        .join(id.to_string())
}

pub fn config_dir(install_dir: &Path) -> PathBuf {
    install_dir.join(CONFIG_DIR)
}

async fn write_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let tmp = path.with_extension("tmp");
    let mut f = tokio::fs::File::create(&tmp)
        .await
        .with_context(|| format!("create {}", tmp.display()))?;
    f.write_all(content.as_bytes())
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    f.flush().await.ok();
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}

#[derive(Clone, Copy)]
enum ModPackSlot {
    Selected,
    Active,
}

pub struct Arma3 {
    ctx: GameContext,
}

impl Arma3 {
    pub fn create(ctx: GameContext) -> Arc<dyn GameController> {
        Arc::new(Self { ctx })
    }

    async fn mod_pack(&self, slot: ModPackSlot) -> anyhow::Result<Option<mod_packs::Model>> {
        let server = server_instances::Entity::find_by_id(self.ctx.server_id)
            .one(&*self.ctx.services.db)
            .await?
            .with_context(|| format!("server instance {} not found", self.ctx.server_id))?;

        let id = match slot {
            ModPackSlot::Selected => server.selected_mod_pack_id,
            ModPackSlot::Active => server.active_mod_pack_id,
        };
        let Some(id) = id else {
            return Ok(None);
        };

        let pack = mod_packs::Entity::find_by_id(id)
            .one(&*self.ctx.services.db)
            .await?;
        match pack {
            Some(pack) if pack.is_active => Ok(Some(pack)),
            Some(_) => {
                tracing::warn!(server_id = %self.ctx.server_id, mod_pack_id = %id, "referenced mod pack is deleted; ignoring it");
                Ok(None)
            }
            None => {
                tracing::warn!(server_id = %self.ctx.server_id, mod_pack_id = %id, "referenced mod pack does not exist");
                Ok(None)
            }
        }
    }

    async fn active_mod_paths(&self) -> anyhow::Result<Vec<PathBuf>> {
        let Some(pack) = self.mod_pack(ModPackSlot::Active).await? else {
            return Ok(Vec::new());
        };
        let paths: Vec<PathBuf> = extract_workshop_ids(&pack.html)?
            .into_iter()
            .map(|id| workshop_path(&self.ctx.install_dir, id))
            .collect();
        for p in paths.iter().filter(|p| !p.exists()) {
            tracing::warn!(path = %p.display(), "workshop item missing on disk; reinstall the server");
        }
        Ok(paths)
    }
}

#[async_trait]
impl GameController for Arma3 {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn policy(&self) -> GamePolicy {
        GamePolicy {
            server_app_id: SERVER_APP_ID,
            workshop_app_id: Some(WORKSHOP_APP_ID),
            install_requires_login: true,
            workshop_requires_purchase: true,
        }
    }

    fn configuration_entry_definitions(&self, locale: &Locale) -> Vec<Def> {
        definitions(locale)
    }

    fn allow_any_configuration_entry(&self) -> bool {
        false
    }

    async fn build_launch_spec(
        &self,
        active: &ActiveConfiguration,
        _actor: Option<Actor>,
    ) -> anyhow::Result<LaunchSpec> {
        let install = &self.ctx.install_dir;
        let cfg_dir = config_dir(install);

        let port: u16 = active.get_typed(REALM_LAUNCH, "port", DEFAULT_PORT)?;
        let name = active.get_or(REALM_LAUNCH, "name", "server");

        let mut spec = LaunchSpec::new(install.join(SERVER_BINARY), install.clone())
            .arg(format!("-config={}", cfg_dir.join("server.cfg").display()))
            .arg(format!("-cfg={}", cfg_dir.join("basic.cfg").display()))
            .arg(format!("-profiles={}", cfg_dir.join("profiles").display()))
            .arg(format!("-name={name}"))
            .arg(format!("-port={port}"));

        if active.get(REALM_LAUNCH, "limitFPS").is_some() {
            let fps: u32 = active.get_typed(REALM_LAUNCH, "limitFPS", 0)?;
            spec = spec.arg(format!("-limitFPS={fps}"));
        }

        for flag in LAUNCH_FLAGS {
            if parse_bool(REALM_LAUNCH, flag, active.get_or(REALM_LAUNCH, flag, "false"))? {
                spec = spec.arg(format!("-{flag}"));
            }
        }

        let mods = self.active_mod_paths().await?;
        if !mods.is_empty() {
            let joined = mods
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(";");
            spec = spec.arg(format!("-mod={joined}"));
        }

        if let Some(server_mod) = active.get(REALM_LAUNCH, "serverMod").filter(|v| !v.trim().is_empty()) {
            spec = spec.arg(format!("-serverMod={server_mod}"));
        }

        Ok(spec)
    }

    async fn materialize_config_files(&self) -> anyhow::Result<Vec<PathBuf>> {
        let active = self
            .ctx
            .services
            .store
            .active_configuration(self.ctx.server_id)
            .await?;
        let defs = definitions(&Locale::default());
        let allow_any = self.allow_any_configuration_entry();

        for realm in active.realms() {
            if realm != REALM_LAUNCH && realm_file(realm).is_none() {
                tracing::warn!(server_id = %self.ctx.server_id, realm, "ignoring unknown configuration realm");
            }
        }

        let dir = config_dir(&self.ctx.install_dir);
        tokio::fs::create_dir_all(dir.join("profiles"))
            .await
            .with_context(|| format!("create {}", dir.display()))?;

        let mut written = Vec::new();
        for realm in [REALM_SERVER, REALM_BASIC] {
            let Some(file) = realm_file(realm) else {
                continue;
            };
            let body = render_realm(&defs, allow_any, realm, active.realm(realm))?;
            let path = dir.join(file);
            write_atomic(&path, &body).await?;
            written.push(path);
        }
        Ok(written)
    }

    async fn on_install_or_upgrade(&self, _actor: Option<Actor>) -> anyhow::Result<Vec<PathBuf>> {
        let Some(pack) = self.mod_pack(ModPackSlot::Selected).await? else {
            return Ok(Vec::new());
        };

        let ids = extract_workshop_ids(&pack.html)?;
        tracing::info!(server_id = %self.ctx.server_id, mod_pack = %pack.title, items = ids.len(), "downloading workshop items");

        let credentials = self.ctx.services.config.steam_credentials();
        let requires_login = self.policy().workshop_requires_purchase;
        let mut paths = Vec::with_capacity(ids.len());
        for id in ids {
            let inv = ToolInvocation::new(
                self.ctx.server_id,
                [
                    "+workshop_download_item".to_string(),
                    WORKSHOP_APP_ID.to_string(),
                    id.to_string(),
                    "validate".to_string(),
                ],
            )
            .in_dir(&self.ctx.install_dir);

            self.ctx
                .services
                .tool
                .run(&inv, requires_login, credentials)
                .await
                .with_context(|| format!("download workshop item {id}"))?;
            paths.push(workshop_path(&self.ctx.install_dir, id));
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config_store::ConfigurationChange, testing};
    use sea_orm::Set;

    #[test]
    fn quote_doubles_embedded_quotes() {
        assert_eq!(quote(r#"My "Best" Server"#), r#""My ""Best"" Server""#);
        assert_eq!(quote(""), r#""""#);
    }

    #[test]
    fn realm_rendering_follows_kinds() {
        let defs = definitions(&Locale::default());
        let body = render_realm(
            &defs,
            false,
            REALM_SERVER,
            [
                ("BattlEye", "true"),
                ("hostname", r#"Say "hi""#),
                ("maxPlayers", "64"),
                ("motd[]", r#"{"Welcome", "Be nice"}"#),
                ("notARealSetting", "1"),
            ],
        )
        .unwrap();

        let lines: Vec<&str> = body.lines().skip(1).collect();
        assert_eq!(
            lines,
            vec![
                "BattlEye = 1;",
                r#"hostname = "Say ""hi""";"#,
                "maxPlayers = 64;",
                r#"motd[] = {"Welcome", "Be nice"};"#,
            ]
        );
    }

    #[test]
    fn allow_any_writes_unknown_entries_raw() {
        let body = render_realm(&[], true, REALM_BASIC, [("Custom", "7")]).unwrap();
        assert!(body.ends_with("Custom = 7;\n"));
    }

    #[test]
    fn bad_boolean_is_a_configuration_error() {
        let defs = definitions(&Locale::default());
        let err = render_realm(&defs, false, REALM_SERVER, [("persistent", "maybe")]).unwrap_err();
        assert_eq!(err.path, "persistent");
    }

    #[test]
    fn workshop_ids_skip_malformed_links_and_duplicates() {
        let html = r#"
            <tr data-type="ModContainer"><td><a href="https://steamcommunity.com/sharedfiles/filedetails/?id=111" data-type="Link">CBA</a></td></tr>
            <tr data-type="ModContainer"><td><a href="http://steamcommunity.com/sharedfiles/filedetails/?id=222&searchtext=" data-type="Link">ACE</a></td></tr>
            <tr data-type="ModContainer"><td><a href="https://steamcommunity.com/sharedfiles/filedetails/?id=12ab" data-type="Link">Broken</a></td></tr>
            <tr data-type="ModContainer"><td><a href="https://steamcommunity.com/sharedfiles/filedetails/?id=111" data-type="Link">CBA again</a></td></tr>
        "#;
        assert_eq!(extract_workshop_ids(html).unwrap(), vec![111, 222]);
    }

    #[test]
    fn definitions_are_localized() {
        let en = definitions(&Locale::default());
        let de = definitions(&Locale::new("de-DE"));
        assert_eq!(en.len(), de.len());
        let port_en = find_definition(&en, REALM_LAUNCH, "port").unwrap();
        let port_de = find_definition(&de, REALM_LAUNCH, "port").unwrap();
        assert_eq!(port_en.label, "Game port");
        assert_eq!(port_de.label, "Spielport");
        assert!(
            en.iter()
                .filter(|d| d.kind == EntryKind::Password)
                .all(|d| d.realm == REALM_SERVER)
        );
    }

    #[tokio::test]
    async fn materialize_writes_one_file_per_realm() {
        let (db, tmp) = (testing::memory_db().await, tempfile::tempdir().unwrap());
        let server = testing::insert_server(&db, IDENTIFIER).await;
        let services = testing::services(db.clone(), testing::test_config(tmp.path()));
        let install = services.config.install_dir(server.id);
        services
            .store
            .set_many(
                server.id,
                &[
                    ConfigurationChange::new(REALM_SERVER, "hostname", "Alpha").sensitive(),
                    ConfigurationChange::new(REALM_SERVER, "kickDuplicate", "false"),
                    ConfigurationChange::new(REALM_BASIC, "MaxMsgSend", "256"),
                    ConfigurationChange::new(REALM_LAUNCH, "port", "2402"),
                    ConfigurationChange::new("mission", "template", "co10"),
                ],
                None,
            )
            .await
            .unwrap();

        let game = Arma3::create(GameContext {
            server_id: server.id,
            title: server.title.clone(),
            install_dir: install.clone(),
            services,
        });
        let written = game.materialize_config_files().await.unwrap();
        assert_eq!(
            written,
            vec![
                install.join("hearth").join("server.cfg"),
                install.join("hearth").join("basic.cfg")
            ]
        );

        let server_cfg = std::fs::read_to_string(&written[0]).unwrap();
        assert!(server_cfg.contains("hostname = \"Alpha\";\n"));
        assert!(server_cfg.contains("kickDuplicate = 0;\n"));
        assert!(!server_cfg.contains("port"));
        let basic_cfg = std::fs::read_to_string(&written[1]).unwrap();
        assert!(basic_cfg.contains("MaxMsgSend = 256;\n"));
        assert!(!basic_cfg.contains("template"));
    }

    #[tokio::test]
    async fn launch_spec_reads_launch_realm_and_active_mods() {
        let (db, tmp) = (testing::memory_db().await, tempfile::tempdir().unwrap());
        let server = testing::insert_server(&db, IDENTIFIER).await;
        let pack = testing::insert_mod_pack(
            &db,
            r#"<a href="https://steamcommunity.com/sharedfiles/filedetails/?id=450814997">CBA_A3</a>
               <a href="https://steamcommunity.com/sharedfiles/filedetails/?id=463939057">ace</a>"#,
        )
        .await;
        testing::set_mod_packs(&db, server.id, Some(pack.id), Some(pack.id)).await;

        let services = testing::services(db.clone(), testing::test_config(tmp.path()));
        let install = services.config.install_dir(server.id);
        services
            .store
            .set_many(
                server.id,
                &[
                    ConfigurationChange::new(REALM_LAUNCH, "port", "2402"),
                    ConfigurationChange::new(REALM_LAUNCH, "autoInit", "true"),
                    ConfigurationChange::new(REALM_LAUNCH, "netlog", "false"),
                    ConfigurationChange::new(REALM_LAUNCH, "limitFPS", "120"),
                    ConfigurationChange::new(REALM_LAUNCH, "serverMod", "@ocap"),
                ],
                None,
            )
            .await
            .unwrap();
        let active = services.store.active_configuration(server.id).await.unwrap();

        let game = Arma3::create(GameContext {
            server_id: server.id,
            title: server.title.clone(),
            install_dir: install.clone(),
            services,
        });
        let spec = game.build_launch_spec(&active, None).await.unwrap();

        assert_eq!(spec.program, install.join(SERVER_BINARY));
        assert_eq!(spec.working_dir, install);
        let content = install.join("steamapps/workshop/content/107410");
        assert_eq!(
            spec.args,
            vec![
                format!("-config={}", install.join("hearth/server.cfg").display()),
                format!("-cfg={}", install.join("hearth/basic.cfg").display()),
                format!("-profiles={}", install.join("hearth/profiles").display()),
                "-name=server".to_string(),
                "-port=2402".to_string(),
                "-limitFPS=120".to_string(),
                "-autoInit".to_string(),
                format!(
                    "-mod={};{}",
                    content.join("450814997").display(),
                    content.join("463939057").display()
                ),
                "-serverMod=@ocap".to_string(),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deleted_mod_pack_is_neither_downloaded_nor_launched() {
        let (db, tmp) = (testing::memory_db().await, tempfile::tempdir().unwrap());
        let server = testing::insert_server(&db, IDENTIFIER).await;
        let pack = testing::insert_mod_pack(
            &db,
            r#"<a href="https://steamcommunity.com/sharedfiles/filedetails/?id=111">one</a>"#,
        )
        .await;
        testing::set_mod_packs(&db, server.id, Some(pack.id), Some(pack.id)).await;
        mod_packs::Entity::update(mod_packs::ActiveModel {
            id: Set(pack.id),
            is_active: Set(false),
            ..Default::default()
        })
        .exec(&*db)
        .await
        .unwrap();

        let mut config = testing::test_config(tmp.path());
        config.tool.steamcmd_path = Some(testing::tool_stub(tmp.path(), "echo \"$@\" >> \"$0.calls\"\nexit 0"));
        let services = testing::services(db.clone(), config);
        let active = services.store.active_configuration(server.id).await.unwrap();
        let game = Arma3::create(GameContext {
            server_id: server.id,
            title: server.title.clone(),
            install_dir: services.config.install_dir(server.id),
            services,
        });

        assert!(game.on_install_or_upgrade(None).await.unwrap().is_empty());
        assert!(!tmp.path().join("steamcmd-stub.sh.calls").exists());

        let spec = game.build_launch_spec(&active, None).await.unwrap();
        assert!(!spec.args.iter().any(|a| a.starts_with("-mod=")));
    }

    #[tokio::test]
    async fn malformed_port_fails_launch() {
        let (db, tmp) = (testing::memory_db().await, tempfile::tempdir().unwrap());
        let server = testing::insert_server(&db, IDENTIFIER).await;
        let services = testing::services(db.clone(), testing::test_config(tmp.path()));
        services
            .store
            .set_many(server.id, &[ConfigurationChange::new(REALM_LAUNCH, "port", "23o2")], None)
            .await
            .unwrap();
        let active = services.store.active_configuration(server.id).await.unwrap();

        let game = Arma3::create(GameContext {
            server_id: server.id,
            title: server.title.clone(),
            install_dir: services.config.install_dir(server.id),
            services,
        });
        let err = game.build_launch_spec(&active, None).await.unwrap_err();
        assert!(err.downcast_ref::<ConfigurationError>().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn install_hook_downloads_each_workshop_item() {
        let (db, tmp) = (testing::memory_db().await, tempfile::tempdir().unwrap());
        let server = testing::insert_server(&db, IDENTIFIER).await;
        let pack = testing::insert_mod_pack(
            &db,
            r#"<a href="https://steamcommunity.com/sharedfiles/filedetails/?id=111">one</a>
               <a href="https://steamcommunity.com/sharedfiles/filedetails/?id=222">two</a>
               <a href="https://steamcommunity.com/sharedfiles/filedetails/?id=">broken</a>"#,
        )
        .await;
        testing::set_mod_packs(&db, server.id, Some(pack.id), None).await;

        let mut config = testing::test_config(tmp.path());
        config.tool.steamcmd_path = Some(testing::tool_stub(tmp.path(), "echo \"$@\" >> \"$0.calls\"\nexit 0"));
        let services = testing::services(db.clone(), config);
        let install = services.config.install_dir(server.id);

        let game = Arma3::create(GameContext {
            server_id: server.id,
            title: server.title.clone(),
            install_dir: install.clone(),
            services,
        });
        let paths = game.on_install_or_upgrade(None).await.unwrap();
        assert_eq!(paths, vec![workshop_path(&install, 111), workshop_path(&install, 222)]);

        let calls = std::fs::read_to_string(tmp.path().join("steamcmd-stub.sh.calls")).unwrap();
        let calls: Vec<&str> = calls.lines().collect();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("+login ops"));
        assert!(calls[0].contains("+workshop_download_item 107410 111 validate +quit"));
        assert!(calls[1].contains("+workshop_download_item 107410 222 validate"));
    }
}
