use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use hearth_process::Actor;
use uuid::Uuid;

use crate::{config_store::ActiveConfiguration, process::LaunchSpec, services::AgentServices};

pub mod arma3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Raw,
    String,
    Password,
    Boolean,
    Number,
    Selection,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Raw => "raw",
            EntryKind::String => "string",
            EntryKind::Password => "password",
            EntryKind::Boolean => "boolean",
            EntryKind::Number => "number",
            EntryKind::Selection => "selection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale(String);

impl Locale {
    pub fn new(tag: &str) -> Self {
        let lang = tag
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if lang.is_empty() {
            Self::default()
        } else {
            Self(lang)
        }
    }

    pub fn language(&self) -> &str {
        &self.0
    }

    /// Picks the German text for `de`, English for everything else.
    pub fn pick(&self, en: &'static str, de: &'static str) -> &'static str {
        if self.0 == "de" { de } else { en }
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self("en".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationEntryDefinition {
    pub realm: &'static str,
    pub path: &'static str,
    pub kind: EntryKind,
    pub label: &'static str,
    pub group: &'static str,
    /// Regex the value must match, checked by the UI.
    pub pattern: Option<&'static str>,
    pub default_value: Option<&'static str>,
    pub options: &'static [&'static str],
}

impl ConfigurationEntryDefinition {
    pub fn new(realm: &'static str, path: &'static str, kind: EntryKind, label: &'static str) -> Self {
        Self {
            realm,
            path,
            kind,
            label,
            group: "",
            pattern: None,
            default_value: None,
            options: &[],
        }
    }

    pub fn group(mut self, group: &'static str) -> Self {
        self.group = group;
        self
    }

    pub fn pattern(mut self, pattern: &'static str) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn default_value(mut self, value: &'static str) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn options(mut self, options: &'static [&'static str]) -> Self {
        self.options = options;
        self
    }
}

pub fn find_definition<'a>(
    defs: &'a [ConfigurationEntryDefinition],
    realm: &str,
    path: &str,
) -> Option<&'a ConfigurationEntryDefinition> {
    defs.iter().find(|d| d.realm == realm && d.path == path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GamePolicy {
    pub server_app_id: u32,
    pub workshop_app_id: Option<u32>,
    pub install_requires_login: bool,
    // Paid workshop items need an owning account.
    pub workshop_requires_purchase: bool,
}

#[derive(Clone)]
pub struct GameContext {
    pub server_id: Uuid,
    pub title: String,
    pub install_dir: PathBuf,
    pub services: AgentServices,
}

/// Only called while the owning controller holds its operation gate.
#[async_trait]
pub trait GameController: Send + Sync {
    fn identifier(&self) -> &'static str;

    fn policy(&self) -> GamePolicy;

    fn configuration_entry_definitions(&self, locale: &Locale) -> Vec<ConfigurationEntryDefinition>;

    /// When false, stored entries without a definition are skipped while
    /// materializing.
    fn allow_any_configuration_entry(&self) -> bool {
        true
    }

    async fn build_launch_spec(
        &self,
        active: &ActiveConfiguration,
        actor: Option<Actor>,
    ) -> anyhow::Result<LaunchSpec>;

    async fn materialize_config_files(&self) -> anyhow::Result<Vec<PathBuf>>;

    /// Runs after the server files were installed or updated. Returns the
    /// local paths of any downloaded mod content.
    async fn on_install_or_upgrade(&self, actor: Option<Actor>) -> anyhow::Result<Vec<PathBuf>>;

    async fn on_stop(&self, _pid: u32) -> anyhow::Result<()> {
        Ok(())
    }
}

pub type ControllerCtor = fn(GameContext) -> Arc<dyn GameController>;

#[derive(Clone, Copy)]
pub struct GameDescriptor {
    pub identifier: &'static str,
    pub create: ControllerCtor,
    pub definitions: fn(&Locale) -> Vec<ConfigurationEntryDefinition>,
}

pub fn builtin() -> Vec<GameDescriptor> {
    vec![arma3::descriptor()]
}
