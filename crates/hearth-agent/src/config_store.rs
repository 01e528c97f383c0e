use std::{collections::BTreeMap, str::FromStr, sync::Arc};

use chrono::Utc;
use hearth_db::entities::configuration_entries;
use hearth_process::Actor;
use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, SqlErr, TransactionTrait, sea_query::Expr,
};
use uuid::Uuid;

use crate::error::ConfigurationError;

pub const REDACTED: &str = "<redacted>";

// A concurrent writer of the same key makes the insert hit the unique
// active-row index; the whole batch is replayed against the new state.
const SET_MANY_ATTEMPTS: u32 = 5;

/// One `(realm, path) = value` assignment handed to [`ConfigStore::set_many`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationChange {
    pub realm: String,
    pub path: String,
    pub value: String,
    pub is_sensitive: bool,
}

impl ConfigurationChange {
    pub fn new(realm: impl Into<String>, path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            path: path.into(),
            value: value.into(),
            is_sensitive: false,
        }
    }

    pub fn sensitive(mut self) -> Self {
        self.is_sensitive = true;
        self
    }
}

/// Active values of one server keyed by `(realm, path)`.
#[derive(Debug, Clone, Default)]
pub struct ActiveConfiguration {
    entries: BTreeMap<(String, String), String>,
}

impl ActiveConfiguration {
    pub fn from_rows(rows: &[configuration_entries::Model]) -> Self {
        let entries = rows
            .iter()
            .filter(|r| r.is_active)
            .map(|r| ((r.realm.clone(), r.path.clone()), r.value.clone()))
            .collect();
        Self { entries }
    }

    pub fn get(&self, realm: &str, path: &str) -> Option<&str> {
        self.entries
            .get(&(realm.to_string(), path.to_string()))
            .map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, realm: &str, path: &str, fallback: &'a str) -> &'a str {
        self.get(realm, path).unwrap_or(fallback)
    }

    pub fn get_typed<T>(&self, realm: &str, path: &str, fallback: T) -> Result<T, ConfigurationError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(realm, path) {
            None => Ok(fallback),
            Some(raw) => parse_value(realm, path, raw),
        }
    }

    /// Entries of one realm in path order.
    pub fn realm(&self, realm: &str) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter(move |((r, _), _)| r == realm)
            .map(|((_, p), v)| (p.as_str(), v.as_str()))
    }

    pub fn realms(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.entries.keys().map(|(r, _)| r.as_str()).collect();
        out.dedup();
        out
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn parse_value<T>(realm: &str, path: &str, raw: &str) -> Result<T, ConfigurationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigurationError {
        realm: realm.to_string(),
        path: path.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Append-only, versioned key/value store scoped by `(server, realm, path)`.
///
/// At most one row per key has `is_active = true`, backed by a unique
/// partial index. Values are never edited in place.
#[derive(Clone)]
pub struct ConfigStore {
    db: Arc<DatabaseConnection>,
}

impl ConfigStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn active_value(&self, server_id: Uuid, realm: &str, path: &str) -> Result<Option<String>, DbErr> {
        let row = configuration_entries::Entity::find()
            .filter(configuration_entries::Column::ServerInstanceId.eq(server_id))
            .filter(configuration_entries::Column::Realm.eq(realm))
            .filter(configuration_entries::Column::Path.eq(path))
            .filter(configuration_entries::Column::IsActive.eq(true))
            .order_by_desc(configuration_entries::Column::Id)
            .one(&*self.db)
            .await?;
        Ok(row.map(|r| r.value))
    }

    /// Returns the active value or `fallback` when the key was never set.
    pub async fn get(
        &self,
        server_id: Uuid,
        realm: &str,
        path: &str,
        fallback: &str,
    ) -> Result<String, DbErr> {
        Ok(self
            .active_value(server_id, realm, path)
            .await?
            .unwrap_or_else(|| fallback.to_string()))
    }

    /// Typed variant of [`get`](Self::get). A stored value that does not
    /// parse is treated as corruption and reported as a configuration error.
    pub async fn get_typed<T>(
        &self,
        server_id: Uuid,
        realm: &str,
        path: &str,
        fallback: T,
    ) -> crate::Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.active_value(server_id, realm, path).await? {
            None => Ok(fallback),
            Some(raw) => Ok(parse_value(realm, path, &raw)?),
        }
    }

    pub async fn set_many(
        &self,
        server_id: Uuid,
        changes: &[ConfigurationChange],
        actor: Option<Actor>,
    ) -> Result<(), DbErr> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut attempt = 1;
        loop {
            match self.supersede(server_id, changes, actor).await {
                Err(err) if attempt < SET_MANY_ATTEMPTS && is_unique_violation(&err) => {
                    tracing::debug!(%server_id, attempt, "concurrent configuration write; retrying");
                    attempt += 1;
                }
                res => return res,
            }
        }
    }

    async fn supersede(
        &self,
        server_id: Uuid,
        changes: &[ConfigurationChange],
        actor: Option<Actor>,
    ) -> Result<(), DbErr> {
        let now = Utc::now();
        let txn = self.db.begin().await?;
        for change in changes {
            configuration_entries::Entity::update_many()
                .col_expr(configuration_entries::Column::IsActive, Expr::value(false))
                .filter(configuration_entries::Column::ServerInstanceId.eq(server_id))
                .filter(configuration_entries::Column::Realm.eq(change.realm.as_str()))
                .filter(configuration_entries::Column::Path.eq(change.path.as_str()))
                .filter(configuration_entries::Column::IsActive.eq(true))
                .exec(&txn)
                .await?;

            configuration_entries::Entity::insert(configuration_entries::ActiveModel {
                id: NotSet,
                server_instance_id: Set(server_id),
                realm: Set(change.realm.clone()),
                path: Set(change.path.clone()),
                value: Set(change.value.clone()),
                changed_by: Set(actor.map(|a| a.0)),
                time_stamp: Set(now.into()),
                is_sensitive: Set(change.is_sensitive),
                is_active: Set(true),
            })
            .exec(&txn)
            .await?;
        }
        txn.commit().await?;

        tracing::debug!(%server_id, count = changes.len(), "configuration updated");
        Ok(())
    }

    pub async fn active_entries(&self, server_id: Uuid) -> Result<Vec<configuration_entries::Model>, DbErr> {
        configuration_entries::Entity::find()
            .filter(configuration_entries::Column::ServerInstanceId.eq(server_id))
            .filter(configuration_entries::Column::IsActive.eq(true))
            .order_by_asc(configuration_entries::Column::Realm)
            .order_by_asc(configuration_entries::Column::Path)
            .all(&*self.db)
            .await
    }

    pub async fn active_configuration(&self, server_id: Uuid) -> Result<ActiveConfiguration, DbErr> {
        Ok(ActiveConfiguration::from_rows(
            &self.active_entries(server_id).await?,
        ))
    }

    /// Active entries for read-back. Sensitive values are replaced unless the
    /// caller is privileged.
    pub async fn display_entries(
        &self,
        server_id: Uuid,
        privileged: bool,
    ) -> Result<Vec<configuration_entries::Model>, DbErr> {
        let mut rows = self.active_entries(server_id).await?;
        if !privileged {
            for r in rows.iter_mut().filter(|r| r.is_sensitive) {
                r.value = REDACTED.to_string();
            }
        }
        Ok(rows)
    }

    /// Every value ever stored for one key, newest first.
    pub async fn history(
        &self,
        server_id: Uuid,
        realm: &str,
        path: &str,
    ) -> Result<Vec<configuration_entries::Model>, DbErr> {
        configuration_entries::Entity::find()
            .filter(configuration_entries::Column::ServerInstanceId.eq(server_id))
            .filter(configuration_entries::Column::Realm.eq(realm))
            .filter(configuration_entries::Column::Path.eq(path))
            .order_by_desc(configuration_entries::Column::Id)
            .all(&*self.db)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, testing};

    #[tokio::test]
    async fn get_returns_fallback_when_absent() {
        let db = testing::memory_db().await;
        let server = testing::insert_server(&db, "test").await;
        let store = ConfigStore::new(db);

        let v = store.get(server.id, "host", "port", "2302").await.unwrap();
        assert_eq!(v, "2302");
    }

    #[tokio::test]
    async fn second_write_supersedes_first() {
        let db = testing::memory_db().await;
        let server = testing::insert_server(&db, "test").await;
        let store = ConfigStore::new(db);
        let actor = Actor::new();

        store
            .set_many(server.id, &[ConfigurationChange::new("host", "port", "2302")], Some(actor))
            .await
            .unwrap();
        assert_eq!(store.get(server.id, "host", "port", "").await.unwrap(), "2302");

        store
            .set_many(server.id, &[ConfigurationChange::new("host", "port", "2402")], None)
            .await
            .unwrap();
        assert_eq!(store.get(server.id, "host", "port", "").await.unwrap(), "2402");

        let history = store.history(server.id, "host", "port").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|r| r.is_active).count(), 1);
        assert_eq!(history[0].value, "2402");
        assert!(history[0].is_active);
        assert_eq!(history[0].changed_by, None);
        assert_eq!(history[1].value, "2302");
        assert!(!history[1].is_active);
        assert_eq!(history[1].changed_by, Some(actor.0));
    }

    #[tokio::test]
    async fn second_active_row_for_a_key_is_rejected() {
        let db = testing::memory_db().await;
        let server = testing::insert_server(&db, "test").await;
        let store = ConfigStore::new(db.clone());
        store
            .set_many(server.id, &[ConfigurationChange::new("launch", "port", "2302")], None)
            .await
            .unwrap();

        let err = configuration_entries::Entity::insert(configuration_entries::ActiveModel {
            id: NotSet,
            server_instance_id: Set(server.id),
            realm: Set("launch".to_string()),
            path: Set("port".to_string()),
            value: Set("2402".to_string()),
            changed_by: Set(None),
            time_stamp: Set(Utc::now().into()),
            is_sensitive: Set(false),
            is_active: Set(true),
        })
        .exec(&*db)
        .await
        .unwrap_err();
        assert!(is_unique_violation(&err));

        assert_eq!(store.get(server.id, "launch", "port", "").await.unwrap(), "2302");
        assert_eq!(store.get_typed::<u16>(server.id, "launch", "port", 0).await.unwrap(), 2302);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_leave_one_active_row() {
        let db = testing::memory_db().await;
        let server = testing::insert_server(&db, "test").await;
        let store = ConfigStore::new(db);
        let server_id = server.id;

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .set_many(
                            server_id,
                            &[ConfigurationChange::new("launch", "port", format!("{}", 2302 + i))],
                            None,
                        )
                        .await
                })
            })
            .collect();
        for w in writers {
            w.await.unwrap().unwrap();
        }

        let history = store.history(server.id, "launch", "port").await.unwrap();
        assert_eq!(history.len(), 8);
        let active: Vec<_> = history.iter().filter(|r| r.is_active).collect();
        assert_eq!(active.len(), 1);

        let get = store.get(server.id, "launch", "port", "").await.unwrap();
        let typed = store.get_typed::<u16>(server.id, "launch", "port", 0).await.unwrap();
        let cfg = store.active_configuration(server.id).await.unwrap();
        assert_eq!(get, active[0].value);
        assert_eq!(typed.to_string(), get);
        assert_eq!(cfg.get("launch", "port"), Some(get.as_str()));
    }

    #[tokio::test]
    async fn keys_are_scoped_per_server_and_realm() {
        let db = testing::memory_db().await;
        let a = testing::insert_server(&db, "test").await;
        let b = testing::insert_server(&db, "test").await;
        let store = ConfigStore::new(db);

        store
            .set_many(
                a.id,
                &[
                    ConfigurationChange::new("server", "hostname", "alpha"),
                    ConfigurationChange::new("launch", "hostname", "ignored-realm"),
                ],
                None,
            )
            .await
            .unwrap();

        assert_eq!(store.get(a.id, "server", "hostname", "").await.unwrap(), "alpha");
        assert_eq!(store.get(b.id, "server", "hostname", "none").await.unwrap(), "none");

        let active = store.active_configuration(a.id).await.unwrap();
        assert_eq!(active.get("launch", "hostname"), Some("ignored-realm"));
        assert_eq!(active.realms(), vec!["launch", "server"]);
    }

    #[tokio::test]
    async fn malformed_typed_value_is_fatal() {
        let db = testing::memory_db().await;
        let server = testing::insert_server(&db, "test").await;
        let store = ConfigStore::new(db);

        store
            .set_many(server.id, &[ConfigurationChange::new("launch", "port", "23o2")], None)
            .await
            .unwrap();

        let err = store
            .get_typed::<u16>(server.id, "launch", "port", 2302)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let fallback = store
            .get_typed::<u16>(server.id, "launch", "missing", 2302)
            .await
            .unwrap();
        assert_eq!(fallback, 2302);
    }

    #[tokio::test]
    async fn sensitive_values_are_redacted_for_readers() {
        let db = testing::memory_db().await;
        let server = testing::insert_server(&db, "test").await;
        let store = ConfigStore::new(db);

        store
            .set_many(
                server.id,
                &[
                    ConfigurationChange::new("server", "password", "s3cret").sensitive(),
                    ConfigurationChange::new("server", "hostname", "alpha"),
                ],
                None,
            )
            .await
            .unwrap();

        let public = store.display_entries(server.id, false).await.unwrap();
        let pw = public.iter().find(|r| r.path == "password").unwrap();
        assert_eq!(pw.value, REDACTED);
        let host = public.iter().find(|r| r.path == "hostname").unwrap();
        assert_eq!(host.value, "alpha");

        let admin = store.display_entries(server.id, true).await.unwrap();
        let pw = admin.iter().find(|r| r.path == "password").unwrap();
        assert_eq!(pw.value, "s3cret");
    }

    #[test]
    fn active_configuration_iterates_one_realm() {
        let now = Utc::now();
        let row = |realm: &str, path: &str, value: &str, active: bool| configuration_entries::Model {
            id: 0,
            server_instance_id: Uuid::nil(),
            realm: realm.to_string(),
            path: path.to_string(),
            value: value.to_string(),
            changed_by: None,
            time_stamp: now.into(),
            is_sensitive: false,
            is_active: active,
        };
        let cfg = ActiveConfiguration::from_rows(&[
            row("server", "maxPlayers", "32", true),
            row("server", "hostname", "old", false),
            row("basic", "MaxMsgSend", "128", true),
        ]);

        let server: Vec<_> = cfg.realm("server").collect();
        assert_eq!(server, vec![("maxPlayers", "32")]);
        assert_eq!(cfg.get_typed::<u32>("server", "maxPlayers", 0).unwrap(), 32);
        assert_eq!(cfg.get_or("server", "hostname", "fallback"), "fallback");
    }
}
