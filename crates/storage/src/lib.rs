use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use shared::domain::{AppliedControl, Asset, AssetId, Control, ControlId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Assets,
    Controls,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Assets => "assets",
            Collection::Controls => "controls",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Full contents of one collection, emitted after every write to it.
#[derive(Debug, Clone)]
pub enum StoreSnapshot {
    Assets(Vec<Asset>),
    Controls(Vec<Control>),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {collection}/{id} does not exist")]
    NotFound { collection: Collection, id: String },
    #[error("document {collection}/{id} is not a JSON object")]
    Malformed { collection: Collection, id: String },
    #[error("document encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Collaborative document store holding the `assets` and `controls`
/// collections. Reads always return whole collections; concurrent writers are
/// last-writer-wins.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_assets(&self) -> Result<Vec<Asset>, StoreError>;
    async fn list_controls(&self) -> Result<Vec<Control>, StoreError>;
    async fn create_asset(&self, asset: &Asset) -> Result<(), StoreError>;
    /// Overwrites only the `controls` and `last_review` fields of the asset.
    async fn update_asset_controls(
        &self,
        asset_id: &AssetId,
        controls: &[AppliedControl],
        last_review: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn create_control(&self, control: &Control) -> Result<(), StoreError>;
    async fn delete_control(&self, control_id: &ControlId) -> Result<(), StoreError>;
    fn subscribe(&self) -> broadcast::Receiver<StoreSnapshot>;
}

pub fn namespace_for(app_id: &str) -> String {
    format!("artifacts/{app_id}/public/data")
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
    namespace: String,
    events: broadcast::Sender<StoreSnapshot>,
}

impl Storage {
    pub async fn new(database_url: &str, app_id: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url '{database_url}'"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let (events, _) = broadcast::channel(256);
        Ok(Self {
            pool,
            namespace: namespace_for(app_id),
            events,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn put_document<T: Serialize + Sync>(
        &self,
        collection: Collection,
        doc_id: &str,
        document: &T,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(document)?;
        sqlx::query(
            "INSERT INTO documents (namespace, collection, doc_id, body, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(namespace, collection, doc_id)
             DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        )
        .bind(&self.namespace)
        .bind(collection.name())
        .bind(doc_id)
        .bind(body)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn merge_document(
        &self,
        collection: Collection,
        doc_id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let row = sqlx::query(
            "SELECT body FROM documents WHERE namespace = ? AND collection = ? AND doc_id = ?",
        )
        .bind(&self.namespace)
        .bind(collection.name())
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound {
                collection,
                id: doc_id.to_string(),
            });
        };

        let mut body: Value = serde_json::from_str(&row.try_get::<String, _>("body")?)?;
        let Some(object) = body.as_object_mut() else {
            return Err(StoreError::Malformed {
                collection,
                id: doc_id.to_string(),
            });
        };
        object.extend(fields);

        sqlx::query(
            "UPDATE documents SET body = ?, updated_at = ?
             WHERE namespace = ? AND collection = ? AND doc_id = ?",
        )
        .bind(serde_json::to_string(&body)?)
        .bind(Utc::now())
        .bind(&self.namespace)
        .bind(collection.name())
        .bind(doc_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_document(&self, collection: Collection, doc_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "DELETE FROM documents WHERE namespace = ? AND collection = ? AND doc_id = ?",
        )
        .bind(&self.namespace)
        .bind(collection.name())
        .bind(doc_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            debug!(%collection, doc_id, "delete of missing document ignored");
        }
        Ok(())
    }

    async fn list_documents<T: DeserializeOwned>(
        &self,
        collection: Collection,
    ) -> Result<Vec<T>, StoreError> {
        let rows = sqlx::query(
            "SELECT doc_id, body FROM documents
             WHERE namespace = ? AND collection = ?
             ORDER BY rowid",
        )
        .bind(&self.namespace)
        .bind(collection.name())
        .fetch_all(&self.pool)
        .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let doc_id: String = row.try_get("doc_id")?;
            let body: String = row.try_get("body")?;
            match serde_json::from_str(&body) {
                Ok(document) => documents.push(document),
                Err(error) => {
                    warn!(%collection, doc_id, %error, "skipping undecodable document");
                }
            }
        }
        Ok(documents)
    }

    async fn publish(&self, collection: Collection) {
        if self.events.receiver_count() == 0 {
            return;
        }
        let snapshot = match collection {
            Collection::Assets => self.list_assets().await.map(StoreSnapshot::Assets),
            Collection::Controls => self.list_controls().await.map(StoreSnapshot::Controls),
        };
        match snapshot {
            Ok(snapshot) => {
                let _ = self.events.send(snapshot);
            }
            Err(error) => warn!(%collection, %error, "failed to build change snapshot"),
        }
    }
}

#[async_trait]
impl DocumentStore for Storage {
    async fn list_assets(&self) -> Result<Vec<Asset>, StoreError> {
        self.list_documents(Collection::Assets).await
    }

    async fn list_controls(&self) -> Result<Vec<Control>, StoreError> {
        self.list_documents(Collection::Controls).await
    }

    async fn create_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        self.put_document(Collection::Assets, asset.id.as_str(), asset)
            .await?;
        self.publish(Collection::Assets).await;
        Ok(())
    }

    async fn update_asset_controls(
        &self,
        asset_id: &AssetId,
        controls: &[AppliedControl],
        last_review: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut fields = Map::new();
        fields.insert("controls".into(), serde_json::to_value(controls)?);
        fields.insert("last_review".into(), serde_json::to_value(last_review)?);
        self.merge_document(Collection::Assets, asset_id.as_str(), fields)
            .await?;
        self.publish(Collection::Assets).await;
        Ok(())
    }

    async fn create_control(&self, control: &Control) -> Result<(), StoreError> {
        self.put_document(Collection::Controls, control.id.as_str(), control)
            .await?;
        self.publish(Collection::Controls).await;
        Ok(())
    }

    async fn delete_control(&self, control_id: &ControlId) -> Result<(), StoreError> {
        self.delete_document(Collection::Controls, control_id.as_str())
            .await?;
        self.publish(Collection::Controls).await;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreSnapshot> {
        self.events.subscribe()
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
