use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use shardguard_common::{Error, Result};

use crate::{SaveRequest, Storage};

const CREATE_TABLE_SNAPSHOTS: &str = "CREATE TABLE IF NOT EXISTS snapshots (
        cluster_name TEXT NOT NULL PRIMARY KEY,
        created_at INTEGER NOT NULL,
        data BLOB NOT NULL
    )";

const CREATE_TABLE_RECOVERIES: &str = "CREATE TABLE IF NOT EXISTS recoveries (
        id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
        cluster_name TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        data BLOB NOT NULL
    )";

const SAVE_SNAPSHOT: &str = "INSERT INTO snapshots(cluster_name, created_at, data)
        VALUES(?, ?, ?)
        ON CONFLICT(cluster_name) DO UPDATE SET
            created_at = excluded.created_at,
            data = excluded.data";

const SAVE_RECOVERY: &str = "INSERT INTO recoveries(cluster_name, created_at, data)
        VALUES(?, ?, ?)";

const GET_CLUSTERS: &str = "SELECT cluster_name FROM snapshots ORDER BY cluster_name";

const GET_SNAPSHOT: &str = "SELECT data FROM snapshots WHERE cluster_name = ?";

const GET_RECOVERIES: &str = "SELECT data FROM recoveries WHERE cluster_name = ? ORDER BY id";

/// Location and per-query budget of the SQLite store.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub file_name: String,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            file_name: "shardguard.db".to_string(),
            connect_timeout: Duration::from_secs(1),
            query_timeout: Duration::from_secs(1),
        }
    }
}

/// SQLite-backed [`Storage`].
pub struct SqliteStorage {
    pool: SqlitePool,
    config: StorageConfig,
}

impl SqliteStorage {
    pub async fn open(config: StorageConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.file_name)
            .create_if_missing(true);

        let connect = SqlitePoolOptions::new().max_connections(1).connect_with(options);
        let pool = tokio::time::timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| Error::Storage("connect timeout".into()))?
            .map_err(storage_err)?;

        for query in [CREATE_TABLE_SNAPSHOTS, CREATE_TABLE_RECOVERIES] {
            sqlx::query(query).execute(&pool).await.map_err(storage_err)?;
        }

        Ok(Self { pool, config })
    }

    /// A private database living in memory, used by the test suites.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open(StorageConfig {
            file_name: ":memory:".to_string(),
            ..StorageConfig::default()
        })
        .await
    }

    async fn run<T>(
        &self,
        fut: impl std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
    ) -> Result<T> {
        tokio::time::timeout(self.config.query_timeout, fut)
            .await
            .map_err(|_| Error::Storage("query timeout".into()))?
            .map_err(storage_err)
    }
}

fn storage_err(err: sqlx::Error) -> Error {
    Error::Storage(err.to_string())
}

fn encode(data: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(data).map_err(|e| Error::Storage(e.to_string()))
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<Value> {
    let blob: Vec<u8> = row.try_get("data").map_err(storage_err)?;
    serde_json::from_slice(&blob).map_err(|e| Error::Storage(e.to_string()))
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_snapshot(&self, req: SaveRequest) -> Result<()> {
        let data = encode(&req.data)?;
        self.run(
            sqlx::query(SAVE_SNAPSHOT)
                .bind(&req.cluster_name)
                .bind(req.created_at)
                .bind(data)
                .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    async fn save_recovery(&self, req: SaveRequest) -> Result<()> {
        let data = encode(&req.data)?;
        self.run(
            sqlx::query(SAVE_RECOVERY)
                .bind(&req.cluster_name)
                .bind(req.created_at)
                .bind(data)
                .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    async fn get_clusters(&self) -> Result<Vec<String>> {
        let rows = self
            .run(sqlx::query(GET_CLUSTERS).fetch_all(&self.pool))
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("cluster_name").map_err(storage_err))
            .collect()
    }

    async fn get_cluster_snapshot(&self, cluster_name: &str) -> Result<Value> {
        let row = self
            .run(
                sqlx::query(GET_SNAPSHOT)
                    .bind(cluster_name)
                    .fetch_optional(&self.pool),
            )
            .await?;

        match row {
            Some(row) => decode(&row),
            None => Err(Error::Storage("empty result".into())),
        }
    }

    async fn get_recoveries(&self, cluster_name: &str) -> Result<Vec<Value>> {
        let rows = self
            .run(
                sqlx::query(GET_RECOVERIES)
                    .bind(cluster_name)
                    .fetch_all(&self.pool),
            )
            .await?;

        rows.iter().map(decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shardguard_common::Snapshot;

    #[tokio::test]
    async fn test_snapshot_upsert_keeps_only_the_latest() {
        let store = SqliteStorage::open_in_memory().await.unwrap();

        store
            .save_snapshot(SaveRequest {
                cluster_name: "sandbox".into(),
                created_at: 100,
                data: json!({"created": 100}),
            })
            .await
            .unwrap();
        store
            .save_snapshot(SaveRequest {
                cluster_name: "sandbox".into(),
                created_at: 200,
                data: json!({"created": 200}),
            })
            .await
            .unwrap();

        let snapshot = store.get_cluster_snapshot("sandbox").await.unwrap();
        assert_eq!(snapshot["created"], 200);
        assert_eq!(store.get_clusters().await.unwrap(), vec!["sandbox"]);
    }

    #[tokio::test]
    async fn test_missing_snapshot() {
        let store = SqliteStorage::open_in_memory().await.unwrap();
        let err = store.get_cluster_snapshot("nope").await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_recoveries_are_append_only() {
        let store = SqliteStorage::open_in_memory().await.unwrap();

        for i in 0..3 {
            store
                .save_recovery(SaveRequest {
                    cluster_name: "sandbox".into(),
                    created_at: i,
                    data: json!({"seq": i}),
                })
                .await
                .unwrap();
        }

        let recoveries = store.get_recoveries("sandbox").await.unwrap();
        assert_eq!(recoveries.len(), 3);
        assert_eq!(recoveries[0]["seq"], 0);
        assert_eq!(recoveries[2]["seq"], 2);

        assert!(store.get_recoveries("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_codec_round_trip() {
        let store = SqliteStorage::open_in_memory().await.unwrap();

        let snapshot = Snapshot {
            created: 42,
            ..Snapshot::default()
        };
        store
            .save_snapshot(SaveRequest {
                cluster_name: "sandbox".into(),
                created_at: snapshot.created,
                data: serde_json::to_value(&snapshot).unwrap(),
            })
            .await
            .unwrap();

        let stored = store.get_cluster_snapshot("sandbox").await.unwrap();
        let decoded: Snapshot = serde_json::from_value(stored).unwrap();
        assert_eq!(decoded, snapshot);
    }
}
