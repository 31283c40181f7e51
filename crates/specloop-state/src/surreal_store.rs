//! SurrealDB-backed SpecStore implementation
//!
//! Uses [`SpecRow`] and [`IterationRow`] for persistence, converting to and
//! from the model types at the boundary.

use async_trait::async_trait;
use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::migrations;
use crate::model::{IterationId, IterationRecord, SpecId, Specification};
use crate::schema::{IterationRow, SpecRow};
use crate::storage_traits::{ensure_valid, SpecStore, StorageResult};

const DEFAULT_NAMESPACE: &str = "specloop";
const DEFAULT_DATABASE: &str = "main";

/// Connection settings for a remote SurrealDB instance.
#[derive(Debug, Clone)]
pub struct SurrealConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    /// Sign in as root instead of a database user
    pub is_root: bool,
}

impl SurrealConfig {
    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "specloop")
    /// - SURREALDB_DATABASE (optional, default: "main")
    /// - SURREALDB_ROOT (optional, default: "false")
    pub fn from_env() -> Result<Self, String> {
        let endpoint =
            std::env::var("SURREALDB_ENDPOINT").map_err(|_| "SURREALDB_ENDPOINT not set")?;
        let username =
            std::env::var("SURREALDB_USERNAME").map_err(|_| "SURREALDB_USERNAME not set")?;
        let password =
            std::env::var("SURREALDB_PASSWORD").map_err(|_| "SURREALDB_PASSWORD not set")?;
        let namespace = std::env::var("SURREALDB_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
        let database =
            std::env::var("SURREALDB_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.to_string());
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            endpoint,
            username,
            password,
            namespace,
            database,
            is_root,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CountRow {
    n: u64,
}

#[derive(Debug, Deserialize)]
struct IterIdRow {
    #[allow(dead_code)]
    iter_id: String,
}

/// SurrealDB-backed implementation of [`SpecStore`].
pub struct SurrealSpecStore {
    db: Surreal<Any>,
}

impl SurrealSpecStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Connect to any engine URL (`mem://`, `surrealkv://path`, `ws://host`).
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to {url}: {e}")))?;

        db.use_ns(DEFAULT_NAMESPACE)
            .use_db(DEFAULT_DATABASE)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!(url = %url, "SurrealSpecStore connected");
        Ok(Self { db })
    }

    /// Connect to a remote instance with credentials.
    pub async fn connect_remote(config: &SurrealConfig) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(&config.endpoint)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        if config.is_root {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StorageError::Connection(format!("Root auth failed: {e}")))?;
        } else {
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StorageError::Connection(format!("DB auth failed: {e}")))?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!(endpoint = %config.endpoint, "SurrealSpecStore connected (remote)");
        Ok(Self { db })
    }

    /// Create from environment variables.
    ///
    /// Remote credentials (`SURREALDB_ENDPOINT` ...) win, then
    /// `SURREALDB_URL`, then local persistence under `local_path`.
    pub async fn from_env(local_path: &str) -> StorageResult<Self> {
        if let Ok(config) = SurrealConfig::from_env() {
            return Self::connect_remote(&config).await;
        }
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return Self::connect(&url).await;
        }

        std::fs::create_dir_all(local_path).map_err(|e| {
            StorageError::Connection(format!(
                "Failed to create database directory {local_path}: {e}"
            ))
        })?;
        info!(path = %local_path, "No SurrealDB config found, using local persistence");
        Self::connect(&format!("surrealkv://{local_path}")).await
    }

    async fn next_seq(&self, spec_id: &str) -> StorageResult<u64> {
        let mut res = self
            .db
            .query("SELECT count() AS n FROM iterations WHERE spec_id = $sid GROUP ALL")
            .bind(("sid", spec_id.to_string()))
            .await?;
        let rows: Vec<CountRow> = res.take(0)?;
        Ok(rows.first().map(|r| r.n).unwrap_or(0))
    }

    async fn iteration_exists(&self, iter_id: &str) -> StorageResult<bool> {
        let mut res = self
            .db
            .query("SELECT iter_id FROM iterations WHERE iter_id = $iid")
            .bind(("iid", iter_id.to_string()))
            .await?;
        let rows: Vec<IterIdRow> = res.take(0)?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl SpecStore for SurrealSpecStore {
    async fn get_spec(&self, spec_id: &SpecId) -> StorageResult<Specification> {
        let mut res = self
            .db
            .query("SELECT * FROM specs WHERE spec_id = $sid")
            .bind(("sid", spec_id.0.clone()))
            .await?;
        let rows: Vec<SpecRow> = res.take(0)?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::NotFound {
                spec_id: spec_id.0.clone(),
            })?
            .into_spec()
    }

    async fn put_spec(&self, spec_id: &SpecId, spec: &Specification) -> StorageResult<()> {
        ensure_valid(spec_id)?;
        let row = SpecRow::from_spec(spec_id.as_str(), spec)?;
        debug!(spec_id = %spec_id, digest = %row.digest, "storing spec");

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE specs WHERE spec_id = $sid; \
                 CREATE specs CONTENT $row; \
                 COMMIT TRANSACTION;",
            )
            .bind(("sid", spec_id.0.clone()))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    async fn save_iteration(&self, record: &IterationRecord) -> StorageResult<IterationId> {
        ensure_valid(&record.spec_id)?;
        if self.iteration_exists(&record.iter_id.0).await? {
            return Err(StorageError::DuplicateIteration {
                iter_id: record.iter_id.0.clone(),
            });
        }

        let seq = self.next_seq(&record.spec_id.0).await?;
        let row = IterationRow::from_record(seq, record)?;
        debug!(spec_id = %record.spec_id, iter_id = %record.iter_id, seq, "appending iteration");

        // Single CREATE: the unique (spec_id, seq) index rejects a racing writer.
        let _created: Option<IterationRow> = self.db.create("iterations").content(row).await?;
        Ok(record.iter_id.clone())
    }

    async fn get_iterations(&self, spec_id: &SpecId) -> StorageResult<Vec<IterationRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM iterations WHERE spec_id = $sid ORDER BY timestamp ASC, seq ASC")
            .bind(("sid", spec_id.0.clone()))
            .await?;
        let rows: Vec<IterationRow> = res.take(0)?;
        rows.into_iter().map(IterationRow::into_record).collect()
    }
}
