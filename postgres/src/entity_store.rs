//! `PostgreSQL`-backed [`EntityStore`].

use parkgrid_core::entity::Entity;
use parkgrid_core::key::EntityKey;
use parkgrid_core::store::{
    EntityStore, ListQuery, Mutation, Page, PageToken, StoreError, StoreFuture, Version,
    Versioned, WriteBatch,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;

/// `SQLSTATE` codes that mean another transaction got there first.
const UNIQUE_VIOLATION: &str = "23505";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

/// Durable entity store on `PostgreSQL`.
///
/// Every record is one row of the `entities` table:
///
/// ```sql
/// CREATE TABLE entities (
///     key TEXT COLLATE "C" PRIMARY KEY,
///     kind TEXT NOT NULL,
///     data JSONB NOT NULL,
///     version BIGINT NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
/// );
/// ```
///
/// A commit runs in one transaction. Existing rows touched by the batch are
/// locked with `SELECT ... FOR UPDATE` (in key order) before any
/// precondition is checked, so a concurrent commit on the same rows either
/// waits or fails with [`StoreError::Conflict`]. Two inserts racing on a
/// key that did not exist are told apart by the primary key: the loser gets
/// a unique violation, reported as a conflict.
///
/// # Example
///
/// ```no_run
/// use parkgrid_postgres::PostgresEntityStore;
/// use parkgrid_core::store::EntityStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresEntityStore::new("postgres://localhost/parkgrid").await?;
/// store.migrate().await?;
/// store.health_check().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresEntityStore {
    pool: PgPool,
}

impl PostgresEntityStore {
    /// Connect with a default pool of 10 connections.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        Self::connect(database_url, 10).await
    }

    /// Connect with an explicit pool size.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect: {e}")))?;
        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    /// Use an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `entities` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Migration failed: {e}")))
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn get_record(&self, key: EntityKey) -> Result<Option<Versioned<Entity>>, StoreError> {
        let row = sqlx::query("SELECT data, version FROM entities WHERE key = $1")
            .bind(key.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn list_records(&self, query: ListQuery) -> Result<Page<Versioned<Entity>>, StoreError> {
        let limit = query.effective_limit();
        let prefix = query.parent.as_ref().map(|parent| format!("{parent}/"));
        let after = query.page_token.as_ref().map(|t| t.as_str().to_string());

        #[allow(clippy::cast_possible_wrap)] // Clamped to MAX_PAGE_SIZE
        let rows = sqlx::query(
            r"
            SELECT data, version
            FROM entities
            WHERE kind = $1
              AND ($2::TEXT IS NULL OR starts_with(key, $2))
              AND ($3::TEXT IS NULL OR key > $3)
            ORDER BY key
            LIMIT $4
            ",
        )
        .bind(query.kind.as_str())
        .bind(prefix)
        .bind(after)
        .bind((limit + 1) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut items = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        let next = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|record| PageToken::after(&record.value.key()))
        } else {
            None
        };
        Ok(Page { items, next })
    }

    async fn commit_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        batch.ensure_unique_keys()?;
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(backend)?;
        match Self::apply(&mut tx, batch).await {
            Ok(size) => {
                tx.commit().await.map_err(backend)?;
                metrics::counter!("parkgrid_postgres_commits_total").increment(1);
                tracing::trace!(mutations = size, "PostgreSQL commit applied");
                Ok(())
            }
            Err(error) => {
                // Dropping the transaction rolls it back as well.
                let _ = tx.rollback().await;
                if matches!(error, StoreError::Conflict { .. }) {
                    metrics::counter!("parkgrid_postgres_conflicts_total").increment(1);
                }
                Err(error)
            }
        }
    }

    async fn apply(
        tx: &mut Transaction<'static, Postgres>,
        batch: WriteBatch,
    ) -> Result<usize, StoreError> {
        let mut keys: Vec<EntityKey> = batch.mutations().iter().map(Mutation::key).collect();
        keys.sort_by_cached_key(ToString::to_string);
        let first = keys
            .first()
            .cloned()
            .ok_or_else(|| StoreError::InvalidBatch("empty batch".into()))?;
        let canonical: Vec<String> = keys.iter().map(ToString::to_string).collect();

        let locked = sqlx::query(
            "SELECT key, version FROM entities WHERE key = ANY($1) ORDER BY key FOR UPDATE",
        )
        .bind(&canonical)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| classify(e, &first, None))?;

        let mut current: HashMap<String, Version> = HashMap::with_capacity(locked.len());
        for row in &locked {
            let key: String = row.try_get("key").map_err(backend)?;
            current.insert(key, to_version(row.try_get("version").map_err(backend)?)?);
        }

        for mutation in batch.mutations() {
            let key = mutation.key();
            mutation
                .precondition()
                .check(&key, current.get(&key.to_string()).copied())?;
        }

        let size = batch.len();
        for mutation in batch.into_mutations() {
            match mutation {
                Mutation::Put { entity, .. } => {
                    let key = entity.key();
                    let data = serde_json::to_value(&entity)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?;
                    match current.get(&key.to_string()).copied() {
                        Some(version) => {
                            sqlx::query(
                                r"
                                UPDATE entities
                                SET data = $2, version = $3, updated_at = now()
                                WHERE key = $1
                                ",
                            )
                            .bind(key.to_string())
                            .bind(data)
                            .bind(from_version(version.next())?)
                            .execute(&mut **tx)
                            .await
                            .map_err(|e| classify(e, &key, Some(version)))?;
                        }
                        None => {
                            sqlx::query(
                                r"
                                INSERT INTO entities (key, kind, data, version)
                                VALUES ($1, $2, $3, $4)
                                ",
                            )
                            .bind(key.to_string())
                            .bind(entity.kind().as_str())
                            .bind(data)
                            .bind(from_version(Version::FIRST)?)
                            .execute(&mut **tx)
                            .await
                            .map_err(|e| classify(e, &key, None))?;
                        }
                    }
                }
                Mutation::Delete { key, .. } => {
                    let expected = current.get(&key.to_string()).copied();
                    sqlx::query("DELETE FROM entities WHERE key = $1")
                        .bind(key.to_string())
                        .execute(&mut **tx)
                        .await
                        .map_err(|e| classify(e, &key, expected))?;
                }
            }
        }
        Ok(size)
    }
}

impl EntityStore for PostgresEntityStore {
    fn get(&self, key: EntityKey) -> StoreFuture<'_, Option<Versioned<Entity>>> {
        Box::pin(self.get_record(key))
    }

    fn list(&self, query: ListQuery) -> StoreFuture<'_, Page<Versioned<Entity>>> {
        Box::pin(self.list_records(query))
    }

    fn commit(&self, batch: WriteBatch) -> StoreFuture<'_, ()> {
        Box::pin(self.commit_batch(batch))
    }

    fn health_check(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(backend)?;
            Ok(())
        })
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

fn decode_row(row: &PgRow) -> Result<Versioned<Entity>, StoreError> {
    let data: serde_json::Value = row.try_get("data").map_err(backend)?;
    let version = to_version(row.try_get("version").map_err(backend)?)?;
    let entity: Entity =
        serde_json::from_value(data).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(Versioned::new(version, entity))
}

fn to_version(raw: i64) -> Result<Version, StoreError> {
    u64::try_from(raw)
        .map(Version::new)
        .map_err(|_| StoreError::Serialization(format!("negative version {raw}")))
}

fn from_version(version: Version) -> Result<i64, StoreError> {
    i64::try_from(version.value())
        .map_err(|_| StoreError::Serialization(format!("version {version} exceeds BIGINT")))
}

fn backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

/// Maps lost races to `Conflict` and everything else to `Backend`.
///
/// A unique violation means a concurrent insert created `key` first; a
/// deadlock or serialization failure means the locks were contended and the
/// whole attempt should be retried.
fn classify(error: sqlx::Error, key: &EntityKey, expected: Option<Version>) -> StoreError {
    let code = error
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned());
    match code.as_deref() {
        Some(UNIQUE_VIOLATION) => StoreError::Conflict {
            key: key.clone(),
            expected: None,
            actual: Some(Version::FIRST),
        },
        Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED) => StoreError::Conflict {
            key: key.clone(),
            expected,
            actual: None,
        },
        _ => backend(error),
    }
}
