use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::debug;

use crate::{StateError, StateStore, Versioned};

/// SQLite-based state store.
///
/// Compare-and-set is a conditional `UPDATE ... WHERE revision = ?`; creation
/// is an `INSERT` that does nothing when the key already exists. In both cases
/// zero affected rows means another writer got there first.
#[derive(Debug, Clone)]
pub struct SqliteStateStore {
  pool: SqlitePool,
}

impl SqliteStateStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) the database at `url` and run migrations.
  pub async fn connect(url: &str) -> Result<Self, StateError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    debug!(url, "state_store_opened");
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(&self.pool).await
  }

  async fn revision(&self, key: &str) -> Result<Option<u64>, StateError> {
    let revision: Option<i64> =
      sqlx::query_scalar("SELECT revision FROM state_entries WHERE key = ?")
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
    revision.map(to_revision).transpose()
  }
}

fn to_revision(raw: i64) -> Result<u64, StateError> {
  u64::try_from(raw).map_err(|_| StateError::Codec(format!("negative revision {raw}")))
}

fn to_column(revision: u64) -> Result<i64, StateError> {
  i64::try_from(revision)
    .map_err(|_| StateError::Codec(format!("revision {revision} out of range")))
}

impl From<sqlx::migrate::MigrateError> for StateError {
  fn from(err: sqlx::migrate::MigrateError) -> Self {
    StateError::Unavailable(format!("migration failed: {err}"))
  }
}

#[async_trait]
impl StateStore for SqliteStateStore {
  async fn get(&self, key: &str) -> Result<Versioned, StateError> {
    let row: Option<(Vec<u8>, i64)> =
      sqlx::query_as("SELECT value, revision FROM state_entries WHERE key = ?")
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

    let (value, revision) = row.ok_or_else(|| StateError::NotFound(key.to_string()))?;
    Ok(Versioned {
      value,
      revision: to_revision(revision)?,
    })
  }

  async fn set(&self, key: &str, value: Vec<u8>, expected: Option<u64>) -> Result<u64, StateError> {
    let (result, revision) = match expected {
      None => {
        let result = sqlx::query(
          r#"
            INSERT INTO state_entries (key, value, revision, updated_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(&value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        (result, 1)
      }
      Some(expected) => {
        let next = expected + 1;
        let result = sqlx::query(
          r#"
            UPDATE state_entries
            SET value = ?, revision = ?, updated_at = ?
            WHERE key = ? AND revision = ?
            "#,
        )
        .bind(&value)
        .bind(to_column(next)?)
        .bind(Utc::now())
        .bind(key)
        .bind(to_column(expected)?)
        .execute(&self.pool)
        .await?;
        (result, next)
      }
    };

    if result.rows_affected() == 0 {
      return Err(StateError::Conflict {
        key: key.to_string(),
        expected,
        actual: self.revision(key).await?,
      });
    }

    Ok(revision)
  }

  async fn delete(&self, key: &str) -> Result<(), StateError> {
    sqlx::query("DELETE FROM state_entries WHERE key = ?")
      .bind(key)
      .execute(&self.pool)
      .await?;
    Ok(())
  }
}
