//! SQLite sidecar index over `cache_entries`: a thin struct wrapping a
//! `SqlitePool`, manual row-to-struct mapping functions rather than
//! compile-time-checked query macros (the cache index has no fixed
//! `DATABASE_URL` to check against at build time).

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::CacheError;

/// One row of the sidecar index (§4.7's "size, generation, CRC, and
/// last-access time").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key_hash: String,
    pub bucket: String,
    pub object_name: String,
    pub generation: i64,
    pub size: u64,
    pub crc32c: Option<u32>,
    pub fully_cached: bool,
    pub last_access: DateTime<Utc>,
}

fn entry_from_row(row: &SqliteRow) -> Result<CacheEntry, CacheError> {
    let last_access_str: String = row.try_get("last_access")?;
    let last_access = DateTime::parse_from_rfc3339(&last_access_str)
        .map_err(|e| CacheError::SerializationError(format!("bad last_access '{last_access_str}': {e}")))?
        .with_timezone(&Utc);

    let crc32c: Option<i64> = row.try_get("crc32c")?;
    let size: i64 = row.try_get("size")?;

    Ok(CacheEntry {
        key_hash: row.try_get("key_hash")?,
        bucket: row.try_get("bucket")?,
        object_name: row.try_get("object_name")?,
        generation: row.try_get("generation")?,
        size: size as u64,
        crc32c: crc32c.map(|v| v as u32),
        fully_cached: row.try_get::<i64, _>("fully_cached")? != 0,
        last_access,
    })
}

pub struct CacheIndex {
    pool: SqlitePool,
}

impl CacheIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key_hash: &str) -> Result<Option<CacheEntry>, CacheError> {
        let row = sqlx::query("SELECT * FROM cache_entries WHERE key_hash = ?")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn upsert(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT INTO cache_entries (key_hash, bucket, object_name, generation, size, crc32c, fully_cached, last_access)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(key_hash) DO UPDATE SET
                size = excluded.size,
                crc32c = excluded.crc32c,
                fully_cached = excluded.fully_cached,
                last_access = excluded.last_access",
        )
        .bind(&entry.key_hash)
        .bind(&entry.bucket)
        .bind(&entry.object_name)
        .bind(entry.generation)
        .bind(entry.size as i64)
        .bind(entry.crc32c.map(|v| v as i64))
        .bind(entry.fully_cached as i64)
        .bind(entry.last_access.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn touch(&self, key_hash: &str, at: DateTime<Utc>) -> Result<(), CacheError> {
        sqlx::query("UPDATE cache_entries SET last_access = ? WHERE key_hash = ?")
            .bind(at.to_rfc3339())
            .bind(key_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, key_hash: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM cache_entries WHERE key_hash = ?")
            .bind(key_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All entries ordered oldest-accessed first, for LRU eviction (§4.7).
    pub async fn list_by_last_access_asc(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let rows = sqlx::query("SELECT * FROM cache_entries ORDER BY last_access ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn total_size(&self) -> Result<u64, CacheError> {
        let row = sqlx::query("SELECT COALESCE(SUM(size), 0) AS total FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.try_get("total")?;
        Ok(total as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DatabasePool;

    async fn index() -> CacheIndex {
        let pool = DatabasePool::in_memory().await.unwrap();
        CacheIndex::new(pool.pool().clone())
    }

    fn sample(hash: &str) -> CacheEntry {
        CacheEntry {
            key_hash: hash.to_string(),
            bucket: "b".to_string(),
            object_name: "a/b".to_string(),
            generation: 1,
            size: 100,
            crc32c: Some(42),
            fully_cached: true,
            last_access: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let idx = index().await;
        idx.upsert(&sample("h1")).await.unwrap();
        let got = idx.get("h1").await.unwrap().unwrap();
        assert_eq!(got.size, 100);
        assert_eq!(got.crc32c, Some(42));
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_conflict() {
        let idx = index().await;
        let mut entry = sample("h1");
        idx.upsert(&entry).await.unwrap();
        entry.size = 200;
        idx.upsert(&entry).await.unwrap();
        let got = idx.get("h1").await.unwrap().unwrap();
        assert_eq!(got.size, 200);
    }

    #[tokio::test]
    async fn list_by_last_access_orders_oldest_first() {
        let idx = index().await;
        let mut older = sample("old");
        older.last_access = Utc::now() - chrono::Duration::seconds(60);
        let newer = sample("new");
        idx.upsert(&newer).await.unwrap();
        idx.upsert(&older).await.unwrap();

        let all = idx.list_by_last_access_asc().await.unwrap();
        assert_eq!(all[0].key_hash, "old");
        assert_eq!(all[1].key_hash, "new");
    }

    #[tokio::test]
    async fn total_size_sums_all_entries() {
        let idx = index().await;
        idx.upsert(&sample("a")).await.unwrap();
        idx.upsert(&sample("b")).await.unwrap();
        assert_eq!(idx.total_size().await.unwrap(), 200);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let idx = index().await;
        idx.upsert(&sample("h1")).await.unwrap();
        idx.delete("h1").await.unwrap();
        assert!(idx.get("h1").await.unwrap().is_none());
    }
}
