//! MySQL row source: one `datamap_<shard>` table per shard.
//!
//! The pool is async (`sqlx`); pages are fetched by blocking on the shared
//! tokio runtime handle from the export worker threads. Never call
//! [`RowSource::fetch_page`] from inside the runtime itself.

use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use tokio::runtime::Handle;

use datamap_core::ShardName;

use crate::error::SourceError;
use crate::source::{PointRow, RowSource};

/// Row source backed by the read-only datamap tables.
#[derive(Debug, Clone)]
pub struct SqlRowSource {
    pool: MySqlPool,
    runtime: Handle,
}

impl SqlRowSource {
    /// Connect a pool with `max_connections`; one per export worker is
    /// enough since each worker holds a single query at a time.
    pub fn connect(url: &str, max_connections: u32, runtime: Handle) -> Result<Self, SourceError> {
        let pool = runtime.block_on(
            MySqlPoolOptions::new()
                .max_connections(max_connections)
                .connect(url),
        )?;
        Ok(Self { pool, runtime })
    }

    pub fn table_name(shard: &ShardName) -> String {
        format!("datamap_{shard}")
    }

    /// Keyset page query; the age bucket is whole months since `modified`.
    fn page_query(shard: &ShardName) -> String {
        format!(
            "SELECT `grid`, CAST(ROUND(DATEDIFF(CURDATE(), `modified`) / 30) AS UNSIGNED) AS `num` \
             FROM {} WHERE `grid` > ? ORDER BY `grid` LIMIT ?",
            Self::table_name(shard)
        )
    }
}

impl RowSource for SqlRowSource {
    fn fetch_page(
        &self,
        shard: &ShardName,
        after: &[u8],
        limit: usize,
    ) -> Result<Vec<PointRow>, SourceError> {
        let sql = Self::page_query(shard);
        let rows = self.runtime.block_on(
            sqlx::query(&sql)
                .bind(after)
                .bind(limit as u64)
                .fetch_all(&self.pool),
        )?;

        rows.iter()
            .map(|row| -> Result<PointRow, SourceError> {
                let grid: Vec<u8> = row.try_get("grid")?;
                let num: u64 = row.try_get("num")?;
                Ok(PointRow {
                    grid,
                    age_bucket: u32::try_from(num).unwrap_or(u32::MAX),
                })
            })
            .collect()
    }
}
