//! Row sources: keyset-paginated producers of point observations.

use std::collections::BTreeMap;

use datamap_core::ShardName;

use crate::error::SourceError;

/// One stored observation: grid cell key plus age bucket in months.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointRow {
    pub grid: Vec<u8>,
    pub age_bucket: u32,
}

/// A paged producer of rows for one shard.
///
/// Rows come back in ascending `grid` order, strictly after `after`
/// (an empty slice means "from the start"), at most `limit` per page. An
/// empty page means the shard is exhausted.
pub trait RowSource: Send + Sync {
    fn fetch_page(
        &self,
        shard: &ShardName,
        after: &[u8],
        limit: usize,
    ) -> Result<Vec<PointRow>, SourceError>;
}

/// Rows held in memory, keyed by shard.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    shards: BTreeMap<ShardName, Vec<PointRow>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rows for `shard`; they are kept sorted by key.
    pub fn with_rows(mut self, shard: impl Into<ShardName>, rows: Vec<PointRow>) -> Self {
        let entry = self.shards.entry(shard.into()).or_default();
        entry.extend(rows);
        entry.sort_by(|a, b| a.grid.cmp(&b.grid));
        self
    }
}

impl RowSource for MemorySource {
    fn fetch_page(
        &self,
        shard: &ShardName,
        after: &[u8],
        limit: usize,
    ) -> Result<Vec<PointRow>, SourceError> {
        let rows = self
            .shards
            .get(shard)
            .ok_or_else(|| SourceError::UnknownShard(shard.clone()))?;
        let start = rows.partition_point(|row| row.grid.as_slice() <= after);
        Ok(rows[start..].iter().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: u8) -> PointRow {
        PointRow {
            grid: vec![0, 0, 0, key, 0, 0, 0, 0],
            age_bucket: 0,
        }
    }

    #[test]
    fn pages_follow_keyset_cursor() {
        let source = MemorySource::new().with_rows("ne", vec![row(3), row(1), row(2)]);
        let shard = ShardName::from("ne");

        let first = source.fetch_page(&shard, &[], 2).unwrap();
        assert_eq!(first, vec![row(1), row(2)]);

        let second = source.fetch_page(&shard, &first[1].grid, 2).unwrap();
        assert_eq!(second, vec![row(3)]);

        let done = source.fetch_page(&shard, &second[0].grid, 2).unwrap();
        assert!(done.is_empty());
    }

    #[test]
    fn unknown_shard_is_an_error() {
        let err = MemorySource::new()
            .fetch_page(&ShardName::from("sw"), &[], 10)
            .unwrap_err();
        assert!(matches!(err, SourceError::UnknownShard(_)));
    }
}
