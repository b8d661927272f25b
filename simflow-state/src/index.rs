use itertools::Itertools;
use simflow_errors::{invalid_data, SimError, SimResult};

// Most of the time entity ids arrive in blocks of contiguous values
// (e.g. [1, 2, 3, 7, 8, 9]). The index groups ids into such blocks and
// stores, per block, the id range and the block's starting position in the
// id array. A lookup only has to find the containing block, which is
// O(log b) over the (sorted) block array; the row then follows from
// `id - first + offset`.

#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexBlock {
    first: i32,
    last: i32,
    offset: usize,
}

/// A bijective map from external entity ids to internal row positions,
/// compressed over contiguous id runs.
///
/// Ids keep their insertion order: the row position of an id is its position
/// in the id array, regardless of id value. Duplicate ids are a data error.
#[derive(Debug, Clone, Default)]
pub struct Index {
    ids: Vec<i32>,
    blocks: Vec<IndexBlock>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index over the given ids.
    pub fn from_ids(ids: &[i32]) -> SimResult<Self> {
        let mut index = Self::new();
        index.add_ids(ids)?;
        Ok(index)
    }

    /// Number of ids in the index.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// All ids, in insertion order.
    pub fn ids(&self) -> &[i32] {
        &self.ids
    }

    /// Number of compressed blocks; 1 for fully contiguous ids.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Set the full id array. Ids already present cannot be changed: if the
    /// index is non-empty the given ids must equal the current ones.
    pub fn set_ids(&mut self, ids: &[i32]) -> SimResult<()> {
        if !self.ids.is_empty() {
            if self.ids != ids {
                return Err(invalid_data!("cannot change entity ids"));
            }
            return Ok(());
        }
        self.add_ids(ids)
    }

    /// Append new ids to the index. Duplicates across the union of old and
    /// new ids are rejected, naming the offending values.
    pub fn add_ids(&mut self, ids: &[i32]) -> SimResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let duplicates: Vec<i32> = self
            .ids
            .iter()
            .chain(ids)
            .copied()
            .sorted_unstable()
            .dedup_with_count()
            .filter(|&(count, _)| count > 1)
            .map(|(_, id)| id)
            .collect();
        if !duplicates.is_empty() {
            return Err(SimError::DuplicateIds { ids: duplicates });
        }
        self.ids.extend_from_slice(ids);
        self.rebuild();
        Ok(())
    }

    /// Look up the row position of one id.
    pub fn query(&self, id: i32) -> Option<usize> {
        let candidate = self.blocks.partition_point(|block| block.last < id);
        let block = self.blocks.get(candidate)?;
        if block.first <= id {
            Some((id - block.first) as usize + block.offset)
        } else {
            None
        }
    }

    /// Look up many ids at once.
    pub fn query_many(&self, ids: &[i32]) -> Vec<Option<usize>> {
        ids.iter().map(|&id| self.query(id)).collect()
    }

    /// Look up many ids, escalating misses into an error that names every
    /// id that could not be found.
    pub fn resolve_many(&self, ids: &[i32]) -> SimResult<Vec<usize>> {
        let mut rows = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for &id in ids {
            match self.query(id) {
                Some(row) => rows.push(row),
                None => missing.push(id),
            }
        }
        if missing.is_empty() {
            Ok(rows)
        } else {
            Err(SimError::IdsNotFound { ids: missing })
        }
    }

    fn rebuild(&mut self) {
        let mut blocks = Vec::new();
        for (offset, &id) in self.ids.iter().enumerate() {
            match blocks.last_mut() {
                Some(IndexBlock { last, .. }) if *last + 1 == id => *last = id,
                _ => blocks.push(IndexBlock {
                    first: id,
                    last: id,
                    offset,
                }),
            }
        }
        blocks.sort_unstable_by_key(|block| block.first);
        self.blocks = blocks;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_strategy::proptest;

    use super::*;

    #[test]
    fn contiguous_ids_compress_to_one_block() {
        let index = Index::from_ids(&[1, 2, 3, 4]).unwrap();
        assert_eq!(index.block_count(), 1);
        assert_eq!(index.query(3), Some(2));
    }

    #[test]
    fn blocks_split_on_gaps() {
        let index = Index::from_ids(&[1, 2, 3, 7, 8, 9]).unwrap();
        assert_eq!(index.block_count(), 2);
        assert_eq!(index.query(1), Some(0));
        assert_eq!(index.query(7), Some(3));
        assert_eq!(index.query(9), Some(5));
        assert_eq!(index.query(5), None);
    }

    #[test]
    fn insertion_order_survives_unsorted_ids() {
        let index = Index::from_ids(&[10, 11, 2, 3]).unwrap();
        assert_eq!(index.query_many(&[10, 11, 2, 3]), vec![
            Some(0),
            Some(1),
            Some(2),
            Some(3)
        ]);
    }

    #[test]
    fn descending_ids_become_singleton_blocks() {
        let index = Index::from_ids(&[5, 4, 3]).unwrap();
        assert_eq!(index.block_count(), 3);
        assert_eq!(index.query(4), Some(1));
    }

    #[test]
    fn duplicates_are_rejected_and_named() {
        let err = Index::from_ids(&[1, 2, 2, 3, 1]).unwrap_err();
        assert_eq!(err, SimError::DuplicateIds { ids: vec![1, 2] });

        let mut index = Index::from_ids(&[1, 2]).unwrap();
        let err = index.add_ids(&[2]).unwrap_err();
        assert_eq!(err, SimError::DuplicateIds { ids: vec![2] });
    }

    #[test]
    fn add_ids_appends_after_existing_rows() {
        let mut index = Index::from_ids(&[2]).unwrap();
        index.add_ids(&[1]).unwrap();
        assert_eq!(index.ids(), &[2, 1]);
        assert_eq!(index.query(1), Some(1));
    }

    #[test]
    fn set_ids_rejects_changes() {
        let mut index = Index::from_ids(&[1, 2]).unwrap();
        assert!(index.set_ids(&[1, 2]).is_ok());
        assert!(index.set_ids(&[1, 3]).is_err());
    }

    #[test]
    fn resolve_many_reports_all_missing_ids() {
        let index = Index::from_ids(&[1, 2]).unwrap();
        let err = index.resolve_many(&[1, 5, 9]).unwrap_err();
        assert_eq!(err, SimError::IdsNotFound { ids: vec![5, 9] });
    }

    #[proptest]
    fn round_trip_any_permutation(
        #[strategy(proptest::collection::hash_set(any::<i16>(), 0..64))] ids: std::collections::HashSet<i16>,
    ) {
        let ids: Vec<i32> = ids.into_iter().map(i32::from).collect();
        let index = Index::from_ids(&ids).unwrap();
        let rows = index.resolve_many(&ids).unwrap();
        prop_assert_eq!(rows, (0..ids.len()).collect::<Vec<_>>());
    }
}
