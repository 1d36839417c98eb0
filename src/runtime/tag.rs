//! Stream tags: metadata attached to absolute item offsets

use super::pmt::{Pmt, Symbol};

/// Metadata attached to one absolute item index of a stream
#[derive(Clone, Debug, PartialEq)]
pub struct Tag {
    /// Absolute item offset in the producing stream
    pub offset: u64,
    pub key: Symbol,
    pub value: Pmt,
    /// Block that created the tag, if recorded
    pub srcid: Option<Symbol>,
}

impl Tag {
    pub fn new(offset: u64, key: impl Into<Symbol>, value: impl Into<Pmt>) -> Self {
        Self {
            offset,
            key: key.into(),
            value: value.into(),
            srcid: None,
        }
    }

    pub fn with_srcid(mut self, srcid: impl Into<Symbol>) -> Self {
        self.srcid = Some(srcid.into());
        self
    }
}

/// Offset-ordered tag storage owned by a buffer.
///
/// Tags sharing an offset keep their insertion order.
#[derive(Debug, Default)]
pub(crate) struct TagStore {
    tags: Vec<Tag>,
}

impl TagStore {
    pub(crate) fn insert(&mut self, tag: Tag) {
        // Producers usually tag in increasing order, so this lands at the end
        let pos = self.tags.partition_point(|t| t.offset <= tag.offset);
        self.tags.insert(pos, tag);
    }

    /// All tags with `start <= offset < end`
    pub(crate) fn in_window(&self, start: u64, end: u64) -> Vec<Tag> {
        if start >= end {
            return Vec::new();
        }
        let lo = self.tags.partition_point(|t| t.offset < start);
        let hi = self.tags.partition_point(|t| t.offset < end);
        self.tags[lo..hi].to_vec()
    }

    /// Drop every tag with `offset < before`, returning how many were removed
    pub(crate) fn prune_before(&mut self, before: u64) -> usize {
        let n = self.tags.partition_point(|t| t.offset < before);
        self.tags.drain(..n);
        n
    }

    pub(crate) fn len(&self) -> usize {
        self.tags.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut store = TagStore::default();
        store.insert(Tag::new(5, "b", 1i64));
        store.insert(Tag::new(2, "a", 0i64));
        store.insert(Tag::new(5, "c", 2i64));

        let keys: Vec<_> = store
            .in_window(0, 10)
            .into_iter()
            .map(|t| t.key.to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_window_is_half_open() {
        let mut store = TagStore::default();
        for offset in [3, 4, 5] {
            store.insert(Tag::new(offset, "k", offset));
        }
        let offsets: Vec<_> = store.in_window(4, 5).iter().map(|t| t.offset).collect();
        assert_eq!(offsets, vec![4]);
        assert!(store.in_window(5, 5).is_empty());
        assert!(store.in_window(6, 2).is_empty());
    }

    #[test]
    fn test_prune() {
        let mut store = TagStore::default();
        for offset in 0..10u64 {
            store.insert(Tag::new(offset, "k", Pmt::Null));
        }
        assert_eq!(store.prune_before(4), 4);
        assert_eq!(store.len(), 6);
        assert_eq!(store.in_window(0, 100)[0].offset, 4);
    }

    proptest! {
        #[test]
        fn prop_window_returns_exactly_contained_tags(
            offsets in proptest::collection::vec(0u64..200, 0..64),
            a in 0u64..220,
            b in 0u64..220,
        ) {
            let mut store = TagStore::default();
            for (i, offset) in offsets.iter().enumerate() {
                store.insert(Tag::new(*offset, "k", i as u64));
            }
            let found = store.in_window(a, b);
            let expected = offsets.iter().filter(|o| a <= **o && **o < b).count();
            prop_assert_eq!(found.len(), expected);
            prop_assert!(found.windows(2).all(|w| w[0].offset <= w[1].offset));
        }
    }
}
