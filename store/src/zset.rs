//! Sorted set: one member set indexed twice.
//!
//! The AVL arena orders members by (score, name); a [`RehashMap`] keyed by
//! name points at the same arena indices. Point lookup, range seek, rank
//! offset, insertion and deletion are all sub-linear.

use crate::hash::RehashMap;
use crate::tree::{AvlTree, NIL};
use ahash::RandomState;

/// One sorted-set member.
pub struct Member {
    pub score: f64,
    pub name: Box<[u8]>,
}

/// Ordering by the (score, name) tuple. Byte-slice comparison gives the
/// memcmp-then-length tie-break.
fn zless(a: &Member, b: &Member) -> bool {
    if a.score != b.score {
        return a.score < b.score;
    }
    *a.name < *b.name
}

/// True when `member` sorts strictly below the (score, name) key.
fn below(member: &Member, score: f64, name: &[u8]) -> bool {
    if member.score != score {
        return member.score < score;
    }
    &*member.name < name
}

pub struct ZSet {
    tree: AvlTree<Member>,
    by_name: RehashMap<u32>,
    hasher: RandomState,
}

impl Default for ZSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ZSet {
    pub fn new() -> Self {
        Self {
            tree: AvlTree::new(),
            by_name: RehashMap::new(),
            hasher: crate::key_hasher(),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Add a member, or update the score of an existing one. Returns true
    /// when the member was added.
    pub fn insert(&mut self, name: &[u8], score: f64) -> bool {
        if let Some(idx) = self.lookup(name) {
            if self.tree.get(idx).score != score {
                // Detach, rescore, reinsert; the index held by the name
                // index does not change.
                self.tree.reposition(idx, |member| member.score = score, zless);
            }
            return false;
        }
        let idx = self.tree.insert(
            Member {
                score,
                name: name.into(),
            },
            zless,
        );
        self.by_name.insert(self.hasher.hash_one(name), idx);
        true
    }

    /// Remove a member from both indexes.
    pub fn remove(&mut self, name: &[u8]) -> bool {
        let Some(idx) = self.lookup(name) else {
            return false;
        };
        self.by_name
            .remove(self.hasher.hash_one(name), |&held| held == idx);
        self.tree.remove(idx);
        true
    }

    pub fn score(&mut self, name: &[u8]) -> Option<f64> {
        self.lookup(name).map(|idx| self.tree.get(idx).score)
    }

    /// Members in ascending (score, name) order: seek to the first member
    /// >= (score, name), advance by `offset` ranks, yield up to `limit`.
    pub fn range(&self, score: f64, name: &[u8], offset: i64, limit: usize) -> Vec<(&[u8], f64)> {
        let mut out = Vec::new();
        let first = self.tree.seek_ge(|member| below(member, score, name));
        let mut node = self.tree.rank_offset(first, offset);
        while node != NIL && out.len() < limit {
            let member = self.tree.get(node);
            out.push((&*member.name, member.score));
            node = self.tree.rank_offset(node, 1);
        }
        out
    }

    /// Drop every member and reset both indexes.
    pub fn clear(&mut self) {
        self.tree.clear();
        self.by_name.clear();
    }

    fn lookup(&mut self, name: &[u8]) -> Option<u32> {
        let hash = self.hasher.hash_one(name);
        let Self { tree, by_name, .. } = self;
        by_name
            .find(hash, |&idx| &*tree.get(idx).name == name)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(zset: &ZSet) -> Vec<(String, f64)> {
        zset.range(f64::NEG_INFINITY, b"", 0, usize::MAX)
            .into_iter()
            .map(|(name, score)| (String::from_utf8_lossy(name).into_owned(), score))
            .collect()
    }

    #[test]
    fn insert_orders_by_score_then_name() {
        let mut zset = ZSet::new();
        assert!(zset.insert(b"bob", 2.0));
        assert!(zset.insert(b"alice", 1.0));
        assert!(zset.insert(b"carol", 1.0));
        assert_eq!(
            names(&zset),
            vec![
                ("alice".into(), 1.0),
                ("carol".into(), 1.0),
                ("bob".into(), 2.0)
            ]
        );
    }

    #[test]
    fn name_prefix_sorts_first_on_tie() {
        let mut zset = ZSet::new();
        zset.insert(b"ab", 1.0);
        zset.insert(b"a", 1.0);
        zset.insert(b"abc", 1.0);
        let listed: Vec<String> = names(&zset).into_iter().map(|(name, _)| name).collect();
        assert_eq!(listed, vec!["a", "ab", "abc"]);
    }

    #[test]
    fn reinsert_updates_score() {
        let mut zset = ZSet::new();
        assert!(zset.insert(b"alice", 1.0));
        assert!(zset.insert(b"bob", 2.0));
        assert!(!zset.insert(b"alice", 1.5));
        assert_eq!(zset.len(), 2);
        assert_eq!(zset.score(b"alice"), Some(1.5));
        assert_eq!(
            names(&zset),
            vec![("alice".into(), 1.5), ("bob".into(), 2.0)]
        );
    }

    #[test]
    fn remove_deletes_from_both_indexes() {
        let mut zset = ZSet::new();
        zset.insert(b"alice", 1.0);
        zset.insert(b"bob", 2.0);
        assert!(zset.remove(b"alice"));
        assert!(!zset.remove(b"alice"));
        assert_eq!(zset.score(b"alice"), None);
        assert_eq!(zset.len(), 1);
        assert_eq!(names(&zset), vec![("bob".into(), 2.0)]);
    }

    #[test]
    fn range_seeks_offsets_and_limits() {
        let mut zset = ZSet::new();
        for i in 0..10u32 {
            zset.insert(format!("m{i}").as_bytes(), i as f64);
        }
        let out = zset.range(3.0, b"", 0, 3);
        let listed: Vec<f64> = out.iter().map(|&(_, score)| score).collect();
        assert_eq!(listed, vec![3.0, 4.0, 5.0]);

        let out = zset.range(3.0, b"", 2, 100);
        assert_eq!(out.len(), 5);
        assert_eq!(out[0].1, 5.0);

        // Offset past the end yields nothing.
        assert!(zset.range(3.0, b"", 100, 10).is_empty());
        // Backward offset from the seek point.
        let out = zset.range(3.0, b"", -2, 2);
        let listed: Vec<f64> = out.iter().map(|&(_, score)| score).collect();
        assert_eq!(listed, vec![1.0, 2.0]);
    }

    #[test]
    fn range_on_empty_set() {
        let zset = ZSet::new();
        assert!(zset.range(f64::NEG_INFINITY, b"", 0, 10).is_empty());
    }

    #[test]
    fn indexes_agree_under_churn() {
        let mut zset = ZSet::new();
        for i in 0..500u32 {
            let name = format!("member-{}", (i * 7919) % 500);
            zset.insert(name.as_bytes(), ((i * 31) % 97) as f64);
        }
        for i in (0..500u32).step_by(3) {
            zset.remove(format!("member-{i}").as_bytes());
        }
        // Every member visible to the tree is reachable by name, with the
        // same score.
        let listed = names(&zset);
        assert_eq!(listed.len(), zset.len());
        for (name, score) in listed {
            assert_eq!(zset.score(name.as_bytes()), Some(score));
        }
    }

    #[test]
    fn clear_resets() {
        let mut zset = ZSet::new();
        for i in 0..50u32 {
            zset.insert(format!("m{i}").as_bytes(), i as f64);
        }
        zset.clear();
        assert!(zset.is_empty());
        assert!(zset.insert(b"fresh", 1.0));
        assert_eq!(zset.len(), 1);
    }
}
