//! Key store: entry arena, primary index, and TTL heap.
//!
//! Entries live in a slab-style arena and are found through a
//! progressive-rehash index of entry ids, so the TTL heap can address its
//! owners by stable id. Each entry is referenced from exactly one index slot
//! and at most one heap slot.

use crate::hash::RehashMap;
use crate::heap::{HeapItem, TtlHeap};
use crate::reclaim::{RECLAIM_THRESHOLD, Reclaimer};
use crate::zset::ZSet;
use ahash::RandomState;
use std::fmt;

/// Sentinel heap index meaning "no TTL".
const NO_TTL: usize = usize::MAX;

/// Expired entries reaped per timer tick, so expiration cannot starve I/O.
pub const MAX_EXPIRE_BATCH: usize = 2000;

/// A stored value. Exactly one variant per entry.
pub enum Value {
    Str(Vec<u8>),
    Sorted(ZSet),
}

/// The one recoverable store failure: an operation addressed a key holding
/// the other value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrongType;

impl fmt::Display for WrongType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "value is of the wrong type")
    }
}

impl std::error::Error for WrongType {}

struct Entry {
    key: Box<[u8]>,
    hash: u64,
    heap_idx: usize,
    value: Value,
}

/// The process-wide key-value store.
pub struct Store {
    slots: Vec<Option<Entry>>,
    free: Vec<u32>,
    index: RehashMap<u32>,
    expiry: TtlHeap,
    hasher: RandomState,
    reclaimer: Option<Reclaimer>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: RehashMap::new(),
            expiry: TtlHeap::new(),
            hasher: crate::key_hasher(),
            reclaimer: Reclaimer::spawn(),
        }
    }

    /// Live entry count.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// String value of a key. `Ok(None)` when absent.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<&[u8]>, WrongType> {
        let Some(id) = self.find(key) else {
            return Ok(None);
        };
        match &self.entry(id).value {
            Value::Str(value) => Ok(Some(value)),
            Value::Sorted(_) => Err(WrongType),
        }
    }

    /// Upsert a string value. An existing string entry keeps its TTL; an
    /// existing sorted-set entry is rejected untouched.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), WrongType> {
        if let Some(id) = self.find(key) {
            match &mut self.entry_mut(id).value {
                Value::Str(existing) => {
                    existing.clear();
                    existing.extend_from_slice(value);
                    Ok(())
                }
                Value::Sorted(_) => Err(WrongType),
            }
        } else {
            let hash = self.hasher.hash_one(key);
            let id = self.alloc(Entry {
                key: key.into(),
                hash,
                heap_idx: NO_TTL,
                value: Value::Str(value.to_vec()),
            });
            self.index.insert(hash, id);
            Ok(())
        }
    }

    /// Remove an entry and everything it owns. True when the key existed.
    pub fn del(&mut self, key: &[u8]) -> bool {
        let Some(id) = self.find(key) else {
            return false;
        };
        self.remove_entry(id);
        true
    }

    /// Visit every live entry, traversing both index tables.
    pub fn scan(&mut self, mut f: impl FnMut(&[u8], &Value)) {
        let Self { index, slots, .. } = self;
        index.for_each(|&id| {
            if let Some(entry) = slots[id as usize].as_ref() {
                f(&entry.key, &entry.value);
            }
            true
        });
    }

    /// Set or clear a key's TTL. Negative `ttl_ms` removes the deadline but
    /// keeps the entry. True when the key existed.
    pub fn expire(&mut self, key: &[u8], ttl_ms: i64, now_ms: u64) -> bool {
        let Some(id) = self.find(key) else {
            return false;
        };
        self.set_ttl(id, ttl_ms, now_ms);
        true
    }

    /// Remaining TTL: -2 when the key is absent, -1 when it has no
    /// deadline, otherwise milliseconds until expiry (clamped at 0).
    pub fn ttl(&mut self, key: &[u8], now_ms: u64) -> i64 {
        let Some(id) = self.find(key) else {
            return -2;
        };
        let heap_idx = self.entry(id).heap_idx;
        if heap_idx == NO_TTL {
            return -1;
        }
        match self.expiry.get(heap_idx) {
            Some(item) => item.expires_at.saturating_sub(now_ms) as i64,
            None => {
                debug_assert!(false, "entry {id} points at a missing heap slot");
                -1
            }
        }
    }

    /// Add or rescore a sorted-set member, creating the entry when the key
    /// is absent. True when the member was added rather than updated.
    pub fn zadd(&mut self, key: &[u8], name: &[u8], score: f64) -> Result<bool, WrongType> {
        if let Some(id) = self.find(key) {
            match &mut self.entry_mut(id).value {
                Value::Sorted(zset) => Ok(zset.insert(name, score)),
                Value::Str(_) => Err(WrongType),
            }
        } else {
            let hash = self.hasher.hash_one(key);
            let mut zset = ZSet::new();
            let added = zset.insert(name, score);
            let id = self.alloc(Entry {
                key: key.into(),
                hash,
                heap_idx: NO_TTL,
                value: Value::Sorted(zset),
            });
            self.index.insert(hash, id);
            Ok(added)
        }
    }

    /// Remove a member. A missing key counts as an empty set.
    pub fn zrem(&mut self, key: &[u8], name: &[u8]) -> Result<bool, WrongType> {
        match self.find(key) {
            None => Ok(false),
            Some(id) => match &mut self.entry_mut(id).value {
                Value::Sorted(zset) => Ok(zset.remove(name)),
                Value::Str(_) => Err(WrongType),
            },
        }
    }

    pub fn zscore(&mut self, key: &[u8], name: &[u8]) -> Result<Option<f64>, WrongType> {
        match self.find(key) {
            None => Ok(None),
            Some(id) => match &mut self.entry_mut(id).value {
                Value::Sorted(zset) => Ok(zset.score(name)),
                Value::Str(_) => Err(WrongType),
            },
        }
    }

    /// Range query: members >= (score, name), shifted by `offset` ranks,
    /// at most `limit` of them, in ascending (score, name) order.
    pub fn zquery(
        &mut self,
        key: &[u8],
        score: f64,
        name: &[u8],
        offset: i64,
        limit: usize,
    ) -> Result<Vec<(&[u8], f64)>, WrongType> {
        match self.find(key) {
            None => Ok(Vec::new()),
            Some(id) => match &self.entry(id).value {
                Value::Sorted(zset) => Ok(zset.range(score, name, offset, limit)),
                Value::Str(_) => Err(WrongType),
            },
        }
    }

    /// Earliest TTL deadline across all entries.
    pub fn next_expiry(&self) -> Option<u64> {
        self.expiry.peek().map(|item| item.expires_at)
    }

    /// Remove entries whose deadline has passed, at most `budget` of them.
    /// Returns the number of entries removed.
    pub fn expire_due(&mut self, now_ms: u64, budget: usize) -> usize {
        let mut expired = 0;
        while expired < budget {
            let Some(item) = self.expiry.peek().copied() else {
                break;
            };
            if item.expires_at > now_ms {
                break;
            }
            {
                let Self { slots, expiry, .. } = self;
                expiry.remove(0, |owner, idx| {
                    if let Some(entry) = slots[owner as usize].as_mut() {
                        entry.heap_idx = idx;
                    }
                });
            }
            match self.slots[item.owner as usize].take() {
                Some(entry) if entry.heap_idx == 0 => {
                    self.free.push(item.owner);
                    self.index.remove(entry.hash, |&held| held == item.owner);
                    self.dispose(entry.value);
                    expired += 1;
                }
                Some(entry) => {
                    // The slot disagrees about its heap position: an earlier
                    // delete left this heap item behind. Drop the item, keep
                    // the entry.
                    debug_assert!(false, "stale heap item for entry {}", item.owner);
                    tracing::warn!(
                        owner = item.owner,
                        "dropping stale expiration for reused entry slot"
                    );
                    self.slots[item.owner as usize] = Some(entry);
                }
                None => {
                    debug_assert!(false, "heap item for vacant entry {}", item.owner);
                    tracing::warn!(owner = item.owner, "expiration fired for a missing entry");
                }
            }
        }
        expired
    }

    fn find(&mut self, key: &[u8]) -> Option<u32> {
        let hash = self.hasher.hash_one(key);
        let Self { index, slots, .. } = self;
        index
            .find(hash, |&id| {
                slots[id as usize]
                    .as_ref()
                    .is_some_and(|entry| &*entry.key == key)
            })
            .copied()
    }

    fn entry(&self, id: u32) -> &Entry {
        self.slots[id as usize].as_ref().expect("live entry")
    }

    fn entry_mut(&mut self, id: u32) -> &mut Entry {
        self.slots[id as usize].as_mut().expect("live entry")
    }

    fn alloc(&mut self, entry: Entry) -> u32 {
        match self.free.pop() {
            Some(id) => {
                self.slots[id as usize] = Some(entry);
                id
            }
            None => {
                self.slots.push(Some(entry));
                (self.slots.len() - 1) as u32
            }
        }
    }

    fn remove_entry(&mut self, id: u32) {
        let Some(entry) = self.slots[id as usize].take() else {
            return;
        };
        self.free.push(id);
        self.index.remove(entry.hash, |&held| held == id);
        if entry.heap_idx != NO_TTL {
            let Self { slots, expiry, .. } = self;
            expiry.remove(entry.heap_idx, |owner, idx| {
                if let Some(other) = slots[owner as usize].as_mut() {
                    other.heap_idx = idx;
                }
            });
        }
        self.dispose(entry.value);
    }

    /// Large sorted sets go to the reclaim thread; everything else drops
    /// inline.
    fn dispose(&mut self, value: Value) {
        let Value::Sorted(zset) = value else { return };
        if zset.len() < RECLAIM_THRESHOLD {
            return;
        }
        match &self.reclaimer {
            Some(reclaimer) => {
                if let Err(returned) = reclaimer.submit(zset) {
                    drop(returned);
                }
            }
            None => drop(zset),
        }
    }

    fn set_ttl(&mut self, id: u32, ttl_ms: i64, now_ms: u64) {
        let heap_idx = self.entry(id).heap_idx;
        let Self { slots, expiry, .. } = self;
        if ttl_ms < 0 {
            if heap_idx != NO_TTL {
                expiry.remove(heap_idx, |owner, idx| {
                    if let Some(entry) = slots[owner as usize].as_mut() {
                        entry.heap_idx = idx;
                    }
                });
                if let Some(entry) = slots[id as usize].as_mut() {
                    entry.heap_idx = NO_TTL;
                }
            }
        } else {
            let expires_at = now_ms.saturating_add(ttl_ms as u64);
            let pos = (heap_idx != NO_TTL).then_some(heap_idx);
            expiry.upsert(
                pos,
                HeapItem {
                    expires_at,
                    owner: id,
                },
                |owner, idx| {
                    if let Some(entry) = slots[owner as usize].as_mut() {
                        entry.heap_idx = idx;
                    }
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_del_roundtrip() {
        let mut store = Store::new();
        assert_eq!(store.get(b"x"), Ok(None));
        store.set(b"x", b"42").unwrap();
        assert_eq!(store.get(b"x"), Ok(Some(&b"42"[..])));
        assert!(store.del(b"x"));
        assert!(!store.del(b"x"));
        assert_eq!(store.get(b"x"), Ok(None));
        assert!(store.is_empty());
    }

    #[test]
    fn set_is_idempotent() {
        let mut store = Store::new();
        store.set(b"k", b"v").unwrap();
        store.set(b"k", b"v").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(b"k"), Ok(Some(&b"v"[..])));
    }

    #[test]
    fn overwrite_preserves_ttl() {
        let mut store = Store::new();
        store.set(b"k", b"old").unwrap();
        assert!(store.expire(b"k", 5_000, 1_000));
        store.set(b"k", b"new").unwrap();
        let remaining = store.ttl(b"k", 2_000);
        assert_eq!(remaining, 4_000);
        assert_eq!(store.get(b"k"), Ok(Some(&b"new"[..])));
    }

    #[test]
    fn wrong_type_is_rejected() {
        let mut store = Store::new();
        store.zadd(b"s", b"a", 1.0).unwrap();
        assert_eq!(store.get(b"s"), Err(WrongType));
        assert_eq!(store.set(b"s", b"v"), Err(WrongType));
        store.set(b"k", b"v").unwrap();
        assert_eq!(store.zadd(b"k", b"a", 1.0), Err(WrongType));
        assert_eq!(store.zrem(b"k", b"a"), Err(WrongType));
        assert_eq!(store.zscore(b"k", b"a"), Err(WrongType));
        assert!(store.zquery(b"k", 0.0, b"", 0, 10).is_err());
    }

    #[test]
    fn ttl_states() {
        let mut store = Store::new();
        assert_eq!(store.ttl(b"x", 0), -2);
        store.set(b"x", b"v").unwrap();
        assert_eq!(store.ttl(b"x", 0), -1);
        store.expire(b"x", 100, 0);
        assert_eq!(store.ttl(b"x", 0), 100);
        assert_eq!(store.ttl(b"x", 60), 40);
        // Already past the deadline but not yet reaped: clamped at zero.
        assert_eq!(store.ttl(b"x", 500), 0);
        // Negative TTL clears the deadline without deleting.
        store.expire(b"x", -1, 500);
        assert_eq!(store.ttl(b"x", 500), -1);
        assert_eq!(store.get(b"x"), Ok(Some(&b"v"[..])));
    }

    #[test]
    fn expire_due_reaps_in_deadline_order() {
        let mut store = Store::new();
        for i in 0..10u32 {
            let key = format!("k{i}");
            store.set(key.as_bytes(), b"v").unwrap();
            store.expire(key.as_bytes(), (i as i64 + 1) * 100, 0);
        }
        assert_eq!(store.next_expiry(), Some(100));
        // At t=450, keys k0..k3 are due.
        assert_eq!(store.expire_due(450, MAX_EXPIRE_BATCH), 4);
        assert_eq!(store.len(), 6);
        assert_eq!(store.get(b"k0"), Ok(None));
        assert_eq!(store.ttl(b"k0", 450), -2);
        assert_eq!(store.get(b"k4"), Ok(Some(&b"v"[..])));
        assert_eq!(store.next_expiry(), Some(500));
    }

    #[test]
    fn expire_due_honors_budget() {
        let mut store = Store::new();
        for i in 0..50u32 {
            let key = format!("k{i}");
            store.set(key.as_bytes(), b"v").unwrap();
            store.expire(key.as_bytes(), 10, 0);
        }
        assert_eq!(store.expire_due(1_000, 20), 20);
        assert_eq!(store.len(), 30);
        assert_eq!(store.expire_due(1_000, 100), 30);
        assert!(store.is_empty());
    }

    #[test]
    fn del_clears_heap_slot() {
        let mut store = Store::new();
        store.set(b"a", b"v").unwrap();
        store.set(b"b", b"v").unwrap();
        store.expire(b"a", 100, 0);
        store.expire(b"b", 200, 0);
        assert!(store.del(b"a"));
        // Reaping at a time past both deadlines only sees the survivor.
        assert_eq!(store.expire_due(1_000, MAX_EXPIRE_BATCH), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn zset_commands() {
        let mut store = Store::new();
        assert_eq!(store.zadd(b"s", b"alice", 1.0), Ok(true));
        assert_eq!(store.zadd(b"s", b"bob", 2.0), Ok(true));
        assert_eq!(store.zadd(b"s", b"alice", 1.5), Ok(false));
        assert_eq!(store.zscore(b"s", b"alice"), Ok(Some(1.5)));
        assert_eq!(store.zscore(b"s", b"nobody"), Ok(None));
        assert_eq!(store.zscore(b"missing", b"alice"), Ok(None));
        assert_eq!(store.zrem(b"missing", b"alice"), Ok(false));

        let out = store
            .zquery(b"s", f64::NEG_INFINITY, b"", 0, 10)
            .unwrap()
            .into_iter()
            .map(|(name, score)| (name.to_vec(), score))
            .collect::<Vec<_>>();
        assert_eq!(
            out,
            vec![(b"alice".to_vec(), 1.5), (b"bob".to_vec(), 2.0)]
        );

        assert_eq!(store.zrem(b"s", b"alice"), Ok(true));
        assert_eq!(store.zrem(b"s", b"alice"), Ok(false));
    }

    #[test]
    fn zquery_on_missing_key_is_empty() {
        let mut store = Store::new();
        assert_eq!(store.zquery(b"nope", 0.0, b"", 0, 10), Ok(Vec::new()));
    }

    #[test]
    fn scan_sees_every_entry() {
        let mut store = Store::new();
        for i in 0..100u32 {
            store.set(format!("k{i}").as_bytes(), b"v").unwrap();
        }
        store.zadd(b"scores", b"a", 1.0).unwrap();
        let mut seen = 0;
        store.scan(|_, _| seen += 1);
        assert_eq!(seen, 101);
        assert_eq!(store.len(), 101);
    }
}
