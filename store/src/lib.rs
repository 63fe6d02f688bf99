//! In-memory key-value engine.
//!
//! The data structures behind the kiln server: a progressive-rehash hash map
//! as the primary key index, sorted sets built from a balanced tree plus a
//! secondary hash index over the same members, a TTL min-heap with
//! back-references, and the index-linked list the server uses for
//! idle-connection tracking.
//!
//! Everything here is single-threaded by design; the server owns one
//! [`Store`] and drives it from its event loop. The only thread this crate
//! creates tears down large sorted sets so a delete never stalls the loop.

pub mod db;
pub mod hash;
pub mod heap;
pub mod list;
mod reclaim;
pub mod tree;
pub mod zset;

pub use db::{MAX_EXPIRE_BATCH, Store, Value, WrongType};

use ahash::RandomState;

/// Hasher for keys and member names. Fixed seeds keep test runs
/// deterministic.
pub(crate) fn key_hasher() -> RandomState {
    #[cfg(test)]
    {
        RandomState::with_seeds(
            0x4cf5_ad43_2745_937f,
            0x9a3e_8c61_2b71_0145,
            0x1f8a_77d0_63c2_5be9,
            0xd601_8f33_2a9c_4e17,
        )
    }
    #[cfg(not(test))]
    {
        RandomState::new()
    }
}
