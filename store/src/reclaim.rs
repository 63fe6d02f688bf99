//! Deferred teardown of large values.
//!
//! Dropping a sorted set with many members frees one allocation per member,
//! which is long enough to stall the event loop. Values over the threshold
//! are handed to a background thread instead; the thread exits when the
//! store (and with it the channel sender) is dropped.

use crate::zset::ZSet;
use crossbeam_channel::{Sender, unbounded};
use std::thread;

/// Member count at which a sorted set is torn down off-thread.
pub(crate) const RECLAIM_THRESHOLD: usize = 10_000;

pub(crate) struct Reclaimer {
    tx: Sender<ZSet>,
}

impl Reclaimer {
    /// Spawn the reclaim thread; `None` when the thread cannot be created,
    /// in which case the caller drops values inline.
    pub(crate) fn spawn() -> Option<Self> {
        let (tx, rx) = unbounded::<ZSet>();
        thread::Builder::new()
            .name("kiln-reclaim".to_string())
            .spawn(move || {
                for zset in rx {
                    drop(zset);
                }
            })
            .ok()
            .map(|_| Self { tx })
    }

    /// Hand a value to the reclaim thread; gives it back if the thread is
    /// gone.
    pub(crate) fn submit(&self, zset: ZSet) -> Result<(), ZSet> {
        self.tx.send(zset).map_err(|err| err.0)
    }
}
