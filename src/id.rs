//! Request ID pool.
//!
//! FastCGI multiplexes logical requests over one transport using 16-bit
//! request IDs. ID 0 is reserved for management records, so the pool hands
//! out `1..=limit` and recycles each ID once its request finishes.
//!
//! The pool is a channel whose capacity equals the number of IDs: `alloc`
//! awaits the next free ID, `release` is a `try_send` that can never fail
//! while the invariant "each ID has one owner" holds, so releasing never
//! blocks the hot path.

use tokio::sync::{mpsc, Mutex};

/// A bounded pool of unique request IDs.
pub(crate) struct IdPool {
    free_rx: Mutex<mpsc::Receiver<u16>>,
    free_tx: mpsc::Sender<u16>,
}

impl IdPool {
    /// Create a pool of `limit` IDs; 0 means the full 16-bit space.
    pub(crate) fn new(limit: u32) -> Self {
        let limit = match limit {
            0 => u16::MAX as usize,
            n => (n as usize).min(u16::MAX as usize),
        };

        let (free_tx, free_rx) = mpsc::channel(limit);
        for id in 1..=limit as u16 {
            free_tx
                .try_send(id)
                .expect("channel is sized to hold every id");
        }

        Self {
            free_rx: Mutex::new(free_rx),
            free_tx,
        }
    }

    /// Take an ID out of the pool, waiting until one is available.
    pub(crate) async fn alloc(&self) -> u16 {
        self.free_rx
            .lock()
            .await
            .recv()
            .await
            .expect("pool sender lives as long as the pool")
    }

    /// Return an ID to the pool without blocking.
    pub(crate) fn release(&self, id: u16) {
        // capacity equals the id count and each id is released once, so
        // the channel always has room
        let _ = self.free_tx.try_send(id);
    }
}
