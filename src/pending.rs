//! Outstanding request table.
//!
//! Maps correlation ids to the completers of requests still waiting for a
//! response. Shared between every `send_request` caller (insert) and the
//! connection's read loop (take). The lock is held only for the map operation
//! itself, never across an await.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, RpcError};
use crate::future::Completer;

#[derive(Default)]
struct TableState {
    entries: HashMap<u64, Completer>,
    closed: bool,
}

/// Tracks pending requests waiting for responses.
#[derive(Default)]
pub(crate) struct PendingTable {
    state: Mutex<TableState>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a completer under `id`.
    ///
    /// Fails with `ConnectionClosed` once the table has been closed, and with
    /// a protocol error if `id` is already outstanding.
    pub(crate) fn register(&self, id: u64, completer: Completer) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(RpcError::ConnectionClosed);
        }
        if state.entries.contains_key(&id) {
            return Err(RpcError::Protocol(format!(
                "correlation id {} already outstanding",
                id
            )));
        }
        state.entries.insert(id, completer);
        Ok(())
    }

    /// Remove and return the completer for `id`, if any.
    pub(crate) fn take(&self, id: u64) -> Option<Completer> {
        self.lock().entries.remove(&id)
    }

    /// Forget `id` without resolving it.
    pub(crate) fn remove(&self, id: u64) -> bool {
        self.lock().entries.remove(&id).is_some()
    }

    /// Close the table and resolve every entry as closed.
    ///
    /// Returns how many requests were still outstanding.
    pub(crate) fn close_all(&self) -> usize {
        let drained: Vec<Completer> = {
            let mut state = self.lock();
            state.closed = true;
            state.entries.drain().map(|(_, completer)| completer).collect()
        };
        let count = drained.len();
        for completer in drained {
            completer.close();
        }
        count
    }

    /// Number of outstanding requests.
    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackCodec;
    use crate::future::channel;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_register_and_take() {
        let table = PendingTable::new();
        let (completer, future) = channel(1, MsgPackCodec::new());

        table.register(1, completer).unwrap();
        assert_eq!(table.len(), 1);

        table.take(1).unwrap().complete(Bytes::from_static(&[0x2a]));
        assert_eq!(table.len(), 0);

        let value: u8 = future.get_result().await.unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_take_unknown_id() {
        let table = PendingTable::new();
        assert!(table.take(99).is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let table = PendingTable::new();
        let (first, _f1) = channel(5, MsgPackCodec::new());
        let (second, _f2) = channel(5, MsgPackCodec::new());

        table.register(5, first).unwrap();
        assert!(matches!(table.register(5, second), Err(RpcError::Protocol(_))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove() {
        let table = PendingTable::new();
        let (completer, _future) = channel(2, MsgPackCodec::new());

        table.register(2, completer).unwrap();
        assert!(table.remove(2));
        assert!(!table.remove(2));
    }

    #[tokio::test]
    async fn test_close_all_fails_pending() {
        let table = PendingTable::new();
        let mut futures = Vec::new();
        for id in 1..=3 {
            let (completer, future) = channel(id, MsgPackCodec::new());
            table.register(id, completer).unwrap();
            futures.push(future);
        }

        assert_eq!(table.close_all(), 3);
        assert_eq!(table.len(), 0);

        for future in futures {
            assert!(matches!(future.wait().await, Err(RpcError::ConnectionClosed)));
        }
    }

    #[test]
    fn test_register_after_close() {
        let table = PendingTable::new();
        table.close_all();

        let (completer, _future) = channel(1, MsgPackCodec::new());
        assert!(matches!(
            table.register(1, completer),
            Err(RpcError::ConnectionClosed)
        ));
    }
}
