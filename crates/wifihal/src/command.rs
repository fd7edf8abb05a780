//! In-flight command correlation.
//!
//! A command issuer allocates a request id, frames its message with the
//! id in the netlink sequence field, and tracks itself in the table.
//! When the dispatch loop sees a reply whose sequence number matches a
//! tracked id, it routes the reply to the issuer's [`Command`] object.
//!
//! The id space is bounded and reused. Allocation walks the space from a
//! cursor, so it is bounded by construction and fails only when every id
//! is simultaneously in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use super::error::{Error, Result};
use super::event::EventMessage;

/// Upper bound of the request id space, ids are in [1, REQUEST_ID_MAX].
pub const REQUEST_ID_MAX: u32 = 1000;

/// Upper bound of the single-byte id space used by subsystems whose
/// vendor payload carries an 8-bit transaction id.
pub const REQUEST_ID_U8_MAX: u32 = 255;

/// An in-flight command awaiting its asynchronous reply.
///
/// Implemented by feature subsystems; the table keeps only a weak
/// reference, the issuer retains ownership.
pub trait Command: Send + Sync {
    /// Invoked on the dispatch loop with the reply message.
    fn on_reply(&self, msg: &EventMessage);

    /// Invoked when the driver acknowledges the command (ACK or DONE)
    /// or rejects it with an errno.
    fn on_complete(&self, result: Result<()>) {
        if let Err(err) = result {
            tracing::debug!(error = %err, "command failed");
        }
    }
}

struct TableInner {
    /// Allocated ids. `None` marks an id reserved but not yet bound to
    /// a command.
    slots: HashMap<u32, Option<Weak<dyn Command>>>,
    /// Next id the allocation scan starts from.
    cursor: u32,
}

/// Thread-safe request-id allocator and correlation table.
pub struct CommandTable {
    inner: Mutex<TableInner>,
    capacity: u32,
}

impl CommandTable {
    /// Create a table over the id space [1, capacity].
    pub fn new(capacity: u32) -> Self {
        Self {
            inner: Mutex::new(TableInner {
                slots: HashMap::new(),
                cursor: 0,
            }),
            capacity,
        }
    }

    /// Allocate and reserve a request id distinct from every id
    /// currently in flight.
    ///
    /// Fails with [`Error::ExhaustedRequestIds`] when the whole space is
    /// in flight; that is an operational anomaly and is logged.
    pub fn allocate(&self) -> Result<u32> {
        let mut inner = self.inner.lock().unwrap();
        for offset in 0..self.capacity {
            let id = (inner.cursor + offset) % self.capacity + 1;
            if !inner.slots.contains_key(&id) {
                inner.slots.insert(id, None);
                inner.cursor = id % self.capacity;
                return Ok(id);
            }
        }
        tracing::warn!(
            capacity = self.capacity,
            "request id space exhausted, too many commands in flight"
        );
        Err(Error::ExhaustedRequestIds {
            capacity: self.capacity as usize,
        })
    }

    /// Bind an allocated id to its in-flight command.
    ///
    /// Also reserves the id if the caller chose it without `allocate`.
    pub fn track(&self, id: u32, cmd: &Arc<dyn Command>) {
        let mut inner = self.inner.lock().unwrap();
        inner.slots.insert(id, Some(Arc::downgrade(cmd)));
    }

    /// Remove an id from the table, returning its command if one was
    /// bound and still alive. The id becomes reallocatable.
    pub fn untrack(&self, id: u32) -> Option<Arc<dyn Command>> {
        let mut inner = self.inner.lock().unwrap();
        inner.slots.remove(&id).flatten().and_then(|w| w.upgrade())
    }

    /// Look up the command bound to an id without removing it.
    pub fn lookup(&self, id: u32) -> Option<Arc<dyn Command>> {
        let inner = self.inner.lock().unwrap();
        inner
            .slots
            .get(&id)
            .and_then(|slot| slot.as_ref())
            .and_then(|w| w.upgrade())
    }

    /// Number of ids currently in flight (reserved or tracked).
    pub fn in_flight(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }

    /// Drop all entries (HAL teardown).
    pub fn clear(&self) {
        self.inner.lock().unwrap().slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::builder::MessageBuilder;
    use crate::message::{NLMSG_HDRLEN, NlMsgHdr};

    struct TestCommand {
        replies: AtomicUsize,
    }

    impl TestCommand {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                replies: AtomicUsize::new(0),
            })
        }
    }

    impl Command for TestCommand {
        fn on_reply(&self, _msg: &EventMessage) {
            self.replies.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn reply_message(seq: u32) -> EventMessage {
        let mut builder = MessageBuilder::genl(0x1c, 34, 0, 0);
        builder.set_seq(seq);
        let msg = builder.finish();
        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        EventMessage::parse(header, &msg[NLMSG_HDRLEN..]).unwrap()
    }

    #[test]
    fn test_allocated_ids_are_distinct() {
        let table = CommandTable::new(REQUEST_ID_MAX);
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let id = table.allocate().unwrap();
            assert!((1..=REQUEST_ID_MAX).contains(&id));
            assert!(seen.insert(id), "id {} allocated twice", id);
        }
    }

    #[test]
    fn test_exhaustion_after_full_space() {
        let table = CommandTable::new(REQUEST_ID_MAX);
        for _ in 0..REQUEST_ID_MAX {
            table.allocate().unwrap();
        }
        let err = table.allocate().unwrap_err();
        assert!(matches!(err, Error::ExhaustedRequestIds { capacity: 1000 }));
    }

    #[test]
    fn test_untracked_id_is_reallocatable() {
        let table = CommandTable::new(2);
        let a = table.allocate().unwrap();
        let _b = table.allocate().unwrap();
        assert!(table.allocate().is_err());

        table.untrack(a);
        assert_eq!(table.in_flight(), 1);
        table.allocate().unwrap();
    }

    #[test]
    fn test_track_lookup_untrack() {
        let table = CommandTable::new(REQUEST_ID_MAX);
        let id = table.allocate().unwrap();
        let cmd = TestCommand::new();
        let as_dyn: Arc<dyn Command> = cmd.clone();
        table.track(id, &as_dyn);

        let found = table.lookup(id).expect("tracked command");
        found.on_reply(&reply_message(id));
        assert_eq!(cmd.replies.load(Ordering::SeqCst), 1);

        assert!(table.untrack(id).is_some());
        assert!(table.lookup(id).is_none());
    }

    #[test]
    fn test_table_does_not_own_commands() {
        let table = CommandTable::new(REQUEST_ID_MAX);
        let id = table.allocate().unwrap();
        {
            let cmd = TestCommand::new();
            let as_dyn: Arc<dyn Command> = cmd;
            table.track(id, &as_dyn);
        }
        // Issuer dropped its command; the weak entry must not revive it.
        assert!(table.lookup(id).is_none());
    }

    #[test]
    fn test_u8_space_bounds() {
        let table = CommandTable::new(REQUEST_ID_U8_MAX);
        for _ in 0..REQUEST_ID_U8_MAX {
            let id = table.allocate().unwrap();
            assert!((1..=REQUEST_ID_U8_MAX).contains(&id));
        }
        assert!(table.allocate().is_err());
    }
}
