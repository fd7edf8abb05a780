//! Event handler registry.
//!
//! Feature subsystems register a callback against the driver command
//! they care about (plus vendor id and subcommand for vendor events).
//! The dispatch loop looks the callback up per message and invokes it
//! outside the registry lock, so a callback is free to register or
//! unregister handlers itself.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::event::EventMessage;

/// Initial registry capacity; grows amortized beyond this.
const DEFAULT_HANDLER_CAPACITY: usize = 64;

/// Callback invoked with a decoded driver message.
pub type EventHandler = Arc<dyn Fn(&EventMessage) + Send + Sync>;

/// Dispatch key: driver command, plus vendor id and subcommand for
/// vendor extension events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    cmd: u8,
    vendor: Option<(u32, u32)>,
}

impl HandlerKey {
    /// Key for a plain driver command.
    pub fn cmd(cmd: u8) -> Self {
        Self { cmd, vendor: None }
    }

    /// Key for a vendor subcommand.
    pub fn vendor(cmd: u8, vendor_id: u32, subcmd: u32) -> Self {
        Self {
            cmd,
            vendor: Some((vendor_id, subcmd)),
        }
    }
}

/// Thread-safe table of (command → callback) registrations.
///
/// At most one handler per key; re-registering replaces the previous
/// entry. Mutations take the write lock, dispatch lookups the read
/// lock, and both hold it only for the table operation itself.
pub struct HandlerRegistry {
    table: RwLock<HashMap<HandlerKey, EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(HashMap::with_capacity(DEFAULT_HANDLER_CAPACITY)),
        }
    }

    /// Register a handler, replacing any existing one for the same key.
    pub fn register(&self, key: HandlerKey, handler: EventHandler) {
        let mut table = self.table.write().unwrap();
        if table.insert(key, handler).is_some() {
            tracing::debug!(?key, "replaced existing event handler");
        }
    }

    /// Remove a handler. Unknown keys are a logged no-op.
    pub fn unregister(&self, key: HandlerKey) {
        let mut table = self.table.write().unwrap();
        if table.remove(&key).is_none() {
            tracing::debug!(?key, "unregister: no handler for key");
        }
    }

    /// Look up the handler for a key, cloning it out of the table so the
    /// caller can invoke it without holding the lock.
    pub fn lookup(&self, key: HandlerKey) -> Option<EventHandler> {
        self.table.read().unwrap().get(&key).cloned()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.table.read().unwrap().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.table.read().unwrap().is_empty()
    }

    /// Drop all registrations (HAL teardown).
    pub fn clear(&self) {
        self.table.write().unwrap().clear();
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::builder::MessageBuilder;
    use crate::event::EventMessage;
    use crate::message::{NLMSG_HDRLEN, NlMsgHdr};

    fn dummy_message() -> EventMessage {
        let msg = MessageBuilder::genl(0x1c, 34, 0, 0).finish();
        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        EventMessage::parse(header, &msg[NLMSG_HDRLEN..]).unwrap()
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> EventHandler {
        Arc::new(move |_msg| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_register_lookup_unregister() {
        let registry = HandlerRegistry::new();
        let key = HandlerKey::cmd(34);
        let hits = Arc::new(AtomicUsize::new(0));

        registry.register(key, counting_handler(hits.clone()));
        let handler = registry.lookup(key).expect("registered handler");
        handler(&dummy_message());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        registry.unregister(key);
        assert!(registry.lookup(key).is_none());
    }

    #[test]
    fn test_reregister_replaces() {
        let registry = HandlerRegistry::new();
        let key = HandlerKey::vendor(103, 0x1374, 5);
        let old = Arc::new(AtomicUsize::new(0));
        let new = Arc::new(AtomicUsize::new(0));

        registry.register(key, counting_handler(old.clone()));
        registry.register(key, counting_handler(new.clone()));
        assert_eq!(registry.len(), 1);

        registry.lookup(key).unwrap()(&dummy_message());
        assert_eq!(old.load(Ordering::SeqCst), 0);
        assert_eq!(new.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_vendor_keys_are_distinct() {
        let registry = HandlerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.register(
            HandlerKey::vendor(103, 0x1374, 5),
            counting_handler(hits.clone()),
        );

        assert!(registry.lookup(HandlerKey::vendor(103, 0x1374, 6)).is_none());
        assert!(registry.lookup(HandlerKey::cmd(103)).is_none());
        assert!(registry.lookup(HandlerKey::vendor(103, 0x1374, 5)).is_some());
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let registry = HandlerRegistry::new();
        registry.unregister(HandlerKey::cmd(99));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_callback_may_reenter_registry() {
        let registry = Arc::new(HandlerRegistry::new());
        let key = HandlerKey::cmd(34);

        let inner = registry.clone();
        registry.register(
            key,
            Arc::new(move |_msg| {
                // Lookup returned a clone, so the lock is free here.
                inner.unregister(HandlerKey::cmd(34));
            }),
        );

        let handler = registry.lookup(key).unwrap();
        handler(&dummy_message());
        assert!(registry.lookup(key).is_none());
    }
}
