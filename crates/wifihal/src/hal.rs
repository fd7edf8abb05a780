//! The HAL session object.
//!
//! [`WifiHal`] owns everything the original design kept in one shared
//! state block: the socket transport, the handler registry, the command
//! correlation table, the interface registry and the diagnostic stores.
//! One session is created per opened HAL, shared into the dispatch loop
//! task, and torn down as a whole.
//!
//! # Example
//!
//! ```ignore
//! use wifihal::WifiHal;
//!
//! #[tokio::main]
//! async fn main() -> wifihal::Result<()> {
//!     let hal = WifiHal::new().await?;
//!     hal.start();
//!
//!     hal.register_vendor_handler(0x001374, 11, |msg| {
//!         println!("vendor event, {} payload bytes", msg.payload().len());
//!     });
//!
//!     // ... issue commands, query diagnostics ...
//!
//!     hal.cleanup().await;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::command::{Command, CommandTable, REQUEST_ID_MAX, REQUEST_ID_U8_MAX};
use super::diagnostics::{PacketFateRecord, PacketFateStore, RadarEvent, RadarHistory};
use super::dispatch::{self, LoopState, LoopStateCell};
use super::error::Result;
use super::event::EventMessage;
use super::genl::nl80211;
use super::handler::{EventHandler, HandlerKey, HandlerRegistry};
use super::interface::{InterfaceHandle, InterfaceInfo, InterfaceRegistry};
use super::ring::{AlertHandler, LogHandler, RingBufferStatus, RingBufferStore};
use super::transport::{NetlinkTransport, Transport};

/// Shared per-session state, one instance per opened HAL.
pub(crate) struct HalState<T: Transport> {
    pub(crate) transport: T,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) commands: CommandTable,
    pub(crate) short_ids: CommandTable,
    pub(crate) interfaces: InterfaceRegistry,
    pub(crate) rings: RingBufferStore,
    pub(crate) fate: PacketFateStore,
    pub(crate) radar: RadarHistory,
    pub(crate) loop_state: LoopStateCell,
    /// Set once cleanup has run; the session will not start again.
    cleaned_up: AtomicBool,
}

/// A HAL session: registries, diagnostic stores and the dispatch loop.
///
/// All methods are callable from any thread concurrently with the
/// dispatch loop; critical sections are bounded table operations and
/// callbacks never run under a core lock.
pub struct WifiHal<T: Transport = NetlinkTransport> {
    state: Arc<HalState<T>>,
    cancel: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WifiHal<NetlinkTransport> {
    /// Bring up the HAL: open the command, event and user sockets,
    /// resolve the nl80211 family and join its event groups.
    ///
    /// Failure here leaves nothing running.
    pub async fn new() -> Result<Self> {
        Ok(Self::with_transport(NetlinkTransport::new().await?))
    }
}

impl<T: Transport> WifiHal<T> {
    /// Create a session over an already-built transport.
    pub fn with_transport(transport: T) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            state: Arc::new(HalState {
                transport,
                handlers: HandlerRegistry::new(),
                commands: CommandTable::new(REQUEST_ID_MAX),
                short_ids: CommandTable::new(REQUEST_ID_U8_MAX),
                interfaces: InterfaceRegistry::new(),
                rings: RingBufferStore::new(),
                fate: PacketFateStore::new(),
                radar: RadarHistory::new(),
                loop_state: LoopStateCell::new(),
                cleaned_up: AtomicBool::new(false),
            }),
            cancel,
            task: Mutex::new(None),
        }
    }

    /// Spawn the event dispatch loop.
    ///
    /// Returns `true` if the loop was started, `false` if it was already
    /// running or the session has been cleaned up (both no-ops).
    pub fn start(&self) -> bool {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            tracing::debug!("event loop already running");
            return false;
        }
        if self.state.cleaned_up.load(Ordering::Acquire)
            || self.state.loop_state.get() == LoopState::Stopped
        {
            tracing::warn!("session already cleaned up, not restarting");
            return false;
        }
        let handle = tokio::spawn(dispatch::run(self.state.clone(), self.cancel.subscribe()));
        *task = Some(handle);
        true
    }

    /// Tear the session down: signal cancellation, wait for the loop to
    /// stop, then release registrations and HAL-created interfaces.
    ///
    /// Safe to call more than once.
    pub async fn cleanup(&self) {
        self.state.cleaned_up.store(true, Ordering::Release);
        self.cancel.send(true).ok();

        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "event loop task failed");
            }
        }

        self.state.handlers.clear();
        self.state.commands.clear();
        self.state.short_ids.clear();
        self.state.fate.clear();
        self.state.radar.clear();
        self.state.interfaces.cleanup_dynamic();
        self.state.interfaces.unregister_all();
    }

    /// Current dispatch loop state.
    pub fn loop_state(&self) -> LoopState {
        self.state.loop_state.get()
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Send a framed command to the driver.
    pub async fn send(&self, msg: &[u8]) -> Result<()> {
        self.state.transport.send(msg).await
    }

    /// The resolved nl80211 family id, for framing commands.
    pub fn family_id(&self) -> u16 {
        self.state.transport.family_id()
    }

    /// Allocate a request id in [1, 1000], distinct from every id in
    /// flight.
    pub fn allocate_request_id(&self) -> Result<u32> {
        self.state.commands.allocate()
    }

    /// Allocate an id in the single-byte space [1, 255], for subsystems
    /// whose vendor payload carries an 8-bit transaction id.
    pub fn allocate_request_id_u8(&self) -> Result<u32> {
        self.state.short_ids.allocate()
    }

    /// Release an id from the single-byte space.
    pub fn release_request_id_u8(&self, id: u32) {
        self.state.short_ids.untrack(id);
    }

    /// Bind an in-flight command to its request id so replies carrying
    /// the id in their sequence field reach it.
    pub fn track_command(&self, id: u32, cmd: &Arc<dyn Command>) {
        self.state.commands.track(id, cmd);
    }

    /// Remove an in-flight command; its id becomes reallocatable.
    pub fn untrack_command(&self, id: u32) -> Option<Arc<dyn Command>> {
        self.state.commands.untrack(id)
    }

    // ========================================================================
    // Event handlers
    // ========================================================================

    /// Register a callback for a driver command, replacing any existing
    /// registration.
    pub fn register_handler(
        &self,
        cmd: u8,
        handler: impl Fn(&EventMessage) + Send + Sync + 'static,
    ) {
        let handler: EventHandler = Arc::new(handler);
        self.state.handlers.register(HandlerKey::cmd(cmd), handler);
    }

    /// Register a callback for a vendor subcommand, replacing any
    /// existing registration.
    pub fn register_vendor_handler(
        &self,
        vendor_id: u32,
        subcmd: u32,
        handler: impl Fn(&EventMessage) + Send + Sync + 'static,
    ) {
        let handler: EventHandler = Arc::new(handler);
        self.state.handlers.register(
            HandlerKey::vendor(nl80211::CMD_VENDOR, vendor_id, subcmd),
            handler,
        );
    }

    /// Remove a driver-command callback. Unknown commands are a no-op.
    pub fn unregister_handler(&self, cmd: u8) {
        self.state.handlers.unregister(HandlerKey::cmd(cmd));
    }

    /// Remove a vendor-subcommand callback. Unknown keys are a no-op.
    pub fn unregister_vendor_handler(&self, vendor_id: u32, subcmd: u32) {
        self.state
            .handlers
            .unregister(HandlerKey::vendor(nl80211::CMD_VENDOR, vendor_id, subcmd));
    }

    // ========================================================================
    // Interfaces
    // ========================================================================

    /// Register a discovered interface.
    pub fn register_interface(&self, name: &str, ifindex: i32) -> Result<InterfaceHandle> {
        self.state.interfaces.register(name, ifindex)
    }

    /// Resolve an interface handle.
    pub fn resolve_interface(&self, handle: InterfaceHandle) -> Result<InterfaceInfo> {
        self.state.interfaces.resolve(handle)
    }

    /// All registered interfaces.
    pub fn interfaces(&self) -> Vec<InterfaceInfo> {
        self.state.interfaces.list()
    }

    /// Create a virtual interface. Creating an existing name succeeds.
    pub fn virtual_interface_create(&self, name: &str) -> Result<InterfaceHandle> {
        self.state.interfaces.create_virtual(name)
    }

    /// Delete a virtual interface. Deleting an unknown name succeeds.
    pub fn virtual_interface_delete(&self, name: &str) -> Result<()> {
        self.state.interfaces.delete_virtual(name)
    }

    /// Remove every interface created through this session.
    pub fn cleanup_dynamic_interfaces(&self) {
        self.state.interfaces.cleanup_dynamic()
    }

    // ========================================================================
    // Ring buffer logs
    // ========================================================================

    /// Append a log record to the named ring.
    pub fn ring_write(&self, name: &str, record: &[u8]) -> Result<()> {
        self.state.rings.write(name, record)
    }

    /// Drain the named ring through the registered log handler.
    pub fn ring_flush(&self, name: &str) -> Result<()> {
        self.state.rings.flush(name)
    }

    /// Status of the named ring.
    pub fn ring_status(&self, name: &str) -> Result<RingBufferStatus> {
        self.state.rings.status(name)
    }

    /// Status of every ring.
    pub fn ring_statuses(&self) -> Vec<RingBufferStatus> {
        self.state.rings.statuses()
    }

    /// Set the named ring's verbose level.
    pub fn set_ring_verbose_level(&self, name: &str, level: u32) -> Result<()> {
        self.state.rings.set_verbose_level(name, level)
    }

    /// Register the log delivery callback.
    pub fn set_log_handler(&self, handler: Option<LogHandler>) {
        self.state.rings.set_log_handler(handler)
    }

    /// Register the alert callback.
    pub fn set_alert_handler(&self, handler: Option<AlertHandler>) {
        self.state.rings.set_alert_handler(handler)
    }

    /// Deliver an alert to the registered alert callback.
    pub fn alert(&self, request_id: u32, payload: &[u8], err_code: i32) {
        self.state.rings.alert(request_id, payload, err_code)
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Turn packet fate monitoring on or off.
    pub fn set_fate_monitoring(&self, enabled: bool) {
        self.state.fate.set_enabled(enabled)
    }

    /// Whether packet fate monitoring is on.
    pub fn fate_monitoring_enabled(&self) -> bool {
        self.state.fate.is_enabled()
    }

    /// Record a packet outcome (no-op while monitoring is off).
    pub fn record_packet_fate(&self, record: PacketFateRecord) {
        self.state.fate.record(record)
    }

    /// Up to `max` retained fate records, oldest-first.
    pub fn packet_fates(&self, max: usize) -> Vec<PacketFateRecord> {
        self.state.fate.query(max)
    }

    /// Record a radar detection report.
    pub fn record_radar_event(&self, detected: bool, freq_mhz: u32, clock_boottime_us: u64) {
        self.state.radar.record(detected, freq_mhz, clock_boottime_us)
    }

    /// Up to `max` radar history records, oldest-first.
    pub fn radar_history(&self, max: usize) -> Vec<RadarEvent> {
        self.state.radar.query(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::lab;

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (transport, _injector) = lab::loopback(0x1c);
        let hal = WifiHal::with_transport(transport);
        assert!(hal.start());
        assert!(!hal.start());
        hal.cleanup().await;
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let (transport, _injector) = lab::loopback(0x1c);
        let hal = WifiHal::with_transport(transport);
        hal.start();
        hal.cleanup().await;
        assert_eq!(hal.loop_state(), LoopState::Stopped);
        hal.cleanup().await;
        assert_eq!(hal.loop_state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn test_stopped_session_does_not_restart() {
        let (transport, _injector) = lab::loopback(0x1c);
        let hal = WifiHal::with_transport(transport);
        hal.start();
        hal.cleanup().await;
        assert!(!hal.start());
        assert_eq!(hal.loop_state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn test_cleanup_without_start() {
        let (transport, _injector) = lab::loopback(0x1c);
        let hal = WifiHal::with_transport(transport);
        hal.register_handler(34, |_| {});
        hal.virtual_interface_create("wlan1").unwrap();
        hal.cleanup().await;
        assert!(hal.interfaces().is_empty());
        assert!(!hal.start());
    }
}
