//! Firmware/driver log ring buffers.
//!
//! The driver exposes a fixed set of diagnostic rings; the HAL mirrors
//! them as five named byte rings fed by event-loop callbacks and drained
//! on demand through a registered delivery callback. Each slot evicts
//! oldest records first when a write would exceed its capacity.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::error::{Error, Result};

/// Number of ring buffer slots.
pub const NUM_RING_BUFS: usize = 5;

/// The driver's diagnostic rings, one slot each.
pub const RING_NAMES: [&str; NUM_RING_BUFS] = [
    "power_events_rb",
    "connectivity_events_rb",
    "pkt_stats_rb",
    "driver_prints_rb",
    "firmware_prints_rb",
];

/// Default per-slot capacity in bytes.
pub const RING_CAPACITY_BYTES: usize = 4096;

/// Snapshot of a slot's counters, handed to the delivery callback and
/// returned by status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RingBufferStatus {
    /// Ring name.
    pub name: String,
    /// Slot index.
    pub ring_id: u32,
    /// Total capacity in bytes.
    pub size: u32,
    /// Current verbose level.
    pub verbose_level: u32,
    /// Bytes written over the slot's lifetime (including evicted).
    pub written_bytes: u64,
    /// Records written over the slot's lifetime (including evicted).
    pub written_records: u64,
}

/// Callback receiving a flushed ring's records and status.
pub type LogHandler = Arc<dyn Fn(&str, &[Vec<u8>], &RingBufferStatus) + Send + Sync>;

/// Callback receiving (request id, alert payload, error code).
pub type AlertHandler = Arc<dyn Fn(u32, &[u8], i32) + Send + Sync>;

struct Slot {
    name: &'static str,
    capacity: usize,
    entries: VecDeque<Vec<u8>>,
    occupied: usize,
    verbose_level: u32,
    written_bytes: u64,
    written_records: u64,
}

impl Slot {
    fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            entries: VecDeque::new(),
            occupied: 0,
            verbose_level: 0,
            written_bytes: 0,
            written_records: 0,
        }
    }

    fn write(&mut self, record: &[u8]) -> Result<()> {
        if record.len() > self.capacity {
            tracing::warn!(
                ring = self.name,
                size = record.len(),
                capacity = self.capacity,
                "log record larger than ring, discarding"
            );
            return Err(Error::RecordTooLarge {
                ring: self.name.to_string(),
                size: record.len(),
                capacity: self.capacity,
            });
        }

        // Evict oldest records until the new one fits.
        while self.occupied + record.len() > self.capacity {
            match self.entries.pop_front() {
                Some(evicted) => self.occupied -= evicted.len(),
                None => break,
            }
        }

        self.occupied += record.len();
        self.written_bytes += record.len() as u64;
        self.written_records += 1;
        self.entries.push_back(record.to_vec());
        Ok(())
    }

    fn status(&self, ring_id: u32) -> RingBufferStatus {
        RingBufferStatus {
            name: self.name.to_string(),
            ring_id,
            size: self.capacity as u32,
            verbose_level: self.verbose_level,
            written_bytes: self.written_bytes,
            written_records: self.written_records,
        }
    }
}

/// The five independently-lockable log rings plus the delivery and
/// alert callbacks. Callbacks are invoked with no slot lock held.
pub struct RingBufferStore {
    slots: [Mutex<Slot>; NUM_RING_BUFS],
    log_handler: Mutex<Option<LogHandler>>,
    alert_handler: Mutex<Option<AlertHandler>>,
}

impl RingBufferStore {
    /// Create the store with the default per-slot capacity.
    pub fn new() -> Self {
        Self::with_capacity(RING_CAPACITY_BYTES)
    }

    /// Create the store with a custom per-slot capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: RING_NAMES.map(|name| Mutex::new(Slot::new(name, capacity))),
            log_handler: Mutex::new(None),
            alert_handler: Mutex::new(None),
        }
    }

    fn slot_index(&self, name: &str) -> Result<usize> {
        RING_NAMES
            .iter()
            .position(|&n| n == name)
            .ok_or_else(|| {
                tracing::warn!(ring = name, "unknown ring buffer");
                Error::UnknownRingBuffer {
                    name: name.to_string(),
                }
            })
    }

    /// Append a record to the named ring, evicting oldest records when
    /// the slot is full.
    pub fn write(&self, name: &str, record: &[u8]) -> Result<()> {
        let idx = self.slot_index(name)?;
        self.slots[idx].lock().unwrap().write(record)
    }

    /// Drain the named ring and hand its records to the registered
    /// delivery callback. Without a registered callback the records are
    /// discarded (logged).
    pub fn flush(&self, name: &str) -> Result<()> {
        let idx = self.slot_index(name)?;

        let (records, status) = {
            let mut slot = self.slots[idx].lock().unwrap();
            let records: Vec<Vec<u8>> = slot.entries.drain(..).collect();
            slot.occupied = 0;
            (records, slot.status(idx as u32))
        };

        let handler = self.log_handler.lock().unwrap().clone();
        match handler {
            Some(handler) => handler(name, &records, &status),
            None => {
                tracing::debug!(ring = name, records = records.len(), "flush without log handler");
            }
        }
        Ok(())
    }

    /// Status of the named ring.
    pub fn status(&self, name: &str) -> Result<RingBufferStatus> {
        let idx = self.slot_index(name)?;
        Ok(self.slots[idx].lock().unwrap().status(idx as u32))
    }

    /// Status of every ring, in slot order.
    pub fn statuses(&self) -> Vec<RingBufferStatus> {
        self.slots
            .iter()
            .enumerate()
            .map(|(idx, slot)| slot.lock().unwrap().status(idx as u32))
            .collect()
    }

    /// Set the named ring's verbose level.
    pub fn set_verbose_level(&self, name: &str, level: u32) -> Result<()> {
        let idx = self.slot_index(name)?;
        self.slots[idx].lock().unwrap().verbose_level = level;
        Ok(())
    }

    /// Register the log delivery callback, replacing any existing one.
    pub fn set_log_handler(&self, handler: Option<LogHandler>) {
        *self.log_handler.lock().unwrap() = handler;
    }

    /// Register the alert callback, replacing any existing one.
    pub fn set_alert_handler(&self, handler: Option<AlertHandler>) {
        *self.alert_handler.lock().unwrap() = handler;
    }

    /// Deliver an alert to the registered alert callback, if any.
    pub fn alert(&self, request_id: u32, payload: &[u8], err_code: i32) {
        let handler = self.alert_handler.lock().unwrap().clone();
        match handler {
            Some(handler) => handler(request_id, payload, err_code),
            None => tracing::debug!(request_id, err_code, "alert without alert handler"),
        }
    }
}

impl Default for RingBufferStore {
    fn default() -> Self {
        Self::new()
    }
}
