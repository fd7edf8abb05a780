//! Bounded diagnostic history stores: packet fate and radar detection.
//!
//! Both stores are fixed-capacity, overwrite-oldest circular records
//! populated by dispatched events and read back by query calls. Queries
//! return records oldest-first (chronological).

use std::collections::VecDeque;
use std::sync::Mutex;

/// Maximum retained packet fate records.
pub const MAX_FATE_LOG_LEN: usize = 32;

/// Frames stored in fate records are truncated to one Ethernet II MTU.
pub const MAX_FRAME_LEN: usize = 1518;

/// Maximum retained radar detection records.
pub const MAX_NUM_RADAR_HISTORY: usize = 64;

/// Per-packet outcome reported by the driver or firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum PacketFate {
    // Transmit outcomes
    TxAcked,
    TxSent,
    TxFwQueued,
    TxFwDropInvalid,
    TxFwDropNobufs,
    TxFwDropOther,
    TxDrvQueued,
    TxDrvDropInvalid,
    TxDrvDropNobufs,
    TxDrvDropOther,
    // Receive outcomes
    RxSuccess,
    RxFwQueued,
    RxFwDropFilter,
    RxFwDropInvalid,
    RxFwDropNobufs,
    RxFwDropOther,
    RxDrvQueued,
    RxDrvDropFilter,
    RxDrvDropInvalid,
    RxDrvDropNobufs,
    RxDrvDropOther,
}

/// One recorded packet outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PacketFateRecord {
    /// What happened to the packet.
    pub fate: PacketFate,
    /// Leading bytes of the frame, truncated to [`MAX_FRAME_LEN`].
    pub frame: Vec<u8>,
    /// Driver timestamp, microseconds.
    pub driver_timestamp_usec: u64,
    /// Firmware timestamp, microseconds.
    pub firmware_timestamp_usec: u64,
}

struct FateInner {
    enabled: bool,
    records: VecDeque<PacketFateRecord>,
}

/// Packet fate store, gated by a process-wide monitoring flag.
///
/// Records arriving while monitoring is disabled are dropped; the ring
/// retains at most [`MAX_FATE_LOG_LEN`] records, discarding the oldest
/// on overflow (documented policy, not an error).
pub struct PacketFateStore {
    inner: Mutex<FateInner>,
}

impl PacketFateStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FateInner {
                enabled: false,
                records: VecDeque::with_capacity(MAX_FATE_LOG_LEN),
            }),
        }
    }

    /// Turn fate monitoring on or off. Disabling keeps already-recorded
    /// history readable.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.lock().unwrap().enabled = enabled;
    }

    /// Whether fate monitoring is currently on.
    pub fn is_enabled(&self) -> bool {
        self.inner.lock().unwrap().enabled
    }

    /// Record a packet outcome. No-op while monitoring is disabled.
    pub fn record(&self, mut record: PacketFateRecord) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.enabled {
            tracing::trace!("packet fate dropped, monitoring disabled");
            return;
        }
        record.frame.truncate(MAX_FRAME_LEN);
        if inner.records.len() == MAX_FATE_LOG_LEN {
            inner.records.pop_front();
        }
        inner.records.push_back(record);
    }

    /// Up to `max` retained records, oldest-first.
    pub fn query(&self, max: usize) -> Vec<PacketFateRecord> {
        let inner = self.inner.lock().unwrap();
        inner.records.iter().take(max).cloned().collect()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    /// Check if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all records (HAL teardown).
    pub fn clear(&self) {
        self.inner.lock().unwrap().records.clear();
    }
}

impl Default for PacketFateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// One radar detection report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RadarEvent {
    /// Whether radar was actually detected (false for CAC results).
    pub detected: bool,
    /// Channel center frequency in MHz.
    pub freq_mhz: u32,
    /// CLOCK_BOOTTIME timestamp, microseconds.
    pub clock_boottime_us: u64,
}

/// Radar detection history for DFS diagnostics, capacity
/// [`MAX_NUM_RADAR_HISTORY`], overwrite-oldest.
pub struct RadarHistory {
    records: Mutex<VecDeque<RadarEvent>>,
}

impl RadarHistory {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(MAX_NUM_RADAR_HISTORY)),
        }
    }

    /// Record a radar detection report.
    pub fn record(&self, detected: bool, freq_mhz: u32, clock_boottime_us: u64) {
        let mut records = self.records.lock().unwrap();
        if records.len() == MAX_NUM_RADAR_HISTORY {
            records.pop_front();
        }
        records.push_back(RadarEvent {
            detected,
            freq_mhz,
            clock_boottime_us,
        });
    }

    /// Copy up to `max` records, oldest-first. A destination smaller
    /// than the retained history truncates; the returned length is the
    /// actual count.
    pub fn query(&self, max: usize) -> Vec<RadarEvent> {
        let records = self.records.lock().unwrap();
        records.iter().take(max).copied().collect()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Check if the history is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all records (HAL teardown).
    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }
}

impl Default for RadarHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fate_record(tag: u8) -> PacketFateRecord {
        PacketFateRecord {
            fate: PacketFate::TxAcked,
            frame: vec![tag; 4],
            driver_timestamp_usec: tag as u64,
            firmware_timestamp_usec: 0,
        }
    }

    #[test]
    fn test_fate_disabled_drops() {
        let store = PacketFateStore::new();
        store.record(fate_record(1));
        assert!(store.is_empty());

        store.set_enabled(true);
        store.record(fate_record(2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_fate_capacity_overwrites_oldest() {
        let store = PacketFateStore::new();
        store.set_enabled(true);
        for i in 0..=MAX_FATE_LOG_LEN as u8 {
            store.record(fate_record(i));
        }
        assert_eq!(store.len(), MAX_FATE_LOG_LEN);

        let records = store.query(MAX_FATE_LOG_LEN);
        // Record 0 evicted, newest present.
        assert_eq!(records[0].driver_timestamp_usec, 1);
        assert_eq!(
            records.last().unwrap().driver_timestamp_usec,
            MAX_FATE_LOG_LEN as u64
        );
    }

    #[test]
    fn test_fate_query_truncates() {
        let store = PacketFateStore::new();
        store.set_enabled(true);
        for i in 0..10 {
            store.record(fate_record(i));
        }
        assert_eq!(store.query(3).len(), 3);
        assert_eq!(store.query(100).len(), 10);
    }

    #[test]
    fn test_fate_frame_truncated() {
        let store = PacketFateStore::new();
        store.set_enabled(true);
        store.record(PacketFateRecord {
            fate: PacketFate::RxSuccess,
            frame: vec![0; MAX_FRAME_LEN * 2],
            driver_timestamp_usec: 0,
            firmware_timestamp_usec: 0,
        });
        assert_eq!(store.query(1)[0].frame.len(), MAX_FRAME_LEN);
    }

    #[test]
    fn test_radar_capacity() {
        let history = RadarHistory::new();
        for i in 0..=MAX_NUM_RADAR_HISTORY as u64 {
            history.record(true, 5260, i);
        }
        assert_eq!(history.len(), MAX_NUM_RADAR_HISTORY);

        let records = history.query(MAX_NUM_RADAR_HISTORY);
        // Oldest (timestamp 0) evicted, newest present.
        assert_eq!(records[0].clock_boottime_us, 1);
        assert_eq!(
            records.last().unwrap().clock_boottime_us,
            MAX_NUM_RADAR_HISTORY as u64
        );
    }

    #[test]
    fn test_radar_query_reports_truncated_count() {
        let history = RadarHistory::new();
        for i in 0..10 {
            history.record(i % 2 == 0, 5300, i);
        }
        assert_eq!(history.query(4).len(), 4);
        assert_eq!(history.query(64).len(), 10);
        assert_eq!(history.query(0).len(), 0);
    }

    #[test]
    fn test_radar_chronological_order() {
        let history = RadarHistory::new();
        history.record(true, 5260, 100);
        history.record(false, 5280, 200);
        let records = history.query(64);
        assert!(records[0].clock_boottime_us < records[1].clock_boottime_us);
    }
}
