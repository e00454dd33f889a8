//! Runtime configuration.

use crate::time::SlotDurations;

/// Which side of the star this device plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeType {
    /// Owns the timeline: beacons, admits, forwards to the host.
    Gateway,
    /// Scans, joins and transmits in its assigned cell.
    Node,
}

/// Configuration handed to [`crate::mac::Mac::new`] once at init.
///
/// All deadlines are expressed in slots.
pub struct MariConfig {
    /// Gateway or node.
    pub node_type: NodeType,
    /// Network id; 0 makes a node accept any network while scanning.
    pub network_id: u16,
    /// Physical channel override. Disables hopping when set.
    pub fixed_channel: Option<u8>,
    /// Channel override used while scanning.
    pub fixed_scan_channel: Option<u8>,
    /// Evict a peer not heard for this many slots.
    pub peer_lost_timeout_slots: u64,
    /// Leave the gateway after this many slots without a beacon.
    pub out_of_sync_slots: u64,
    /// Slots to wait for a join response before backing off again.
    pub join_response_slots: u64,
    /// Consecutive digest misses before a node evicts itself.
    pub bloom_miss_threshold: u8,
    /// A connected node proves liveness at least this often.
    pub keepalive_period_slots: u64,
    /// A synchronized node must listen to every Nth beacon cell.
    pub beacon_cadence: u8,
    /// Intra-slot timing budget from the board.
    pub slot_durations: SlotDurations,
}

impl Default for MariConfig {
    fn default() -> Self {
        Self {
            node_type: NodeType::Node,
            network_id: 1,
            fixed_channel: None,
            fixed_scan_channel: None,
            peer_lost_timeout_slots: 50,
            out_of_sync_slots: 75,
            join_response_slots: 16,
            bloom_miss_threshold: 3,
            keepalive_period_slots: 10,
            beacon_cadence: 1,
            slot_durations: SlotDurations::default(),
        }
    }
}
