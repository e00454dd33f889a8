//! Per-slot action selection.
//!
//! At every tick the runtime asks the scheduler what to do with the radio:
//! sleep, listen, or transmit, and on which channel. The scheduler reads the
//! schedule and the link flags assembled by the runtime; it never touches
//! the radio itself.

use heapless::Vec;

use crate::config::NodeType;
use crate::schedule::{CellType, Schedule};

/// Maximum hop pattern length.
pub const MAX_HOPS: usize = 16;

/// How many slots a scanning node dwells on one channel before rotating.
const SCAN_DWELL_SLOTS: u64 = 8;

/// What the radio does in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotAction {
    /// Keep the radio idle.
    Sleep,
    /// Arm the receiver.
    Rx,
    /// Transmit.
    Tx,
}

/// The scheduler's answer for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    /// What to do.
    pub action: SlotAction,
    /// Physical channel to do it on.
    pub channel: u8,
    /// The type of the cell at this slot offset.
    pub cell_type: CellType,
}

/// Link flags the runtime assembles before asking for a slot. They condense
/// the association and queue state the action rules depend on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkFlags {
    /// The node tracks the gateway's timeline.
    pub synchronized: bool,
    /// The node's join backoff expired; transmit in this shared cell.
    pub join_tx_due: bool,
    /// The node must listen to this beacon cell (cadence or joining).
    pub beacon_listen_due: bool,
    /// The node has data queued or a keepalive due for its uplink cell.
    pub uplink_due: bool,
    /// The gateway has a staged response or queued downlink data.
    pub downlink_pending: bool,
}

/// A channel hopping pattern.
pub struct HoppingSequence {
    sequence: Vec<u8, MAX_HOPS>,
}

impl HoppingSequence {
    /// The default pattern over the 16 regular channels:
    /// ```txt
    /// 16, 17, 23, 18, 26, 15, 25, 22, 19, 11, 12, 13, 24, 14, 20, 21
    /// ```
    pub fn sequence_16_16() -> Self {
        Self::new(&[16, 17, 23, 18, 26, 15, 25, 22, 19, 11, 12, 13, 24, 14, 20, 21])
    }

    /// A short two-channel pattern.
    pub fn sequence_2_2() -> Self {
        Self::new(&[20, 25])
    }

    /// Create a hopping sequence from a slice of channels.
    pub fn new(s: &[u8]) -> Self {
        let mut sequence = Vec::new();
        sequence.extend_from_slice(s).unwrap();
        Self { sequence }
    }

    /// Number of distinct hops; cell channel offsets must stay below this.
    pub fn cardinality(&self) -> u8 {
        self.sequence.len() as u8
    }

    /// Return the channel for a given channel offset and ASN.
    pub fn channel(&self, channel_offset: u8, asn: u64) -> u8 {
        let index = (asn.wrapping_add(channel_offset as u64) % self.sequence.len() as u64) as usize;
        self.sequence[index]
    }

    /// Return the scan channel for an unsynchronized node. The scan dwells
    /// on each channel for a few slots so a full beacon round fits.
    pub fn scan_channel(&self, asn: u64) -> u8 {
        let index = ((asn / SCAN_DWELL_SLOTS) % self.sequence.len() as u64) as usize;
        self.sequence[index]
    }
}

impl Default for HoppingSequence {
    fn default() -> Self {
        Self::sequence_16_16()
    }
}

/// Owns the schedule and answers the per-slot action question.
pub struct Scheduler {
    schedule: Schedule,
    hopping: HoppingSequence,
    fixed_channel: Option<u8>,
    fixed_scan_channel: Option<u8>,
}

impl Scheduler {
    /// Create a scheduler around a validated schedule.
    pub fn new(
        schedule: Schedule,
        hopping: HoppingSequence,
        fixed_channel: Option<u8>,
        fixed_scan_channel: Option<u8>,
    ) -> Self {
        Self {
            schedule,
            hopping,
            fixed_channel,
            fixed_scan_channel,
        }
    }

    /// The schedule being run.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Mutable access for assignment bookkeeping.
    pub fn schedule_mut(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    /// The hop pattern in use.
    pub fn hopping(&self) -> &HoppingSequence {
        &self.hopping
    }

    /// Select action, channel and cell type for a slot.
    pub fn slot_info(
        &self,
        asn: u64,
        node_type: NodeType,
        local_id: u64,
        flags: &LinkFlags,
    ) -> SlotInfo {
        let cell = self.schedule.slot_at(self.schedule.slot_offset(asn));
        let channel = self.slot_channel(cell.channel_offset(), asn);

        let action = match node_type {
            NodeType::Gateway => match cell.cell_type() {
                CellType::Beacon => SlotAction::Tx,
                CellType::SharedUplink => SlotAction::Rx,
                CellType::Downlink if flags.downlink_pending => SlotAction::Tx,
                CellType::Downlink => SlotAction::Sleep,
                CellType::Uplink => SlotAction::Rx,
            },
            NodeType::Node if !flags.synchronized => {
                return SlotInfo {
                    action: SlotAction::Rx,
                    channel: self.scan_channel(asn),
                    cell_type: cell.cell_type(),
                };
            }
            NodeType::Node => match cell.cell_type() {
                CellType::Beacon if flags.beacon_listen_due => SlotAction::Rx,
                CellType::Beacon => SlotAction::Sleep,
                CellType::SharedUplink if flags.join_tx_due => SlotAction::Tx,
                CellType::SharedUplink => SlotAction::Sleep,
                CellType::Downlink => SlotAction::Rx,
                CellType::Uplink
                    if cell.assignee() == Some(local_id) && flags.uplink_due =>
                {
                    SlotAction::Tx
                }
                CellType::Uplink => SlotAction::Sleep,
            },
        };

        SlotInfo {
            action,
            channel,
            cell_type: cell.cell_type(),
        }
    }

    fn slot_channel(&self, channel_offset: u8, asn: u64) -> u8 {
        match self.fixed_channel {
            Some(channel) => channel,
            None => self.hopping.channel(channel_offset, asn),
        }
    }

    fn scan_channel(&self, asn: u64) -> u8 {
        self.fixed_channel
            .or(self.fixed_scan_channel)
            .unwrap_or_else(|| self.hopping.scan_channel(asn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> Scheduler {
        Scheduler::new(
            Schedule::minuscule(),
            HoppingSequence::sequence_16_16(),
            None,
            None,
        )
    }

    #[test]
    fn gateway_actions() {
        let s = scheduler();
        let flags = LinkFlags {
            synchronized: true,
            ..Default::default()
        };

        // [B, B, B, S, U]
        for asn in 0..3 {
            assert_eq!(s.slot_info(asn, NodeType::Gateway, 1, &flags).action, SlotAction::Tx);
        }
        assert_eq!(s.slot_info(3, NodeType::Gateway, 1, &flags).action, SlotAction::Rx);
        assert_eq!(s.slot_info(4, NodeType::Gateway, 1, &flags).action, SlotAction::Rx);
    }

    #[test]
    fn gateway_downlink_only_when_pending() {
        let s = Scheduler::new(
            Schedule::small(),
            HoppingSequence::sequence_16_16(),
            None,
            None,
        );
        let offset = 4; // the small schedule's downlink cell
        assert_eq!(s.schedule().slot_at(offset).cell_type(), CellType::Downlink);

        let mut flags = LinkFlags::default();
        assert_eq!(
            s.slot_info(offset as u64, NodeType::Gateway, 1, &flags).action,
            SlotAction::Sleep
        );
        flags.downlink_pending = true;
        assert_eq!(
            s.slot_info(offset as u64, NodeType::Gateway, 1, &flags).action,
            SlotAction::Tx
        );
    }

    #[test]
    fn unsynchronized_node_scans() {
        let s = scheduler();
        let flags = LinkFlags::default();
        for asn in 0..20 {
            let info = s.slot_info(asn, NodeType::Node, 0xAA, &flags);
            assert_eq!(info.action, SlotAction::Rx);
            assert_eq!(info.channel, s.hopping().scan_channel(asn));
        }
    }

    #[test]
    fn scan_channel_rotates() {
        let hopping = HoppingSequence::sequence_16_16();
        assert_eq!(hopping.scan_channel(0), hopping.scan_channel(7));
        assert_ne!(hopping.scan_channel(0), hopping.scan_channel(8));
    }

    #[test]
    fn node_uplink_needs_ownership_and_demand() {
        let mut s = scheduler();
        s.schedule_mut().assign(0xAA, 0).unwrap();

        let mut flags = LinkFlags {
            synchronized: true,
            uplink_due: true,
            ..Default::default()
        };

        // ASN 4 falls on the uplink cell of the 5-slot schedule.
        assert_eq!(s.slot_info(4, NodeType::Node, 0xAA, &flags).action, SlotAction::Tx);
        // Somebody else's cell: stay silent.
        assert_eq!(s.slot_info(4, NodeType::Node, 0xBB, &flags).action, SlotAction::Sleep);
        // Nothing to say: sleep through our own cell.
        flags.uplink_due = false;
        assert_eq!(s.slot_info(4, NodeType::Node, 0xAA, &flags).action, SlotAction::Sleep);
    }

    #[test]
    fn node_shared_cell_follows_backoff() {
        let s = scheduler();
        let mut flags = LinkFlags {
            synchronized: true,
            ..Default::default()
        };
        assert_eq!(s.slot_info(3, NodeType::Node, 0xAA, &flags).action, SlotAction::Sleep);
        flags.join_tx_due = true;
        assert_eq!(s.slot_info(3, NodeType::Node, 0xAA, &flags).action, SlotAction::Tx);
    }

    #[test]
    fn beacon_cadence_gates_listening() {
        let s = scheduler();
        let mut flags = LinkFlags {
            synchronized: true,
            beacon_listen_due: true,
            ..Default::default()
        };
        assert_eq!(s.slot_info(0, NodeType::Node, 0xAA, &flags).action, SlotAction::Rx);
        flags.beacon_listen_due = false;
        assert_eq!(s.slot_info(0, NodeType::Node, 0xAA, &flags).action, SlotAction::Sleep);
    }

    #[test]
    fn fixed_channel_overrides_hopping() {
        let s = Scheduler::new(
            Schedule::minuscule(),
            HoppingSequence::sequence_16_16(),
            Some(26),
            None,
        );
        let flags = LinkFlags {
            synchronized: true,
            ..Default::default()
        };
        for asn in 0..10 {
            assert_eq!(s.slot_info(asn, NodeType::Gateway, 1, &flags).channel, 26);
            assert_eq!(s.slot_info(asn, NodeType::Node, 2, &flags).channel, 26);
        }
    }

    #[test]
    fn channels_hop_with_asn() {
        let hopping = HoppingSequence::sequence_16_16();
        let a = hopping.channel(0, 0);
        let b = hopping.channel(0, 1);
        assert_ne!(a, b);
        // Same slot, different offsets land on different channels.
        assert_ne!(hopping.channel(0, 5), hopping.channel(1, 5));
    }
}
