//! Association state machines for both sides of the star.
//!
//! The gateway admits nodes into uplink cells and evicts the silent ones.
//! A node scans for beacons, locks onto a gateway's timeline, contends for
//! a cell and watches the membership digest for its own eviction.
//!
//! All transitions happen at slot boundaries, driven by the runtime; nothing
//! here runs from an in-progress radio action.

use rand_core::RngCore;

use crate::bloom::BloomDigest;
use crate::config::MariConfig;
use crate::event::{Event, EventQueue, EventTag};
use crate::schedule::{CellType, Schedule, ScheduleError};
use mari_frame::{BeaconRepr, JoinResponseFlags, JoinResponseRepr};

/// A join response waiting for the next transmit opportunity. One deep:
/// a second join request arriving while one is staged is dropped and the
/// loser retries after its response timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StagedResponse {
    /// Node the response is addressed to.
    pub dst: u64,
    /// Whether the gateway had to refuse for lack of cells.
    pub full: bool,
    /// The granted uplink cell, when not full.
    pub cell: u8,
}

/// Gateway-side association bookkeeping.
///
/// Admitted peers live in the uplink cells of the schedule; this struct only
/// carries the transient state around admissions and the eviction probe.
pub(crate) struct GatewayAssoc {
    staged: Option<StagedResponse>,
    /// Round-robin cursor so the eviction scan touches one cell per slot.
    probe_cursor: usize,
}

impl GatewayAssoc {
    pub fn new() -> Self {
        Self {
            staged: None,
            probe_cursor: 0,
        }
    }

    /// Whether a join response is waiting for a transmit opportunity.
    pub fn has_staged_response(&self) -> bool {
        self.staged.is_some()
    }

    /// Take the staged response for transmission.
    pub fn take_response(&mut self) -> Option<StagedResponse> {
        self.staged.take()
    }

    /// Admit a join request heard in a shared uplink cell.
    ///
    /// Admission takes the lowest-indexed free uplink cell and dirties the
    /// digest. A full schedule stages a refusal instead so the node backs
    /// off with a doubled window.
    pub fn handle_join_request(
        &mut self,
        src: u64,
        asn: u64,
        schedule: &mut Schedule,
        bloom: &mut BloomDigest,
        events: &mut EventQueue,
    ) -> Result<(), ScheduleError> {
        if self.staged.is_some() {
            // A response is already in flight this round; the loser of the
            // contention window retries after its timeout.
            return Ok(());
        }

        if let Some(index) = schedule.lookup(src) {
            // The node missed our earlier response. Answer again.
            let _ = schedule.touch(src, asn);
            self.staged = Some(StagedResponse {
                dst: src,
                full: false,
                cell: index as u8,
            });
            return Ok(());
        }

        match schedule.assign(src, asn) {
            Ok(index) => {
                bloom.mark_dirty();
                events.push(Event::NodeJoined { node: src });
                self.staged = Some(StagedResponse {
                    dst: src,
                    full: false,
                    cell: index as u8,
                });
                Ok(())
            }
            Err(err) => {
                self.staged = Some(StagedResponse {
                    dst: src,
                    full: true,
                    cell: 0,
                });
                Err(err)
            }
        }
    }

    /// Refresh liveness on any uplink traffic from an admitted node.
    pub fn handle_uplink(
        &mut self,
        src: u64,
        asn: u64,
        schedule: &mut Schedule,
    ) -> Result<(), ScheduleError> {
        schedule.touch(src, asn)
    }

    /// Deferred slot-tail work: probe one uplink cell for a silent peer.
    /// Spreading the scan keeps the per-slot work bounded on big schedules.
    pub fn tick_tail(
        &mut self,
        asn: u64,
        config: &MariConfig,
        schedule: &mut Schedule,
        bloom: &mut BloomDigest,
        events: &mut EventQueue,
    ) {
        self.probe_cursor = (self.probe_cursor + 1) % schedule.len();
        let cell = schedule.slot_at(self.probe_cursor);
        if cell.cell_type() != CellType::Uplink {
            return;
        }

        if let (Some(node), Some(last_heard)) = (cell.assignee(), cell.last_heard_asn()) {
            if asn.saturating_sub(last_heard) > config.peer_lost_timeout_slots {
                let _ = schedule.release(node);
                bloom.mark_dirty();
                events.push(Event::NodeLeft {
                    node,
                    tag: EventTag::PeerLostTimeout,
                });
            }
        }
    }

    /// Administrative eviction: drop the node's cell and tell the digest.
    pub fn evict(
        &mut self,
        node: u64,
        schedule: &mut Schedule,
        bloom: &mut BloomDigest,
        events: &mut EventQueue,
    ) -> Result<(), ScheduleError> {
        schedule.release(node)?;
        bloom.mark_dirty();
        events.push(Event::NodeLeft {
            node,
            tag: EventTag::Handover,
        });
        Ok(())
    }
}

/// Node-side join progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JoinState {
    /// Hunting for a beacon on the scan channel.
    Scanning,
    /// One beacon heard; validating the clock against a second one.
    Synchronizing,
    /// Contending for a cell in the shared uplink window.
    Joining,
    /// Admitted; owns an uplink cell.
    Connected,
    /// On the way back to scanning; the reason is delivered at the tail.
    Leaving(EventTag),
}

/// What a join response did to the node state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinOutcome {
    Connected,
    Refused,
    Ignored,
}

/// Node-side synchronization record and state machine.
pub(crate) struct NodeAssoc {
    state: JoinState,
    backoff_n_min: u8,
    backoff_n_max: u8,
    local_schedule_id: u8,

    gateway: u64,
    network_id: u16,
    schedule_id: u8,
    last_beacon_asn: u64,
    bloom_misses: u8,

    backoff_n: u8,
    backoff: u16,
    response_deadline: Option<u64>,

    last_uplink_asn: u64,
    beacon_cells_seen: u32,
}

impl NodeAssoc {
    pub fn new(schedule: &Schedule) -> Self {
        Self {
            state: JoinState::Scanning,
            backoff_n_min: schedule.backoff_n_min(),
            backoff_n_max: schedule.backoff_n_max(),
            local_schedule_id: schedule.id(),
            gateway: 0,
            network_id: 0,
            schedule_id: 0,
            last_beacon_asn: 0,
            bloom_misses: 0,
            backoff_n: schedule.backoff_n_min(),
            backoff: 0,
            response_deadline: None,
            last_uplink_asn: 0,
            beacon_cells_seen: 0,
        }
    }

    pub fn state(&self) -> JoinState {
        self.state
    }

    /// The gateway we are locked to, once synchronized.
    pub fn gateway(&self) -> u64 {
        self.gateway
    }

    /// The network we are locked to, once synchronized.
    pub fn network_id(&self) -> u16 {
        self.network_id
    }

    /// Whether we track the gateway's timeline.
    pub fn is_synchronized(&self) -> bool {
        matches!(
            self.state,
            JoinState::Synchronizing | JoinState::Joining | JoinState::Connected
        )
    }

    pub fn is_connected(&self) -> bool {
        self.state == JoinState::Connected
    }

    /// Process a beacon. `asn` is the runtime's slot counter; it is snapped
    /// to the gateway's announced ASN on every reception.
    pub fn handle_beacon(
        &mut self,
        beacon: &BeaconRepr<'_>,
        local_id: u64,
        asn: &mut u64,
        config: &MariConfig,
        rng: &mut impl RngCore,
    ) {
        match self.state {
            JoinState::Scanning => {
                if beacon.remaining_capacity == 0 {
                    return;
                }
                if beacon.active_schedule_id != self.local_schedule_id {
                    // We cannot follow a timeline we do not have the shape of.
                    return;
                }
                self.lock_to(beacon, asn);
                self.state = JoinState::Synchronizing;
                debug!(
                    "sync: beacon from {}, validating clock at asn {}",
                    beacon.src, beacon.asn
                );
            }
            JoinState::Synchronizing => {
                let consistent = beacon.src == self.gateway
                    && beacon.active_schedule_id == self.schedule_id
                    && beacon.asn == *asn;
                if consistent {
                    self.last_beacon_asn = beacon.asn;
                    self.state = JoinState::Joining;
                    self.backoff_n = self.backoff_n_min;
                    self.draw_backoff(rng);
                    debug!("sync: clock validated, contending with backoff {}", self.backoff);
                } else {
                    // Treat it as a fresh first beacon.
                    self.lock_to(beacon, asn);
                }
            }
            JoinState::Joining | JoinState::Connected => {
                if beacon.src != self.gateway {
                    return;
                }
                *asn = beacon.asn;
                self.last_beacon_asn = beacon.asn;

                if self.state == JoinState::Connected {
                    if let Some(digest) = beacon.bloom {
                        if BloomDigest::contains(digest, local_id) {
                            self.bloom_misses = 0;
                        } else {
                            self.bloom_misses += 1;
                            if self.bloom_misses >= config.bloom_miss_threshold {
                                self.state = JoinState::Leaving(EventTag::PeerLostBloom);
                            }
                        }
                    }
                }
            }
            JoinState::Leaving(_) => {}
        }
    }

    fn lock_to(&mut self, beacon: &BeaconRepr<'_>, asn: &mut u64) {
        self.gateway = beacon.src;
        self.network_id = beacon.network_id;
        self.schedule_id = beacon.active_schedule_id;
        self.last_beacon_asn = beacon.asn;
        *asn = beacon.asn;
    }

    /// Process a join response addressed to us.
    pub fn handle_join_response(
        &mut self,
        response: &JoinResponseRepr,
        asn: u64,
        rng: &mut impl RngCore,
        events: &mut EventQueue,
    ) -> JoinOutcome {
        if self.state != JoinState::Joining {
            return JoinOutcome::Ignored;
        }

        self.response_deadline = None;

        if response.flags.contains(JoinResponseFlags::GATEWAY_FULL) {
            // The refusal is observable, but the contention continues: the
            // machine stays joining with a widened window.
            self.bump_backoff(rng);
            events.push(Event::Disconnected {
                tag: EventTag::GatewayFull,
            });
            JoinOutcome::Refused
        } else {
            self.state = JoinState::Connected;
            self.bloom_misses = 0;
            self.last_uplink_asn = asn;
            events.push(Event::Connected {
                gateway: self.gateway,
            });
            JoinOutcome::Connected
        }
    }

    /// Deferred slot-tail work: timeline and response timeouts, and the
    /// actual departure once a leave reason is set.
    pub fn tick_tail(&mut self, asn: u64, config: &MariConfig, events: &mut EventQueue, rng: &mut impl RngCore) {
        match self.state {
            JoinState::Synchronizing | JoinState::Joining
                if asn.saturating_sub(self.last_beacon_asn) > config.out_of_sync_slots =>
            {
                // Never announced as connected, so no disconnect to report.
                self.reset_to_scanning();
                return;
            }
            JoinState::Connected
                if asn.saturating_sub(self.last_beacon_asn) > config.out_of_sync_slots =>
            {
                self.state = JoinState::Leaving(EventTag::OutOfSync);
            }
            _ => {}
        }

        if self.state == JoinState::Joining {
            if let Some(deadline) = self.response_deadline {
                if asn > deadline {
                    self.response_deadline = None;
                    self.bump_backoff(rng);
                }
            }
        }

        if let JoinState::Leaving(tag) = self.state {
            events.push(Event::Disconnected { tag });
            self.reset_to_scanning();
        }
    }

    fn reset_to_scanning(&mut self) {
        self.state = JoinState::Scanning;
        self.gateway = 0;
        self.network_id = 0;
        self.schedule_id = 0;
        self.bloom_misses = 0;
        self.backoff_n = self.backoff_n_min;
        self.backoff = 0;
        self.response_deadline = None;
    }

    /// Whether the join request goes out in this shared cell.
    pub fn join_tx_due(&self) -> bool {
        self.state == JoinState::Joining && self.response_deadline.is_none() && self.backoff == 0
    }

    /// A shared cell went by without us transmitting: run down the backoff.
    pub fn shared_cell_elapsed(&mut self) {
        if self.state == JoinState::Joining && self.response_deadline.is_none() && self.backoff > 0
        {
            self.backoff -= 1;
        }
    }

    /// The join request left the antenna; arm the response timeout.
    pub fn join_request_sent(&mut self, asn: u64, config: &MariConfig) {
        self.response_deadline = Some(asn + config.join_response_slots);
    }

    /// Whether a keepalive is due in our uplink cell.
    pub fn keepalive_due(&self, asn: u64, config: &MariConfig) -> bool {
        self.state == JoinState::Connected
            && asn.saturating_sub(self.last_uplink_asn) >= config.keepalive_period_slots
    }

    /// Any uplink (data or keepalive) restarts the keepalive period.
    pub fn uplink_sent(&mut self, asn: u64) {
        self.last_uplink_asn = asn;
    }

    /// Whether this beacon cell must be listened to.
    pub fn beacon_listen_due(&self, config: &MariConfig) -> bool {
        match self.state {
            JoinState::Connected => {
                config.beacon_cadence <= 1
                    || self.beacon_cells_seen % config.beacon_cadence as u32 == 0
            }
            // While validating the clock or waiting for a response every
            // beacon matters.
            _ => true,
        }
    }

    /// A beacon cell went by; advance the listen cadence.
    pub fn beacon_cell_elapsed(&mut self) {
        self.beacon_cells_seen = self.beacon_cells_seen.wrapping_add(1);
    }

    fn draw_backoff(&mut self, rng: &mut impl RngCore) {
        let window = 1u32 << self.backoff_n;
        self.backoff = (rng.next_u32() & (window - 1)) as u16;
    }

    /// Double the backoff exponent, clamped, and draw a fresh counter.
    fn bump_backoff(&mut self, rng: &mut impl RngCore) {
        self.backoff_n = (self.backoff_n * 2).min(self.backoff_n_max);
        self.draw_backoff(rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::RecordingSink;
    use mari_frame::PacketHeaderRepr;
    use rand::rngs::mock::StepRng;

    fn beacon(asn: u64, capacity: u8) -> BeaconRepr<'static> {
        BeaconRepr {
            network_id: 1,
            asn,
            src: 0x01,
            remaining_capacity: capacity,
            active_schedule_id: Schedule::MINUSCULE,
            bloom: None,
        }
    }

    fn response(full: bool) -> JoinResponseRepr {
        JoinResponseRepr {
            header: PacketHeaderRepr {
                network_id: 1,
                dst: 0xAA,
                src: 0x01,
                rssi_stat: 0,
            },
            flags: if full {
                JoinResponseFlags::GATEWAY_FULL
            } else {
                JoinResponseFlags::empty()
            },
            cell_index: 4,
        }
    }

    fn config() -> MariConfig {
        MariConfig::default()
    }

    #[test]
    fn node_two_beacons_to_join() {
        let cfg = config();
        let mut node = NodeAssoc::new(&Schedule::minuscule());
        let mut rng = StepRng::new(0, 0);
        let mut asn = 0u64;

        assert_eq!(node.state(), JoinState::Scanning);
        node.handle_beacon(&beacon(3, 1), 0xAA, &mut asn, &cfg, &mut rng);
        assert_eq!(node.state(), JoinState::Synchronizing);
        assert_eq!(asn, 3);

        // Second beacon consistent with the tracked clock.
        asn += 5;
        node.handle_beacon(&beacon(8, 1), 0xAA, &mut asn, &cfg, &mut rng);
        assert_eq!(node.state(), JoinState::Joining);
        assert!(node.is_synchronized());
    }

    #[test]
    fn full_gateway_beacon_ignored_while_scanning() {
        let cfg = config();
        let mut node = NodeAssoc::new(&Schedule::minuscule());
        let mut rng = StepRng::new(0, 0);
        let mut asn = 0u64;

        node.handle_beacon(&beacon(3, 0), 0xAA, &mut asn, &cfg, &mut rng);
        assert_eq!(node.state(), JoinState::Scanning);
    }

    #[test]
    fn inconsistent_clock_restarts_validation() {
        let cfg = config();
        let mut node = NodeAssoc::new(&Schedule::minuscule());
        let mut rng = StepRng::new(0, 0);
        let mut asn = 0u64;

        node.handle_beacon(&beacon(3, 1), 0xAA, &mut asn, &cfg, &mut rng);
        // The second beacon disagrees with our estimate: re-lock, stay
        // synchronizing.
        asn += 5;
        node.handle_beacon(&beacon(11, 1), 0xAA, &mut asn, &cfg, &mut rng);
        assert_eq!(node.state(), JoinState::Synchronizing);
        assert_eq!(asn, 11);
    }

    #[test]
    fn backoff_counts_down_shared_cells() {
        let cfg = config();
        let mut node = NodeAssoc::new(&Schedule::minuscule());
        // Draw 3 for the first backoff.
        let mut rng = StepRng::new(3, 0);
        let mut asn = 0u64;

        node.handle_beacon(&beacon(3, 1), 0xAA, &mut asn, &cfg, &mut rng);
        asn += 5;
        node.handle_beacon(&beacon(8, 1), 0xAA, &mut asn, &cfg, &mut rng);
        assert_eq!(node.state(), JoinState::Joining);
        assert!(!node.join_tx_due());

        node.shared_cell_elapsed();
        node.shared_cell_elapsed();
        assert!(!node.join_tx_due());
        node.shared_cell_elapsed();
        assert!(node.join_tx_due());
    }

    #[test]
    fn join_response_connects_and_full_backs_off() {
        let cfg = config();
        let mut events = EventQueue::new();
        let mut node = NodeAssoc::new(&Schedule::minuscule());
        let mut rng = StepRng::new(0, 0);
        let mut asn = 0u64;

        node.handle_beacon(&beacon(3, 1), 0xAA, &mut asn, &cfg, &mut rng);
        asn += 5;
        node.handle_beacon(&beacon(8, 1), 0xAA, &mut asn, &cfg, &mut rng);
        node.join_request_sent(asn, &cfg);

        // A refusal doubles the exponent and stays joining.
        assert_eq!(
            node.handle_join_response(&response(true), asn, &mut rng, &mut events),
            JoinOutcome::Refused
        );
        assert_eq!(node.state(), JoinState::Joining);
        assert_eq!(node.backoff_n, 9); // 5 doubled, clamped to n_max

        node.join_request_sent(asn, &cfg);
        assert_eq!(
            node.handle_join_response(&response(false), asn, &mut rng, &mut events),
            JoinOutcome::Connected
        );
        assert_eq!(node.state(), JoinState::Connected);

        let mut sink = RecordingSink::default();
        events.drain(&mut sink);
        assert_eq!(
            sink.events,
            vec![
                Event::Disconnected {
                    tag: EventTag::GatewayFull
                },
                Event::Connected { gateway: 0x01 },
            ]
        );
    }

    #[test]
    fn response_timeout_redraws_backoff() {
        let cfg = config();
        let mut events = EventQueue::new();
        let mut node = NodeAssoc::new(&Schedule::minuscule());
        let mut rng = StepRng::new(0, 0);
        let mut asn = 10u64;

        node.handle_beacon(&beacon(10, 1), 0xAA, &mut asn, &cfg, &mut rng);
        node.handle_beacon(&beacon(10, 1), 0xAA, &mut asn, &cfg, &mut rng);
        assert_eq!(node.state(), JoinState::Joining);
        node.join_request_sent(asn, &cfg);
        assert!(!node.join_tx_due());

        // Deadline passes with no response.
        let deadline = asn + cfg.join_response_slots;
        node.tick_tail(deadline + 1, &cfg, &mut events, &mut rng);
        assert_eq!(node.state(), JoinState::Joining);
        assert_eq!(node.backoff_n, 9);
        assert!(node.join_tx_due()); // StepRng(0) draws a zero backoff
    }

    #[test]
    fn bloom_miss_threshold_evicts() {
        let cfg = config();
        let mut events = EventQueue::new();
        let mut node = NodeAssoc::new(&Schedule::minuscule());
        let mut rng = StepRng::new(0, 0);
        let mut asn = 0u64;

        node.handle_beacon(&beacon(1, 1), 0xAA, &mut asn, &cfg, &mut rng);
        node.handle_beacon(&beacon(1, 1), 0xAA, &mut asn, &cfg, &mut rng);
        node.join_request_sent(asn, &cfg);
        node.handle_join_response(&response(false), asn, &mut rng, &mut events);
        assert_eq!(node.state(), JoinState::Connected);

        // Digest without our bits, three beacons in a row.
        let empty = [0u8; mari_frame::BLOOM_LEN];
        for round in 0..cfg.bloom_miss_threshold {
            let mut b = beacon(asn + 1 + round as u64, 1);
            b.bloom = Some(&empty);
            node.handle_beacon(&b, 0xAA, &mut asn, &cfg, &mut rng);
        }
        assert_eq!(node.state(), JoinState::Leaving(EventTag::PeerLostBloom));

        node.tick_tail(asn, &cfg, &mut events, &mut rng);
        assert_eq!(node.state(), JoinState::Scanning);

        let mut sink = RecordingSink::default();
        events.drain(&mut sink);
        assert!(sink.events.contains(&Event::Disconnected {
            tag: EventTag::PeerLostBloom
        }));
    }

    #[test]
    fn digest_hit_resets_miss_count() {
        let cfg = config();
        let mut events = EventQueue::new();
        let mut node = NodeAssoc::new(&Schedule::minuscule());
        let mut rng = StepRng::new(0, 0);
        let mut asn = 0u64;

        node.handle_beacon(&beacon(1, 1), 0xAA, &mut asn, &cfg, &mut rng);
        node.handle_beacon(&beacon(1, 1), 0xAA, &mut asn, &cfg, &mut rng);
        node.join_request_sent(asn, &cfg);
        node.handle_join_response(&response(false), asn, &mut rng, &mut events);

        let empty = [0u8; mari_frame::BLOOM_LEN];
        let mut present = BloomDigest::new();
        present.recompute([crate::bloom::hashes(0xAA)].into_iter());
        let mut image = [0u8; mari_frame::BLOOM_LEN];
        present.snapshot(&mut image).unwrap();

        for _ in 0..cfg.bloom_miss_threshold - 1 {
            let mut b = beacon(asn + 1, 1);
            b.bloom = Some(&empty);
            node.handle_beacon(&b, 0xAA, &mut asn, &cfg, &mut rng);
        }
        // One hit wipes the miss streak.
        let mut b = beacon(asn + 1, 1);
        b.bloom = Some(&image);
        node.handle_beacon(&b, 0xAA, &mut asn, &cfg, &mut rng);
        for _ in 0..cfg.bloom_miss_threshold - 1 {
            let mut b = beacon(asn + 1, 1);
            b.bloom = Some(&empty);
            node.handle_beacon(&b, 0xAA, &mut asn, &cfg, &mut rng);
        }
        assert_eq!(node.state(), JoinState::Connected);
    }

    #[test]
    fn out_of_sync_disconnects() {
        let cfg = config();
        let mut events = EventQueue::new();
        let mut node = NodeAssoc::new(&Schedule::minuscule());
        let mut rng = StepRng::new(0, 0);
        let mut asn = 0u64;

        node.handle_beacon(&beacon(1, 1), 0xAA, &mut asn, &cfg, &mut rng);
        node.handle_beacon(&beacon(1, 1), 0xAA, &mut asn, &cfg, &mut rng);
        node.join_request_sent(asn, &cfg);
        node.handle_join_response(&response(false), asn, &mut rng, &mut events);

        node.tick_tail(asn + cfg.out_of_sync_slots + 1, &cfg, &mut events, &mut rng);
        assert_eq!(node.state(), JoinState::Scanning);

        let mut sink = RecordingSink::default();
        events.drain(&mut sink);
        assert!(sink.events.contains(&Event::Disconnected {
            tag: EventTag::OutOfSync
        }));
    }

    #[test]
    fn keepalive_cadence() {
        let cfg = config();
        let mut events = EventQueue::new();
        let mut node = NodeAssoc::new(&Schedule::minuscule());
        let mut rng = StepRng::new(0, 0);
        let mut asn = 0u64;

        node.handle_beacon(&beacon(1, 1), 0xAA, &mut asn, &cfg, &mut rng);
        node.handle_beacon(&beacon(1, 1), 0xAA, &mut asn, &cfg, &mut rng);
        node.join_request_sent(asn, &cfg);
        node.handle_join_response(&response(false), asn, &mut rng, &mut events);

        assert!(!node.keepalive_due(asn + 1, &cfg));
        assert!(node.keepalive_due(asn + cfg.keepalive_period_slots, &cfg));
        node.uplink_sent(asn + cfg.keepalive_period_slots);
        assert!(!node.keepalive_due(asn + cfg.keepalive_period_slots + 1, &cfg));
    }

    #[test]
    fn gateway_admits_then_refuses_when_full() {
        let mut schedule = Schedule::minuscule();
        let mut bloom = BloomDigest::new();
        let mut events = EventQueue::new();
        let mut gw = GatewayAssoc::new();

        assert!(gw
            .handle_join_request(0xAA, 5, &mut schedule, &mut bloom, &mut events)
            .is_ok());
        assert!(bloom.is_dirty());
        assert_eq!(
            gw.take_response(),
            Some(StagedResponse {
                dst: 0xAA,
                full: false,
                cell: 4
            })
        );

        bloom.recompute(schedule.bloom_seeds());
        assert!(gw
            .handle_join_request(0xBB, 6, &mut schedule, &mut bloom, &mut events)
            .is_err());
        assert_eq!(
            gw.take_response(),
            Some(StagedResponse {
                dst: 0xBB,
                full: true,
                cell: 0
            })
        );
        // A refusal does not dirty the digest.
        assert!(!bloom.is_dirty());

        let mut sink = RecordingSink::default();
        events.drain(&mut sink);
        assert_eq!(sink.events, vec![Event::NodeJoined { node: 0xAA }]);
    }

    #[test]
    fn gateway_repeats_response_for_admitted_node() {
        let mut schedule = Schedule::minuscule();
        let mut bloom = BloomDigest::new();
        let mut events = EventQueue::new();
        let mut gw = GatewayAssoc::new();

        gw.handle_join_request(0xAA, 5, &mut schedule, &mut bloom, &mut events)
            .unwrap();
        gw.take_response();

        // Same node asks again: same cell, fresh response, no new event.
        gw.handle_join_request(0xAA, 9, &mut schedule, &mut bloom, &mut events)
            .unwrap();
        assert_eq!(schedule.lookup(0xAA), Some(4));
        assert_eq!(schedule.slot_at(4).last_heard_asn(), Some(9));
        assert_eq!(
            gw.take_response(),
            Some(StagedResponse {
                dst: 0xAA,
                full: false,
                cell: 4
            })
        );

        let mut sink = RecordingSink::default();
        events.drain(&mut sink);
        assert_eq!(sink.events.len(), 1);
    }

    #[test]
    fn silent_peer_released_after_timeout() {
        let cfg = config();
        let mut schedule = Schedule::minuscule();
        let mut bloom = BloomDigest::new();
        let mut events = EventQueue::new();
        let mut gw = GatewayAssoc::new();

        gw.handle_join_request(0xAA, 5, &mut schedule, &mut bloom, &mut events)
            .unwrap();
        bloom.recompute(schedule.bloom_seeds());

        let deadline = 5 + cfg.peer_lost_timeout_slots;
        // Probing the whole schedule before the deadline releases nothing.
        for asn in 6..=deadline {
            gw.tick_tail(asn, &cfg, &mut schedule, &mut bloom, &mut events);
        }
        assert_eq!(schedule.lookup(0xAA), Some(4));

        // One full probe round past the deadline catches the silence.
        for asn in deadline + 1..deadline + 1 + schedule.len() as u64 {
            gw.tick_tail(asn, &cfg, &mut schedule, &mut bloom, &mut events);
        }
        assert_eq!(schedule.lookup(0xAA), None);
        assert!(bloom.is_dirty());

        let mut sink = RecordingSink::default();
        events.drain(&mut sink);
        assert!(sink.events.contains(&Event::NodeLeft {
            node: 0xAA,
            tag: EventTag::PeerLostTimeout
        }));
    }

    #[test]
    fn uplink_refreshes_liveness() {
        let mut schedule = Schedule::minuscule();
        let mut bloom = BloomDigest::new();
        let mut events = EventQueue::new();
        let mut gw = GatewayAssoc::new();

        gw.handle_join_request(0xAA, 5, &mut schedule, &mut bloom, &mut events)
            .unwrap();
        assert!(gw.handle_uplink(0xAA, 40, &mut schedule).is_ok());
        assert_eq!(schedule.slot_at(4).last_heard_asn(), Some(40));
        // Traffic from a stranger does not.
        assert!(gw.handle_uplink(0xBB, 41, &mut schedule).is_err());
    }
}
