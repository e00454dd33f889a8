//! The slot runtime: ASN bookkeeping, per-slot radio dispatch, receive
//! demultiplexing and the deferred slot-tail work.
//!
//! The runtime is ticked once per slot by the board's high-frequency timer.
//! A tick advances the ASN, asks the scheduler what to do with the radio,
//! does it, and hands every received frame to the association machines or
//! the event fan-out. Anything that mutates shared state beyond flag setting
//! runs at the slot tail, inside the `end_guard` window; nothing unbounded
//! happens inside a slot.

use heapless::{Deque, Vec};
use rand_core::RngCore;

use crate::association::{GatewayAssoc, JoinOutcome, JoinState, NodeAssoc};
use crate::bloom::BloomDigest;
use crate::config::{MariConfig, NodeType};
use crate::event::{ErrorKind, Event, EventQueue, EventSink, PacketData, MAX_PAYLOAD_LEN};
use crate::ipc::{self, HostFrame, IpcError, HOST_FRAME_MAX};
use crate::phy::Radio;
use crate::queue::{FrameBuffer, TxQueue};
use crate::schedule::{CellType, Schedule, ScheduleError};
use crate::scheduler::{HoppingSequence, LinkFlags, Scheduler, SlotAction, SlotInfo};
use crate::time::Instant;

use mari_frame::{
    BeaconRepr, DataRepr, FrameRepr, JoinRequestRepr, JoinResponseFlags, JoinResponseRepr,
    KeepaliveRepr, PacketHeaderRepr, BLOOM_LEN, MAX_FRAME_LEN,
};

/// Largest security handshake blob a join request will carry.
pub const SECURITY_BLOB_MAX: usize = 128;

/// Depth of the outbound host stream queue.
pub const HOST_QUEUE_DEPTH: usize = 8;

/// Errors surfaced by the public queueing API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacError {
    /// The transmit queue is full.
    QueueFull,
    /// The payload does not fit a single frame.
    PayloadTooLong,
    /// A node can only transmit data once it owns an uplink cell.
    NotConnected,
    /// The host boundary rejected a frame.
    Host(IpcError),
}

/// Dropped-frame and error counters. Frame-level failures never reach the
/// subscriber; they only show up here.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MacStats {
    pub bad_frame: u32,
    pub wrong_network: u32,
    pub not_for_us: u32,
    pub schedule_full: u32,
    pub not_synchronized: u32,
    pub peer_unknown: u32,
    pub radio_busy: u32,
    pub bloom_unavailable: u32,
}

impl MacStats {
    pub(crate) fn record(&mut self, kind: ErrorKind) {
        let counter = match kind {
            ErrorKind::BadFrame => &mut self.bad_frame,
            ErrorKind::WrongNetwork => &mut self.wrong_network,
            ErrorKind::NotForUs => &mut self.not_for_us,
            ErrorKind::ScheduleFull => &mut self.schedule_full,
            ErrorKind::NotSynchronized => &mut self.not_synchronized,
            ErrorKind::PeerUnknown => &mut self.peer_unknown,
            ErrorKind::RadioBusy => &mut self.radio_busy,
            ErrorKind::BloomUnavailable => &mut self.bloom_unavailable,
        };
        *counter = counter.saturating_add(1);
    }
}

enum Role {
    Gateway(GatewayAssoc),
    Node(NodeAssoc),
}

/// The radio-layer runtime context. One per device; everything the protocol
/// mutates lives in here and is threaded through the tick.
pub struct Mac<R: Radio, RNG: RngCore, S: EventSink> {
    config: MariConfig,
    radio: R,
    rng: RNG,
    sink: S,

    scheduler: Scheduler,
    bloom: BloomDigest,
    role: Role,
    tx_queue: TxQueue,
    events: EventQueue,
    host_queue: Deque<Vec<u8, HOST_FRAME_MAX>, HOST_QUEUE_DEPTH>,
    stats: MacStats,

    asn: u64,
    device_id: u64,
    last_rx_rssi: i8,
    security_blob: Option<Vec<u8, SECURITY_BLOB_MAX>>,
    slot_start: Instant,
}

impl<R, RNG, S> Mac<R, RNG, S>
where
    R: Radio,
    RNG: RngCore,
    S: EventSink,
{
    /// Set up the runtime around a validated schedule. The schedule's shape
    /// is fixed from here on; only assignments change.
    pub fn new(config: MariConfig, schedule: Schedule, radio: R, rng: RNG, sink: S) -> Self {
        let device_id = radio.device_id();
        let role = match config.node_type {
            NodeType::Gateway => Role::Gateway(GatewayAssoc::new()),
            NodeType::Node => Role::Node(NodeAssoc::new(&schedule)),
        };

        debug!(
            "mac init: device {} schedule {} ({} cells)",
            device_id,
            schedule.id(),
            schedule.len()
        );

        let scheduler = Scheduler::new(
            schedule,
            HoppingSequence::default(),
            config.fixed_channel,
            config.fixed_scan_channel,
        );

        let mut mac = Self {
            config,
            radio,
            rng,
            sink,
            scheduler,
            bloom: BloomDigest::new(),
            role,
            tx_queue: TxQueue::new(),
            events: EventQueue::new(),
            host_queue: Deque::new(),
            stats: MacStats::default(),
            asn: 0,
            device_id,
            last_rx_rssi: 0,
            security_blob: None,
            slot_start: Instant::from_us(0),
        };

        // A gateway announces itself to its host core right away.
        if matches!(mac.role, Role::Gateway(_)) {
            mac.enqueue_gateway_info();
        }

        mac
    }

    /// The local 64-bit device id.
    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    /// The current absolute slot number.
    pub fn asn(&self) -> u64 {
        self.asn
    }

    /// Start of the current slot, as reported by the timer. The board
    /// integration keys the intra-slot sub-timers off this.
    pub fn slot_start(&self) -> Instant {
        self.slot_start
    }

    /// The schedule being run.
    pub fn schedule(&self) -> &Schedule {
        self.scheduler.schedule()
    }

    /// Dropped-frame and error counters.
    pub fn stats(&self) -> &MacStats {
        &self.stats
    }

    /// How many events were lost to a full delivery queue.
    pub fn events_dropped(&self) -> u32 {
        self.events.overflowed()
    }

    /// Node-side join progress; `None` on a gateway.
    pub fn node_state(&self) -> Option<JoinState> {
        match &self.role {
            Role::Node(node) => Some(node.state()),
            Role::Gateway(_) => None,
        }
    }

    /// Whether this node owns an uplink cell.
    pub fn is_connected(&self) -> bool {
        match &self.role {
            Role::Node(node) => node.is_connected(),
            Role::Gateway(_) => true,
        }
    }

    /// Attach an opaque security handshake blob to outgoing join requests.
    pub fn set_security_blob(&mut self, blob: &[u8]) -> Result<(), MacError> {
        self.security_blob =
            Some(Vec::from_slice(blob).map_err(|()| MacError::PayloadTooLong)?);
        Ok(())
    }

    /// Queue an application payload for the next transmit opportunity.
    pub fn send(&mut self, dst: u64, payload: &[u8]) -> Result<(), MacError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(MacError::PayloadTooLong);
        }
        if let Role::Node(node) = &self.role {
            if !node.is_connected() {
                self.stats.record(ErrorKind::NotSynchronized);
                return Err(MacError::NotConnected);
            }
        }

        let header = PacketHeaderRepr {
            network_id: self.current_network_id(),
            dst,
            src: self.device_id,
            rssi_stat: self.last_rx_rssi,
        };
        let repr = FrameRepr::Data(DataRepr { header, payload });

        let mut frame = FrameBuffer::new();
        let len = repr
            .emit(frame.as_mut())
            .map_err(|_| MacError::PayloadTooLong)?;
        frame.set_len(len);
        self.tx_queue.push(frame).map_err(|_| MacError::QueueFull)
    }

    /// Take the next frame bound for the host core. The mailbox or UART
    /// transport forwards these verbatim. Only a gateway produces them.
    pub fn pop_host_frame(&mut self) -> Option<Vec<u8, HOST_FRAME_MAX>> {
        self.host_queue.pop_front()
    }

    /// Queue another identity announcement for the host; one is also queued
    /// at boot. Gateway only.
    pub fn request_gateway_info(&mut self) {
        if matches!(self.role, Role::Gateway(_)) {
            self.enqueue_gateway_info();
        }
    }

    /// Accept a frame arriving from the host core. Only data frames may
    /// come down; they are queued for the next downlink cell. Anything else
    /// is an error to report back.
    pub fn host_inbound(&mut self, bytes: &[u8]) -> Result<(), MacError> {
        match HostFrame::parse_inbound(bytes).map_err(MacError::Host)? {
            HostFrame::Data { frame } => {
                let frame = FrameBuffer::from_slice(frame).ok_or(MacError::PayloadTooLong)?;
                self.tx_queue.push(frame).map_err(|_| MacError::QueueFull)
            }
            _ => Err(MacError::Host(IpcError::UnexpectedType(bytes[0]))),
        }
    }

    fn enqueue_gateway_info(&mut self) {
        let frame = HostFrame::GatewayInfo {
            device_id: self.device_id,
            network_id: self.config.network_id,
            schedule_id: self.scheduler.schedule().id(),
        };
        if let Some(bytes) = ipc::encode(&frame) {
            let _ = self.host_queue.push_back(bytes);
        }
    }

    /// Administratively evict a node (gateway only). The node notices via
    /// the membership digest.
    pub fn evict(&mut self, node: u64) -> Result<(), ScheduleError> {
        let Self {
            role,
            scheduler,
            bloom,
            events,
            ..
        } = self;
        match role {
            Role::Gateway(gw) => gw.evict(node, scheduler.schedule_mut(), bloom, events),
            Role::Node(_) => Err(ScheduleError::NotPresent),
        }
    }

    /// Open one slot: advance the ASN and arm the radio action. Called at
    /// every slot boundary by the timer. The matching [`Mac::end_slot`] runs
    /// in the slot's `end_guard` window.
    pub fn tick(&mut self, now: Instant) {
        self.asn = self.asn.wrapping_add(1);
        self.slot_start = now;

        let flags = self.link_flags();
        let info =
            self.scheduler
                .slot_info(self.asn, self.config.node_type, self.device_id, &flags);

        trace!(
            "slot {}: {:?} ch {}",
            self.asn,
            info.action,
            info.channel
        );

        match info.action {
            SlotAction::Sleep => self.radio.disable(),
            SlotAction::Rx => {
                self.radio.set_channel(info.channel);
                self.radio.receive();
            }
            SlotAction::Tx => {
                self.radio.set_channel(info.channel);
                self.transmit_slot(&info);
            }
        }

        // Cadence bookkeeping for the cells that just went by.
        if let Role::Node(node) = &mut self.role {
            if node.is_synchronized() {
                match info.cell_type {
                    CellType::Beacon => node.beacon_cell_elapsed(),
                    CellType::SharedUplink if info.action != SlotAction::Tx => {
                        node.shared_cell_elapsed();
                    }
                    _ => {}
                }
            }
        }
    }

    /// Close the slot: demultiplex what the radio buffered while armed, run
    /// the association timeouts, rebuild the digest if it went dirty and
    /// deliver pending events. Radio frames are dropped after this; nothing
    /// produced inside a slot outlives it.
    pub fn end_slot(&mut self) {
        self.drain_rx();
        self.slot_tail();
    }

    fn current_network_id(&self) -> u16 {
        match &self.role {
            Role::Node(node) if node.is_synchronized() => node.network_id(),
            _ => self.config.network_id,
        }
    }

    fn link_flags(&self) -> LinkFlags {
        match &self.role {
            Role::Gateway(gw) => LinkFlags {
                synchronized: true,
                downlink_pending: gw.has_staged_response() || !self.tx_queue.is_empty(),
                ..Default::default()
            },
            Role::Node(node) => LinkFlags {
                synchronized: node.is_synchronized(),
                join_tx_due: node.join_tx_due(),
                beacon_listen_due: node.beacon_listen_due(&self.config),
                uplink_due: node.is_connected()
                    && (!self.tx_queue.is_empty()
                        || node.keepalive_due(self.asn, &self.config)),
                downlink_pending: false,
            },
        }
    }

    /// Build and send whatever this transmit slot is for.
    fn transmit_slot(&mut self, info: &SlotInfo) {
        let mut buffer = [0u8; MAX_FRAME_LEN];
        let Self {
            role,
            radio,
            scheduler,
            bloom,
            events,
            stats,
            config,
            tx_queue,
            asn,
            device_id,
            last_rx_rssi,
            security_blob,
            ..
        } = self;

        match (role, info.cell_type) {
            (Role::Gateway(gw), CellType::Beacon | CellType::Downlink) => {
                // A staged join response preempts the beacon: the joining
                // node listens on every beacon cell until it is answered.
                if let Some(response) = gw.take_response() {
                    let repr = FrameRepr::JoinResponse(JoinResponseRepr {
                        header: PacketHeaderRepr {
                            network_id: config.network_id,
                            dst: response.dst,
                            src: *device_id,
                            rssi_stat: *last_rx_rssi,
                        },
                        flags: if response.full {
                            JoinResponseFlags::GATEWAY_FULL
                        } else {
                            JoinResponseFlags::empty()
                        },
                        cell_index: response.cell,
                    });
                    if let Ok(len) = repr.emit(&mut buffer) {
                        radio.transmit(&buffer[..len]);
                    }
                } else if info.cell_type == CellType::Beacon {
                    let schedule = scheduler.schedule();
                    let mut digest = [0u8; BLOOM_LEN];
                    let bloom_image = match bloom.snapshot(&mut digest) {
                        Some(_) => Some(&digest[..]),
                        None => {
                            if schedule.assigned_count() > 0 {
                                stats.record(ErrorKind::BloomUnavailable);
                            }
                            None
                        }
                    };
                    let repr = FrameRepr::Beacon(BeaconRepr {
                        network_id: config.network_id,
                        asn: *asn,
                        src: *device_id,
                        remaining_capacity: schedule.remaining_capacity(),
                        active_schedule_id: schedule.id(),
                        bloom: bloom_image,
                    });
                    if let Ok(len) = repr.emit(&mut buffer) {
                        radio.transmit(&buffer[..len]);
                    }
                } else if let Some(frame) = tx_queue.pop() {
                    radio.transmit(frame.as_slice());
                } else {
                    radio.disable();
                    events.push(Event::Error {
                        kind: ErrorKind::RadioBusy,
                    });
                }
            }
            (Role::Node(node), CellType::SharedUplink) => {
                let repr = FrameRepr::JoinRequest(JoinRequestRepr {
                    header: PacketHeaderRepr {
                        network_id: node.network_id(),
                        dst: node.gateway(),
                        src: *device_id,
                        rssi_stat: *last_rx_rssi,
                    },
                    security: security_blob.as_ref().map(|blob| blob.as_slice()),
                });
                if let Ok(len) = repr.emit(&mut buffer) {
                    radio.transmit(&buffer[..len]);
                    node.join_request_sent(*asn, config);
                    debug!("join request sent at asn {}", *asn);
                }
            }
            (Role::Node(node), CellType::Uplink) => {
                if let Some(frame) = tx_queue.pop() {
                    radio.transmit(frame.as_slice());
                } else {
                    let repr = FrameRepr::Keepalive(KeepaliveRepr {
                        header: PacketHeaderRepr {
                            network_id: node.network_id(),
                            dst: node.gateway(),
                            src: *device_id,
                            rssi_stat: *last_rx_rssi,
                        },
                    });
                    if let Ok(len) = repr.emit(&mut buffer) {
                        radio.transmit(&buffer[..len]);
                    }
                }
                node.uplink_sent(*asn);
            }
            _ => {
                // The demand flags and the cell disagree; recover cleanly.
                radio.disable();
                events.push(Event::Error {
                    kind: ErrorKind::RadioBusy,
                });
            }
        }
    }

    /// Drain frames buffered by the radio while the receiver was armed, in
    /// arrival order. The radio's borrow ends inside the closure, so each
    /// frame is copied out before parsing.
    fn drain_rx(&mut self) {
        loop {
            let mut frame = FrameBuffer::new();
            let mut rssi = 0i8;
            let received = self.radio.poll_received(|bytes, r| {
                if let Some(copy) = FrameBuffer::from_slice(bytes) {
                    frame = copy;
                    rssi = r;
                }
            });
            if !received {
                break;
            }
            if frame.is_empty() {
                self.stats.record(ErrorKind::BadFrame);
                continue;
            }
            self.handle_frame(&frame, rssi);
        }
    }

    fn handle_frame(&mut self, frame: &FrameBuffer, rssi: i8) {
        let filter = match &self.role {
            Role::Node(node) if node.is_synchronized() => node.network_id(),
            _ => self.config.network_id,
        };

        let repr = match FrameRepr::parse(frame.as_slice(), filter) {
            Ok(repr) => repr,
            Err(mari_frame::Error::Network) => {
                self.stats.record(ErrorKind::WrongNetwork);
                return;
            }
            Err(_) => {
                self.stats.record(ErrorKind::BadFrame);
                return;
            }
        };

        self.last_rx_rssi = rssi;

        let Self {
            role,
            scheduler,
            bloom,
            events,
            stats,
            config,
            rng,
            asn,
            device_id,
            ..
        } = self;

        match (role, repr) {
            (Role::Node(node), FrameRepr::Beacon(beacon)) => {
                node.handle_beacon(&beacon, *device_id, asn, config, rng);
            }
            (Role::Gateway(gw), FrameRepr::JoinRequest(request)) => {
                if request.header.dst != *device_id {
                    stats.record(ErrorKind::NotForUs);
                } else if gw
                    .handle_join_request(
                        request.header.src,
                        *asn,
                        scheduler.schedule_mut(),
                        bloom,
                        events,
                    )
                    .is_err()
                {
                    stats.record(ErrorKind::ScheduleFull);
                }
            }
            (Role::Gateway(gw), FrameRepr::Keepalive(keepalive)) => {
                if keepalive.header.dst != *device_id {
                    stats.record(ErrorKind::NotForUs);
                } else if gw
                    .handle_uplink(keepalive.header.src, *asn, scheduler.schedule_mut())
                    .is_ok()
                {
                    events.push(Event::Keepalive {
                        node: keepalive.header.src,
                    });
                } else {
                    stats.record(ErrorKind::PeerUnknown);
                }
            }
            (Role::Gateway(gw), FrameRepr::Data(data)) => {
                if data.header.dst != *device_id {
                    stats.record(ErrorKind::NotForUs);
                } else if gw
                    .handle_uplink(data.header.src, *asn, scheduler.schedule_mut())
                    .is_ok()
                {
                    push_packet(events, stats, &data, rssi);
                } else {
                    stats.record(ErrorKind::PeerUnknown);
                }
            }
            (Role::Node(node), FrameRepr::JoinResponse(response)) => {
                if response.header.dst != *device_id {
                    stats.record(ErrorKind::NotForUs);
                } else {
                    match node.handle_join_response(&response, *asn, rng, events) {
                        JoinOutcome::Connected => {
                            // Claim the granted cell so the scheduler lets
                            // us transmit in it.
                            if scheduler
                                .schedule_mut()
                                .assign_cell(response.cell_index as usize, *device_id, *asn)
                                .is_err()
                            {
                                stats.record(ErrorKind::BadFrame);
                            }
                        }
                        JoinOutcome::Refused => stats.record(ErrorKind::ScheduleFull),
                        JoinOutcome::Ignored => {}
                    }
                }
            }
            (Role::Node(_), FrameRepr::Data(data)) => {
                if data.header.dst != *device_id {
                    stats.record(ErrorKind::NotForUs);
                } else {
                    push_packet(events, stats, &data, rssi);
                }
            }
            // A frame kind this side never consumes.
            _ => stats.record(ErrorKind::NotForUs),
        }
    }

    /// Deferred work inside the `end_guard` window: association timeouts,
    /// the digest rebuild, and event delivery.
    fn slot_tail(&mut self) {
        let Self {
            role,
            scheduler,
            bloom,
            events,
            host_queue,
            config,
            rng,
            sink,
            asn,
            device_id,
            ..
        } = self;

        match role {
            Role::Gateway(gw) => {
                gw.tick_tail(*asn, config, scheduler.schedule_mut(), bloom, events);
                if bloom.is_dirty() {
                    bloom.recompute(scheduler.schedule().bloom_seeds());
                }
                // Deliver, mirroring observable traffic onto the host
                // stream as it goes out.
                while let Some(event) = events.pop() {
                    if let Some(frame) = ipc::host_frame_for_event(&event, config.network_id) {
                        if host_queue.push_back(frame).is_err() {
                            debug!("host queue full, dropping a host frame");
                        }
                    }
                    sink.on_event(&event);
                }
            }
            Role::Node(node) => {
                node.tick_tail(*asn, config, events, rng);
                if node.state() == JoinState::Scanning {
                    // Any cell we claimed belongs to a timeline we no
                    // longer follow.
                    let _ = scheduler.schedule_mut().release(*device_id);
                }
                events.drain(sink);
            }
        }
    }
}

fn push_packet(
    events: &mut EventQueue,
    stats: &mut MacStats,
    data: &DataRepr<'_>,
    rssi: i8,
) {
    match Vec::from_slice(data.payload) {
        Ok(payload) => events.push(Event::NewPacket(PacketData {
            src: data.header.src,
            dst: data.header.dst,
            rssi,
            payload,
        })),
        Err(()) => stats.record(ErrorKind::BadFrame),
    }
}
