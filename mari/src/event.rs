//! Observable events and their fan-out to the single subscriber.
//!
//! Events are generated while a slot executes but are only delivered from
//! the slot tail, never from the radio interrupt. The payload handed to the
//! subscriber is valid only until the callback returns.

use heapless::{Deque, Vec};
use mari_frame::{HEADER_LEN, MAX_FRAME_LEN};

/// Largest application payload a data frame can carry.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADER_LEN;

/// Depth of the deferred event queue.
const EVENT_QUEUE_DEPTH: usize = 16;

/// Why a peer or the local link went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventTag {
    /// The node moved to another gateway.
    Handover,
    /// Too long without a beacon.
    OutOfSync,
    /// The gateway had no free uplink cell.
    GatewayFull,
    /// The peer went silent past the liveness deadline.
    PeerLostTimeout,
    /// The node's id disappeared from the membership digest.
    PeerLostBloom,
}

/// Runtime error kinds. Frame-level kinds are only counted, never delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    /// Version, type, length or checksum did not hold up.
    BadFrame,
    /// The frame belongs to another network.
    WrongNetwork,
    /// The frame is addressed to somebody else.
    NotForUs,
    /// No free uplink cell.
    ScheduleFull,
    /// An operation needed a synchronized timeline.
    NotSynchronized,
    /// Traffic from a node that is not admitted.
    PeerUnknown,
    /// The radio could not take the requested action this slot.
    RadioBusy,
    /// The membership digest has not been computed yet.
    BloomUnavailable,
}

/// A received application payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketData {
    /// Sender device id.
    pub src: u64,
    /// Destination device id.
    pub dst: u64,
    /// RSSI of the reception.
    pub rssi: i8,
    /// The payload bytes.
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

/// Everything the subscriber can observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A data frame arrived for us.
    NewPacket(PacketData),
    /// This node is admitted and owns an uplink cell.
    Connected {
        /// The gateway joined.
        gateway: u64,
    },
    /// This node left the network.
    Disconnected {
        /// Why.
        tag: EventTag,
    },
    /// The gateway admitted a node.
    NodeJoined {
        /// The admitted node.
        node: u64,
    },
    /// The gateway evicted a node.
    NodeLeft {
        /// The evicted node.
        node: u64,
        /// Why.
        tag: EventTag,
    },
    /// A liveness proof arrived from an admitted node.
    Keepalive {
        /// The proving node.
        node: u64,
    },
    /// A runtime error the subscriber may want to know about.
    Error {
        /// What went wrong.
        kind: ErrorKind,
    },
}

/// The single subscriber. Called from a deferred context at the slot tail.
pub trait EventSink {
    /// Receive one event. The borrow ends with the call.
    fn on_event(&mut self, event: &Event);
}

/// Deferred event queue, drained at the slot tail in generation order.
#[derive(Default)]
pub(crate) struct EventQueue {
    events: Deque<Event, EVENT_QUEUE_DEPTH>,
    overflowed: u32,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            events: Deque::new(),
            overflowed: 0,
        }
    }

    /// Queue an event for delivery. Overflow drops the newest and counts.
    pub fn push(&mut self, event: Event) {
        if self.events.push_back(event).is_err() {
            self.overflowed = self.overflowed.saturating_add(1);
        }
    }

    /// Take the oldest pending event.
    pub fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Deliver every pending event, oldest first.
    pub fn drain(&mut self, sink: &mut impl EventSink) {
        while let Some(event) = self.pop() {
            sink.on_event(&event);
        }
    }

    /// How many events were lost to a full queue.
    pub fn overflowed(&self) -> u32 {
        self.overflowed
    }
}
