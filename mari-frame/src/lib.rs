//! Read and write structures for handling Mari radio frames.
//!
//! Mari frames come in two header flavours. Beacons carry a timeline header
//! (ASN, capacity, schedule id and an optional membership digest), while all
//! other frames carry the addressed header (destination, source, RSSI
//! statistic). Both are packed little-endian and are read and written
//! byte-wise, never through struct layout.
//!
//! Each reader wraps a buffer and gives field-level access:
//! - [`PacketHeader`] for the addressed header shared by join, keepalive and
//!   data frames.
//! - [`Beacon`] for the beacon header.
//!
//! The [`FrameRepr`] family provides the high-level representation: `parse`
//! validates an incoming byte slice and borrows from it, `emit` fills a
//! caller-supplied buffer and returns the number of bytes written. Neither
//! allocates.
//!
//! ```
//! use mari_frame::{FrameRepr, KeepaliveRepr, PacketHeaderRepr};
//!
//! let repr = FrameRepr::Keepalive(KeepaliveRepr {
//!     header: PacketHeaderRepr {
//!         network_id: 1,
//!         dst: 0x0000_0000_0000_0001,
//!         src: 0x0000_0000_0000_00AA,
//!         rssi_stat: -40,
//!     },
//! });
//!
//! let mut buffer = [0u8; 255];
//! let len = repr.emit(&mut buffer).unwrap();
//! let parsed = FrameRepr::parse(&buffer[..len], 1).unwrap();
//! assert_eq!(parsed, repr);
//! ```
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

mod beacon;
pub use beacon::Beacon;

mod fcs;
pub use fcs::FrameWithFcs;

mod header;
pub use header::PacketHeader;

mod repr;
pub use repr::{
    BeaconRepr, DataRepr, FrameRepr, JoinRequestRepr, JoinResponseFlags, JoinResponseRepr,
    KeepaliveRepr, PacketHeaderRepr,
};

/// Protocol version carried in the first byte of every frame.
pub const PROTOCOL_VERSION: u8 = 2;

/// Network id wildcard, accepted during scan.
pub const NETWORK_ID_ANY: u16 = 0;

/// Length of the addressed header shared by all non-beacon frames.
pub const HEADER_LEN: usize = 21;

/// Length of a beacon without the membership digest.
pub const BEACON_LEN: usize = 22;

/// Length of the bloom membership digest carried in beacons.
pub const BLOOM_LEN: usize = 128;

/// Tag byte prefixing an opaque security handshake blob in a join request.
pub const SECURITY_TAG: u8 = 0xF5;

/// The largest frame the radio will carry (BLE 2M payload).
pub const MAX_FRAME_LEN: usize = 255;

/// The type of a Mari frame, one bit per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Gateway timeline announcement.
    Beacon,
    /// Slot request from a node, sent in a shared uplink cell.
    JoinRequest,
    /// Gateway answer to a join request.
    JoinResponse,
    /// Empty uplink proving liveness.
    Keepalive,
    /// Application payload.
    Data,
    /// Unknown frame type.
    Unknown,
}

impl From<u8> for FrameType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Beacon,
            2 => Self::JoinRequest,
            4 => Self::JoinResponse,
            8 => Self::Keepalive,
            16 => Self::Data,
            _ => Self::Unknown,
        }
    }
}

impl From<FrameType> for u8 {
    fn from(value: FrameType) -> Self {
        match value {
            FrameType::Beacon => 1,
            FrameType::JoinRequest => 2,
            FrameType::JoinResponse => 4,
            FrameType::Keepalive => 8,
            FrameType::Data => 16,
            FrameType::Unknown => 0,
        }
    }
}

/// An error that can occur when reading or writing a Mari frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The version byte does not match [`PROTOCOL_VERSION`].
    Version,
    /// The type byte does not name a known frame kind, or a payload carries
    /// an unknown tag.
    Type,
    /// The buffer length is inconsistent with the declared frame type.
    Length,
    /// The frame belongs to another network.
    Network,
    /// The frame check sequence does not match.
    Fcs,
}

/// A type alias for `Result<T, mari_frame::Error>`.
pub type Result<T> = core::result::Result<T, Error>;
