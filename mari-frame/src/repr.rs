//! High-level representation of Mari frames.
//!
//! `parse` borrows from the incoming buffer, `emit` fills a caller-supplied
//! buffer byte-wise and returns the number of bytes written.

use bitflags::bitflags;

use crate::{
    Beacon, Error, FrameType, PacketHeader, Result, BEACON_LEN, BLOOM_LEN, HEADER_LEN,
    NETWORK_ID_ANY, PROTOCOL_VERSION, SECURITY_TAG,
};

/// The addressed header common to join, keepalive and data frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeaderRepr {
    /// Network this frame belongs to.
    pub network_id: u16,
    /// Destination device id.
    pub dst: u64,
    /// Source device id.
    pub src: u64,
    /// RSSI statistic reported by the sender.
    pub rssi_stat: i8,
}

impl PacketHeaderRepr {
    fn parse(header: &PacketHeader<&[u8]>) -> Self {
        Self {
            network_id: header.network_id(),
            dst: header.dst(),
            src: header.src(),
            rssi_stat: header.rssi_stat(),
        }
    }

    fn emit(&self, frame_type: FrameType, buffer: &mut [u8]) {
        let mut header = PacketHeader::new_unchecked(buffer);
        header.set_version(PROTOCOL_VERSION);
        header.set_frame_type(frame_type);
        header.set_network_id(self.network_id);
        header.set_dst(self.dst);
        header.set_src(self.src);
        header.set_rssi_stat(self.rssi_stat);
    }
}

/// A high-level representation of a Mari beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconRepr<'p> {
    /// Network the gateway runs.
    pub network_id: u16,
    /// The gateway's absolute slot number at transmission time.
    pub asn: u64,
    /// Gateway device id.
    pub src: u64,
    /// Number of uplink cells still free.
    pub remaining_capacity: u8,
    /// Id of the active schedule.
    pub active_schedule_id: u8,
    /// Membership digest, when available. Must be [`BLOOM_LEN`] bytes.
    pub bloom: Option<&'p [u8]>,
}

/// A high-level representation of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinRequestRepr<'p> {
    /// The addressed header.
    pub header: PacketHeaderRepr,
    /// Opaque security handshake blob, carried behind [`SECURITY_TAG`].
    pub security: Option<&'p [u8]>,
}

bitflags! {
    /// Flags carried in the join response payload byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct JoinResponseFlags: u8 {
        /// The gateway has no free uplink cell; the request was not admitted.
        const GATEWAY_FULL = 0b0000_0001;
    }
}

/// A high-level representation of a join response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinResponseRepr {
    /// The addressed header.
    pub header: PacketHeaderRepr,
    /// Response flags.
    pub flags: JoinResponseFlags,
    /// Index of the granted uplink cell. Meaningless when the response is
    /// marked full.
    pub cell_index: u8,
}

/// A high-level representation of a keepalive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveRepr {
    /// The addressed header.
    pub header: PacketHeaderRepr,
}

/// A high-level representation of a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRepr<'p> {
    /// The addressed header.
    pub header: PacketHeaderRepr,
    /// Application payload.
    pub payload: &'p [u8],
}

/// A high-level representation of any Mari frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRepr<'p> {
    /// A beacon frame.
    Beacon(BeaconRepr<'p>),
    /// A join request frame.
    JoinRequest(JoinRequestRepr<'p>),
    /// A join response frame.
    JoinResponse(JoinResponseRepr),
    /// A keepalive frame.
    Keepalive(KeepaliveRepr),
    /// A data frame.
    Data(DataRepr<'p>),
}

impl<'p> FrameRepr<'p> {
    /// Parse a Mari frame.
    ///
    /// `network_id` is the local network filter; pass [`NETWORK_ID_ANY`]
    /// while scanning to accept beacons from any network.
    pub fn parse(buffer: &'p [u8], network_id: u16) -> Result<Self> {
        if buffer.len() < 2 {
            return Err(Error::Length);
        }

        if buffer[0] != PROTOCOL_VERSION {
            return Err(Error::Version);
        }

        let repr = match FrameType::from(buffer[1]) {
            FrameType::Beacon => {
                let beacon = Beacon::new(buffer)?;
                Self::Beacon(BeaconRepr {
                    network_id: beacon.network_id(),
                    asn: beacon.asn(),
                    src: beacon.src(),
                    remaining_capacity: beacon.remaining_capacity(),
                    active_schedule_id: beacon.active_schedule_id(),
                    bloom: beacon.bloom(),
                })
            }
            FrameType::JoinRequest => {
                let header = PacketHeader::new(buffer)?;
                let security = match header.payload() {
                    [] => None,
                    [SECURITY_TAG, blob @ ..] => Some(blob),
                    _ => return Err(Error::Type),
                };
                Self::JoinRequest(JoinRequestRepr {
                    header: PacketHeaderRepr::parse(&header),
                    security,
                })
            }
            FrameType::JoinResponse => {
                let header = PacketHeader::new(buffer)?;
                let &[flags, cell_index] = header.payload() else {
                    return Err(Error::Length);
                };
                Self::JoinResponse(JoinResponseRepr {
                    header: PacketHeaderRepr::parse(&header),
                    flags: JoinResponseFlags::from_bits_truncate(flags),
                    cell_index,
                })
            }
            FrameType::Keepalive => {
                let header = PacketHeader::new(buffer)?;
                if !header.payload().is_empty() {
                    return Err(Error::Length);
                }
                Self::Keepalive(KeepaliveRepr {
                    header: PacketHeaderRepr::parse(&header),
                })
            }
            FrameType::Data => {
                let header = PacketHeader::new(buffer)?;
                Self::Data(DataRepr {
                    header: PacketHeaderRepr::parse(&header),
                    payload: header.payload(),
                })
            }
            FrameType::Unknown => return Err(Error::Type),
        };

        if network_id != NETWORK_ID_ANY && repr.network_id() != network_id {
            return Err(Error::Network);
        }

        Ok(repr)
    }

    /// Return the frame type of this representation.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Beacon(_) => FrameType::Beacon,
            Self::JoinRequest(_) => FrameType::JoinRequest,
            Self::JoinResponse(_) => FrameType::JoinResponse,
            Self::Keepalive(_) => FrameType::Keepalive,
            Self::Data(_) => FrameType::Data,
        }
    }

    /// Return the network id carried by the frame.
    pub fn network_id(&self) -> u16 {
        match self {
            Self::Beacon(beacon) => beacon.network_id,
            Self::JoinRequest(req) => req.header.network_id,
            Self::JoinResponse(resp) => resp.header.network_id,
            Self::Keepalive(ka) => ka.header.network_id,
            Self::Data(data) => data.header.network_id,
        }
    }

    /// Return the source device id of the frame.
    pub fn src(&self) -> u64 {
        match self {
            Self::Beacon(beacon) => beacon.src,
            Self::JoinRequest(req) => req.header.src,
            Self::JoinResponse(resp) => resp.header.src,
            Self::Keepalive(ka) => ka.header.src,
            Self::Data(data) => data.header.src,
        }
    }

    /// Return the length of the frame when emitted into a buffer.
    pub fn buffer_len(&self) -> usize {
        match self {
            Self::Beacon(beacon) => {
                BEACON_LEN + beacon.bloom.map_or(0, |_| BLOOM_LEN)
            }
            Self::JoinRequest(req) => {
                HEADER_LEN + req.security.map_or(0, |blob| 1 + blob.len())
            }
            Self::JoinResponse(_) => HEADER_LEN + 2,
            Self::Keepalive(_) => HEADER_LEN,
            Self::Data(data) => HEADER_LEN + data.payload.len(),
        }
    }

    /// Emit the frame into a buffer and return the number of bytes written.
    pub fn emit(&self, buffer: &mut [u8]) -> Result<usize> {
        let len = self.buffer_len();
        if buffer.len() < len {
            return Err(Error::Length);
        }

        match self {
            Self::Beacon(repr) => {
                if let Some(bloom) = repr.bloom {
                    if bloom.len() != BLOOM_LEN {
                        return Err(Error::Length);
                    }
                }
                let mut beacon = Beacon::new_unchecked(&mut buffer[..len]);
                beacon.set_version(PROTOCOL_VERSION);
                beacon.set_frame_type(FrameType::Beacon);
                beacon.set_network_id(repr.network_id);
                beacon.set_asn(repr.asn);
                beacon.set_src(repr.src);
                beacon.set_remaining_capacity(repr.remaining_capacity);
                beacon.set_active_schedule_id(repr.active_schedule_id);
                if let Some(bloom) = repr.bloom {
                    let mut digest = [0u8; BLOOM_LEN];
                    digest.copy_from_slice(bloom);
                    beacon.set_bloom(&digest);
                }
            }
            Self::JoinRequest(repr) => {
                repr.header.emit(FrameType::JoinRequest, buffer);
                if let Some(blob) = repr.security {
                    buffer[HEADER_LEN] = SECURITY_TAG;
                    buffer[HEADER_LEN + 1..len].copy_from_slice(blob);
                }
            }
            Self::JoinResponse(repr) => {
                repr.header.emit(FrameType::JoinResponse, buffer);
                buffer[HEADER_LEN] = repr.flags.bits();
                buffer[HEADER_LEN + 1] = repr.cell_index;
            }
            Self::Keepalive(repr) => {
                repr.header.emit(FrameType::Keepalive, buffer);
            }
            Self::Data(repr) => {
                repr.header.emit(FrameType::Data, buffer);
                buffer[HEADER_LEN..len].copy_from_slice(repr.payload);
            }
        }

        Ok(len)
    }
}
