//! Gateway-to-host frame codec.
//!
//! On a gateway the radio core forwards protocol events to the host core
//! over a framed byte stream with a one-byte type prefix. The transport
//! itself (mailbox, UART) lives outside this crate; the runtime queues
//! outbound frames for it (see [`crate::mac::Mac::pop_host_frame`]) and
//! this module encodes and decodes the frames crossing it.

use heapless::Vec;

use crate::event::Event;
use mari_frame::{DataRepr, FrameRepr, PacketHeaderRepr, MAX_FRAME_LEN};

/// Largest encoded host frame: a type byte plus a full radio frame.
pub const HOST_FRAME_MAX: usize = 1 + MAX_FRAME_LEN;

/// Host stream frame types.
mod frame_type {
    pub const NODE_JOINED: u8 = 1;
    pub const NODE_LEFT: u8 = 2;
    pub const DATA: u8 = 3;
    pub const KEEPALIVE: u8 = 4;
    pub const GATEWAY_INFO: u8 = 5;
}

/// Errors from the host stream codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IpcError {
    /// The buffer is too short for the frame.
    Length,
    /// The host sent a frame type it is not allowed to send.
    UnexpectedType(u8),
}

/// A frame crossing the host boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFrame<'p> {
    /// A node was admitted.
    NodeJoined {
        /// The admitted node.
        node: u64,
    },
    /// A node was evicted or left.
    NodeLeft {
        /// The departed node.
        node: u64,
    },
    /// An application frame, forwarded verbatim.
    Data {
        /// The radio frame bytes.
        frame: &'p [u8],
    },
    /// A liveness proof from a node.
    Keepalive {
        /// The proving node.
        node: u64,
    },
    /// Identity of this gateway, sent at boot and on request.
    GatewayInfo {
        /// The gateway device id.
        device_id: u64,
        /// The network it runs.
        network_id: u16,
        /// The schedule it runs.
        schedule_id: u8,
    },
}

impl<'p> HostFrame<'p> {
    /// Return the length of the frame when emitted into a buffer.
    pub fn buffer_len(&self) -> usize {
        1 + match self {
            Self::NodeJoined { .. } | Self::NodeLeft { .. } | Self::Keepalive { .. } => 8,
            Self::Data { frame } => frame.len(),
            Self::GatewayInfo { .. } => 11,
        }
    }

    /// Emit the frame and return the number of bytes written.
    pub fn emit(&self, buffer: &mut [u8]) -> Result<usize, IpcError> {
        let len = self.buffer_len();
        if buffer.len() < len {
            return Err(IpcError::Length);
        }

        match self {
            Self::NodeJoined { node } => {
                buffer[0] = frame_type::NODE_JOINED;
                buffer[1..9].copy_from_slice(&node.to_le_bytes());
            }
            Self::NodeLeft { node } => {
                buffer[0] = frame_type::NODE_LEFT;
                buffer[1..9].copy_from_slice(&node.to_le_bytes());
            }
            Self::Data { frame } => {
                buffer[0] = frame_type::DATA;
                buffer[1..len].copy_from_slice(frame);
            }
            Self::Keepalive { node } => {
                buffer[0] = frame_type::KEEPALIVE;
                buffer[1..9].copy_from_slice(&node.to_le_bytes());
            }
            Self::GatewayInfo {
                device_id,
                network_id,
                schedule_id,
            } => {
                buffer[0] = frame_type::GATEWAY_INFO;
                buffer[1..9].copy_from_slice(&device_id.to_le_bytes());
                buffer[9..11].copy_from_slice(&network_id.to_le_bytes());
                buffer[11] = *schedule_id;
            }
        }

        Ok(len)
    }

    /// Parse a frame arriving from the host. The host may only send data;
    /// every other type is an error to report.
    pub fn parse_inbound(bytes: &'p [u8]) -> Result<Self, IpcError> {
        let (&tag, rest) = bytes.split_first().ok_or(IpcError::Length)?;
        match tag {
            frame_type::DATA => Ok(Self::Data { frame: rest }),
            other => Err(IpcError::UnexpectedType(other)),
        }
    }
}

/// Encode a host frame into an owned buffer for the outbound queue.
pub(crate) fn encode(frame: &HostFrame<'_>) -> Option<Vec<u8, HOST_FRAME_MAX>> {
    let mut buffer = [0u8; HOST_FRAME_MAX];
    let len = frame.emit(&mut buffer).ok()?;
    Vec::from_slice(&buffer[..len]).ok()
}

/// The host-stream rendering of a protocol event, if it has one. Received
/// payloads go out as a rebuilt radio frame so the host sees the same bytes
/// a sniffer would.
pub(crate) fn host_frame_for_event(
    event: &Event,
    network_id: u16,
) -> Option<Vec<u8, HOST_FRAME_MAX>> {
    match event {
        Event::NodeJoined { node } => encode(&HostFrame::NodeJoined { node: *node }),
        Event::NodeLeft { node, .. } => encode(&HostFrame::NodeLeft { node: *node }),
        Event::Keepalive { node } => encode(&HostFrame::Keepalive { node: *node }),
        Event::NewPacket(packet) => {
            let repr = FrameRepr::Data(DataRepr {
                header: PacketHeaderRepr {
                    network_id,
                    dst: packet.dst,
                    src: packet.src,
                    rssi_stat: packet.rssi,
                },
                payload: packet.payload.as_slice(),
            });
            let mut frame = [0u8; MAX_FRAME_LEN];
            let len = repr.emit(&mut frame).ok()?;
            encode(&HostFrame::Data {
                frame: &frame[..len],
            })
        }
        _ => None,
    }
}
