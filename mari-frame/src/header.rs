//! Reader/writer for the addressed header shared by join, keepalive and data
//! frames.

use crate::{Error, FrameType, Result, HEADER_LEN};

mod field {
    pub const VERSION: usize = 0;
    pub const TYPE: usize = 1;
    pub const NETWORK_ID: core::ops::Range<usize> = 2..4;
    pub const DST: core::ops::Range<usize> = 4..12;
    pub const SRC: core::ops::Range<usize> = 12..20;
    pub const RSSI_STAT: usize = 20;
}

/// A reader/writer for the addressed Mari header.
///
/// ```txt
/// u8  version
/// u8  type
/// u16 network_id
/// u64 dst
/// u64 src
/// i8  rssi_stat
/// ```
pub struct PacketHeader<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> PacketHeader<T> {
    /// Create a new [`PacketHeader`] reader/writer from a given buffer.
    pub fn new(buffer: T) -> Result<Self> {
        let header = Self::new_unchecked(buffer);

        if !header.check_len() {
            return Err(Error::Length);
        }

        Ok(header)
    }

    /// Returns `false` if the buffer is too short to contain the header.
    fn check_len(&self) -> bool {
        self.buffer.as_ref().len() >= HEADER_LEN
    }

    /// Create a new [`PacketHeader`] reader/writer without length checking.
    pub fn new_unchecked(buffer: T) -> Self {
        Self { buffer }
    }

    /// Return the protocol version byte.
    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[field::VERSION]
    }

    /// Return the frame type.
    pub fn frame_type(&self) -> FrameType {
        FrameType::from(self.buffer.as_ref()[field::TYPE])
    }

    /// Return the network id.
    pub fn network_id(&self) -> u16 {
        let b = &self.buffer.as_ref()[field::NETWORK_ID];
        u16::from_le_bytes([b[0], b[1]])
    }

    /// Return the destination device id.
    pub fn dst(&self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.buffer.as_ref()[field::DST]);
        u64::from_le_bytes(b)
    }

    /// Return the source device id.
    pub fn src(&self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.buffer.as_ref()[field::SRC]);
        u64::from_le_bytes(b)
    }

    /// Return the RSSI statistic reported by the sender.
    pub fn rssi_stat(&self) -> i8 {
        self.buffer.as_ref()[field::RSSI_STAT] as i8
    }
}

impl<'f, T: AsRef<[u8]> + ?Sized> PacketHeader<&'f T> {
    /// Return the bytes following the header.
    pub fn payload(&self) -> &'f [u8] {
        &self.buffer.as_ref()[HEADER_LEN..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> PacketHeader<T> {
    /// Set the protocol version byte.
    pub fn set_version(&mut self, version: u8) {
        self.buffer.as_mut()[field::VERSION] = version;
    }

    /// Set the frame type.
    pub fn set_frame_type(&mut self, frame_type: FrameType) {
        self.buffer.as_mut()[field::TYPE] = frame_type.into();
    }

    /// Set the network id.
    pub fn set_network_id(&mut self, network_id: u16) {
        self.buffer.as_mut()[field::NETWORK_ID].copy_from_slice(&network_id.to_le_bytes());
    }

    /// Set the destination device id.
    pub fn set_dst(&mut self, dst: u64) {
        self.buffer.as_mut()[field::DST].copy_from_slice(&dst.to_le_bytes());
    }

    /// Set the source device id.
    pub fn set_src(&mut self, src: u64) {
        self.buffer.as_mut()[field::SRC].copy_from_slice(&src.to_le_bytes());
    }

    /// Set the RSSI statistic.
    pub fn set_rssi_stat(&mut self, rssi_stat: i8) {
        self.buffer.as_mut()[field::RSSI_STAT] = rssi_stat as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PROTOCOL_VERSION;

    #[test]
    fn field_offsets() {
        let mut buffer = [0u8; HEADER_LEN];
        let mut header = PacketHeader::new_unchecked(&mut buffer[..]);
        header.set_version(PROTOCOL_VERSION);
        header.set_frame_type(FrameType::Data);
        header.set_network_id(0xABCD);
        header.set_dst(0x0000_0000_0000_0001);
        header.set_src(0x0000_0000_0000_00AA);
        header.set_rssi_stat(-70);

        assert_eq!(
            buffer,
            [
                0x02, 0x10, 0xCD, 0xAB, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xAA,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xBA,
            ]
        );

        let header = PacketHeader::new(&buffer[..]).unwrap();
        assert_eq!(header.version(), PROTOCOL_VERSION);
        assert_eq!(header.frame_type(), FrameType::Data);
        assert_eq!(header.network_id(), 0xABCD);
        assert_eq!(header.dst(), 1);
        assert_eq!(header.src(), 0xAA);
        assert_eq!(header.rssi_stat(), -70);
    }

    #[test]
    fn too_short() {
        let buffer = [0u8; HEADER_LEN - 1];
        assert!(PacketHeader::new(&buffer[..]).is_err());
    }
}
