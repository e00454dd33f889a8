//! Reader/writer for the Mari beacon header.

use crate::{Error, FrameType, Result, BEACON_LEN, BLOOM_LEN};

mod field {
    pub const VERSION: usize = 0;
    pub const TYPE: usize = 1;
    pub const NETWORK_ID: core::ops::Range<usize> = 2..4;
    pub const ASN: core::ops::Range<usize> = 4..12;
    pub const SRC: core::ops::Range<usize> = 12..20;
    pub const REMAINING_CAPACITY: usize = 20;
    pub const ACTIVE_SCHEDULE_ID: usize = 21;
    pub const BLOOM: core::ops::Range<usize> = 22..150;
}

/// A reader/writer for a Mari beacon.
///
/// ```txt
/// u8  version
/// u8  type=1
/// u16 network_id
/// u64 asn
/// u64 src
/// u8  remaining_capacity
/// u8  active_schedule_id
/// [optional] u8[128] bloom_digest
/// ```
///
/// Digest presence is indicated by the frame length.
pub struct Beacon<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Beacon<T> {
    /// Create a new [`Beacon`] reader/writer from a given buffer.
    pub fn new(buffer: T) -> Result<Self> {
        let beacon = Self::new_unchecked(buffer);

        if !beacon.check_len() {
            return Err(Error::Length);
        }

        Ok(beacon)
    }

    /// Returns `false` if the buffer length matches neither beacon shape.
    fn check_len(&self) -> bool {
        let len = self.buffer.as_ref().len();
        len == BEACON_LEN || len == BEACON_LEN + BLOOM_LEN
    }

    /// Create a new [`Beacon`] reader/writer without length checking.
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

    /// Return the gateway's absolute slot number.
    pub fn asn(&self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.buffer.as_ref()[field::ASN]);
        u64::from_le_bytes(b)
    }

    /// Return the gateway device id.
    pub fn src(&self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.buffer.as_ref()[field::SRC]);
        u64::from_le_bytes(b)
    }

    /// Return the number of uplink cells still free at the gateway.
    pub fn remaining_capacity(&self) -> u8 {
        self.buffer.as_ref()[field::REMAINING_CAPACITY]
    }

    /// Return the id of the schedule the gateway runs.
    pub fn active_schedule_id(&self) -> u8 {
        self.buffer.as_ref()[field::ACTIVE_SCHEDULE_ID]
    }

    /// Whether this beacon carries a membership digest.
    pub fn has_bloom(&self) -> bool {
        self.buffer.as_ref().len() == BEACON_LEN + BLOOM_LEN
    }
}

impl<'f, T: AsRef<[u8]> + ?Sized> Beacon<&'f T> {
    /// Return the membership digest, if carried.
    pub fn bloom(&self) -> Option<&'f [u8]> {
        if self.has_bloom() {
            Some(&self.buffer.as_ref()[field::BLOOM])
        } else {
            None
        }
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Beacon<T> {
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

    /// Set the absolute slot number.
    pub fn set_asn(&mut self, asn: u64) {
        self.buffer.as_mut()[field::ASN].copy_from_slice(&asn.to_le_bytes());
    }

    /// Set the gateway device id.
    pub fn set_src(&mut self, src: u64) {
        self.buffer.as_mut()[field::SRC].copy_from_slice(&src.to_le_bytes());
    }

    /// Set the remaining capacity.
    pub fn set_remaining_capacity(&mut self, remaining_capacity: u8) {
        self.buffer.as_mut()[field::REMAINING_CAPACITY] = remaining_capacity;
    }

    /// Set the active schedule id.
    pub fn set_active_schedule_id(&mut self, active_schedule_id: u8) {
        self.buffer.as_mut()[field::ACTIVE_SCHEDULE_ID] = active_schedule_id;
    }

    /// Copy the membership digest into the beacon. The buffer must be long
    /// enough to hold it.
    pub fn set_bloom(&mut self, bloom: &[u8; BLOOM_LEN]) {
        self.buffer.as_mut()[field::BLOOM].copy_from_slice(bloom);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PROTOCOL_VERSION;

    #[test]
    fn field_offsets() {
        let mut buffer = [0u8; BEACON_LEN];
        let mut beacon = Beacon::new_unchecked(&mut buffer[..]);
        beacon.set_version(PROTOCOL_VERSION);
        beacon.set_frame_type(FrameType::Beacon);
        beacon.set_network_id(1);
        beacon.set_asn(3);
        beacon.set_src(0x0000_0000_0000_0001);
        beacon.set_remaining_capacity(1);
        beacon.set_active_schedule_id(6);

        assert_eq!(
            buffer,
            [
                0x02, 0x01, 0x01, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x06,
            ]
        );

        let beacon = Beacon::new(&buffer[..]).unwrap();
        assert_eq!(beacon.asn(), 3);
        assert_eq!(beacon.src(), 1);
        assert_eq!(beacon.remaining_capacity(), 1);
        assert_eq!(beacon.active_schedule_id(), 6);
        assert!(!beacon.has_bloom());
        assert!(beacon.bloom().is_none());
    }

    #[test]
    fn bloom_presence_by_length() {
        let mut buffer = [0u8; BEACON_LEN + BLOOM_LEN];
        let mut beacon = Beacon::new_unchecked(&mut buffer[..]);
        let mut digest = [0u8; BLOOM_LEN];
        digest[0] = 0x80;
        digest[127] = 0x01;
        beacon.set_bloom(&digest);

        let beacon = Beacon::new(&buffer[..]).unwrap();
        assert!(beacon.has_bloom());
        assert_eq!(beacon.bloom().unwrap(), &digest[..]);

        // Any other length is rejected.
        assert!(Beacon::new(&buffer[..BEACON_LEN + 1]).is_err());
        assert!(Beacon::new(&buffer[..BEACON_LEN - 1]).is_err());
    }
}
