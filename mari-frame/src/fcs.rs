//! Frame check sequence handling for transports without hardware CRC.
//!
//! The radio normally validates and strips the FCS in hardware; captures and
//! software transports carry it explicitly, trailing the frame.

use crate::{Error, FrameRepr, Result};

// 16-bit ITU-T CRC with the x^16 + x^12 + x^5 + 1 polynomial, init and final
// values both 0x0000, computed over the whole frame excluding the FCS field.
const CRC_16_MARI: crc::Algorithm<u16> = crc::Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0x0000,
    refin: true,
    refout: true,
    xorout: 0x0000,
    check: 0x2189,
    residue: 0x0000,
};

/// A Mari frame trailed by a 16-bit frame check sequence.
pub struct FrameWithFcs<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> FrameWithFcs<T> {
    /// Create a new [`FrameWithFcs`] from a given buffer, checking the FCS.
    pub fn new(buffer: T) -> Result<Self> {
        let frame = Self::new_unchecked(buffer);

        if !frame.check_len() {
            return Err(Error::Length);
        }

        if !frame.check_fcs() {
            return Err(Error::Fcs);
        }

        Ok(frame)
    }

    /// Create a new [`FrameWithFcs`] from a given buffer without checking
    /// the FCS.
    pub fn new_unchecked(buffer: T) -> Self {
        Self { buffer }
    }

    /// Check the length of the frame.
    pub fn check_len(&self) -> bool {
        self.buffer.as_ref().len() >= 2
    }

    /// Calculate the frame check sequence over the frame content.
    #[inline]
    pub fn calculate_fcs(&self) -> u16 {
        crc::Crc::<u16>::new(&CRC_16_MARI).checksum(self.content())
    }

    /// Check the frame check sequence of the frame.
    #[inline]
    pub fn check_fcs(&self) -> bool {
        self.calculate_fcs() == self.fcs()
    }

    /// Return the content of the frame, excluding the FCS.
    pub fn content(&self) -> &[u8] {
        &self.buffer.as_ref()[..self.buffer.as_ref().len() - 2]
    }

    /// Return the frame check sequence trailing the frame.
    pub fn fcs(&self) -> u16 {
        let len = self.buffer.as_ref().len();
        u16::from_le_bytes([self.buffer.as_ref()[len - 2], self.buffer.as_ref()[len - 1]])
    }

    /// Return a high-level representation of the frame, excluding the FCS.
    pub fn frame(&self, network_id: u16) -> Result<FrameRepr<'_>> {
        FrameRepr::parse(self.content(), network_id)
    }
}

/// Append an FCS to the `len` frame bytes in `buffer`, returning the new
/// frame length.
pub fn append_fcs(buffer: &mut [u8], len: usize) -> Result<usize> {
    if buffer.len() < len + 2 {
        return Err(Error::Length);
    }

    let fcs = crc::Crc::<u16>::new(&CRC_16_MARI).checksum(&buffer[..len]);
    buffer[len..len + 2].copy_from_slice(&fcs.to_le_bytes());
    Ok(len + 2)
}
