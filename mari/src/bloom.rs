//! Membership digest over the currently assigned node ids.
//!
//! The gateway publishes a fixed-size bloom image of the uplink roster in
//! its beacons. A node that stops finding its own id in the digest knows it
//! has been evicted without ever receiving a directed frame.
//!
//! Two images are kept and the active one is flipped under a critical
//! section after a rewrite, so a reader always observes a complete image,
//! never a torn one.

use mari_frame::BLOOM_LEN;

/// Number of bits in the digest.
pub const BLOOM_BITS: usize = BLOOM_LEN * 8;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Salt applied to the id before the second hash.
const BLOOM_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Return the two hash seeds for a node id. Assigned cells precompute these
/// so a digest rewrite never hashes.
pub fn hashes(node: u64) -> (u64, u64) {
    let h1 = fnv1a(&node.to_le_bytes());
    let h2 = fnv1a(&(node ^ BLOOM_SALT).to_le_bytes());
    (h1, h2)
}

/// The double-buffered membership digest. The gateway owns the writable
/// side; nodes only ever call [`BloomDigest::contains`] on a beacon-carried
/// copy.
pub struct BloomDigest {
    images: [[u8; BLOOM_LEN]; 2],
    active: usize,
    available: bool,
    dirty: bool,
}

impl BloomDigest {
    /// Create an empty digest. Not available until the first recompute.
    pub const fn new() -> Self {
        Self {
            images: [[0; BLOOM_LEN]; 2],
            active: 0,
            available: false,
            dirty: false,
        }
    }

    /// Note that the roster changed; the digest is rebuilt at the next slot
    /// boundary.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether a recompute is pending.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Rebuild the digest from the precomputed hash seeds of all assigned
    /// uplink cells, then commit it. The rewrite happens in the inactive
    /// image; only the flip runs with interrupts masked.
    pub fn recompute(&mut self, seeds: impl Iterator<Item = (u64, u64)>) {
        let back = 1 - self.active;
        let image = &mut self.images[back];
        image.fill(0);

        for (h1, h2) in seeds {
            // k = 2, double hashing: h1 + i * h2 for i in 0..k.
            set_bit(image, (h1 % BLOOM_BITS as u64) as usize);
            set_bit(image, (h1.wrapping_add(h2) % BLOOM_BITS as u64) as usize);
        }

        critical_section::with(|_| {
            self.active = back;
            self.available = true;
            self.dirty = false;
        });
    }

    /// Copy the active image into `out` and return the number of bytes
    /// written. Returns `None` until the first recompute has committed.
    pub fn snapshot(&self, out: &mut [u8; BLOOM_LEN]) -> Option<usize> {
        if !self.available {
            return None;
        }
        out.copy_from_slice(&self.images[self.active]);
        Some(BLOOM_LEN)
    }

    /// Test a node id against a digest image. No false negatives: every
    /// assigned id tests positive; unassigned ids may, rarely, too.
    pub fn contains(digest: &[u8], node: u64) -> bool {
        if digest.len() != BLOOM_LEN {
            return false;
        }
        let (h1, h2) = hashes(node);
        test_bit(digest, (h1 % BLOOM_BITS as u64) as usize)
            && test_bit(digest, (h1.wrapping_add(h2) % BLOOM_BITS as u64) as usize)
    }
}

impl Default for BloomDigest {
    fn default() -> Self {
        Self::new()
    }
}

fn set_bit(image: &mut [u8; BLOOM_LEN], bit: usize) {
    image[bit / 8] |= 1 << (bit % 8);
}

fn test_bit(image: &[u8], bit: usize) -> bool {
    image[bit / 8] & (1 << (bit % 8)) != 0
}
