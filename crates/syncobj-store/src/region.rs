//! Region header at the start of every shared region.
//!
//! All fields are little-endian:
//! - 0x00: magic (`SYNC`)
//! - 0x04: format version (u8)
//! - 0x05: reserved (3 bytes, zero)
//! - 0x08: payload capacity (u64)
//! - 0x10: payload length (u64)
//! - 0x18: generation (u64)
//!
//! The payload follows the header and holds a JSON object.

/// Magic bytes identifying a region ("SYNC" read as little-endian u32).
pub const REGION_MAGIC: u32 = 0x434E_5953;

/// Current region format version.
pub const REGION_VERSION: u8 = 1;

/// Header size in bytes; the payload starts here.
pub const HEADER_SIZE: usize = 0x20;

const MAGIC_OFFSET: usize = 0x00;
const VERSION_OFFSET: usize = 0x04;
const CAPACITY_OFFSET: usize = 0x08;
const LENGTH_OFFSET: usize = 0x10;
const GENERATION_OFFSET: usize = 0x18;

/// Decoded region header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionHeader {
    /// Format version.
    pub version: u8,
    /// Payload capacity in bytes.
    pub capacity: u64,
    /// Bytes of the payload currently in use.
    pub payload_len: u64,
    /// Incremented on every committed write.
    pub generation: u64,
}

impl RegionHeader {
    /// Header for a freshly created, empty region.
    pub const fn new(capacity: u64) -> Self {
        Self {
            version: REGION_VERSION,
            capacity,
            payload_len: 0,
            generation: 0,
        }
    }

    /// Read a header from mapped memory.
    ///
    /// Returns `None` if the data is too short, the magic does not match,
    /// or the version is unsupported.
    pub fn from_mapped(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_SIZE {
            return None;
        }

        if read_u32(data, MAGIC_OFFSET) != REGION_MAGIC {
            return None;
        }

        let version = data[VERSION_OFFSET];
        if version != REGION_VERSION {
            return None;
        }

        Some(Self {
            version,
            capacity: read_u64(data, CAPACITY_OFFSET),
            payload_len: read_u64(data, LENGTH_OFFSET),
            generation: read_u64(data, GENERATION_OFFSET),
        })
    }

    /// Write the header to mapped memory.
    pub fn to_mapped(&self, data: &mut [u8]) {
        if data.len() < HEADER_SIZE {
            return;
        }

        data[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&REGION_MAGIC.to_le_bytes());
        data[VERSION_OFFSET] = self.version;
        data[VERSION_OFFSET + 1..CAPACITY_OFFSET].fill(0);
        data[CAPACITY_OFFSET..CAPACITY_OFFSET + 8].copy_from_slice(&self.capacity.to_le_bytes());
        data[LENGTH_OFFSET..LENGTH_OFFSET + 8].copy_from_slice(&self.payload_len.to_le_bytes());
        data[GENERATION_OFFSET..GENERATION_OFFSET + 8]
            .copy_from_slice(&self.generation.to_le_bytes());
    }

    /// Total file size for this header's capacity.
    pub const fn region_size(&self) -> usize {
        region_size(self.capacity as usize)
    }

    /// Check the header against the mapped length.
    ///
    /// Valid if the capacity fits in the mapping and the payload fits in
    /// the capacity.
    pub fn is_consistent(&self, mapped_len: usize) -> bool {
        self.capacity
            .checked_add(HEADER_SIZE as u64)
            .is_some_and(|size| size <= mapped_len as u64)
            && self.payload_len <= self.capacity
    }
}

/// Total file size of a region with the given payload capacity.
pub const fn region_size(capacity: usize) -> usize {
    HEADER_SIZE + capacity
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}
