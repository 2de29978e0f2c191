//! The flattened device tree (FDT) binary format, version 17.
//!
//! An image starts with a fixed [`Header`], followed by the memory reservation block, the
//! structure block and the strings block. All integers are big-endian.

pub mod decode;

pub use decode::{decode, DecodeError, DecodedNode, DecodedProperty, DecodedTree};

pub const FDT_MAGIC: u32 = 0xd00d_feed;
pub const FDT_VERSION: u32 = 17;
pub const FDT_LAST_COMP_VERSION: u32 = 16;

/// Size of the version 17 header.
pub const HEADER_SIZE: usize = 40;

/// Size of one memory reservation entry (address and size, 64 bits each).
pub const RESERVE_ENTRY_SIZE: usize = 16;

/// Structure block tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FdtToken {
    BeginNode = 1,
    EndNode = 2,
    Prop = 3,
    Nop = 4,
    End = 9,
}

impl FdtToken {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(FdtToken::BeginNode),
            2 => Some(FdtToken::EndNode),
            3 => Some(FdtToken::Prop),
            4 => Some(FdtToken::Nop),
            9 => Some(FdtToken::End),
            _ => None,
        }
    }
}

/// The image header, in on-disk field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub totalsize: u32,
    pub off_dt_struct: u32,
    pub off_dt_strings: u32,
    pub off_mem_rsvmap: u32,
    pub version: u32,
    pub last_comp_version: u32,
    pub boot_cpuid_phys: u32,
    pub size_dt_strings: u32,
    pub size_dt_struct: u32,
}

impl Header {
    fn fields(&self) -> [u32; HEADER_SIZE / 4] {
        [
            self.magic,
            self.totalsize,
            self.off_dt_struct,
            self.off_dt_strings,
            self.off_mem_rsvmap,
            self.version,
            self.last_comp_version,
            self.boot_cpuid_phys,
            self.size_dt_strings,
            self.size_dt_struct,
        ]
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0; HEADER_SIZE];
        for (chunk, field) in bytes.chunks_exact_mut(4).zip(self.fields()) {
            chunk.copy_from_slice(&field.to_be_bytes());
        }
        bytes
    }

    /// Reads a header from the start of `bytes`, without checking any field.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..HEADER_SIZE)?;
        let f: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Some(Self {
            magic: f[0],
            totalsize: f[1],
            off_dt_struct: f[2],
            off_dt_strings: f[3],
            off_mem_rsvmap: f[4],
            version: f[5],
            last_comp_version: f[6],
            boot_cpuid_phys: f[7],
            size_dt_strings: f[8],
            size_dt_struct: f[9],
        })
    }
}

/// Rounds `offset` up to a multiple of `alignment`, which must be a power of two.
pub fn align(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let header = Header {
            magic: FDT_MAGIC,
            totalsize: 0x1122_3344,
            off_dt_struct: 0x38,
            off_dt_strings: 0x100,
            off_mem_rsvmap: 0x28,
            version: FDT_VERSION,
            last_comp_version: FDT_LAST_COMP_VERSION,
            boot_cpuid_phys: 3,
            size_dt_strings: 0x20,
            size_dt_struct: 0xc8,
        };

        let bytes = header.to_bytes();
        assert_eq!(&bytes[..4], &[0xd0, 0x0d, 0xfe, 0xed]);
        assert_eq!(&bytes[4..8], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(&bytes[20..24], &[0, 0, 0, 17]);
        assert_eq!(&bytes[24..28], &[0, 0, 0, 16]);
        assert_eq!(&bytes[36..40], &[0, 0, 0, 0xc8]);
        assert_eq!(Header::parse(&bytes), Some(header));
        assert_eq!(Header::parse(&bytes[..39]), None);
    }

    #[test]
    fn alignment() {
        for (offset, alignment, expected) in [(0, 4, 0), (1, 4, 4), (4, 4, 4), (5, 8, 8), (17, 16, 32)] {
            assert_eq!(align(offset, alignment), expected);
        }
    }

    #[test]
    fn tokens() {
        for token in [
            FdtToken::BeginNode,
            FdtToken::EndNode,
            FdtToken::Prop,
            FdtToken::Nop,
            FdtToken::End,
        ] {
            assert_eq!(FdtToken::from_u32(token as u32), Some(token));
        }
        assert_eq!(FdtToken::from_u32(5), None);
    }
}
