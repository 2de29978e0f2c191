//! Reader for FDT images.
//!
//! Decodes an image into a flat, preorder list of nodes. Used to inspect compiled output.

use std::str;

use thiserror::Error;

use super::{align, FdtToken, Header, FDT_MAGIC, FDT_VERSION, HEADER_SIZE, RESERVE_ENTRY_SIZE};
use crate::tree::MemReserve;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("image is shorter than its header")]
    Truncated,
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),
    #[error("{0} lies outside the image")]
    OutOfBounds(&'static str),
    #[error("unexpected structure token {token:#x} at offset {offset}")]
    UnexpectedToken { token: u32, offset: usize },
    #[error("invalid string at offset {0}")]
    InvalidString(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedProperty {
    pub name: String,
    pub value: Vec<u8>,
}

impl DecodedProperty {
    /// The value as a single NUL-terminated string.
    pub fn as_str(&self) -> Option<&str> {
        match self.strings().as_slice() {
            [s] => Some(s),
            _ => None,
        }
    }

    /// The value as a list of NUL-terminated strings.
    pub fn strings(&self) -> Vec<&str> {
        match self.value.strip_suffix(&[0]) {
            Some(body) => body
                .split(|&b| b == 0)
                .map(|s| str::from_utf8(s).unwrap_or_default())
                .collect(),
            None => Vec::new(),
        }
    }

    /// The value as big-endian 32-bit cells.
    pub fn cells(&self) -> Option<Vec<u32>> {
        if self.value.len() % 4 != 0 {
            return None;
        }

        Some(
            self.value
                .chunks_exact(4)
                .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedNode {
    pub name: String,
    /// Nesting depth, 0 for the root node.
    pub depth: usize,
    /// Offset of the node's begin token within the structure block.
    pub offset: usize,
    pub properties: Vec<DecodedProperty>,
}

impl DecodedNode {
    pub fn property(&self, name: &str) -> Option<&DecodedProperty> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTree {
    pub header: Header,
    pub reservations: Vec<MemReserve>,
    /// Nodes in preorder.
    pub nodes: Vec<DecodedNode>,
}

impl DecodedTree {
    pub fn root(&self) -> Option<&DecodedNode> {
        self.nodes.first()
    }

    /// Full path of every node, in the order of [`DecodedTree::nodes`].
    pub fn paths(&self) -> Vec<String> {
        let mut stack: Vec<&str> = Vec::new();

        self.nodes
            .iter()
            .map(|node| {
                stack.truncate(node.depth);
                stack.push(&node.name);
                match stack.len() {
                    1 => "/".to_string(),
                    _ => stack.join("/"),
                }
            })
            .collect()
    }

    pub fn find(&self, path: &str) -> Option<&DecodedNode> {
        self.paths()
            .iter()
            .position(|p| p == path)
            .map(|index| &self.nodes[index])
    }

    /// The node whose begin token is at `offset` in the structure block.
    pub fn at_offset(&self, offset: usize) -> Option<&DecodedNode> {
        self.nodes.iter().find(|node| node.offset == offset)
    }
}

/// Decodes a complete image.
pub fn decode(bytes: &[u8]) -> Result<DecodedTree, DecodeError> {
    let header = Header::parse(bytes).ok_or(DecodeError::Truncated)?;

    if header.magic != FDT_MAGIC {
        return Err(DecodeError::BadMagic(header.magic));
    }
    if header.last_comp_version > FDT_VERSION {
        return Err(DecodeError::UnsupportedVersion(header.version));
    }

    let image = bytes
        .get(..header.totalsize as usize)
        .filter(|image| image.len() >= HEADER_SIZE)
        .ok_or(DecodeError::OutOfBounds("total size"))?;

    let structure = block(image, header.off_dt_struct, header.size_dt_struct, "structure block")?;
    let strings = block(image, header.off_dt_strings, header.size_dt_strings, "strings block")?;

    Ok(DecodedTree {
        header,
        reservations: reservations(image, header.off_mem_rsvmap as usize)?,
        nodes: nodes(structure, strings)?,
    })
}

fn block<'a>(
    image: &'a [u8],
    offset: u32,
    size: u32,
    what: &'static str,
) -> Result<&'a [u8], DecodeError> {
    let start = offset as usize;
    image
        .get(start..start + size as usize)
        .ok_or(DecodeError::OutOfBounds(what))
}

fn reservations(image: &[u8], offset: usize) -> Result<Vec<MemReserve>, DecodeError> {
    let mut reservations = Vec::new();

    for entry in (offset..).step_by(RESERVE_ENTRY_SIZE) {
        let address = read_u64(image, entry, "memory reservation block")?;
        let size = read_u64(image, entry + 8, "memory reservation block")?;
        if address == 0 && size == 0 {
            break;
        }
        reservations.push(MemReserve { address, size });
    }

    Ok(reservations)
}

fn nodes(structure: &[u8], strings: &[u8]) -> Result<Vec<DecodedNode>, DecodeError> {
    let mut nodes: Vec<DecodedNode> = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut offset = 0;

    loop {
        let raw = read_u32(structure, offset, "structure token")?;
        let unexpected = DecodeError::UnexpectedToken { token: raw, offset };

        match FdtToken::from_u32(raw) {
            Some(FdtToken::BeginNode) => {
                let name = cstr(structure, offset + 4)?;
                open.push(nodes.len());
                nodes.push(DecodedNode {
                    name: name.to_string(),
                    depth: open.len() - 1,
                    offset,
                    properties: Vec::new(),
                });
                offset = align(offset + 4 + name.len() + 1, 4);
            }
            Some(FdtToken::EndNode) => {
                open.pop().ok_or(unexpected)?;
                offset += 4;
            }
            Some(FdtToken::Prop) => {
                let node = *open.last().ok_or(unexpected)?;
                let len = read_u32(structure, offset + 4, "property length")? as usize;
                let nameoff = read_u32(structure, offset + 8, "property name offset")? as usize;
                let value = structure
                    .get(offset + 12..offset + 12 + len)
                    .ok_or(DecodeError::OutOfBounds("property value"))?;

                nodes[node].properties.push(DecodedProperty {
                    name: cstr(strings, nameoff)?.to_string(),
                    value: value.to_vec(),
                });
                offset = align(offset + 12 + len, 4);
            }
            Some(FdtToken::Nop) => offset += 4,
            Some(FdtToken::End) if open.is_empty() => return Ok(nodes),
            Some(FdtToken::End) | None => return Err(unexpected),
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize, what: &'static str) -> Result<u32, DecodeError> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(DecodeError::OutOfBounds(what))
}

fn read_u64(bytes: &[u8], offset: usize, what: &'static str) -> Result<u64, DecodeError> {
    let high = read_u32(bytes, offset, what)? as u64;
    let low = read_u32(bytes, offset + 4, what)? as u64;
    Ok(high << 32 | low)
}

fn cstr(bytes: &[u8], offset: usize) -> Result<&str, DecodeError> {
    let tail = bytes.get(offset..).ok_or(DecodeError::InvalidString(offset))?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::InvalidString(offset))?;

    str::from_utf8(&tail[..end]).map_err(|_| DecodeError::InvalidString(offset))
}
