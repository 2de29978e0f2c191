//! Serialization of a validated tree into an FDT image.
//!
//! Runs in three steps: the [`StringTable`] collects property names, the [`ResolvedTree`] fixes
//! the structure block offset of every node, and [`emit`] writes the final bytes. Cell references
//! (`<&label>`) encode the offset of the target's begin token; bare references encode the
//! target's full path as a string.

mod resolve;
mod strings;

use thiserror::Error;
use tracing::debug;

pub use resolve::ResolvedTree;
pub use strings::StringTable;

use crate::{
    error::Position,
    fdt::{
        align, FdtToken, Header, FDT_LAST_COMP_VERSION, FDT_MAGIC, FDT_VERSION, HEADER_SIZE,
        RESERVE_ENTRY_SIZE,
    },
    tree::{Cell, CellWidth, Event, NodeId, Property, Reference, Value},
    validate::ValidatedTree,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}")]
pub struct SerializeError {
    pub kind: SerializeErrorKind,
    pub position: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializeErrorKind {
    #[error("value {value:#x} of property `{property}` does not fit in {bits} bits")]
    ValueTooLarge {
        property: String,
        value: u64,
        bits: u32,
    },
    #[error("{0} exceeds the 32-bit offset range")]
    OffsetOverflow(&'static str),
    #[error("reference `{0}` has no target")]
    UnresolvedReference(String),
    #[error("property name `{0}` is missing from the strings block")]
    MissingString(String),
}

fn error(kind: SerializeErrorKind, position: Option<Position>) -> SerializeError {
    SerializeError { kind, position }
}

/// A complete FDT image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    header: Header,
    bytes: Vec<u8>,
}

impl BinaryImage {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Serializes `tree` into an image.
pub fn serialize(tree: &ValidatedTree, boot_cpuid: u32) -> Result<BinaryImage, SerializeError> {
    let strings = StringTable::build(tree)?;
    let resolved = ResolvedTree::new(tree, strings)?;
    emit(&resolved, boot_cpuid)
}

/// Writes the image of a laid-out tree. The header is assembled last, once every block size is
/// known.
pub fn emit(resolved: &ResolvedTree<'_>, boot_cpuid: u32) -> Result<BinaryImage, SerializeError> {
    let tree = resolved.tree();

    let mut reservations = Encoder::default();
    for reserve in &tree.tree().memreserves {
        reservations.u64(reserve.address);
        reservations.u64(reserve.size);
    }
    reservations.bytes(&[0; RESERVE_ENTRY_SIZE]);

    let structure = encode_structure(tree, resolved.strings(), Some(resolved.node_offsets()))?;
    let strings = resolved.strings().as_bytes();

    let off_mem_rsvmap = align(HEADER_SIZE, 8);
    let off_dt_struct = align(off_mem_rsvmap + reservations.buf.len(), 4);
    let off_dt_strings = off_dt_struct + structure.bytes.len();
    let totalsize = off_dt_strings + strings.len();

    let header = Header {
        magic: FDT_MAGIC,
        totalsize: offset(totalsize, "total size")?,
        off_dt_struct: offset(off_dt_struct, "structure block")?,
        off_dt_strings: offset(off_dt_strings, "strings block")?,
        off_mem_rsvmap: offset(off_mem_rsvmap, "memory reservation block")?,
        version: FDT_VERSION,
        last_comp_version: FDT_LAST_COMP_VERSION,
        boot_cpuid_phys: boot_cpuid,
        size_dt_strings: offset(strings.len(), "strings block")?,
        size_dt_struct: offset(structure.bytes.len(), "structure block")?,
    };

    let mut bytes = Vec::with_capacity(totalsize);
    bytes.extend_from_slice(&header.to_bytes());
    bytes.resize(off_mem_rsvmap, 0);
    bytes.extend_from_slice(&reservations.buf);
    bytes.resize(off_dt_struct, 0);
    bytes.extend_from_slice(&structure.bytes);
    bytes.extend_from_slice(strings);

    debug!(
        totalsize,
        structure = structure.bytes.len(),
        strings = strings.len(),
        reservations = tree.tree().memreserves.len(),
        "serialized tree"
    );

    Ok(BinaryImage { header, bytes })
}

fn offset(value: usize, what: &'static str) -> Result<u32, SerializeError> {
    u32::try_from(value).map_err(|_| error(SerializeErrorKind::OffsetOverflow(what), None))
}

/* === Structure block === */

pub(crate) struct Structure {
    pub bytes: Vec<u8>,
    /// Offset of every live node, indexed by preorder position.
    pub node_offsets: Vec<u32>,
}

/// Encodes the structure block of `tree`.
///
/// Without `offsets`, cell references encode as 0; this is the layout pass that produces the
/// offsets in the first place.
pub(crate) fn encode_structure(
    tree: &ValidatedTree,
    strings: &StringTable,
    offsets: Option<&[u32]>,
) -> Result<Structure, SerializeError> {
    let mut encoder = Encoder::default();
    let mut node_offsets = Vec::with_capacity(tree.order().len());

    for event in tree.walk() {
        match event {
            Event::Enter(id) => {
                node_offsets.push(offset(encoder.buf.len(), "structure block")?);

                let node = tree.node(id);
                encoder.token(FdtToken::BeginNode);
                encoder.cstr(&node.name);
                encoder.pad();

                for property in node.properties.values() {
                    encoder.property(tree, strings, offsets, property)?;
                }
            }
            Event::Leave(_) => encoder.token(FdtToken::EndNode),
        }
    }
    encoder.token(FdtToken::End);

    Ok(Structure {
        bytes: encoder.buf,
        node_offsets,
    })
}

#[derive(Debug, Default)]
struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    fn token(&mut self, token: FdtToken) {
        self.u32(token as u32);
    }

    fn pad(&mut self) {
        self.buf.resize(align(self.buf.len(), 4), 0);
    }

    fn property(
        &mut self,
        tree: &ValidatedTree,
        strings: &StringTable,
        offsets: Option<&[u32]>,
        property: &Property,
    ) -> Result<(), SerializeError> {
        let nameoff = strings.offset(&property.name).ok_or_else(|| {
            error(
                SerializeErrorKind::MissingString(property.name.clone()),
                Some(property.position),
            )
        })?;

        self.token(FdtToken::Prop);
        let len_at = self.buf.len();
        self.u32(0);
        self.u32(nameoff);

        let start = self.buf.len();
        for value in &property.values {
            self.value(tree, offsets, property, value)?;
        }

        let len = self.buf.len() - start;
        let len = u32::try_from(len).map_err(|_| {
            error(
                SerializeErrorKind::ValueTooLarge {
                    property: property.name.clone(),
                    value: len as u64,
                    bits: 32,
                },
                Some(property.position),
            )
        })?;
        self.buf[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
        self.pad();

        Ok(())
    }

    fn value(
        &mut self,
        tree: &ValidatedTree,
        offsets: Option<&[u32]>,
        property: &Property,
        value: &Value,
    ) -> Result<(), SerializeError> {
        match value {
            Value::Str(s) => self.cstr(s),
            Value::Bytes(bytes) => self.bytes(bytes),
            Value::Ref(reference) => {
                let target = target(tree, property, reference)?;
                self.cstr(&tree.tree().path(target));
            }
            Value::Cells { width, cells } => {
                for cell in cells {
                    match cell {
                        Cell::Lit(value) => self.cell(*value, *width, property)?,
                        Cell::Ref(reference) => {
                            let target = target(tree, property, reference)?;
                            let offset = match offsets {
                                None => 0,
                                Some(offsets) => tree
                                    .node(target)
                                    .order
                                    .and_then(|order| offsets.get(order).copied())
                                    .ok_or_else(|| unresolved(property, reference))?,
                            };
                            self.u32(offset);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Writes one cell of `width`. Negative values (wrapped to `u64`) are accepted as long as
    /// they sign-extend from the cell width.
    fn cell(&mut self, value: u64, width: CellWidth, property: &Property) -> Result<(), SerializeError> {
        let bits = width.bits();
        if !fits(value, bits) {
            return Err(error(
                SerializeErrorKind::ValueTooLarge {
                    property: property.name.clone(),
                    value,
                    bits,
                },
                Some(property.position),
            ));
        }

        let be = value.to_be_bytes();
        self.bytes(&be[be.len() - width.bytes()..]);
        Ok(())
    }
}

fn fits(value: u64, bits: u32) -> bool {
    if bits >= 64 || value >> bits == 0 {
        return true;
    }

    let signed = value as i64;
    signed < 0 && signed >= -(1i64 << (bits - 1))
}

fn target(
    tree: &ValidatedTree,
    property: &Property,
    reference: &Reference,
) -> Result<NodeId, SerializeError> {
    tree.resolve(reference)
        .ok_or_else(|| unresolved(property, reference))
}

fn unresolved(property: &Property, reference: &Reference) -> SerializeError {
    error(
        SerializeErrorKind::UnresolvedReference(reference.to_string()),
        Some(property.position),
    )
}

/* === Unit Tests === */
