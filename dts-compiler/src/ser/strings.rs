use indexmap::IndexMap;

use super::{SerializeError, SerializeErrorKind};
use crate::validate::ValidatedTree;

/// The strings block: every distinct property name once, NUL-terminated, in order of first use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringTable {
    offsets: IndexMap<String, u32>,
    bytes: Vec<u8>,
}

impl StringTable {
    /// Collects the property names of `tree` in preorder.
    pub fn build(tree: &ValidatedTree) -> Result<Self, SerializeError> {
        let mut table = Self::default();

        for &id in tree.order() {
            for name in tree.node(id).properties.keys() {
                table.insert(name)?;
            }
        }

        Ok(table)
    }

    /// Adds `name` if it is new and returns its offset.
    pub fn insert(&mut self, name: &str) -> Result<u32, SerializeError> {
        if let Some(&offset) = self.offsets.get(name) {
            return Ok(offset);
        }

        let offset = u32::try_from(self.bytes.len()).map_err(|_| SerializeError {
            kind: SerializeErrorKind::OffsetOverflow("strings block"),
            position: None,
        })?;
        self.bytes.extend_from_slice(name.as_bytes());
        self.bytes.push(0);
        self.offsets.insert(name.to_string(), offset);

        Ok(offset)
    }

    pub fn offset(&self, name: &str) -> Option<u32> {
        self.offsets.get(name).copied()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}
