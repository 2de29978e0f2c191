use super::{encode_structure, SerializeError, StringTable};
use crate::{
    tree::{NodeId, Reference},
    validate::ValidatedTree,
};

/// A validated tree with its layout fixed: the string table and the structure block offset of
/// every node are known.
#[derive(Debug)]
pub struct ResolvedTree<'t> {
    tree: &'t ValidatedTree,
    strings: StringTable,
    node_offsets: Vec<u32>,
    structure_len: usize,
}

impl<'t> ResolvedTree<'t> {
    /// Lays out the structure block once with placeholder reference values.
    ///
    /// Value sizes do not depend on the offsets they encode, so the node offsets found here are
    /// the final ones.
    pub fn new(tree: &'t ValidatedTree, strings: StringTable) -> Result<Self, SerializeError> {
        let layout = encode_structure(tree, &strings, None)?;

        Ok(Self {
            tree,
            strings,
            node_offsets: layout.node_offsets,
            structure_len: layout.bytes.len(),
        })
    }

    pub fn tree(&self) -> &'t ValidatedTree {
        self.tree
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    /// Offsets of all live nodes, indexed by [`crate::tree::Node::order`].
    pub fn node_offsets(&self) -> &[u32] {
        &self.node_offsets
    }

    pub fn structure_len(&self) -> usize {
        self.structure_len
    }

    /// Offset of the begin token of a live node.
    pub fn node_offset(&self, id: NodeId) -> Option<u32> {
        let order = self.tree.node(id).order?;
        self.node_offsets.get(order).copied()
    }

    pub fn label_offset(&self, label: &str) -> Option<u32> {
        self.node_offset(*self.tree.labels().get(label)?)
    }

    pub fn reference_offset(&self, reference: &Reference) -> Option<u32> {
        self.node_offset(self.tree.resolve(reference)?)
    }
}
