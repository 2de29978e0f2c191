//! In-memory device tree.
//!
//! Nodes live in an arena owned by [`Tree`] and refer to each other through [`NodeId`] handles.
//! Every traversal goes through [`Walk`], which keeps its own stack, so arbitrarily deep trees
//! never exhaust the native stack.

use std::fmt;

use indexmap::IndexMap;

use crate::error::Position;

/// Handle to a node in a [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Reference to a node, either through one of its labels or through its full path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Label(String),
    Path(String),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Label(label) => write!(f, "&{label}"),
            Reference::Path(path) => write!(f, "&{{{path}}}"),
        }
    }
}

/// Width of the cells of a cell array, as selected by `/bits/`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellWidth {
    W8,
    W16,
    #[default]
    W32,
    W64,
}

impl CellWidth {
    pub fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            8 => Some(CellWidth::W8),
            16 => Some(CellWidth::W16),
            32 => Some(CellWidth::W32),
            64 => Some(CellWidth::W64),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            CellWidth::W8 => 8,
            CellWidth::W16 => 16,
            CellWidth::W32 => 32,
            CellWidth::W64 => 64,
        }
    }

    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Lit(u64),
    /// Reference to a node, only allowed in 32-bit arrays.
    Ref(Reference),
}

/// One comma-separated component of a property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Cells { width: CellWidth, cells: Vec<Cell> },
    Bytes(Vec<u8>),
    /// Bare reference, stored as the full path of the referenced node.
    Ref(Reference),
}

impl Value {
    /// Iterates over the node references contained in the value.
    pub fn references(&self) -> impl Iterator<Item = &Reference> + '_ {
        let (cells, bare): (&[Cell], _) = match self {
            Value::Cells { cells, .. } => (cells.as_slice(), None),
            Value::Ref(reference) => (&[][..], Some(reference)),
            Value::Str(_) | Value::Bytes(_) => (&[][..], None),
        };

        cells
            .iter()
            .filter_map(|cell| match cell {
                Cell::Ref(reference) => Some(reference),
                Cell::Lit(_) => None,
            })
            .chain(bare)
    }

    /// Whether the value encodes to zero bytes.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Cells { cells, .. } => cells.is_empty(),
            Value::Bytes(bytes) => bytes.is_empty(),
            Value::Str(_) | Value::Ref(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub values: Vec<Value>,
    pub position: Position,
}

impl Property {
    pub fn new(name: impl Into<String>, values: Vec<Value>, position: Position) -> Self {
        Self {
            name: name.into(),
            values,
            position,
        }
    }

    /// A property declared without `=`, i.e. a boolean presence flag.
    pub fn is_flag(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether the property encodes to zero bytes.
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Value::is_empty)
    }

    pub fn is_string(&self) -> bool {
        !self.values.is_empty() && self.values.iter().all(|v| matches!(v, Value::Str(_)))
    }

    pub fn references(&self) -> impl Iterator<Item = &Reference> + '_ {
        self.values.iter().flat_map(Value::references)
    }

    /// Total number of 32-bit cells, or `None` if the value is anything but 32-bit cell arrays.
    pub fn cell_count(&self) -> Option<usize> {
        self.values.iter().try_fold(0, |count, value| match value {
            Value::Cells {
                width: CellWidth::W32,
                cells,
            } => Some(count + cells.len()),
            _ => None,
        })
    }

    /// The literal value of a property holding exactly one 32-bit cell.
    pub fn single_cell(&self) -> Option<u64> {
        match self.values.as_slice() {
            [Value::Cells {
                width: CellWidth::W32,
                cells,
            }] => match cells.as_slice() {
                [Cell::Lit(value)] => Some(*value),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A deletion recorded inside an amendment block, applied when the block is merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deletion {
    Property(String),
    Node(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Full name including the unit address. Empty for the root node.
    pub name: String,
    pub labels: Vec<String>,
    pub properties: IndexMap<String, Property>,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub position: Position,
    pub omit_if_no_ref: bool,
    /// Depth-first preorder index, assigned once the tree has been validated.
    pub order: Option<usize>,
    pub(crate) deletions: Vec<Deletion>,
}

impl Node {
    fn new(name: String, position: Position) -> Self {
        Self {
            name,
            labels: Vec::new(),
            properties: IndexMap::new(),
            children: Vec::new(),
            parent: None,
            position,
            omit_if_no_ref: false,
            order: None,
            deletions: Vec::new(),
        }
    }

    /// Node name without the unit address.
    pub fn base_name(&self) -> &str {
        self.name
            .split_once('@')
            .map_or(self.name.as_str(), |(base, _)| base)
    }

    pub fn unit_address(&self) -> Option<&str> {
        self.name.split_once('@').map(|(_, address)| address)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }
}

/// A `/memreserve/` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemReserve {
    pub address: u64,
    pub size: u64,
}

/// Arena of nodes with a single root.
///
/// Nodes are never freed: deleting or pruning a node detaches it from its parent, after which it
/// is no longer reachable through [`Tree::walk`].
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
    pub memreserves: Vec<MemReserve>,
}

impl Tree {
    pub fn new(position: Position) -> Self {
        Self {
            nodes: vec![Node::new(String::new(), position)],
            root: NodeId(0),
            memreserves: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Number of nodes in the arena, including detached ones.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over every node in the arena, including detached ones.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    /// Creates a node that is not attached to any parent yet.
    pub fn add_node(&mut self, name: impl Into<String>, position: Position) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(name.into(), position));
        id
    }

    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        position: Position,
    ) -> NodeId {
        let id = self.add_node(name, position);
        self.attach(parent, id);
        id
    }

    /// Appends a detached node to the children of `parent`.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Removes a node, and with it its whole subtree, from its parent.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|&child| child != id);
        }
    }

    /// First child of `parent` whose full name is `name`.
    pub fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|&child| self.node(child).name == name)
    }

    /// Full path of a node, e.g. `/soc/uart@1000`.
    pub fn path(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            let node = self.node(id);
            if node.parent.is_some() {
                names.push(node.name.as_str());
            }
            current = node.parent;
        }

        if names.is_empty() {
            return "/".into();
        }

        names.iter().rev().fold(String::new(), |mut path, name| {
            path.push('/');
            path.push_str(name);
            path
        })
    }

    /// Looks up a node by absolute path.
    ///
    /// A path component without a unit address also matches a node carrying one, as long as the
    /// base names agree.
    pub fn find_path(&self, path: &str) -> Option<NodeId> {
        path.strip_prefix('/')?
            .split('/')
            .filter(|component| !component.is_empty())
            .try_fold(self.root, |parent, component| {
                let children = &self.node(parent).children;
                let exact = children
                    .iter()
                    .copied()
                    .find(|&child| self.node(child).name == component);

                exact.or_else(|| {
                    if component.contains('@') {
                        return None;
                    }
                    children
                        .iter()
                        .copied()
                        .find(|&child| self.node(child).base_name() == component)
                })
            })
    }

    /// First live node, in preorder, carrying `label`.
    pub fn find_label(&self, label: &str) -> Option<NodeId> {
        self.live_nodes()
            .find(|&id| self.node(id).labels.iter().any(|l| l == label))
    }

    /// Depth-first walk over the live tree.
    pub fn walk(&self) -> Walk<'_> {
        self.walk_from(self.root)
    }

    /// Depth-first walk over the subtree rooted at `start`.
    pub fn walk_from(&self, start: NodeId) -> Walk<'_> {
        Walk {
            tree: self,
            start: Some(start),
            stack: Vec::new(),
        }
    }

    /// Live nodes in depth-first preorder.
    pub fn live_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.walk().filter_map(|event| match event {
            Event::Enter(id) => Some(id),
            Event::Leave(_) => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Enter(NodeId),
    Leave(NodeId),
}

/// Iterator returned by [`Tree::walk`].
///
/// Every node yields an [`Event::Enter`] before its children and an [`Event::Leave`] after them.
#[derive(Debug, Clone)]
pub struct Walk<'t> {
    tree: &'t Tree,
    start: Option<NodeId>,
    stack: Vec<(NodeId, usize)>,
}

impl Iterator for Walk<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        if let Some(start) = self.start.take() {
            self.stack.push((start, 0));
            return Some(Event::Enter(start));
        }

        let top = self.stack.last_mut()?;
        let id = top.0;

        match self.tree.node(id).children.get(top.1) {
            Some(&child) => {
                top.1 += 1;
                self.stack.push((child, 0));
                Some(Event::Enter(child))
            }
            None => {
                self.stack.pop();
                Some(Event::Leave(id))
            }
        }
    }
}
