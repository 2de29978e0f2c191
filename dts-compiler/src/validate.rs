//! Semantic validation.
//!
//! [`validate`] applies the edits collected by the parser, resolves every node reference, prunes
//! unreferenced `/omit-if-no-ref/` nodes and checks the properties whose shape the binary format
//! consumers rely on. The result is a [`ValidatedTree`], which the serializer only reads.

use std::collections::{HashMap, HashSet};

use indexmap::{map::Entry, IndexMap};
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    error::Position,
    parser::{Edit, ParsedTree},
    tree::{Deletion, Event, Node, NodeId, Property, Reference, Tree, Walk},
};

/// Default `#address-cells` of a node that does not declare it.
pub const DEFAULT_ADDRESS_CELLS: u64 = 2;

/// Default `#size-cells` of a node that does not declare it.
pub const DEFAULT_SIZE_CELLS: u64 = 1;

/// Properties that may not be declared as bare flags.
const VALUED_PROPERTIES: &[&str] = &[
    "compatible",
    "model",
    "status",
    "device_type",
    "reg",
    "#address-cells",
    "#size-cells",
    "#interrupt-cells",
    "interrupt-parent",
];

/// Properties whose values must be strings.
const STRING_PROPERTIES: &[&str] = &["compatible", "model", "status", "device_type"];

/// Properties that must hold exactly one cell.
const COUNT_PROPERTIES: &[&str] = &["#address-cells", "#size-cells", "#interrupt-cells"];

/// Fatal error raised by a semantic check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationErrorKind {
    #[error("unresolved reference `{0}`")]
    UnresolvedReference(String),
    #[error("property `{property}` must hold {expected}")]
    InconsistentCellCount { property: String, expected: String },
    #[error("property `{0}` requires a value")]
    EmptyRequiredProperty(String),
    #[error("property `{0}` must hold strings")]
    MistypedProperty(String),
    #[error("duplicate label `{0}`")]
    DuplicateLabel(String),
}

/// A tree whose references all resolve and whose properties passed every check.
#[derive(Debug, Clone)]
pub struct ValidatedTree {
    tree: Tree,
    order: Vec<NodeId>,
    labels: IndexMap<String, NodeId>,
    targets: HashMap<Reference, NodeId>,
}

impl ValidatedTree {
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Live nodes in depth-first preorder; a node's [`Node::order`] is its index here.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn labels(&self) -> &IndexMap<String, NodeId> {
        &self.labels
    }

    /// The node a reference found in a property value points to.
    pub fn resolve(&self, reference: &Reference) -> Option<NodeId> {
        self.targets.get(reference).copied()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.tree.node(id)
    }

    pub fn walk(&self) -> Walk<'_> {
        self.tree.walk()
    }
}

/// Runs every semantic check on a parsed tree.
pub fn validate(parsed: ParsedTree) -> Result<ValidatedTree, ValidationError> {
    let ParsedTree { mut tree, edits } = parsed;

    apply_edits(&mut tree, &edits)?;

    let labels = collect_labels(&tree)?;
    let targets = resolve_references(&tree, &labels)?;

    let pruned = prune_unreferenced(&mut tree, &targets);
    let (labels, targets) = if pruned > 0 {
        let labels = collect_labels(&tree)?;
        let targets = resolve_references(&tree, &labels)?;
        (labels, targets)
    } else {
        (labels, targets)
    };

    for id in tree.live_nodes() {
        check_node(&tree, id)?;
    }

    let order = assign_order(&mut tree);

    debug!(
        nodes = order.len(),
        labels = labels.len(),
        references = targets.len(),
        pruned,
        "validated tree"
    );

    Ok(ValidatedTree {
        tree,
        order,
        labels,
        targets,
    })
}

/* === Edits === */

fn apply_edits(tree: &mut Tree, edits: &[Edit]) -> Result<(), ValidationError> {
    for edit in edits {
        let target = lookup(tree, edit.target()).ok_or_else(|| {
            error(
                ValidationErrorKind::UnresolvedReference(edit.target().to_string()),
                edit.position(),
            )
        })?;

        trace!("applying edit to {}", tree.path(target));

        match edit {
            Edit::Amend { node, .. } => merge(tree, *node, target),
            Edit::Delete { .. } => tree.detach(target),
            Edit::OmitIfNoRef { .. } => tree.node_mut(target).omit_if_no_ref = true,
        }
    }

    Ok(())
}

/// Resolves a reference against the live tree as it currently is.
fn lookup(tree: &Tree, reference: &Reference) -> Option<NodeId> {
    match reference {
        Reference::Label(label) => tree.find_label(label),
        Reference::Path(path) => tree.find_path(path),
    }
}

/// Merges the detached subtree rooted at `source` into `target`.
///
/// Recorded deletions are applied first, then labels and properties are added, overriding
/// properties of the same name. Children merge by name; the others are moved over.
fn merge(tree: &mut Tree, source: NodeId, target: NodeId) {
    let mut pending = vec![(source, target)];

    while let Some((source, target)) = pending.pop() {
        let node = tree.node_mut(source);
        let deletions = std::mem::take(&mut node.deletions);
        let labels = std::mem::take(&mut node.labels);
        let properties = std::mem::take(&mut node.properties);
        let children = std::mem::take(&mut node.children);
        let omit_if_no_ref = node.omit_if_no_ref;

        for deletion in deletions {
            match deletion {
                Deletion::Property(name) => {
                    tree.node_mut(target).properties.shift_remove(&name);
                }
                Deletion::Node(name) => {
                    if let Some(child) = tree.child_named(target, &name) {
                        tree.detach(child);
                    }
                }
            }
        }

        let node = tree.node_mut(target);
        for label in labels {
            if !node.labels.contains(&label) {
                node.labels.push(label);
            }
        }
        node.omit_if_no_ref |= omit_if_no_ref;
        node.properties.extend(properties);

        for child in children {
            let name = tree.node(child).name.clone();
            match tree.child_named(target, &name) {
                Some(existing) => pending.push((child, existing)),
                None => tree.attach(target, child),
            }
        }
    }
}

/* === Labels and references === */

fn collect_labels(tree: &Tree) -> Result<IndexMap<String, NodeId>, ValidationError> {
    let mut labels = IndexMap::new();

    for id in tree.live_nodes() {
        let node = tree.node(id);
        for label in &node.labels {
            match labels.entry(label.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(id);
                }
                Entry::Occupied(_) => {
                    return Err(error(
                        ValidationErrorKind::DuplicateLabel(label.clone()),
                        node.position,
                    ))
                }
            }
        }
    }

    Ok(labels)
}

fn resolve_references(
    tree: &Tree,
    labels: &IndexMap<String, NodeId>,
) -> Result<HashMap<Reference, NodeId>, ValidationError> {
    let mut targets = HashMap::new();

    for id in tree.live_nodes() {
        for property in tree.node(id).properties.values() {
            for reference in property.references() {
                if targets.contains_key(reference) {
                    continue;
                }

                let target = match reference {
                    Reference::Label(label) => labels.get(label).copied(),
                    Reference::Path(path) => tree.find_path(path),
                };
                let target = target.ok_or_else(|| {
                    error(
                        ValidationErrorKind::UnresolvedReference(reference.to_string()),
                        property.position,
                    )
                })?;

                targets.insert(reference.clone(), target);
            }
        }
    }

    Ok(targets)
}

/// Detaches every `/omit-if-no-ref/` node that no property references. Returns how many were
/// detached.
fn prune_unreferenced(tree: &mut Tree, targets: &HashMap<Reference, NodeId>) -> usize {
    let referenced: HashSet<NodeId> = targets.values().copied().collect();

    let unreferenced: Vec<NodeId> = tree
        .live_nodes()
        .filter(|id| tree.node(*id).omit_if_no_ref && !referenced.contains(id))
        .collect();

    for &id in &unreferenced {
        trace!("omitting unreferenced node {}", tree.path(id));
        tree.detach(id);
    }

    unreferenced.len()
}

/* === Property checks === */

fn check_node(tree: &Tree, id: NodeId) -> Result<(), ValidationError> {
    let node = tree.node(id);

    for property in node.properties.values() {
        let name = property.name.as_str();

        if property.is_flag() && VALUED_PROPERTIES.contains(&name) {
            return Err(error(
                ValidationErrorKind::EmptyRequiredProperty(property.name.clone()),
                property.position,
            ));
        }

        if STRING_PROPERTIES.contains(&name) && !property.is_string() {
            return Err(error(
                ValidationErrorKind::MistypedProperty(property.name.clone()),
                property.position,
            ));
        }

        if COUNT_PROPERTIES.contains(&name) && property.single_cell().is_none() {
            return Err(cell_count_error(property, "exactly one 32-bit cell".into()));
        }
    }

    let Some(parent) = node.parent.map(|parent| tree.node(parent)) else {
        return Ok(());
    };

    if let Some(reg) = node.property("reg") {
        let address = address_cells(parent);
        let size = size_cells(parent);
        let entry = address.saturating_add(size);

        if !fits_entries(reg.cell_count(), entry) {
            return Err(cell_count_error(
                reg,
                format!(
                    "a multiple of {entry} cells (#address-cells = {address}, \
                     #size-cells = {size} in the parent)"
                ),
            ));
        }
    }

    if let Some(ranges) = node.property("ranges").filter(|ranges| !ranges.is_empty()) {
        let child_address = address_cells(node);
        let parent_address = address_cells(parent);
        let child_size = size_cells(node);
        let entry = child_address
            .saturating_add(parent_address)
            .saturating_add(child_size);

        if !fits_entries(ranges.cell_count(), entry) {
            return Err(cell_count_error(
                ranges,
                format!(
                    "a multiple of {entry} cells (child address {child_address}, \
                     parent address {parent_address}, child size {child_size})"
                ),
            ));
        }
    }

    Ok(())
}

fn address_cells(node: &Node) -> u64 {
    node.property("#address-cells")
        .and_then(|p| p.single_cell())
        .unwrap_or(DEFAULT_ADDRESS_CELLS)
}

fn size_cells(node: &Node) -> u64 {
    node.property("#size-cells")
        .and_then(|p| p.single_cell())
        .unwrap_or(DEFAULT_SIZE_CELLS)
}

/// Whether `count` 32-bit cells form a whole number of `entry`-cell entries.
fn fits_entries(count: Option<usize>, entry: u64) -> bool {
    match count {
        Some(0) => true,
        Some(count) => entry != 0 && (count as u64) % entry == 0,
        None => false,
    }
}

fn cell_count_error(property: &Property, expected: String) -> ValidationError {
    error(
        ValidationErrorKind::InconsistentCellCount {
            property: property.name.clone(),
            expected,
        },
        property.position,
    )
}

/* === Ordering === */

fn assign_order(tree: &mut Tree) -> Vec<NodeId> {
    let order: Vec<NodeId> = tree
        .walk()
        .filter_map(|event| match event {
            Event::Enter(id) => Some(id),
            Event::Leave(_) => None,
        })
        .collect();

    for (index, &id) in order.iter().enumerate() {
        tree.node_mut(id).order = Some(index);
    }

    order
}

fn error(kind: ValidationErrorKind, position: Position) -> ValidationError {
    ValidationError { kind, position }
}

/* === Unit Tests === */
