use std::{cmp::Ordering, fmt::Display, hash::Hash};

use crate::{
    class_mapping::{Leader, RevisionNESet},
    roles::Role,
};

/// One of the three sides to be merged
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Copy, Clone, Ord)]
pub enum Revision {
    Base,
    Left,
    Right,
}

/// A component of a [PCS] triple.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PCSNode<'a> {
    /// A virtual marker corresponding to the root of the document, denoted by `⊥`
    VirtualRoot,
    /// A sentinel marking the start of a list of children, denoted by `⊣`
    LeftMarker,
    /// A virtual intermediary separating the children of an exploded node
    /// by the role they fill in it, so that sibling lists of different roles
    /// are never mixed by the merge
    RoleNode {
        /// The (leader of the) exploded node this role list belongs to
        parent: Leader<'a>,
        /// The child role gathered under this virtual node
        role: Role,
    },
    /// An actual node from the syntax trees to merge
    Node {
        /// The set of revisions in which this node is present
        revisions: RevisionNESet,
        /// The leader of its class in the class mapping
        node: Leader<'a>,
    },
    /// A sentinel marking the end of a list of children, denoted by `⊢`
    RightMarker,
}

impl<'a> PCSNode<'a> {
    /// The class leader underneath, for real nodes only.
    pub fn as_leader(self) -> Option<Leader<'a>> {
        match self {
            Self::Node { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Whether this is a virtual node (root, list edge or role node)
    pub fn is_virtual(self) -> bool {
        !matches!(self, Self::Node { .. })
    }
}

/// A PCS triple, encoding a part of the structure of a tree.
/// It records that:
/// * the `parent` node is the parent of both `predecessor` and `successor`
/// * the `predecessor` appears immediately before `successor` in the list of children of `parent`
///
/// The PCS triple also records in which revision this fact holds.
/// To encode that a given node is the first child of its parent, we use [`PCSNode::LeftMarker`] as
/// predecessor, and similarly [`PCSNode::RightMarker`] is used as successor to encode the last child.
/// The actual root of the tree is encoded by marking it as root of the [`PCSNode::VirtualRoot`].
#[derive(Debug, Copy, Clone, PartialOrd, Ord)]
#[allow(clippy::upper_case_acronyms)]
pub struct PCS<'a> {
    /// The common parent of both the predecessor and successor
    pub parent: PCSNode<'a>,
    pub predecessor: PCSNode<'a>,
    pub successor: PCSNode<'a>,
    pub revision: Revision,
}

impl<'a> PartialEq for PCS<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.parent == other.parent
            && self.predecessor == other.predecessor
            && self.successor == other.successor
    }
}

impl<'a> Eq for PCS<'a> {}

impl<'a> Hash for PCS<'a> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.parent.hash(state);
        self.predecessor.hash(state);
        self.successor.hash(state);
    }
}

impl<'a> Display for PCSNode<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VirtualRoot => write!(f, "⊥"),
            Self::LeftMarker => write!(f, "⊣"),
            Self::RoleNode { parent, role } => write!(f, "{parent}·{role}"),
            Self::Node { node, .. } => write!(f, "{node}"),
            Self::RightMarker => write!(f, "⊢"),
        }
    }
}

// only useful to list a changeset in a sort of meaningful way for debugging purposes
impl<'a> Ord for PCSNode<'a> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn rank(node: &PCSNode) -> u8 {
            match node {
                PCSNode::VirtualRoot => 0,
                PCSNode::LeftMarker => 1,
                PCSNode::RoleNode { .. } => 2,
                PCSNode::Node { .. } => 3,
                PCSNode::RightMarker => 4,
            }
        }
        match (self, other) {
            (
                Self::RoleNode { parent: p1, role: r1 },
                Self::RoleNode { parent: p2, role: r2 },
            ) => Ord::cmp(&(p1.sort_key(), r1), &(p2.sort_key(), r2)),
            (Self::Node { node: n1, .. }, Self::Node { node: n2, .. }) => {
                Ord::cmp(&n1.sort_key(), &n2.sort_key())
            }
            _ => Ord::cmp(&rank(self), &rank(other)),
        }
    }
}

impl<'a> PartialOrd for PCSNode<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(Ord::cmp(self, other))
    }
}

impl Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Base => "Base",
            Self::Left => "Left",
            Self::Right => "Right",
        })
    }
}

impl<'a> Display for PCS<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.parent, self.predecessor, self.successor, self.revision
        )
    }
}
