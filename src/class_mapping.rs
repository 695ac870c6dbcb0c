use std::{fmt::Display, hash::Hash, iter, ops::Deref};

use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::{
    matching::Matching,
    pcs::Revision,
    tree::{Ast, AstNode, NodeKind},
};

/// A node together with a marker of which revision it came from.
#[derive(Debug, Copy, Clone, Eq)]
pub struct RevNode<'a> {
    pub rev: Revision,
    pub node: &'a AstNode<'a>,
}

/// A node at a revision, which happens to be the leader of its class
/// in a class-mapping.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Leader<'a>(RevNode<'a>);

impl PartialEq for RevNode<'_> {
    fn eq(&self, other: &Self) -> bool {
        // because we know the nodes are from the same revision, it's safe to compare them just by their ids
        self.rev == other.rev && self.node.id == other.node.id
    }
}

impl Hash for RevNode<'_> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.rev.hash(state);
        self.node.id.hash(state);
    }
}

impl<'a> RevNode<'a> {
    pub fn new(rev: Revision, node: &'a AstNode<'a>) -> Self {
        Self { rev, node }
    }

    /// Whether the subtree rooted at this node contains another node (up to class mapping).
    pub fn contains(&self, other: &Leader<'a>, class_mapping: &ClassMapping<'a>) -> bool {
        self.node.dfs().any(|descendant| {
            class_mapping.map_to_leader(RevNode::new(self.rev, descendant)) == *other
        })
    }
}

impl<'a> Leader<'a> {
    /// Returns the leader as one of the class representatives.
    /// Uses of this method are generally suspicious, because this is an arbitrary choice
    /// of class representative. It is preferable to choose the representative based on
    /// the revision it belongs to.
    pub fn as_representative(&self) -> RevNode<'a> {
        self.0
    }

    /// The kind of this node, which is guaranteed to be the same for all
    /// representatives of this leader (the matching filters enforce it).
    pub fn kind(&self) -> NodeKind {
        self.0.node.kind
    }

    /// A deterministic ordering key, for debug listings.
    pub(crate) fn sort_key(&self) -> (Revision, usize) {
        (self.0.rev, self.0.node.id)
    }

    /// Wraps a node into a single-element class, bypassing any mapping.
    #[cfg(test)]
    pub(crate) fn for_test(rev: Revision, node: &'a AstNode<'a>) -> Self {
        Self(RevNode::new(rev, node))
    }
}

impl Display for RevNode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.node, self.rev)
    }
}

impl Display for Leader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Creates classes of nodes across the three revisions so that they can be
/// equated when converting the corresponding trees to PCS, following the
/// 3DM merge algorithm.
///
/// The invariants are:
/// * every base node is the leader of its own class;
/// * a left or right node matched (directly or transitively) to a base node
///   belongs to that base node's class;
/// * a left node matched to no base node leads its own class, and a right
///   node matched to such a left node joins the left node's class only when
///   the parents of both nodes already belong to the same class. This keeps
///   coincidentally-identical subtrees added under unrelated parents apart.
#[derive(Debug, Default)]
pub struct ClassMapping<'a> {
    map: FxHashMap<RevNode<'a>, Leader<'a>>,
    representatives: FxHashMap<Leader<'a>, FxHashMap<Revision, RevNode<'a>>>,
    empty_repr: FxHashMap<Revision, RevNode<'a>>, // stays empty (only there for ownership purposes)
}

impl<'a> ClassMapping<'a> {
    /// Creates an empty class mapping, in which every node leads its own class.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the class mapping from the three pairwise matchings.
    /// The matchings are oriented with the base revision (resp. the left
    /// revision for `left_right`) on the left-hand side of the relation.
    pub fn from_matchings(
        left: &Ast<'a>,
        right: &Ast<'a>,
        base_left: &Matching<'a>,
        base_right: &Matching<'a>,
        left_right: &Matching<'a>,
    ) -> Self {
        let mut result = Self::new();

        for left_node in left.dfs() {
            if let Some(base_node) = base_left.get_from_right(left_node) {
                let leader = Leader(RevNode::new(Revision::Base, base_node));
                result.register(leader, RevNode::new(Revision::Base, base_node));
                result.register(leader, RevNode::new(Revision::Left, left_node));
            }
        }
        for right_node in right.dfs() {
            if let Some(base_node) = base_right.get_from_right(right_node) {
                let leader = Leader(RevNode::new(Revision::Base, base_node));
                result.register(leader, RevNode::new(Revision::Base, base_node));
                result.register(leader, RevNode::new(Revision::Right, right_node));
            }
        }

        // Augmentation pass: equate nodes added identically on both sides.
        // The top-down traversal order guarantees that matches propagate
        // from enclosing declarations into their bodies.
        for left_node in left.dfs() {
            let left_rev_node = RevNode::new(Revision::Left, left_node);
            if result.map.contains_key(&left_rev_node) {
                continue;
            }
            let Some(right_node) = left_right.get_from_left(left_node) else {
                continue;
            };
            let right_rev_node = RevNode::new(Revision::Right, right_node);
            if result.map.contains_key(&right_rev_node) {
                continue;
            }
            let parents_agree = match (left_node.parent(), right_node.parent()) {
                (None, None) => true,
                (Some(left_parent), Some(right_parent)) => {
                    result.map_to_leader(RevNode::new(Revision::Left, left_parent))
                        == result.map_to_leader(RevNode::new(Revision::Right, right_parent))
                }
                _ => false,
            };
            if parents_agree {
                let leader = Leader(left_rev_node);
                result.register(leader, left_rev_node);
                result.register(leader, right_rev_node);
            }
        }

        result
    }

    fn register(&mut self, leader: Leader<'a>, rev_node: RevNode<'a>) {
        if Leader(rev_node) != leader {
            self.map.insert(rev_node, leader);
        }
        self.representatives
            .entry(leader)
            .or_default()
            .insert(rev_node.rev, rev_node);
    }

    /// Maps a node from some revision to its class representative
    pub fn map_to_leader(&self, rev_node: RevNode<'a>) -> Leader<'a> {
        self.map.get(&rev_node).copied().unwrap_or(Leader(rev_node))
    }

    /// Finds all the representatives in a cluster designated by its leader.
    /// This can return an empty map if the cluster only contains this node!
    fn internal_representatives(&self, leader: &Leader<'a>) -> &FxHashMap<Revision, RevNode<'a>> {
        self.representatives.get(leader).unwrap_or(&self.empty_repr)
    }

    /// The set of revisions for which we have a representative for this leader
    pub fn revision_set(&self, leader: &Leader<'a>) -> RevisionNESet {
        let mut set = RevisionNESet::singleton(leader.0.rev);
        self.internal_representatives(leader)
            .keys()
            .for_each(|k| set.add(*k));
        set
    }

    /// The set of representatives for this leader
    pub fn representatives(&self, leader: &Leader<'a>) -> Vec<RevNode<'a>> {
        let mut vec = self
            .internal_representatives(leader)
            .values()
            .copied()
            .collect_vec();
        if vec.is_empty() {
            vec.push(leader.as_representative());
        }
        vec
    }

    /// The AST node corresponding to this leader at a given revision
    pub fn node_at_rev(
        &self,
        leader: &Leader<'a>,
        picked_revision: Revision,
    ) -> Option<&'a AstNode<'a>> {
        if leader.0.rev == picked_revision {
            Some(leader.0.node)
        } else {
            self.internal_representatives(leader)
                .get(&picked_revision)
                .map(|rn| rn.node)
        }
    }

    /// Are the representatives of this leader present and isomorphic in all
    /// three revisions? In this case, there is nothing to merge below it.
    pub fn is_isomorphic_in_all_revisions(&self, leader: &Leader<'a>) -> bool {
        let Some(base) = self.node_at_rev(leader, Revision::Base) else {
            return false;
        };
        let Some(left) = self.node_at_rev(leader, Revision::Left) else {
            return false;
        };
        let Some(right) = self.node_at_rev(leader, Revision::Right) else {
            return false;
        };
        base.isomorphic_to(left) && base.isomorphic_to(right)
    }
}

/// A set of [Revision]s
#[derive(Debug, PartialEq, Eq, Copy, Clone, PartialOrd, Ord, Hash)]
pub struct RevisionSet {
    base: bool,
    left: bool,
    right: bool,
}

impl RevisionSet {
    /// A set containing no revision
    pub fn new() -> Self {
        Self {
            base: false,
            left: false,
            right: false,
        }
    }

    /// Adds a revision to the set by modifying it
    pub fn add(&mut self, revision: Revision) {
        self.set(revision, true);
    }

    /// Adds a revision to the set by taking ownership
    pub fn with(mut self, revision: Revision) -> Self {
        self.add(revision);
        self
    }

    /// Removes a revision from this set
    pub fn remove(&mut self, revision: Revision) {
        self.set(revision, false);
    }

    /// Sets whether the revision belongs to the set
    pub fn set(&mut self, revision: Revision, presence: bool) {
        match revision {
            Revision::Base => self.base = presence,
            Revision::Left => self.left = presence,
            Revision::Right => self.right = presence,
        }
    }

    /// Does this set of revisions contain the given revision?
    pub fn contains(self, revision: Revision) -> bool {
        match revision {
            Revision::Base => self.base,
            Revision::Left => self.left,
            Revision::Right => self.right,
        }
    }

    /// Set intersection
    pub fn intersection(self, other: Self) -> Self {
        Self {
            base: self.base && other.base,
            left: self.left && other.left,
            right: self.right && other.right,
        }
    }

    /// Returns any revision contained in the set,
    /// by order of preference Left -> Right -> Base
    pub fn any(self) -> Option<Revision> {
        self.iter().next()
    }

    pub fn is_empty(self) -> bool {
        !(self.base || self.left || self.right)
    }

    /// Checked version of `is_empty`
    pub fn as_nonempty(self) -> Option<RevisionNESet> {
        if self.is_empty() {
            None
        } else {
            Some(RevisionNESet(self))
        }
    }

    pub fn is_full(self) -> bool {
        self.base && self.left && self.right
    }

    /// Iterates on the revisions contained in this set (returned in decreasing priority)
    pub fn iter(self) -> impl Iterator<Item = Revision> {
        iter::empty()
            .chain(self.left.then_some(Revision::Left))
            .chain(self.right.then_some(Revision::Right))
            .chain(self.base.then_some(Revision::Base))
    }
}

impl Default for RevisionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RevisionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "/{}{}{}/",
            if self.base { "B" } else { "." },
            if self.left { "L" } else { "." },
            if self.right { "R" } else { "." }
        )
    }
}

/// A non-empty [`RevisionSet`]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RevisionNESet(RevisionSet);

// do NOT implement `DerefMut` as well, since that would allow removing revisions, resulting in a
// possibly-no-longer-non-empty revision set
impl Deref for RevisionNESet {
    type Target = RevisionSet;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl RevisionNESet {
    /// Forget non-emptiness
    pub fn set(self) -> RevisionSet {
        self.0
    }

    /// A set containing a single revision
    pub fn singleton(revision: Revision) -> Self {
        let mut revisions = RevisionSet::new();
        revisions.add(revision);
        Self(revisions)
    }

    /// Adds a revision to the set by modifying it
    pub fn add(&mut self, revision: Revision) {
        self.0.add(revision);
    }

    /// Adds a revision to the set by taking ownership
    pub fn with(self, revision: Revision) -> Self {
        Self(self.0.with(revision))
    }

    /// Returns any revision contained in the set,
    /// by order of preference Left -> Right -> Base
    pub fn any(self) -> Revision {
        self.0
            .any()
            .expect("RevisionNonEmptySet is actually empty, oops")
    }
}

impl Display for RevisionNESet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
