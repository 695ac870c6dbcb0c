use rustc_hash::FxHashMap;

use crate::{
    roles::Role,
    tree::{AstNode, NodeKind},
};

/// A one-to-one relation between nodes of two trees.
///
/// By convention the "left" tree is the source given to the matcher and the
/// "right" tree its destination; for the `base ↔ left` matching of a merge,
/// the base tree is on the left-hand side of the relation.
#[derive(Debug, Default, Clone)]
pub struct Matching<'tree> {
    left_to_right: FxHashMap<&'tree AstNode<'tree>, &'tree AstNode<'tree>>,
    right_to_left: FxHashMap<&'tree AstNode<'tree>, &'tree AstNode<'tree>>,
}

/// Whether a pair of nodes may be identified across revisions at all.
///
/// Matchers are external and treated as untrusted on this point: pairs
/// across incompatible kinds, across primitive and non-primitive type
/// references, or where only one side sits in an annotation-value position
/// are discarded. This node model wraps no syntax in helper nodes, so the
/// only non-syntax kind a matcher can encounter is the conflict placeholder
/// of a previously merged output; pairs involving one are rejected as
/// noise.
pub fn is_admissible(from: &AstNode<'_>, to: &AstNode<'_>) -> bool {
    from.kind == to.kind
        && from.kind != NodeKind::Conflict
        && from.attr(Role::IsPrimitive) == to.attr(Role::IsPrimitive)
        && ((from.role == Some(Role::AnnotationValue)) == (to.role == Some(Role::AnnotationValue)))
}

impl<'tree> Matching<'tree> {
    /// Creates an empty matching.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the match associated with a node from the left hand tree
    pub fn get_from_left(&self, from: &'tree AstNode<'tree>) -> Option<&'tree AstNode<'tree>> {
        self.left_to_right.get(from).copied()
    }

    /// Gets the match associated with a node from the right hand tree
    pub fn get_from_right(&self, from: &'tree AstNode<'tree>) -> Option<&'tree AstNode<'tree>> {
        self.right_to_left.get(from).copied()
    }

    /// Does the matching contain this pair?
    pub fn are_matched(&self, from: &'tree AstNode<'tree>, to: &AstNode<'tree>) -> bool {
        self.get_from_left(from) == Some(to)
    }

    /// Is it possible to add this pair while keeping the matching consistent?
    pub fn can_be_matched(&self, from: &AstNode<'tree>, to: &AstNode<'tree>) -> bool {
        is_admissible(from, to)
            && !self.left_to_right.contains_key(from)
            && !self.right_to_left.contains_key(to)
    }

    /// Adds a match between two nodes (in both directions)
    pub fn add(&mut self, from: &'tree AstNode<'tree>, to: &'tree AstNode<'tree>) {
        self.remove(from, to);
        self.left_to_right.insert(from, to);
        self.right_to_left.insert(to, from);
    }

    /// Removes matches involving both elements (in both directions)
    pub fn remove(&mut self, from: &'tree AstNode<'tree>, to: &'tree AstNode<'tree>) {
        if let Some(other_right) = self.left_to_right.get(from) {
            self.right_to_left.remove(other_right);
            self.left_to_right.remove(from);
        }
        if let Some(other_left) = self.right_to_left.get(to) {
            self.left_to_right.remove(other_left);
            self.right_to_left.remove(to);
        }
    }

    /// Removes any match involving this node, on either side of the relation.
    /// Used to prune matchings that turned out to cause root conflicts.
    pub fn remove_involving(&mut self, node: &'tree AstNode<'tree>) {
        if let Some(right) = self.left_to_right.remove(node) {
            self.right_to_left.remove(right);
        }
        if let Some(left) = self.right_to_left.remove(node) {
            self.left_to_right.remove(left);
        }
    }

    /// Adds an entire other matching
    pub fn add_matching(&mut self, other: &Matching<'tree>) {
        for (right, left) in other.iter_right_to_left() {
            self.add(left, right);
        }
    }

    /// Number of matched nodes
    pub fn len(&self) -> usize {
        self.left_to_right.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left_to_right.is_empty()
    }

    /// Reverse the direction of the matching
    pub fn into_reversed(self) -> Matching<'tree> {
        Matching {
            left_to_right: self.right_to_left,
            right_to_left: self.left_to_right,
        }
    }

    /// Iterate over the matches, from right to left
    pub fn iter_right_to_left(
        &self,
    ) -> impl Iterator<Item = (&&'tree AstNode<'tree>, &&'tree AstNode<'tree>)> {
        self.right_to_left.iter()
    }

    /// Drops any pair that should not have been produced by the matcher
    /// in the first place (see [is_admissible]).
    pub fn retain_admissible(&mut self) {
        self.left_to_right
            .retain(|from, to| is_admissible(from, to));
        self.right_to_left
            .retain(|to, from| is_admissible(from, to));
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::ctx;

    use super::*;

    #[test]
    fn retrieve_match() {
        let ctx = ctx();

        let tree = ctx.module(vec![ctx.class("Foo", vec![])]);
        let tree2 = ctx.module(vec![ctx.class("Bar", vec![])]);

        let mut matching = Matching::new();
        assert_eq!(matching.len(), 0);

        matching.add(tree.root(), tree2.root());
        assert_eq!(matching.len(), 1);
        assert!(matching.are_matched(tree.root(), tree2.root()));
        assert_eq!(matching.get_from_right(tree2.root()), Some(tree.root()));
    }

    #[test]
    fn remove_previously_matched() {
        let ctx = ctx();

        let tree1 = ctx.module(vec![ctx.class("A", vec![])]);
        let tree2 = ctx.module(vec![ctx.class("A", vec![]), ctx.class("B", vec![])]);

        let class1 = tree1.root().child(0).unwrap();
        let class2a = tree2.root().child(0).unwrap();
        let class2b = tree2.root().child(1).unwrap();

        let mut matching = Matching::new();
        matching.add(class1, class2a);
        matching.add(class1, class2b);

        assert_eq!(matching.get_from_left(class1), Some(class2b));
        assert_eq!(matching.get_from_right(class2a), None);

        matching.remove_involving(class1);
        assert_eq!(matching.get_from_left(class1), None);
        assert_eq!(matching.get_from_right(class2b), None);
        assert!(matching.is_empty());
    }

    #[test]
    fn admissibility() {
        let ctx = ctx();

        let tree1 = ctx.module(vec![ctx.class("A", vec![ctx.field("x", "int")])]);
        let tree2 = ctx.module(vec![ctx.class("A", vec![ctx.field("x", "int")])]);

        let class1 = tree1.root().child(0).unwrap();
        let class2 = tree2.root().child(0).unwrap();
        let field2 = class2.child(0).unwrap();

        assert!(is_admissible(class1, class2));
        // kind mismatch
        assert!(!is_admissible(class1, field2));
    }
}
