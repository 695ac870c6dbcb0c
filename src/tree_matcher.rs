use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    matching::{Matching, is_admissible},
    roles::{AttrValue, Role},
    tree::{Ast, AstNode, NodeKind},
};

/// Produces a matching between the nodes of two trees.
///
/// The merge engine consumes matchers opaquely: any tree-diff algorithm can
/// be plugged in, as long as it only pairs nodes of the same kind.
pub trait TreeMatcher {
    fn match_trees<'a>(&self, src: &Ast<'a>, dst: &Ast<'a>) -> Matching<'a>;
}

/// A simple top-down matcher, pairing children by a `(kind, role, label)`
/// key when the key is unambiguous on both sides.
///
/// Isomorphic subtrees are matched wholesale. In its primary configuration,
/// leftover children of the same kind and role are additionally aligned
/// positionally, which catches renames: a renamed element which is the only
/// leftover of its kind on each side still gets paired. The auxiliary
/// configuration skips that pass, which makes it suitable for relating the
/// left and right revisions to each other: only elements that keep their
/// identity are equated, never coincidental neighbors.
#[derive(Debug, Clone, Copy)]
pub struct KeyedMatcher {
    /// Whether leftover children of the same kind and role are aligned
    /// positionally.
    pub align_leftovers: bool,
}

impl KeyedMatcher {
    /// The configuration for matching the base revision against a side.
    pub fn primary() -> Self {
        Self {
            align_leftovers: true,
        }
    }

    /// The stricter configuration for matching the two sides to each other.
    pub fn auxiliary() -> Self {
        Self {
            align_leftovers: false,
        }
    }
}

type ChildKey = (NodeKind, Option<Role>, Option<String>);

impl TreeMatcher for KeyedMatcher {
    fn match_trees<'a>(&self, src: &Ast<'a>, dst: &Ast<'a>) -> Matching<'a> {
        let mut matching = Matching::new();
        if is_admissible(src.root(), dst.root()) {
            self.match_pair(src.root(), dst.root(), &mut matching);
        }
        matching
    }
}

impl KeyedMatcher {
    fn key(node: &AstNode<'_>) -> ChildKey {
        let label = node
            .name()
            .map(str::to_owned)
            .or_else(|| {
                node.attr(Role::Value)
                    .and_then(AttrValue::as_str)
                    .map(str::to_owned)
            });
        (node.kind, node.role, label)
    }

    fn match_pair<'a>(&self, a: &'a AstNode<'a>, b: &'a AstNode<'a>, matching: &mut Matching<'a>) {
        matching.add(a, b);
        if a.isomorphic_to(b) {
            for (src_descendant, dst_descendant) in a.dfs().zip(b.dfs()) {
                matching.add(src_descendant, dst_descendant);
            }
            return;
        }

        let mut src_groups: FxHashMap<ChildKey, Vec<&'a AstNode<'a>>> = FxHashMap::default();
        for child in &a.children {
            src_groups.entry(Self::key(child)).or_default().push(child);
        }
        let mut dst_groups: FxHashMap<ChildKey, Vec<&'a AstNode<'a>>> = FxHashMap::default();
        for child in &b.children {
            dst_groups.entry(Self::key(child)).or_default().push(child);
        }

        let mut pairs: Vec<(&'a AstNode<'a>, &'a AstNode<'a>)> = Vec::new();
        let mut matched_src: FxHashSet<usize> = FxHashSet::default();
        let mut matched_dst: FxHashSet<usize> = FxHashSet::default();

        // first pass: pair children whose key is unambiguous on both sides
        for child in a.children.iter().copied() {
            let key = Self::key(child);
            let src_candidates = &src_groups[&key];
            let dst_candidates = dst_groups.get(&key);
            if let (1, Some(&[dst_child])) =
                (src_candidates.len(), dst_candidates.map(Vec::as_slice))
                && is_admissible(child, dst_child)
            {
                pairs.push((child, dst_child));
                matched_src.insert(child.id);
                matched_dst.insert(dst_child.id);
            }
        }

        // second pass: align the leftovers of each (kind, role) positionally
        if self.align_leftovers {
            let mut dst_leftovers: FxHashMap<(NodeKind, Option<Role>), VecDeque<&'a AstNode<'a>>> =
                FxHashMap::default();
            for child in b.children.iter().copied() {
                if !matched_dst.contains(&child.id) {
                    dst_leftovers
                        .entry((child.kind, child.role))
                        .or_default()
                        .push_back(child);
                }
            }
            for child in a.children.iter().copied() {
                if matched_src.contains(&child.id) {
                    continue;
                }
                let Some(candidates) = dst_leftovers.get_mut(&(child.kind, child.role)) else {
                    continue;
                };
                if let Some(dst_child) = candidates.pop_front()
                    && is_admissible(child, dst_child)
                {
                    pairs.push((child, dst_child));
                }
            }
        }

        for (src_child, dst_child) in pairs {
            self.match_pair(src_child, dst_child, matching);
        }
    }
}
