use std::fmt::Display;
use std::hash::{Hash, Hasher};

use itertools::Itertools;

use crate::{
    class_mapping::{ClassMapping, Leader, RevisionNESet},
    line_based::{LineBasedMerge, line_based_merge},
    pcs::Revision,
    printer,
    roles::Role,
    settings::DisplaySettings,
};

/// A merged tree, which can contain a mixture of elements from the original
/// trees, structural conflicts, or subtrees approximated by line-based
/// merging when the PCS structure could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MergedTree<'a> {
    /// A subtree whose content is identical in all the revisions it belongs
    /// to, so that it can be copied verbatim from any of them.
    ExactTree {
        /// The subtree, represented as the [Leader] of its cluster
        node: Leader<'a>,
        /// The set of revisions from which the subtree may be copied
        revisions: RevisionNESet,
        /// A precomputed hash value to help with isomorphism detection.
        hash: u64,
    },
    /// A tree that contains a mixture of elements from various revisions.
    MixedTree {
        /// The root node of this tree, which corresponds to a node present in some of the original files
        node: Leader<'a>,
        /// The children of this root, which can be any sorts of merged trees themselves
        children: Vec<MergedTree<'a>>,
        /// A precomputed hash value to help with isomorphism detection.
        hash: u64,
    },
    /// The merged children of one role of an exploded node. Transparent in
    /// the output: its children are spliced into the enclosing node.
    RoleContainer {
        /// The role whose children are gathered here
        role: Role,
        children: Vec<MergedTree<'a>>,
    },
    /// A conflict which needs to be resolved manually by the user
    Conflict {
        /// The list of nodes in the left revision
        left: Vec<Leader<'a>>,
        /// The list of nodes in the right revision
        right: Vec<Leader<'a>>,
    },
    /// A part of the merged result which was obtained by running line-based
    /// merging on a part of the file. This happens when
    /// structured merging encounters an error of some sort.
    /// The result may or may not contain conflicts.
    LineBasedMerge {
        /// The syntactic node which corresponds to this part of the file
        node: Leader<'a>,
        /// The result of the line-based merging
        merge: LineBasedMerge,
    },
}

impl<'a> MergedTree<'a> {
    /// Creates a new exact tree, taking care of the pre-computation of the hash
    pub(crate) fn new_exact(
        node: Leader<'a>,
        revisions: RevisionNESet,
        class_mapping: &ClassMapping<'a>,
    ) -> Self {
        let representative = class_mapping
            .node_at_rev(&node, revisions.any())
            .expect("Revision set for ExactTree inconsistent with class mapping");
        Self::ExactTree {
            node,
            revisions,
            hash: representative.hash,
        }
    }

    /// Creates a new mixed tree, taking care of the pre-computation of the hash
    pub(crate) fn new_mixed(node: Leader<'a>, children: Vec<Self>) -> Self {
        let mut hasher = crate::fxhasher();
        node.kind().hash(&mut hasher);
        children
            .iter()
            .map(|child| match child {
                Self::ExactTree { hash, .. } | Self::MixedTree { hash, .. } => *hash,
                Self::Conflict { .. } => 1,
                Self::LineBasedMerge { .. } => 2,
                Self::RoleContainer { .. } => 3,
            })
            .collect_vec()
            .hash(&mut hasher);
        Self::MixedTree {
            node,
            children,
            hash: hasher.finish(),
        }
    }

    /// Generates a line-based merge for a node across multiple revisions,
    /// by pretty-printing each revision of the subtree and merging the
    /// resulting texts.
    pub(crate) fn line_based_local_fallback_for_revnode(
        node: Leader<'a>,
        class_mapping: &ClassMapping<'a>,
        settings: &DisplaySettings,
    ) -> Self {
        let base_src = class_mapping.node_at_rev(&node, Revision::Base);
        let left_src = class_mapping.node_at_rev(&node, Revision::Left);
        let right_src = class_mapping.node_at_rev(&node, Revision::Right);
        match (base_src, left_src, right_src) {
            (None, None, None) => {
                unreachable!("A node that does not belong to any revision, how curious!")
            }
            (_, Some(_), None) => Self::new_exact(
                node,
                RevisionNESet::singleton(Revision::Left),
                class_mapping,
            ),
            (_, None, Some(_)) => Self::new_exact(
                node,
                RevisionNESet::singleton(Revision::Right),
                class_mapping,
            ),
            (Some(_), None, None) => Self::new_exact(
                node,
                RevisionNESet::singleton(Revision::Base),
                class_mapping,
            ),
            (_, Some(left), Some(right)) if left.isomorphic_to(right) => Self::new_exact(
                node,
                RevisionNESet::singleton(Revision::Left).with(Revision::Right),
                class_mapping,
            ),
            (base, Some(left), Some(right)) => {
                let base_src = base.map(|base| printer::plain(base, "")).unwrap_or_default();
                let left_src = printer::plain(left, "");
                let right_src = printer::plain(right, "");
                let merge = line_based_merge(&base_src, &left_src, &right_src, settings);
                Self::LineBasedMerge { node, merge }
            }
        }
    }

    /// The number of conflicts in this merge
    pub fn count_conflicts(&self) -> usize {
        match self {
            Self::ExactTree { .. } => 0,
            Self::MixedTree { children, .. } | Self::RoleContainer { children, .. } => {
                children.iter().map(Self::count_conflicts).sum()
            }
            Self::Conflict { .. } => 1,
            Self::LineBasedMerge { merge, .. } => merge.conflict_count,
        }
    }

    /// The leader of the node this tree is rooted in, when there is one.
    pub(crate) fn leader(&self) -> Option<Leader<'a>> {
        match self {
            Self::ExactTree { node, .. }
            | Self::MixedTree { node, .. }
            | Self::LineBasedMerge { node, .. } => Some(*node),
            Self::RoleContainer { .. } | Self::Conflict { .. } => None,
        }
    }

    /// Debug print with indentation
    fn debug_print(&self, indentation: usize) -> String {
        let mut result = " ".repeat(indentation);
        let c = match self {
            Self::ExactTree {
                node, revisions, ..
            } => format!("Exact({node}{revisions})"),
            Self::MixedTree { node, children, .. } => {
                let children_printed = children
                    .iter()
                    .map(|c| c.debug_print(indentation + 2))
                    .format("\n");
                format!("Mixed({node}\n{children_printed}\n{result})")
            }
            Self::RoleContainer { role, children } => {
                let children_printed = children
                    .iter()
                    .map(|c| c.debug_print(indentation + 2))
                    .format("\n");
                format!("Role({role}\n{children_printed}\n{result})")
            }
            Self::Conflict { left, right } => {
                format!(
                    "Conflict(left: [{}], right: [{}])",
                    left.iter().format(", "),
                    right.iter().format(", ")
                )
            }
            Self::LineBasedMerge { node, .. } => format!("LineBasedConflict({node})"),
        };
        result.push_str(&c);
        result
    }
}

impl Display for MergedTree<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.debug_print(0))
    }
}

#[cfg(test)]
mod tests {
    use crate::{class_mapping::RevNode, test_utils::ctx};

    use super::*;

    #[test]
    fn fallback_prefers_exact_trees() {
        let ctx = ctx();

        let base = ctx.module(vec![ctx.class("Foo", vec![])]);
        let left = ctx.module(vec![ctx.class("Foo", vec![])]);

        let mut base_left = crate::matching::Matching::new();
        base_left.add(base.root(), left.root());
        let class_mapping = ClassMapping::from_matchings(
            &left,
            &left,
            &base_left,
            &crate::matching::Matching::new(),
            &crate::matching::Matching::new(),
        );

        let leader = class_mapping.map_to_leader(RevNode::new(Revision::Base, base.root()));
        let settings = DisplaySettings::default();
        let fallback =
            MergedTree::line_based_local_fallback_for_revnode(leader, &class_mapping, &settings);

        // base and left are present, right is absent: the left copy is used verbatim
        match fallback {
            MergedTree::ExactTree { revisions, .. } => {
                assert!(revisions.contains(Revision::Left));
            }
            other => panic!("unexpected fallback result: {other}"),
        }
    }

    #[test]
    fn fallback_merges_diverging_texts() {
        let ctx = ctx();

        let fields = |first: &str, last: &str| {
            vec![
                ctx.field("a", first),
                ctx.field("b", "int"),
                ctx.field("c", last),
            ]
        };
        let base = ctx.module(vec![ctx.class("Foo", fields("int", "int"))]);
        let left = ctx.module(vec![ctx.class("Foo", fields("long", "int"))]);
        let right = ctx.module(vec![ctx.class("Foo", fields("int", "long"))]);

        let mut base_left = crate::matching::Matching::new();
        base_left.add(base.root(), left.root());
        base_left.add(base.root().child(0).unwrap(), left.root().child(0).unwrap());
        let mut base_right = crate::matching::Matching::new();
        base_right.add(base.root(), right.root());
        base_right.add(base.root().child(0).unwrap(), right.root().child(0).unwrap());
        let class_mapping = ClassMapping::from_matchings(
            &left,
            &right,
            &base_left,
            &base_right,
            &crate::matching::Matching::new(),
        );

        let leader = class_mapping.map_to_leader(RevNode::new(Revision::Base, base.root()));
        let settings = DisplaySettings::default();
        let fallback =
            MergedTree::line_based_local_fallback_for_revnode(leader, &class_mapping, &settings);

        match fallback {
            MergedTree::LineBasedMerge { merge, .. } => {
                // the two edits touch lines far apart, so the textual merge is clean
                assert_eq!(merge.conflict_count, 0);
                assert!(merge.contents.contains("long a;"));
                assert!(merge.contents.contains("long c;"));
            }
            other => panic!("unexpected fallback result: {other}"),
        }
    }

    #[test]
    fn conflict_counting() {
        let ctx = ctx();
        let tree = ctx.module(vec![ctx.class("Foo", vec![])]);
        let class_mapping = ClassMapping::new();
        let leader =
            class_mapping.map_to_leader(RevNode::new(Revision::Base, tree.root()));

        let conflict = MergedTree::Conflict {
            left: vec![],
            right: vec![],
        };
        let mixed = MergedTree::new_mixed(
            leader,
            vec![
                conflict,
                MergedTree::new_exact(
                    class_mapping.map_to_leader(RevNode::new(
                        Revision::Base,
                        tree.root().child(0).unwrap(),
                    )),
                    RevisionNESet::singleton(Revision::Base),
                    &class_mapping,
                ),
            ],
        );
        assert_eq!(mixed.count_conflicts(), 1);
    }
}
