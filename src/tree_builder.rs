use itertools::Itertools;
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    changeset::ChangeSet,
    class_mapping::{ClassMapping, Leader},
    merged_tree::MergedTree,
    multimap::MultiMap,
    pcs::{PCS, PCSNode, Revision},
    settings::DisplaySettings,
    structural::{ConflictKind, StructuralConflictHandler},
};

/// An internal structure to map a parent and a predecessor to the triples
/// that continue the child list from there.
struct SuccessorMap<'a> {
    multimap: FxHashMap<PCSNode<'a>, MultiMap<PCSNode<'a>, PCS<'a>>>,
    empty: MultiMap<PCSNode<'a>, PCS<'a>>,
}

impl<'a> SuccessorMap<'a> {
    fn new(changeset: &ChangeSet<'a>) -> Self {
        let mut parent_to_children: FxHashMap<PCSNode<'a>, MultiMap<PCSNode<'a>, PCS<'a>>> =
            FxHashMap::default();
        for pcs in changeset.iter() {
            let parent_map = parent_to_children.entry(pcs.parent).or_default();
            parent_map.insert(pcs.predecessor, *pcs);
        }
        Self {
            multimap: parent_to_children,
            empty: MultiMap::new(),
        }
    }

    fn get(&self, parent: &PCSNode<'a>) -> &MultiMap<PCSNode<'a>, PCS<'a>> {
        self.multimap.get(parent).unwrap_or(&self.empty)
    }
}

/// Keeps track of the nodes already emitted in the output, so that a node
/// scheduled as a child twice is detected as a move conflict.
#[derive(Debug, Default)]
struct VisitingState<'a> {
    used: FxHashSet<Leader<'a>>,
}

/// Algorithm to build back a tree from a cleaned-up changeset, holding the
/// associated static state.
pub(crate) struct TreeBuilder<'a, 'b> {
    // index the set of PCS triples by parent and predecessor
    merged_successors: SuccessorMap<'a>,
    changeset: &'b ChangeSet<'a>,
    class_mapping: &'b ClassMapping<'a>,
    settings: &'b DisplaySettings,
    handlers: Vec<Box<dyn StructuralConflictHandler>>,
}

impl<'a, 'b> TreeBuilder<'a, 'b> {
    /// Create a tree builder from the cleaned changeset, the class mapping
    /// and the structural conflict handlers (consulted in the given order).
    pub(crate) fn new(
        merged_changeset: &'b ChangeSet<'a>,
        class_mapping: &'b ClassMapping<'a>,
        settings: &'b DisplaySettings,
        handlers: Vec<Box<dyn StructuralConflictHandler>>,
    ) -> Self {
        Self {
            merged_successors: SuccessorMap::new(merged_changeset),
            changeset: merged_changeset,
            class_mapping,
            settings,
            handlers,
        }
    }

    /// Build the merged tree. An error here means that not even the virtual
    /// root's child list could be interpreted, in which case the caller
    /// falls back on line-based merging of the entire file.
    pub(crate) fn build_tree(&self) -> Result<MergedTree<'a>, String> {
        let mut state = VisitingState::default();
        self.build_subtree(PCSNode::VirtualRoot, &mut state)
    }

    /// Recursive function to build the merged subtree rooted in a PCS node.
    /// Any failure to interpret the child list of a real node degrades that
    /// node to a line-based merge; failures on virtual nodes propagate.
    fn build_subtree(
        &self,
        node: PCSNode<'a>,
        state: &mut VisitingState<'a>,
    ) -> Result<MergedTree<'a>, String> {
        match node {
            PCSNode::Node {
                node: leader,
                revisions,
            } => {
                if !state.used.insert(leader) {
                    return Err(format!("move conflict: {leader} scheduled as a child twice"));
                }
                // if the node has isomorphic subtrees in all revisions, that's very boring
                if revisions.is_full()
                    && self.class_mapping.is_isomorphic_in_all_revisions(&leader)
                {
                    return Ok(MergedTree::new_exact(
                        leader,
                        revisions,
                        self.class_mapping,
                    ));
                }
                match self.build_children(node, state) {
                    Ok(children) => Ok(MergedTree::new_mixed(leader, children)),
                    Err(err) => {
                        debug!("{leader}: falling back on line-based merging: {err}");
                        Ok(MergedTree::line_based_local_fallback_for_revnode(
                            leader,
                            self.class_mapping,
                            self.settings,
                        ))
                    }
                }
            }
            PCSNode::RoleNode { role, .. } => {
                // failures inside a role list are handled by the enclosing real node
                let children = self.build_children(node, state)?;
                Ok(MergedTree::RoleContainer { role, children })
            }
            PCSNode::VirtualRoot => {
                let children = self.build_children(node, state)?;
                children
                    .into_iter()
                    .exactly_one()
                    .map_err(|_| "the virtual root must have exactly one child".to_string())
            }
            PCSNode::LeftMarker | PCSNode::RightMarker => {
                Err("impossible to build a subtree for a list marker".to_string())
            }
        }
    }

    /// Walks the child list of a node by following successor triples from
    /// the start marker, turning structural conflicts into conflict elements
    /// (or resolving them through the registered handlers).
    fn build_children(
        &self,
        parent: PCSNode<'a>,
        state: &mut VisitingState<'a>,
    ) -> Result<Vec<MergedTree<'a>>, String> {
        let children_map = self.merged_successors.get(&parent);

        let mut children = Vec::new();
        let mut cursor = PCSNode::LeftMarker;
        let mut seen: FxHashSet<PCSNode<'a>> = FxHashSet::default();
        seen.insert(cursor);

        loop {
            let candidates = children_map.get(&cursor);
            match candidates.len() {
                0 => return Err(format!("no successor found for {cursor} under {parent}")),
                1 => {
                    let pcs = candidates
                        .iter()
                        .next()
                        .expect("a one-element set with no element?!");
                    let next = pcs.successor;
                    if next == PCSNode::RightMarker {
                        break;
                    }
                    if seen.contains(&next) {
                        return Err(format!("loop in the child list of {parent}"));
                    }
                    let child = self.build_subtree(next, state)?;
                    children.push(child);
                    seen.insert(next);
                    cursor = next;
                }
                2 => {
                    let (mut resolved, resume) = self.build_conflict(
                        parent,
                        candidates.iter().copied().collect_vec(),
                        children_map,
                        &mut seen,
                        state,
                    )?;
                    children.append(&mut resolved);
                    cursor = resume;
                }
                n => {
                    return Err(format!(
                        "unexpected conflict size under {parent}: {n} diverging successors"
                    ));
                }
            }
        }

        self.check_consumed(parent, children_map, &seen)?;
        Ok(children)
    }

    /// After walking a child list, every remaining inconsistency must have
    /// been consumed: an unvisited insertion, or the deletion of a subtree
    /// that the surviving side modified, makes the child list
    /// uninterpretable.
    fn check_consumed(
        &self,
        parent: PCSNode<'a>,
        children_map: &MultiMap<PCSNode<'a>, PCS<'a>>,
        seen: &FxHashSet<PCSNode<'a>>,
    ) -> Result<(), String> {
        for key in children_map.keys() {
            let PCSNode::Node {
                node: leader,
                revisions,
            } = *key
            else {
                continue;
            };
            if seen.contains(key) {
                continue;
            }
            if !revisions.contains(Revision::Base) {
                return Err(format!(
                    "dangling insertion under {parent}: {leader} was never visited"
                ));
            }
            // the node was deleted on one side; make sure the other side
            // did not modify it, otherwise the deletion is conflicting
            for revision in [Revision::Left, Revision::Right] {
                if !revisions.contains(revision) {
                    continue;
                }
                let base_node = self.class_mapping.node_at_rev(&leader, Revision::Base);
                let side_node = self.class_mapping.node_at_rev(&leader, revision);
                if let (Some(base_node), Some(side_node)) = (base_node, side_node)
                    && !base_node.isomorphic_to(side_node)
                {
                    return Err(format!(
                        "{leader} was deleted on one side but modified at {revision}"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Construct a conflict from the point where two successor triples
    /// diverge, by scanning both sides until their chains rejoin.
    /// Returns the merged elements covering the conflict and the node from
    /// which to resume the traversal.
    #[allow(clippy::type_complexity)]
    fn build_conflict(
        &self,
        parent: PCSNode<'a>,
        candidates: Vec<PCS<'a>>,
        children_map: &MultiMap<PCSNode<'a>, PCS<'a>>,
        seen: &mut FxHashSet<PCSNode<'a>>,
        state: &mut VisitingState<'a>,
    ) -> Result<(Vec<MergedTree<'a>>, PCSNode<'a>), String> {
        let left_start = candidates
            .iter()
            .find(|pcs| pcs.revision == Revision::Left)
            .copied()
            .ok_or("successor conflict without a left side")?;
        let right_start = candidates
            .iter()
            .find(|pcs| pcs.revision == Revision::Right)
            .copied()
            .ok_or("successor conflict without a right side")?;

        let (left_list, left_end) =
            self.conflict_side(left_start, Revision::Left, children_map, seen)?;
        let (right_list, right_end) =
            self.conflict_side(right_start, Revision::Right, children_map, seen)?;
        if left_end != right_end {
            return Err(format!(
                "conflict sides under {parent} do not rejoin at the same node: {left_end} vs {right_end}"
            ));
        }
        debug!(
            "successor conflict under {parent}: left [{}], right [{}]",
            left_list.iter().format(", "),
            right_list.iter().format(", ")
        );

        let resume = left_list
            .last()
            .or(right_list.last())
            .map(|leader| PCSNode::Node {
                revisions: self.class_mapping.revision_set(leader),
                node: *leader,
            })
            .ok_or("a successor conflict with two empty sides")?;

        for handler in &self.handlers {
            if let Some(resolution) = handler.try_resolve(
                &left_list,
                &right_list,
                ConflictKind::InsertInsert,
                self.class_mapping,
            ) {
                let mut built = Vec::new();
                for leader in resolution {
                    let pcs_node = PCSNode::Node {
                        revisions: self.class_mapping.revision_set(&leader),
                        node: leader,
                    };
                    built.push(self.build_subtree(pcs_node, state)?);
                }
                return Ok((built, resume));
            }
        }

        Ok((
            vec![MergedTree::Conflict {
                left: left_list,
                right: right_list,
            }],
            resume,
        ))
    }

    /// Extract one side of a conflict by iteratively following the
    /// successors of the given revision, until a predecessor conflict marks
    /// the point where the two chains rejoin.
    fn conflict_side(
        &self,
        start: PCS<'a>,
        revision: Revision,
        children_map: &MultiMap<PCSNode<'a>, PCS<'a>>,
        seen: &mut FxHashSet<PCSNode<'a>>,
    ) -> Result<(Vec<Leader<'a>>, PCSNode<'a>), String> {
        let mut list = Vec::new();
        let mut triple = start;
        loop {
            // a predecessor conflict recorded on this triple marks the point
            // where the other side's chain rejoins, on this triple's successor
            let closes_the_conflict = self
                .changeset
                .structural_conflicts_with(&triple)
                .iter()
                .any(|other| {
                    other.successor == triple.successor
                        && other.predecessor != triple.predecessor
                });
            if closes_the_conflict {
                return Ok((list, triple.successor));
            }
            let node = triple.successor;
            if node == PCSNode::RightMarker {
                return Err(format!(
                    "the {revision} side of a conflict ran to the end of the child list"
                ));
            }
            let Some(leader) = node.as_leader() else {
                return Err(format!("virtual node {node} inside a conflict side"));
            };
            if !seen.insert(node) {
                return Err(format!("loop while gathering the {revision} conflict side"));
            }
            list.push(leader);
            // a triple tagged with the base revision is also part of this
            // side's chain whenever the side preserved the base structure
            let successors = children_map.get(&node);
            triple = successors
                .iter()
                .find(|pcs| pcs.revision == revision)
                .or_else(|| {
                    successors
                        .iter()
                        .find(|pcs| pcs.revision == Revision::Base)
                })
                .copied()
                .ok_or_else(|| format!("no {revision} successor for {node}"))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        class_mapping::RevNode, matching::Matching, pcs::Revision,
        structural::default_handlers, test_utils::ctx,
    };

    use super::*;

    #[test]
    fn recover_exact_tree() {
        let ctx = ctx();

        let tree = ctx.module(vec![ctx.class("Foo", vec![ctx.field("x", "int")])]);

        // matched with itself in all three revisions, the tree is exact
        let mut identity = Matching::new();
        tree.root().dfs().for_each(|n| identity.add(n, n));
        let class_mapping =
            ClassMapping::from_matchings(&tree, &tree, &identity, &identity, &identity);

        let mut changeset = ChangeSet::new();
        changeset.add_tree(&tree, Revision::Base, &class_mapping);
        changeset.add_tree(&tree, Revision::Left, &class_mapping);
        changeset.add_tree(&tree, Revision::Right, &class_mapping);

        let settings = DisplaySettings::default();
        let builder =
            TreeBuilder::new(&changeset, &class_mapping, &settings, default_handlers());
        let result = builder.build_tree().expect("building the tree failed");

        assert_eq!(
            result,
            MergedTree::new_exact(
                class_mapping.map_to_leader(RevNode::new(Revision::Base, tree.root())),
                class_mapping.revision_set(
                    &class_mapping.map_to_leader(RevNode::new(Revision::Base, tree.root()))
                ),
                &class_mapping,
            )
        );
    }

    #[test]
    fn single_revision_tree_builds() {
        let ctx = ctx();

        let tree = ctx.module(vec![ctx.class("Foo", vec![])]);

        let class_mapping = ClassMapping::new();
        let mut changeset = ChangeSet::new();
        changeset.add_tree(&tree, Revision::Base, &class_mapping);

        let settings = DisplaySettings::default();
        let builder =
            TreeBuilder::new(&changeset, &class_mapping, &settings, default_handlers());
        let result = builder.build_tree().expect("building the tree failed");

        // a lone revision gives a mixed tree of base-only nodes
        match result {
            MergedTree::MixedTree { node, .. } => {
                assert_eq!(node.kind(), crate::tree::NodeKind::Module);
            }
            other => panic!("unexpected result tree: {other}"),
        }
    }
}
