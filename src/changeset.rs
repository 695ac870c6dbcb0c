use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use itertools::Itertools;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    class_mapping::{ClassMapping, Leader, RevNode},
    multimap::MultiMap,
    pcs::{PCS, PCSNode, Revision},
    roles::RoledValues,
    tree::{Ast, AstNode},
};

/// The scalar content of a node as observed in one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    pub revision: Revision,
    pub values: RoledValues,
}

/// A set of [PCS] triples rewritten through the class mapping, with indices
/// on all three components for easier retrieval, together with the per-node
/// content observed in each revision and the structural conflicts recorded
/// while cleaning the set up.
///
/// Triple equality ignores the revision, so the first insertion of a triple
/// wins: a triple present in the base keeps its `Base` tag even when left
/// or right preserve the same structure.
#[derive(Debug, Default)]
pub struct ChangeSet<'a> {
    /// all triples ever added, in insertion order
    triples: Vec<PCS<'a>>,
    /// the triples currently in the set
    present: FxHashSet<PCS<'a>>,
    successors: MultiMap<PCSNode<'a>, PCS<'a>>,
    predecessors: MultiMap<PCSNode<'a>, PCS<'a>>,
    content: FxHashMap<Leader<'a>, Vec<ContentEntry>>,
    structural_conflicts: MultiMap<PCS<'a>, PCS<'a>>,
}

impl<'a> ChangeSet<'a> {
    /// Constructs an empty instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the PCS triples that encode a tree, rewritten through the class
    /// mapping.
    pub fn add_tree(
        &mut self,
        tree: &Ast<'a>,
        revision: Revision,
        classmapping: &ClassMapping<'a>,
    ) {
        let root = self.add_node_recursively(
            tree.root(),
            PCSNode::VirtualRoot,
            PCSNode::LeftMarker,
            revision,
            classmapping,
        );
        self.add(PCS {
            parent: PCSNode::VirtualRoot,
            predecessor: root,
            successor: PCSNode::RightMarker,
            revision,
        });
    }

    fn add_node_recursively(
        &mut self,
        node: &'a AstNode<'a>,
        parent: PCSNode<'a>,
        predecessor: PCSNode<'a>,
        revision: Revision,
        classmapping: &ClassMapping<'a>,
    ) -> PCSNode<'a> {
        let rev_node = RevNode::new(revision, node);
        let leader = classmapping.map_to_leader(rev_node);
        let mut revision_set = classmapping.revision_set(&leader);
        revision_set.add(revision); // just in case the node hadn't been mapped at all before

        let wrapped = PCSNode::Node {
            node: leader,
            revisions: revision_set,
        };

        self.add(PCS {
            parent,
            predecessor,
            successor: wrapped,
            revision,
        });
        self.record_content(leader, revision, node);

        // If the node happens to be a cluster where all three revisions are present and isomorphic,
        // then no need to convert its subtree into PCS triples, we can just pretend it's a leaf
        if classmapping.is_isomorphic_in_all_revisions(&leader) {
            return wrapped;
        }

        if node.kind.is_exploded() {
            // the children of significant roles are gathered under one
            // virtual role node each, so that sibling lists of different
            // roles are never merged into one
            let significant = node.kind.exploded_roles();
            let mut current_predecessor = PCSNode::LeftMarker;
            for role in significant {
                let role_node = PCSNode::RoleNode {
                    parent: leader,
                    role: *role,
                };
                self.add(PCS {
                    parent: wrapped,
                    predecessor: current_predecessor,
                    successor: role_node,
                    revision,
                });
                let mut inner_predecessor = PCSNode::LeftMarker;
                for child in node.children_with_role(*role) {
                    inner_predecessor = self.add_node_recursively(
                        child,
                        role_node,
                        inner_predecessor,
                        revision,
                        classmapping,
                    );
                }
                self.add(PCS {
                    parent: role_node,
                    predecessor: inner_predecessor,
                    successor: PCSNode::RightMarker,
                    revision,
                });
                current_predecessor = role_node;
            }
            for child in &node.children {
                if child
                    .role
                    .is_some_and(|role| significant.contains(&role))
                {
                    continue;
                }
                current_predecessor = self.add_node_recursively(
                    child,
                    wrapped,
                    current_predecessor,
                    revision,
                    classmapping,
                );
            }
            self.add(PCS {
                parent: wrapped,
                predecessor: current_predecessor,
                successor: PCSNode::RightMarker,
                revision,
            });
        } else {
            let mut current_predecessor = PCSNode::LeftMarker;
            for child in &node.children {
                current_predecessor = self.add_node_recursively(
                    child,
                    wrapped,
                    current_predecessor,
                    revision,
                    classmapping,
                );
            }
            self.add(PCS {
                parent: wrapped,
                predecessor: current_predecessor,
                successor: PCSNode::RightMarker,
                revision,
            });
        }

        wrapped
    }

    fn record_content(&mut self, leader: Leader<'a>, revision: Revision, node: &'a AstNode<'a>) {
        let values = node.content_values();
        if values.is_empty() {
            return;
        }
        let entries = self.content.entry(leader).or_default();
        if entries.iter().any(|entry| entry.revision == revision) {
            return;
        }
        entries.push(ContentEntry { revision, values });
    }

    /// Adds a new PCS to the set. Returns whether it was new.
    pub fn add(&mut self, pcs: PCS<'a>) -> bool {
        if !self.present.insert(pcs) {
            return false;
        }
        self.triples.push(pcs);
        self.successors.insert(pcs.successor, pcs);
        self.predecessors.insert(pcs.predecessor, pcs);
        true
    }

    /// Removes a triple from the set (keeping it in the insertion log).
    pub fn remove(&mut self, pcs: &PCS<'a>) -> bool {
        if !self.present.remove(pcs) {
            return false;
        }
        self.successors.remove(&pcs.successor, pcs);
        self.predecessors.remove(&pcs.predecessor, pcs);
        true
    }

    /// Is this triple currently in the set? (The revision is ignored.)
    pub fn contains(&self, pcs: &PCS<'a>) -> bool {
        self.present.contains(pcs)
    }

    /// Finds all the PCS which contain either the successor or predecessor of this PCS as successor
    /// or predecessor, and whose parent is different. Only real nodes can take part in such
    /// conflicts, as the identity of virtual nodes is tied to their parent.
    pub fn root_conflicting<'s, 'b>(
        &'s self,
        pcs: &'b PCS<'a>,
    ) -> impl Iterator<Item = &'s PCS<'a>> {
        let mut results = Vec::new();
        if let PCSNode::Node { .. } = pcs.predecessor {
            results.extend(
                (self.predecessors.get(&pcs.predecessor).iter())
                    .chain(self.successors.get(&pcs.predecessor).iter())
                    .filter(|other| other.parent != pcs.parent),
            );
        }
        if let PCSNode::Node { .. } = pcs.successor {
            results.extend(
                (self.predecessors.get(&pcs.successor).iter())
                    .chain(self.successors.get(&pcs.successor).iter())
                    .filter(|other| other.parent != pcs.parent),
            );
        }
        results.into_iter()
    }

    /// Finds all the triples that share this triple's parent and successor
    /// but disagree on the predecessor.
    pub fn predecessor_conflicting<'s, 'b>(
        &'s self,
        pcs: &'b PCS<'a>,
    ) -> impl Iterator<Item = &'s PCS<'a>> {
        self.successors
            .get(&pcs.successor)
            .iter()
            .filter(move |other| {
                other.parent == pcs.parent && other.predecessor != pcs.predecessor
            })
    }

    /// Finds all the triples that share this triple's parent and predecessor
    /// but disagree on the successor.
    pub fn successor_conflicting<'s, 'b>(
        &'s self,
        pcs: &'b PCS<'a>,
    ) -> impl Iterator<Item = &'s PCS<'a>> {
        self.predecessors
            .get(&pcs.predecessor)
            .iter()
            .filter(move |other| other.parent == pcs.parent && other.successor != pcs.successor)
    }

    /// The first triple inconsistent with this one, looking for root
    /// conflicts first, then predecessor conflicts, then successor conflicts.
    pub fn first_conflicting(&self, pcs: &PCS<'a>) -> Option<PCS<'a>> {
        self.root_conflicting(pcs)
            .next()
            .or_else(|| self.predecessor_conflicting(pcs).next())
            .or_else(|| self.successor_conflicting(pcs).next())
            .copied()
    }

    /// Records an irreducible inconsistency between two triples,
    /// symmetrically.
    pub fn mark_structural_conflict(&mut self, first: PCS<'a>, second: PCS<'a>) {
        self.structural_conflicts.insert(first, second);
        self.structural_conflicts.insert(second, first);
    }

    /// The triples recorded as structurally conflicting with this one.
    pub fn structural_conflicts_with(&self, pcs: &PCS<'a>) -> &FxHashSet<PCS<'a>> {
        self.structural_conflicts.get(pcs)
    }

    /// The content observed for this node across revisions (at most one
    /// entry per revision).
    pub fn content_for(&self, leader: &Leader<'a>) -> &[ContentEntry] {
        self.content
            .get(leader)
            .map_or(&[], |entries| entries.as_slice())
    }

    /// The nodes for which several distinct content values were observed.
    pub fn nodes_with_diverging_content(&self) -> impl Iterator<Item = Leader<'a>> + '_ {
        self.content.iter().filter_map(|(leader, entries)| {
            let disagreeing = entries
                .iter()
                .any(|entry| entry.values != entries[0].values);
            disagreeing.then_some(*leader)
        })
    }

    /// Iterate over the PCS triples contained in this `ChangeSet`,
    /// in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &PCS<'a>> {
        self.triples
            .iter()
            .filter(|pcs| self.present.contains(*pcs))
    }

    /// Number of PCS triples
    pub fn len(&self) -> usize {
        self.present.len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }

    /// Save to file, for debugging purposes
    pub fn save(&self, fname: impl AsRef<Path>) {
        let f = File::create(fname).expect("Unable to open changeset file");
        let mut f = BufWriter::new(f);

        for pcs in self.iter().sorted() {
            writeln!(f, "{pcs}").expect("Unable to write changeset file");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use crate::test_utils::ctx;

    use super::*;

    #[test]
    fn from_tree_counts() {
        let ctx = ctx();

        // module > class > field > type reference
        let tree = ctx.module(vec![ctx.class("Foo", vec![ctx.field("x", "int")])]);

        let classmapping = ClassMapping::new();
        let mut changeset = ChangeSet::new();
        changeset.add_tree(&tree, Revision::Base, &classmapping);

        // virtual root list (2), module list (2),
        // class role-node layer (annotations + type parameters: 4)
        // plus member child list (2), field list (2), leaf type reference (1)
        assert_eq!(changeset.len(), 13);

        // the class, being exploded, has role nodes as its first children
        let class_pcs = changeset
            .iter()
            .find(|pcs| {
                matches!(pcs.predecessor, PCSNode::LeftMarker)
                    && matches!(pcs.successor, PCSNode::RoleNode { .. })
            })
            .expect("no role node emitted for the class");
        assert_eq!(class_pcs.revision, Revision::Base);
    }

    #[test]
    fn empty_child_list_is_observable() {
        let ctx = ctx();
        let tree = ctx.module(vec![]);

        let classmapping = ClassMapping::new();
        let mut changeset = ChangeSet::new();
        changeset.add_tree(&tree, Revision::Left, &classmapping);

        // the module's empty child list is encoded explicitly
        assert!(changeset.iter().any(|pcs| {
            matches!(pcs.parent, PCSNode::Node { .. })
                && matches!(pcs.predecessor, PCSNode::LeftMarker)
                && matches!(pcs.successor, PCSNode::RightMarker)
        }));
    }

    #[test]
    fn single_tree_has_no_conflicts() {
        let ctx = ctx();

        let tree = ctx.module(vec![ctx.class(
            "Foo",
            vec![ctx.field("x", "int"), ctx.field("y", "int")],
        )]);

        let classmapping = ClassMapping::new();
        let mut changeset = ChangeSet::new();
        changeset.add_tree(&tree, Revision::Base, &classmapping);

        for pcs in changeset.iter() {
            assert_eq!(changeset.first_conflicting(pcs), None, "{pcs} conflicts");
        }
    }

    #[test]
    fn base_tag_wins_over_later_revisions() {
        let ctx = ctx();

        let base = ctx.module(vec![ctx.class("Foo", vec![])]);
        let left = ctx.module(vec![ctx.class("Foo", vec![])]);

        let mut base_left = crate::matching::Matching::new();
        base_left.add(base.root(), left.root());
        base_left.add(base.root().child(0).unwrap(), left.root().child(0).unwrap());
        let class_mapping = ClassMapping::from_matchings(
            &left,
            &left,
            &base_left,
            &crate::matching::Matching::new(),
            &crate::matching::Matching::new(),
        );

        let mut changeset = ChangeSet::new();
        changeset.add_tree(&base, Revision::Base, &class_mapping);
        let size_after_base = changeset.len();
        changeset.add_tree(&left, Revision::Left, &class_mapping);

        // left preserves the base structure entirely, so no new triple is added
        // and the surviving triples keep their Base tag
        assert_eq!(changeset.len(), size_after_base);
        assert!(changeset.iter().all(|pcs| pcs.revision == Revision::Base));
    }

    #[test]
    fn diverging_content_is_detected() {
        let ctx = ctx();

        let base = ctx.module(vec![ctx.class("Foo", vec![])]);
        let left = ctx.module(vec![ctx.class("Bar", vec![])]);

        let mut base_left = crate::matching::Matching::new();
        base_left.add(base.root(), left.root());
        base_left.add(base.root().child(0).unwrap(), left.root().child(0).unwrap());
        let class_mapping = ClassMapping::from_matchings(
            &left,
            &left,
            &base_left,
            &crate::matching::Matching::new(),
            &crate::matching::Matching::new(),
        );

        let mut changeset = ChangeSet::new();
        changeset.add_tree(&base, Revision::Base, &class_mapping);
        changeset.add_tree(&left, Revision::Left, &class_mapping);

        let diverging = changeset.nodes_with_diverging_content().collect::<Vec<_>>();
        assert_eq!(diverging.len(), 1);
        assert_eq!(diverging[0].kind(), crate::tree::NodeKind::Class);
        assert_eq!(changeset.content_for(&diverging[0]).len(), 2);
    }

    #[test]
    fn write_to_file() {
        let ctx = ctx();

        let tree = ctx.module(vec![ctx.import("java.util.List")]);

        let classmapping = ClassMapping::new();
        let mut changeset = ChangeSet::new();
        changeset.add_tree(&tree, Revision::Base, &classmapping);

        let tmp_dir = tempdir().expect("failed to create a temp dir");
        let path = tmp_dir.path().to_owned().join("changeset.txt");
        changeset.save(&path);

        let contents = fs::read_to_string(&path).expect("Failed to read the changeset.txt file");
        assert_eq!(contents.lines().count(), changeset.len());
        assert!(contents.contains("⊥"));
    }
}
