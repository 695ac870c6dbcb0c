use rustc_hash::FxHashMap;

use crate::{
    class_mapping::{ClassMapping, Leader},
    content::{ContentConflict, MergedContent},
    error::MergeError,
    line_based::LineBasedMerge,
    merged_tree::MergedTree,
    pcs::Revision,
    printer,
    roles::{AttrValue, Role, RoledValues},
    tree::{AstBuilder, AstNode, NodeKind},
};

/// The two sides of an unresolved structural conflict, as original nodes of
/// the revisions they come from.
#[derive(Debug, Clone)]
pub struct StructuralConflictRecord<'a> {
    pub left: Vec<&'a AstNode<'a>>,
    pub right: Vec<&'a AstNode<'a>>,
}

/// Side tables carrying everything about an output tree that is not
/// expressible in the nodes themselves, keyed by output node id. Keeping
/// conflicts out of the nodes means input subtrees can be reused verbatim.
#[derive(Debug, Default)]
pub struct OutputMetadata<'a> {
    /// conflict placeholder id -> the structural conflict it stands for
    pub structural: FxHashMap<usize, StructuralConflictRecord<'a>>,
    /// conflict placeholder id -> a line-based approximation of a subtree
    pub line_based: FxHashMap<usize, LineBasedMerge>,
    /// merged node id -> its unresolved content conflicts
    pub content: FxHashMap<usize, Vec<ContentConflict>>,
    /// root id of a verbatim-copied subtree -> the revision it was copied from
    pub origins: FxHashMap<usize, Revision>,
}

impl<'a> OutputMetadata<'a> {
    /// Moves all records of another metadata table into this one.
    /// The ids of both tables must come from the same node builder.
    pub(crate) fn absorb(&mut self, other: OutputMetadata<'a>) {
        self.structural.extend(other.structural);
        self.line_based.extend(other.line_based);
        self.content.extend(other.content);
        self.origins.extend(other.origins);
    }

    /// The number of conflicting bytes, as an attempt to quantify the
    /// effort required to solve them.
    pub fn conflict_mass(&self) -> usize {
        let structural_mass = self
            .structural
            .values()
            .map(|record| {
                printer::plain_lines(&record.left, "").len()
                    + printer::plain_lines(&record.right, "").len()
            })
            .sum::<usize>();
        let line_based_mass = self
            .line_based
            .values()
            .map(|merge| merge.conflict_mass)
            .sum::<usize>();
        structural_mass + line_based_mass
    }
}

/// The result of materializing a merged tree into fresh AST nodes.
pub(crate) struct BuiltOutput<'a> {
    pub root: &'a AstNode<'a>,
    pub meta: OutputMetadata<'a>,
    pub conflict_count: usize,
}

/// Materializes a [MergedTree] into a freshly built AST, stitching merged
/// attributes into shallow clones and deep-copying subtrees that belong to
/// a single revision. Conflicts become placeholder nodes described in the
/// side tables.
pub(crate) struct OutputTreeBuilder<'a, 'b> {
    builder: &'b AstBuilder<'a>,
    class_mapping: &'b ClassMapping<'a>,
    merged_content: &'b FxHashMap<Leader<'a>, MergedContent>,
    meta: OutputMetadata<'a>,
    conflict_count: usize,
}

impl<'a, 'b> OutputTreeBuilder<'a, 'b> {
    pub(crate) fn new(
        builder: &'b AstBuilder<'a>,
        class_mapping: &'b ClassMapping<'a>,
        merged_content: &'b FxHashMap<Leader<'a>, MergedContent>,
    ) -> Self {
        Self {
            builder,
            class_mapping,
            merged_content,
            meta: OutputMetadata::default(),
            conflict_count: 0,
        }
    }

    pub(crate) fn build(mut self, tree: &MergedTree<'a>) -> Result<BuiltOutput<'a>, MergeError> {
        let mut nodes = self.build_node(tree)?;
        if nodes.len() != 1 {
            return Err(MergeError::RoleResolution(format!(
                "expected a single root node, got {}",
                nodes.len()
            )));
        }
        let root = nodes.pop().expect("just checked above");
        Ok(BuiltOutput {
            root,
            meta: self.meta,
            conflict_count: self.conflict_count,
        })
    }

    /// Builds the output nodes for one merged element. Role containers
    /// dissolve into their children, everything else maps to one node.
    fn build_node(&mut self, tree: &MergedTree<'a>) -> Result<Vec<&'a AstNode<'a>>, MergeError> {
        match tree {
            MergedTree::ExactTree {
                node, revisions, ..
            } => {
                let revision = revisions.any();
                let original = self
                    .class_mapping
                    .node_at_rev(node, revision)
                    .expect("revision set of ExactTree inconsistent with the class mapping");
                let role = self.resolve_role(*node)?;
                let copied = self.builder.deep_copy(original, role);
                self.meta.origins.insert(copied.id, revision);
                Ok(vec![copied])
            }
            MergedTree::MixedTree { node, children, .. } => {
                let mut annotation_keys: Vec<String> = Vec::new();
                let mut built_children = Vec::new();
                for child in children {
                    if node.kind() == NodeKind::Annotation
                        && let Some(key) = self.annotation_key(child)
                    {
                        annotation_keys.push(key);
                    }
                    built_children.extend(self.build_node(child)?);
                }

                let role = self.resolve_role(*node)?;
                let representative_rev = self.class_mapping.revision_set(node).any();
                let representative = self
                    .class_mapping
                    .node_at_rev(node, representative_rev)
                    .expect("revision set inconsistent with the class mapping");
                let mut attrs = representative.attrs.clone();
                let mut conflicts: Vec<ContentConflict> = Vec::new();
                if let Some(merged) = self.merged_content.get(node) {
                    for (attr_role, value) in merged.values.iter() {
                        attrs.set(*attr_role, value.clone());
                    }
                    conflicts.clone_from(&merged.conflicts);
                }
                if node.kind() == NodeKind::Annotation {
                    attrs.set(Role::AnnotationKeys, AttrValue::Keys(annotation_keys));
                }

                let built = self
                    .builder
                    .node(node.kind(), role, attrs, built_children);
                if !conflicts.is_empty() {
                    self.conflict_count += conflicts.len();
                    self.meta.content.insert(built.id, conflicts);
                }
                Ok(vec![built])
            }
            MergedTree::RoleContainer { children, .. } => {
                let mut built = Vec::new();
                for child in children {
                    built.extend(self.build_node(child)?);
                }
                Ok(built)
            }
            MergedTree::Conflict { left, right } => {
                let record = StructuralConflictRecord {
                    left: self.side_nodes(left, Revision::Left),
                    right: self.side_nodes(right, Revision::Right),
                };
                let placeholder =
                    self.builder
                        .node(NodeKind::Conflict, None, RoledValues::new(), vec![]);
                self.meta.structural.insert(placeholder.id, record);
                self.conflict_count += 1;
                Ok(vec![placeholder])
            }
            MergedTree::LineBasedMerge { node, merge } => {
                let role = self.resolve_role(*node)?;
                let placeholder =
                    self.builder
                        .node(NodeKind::Conflict, role, RoledValues::new(), vec![]);
                self.meta.line_based.insert(placeholder.id, merge.clone());
                self.conflict_count += merge.conflict_count;
                Ok(vec![placeholder])
            }
        }
    }

    /// The original nodes forming one side of a structural conflict.
    fn side_nodes(&self, leaders: &[Leader<'a>], revision: Revision) -> Vec<&'a AstNode<'a>> {
        leaders
            .iter()
            .map(|leader| {
                self.class_mapping
                    .node_at_rev(leader, revision)
                    .unwrap_or_else(|| leader.as_representative().node)
            })
            .collect()
    }

    /// Determines the role of a merged node in its parent.
    ///
    /// A node normally inherits the role of its originals. When the base
    /// revision disagrees with the others (the attribute was restructured),
    /// the base role is discarded in favor of the unique non-base role; more
    /// than one surviving candidate indicates a bug in the merge.
    fn resolve_role(&self, leader: Leader<'a>) -> Result<Option<Role>, MergeError> {
        let roles_at_rev = |revision| {
            self.class_mapping
                .node_at_rev(&leader, revision)
                .map(|node| node.role)
        };
        let base = roles_at_rev(Revision::Base);
        let left = roles_at_rev(Revision::Left);
        let right = roles_at_rev(Revision::Right);

        let mut distinct: Vec<Option<Role>> = Vec::new();
        for role in [base, left, right].into_iter().flatten() {
            if !distinct.contains(&role) {
                distinct.push(role);
            }
        }
        match distinct.as_slice() {
            [] => Ok(None),
            [role] => Ok(*role),
            _ => {
                let mut non_base: Vec<Option<Role>> = Vec::new();
                for role in [left, right].into_iter().flatten() {
                    if !non_base.contains(&role) {
                        non_base.push(role);
                    }
                }
                match non_base.as_slice() {
                    [role] => Ok(*role),
                    _ => Err(MergeError::RoleResolution(format!(
                        "{leader}: more than one non-base role in contention"
                    ))),
                }
            }
        }
    }

    /// Recovers the string key under which an annotation value is stored,
    /// from the original annotation of the original value node.
    fn annotation_key(&self, child: &MergedTree<'a>) -> Option<String> {
        let leader = child.leader()?;
        let revisions = self.class_mapping.revision_set(&leader);
        let node = self.class_mapping.node_at_rev(&leader, revisions.any())?;
        if node.role != Some(Role::AnnotationValue) {
            return None;
        }
        let annotation = node.parent()?;
        let index = annotation
            .children_with_role(Role::AnnotationValue)
            .position(|value| value.id == node.id)?;
        annotation
            .attr(Role::AnnotationKeys)?
            .as_keys()?
            .get(index)
            .cloned()
    }
}
