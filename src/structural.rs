use crate::{
    class_mapping::{ClassMapping, Leader},
    pcs::Revision,
    tree::NodeKind,
};

/// How a structural conflict arose. Currently all conflicts handed to
/// handlers are concurrent insertions into the same sibling list.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    InsertInsert,
}

/// A pluggable resolver for structural conflicts. Handlers are consulted in
/// registration order and the first non-`None` result wins: it replaces the
/// two conflicting sibling runs by the returned sequence of nodes.
pub trait StructuralConflictHandler {
    fn try_resolve<'a>(
        &self,
        left: &[Leader<'a>],
        right: &[Leader<'a>],
        kind: ConflictKind,
        class_mapping: &ClassMapping<'a>,
    ) -> Option<Vec<Leader<'a>>>;
}

/// Methods are unordered within a type: two runs that consist entirely of
/// executable type members can simply be concatenated.
///
/// The concatenation puts the left run first, which makes this resolution
/// non-commutative: swapping left and right swaps the order of the merged
/// methods. This matches the original behavior of the algorithm.
pub struct MethodOrderingHandler;

impl StructuralConflictHandler for MethodOrderingHandler {
    fn try_resolve<'a>(
        &self,
        left: &[Leader<'a>],
        right: &[Leader<'a>],
        _kind: ConflictKind,
        _class_mapping: &ClassMapping<'a>,
    ) -> Option<Vec<Leader<'a>>> {
        let all_methods = left
            .iter()
            .chain(right.iter())
            .all(|leader| leader.kind() == NodeKind::Method);
        if all_methods && !left.is_empty() && !right.is_empty() {
            Some(left.iter().chain(right.iter()).copied().collect())
        } else {
            None
        }
    }
}

/// Two sides inserting sibling runs with identical content are not really
/// conflicting: keep a single copy.
pub struct OptimisticInsertHandler;

impl StructuralConflictHandler for OptimisticInsertHandler {
    fn try_resolve<'a>(
        &self,
        left: &[Leader<'a>],
        right: &[Leader<'a>],
        _kind: ConflictKind,
        class_mapping: &ClassMapping<'a>,
    ) -> Option<Vec<Leader<'a>>> {
        if left.len() != right.len() || left.is_empty() {
            return None;
        }
        let both_inserted = left
            .iter()
            .map(|leader| (leader, Revision::Left))
            .chain(right.iter().map(|leader| (leader, Revision::Right)))
            .all(|(leader, revision)| {
                let revisions = class_mapping.revision_set(leader);
                revisions.contains(revision) && !revisions.contains(Revision::Base)
            });
        if !both_inserted {
            return None;
        }
        let pairwise_isomorphic = left.iter().zip(right.iter()).all(|(l, r)| {
            let left_node = class_mapping.node_at_rev(l, Revision::Left);
            let right_node = class_mapping.node_at_rev(r, Revision::Right);
            match (left_node, right_node) {
                (Some(left_node), Some(right_node)) => left_node.isomorphic_to(right_node),
                _ => false,
            }
        });
        pairwise_isomorphic.then(|| left.to_vec())
    }
}

/// The built-in handlers, in the order in which they must be consulted.
pub fn default_handlers() -> Vec<Box<dyn StructuralConflictHandler>> {
    vec![
        Box::new(MethodOrderingHandler),
        Box::new(OptimisticInsertHandler),
    ]
}
