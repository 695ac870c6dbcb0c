use itertools::Itertools;
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    changeset::ChangeSet,
    class_mapping::{ClassMapping, Leader, RevNode},
    content::{ContentMerger, MergedContent},
    error::MergeError,
    merged_tree::MergedTree,
    pcs::{PCS, Revision},
    settings::DisplaySettings,
    structural::default_handlers,
    tree::Ast,
    tree_builder::TreeBuilder,
    tree_matcher::TreeMatcher,
};

/// Everything the later pipeline stages need from the raw merge.
pub(crate) struct MergeContext<'a> {
    pub tree: MergedTree<'a>,
    pub class_mapping: ClassMapping<'a>,
    pub merged_content: FxHashMap<Leader<'a>, MergedContent>,
}

/// Backbone of the 3DM merge algorithm.
///
/// This:
/// * generates [`crate::matching::Matching`]s between all three pairs of revisions,
/// * creates a [`ClassMapping`] to cluster nodes together,
/// * converts the trees to [`ChangeSet`]s,
/// * cleans up the union of the changesets, restarting once with pruned
///   matchings if root conflicts show up,
/// * merges the scalar content of nodes whose attributes diverge,
/// * converts the cleaned union back to a [`MergedTree`].
pub(crate) fn three_way_merge<'a>(
    base: &Ast<'a>,
    left: &Ast<'a>,
    right: &Ast<'a>,
    base_matcher: &dyn TreeMatcher,
    left_right_matcher: &dyn TreeMatcher,
    settings: &DisplaySettings,
) -> Result<MergeContext<'a>, MergeError> {
    debug!("matching base to left");
    let mut base_left = base_matcher.match_trees(base, left);
    base_left.retain_admissible();
    debug!("matching base to right");
    let mut base_right = base_matcher.match_trees(base, right);
    base_right.retain_admissible();
    debug!("matching left to right");
    let mut left_right = left_right_matcher.match_trees(left, right);
    left_right.retain_admissible();

    // The resolution pass runs at most twice: root conflicts only arise
    // from overly-eager matchings, which get pruned before the retry.
    for attempt in 0..=1 {
        let class_mapping =
            ClassMapping::from_matchings(left, right, &base_left, &base_right, &left_right);

        debug!("generating PCS triples");
        let mut delta = ChangeSet::new();
        delta.add_tree(base, Revision::Base, &class_mapping);
        delta.add_tree(left, Revision::Left, &class_mapping);
        delta.add_tree(right, Revision::Right, &class_mapping);
        debug!("number of triples: {}", delta.len());

        let mut base_changeset = ChangeSet::new();
        base_changeset.add_tree(base, Revision::Base, &class_mapping);

        let root_conflicting = resolve_inconsistencies(&mut delta, &base_changeset);
        if !root_conflicting.is_empty() {
            if attempt == 1 {
                return Err(MergeError::RootConflictRetry);
            }
            debug!(
                "root conflicts on [{}], pruning matchings and rebuilding the class mapping",
                root_conflicting.iter().format(", ")
            );
            for leader in &root_conflicting {
                for rev_node in class_mapping.representatives(leader) {
                    base_left.remove_involving(rev_node.node);
                    base_right.remove_involving(rev_node.node);
                    left_right.remove_involving(rev_node.node);
                }
            }
            continue;
        }

        let merger = ContentMerger::new(&class_mapping, settings);
        let merged_content = delta
            .nodes_with_diverging_content()
            .map(|leader| {
                let merged = merger.merge(leader, delta.content_for(&leader));
                (leader, merged)
            })
            .collect::<FxHashMap<_, _>>();

        let builder = TreeBuilder::new(&delta, &class_mapping, settings, default_handlers());
        let tree = builder.build_tree().unwrap_or_else(|err| {
            debug!("interpreting the merged changeset failed ({err}), falling back on a line-based merge of the whole file");
            MergedTree::line_based_local_fallback_for_revnode(
                class_mapping.map_to_leader(RevNode::new(Revision::Base, base.root())),
                &class_mapping,
                settings,
            )
        });
        debug!("{tree}");

        return Ok(MergeContext {
            tree,
            class_mapping,
            merged_content,
        });
    }
    unreachable!("the resolution loop always returns")
}

/// Eliminates the inconsistencies of the merged changeset, in a single pass
/// over its triples:
/// * an inconsistency where the base preserves one of the two structures is
///   resolved by dropping the base triple (the other side changed it);
/// * an inconsistency between two non-base triples is recorded as a
///   structural conflict on both of them.
///
/// Returns the nodes involved in root conflicts (conflicts between triples
/// that disagree on the parent of a node), which call for pruning the
/// matchings and restarting.
fn resolve_inconsistencies<'a>(
    delta: &mut ChangeSet<'a>,
    base_changeset: &ChangeSet<'a>,
) -> FxHashSet<Leader<'a>> {
    let mut root_conflicting: FxHashSet<Leader<'a>> = FxHashSet::default();
    let triples: Vec<PCS<'a>> = delta.iter().copied().collect();
    for pcs in triples {
        if !delta.contains(&pcs) {
            // already eliminated as the other half of an earlier inconsistency
            continue;
        }
        let Some(other) = delta.first_conflicting(&pcs) else {
            continue;
        };
        if base_changeset.contains(&other) {
            debug!("eliminating {other} by {pcs}");
            delta.remove(&other);
        } else if base_changeset.contains(&pcs) {
            debug!("eliminating {pcs} by {other}");
            delta.remove(&pcs);
        } else {
            debug!("structural conflict between {pcs} and {other}");
            delta.mark_structural_conflict(pcs, other);
            if other.parent != pcs.parent {
                for node in [
                    pcs.predecessor,
                    pcs.successor,
                    other.predecessor,
                    other.successor,
                ] {
                    if let Some(leader) = node.as_leader() {
                        root_conflicting.insert(leader);
                    }
                }
            }
        }
    }
    root_conflicting
}
