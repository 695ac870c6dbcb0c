//! Syntax aware three-way merging of abstract syntax trees
//!
//! ## Overview
//!
//! This crate implements a structural merge engine in the 3DM family.
//! It takes three versions of a syntax tree (base, left and right) and
//! produces a fourth version where the changes from base to left and from
//! base to right are both applied, with awareness of the structure of the
//! trees rather than of their lines.
//!
//! The pipeline:
//! * external matchers relate the nodes of each pair of revisions,
//! * a class mapping clusters matched nodes so they can be equated,
//! * each tree is converted to a set of parent/predecessor/successor
//!   triples rewritten through the class mapping,
//! * inconsistencies in the union of the three sets are eliminated (changes
//!   win over the base) or recorded as structural conflicts,
//! * diverging scalar attributes are reconciled per role,
//! * the cleaned-up set is interpreted back into a tree, and
//! * a fresh output tree is built, with conflicts attached as side records
//!   so they can be printed with the usual markers.
//!
//! Parsing and pretty-printing of a host language are out of scope: callers
//! bring their own trees (see [`tree::AstBuilder`]) and matchers
//! (see [`tree_matcher::TreeMatcher`]).

pub(crate) mod changeset;
pub mod class_mapping;
pub mod content;
pub mod error;
pub mod line_based;
pub mod matching;
pub(crate) mod merge_3dm;
pub mod merge_result;
pub(crate) mod merged_text;
pub(crate) mod merged_tree;
pub(crate) mod multimap;
pub mod output_tree;
pub mod pcs;
pub(crate) mod postprocess;
pub(crate) mod printer;
pub mod roles;
pub mod settings;
pub(crate) mod signature;
pub mod structural;
#[cfg(test)]
pub(crate) mod test_utils;
pub mod tree;
pub(crate) mod tree_builder;
pub mod tree_matcher;

use typed_arena::Arena;

use crate::{
    error::MergeError,
    merge_3dm::three_way_merge,
    merge_result::{MergeResult, STRUCTURED_METHOD},
    output_tree::{BuiltOutput, OutputMetadata, OutputTreeBuilder},
    postprocess::PostProcessor,
    settings::DisplaySettings,
    tree::{Ast, AstBuilder, AstNode},
    tree_matcher::TreeMatcher,
};

pub(crate) fn fxhasher() -> rustc_hash::FxHasher {
    use std::hash::BuildHasher;
    rustc_hash::FxBuildHasher.build_hasher()
}

/// A merged tree, together with the conflict records describing the parts
/// that could not be reconciled.
pub struct MergeOutcome<'a> {
    /// The root of the freshly built output tree. Conflicts appear in it as
    /// placeholder nodes whose contents live in the metadata tables.
    pub root: &'a AstNode<'a>,
    /// The number of unresolved conflicts: structural conflict placeholders,
    /// unresolved content conflicts on merged nodes, and the conflicts of
    /// line-based approximations.
    pub conflict_count: usize,
    meta: OutputMetadata<'a>,
}

impl<'a> MergeOutcome<'a> {
    /// The side tables describing the conflicts of the output tree.
    pub fn metadata(&self) -> &OutputMetadata<'a> {
        &self.meta
    }

    /// Pretty-prints the merged tree, expanding conflicts into diff-style
    /// markers which always start at the beginning of a line.
    pub fn render(&self, settings: &DisplaySettings) -> String {
        printer::render_output(self.root, &self.meta, settings)
    }

    /// Renders the outcome into a [MergeResult] with conflict statistics.
    pub fn into_merge_result(self, settings: &DisplaySettings) -> MergeResult {
        let contents = self.render(settings);
        MergeResult {
            contents,
            conflict_count: self.conflict_count,
            conflict_mass: self.meta.conflict_mass(),
            method: STRUCTURED_METHOD,
        }
    }
}

/// Merges three revisions of a syntax tree.
///
/// The matchings between revisions are produced by the supplied matchers:
/// `base_matcher` relates the base tree to each side, while
/// `left_right_matcher` (typically stricter) relates the two sides to each
/// other to detect identical insertions. The output tree is allocated in
/// the supplied arenas and owned by the caller.
///
/// The same inputs always produce the same outcome. Unrecoverable problems
/// surface as [`MergeError`]; everything else is reported as conflicts in
/// the outcome.
#[allow(clippy::too_many_arguments)]
pub fn merge<'a>(
    base: &Ast<'a>,
    left: &Ast<'a>,
    right: &Ast<'a>,
    base_matcher: &dyn TreeMatcher,
    left_right_matcher: &dyn TreeMatcher,
    settings: &DisplaySettings,
    arena: &'a Arena<AstNode<'a>>,
    ref_arena: &'a Arena<&'a AstNode<'a>>,
) -> Result<MergeOutcome<'a>, MergeError> {
    let builder = AstBuilder::new(arena, ref_arena);
    let output = merge_with_builder(
        base,
        left,
        right,
        base_matcher,
        left_right_matcher,
        settings,
        &builder,
        true,
    )?;
    Ok(MergeOutcome {
        root: output.root,
        conflict_count: output.conflict_count,
        meta: output.meta,
    })
}

/// The pipeline behind [merge], reusable with an existing node builder.
/// `dedup_members` guards the duplicate-member elimination pass, which
/// recursively re-enters the pipeline and must not re-trigger itself.
#[allow(clippy::too_many_arguments)]
pub(crate) fn merge_with_builder<'a>(
    base: &Ast<'a>,
    left: &Ast<'a>,
    right: &Ast<'a>,
    base_matcher: &dyn TreeMatcher,
    left_right_matcher: &dyn TreeMatcher,
    settings: &DisplaySettings,
    builder: &AstBuilder<'a>,
    dedup_members: bool,
) -> Result<BuiltOutput<'a>, MergeError> {
    let context = three_way_merge(
        base,
        left,
        right,
        base_matcher,
        left_right_matcher,
        settings,
    )?;
    let output = OutputTreeBuilder::new(builder, &context.class_mapping, &context.merged_content)
        .build(&context.tree)?;
    PostProcessor::new(builder, base_matcher, left_right_matcher, settings, output)
        .run(base, left, right, dedup_members)
}
