use std::collections::BTreeSet;

use itertools::Itertools;
use log::debug;

use crate::{
    error::MergeError,
    line_based::line_based_merge,
    output_tree::BuiltOutput,
    roles::{AttrValue, CommentKind, Role, RoledValues},
    settings::DisplaySettings,
    signature::member_key,
    tree::{Ast, AstBuilder, AstNode, NodeKind},
    tree_matcher::TreeMatcher,
};

/// The repair passes which run once the main tree is assembled:
/// * import statements are merged by set union with deletions honored,
///   sorted lexicographically;
/// * the compilation-unit comment is merged textually;
/// * duplicate type members (left over by optimistic conflict resolution)
///   are grouped and re-merged through the full pipeline.
pub(crate) struct PostProcessor<'a, 'b> {
    builder: &'b AstBuilder<'a>,
    base_matcher: &'b dyn TreeMatcher,
    left_right_matcher: &'b dyn TreeMatcher,
    settings: &'b DisplaySettings,
    output: BuiltOutput<'a>,
}

impl<'a, 'b> PostProcessor<'a, 'b> {
    pub(crate) fn new(
        builder: &'b AstBuilder<'a>,
        base_matcher: &'b dyn TreeMatcher,
        left_right_matcher: &'b dyn TreeMatcher,
        settings: &'b DisplaySettings,
        output: BuiltOutput<'a>,
    ) -> Self {
        Self {
            builder,
            base_matcher,
            left_right_matcher,
            settings,
            output,
        }
    }

    pub(crate) fn run(
        mut self,
        base: &Ast<'a>,
        left: &Ast<'a>,
        right: &Ast<'a>,
        dedup_members: bool,
    ) -> Result<BuiltOutput<'a>, MergeError> {
        if self.output.root.kind == NodeKind::Module {
            self.merge_imports(base, left, right);
            self.merge_compilation_unit_comment(base, left, right);
        }
        if dedup_members {
            let root = self.output.root;
            self.output.root = self.eliminate_duplicate_members(root)?;
        }
        Ok(self.output)
    }

    /// Replaces the module's import statements by
    /// `(base ∪ left ∪ right) \ ((base \ left) ∪ (base \ right))`,
    /// sorted lexicographically.
    fn merge_imports(&mut self, base: &Ast<'a>, left: &Ast<'a>, right: &Ast<'a>) {
        fn import_names(root: &AstNode<'_>) -> BTreeSet<String> {
            root.children
                .iter()
                .filter(|child| child.kind == NodeKind::Import)
                .filter_map(|child| child.name())
                .map(str::to_owned)
                .collect()
        }

        let base_imports = import_names(base.root());
        let left_imports = import_names(left.root());
        let right_imports = import_names(right.root());

        let merged: BTreeSet<String> = base_imports
            .iter()
            .chain(left_imports.iter())
            .chain(right_imports.iter())
            .filter(|import| {
                let deleted_on_left =
                    base_imports.contains(*import) && !left_imports.contains(*import);
                let deleted_on_right =
                    base_imports.contains(*import) && !right_imports.contains(*import);
                !(deleted_on_left || deleted_on_right)
            })
            .cloned()
            .collect();

        let root = self.output.root;
        let current: Vec<&str> = root
            .children
            .iter()
            .filter(|child| child.kind == NodeKind::Import)
            .filter_map(|child| child.name())
            .collect();
        let import_sentinels = root
            .children
            .iter()
            .filter(|child| self.is_import_conflict(child))
            .collect_vec();
        if current.iter().copied().eq(merged.iter().map(String::as_str))
            && import_sentinels.is_empty()
        {
            return;
        }
        debug!("replacing the merged import list: [{}]", merged.iter().format(", "));

        // drop any import-only conflicts, their resolution is the set union
        for sentinel in import_sentinels {
            if self.output.meta.structural.remove(&sentinel.id).is_some() {
                self.output.conflict_count -= 1;
            }
        }

        let leading_comments = root
            .children
            .iter()
            .take_while(|child| child.kind == NodeKind::Comment)
            .copied()
            .collect_vec();
        let import_nodes = merged
            .iter()
            .map(|name| {
                self.builder.node(
                    NodeKind::Import,
                    Some(Role::Import),
                    RoledValues::new().with(Role::Name, AttrValue::str(name.clone())),
                    vec![],
                )
            })
            .collect_vec();
        let rest = root
            .children
            .iter()
            .skip(leading_comments.len())
            .filter(|child| child.kind != NodeKind::Import && !self.is_import_conflict(child))
            .copied()
            .collect_vec();

        let new_children = leading_comments
            .into_iter()
            .chain(import_nodes)
            .chain(rest)
            .collect_vec();
        self.output.root =
            self.builder
                .node(root.kind, root.role, root.attrs.clone(), new_children);
    }

    /// Whether an output child is a structural conflict between imports only.
    fn is_import_conflict(&self, child: &AstNode<'a>) -> bool {
        child.kind == NodeKind::Conflict
            && self
                .output
                .meta
                .structural
                .get(&child.id)
                .is_some_and(|record| {
                    !(record.left.is_empty() && record.right.is_empty())
                        && record
                            .left
                            .iter()
                            .chain(record.right.iter())
                            .all(|node| node.kind == NodeKind::Import)
                })
    }

    /// Merges the compilation-unit comment textually.
    fn merge_compilation_unit_comment(&mut self, base: &Ast<'a>, left: &Ast<'a>, right: &Ast<'a>) {
        fn cu_comment<'t>(root: &'t AstNode<'t>) -> Option<&'t AstNode<'t>> {
            root.children
                .first()
                .filter(|child| child.kind == NodeKind::Comment)
                .copied()
        }
        fn comment_text<'t>(node: Option<&'t AstNode<'t>>) -> &'t str {
            node.and_then(|n| n.attr(Role::CommentContent))
                .and_then(AttrValue::as_str)
                .unwrap_or("")
        }

        let base_comment = cu_comment(base.root());
        let left_comment = cu_comment(left.root());
        let right_comment = cu_comment(right.root());
        if left_comment.is_none() && right_comment.is_none() {
            return;
        }

        let merged = line_based_merge(
            &with_final_newline(comment_text(base_comment)),
            &with_final_newline(comment_text(left_comment)),
            &with_final_newline(comment_text(right_comment)),
            self.settings,
        );
        let mut contents = merged.contents;
        if contents.ends_with('\n') {
            contents.pop();
        }

        let root = self.output.root;
        let existing = cu_comment(root);
        if let Some(existing) = existing {
            let existing_text = comment_text(Some(existing));
            if existing_text == contents
                && !self.output.meta.content.contains_key(&existing.id)
            {
                return;
            }
            // the textual merge supersedes whatever the structural merge did
            if let Some(conflicts) = self.output.meta.content.remove(&existing.id) {
                self.output.conflict_count -= conflicts.len();
            }
        }

        let kind_attr = [left_comment, right_comment, base_comment]
            .into_iter()
            .flatten()
            .find_map(|comment| comment.attr(Role::CommentKind).cloned())
            .unwrap_or(AttrValue::Comment(CommentKind::Line));
        let new_comment = self.builder.node(
            NodeKind::Comment,
            Some(Role::Comment),
            RoledValues::new()
                .with(Role::CommentContent, AttrValue::Str(contents))
                .with(Role::CommentKind, kind_attr),
            vec![],
        );
        self.output.conflict_count += merged.conflict_count;

        let new_children = std::iter::once(new_comment)
            .chain(
                root.children
                    .iter()
                    .copied()
                    .skip(usize::from(existing.is_some())),
            )
            .collect_vec();
        self.output.root =
            self.builder
                .node(root.kind, root.role, root.attrs.clone(), new_children);
    }

    /// Walks the output tree looking for types with two members of the same
    /// signature, and re-merges each such pair through the full pipeline
    /// against an empty base. Identical duplicates coalesce, diverging ones
    /// surface as conflicts.
    fn eliminate_duplicate_members(
        &mut self,
        node: &'a AstNode<'a>,
    ) -> Result<&'a AstNode<'a>, MergeError> {
        let mut changed = false;
        let mut children = Vec::with_capacity(node.children.len());
        for child in &node.children {
            let rebuilt = self.eliminate_duplicate_members(child)?;
            changed = changed || rebuilt.id != child.id;
            children.push(rebuilt);
        }

        if node.kind == NodeKind::Class {
            let keyed = children
                .iter()
                .enumerate()
                .filter(|(_, child)| child.dfs().all(|n| n.kind != NodeKind::Conflict))
                .filter_map(|(index, child)| member_key(child).map(|key| (key, index)))
                .into_group_map();
            let mut replacements: Vec<(usize, usize, &'a AstNode<'a>)> = Vec::new();
            for (key, indices) in keyed {
                let [first, second] = indices.as_slice() else {
                    continue;
                };
                debug!("duplicate member signature {key:?}, re-merging the pair");
                if let Some(merged) = self.merge_duplicate_pair(children[*first], children[*second])?
                {
                    replacements.push((*first, *second, merged));
                }
            }
            if !replacements.is_empty() {
                changed = true;
                let mut removed: Vec<usize> = Vec::new();
                for (first, second, merged) in replacements {
                    children[first] = merged;
                    removed.push(second);
                }
                removed.sort_unstable_by(|a, b| b.cmp(a));
                for index in removed {
                    children.remove(index);
                }
            }
        }

        if changed {
            Ok(self
                .builder
                .node(node.kind, node.role, node.attrs.clone(), children))
        } else {
            Ok(node)
        }
    }

    /// Merges two same-signature members by running the whole pipeline with
    /// a dummy empty base, using the primary matcher on all revision pairs.
    /// Returns `None` when the recursive merge did not manage to combine
    /// them into a single member.
    fn merge_duplicate_pair(
        &mut self,
        first: &'a AstNode<'a>,
        second: &'a AstNode<'a>,
    ) -> Result<Option<&'a AstNode<'a>>, MergeError> {
        let empty_base =
            self.builder
                .node(NodeKind::Module, None, RoledValues::new(), vec![]);
        let left_module = self.builder.node(
            NodeKind::Module,
            None,
            RoledValues::new(),
            vec![self.builder.deep_copy(first, first.role)],
        );
        let right_module = self.builder.node(
            NodeKind::Module,
            None,
            RoledValues::new(),
            vec![self.builder.deep_copy(second, second.role)],
        );
        let base_ast = self.builder.build(empty_base);
        let left_ast = self.builder.build(left_module);
        let right_ast = self.builder.build(right_module);

        let merged = crate::merge_with_builder(
            &base_ast,
            &left_ast,
            &right_ast,
            self.base_matcher,
            self.base_matcher,
            self.settings,
            self.builder,
            false,
        )?;

        let [member] = merged.root.children.as_slice() else {
            debug!("re-merging the duplicates did not yield a single member, keeping both");
            return Ok(None);
        };
        let member = *member;
        self.output.conflict_count += merged.conflict_count;
        self.output.meta.absorb(merged.meta);
        Ok(Some(member))
    }
}

fn with_final_newline(text: &str) -> String {
    if text.is_empty() || text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}
