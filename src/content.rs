use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::{
    changeset::ContentEntry,
    class_mapping::{ClassMapping, Leader},
    line_based::line_based_merge,
    pcs::Revision,
    roles::{AttrValue, Modifier, Role, RoledValues},
    settings::DisplaySettings,
};

/// A disagreement over a scalar attribute of a node, surviving content merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentConflict {
    pub role: Role,
    pub base: Option<AttrValue>,
    pub left: AttrValue,
    pub right: AttrValue,
    /// Whether a partially merged value was stored for the role despite the
    /// conflict (in which case the stored value is printed, not the sides).
    pub partial: bool,
}

/// The outcome of merging the scalar content of one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedContent {
    pub values: RoledValues,
    pub conflicts: Vec<ContentConflict>,
}

/// What a role handler decided about a three-way disagreement.
enum HandlerOutcome {
    /// The disagreement is fully resolved to this value
    Resolved(AttrValue),
    /// A best-effort value was computed but the disagreement is still
    /// reported as a conflict
    Partial(AttrValue),
    /// The handler could not reconcile the values
    Unresolved,
}

/// Context made available to role handlers, letting them inspect the
/// structure of the node whose content is being merged.
struct HandlerContext<'a, 'b> {
    leader: Leader<'a>,
    class_mapping: &'b ClassMapping<'a>,
    settings: &'b DisplaySettings,
}

type Handler = for<'a, 'b> fn(
    Option<&AttrValue>,
    &AttrValue,
    &AttrValue,
    &HandlerContext<'a, 'b>,
) -> HandlerOutcome;

/// Merges the scalar attributes of nodes whose content diverges between
/// revisions, dispatching irreconcilable roles to per-role handlers.
pub(crate) struct ContentMerger<'a, 'b> {
    class_mapping: &'b ClassMapping<'a>,
    settings: &'b DisplaySettings,
    handlers: FxHashMap<Role, Handler>,
}

impl<'a, 'b> ContentMerger<'a, 'b> {
    pub(crate) fn new(class_mapping: &'b ClassMapping<'a>, settings: &'b DisplaySettings) -> Self {
        let mut result = Self {
            class_mapping,
            settings,
            handlers: FxHashMap::default(),
        };
        result.register(Role::IsImplicit, implicit_handler);
        result.register(Role::Modifiers, modifiers_handler);
        result.register(Role::IsUpper, wildcard_bound_handler);
        result.register(Role::CommentContent, comment_handler);
        result
    }

    fn register(&mut self, role: Role, handler: Handler) {
        let previous = self.handlers.insert(role, handler);
        assert!(
            previous.is_none(),
            "a content handler is already registered for role {role}"
        );
    }

    /// Merges the content observed for one node across revisions.
    pub(crate) fn merge(&self, leader: Leader<'a>, entries: &[ContentEntry]) -> MergedContent {
        let base = entries.iter().find(|e| e.revision == Revision::Base);
        let left = entries.iter().find(|e| e.revision == Revision::Left);
        let right = entries.iter().find(|e| e.revision == Revision::Right);

        let (left, right) = match (left, right) {
            (Some(left), Some(right)) => (left, right),
            // only one side still carries the node: its values win outright
            (Some(side), None) | (None, Some(side)) => {
                return MergedContent {
                    values: side.values.clone(),
                    conflicts: Vec::new(),
                };
            }
            (None, None) => {
                let values = base.map(|b| b.values.clone()).unwrap_or_default();
                return MergedContent {
                    values,
                    conflicts: Vec::new(),
                };
            }
        };

        let context = HandlerContext {
            leader,
            class_mapping: self.class_mapping,
            settings: self.settings,
        };

        let mut values = RoledValues::new();
        let mut conflicts = Vec::new();
        for ((role, left_value), (_, right_value)) in left.values.iter().zip(right.values.iter()) {
            let base_value = base.and_then(|b| b.values.get(*role));
            if left_value == right_value {
                values.set(*role, left_value.clone());
            } else if base_value == Some(left_value) {
                values.set(*role, right_value.clone());
            } else if base_value == Some(right_value) {
                values.set(*role, left_value.clone());
            } else {
                let outcome = match self.handlers.get(role) {
                    Some(handler) => handler(base_value, left_value, right_value, &context),
                    None => HandlerOutcome::Unresolved,
                };
                match outcome {
                    HandlerOutcome::Resolved(value) => values.set(*role, value),
                    HandlerOutcome::Partial(value) => {
                        values.set(*role, value);
                        conflicts.push(ContentConflict {
                            role: *role,
                            base: base_value.cloned(),
                            left: left_value.clone(),
                            right: right_value.clone(),
                            partial: true,
                        });
                    }
                    HandlerOutcome::Unresolved => {
                        // by convention the left value is kept alongside the conflict
                        values.set(*role, left_value.clone());
                        conflicts.push(ContentConflict {
                            role: *role,
                            base: base_value.cloned(),
                            left: left_value.clone(),
                            right: right_value.clone(),
                            partial: false,
                        });
                    }
                }
            }
        }
        MergedContent { values, conflicts }
    }
}

/// Implicitness flags: when the base value is present and both sides flipped
/// it, the flip wins; without a base, stay explicit.
fn implicit_handler(
    base: Option<&AttrValue>,
    left: &AttrValue,
    right: &AttrValue,
    _context: &HandlerContext,
) -> HandlerOutcome {
    match base {
        Some(AttrValue::Bool(base_value))
            if left != base.unwrap() && right != base.unwrap() =>
        {
            HandlerOutcome::Resolved(AttrValue::Bool(!base_value))
        }
        _ => HandlerOutcome::Resolved(AttrValue::Bool(false)),
    }
}

/// Modifier sets: keywords are unioned with deletions honored, visibility
/// changes on both sides conflict (keeping the left one).
fn modifiers_handler(
    base: Option<&AttrValue>,
    left: &AttrValue,
    right: &AttrValue,
    _context: &HandlerContext,
) -> HandlerOutcome {
    let empty = BTreeSet::new();
    let base_set = base.and_then(AttrValue::as_modifiers).unwrap_or(&empty);
    let (Some(left_set), Some(right_set)) = (left.as_modifiers(), right.as_modifiers()) else {
        return HandlerOutcome::Unresolved;
    };

    let mut visibilities: BTreeSet<Modifier> = base_set
        .iter()
        .chain(left_set.iter())
        .chain(right_set.iter())
        .copied()
        .filter(|modifier| modifier.is_visibility())
        .collect();
    if visibilities.len() > 1 {
        // a visibility that one side moved away from is dropped
        visibilities.retain(|visibility| !base_set.contains(visibility));
    }

    let mut conflicting = false;
    let merged_visibility: BTreeSet<Modifier> = if visibilities.len() > 1 {
        conflicting = true;
        left_set
            .iter()
            .copied()
            .filter(|modifier| modifier.is_visibility())
            .collect()
    } else {
        visibilities
    };

    let others: BTreeSet<Modifier> = left_set
        .iter()
        .chain(right_set.iter())
        .copied()
        .filter(|modifier| !modifier.is_visibility())
        .filter(|modifier| {
            let in_left = left_set.contains(modifier);
            let in_right = right_set.contains(modifier);
            (in_left && in_right) || (in_left != in_right && !base_set.contains(modifier))
        })
        .collect();

    let merged = AttrValue::Modifiers(merged_visibility.into_iter().chain(others).collect());
    if conflicting {
        HandlerOutcome::Partial(merged)
    } else {
        HandlerOutcome::Resolved(merged)
    }
}

/// Wildcard bounds: when exactly one side carries an explicit bound, its
/// direction wins; two diverging explicit bounds stay unresolved.
fn wildcard_bound_handler(
    _base: Option<&AttrValue>,
    left: &AttrValue,
    right: &AttrValue,
    context: &HandlerContext,
) -> HandlerOutcome {
    let has_explicit_bound = |revision| {
        context
            .class_mapping
            .node_at_rev(&context.leader, revision)
            .is_some_and(|node| node.child_with_role(Role::Bound).is_some())
    };
    let left_explicit = has_explicit_bound(Revision::Left);
    let right_explicit = has_explicit_bound(Revision::Right);
    match (left_explicit, right_explicit) {
        (true, false) => HandlerOutcome::Resolved(left.clone()),
        (false, true) => HandlerOutcome::Resolved(right.clone()),
        _ => HandlerOutcome::Unresolved,
    }
}

/// Comment bodies are merged textually.
fn comment_handler(
    base: Option<&AttrValue>,
    left: &AttrValue,
    right: &AttrValue,
    context: &HandlerContext,
) -> HandlerOutcome {
    let base_text = base.and_then(AttrValue::as_str).unwrap_or("");
    let (Some(left_text), Some(right_text)) = (left.as_str(), right.as_str()) else {
        return HandlerOutcome::Unresolved;
    };
    let merged = line_based_merge(
        &with_final_newline(base_text),
        &with_final_newline(left_text),
        &with_final_newline(right_text),
        context.settings,
    );
    if merged.conflict_count == 0 {
        let mut contents = merged.contents;
        if contents.ends_with('\n') {
            contents.pop();
        }
        HandlerOutcome::Resolved(AttrValue::Str(contents))
    } else {
        HandlerOutcome::Unresolved
    }
}

fn with_final_newline(text: &str) -> String {
    if text.is_empty() || text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{ctx, modifiers};

    use super::*;

    fn entry(revision: Revision, values: RoledValues) -> ContentEntry {
        ContentEntry { revision, values }
    }

    fn named(name: &str) -> RoledValues {
        RoledValues::new().with(Role::Name, AttrValue::str(name))
    }

    fn merger_fixture<'a, 'b>(
        class_mapping: &'b ClassMapping<'a>,
        settings: &'b DisplaySettings,
    ) -> ContentMerger<'a, 'b> {
        ContentMerger::new(class_mapping, settings)
    }

    #[test]
    fn unchanged_side_yields_other() {
        let ctx = ctx();
        let tree = ctx.module(vec![ctx.class("Foo", vec![])]);
        let leader = crate::class_mapping::Leader::for_test(Revision::Base, tree.root());

        let class_mapping = ClassMapping::new();
        let settings = DisplaySettings::default();
        let merger = merger_fixture(&class_mapping, &settings);

        let merged = merger.merge(
            leader,
            &[
                entry(Revision::Base, named("foo")),
                entry(Revision::Left, named("bar")),
                entry(Revision::Right, named("foo")),
            ],
        );
        assert_eq!(merged.values.get(Role::Name), Some(&AttrValue::str("bar")));
        assert!(merged.conflicts.is_empty());
    }

    #[test]
    fn same_rename_on_both_sides_is_clean() {
        let ctx = ctx();
        let tree = ctx.module(vec![ctx.class("Foo", vec![])]);
        let leader = crate::class_mapping::Leader::for_test(Revision::Base, tree.root());

        let class_mapping = ClassMapping::new();
        let settings = DisplaySettings::default();
        let merger = merger_fixture(&class_mapping, &settings);

        let merged = merger.merge(
            leader,
            &[
                entry(Revision::Base, named("foo")),
                entry(Revision::Left, named("bar")),
                entry(Revision::Right, named("bar")),
            ],
        );
        assert_eq!(merged.values.get(Role::Name), Some(&AttrValue::str("bar")));
        assert!(merged.conflicts.is_empty());
    }

    #[test]
    fn diverging_renames_conflict_keeping_left() {
        let ctx = ctx();
        let tree = ctx.module(vec![ctx.class("Foo", vec![])]);
        let leader = crate::class_mapping::Leader::for_test(Revision::Base, tree.root());

        let class_mapping = ClassMapping::new();
        let settings = DisplaySettings::default();
        let merger = merger_fixture(&class_mapping, &settings);

        let merged = merger.merge(
            leader,
            &[
                entry(Revision::Base, named("foo")),
                entry(Revision::Left, named("bar")),
                entry(Revision::Right, named("baz")),
            ],
        );
        assert_eq!(merged.values.get(Role::Name), Some(&AttrValue::str("bar")));
        assert_eq!(merged.conflicts.len(), 1);
        let conflict = &merged.conflicts[0];
        assert_eq!(conflict.role, Role::Name);
        assert_eq!(conflict.left, AttrValue::str("bar"));
        assert_eq!(conflict.right, AttrValue::str("baz"));
        assert!(!conflict.partial);
    }

    #[test]
    fn disjoint_modifier_additions_are_unioned() {
        let ctx = ctx();
        let tree = ctx.module(vec![ctx.class("Foo", vec![])]);
        let leader = crate::class_mapping::Leader::for_test(Revision::Base, tree.root());

        let class_mapping = ClassMapping::new();
        let settings = DisplaySettings::default();
        let merger = merger_fixture(&class_mapping, &settings);

        let values = |mods: &[Modifier]| {
            RoledValues::new()
                .with(Role::Name, AttrValue::str("f"))
                .with(Role::Modifiers, modifiers(mods))
        };
        let merged = merger.merge(
            leader,
            &[
                entry(Revision::Base, values(&[Modifier::Public])),
                entry(
                    Revision::Left,
                    values(&[Modifier::Public, Modifier::Final]),
                ),
                entry(
                    Revision::Right,
                    values(&[Modifier::Public, Modifier::Static]),
                ),
            ],
        );
        assert_eq!(
            merged.values.get(Role::Modifiers),
            Some(&modifiers(&[
                Modifier::Public,
                Modifier::Static,
                Modifier::Final
            ]))
        );
        assert!(merged.conflicts.is_empty());
    }

    #[test]
    fn modifier_deletion_is_honored() {
        let ctx = ctx();
        let tree = ctx.module(vec![ctx.class("Foo", vec![])]);
        let leader = crate::class_mapping::Leader::for_test(Revision::Base, tree.root());

        let class_mapping = ClassMapping::new();
        let settings = DisplaySettings::default();
        let merger = merger_fixture(&class_mapping, &settings);

        let values = |mods: &[Modifier]| {
            RoledValues::new()
                .with(Role::Name, AttrValue::str("f"))
                .with(Role::Modifiers, modifiers(mods))
        };
        // left drops `final`, right adds `static`
        let merged = merger.merge(
            leader,
            &[
                entry(Revision::Base, values(&[Modifier::Final])),
                entry(Revision::Left, values(&[])),
                entry(
                    Revision::Right,
                    values(&[Modifier::Final, Modifier::Static]),
                ),
            ],
        );
        assert_eq!(
            merged.values.get(Role::Modifiers),
            Some(&modifiers(&[Modifier::Static]))
        );
        assert!(merged.conflicts.is_empty());
    }

    #[test]
    fn visibility_conflict_keeps_left_and_reports() {
        let ctx = ctx();
        let tree = ctx.module(vec![ctx.class("Foo", vec![])]);
        let leader = crate::class_mapping::Leader::for_test(Revision::Base, tree.root());

        let class_mapping = ClassMapping::new();
        let settings = DisplaySettings::default();
        let merger = merger_fixture(&class_mapping, &settings);

        let values = |mods: &[Modifier]| {
            RoledValues::new()
                .with(Role::Name, AttrValue::str("f"))
                .with(Role::Modifiers, modifiers(mods))
        };
        // base is package-private, left goes public, right goes private
        let merged = merger.merge(
            leader,
            &[
                entry(Revision::Base, values(&[])),
                entry(Revision::Left, values(&[Modifier::Public])),
                entry(Revision::Right, values(&[Modifier::Private])),
            ],
        );
        assert_eq!(
            merged.values.get(Role::Modifiers),
            Some(&modifiers(&[Modifier::Public]))
        );
        assert_eq!(merged.conflicts.len(), 1);
        assert!(merged.conflicts[0].partial);
    }

    #[test]
    fn comment_contents_merge_textually() {
        let ctx = ctx();
        let tree = ctx.module(vec![ctx.class("Foo", vec![])]);
        let leader = crate::class_mapping::Leader::for_test(Revision::Base, tree.root());

        let class_mapping = ClassMapping::new();
        let settings = DisplaySettings::default();
        let merger = merger_fixture(&class_mapping, &settings);

        let comment = |text: &str| {
            RoledValues::new()
                .with(Role::CommentContent, AttrValue::str(text))
                .with(
                    Role::CommentKind,
                    AttrValue::Comment(crate::roles::CommentKind::Line),
                )
        };
        let merged = merger.merge(
            leader,
            &[
                entry(Revision::Base, comment("first\nsecond")),
                entry(Revision::Left, comment("first!\nsecond")),
                entry(Revision::Right, comment("first\nsecond?")),
            ],
        );
        assert_eq!(
            merged.values.get(Role::CommentContent),
            Some(&AttrValue::str("first!\nsecond?"))
        );
        assert!(merged.conflicts.is_empty());
    }
}
