// not every test binary exercises every helper
#![allow(dead_code)]

use std::cell::OnceCell;
use std::collections::BTreeSet;

use typed_arena::Arena;

use astmerge::{
    MergeOutcome,
    matching::Matching,
    merge,
    roles::{AttrValue, CommentKind, Modifier, Role, RoledValues},
    settings::DisplaySettings,
    tree::{Ast, AstBuilder, AstNode, NodeKind},
    tree_matcher::{KeyedMatcher, TreeMatcher},
};

/// Arena-backed context from which all trees of a test are built.
pub struct Trees<'a> {
    arena: Arena<AstNode<'a>>,
    ref_arena: Arena<&'a AstNode<'a>>,
    output_arena: Arena<AstNode<'a>>,
    output_ref_arena: Arena<&'a AstNode<'a>>,
    builder: OnceCell<AstBuilder<'a>>,
}

pub fn trees<'a>() -> Trees<'a> {
    Trees {
        arena: Arena::new(),
        ref_arena: Arena::new(),
        output_arena: Arena::new(),
        output_ref_arena: Arena::new(),
        builder: OnceCell::new(),
    }
}

pub fn mods(mods: &[Modifier]) -> AttrValue {
    AttrValue::Modifiers(mods.iter().copied().collect::<BTreeSet<_>>())
}

impl<'a> Trees<'a> {
    pub fn builder(&'a self) -> &'a AstBuilder<'a> {
        self.builder
            .get_or_init(|| AstBuilder::new(&self.arena, &self.ref_arena))
    }

    /// Runs a merge with the default matchers and settings.
    pub fn merge(
        &'a self,
        base: &Ast<'a>,
        left: &Ast<'a>,
        right: &Ast<'a>,
    ) -> MergeOutcome<'a> {
        self.merge_with(base, left, right, &KeyedMatcher::primary(), &KeyedMatcher::auxiliary())
    }

    /// Runs a merge with custom matchers.
    pub fn merge_with(
        &'a self,
        base: &Ast<'a>,
        left: &Ast<'a>,
        right: &Ast<'a>,
        base_matcher: &dyn TreeMatcher,
        left_right_matcher: &dyn TreeMatcher,
    ) -> MergeOutcome<'a> {
        merge(
            base,
            left,
            right,
            base_matcher,
            left_right_matcher,
            &DisplaySettings::default(),
            &self.output_arena,
            &self.output_ref_arena,
        )
        .expect("merge failed")
    }

    /// The canonical rendering of a tree: the result of merging it with itself.
    pub fn render_of(&'a self, tree: &Ast<'a>) -> String {
        let outcome = self.merge(tree, tree, tree);
        assert_eq!(outcome.conflict_count, 0, "identity merge has conflicts");
        outcome.render(&DisplaySettings::default())
    }

    fn named(name: &str) -> RoledValues {
        RoledValues::new().with(Role::Name, AttrValue::str(name))
    }

    pub fn module(&'a self, children: Vec<&'a AstNode<'a>>) -> Ast<'a> {
        let root = self
            .builder()
            .node(NodeKind::Module, None, RoledValues::new(), children);
        self.builder().build(root)
    }

    pub fn import(&'a self, name: &str) -> &'a AstNode<'a> {
        self.builder().node(
            NodeKind::Import,
            Some(Role::Import),
            Self::named(name),
            vec![],
        )
    }

    pub fn comment(&'a self, text: &str) -> &'a AstNode<'a> {
        self.builder().node(
            NodeKind::Comment,
            Some(Role::Comment),
            RoledValues::new()
                .with(Role::CommentContent, AttrValue::str(text))
                .with(Role::CommentKind, AttrValue::Comment(CommentKind::Line)),
            vec![],
        )
    }

    pub fn class(&'a self, name: &str, members: Vec<&'a AstNode<'a>>) -> &'a AstNode<'a> {
        self.builder()
            .node(NodeKind::Class, Some(Role::Member), Self::named(name), members)
    }

    pub fn type_ref(&'a self, name: &str, role: Role) -> &'a AstNode<'a> {
        self.builder()
            .node(NodeKind::TypeRef, Some(role), Self::named(name), vec![])
    }

    pub fn field(&'a self, name: &str, type_name: &str) -> &'a AstNode<'a> {
        self.builder().node(
            NodeKind::Field,
            Some(Role::Member),
            Self::named(name),
            vec![self.type_ref(type_name, Role::Type)],
        )
    }

    pub fn field_mods(
        &'a self,
        name: &str,
        modifiers: &[Modifier],
        type_name: &str,
    ) -> &'a AstNode<'a> {
        self.builder().node(
            NodeKind::Field,
            Some(Role::Member),
            Self::named(name).with(Role::Modifiers, mods(modifiers)),
            vec![self.type_ref(type_name, Role::Type)],
        )
    }

    pub fn param(&'a self, name: &str, type_name: &str) -> &'a AstNode<'a> {
        self.builder().node(
            NodeKind::Parameter,
            Some(Role::Parameter),
            Self::named(name),
            vec![self.type_ref(type_name, Role::Type)],
        )
    }

    pub fn block(&'a self, role: Role, statements: Vec<&'a AstNode<'a>>) -> &'a AstNode<'a> {
        self.builder()
            .node(NodeKind::Block, Some(role), RoledValues::new(), statements)
    }

    pub fn method(
        &'a self,
        name: &str,
        params: Vec<&'a AstNode<'a>>,
        statements: Vec<&'a AstNode<'a>>,
    ) -> &'a AstNode<'a> {
        let mut children = params;
        children.push(self.block(Role::Body, statements));
        self.builder()
            .node(NodeKind::Method, Some(Role::Member), Self::named(name), children)
    }

    pub fn call(&'a self, name: &str, arg_names: Vec<&str>) -> &'a AstNode<'a> {
        let args = arg_names
            .into_iter()
            .map(|arg| {
                self.builder().node(
                    NodeKind::NameRef,
                    Some(Role::Argument),
                    Self::named(arg),
                    vec![],
                )
            })
            .collect();
        self.builder()
            .node(NodeKind::Call, Some(Role::Statement), Self::named(name), args)
    }

    pub fn if_stmt(
        &'a self,
        condition: &str,
        then_statements: Vec<&'a AstNode<'a>>,
    ) -> &'a AstNode<'a> {
        let condition = self.builder().node(
            NodeKind::NameRef,
            Some(Role::Condition),
            Self::named(condition),
            vec![],
        );
        let then_branch = self.block(Role::Then, then_statements);
        self.builder().node(
            NodeKind::If,
            Some(Role::Statement),
            RoledValues::new(),
            vec![condition, then_branch],
        )
    }

    pub fn return_name(&'a self, name: &str) -> &'a AstNode<'a> {
        let value = self.builder().node(
            NodeKind::NameRef,
            Some(Role::Expression),
            Self::named(name),
            vec![],
        );
        self.builder().node(
            NodeKind::Return,
            Some(Role::Statement),
            RoledValues::new(),
            vec![value],
        )
    }

    pub fn annotation(&'a self, name: &str, pairs: &[(&str, &str)]) -> &'a AstNode<'a> {
        let keys = pairs
            .iter()
            .map(|(key, _)| (*key).to_string())
            .collect::<Vec<_>>();
        let values = pairs
            .iter()
            .map(|(_, value)| {
                self.builder().node(
                    NodeKind::Literal,
                    Some(Role::AnnotationValue),
                    RoledValues::new().with(Role::Value, AttrValue::str(*value)),
                    vec![],
                )
            })
            .collect();
        self.builder().node(
            NodeKind::Annotation,
            Some(Role::Annotation),
            Self::named(name).with(Role::AnnotationKeys, AttrValue::Keys(keys)),
            values,
        )
    }
}

/// A matcher that relates nodes of the same kind and name wherever they are
/// in the trees, without caring about their parents. Deliberately eager, to
/// exercise the root-conflict recovery of the engine.
pub struct NameMatcher;

impl TreeMatcher for NameMatcher {
    fn match_trees<'a>(&self, src: &Ast<'a>, dst: &Ast<'a>) -> Matching<'a> {
        let mut matching = Matching::new();
        matching.add(src.root(), dst.root());
        for src_node in src.dfs() {
            let Some(name) = src_node.name() else { continue };
            let mut candidates = dst
                .dfs()
                .filter(|dst_node| dst_node.kind == src_node.kind && dst_node.name() == Some(name));
            if let (Some(dst_node), None) = (candidates.next(), candidates.next())
                && matching.can_be_matched(src_node, dst_node)
            {
                matching.add(src_node, dst_node);
            }
        }
        matching
    }
}

/// Delegates to [KeyedMatcher] but refuses to relate methods of trees that
/// contain class declarations. Used to force optimistic method
/// concatenation (and thus duplicate-member elimination) in tests.
pub struct MethodBlindMatcher;

impl TreeMatcher for MethodBlindMatcher {
    fn match_trees<'a>(&self, src: &Ast<'a>, dst: &Ast<'a>) -> Matching<'a> {
        let matching = KeyedMatcher::primary().match_trees(src, dst);
        let has_classes = src.dfs().any(|node| node.kind == NodeKind::Class);
        if !has_classes {
            return matching;
        }
        let mut filtered = Matching::new();
        for (dst_node, src_node) in matching.iter_right_to_left() {
            let inside_method = src_node
                .ancestors()
                .any(|ancestor| ancestor.kind == NodeKind::Method);
            if src_node.kind != NodeKind::Method && !inside_method {
                filtered.add(src_node, dst_node);
            }
        }
        filtered
    }
}
