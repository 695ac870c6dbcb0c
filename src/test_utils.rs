use std::cell::OnceCell;
use std::collections::BTreeSet;

use typed_arena::Arena;

use crate::{
    roles::{AttrValue, CommentKind, Modifier, Role, RoledValues},
    tree::{Ast, AstBuilder, AstNode, NodeKind},
};

/// Provides a set of utilities to help write concise tests.
/// All trees built from one context share a node builder, so their ids are
/// globally distinct within the test.
pub(crate) struct TestContext<'a> {
    arena: Arena<AstNode<'a>>,
    ref_arena: Arena<&'a AstNode<'a>>,
    builder: OnceCell<AstBuilder<'a>>,
}

pub(crate) fn ctx<'a>() -> TestContext<'a> {
    TestContext {
        arena: Arena::new(),
        ref_arena: Arena::new(),
        builder: OnceCell::new(),
    }
}

/// Builds a modifier-set attribute value.
pub(crate) fn modifiers(mods: &[Modifier]) -> AttrValue {
    AttrValue::Modifiers(mods.iter().copied().collect::<BTreeSet<_>>())
}

impl<'a> TestContext<'a> {
    pub(crate) fn builder(&'a self) -> &'a AstBuilder<'a> {
        self.builder
            .get_or_init(|| AstBuilder::new(&self.arena, &self.ref_arena))
    }

    fn named(name: &str) -> RoledValues {
        RoledValues::new().with(Role::Name, AttrValue::str(name))
    }

    pub(crate) fn module(&'a self, children: Vec<&'a AstNode<'a>>) -> Ast<'a> {
        let root = self
            .builder()
            .node(NodeKind::Module, None, RoledValues::new(), children);
        self.builder().build(root)
    }

    pub(crate) fn import(&'a self, name: &str) -> &'a AstNode<'a> {
        self.builder().node(
            NodeKind::Import,
            Some(Role::Import),
            Self::named(name),
            vec![],
        )
    }

    pub(crate) fn comment(&'a self, text: &str) -> &'a AstNode<'a> {
        self.builder().node(
            NodeKind::Comment,
            Some(Role::Comment),
            RoledValues::new()
                .with(Role::CommentContent, AttrValue::str(text))
                .with(Role::CommentKind, AttrValue::Comment(CommentKind::Line)),
            vec![],
        )
    }

    pub(crate) fn class(&'a self, name: &str, members: Vec<&'a AstNode<'a>>) -> &'a AstNode<'a> {
        self.builder()
            .node(NodeKind::Class, Some(Role::Member), Self::named(name), members)
    }

    pub(crate) fn type_ref(&'a self, name: &str, role: Role) -> &'a AstNode<'a> {
        self.builder()
            .node(NodeKind::TypeRef, Some(role), Self::named(name), vec![])
    }

    pub(crate) fn field(&'a self, name: &str, type_name: &str) -> &'a AstNode<'a> {
        self.builder().node(
            NodeKind::Field,
            Some(Role::Member),
            Self::named(name),
            vec![self.type_ref(type_name, Role::Type)],
        )
    }

    pub(crate) fn param(&'a self, name: &str, type_name: &str) -> &'a AstNode<'a> {
        self.builder().node(
            NodeKind::Parameter,
            Some(Role::Parameter),
            Self::named(name),
            vec![self.type_ref(type_name, Role::Type)],
        )
    }

    pub(crate) fn block(&'a self, role: Role, statements: Vec<&'a AstNode<'a>>) -> &'a AstNode<'a> {
        self.builder()
            .node(NodeKind::Block, Some(role), RoledValues::new(), statements)
    }

    pub(crate) fn method(
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

    pub(crate) fn call(&'a self, name: &str, arg_names: Vec<&str>) -> &'a AstNode<'a> {
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

    pub(crate) fn if_stmt(
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

    pub(crate) fn return_stmt(&'a self, value: Option<&str>) -> &'a AstNode<'a> {
        let children = value
            .map(|value| {
                vec![self.builder().node(
                    NodeKind::Literal,
                    Some(Role::Expression),
                    RoledValues::new().with(Role::Value, AttrValue::str(value)),
                    vec![],
                )]
            })
            .unwrap_or_default();
        self.builder()
            .node(NodeKind::Return, Some(Role::Statement), RoledValues::new(), children)
    }

}
