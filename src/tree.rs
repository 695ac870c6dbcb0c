use std::{
    cell::{Cell, UnsafeCell},
    fmt::Display,
    hash::{Hash, Hasher},
};

use either::Either;
use itertools::Itertools;
use typed_arena::Arena;

use crate::roles::{AttrValue, CommentKind, OperatorKind, Role, RoledValues};

/// The kind of an AST node, a closed enum over which the merge engine
/// dispatches when extracting scalar content or exploding child lists.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Module,
    Import,
    Comment,
    Class,
    Field,
    Method,
    Call,
    Parameter,
    TypeParam,
    TypeRef,
    Wildcard,
    Annotation,
    Block,
    If,
    Return,
    Local,
    Assign,
    BinaryOp,
    UnaryOp,
    Literal,
    NameRef,
    /// Sentinel kind for conflict placeholders; only appears in output trees.
    Conflict,
}

impl NodeKind {
    /// Whether nodes of this kind expose per-role virtual children in their
    /// PCS encoding, so that child lists of different roles are kept apart.
    pub fn is_exploded(self) -> bool {
        matches!(self, Self::Method | Self::Call | Self::Class)
    }

    /// The child roles of an exploded kind which get their own virtual role
    /// node. The remaining roles (body, members, receiver, ...) keep their
    /// children directly in the parent's child list.
    pub fn exploded_roles(self) -> &'static [Role] {
        match self {
            Self::Method => &[
                Role::Annotation,
                Role::TypeParam,
                Role::Parameter,
                Role::Type,
            ],
            Self::Call => &[Role::Argument],
            Self::Class => &[Role::Annotation, Role::TypeParam],
            _ => &[],
        }
    }

    /// Whether this kind can appear as a member of a type declaration.
    pub fn is_type_member(self) -> bool {
        matches!(self, Self::Field | Self::Method | Self::Class)
    }

    /// The fixed list of scalar attribute roles contributed by this kind,
    /// in the order in which they are compared during content merging.
    pub fn content_roles(self) -> &'static [Role] {
        match self {
            Self::Import | Self::TypeParam | Self::Annotation | Self::NameRef => &[Role::Name],
            Self::Class | Self::Field | Self::Local | Self::Method | Self::Parameter => {
                &[Role::Name, Role::Modifiers]
            }
            Self::Call | Self::TypeRef => &[Role::Name, Role::IsImplicit],
            Self::Wildcard => &[Role::IsUpper],
            Self::Assign | Self::BinaryOp | Self::UnaryOp => &[Role::Operator],
            Self::Literal => &[Role::Value],
            Self::Comment => &[Role::CommentContent, Role::CommentKind],
            Self::Module | Self::Block | Self::If | Self::Return | Self::Conflict => &[],
        }
    }

    /// The fallback value of an attribute role that a node of this kind
    /// carries but does not explicitly set.
    pub(crate) fn default_attr(role: Role) -> AttrValue {
        match role {
            Role::Modifiers => AttrValue::Modifiers(Default::default()),
            Role::IsImplicit | Role::IsPrimitive => AttrValue::Bool(false),
            Role::IsUpper => AttrValue::Bool(true),
            Role::Operator => AttrValue::Op(OperatorKind::Assign),
            Role::CommentKind => AttrValue::Comment(CommentKind::Line),
            Role::AnnotationKeys => AttrValue::Keys(Vec::new()),
            _ => AttrValue::Str(String::new()),
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A syntax tree.
///
/// All its nodes are allocated in an arena, which determines the lifetime
/// parameter.
#[derive(Debug)]
pub struct Ast<'a> {
    root: &'a AstNode<'a>,
}

/// A node in a syntax tree.
///
/// Node identity is its `id`, assigned monotonically when the node is built;
/// the merge layer never compares children for equality directly. The
/// pre-computed `hash` reflects the entire subtree rooted in this node, so
/// any two isomorphic subtrees have the same hash value on their root.
#[derive(Debug)]
pub struct AstNode<'a> {
    /// A statically computed hash value, taking into account the children.
    /// It is designed to be the same for any isomorphic tree.
    pub hash: u64,
    /// The children of this node (empty if this is a leaf)
    pub children: Vec<&'a AstNode<'a>>,
    /// The kind of this node
    pub kind: NodeKind,
    /// The slot this node fills in its parent (None for roots)
    pub role: Option<Role>,
    /// The scalar attributes of this node
    pub attrs: RoledValues,
    /// A monotonically assigned key, unique within the tree
    pub id: usize,
    /// A cached number of descendants
    descendant_count: usize,
    /// The parent of this node, if any.
    parent: UnsafeCell<Option<&'a AstNode<'a>>>,
    /// As the DFS of a child is a subslice of the DFS of its parent, we compute the entire DFS of
    /// the root once and slice all child DFS into this slice.
    /// This is computed when the tree is finalized and then never written to again.
    dfs: UnsafeCell<Option<&'a [&'a AstNode<'a>]>>,
}

/// Allocates nodes into an arena, assigning monotonically increasing ids
/// and installing parent pointers as trees are assembled bottom-up.
pub struct AstBuilder<'a> {
    arena: &'a Arena<AstNode<'a>>,
    ref_arena: &'a Arena<&'a AstNode<'a>>,
    next_id: Cell<usize>,
}

impl<'a> AstBuilder<'a> {
    pub fn new(arena: &'a Arena<AstNode<'a>>, ref_arena: &'a Arena<&'a AstNode<'a>>) -> Self {
        Self {
            arena,
            ref_arena,
            // start numbering after any node already allocated in the arena,
            // so that ids stay unique when several builders share it
            next_id: Cell::new(arena.len()),
        }
    }

    /// Allocates a node with the given kind, role, attributes and children.
    /// The children must have been allocated by the same builder.
    pub fn node(
        &self,
        kind: NodeKind,
        role: Option<Role>,
        attrs: RoledValues,
        children: Vec<&'a AstNode<'a>>,
    ) -> &'a AstNode<'a> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let mut hasher = crate::fxhasher();
        kind.hash(&mut hasher);
        role.hash(&mut hasher);
        attrs.hash(&mut hasher);
        children
            .iter()
            .map(|child| child.hash)
            .collect_vec()
            .hash(&mut hasher);

        let descendant_count = 1 + children
            .iter()
            .map(|child| child.descendant_count)
            .sum::<usize>();

        let result = self.arena.alloc(AstNode {
            hash: hasher.finish(),
            children,
            kind,
            role,
            attrs,
            id,
            descendant_count,
            parent: UnsafeCell::new(None),
            dfs: UnsafeCell::new(None),
        });
        result.internal_set_parent_on_children();
        result
    }

    /// Wraps a root node into an [Ast], pre-computing the DFS slices of the
    /// whole tree.
    pub fn build(&self, root: &'a AstNode<'a>) -> Ast<'a> {
        root.internal_precompute_root_dfs(self.ref_arena);
        Ast { root }
    }

    /// Recursively copies a subtree (possibly from another arena), assigning
    /// fresh ids. The copied root takes the role passed in, its descendants
    /// keep theirs.
    pub fn deep_copy<'b>(&self, node: &'b AstNode<'b>, role: Option<Role>) -> &'a AstNode<'a> {
        let children = node
            .children
            .iter()
            .map(|child| self.deep_copy(child, child.role))
            .collect();
        self.node(node.kind, role, node.attrs.clone(), children)
    }
}

impl<'a> Ast<'a> {
    /// The number of nodes in the tree
    pub fn size(&self) -> usize {
        self.root().size()
    }

    /// The root of the tree
    pub fn root(&self) -> &'a AstNode<'a> {
        self.root
    }

    /// Start a Depth-First Search in prefix order on the tree
    pub fn dfs(&self) -> impl Iterator<Item = &'a AstNode<'a>> {
        self.root().dfs()
    }
}

impl<'a> AstNode<'a> {
    fn internal_set_parent_on_children(&'a self) {
        for child in &self.children {
            unsafe { *child.parent.get() = Some(self) }
        }
    }

    fn internal_precompute_root_dfs(&'a self, ref_arena: &'a Arena<&'a AstNode<'a>>) {
        let mut result = vec![];

        let mut worklist = vec![self];
        while let Some(node) = worklist.pop() {
            worklist.extend(node.children.iter().rev());
            result.push(node);
        }

        let result = ref_arena.alloc_extend(result);

        fn process_node<'a>(node: &'a AstNode<'a>, result: &'a [&'a AstNode<'a>], i: &mut usize) {
            let start = *i;
            *i += 1;
            for child in &node.children {
                process_node(child, result, i);
            }
            let end = *i;
            unsafe { (*node.dfs.get()) = Some(&result[start..end]) };
        }

        let mut i = 0;
        process_node(self, result, &mut i);
    }

    /// The number of descendants of the node (including itself).
    pub fn size(&self) -> usize {
        self.descendant_count
    }

    /// Convenience accessor for children
    pub fn child(&self, index: usize) -> Option<&'a AstNode<'a>> {
        self.children.get(index).copied()
    }

    /// The children filling a given role in this node
    pub fn children_with_role(&self, role: Role) -> impl Iterator<Item = &'a AstNode<'a>> + '_ {
        self.children
            .iter()
            .copied()
            .filter(move |child| child.role == Some(role))
    }

    /// The single child filling a given role, if any
    pub fn child_with_role(&self, role: Role) -> Option<&'a AstNode<'a>> {
        self.children_with_role(role).next()
    }

    /// Convenience function
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Convenience function
    pub fn is_root(&'a self) -> bool {
        self.parent().is_none()
    }

    /// Depth-first search iterator
    pub fn dfs(&'a self) -> impl Iterator<Item = &'a AstNode<'a>> {
        // SAFETY: This is not written to after the tree is finalized.
        if let Some(dfs) = unsafe { &*self.dfs.get() } {
            Either::Left(dfs.iter().copied())
        } else {
            Either::Right(DfsIterator {
                current: vec![self],
            })
        }
    }

    /// Ancestors iterator (which includes the node itself)
    pub fn ancestors(&'a self) -> impl Iterator<Item = &'a AstNode<'a>> {
        AncestorsIterator { cursor: Some(self) }
    }

    /// Get the parent of this node, if any
    pub fn parent(&'a self) -> Option<&'a AstNode<'a>> {
        unsafe { *self.parent.get() }
    }

    /// Whether this node is isomorphic to another
    pub fn isomorphic_to(&'a self, t2: &'a AstNode<'a>) -> bool {
        let mut zipped = self.dfs().zip(t2.dfs());
        self.hash == t2.hash
            && zipped.all(|(n1, n2)| {
                n1.kind == n2.kind
                    && n1.role == n2.role
                    && n1.attrs == n2.attrs
                    && n1.children.len() == n2.children.len()
            })
    }

    /// The scalar attribute stored under the given role, if set explicitly.
    pub fn attr(&self, role: Role) -> Option<&AttrValue> {
        self.attrs.get(role)
    }

    /// The `Name` attribute as a string slice, for the many kinds that carry one.
    pub fn name(&self) -> Option<&str> {
        self.attr(Role::Name).and_then(AttrValue::as_str)
    }

    /// The scalar content of this node, as the fixed-length roled-value
    /// tuple determined by its kind. Unset attributes are filled in with
    /// their kind-specific defaults, so that tuples extracted from matched
    /// nodes always align positionally.
    pub fn content_values(&self) -> RoledValues {
        self.kind
            .content_roles()
            .iter()
            .map(|role| {
                let value = self
                    .attrs
                    .get(*role)
                    .cloned()
                    .unwrap_or_else(|| NodeKind::default_attr(*role));
                (*role, value)
            })
            .collect()
    }
}

/// We pre-compute hash values for all nodes,
/// so we make sure those are used instead of recursively walking the tree
/// each time a hash is computed.
impl Hash for AstNode<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
        self.id.hash(state);
        self.kind.hash(state);
    }
}

impl PartialEq for AstNode<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.id == other.id && self.kind == other.kind
    }
}

impl Eq for AstNode<'_> {}

// AstNode fails to be Sync by default because it contains
// an UnsafeCell. But this cell is only mutated during initialization and only
// ever refers to something that lives as long as the node itself (thanks to the
// use of arenas) so it's fine to share it across threads.
unsafe impl Sync for AstNode<'_> {}
unsafe impl Send for AstNode<'_> {}

impl Display for AstNode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) if !name.is_empty() => write!(f, "{}#{}({name})", self.kind, self.id),
            _ => write!(f, "{}#{}", self.kind, self.id),
        }
    }
}

struct DfsIterator<'a> {
    current: Vec<&'a AstNode<'a>>,
}

impl<'a> Iterator for DfsIterator<'a> {
    type Item = &'a AstNode<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current.pop()?;
        self.current.extend(node.children.iter().rev());
        Some(node)
    }
}

struct AncestorsIterator<'a> {
    cursor: Option<&'a AstNode<'a>>,
}

impl<'a> Iterator for AncestorsIterator<'a> {
    type Item = &'a AstNode<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cursor?;
        self.cursor = node.parent();
        Some(node)
    }
}
