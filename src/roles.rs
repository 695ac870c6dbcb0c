use std::collections::BTreeSet;
use std::fmt::Display;

/// The named structural slot that a child occupies in its parent,
/// doubling as the key under which a scalar attribute is stored on a node.
///
/// The attribute roles ([`Role::Name`] up to [`Role::AnnotationKeys`]) never
/// appear as child slots; the remaining roles never appear as attribute keys.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    // scalar attribute roles
    Name,
    Value,
    Operator,
    Modifiers,
    IsUpper,
    IsImplicit,
    IsPrimitive,
    CommentContent,
    CommentKind,
    AnnotationKeys,
    // structural child roles
    Annotation,
    TypeParam,
    Parameter,
    Type,
    Body,
    Member,
    Statement,
    Condition,
    Then,
    Else,
    Receiver,
    Argument,
    Bound,
    AnnotationValue,
    Assigned,
    Assignment,
    Operand,
    Import,
    Comment,
    Expression,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A modifier keyword carried by a declaration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modifier {
    Public,
    Protected,
    Private,
    Abstract,
    Static,
    Final,
    Default,
    Synchronized,
    Native,
    Transient,
    Volatile,
    Strictfp,
}

impl Modifier {
    /// Whether this modifier determines the visibility of its declaration.
    /// At most one visibility modifier may be present on a declaration,
    /// absence meaning package-private.
    pub fn is_visibility(self) -> bool {
        matches!(self, Self::Public | Self::Protected | Self::Private)
    }
}

impl Display for Modifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keyword = match self {
            Self::Public => "public",
            Self::Protected => "protected",
            Self::Private => "private",
            Self::Abstract => "abstract",
            Self::Static => "static",
            Self::Final => "final",
            Self::Default => "default",
            Self::Synchronized => "synchronized",
            Self::Native => "native",
            Self::Transient => "transient",
            Self::Volatile => "volatile",
            Self::Strictfp => "strictfp",
        };
        f.write_str(keyword)
    }
}

/// The kind of a unary, binary or compound-assignment operator node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperatorKind {
    Plus,
    Minus,
    Mul,
    Div,
    Rem,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Not,
    Neg,
    Assign,
    PlusAssign,
    MinusAssign,
    MulAssign,
    DivAssign,
}

impl Display for OperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::And => "&&",
            Self::Or => "||",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Not => "!",
            Self::Neg => "-",
            Self::Assign => "=",
            Self::PlusAssign => "+=",
            Self::MinusAssign => "-=",
            Self::MulAssign => "*=",
            Self::DivAssign => "/=",
        };
        f.write_str(token)
    }
}

/// The flavor of a comment node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommentKind {
    Line,
    Block,
    Doc,
}

/// A scalar attribute value attached to a node under some [`Role`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttrValue {
    Str(String),
    Bool(bool),
    Op(OperatorKind),
    Modifiers(BTreeSet<Modifier>),
    Comment(CommentKind),
    Keys(Vec<String>),
}

impl AttrValue {
    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_modifiers(&self) -> Option<&BTreeSet<Modifier>> {
        match self {
            Self::Modifiers(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_keys(&self) -> Option<&[String]> {
        match self {
            Self::Keys(k) => Some(k),
            _ => None,
        }
    }
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Op(op) => write!(f, "{op}"),
            Self::Modifiers(mods) => {
                let mut first = true;
                for modifier in mods {
                    if !first {
                        f.write_str(" ")?;
                    }
                    first = false;
                    write!(f, "{modifier}")?;
                }
                Ok(())
            }
            Self::Comment(kind) => write!(f, "{kind:?}"),
            Self::Keys(keys) => {
                let mut first = true;
                for key in keys {
                    if !first {
                        f.write_str(",")?;
                    }
                    first = false;
                    f.write_str(key)?;
                }
                Ok(())
            }
        }
    }
}

/// The ordered list of scalar `(role, value)` attributes of a node.
///
/// The order is fixed per node kind, so that two `RoledValues` extracted
/// from matched nodes can be compared positionally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RoledValues(Vec<(Role, AttrValue)>);

impl RoledValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion, replacing any previous value for the role.
    pub fn with(mut self, role: Role, value: AttrValue) -> Self {
        self.set(role, value);
        self
    }

    pub fn set(&mut self, role: Role, value: AttrValue) {
        match self.0.iter_mut().find(|(r, _)| *r == role) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((role, value)),
        }
    }

    pub fn get(&self, role: Role) -> Option<&AttrValue> {
        self.0.iter().find(|(r, _)| *r == role).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Role, AttrValue)> {
        self.0.iter()
    }

    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().map(|(r, _)| *r)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Role, AttrValue)> for RoledValues {
    fn from_iter<I: IntoIterator<Item = (Role, AttrValue)>>(iter: I) -> Self {
        let mut result = Self::new();
        for (role, value) in iter {
            result.set(role, value);
        }
        result
    }
}

impl IntoIterator for RoledValues {
    type Item = (Role, AttrValue);
    type IntoIter = std::vec::IntoIter<(Role, AttrValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
