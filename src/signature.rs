use itertools::Itertools;

use crate::{
    roles::Role,
    tree::{AstNode, NodeKind},
};

/// A key discriminating the members of a type declaration.
/// No two members of the same type should share a key; duplicates left over
/// after a merge are grouped and re-merged (or turned into conflicts).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum MemberKey {
    Method {
        name: String,
        parameter_types: Vec<String>,
    },
    Field {
        name: String,
    },
    NestedClass {
        name: String,
    },
}

/// The key of a type member, or `None` for nodes that are not members
/// (including conflict placeholders).
pub(crate) fn member_key(node: &AstNode<'_>) -> Option<MemberKey> {
    let name = node.name()?.to_string();
    match node.kind {
        NodeKind::Method => {
            let parameter_types = node
                .children_with_role(Role::Parameter)
                .map(|parameter| {
                    parameter
                        .child_with_role(Role::Type)
                        .and_then(|t| t.name())
                        .unwrap_or_default()
                        .to_string()
                })
                .collect_vec();
            Some(MemberKey::Method {
                name,
                parameter_types,
            })
        }
        NodeKind::Field => Some(MemberKey::Field { name }),
        NodeKind::Class => Some(MemberKey::NestedClass { name }),
        _ => None,
    }
}
