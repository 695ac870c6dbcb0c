use crate::{
    merged_text::MergedText,
    output_tree::OutputMetadata,
    roles::{AttrValue, CommentKind, Role},
    settings::DisplaySettings,
    tree::{AstNode, NodeKind},
};

const INDENT: &str = "    ";

/// Renders an output tree to text, expanding the conflict records attached
/// to sentinel nodes and to merged attributes into diff3-style marker
/// sections (markers always start at the beginning of a line).
pub(crate) fn render_output(
    root: &AstNode<'_>,
    meta: &OutputMetadata<'_>,
    settings: &DisplaySettings,
) -> String {
    let mut out = MergedText::new();
    print_node(root, &mut out, Some(meta), settings, "");
    out.render(settings)
}

/// Renders a subtree to plain text, without any conflict metadata.
/// Used to serialize revisions for line-based fallbacks and to print the
/// sides of structural conflicts.
pub(crate) fn plain(node: &AstNode<'_>, indentation: &str) -> String {
    let mut out = MergedText::new();
    let settings = DisplaySettings::default();
    print_node(node, &mut out, None, &settings, indentation);
    out.plain_concat()
}

/// Pretty-prints a list of nodes as statement-like lines, one per node.
pub(crate) fn plain_lines(nodes: &[&AstNode<'_>], indentation: &str) -> String {
    let mut result = String::new();
    for node in nodes {
        result.push_str(indentation);
        result.push_str(&plain(node, indentation));
        result.push_str(statement_terminator(node.kind));
        result.push('\n');
    }
    result
}

/// The terminator a node needs when printed in statement position.
fn statement_terminator(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Call
        | NodeKind::Assign
        | NodeKind::NameRef
        | NodeKind::Literal
        | NodeKind::BinaryOp
        | NodeKind::UnaryOp => ";",
        _ => "",
    }
}

/// Emits a scalar attribute of a node, replacing its text by a conflict
/// section when an unresolved content conflict is attached to that role.
fn emit_attr(
    node: &AstNode<'_>,
    role: Role,
    out: &mut MergedText,
    meta: Option<&OutputMetadata<'_>>,
    render: &dyn Fn(&AttrValue) -> String,
) {
    let conflict = meta.and_then(|meta| {
        meta.content
            .get(&node.id)?
            .iter()
            .find(|conflict| conflict.role == role && !conflict.partial)
    });
    match conflict {
        Some(conflict) => {
            let base = conflict.base.as_ref().map(render).unwrap_or_default();
            out.push_conflict(base, render(&conflict.left), render(&conflict.right));
        }
        None => {
            let value = node
                .attr(role)
                .cloned()
                .unwrap_or_else(|| NodeKind::default_attr(role));
            out.push_merged(render(&value));
        }
    }
}

fn attr_text(value: &AttrValue) -> String {
    value.to_string()
}

/// Renders a modifier set with a trailing space when non-empty.
fn modifiers_text(value: &AttrValue) -> String {
    let rendered = value.to_string();
    if rendered.is_empty() {
        rendered
    } else {
        format!("{rendered} ")
    }
}

fn print_comma_separated<'a>(
    children: impl Iterator<Item = &'a AstNode<'a>>,
    out: &mut MergedText,
    meta: Option<&OutputMetadata<'_>>,
    settings: &DisplaySettings,
    indentation: &str,
) {
    for (index, child) in children.enumerate() {
        if index > 0 {
            out.push_merged(", ");
        }
        print_node(child, out, meta, settings, indentation);
    }
}

fn print_node(
    node: &AstNode<'_>,
    out: &mut MergedText,
    meta: Option<&OutputMetadata<'_>>,
    settings: &DisplaySettings,
    indentation: &str,
) {
    match node.kind {
        NodeKind::Module => {
            for child in &node.children {
                print_node(child, out, meta, settings, indentation);
                if child.kind != NodeKind::Conflict {
                    out.push_merged("\n");
                }
            }
        }
        NodeKind::Import => {
            out.push_merged("import ");
            emit_attr(node, Role::Name, out, meta, &attr_text);
            out.push_merged(";");
        }
        NodeKind::Comment => {
            let kind = match node.attr(Role::CommentKind) {
                Some(AttrValue::Comment(kind)) => *kind,
                _ => CommentKind::Line,
            };
            match kind {
                CommentKind::Line => {
                    out.push_merged("// ");
                    emit_attr(node, Role::CommentContent, out, meta, &|value| {
                        value.to_string().replace('\n', &format!("\n{indentation}// "))
                    });
                }
                CommentKind::Block => {
                    out.push_merged("/* ");
                    emit_attr(node, Role::CommentContent, out, meta, &attr_text);
                    out.push_merged(" */");
                }
                CommentKind::Doc => {
                    out.push_merged("/** ");
                    emit_attr(node, Role::CommentContent, out, meta, &attr_text);
                    out.push_merged(" */");
                }
            }
        }
        NodeKind::Class => {
            for annotation in node.children_with_role(Role::Annotation) {
                print_node(annotation, out, meta, settings, indentation);
                out.push_merged(format!("\n{indentation}"));
            }
            emit_attr(node, Role::Modifiers, out, meta, &modifiers_text);
            out.push_merged("class ");
            emit_attr(node, Role::Name, out, meta, &attr_text);
            let type_params = node.children_with_role(Role::TypeParam).collect::<Vec<_>>();
            if !type_params.is_empty() {
                out.push_merged("<");
                print_comma_separated(
                    type_params.into_iter(),
                    out,
                    meta,
                    settings,
                    indentation,
                );
                out.push_merged(">");
            }
            let members = node
                .children
                .iter()
                .filter(|child| {
                    !matches!(child.role, Some(Role::Annotation) | Some(Role::TypeParam))
                })
                .collect::<Vec<_>>();
            if members.is_empty() {
                out.push_merged(" {}");
            } else {
                out.push_merged(" {\n");
                let member_indentation = format!("{indentation}{INDENT}");
                for member in members {
                    if member.kind == NodeKind::Conflict {
                        print_node(member, out, meta, settings, &member_indentation);
                        continue;
                    }
                    out.push_merged(member_indentation.clone());
                    print_node(member, out, meta, settings, &member_indentation);
                    out.push_merged("\n");
                }
                out.push_merged(format!("{indentation}}}"));
            }
        }
        NodeKind::Field => {
            emit_attr(node, Role::Modifiers, out, meta, &modifiers_text);
            if let Some(field_type) = node.child_with_role(Role::Type) {
                print_node(field_type, out, meta, settings, indentation);
                out.push_merged(" ");
            }
            emit_attr(node, Role::Name, out, meta, &attr_text);
            if let Some(initializer) = node.child_with_role(Role::Assignment) {
                out.push_merged(" = ");
                print_node(initializer, out, meta, settings, indentation);
            }
            out.push_merged(";");
        }
        NodeKind::Method => {
            for annotation in node.children_with_role(Role::Annotation) {
                print_node(annotation, out, meta, settings, indentation);
                out.push_merged(format!("\n{indentation}"));
            }
            emit_attr(node, Role::Modifiers, out, meta, &modifiers_text);
            let type_params = node.children_with_role(Role::TypeParam).collect::<Vec<_>>();
            if !type_params.is_empty() {
                out.push_merged("<");
                print_comma_separated(
                    type_params.into_iter(),
                    out,
                    meta,
                    settings,
                    indentation,
                );
                out.push_merged("> ");
            }
            match node.child_with_role(Role::Type) {
                Some(return_type) => {
                    print_node(return_type, out, meta, settings, indentation);
                    out.push_merged(" ");
                }
                None => out.push_merged("void "),
            }
            emit_attr(node, Role::Name, out, meta, &attr_text);
            out.push_merged("(");
            print_comma_separated(
                node.children_with_role(Role::Parameter),
                out,
                meta,
                settings,
                indentation,
            );
            out.push_merged(")");
            match node.child_with_role(Role::Body) {
                Some(body) => {
                    out.push_merged(" ");
                    print_node(body, out, meta, settings, indentation);
                }
                None => out.push_merged(";"),
            }
        }
        NodeKind::Call => {
            if let Some(receiver) = node.child_with_role(Role::Receiver) {
                print_node(receiver, out, meta, settings, indentation);
                out.push_merged(".");
            }
            emit_attr(node, Role::Name, out, meta, &attr_text);
            out.push_merged("(");
            print_comma_separated(
                node.children_with_role(Role::Argument),
                out,
                meta,
                settings,
                indentation,
            );
            out.push_merged(")");
        }
        NodeKind::Parameter => {
            emit_attr(node, Role::Modifiers, out, meta, &modifiers_text);
            if let Some(param_type) = node.child_with_role(Role::Type) {
                print_node(param_type, out, meta, settings, indentation);
                out.push_merged(" ");
            }
            emit_attr(node, Role::Name, out, meta, &attr_text);
        }
        NodeKind::TypeParam => {
            emit_attr(node, Role::Name, out, meta, &attr_text);
            if let Some(bound) = node.child_with_role(Role::Bound) {
                out.push_merged(" extends ");
                print_node(bound, out, meta, settings, indentation);
            }
        }
        NodeKind::TypeRef => {
            emit_attr(node, Role::Name, out, meta, &attr_text);
            let type_args = node.children_with_role(Role::TypeParam).collect::<Vec<_>>();
            if !type_args.is_empty() {
                out.push_merged("<");
                print_comma_separated(type_args.into_iter(), out, meta, settings, indentation);
                out.push_merged(">");
            }
        }
        NodeKind::Wildcard => {
            out.push_merged("?");
            if let Some(bound) = node.child_with_role(Role::Bound) {
                emit_attr(node, Role::IsUpper, out, meta, &|value| {
                    if value.as_bool().unwrap_or(true) {
                        " extends ".to_string()
                    } else {
                        " super ".to_string()
                    }
                });
                print_node(bound, out, meta, settings, indentation);
            }
        }
        NodeKind::Annotation => {
            out.push_merged("@");
            emit_attr(node, Role::Name, out, meta, &attr_text);
            let values = node
                .children_with_role(Role::AnnotationValue)
                .collect::<Vec<_>>();
            if !values.is_empty() {
                let keys = node
                    .attr(Role::AnnotationKeys)
                    .and_then(AttrValue::as_keys)
                    .unwrap_or(&[]);
                out.push_merged("(");
                for (index, value) in values.into_iter().enumerate() {
                    if index > 0 {
                        out.push_merged(", ");
                    }
                    if let Some(key) = keys.get(index) {
                        out.push_merged(format!("{key} = "));
                    }
                    print_node(value, out, meta, settings, indentation);
                }
                out.push_merged(")");
            }
        }
        NodeKind::Block => {
            if node.children.is_empty() {
                out.push_merged("{}");
            } else {
                out.push_merged("{\n");
                let statement_indentation = format!("{indentation}{INDENT}");
                for statement in &node.children {
                    if statement.kind == NodeKind::Conflict {
                        print_node(statement, out, meta, settings, &statement_indentation);
                        continue;
                    }
                    out.push_merged(statement_indentation.clone());
                    print_node(statement, out, meta, settings, &statement_indentation);
                    out.push_merged(statement_terminator(statement.kind));
                    out.push_merged("\n");
                }
                out.push_merged(format!("{indentation}}}"));
            }
        }
        NodeKind::If => {
            out.push_merged("if (");
            if let Some(condition) = node.child_with_role(Role::Condition) {
                print_node(condition, out, meta, settings, indentation);
            }
            out.push_merged(") ");
            if let Some(then_branch) = node.child_with_role(Role::Then) {
                print_node(then_branch, out, meta, settings, indentation);
            }
            if let Some(else_branch) = node.child_with_role(Role::Else) {
                out.push_merged(" else ");
                print_node(else_branch, out, meta, settings, indentation);
            }
        }
        NodeKind::Return => {
            out.push_merged("return");
            if let Some(expression) = node.child_with_role(Role::Expression) {
                out.push_merged(" ");
                print_node(expression, out, meta, settings, indentation);
            }
            out.push_merged(";");
        }
        NodeKind::Local => {
            emit_attr(node, Role::Modifiers, out, meta, &modifiers_text);
            if let Some(local_type) = node.child_with_role(Role::Type) {
                print_node(local_type, out, meta, settings, indentation);
                out.push_merged(" ");
            }
            emit_attr(node, Role::Name, out, meta, &attr_text);
            if let Some(initializer) = node.child_with_role(Role::Assignment) {
                out.push_merged(" = ");
                print_node(initializer, out, meta, settings, indentation);
            }
            out.push_merged(";");
        }
        NodeKind::Assign => {
            if let Some(assigned) = node.child_with_role(Role::Assigned) {
                print_node(assigned, out, meta, settings, indentation);
            }
            out.push_merged(" ");
            emit_attr(node, Role::Operator, out, meta, &attr_text);
            out.push_merged(" ");
            if let Some(assignment) = node.child_with_role(Role::Assignment) {
                print_node(assignment, out, meta, settings, indentation);
            }
        }
        NodeKind::BinaryOp => {
            let mut operands = node.children_with_role(Role::Operand);
            if let Some(lhs) = operands.next() {
                print_node(lhs, out, meta, settings, indentation);
            }
            out.push_merged(" ");
            emit_attr(node, Role::Operator, out, meta, &attr_text);
            out.push_merged(" ");
            if let Some(rhs) = operands.next() {
                print_node(rhs, out, meta, settings, indentation);
            }
        }
        NodeKind::UnaryOp => {
            emit_attr(node, Role::Operator, out, meta, &attr_text);
            if let Some(operand) = node.child_with_role(Role::Operand) {
                print_node(operand, out, meta, settings, indentation);
            }
        }
        NodeKind::Literal => {
            emit_attr(node, Role::Value, out, meta, &attr_text);
        }
        NodeKind::NameRef => {
            emit_attr(node, Role::Name, out, meta, &attr_text);
        }
        NodeKind::Conflict => {
            let Some(meta_tables) = meta else {
                return;
            };
            if let Some(line_based) = meta_tables.line_based.get(&node.id) {
                out.push_merged(indentation.to_string());
                out.push_line_based_merge(&line_based.contents, indentation, settings);
                out.push_merged("\n");
            } else if let Some(record) = meta_tables.structural.get(&node.id) {
                out.push_conflict(
                    String::new(),
                    plain_lines(&record.left, indentation),
                    plain_lines(&record.right, indentation),
                );
            }
        }
    }
}
