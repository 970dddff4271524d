//! Guards access to browser-only globals behind `typeof` checks.
//!
//! Member and call chains rooted at `window`, `document`, `localStorage`,
//! `sessionStorage`, or `navigator` throw during server rendering. Each
//! unguarded chain is wrapped in `typeof <global> !== "undefined" ? ... :
//! null`. Writes cannot sit behind a ternary, so assignment, update, and
//! `delete` targets wrap their whole statement in an `if` block instead.
//!
//! Deciding whether a chain needs a guard is a pure function of the tree
//! ([`decide`]); the visitor only turns decisions into proposed edits.

use std::collections::BTreeSet;

use tree_sitter::Node;

use crate::change::Change;
use crate::edits::TextEdit;
use crate::engine::{VisitContext, Visitor, node_text, walk_preorder};

/// Globals that are unavailable outside the browser, paired with the global
/// whose presence guards them.
const UNSAFE_GLOBALS: &[(&str, &str)] = &[
    ("window", "window"),
    ("document", "document"),
    ("localStorage", "window"),
    ("sessionStorage", "window"),
    ("navigator", "navigator"),
];

/// Hooks whose callbacks only ever run in the browser.
const CLIENT_HOOKS: &[&str] = &["useEffect", "useLayoutEffect"];

/// Parent kinds in which a bare ternary needs no parentheses.
const LOOSE_PARENTS: &[&str] = &[
    "expression_statement",
    "parenthesized_expression",
    "arguments",
    "array",
    "jsx_expression",
    "return_statement",
    "template_substitution",
    "sequence_expression",
];

const TYPE_CONTEXTS: &[&str] = &[
    "type_annotation",
    "type_query",
    "type_alias_declaration",
    "interface_declaration",
    "type_arguments",
    "ambient_declaration",
];

/// Returns the guard global for an unsafe root identifier.
#[must_use]
pub fn guard_global_for(root: &str) -> Option<&'static str> {
    UNSAFE_GLOBALS
        .iter()
        .find(|(name, _)| *name == root)
        .map(|(_, guard)| *guard)
}

/// How a guarded chain is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    /// Wrap the expression in a ternary, optionally parenthesised.
    Expression {
        /// Whether the surrounding context binds tighter than `?:`.
        parenthesize: bool,
    },
    /// Wrap the enclosing statement in an `if` block.
    Statement,
}

/// A planned guard for one unsafe chain.
#[derive(Debug, Clone, Copy)]
pub struct GuardPlan<'tree> {
    /// The root identifier, e.g. `localStorage`.
    pub root: Node<'tree>,
    /// The outermost member or call expression of the chain.
    pub chain: Node<'tree>,
    /// The node whose text is replaced: the chain or its statement.
    pub target: Node<'tree>,
    /// The global tested by the guard.
    pub guard: &'static str,
    /// Rewrite shape.
    pub mode: GuardMode,
}

/// Outcome of inspecting one identifier.
#[derive(Debug, Clone, Copy)]
pub enum GuardDecision<'tree> {
    /// Not the root of an unsafe member or call chain.
    NotApplicable,
    /// Already covered by a `typeof` check on an ancestor.
    AlreadyGuarded,
    /// Inside an effect callback, event handler, `typeof`, or type position.
    Exempt,
    /// The name refers to a local binding, not the browser global.
    Shadowed,
    /// The chain needs a guard but its shape cannot be rewritten safely.
    Unsupported(&'static str),
    /// The chain should be guarded as planned.
    Guard(GuardPlan<'tree>),
}

/// Decides whether `node` roots a chain that needs guarding.
#[must_use]
pub fn decide<'tree>(node: Node<'tree>, source: &str) -> GuardDecision<'tree> {
    if node.kind() != "identifier" {
        return GuardDecision::NotApplicable;
    }
    let root_name = node_text(node, source);
    let Some(guard) = guard_global_for(root_name) else {
        return GuardDecision::NotApplicable;
    };
    let Some(parent) = node.parent() else {
        return GuardDecision::NotApplicable;
    };
    if !matches!(parent.kind(), "member_expression" | "subscript_expression")
        || !is_field(parent, "object", node)
    {
        return GuardDecision::NotApplicable;
    }

    if is_locally_bound(node, root_name, source) {
        return GuardDecision::Shadowed;
    }

    let chain = chain_top(node);
    if is_operand_of(chain, "typeof", source)
        || in_type_context(chain)
        || in_client_scope(chain, source)
    {
        return GuardDecision::Exempt;
    }
    if is_guarded(chain, guard, root_name, source) {
        return GuardDecision::AlreadyGuarded;
    }

    if is_write_target(chain, source) {
        return match enclosing_statement(chain) {
            Some(statement) => GuardDecision::Guard(GuardPlan {
                root: node,
                chain,
                target: statement,
                guard,
                mode: GuardMode::Statement,
            }),
            None => GuardDecision::Unsupported(
                "write to a browser global inside a larger expression cannot be guarded",
            ),
        };
    }

    GuardDecision::Guard(GuardPlan {
        root: node,
        chain,
        target: chain,
        guard,
        mode: GuardMode::Expression {
            parenthesize: needs_parentheses(chain),
        },
    })
}

/// Returns true when an ancestor already tests `typeof` for `guard` or
/// `root` on the branch that contains `node`.
///
/// Recognises `cond ? node : ...`, `if (cond) node`, and `cond && node` with
/// a `!==` test, plus the inverted `===` forms where `node` sits on the
/// alternative branch or right of `||`.
#[must_use]
pub fn is_guarded(node: Node<'_>, guard: &str, root: &str, source: &str) -> bool {
    let tests = |condition: Option<Node<'_>>, negated: bool| {
        condition.is_some_and(|c| {
            typeof_checks(node_text(c, source))
                .iter()
                .any(|check| check.negated == negated && (check.name == guard || check.name == root))
        })
    };

    let mut child = node;
    while let Some(parent) = child.parent() {
        let covered = match parent.kind() {
            "ternary_expression" | "if_statement" => {
                let condition = parent.child_by_field_name("condition");
                (is_field(parent, "consequence", child) && tests(condition, false))
                    || (is_field(parent, "alternative", child) && tests(condition, true))
            }
            "binary_expression" if is_field(parent, "right", child) => {
                let left = parent.child_by_field_name("left");
                match operator(parent, source) {
                    "&&" => tests(left, false),
                    "||" => tests(left, true),
                    _ => false,
                }
            }
            _ => false,
        };
        if covered {
            return true;
        }
        child = parent;
    }
    false
}

/// Returns true when an enclosing scope declares `name`, so `node` reads a
/// local binding.
///
/// Covers parameters, `catch` bindings, loop heads, and declarations that
/// are direct children of an enclosing block or the program. `var`
/// hoisting out of nested blocks is not tracked.
#[must_use]
pub fn is_locally_bound(node: Node<'_>, name: &str, source: &str) -> bool {
    let mut current = node.parent();
    while let Some(scope) = current {
        let declared = match scope.kind() {
            "arrow_function" | "function_expression" | "function_declaration" | "function"
            | "generator_function" | "generator_function_declaration" | "method_definition" => {
                ["parameters", "parameter"].iter().any(|field| {
                    scope
                        .child_by_field_name(field)
                        .is_some_and(|params| binds(params, name, source))
                })
            }
            "catch_clause" => scope
                .child_by_field_name("parameter")
                .is_some_and(|param| binds(param, name, source)),
            "for_statement" => scope
                .child_by_field_name("initializer")
                .is_some_and(|init| declares(init, name, source)),
            "for_in_statement" => scope
                .child_by_field_name("left")
                .is_some_and(|left| binds(left, name, source)),
            "statement_block" | "program" => {
                let mut cursor = scope.walk();
                scope
                    .named_children(&mut cursor)
                    .any(|statement| declares(statement, name, source))
            }
            _ => false,
        };
        if declared {
            return true;
        }
        current = scope.parent();
    }
    false
}

/// Whether the statement `node` introduces a binding called `name`.
fn declares(node: Node<'_>, name: &str, source: &str) -> bool {
    match node.kind() {
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = node.walk();
            node.named_children(&mut cursor).any(|declarator| {
                declarator.kind() == "variable_declarator"
                    && declarator
                        .child_by_field_name("name")
                        .is_some_and(|pattern| binds(pattern, name, source))
            })
        }
        "function_declaration" | "generator_function_declaration" | "class_declaration" => node
            .child_by_field_name("name")
            .is_some_and(|id| node_text(id, source) == name),
        "import_statement" => {
            let mut found = false;
            walk_preorder(node, |child| {
                let binding = match child.kind() {
                    "import_specifier" => child
                        .child_by_field_name("alias")
                        .or_else(|| child.child_by_field_name("name")),
                    "namespace_import" | "import_clause" => {
                        let mut cursor = child.walk();
                        child
                            .named_children(&mut cursor)
                            .find(|n| n.kind() == "identifier")
                    }
                    _ => None,
                };
                found |= binding.is_some_and(|id| node_text(id, source) == name);
            });
            found
        }
        "export_statement" => node
            .child_by_field_name("declaration")
            .is_some_and(|declaration| declares(declaration, name, source)),
        _ => false,
    }
}

/// Whether the binding pattern `node` introduces `name`. Default values
/// are not bindings and are skipped.
fn binds(node: Node<'_>, name: &str, source: &str) -> bool {
    match node.kind() {
        "identifier" | "shorthand_property_identifier_pattern" => node_text(node, source) == name,
        "required_parameter" | "optional_parameter" => node
            .child_by_field_name("pattern")
            .is_some_and(|pattern| binds(pattern, name, source)),
        "pair_pattern" => node
            .child_by_field_name("value")
            .is_some_and(|value| binds(value, name, source)),
        "assignment_pattern" | "object_assignment_pattern" => node
            .child_by_field_name("left")
            .is_some_and(|left| binds(left, name, source)),
        "formal_parameters" | "object_pattern" | "array_pattern" | "rest_pattern" => {
            let mut cursor = node.walk();
            node.named_children(&mut cursor)
                .any(|child| binds(child, name, source))
        }
        "lexical_declaration" | "variable_declaration" => declares(node, name, source),
        _ => false,
    }
}

#[derive(Debug, PartialEq, Eq)]
struct TypeofCheck<'a> {
    name: &'a str,
    /// `===` rather than `!==`.
    negated: bool,
}

/// Finds `typeof X !== "undefined"` tests (either operand order, strict or
/// loose) in a condition's text.
fn typeof_checks(text: &str) -> Vec<TypeofCheck<'_>> {
    let mut checks = Vec::new();
    let mut search_from = 0;
    while let Some(found) = text.get(search_from..).and_then(|rest| rest.find("typeof")) {
        let keyword_start = search_from.saturating_add(found);
        let after_keyword = keyword_start.saturating_add("typeof".len());
        search_from = after_keyword;

        let Some(rest) = text.get(after_keyword..) else {
            break;
        };
        let operand = rest.trim_start();
        let name_len = operand
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
            .unwrap_or(operand.len());
        let Some(name) = operand.get(..name_len).filter(|n| !n.is_empty()) else {
            continue;
        };

        let trailing = operand.get(name_len..).unwrap_or_default();
        let leading = text.get(..keyword_start).unwrap_or_default();
        if let Some(negated) = comparison_after(trailing).or_else(|| comparison_before(leading)) {
            checks.push(TypeofCheck { name, negated });
        }
    }
    checks
}

fn undefined_literal_len(text: &str) -> Option<usize> {
    ["\"undefined\"", "'undefined'", "`undefined`"]
        .iter()
        .find(|lit| text.starts_with(**lit))
        .map(|lit| lit.len())
}

/// Parses `!== "undefined"` (or `===`, `!=`, `==`) following an operand.
fn comparison_after(text: &str) -> Option<bool> {
    let trimmed = text.trim_start();
    let (negated, rest) = split_operator(trimmed)?;
    undefined_literal_len(rest.trim_start()).map(|_| negated)
}

/// Parses `"undefined" !==` preceding a `typeof` keyword.
fn comparison_before(text: &str) -> Option<bool> {
    let trimmed = text.trim_end();
    let (negated, before_operator) = ["!==", "===", "!=", "=="].iter().find_map(|op| {
        trimmed
            .strip_suffix(op)
            .map(|rest| (op.starts_with('='), rest.trim_end()))
    })?;
    ["\"undefined\"", "'undefined'", "`undefined`"]
        .iter()
        .any(|lit| before_operator.ends_with(lit))
        .then_some(negated)
}

fn split_operator(text: &str) -> Option<(bool, &str)> {
    ["!==", "===", "!=", "=="].iter().find_map(|op| {
        text.strip_prefix(op)
            .map(|rest| (op.starts_with('='), rest))
    })
}

fn is_field(parent: Node<'_>, field: &str, child: Node<'_>) -> bool {
    parent
        .child_by_field_name(field)
        .is_some_and(|n| n.id() == child.id())
}

fn operator<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    node.child_by_field_name("operator")
        .map_or("", |op| node_text(op, source))
}

/// Climbs member, subscript, call, and non-null links to the outermost
/// expression of the chain that starts at `node`.
fn chain_top(node: Node<'_>) -> Node<'_> {
    let mut current = node;
    while let Some(parent) = current.parent() {
        let continues = match parent.kind() {
            "member_expression" | "subscript_expression" => is_field(parent, "object", current),
            "call_expression" => is_field(parent, "function", current),
            "non_null_expression" => true,
            _ => false,
        };
        if !continues {
            break;
        }
        current = parent;
    }
    current
}

fn is_operand_of(node: Node<'_>, keyword: &str, source: &str) -> bool {
    node.parent().is_some_and(|parent| {
        parent.kind() == "unary_expression" && operator(parent, source) == keyword
    })
}

fn in_type_context(node: Node<'_>) -> bool {
    let mut current = node.parent();
    while let Some(ancestor) = current {
        if TYPE_CONTEXTS.contains(&ancestor.kind()) {
            return true;
        }
        current = ancestor.parent();
    }
    false
}

fn in_client_scope(node: Node<'_>, source: &str) -> bool {
    let mut current = node.parent();
    while let Some(ancestor) = current {
        match ancestor.kind() {
            "arrow_function" | "function_expression" | "function" => {
                if is_client_hook_callback(ancestor, source) {
                    return true;
                }
            }
            "jsx_attribute" => {
                let mut cursor = ancestor.walk();
                let handler = ancestor
                    .named_children(&mut cursor)
                    .next()
                    .is_some_and(|name| is_event_handler_name(node_text(name, source)));
                if handler {
                    return true;
                }
            }
            _ => {}
        }
        current = ancestor.parent();
    }
    false
}

fn is_client_hook_callback(function: Node<'_>, source: &str) -> bool {
    let Some(arguments) = function.parent().filter(|p| p.kind() == "arguments") else {
        return false;
    };
    let Some(call) = arguments.parent().filter(|p| p.kind() == "call_expression") else {
        return false;
    };
    call.child_by_field_name("function").is_some_and(|callee| {
        let name = node_text(callee, source);
        let name = name.strip_prefix("React.").unwrap_or(name);
        CLIENT_HOOKS.contains(&name)
    })
}

fn is_event_handler_name(name: &str) -> bool {
    name.strip_prefix("on")
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_uppercase())
}

fn is_write_target(chain: Node<'_>, source: &str) -> bool {
    let Some(parent) = chain.parent() else {
        return false;
    };
    match parent.kind() {
        "assignment_expression" | "augmented_assignment_expression" => {
            is_field(parent, "left", chain)
        }
        "update_expression" => true,
        "unary_expression" => operator(parent, source) == "delete",
        _ => false,
    }
}

fn enclosing_statement(chain: Node<'_>) -> Option<Node<'_>> {
    let write = chain.parent()?;
    let statement = write.parent()?;
    (statement.kind() == "expression_statement").then_some(statement)
}

fn needs_parentheses(chain: Node<'_>) -> bool {
    let Some(parent) = chain.parent() else {
        return false;
    };
    if LOOSE_PARENTS.contains(&parent.kind()) {
        return false;
    }
    match parent.kind() {
        "variable_declarator" | "pair" | "assignment_pattern" => !is_field(parent, "value", chain)
            && !is_field(parent, "right", chain),
        "assignment_expression" | "augmented_assignment_expression" => {
            !is_field(parent, "right", chain)
        }
        "arrow_function" => !is_field(parent, "body", chain),
        _ => true,
    }
}

/// Collects every guard global required inside `plan.target`, including
/// those of nested unguarded chains that the plan subsumes.
fn required_guards(plan: &GuardPlan<'_>, source: &str) -> BTreeSet<&'static str> {
    let mut guards = BTreeSet::from([plan.guard]);
    walk_preorder(plan.target, |node| {
        if node.id() == plan.root.id() {
            return;
        }
        if let GuardDecision::Guard(inner) = decide(node, source) {
            guards.insert(inner.guard);
        }
    });
    guards
}

fn render_condition(guards: &BTreeSet<&'static str>) -> String {
    guards
        .iter()
        .map(|g| format!("typeof {g} !== \"undefined\""))
        .collect::<Vec<_>>()
        .join(" && ")
}

fn line_indent<'s>(source: &'s str, offset: usize) -> &'s str {
    let before = source.get(..offset).unwrap_or_default();
    let line_start = before.rfind('\n').map_or(0, |i| i.saturating_add(1));
    let line = before.get(line_start..).unwrap_or_default();
    let indent_len = line.len().saturating_sub(line.trim_start_matches([' ', '\t']).len());
    line.get(..indent_len).unwrap_or_default()
}

fn render(plan: &GuardPlan<'_>, guards: &BTreeSet<&'static str>, source: &str) -> String {
    let condition = render_condition(guards);
    let text = node_text(plan.target, source);
    match plan.mode {
        GuardMode::Expression { parenthesize: true } => format!("({condition} ? {text} : null)"),
        GuardMode::Expression {
            parenthesize: false,
        } => format!("{condition} ? {text} : null"),
        GuardMode::Statement => {
            let indent = line_indent(source, plan.target.start_byte());
            let body = text.replace('\n', "\n  ");
            format!("if ({condition}) {{\n{indent}  {body}\n{indent}}}")
        }
    }
}

/// Wraps unguarded browser-global access in `typeof` guards.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalGuardVisitor;

impl GlobalGuardVisitor {
    /// Stable visitor name.
    pub const NAME: &'static str = "global-guard";
}

impl Visitor for GlobalGuardVisitor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn visit(&self, node: Node<'_>, cx: &mut VisitContext<'_>) {
        match decide(node, cx.source()) {
            GuardDecision::Guard(plan) => {
                let guards = required_guards(&plan, cx.source());
                let replacement = render(&plan, &guards, cx.source());
                let root = cx.text(plan.root);
                let shape = match plan.mode {
                    GuardMode::Statement => "statement",
                    GuardMode::Expression { .. } => "expression",
                };
                let change = Change::new(
                    "global-guard",
                    format!(
                        "guarded {shape} using `{root}` with `{}`",
                        render_condition(&guards)
                    ),
                )
                .at(VisitContext::location(plan.chain));
                cx.propose(
                    vec![TextEdit::replace(plan.target.byte_range(), replacement)],
                    change,
                );
            }
            GuardDecision::Unsupported(reason) => cx.warn(node, reason),
            GuardDecision::NotApplicable
            | GuardDecision::AlreadyGuarded
            | GuardDecision::Exempt
            | GuardDecision::Shadowed => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("typeof window !== \"undefined\"", "window", false)]
    #[case("typeof window != 'undefined'", "window", false)]
    #[case("\"undefined\" !== typeof document", "document", false)]
    #[case("typeof navigator === \"undefined\"", "navigator", true)]
    fn recognises_typeof_checks(#[case] text: &str, #[case] name: &str, #[case] negated: bool) {
        assert_eq!(typeof_checks(text), vec![TypeofCheck { name, negated }]);
    }

    #[test]
    fn recognises_conjoined_checks() {
        let checks = typeof_checks("typeof a !== \"undefined\" && typeof b !== \"undefined\"");
        let names: Vec<_> = checks.iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn ignores_typeof_without_comparison() {
        assert!(typeof_checks("typeof window").is_empty());
    }

    #[rstest]
    #[case("onClick", true)]
    #[case("onchange", false)]
    #[case("className", false)]
    fn detects_event_handler_names(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_event_handler_name(name), expected);
    }

    #[test]
    fn computes_line_indentation() {
        let source = "function f() {\n    window.x = 1;\n}";
        let offset = source.find("window").expect("offset");
        assert_eq!(line_indent(source, offset), "    ");
    }
}
