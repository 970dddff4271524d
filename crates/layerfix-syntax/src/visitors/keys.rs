//! Synthesises `key` attributes for elements rendered by `.map()` callbacks.
//!
//! For `collection.map(callback)` whose callback renders one JSX element
//! without a `key`, the callback's second parameter becomes the key. When the
//! callback has no second parameter an index parameter is added, keeping the
//! existing parameter list's parentheses or adding them.

use std::collections::HashSet;

use tree_sitter::Node;

use super::params::{binding_name, has_type_annotation, split_params};
use crate::change::Change;
use crate::edits::TextEdit;
use crate::engine::{VisitContext, Visitor, node_text};

/// Index parameter names tried in order when synthesising a key.
const INDEX_NAMES: &[&str] = &["index", "idx", "i", "itemIndex"];

/// Adds `key={...}` to elements rendered by `.map()` callbacks.
#[derive(Debug, Default, Clone, Copy)]
pub struct IterationKeyVisitor;

impl IterationKeyVisitor {
    /// Stable visitor name.
    pub const NAME: &'static str = "iteration-key";
}

impl Visitor for IterationKeyVisitor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn visit(&self, node: Node<'_>, cx: &mut VisitContext<'_>) {
        let Some(callback) = map_callback(node, cx.source()) else {
            return;
        };
        let Some(element) = callback
            .child_by_field_name("body")
            .and_then(rendered_element)
        else {
            return;
        };
        let Some(open_tag) = opening_tag(element) else {
            return;
        };
        let Some(tag_name) = open_tag.child_by_field_name("name") else {
            cx.warn(
                element,
                "fragment rendered by .map() cannot carry a key; use <Fragment key={...}>",
            );
            return;
        };
        if has_key_attribute(open_tag, cx.source()) {
            return;
        }

        let Some(KeyPlan { key, mut edits }) = plan_key(callback, cx) else {
            return;
        };
        edits.push(TextEdit::insert(
            tag_name.end_byte(),
            format!(" key={{{key}}}"),
        ));

        let change = Change::new(
            "iteration-key",
            format!(
                "added key={{{key}}} to <{}> rendered by .map()",
                cx.text(tag_name)
            ),
        )
        .at(VisitContext::location(element));
        cx.propose(edits, change);
    }
}

/// Returns the callback of a `.map(callback)` call.
fn map_callback<'tree>(node: Node<'tree>, source: &str) -> Option<Node<'tree>> {
    if node.kind() != "call_expression" {
        return None;
    }
    let callee = node.child_by_field_name("function")?;
    if callee.kind() != "member_expression" {
        return None;
    }
    let property = callee.child_by_field_name("property")?;
    if node_text(property, source) != "map" {
        return None;
    }
    let arguments = node.child_by_field_name("arguments")?;
    let callback = first_named(arguments)?;
    matches!(
        callback.kind(),
        "arrow_function" | "function_expression" | "function"
    )
    .then_some(callback)
}

/// Finds the single element a callback body renders.
fn rendered_element(body: Node<'_>) -> Option<Node<'_>> {
    match body.kind() {
        "jsx_element" | "jsx_self_closing_element" => Some(body),
        "parenthesized_expression" => first_named(body).and_then(rendered_element),
        "statement_block" => {
            let mut cursor = body.walk();
            let statements: Vec<_> = body
                .named_children(&mut cursor)
                .filter(|n| n.kind() != "comment")
                .collect();
            match statements.as_slice() {
                [only] if only.kind() == "return_statement" => {
                    first_named(*only).and_then(rendered_element)
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn opening_tag(element: Node<'_>) -> Option<Node<'_>> {
    match element.kind() {
        "jsx_element" => element.child_by_field_name("open_tag"),
        "jsx_self_closing_element" => Some(element),
        _ => None,
    }
}

fn has_key_attribute(open_tag: Node<'_>, source: &str) -> bool {
    let mut cursor = open_tag.walk();
    open_tag
        .named_children(&mut cursor)
        .filter(|n| n.kind() == "jsx_attribute")
        .any(|attribute| first_named(attribute).is_some_and(|name| node_text(name, source) == "key"))
}

fn first_named(node: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .find(|n| n.kind() != "comment")
}

struct KeyPlan {
    key: String,
    edits: Vec<TextEdit>,
}

/// Chooses the key expression and any parameter-list edits it needs.
fn plan_key(callback: Node<'_>, cx: &mut VisitContext<'_>) -> Option<KeyPlan> {
    let source = cx.source();

    if let Some(single) = callback.child_by_field_name("parameter") {
        let first = node_text(single, source);
        let name = fresh_index_name(callback, source, &[first]);
        return Some(KeyPlan {
            edits: vec![TextEdit::replace(
                single.byte_range(),
                format!("({first}, {name})"),
            )],
            key: name,
        });
    }

    let parameters = callback.child_by_field_name("parameters")?;
    let text = node_text(parameters, source);
    let inner = text.strip_prefix('(')?.strip_suffix(')')?;
    let params = split_params(inner);

    match params.as_slice() {
        [] => {
            let name = fresh_index_name(callback, source, &[]);
            Some(KeyPlan {
                edits: vec![TextEdit::replace(
                    parameters.byte_range(),
                    format!("(_item, {name})"),
                )],
                key: name,
            })
        }
        [first] => {
            let name = fresh_index_name(callback, source, &[*first]);
            let declaration = if has_type_annotation(first) {
                format!("{name}: number")
            } else {
                name.clone()
            };
            let trimmed = inner.trim_end();
            let separator = if trimmed.ends_with(',') { " " } else { ", " };
            let offset = parameters
                .start_byte()
                .saturating_add(1)
                .saturating_add(trimmed.len());
            Some(KeyPlan {
                edits: vec![TextEdit::insert(offset, format!("{separator}{declaration}"))],
                key: name,
            })
        }
        [_, second, ..] => {
            if let Some(name) = binding_name(second) {
                Some(KeyPlan {
                    key: name.to_owned(),
                    edits: Vec::new(),
                })
            } else {
                cx.warn(
                    parameters,
                    "second .map() parameter is a pattern; key left for manual review",
                );
                None
            }
        }
    }
}

/// Picks an index name that neither the parameters nor the body already use.
fn fresh_index_name(callback: Node<'_>, source: &str, params: &[&str]) -> String {
    let mut taken: HashSet<&str> = HashSet::new();
    for param in params {
        taken.extend(identifiers(param));
    }
    if let Some(body) = callback.child_by_field_name("body") {
        taken.extend(identifiers(node_text(body, source)));
    }

    if let Some(name) = INDEX_NAMES.iter().find(|name| !taken.contains(**name)) {
        return (*name).to_owned();
    }
    (1_u32..)
        .map(|n| format!("index{n}"))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .unwrap_or_else(|| "index".to_owned())
}

fn identifiers(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
        .filter(|word| !word.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::SupportedLanguage;
    use crate::parser::Parser;

    #[test]
    fn identifiers_split_on_punctuation() {
        let words: Vec<_> = identifiers("item.name + idx[0]").collect();
        assert_eq!(words, vec!["item", "name", "idx", "0"]);
    }

    #[test]
    fn fresh_name_avoids_body_identifiers() {
        let source = "items.map(item => <Row index={index} i={i}>{idx}</Row>)";
        let mut parser = Parser::new(SupportedLanguage::Tsx).expect("parser");
        let parsed = parser.parse(source).expect("parse");
        let mut found = None;
        crate::engine::walk_preorder(parsed.root_node(), |node| {
            if found.is_none() && node.kind() == "arrow_function" {
                found = Some(fresh_index_name(node, source, &["item"]));
            }
        });
        assert_eq!(found.as_deref(), Some("itemIndex"));
    }
}
