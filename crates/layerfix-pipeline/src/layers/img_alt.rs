//! Adds an empty `alt` to `<img>` elements that have none.

use layerfix_syntax::{Change, TextEdit, VisitContext, Visitor, node_text};
use tree_sitter::Node;

/// Inserts `alt=""` into `<img>` tags without an `alt` attribute.
///
/// Tags that spread props are left alone since the spread may supply `alt`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImgAltVisitor;

impl ImgAltVisitor {
    /// Stable visitor name.
    pub const NAME: &'static str = "img-alt";
}

impl Visitor for ImgAltVisitor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn visit(&self, node: Node<'_>, cx: &mut VisitContext<'_>) {
        if !matches!(node.kind(), "jsx_opening_element" | "jsx_self_closing_element") {
            return;
        }
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        if cx.text(name) != "img" {
            return;
        }

        let mut cursor = node.walk();
        let mut insert_at = name.end_byte();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "jsx_attribute" => {
                    if attribute_name(child, cx.source()) == Some("alt") {
                        return;
                    }
                    insert_at = insert_at.max(child.end_byte());
                }
                "jsx_expression" => return,
                _ => {}
            }
        }

        cx.propose(
            vec![TextEdit::insert(insert_at, " alt=\"\"")],
            Change::new("img-alt", "added empty alt to <img>").at(VisitContext::location(node)),
        );
    }
}

fn attribute_name<'src>(attribute: Node<'_>, source: &'src str) -> Option<&'src str> {
    let mut cursor = attribute.walk();
    let first = attribute.named_children(&mut cursor).next()?;
    Some(node_text(first, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerfix_syntax::{TransformEngine, VisitorSet};
    use rstest::rstest;
    use std::path::Path;

    fn apply(code: &str) -> String {
        TransformEngine::new()
            .transform_with_visitors(code, &VisitorSet::new().with(ImgAltVisitor), Path::new("a.tsx"))
            .expect("transform")
            .code
    }

    #[rstest]
    #[case("const a = <img src={url} />;", "const a = <img src={url} alt=\"\" />;")]
    #[case("const a = <img/>;", "const a = <img alt=\"\"/>;")]
    #[case(
        "const a = <img src=\"x\" width={2}></img>;",
        "const a = <img src=\"x\" width={2} alt=\"\"></img>;"
    )]
    fn adds_missing_alt(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(apply(input), expected);
    }

    #[rstest]
    #[case("const a = <img alt=\"logo\" src={url} />;")]
    #[case("const a = <img {...props} />;")]
    #[case("const a = <Image src={url} />;")]
    fn leaves_other_tags_alone(#[case] input: &str) {
        assert_eq!(apply(input), input);
    }
}
