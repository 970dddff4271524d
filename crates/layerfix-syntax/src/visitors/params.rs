//! Depth-aware scanning of callback parameter lists.
//!
//! Parameter text is split on commas that sit outside `(`, `[`, `{`, and
//! generic `<...>` nesting and outside string literals, so destructuring
//! patterns, default values, and type annotations stay intact.

/// Splits the text between a parameter list's parentheses into trimmed
/// parameters. A trailing comma does not produce an empty parameter.
#[must_use]
pub fn split_params(list: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut start = 0;
    for index in top_level_positions(list, |c| c == ',') {
        if let Some(param) = list.get(start..index) {
            params.push(param.trim());
        }
        start = index.saturating_add(1);
    }
    if let Some(rest) = list.get(start..) {
        if !rest.trim().is_empty() {
            params.push(rest.trim());
        }
    }
    params
}

/// Returns the bound identifier of a simple parameter such as `index`,
/// `i: number`, or `idx = 0`.
///
/// Destructuring patterns and rest parameters have no single binding and
/// return `None`.
#[must_use]
pub fn binding_name(param: &str) -> Option<&str> {
    let trimmed = param.trim();
    if trimmed.starts_with("...") {
        return None;
    }
    let end = top_level_positions(trimmed, |c| matches!(c, ':' | '=' | '?'))
        .first()
        .copied()
        .unwrap_or(trimmed.len());
    let name = trimmed.get(..end)?.trim();
    is_identifier(name).then_some(name)
}

/// Returns true when the parameter carries a top-level type annotation.
#[must_use]
pub fn has_type_annotation(param: &str) -> bool {
    let positions = top_level_positions(param, |c| matches!(c, ':' | '='));
    positions
        .first()
        .and_then(|&i| param.get(i..))
        .is_some_and(|rest| rest.starts_with(':'))
}

/// Returns true when `text` is a plain JavaScript identifier.
#[must_use]
pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Byte offsets of characters matching `wanted` at nesting depth zero.
fn top_level_positions(text: &str, wanted: impl Fn(char) -> bool) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut depth: usize = 0;
    let mut angle: usize = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut previous = '\0';

    for (index, ch) in text.char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            previous = ch;
            continue;
        }

        match ch {
            '\'' | '"' | '`' => quote = Some(ch),
            '(' | '[' | '{' => depth = depth.saturating_add(1),
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '<' => angle = angle.saturating_add(1),
            '>' if previous != '=' => angle = angle.saturating_sub(1),
            _ if depth == 0 && angle == 0 && wanted(ch) => positions.push(index),
            _ => {}
        }
        previous = ch;
    }
    positions
}
