//! Stack-based delimiter balance scanning.
//!
//! The scanner walks the buffer once, tracking `{`, `[`, and `(` nesting.
//! String, template, comment, and regular-expression literal content is
//! skipped where it can be recognised lexically. In the TSX dialect an `<`
//! in expression position opens a JSX element: inside its tag only attribute
//! strings and `{}` expressions matter, and its children are text apart from
//! `{}` expressions and nested elements, so quotes in JSX text never open a
//! string. Outside JSX a quote with no closing partner on the same line is
//! treated as plain text.

use thiserror::Error;

use crate::change::Location;
use crate::language::SupportedLanguage;

/// A delimiter balance problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DelimiterIssue {
    /// An opener was never closed.
    #[error("unclosed `{open}` opened at {location}")]
    Unclosed {
        /// The opening character.
        open: char,
        /// Where it was opened.
        location: Location,
    },
    /// A closer appeared with nothing open.
    #[error("unexpected `{found}` at {location}")]
    Unexpected {
        /// The closing character.
        found: char,
        /// Where it appeared.
        location: Location,
    },
    /// A closer did not match the innermost opener.
    #[error("expected `{expected}` but found `{found}` at {location}")]
    Mismatched {
        /// The closer the innermost opener needs.
        expected: char,
        /// The closer that appeared instead.
        found: char,
        /// Where it appeared.
        location: Location,
    },
}

/// Checks that every `{`, `[`, and `(` has a correctly nested closer,
/// reading `source` as TSX.
///
/// # Errors
///
/// Returns the first [`DelimiterIssue`] found.
pub fn check_balance(source: &str) -> Result<(), DelimiterIssue> {
    check_balance_for(source, SupportedLanguage::Tsx)
}

/// Like [`check_balance`], in the dialect of `language`.
///
/// Plain TypeScript has no JSX, so `<Type>value` casts are read as code.
///
/// # Errors
///
/// Returns the first [`DelimiterIssue`] found.
pub fn check_balance_for(source: &str, language: SupportedLanguage) -> Result<(), DelimiterIssue> {
    Scanner::new(source, language == SupportedLanguage::Tsx).run()
}

/// Returns true when [`check_balance`] succeeds.
#[must_use]
pub fn is_balanced(source: &str) -> bool {
    check_balance(source).is_ok()
}

const fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Open { ch: char, location: Location },
    TemplateExpr { location: Location },
    /// Between `<` and the `>` or `/>` ending an element's tag.
    JsxTag { location: Location },
    /// Between an opening tag and its closing tag.
    JsxChildren { location: Location },
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    stack: Vec<Frame>,
    last_significant: Option<char>,
    last_word: String,
    prev_significant: Option<char>,
    jsx: bool,
}

impl Scanner {
    fn new(source: &str, jsx: bool) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            stack: Vec::new(),
            last_significant: None,
            last_word: String::new(),
            prev_significant: None,
            jsx,
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos.saturating_add(offset)).copied()
    }

    const fn location(&self) -> Location {
        Location {
            line: self.line,
            column: self.column,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek(0)?;
        self.pos = self.pos.saturating_add(1);
        if ch == '\n' {
            self.line = self.line.saturating_add(1);
            self.column = 1;
        } else {
            self.column = self.column.saturating_add(1);
        }
        Some(ch)
    }

    fn skip(&mut self, count: usize) {
        for _ in 0..count {
            if self.bump().is_none() {
                break;
            }
        }
    }

    fn run(mut self) -> Result<(), DelimiterIssue> {
        while let Some(ch) = self.peek(0) {
            match self.stack.last() {
                Some(Frame::JsxTag { .. }) => self.step_tag(ch)?,
                Some(Frame::JsxChildren { .. }) => self.step_children(ch),
                _ => self.step(ch)?,
            }
        }

        match self.stack.last() {
            Some(Frame::Open { ch, location }) => Err(DelimiterIssue::Unclosed {
                open: *ch,
                location: *location,
            }),
            Some(Frame::TemplateExpr { location }) => Err(DelimiterIssue::Unclosed {
                open: '{',
                location: *location,
            }),
            Some(Frame::JsxTag { location } | Frame::JsxChildren { location }) => {
                Err(DelimiterIssue::Unclosed {
                    open: '<',
                    location: *location,
                })
            }
            None => Ok(()),
        }
    }

    fn step(&mut self, ch: char) -> Result<(), DelimiterIssue> {
        match ch {
            '/' if self.peek(1) == Some('/') => {
                self.skip_line_comment();
                return Ok(());
            }
            '/' if self.peek(1) == Some('*') => {
                self.skip_block_comment();
                return Ok(());
            }
            '/' if self.regex_allowed() => {
                if let Some(len) = self.regex_literal_len() {
                    self.skip(len);
                    self.mark_significant('/');
                    return Ok(());
                }
                self.bump();
            }
            '\'' | '"' => {
                if let Some(len) = self.string_literal_len(ch) {
                    self.skip(len);
                } else {
                    self.bump();
                }
            }
            '`' => {
                let location = self.location();
                self.bump();
                return self.scan_template_body(location);
            }
            '<' if self.jsx && self.regex_allowed() && self.opens_element() => {
                let location = self.location();
                self.bump();
                self.stack.push(Frame::JsxTag { location });
                return Ok(());
            }
            '(' | '[' | '{' => {
                let location = self.location();
                self.stack.push(Frame::Open { ch, location });
                self.bump();
            }
            ')' | ']' | '}' => {
                self.close(ch)?;
            }
            _ => {
                self.bump();
            }
        }

        self.mark_significant(ch);
        Ok(())
    }

    fn mark_significant(&mut self, ch: char) {
        if ch.is_whitespace() {
            return;
        }
        if is_ident_char(ch) {
            if !self.last_significant.is_some_and(is_ident_char) {
                self.last_word.clear();
            }
            self.last_word.push(ch);
        } else {
            self.last_word.clear();
        }
        self.prev_significant = self.last_significant;
        self.last_significant = Some(ch);
    }

    fn open_expression(&mut self) {
        let location = self.location();
        self.stack.push(Frame::Open { ch: '{', location });
        self.bump();
        self.mark_significant('{');
    }

    /// Returns to whatever enclosed a finished element. The element reads
    /// as a complete operand, like a closing parenthesis.
    fn end_element(&mut self) {
        self.stack.pop();
        self.mark_significant(')');
    }

    fn step_tag(&mut self, ch: char) -> Result<(), DelimiterIssue> {
        match ch {
            '/' if self.peek(1) == Some('>') => {
                self.skip(2);
                self.end_element();
            }
            '/' if self.peek(1) == Some('/') => self.skip_line_comment(),
            '/' if self.peek(1) == Some('*') => self.skip_block_comment(),
            '>' => {
                self.bump();
                if let Some(Frame::JsxTag { location }) = self.stack.pop() {
                    self.stack.push(Frame::JsxChildren { location });
                }
            }
            '\'' | '"' => match self.attribute_string_len(ch) {
                Some(len) => self.skip(len),
                None => {
                    self.bump();
                }
            },
            '{' => self.open_expression(),
            ')' | ']' | '}' => self.close(ch)?,
            _ => {
                self.bump();
            }
        }
        Ok(())
    }

    fn step_children(&mut self, ch: char) {
        match ch {
            '{' => self.open_expression(),
            '<' if self.peek(1) == Some('/') => self.skip_closing_tag(),
            '<' => {
                let location = self.location();
                self.bump();
                self.stack.push(Frame::JsxTag { location });
            }
            _ => {
                self.bump();
            }
        }
    }

    fn skip_closing_tag(&mut self) {
        while let Some(ch) = self.bump() {
            if ch == '>' {
                self.end_element();
                return;
            }
        }
    }

    /// Whether the `<` under the cursor starts an element rather than a
    /// generic arrow function's type parameters.
    fn opens_element(&self) -> bool {
        match self.peek(1) {
            Some('>') => true,
            Some(c) if c.is_alphabetic() || c == '_' || c == '$' => !self.type_parameters_follow(),
            _ => false,
        }
    }

    /// `<T,>` and `<T extends U>` introduce type parameters in TSX.
    fn type_parameters_follow(&self) -> bool {
        let mut offset = 1;
        while self.peek(offset).is_some_and(is_ident_char) {
            offset = offset.saturating_add(1);
        }
        while self.peek(offset).is_some_and(|c| c == ' ' || c == '\t') {
            offset = offset.saturating_add(1);
        }
        if self.peek(offset) == Some(',') {
            return true;
        }
        let keyword_ends = "extends"
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek(offset.saturating_add(i)) == Some(c));
        keyword_ends
            && self
                .peek(offset.saturating_add("extends".len()))
                .is_some_and(char::is_whitespace)
    }

    /// Length of a JSX attribute string. These have no escapes and may span
    /// lines.
    fn attribute_string_len(&self, quote: char) -> Option<usize> {
        let mut offset = 1;
        loop {
            let ch = self.peek(offset)?;
            offset = offset.saturating_add(1);
            if ch == quote {
                return Some(offset);
            }
        }
    }

    fn close(&mut self, found: char) -> Result<(), DelimiterIssue> {
        let location = self.location();
        match self.stack.pop() {
            Some(Frame::Open { ch, .. }) if closer_for(ch) == found => {
                self.bump();
                Ok(())
            }
            Some(Frame::Open { ch, .. }) => Err(DelimiterIssue::Mismatched {
                expected: closer_for(ch),
                found,
                location,
            }),
            Some(Frame::TemplateExpr { .. }) if found == '}' => {
                self.bump();
                let template_start = self.location();
                self.scan_template_body(template_start)
            }
            Some(Frame::TemplateExpr { .. }) => Err(DelimiterIssue::Mismatched {
                expected: '}',
                found,
                location,
            }),
            Some(Frame::JsxTag { .. } | Frame::JsxChildren { .. }) => {
                Err(DelimiterIssue::Mismatched {
                    expected: '>',
                    found,
                    location,
                })
            }
            None => Err(DelimiterIssue::Unexpected { found, location }),
        }
    }

    /// Consumes template text up to the closing backtick or the next `${`.
    fn scan_template_body(&mut self, start: Location) -> Result<(), DelimiterIssue> {
        while let Some(ch) = self.peek(0) {
            match ch {
                '\\' => self.skip(2),
                '`' => {
                    self.bump();
                    self.mark_significant('`');
                    return Ok(());
                }
                '$' if self.peek(1) == Some('{') => {
                    let location = self.location();
                    self.skip(2);
                    self.stack.push(Frame::TemplateExpr { location });
                    self.last_significant = Some('{');
                    self.last_word.clear();
                    return Ok(());
                }
                _ => {
                    self.bump();
                }
            }
        }
        Err(DelimiterIssue::Unclosed {
            open: '`',
            location: start,
        })
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.peek(0) {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_block_comment(&mut self) {
        self.skip(2);
        while let Some(ch) = self.peek(0) {
            if ch == '*' && self.peek(1) == Some('/') {
                self.skip(2);
                return;
            }
            self.bump();
        }
    }

    fn regex_allowed(&self) -> bool {
        match self.last_significant {
            None => true,
            Some(prev) if is_ident_char(prev) => matches!(
                self.last_word.as_str(),
                "return" | "typeof" | "case" | "in" | "of" | "delete" | "void" | "throw" | "new"
            ),
            Some('>') => self.prev_significant == Some('='),
            Some(prev) => "(,=:[!&|?{};+-*%~^".contains(prev),
        }
    }

    /// Length of a regex literal starting at the current `/`, flags included.
    fn regex_literal_len(&self) -> Option<usize> {
        let mut offset = 1;
        let mut in_class = false;
        loop {
            let ch = self.peek(offset)?;
            match ch {
                '\n' => return None,
                '\\' => offset = offset.saturating_add(1),
                '[' => in_class = true,
                ']' => in_class = false,
                '/' if !in_class => break,
                _ => {}
            }
            offset = offset.saturating_add(1);
        }
        offset = offset.saturating_add(1);
        while self.peek(offset).is_some_and(|c| c.is_ascii_alphabetic()) {
            offset = offset.saturating_add(1);
        }
        Some(offset)
    }

    /// Length of a quoted string that closes on the same line.
    fn string_literal_len(&self, quote: char) -> Option<usize> {
        let mut offset = 1;
        loop {
            let ch = self.peek(offset)?;
            if ch == '\\' {
                offset = offset.saturating_add(2);
                continue;
            }
            if ch == '\n' {
                return None;
            }
            offset = offset.saturating_add(1);
            if ch == quote {
                return Some(offset);
            }
        }
    }
}

const fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'
}
