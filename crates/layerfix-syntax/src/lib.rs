//! Tree-sitter powered structural rewriting for the layerfix pipeline.
//!
//! This crate provides:
//!
//! - **Parsing** via [`Parser`] with grammar selection by file extension
//! - **Delimiter balance scanning** via [`check_balance`], the cheap check the
//!   safety validator runs on every layer output
//! - **Syntactic validation** via [`TreeSitterSyntacticLock`], the re-parse
//!   gate used by the pattern fallback and the strict validator
//! - **Structural rewriting** via [`TransformEngine`] and a [`VisitorSet`] of
//!   [`Visitor`]s that propose edits without mutating the tree
//! - **AST-first rewriting** via [`AstFirstTransformer`], which falls back to
//!   a [`PatternFallback`] only when the structural pass cannot help
//!
//! # Supported Languages
//!
//! `.ts`, `.mts`, and `.cts` parse with the TypeScript grammar. `.tsx`,
//! `.js`, `.jsx`, `.mjs`, `.cjs`, and unknown extensions parse with the TSX
//! grammar.
//!
//! # Built-in Visitors
//!
//! - [`GlobalGuardVisitor`] wraps browser-only global access in `typeof`
//!   guards
//! - [`IterationKeyVisitor`] adds `key` attributes to elements rendered by
//!   `.map()` callbacks
//! - [`ConsoleLogVisitor`] removes `console.log` statements

mod change;
mod delimiters;
mod edits;
mod engine;
mod error;
mod fallback;
mod language;
mod literals;
mod parser;
mod position;
mod syntactic_lock;
pub mod visitors;

pub use change::{Change, Location, Warning};
pub use delimiters::{DelimiterIssue, check_balance, check_balance_for, is_balanced};
pub use edits::{EditPlan, Rewrite, TextEdit, apply_edits};
pub use engine::{TransformEngine, TransformOutcome, VisitContext, Visitor, VisitorSet, node_text};
pub use error::SyntaxError;
pub use fallback::{
    AstFirstOutcome, AstFirstTransformer, FallbackOutput, FallbackTrigger, PatternFallback,
    RegexFallback, RegexRule, Strategy,
};
pub use language::SupportedLanguage;
pub use literals::{literal_ranges, within_literal};
pub use parser::{ParseDiagnostic, ParsedSource, Parser};
pub use position::offset_to_location;
pub use syntactic_lock::{TreeSitterSyntacticLock, ValidationFailure};
pub use visitors::{ConsoleLogVisitor, GlobalGuardVisitor, IterationKeyVisitor};
