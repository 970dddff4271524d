//! Grammar selection for script files.
//!
//! Only the two TypeScript grammars are loaded. TSX is a superset of
//! JavaScript and JSX, so every non-TypeScript script parses with it, and so
//! does any file whose extension is not recognised.

use std::fmt;
use std::path::Path;

/// Tree-sitter grammar used for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SupportedLanguage {
    /// `.ts`, `.mts` and `.cts`. Angle-bracket casts rule out JSX here.
    TypeScript,
    /// `.tsx`, `.js`, `.jsx`, `.mjs`, `.cjs` and anything unrecognised.
    #[default]
    Tsx,
}

const TYPESCRIPT_EXTENSIONS: &[&str] = &["ts", "mts", "cts"];
const TSX_EXTENSIONS: &[&str] = &["tsx", "js", "jsx", "mjs", "cjs"];

impl SupportedLanguage {
    /// Every grammar, in a fixed order.
    pub const ALL: [Self; 2] = [Self::TypeScript, Self::Tsx];

    /// Grammar for a bare extension, case-insensitively.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        let matches = |known: &[&str]| known.iter().any(|k| k.eq_ignore_ascii_case(ext));
        if matches(TYPESCRIPT_EXTENSIONS) {
            Some(Self::TypeScript)
        } else if matches(TSX_EXTENSIONS) {
            Some(Self::Tsx)
        } else {
            None
        }
    }

    /// Grammar for `path`, or `None` when it is not a script.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Grammar for `path`, falling back to TSX.
    #[must_use]
    pub fn for_path(path: &Path) -> Self {
        Self::from_path(path).unwrap_or_default()
    }

    /// The compiled Tree-sitter grammar.
    #[must_use]
    pub fn tree_sitter_language(self) -> tree_sitter::Language {
        match self {
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }
}

impl fmt::Display for SupportedLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("src/util.ts", SupportedLanguage::TypeScript)]
    #[case("src/worker.MTS", SupportedLanguage::TypeScript)]
    #[case("app/page.tsx", SupportedLanguage::Tsx)]
    #[case("components/List.jsx", SupportedLanguage::Tsx)]
    #[case("scripts/build.cjs", SupportedLanguage::Tsx)]
    #[case("tsconfig.json", SupportedLanguage::Tsx)]
    #[case("Makefile", SupportedLanguage::Tsx)]
    fn picks_grammar_from_path(#[case] path: &str, #[case] expected: SupportedLanguage) {
        assert_eq!(SupportedLanguage::for_path(Path::new(path)), expected);
    }

    #[test]
    fn unrecognised_extensions_have_no_grammar() {
        assert_eq!(SupportedLanguage::from_extension("json"), None);
        assert_eq!(SupportedLanguage::from_extension(""), None);
        assert_eq!(SupportedLanguage::from_path(Path::new("tsconfig.json")), None);
        assert_eq!(SupportedLanguage::from_path(Path::new("Makefile")), None);
        assert_eq!(
            SupportedLanguage::from_path(Path::new("app/page.tsx")),
            Some(SupportedLanguage::Tsx)
        );
    }

    #[test]
    fn every_grammar_loads() {
        for language in SupportedLanguage::ALL {
            let mut parser = tree_sitter::Parser::new();
            assert!(parser.set_language(&language.tree_sitter_language()).is_ok(), "{language}");
        }
    }
}
