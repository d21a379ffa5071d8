use regex_syntax as re;

use crate::tree::Tree;
use crate::{Config, Error};

/// Parses a regexp and returns its [`Tree`].
///
/// Parsing is done by `regex_syntax`, so the accepted syntax is the one
/// described in its documentation, minus the look-around assertions that
/// have no counterpart in [`crate::TreeAssertion`]. When `config` enables
/// multiline mode `^` and `$` are parsed as line anchors, as if the pattern
/// started with `(?m)`. Case-insensitivity is applied by the compiler, so
/// `(?i)` is the only way of making the tree itself case-insensitive.
pub fn parse(pattern: &str, config: &Config) -> Result<Tree, Error> {
    let mut parser = re::ast::parse::ParserBuilder::new().build();

    let ast = parser
        .parse(pattern)
        .map_err(|err| Error::Syntax(err.kind().to_string()))?;

    let mut translator = re::hir::translate::TranslatorBuilder::new()
        .case_insensitive(false)
        .multi_line(config.multiline)
        .unicode(true)
        .utf8(false)
        .build();

    let hir = translator
        .translate(pattern, &ast)
        .map_err(|err| Error::Syntax(err.kind().to_string()))?;

    Tree::from_hir(&hir)
}
