/*! The regexp tree consumed by the compiler.

[`Tree`] is the input of the compilation pipeline. It can be produced from
the high-level intermediate representation generated by [`regex_syntax`]
(see [`Tree::from_hir`] and [`crate::parse`]) or built directly, which is
the only way of expressing back-references and lookaheads, as they are not
supported by `regex_syntax`.

Text is expressed in UTF-16 code units. Characters outside the Basic
Multilingual Plane are split into surrogate pairs when they appear in
literals, and dropped from classes.
*/

use regex_syntax::hir::{Class, Hir, HirKind, Look};

use crate::ranges::{canonicalize, CharacterRange, MAX_CODE_UNIT};
use crate::Error;

/// Nesting limit while converting from [`Hir`].
const MAX_HIR_DEPTH: u32 = 1000;

/// Zero-width assertions that can appear in a [`Tree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeAssertion {
    /// `^` without multiline mode.
    StartOfInput,
    /// `$` without multiline mode.
    EndOfInput,
    /// `^` in multiline mode.
    StartOfLine,
    /// `$` in multiline mode.
    EndOfLine,
    /// `\b`
    WordBoundary,
    /// `\B`
    NonWordBoundary,
}

/// A node in the regexp tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tree {
    /// Matches the empty string.
    Empty,
    /// A sequence of code units.
    Literal(Vec<u32>),
    /// A character class. `ranges` doesn't need to be canonical.
    Class { ranges: Vec<CharacterRange>, negated: bool },
    Assertion(TreeAssertion),
    /// A back-reference to the capture group with the given index (1-based).
    BackReference(u32),
    /// A capture group. `index` is 1-based, index 0 is the whole match.
    Capture { index: u32, sub: Box<Tree> },
    Concat(Vec<Tree>),
    Alternation(Vec<Tree>),
    /// `max` is `None` for unbounded repetitions.
    Repetition { min: u32, max: Option<u32>, greedy: bool, sub: Box<Tree> },
    Lookahead { negative: bool, sub: Box<Tree> },
}

impl Tree {
    /// Creates a literal from a string.
    pub fn literal(s: &str) -> Tree {
        Tree::Literal(s.encode_utf16().map(u32::from).collect())
    }

    /// Creates a class from a list of `(from, to)` pairs of characters.
    pub fn class(ranges: &[(char, char)]) -> Tree {
        Tree::Class { ranges: char_ranges(ranges), negated: false }
    }

    /// Creates a negated class from a list of `(from, to)` pairs.
    pub fn negated_class(ranges: &[(char, char)]) -> Tree {
        Tree::Class { ranges: char_ranges(ranges), negated: true }
    }

    /// Class that matches any code unit.
    pub fn any() -> Tree {
        Tree::Class { ranges: vec![CharacterRange::everything()], negated: false }
    }

    pub fn capture(index: u32, sub: Tree) -> Tree {
        Tree::Capture { index, sub: Box::new(sub) }
    }

    pub fn repeat(min: u32, max: Option<u32>, greedy: bool, sub: Tree) -> Tree {
        Tree::Repetition { min, max, greedy, sub: Box::new(sub) }
    }

    pub fn star(sub: Tree) -> Tree {
        Tree::repeat(0, None, true, sub)
    }

    pub fn lookahead(sub: Tree) -> Tree {
        Tree::Lookahead { negative: false, sub: Box::new(sub) }
    }

    pub fn negative_lookahead(sub: Tree) -> Tree {
        Tree::Lookahead { negative: true, sub: Box::new(sub) }
    }

    /// Returns the children of this node.
    fn children(&self) -> &[Tree] {
        match self {
            Tree::Capture { sub, .. }
            | Tree::Repetition { sub, .. }
            | Tree::Lookahead { sub, .. } => std::slice::from_ref(sub),
            Tree::Concat(items) | Tree::Alternation(items) => items,
            _ => &[],
        }
    }

    /// Calls `f` for every node in the tree, in pre-order.
    fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Tree)) {
        let mut stack = vec![self];
        while let Some(tree) = stack.pop() {
            f(tree);
            stack.extend(tree.children().iter().rev());
        }
    }

    /// Number of capture groups, excluding the implicit group 0.
    pub fn capture_count(&self) -> u32 {
        let mut count = 0;
        self.walk(&mut |t| {
            if let Tree::Capture { index, .. } = t {
                count = count.max(*index);
            }
        });
        count
    }

    /// Returns true if the tree contains some back-reference.
    pub fn contains_back_reference(&self) -> bool {
        let mut found = false;
        self.walk(&mut |t| found |= matches!(t, Tree::BackReference(_)));
        found
    }

    /// Returns the smallest and largest capture indexes in the tree, if it
    /// contains any capture.
    pub fn capture_range(&self) -> Option<(u32, u32)> {
        let mut range: Option<(u32, u32)> = None;
        self.walk(&mut |t| {
            if let Tree::Capture { index, .. } = t {
                range = Some(match range {
                    None => (*index, *index),
                    Some((lo, hi)) => (lo.min(*index), hi.max(*index)),
                });
            }
        });
        range
    }

    /// Returns true if the tree contains a start anchor (`^`).
    pub fn contains_anchor(&self) -> bool {
        let mut found = false;
        self.walk(&mut |t| {
            found |= matches!(
                t,
                Tree::Assertion(
                    TreeAssertion::StartOfInput | TreeAssertion::StartOfLine
                )
            );
        });
        found
    }

    /// Returns true if every match of this tree starts at the start of the
    /// input.
    pub fn is_anchored_at_start(&self) -> bool {
        crate::ensure_stack(|| {
            match self {
                Tree::Assertion(TreeAssertion::StartOfInput) => true,
                Tree::Capture { sub, .. } => sub.is_anchored_at_start(),
                Tree::Lookahead { negative: false, sub } => {
                    sub.is_anchored_at_start()
                }
                Tree::Concat(items) => {
                    for item in items {
                        if item.is_anchored_at_start() {
                            return true;
                        }
                        if item.max_match() != Some(0) {
                            return false;
                        }
                    }
                    false
                }
                Tree::Alternation(items) => {
                    items.iter().all(|item| item.is_anchored_at_start())
                }
                _ => false,
            }
        })
    }

    /// Minimum number of code units consumed by any match.
    pub fn min_match(&self) -> u32 {
        crate::ensure_stack(|| {
            match self {
                Tree::Empty
                | Tree::Assertion(_)
                | Tree::BackReference(_)
                | Tree::Lookahead { .. } => 0,
                Tree::Literal(units) => units.len() as u32,
                Tree::Class { .. } => 1,
                Tree::Capture { sub, .. } => sub.min_match(),
                Tree::Concat(items) => items
                    .iter()
                    .fold(0u32, |acc, item| acc.saturating_add(item.min_match())),
                Tree::Alternation(items) => {
                    items.iter().map(|item| item.min_match()).min().unwrap_or(0)
                }
                Tree::Repetition { min, sub, .. } => {
                    min.saturating_mul(sub.min_match())
                }
            }
        })
    }

    /// Maximum number of code units consumed by any match, `None` if it is
    /// unbounded.
    pub fn max_match(&self) -> Option<u32> {
        crate::ensure_stack(|| {
            match self {
                Tree::Empty | Tree::Assertion(_) | Tree::Lookahead { .. } => {
                    Some(0)
                }
                Tree::Literal(units) => Some(units.len() as u32),
                Tree::Class { .. } => Some(1),
                Tree::BackReference(_) => None,
                Tree::Capture { sub, .. } => sub.max_match(),
                Tree::Concat(items) => items.iter().try_fold(0u32, |acc, item| {
                    item.max_match().map(|m| acc.saturating_add(m))
                }),
                Tree::Alternation(items) => {
                    items.iter().try_fold(0u32, |acc, item| {
                        item.max_match().map(|m| acc.max(m))
                    })
                }
                Tree::Repetition { max, sub, .. } => {
                    if *max == Some(0) {
                        return Some(0);
                    }
                    match (max, sub.max_match()) {
                        (_, Some(0)) => Some(0),
                        (Some(max), Some(m)) => Some(max.saturating_mul(m)),
                        _ => None,
                    }
                }
            }
        })
    }

    /// Converts a [`Hir`] produced by `regex_syntax` into a tree.
    pub fn from_hir(hir: &Hir) -> Result<Tree, Error> {
        from_hir(hir, 0)
    }
}

fn char_ranges(ranges: &[(char, char)]) -> Vec<CharacterRange> {
    ranges
        .iter()
        .map(|(from, to)| CharacterRange::new(*from as u32, *to as u32))
        .collect()
}

fn from_hir(hir: &Hir, depth: u32) -> Result<Tree, Error> {
    crate::ensure_stack(|| from_hir_inner(hir, depth))
}

fn from_hir_inner(hir: &Hir, depth: u32) -> Result<Tree, Error> {
    if depth > MAX_HIR_DEPTH {
        return Err(Error::TooComplex("regexp nested too deeply".to_string()));
    }
    let tree = match hir.kind() {
        HirKind::Empty => Tree::Empty,
        HirKind::Literal(literal) => match std::str::from_utf8(&literal.0) {
            Ok(s) => Tree::literal(s),
            // Literals that are not valid UTF-8 come from `(?-u)` patterns,
            // each byte is a code unit.
            Err(_) => {
                Tree::Literal(literal.0.iter().map(|b| *b as u32).collect())
            }
        },
        HirKind::Class(Class::Unicode(class)) => {
            let mut ranges: Vec<CharacterRange> = class
                .ranges()
                .iter()
                .filter(|r| r.start() as u32 <= MAX_CODE_UNIT)
                .map(|r| {
                    CharacterRange::new(
                        r.start() as u32,
                        (r.end() as u32).min(MAX_CODE_UNIT),
                    )
                })
                .collect();
            // A class that covered the whole Unicode range except for the
            // surrogates matches lone surrogates too when working on code
            // units.
            if class.ranges().len() == 2
                && ranges.len() == 2
                && ranges[0].from() == 0
                && ranges[0].to() == 0xD7FF
                && ranges[1].from() == 0xE000
                && ranges[1].to() == MAX_CODE_UNIT
            {
                ranges = vec![CharacterRange::everything()];
            }
            canonicalize(&mut ranges);
            Tree::Class { ranges, negated: false }
        }
        HirKind::Class(Class::Bytes(class)) => Tree::Class {
            ranges: class
                .ranges()
                .iter()
                .map(|r| CharacterRange::new(r.start() as u32, r.end() as u32))
                .collect(),
            negated: false,
        },
        HirKind::Look(look) => Tree::Assertion(match look {
            Look::Start => TreeAssertion::StartOfInput,
            Look::End => TreeAssertion::EndOfInput,
            Look::StartLF => TreeAssertion::StartOfLine,
            Look::EndLF => TreeAssertion::EndOfLine,
            Look::WordAscii | Look::WordUnicode => TreeAssertion::WordBoundary,
            Look::WordAsciiNegate | Look::WordUnicodeNegate => {
                TreeAssertion::NonWordBoundary
            }
            other => {
                return Err(Error::Unsupported(format!(
                    "look-around assertion {:?}",
                    other
                )))
            }
        }),
        HirKind::Repetition(rep) => Tree::Repetition {
            min: rep.min,
            max: rep.max,
            greedy: rep.greedy,
            sub: Box::new(from_hir(&rep.sub, depth + 1)?),
        },
        HirKind::Capture(capture) => Tree::Capture {
            index: capture.index,
            sub: Box::new(from_hir(&capture.sub, depth + 1)?),
        },
        HirKind::Concat(items) => Tree::Concat(
            items
                .iter()
                .map(|item| from_hir(item, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        HirKind::Alternation(items) => Tree::Alternation(
            items
                .iter()
                .map(|item| from_hir(item, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
    };
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn captures_and_anchors() {
        let tree = Tree::Concat(vec![
            Tree::Assertion(TreeAssertion::StartOfInput),
            Tree::capture(1, Tree::literal("a")),
            Tree::capture(2, Tree::capture(3, Tree::any())),
        ]);
        assert_eq!(tree.capture_count(), 3);
        assert_eq!(tree.capture_range(), Some((1, 3)));
        assert!(tree.contains_anchor());
        assert!(tree.is_anchored_at_start());

        let tree = Tree::Concat(vec![
            Tree::literal("a"),
            Tree::Assertion(TreeAssertion::StartOfInput),
        ]);
        assert!(tree.contains_anchor());
        assert!(!tree.is_anchored_at_start());

        let tree = Tree::Alternation(vec![
            Tree::Concat(vec![
                Tree::Assertion(TreeAssertion::StartOfInput),
                Tree::literal("a"),
            ]),
            Tree::literal("b"),
        ]);
        assert!(!tree.is_anchored_at_start());
        assert_eq!(tree.capture_range(), None);
    }

    #[test]
    fn match_lengths() {
        let tree = Tree::Concat(vec![
            Tree::literal("ab"),
            Tree::repeat(2, Some(3), true, Tree::literal("xy")),
        ]);
        assert_eq!(tree.min_match(), 6);
        assert_eq!(tree.max_match(), Some(8));

        let tree = Tree::star(Tree::literal("a"));
        assert_eq!(tree.min_match(), 0);
        assert_eq!(tree.max_match(), None);

        let tree = Tree::star(Tree::Assertion(TreeAssertion::WordBoundary));
        assert_eq!(tree.max_match(), Some(0));
        assert_eq!(Tree::BackReference(1).max_match(), None);
    }

    #[test]
    fn surrogate_pairs_in_literals() {
        assert_eq!(
            Tree::literal("\u{1F600}"),
            Tree::Literal(vec![0xD83D, 0xDE00])
        );
    }
}
