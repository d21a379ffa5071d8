/*! End-to-end tests. */
use std::ops::Range;

use pretty_assertions::assert_eq;

use crate::{parse, Compiler, Config, ExecError, Tree};

type Spans = Option<Vec<Option<Range<usize>>>>;

fn exec_tree(config: Config, tree: &Tree, input: &str) -> Result<Spans, ExecError> {
    let regexp = Compiler::with_config(config).compile(tree).unwrap();
    Ok(regexp.exec_str(input)?.map(|captures| captures.iter().collect()))
}

fn exec(config: Config, pattern: &str, input: &str) -> Result<Spans, ExecError> {
    let tree = parse(pattern, &config).unwrap();
    exec_tree(config, &tree, input)
}

macro_rules! match_at {
    ($pattern:expr, $input:expr, $range:expr) => {{
        match_at!(Config::default(), $pattern, $input, $range)
    }};
    ($config:expr, $pattern:expr, $input:expr, $range:expr) => {{
        let spans = exec($config, $pattern, $input).unwrap();
        assert_eq!(
            spans.and_then(|spans| spans[0].clone()),
            Some($range),
            "\n\n`{}` should match {:?}",
            $pattern,
            $input
        );
    }};
}

macro_rules! no_match {
    ($pattern:expr, $input:expr) => {{
        no_match!(Config::default(), $pattern, $input)
    }};
    ($config:expr, $pattern:expr, $input:expr) => {{
        let spans = exec($config, $pattern, $input).unwrap();
        assert_eq!(
            spans, None,
            "\n\n`{}` should not match {:?}",
            $pattern, $input
        );
    }};
}

macro_rules! captures {
    ($pattern:expr, $input:expr, $expected:expr) => {{
        captures!(Config::default(), $pattern, $input, $expected)
    }};
    ($config:expr, $pattern:expr, $input:expr, $expected:expr) => {{
        let spans = exec($config, $pattern, $input).unwrap();
        assert_eq!(
            spans,
            Some($expected.to_vec()),
            "\n\nunexpected captures for `{}` on {:?}",
            $pattern,
            $input
        );
    }};
}

#[test]
fn literals() {
    match_at!("abc", "xxabcxx", 2..5);
    match_at!("abc", "abc", 0..3);
    match_at!("", "abc", 0..0);
    no_match!("abc", "ababx");
    no_match!("abc", "");
    // Positions are UTF-16 code units.
    match_at!("a", "\u{1F600}a", 2..3);
}

#[test]
fn alternation() {
    match_at!("a|ab", "ab", 0..1);
    match_at!("ab|a", "ab", 0..2);
    match_at!("cat|category", "category", 0..3);
    match_at!("foo|bar|baz", "xxbazfoo", 2..5);
    match_at!("(?:alpha|beta|gamma|delta)!", "xx gamma!", 3..9);
    match_at!("(?:alpha|beta|gamma|delta)!", "beta gamma!", 5..11);
    no_match!("(?:alpha|beta|gamma|delta)!", "epsilon!");
    match_at!("(?:ab|ac|ad|b)x", "adx", 0..3);
    match_at!("(?:ab|ac|ad|b)x", "aabx", 1..4);
}

#[test]
fn greedy_and_lazy() {
    match_at!("a+", "baaa", 1..4);
    match_at!("a+?", "baaa", 1..2);
    match_at!("a*", "baaa", 0..0);
    match_at!("a*?b", "aab", 0..3);
    match_at!("<.*>", "<a><b>", 0..6);
    match_at!("<.*?>", "<a><b>", 0..3);
    no_match!("<.*>", "<a\n>");
    captures!("(a+?)(a*)", "aaa", [Some(0..3), Some(0..1), Some(1..3)]);
    captures!("(a+)+b", "aaab", [Some(0..4), Some(0..3)]);
}

#[test]
fn bounded_repetitions() {
    match_at!("a{2,3}", "aaaa", 0..3);
    match_at!("a{2,3}?", "aaaa", 0..2);
    match_at!("(?:ab){2}", "abab", 0..4);
    no_match!("a{3}", "aa");
    match_at!("x(?:ab){2,4}y", "xababababy", 0..10);
    no_match!("x(?:ab){2,4}y", "xabababababy");
    no_match!("x(?:ab){2,4}y", "xaby");
    match_at!("a{20,30}b", &format!("{}b", "a".repeat(25)), 0..26);
    match_at!("a{20,30}b", &format!("{}b", "a".repeat(35)), 5..36);
    no_match!("a{20,30}b", &format!("{}b", "a".repeat(19)));
    match_at!("(?:a*)*b", "aab", 0..3);
    no_match!("(?:a*)*b", "aac");
    match_at!("(?:a?)+?b", "ab", 0..2);
}

#[test]
fn captures() {
    captures!("a(b|c)*d", "xxabcbd", [Some(2..7), Some(5..6)]);
    captures!("(a)|(b)", "b", [Some(0..1), None, Some(0..1)]);
    captures!("(a|ab)(c|bcd)(d*)", "abcd", [
        Some(0..4),
        Some(0..1),
        Some(1..4),
        Some(4..4)
    ]);
    captures!(r"(\d+)-(\d+)", "tel 12-345", [
        Some(4..10),
        Some(4..6),
        Some(7..10)
    ]);
    // Captures inside a loop are reset on each iteration.
    captures!("(?:(a)|b)+", "ab", [Some(0..2), None]);
    captures!("(?:(a)|b)+", "ba", [Some(0..2), Some(1..2)]);
}

#[test]
fn anchors() {
    match_at!("^abc", "abc", 0..3);
    no_match!("^abc", "xabc");
    no_match!("abc$", "abcx");
    match_at!("abc$", "xabc", 1..4);
    match_at!("^$", "", 0..0);
    no_match!("^b", "a\nb");
    match_at!("(?m)^b", "a\nb", 2..3);
    match_at!("(?m)^b", "a\rb", 2..3);
    match_at!("(?m)^b", "a\u{2028}b", 2..3);
    match_at!("(?m)a$", "a\nb", 0..1);
    match_at!("(?m)^$", "a\n\nb", 2..2);
    match_at!("x*^a", "a", 0..1);
}

#[test]
fn multiline_config() {
    let multiline = || Config::default().multiline(true);
    match_at!(multiline(), "^b", "a\nb", 2..3);
    match_at!(multiline(), "a$", "a\nb", 0..1);
    no_match!(Config::default(), "a$", "a\nb");
    match_at!(multiline(), "^b$", "ab\nb\nc", 3..4);
}

#[test]
fn word_boundaries() {
    match_at!(r"\bfoo\b", "a foo b", 2..5);
    match_at!(r"\bfoo\b", "foo", 0..3);
    no_match!(r"\bfoo\b", "afoo");
    no_match!(r"\bfoo\b", "foo_");
    match_at!(r"\Boo\B", "foox", 1..3);
    match_at!(r"\b", "  ab", 2..2);
    match_at!(r"a\b", "ab a", 3..4);
    match_at!(r"\b.", "!!a", 2..3);
    match_at!(r"!\B", "a!!", 1..2);
}

#[test]
fn classes() {
    match_at!("[a-c]+", "xxbcaz", 2..5);
    match_at!("[^a-c]+", "abxyzc", 2..5);
    match_at!(r"\d+", "ab123c", 2..5);
    match_at!("[0-9]{3}", "a12b345", 4..7);
    match_at!(r"\s", "a b", 1..2);
    match_at!("[a-z]+[0-9]{3}", "abc12 de345", 6..11);
}

#[test]
fn ignore_case() {
    let ignore_case = || Config::default().ignore_case(true);
    match_at!(ignore_case(), "abc", "xABC", 1..4);
    match_at!(ignore_case(), "ABC", "xabc", 1..4);
    match_at!(ignore_case(), "[a-c]+", "XABCz", 1..4);
    match_at!(ignore_case(), "a(b|c)*d", "XABCBD", 1..6);
    match_at!(ignore_case(), "(?:alpha|beta|gamma|delta)!", "GAMMA!", 0..6);
    match_at!(ignore_case(), r"\bfoo\b", "a FOO b", 2..5);
    no_match!(Config::default(), "x", "X");
    match_at!("(?i)x", "X", 0..1);
}

#[test]
fn one_byte() {
    let one_byte = || Config::default().one_byte(true);
    match_at!(one_byte(), "abc", "xabc", 1..4);
    match_at!(one_byte(), "é", "café", 3..4);
    match_at!(one_byte(), "a\u{100}|b", "ab", 1..2);
    match_at!(one_byte(), "(?m)^b", "a\nb", 2..3);
    match_at!(one_byte(), r"\d+", "ab123c", 2..5);
    match_at!(one_byte(), "[^a]", "a\u{FF}", 1..2);
    match_at!(
        one_byte().ignore_case(true),
        "(?:alpha|beta|gamma|delta)!",
        "xxDELTA!",
        2..8
    );
    assert_eq!(exec(one_byte(), "a", "\u{100}"), Err(ExecError::NonLatin1Input));
}

#[test]
fn lookaheads() {
    let config = Config::default;

    let tree = Tree::Concat(vec![
        Tree::literal("a"),
        Tree::lookahead(Tree::literal("b")),
    ]);
    assert_eq!(exec_tree(config(), &tree, "acab"), Ok(Some(vec![Some(2..3)])));
    assert_eq!(exec_tree(config(), &tree, "acac"), Ok(None));

    let tree = Tree::Concat(vec![
        Tree::literal("a"),
        Tree::negative_lookahead(Tree::literal("b")),
    ]);
    assert_eq!(exec_tree(config(), &tree, "abac"), Ok(Some(vec![Some(2..3)])));
    assert_eq!(exec_tree(config(), &tree, "abab"), Ok(None));

    // Captures set inside a positive lookahead are kept, and lookaheads are
    // not entered again when backtracking.
    let tree = Tree::Concat(vec![
        Tree::lookahead(Tree::capture(1, Tree::repeat(1, None, true, Tree::literal("a")))),
        Tree::star(Tree::literal("a")),
        Tree::literal("b"),
        Tree::BackReference(1),
    ]);
    assert_eq!(
        exec_tree(config(), &tree, "baaabac"),
        Ok(Some(vec![Some(3..6), Some(3..4)]))
    );

    // Captures set inside a negative lookahead are always cleared.
    let tree = Tree::Concat(vec![
        Tree::negative_lookahead(Tree::capture(1, Tree::literal("x"))),
        Tree::capture(2, Tree::literal("a")),
    ]);
    assert_eq!(
        exec_tree(config(), &tree, "a"),
        Ok(Some(vec![Some(0..1), None, Some(0..1)]))
    );
}

#[test]
fn back_references() {
    let tree = Tree::Concat(vec![
        Tree::capture(1, Tree::class(&[('a', 'b')])),
        Tree::BackReference(1),
    ]);
    assert_eq!(
        exec_tree(Config::default(), &tree, "abb"),
        Ok(Some(vec![Some(1..3), Some(1..2)]))
    );
    assert_eq!(exec_tree(Config::default(), &tree, "abab"), Ok(None));

    // A reference to a group that didn't participate matches the empty
    // string.
    let tree = Tree::Concat(vec![
        Tree::BackReference(1),
        Tree::capture(1, Tree::literal("a")),
    ]);
    assert_eq!(
        exec_tree(Config::default(), &tree, "a"),
        Ok(Some(vec![Some(0..1), Some(0..1)]))
    );

    let tree = Tree::Concat(vec![
        Tree::capture(1, Tree::literal("ab")),
        Tree::BackReference(1),
    ]);
    assert_eq!(
        exec_tree(Config::default().ignore_case(true), &tree, "xAbaB"),
        Ok(Some(vec![Some(1..5), Some(1..3)]))
    );
    assert_eq!(exec_tree(Config::default(), &tree, "xAbaB"), Ok(None));
}

#[test]
fn backtrack_limit() {
    let config = Config::default().backtrack_limit(100);
    assert_eq!(
        exec(config, "(?:a+)+b", &"a".repeat(30)),
        Err(ExecError::BacktrackLimitExceeded)
    );
}

#[test]
fn limits_do_not_change_results() {
    let cases = [
        ("a(b|c)*d", "xxabcbd"),
        ("(a|ab)(c|bcd)(d*)", "abcd"),
        ("(?:alpha|beta|gamma|delta)!", "beta gamma!"),
        ("x(?:ab){2,4}y", "xababababy"),
        (r"\bfoo\b", "a foo b"),
        (r"\Boo\B", "foox"),
        ("(?m)^b$", "ab\nb\nc"),
        ("(?:(a)|b)+", "ab"),
        ("[a-z]+[0-9]{3}", "abc12 de345"),
        ("(a+?)(a*)", "aaa"),
        ("(?:a*)*b", "aab"),
    ];
    let constrained = Config::default()
        .max_copies_per_node(2)
        .max_recursion(2)
        .max_siblings(1)
        .max_dispatch_groups(2);
    for (pattern, input) in cases {
        assert_eq!(
            exec(constrained.clone(), pattern, input),
            exec(Config::default(), pattern, input),
            "\n\n`{}` on {:?}",
            pattern,
            input
        );
    }
}

#[test]
fn compile_errors() {
    assert!(matches!(
        parse("a(b", &Config::default()),
        Err(crate::Error::Syntax(_))
    ));
    let tree = Tree::Concat(vec![Tree::literal("a"), Tree::BackReference(2)]);
    assert!(Compiler::new().compile(&tree).is_err());
}

/// Nests `tree` `depth` times with `wrap`.
fn nested(depth: u32, tree: Tree, wrap: impl Fn(u32, Tree) -> Tree) -> Tree {
    (1..=depth).rev().fold(tree, |tree, i| wrap(i, tree))
}

#[test]
fn deep_nesting() {
    let depth = Config::default().max_depth - 100;

    let tree = nested(depth, Tree::literal("a"), Tree::capture);
    let spans = exec_tree(Config::default(), &tree, "xa").unwrap().unwrap();
    assert_eq!(spans.len(), depth as usize + 1);
    assert!(spans.iter().all(|span| span == &Some(1..2)));

    let tree = nested(depth, Tree::literal("a"), |_, tree| {
        Tree::Alternation(vec![Tree::literal("b"), tree])
    });
    let spans = exec_tree(Config::default(), &tree, "xa").unwrap().unwrap();
    assert_eq!(spans, vec![Some(1..2)]);

    let tree = Tree::Concat(vec![
        nested(depth, Tree::literal("a"), |_, tree| Tree::lookahead(tree)),
        Tree::literal("ab"),
    ]);
    let spans = exec_tree(Config::default(), &tree, "aaab").unwrap().unwrap();
    assert_eq!(spans, vec![Some(2..4)]);

    let tree = nested(depth + 200, Tree::literal("a"), Tree::capture);
    assert!(matches!(
        Compiler::new().compile(&tree),
        Err(crate::Error::TooComplex(_))
    ));
}

#[test]
fn long_patterns() {
    // Long sequences are not nested, so they are not limited by the
    // nesting depth.
    let pattern = "a?".repeat(1000);
    match_at!(pattern.as_str(), "aaa", 0..3);

    let tree = Tree::Concat(
        (1..=1900).map(|i| Tree::capture(i, Tree::literal("a"))).collect(),
    );
    let input = "a".repeat(1900);
    let spans = exec_tree(Config::default(), &tree, &input).unwrap().unwrap();
    assert_eq!(spans.len(), 1901);
    assert_eq!(spans[0], Some(0..1900));
    assert_eq!(spans[1900], Some(1899..1900));
}
