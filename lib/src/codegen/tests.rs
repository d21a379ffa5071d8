use pretty_assertions::assert_eq;
use rustc_hash::FxHashSet;

use super::*;
use crate::analysis::analyze;
use crate::assembler::recording::RecordingAssembler;
use crate::graph::lower::Lowering;
use crate::graph::{Alternative, ChoiceKind, TextElement, TextElementKind};
use crate::{parse, Tree};

fn text(graph: &mut Graph, s: &str, on_success: NodeId) -> NodeId {
    graph.add(NodeKind::Text {
        elements: vec![TextElement {
            kind: TextElementKind::Atom(s.chars().map(|c| c as u32).collect()),
            cp_offset: 0,
        }],
        ignore_case: false,
        on_success,
    })
}

fn generate(
    graph: &Graph,
    entry: NodeId,
    config: &Config,
) -> (Vec<String>, CodegenStats) {
    let (asm, stats) =
        Codegen::new(graph, config, RecordingAssembler::default())
            .generate(entry)
            .unwrap();
    (asm.ops, stats)
}

fn generate_pattern(pattern: &str, config: &Config) -> Vec<String> {
    generate_tree(&parse(pattern, config).unwrap(), config)
}

fn generate_tree(tree: &Tree, config: &Config) -> Vec<String> {
    let mut lowering = Lowering::new(config, tree.capture_count());
    let entry = lowering.lower_pattern(tree).unwrap();
    let (mut graph, _) = lowering.finish();
    let (entry, _) = analyze(&mut graph, entry, config);
    generate(&graph, entry, config).0
}

/// Returns the labels that are jumped to, and the labels that are bound.
fn labels(ops: &[String]) -> (FxHashSet<String>, FxHashSet<String>) {
    let mut used = FxHashSet::default();
    let mut bound = FxHashSet::default();
    for op in ops {
        let mut words = op.split(' ');
        let name = words.next().unwrap();
        for word in words.filter(|w| w.starts_with('L')) {
            if name == "bind" {
                bound.insert(word.to_string());
            } else {
                used.insert(word.to_string());
            }
        }
    }
    (used, bound)
}

#[test]
fn trivial_trace_emits_no_deferred_actions() {
    let config = Config::default();
    let mut graph = Graph::new();
    let accept = graph.add(NodeKind::End(EndAction::Accept));
    let (ops, stats) = generate(&graph, accept, &config);
    assert_eq!(
        ops,
        vec!["push_backtrack L0", "bind L1", "succeed", "bind L0", "fail"]
    );
    assert_eq!(stats.flushes, 0);
}

#[test]
fn deferred_actions_are_flushed_before_success() {
    let config = Config::default();
    let mut graph = Graph::new();
    let accept = graph.add(NodeKind::End(EndAction::Accept));
    let store_end = graph.add(NodeKind::Action {
        kind: ActionKind::StorePosition { reg: 3, is_capture: true },
        on_success: accept,
    });
    let ab = text(&mut graph, "ab", store_end);
    let store_start = graph.add(NodeKind::Action {
        kind: ActionKind::StorePosition { reg: 2, is_capture: true },
        on_success: ab,
    });

    let (ops, stats) = generate(&graph, store_start, &config);

    assert_eq!(
        ops,
        vec![
            "push_backtrack L0",
            "bind L1",
            // The last code unit is loaded first, so that a single bounds
            // check covers the whole text.
            "load 1 bt true 1",
            "check_not_char 0x62 bt",
            "load 0 bt false 1",
            "check_not_char 0x61 bt",
            "write_cp r2 0",
            "write_cp r3 2",
            "advance_cp 2",
            "push_backtrack L2",
            "bind L3",
            "succeed",
            "bind L2",
            "clear_registers r2 r3",
            "backtrack",
            "bind L0",
            "fail",
        ]
    );
    assert_eq!(stats.flushes, 1);
}

#[test]
fn quick_checks_load_several_code_units() {
    let config = Config::default();
    let mut graph = Graph::new();
    let accept = graph.add(NodeKind::End(EndAction::Accept));
    let ab = text(&mut graph, "ab", accept);
    let cd = text(&mut graph, "cd", accept);
    let choice = graph.add(NodeKind::Choice {
        kind: ChoiceKind::Plain,
        alternatives: vec![Alternative::new(ab), Alternative::new(cd)],
        not_at_start: false,
    });

    let (ops, stats) = generate(&graph, choice, &config);

    assert!(ops.contains(&"load 0 bt true 2".to_string()));
    assert!(ops.iter().any(|op| op.starts_with("check_char 0x620061 L")));
    assert!(ops.contains(&"check_not_char 0x640063 bt".to_string()));
    assert_eq!(stats.quick_checks, 2);
    assert_eq!(stats.dispatches, 0);

    // In one-byte mode up to four code units are loaded at once, but three
    // is rounded down to two.
    let config = Config::default().one_byte(true);
    let mut graph = Graph::new();
    let accept = graph.add(NodeKind::End(EndAction::Accept));
    let abc = text(&mut graph, "abc", accept);
    let def = text(&mut graph, "def", accept);
    let choice = graph.add(NodeKind::Choice {
        kind: ChoiceKind::Plain,
        alternatives: vec![Alternative::new(abc), Alternative::new(def)],
        not_at_start: false,
    });
    let (ops, _) = generate(&graph, choice, &config);
    assert!(ops.contains(&"load 0 bt true 2".to_string()));
    assert!(ops.iter().any(|op| op.starts_with("check_char 0x6261 L")));
}

#[test]
fn choices_dispatch_on_first_code_unit() {
    let config = Config::default();
    let mut graph = Graph::new();
    let accept = graph.add(NodeKind::End(EndAction::Accept));
    let alternatives = ["ax", "by", "cz"]
        .iter()
        .map(|s| Alternative::new(text(&mut graph, s, accept)))
        .collect();
    let choice = graph.add(NodeKind::Choice {
        kind: ChoiceKind::Plain,
        alternatives,
        not_at_start: false,
    });

    let (ops, stats) = generate(&graph, choice, &config);

    assert_eq!(stats.dispatches, 1);
    assert_eq!(ops[2], "load 0 bt true 1");
    assert!(ops[3].starts_with("check_char 0x61 L"));
    assert!(ops[4].starts_with("check_char 0x62 L"));
    assert!(ops[5].starts_with("check_char 0x63 L"));
    assert_eq!(ops[6], "goto bt");
    // The first code unit is not loaded again.
    assert!(!ops[7..].iter().any(|op| op.starts_with("load 0 ")));
}

#[test]
fn every_label_is_bound() {
    let patterns = [
        "abc",
        "a(b|c)*d",
        "(a|b|c|d)+x",
        "x(?:ab|cd|ef|gh)y",
        "(a+)+b",
        "\\bfoo\\b",
        "^foo$",
        "a{2,5}b",
        "(?:a*)*b",
        "[a-z]+[0-9]{3}",
    ];
    for config in [
        Config::default(),
        Config::default().ignore_case(true),
        Config::default().multiline(true),
        Config::default().one_byte(true),
        Config::default().max_recursion(2).max_copies_per_node(2),
    ] {
        let trees = patterns
            .iter()
            .map(|p| (p.to_string(), parse(p, &config).unwrap()))
            .chain([
                (
                    "a(?=b)".to_string(),
                    Tree::Concat(vec![
                        Tree::literal("a"),
                        Tree::lookahead(Tree::literal("b")),
                    ]),
                ),
                (
                    "a(?!b)c".to_string(),
                    Tree::Concat(vec![
                        Tree::literal("a"),
                        Tree::negative_lookahead(Tree::literal("b")),
                        Tree::literal("c"),
                    ]),
                ),
                (
                    "(a)\\1".to_string(),
                    Tree::Concat(vec![
                        Tree::capture(1, Tree::literal("a")),
                        Tree::BackReference(1),
                    ]),
                ),
            ]);
        for (pattern, tree) in trees {
            let ops = generate_tree(&tree, &config);
            let (used, bound) = labels(&ops);
            for label in &used {
                assert!(
                    bound.contains(label),
                    "{} is not bound in code for `{}`",
                    label,
                    pattern
                );
            }
            assert!(ops.contains(&"succeed".to_string()));
        }
    }
}

#[test]
fn limited_recursion_uses_work_list() {
    let config = Config::default().max_recursion(1);
    let limited = generate_pattern("abc(d|e)fgh(i|j)k", &config);
    let unlimited = generate_pattern("abc(d|e)fgh(i|j)k", &Config::default());
    // Both versions are complete, but the limited one jumps to generic
    // versions of the nodes instead of emitting them inline.
    assert!(limited.iter().filter(|op| op.starts_with("goto L")).count() > 0);
    assert!(limited.contains(&"succeed".to_string()));
    assert!(unlimited.contains(&"succeed".to_string()));
}
