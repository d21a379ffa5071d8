/*! Assertion-interest analysis.

Assertions like `^` and `\b` depend on the code unit that precedes the
current position. Sometimes that code unit is known when the code is
generated: after matching the text `a` the previous code unit is a word
character, after `^` the position is the start of the input. This module
finds out where such facts are known and creates specialized copies of the
nodes that can make use of them.

The analysis runs in two phases:

1. Interests are computed by a depth-first traversal that propagates them
   backwards, from each assertion to the nodes that precede it without
   consuming input.
2. Facts are propagated forwards from the nodes that establish them.
   Whenever facts reach a node interested in them, the node is replaced by
   a sibling that carries those facts (see [`SiblingTable`]).
*/

use bitvec::vec::BitVec;
use log::*;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::graph::{
    ActionKind, AssertionKind, ChoiceKind, Graph, NodeId, NodeInfo, NodeKind,
    SiblingTable, TextElementKind, TriBool,
};
use crate::ranges::{
    case_equivalents_of, word_relation, CharacterRange,
    LINE_TERMINATOR_RANGES,
};
use crate::Config;

/// Runs the analysis over the graph reachable from `entry`. Returns the
/// node that must be used as entry from now on, and the table of siblings
/// created.
///
/// Both phases keep their pending nodes in explicit stacks, so the size of
/// the graph is not limited by the size of the call stack.
pub(crate) fn analyze(
    graph: &mut Graph,
    entry: NodeId,
    config: &Config,
) -> (NodeId, SiblingTable) {
    let mut analysis = Analysis {
        being_analyzed: BitVec::repeat(false, graph.len()),
        been_analyzed: BitVec::repeat(false, graph.len()),
        visited: FxHashSet::default(),
        siblings: SiblingTable::new(),
        graph,
        config,
    };

    analysis.compute_interests(entry);

    let entry = analysis.propagate_facts(entry);

    trace!(
        "analysis done, {} nodes after specialization",
        analysis.graph.len()
    );

    (entry, analysis.siblings)
}

struct Analysis<'a> {
    graph: &'a mut Graph,
    config: &'a Config,
    siblings: SiblingTable,
    being_analyzed: BitVec<usize>,
    been_analyzed: BitVec<usize>,
    /// Nodes visited without facts during the forward propagation.
    visited: FxHashSet<NodeId>,
}

/// A node whose successors are being analyzed.
struct InterestFrame {
    id: NodeId,
    successors: SmallVec<[NodeId; 2]>,
    /// Index of the successor being analyzed.
    next: usize,
}

impl<'a> Analysis<'a> {
    /// Computes the interests of `entry` and every node reachable from it.
    /// The interests of a node are known once all its successors are done.
    /// A node that is being analyzed when reached again through a loop
    /// contributes the interests found so far.
    fn compute_interests(&mut self, entry: NodeId) {
        let mut stack: Vec<InterestFrame> = Vec::new();
        stack.extend(self.begin_interests(entry));

        while let Some(frame) = stack.last_mut() {
            let id = frame.id;
            match frame.successors.get(frame.next).copied() {
                Some(successor) => match self.begin_interests(successor) {
                    Some(child) => stack.push(child),
                    None => {
                        frame.next += 1;
                        self.add_interests_from(id, successor);
                    }
                },
                None => {
                    stack.pop();
                    self.finish_interests(id);
                    if let Some(parent) = stack.last_mut() {
                        parent.next += 1;
                        let parent = parent.id;
                        self.add_interests_from(parent, id);
                    }
                }
            }
        }
    }

    /// Starts the analysis of `id`, returns `None` if the node was already
    /// analyzed or is being analyzed.
    fn begin_interests(&mut self, id: NodeId) -> Option<InterestFrame> {
        let i = id.index();
        if self.been_analyzed[i] || self.being_analyzed[i] {
            return None;
        }
        self.being_analyzed.set(i, true);

        let successors = match &self.graph.node(id).kind {
            // The body of a loop is analyzed last, as it may need the
            // interests of the loop node itself.
            NodeKind::Choice {
                kind: ChoiceKind::Loop { loop_alternative, .. },
                alternatives,
                ..
            } => smallvec::smallvec![
                alternatives[1 - loop_alternative].node,
                alternatives[*loop_alternative].node,
            ],
            _ => self.graph.node(id).successors(),
        };

        Some(InterestFrame { id, successors, next: 0 })
    }

    fn add_interests_from(&mut self, id: NodeId, successor: NodeId) {
        match &self.graph.node(id).kind {
            // Nodes that consume input know what precedes the nodes that
            // follow them, so the interests stop here.
            NodeKind::Text { .. } | NodeKind::BackReference { .. } => {}
            _ => {
                let following = self.graph.node(successor).info;
                self.graph.node_mut(id).info.add_from_following(&following);
            }
        }
    }

    fn finish_interests(&mut self, id: NodeId) {
        if let NodeKind::Assertion { kind, .. } = self.graph.node(id).kind {
            let info = &mut self.graph.node_mut(id).info;
            match kind {
                AssertionKind::AtStart => info.follows_start_interest = true,
                AssertionKind::AfterNewline => {
                    info.follows_newline_interest = true;
                    info.follows_start_interest = true;
                }
                AssertionKind::AtBoundary | AssertionKind::AtNonBoundary => {
                    info.follows_word_interest = true;
                    info.follows_start_interest = true;
                }
                AssertionKind::AtEnd => {}
            }
        }
        let i = id.index();
        self.being_analyzed.set(i, false);
        self.been_analyzed.set(i, true);
    }

    /// Propagates facts forward from `entry`, replacing the successors of
    /// each node by the siblings specialized for the facts known after it.
    /// Returns the node that replaces `entry`.
    fn propagate_facts(&mut self, entry: NodeId) -> NodeId {
        let (entry, explore) = self.specialize(entry, NodeInfo::default());
        let mut pending = Vec::new();
        if explore {
            pending.push(entry);
        }

        while let Some(id) = pending.pop() {
            let facts = self.out_facts(id);
            let successors = self.graph.node(id).successors();
            for (i, successor) in successors.into_iter().enumerate() {
                let (replacement, explore) = self.specialize(successor, facts);
                if replacement != successor {
                    self.graph.node_mut(id).set_successor(i, replacement);
                }
                if explore {
                    pending.push(replacement);
                }
            }
        }

        entry
    }

    /// Returns the node that must be used instead of `id` when it is
    /// reached with `facts`, and whether the successors of that node still
    /// need to be visited.
    fn specialize(&mut self, id: NodeId, facts: NodeInfo) -> (NodeId, bool) {
        let info = self.graph.node(id).info;

        if !info.has_lookbehind() || facts.facts_unknown() {
            return (id, self.visited.insert(id));
        }

        let mut desired = info;
        desired.add_from_preceding(&facts);

        let (sibling, cloned) = self.siblings.ensure(
            self.graph,
            id,
            &desired,
            self.config.max_siblings,
        );

        if !cloned {
            if sibling == id && !info.matches(&desired) {
                // Too many siblings already, use the generic node.
                return (id, self.visited.insert(id));
            }
            return (sibling, false);
        }

        trace!("{} specialized as {} for {:?}", id, sibling, facts.facts());

        (sibling, true)
    }

    /// Facts known after `id` succeeds.
    fn out_facts(&self, id: NodeId) -> NodeInfo {
        let node = self.graph.node(id);
        let mut facts = node.info.facts();
        match &node.kind {
            NodeKind::Text { elements, ignore_case, .. } => {
                let ignore_case = *ignore_case || self.config.ignore_case;
                let last = elements.last().and_then(|e| match &e.kind {
                    TextElementKind::Atom(units) => {
                        units.last().map(|c| {
                            let chars = if ignore_case {
                                case_equivalents_of(*c)
                            } else {
                                smallvec::smallvec![*c]
                            };
                            chars
                                .into_iter()
                                .map(CharacterRange::singleton)
                                .collect::<Vec<_>>()
                        })
                    }
                    TextElementKind::Class(ranges) if !ranges.is_empty() => {
                        Some(ranges.to_vec())
                    }
                    TextElementKind::Class(_) => None,
                });
                facts = NodeInfo::default();
                if let Some(mut last) = last {
                    crate::ranges::canonicalize(&mut last);
                    facts.after_word = tri(word_relation(&last));
                    facts.after_newline = tri(newline_relation(&last));
                    facts.at_start = TriBool::False;
                }
            }
            NodeKind::BackReference { .. }
            | NodeKind::Action {
                kind: ActionKind::PositiveSubmatchSuccess { .. },
                ..
            } => facts = NodeInfo::default(),
            NodeKind::Assertion { kind, .. } => match kind {
                AssertionKind::AtStart => {
                    facts.at_start = TriBool::True;
                    facts.after_word = TriBool::False;
                    facts.after_newline = TriBool::True;
                }
                AssertionKind::AfterNewline => {
                    facts.after_newline = TriBool::True;
                }
                AssertionKind::AtEnd => facts.at_end = true,
                AssertionKind::AtBoundary | AssertionKind::AtNonBoundary => {}
            },
            NodeKind::Action { .. }
            | NodeKind::Choice { .. }
            | NodeKind::End(_) => {}
        }
        facts
    }
}

fn tri(b: Option<bool>) -> TriBool {
    b.map(TriBool::from_bool).unwrap_or_default()
}

/// Same as [`word_relation`], but for line terminators.
fn newline_relation(ranges: &[CharacterRange]) -> Option<bool> {
    let all_inside = ranges.iter().all(|r| {
        LINE_TERMINATOR_RANGES
            .iter()
            .any(|t| t.from() <= r.from() && r.to() <= t.to())
    });
    let any_inside = ranges.iter().any(|r| {
        LINE_TERMINATOR_RANGES
            .iter()
            .any(|t| t.from() <= r.to() && r.from() <= t.to())
    });
    match (all_inside, any_inside) {
        (true, _) => Some(true),
        (false, true) => None,
        (false, false) => Some(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::lower::Lowering;
    use crate::tree::{Tree, TreeAssertion};
    use pretty_assertions::assert_eq;

    fn lower(tree: &Tree, config: &Config) -> (Graph, NodeId) {
        let mut lowering = Lowering::new(config, tree.capture_count());
        let entry = lowering.lower_pattern(tree).unwrap();
        let (graph, _) = lowering.finish();
        (graph, entry)
    }

    /// Returns the nodes reachable from `entry`.
    fn reachable(graph: &Graph, entry: NodeId) -> Vec<NodeId> {
        let mut seen = FxHashSet::default();
        let mut pending = vec![entry];
        let mut result = vec![];
        while let Some(id) = pending.pop() {
            if seen.insert(id) {
                result.push(id);
                pending.extend(graph.node(id).successors());
            }
        }
        result
    }

    fn boundaries(graph: &Graph, entry: NodeId) -> Vec<NodeInfo> {
        reachable(graph, entry)
            .into_iter()
            .filter(|id| {
                matches!(
                    graph.node(*id).kind,
                    NodeKind::Assertion { kind: AssertionKind::AtBoundary, .. }
                )
            })
            .map(|id| graph.node(id).info)
            .collect()
    }

    #[test]
    fn facts_after_text() {
        let config = Config::default();
        let tree = Tree::Concat(vec![
            Tree::Assertion(TreeAssertion::StartOfInput),
            Tree::literal("a"),
            Tree::Assertion(TreeAssertion::WordBoundary),
            Tree::literal(" "),
        ]);
        let (mut graph, entry) = lower(&tree, &config);
        let (entry, _) = analyze(&mut graph, entry, &config);

        let infos = boundaries(&graph, entry);
        assert_eq!(infos.len(), 1);
        assert!(infos[0].follows_word_interest);
        assert_eq!(infos[0].after_word, TriBool::True);
        assert_eq!(infos[0].after_newline, TriBool::False);
        assert_eq!(infos[0].at_start, TriBool::False);
    }

    #[test]
    fn facts_after_start_assertion() {
        let config = Config::default();
        let tree = Tree::Concat(vec![
            Tree::Assertion(TreeAssertion::StartOfInput),
            Tree::Assertion(TreeAssertion::WordBoundary),
            Tree::literal("a"),
        ]);
        let (mut graph, entry) = lower(&tree, &config);
        let (entry, siblings) = analyze(&mut graph, entry, &config);

        let infos = boundaries(&graph, entry);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].at_start, TriBool::True);
        assert_eq!(infos[0].after_word, TriBool::False);

        let specialized = graph
            .iter()
            .filter(|(id, _)| !siblings.siblings_of(*id).is_empty())
            .count();
        assert_eq!(specialized, 1);
    }

    #[test]
    fn generic_when_nothing_is_known() {
        let config = Config::default();
        let tree = Tree::Concat(vec![
            Tree::Assertion(TreeAssertion::WordBoundary),
            Tree::literal("a"),
        ]);
        let (mut graph, entry) = lower(&tree, &config);
        let (entry, _) = analyze(&mut graph, entry, &config);
        let infos = boundaries(&graph, entry);
        // Reached from the start, and from the prefix loop after any code
        // unit, which may or may not be a word character.
        assert!(infos.iter().all(|info| info.after_word == TriBool::Unknown));
    }

    #[test]
    fn analysis_terminates_on_loops() {
        let config = Config::default();
        let tree = Tree::Concat(vec![
            Tree::star(Tree::Concat(vec![
                Tree::Assertion(TreeAssertion::WordBoundary),
                Tree::class(&[('a', 'z'), (' ', ' ')]),
                Tree::Assertion(TreeAssertion::NonWordBoundary),
                Tree::literal("x"),
            ])),
            Tree::Assertion(TreeAssertion::WordBoundary),
        ]);
        let (mut graph, entry) = lower(&tree, &config);
        let before = graph.len();
        let (entry, _) = analyze(&mut graph, entry, &config);
        assert!(graph.len() >= before);
        assert!(graph.len() <= before * (config.max_siblings + 1));
        assert!(!reachable(&graph, entry).is_empty());
    }

    #[test]
    fn long_graphs_are_analyzed() {
        // Each capture adds two nodes to the path from the entry to the
        // end, but there is no nesting at all.
        let config = Config::default();
        let tree = Tree::Concat(
            (1..=1900)
                .map(|i| {
                    Tree::Concat(vec![
                        Tree::capture(i, Tree::literal("a")),
                        Tree::Assertion(TreeAssertion::WordBoundary),
                    ])
                })
                .collect(),
        );
        let (mut graph, entry) = lower(&tree, &config);
        let (entry, _) = analyze(&mut graph, entry, &config);

        let infos = boundaries(&graph, entry);
        assert_eq!(infos.len(), 1900);
        assert!(infos.iter().all(|info| info.after_word == TriBool::True));
    }

    #[test]
    fn newline_relations() {
        let nl = CharacterRange::singleton('\n' as u32);
        let a = CharacterRange::singleton('a' as u32);
        assert_eq!(newline_relation(&[nl]), Some(true));
        assert_eq!(newline_relation(&[a]), Some(false));
        assert_eq!(newline_relation(&[nl, a]), None);
        assert_eq!(
            newline_relation(&[CharacterRange::new(0, 0xFFFF)]),
            None
        );
    }
}
