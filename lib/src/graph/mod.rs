/*! The node graph that sits between the regexp tree and the code generator.

A regexp is lowered into a directed graph of nodes, where each node knows
the node (or nodes) that must be tried after it succeeds. The graph is
mostly acyclic, except for loops, whose last node points back to the
[`NodeKind::Choice`] that controls the loop.

Nodes live in an arena ([`Graph`]) and are referenced by [`NodeId`]. Cycles
are therefore expressed with plain ids, and nodes can be cloned without
worrying about ownership. Clones are created by the analysis pass, which
specializes nodes for the facts that are known about the text preceding
them (see [`SiblingTable`]).
*/

use std::fmt::{Display, Formatter};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::ranges::CharacterRange;

pub(crate) mod lower;

/// Register number. Registers `0` to `2 * (capture_count + 1) - 1` hold
/// capture positions, the remaining ones are allocated by the compiler.
pub(crate) type Register = u32;

/// Identifies a node within a [`Graph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A three-valued boolean used for facts that may be unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) enum TriBool {
    #[default]
    Unknown,
    True,
    False,
}

impl TriBool {
    pub fn from_bool(b: bool) -> Self {
        if b {
            TriBool::True
        } else {
            TriBool::False
        }
    }

    pub fn known(self) -> Option<bool> {
        match self {
            TriBool::Unknown => None,
            TriBool::True => Some(true),
            TriBool::False => Some(false),
        }
    }
}

/// Per-node record of lookbehind interests and facts.
///
/// Interests say what the node (or any node reachable from it without
/// consuming input) would like to know about the code unit that precedes
/// the current position. Facts are what is actually known about it when
/// the node is entered. Nodes with no facts are generic, they are valid
/// regardless of what precedes them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct NodeInfo {
    pub follows_word_interest: bool,
    pub follows_newline_interest: bool,
    pub follows_start_interest: bool,
    pub at_end: bool,
    pub after_word: TriBool,
    pub after_newline: TriBool,
    pub at_start: TriBool,
}

impl NodeInfo {
    /// Returns true if the node is interested in anything that precedes it.
    pub fn has_lookbehind(&self) -> bool {
        self.follows_word_interest
            || self.follows_newline_interest
            || self.follows_start_interest
    }

    /// Returns true if both records are equal in every field.
    pub fn matches(&self, that: &NodeInfo) -> bool {
        self == that
    }

    /// Adopts the facts delivered by a preceding node.
    pub fn add_from_preceding(&mut self, that: &NodeInfo) {
        self.at_end |= that.at_end;
        self.after_word = that.after_word;
        self.after_newline = that.after_newline;
        self.at_start = that.at_start;
    }

    /// Accumulates the interests of a following node.
    pub fn add_from_following(&mut self, that: &NodeInfo) {
        self.follows_word_interest |= that.follows_word_interest;
        self.follows_newline_interest |= that.follows_newline_interest;
        self.follows_start_interest |= that.follows_start_interest;
    }

    /// Returns a copy with only the facts, and no interests.
    pub fn facts(&self) -> NodeInfo {
        NodeInfo {
            at_end: self.at_end,
            after_word: self.after_word,
            after_newline: self.after_newline,
            at_start: self.at_start,
            ..Default::default()
        }
    }

    /// Returns true if nothing is known about the preceding text.
    pub fn facts_unknown(&self) -> bool {
        !self.at_end
            && self.after_word == TriBool::Unknown
            && self.after_newline == TriBool::Unknown
            && self.at_start == TriBool::Unknown
    }
}

/// What an [`NodeKind::End`] node does when reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EndAction {
    /// The regexp matched.
    Accept,
    /// The body of a negative lookaround matched. The position and the
    /// backtrack stack are restored, the captures set inside the body are
    /// cleared, and the matcher backtracks.
    NegativeSubmatchSuccess {
        stack_pointer_register: Register,
        current_position_register: Register,
        clear_register_start: Register,
        clear_register_count: u32,
    },
}

/// Side effects performed by [`NodeKind::Action`] nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ActionKind {
    SetRegisterForLoop {
        reg: Register,
        value: i32,
    },
    IncrementRegister {
        reg: Register,
    },
    StorePosition {
        reg: Register,
        is_capture: bool,
    },
    /// Saves the current position and backtrack stack pointer before
    /// entering the body of a lookaround.
    BeginSubmatch {
        stack_pointer_register: Register,
        current_position_register: Register,
    },
    /// The body of a positive lookaround matched. Restores the position
    /// and drops the backtrack entries pushed by the body.
    PositiveSubmatchSuccess {
        stack_pointer_register: Register,
        current_position_register: Register,
        clear_register_start: Register,
        clear_register_count: u32,
    },
    /// Fails when a loop iteration didn't consume any input.
    EmptyMatchCheck {
        start_register: Register,
        repetition_register: Option<Register>,
        repetition_limit: u32,
    },
    ClearCaptures {
        from: Register,
        to: Register,
    },
}

/// A single piece of text, either a sequence of code units or a class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum TextElementKind {
    Atom(Box<[u32]>),
    /// A canonical, positive list of ranges.
    Class(Box<[CharacterRange]>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TextElement {
    pub kind: TextElementKind,
    /// Offset of this element from the start of the text node.
    pub cp_offset: u32,
}

impl TextElement {
    pub fn len(&self) -> u32 {
        match &self.kind {
            TextElementKind::Atom(units) => units.len() as u32,
            TextElementKind::Class(_) => 1,
        }
    }
}

/// Zero-width assertions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum AssertionKind {
    AtStart,
    AtEnd,
    AfterNewline,
    AtBoundary,
    AtNonBoundary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GuardOp {
    Lt,
    Geq,
}

/// Condition on a register that must hold before an alternative is tried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Guard {
    pub reg: Register,
    pub op: GuardOp,
    pub value: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Alternative {
    pub node: NodeId,
    pub guards: SmallVec<[Guard; 2]>,
}

impl Alternative {
    pub fn new(node: NodeId) -> Self {
        Self { node, guards: SmallVec::new() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChoiceKind {
    Plain,
    /// The choice that controls a loop. `loop_alternative` is the index of
    /// the alternative that enters the body, the other one leaves the loop.
    Loop { loop_alternative: usize, body_can_be_zero_length: bool },
    /// Alternative `0` is the lookaround body, which ends with a negative
    /// submatch success. Alternative `1` continues after the lookaround.
    NegativeLookaround,
}

#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    End(EndAction),
    Action {
        kind: ActionKind,
        on_success: NodeId,
    },
    Text {
        elements: Vec<TextElement>,
        ignore_case: bool,
        on_success: NodeId,
    },
    Assertion {
        kind: AssertionKind,
        on_success: NodeId,
    },
    /// Matches the text captured by the group whose start and end are in
    /// `start_reg` and the register that follows it.
    BackReference {
        start_reg: Register,
        ignore_case: bool,
        on_success: NodeId,
    },
    Choice {
        kind: ChoiceKind,
        alternatives: Vec<Alternative>,
        not_at_start: bool,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub info: NodeInfo,
}

impl Node {
    /// Returns the successors of this node, in order.
    pub fn successors(&self) -> SmallVec<[NodeId; 2]> {
        match &self.kind {
            NodeKind::End(_) => SmallVec::new(),
            NodeKind::Action { on_success, .. }
            | NodeKind::Text { on_success, .. }
            | NodeKind::Assertion { on_success, .. }
            | NodeKind::BackReference { on_success, .. } => {
                smallvec::smallvec![*on_success]
            }
            NodeKind::Choice { alternatives, .. } => {
                alternatives.iter().map(|alt| alt.node).collect()
            }
        }
    }

    /// Replaces the successor at position `i`, as returned by
    /// [`Node::successors`].
    pub fn set_successor(&mut self, i: usize, node: NodeId) {
        match &mut self.kind {
            NodeKind::End(_) => unreachable!("end nodes have no successors"),
            NodeKind::Action { on_success, .. }
            | NodeKind::Text { on_success, .. }
            | NodeKind::Assertion { on_success, .. }
            | NodeKind::BackReference { on_success, .. } => {
                debug_assert_eq!(i, 0);
                *on_success = node;
            }
            NodeKind::Choice { alternatives, .. } => {
                alternatives[i].node = node;
            }
        }
    }

    /// Number of code units consumed by a text node, zero for any other
    /// kind of node.
    pub fn text_length(&self) -> u32 {
        match &self.kind {
            NodeKind::Text { elements, .. } => {
                elements.iter().map(|e| e.len()).sum()
            }
            _ => 0,
        }
    }
}

/// Arena that owns all the nodes of a regexp.
#[derive(Clone, Debug, Default)]
pub(crate) struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and returns its id.
    pub fn add(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { kind, info: NodeInfo::default() });
        id
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Iterates over all the nodes, clones included.
    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i as u32), n))
    }

    /// Creates a copy of a node. The copy has the same successors as the
    /// original.
    pub fn clone_node(&mut self, id: NodeId) -> NodeId {
        let node = self.nodes[id.index()].clone();
        let clone = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        clone
    }

    /// Returns a lower bound for the number of code units that any match
    /// starting at `id` will consume, saturating at `max_chars`.
    ///
    /// `budget` limits how deep the graph is explored. When the budget is
    /// exhausted the result is zero, which is always a valid lower bound.
    /// If `not_at_start` is true the current position is known not to be
    /// the start of the input, so an `AtStart` assertion never succeeds.
    pub fn eats_at_least(
        &self,
        id: NodeId,
        max_chars: u32,
        budget: i32,
        not_at_start: bool,
    ) -> u32 {
        if budget <= 0 || max_chars == 0 {
            return 0;
        }
        let node = self.node(id);
        match &node.kind {
            NodeKind::End(_) => 0,
            NodeKind::Text { on_success, .. } => {
                let len = node.text_length();
                if len >= max_chars {
                    return max_chars;
                }
                len + self.eats_at_least(
                    *on_success,
                    max_chars - len,
                    budget - 1,
                    true,
                )
            }
            NodeKind::Action { kind, on_success } => match kind {
                // The position is restored after a positive lookaround,
                // what comes next may start before the current position.
                ActionKind::PositiveSubmatchSuccess { .. } => 0,
                _ => self.eats_at_least(
                    *on_success,
                    max_chars,
                    budget - 1,
                    not_at_start,
                ),
            },
            NodeKind::Assertion { kind, on_success } => {
                if *kind == AssertionKind::AtStart && not_at_start {
                    return max_chars;
                }
                self.eats_at_least(
                    *on_success,
                    max_chars,
                    budget - 1,
                    not_at_start,
                )
            }
            NodeKind::BackReference { on_success, .. } => self.eats_at_least(
                *on_success,
                max_chars,
                budget - 1,
                not_at_start,
            ),
            NodeKind::Choice { kind, alternatives, not_at_start: nas } => {
                let not_at_start = not_at_start || *nas;
                match kind {
                    ChoiceKind::NegativeLookaround => self.eats_at_least(
                        alternatives[1].node,
                        max_chars,
                        budget - 1,
                        not_at_start,
                    ),
                    ChoiceKind::Loop { loop_alternative, .. } => self
                        .eats_at_least(
                            alternatives[1 - loop_alternative].node,
                            max_chars,
                            budget - 1,
                            not_at_start,
                        ),
                    ChoiceKind::Plain => {
                        let budget = (budget - 1) / alternatives.len() as i32;
                        let mut min = 100;
                        for alt in alternatives {
                            let eats = self.eats_at_least(
                                alt.node,
                                max_chars,
                                budget,
                                not_at_start,
                            );
                            min = min.min(eats);
                            if min == 0 {
                                break;
                            }
                        }
                        min
                    }
                }
            }
        }
    }
}

/// Records the specialized copies (siblings) of each node.
///
/// Siblings of a node differ from it only in their [`NodeInfo`]. At most
/// one sibling exists for any given `NodeInfo`.
#[derive(Debug, Default)]
pub(crate) struct SiblingTable {
    siblings: FxHashMap<NodeId, Vec<NodeId>>,
}

impl SiblingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a node equivalent to `id` whose info matches `desired`.
    ///
    /// The node itself is returned if its info already matches. Otherwise
    /// an existing sibling is looked up, and if none exists a new one is
    /// cloned. The second item in the result is true only when a new clone
    /// was created. Once `max_siblings` clones exist for a node no more are
    /// created, and the node itself is returned.
    pub fn ensure(
        &mut self,
        graph: &mut Graph,
        id: NodeId,
        desired: &NodeInfo,
        max_siblings: usize,
    ) -> (NodeId, bool) {
        if graph.node(id).info.matches(desired) {
            return (id, false);
        }
        let siblings = self.siblings.entry(id).or_default();
        if let Some(sibling) =
            siblings.iter().find(|s| graph.node(**s).info.matches(desired))
        {
            return (*sibling, false);
        }
        if siblings.len() >= max_siblings {
            return (id, false);
        }
        let clone = graph.clone_node(id);
        let info = &mut graph.node_mut(clone).info;
        info.add_from_following(desired);
        info.add_from_preceding(desired);
        siblings.push(clone);
        (clone, true)
    }

    /// Returns the siblings created for a node.
    #[cfg(test)]
    pub fn siblings_of(&self, id: NodeId) -> &[NodeId] {
        self.siblings.get(&id).map(|s| s.as_slice()).unwrap_or(&[])
    }
}
