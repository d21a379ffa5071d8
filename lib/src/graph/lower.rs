/*! Lowering of a [`Tree`] into a node [`Graph`].

Trees are lowered back to front: each tree node is converted into graph
nodes given the node that must follow it (`on_success`), so the whole regexp
ends up as a chain of nodes that ends in the accepting node.
*/

use smallvec::smallvec;

use crate::graph::{
    ActionKind, Alternative, AssertionKind, ChoiceKind, EndAction, Graph,
    Guard, GuardOp, NodeId, NodeKind, Register, TextElement, TextElementKind,
};
use crate::ranges::{
    add_case_equivalents, canonicalize, clip, negate, CharacterRange,
    LINE_TERMINATOR_RANGES, MAX_CODE_UNIT, MAX_ONE_BYTE_CHAR,
};
use crate::tree::{Tree, TreeAssertion};
use crate::{Config, Error};

/// Maximum number of registers a regexp can use.
const MAX_REGISTERS: u32 = 1 << 16;

/// Repetitions like `(foo){1,}` or `(foo){3,}` are unrolled when the
/// minimum is at most this.
const MAX_UNROLLED_MIN_MATCHES: u32 = 3;

/// Repetitions like `(foo)?` or `(foo){0,3}` are unrolled when the maximum
/// is at most this.
const MAX_UNROLLED_MAX_MATCHES: u32 = 3;

/// Limits the growth caused by unrolling nested repetitions.
const MAX_EXPANSION_FACTOR: u32 = 6;

/// Converts trees into nodes of a graph.
pub(crate) struct Lowering<'a> {
    config: &'a Config,
    graph: Graph,
    accept: NodeId,
    capture_count: u32,
    next_register: Register,
    expansion_factor: u32,
    depth: u32,
}

impl<'a> Lowering<'a> {
    pub fn new(config: &'a Config, capture_count: u32) -> Self {
        let mut graph = Graph::new();
        let accept = graph.add(NodeKind::End(EndAction::Accept));
        Self {
            config,
            graph,
            accept,
            capture_count,
            next_register: 2 * (capture_count + 1),
            expansion_factor: 1,
            depth: 0,
        }
    }

    /// Lowers the whole pattern and returns the entry node.
    ///
    /// The pattern is wrapped in the implicit capture group 0. Unless the
    /// pattern is anchored at the start, it is also prefixed by a lazy loop
    /// that skips over any number of code units, so that the match can
    /// start anywhere.
    pub fn lower_pattern(&mut self, tree: &Tree) -> Result<NodeId, Error> {
        let captured_body = self.lower_capture(0, tree, self.accept)?;

        if self.is_anchored(tree) {
            return Ok(captured_body);
        }

        let contains_anchor = tree.contains_anchor();
        let loop_node = self.lower_repetition(
            0,
            None,
            false,
            &Tree::any(),
            captured_body,
            contains_anchor,
        )?;

        if !contains_anchor {
            return Ok(loop_node);
        }

        // Unroll the loop once, so that the case where the match starts at
        // the start of the input is handled by its own alternative.
        let first_step = self.text_node(
            vec![TextElementKind::Class(Box::new([
                CharacterRange::everything(),
            ]))],
            loop_node,
        );

        Ok(self.graph.add(NodeKind::Choice {
            kind: ChoiceKind::Plain,
            alternatives: vec![
                Alternative::new(captured_body),
                Alternative::new(first_step),
            ],
            not_at_start: false,
        }))
    }

    /// Returns true if every match starts at the start of the input.
    pub fn is_anchored(&self, tree: &Tree) -> bool {
        !self.config.multiline && tree.is_anchored_at_start()
    }

    /// Consumes the lowering, returning the graph and the number of
    /// registers used.
    pub fn finish(self) -> (Graph, u32) {
        (self.graph, self.next_register)
    }

    fn allocate_register(&mut self) -> Result<Register, Error> {
        let reg = self.next_register;
        if reg >= MAX_REGISTERS {
            return Err(Error::TooLarge);
        }
        self.next_register += 1;
        Ok(reg)
    }

    fn char_max(&self) -> u32 {
        if self.config.one_byte {
            MAX_ONE_BYTE_CHAR
        } else {
            MAX_CODE_UNIT
        }
    }

    fn text_node(
        &mut self,
        kinds: Vec<TextElementKind>,
        on_success: NodeId,
    ) -> NodeId {
        let mut cp_offset = 0;
        let elements = kinds
            .into_iter()
            .map(|kind| {
                let element = TextElement { kind, cp_offset };
                cp_offset += element.len();
                element
            })
            .collect();
        self.graph.add(NodeKind::Text {
            elements,
            ignore_case: self.config.ignore_case,
            on_success,
        })
    }

    fn action(&mut self, kind: ActionKind, on_success: NodeId) -> NodeId {
        self.graph.add(NodeKind::Action { kind, on_success })
    }

    /// Returns the element for a literal or class, or `None` for any other
    /// kind of tree.
    fn text_element(&self, tree: &Tree) -> Option<TextElementKind> {
        match tree {
            Tree::Literal(units) if !units.is_empty() => {
                Some(TextElementKind::Atom(units.clone().into_boxed_slice()))
            }
            Tree::Class { ranges, negated } => {
                let mut ranges = ranges.clone();
                canonicalize(&mut ranges);
                let mut ranges = clip(&ranges, MAX_CODE_UNIT);
                if self.config.ignore_case {
                    add_case_equivalents(&mut ranges);
                }
                if *negated {
                    ranges = negate(&ranges, MAX_CODE_UNIT);
                }
                let ranges = clip(&ranges, self.char_max());
                Some(TextElementKind::Class(ranges.into_boxed_slice()))
            }
            _ => None,
        }
    }

    fn lower(
        &mut self,
        tree: &Tree,
        on_success: NodeId,
    ) -> Result<NodeId, Error> {
        self.depth += 1;
        if self.depth > self.config.max_depth {
            return Err(Error::TooComplex(format!(
                "regexp exceeds the nesting limit of {}",
                self.config.max_depth
            )));
        }
        let result =
            crate::ensure_stack(|| self.lower_inner(tree, on_success));
        self.depth -= 1;
        result
    }

    fn lower_inner(
        &mut self,
        tree: &Tree,
        on_success: NodeId,
    ) -> Result<NodeId, Error> {
        match tree {
            Tree::Empty => Ok(on_success),
            Tree::Literal(units) if units.is_empty() => Ok(on_success),
            Tree::Literal(_) | Tree::Class { .. } => {
                let element = self.text_element(tree).into_iter().collect();
                Ok(self.text_node(element, on_success))
            }
            Tree::Concat(items) => self.lower_concat(items, on_success),
            Tree::Alternation(items) => match items.len() {
                0 => Ok(on_success),
                1 => self.lower(&items[0], on_success),
                _ => {
                    let alternatives = items
                        .iter()
                        .map(|item| {
                            self.lower(item, on_success).map(Alternative::new)
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(self.graph.add(NodeKind::Choice {
                        kind: ChoiceKind::Plain,
                        alternatives,
                        not_at_start: false,
                    }))
                }
            },
            Tree::Capture { index, sub } => {
                self.lower_capture(*index, sub, on_success)
            }
            Tree::BackReference(index) => {
                if *index == 0 || *index > self.capture_count {
                    return Err(Error::Unsupported(format!(
                        "back-reference to non-existent group {}",
                        index
                    )));
                }
                Ok(self.graph.add(NodeKind::BackReference {
                    start_reg: 2 * index,
                    ignore_case: self.config.ignore_case,
                    on_success,
                }))
            }
            Tree::Repetition { min, max, greedy, sub } => {
                if let Some(max) = max {
                    if max < min {
                        return Err(Error::Unsupported(format!(
                            "repetition {{{},{}}} has max smaller than min",
                            min, max
                        )));
                    }
                }
                // A repetition of something that never consumes input is
                // the same as the thing itself, or nothing.
                if sub.max_match() == Some(0) {
                    return if *min > 0 {
                        self.lower(sub, on_success)
                    } else {
                        Ok(on_success)
                    };
                }
                self.lower_repetition(
                    *min, *max, *greedy, sub, on_success, false,
                )
            }
            Tree::Assertion(assertion) => {
                self.lower_assertion(*assertion, on_success)
            }
            Tree::Lookahead { negative, sub } => {
                self.lower_lookahead(*negative, sub, on_success)
            }
        }
    }

    /// Lowers a sequence of trees. Adjacent literals and classes are merged
    /// into a single text node.
    fn lower_concat(
        &mut self,
        items: &[Tree],
        on_success: NodeId,
    ) -> Result<NodeId, Error> {
        let mut node = on_success;
        let mut pending_text: Vec<TextElementKind> = Vec::new();

        for item in items.iter().rev() {
            match self.text_element(item) {
                Some(element) => pending_text.push(element),
                None => {
                    if !pending_text.is_empty() {
                        pending_text.reverse();
                        node = self
                            .text_node(std::mem::take(&mut pending_text), node);
                    }
                    node = self.lower(item, node)?;
                }
            }
        }

        if !pending_text.is_empty() {
            pending_text.reverse();
            node = self.text_node(pending_text, node);
        }

        Ok(node)
    }

    fn lower_capture(
        &mut self,
        index: u32,
        body: &Tree,
        on_success: NodeId,
    ) -> Result<NodeId, Error> {
        let store_end = self.action(
            ActionKind::StorePosition { reg: 2 * index + 1, is_capture: true },
            on_success,
        );
        let body = self.lower(body, store_end)?;
        Ok(self.action(
            ActionKind::StorePosition { reg: 2 * index, is_capture: true },
            body,
        ))
    }

    /// Registers holding the captures inside `tree`, as a `(from, to)`
    /// inclusive pair.
    fn capture_registers(tree: &Tree) -> Option<(Register, Register)> {
        tree.capture_range().map(|(lo, hi)| (2 * lo, 2 * hi + 1))
    }

    /// Runs `f` with the expansion factor multiplied by `factor`. The
    /// boolean passed to `f` tells whether expanding is still acceptable.
    fn with_expansion<T>(
        &mut self,
        factor: u32,
        f: impl FnOnce(&mut Self, bool) -> T,
    ) -> T {
        let saved = self.expansion_factor;
        let mut ok = saved <= MAX_EXPANSION_FACTOR;
        if ok {
            if factor > MAX_EXPANSION_FACTOR {
                ok = false;
                self.expansion_factor = MAX_EXPANSION_FACTOR + 1;
            } else {
                self.expansion_factor = saved * factor;
                ok = self.expansion_factor <= MAX_EXPANSION_FACTOR;
            }
        }
        let result = f(self, ok);
        self.expansion_factor = saved;
        result
    }

    /// Lowers `body{min,max}`.
    ///
    /// ```text
    ///             (r++)<-.
    ///               |     `
    ///               |     (body)
    ///               v     ^
    ///      (r=0)-->(?)---/ [if r < max]
    ///               |
    ///  [if r >= min] \----> on_success
    /// ```
    fn lower_repetition(
        &mut self,
        min: u32,
        max: Option<u32>,
        greedy: bool,
        body: &Tree,
        on_success: NodeId,
        not_at_start: bool,
    ) -> Result<NodeId, Error> {
        if max == Some(0) {
            return Ok(on_success);
        }

        let body_can_be_empty = body.min_match() == 0;
        let capture_registers = Self::capture_registers(body);
        let mut body_start_reg = None;

        if body_can_be_empty {
            body_start_reg = Some(self.allocate_register()?);
        } else if capture_registers.is_none() {
            let factor = min + if max != Some(min) { 1 } else { 0 };
            let unrolled = self.with_expansion(factor, |this, ok| {
                if min == 0 || min > MAX_UNROLLED_MIN_MATCHES || !ok {
                    return Ok(None);
                }
                let new_max = max.map(|max| max - min);
                let mut answer = this.lower_repetition(
                    0, new_max, greedy, body, on_success, true,
                )?;
                for _ in 0..min {
                    answer = this.lower(body, answer)?;
                }
                Ok(Some(answer))
            })?;
            if let Some(node) = unrolled {
                return Ok(node);
            }

            if let (0, Some(max)) = (min, max) {
                if max <= MAX_UNROLLED_MAX_MATCHES {
                    let unrolled = self.with_expansion(max, |this, ok| {
                        if !ok {
                            return Ok(None);
                        }
                        let mut answer = on_success;
                        for _ in 0..max {
                            let body = this.lower(body, answer)?;
                            let alternatives = if greedy {
                                vec![
                                    Alternative::new(body),
                                    Alternative::new(on_success),
                                ]
                            } else {
                                vec![
                                    Alternative::new(on_success),
                                    Alternative::new(body),
                                ]
                            };
                            answer = this.graph.add(NodeKind::Choice {
                                kind: ChoiceKind::Plain,
                                alternatives,
                                not_at_start,
                            });
                        }
                        Ok(Some(answer))
                    })?;
                    if let Some(node) = unrolled {
                        return Ok(node);
                    }
                }
            }
        }

        let has_min = min > 0;
        let has_max = max.is_some();
        let counter = if has_min || has_max {
            Some(self.allocate_register()?)
        } else {
            None
        };

        let loop_alternative = if greedy { 0 } else { 1 };

        // The loop node is created first, with no alternatives, because the
        // body needs to point back to it.
        let center = self.graph.add(NodeKind::Choice {
            kind: ChoiceKind::Loop {
                loop_alternative,
                body_can_be_zero_length: body_can_be_empty,
            },
            alternatives: Vec::new(),
            not_at_start,
        });

        let mut loop_return = match counter {
            Some(reg) => {
                self.action(ActionKind::IncrementRegister { reg }, center)
            }
            None => center,
        };

        if let Some(start_register) = body_start_reg {
            loop_return = self.action(
                ActionKind::EmptyMatchCheck {
                    start_register,
                    repetition_register: counter,
                    repetition_limit: min,
                },
                loop_return,
            );
        }

        let mut body_node = self.lower(body, loop_return)?;

        if let Some(reg) = body_start_reg {
            body_node = self.action(
                ActionKind::StorePosition { reg, is_capture: false },
                body_node,
            );
        }

        if let Some((from, to)) = capture_registers {
            body_node =
                self.action(ActionKind::ClearCaptures { from, to }, body_node);
        }

        let mut body_alt = Alternative::new(body_node);
        let mut rest_alt = Alternative::new(on_success);

        if let (Some(reg), Some(max)) = (counter, max) {
            body_alt.guards =
                smallvec![Guard { reg, op: GuardOp::Lt, value: max as i32 }];
        }
        if let (Some(reg), true) = (counter, has_min) {
            rest_alt.guards =
                smallvec![Guard { reg, op: GuardOp::Geq, value: min as i32 }];
        }

        let alternatives = if greedy {
            vec![body_alt, rest_alt]
        } else {
            vec![rest_alt, body_alt]
        };

        if let NodeKind::Choice { alternatives: alts, .. } =
            &mut self.graph.node_mut(center).kind
        {
            *alts = alternatives;
        }

        Ok(match counter {
            Some(reg) => self.action(
                ActionKind::SetRegisterForLoop { reg, value: 0 },
                center,
            ),
            None => center,
        })
    }

    fn lower_assertion(
        &mut self,
        assertion: TreeAssertion,
        on_success: NodeId,
    ) -> Result<NodeId, Error> {
        let multiline = self.config.multiline;
        let kind = match assertion {
            TreeAssertion::StartOfInput if !multiline => AssertionKind::AtStart,
            TreeAssertion::StartOfInput | TreeAssertion::StartOfLine => {
                AssertionKind::AfterNewline
            }
            TreeAssertion::EndOfInput if !multiline => AssertionKind::AtEnd,
            TreeAssertion::EndOfInput | TreeAssertion::EndOfLine => {
                return self.lower_end_of_line(on_success)
            }
            TreeAssertion::WordBoundary => AssertionKind::AtBoundary,
            TreeAssertion::NonWordBoundary => AssertionKind::AtNonBoundary,
        };
        Ok(self.graph.add(NodeKind::Assertion { kind, on_success }))
    }

    /// `$` in multiline mode is a choice between a positive lookahead for a
    /// line terminator and the end of the input.
    fn lower_end_of_line(
        &mut self,
        on_success: NodeId,
    ) -> Result<NodeId, Error> {
        let stack_pointer_register = self.allocate_register()?;
        let current_position_register = self.allocate_register()?;

        let success = self.action(
            ActionKind::PositiveSubmatchSuccess {
                stack_pointer_register,
                current_position_register,
                clear_register_start: 0,
                clear_register_count: 0,
            },
            on_success,
        );
        let ranges = clip(LINE_TERMINATOR_RANGES, self.char_max());
        let newline = self.text_node(
            vec![TextElementKind::Class(ranges.into_boxed_slice())],
            success,
        );
        let end_of_line = self.action(
            ActionKind::BeginSubmatch {
                stack_pointer_register,
                current_position_register,
            },
            newline,
        );
        let end_of_input = self.graph.add(NodeKind::Assertion {
            kind: AssertionKind::AtEnd,
            on_success,
        });
        Ok(self.graph.add(NodeKind::Choice {
            kind: ChoiceKind::Plain,
            alternatives: vec![
                Alternative::new(end_of_line),
                Alternative::new(end_of_input),
            ],
            not_at_start: false,
        }))
    }

    fn lower_lookahead(
        &mut self,
        negative: bool,
        body: &Tree,
        on_success: NodeId,
    ) -> Result<NodeId, Error> {
        let stack_pointer_register = self.allocate_register()?;
        let current_position_register = self.allocate_register()?;

        let (clear_register_start, clear_register_count) =
            match Self::capture_registers(body) {
                Some((from, to)) => (from, to - from + 1),
                None => (0, 0),
            };

        let entry = if negative {
            let success = self.graph.add(NodeKind::End(
                EndAction::NegativeSubmatchSuccess {
                    stack_pointer_register,
                    current_position_register,
                    clear_register_start,
                    clear_register_count,
                },
            ));
            let body = self.lower(body, success)?;
            self.graph.add(NodeKind::Choice {
                kind: ChoiceKind::NegativeLookaround,
                alternatives: vec![
                    Alternative::new(body),
                    Alternative::new(on_success),
                ],
                not_at_start: false,
            })
        } else {
            let success = self.action(
                ActionKind::PositiveSubmatchSuccess {
                    stack_pointer_register,
                    current_position_register,
                    clear_register_start,
                    clear_register_count,
                },
                on_success,
            );
            self.lower(body, success)?
        };

        Ok(self.action(
            ActionKind::BeginSubmatch {
                stack_pointer_register,
                current_position_register,
            },
            entry,
        ))
    }
}
