use crate::assembler::{Label, MacroAssembler};
use crate::codegen::Codegen;
use crate::dispatch::first_character_set;
use crate::graph::{AssertionKind, NodeId, NodeInfo, NodeKind, TriBool};
use crate::ranges::word_relation;
use crate::trace::Trace;
use crate::Error;

/// Budget used when checking whether the successor of a boundary
/// assertion consumes input.
const EATS_AT_LEAST_BUDGET: i32 = 100;

impl<'g, A: MacroAssembler> Codegen<'g, A> {
    pub(super) fn emit_assertion(
        &mut self,
        id: NodeId,
        trace: &Trace,
    ) -> Result<(), Error> {
        let graph = self.graph;
        let node = graph.node(id);
        let (kind, on_success) = match &node.kind {
            NodeKind::Assertion { kind, on_success } => (*kind, *on_success),
            _ => unreachable!(),
        };
        let info = node.info;

        match kind {
            AssertionKind::AtEnd => {
                let ok = self.asm.new_label();
                self.asm.check_position(trace.cp_offset(), Some(ok));
                self.asm.go_to(trace.backtrack());
                self.asm.bind(ok);
                self.emit(on_success, trace)
            }
            AssertionKind::AtStart => {
                match at_start(trace, &info) {
                    Some(false) => {
                        self.asm.go_to(trace.backtrack());
                        Ok(())
                    }
                    Some(true) => self.emit(on_success, trace),
                    None => {
                        self.asm.check_not_at_start(
                            trace.cp_offset(),
                            trace.backtrack(),
                        );
                        let mut at_start_trace = trace.clone();
                        at_start_trace.set_at_start(TriBool::True);
                        self.emit(on_success, &at_start_trace)
                    }
                }
            }
            AssertionKind::AfterNewline => {
                self.emit_after_newline(on_success, &info, trace)
            }
            AssertionKind::AtBoundary => {
                self.emit_boundary(on_success, &info, true, trace)
            }
            AssertionKind::AtNonBoundary => {
                self.emit_boundary(on_success, &info, false, trace)
            }
        }
    }

    fn emit_after_newline(
        &mut self,
        on_success: NodeId,
        info: &NodeInfo,
        trace: &Trace,
    ) -> Result<(), Error> {
        if at_start(trace, info) == Some(true)
            || info.after_newline == TriBool::True
        {
            return self.emit(on_success, trace);
        }

        if info.after_newline == TriBool::False
            && at_start(trace, info) == Some(false)
        {
            self.asm.go_to(trace.backtrack());
            return Ok(());
        }

        let mut new_trace = trace.clone();
        new_trace.invalidate_current_character();

        let cp_offset = new_trace.cp_offset();
        let ok = self.asm.new_label();

        // The start of the input counts as a newline.
        if cp_offset <= 0 && at_start(trace, info) != Some(false) {
            self.asm.check_at_start(cp_offset, Some(ok));
        }

        self.asm.load_current_character(
            cp_offset - 1,
            new_trace.backtrack(),
            cp_offset <= 0,
            1,
        );

        if !self.one_byte() {
            // Matches both 0x2028 and 0x2029.
            self.asm.check_character_after_and(0x2028, 0xFFFE, Some(ok));
        }

        self.asm.check_character('\n' as u32, Some(ok));
        self.asm.check_not_character('\r' as u32, new_trace.backtrack());
        self.asm.bind(ok);

        self.emit(on_success, &new_trace)
    }

    fn emit_boundary(
        &mut self,
        on_success: NodeId,
        info: &NodeInfo,
        at_boundary: bool,
        trace: &Trace,
    ) -> Result<(), Error> {
        let next_is_word = self.next_is_word(on_success, trace);

        if let (Some(prev), Some(next)) = (prev_is_word(trace, info), next_is_word) {
            if (prev != next) == at_boundary {
                return self.emit(on_success, trace);
            }
            self.asm.go_to(trace.backtrack());
            return Ok(());
        }

        if let Some(next) = next_is_word {
            // A boundary before a word character requires a non-word
            // character before it, and the other way around.
            return self.backtrack_if_previous(
                on_success,
                info,
                next == at_boundary,
                trace,
            );
        }

        let before_non_word = self.asm.new_label();
        let before_word = self.asm.new_label();
        let ok = self.asm.new_label();

        // The end of the input counts as a non-word character.
        if trace.characters_preloaded() != 1 {
            self.asm.load_current_character(
                trace.cp_offset(),
                Some(before_non_word),
                true,
                1,
            );
        }

        self.emit_word_check(Some(before_word), Some(before_non_word), false);

        self.asm.bind(before_non_word);
        self.backtrack_if_previous(on_success, info, !at_boundary, trace)?;
        self.asm.go_to(Some(ok));

        self.asm.bind(before_word);
        self.backtrack_if_previous(on_success, info, at_boundary, trace)?;
        self.asm.bind(ok);

        Ok(())
    }

    /// Tells whether the code unit that follows is a word character, if
    /// that can be known from the successor.
    fn next_is_word(&self, on_success: NodeId, trace: &Trace) -> Option<bool> {
        let not_at_start = trace.at_start() == TriBool::False;
        if self.graph.eats_at_least(
            on_success,
            1,
            EATS_AT_LEAST_BUDGET,
            not_at_start,
        ) < 1
        {
            return None;
        }
        let first = first_character_set(self.graph, on_success, self.ignore_case());
        if first.is_empty() {
            return None;
        }
        word_relation(&first)
    }

    /// Emits a check that backtracks if the previous code unit is a word
    /// character (`backtrack_if_word`) or a non-word character, and then
    /// emits the successor.
    fn backtrack_if_previous(
        &mut self,
        on_success: NodeId,
        info: &NodeInfo,
        backtrack_if_word: bool,
        trace: &Trace,
    ) -> Result<(), Error> {
        let mut new_trace = trace.clone();
        new_trace.invalidate_current_character();

        if let Some(prev) = prev_is_word(trace, info) {
            if prev == backtrack_if_word {
                self.asm.go_to(new_trace.backtrack());
                return Ok(());
            }
            return self.emit(on_success, &new_trace);
        }

        let fall_through = self.asm.new_label();
        let (word, non_word) = if backtrack_if_word {
            (new_trace.backtrack(), Some(fall_through))
        } else {
            (Some(fall_through), new_trace.backtrack())
        };

        let cp_offset = new_trace.cp_offset();

        // The start of the input counts as a non-word character.
        if cp_offset <= 0 && trace.at_start() != TriBool::False {
            self.asm.check_at_start(cp_offset, non_word);
        }

        self.asm.load_current_character(
            cp_offset - 1,
            non_word,
            cp_offset <= 0,
            1,
        );

        self.emit_word_check(word, non_word, !backtrack_if_word);
        self.asm.bind(fall_through);

        self.emit(on_success, &new_trace)
    }

    /// Jumps to `word` or `non_word` depending on the current character.
    /// One of the two cases falls through instead of jumping.
    fn emit_word_check(
        &mut self,
        word: Option<Label>,
        non_word: Option<Label>,
        fall_through_on_word: bool,
    ) {
        self.asm.check_character_gt('z' as u32, non_word);
        self.asm.check_character_lt('0' as u32, non_word);
        self.asm.check_character_gt('a' as u32 - 1, word);
        self.asm.check_character_lt('9' as u32 + 1, word);
        self.asm.check_character_lt('A' as u32, non_word);
        self.asm.check_character_lt('Z' as u32 + 1, word);
        if fall_through_on_word {
            self.asm.check_not_character('_' as u32, non_word);
        } else {
            self.asm.check_character('_' as u32, word);
        }
    }
}

/// Tells whether the current position is the start of the input, if known.
fn at_start(trace: &Trace, info: &NodeInfo) -> Option<bool> {
    trace.at_start().known().or(info.at_start.known())
}

/// Tells whether the code unit before the current position is a word
/// character, if known. The start of the input counts as a non-word
/// character.
fn prev_is_word(trace: &Trace, info: &NodeInfo) -> Option<bool> {
    if at_start(trace, info) == Some(true) {
        return Some(false);
    }
    info.after_word.known()
}
