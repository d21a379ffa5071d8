use crate::assembler::{Label, MacroAssembler};
use crate::codegen::{Codegen, Limit};
use crate::graph::{NodeId, NodeKind, TextElement, TextElementKind, TriBool};
use crate::quick_check::char_mask;
use crate::ranges::{case_equivalents_of, CharacterRange, MAX_ONE_BYTE_CHAR};
use crate::trace::{Trace, MAX_CP_OFFSET};
use crate::Error;

/// Classes with more ranges than this are checked with a range table when
/// the assembler supports it.
const MAX_INLINE_RANGES: usize = 16;

/// Text nodes are emitted in several passes, each one checking a different
/// kind of element. Cheap checks go first so that mismatches are found
/// early.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pass {
    /// Code units compared as they are.
    Simple,
    /// Code units without case equivalents, when ignoring case.
    NonLetter,
    /// Code units with case equivalents, when ignoring case.
    Letter,
    Class,
}

impl Pass {
    fn all(ignore_case: bool) -> &'static [Pass] {
        if ignore_case {
            &[Pass::NonLetter, Pass::Letter, Pass::Class]
        } else {
            &[Pass::Simple, Pass::Class]
        }
    }
}

impl<'g, A: MacroAssembler> Codegen<'g, A> {
    pub(super) fn emit_text(
        &mut self,
        id: NodeId,
        trace: &Trace,
    ) -> Result<(), Error> {
        if self.limit_versions(id, trace)? == Limit::Done {
            return Ok(());
        }

        let graph = self.graph;
        let node = graph.node(id);
        let (elements, ignore_case, on_success) = match &node.kind {
            NodeKind::Text { elements, ignore_case, on_success } => {
                (elements, *ignore_case || self.ignore_case(), *on_success)
            }
            _ => unreachable!(),
        };

        let length = node.text_length() as i32;
        if trace.cp_offset() + length > MAX_CP_OFFSET {
            return Err(Error::TooLarge);
        }

        if self.one_byte() && cannot_match_one_byte(elements, ignore_case) {
            self.asm.go_to(trace.backtrack());
            return Ok(());
        }

        let mut checked_up_to = trace.cp_offset() - 1 + trace.bound_checked_up_to();
        let mut first_element_checked = false;

        // The first code unit is already in the current character register.
        if trace.characters_preloaded() == 1 {
            for pass in Pass::all(ignore_case) {
                self.emit_text_pass(
                    *pass,
                    elements,
                    trace,
                    true,
                    false,
                    &mut checked_up_to,
                );
            }
            first_element_checked = true;
        }

        for pass in Pass::all(ignore_case) {
            self.emit_text_pass(
                *pass,
                elements,
                trace,
                false,
                first_element_checked,
                &mut checked_up_to,
            );
        }

        let mut successor = trace.clone();
        successor.advance_current_position(length)?;
        successor.set_at_start(TriBool::False);
        self.emit(on_success, &successor)
    }

    /// Emits the checks of a pass. Elements are checked from the last one
    /// to the first, so that the first bounds check covers the whole text.
    fn emit_text_pass(
        &mut self,
        pass: Pass,
        elements: &[TextElement],
        trace: &Trace,
        preloaded: bool,
        first_element_checked: bool,
        checked_up_to: &mut i32,
    ) {
        let backtrack = trace.backtrack();
        let quick_check = *trace.quick_check_performed();
        let element_count = if preloaded { 1 } else { elements.len() };

        for (i, element) in elements[..element_count].iter().enumerate().rev() {
            let cp_offset = trace.cp_offset() + element.cp_offset as i32;
            match &element.kind {
                TextElementKind::Atom(units) if pass != Pass::Class => {
                    let unit_count = if preloaded { 1 } else { units.len() };
                    for (j, c) in units[..unit_count].iter().enumerate().rev() {
                        if first_element_checked && i == 0 && j == 0 {
                            continue;
                        }
                        if quick_check
                            .determined_already(element.cp_offset + j as u32)
                        {
                            continue;
                        }
                        let offset = cp_offset + j as i32;
                        let check = *checked_up_to < offset;
                        let checked = match pass {
                            Pass::Simple => self.emit_simple_character(
                                *c, backtrack, offset, check, preloaded,
                            ),
                            Pass::NonLetter => self.emit_non_letter(
                                *c, backtrack, offset, check, preloaded,
                            ),
                            Pass::Letter => self.emit_letter(
                                *c, backtrack, offset, check, preloaded,
                            ),
                            Pass::Class => unreachable!(),
                        };
                        if checked && offset > *checked_up_to {
                            *checked_up_to = offset;
                        }
                    }
                }
                TextElementKind::Class(ranges) if pass == Pass::Class => {
                    if first_element_checked && i == 0 {
                        continue;
                    }
                    if quick_check.determined_already(element.cp_offset) {
                        continue;
                    }
                    let check = *checked_up_to < cp_offset;
                    self.emit_class(ranges, backtrack, cp_offset, check, preloaded);
                    if cp_offset > *checked_up_to {
                        *checked_up_to = cp_offset;
                    }
                }
                _ => {}
            }
        }
    }

    /// Code units that case-fold to themselves and nothing else, or any
    /// code unit when case is not ignored.
    fn emit_simple_character(
        &mut self,
        c: u32,
        on_failure: Option<Label>,
        cp_offset: i32,
        check: bool,
        preloaded: bool,
    ) -> bool {
        if !preloaded {
            self.asm.load_current_character(cp_offset, on_failure, check, 1);
        }
        self.asm.check_not_character(c, on_failure);
        !preloaded
    }

    fn emit_non_letter(
        &mut self,
        c: u32,
        on_failure: Option<Label>,
        cp_offset: i32,
        check: bool,
        preloaded: bool,
    ) -> bool {
        let equivalents = self.case_equivalents(c);
        if equivalents.len() != 1 {
            return false;
        }
        let mut checked = false;
        if !preloaded {
            self.asm.load_current_character(cp_offset, on_failure, check, 1);
            checked = check;
        }
        self.asm.check_not_character(equivalents[0], on_failure);
        checked
    }

    fn emit_letter(
        &mut self,
        c: u32,
        on_failure: Option<Label>,
        cp_offset: i32,
        check: bool,
        preloaded: bool,
    ) -> bool {
        let equivalents = self.case_equivalents(c);
        if equivalents.len() <= 1 {
            return false;
        }
        if !preloaded {
            self.asm.load_current_character(cp_offset, on_failure, check, 1);
        }
        if let [c1, c2] = equivalents[..] {
            let diff = c1 ^ c2;
            // Letters that differ in a single bit, like ASCII upper and
            // lower case, are checked with a single masked comparison.
            if diff.is_power_of_two() {
                let mask = char_mask(self.one_byte()) ^ diff;
                self.asm.check_not_character_after_and(c1, mask, on_failure);
                return true;
            }
        }
        if let Some((last, rest)) = equivalents.split_last() {
            let ok = self.asm.new_label();
            for c in rest {
                self.asm.check_character(*c, Some(ok));
            }
            self.asm.check_not_character(*last, on_failure);
            self.asm.bind(ok);
        }
        true
    }

    /// Returns the case equivalents of `c` that can appear in the input.
    fn case_equivalents(&self, c: u32) -> smallvec::SmallVec<[u32; 4]> {
        let mut equivalents = case_equivalents_of(c);
        if self.one_byte() {
            equivalents.retain(|c| *c <= MAX_ONE_BYTE_CHAR);
        }
        equivalents
    }

    pub(super) fn emit_class(
        &mut self,
        ranges: &[CharacterRange],
        on_failure: Option<Label>,
        cp_offset: i32,
        check: bool,
        preloaded: bool,
    ) {
        let max_char = char_mask(self.one_byte());

        let ranges: Vec<CharacterRange> = ranges
            .iter()
            .filter(|r| r.from() <= max_char)
            .map(|r| CharacterRange::new(r.from(), r.to().min(max_char)))
            .collect();

        if ranges.is_empty() {
            self.asm.go_to(on_failure);
            return;
        }

        if let [range] = ranges[..] {
            if range.is_everything(max_char) {
                // Anything matches, as long as there is some input.
                if check {
                    self.asm.check_position(cp_offset, on_failure);
                }
                return;
            }
        }

        if !preloaded {
            self.asm.load_current_character(cp_offset, on_failure, check, 1);
        }

        if let [range] = ranges[..] {
            if range.is_singleton() {
                self.asm.check_not_character(range.from(), on_failure);
            } else {
                self.asm.check_character_not_in_range(
                    range.from(),
                    range.to(),
                    on_failure,
                );
            }
            return;
        }

        if ranges.len() > MAX_INLINE_RANGES
            && self.asm.check_character_not_in_ranges(&ranges, on_failure)
        {
            return;
        }

        let ok = self.asm.new_label();
        for range in &ranges {
            if range.is_singleton() {
                self.asm.check_character(range.from(), Some(ok));
            } else {
                self.asm.check_character_in_range(
                    range.from(),
                    range.to(),
                    Some(ok),
                );
            }
        }
        self.asm.go_to(on_failure);
        self.asm.bind(ok);
    }
}

/// Returns true if some code unit in the text can't appear in a one-byte
/// input, which means that the text never matches.
fn cannot_match_one_byte(elements: &[TextElement], ignore_case: bool) -> bool {
    elements.iter().any(|element| match &element.kind {
        TextElementKind::Atom(units) => units.iter().any(|c| {
            if ignore_case {
                case_equivalents_of(*c).iter().all(|c| *c > MAX_ONE_BYTE_CHAR)
            } else {
                *c > MAX_ONE_BYTE_CHAR
            }
        }),
        TextElementKind::Class(_) => false,
    })
}
