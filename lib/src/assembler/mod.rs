/*! The interface between the code generator and the code it produces.

The code generator never produces code by itself, it asks a
[`MacroAssembler`] to emit each operation. Targets of jumps are [`Label`]s
created by the assembler, and `None` as a target means "backtrack": pop the
top of the backtrack stack and continue at the address found there.

The matcher state assumed by these operations is:

- the current position in the input,
- the current character register, holding up to four code units loaded
  from the input,
- a set of numbered registers,
- a stack, which holds backtrack addresses as well as saved positions and
  register values.
*/

use crate::ranges::CharacterRange;

pub mod bytecode;

#[cfg(test)]
pub(crate) mod recording;

/// A position in the emitted code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);

impl Label {
    /// Returns the label's index, labels are numbered from zero in the
    /// order they were created.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Code emitter used by the code generator.
pub trait MacroAssembler {
    /// Creates a new, unbound label.
    fn new_label(&mut self) -> Label;

    /// Binds a label to the current position in the code.
    fn bind(&mut self, label: Label);

    /// Moves the current position by `by` code units.
    fn advance_current_position(&mut self, by: i32);

    /// Adds `by` to a register.
    fn advance_register(&mut self, reg: u32, by: i32);

    /// Pops an address from the stack and jumps to it.
    fn backtrack(&mut self);

    /// Jumps if the current position plus `cp_offset` is the start of the
    /// input.
    fn check_at_start(&mut self, cp_offset: i32, on_at_start: Option<Label>);

    /// Jumps if the current position plus `cp_offset` is not the start of
    /// the input.
    fn check_not_at_start(&mut self, cp_offset: i32, on_not_at_start: Option<Label>);

    /// Jumps if the current character is `c`.
    fn check_character(&mut self, c: u32, on_equal: Option<Label>);

    /// Jumps if the current character is not `c`.
    fn check_not_character(&mut self, c: u32, on_not_equal: Option<Label>);

    /// Jumps if `current & mask == c`.
    fn check_character_after_and(
        &mut self,
        c: u32,
        mask: u32,
        on_equal: Option<Label>,
    );

    /// Jumps if `current & mask != c`.
    fn check_not_character_after_and(
        &mut self,
        c: u32,
        mask: u32,
        on_not_equal: Option<Label>,
    );

    /// Jumps if the current character is in `[from, to]`.
    fn check_character_in_range(
        &mut self,
        from: u32,
        to: u32,
        on_in_range: Option<Label>,
    );

    /// Jumps if the current character is not in `[from, to]`.
    fn check_character_not_in_range(
        &mut self,
        from: u32,
        to: u32,
        on_not_in_range: Option<Label>,
    );

    /// Jumps if the current character is not in any of the given canonical
    /// ranges. Returns false, without emitting anything, if the assembler
    /// can't handle the table, in which case the caller must emit the
    /// check with other operations.
    fn check_character_not_in_ranges(
        &mut self,
        ranges: &[CharacterRange],
        on_not_in_ranges: Option<Label>,
    ) -> bool;

    /// Jumps if the current character is greater than `limit`.
    fn check_character_gt(&mut self, limit: u32, on_greater: Option<Label>);

    /// Jumps if the current character is less than `limit`.
    fn check_character_lt(&mut self, limit: u32, on_less: Option<Label>);

    /// Jumps if the input at the current position doesn't match the text
    /// captured between registers `start_reg` and `start_reg + 1`. Advances
    /// the current position past the text otherwise. Captures that are not
    /// set match the empty string.
    fn check_not_back_reference(
        &mut self,
        start_reg: u32,
        ignore_case: bool,
        on_no_match: Option<Label>,
    );

    /// Jumps if the current position plus `cp_offset` is outside the
    /// input.
    fn check_position(&mut self, cp_offset: i32, on_outside_input: Option<Label>);

    /// Sets registers `from` to `to` (both inclusive) to the "unset" value.
    fn clear_registers(&mut self, from: u32, to: u32);

    /// Jumps to a label.
    fn go_to(&mut self, to: Option<Label>);

    /// Jumps if the register is greater than or equal to `value`.
    fn if_register_ge(&mut self, reg: u32, value: i32, if_ge: Option<Label>);

    /// Jumps if the register is less than `value`.
    fn if_register_lt(&mut self, reg: u32, value: i32, if_lt: Option<Label>);

    /// Jumps if the register is equal to the current position.
    fn if_register_eq_pos(&mut self, reg: u32, if_eq: Option<Label>);

    /// Loads `count` code units starting at the current position plus
    /// `cp_offset` into the current character register. When
    /// `check_bounds` is true and any of them lies outside the input, jumps
    /// to `on_end_of_input` instead.
    fn load_current_character(
        &mut self,
        cp_offset: i32,
        on_end_of_input: Option<Label>,
        check_bounds: bool,
        count: u32,
    );

    /// Maximum number of code units that can be loaded at once.
    fn max_preload_characters(&self, one_byte: bool) -> u32;

    fn pop_current_position(&mut self);

    fn pop_register(&mut self, reg: u32);

    /// Pushes the address of a label, which is where the next
    /// [`MacroAssembler::backtrack`] jumps to.
    fn push_backtrack(&mut self, label: Label);

    fn push_current_position(&mut self);

    fn push_register(&mut self, reg: u32);

    fn read_current_position_from_register(&mut self, reg: u32);

    fn read_stack_pointer_from_register(&mut self, reg: u32);

    fn set_register(&mut self, reg: u32, value: i32);

    /// Stores the current position plus `cp_offset` in a register.
    fn write_current_position_to_register(&mut self, reg: u32, cp_offset: i32);

    fn write_stack_pointer_to_register(&mut self, reg: u32);

    /// The regexp matched.
    fn succeed(&mut self);

    /// The regexp didn't match.
    fn fail(&mut self);
}
