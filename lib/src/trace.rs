/*! Code generation state.

A [`Trace`] describes the state of the matcher at some point of the code
that is being generated, in terms of what the code emitted so far didn't
do yet. Register writes and position changes are not emitted as soon as
the node that requests them is reached. Instead they are accumulated in
the trace, and emitted only when the trace is flushed. Until then, the code
for different paths through the graph can apply them, or not, as needed.

A trace with no pending work is *trivial*. Code generated for a node under
a trivial trace is valid for any path that reaches the node, so it can be
bound to the node's label and reused by jumping to it.
*/

use std::rc::Rc;

use bitvec::vec::BitVec;

use crate::assembler::{Label, MacroAssembler};
use crate::graph::{Register, TriBool};
use crate::quick_check::QuickCheckDetails;
use crate::Error;

/// Maximum offset from the current position that can be handled.
pub(crate) const MAX_CP_OFFSET: i32 = 32767;

/// Initial flush budget for a trivial trace.
const DEFAULT_FLUSH_BUDGET: i32 = 100;

/// A register operation whose emission has been postponed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeferredAction {
    SetRegisterForLoop { reg: Register, value: i32 },
    IncrementRegister { reg: Register },
    /// Stores the position `cp_offset` code units after the current one.
    StorePosition { reg: Register, cp_offset: i32, is_capture: bool },
    ClearCaptures { from: Register, to: Register },
}

impl DeferredAction {
    /// True if the action modifies `reg`.
    pub fn mentions(&self, reg: Register) -> bool {
        match self {
            DeferredAction::SetRegisterForLoop { reg: r, .. }
            | DeferredAction::IncrementRegister { reg: r }
            | DeferredAction::StorePosition { reg: r, .. } => *r == reg,
            DeferredAction::ClearCaptures { from, to } => {
                (*from..=*to).contains(&reg)
            }
        }
    }

    fn max_register(&self) -> Register {
        match self {
            DeferredAction::SetRegisterForLoop { reg, .. }
            | DeferredAction::IncrementRegister { reg }
            | DeferredAction::StorePosition { reg, .. } => *reg,
            DeferredAction::ClearCaptures { to, .. } => *to,
        }
    }
}

/// Persistent list of deferred actions, newest first. Traces derived from
/// the same parent share the tail of the list.
#[derive(Debug)]
struct ActionList {
    action: DeferredAction,
    next: Option<Rc<ActionList>>,
}

/// How the value of a register is restored on backtracking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Undo {
    Ignore,
    Restore,
    Clear,
}

#[derive(Clone, Debug)]
pub(crate) struct Trace {
    cp_offset: i32,
    actions: Option<Rc<ActionList>>,
    backtrack: Option<Label>,
    characters_preloaded: u32,
    bound_checked_up_to: i32,
    quick_check_performed: QuickCheckDetails,
    flush_budget: i32,
    at_start: TriBool,
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

impl Trace {
    /// Creates a trivial trace.
    pub fn new() -> Self {
        Self {
            cp_offset: 0,
            actions: None,
            backtrack: None,
            characters_preloaded: 0,
            bound_checked_up_to: 0,
            quick_check_performed: QuickCheckDetails::default(),
            flush_budget: DEFAULT_FLUSH_BUDGET,
            at_start: TriBool::Unknown,
        }
    }

    /// Returns true if the trace has no pending work and assumes nothing
    /// about the matcher state.
    pub fn is_trivial(&self) -> bool {
        self.backtrack.is_none()
            && self.actions.is_none()
            && self.cp_offset == 0
            && self.characters_preloaded == 0
            && self.bound_checked_up_to == 0
            && self.quick_check_performed.characters() == 0
            && self.at_start == TriBool::Unknown
    }

    /// Offset, relative to the position held by the matcher, of the
    /// position this trace is at.
    #[inline]
    pub fn cp_offset(&self) -> i32 {
        self.cp_offset
    }

    /// Where to go when matching fails. `None` means popping the address
    /// from the backtrack stack.
    #[inline]
    pub fn backtrack(&self) -> Option<Label> {
        self.backtrack
    }

    pub fn set_backtrack(&mut self, label: Label) {
        self.backtrack = Some(label);
    }

    #[inline]
    pub fn characters_preloaded(&self) -> u32 {
        self.characters_preloaded
    }

    pub fn set_characters_preloaded(&mut self, count: u32) {
        self.characters_preloaded = count;
    }

    /// Number of code units after `cp_offset` that are known to be within
    /// the input.
    #[inline]
    pub fn bound_checked_up_to(&self) -> i32 {
        self.bound_checked_up_to
    }

    pub fn set_bound_checked_up_to(&mut self, count: i32) {
        self.bound_checked_up_to = count;
    }

    #[inline]
    pub fn quick_check_performed(&self) -> &QuickCheckDetails {
        &self.quick_check_performed
    }

    pub fn set_quick_check_performed(&mut self, details: &QuickCheckDetails) {
        self.quick_check_performed = *details;
    }

    pub fn clear_quick_check_performed(&mut self) {
        self.quick_check_performed.clear();
    }

    /// Limits how many times the deferred actions in this trace can be
    /// flushed by the choices that follow.
    #[inline]
    pub fn flush_budget(&self) -> i32 {
        self.flush_budget
    }

    pub fn set_flush_budget(&mut self, budget: i32) {
        self.flush_budget = budget;
    }

    #[inline]
    pub fn at_start(&self) -> TriBool {
        self.at_start
    }

    pub fn set_at_start(&mut self, at_start: TriBool) {
        self.at_start = at_start;
    }

    #[inline]
    pub fn has_actions(&self) -> bool {
        self.actions.is_some()
    }

    /// Defers an action.
    pub fn add_action(&mut self, action: DeferredAction) {
        self.actions =
            Some(Rc::new(ActionList { action, next: self.actions.take() }));
    }

    /// Deferred actions, newest first.
    pub fn actions(&self) -> impl Iterator<Item = &DeferredAction> {
        let mut next = self.actions.as_deref();
        std::iter::from_fn(move || {
            let node = next?;
            next = node.next.as_deref();
            Some(&node.action)
        })
    }

    /// Forgets about the characters loaded in the current character
    /// register.
    pub fn invalidate_current_character(&mut self) {
        self.characters_preloaded = 0;
    }

    /// Moves the position of the trace forward without emitting any code.
    pub fn advance_current_position(&mut self, by: i32) -> Result<(), Error> {
        // The current character register can't be shifted.
        self.characters_preloaded = 0;
        self.quick_check_performed.advance(by);
        self.cp_offset += by;
        if self.cp_offset > MAX_CP_OFFSET {
            return Err(Error::TooLarge);
        }
        self.bound_checked_up_to = (self.bound_checked_up_to - by).max(0);
        Ok(())
    }

    /// Returns true if some deferred action modifies `reg`.
    pub fn mentions_register(&self, reg: Register) -> bool {
        self.actions().any(|action| action.mentions(reg))
    }

    /// If the latest deferred action that modifies `reg` stores a position
    /// in it, returns the offset of that position.
    pub fn get_stored_position(&self, reg: Register) -> Option<i32> {
        match self.actions().find(|action| action.mentions(reg)) {
            Some(DeferredAction::StorePosition { cp_offset, .. }) => {
                Some(*cp_offset)
            }
            _ => None,
        }
    }

    /// Emits the deferred actions, and the instructions that save the
    /// values that must be restored on backtracking. The returned
    /// [`RegisterUndo`] emits the restoring code.
    pub fn perform_deferred_actions<A: MacroAssembler>(
        &self,
        asm: &mut A,
    ) -> RegisterUndo {
        let max_register =
            self.actions().map(|a| a.max_register()).max().unwrap_or(0);
        let len = max_register as usize + 1;

        let mut affected = BitVec::<usize>::repeat(false, len);
        for action in self.actions() {
            match action {
                DeferredAction::ClearCaptures { from, to } => {
                    for reg in *from..=*to {
                        affected.set(reg as usize, true);
                    }
                }
                other => affected.set(other.max_register() as usize, true),
            }
        }

        let mut undo = RegisterUndo {
            to_pop: BitVec::repeat(false, len),
            to_clear: BitVec::repeat(false, len),
        };

        for reg in affected.iter_ones() {
            let reg = reg as Register;
            let mut undo_action = Undo::Ignore;
            let mut value = 0;
            let mut absolute = false;
            let mut clear = false;
            let mut store_position = None;

            // Actions are visited from newest to oldest. The oldest action
            // decides how the register is restored, the newest decides its
            // value.
            for action in self.actions().filter(|a| a.mentions(reg)) {
                match action {
                    DeferredAction::SetRegisterForLoop { value: v, .. } => {
                        if !absolute {
                            value += v;
                            absolute = true;
                        }
                        undo_action = Undo::Restore;
                    }
                    DeferredAction::IncrementRegister { .. } => {
                        if !absolute {
                            value += 1;
                        }
                        undo_action = Undo::Restore;
                    }
                    DeferredAction::StorePosition {
                        cp_offset, is_capture, ..
                    } => {
                        if !clear && store_position.is_none() {
                            store_position = Some(*cp_offset);
                        }
                        // Capture 0 is always written again before a
                        // successful match.
                        undo_action = if reg <= 1 {
                            Undo::Ignore
                        } else if *is_capture {
                            Undo::Clear
                        } else {
                            Undo::Restore
                        };
                    }
                    DeferredAction::ClearCaptures { .. } => {
                        if store_position.is_none() {
                            clear = true;
                        }
                        undo_action = Undo::Restore;
                    }
                }
            }

            match undo_action {
                Undo::Restore => {
                    asm.push_register(reg);
                    undo.to_pop.set(reg as usize, true);
                }
                Undo::Clear => undo.to_clear.set(reg as usize, true),
                Undo::Ignore => {}
            }

            if let Some(cp_offset) = store_position {
                asm.write_current_position_to_register(reg, cp_offset);
            } else if clear {
                asm.clear_registers(reg, reg);
            } else if absolute {
                asm.set_register(reg, value);
            } else if value != 0 {
                asm.advance_register(reg, value);
            }
        }

        undo
    }
}

/// Registers whose values must be restored when backtracking over a
/// flushed trace.
#[derive(Debug)]
pub(crate) struct RegisterUndo {
    to_pop: BitVec<usize>,
    to_clear: BitVec<usize>,
}

impl RegisterUndo {
    /// Emits the code that restores the registers, popping them in the
    /// reverse order they were pushed.
    pub fn restore<A: MacroAssembler>(&self, asm: &mut A) {
        let mut reg = self.to_pop.len();
        while reg > 0 {
            reg -= 1;
            if self.to_pop[reg] {
                asm.pop_register(reg as Register);
            } else if self.to_clear[reg] {
                let clear_to = reg;
                while reg > 0 && self.to_clear[reg - 1] {
                    reg -= 1;
                }
                asm.clear_registers(reg as Register, clear_to as Register);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::recording::RecordingAssembler;
    use pretty_assertions::assert_eq;

    #[test]
    fn trivial_trace() {
        let mut trace = Trace::new();
        assert!(trace.is_trivial());
        trace.set_at_start(TriBool::False);
        assert!(!trace.is_trivial());
    }

    #[test]
    fn actions_are_shared_and_ordered() {
        let mut parent = Trace::new();
        parent.add_action(DeferredAction::IncrementRegister { reg: 4 });
        let mut child = parent.clone();
        child.add_action(DeferredAction::StorePosition {
            reg: 2,
            cp_offset: 3,
            is_capture: true,
        });
        assert_eq!(parent.actions().count(), 1);
        assert_eq!(child.actions().count(), 2);
        assert_eq!(child.get_stored_position(2), Some(3));
        assert_eq!(child.get_stored_position(4), None);
        assert!(child.mentions_register(4));
        assert!(!parent.mentions_register(2));
    }

    #[test]
    fn advance_updates_offsets() {
        let mut trace = Trace::new();
        trace.set_characters_preloaded(2);
        trace.set_bound_checked_up_to(3);
        trace.advance_current_position(2).unwrap();
        assert_eq!(trace.cp_offset(), 2);
        assert_eq!(trace.characters_preloaded(), 0);
        assert_eq!(trace.bound_checked_up_to(), 1);
        assert_eq!(
            trace.advance_current_position(MAX_CP_OFFSET),
            Err(Error::TooLarge)
        );
    }

    #[test]
    fn deferred_actions_are_performed_and_undone() {
        let mut trace = Trace::new();
        trace.add_action(DeferredAction::SetRegisterForLoop {
            reg: 6,
            value: 0,
        });
        trace.add_action(DeferredAction::IncrementRegister { reg: 6 });
        trace.add_action(DeferredAction::StorePosition {
            reg: 0,
            cp_offset: 1,
            is_capture: true,
        });
        trace.add_action(DeferredAction::ClearCaptures { from: 2, to: 3 });
        trace.add_action(DeferredAction::StorePosition {
            reg: 2,
            cp_offset: 4,
            is_capture: true,
        });

        let mut asm = RecordingAssembler::default();
        let undo = trace.perform_deferred_actions(&mut asm);
        assert_eq!(
            asm.ops,
            vec![
                "write_cp r0 1",
                "push_register r2",
                "write_cp r2 4",
                "push_register r3",
                "clear_registers r3 r3",
                "push_register r6",
                "set_register r6 1",
            ]
        );

        let mut asm = RecordingAssembler::default();
        undo.restore(&mut asm);
        assert_eq!(
            asm.ops,
            vec!["pop_register r6", "pop_register r3", "pop_register r2"]
        );
    }

    #[test]
    fn captures_are_cleared_on_undo() {
        let mut trace = Trace::new();
        for reg in [2, 3, 5] {
            trace.add_action(DeferredAction::StorePosition {
                reg,
                cp_offset: 0,
                is_capture: true,
            });
        }
        let mut asm = RecordingAssembler::default();
        let undo = trace.perform_deferred_actions(&mut asm);
        assert_eq!(asm.ops.len(), 3);
        let mut asm = RecordingAssembler::default();
        undo.restore(&mut asm);
        assert_eq!(
            asm.ops,
            vec!["clear_registers r5 r5", "clear_registers r2 r3"]
        );
    }
}
