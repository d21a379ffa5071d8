/*! A backtracking virtual machine that executes bytecode [`Program`]s.

The machine state is made of the current position in the input, the
current character register, an array of registers, and a stack. The stack
holds backtrack addresses, saved positions and saved register values, all
mixed together. The code generator guarantees that they are popped in the
same order they were pushed.
*/

use std::ops::Range;

use thiserror::Error;

use crate::assembler::bytecode::{Instr, Program};
use crate::assembler::Label;
use crate::ranges::case_equivalents_of;

/// Errors returned while executing a regexp.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// The matcher backtracked too many times.
    #[error("backtrack limit exceeded")]
    BacktrackLimitExceeded,

    /// The regexp was compiled for one-byte inputs, but the input contains
    /// code units above `0xFF`.
    #[error("input contains non-latin1 code units")]
    NonLatin1Input,

    /// The program tried to do something it is not allowed to, like
    /// popping from an empty stack, or loading code units outside the
    /// input without checking the bounds first.
    #[error("malformed program")]
    MalformedProgram,
}

/// The spans matched by each capture group in a successful match. Group
/// `0` is the whole match. Offsets are in code units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Captures {
    spans: Vec<Option<Range<usize>>>,
}

impl Captures {
    /// Returns the span of capture group `i`, or `None` if the group didn't
    /// participate in the match.
    pub fn get(&self, i: usize) -> Option<Range<usize>> {
        self.spans.get(i).cloned().flatten()
    }

    /// Number of groups, including group 0.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<Range<usize>>> + '_ {
        self.spans.iter().cloned()
    }
}

/// Value of a register that hasn't been set.
const UNSET: i64 = -1;

#[inline]
fn when(cond: bool, target: &Label) -> Option<Label> {
    cond.then_some(*target)
}

pub(crate) struct Interpreter<'a> {
    program: &'a Program,
    input: &'a [u16],
    registers: Vec<i64>,
    stack: Vec<i64>,
    backtrack_limit: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        program: &'a Program,
        input: &'a [u16],
        register_count: usize,
        backtrack_limit: usize,
    ) -> Self {
        Self {
            program,
            input,
            registers: vec![UNSET; register_count],
            stack: Vec::new(),
            backtrack_limit,
        }
    }

    fn pop(&mut self) -> Result<i64, ExecError> {
        self.stack.pop().ok_or(ExecError::MalformedProgram)
    }

    fn reg(&self, reg: u32) -> Result<i64, ExecError> {
        self.registers
            .get(reg as usize)
            .copied()
            .ok_or(ExecError::MalformedProgram)
    }

    fn reg_mut(&mut self, reg: u32) -> Result<&mut i64, ExecError> {
        self.registers
            .get_mut(reg as usize)
            .ok_or(ExecError::MalformedProgram)
    }

    /// Loads `count` code units starting at `pos`, packed into a single
    /// value.
    fn load(&self, pos: i64, count: u32) -> Result<u32, ExecError> {
        let bits = if self.program.one_byte() { 8 } else { 16 };
        let mut value = 0;
        for i in 0..count {
            let c = usize::try_from(pos + i as i64)
                .ok()
                .and_then(|p| self.input.get(p))
                .ok_or(ExecError::MalformedProgram)?;
            value |= (*c as u32) << (i * bits);
        }
        Ok(value)
    }

    /// Compares the text captured by `start_reg` with the input at `pos`.
    /// Returns the length of the captured text if it matches.
    fn back_reference(
        &self,
        start_reg: u32,
        ignore_case: bool,
        pos: i64,
    ) -> Result<Option<i64>, ExecError> {
        let start = self.reg(start_reg)?;
        let end = self.reg(start_reg + 1)?;
        if start < 0 || end < 0 {
            return Ok(Some(0));
        }
        let len = end - start;
        if pos + len > self.input.len() as i64 {
            return Ok(None);
        }
        let captured = &self.input[start as usize..end as usize];
        let candidate = &self.input[pos as usize..(pos + len) as usize];
        let matches = captured.iter().zip(candidate).all(|(a, b)| {
            a == b
                || (ignore_case
                    && case_equivalents_of(*a as u32).contains(&(*b as u32)))
        });
        Ok(matches.then_some(len))
    }

    /// Runs the program with the current position at `start`.
    pub fn run(
        mut self,
        start: usize,
        capture_count: usize,
    ) -> Result<Option<Captures>, ExecError> {
        if self.program.one_byte() && self.input.iter().any(|c| *c > 0xFF) {
            return Err(ExecError::NonLatin1Input);
        }

        let program = self.program;
        let code = program.code();
        let len = self.input.len() as i64;
        let mut pc = 0_usize;
        let mut pos = start as i64;
        let mut current = 0_u32;
        let mut backtracks = 0_usize;

        loop {
            let instr = code.get(pc).ok_or(ExecError::MalformedProgram)?;
            pc += 1;
            let target = match instr {
                Instr::AdvanceCp(by) => {
                    pos += *by as i64;
                    None
                }
                Instr::AdvanceRegister { reg, by } => {
                    *self.reg_mut(*reg)? += *by as i64;
                    None
                }
                Instr::Backtrack => {
                    backtracks += 1;
                    if backtracks > self.backtrack_limit {
                        return Err(ExecError::BacktrackLimitExceeded);
                    }
                    pc = usize::try_from(self.pop()?)
                        .map_err(|_| ExecError::MalformedProgram)?;
                    None
                }
                Instr::CheckAtStart { cp_offset, target } => {
                    when(pos + *cp_offset as i64 == 0, target)
                }
                Instr::CheckNotAtStart { cp_offset, target } => {
                    when(pos + *cp_offset as i64 != 0, target)
                }
                Instr::CheckChar { c, target } => when(current == *c, target),
                Instr::CheckNotChar { c, target } => {
                    when(current != *c, target)
                }
                Instr::CheckCharAfterAnd { c, mask, target } => {
                    when(current & mask == *c, target)
                }
                Instr::CheckNotCharAfterAnd { c, mask, target } => {
                    when(current & mask != *c, target)
                }
                Instr::CheckCharInRange { from, to, target } => {
                    when((*from..=*to).contains(&current), target)
                }
                Instr::CheckCharNotInRange { from, to, target } => {
                    when(!(*from..=*to).contains(&current), target)
                }
                Instr::CheckCharNotInRanges { table, target } => when(
                    !program
                        .range_table(*table)
                        .iter()
                        .any(|r| r.contains(current)),
                    target,
                ),
                Instr::CheckCharGt { limit, target } => {
                    when(current > *limit, target)
                }
                Instr::CheckCharLt { limit, target } => {
                    when(current < *limit, target)
                }
                Instr::CheckNotBackRef { start_reg, ignore_case, target } => {
                    match self.back_reference(*start_reg, *ignore_case, pos)? {
                        Some(matched) => {
                            pos += matched;
                            None
                        }
                        None => Some(*target),
                    }
                }
                Instr::CheckPosition { cp_offset, target } => {
                    let p = pos + *cp_offset as i64;
                    when(p >= len || p < 0, target)
                }
                Instr::ClearRegisters { from, to } => {
                    for reg in *from..=*to {
                        *self.reg_mut(reg)? = UNSET;
                    }
                    None
                }
                Instr::Fail => return Ok(None),
                Instr::GoTo(target) => Some(*target),
                Instr::IfRegisterGe { reg, value, target } => {
                    when(self.reg(*reg)? >= *value as i64, target)
                }
                Instr::IfRegisterLt { reg, value, target } => {
                    when(self.reg(*reg)? < *value as i64, target)
                }
                Instr::IfRegisterEqPos { reg, target } => {
                    when(self.reg(*reg)? == pos, target)
                }
                Instr::LoadCurrentChar {
                    cp_offset,
                    on_end,
                    check_bounds,
                    count,
                } => {
                    let p = pos + *cp_offset as i64;
                    if *check_bounds && (p < 0 || p + *count as i64 > len) {
                        Some(*on_end)
                    } else {
                        current = self.load(p, *count)?;
                        None
                    }
                }
                Instr::PopCp => {
                    pos = self.pop()?;
                    None
                }
                Instr::PopRegister(reg) => {
                    let value = self.pop()?;
                    *self.reg_mut(*reg)? = value;
                    None
                }
                Instr::PushBacktrack(label) => {
                    self.stack.push(program.address(*label) as i64);
                    None
                }
                Instr::PushCp => {
                    self.stack.push(pos);
                    None
                }
                Instr::PushRegister(reg) => {
                    let value = self.reg(*reg)?;
                    self.stack.push(value);
                    None
                }
                Instr::ReadCpFromRegister(reg) => {
                    pos = self.reg(*reg)?;
                    None
                }
                Instr::ReadStackPointerFromRegister(reg) => {
                    let sp = usize::try_from(self.reg(*reg)?)
                        .map_err(|_| ExecError::MalformedProgram)?;
                    if sp > self.stack.len() {
                        return Err(ExecError::MalformedProgram);
                    }
                    self.stack.truncate(sp);
                    None
                }
                Instr::SetRegister { reg, value } => {
                    *self.reg_mut(*reg)? = *value as i64;
                    None
                }
                Instr::Succeed => {
                    return Ok(Some(self.captures(capture_count)));
                }
                Instr::WriteCpToRegister { reg, cp_offset } => {
                    *self.reg_mut(*reg)? = pos + *cp_offset as i64;
                    None
                }
                Instr::WriteStackPointerToRegister(reg) => {
                    let sp = self.stack.len() as i64;
                    *self.reg_mut(*reg)? = sp;
                    None
                }
            };
            if let Some(label) = target {
                pc = program.address(label) as usize;
            }
        }
    }

    fn captures(&self, capture_count: usize) -> Captures {
        let spans = (0..=capture_count)
            .map(|i| {
                let start = self.registers.get(2 * i).copied().unwrap_or(UNSET);
                let end =
                    self.registers.get(2 * i + 1).copied().unwrap_or(UNSET);
                if start < 0 || end < start {
                    None
                } else {
                    Some(start as usize..end as usize)
                }
            })
            .collect();
        Captures { spans }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::bytecode::BytecodeAssembler;
    use crate::assembler::MacroAssembler;
    use crate::ranges::CharacterRange;
    use pretty_assertions::assert_eq;

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    /// Hand-written program for `a[0-9]+`, anchored at the current
    /// position. Capture 0 uses registers 0 and 1.
    fn digits_program(one_byte: bool) -> Program {
        let mut asm = BytecodeAssembler::new(one_byte);
        let fail = asm.new_label();
        let repeat = asm.new_label();
        let done = asm.new_label();
        asm.push_backtrack(fail);
        asm.write_current_position_to_register(0, 0);
        asm.load_current_character(0, None, true, 2);
        let a_digit = if one_byte { 0x3061 } else { 0x0030_0061 };
        let mask = if one_byte { 0xF0FF } else { 0x00F0_FFFF };
        asm.check_not_character_after_and(a_digit, mask, None);
        asm.load_current_character(1, None, false, 1);
        asm.check_character_not_in_range('0' as u32, '9' as u32, None);
        asm.advance_current_position(2);
        asm.bind(repeat);
        asm.load_current_character(0, Some(done), true, 1);
        asm.check_character_not_in_ranges(
            &[CharacterRange::new('0' as u32, '9' as u32)],
            Some(done),
        );
        asm.advance_current_position(1);
        asm.go_to(Some(repeat));
        asm.bind(done);
        asm.write_current_position_to_register(1, 0);
        asm.succeed();
        asm.bind(fail);
        asm.fail();
        asm.finish().unwrap()
    }

    fn run(program: &Program, input: &str) -> Result<Option<Captures>, ExecError> {
        Interpreter::new(program, &utf16(input), 2, 1000).run(0, 0)
    }

    #[test]
    fn hand_written_program() {
        for one_byte in [false, true] {
            let program = digits_program(one_byte);
            let captures = run(&program, "a123b").unwrap().unwrap();
            assert_eq!(captures.get(0), Some(0..4));
            assert_eq!(captures.len(), 1);
            assert_eq!(run(&program, "ab").unwrap(), None);
            assert_eq!(run(&program, "a").unwrap(), None);
        }
    }

    #[test]
    fn non_latin1_input() {
        let program = digits_program(true);
        assert_eq!(run(&program, "a1\u{100}"), Err(ExecError::NonLatin1Input));
        let program = digits_program(false);
        assert!(run(&program, "a1\u{100}").unwrap().is_some());
    }

    #[test]
    fn backtrack_limit() {
        let mut asm = BytecodeAssembler::new(false);
        let again = asm.new_label();
        asm.bind(again);
        asm.push_backtrack(again);
        asm.backtrack();
        let program = asm.finish().unwrap();
        assert_eq!(
            Interpreter::new(&program, &[], 0, 10).run(0, 0),
            Err(ExecError::BacktrackLimitExceeded)
        );
    }

    #[test]
    fn stack_underflow() {
        let mut asm = BytecodeAssembler::new(false);
        asm.pop_current_position();
        let program = asm.finish().unwrap();
        assert_eq!(
            Interpreter::new(&program, &[], 0, 10).run(0, 0),
            Err(ExecError::MalformedProgram)
        );
    }

    #[test]
    fn back_references() {
        // Registers 2 and 3 hold the captured text.
        let mut asm = BytecodeAssembler::new(false);
        asm.set_register(2, 0);
        asm.set_register(3, 2);
        asm.write_current_position_to_register(0, 0);
        asm.check_not_back_reference(2, true, None);
        asm.write_current_position_to_register(1, 0);
        asm.succeed();
        let program = asm.finish().unwrap();
        let input = utf16("abAB");
        let captures = Interpreter::new(&program, &input, 4, 10)
            .run(2, 0)
            .unwrap()
            .unwrap();
        assert_eq!(captures.get(0), Some(2..4));
    }
}
