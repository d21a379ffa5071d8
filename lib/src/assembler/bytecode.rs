/*! A [`MacroAssembler`] that produces bytecode for the backtracking VM
implemented in [`crate::interpreter`].

Each operation requested by the code generator is translated into a single
[`Instr`]. Jump targets are kept as labels while assembling, and resolved to
instruction addresses when the [`Program`] is finished.
*/

use std::fmt::{Display, Formatter};

use crate::assembler::{Label, MacroAssembler};
use crate::ranges::CharacterRange;
use crate::Error;

/// Maximum number of ranges in a single range table.
const MAX_RANGE_TABLE_LEN: usize = 256;

/// Maximum number of instructions in a program.
const MAX_PROGRAM_LEN: usize = 1 << 24;

/// A bytecode instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instr {
    AdvanceCp(i32),
    AdvanceRegister { reg: u32, by: i32 },
    Backtrack,
    CheckAtStart { cp_offset: i32, target: Label },
    CheckNotAtStart { cp_offset: i32, target: Label },
    CheckChar { c: u32, target: Label },
    CheckNotChar { c: u32, target: Label },
    CheckCharAfterAnd { c: u32, mask: u32, target: Label },
    CheckNotCharAfterAnd { c: u32, mask: u32, target: Label },
    CheckCharInRange { from: u32, to: u32, target: Label },
    CheckCharNotInRange { from: u32, to: u32, target: Label },
    /// Jumps if the current character is not in the range table with the
    /// given index.
    CheckCharNotInRanges { table: usize, target: Label },
    CheckCharGt { limit: u32, target: Label },
    CheckCharLt { limit: u32, target: Label },
    CheckNotBackRef { start_reg: u32, ignore_case: bool, target: Label },
    CheckPosition { cp_offset: i32, target: Label },
    ClearRegisters { from: u32, to: u32 },
    Fail,
    GoTo(Label),
    IfRegisterGe { reg: u32, value: i32, target: Label },
    IfRegisterLt { reg: u32, value: i32, target: Label },
    IfRegisterEqPos { reg: u32, target: Label },
    LoadCurrentChar { cp_offset: i32, on_end: Label, check_bounds: bool, count: u32 },
    PopCp,
    PopRegister(u32),
    PushBacktrack(Label),
    PushCp,
    PushRegister(u32),
    ReadCpFromRegister(u32),
    ReadStackPointerFromRegister(u32),
    SetRegister { reg: u32, value: i32 },
    Succeed,
    WriteCpToRegister { reg: u32, cp_offset: i32 },
    WriteStackPointerToRegister(u32),
}

/// Assembles bytecode [`Instr`]s.
#[derive(Debug)]
pub struct BytecodeAssembler {
    code: Vec<Instr>,
    /// Address of each label, `None` if not bound yet.
    labels: Vec<Option<u32>>,
    range_tables: Vec<Box<[CharacterRange]>>,
    /// Label that all the `None` targets jump to. It's bound to a
    /// `Backtrack` instruction when the program is finished.
    backtrack_label: Option<Label>,
    one_byte: bool,
}

impl BytecodeAssembler {
    /// Creates an assembler for inputs made of one-byte code units if
    /// `one_byte` is true, or two-byte code units otherwise.
    pub fn new(one_byte: bool) -> Self {
        Self {
            code: Vec::new(),
            labels: Vec::new(),
            range_tables: Vec::new(),
            backtrack_label: None,
            one_byte,
        }
    }

    /// Number of instructions emitted so far.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    fn emit(&mut self, instr: Instr) {
        self.code.push(instr);
    }

    fn target(&mut self, target: Option<Label>) -> Label {
        match target {
            Some(label) => label,
            None => match self.backtrack_label {
                Some(label) => label,
                None => {
                    let label = self.new_label();
                    self.backtrack_label = Some(label);
                    label
                }
            },
        }
    }

    /// Finishes the program, resolving every label.
    pub fn finish(mut self) -> Result<Program, Error> {
        if let Some(label) = self.backtrack_label {
            self.bind(label);
            self.emit(Instr::Backtrack);
        }
        if self.code.len() > MAX_PROGRAM_LEN {
            return Err(Error::TooLarge);
        }
        let program = Program {
            code: self.code,
            addresses: self
                .labels
                .into_iter()
                .map(|addr| addr.unwrap_or(u32::MAX))
                .collect(),
            range_tables: self.range_tables,
            one_byte: self.one_byte,
        };
        // Every label used as a target must have been bound.
        for instr in &program.code {
            if let Some(label) = instr.target() {
                if program.address(label) == u32::MAX {
                    return Err(Error::Unsupported(format!(
                        "jump to unbound label {}",
                        label.index()
                    )));
                }
            }
        }
        Ok(program)
    }
}

impl MacroAssembler for BytecodeAssembler {
    fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    fn bind(&mut self, label: Label) {
        debug_assert!(
            self.labels[label.index()].is_none(),
            "label {} bound twice",
            label.index()
        );
        self.labels[label.index()] = Some(self.code.len() as u32);
    }

    fn advance_current_position(&mut self, by: i32) {
        if by != 0 {
            self.emit(Instr::AdvanceCp(by));
        }
    }

    fn advance_register(&mut self, reg: u32, by: i32) {
        self.emit(Instr::AdvanceRegister { reg, by });
    }

    fn backtrack(&mut self) {
        self.emit(Instr::Backtrack);
    }

    fn check_at_start(&mut self, cp_offset: i32, on_at_start: Option<Label>) {
        let target = self.target(on_at_start);
        self.emit(Instr::CheckAtStart { cp_offset, target });
    }

    fn check_not_at_start(
        &mut self,
        cp_offset: i32,
        on_not_at_start: Option<Label>,
    ) {
        let target = self.target(on_not_at_start);
        self.emit(Instr::CheckNotAtStart { cp_offset, target });
    }

    fn check_character(&mut self, c: u32, on_equal: Option<Label>) {
        let target = self.target(on_equal);
        self.emit(Instr::CheckChar { c, target });
    }

    fn check_not_character(&mut self, c: u32, on_not_equal: Option<Label>) {
        let target = self.target(on_not_equal);
        self.emit(Instr::CheckNotChar { c, target });
    }

    fn check_character_after_and(
        &mut self,
        c: u32,
        mask: u32,
        on_equal: Option<Label>,
    ) {
        let target = self.target(on_equal);
        self.emit(Instr::CheckCharAfterAnd { c, mask, target });
    }

    fn check_not_character_after_and(
        &mut self,
        c: u32,
        mask: u32,
        on_not_equal: Option<Label>,
    ) {
        let target = self.target(on_not_equal);
        self.emit(Instr::CheckNotCharAfterAnd { c, mask, target });
    }

    fn check_character_in_range(
        &mut self,
        from: u32,
        to: u32,
        on_in_range: Option<Label>,
    ) {
        let target = self.target(on_in_range);
        self.emit(Instr::CheckCharInRange { from, to, target });
    }

    fn check_character_not_in_range(
        &mut self,
        from: u32,
        to: u32,
        on_not_in_range: Option<Label>,
    ) {
        let target = self.target(on_not_in_range);
        self.emit(Instr::CheckCharNotInRange { from, to, target });
    }

    fn check_character_not_in_ranges(
        &mut self,
        ranges: &[CharacterRange],
        on_not_in_ranges: Option<Label>,
    ) -> bool {
        if ranges.is_empty() || ranges.len() > MAX_RANGE_TABLE_LEN {
            return false;
        }
        let target = self.target(on_not_in_ranges);
        self.range_tables.push(ranges.into());
        let table = self.range_tables.len() - 1;
        self.emit(Instr::CheckCharNotInRanges { table, target });
        true
    }

    fn check_character_gt(&mut self, limit: u32, on_greater: Option<Label>) {
        let target = self.target(on_greater);
        self.emit(Instr::CheckCharGt { limit, target });
    }

    fn check_character_lt(&mut self, limit: u32, on_less: Option<Label>) {
        let target = self.target(on_less);
        self.emit(Instr::CheckCharLt { limit, target });
    }

    fn check_not_back_reference(
        &mut self,
        start_reg: u32,
        ignore_case: bool,
        on_no_match: Option<Label>,
    ) {
        let target = self.target(on_no_match);
        self.emit(Instr::CheckNotBackRef { start_reg, ignore_case, target });
    }

    fn check_position(
        &mut self,
        cp_offset: i32,
        on_outside_input: Option<Label>,
    ) {
        let target = self.target(on_outside_input);
        self.emit(Instr::CheckPosition { cp_offset, target });
    }

    fn clear_registers(&mut self, from: u32, to: u32) {
        self.emit(Instr::ClearRegisters { from, to });
    }

    fn go_to(&mut self, to: Option<Label>) {
        match to {
            Some(label) => self.emit(Instr::GoTo(label)),
            None => self.emit(Instr::Backtrack),
        }
    }

    fn if_register_ge(&mut self, reg: u32, value: i32, if_ge: Option<Label>) {
        let target = self.target(if_ge);
        self.emit(Instr::IfRegisterGe { reg, value, target });
    }

    fn if_register_lt(&mut self, reg: u32, value: i32, if_lt: Option<Label>) {
        let target = self.target(if_lt);
        self.emit(Instr::IfRegisterLt { reg, value, target });
    }

    fn if_register_eq_pos(&mut self, reg: u32, if_eq: Option<Label>) {
        let target = self.target(if_eq);
        self.emit(Instr::IfRegisterEqPos { reg, target });
    }

    fn load_current_character(
        &mut self,
        cp_offset: i32,
        on_end_of_input: Option<Label>,
        check_bounds: bool,
        count: u32,
    ) {
        debug_assert!(count >= 1 && count <= self.max_preload_characters(self.one_byte));
        let on_end = self.target(on_end_of_input);
        self.emit(Instr::LoadCurrentChar { cp_offset, on_end, check_bounds, count });
    }

    fn max_preload_characters(&self, one_byte: bool) -> u32 {
        if one_byte {
            4
        } else {
            2
        }
    }

    fn pop_current_position(&mut self) {
        self.emit(Instr::PopCp);
    }

    fn pop_register(&mut self, reg: u32) {
        self.emit(Instr::PopRegister(reg));
    }

    fn push_backtrack(&mut self, label: Label) {
        self.emit(Instr::PushBacktrack(label));
    }

    fn push_current_position(&mut self) {
        self.emit(Instr::PushCp);
    }

    fn push_register(&mut self, reg: u32) {
        self.emit(Instr::PushRegister(reg));
    }

    fn read_current_position_from_register(&mut self, reg: u32) {
        self.emit(Instr::ReadCpFromRegister(reg));
    }

    fn read_stack_pointer_from_register(&mut self, reg: u32) {
        self.emit(Instr::ReadStackPointerFromRegister(reg));
    }

    fn set_register(&mut self, reg: u32, value: i32) {
        self.emit(Instr::SetRegister { reg, value });
    }

    fn write_current_position_to_register(&mut self, reg: u32, cp_offset: i32) {
        self.emit(Instr::WriteCpToRegister { reg, cp_offset });
    }

    fn write_stack_pointer_to_register(&mut self, reg: u32) {
        self.emit(Instr::WriteStackPointerToRegister(reg));
    }

    fn succeed(&mut self) {
        self.emit(Instr::Succeed);
    }

    fn fail(&mut self) {
        self.emit(Instr::Fail);
    }
}

impl Instr {
    /// Returns the label this instruction may jump to, if any.
    pub fn target(&self) -> Option<Label> {
        match self {
            Instr::CheckAtStart { target, .. }
            | Instr::CheckNotAtStart { target, .. }
            | Instr::CheckChar { target, .. }
            | Instr::CheckNotChar { target, .. }
            | Instr::CheckCharAfterAnd { target, .. }
            | Instr::CheckNotCharAfterAnd { target, .. }
            | Instr::CheckCharInRange { target, .. }
            | Instr::CheckCharNotInRange { target, .. }
            | Instr::CheckCharNotInRanges { target, .. }
            | Instr::CheckCharGt { target, .. }
            | Instr::CheckCharLt { target, .. }
            | Instr::CheckNotBackRef { target, .. }
            | Instr::CheckPosition { target, .. }
            | Instr::IfRegisterGe { target, .. }
            | Instr::IfRegisterLt { target, .. }
            | Instr::IfRegisterEqPos { target, .. }
            | Instr::LoadCurrentChar { on_end: target, .. }
            | Instr::GoTo(target)
            | Instr::PushBacktrack(target) => Some(*target),
            _ => None,
        }
    }
}

/// A compiled program, ready to be executed.
#[derive(Clone, Debug)]
pub struct Program {
    code: Vec<Instr>,
    addresses: Vec<u32>,
    range_tables: Vec<Box<[CharacterRange]>>,
    one_byte: bool,
}

impl Program {
    /// The instructions in the program.
    #[inline]
    pub fn code(&self) -> &[Instr] {
        self.code.as_slice()
    }

    /// Address of the instruction a label is bound to.
    #[inline]
    pub fn address(&self, label: Label) -> u32 {
        self.addresses[label.index()]
    }

    /// Returns the ranges in the table with the given index.
    #[inline]
    pub fn range_table(&self, table: usize) -> &[CharacterRange] {
        &self.range_tables[table]
    }

    /// True if the program expects one-byte code units.
    #[inline]
    pub fn one_byte(&self) -> bool {
        self.one_byte
    }

    /// Returns the instructions that may jump to the given address.
    pub fn jumps_to(&self, addr: u32) -> impl Iterator<Item = &Instr> {
        self.code.iter().filter(move |instr| {
            instr.target().is_some_and(|label| self.address(label) == addr)
        })
    }
}

fn fmt_char(c: u32) -> String {
    match char::from_u32(c) {
        Some(ch) if ch.is_ascii_graphic() => format!("{:#06x} '{}'", c, ch),
        _ => format!("{:#06x}", c),
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;

        for (addr, instr) in self.code.iter().enumerate() {
            let a = |label: &Label| self.address(*label);
            write!(f, "{:05x}: ", addr)?;
            match instr {
                Instr::AdvanceCp(by) => writeln!(f, "ADVANCE_CP {}", by)?,
                Instr::AdvanceRegister { reg, by } => {
                    writeln!(f, "ADVANCE_REGISTER r{} {}", reg, by)?
                }
                Instr::Backtrack => writeln!(f, "BACKTRACK")?,
                Instr::CheckAtStart { cp_offset, target } => writeln!(
                    f,
                    "CHECK_AT_START {} {:05x}",
                    cp_offset,
                    a(target)
                )?,
                Instr::CheckNotAtStart { cp_offset, target } => writeln!(
                    f,
                    "CHECK_NOT_AT_START {} {:05x}",
                    cp_offset,
                    a(target)
                )?,
                Instr::CheckChar { c, target } => {
                    writeln!(f, "CHECK_CHAR {} {:05x}", fmt_char(*c), a(target))?
                }
                Instr::CheckNotChar { c, target } => writeln!(
                    f,
                    "CHECK_NOT_CHAR {} {:05x}",
                    fmt_char(*c),
                    a(target)
                )?,
                Instr::CheckCharAfterAnd { c, mask, target } => writeln!(
                    f,
                    "AND_CHECK_CHAR {:#x} {:#x} {:05x}",
                    c,
                    mask,
                    a(target)
                )?,
                Instr::CheckNotCharAfterAnd { c, mask, target } => writeln!(
                    f,
                    "AND_CHECK_NOT_CHAR {:#x} {:#x} {:05x}",
                    c,
                    mask,
                    a(target)
                )?,
                Instr::CheckCharInRange { from, to, target } => writeln!(
                    f,
                    "CHECK_CHAR_IN_RANGE [{:#06x}-{:#06x}] {:05x}",
                    from,
                    to,
                    a(target)
                )?,
                Instr::CheckCharNotInRange { from, to, target } => writeln!(
                    f,
                    "CHECK_CHAR_NOT_IN_RANGE [{:#06x}-{:#06x}] {:05x}",
                    from,
                    to,
                    a(target)
                )?,
                Instr::CheckCharNotInRanges { table, target } => {
                    write!(f, "CHECK_CHAR_NOT_IN_RANGES ")?;
                    for range in self.range_table(*table) {
                        write!(f, "[{:#06x}-{:#06x}] ", range.from(), range.to())?;
                    }
                    writeln!(f, "{:05x}", a(target))?
                }
                Instr::CheckCharGt { limit, target } => writeln!(
                    f,
                    "CHECK_GT {} {:05x}",
                    fmt_char(*limit),
                    a(target)
                )?,
                Instr::CheckCharLt { limit, target } => writeln!(
                    f,
                    "CHECK_LT {} {:05x}",
                    fmt_char(*limit),
                    a(target)
                )?,
                Instr::CheckNotBackRef { start_reg, ignore_case, target } => {
                    writeln!(
                        f,
                        "CHECK_NOT_BACK_REF{} r{} {:05x}",
                        if *ignore_case { "_NO_CASE" } else { "" },
                        start_reg,
                        a(target)
                    )?
                }
                Instr::CheckPosition { cp_offset, target } => writeln!(
                    f,
                    "CHECK_POSITION {} {:05x}",
                    cp_offset,
                    a(target)
                )?,
                Instr::ClearRegisters { from, to } => {
                    writeln!(f, "CLEAR_REGISTERS r{}-r{}", from, to)?
                }
                Instr::Fail => writeln!(f, "FAIL")?,
                Instr::GoTo(target) => writeln!(f, "GOTO {:05x}", a(target))?,
                Instr::IfRegisterGe { reg, value, target } => writeln!(
                    f,
                    "IF_REGISTER_GE r{} {} {:05x}",
                    reg,
                    value,
                    a(target)
                )?,
                Instr::IfRegisterLt { reg, value, target } => writeln!(
                    f,
                    "IF_REGISTER_LT r{} {} {:05x}",
                    reg,
                    value,
                    a(target)
                )?,
                Instr::IfRegisterEqPos { reg, target } => writeln!(
                    f,
                    "IF_REGISTER_EQ_POS r{} {:05x}",
                    reg,
                    a(target)
                )?,
                Instr::LoadCurrentChar { cp_offset, on_end, check_bounds, count } => {
                    writeln!(
                        f,
                        "LOAD{} {} x{} {:05x}",
                        if *check_bounds { "" } else { "_UNCHECKED" },
                        cp_offset,
                        count,
                        a(on_end)
                    )?
                }
                Instr::PopCp => writeln!(f, "POP_CP")?,
                Instr::PopRegister(reg) => writeln!(f, "POP_REGISTER r{}", reg)?,
                Instr::PushBacktrack(target) => {
                    writeln!(f, "PUSH_BACKTRACK {:05x}", a(target))?
                }
                Instr::PushCp => writeln!(f, "PUSH_CP")?,
                Instr::PushRegister(reg) => {
                    writeln!(f, "PUSH_REGISTER r{}", reg)?
                }
                Instr::ReadCpFromRegister(reg) => {
                    writeln!(f, "READ_CP r{}", reg)?
                }
                Instr::ReadStackPointerFromRegister(reg) => {
                    writeln!(f, "READ_SP r{}", reg)?
                }
                Instr::SetRegister { reg, value } => {
                    writeln!(f, "SET_REGISTER r{} {}", reg, value)?
                }
                Instr::Succeed => writeln!(f, "SUCCEED")?,
                Instr::WriteCpToRegister { reg, cp_offset } => {
                    writeln!(f, "WRITE_CP r{} {}", reg, cp_offset)?
                }
                Instr::WriteStackPointerToRegister(reg) => {
                    writeln!(f, "WRITE_SP r{}", reg)?
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn labels_are_resolved() {
        let mut asm = BytecodeAssembler::new(true);
        let fail = asm.new_label();
        let done = asm.new_label();
        asm.push_backtrack(fail);
        asm.load_current_character(0, None, true, 1);
        asm.check_not_character('a' as u32, None);
        asm.go_to(Some(done));
        asm.bind(fail);
        asm.fail();
        asm.bind(done);
        asm.succeed();
        let program = asm.finish().unwrap();

        assert_eq!(program.address(fail), 4);
        assert_eq!(program.address(done), 5);
        assert_eq!(program.code().last(), Some(&Instr::Backtrack));
        assert_eq!(program.jumps_to(6).count(), 2);
        assert_eq!(
            program.to_string(),
            r#"
00000: PUSH_BACKTRACK 00004
00001: LOAD 0 x1 00006
00002: CHECK_NOT_CHAR 0x0061 'a' 00006
00003: GOTO 00005
00004: FAIL
00005: SUCCEED
00006: BACKTRACK
"#
        );
    }

    #[test]
    fn unbound_labels_are_reported() {
        let mut asm = BytecodeAssembler::new(false);
        let label = asm.new_label();
        asm.go_to(Some(label));
        assert!(matches!(asm.finish(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn large_range_tables_are_rejected() {
        let mut asm = BytecodeAssembler::new(false);
        let ranges: Vec<CharacterRange> = (0..300)
            .map(|i| CharacterRange::singleton(i * 2))
            .collect();
        assert!(!asm.check_character_not_in_ranges(&ranges, None));
        assert!(asm.check_character_not_in_ranges(&ranges[..10], None));
        assert_eq!(asm.len(), 1);
    }
}
