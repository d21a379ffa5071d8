use crate::assembler::{Label, MacroAssembler};
use crate::ranges::CharacterRange;

/// A [`MacroAssembler`] that records the operations requested, as strings.
#[derive(Debug, Default)]
pub(crate) struct RecordingAssembler {
    pub ops: Vec<String>,
    labels: u32,
}

fn t(target: Option<Label>) -> String {
    match target {
        Some(label) => format!("L{}", label.0),
        None => "bt".to_string(),
    }
}

impl RecordingAssembler {
    fn op(&mut self, op: String) {
        self.ops.push(op);
    }
}

impl MacroAssembler for RecordingAssembler {
    fn new_label(&mut self) -> Label {
        self.labels += 1;
        Label(self.labels - 1)
    }

    fn bind(&mut self, label: Label) {
        self.op(format!("bind L{}", label.0));
    }

    fn advance_current_position(&mut self, by: i32) {
        self.op(format!("advance_cp {}", by));
    }

    fn advance_register(&mut self, reg: u32, by: i32) {
        self.op(format!("advance_register r{} {}", reg, by));
    }

    fn backtrack(&mut self) {
        self.op("backtrack".to_string());
    }

    fn check_at_start(&mut self, cp_offset: i32, on_at_start: Option<Label>) {
        self.op(format!("check_at_start {} {}", cp_offset, t(on_at_start)));
    }

    fn check_not_at_start(&mut self, cp_offset: i32, target: Option<Label>) {
        self.op(format!("check_not_at_start {} {}", cp_offset, t(target)));
    }

    fn check_character(&mut self, c: u32, on_equal: Option<Label>) {
        self.op(format!("check_char {:#x} {}", c, t(on_equal)));
    }

    fn check_not_character(&mut self, c: u32, target: Option<Label>) {
        self.op(format!("check_not_char {:#x} {}", c, t(target)));
    }

    fn check_character_after_and(
        &mut self,
        c: u32,
        mask: u32,
        on_equal: Option<Label>,
    ) {
        self.op(format!("check_char_and {:#x} {:#x} {}", c, mask, t(on_equal)));
    }

    fn check_not_character_after_and(
        &mut self,
        c: u32,
        mask: u32,
        target: Option<Label>,
    ) {
        self.op(format!(
            "check_not_char_and {:#x} {:#x} {}",
            c,
            mask,
            t(target)
        ));
    }

    fn check_character_in_range(
        &mut self,
        from: u32,
        to: u32,
        target: Option<Label>,
    ) {
        self.op(format!("check_in_range {:#x} {:#x} {}", from, to, t(target)));
    }

    fn check_character_not_in_range(
        &mut self,
        from: u32,
        to: u32,
        target: Option<Label>,
    ) {
        self.op(format!(
            "check_not_in_range {:#x} {:#x} {}",
            from,
            to,
            t(target)
        ));
    }

    fn check_character_not_in_ranges(
        &mut self,
        ranges: &[CharacterRange],
        target: Option<Label>,
    ) -> bool {
        self.op(format!("check_not_in_ranges {} {}", ranges.len(), t(target)));
        true
    }

    fn check_character_gt(&mut self, limit: u32, target: Option<Label>) {
        self.op(format!("check_gt {:#x} {}", limit, t(target)));
    }

    fn check_character_lt(&mut self, limit: u32, target: Option<Label>) {
        self.op(format!("check_lt {:#x} {}", limit, t(target)));
    }

    fn check_not_back_reference(
        &mut self,
        start_reg: u32,
        ignore_case: bool,
        target: Option<Label>,
    ) {
        self.op(format!(
            "check_not_back_ref r{} {} {}",
            start_reg,
            ignore_case,
            t(target)
        ));
    }

    fn check_position(&mut self, cp_offset: i32, target: Option<Label>) {
        self.op(format!("check_position {} {}", cp_offset, t(target)));
    }

    fn clear_registers(&mut self, from: u32, to: u32) {
        self.op(format!("clear_registers r{} r{}", from, to));
    }

    fn go_to(&mut self, to: Option<Label>) {
        self.op(format!("goto {}", t(to)));
    }

    fn if_register_ge(&mut self, reg: u32, value: i32, target: Option<Label>) {
        self.op(format!("if_ge r{} {} {}", reg, value, t(target)));
    }

    fn if_register_lt(&mut self, reg: u32, value: i32, target: Option<Label>) {
        self.op(format!("if_lt r{} {} {}", reg, value, t(target)));
    }

    fn if_register_eq_pos(&mut self, reg: u32, target: Option<Label>) {
        self.op(format!("if_eq_pos r{} {}", reg, t(target)));
    }

    fn load_current_character(
        &mut self,
        cp_offset: i32,
        on_end_of_input: Option<Label>,
        check_bounds: bool,
        count: u32,
    ) {
        self.op(format!(
            "load {} {} {} {}",
            cp_offset,
            t(on_end_of_input),
            check_bounds,
            count
        ));
    }

    fn max_preload_characters(&self, one_byte: bool) -> u32 {
        if one_byte {
            4
        } else {
            2
        }
    }

    fn pop_current_position(&mut self) {
        self.op("pop_cp".to_string());
    }

    fn pop_register(&mut self, reg: u32) {
        self.op(format!("pop_register r{}", reg));
    }

    fn push_backtrack(&mut self, label: Label) {
        self.op(format!("push_backtrack L{}", label.0));
    }

    fn push_current_position(&mut self) {
        self.op("push_cp".to_string());
    }

    fn push_register(&mut self, reg: u32) {
        self.op(format!("push_register r{}", reg));
    }

    fn read_current_position_from_register(&mut self, reg: u32) {
        self.op(format!("read_cp r{}", reg));
    }

    fn read_stack_pointer_from_register(&mut self, reg: u32) {
        self.op(format!("read_sp r{}", reg));
    }

    fn set_register(&mut self, reg: u32, value: i32) {
        self.op(format!("set_register r{} {}", reg, value));
    }

    fn write_current_position_to_register(&mut self, reg: u32, cp_offset: i32) {
        self.op(format!("write_cp r{} {}", reg, cp_offset));
    }

    fn write_stack_pointer_to_register(&mut self, reg: u32) {
        self.op(format!("write_sp r{}", reg));
    }

    fn succeed(&mut self) {
        self.op("succeed".to_string());
    }

    fn fail(&mut self) {
        self.op("fail".to_string());
    }
}
