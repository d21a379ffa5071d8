/*! Code generation.

The code generator walks the node graph and asks a [`MacroAssembler`] to
emit code for each node. Every node is emitted under a [`Trace`], which
describes what the code emitted so far left pending. The same node may be
emitted many times, once for every distinct trace it's reached with, which
produces faster code at the cost of code size. The number of versions of a
node is limited (see [`Codegen::limit_versions`]). Once the limit is hit,
the trace is flushed and a jump to the generic version of the node, which
is emitted under a trivial trace, is used instead.

Nodes whose generic version is needed, but can't be emitted right away
because the recursion is too deep, are put in a work list and emitted
later.
*/

use std::rc::Rc;

use log::*;
use rustc_hash::FxHashMap;

use crate::assembler::{Label, MacroAssembler};
use crate::dispatch::OutSets;
use crate::graph::{ActionKind, EndAction, Graph, NodeId, NodeKind};
use crate::trace::{DeferredAction, Trace};
use crate::{Config, Error};

mod assertion;
mod choice;
mod text;

#[cfg(test)]
mod tests;

/// Result of [`Codegen::limit_versions`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Limit {
    /// The node must be emitted under the current trace.
    Continue,
    /// The node was taken care of.
    Done,
}

/// Per node code generation state.
#[derive(Clone, Copy, Debug, Default)]
struct NodeState {
    label: Option<Label>,
    bound: bool,
    on_work_list: bool,
    /// Number of versions generated for non-trivial traces.
    trace_count: u32,
}

/// Counters reported once the code is generated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct CodegenStats {
    pub nodes_emitted: usize,
    pub flushes: usize,
    pub quick_checks: usize,
    pub dispatches: usize,
}

pub(crate) struct Codegen<'g, A: MacroAssembler> {
    graph: &'g Graph,
    config: &'g Config,
    asm: A,
    states: FxHashMap<NodeId, NodeState>,
    work_list: Vec<NodeId>,
    recursion_depth: u32,
    limiting_recursion: bool,
    out_sets: OutSets,
    /// Dispatch plans, by choice node and whether the position is known
    /// not to be the start of the input.
    dispatch_plans: FxHashMap<(NodeId, bool), Option<Rc<choice::DispatchPlan>>>,
    stats: CodegenStats,
}

impl<'g, A: MacroAssembler> Codegen<'g, A> {
    pub fn new(graph: &'g Graph, config: &'g Config, asm: A) -> Self {
        Self {
            graph,
            config,
            asm,
            states: FxHashMap::default(),
            work_list: Vec::new(),
            recursion_depth: 0,
            limiting_recursion: false,
            out_sets: OutSets::new(),
            dispatch_plans: FxHashMap::default(),
            stats: CodegenStats::default(),
        }
    }

    /// Generates the code for the graph starting at `entry`, and returns
    /// the assembler.
    pub fn generate(
        mut self,
        entry: NodeId,
    ) -> Result<(A, CodegenStats), Error> {
        let fail = self.asm.new_label();
        self.asm.push_backtrack(fail);

        self.emit(entry, &Trace::new())?;

        self.asm.bind(fail);
        self.asm.fail();

        while let Some(node) = self.work_list.pop() {
            let state = self.states.entry(node).or_default();
            state.on_work_list = false;
            if !state.bound {
                self.emit(node, &Trace::new())?;
            }
        }

        debug!("code generation done: {:?}", self.stats);

        Ok((self.asm, self.stats))
    }

    #[inline]
    fn one_byte(&self) -> bool {
        self.config.one_byte
    }

    #[inline]
    fn ignore_case(&self) -> bool {
        self.config.ignore_case
    }

    /// Returns the label of a node, where its generic version is bound.
    fn label(&mut self, id: NodeId) -> Label {
        if let Some(label) = self.states.get(&id).and_then(|s| s.label) {
            return label;
        }
        let label = self.asm.new_label();
        self.states.entry(id).or_default().label = Some(label);
        label
    }

    /// Schedules the generic version of a node for emission.
    fn add_work(&mut self, id: NodeId) {
        let state = self.states.entry(id).or_default();
        if !state.on_work_list && !state.bound {
            state.on_work_list = true;
            self.work_list.push(id);
        }
    }

    fn keep_recursing(&self) -> bool {
        !self.limiting_recursion
            && self.recursion_depth <= self.config.max_recursion
    }

    /// Decides whether a node must be emitted under `trace`.
    ///
    /// Under a trivial trace the generic version of the node is emitted,
    /// or a jump to it if it was already emitted. Under other traces a
    /// limited number of versions is emitted, after that the trace is
    /// flushed.
    fn limit_versions(
        &mut self,
        id: NodeId,
        trace: &Trace,
    ) -> Result<Limit, Error> {
        if trace.is_trivial() {
            let state = self.states.get(&id).copied().unwrap_or_default();
            if state.bound || state.on_work_list || !self.keep_recursing() {
                let label = self.label(id);
                self.asm.go_to(Some(label));
                self.add_work(id);
                return Ok(Limit::Done);
            }
            let label = self.label(id);
            self.asm.bind(label);
            self.states.entry(id).or_default().bound = true;
            return Ok(Limit::Continue);
        }

        let state = self.states.entry(id).or_default();
        state.trace_count += 1;
        let trace_count = state.trace_count;

        if self.keep_recursing()
            && trace_count < self.config.max_copies_per_node
        {
            return Ok(Limit::Continue);
        }

        let was_limiting = self.limiting_recursion;
        self.limiting_recursion = true;
        let result = self.flush(trace, id);
        self.limiting_recursion = was_limiting;
        result?;
        Ok(Limit::Done)
    }

    /// Emits the pending work of a trace, and then `successor` under a
    /// trivial trace. Also emits the code that undoes the changes made to
    /// the registers when backtracking.
    fn flush(&mut self, trace: &Trace, successor: NodeId) -> Result<(), Error> {
        debug_assert!(!trace.is_trivial());
        self.stats.flushes += 1;

        if !trace.has_actions() && trace.backtrack().is_none() {
            if trace.cp_offset() != 0 {
                self.asm.advance_current_position(trace.cp_offset());
            }
            return self.emit(successor, &Trace::new());
        }

        if trace.backtrack().is_some() {
            self.asm.push_current_position();
        }

        let undo_registers = trace.perform_deferred_actions(&mut self.asm);

        if trace.cp_offset() != 0 {
            self.asm.advance_current_position(trace.cp_offset());
        }

        let undo = self.asm.new_label();
        self.asm.push_backtrack(undo);

        if self.keep_recursing() {
            self.emit(successor, &Trace::new())?;
        } else {
            self.add_work(successor);
            let label = self.label(successor);
            self.asm.go_to(Some(label));
        }

        self.asm.bind(undo);
        undo_registers.restore(&mut self.asm);

        match trace.backtrack() {
            None => self.asm.backtrack(),
            Some(backtrack) => {
                self.asm.pop_current_position();
                self.asm.go_to(Some(backtrack));
            }
        }

        Ok(())
    }

    /// Emits a node under the given trace.
    fn emit(&mut self, id: NodeId, trace: &Trace) -> Result<(), Error> {
        self.recursion_depth += 1;
        self.stats.nodes_emitted += 1;
        let graph = self.graph;
        let result = match &graph.node(id).kind {
            NodeKind::End(action) => self.emit_end(id, *action, trace),
            NodeKind::Action { kind, on_success } => {
                self.emit_action(id, *kind, *on_success, trace)
            }
            NodeKind::Text { .. } => self.emit_text(id, trace),
            NodeKind::Assertion { .. } => self.emit_assertion(id, trace),
            NodeKind::BackReference { .. } => {
                self.emit_back_reference(id, trace)
            }
            NodeKind::Choice { .. } => self.emit_choice(id, trace),
        };
        self.recursion_depth -= 1;
        result
    }

    fn bind_if_unbound(&mut self, id: NodeId) {
        let bound = self.states.get(&id).map(|s| s.bound).unwrap_or(false);
        if !bound {
            let label = self.label(id);
            self.asm.bind(label);
            self.states.entry(id).or_default().bound = true;
        }
    }

    fn emit_end(
        &mut self,
        id: NodeId,
        action: EndAction,
        trace: &Trace,
    ) -> Result<(), Error> {
        match action {
            EndAction::Accept => {
                if !trace.is_trivial() {
                    return self.flush(trace, id);
                }
                self.bind_if_unbound(id);
                self.asm.succeed();
            }
            // The trace is ignored, the stack and the position are reset to
            // the values they had before the lookaround.
            EndAction::NegativeSubmatchSuccess {
                stack_pointer_register,
                current_position_register,
                clear_register_start,
                clear_register_count,
            } => {
                self.bind_if_unbound(id);
                self.asm
                    .read_current_position_from_register(current_position_register);
                self.asm.read_stack_pointer_from_register(stack_pointer_register);
                if clear_register_count > 0 {
                    self.asm.clear_registers(
                        clear_register_start,
                        clear_register_start + clear_register_count - 1,
                    );
                }
                self.asm.backtrack();
            }
        }
        Ok(())
    }

    fn emit_action(
        &mut self,
        id: NodeId,
        kind: ActionKind,
        on_success: NodeId,
        trace: &Trace,
    ) -> Result<(), Error> {
        if self.limit_versions(id, trace)? == Limit::Done {
            return Ok(());
        }

        let deferred = match kind {
            ActionKind::SetRegisterForLoop { reg, value } => {
                Some(DeferredAction::SetRegisterForLoop { reg, value })
            }
            ActionKind::IncrementRegister { reg } => {
                Some(DeferredAction::IncrementRegister { reg })
            }
            ActionKind::StorePosition { reg, is_capture } => {
                Some(DeferredAction::StorePosition {
                    reg,
                    cp_offset: trace.cp_offset(),
                    is_capture,
                })
            }
            ActionKind::ClearCaptures { from, to } => {
                Some(DeferredAction::ClearCaptures { from, to })
            }
            _ => None,
        };

        if let Some(action) = deferred {
            let mut new_trace = trace.clone();
            new_trace.add_action(action);
            return self.emit(on_success, &new_trace);
        }

        match kind {
            ActionKind::BeginSubmatch {
                stack_pointer_register,
                current_position_register,
            } => {
                if !trace.is_trivial() {
                    return self.flush(trace, id);
                }
                self.asm
                    .write_current_position_to_register(current_position_register, 0);
                self.asm.write_stack_pointer_to_register(stack_pointer_register);
                self.emit(on_success, trace)
            }
            ActionKind::PositiveSubmatchSuccess {
                stack_pointer_register,
                current_position_register,
                clear_register_start,
                clear_register_count,
            } => {
                if !trace.is_trivial() {
                    return self.flush(trace, id);
                }
                self.asm
                    .read_current_position_from_register(current_position_register);
                self.asm.read_stack_pointer_from_register(stack_pointer_register);
                if clear_register_count == 0 {
                    return self.emit(on_success, trace);
                }
                // Captures set inside the lookaround are cleared when
                // backtracking into it.
                let clear_registers = self.asm.new_label();
                let mut new_trace = trace.clone();
                new_trace.set_backtrack(clear_registers);
                self.emit(on_success, &new_trace)?;
                self.asm.bind(clear_registers);
                self.asm.clear_registers(
                    clear_register_start,
                    clear_register_start + clear_register_count - 1,
                );
                self.asm.backtrack();
                Ok(())
            }
            ActionKind::EmptyMatchCheck {
                start_register,
                repetition_register,
                repetition_limit,
            } => {
                let stored = trace.get_stored_position(start_register);
                match stored {
                    Some(cp) if repetition_register.is_none()
                        && cp == trace.cp_offset() =>
                    {
                        // Nothing was consumed and there's no minimum.
                        self.asm.go_to(trace.backtrack());
                        Ok(())
                    }
                    Some(cp) if cp < trace.cp_offset() => {
                        self.emit(on_success, trace)
                    }
                    _ if !trace.is_trivial() => self.flush(trace, id),
                    _ => {
                        let skip_empty_check = self.asm.new_label();
                        if let Some(reg) = repetition_register {
                            self.asm.if_register_lt(
                                reg,
                                repetition_limit as i32,
                                Some(skip_empty_check),
                            );
                        }
                        self.asm
                            .if_register_eq_pos(start_register, trace.backtrack());
                        self.asm.bind(skip_empty_check);
                        self.emit(on_success, trace)
                    }
                }
            }
            _ => unreachable!(),
        }
    }

    fn emit_back_reference(
        &mut self,
        id: NodeId,
        trace: &Trace,
    ) -> Result<(), Error> {
        let graph = self.graph;
        let (start_reg, ignore_case, on_success) =
            match &graph.node(id).kind {
                NodeKind::BackReference {
                    start_reg, ignore_case, on_success, ..
                } => (*start_reg, *ignore_case, *on_success),
                _ => unreachable!(),
            };

        if !trace.is_trivial() {
            return self.flush(trace, id);
        }
        if self.limit_versions(id, trace)? == Limit::Done {
            return Ok(());
        }

        self.asm.check_not_back_reference(
            start_reg,
            ignore_case || self.ignore_case(),
            trace.backtrack(),
        );

        self.emit(on_success, trace)
    }
}
