/*! Emission of choice nodes.

Alternatives are tried in order. Before the full code of an alternative is
emitted, a quick check loads up to four code units at once and compares
them against a mask and a value. When the quick check fails the next
alternative is tried right away. When it succeeds the full check of the
alternative is emitted out of line, after all the quick checks.

Choices with many alternatives may instead load a single code unit and
dispatch on it, trying only the alternatives that can start with that
code unit.
*/

use std::rc::Rc;

use log::*;

use crate::assembler::{Label, MacroAssembler};
use crate::codegen::{Codegen, Limit};
use crate::dispatch::{build_dispatch_table, OutSets};
use crate::graph::{
    Alternative, ChoiceKind, Guard, GuardOp, NodeId, NodeKind, TriBool,
};
use crate::quick_check::{char_mask, QuickCheck, QuickCheckDetails};
use crate::trace::Trace;
use crate::Error;

/// Limits how deep the graph is explored when computing how many code
/// units can be preloaded.
const EATS_AT_LEAST_BUDGET: i32 = 100;

/// Dispatch is used only when the code units that select the groups can be
/// told apart with a few comparisons.
const MAX_DISPATCH_BRANCHES: usize = 32;

/// How the alternatives of a choice are split by their first code unit.
#[derive(Debug)]
pub(crate) struct DispatchPlan {
    /// Indexes of the alternatives in each group, in their original order.
    groups: Vec<Vec<usize>>,
    /// Ranges of code units, and the group they select.
    branches: Vec<(u32, u32, usize)>,
}

/// State of a single alternative while the choice is emitted.
struct AlternativeGeneration {
    after: Label,
    possible_success: Label,
    possible_success_used: bool,
    expects_preload: bool,
    quick_check_details: QuickCheckDetails,
}

/// State of the current character register while the alternatives are
/// emitted.
#[derive(Default)]
struct PreloadState {
    is_current: bool,
    has_checked_bounds: bool,
    characters: u32,
}

impl<'g, A: MacroAssembler> Codegen<'g, A> {
    pub(super) fn emit_choice(
        &mut self,
        id: NodeId,
        trace: &Trace,
    ) -> Result<(), Error> {
        let graph = self.graph;
        let (kind, alternatives, not_at_start) = match &graph.node(id).kind {
            NodeKind::Choice { kind, alternatives, not_at_start } => {
                (*kind, alternatives, *not_at_start)
            }
            _ => unreachable!(),
        };

        if let [alternative] = &alternatives[..] {
            if alternative.guards.is_empty() {
                return self.emit(alternative.node, trace);
            }
        }

        // Loops are entered with a trivial trace, which keeps the code
        // for the loop body small.
        if matches!(kind, ChoiceKind::Loop { .. }) && !trace.is_trivial() {
            return self.flush(trace, id);
        }

        if self.limit_versions(id, trace)? == Limit::Done {
            return Ok(());
        }

        if trace.flush_budget() == 0 && trace.has_actions() {
            return self.flush(trace, id);
        }

        let not_at_start = not_at_start || trace.at_start() == TriBool::False;

        if kind == ChoiceKind::Plain {
            if let Some(plan) = self.dispatch_plan(id, alternatives, not_at_start)
            {
                return self.emit_dispatch(&plan, alternatives, trace, not_at_start);
            }
        }

        let eats_at_least = graph.eats_at_least(
            id,
            4,
            EATS_AT_LEAST_BUDGET,
            not_at_start,
        );

        self.emit_alternatives(
            alternatives,
            trace,
            eats_at_least,
            not_at_start,
            kind == ChoiceKind::NegativeLookaround,
        )
    }

    /// Emits the alternatives in order, quick checks inline and full checks
    /// out of line.
    fn emit_alternatives(
        &mut self,
        alternatives: &[Alternative],
        trace: &Trace,
        eats_at_least: u32,
        not_at_start: bool,
        negative_lookaround: bool,
    ) -> Result<(), Error> {
        let mut generations: Vec<AlternativeGeneration> = alternatives
            .iter()
            .map(|_| AlternativeGeneration {
                after: self.asm.new_label(),
                possible_success: self.asm.new_label(),
                possible_success_used: false,
                expects_preload: false,
                quick_check_details: QuickCheckDetails::default(),
            })
            .collect();

        let mut preload = PreloadState {
            characters: self.preload_characters(eats_at_least),
            ..Default::default()
        };
        preload.is_current =
            trace.characters_preloaded() == preload.characters;
        preload.has_checked_bounds = preload.is_current;

        self.emit_choices(
            alternatives,
            &mut generations,
            trace,
            &mut preload,
            not_at_start,
            negative_lookaround,
        )?;

        let count = alternatives.len() as i32;
        let new_flush_budget = trace.flush_budget() / count;

        for (i, alternative) in alternatives.iter().enumerate() {
            let mut new_trace = trace.clone();
            if new_trace.has_actions() {
                new_trace.set_flush_budget(new_flush_budget);
            }
            let next_expects_preload = generations
                .get(i + 1)
                .map(|g| g.expects_preload)
                .unwrap_or(false);
            self.emit_out_of_line_continuation(
                &new_trace,
                alternative,
                &generations[i],
                preload.characters,
                next_expects_preload,
                not_at_start,
            )?;
        }

        Ok(())
    }

    /// Returns how many code units are loaded at once by quick checks.
    fn preload_characters(&self, eats_at_least: u32) -> u32 {
        // The preloaded code units must fit in 32 bits.
        let fits = if self.one_byte() { 4 } else { 2 };
        let max = self.asm.max_preload_characters(self.one_byte()).min(fits);
        match eats_at_least.min(max) {
            // Three code units can't be loaded at once.
            3 => 2,
            n => n,
        }
    }

    fn emit_choices(
        &mut self,
        alternatives: &[Alternative],
        generations: &mut [AlternativeGeneration],
        trace: &Trace,
        preload: &mut PreloadState,
        not_at_start: bool,
        negative_lookaround: bool,
    ) -> Result<(), Error> {
        let count = alternatives.len();
        let new_flush_budget = trace.flush_budget() / count as i32;

        for (i, alternative) in alternatives.iter().enumerate() {
            let is_last = i == count - 1;
            let generation = &mut generations[i];
            generation.quick_check_details =
                QuickCheckDetails::new(preload.characters as usize);

            let mut new_trace = trace.clone();
            new_trace.set_characters_preloaded(if preload.is_current {
                preload.characters
            } else {
                0
            });
            if preload.has_checked_bounds {
                new_trace.set_bound_checked_up_to(preload.characters as i32);
            }
            new_trace.clear_quick_check_performed();
            if not_at_start {
                new_trace.set_at_start(TriBool::False);
            }
            if !is_last {
                new_trace.set_backtrack(generation.after);
            }
            generation.expects_preload = preload.is_current;

            // The body of a negative lookaround tells nothing about what
            // follows.
            let try_quick_check = !(negative_lookaround && i == 0);
            let after = generation.after;
            let possible_success = generation.possible_success;

            let mut generate_inline = false;

            if try_quick_check
                && self.emit_quick_check(
                    alternative.node,
                    trace,
                    &new_trace,
                    preload.has_checked_bounds,
                    possible_success,
                    &mut generations[i].quick_check_details,
                    !is_last,
                )
            {
                self.stats.quick_checks += 1;
                preload.is_current = true;
                preload.has_checked_bounds = true;
                if is_last {
                    self.asm.bind(possible_success);
                    new_trace.set_quick_check_performed(
                        &generations[i].quick_check_details,
                    );
                    new_trace.set_characters_preloaded(preload.characters);
                    new_trace
                        .set_bound_checked_up_to(preload.characters as i32);
                    generate_inline = true;
                } else {
                    generations[i].possible_success_used = true;
                }
            } else if generations[i].quick_check_details.cannot_match() {
                if is_last {
                    self.asm.go_to(trace.backtrack());
                }
                continue;
            } else {
                // The alternative may have used the register, the code
                // that follows can't rely on it.
                if i != 0 {
                    generations[i].expects_preload = false;
                    new_trace.invalidate_current_character();
                }
                generate_inline = true;
            }

            if generate_inline {
                if new_trace.has_actions() {
                    new_trace.set_flush_budget(new_flush_budget);
                }
                self.emit_guards(&alternative.guards, &new_trace);
                self.emit(alternative.node, &new_trace)?;
                preload.is_current = false;
            }

            self.asm.bind(after);
        }

        Ok(())
    }

    /// Emits the quick check of an alternative. Returns false if nothing
    /// was emitted because the check would be useless.
    #[allow(clippy::too_many_arguments)]
    fn emit_quick_check(
        &mut self,
        node: NodeId,
        bounds_check_trace: &Trace,
        trace: &Trace,
        preload_has_checked_bounds: bool,
        on_possible_success: Label,
        details: &mut QuickCheckDetails,
        fall_through_on_failure: bool,
    ) -> bool {
        if details.characters() == 0 {
            return false;
        }

        QuickCheck::new(self.graph, self.one_byte(), self.ignore_case()).fill(
            node,
            details,
            0,
            trace.at_start() == TriBool::False,
        );

        if details.cannot_match() {
            return false;
        }
        if !details.rationalize(self.one_byte()) {
            return false;
        }

        let characters = details.characters() as u32;
        let mut mask = details.mask();
        let value = details.value();

        if trace.characters_preloaded() != characters {
            // When the bounds check fails no alternative matches, so the
            // backtrack of the whole choice is used.
            self.asm.load_current_character(
                trace.cp_offset(),
                bounds_check_trace.backtrack(),
                !preload_has_checked_bounds,
                characters,
            );
        }

        let need_mask = if characters == 1 {
            let char_mask = char_mask(self.one_byte());
            let need = mask & char_mask != char_mask;
            mask &= char_mask;
            need
        } else if characters == 2 && self.one_byte() {
            mask & 0xFFFF != 0xFFFF
        } else {
            mask != u32::MAX
        };

        if fall_through_on_failure {
            if need_mask {
                self.asm.check_character_after_and(
                    value,
                    mask,
                    Some(on_possible_success),
                );
            } else {
                self.asm.check_character(value, Some(on_possible_success));
            }
        } else if need_mask {
            self.asm.check_not_character_after_and(value, mask, trace.backtrack());
        } else {
            self.asm.check_not_character(value, trace.backtrack());
        }

        true
    }

    /// Emits the full check of an alternative whose quick check succeeded.
    fn emit_out_of_line_continuation(
        &mut self,
        trace: &Trace,
        alternative: &Alternative,
        generation: &AlternativeGeneration,
        preload_characters: u32,
        next_expects_preload: bool,
        not_at_start: bool,
    ) -> Result<(), Error> {
        if !generation.possible_success_used {
            return Ok(());
        }

        self.asm.bind(generation.possible_success);

        let mut out_of_line_trace = trace.clone();
        out_of_line_trace.set_characters_preloaded(preload_characters);
        out_of_line_trace
            .set_quick_check_performed(&generation.quick_check_details);
        if not_at_start {
            out_of_line_trace.set_at_start(TriBool::False);
        }

        if next_expects_preload {
            // The next alternative expects the characters to be loaded, they
            // must be loaded again when this one fails.
            let reload = self.asm.new_label();
            out_of_line_trace.set_backtrack(reload);
            self.emit_guards(&alternative.guards, &out_of_line_trace);
            self.emit(alternative.node, &out_of_line_trace)?;
            self.asm.bind(reload);
            self.asm.load_current_character(
                trace.cp_offset(),
                None,
                false,
                preload_characters,
            );
            self.asm.go_to(Some(generation.after));
        } else {
            out_of_line_trace.set_backtrack(generation.after);
            self.emit_guards(&alternative.guards, &out_of_line_trace);
            self.emit(alternative.node, &out_of_line_trace)?;
        }

        Ok(())
    }

    fn emit_guards(&mut self, guards: &[Guard], trace: &Trace) {
        for guard in guards {
            // Guarded choices are loops, which always start with a flushed
            // trace, so the register holds its actual value.
            debug_assert!(!trace.mentions_register(guard.reg));
            match guard.op {
                GuardOp::Lt => {
                    self.asm.if_register_ge(guard.reg, guard.value, trace.backtrack())
                }
                GuardOp::Geq => {
                    self.asm.if_register_lt(guard.reg, guard.value, trace.backtrack())
                }
            }
        }
    }

    /// Returns the dispatch plan for a choice, or `None` if dispatching on
    /// the first code unit is not worth it or not possible.
    fn dispatch_plan(
        &mut self,
        id: NodeId,
        alternatives: &[Alternative],
        not_at_start: bool,
    ) -> Option<Rc<DispatchPlan>> {
        if let Some(plan) = self.dispatch_plans.get(&(id, not_at_start)) {
            return plan.clone();
        }
        let plan = self.build_dispatch_plan(id, alternatives, not_at_start);
        if let Some(plan) = &plan {
            debug!(
                "dispatching on first code unit: {} groups, {} branches",
                plan.groups.len(),
                plan.branches.len()
            );
        }
        let plan = plan.map(Rc::new);
        self.dispatch_plans.insert((id, not_at_start), plan.clone());
        plan
    }

    fn build_dispatch_plan(
        &mut self,
        id: NodeId,
        alternatives: &[Alternative],
        not_at_start: bool,
    ) -> Option<DispatchPlan> {
        if alternatives.len() < self.config.min_dispatch_alternatives {
            return None;
        }

        // Every alternative must consume some input, so that the code unit
        // used for dispatching belongs to the match.
        let eligible = alternatives.iter().all(|alt| {
            alt.guards.is_empty()
                && self.graph.eats_at_least(
                    alt.node,
                    1,
                    EATS_AT_LEAST_BUDGET,
                    not_at_start,
                ) >= 1
        });

        if !eligible {
            return None;
        }

        let table = build_dispatch_table(
            self.graph,
            id,
            self.ignore_case(),
            &mut self.out_sets,
        );

        let max_char = char_mask(self.one_byte());
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut group_sets = Vec::new();
        let mut branches = Vec::new();

        for entry in table.entries() {
            if entry.out_set == OutSets::EMPTY || entry.from > max_char {
                continue;
            }
            let group = match group_sets.iter().position(|s| *s == entry.out_set)
            {
                Some(group) => group,
                None => {
                    group_sets.push(entry.out_set);
                    groups.push(
                        self.out_sets
                            .get(entry.out_set)
                            .iter()
                            .map(|i| i as usize)
                            .collect(),
                    );
                    groups.len() - 1
                }
            };
            branches.push((entry.from, entry.to.min(max_char), group));
        }

        if groups.len() < 2
            || groups.len() > self.config.max_dispatch_groups
            || branches.len() > MAX_DISPATCH_BRANCHES
        {
            return None;
        }

        for group in &mut groups {
            group.sort_unstable();
        }

        Some(DispatchPlan { groups, branches })
    }

    /// Loads the next code unit and jumps to the code of the group of
    /// alternatives that can start with it.
    fn emit_dispatch(
        &mut self,
        plan: &DispatchPlan,
        alternatives: &[Alternative],
        trace: &Trace,
        not_at_start: bool,
    ) -> Result<(), Error> {
        self.stats.dispatches += 1;

        let group_labels: Vec<Label> =
            plan.groups.iter().map(|_| self.asm.new_label()).collect();

        if trace.characters_preloaded() != 1 {
            self.asm.load_current_character(
                trace.cp_offset(),
                trace.backtrack(),
                true,
                1,
            );
        }

        for (from, to, group) in &plan.branches {
            let label = Some(group_labels[*group]);
            if from == to {
                self.asm.check_character(*from, label);
            } else {
                self.asm.check_character_in_range(*from, *to, label);
            }
        }

        // No alternative starts with this code unit.
        self.asm.go_to(trace.backtrack());

        for (group, label) in plan.groups.iter().zip(group_labels) {
            self.asm.bind(label);

            let mut group_trace = trace.clone();
            group_trace.set_characters_preloaded(1);
            group_trace
                .set_bound_checked_up_to(trace.bound_checked_up_to().max(1));
            group_trace.clear_quick_check_performed();
            if not_at_start {
                group_trace.set_at_start(TriBool::False);
            }

            let subset: Vec<Alternative> =
                group.iter().map(|i| alternatives[*i].clone()).collect();

            if let [alternative] = &subset[..] {
                self.emit(alternative.node, &group_trace)?;
                continue;
            }

            let eats_at_least = subset
                .iter()
                .map(|alt| {
                    self.graph.eats_at_least(
                        alt.node,
                        4,
                        EATS_AT_LEAST_BUDGET,
                        not_at_start,
                    )
                })
                .min()
                .unwrap_or(0);

            self.emit_alternatives(
                &subset,
                &group_trace,
                eats_at_least,
                not_at_start,
                false,
            )?;
        }

        Ok(())
    }
}
