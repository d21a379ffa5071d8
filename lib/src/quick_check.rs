/*! Quick checks.

A quick check is a cheap test that loads up to four code units at once and
compares them against a mask and value, rejecting positions where an
alternative can't possibly match before running its full code. The test is
approximate: it may accept positions where the alternative doesn't match,
but it must never reject a position where it does.

[`QuickCheckDetails`] describes, for each loaded code unit, which bits are
fixed and what their value is. The details for a node are computed by
[`QuickCheck::fill`], merging the details of every path that starts at the
node.
*/

use rustc_hash::FxHashSet;

use crate::graph::{
    ActionKind, AssertionKind, ChoiceKind, Graph, NodeId, NodeKind,
    TextElementKind,
};
use crate::ranges::{case_equivalents_of, MAX_CODE_UNIT, MAX_ONE_BYTE_CHAR};

/// Maximum number of code units covered by a quick check.
pub(crate) const MAX_QUICK_CHECK_CHARS: usize = 4;

/// Limits how many nodes are visited while computing a quick check.
const QUICK_CHECK_BUDGET: i32 = 200;

/// Mask that covers every bit of a code unit.
pub(crate) fn char_mask(one_byte: bool) -> u32 {
    if one_byte {
        MAX_ONE_BYTE_CHAR
    } else {
        MAX_CODE_UNIT
    }
}

/// Sets every bit to the right of the most significant bit set.
fn smear_bits_right(mut v: u32) -> u32 {
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v
}

/// What is known about a single code unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Position {
    pub mask: u32,
    pub value: u32,
    /// If true, a code unit `c` matches if and only if
    /// `c & mask == value`.
    pub determines_perfectly: bool,
}

/// Mask and value for a sequence of code units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct QuickCheckDetails {
    characters: usize,
    positions: [Position; MAX_QUICK_CHECK_CHARS],
    mask: u32,
    value: u32,
    cannot_match: bool,
}

impl QuickCheckDetails {
    pub fn new(characters: usize) -> Self {
        debug_assert!(characters <= MAX_QUICK_CHECK_CHARS);
        Self { characters, ..Default::default() }
    }

    #[inline]
    pub fn characters(&self) -> usize {
        self.characters
    }

    #[inline]
    #[cfg(test)]
    pub fn position(&self, index: usize) -> &Position {
        &self.positions[index]
    }

    #[inline]
    pub fn mask(&self) -> u32 {
        self.mask
    }

    #[inline]
    pub fn value(&self) -> u32 {
        self.value
    }

    /// True if no input can match at this point.
    #[inline]
    pub fn cannot_match(&self) -> bool {
        self.cannot_match
    }

    pub fn set_cannot_match(&mut self) {
        self.cannot_match = true;
    }

    /// Returns true if the code unit at `offset` is fully determined by
    /// the check.
    pub fn determined_already(&self, offset: u32) -> bool {
        (offset as usize) < self.characters
            && self.positions[offset as usize].determines_perfectly
    }

    /// Packs the positions into a single mask and value. Returns false if
    /// the check is useless because it wouldn't reject anything.
    pub fn rationalize(&mut self, one_byte: bool) -> bool {
        let char_mask = char_mask(one_byte);
        let char_bits = if one_byte { 8 } else { 16 };
        debug_assert!(self.characters * char_bits <= 32);
        let mut found_useful_op = false;
        self.mask = 0;
        self.value = 0;
        for (i, pos) in self.positions[..self.characters].iter().enumerate() {
            if pos.mask & MAX_ONE_BYTE_CHAR != 0 {
                found_useful_op = true;
            }
            let shift = i * char_bits;
            self.mask |= (pos.mask & char_mask) << shift;
            self.value |= (pos.value & char_mask) << shift;
        }
        found_useful_op
    }

    /// Merges the details of another alternative into this one, so that
    /// the result accepts anything that any of them accepts. Positions
    /// before `from_index` are left untouched.
    pub fn merge(&mut self, other: &QuickCheckDetails, from_index: usize) {
        debug_assert_eq!(self.characters, other.characters);
        if other.cannot_match {
            return;
        }
        if self.cannot_match {
            *self = *other;
            return;
        }
        for i in from_index..self.characters {
            let other_pos = other.positions[i];
            let pos = &mut self.positions[i];
            if pos.mask != other_pos.mask
                || pos.value != other_pos.value
                || !other_pos.determines_perfectly
            {
                pos.determines_perfectly = false;
            }
            pos.mask &= other_pos.mask;
            pos.value &= pos.mask;
            let differing_bits = pos.value ^ (other_pos.value & pos.mask);
            pos.mask &= !differing_bits;
            pos.value &= pos.mask;
        }
    }

    /// Drops the first `by` positions, which have been consumed.
    pub fn advance(&mut self, by: i32) {
        if by < 0 || by as usize >= self.characters {
            self.clear();
            return;
        }
        let by = by as usize;
        self.positions.copy_within(by..self.characters, 0);
        for pos in &mut self.positions[self.characters - by..self.characters] {
            *pos = Position::default();
        }
        self.characters -= by;
    }

    pub fn clear(&mut self) {
        for pos in &mut self.positions[..self.characters] {
            *pos = Position::default();
        }
        self.characters = 0;
    }
}

/// Computes [`QuickCheckDetails`] for nodes of a graph.
pub(crate) struct QuickCheck<'g> {
    graph: &'g Graph,
    one_byte: bool,
    ignore_case: bool,
    /// Loops currently being visited.
    visiting: FxHashSet<NodeId>,
}

impl<'g> QuickCheck<'g> {
    pub fn new(graph: &'g Graph, one_byte: bool, ignore_case: bool) -> Self {
        Self { graph, one_byte, ignore_case, visiting: FxHashSet::default() }
    }

    /// Fills `details` with what `node` tells about the code units that
    /// follow, starting at position `filled_in`.
    pub fn fill(
        &mut self,
        node: NodeId,
        details: &mut QuickCheckDetails,
        filled_in: usize,
        not_at_start: bool,
    ) {
        self.fill_budgeted(
            node,
            details,
            filled_in,
            not_at_start,
            QUICK_CHECK_BUDGET,
        )
    }

    fn fill_budgeted(
        &mut self,
        id: NodeId,
        details: &mut QuickCheckDetails,
        filled_in: usize,
        not_at_start: bool,
        budget: i32,
    ) {
        if budget <= 0 || filled_in >= details.characters() {
            return;
        }
        let graph = self.graph;
        match &graph.node(id).kind {
            NodeKind::End(_) | NodeKind::BackReference { .. } => {}
            NodeKind::Text { elements, ignore_case, on_success } => {
                let ignore_case = *ignore_case || self.ignore_case;
                if let Some(filled_in) =
                    self.fill_text(elements, ignore_case, details, filled_in)
                {
                    if !details.cannot_match() {
                        self.fill_budgeted(
                            *on_success,
                            details,
                            filled_in,
                            true,
                            budget - 1,
                        );
                    }
                }
            }
            NodeKind::Action { kind, on_success } => match kind {
                // The position is restored after a positive lookaround.
                ActionKind::PositiveSubmatchSuccess { .. } => {}
                _ => self.fill_budgeted(
                    *on_success,
                    details,
                    filled_in,
                    not_at_start,
                    budget - 1,
                ),
            },
            NodeKind::Assertion { kind, on_success } => {
                self.fill_budgeted(
                    *on_success,
                    details,
                    filled_in,
                    not_at_start,
                    budget - 1,
                );
                if *kind == AssertionKind::AtStart && not_at_start {
                    details.set_cannot_match();
                }
            }
            NodeKind::Choice { kind, alternatives, not_at_start: nas } => {
                let not_at_start = not_at_start || *nas;
                match kind {
                    ChoiceKind::NegativeLookaround => {
                        self.fill_budgeted(
                            alternatives[1].node,
                            details,
                            filled_in,
                            not_at_start,
                            budget - 1,
                        );
                    }
                    ChoiceKind::Loop { body_can_be_zero_length, .. } => {
                        if *body_can_be_zero_length
                            || !self.visiting.insert(id)
                        {
                            return;
                        }
                        self.fill_choice(
                            alternatives.iter().map(|alt| alt.node),
                            details,
                            filled_in,
                            not_at_start,
                            budget,
                        );
                        self.visiting.remove(&id);
                    }
                    ChoiceKind::Plain => self.fill_choice(
                        alternatives.iter().map(|alt| alt.node),
                        details,
                        filled_in,
                        not_at_start,
                        budget,
                    ),
                }
            }
        }
    }

    fn fill_choice(
        &mut self,
        mut alternatives: impl ExactSizeIterator<Item = NodeId>,
        details: &mut QuickCheckDetails,
        filled_in: usize,
        not_at_start: bool,
        budget: i32,
    ) {
        let budget = (budget - 1) / alternatives.len().max(1) as i32;
        let first = match alternatives.next() {
            Some(first) => first,
            None => return,
        };
        self.fill_budgeted(first, details, filled_in, not_at_start, budget);
        for alt in alternatives {
            let mut new_details = QuickCheckDetails::new(details.characters());
            self.fill_budgeted(
                alt,
                &mut new_details,
                filled_in,
                not_at_start,
                budget,
            );
            details.merge(&new_details, filled_in);
        }
    }

    /// Fills positions with the elements of a text node. Returns the number
    /// of positions filled so far, or `None` if every position has been
    /// filled or the text can't match.
    fn fill_text(
        &self,
        elements: &[crate::graph::TextElement],
        ignore_case: bool,
        details: &mut QuickCheckDetails,
        mut filled_in: usize,
    ) -> Option<usize> {
        let characters = details.characters();
        let char_mask = char_mask(self.one_byte);

        for element in elements {
            match &element.kind {
                TextElementKind::Atom(units) => {
                    for c in units.iter().take(characters) {
                        let pos = &mut details.positions[filled_in];
                        if ignore_case {
                            let chars: Vec<u32> = case_equivalents_of(*c)
                                .into_iter()
                                .filter(|c| *c <= char_mask)
                                .collect();
                            match chars.as_slice() {
                                [] => {
                                    pos.determines_perfectly = false;
                                    details.set_cannot_match();
                                    return None;
                                }
                                [c] => {
                                    pos.mask = char_mask;
                                    pos.value = *c;
                                    pos.determines_perfectly = true;
                                }
                                [first, rest @ ..] => {
                                    let mut common_bits = char_mask;
                                    let mut bits = *first;
                                    for c in rest {
                                        let differing_bits =
                                            (c & common_bits) ^ bits;
                                        common_bits ^= differing_bits;
                                        bits &= common_bits;
                                    }
                                    // With two letters and a single bit of
                                    // difference the check is exact.
                                    let one_zero = common_bits | !char_mask;
                                    if chars.len() == 2
                                        && (!one_zero & (!one_zero).wrapping_sub(1))
                                            == 0
                                    {
                                        pos.determines_perfectly = true;
                                    }
                                    pos.mask = common_bits;
                                    pos.value = bits;
                                }
                            }
                        } else {
                            if *c > char_mask {
                                pos.determines_perfectly = false;
                                details.set_cannot_match();
                                return None;
                            }
                            pos.mask = char_mask;
                            pos.value = *c;
                            pos.determines_perfectly = true;
                        }
                        filled_in += 1;
                        if filled_in == characters {
                            return None;
                        }
                    }
                }
                TextElementKind::Class(ranges) => {
                    let pos = &mut details.positions[filled_in];
                    let mut usable =
                        ranges.iter().filter(|r| r.from() <= char_mask);
                    match usable.next() {
                        None if !ranges.is_empty() => {
                            pos.determines_perfectly = false;
                            details.set_cannot_match();
                            return None;
                        }
                        None => {
                            pos.mask = 0;
                            pos.value = 0;
                        }
                        Some(first) => {
                            let from = first.from();
                            let to = first.to().min(char_mask);
                            let differing_bits = from ^ to;
                            // The check is exact only if the differing bits
                            // form a single block of trailing ones.
                            if differing_bits & (differing_bits.wrapping_add(1))
                                == 0
                                && from + differing_bits == to
                            {
                                pos.determines_perfectly = true;
                            }
                            let mut common_bits =
                                !smear_bits_right(differing_bits);
                            let mut bits = from & common_bits;
                            for range in usable {
                                let from = range.from();
                                let to = range.to().min(char_mask);
                                pos.determines_perfectly = false;
                                let new_common_bits =
                                    !smear_bits_right(from ^ to);
                                common_bits &= new_common_bits;
                                bits &= new_common_bits;
                                let differing_bits = (from & common_bits) ^ bits;
                                common_bits ^= differing_bits;
                                bits &= common_bits;
                            }
                            pos.mask = common_bits;
                            pos.value = bits;
                        }
                    }
                    filled_in += 1;
                    if filled_in == characters {
                        return None;
                    }
                }
            }
        }

        Some(filled_in)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Alternative, EndAction, TextElement};
    use crate::ranges::CharacterRange;
    use pretty_assertions::assert_eq;

    fn text(graph: &mut Graph, s: &str, next: NodeId) -> NodeId {
        graph.add(NodeKind::Text {
            elements: vec![TextElement {
                kind: TextElementKind::Atom(
                    s.chars().map(|c| c as u32).collect(),
                ),
                cp_offset: 0,
            }],
            ignore_case: false,
            on_success: next,
        })
    }

    fn class(graph: &mut Graph, ranges: &[(u32, u32)], next: NodeId) -> NodeId {
        graph.add(NodeKind::Text {
            elements: vec![TextElement {
                kind: TextElementKind::Class(
                    ranges
                        .iter()
                        .map(|(from, to)| CharacterRange::new(*from, *to))
                        .collect(),
                ),
                cp_offset: 0,
            }],
            ignore_case: false,
            on_success: next,
        })
    }

    /// Returns true if the packed input passes the check.
    fn accepts(details: &QuickCheckDetails, input: &[u32], one_byte: bool) -> bool {
        let bits = if one_byte { 8 } else { 16 };
        let packed = input
            .iter()
            .take(details.characters())
            .enumerate()
            .fold(0, |acc, (i, c)| acc | (c << (i * bits)));
        packed & details.mask() == details.value()
    }

    #[test]
    fn literal_text() {
        let mut graph = Graph::new();
        let accept = graph.add(NodeKind::End(EndAction::Accept));
        let node = text(&mut graph, "abc", accept);
        let mut details = QuickCheckDetails::new(2);
        QuickCheck::new(&graph, false, false).fill(node, &mut details, 0, false);
        assert!(details.rationalize(false));
        assert_eq!(details.mask(), 0xFFFF_FFFF);
        assert_eq!(details.value(), 'a' as u32 | ('b' as u32) << 16);
        assert!(details.determined_already(0));
        assert!(details.determined_already(1));
        assert!(!details.determined_already(2));
    }

    #[test]
    fn alternatives_are_merged_soundly() {
        let mut graph = Graph::new();
        let accept = graph.add(NodeKind::End(EndAction::Accept));
        let ab = text(&mut graph, "ab", accept);
        let cb = text(&mut graph, "cb", accept);
        let digit = class(&mut graph, &[(0x30, 0x39)], accept);
        let choice = graph.add(NodeKind::Choice {
            kind: ChoiceKind::Plain,
            alternatives: vec![
                Alternative::new(ab),
                Alternative::new(cb),
                Alternative::new(digit),
            ],
            not_at_start: false,
        });
        for one_byte in [false, true] {
            let mut details = QuickCheckDetails::new(2);
            QuickCheck::new(&graph, one_byte, false)
                .fill(choice, &mut details, 0, false);
            assert!(!details.cannot_match());
            details.rationalize(one_byte);
            assert!(!details.determined_already(0));
            for input in [
                &['a', 'b'][..],
                &['c', 'b'][..],
                &['0', 'x'][..],
                &['9', '9'][..],
            ] {
                let input: Vec<u32> = input.iter().map(|c| *c as u32).collect();
                assert!(accepts(&details, &input, one_byte), "{:?}", input);
            }
        }
    }

    #[test]
    fn ignore_case_letters() {
        let mut graph = Graph::new();
        let accept = graph.add(NodeKind::End(EndAction::Accept));
        let node = text(&mut graph, "a", accept);
        let mut details = QuickCheckDetails::new(1);
        QuickCheck::new(&graph, true, true).fill(node, &mut details, 0, false);
        details.rationalize(true);
        // 'a' and 'A' differ in a single bit.
        assert!(details.determined_already(0));
        assert!(accepts(&details, &['a' as u32], true));
        assert!(accepts(&details, &['A' as u32], true));
        assert!(!accepts(&details, &['b' as u32], true));
    }

    #[test]
    fn impossible_text_in_one_byte_mode() {
        let mut graph = Graph::new();
        let accept = graph.add(NodeKind::End(EndAction::Accept));
        let node = text(&mut graph, "\u{100}", accept);
        let mut details = QuickCheckDetails::new(1);
        QuickCheck::new(&graph, true, false).fill(node, &mut details, 0, false);
        assert!(details.cannot_match());
    }

    #[test]
    fn loops_terminate() {
        let mut graph = Graph::new();
        let accept = graph.add(NodeKind::End(EndAction::Accept));
        let center = graph.add(NodeKind::Choice {
            kind: ChoiceKind::Loop {
                loop_alternative: 0,
                body_can_be_zero_length: false,
            },
            alternatives: vec![],
            not_at_start: false,
        });
        let body = text(&mut graph, "x", center);
        if let NodeKind::Choice { alternatives, .. } =
            &mut graph.node_mut(center).kind
        {
            *alternatives = vec![Alternative::new(body), Alternative::new(accept)];
        }
        let mut details = QuickCheckDetails::new(2);
        QuickCheck::new(&graph, false, false).fill(center, &mut details, 0, false);
        assert!(!details.cannot_match());
        details.rationalize(false);
        assert!(accepts(&details, &['x' as u32, 'x' as u32], false));
        assert!(accepts(&details, &['y' as u32], false));
    }

    #[test]
    fn advance_shifts_positions() {
        let mut graph = Graph::new();
        let accept = graph.add(NodeKind::End(EndAction::Accept));
        let node = text(&mut graph, "abcd", accept);
        let mut details = QuickCheckDetails::new(4);
        QuickCheck::new(&graph, true, false).fill(node, &mut details, 0, false);
        details.advance(1);
        assert_eq!(details.characters(), 3);
        assert_eq!(details.position(0).value, 'b' as u32);
        details.advance(5);
        assert_eq!(details.characters(), 0);
    }
}
