/*! Dispatch tables.

A [`DispatchTable`] maps disjoint ranges of code units to the set of
alternatives of a [`NodeKind::Choice`] that may match when the next code
unit is in that range. Sets of alternatives are represented by
[`OutSetId`]s, which are interned in an [`OutSets`] arena: two ids are equal
if and only if the sets they represent have the same members, regardless of
the order in which those members were added.
*/

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::graph::{ChoiceKind, Graph, NodeId, NodeKind, TextElementKind};
use crate::ranges::{canonicalize, CharacterRange};

/// Values smaller than this are stored in a bitmask, larger ones go to a
/// sorted vector.
const FIRST_LIMIT: u32 = 32;

/// A set of alternative indexes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct OutSet {
    first: u32,
    remaining: Vec<u32>,
}

impl OutSet {
    /// Returns true if `value` is in the set.
    pub fn get(&self, value: u32) -> bool {
        if value < FIRST_LIMIT {
            self.first & (1 << value) != 0
        } else {
            self.remaining.binary_search(&value).is_ok()
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.first == 0 && self.remaining.is_empty()
    }

    /// Iterates over the members of the set in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..FIRST_LIMIT)
            .filter(|i| self.first & (1 << i) != 0)
            .chain(self.remaining.iter().copied())
    }

    fn with(&self, value: u32) -> OutSet {
        let mut result = self.clone();
        if value < FIRST_LIMIT {
            result.first |= 1 << value;
        } else if let Err(pos) = result.remaining.binary_search(&value) {
            result.remaining.insert(pos, value);
        }
        result
    }
}

/// Identifies an [`OutSet`] within an [`OutSets`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct OutSetId(u32);

/// Arena of interned [`OutSet`]s.
///
/// The result of extending a set with a value is cached, so repeating the
/// same extension returns the same id without building a new set.
#[derive(Debug)]
pub(crate) struct OutSets {
    sets: Vec<OutSet>,
    interned: FxHashMap<OutSet, OutSetId>,
    successors: FxHashMap<(OutSetId, u32), OutSetId>,
}

impl Default for OutSets {
    fn default() -> Self {
        Self::new()
    }
}

impl OutSets {
    /// The empty set.
    pub const EMPTY: OutSetId = OutSetId(0);

    pub fn new() -> Self {
        let mut interned = FxHashMap::default();
        interned.insert(OutSet::default(), Self::EMPTY);
        Self {
            sets: vec![OutSet::default()],
            interned,
            successors: FxHashMap::default(),
        }
    }

    #[inline]
    pub fn get(&self, id: OutSetId) -> &OutSet {
        &self.sets[id.0 as usize]
    }

    /// Returns the id of the set that contains the members of `id` plus
    /// `value`.
    pub fn extend(&mut self, id: OutSetId, value: u32) -> OutSetId {
        if self.get(id).get(value) {
            return id;
        }
        if let Some(successor) = self.successors.get(&(id, value)) {
            return *successor;
        }
        let set = self.get(id).with(value);
        let successor = match self.interned.get(&set) {
            Some(existing) => *existing,
            None => {
                let new_id = OutSetId(self.sets.len() as u32);
                self.sets.push(set.clone());
                self.interned.insert(set, new_id);
                new_id
            }
        };
        self.successors.insert((id, value), successor);
        successor
    }
}

/// An entry in a [`DispatchTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Entry {
    pub from: u32,
    pub to: u32,
    pub out_set: OutSetId,
}

/// Maps disjoint ranges of code units to sets of alternatives.
#[derive(Clone, Debug, Default)]
pub(crate) struct DispatchTable {
    tree: BTreeMap<u32, Entry>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` to the set associated to every code unit in `range`.
    ///
    /// Entries that partially overlap with `range` are split, so that the
    /// entries in the table remain disjoint and every code unit in `range`
    /// is covered.
    pub fn add_range(
        &mut self,
        range: CharacterRange,
        value: u32,
        out_sets: &mut OutSets,
    ) {
        let mut from = range.from();
        let to = range.to();

        // If an entry that starts before `range` overlaps with it, split
        // that entry at `from`.
        if let Some(left) = self.tree.range(..from).next_back().map(|(_, e)| *e)
        {
            if left.to >= from {
                self.tree.insert(left.from, Entry { to: from - 1, ..left });
                self.tree.insert(from, Entry { from, ..left });
            }
        }

        loop {
            let next = self.tree.range(from..).next().map(|(_, e)| *e);
            match next {
                Some(mut entry) if entry.from <= to => {
                    // Fill the gap before the next entry.
                    if from < entry.from {
                        self.tree.insert(
                            from,
                            Entry {
                                from,
                                to: entry.from - 1,
                                out_set: out_sets.extend(OutSets::EMPTY, value),
                            },
                        );
                    }
                    // Split the entry if it extends past the range.
                    if entry.to > to {
                        self.tree.insert(to + 1, Entry { from: to + 1, ..entry });
                        entry.to = to;
                    }
                    entry.out_set = out_sets.extend(entry.out_set, value);
                    self.tree.insert(entry.from, entry);
                    if entry.to >= to {
                        break;
                    }
                    from = entry.to + 1;
                }
                _ => {
                    self.tree.insert(
                        from,
                        Entry {
                            from,
                            to,
                            out_set: out_sets.extend(OutSets::EMPTY, value),
                        },
                    );
                    break;
                }
            }
        }
    }

    /// Returns the set associated to code unit `c`. Code units not covered
    /// by any entry are mapped to [`OutSets::EMPTY`].
    #[cfg(test)]
    pub fn get(&self, c: u32) -> OutSetId {
        match self.tree.range(..=c).next_back() {
            Some((_, entry)) if entry.to >= c => entry.out_set,
            _ => OutSets::EMPTY,
        }
    }

    /// Iterates over the entries in ascending order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.tree.values()
    }
}

/// Returns a canonical list of ranges that contains every code unit that
/// can be the first one consumed by a match starting at `node`.
///
/// Nodes that don't consume input, but may succeed without any input
/// (assertions, back-references and end nodes), contribute every code
/// unit, as the next code unit can be anything.
pub(crate) fn first_character_set(
    graph: &Graph,
    node: NodeId,
    ignore_case: bool,
) -> Vec<CharacterRange> {
    let mut ranges = Vec::new();
    let mut visited = FxHashSet::default();
    let mut pending = vec![node];

    while let Some(id) = pending.pop() {
        if !visited.insert(id) {
            continue;
        }
        match &graph.node(id).kind {
            NodeKind::Text { elements, ignore_case: text_ignore_case, .. } => {
                match elements.first().map(|e| &e.kind) {
                    Some(TextElementKind::Atom(units)) => {
                        if let Some(c) = units.first() {
                            let range = CharacterRange::singleton(*c);
                            if ignore_case || *text_ignore_case {
                                ranges.extend(range.equivalents());
                            } else {
                                ranges.push(range);
                            }
                        }
                    }
                    Some(TextElementKind::Class(class)) => {
                        ranges.extend_from_slice(class)
                    }
                    None => ranges.push(CharacterRange::everything()),
                }
            }
            NodeKind::Action { on_success, .. } => pending.push(*on_success),
            NodeKind::Choice { kind, alternatives, .. } => match kind {
                // The body of a negative lookaround only tells what must
                // not follow.
                ChoiceKind::NegativeLookaround => {
                    pending.push(alternatives[1].node)
                }
                _ => pending.extend(alternatives.iter().map(|alt| alt.node)),
            },
            NodeKind::Assertion { .. }
            | NodeKind::BackReference { .. }
            | NodeKind::End(_) => {
                return vec![CharacterRange::everything()];
            }
        }
    }

    canonicalize(&mut ranges);
    ranges
}

/// Builds the dispatch table for a choice node. Each code unit is mapped to
/// the alternatives whose first character set contains it.
///
/// # Panics
///
/// If `choice` is not a [`NodeKind::Choice`].
pub(crate) fn build_dispatch_table(
    graph: &Graph,
    choice: NodeId,
    ignore_case: bool,
    out_sets: &mut OutSets,
) -> DispatchTable {
    let alternatives = match &graph.node(choice).kind {
        NodeKind::Choice { alternatives, .. } => alternatives,
        _ => panic!("dispatch tables can be built only for choice nodes"),
    };
    let mut table = DispatchTable::new();
    for (i, alt) in alternatives.iter().enumerate() {
        for range in first_character_set(graph, alt.node, ignore_case) {
            table.add_range(range, i as u32, out_sets);
        }
    }
    table
}
