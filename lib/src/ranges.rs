/*! Character ranges over UTF-16 code units.

A [`CharacterRange`] is an inclusive interval of code units. Lists of ranges
are said to be *canonical* when they are sorted by their lower bound and no
two ranges overlap or are adjacent. Most functions in this module either
produce canonical lists or expect them as input.
*/

use itertools::Itertools;
use regex_syntax::hir::{ClassUnicode, ClassUnicodeRange};
use smallvec::SmallVec;

/// Largest code unit in two-byte mode.
pub const MAX_CODE_UNIT: u32 = 0xFFFF;

/// Largest code unit in one-byte (Latin-1) mode.
pub const MAX_ONE_BYTE_CHAR: u32 = 0xFF;

/// Ranges of characters considered part of a word by `\b` and `\B`.
pub(crate) const WORD_RANGES: &[CharacterRange] = &[
    CharacterRange { from: '0' as u32, to: '9' as u32 },
    CharacterRange { from: 'A' as u32, to: 'Z' as u32 },
    CharacterRange { from: '_' as u32, to: '_' as u32 },
    CharacterRange { from: 'a' as u32, to: 'z' as u32 },
];

/// Ranges of line terminators (`\n`, `\r`, U+2028 and U+2029).
pub(crate) const LINE_TERMINATOR_RANGES: &[CharacterRange] = &[
    CharacterRange { from: 0x0A, to: 0x0A },
    CharacterRange { from: 0x0D, to: 0x0D },
    CharacterRange { from: 0x2028, to: 0x2029 },
];

/// Inclusive interval of code units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacterRange {
    from: u32,
    to: u32,
}

impl CharacterRange {
    /// Creates the range `[from, to]`.
    ///
    /// # Panics
    ///
    /// If `from` is greater than `to`.
    pub fn new(from: u32, to: u32) -> Self {
        assert!(from <= to, "invalid range [{:#x}, {:#x}]", from, to);
        Self { from, to }
    }

    /// Creates a range that contains a single code unit.
    pub fn singleton(c: u32) -> Self {
        Self { from: c, to: c }
    }

    /// Creates the range that covers every code unit.
    pub fn everything() -> Self {
        Self { from: 0, to: MAX_CODE_UNIT }
    }

    #[inline]
    pub fn from(&self) -> u32 {
        self.from
    }

    #[inline]
    pub fn to(&self) -> u32 {
        self.to
    }

    #[inline]
    pub fn contains(&self, c: u32) -> bool {
        self.from <= c && c <= self.to
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        self.from == self.to
    }

    /// Returns true if the range covers every code unit up to `max_char`.
    pub fn is_everything(&self, max_char: u32) -> bool {
        self.from == 0 && self.to >= max_char
    }

    /// Returns true if both ranges overlap or touch each other.
    pub fn touches(&self, other: &CharacterRange) -> bool {
        self.from <= other.to.saturating_add(1)
            && other.from <= self.to.saturating_add(1)
    }

    /// Returns the smallest range containing both `self` and `other`.
    ///
    /// The ranges are expected to overlap or be adjacent, otherwise the
    /// result would include code units that are in neither of them.
    pub fn union(&self, other: &CharacterRange) -> CharacterRange {
        debug_assert!(self.touches(other));
        CharacterRange {
            from: self.from.min(other.from),
            to: self.to.max(other.to),
        }
    }

    /// Returns a canonical list with the ranges that are case-equivalent
    /// to this one, including the range itself.
    ///
    /// Case folding follows Unicode simple case folding. Code units outside
    /// the Basic Multilingual Plane are never produced.
    pub fn equivalents(&self) -> Vec<CharacterRange> {
        if self.is_everything(MAX_CODE_UNIT) {
            return vec![*self];
        }

        let mut class_ranges = Vec::with_capacity(2);

        // Surrogates are not valid `char`s, so the range is split around
        // them before folding. The surrogates themselves have no case.
        if self.from < 0xD800 {
            push_char_range(&mut class_ranges, self.from, self.to.min(0xD7FF));
        }
        if self.to > 0xDFFF {
            push_char_range(&mut class_ranges, self.from.max(0xE000), self.to);
        }

        let mut class = ClassUnicode::new(class_ranges);
        let mut result = vec![*self];

        if class.try_case_fold_simple().is_ok() {
            for r in class.ranges() {
                let start = r.start() as u32;
                if start > MAX_CODE_UNIT {
                    break;
                }
                result.push(CharacterRange::new(
                    start,
                    (r.end() as u32).min(MAX_CODE_UNIT),
                ));
            }
        }

        canonicalize(&mut result);
        result
    }
}

fn push_char_range(ranges: &mut Vec<ClassUnicodeRange>, from: u32, to: u32) {
    if let (Some(from), Some(to)) = (char::from_u32(from), char::from_u32(to))
    {
        ranges.push(ClassUnicodeRange::new(from, to));
    }
}

/// Sorts the ranges and merges the ones that overlap or are adjacent,
/// leaving the list in canonical form.
pub fn canonicalize(ranges: &mut Vec<CharacterRange>) {
    if ranges.len() < 2 {
        return;
    }
    ranges.sort_unstable();
    let merged: Vec<CharacterRange> = ranges
        .drain(..)
        .coalesce(|a, b| {
            if a.touches(&b) {
                Ok(a.union(&b))
            } else {
                Err((a, b))
            }
        })
        .collect();
    *ranges = merged;
}

/// Returns the complement of a canonical list of ranges, within
/// `[0, max_char]`.
pub fn negate(ranges: &[CharacterRange], max_char: u32) -> Vec<CharacterRange> {
    let mut result = Vec::with_capacity(ranges.len() + 1);
    let mut next = 0;
    for range in ranges {
        if range.from > max_char {
            break;
        }
        if range.from > next {
            result.push(CharacterRange::new(next, range.from - 1));
        }
        next = range.to.saturating_add(1);
    }
    if next <= max_char {
        result.push(CharacterRange::new(next, max_char));
    }
    result
}

/// Removes from a canonical list of ranges every code unit greater than
/// `max_char`.
pub fn clip(ranges: &[CharacterRange], max_char: u32) -> Vec<CharacterRange> {
    ranges
        .iter()
        .filter(|r| r.from <= max_char)
        .map(|r| CharacterRange::new(r.from, r.to.min(max_char)))
        .collect()
}

/// Extends the ranges with all their case equivalents. The result is
/// canonical.
pub fn add_case_equivalents(ranges: &mut Vec<CharacterRange>) {
    let mut extra = Vec::new();
    for range in ranges.iter() {
        extra.extend(range.equivalents());
    }
    ranges.append(&mut extra);
    canonicalize(ranges);
}

/// Returns every code unit that is case-equivalent to `c`, including `c`
/// itself, in ascending order.
pub fn case_equivalents_of(c: u32) -> SmallVec<[u32; 4]> {
    CharacterRange::singleton(c)
        .equivalents()
        .iter()
        .flat_map(|r| r.from..=r.to)
        .collect()
}

/// Tells whether a set of code units is entirely made of word characters
/// (`Some(true)`), contains none of them (`Some(false)`), or is mixed
/// (`None`). The ranges must be canonical and non-empty.
pub(crate) fn word_relation(ranges: &[CharacterRange]) -> Option<bool> {
    let mut inside = false;
    let mut outside = false;
    for range in ranges {
        let mut c = range.from;
        loop {
            match WORD_RANGES.iter().find(|w| w.to >= c) {
                Some(w) if w.from <= c => {
                    inside = true;
                    if w.to >= range.to {
                        break;
                    }
                    c = w.to + 1;
                }
                Some(w) => {
                    outside = true;
                    if w.from > range.to {
                        break;
                    }
                    c = w.from;
                }
                None => {
                    outside = true;
                    break;
                }
            }
        }
        if inside && outside {
            return None;
        }
    }
    if ranges.is_empty() {
        None
    } else {
        Some(inside)
    }
}
