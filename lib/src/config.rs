use serde::{Deserialize, Serialize};

/// Options that control how a regexp is compiled and executed.
///
/// The limits have sensible defaults and rarely need to be changed. They
/// exist for bounding the amount of work done with pathological patterns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Matches letters regardless of their case.
    pub ignore_case: bool,
    /// `^` and `$` match at line boundaries, not only at the start and end
    /// of the input.
    pub multiline: bool,
    /// The input is made of Latin-1 code units (`<= 0xFF`).
    pub one_byte: bool,
    /// Maximum number of specialized copies emitted for a node before
    /// falling back to its generic version.
    pub max_copies_per_node: u32,
    /// Maximum depth of recursive code emission. Deeper nodes are emitted
    /// later, from the work list.
    pub max_recursion: u32,
    /// Maximum nesting depth of a regexp. Deeper regexps are rejected with
    /// [`crate::Error::TooComplex`].
    pub max_depth: u32,
    /// Maximum number of siblings created for a single node.
    pub max_siblings: usize,
    /// Maximum number of distinct sets of alternatives that a choice can
    /// dispatch to.
    pub max_dispatch_groups: usize,
    /// Minimum number of alternatives a choice must have for emitting a
    /// dispatch on the next code unit.
    pub min_dispatch_alternatives: usize,
    /// Maximum number of backtracks during a single execution.
    pub backtrack_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ignore_case: false,
            multiline: false,
            one_byte: false,
            max_copies_per_node: 10,
            max_recursion: 100,
            max_depth: 2000,
            max_siblings: 8,
            max_dispatch_groups: 4,
            min_dispatch_alternatives: 3,
            backtrack_limit: 1_000_000,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the regexp case-insensitive.
    pub fn ignore_case(mut self, yes: bool) -> Self {
        self.ignore_case = yes;
        self
    }

    /// Makes `^` and `$` match at line boundaries.
    pub fn multiline(mut self, yes: bool) -> Self {
        self.multiline = yes;
        self
    }

    /// Compiles for inputs where every code unit is `<= 0xFF`.
    pub fn one_byte(mut self, yes: bool) -> Self {
        self.one_byte = yes;
        self
    }

    /// Sets the number of copies emitted for a node. Values lower than 2
    /// are raised to 2.
    pub fn max_copies_per_node(mut self, n: u32) -> Self {
        self.max_copies_per_node = n.max(2);
        self
    }

    pub fn max_recursion(mut self, n: u32) -> Self {
        self.max_recursion = n;
        self
    }

    pub fn max_depth(mut self, n: u32) -> Self {
        self.max_depth = n;
        self
    }

    pub fn max_siblings(mut self, n: usize) -> Self {
        self.max_siblings = n;
        self
    }

    pub fn max_dispatch_groups(mut self, n: usize) -> Self {
        self.max_dispatch_groups = n;
        self
    }

    pub fn min_dispatch_alternatives(mut self, n: usize) -> Self {
        self.min_dispatch_alternatives = n;
        self
    }

    pub fn backtrack_limit(mut self, n: usize) -> Self {
        self.backtrack_limit = n;
        self
    }
}
