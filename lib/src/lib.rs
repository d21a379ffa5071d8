/*! A backtracking regular expression compiler.

Regular expressions are compiled in three phases:

1. The regexp [`Tree`] is lowered into a graph of nodes, where each node
   knows what must be tried after it succeeds.
2. An analysis pass works out which nodes care about the text that precedes
   them (`^`, `\b` and friends), and creates specialized copies of those
   nodes for the facts known at each point where they are reached.
3. The code generator walks the graph and drives a [`MacroAssembler`],
   deferring register writes and position changes as long as possible, and
   emitting quick checks and dispatch tables that reject failing
   alternatives early.

The bytecode assembler included in this crate produces a [`Program`] that
is executed by a small backtracking virtual machine.

# Example

```rust
use yara_x_regexp::{parse, Compiler, Config};

let config = Config::default();
let tree = parse("a(b|c)*d", &config).unwrap();
let regexp = Compiler::with_config(config).compile(&tree).unwrap();

let captures = regexp.exec_str("xxabcbd").unwrap().unwrap();

assert_eq!(captures.get(0), Some(2..7));
assert_eq!(captures.get(1), Some(5..6));
```
*/

use thiserror::Error;

pub use assembler::bytecode::{BytecodeAssembler, Instr, Program};
pub use assembler::{Label, MacroAssembler};
pub use compiler::{CompiledRegexp, Compiler, RegexpInfo};
pub use config::Config;
pub use interpreter::{Captures, ExecError};
pub use parser::parse;
pub use ranges::CharacterRange;
pub use tree::{Tree, TreeAssertion};

mod analysis;
mod assembler;
mod codegen;
mod compiler;
mod config;
mod dispatch;
mod graph;
mod interpreter;
mod parser;
mod quick_check;
mod ranges;
mod trace;
mod tree;

#[cfg(test)]
mod tests;

/// Free stack space below which recursive functions switch to a new stack
/// segment.
const STACK_RED_ZONE: usize = 64 * 1024;

/// Size of each new stack segment.
const STACK_SEGMENT_SIZE: usize = 1024 * 1024;

/// Runs `f`, growing the stack first if it is about to run out. Used by the
/// functions that recurse once per nesting level of a regexp.
pub(crate) fn ensure_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT_SIZE, f)
}

/// Errors returned while compiling a regexp.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The regexp is nested too deeply.
    #[error("regexp too complex: {0}")]
    TooComplex(String),

    /// The regular expression is too large.
    #[error("regexp too large")]
    TooLarge,

    /// The regexp uses a construct that can't be compiled.
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    /// The regexp couldn't be parsed.
    #[error("syntax error: {0}")]
    Syntax(String),
}
