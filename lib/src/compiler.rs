/*! The compiler driver.

[`Compiler`] takes a regexp [`Tree`] through the whole pipeline: lowering
into a node graph, assertion-interest analysis and code generation. The
result is a [`CompiledRegexp`] that can be executed by the interpreter
included in this crate. Other targets are supported by passing a custom
[`MacroAssembler`] to [`Compiler::compile_to`].
*/

use log::*;

use crate::analysis::analyze;
use crate::assembler::bytecode::{BytecodeAssembler, Program};
use crate::assembler::MacroAssembler;
use crate::codegen::Codegen;
use crate::graph::lower::Lowering;
use crate::interpreter::{Captures, ExecError, Interpreter};
use crate::tree::Tree;
use crate::{Config, Error};

/// Properties of a compiled regexp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegexpInfo {
    /// Number of registers used by the code, including the capture
    /// registers.
    pub register_count: u32,
    /// Number of capture groups, excluding the implicit group 0.
    pub capture_count: u32,
    /// True if the regexp has no captures and no back-references.
    pub is_simple: bool,
    /// True if every match starts at the start of the input.
    pub is_anchored: bool,
}

/// Compiles regexp trees.
#[derive(Debug, Default)]
pub struct Compiler {
    config: Config,
}

impl Compiler {
    /// Creates a compiler with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a compiler with the given configuration.
    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    /// Returns the configuration used by the compiler.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Compiles a regexp into bytecode.
    pub fn compile(&self, tree: &Tree) -> Result<CompiledRegexp, Error> {
        let asm = BytecodeAssembler::new(self.config.one_byte);
        let (asm, info) = self.compile_to(tree, asm)?;
        let program = asm.finish()?;

        debug!(
            "regexp compiled: {} instructions, {} registers, {} captures",
            program.code().len(),
            info.register_count,
            info.capture_count,
        );

        Ok(CompiledRegexp {
            program,
            info,
            backtrack_limit: self.config.backtrack_limit,
        })
    }

    /// Compiles a regexp with the given assembler, which is returned once
    /// the code has been emitted.
    pub fn compile_to<A: MacroAssembler>(
        &self,
        tree: &Tree,
        asm: A,
    ) -> Result<(A, RegexpInfo), Error> {
        let capture_count = tree.capture_count();

        let mut lowering = Lowering::new(&self.config, capture_count);
        let entry = lowering.lower_pattern(tree)?;
        let is_anchored = lowering.is_anchored(tree);
        let (mut graph, register_count) = lowering.finish();

        let nodes_before_analysis = graph.len();
        let (entry, _) = analyze(&mut graph, entry, &self.config);

        debug!(
            "regexp graph: {} nodes, {} created by analysis",
            graph.len(),
            graph.len() - nodes_before_analysis,
        );

        let (asm, _) = Codegen::new(&graph, &self.config, asm).generate(entry)?;

        let info = RegexpInfo {
            register_count,
            capture_count,
            is_simple: capture_count == 0 && !tree.contains_back_reference(),
            is_anchored,
        };

        Ok((asm, info))
    }
}

/// A regexp compiled into bytecode.
#[derive(Debug)]
pub struct CompiledRegexp {
    program: Program,
    info: RegexpInfo,
    backtrack_limit: usize,
}

impl CompiledRegexp {
    /// Returns the bytecode of the regexp.
    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn info(&self) -> &RegexpInfo {
        &self.info
    }

    pub fn register_count(&self) -> u32 {
        self.info.register_count
    }

    pub fn capture_count(&self) -> u32 {
        self.info.capture_count
    }

    pub fn is_simple(&self) -> bool {
        self.info.is_simple
    }

    pub fn is_anchored(&self) -> bool {
        self.info.is_anchored
    }

    /// Searches for the leftmost match in `input`, starting at `start`.
    /// Positions in the returned captures are code unit offsets.
    pub fn exec(
        &self,
        input: &[u16],
        start: usize,
    ) -> Result<Option<Captures>, ExecError> {
        if start > input.len() {
            return Ok(None);
        }
        Interpreter::new(
            &self.program,
            input,
            self.info.register_count as usize,
            self.backtrack_limit,
        )
        .run(start, self.info.capture_count as usize)
    }

    /// Like [`CompiledRegexp::exec`], but the input is a string, which is
    /// encoded as UTF-16 in normal mode and as Latin-1 in one-byte mode.
    pub fn exec_str(&self, input: &str) -> Result<Option<Captures>, ExecError> {
        let input: Vec<u16> = if self.program.one_byte() {
            let mut units = Vec::with_capacity(input.len());
            for c in input.chars() {
                let c = u16::try_from(u32::from(c))
                    .map_err(|_| ExecError::NonLatin1Input)?;
                units.push(c);
            }
            units
        } else {
            input.encode_utf16().collect()
        };
        self.exec(&input, 0)
    }
}
