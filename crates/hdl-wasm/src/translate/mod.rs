// Offset arithmetic routinely converts between u32/i32/u64.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

pub mod codegen;
pub mod memory_layout;
pub mod peephole;
pub mod wasm_module;
pub mod wide;

use std::collections::HashMap;

use crate::ir::ModuleDef;
use crate::{Error, Result};

pub use memory_layout::{StateLayout, VarSlot};

/// Evaluation blocks the emitter looks up by name. Missing ones are
/// synthesized empty so the export contract always holds.
pub const BLOCK_CTOR: &str = "_ctor_var_reset";
pub const BLOCK_INITIAL: &str = "_eval_initial";
pub const BLOCK_SETTLE: &str = "_eval_settle";
pub const BLOCK_EVAL: &str = "_eval";
pub const BLOCK_CHANGE: &str = "_change_request";

pub const SPECIAL_BLOCKS: [&str; 5] = [
    BLOCK_CTOR,
    BLOCK_INITIAL,
    BLOCK_SETTLE,
    BLOCK_EVAL,
    BLOCK_CHANGE,
];

/// Imported builtin function indices; local functions follow.
pub const IMPORT_FINISH: u32 = 0;
pub const IMPORT_STOP: u32 = 1;
pub const IMPORT_TIME: u32 = 2;
pub const IMPORT_RAND: u32 = 3;
pub const IMPORT_READMEM: u32 = 4;
pub const NUM_IMPORTS: u32 = 5;

/// Options for compilation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Hard cap on linear memory, in megabytes.
    pub max_memory_mb: u32,
    /// Number of records the trace ring buffer holds.
    pub trace_depth: u32,
    /// Depth of the generated `eval` fixed-point nesting.
    pub max_eval_iterations: u32,
    /// Iteration cap carried by every generated `while` loop.
    pub loop_limit: u32,
    /// Run the instruction peephole over emitted bodies.
    pub peephole: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_memory_mb: 16,
            trace_depth: 64,
            max_eval_iterations: 8,
            loop_limit: 10_000,
            peephole: true,
        }
    }
}

impl CompileOptions {
    #[must_use]
    pub fn max_memory_bytes(&self) -> u64 {
        u64::from(self.max_memory_mb) * 1024 * 1024
    }
}

/// Function index table: IR block names to WASM function indices, plus the
/// three helpers. Built before any body is emitted so calls resolve forward.
#[derive(Debug, Clone)]
pub struct FuncTable {
    by_name: HashMap<String, u32>,
    /// Block names in emission order.
    pub block_names: Vec<String>,
    pub copy_trace_rec: u32,
    pub eval: u32,
    pub tick2: u32,
}

impl FuncTable {
    pub fn build(module: &ModuleDef) -> Result<Self> {
        let mut by_name = HashMap::new();
        let mut block_names = Vec::new();
        let mut next = NUM_IMPORTS;

        for block in &module.blocks {
            if by_name.contains_key(&block.name) {
                return Err(Error::Internal(format!(
                    "duplicate block name {}",
                    block.name
                )));
            }
            by_name.insert(block.name.clone(), next);
            block_names.push(block.name.clone());
            next += 1;
        }
        for name in SPECIAL_BLOCKS {
            if !by_name.contains_key(name) {
                by_name.insert(name.to_owned(), next);
                block_names.push(name.to_owned());
                next += 1;
            }
        }

        let copy_trace_rec = next;
        let eval = next + 1;
        let tick2 = next + 2;
        Ok(Self {
            by_name,
            block_names,
            copy_trace_rec,
            eval,
            tick2,
        })
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn index_of(&self, name: &str) -> Result<u32> {
        self.lookup(name)
            .ok_or_else(|| Error::Internal(format!("no function for block {name}")))
    }
}

/// Result of compilation: the WASM binary plus the layout the runtime needs
/// to drive it.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub name: String,
    pub wasm: Vec<u8>,
    pub layout: StateLayout,
    /// Set when the module has a `clk` variable; `tick2` then toggles it.
    pub has_clk: bool,
    pub options: CompileOptions,
}

pub fn compile(module: &ModuleDef, pool: Option<&ModuleDef>) -> Result<CompiledModule> {
    compile_with_options(module, pool, &CompileOptions::default())
}

pub fn compile_with_options(
    module: &ModuleDef,
    pool: Option<&ModuleDef>,
    options: &CompileOptions,
) -> Result<CompiledModule> {
    wasm_module::emit_module(module, pool, options)
}
