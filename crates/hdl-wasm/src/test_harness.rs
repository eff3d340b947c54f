//! Test harness for hdl-wasm unit and integration tests.
//!
//! This module provides builders for IR modules plus compile-and-run
//! helpers. It is only available when running tests or when the
//! `test-harness` feature is enabled.
//!
//! # Example
//!
//! ```rust
//! use hdl_wasm::test_harness::*;
//!
//! let module = ModuleBuilder::new("adder")
//!     .input("a", 8)
//!     .input("b", 8)
//!     .output("sum", 8)
//!     .block("_eval", vec![assign(var("sum"), add(8, var("a"), var("b")))])
//!     .build();
//! let mut sim = run(&module);
//! sim.poke_scalar("a", 3).unwrap();
//! sim.poke_scalar("b", 4).unwrap();
//! sim.eval().unwrap();
//! assert_eq!(sim.peek_scalar("sum").unwrap(), 7);
//! ```

#![allow(clippy::must_use_candidate, clippy::missing_panics_doc)]

use num_bigint::BigUint;

use crate::ir::{
    BinaryOp, BlockDef, ConstExpr, DataType, Expr, ModuleDef, TernaryOp, UnaryOp, VarDef,
};
use crate::runtime::{Sim, SimOptions};
use crate::translate::{CompileOptions, CompiledModule};

// ── Types ──

pub fn logic(width: u32) -> DataType {
    DataType::logic(width)
}

pub fn logic_s(width: u32) -> DataType {
    DataType::logic_signed(width)
}

pub fn array_of(elem: DataType, count: u32) -> DataType {
    DataType::array(elem, 0, count as i32 - 1)
}

// ── Expressions ──

pub fn var(name: &str) -> Expr {
    Expr::var(name)
}

pub fn num(width: u32, value: u64) -> Expr {
    Expr::constant(logic(width), value)
}

pub fn num_s(width: u32, value: u64) -> Expr {
    Expr::constant(logic_s(width), value)
}

pub fn big(width: u32, value: BigUint) -> Expr {
    let low = value.to_u64_digits().first().copied().unwrap_or(0);
    Expr::Const(ConstExpr {
        dtype: logic(width),
        cvalue: low,
        bigvalue: Some(value),
    })
}

pub fn binop(kind: BinaryOp, dtype: DataType, left: Expr, right: Expr) -> Expr {
    Expr::Binop {
        kind,
        dtype,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Assignment; the node dtype is irrelevant, the target drives the store.
pub fn assign(lhs: Expr, rhs: Expr) -> Expr {
    binop(BinaryOp::Assign, logic(1), lhs, rhs)
}

pub fn add(width: u32, l: Expr, r: Expr) -> Expr {
    binop(BinaryOp::Add, logic(width), l, r)
}

pub fn sub(width: u32, l: Expr, r: Expr) -> Expr {
    binop(BinaryOp::Sub, logic(width), l, r)
}

pub fn shl(width: u32, l: Expr, r: Expr) -> Expr {
    binop(BinaryOp::Shl, logic(width), l, r)
}

pub fn shr(width: u32, l: Expr, r: Expr) -> Expr {
    binop(BinaryOp::Shr, logic(width), l, r)
}

pub fn compare(kind: BinaryOp, l: Expr, r: Expr) -> Expr {
    binop(kind, logic(1), l, r)
}

pub fn arraysel(elem: DataType, arr: Expr, idx: Expr) -> Expr {
    binop(BinaryOp::ArraySel, elem, arr, idx)
}

pub fn unop(kind: UnaryOp, dtype: DataType, arg: Expr) -> Expr {
    Expr::Unop {
        kind,
        dtype,
        from_width: None,
        arg: Box::new(arg),
    }
}

pub fn not(width: u32, arg: Expr) -> Expr {
    unop(UnaryOp::Not, logic(width), arg)
}

pub fn extends(from_width: u32, dtype: DataType, arg: Expr) -> Expr {
    Expr::Unop {
        kind: UnaryOp::Extends,
        dtype,
        from_width: Some(from_width),
        arg: Box::new(arg),
    }
}

pub fn if_(cond: Expr, then: Expr) -> Expr {
    Expr::Triop {
        kind: TernaryOp::If,
        dtype: None,
        cond: Box::new(cond),
        left: Box::new(then),
        right: None,
    }
}

pub fn if_else(cond: Expr, then: Expr, other: Expr) -> Expr {
    Expr::Triop {
        kind: TernaryOp::If,
        dtype: None,
        cond: Box::new(cond),
        left: Box::new(then),
        right: Some(Box::new(other)),
    }
}

pub fn cond(dtype: DataType, c: Expr, then: Expr, other: Expr) -> Expr {
    Expr::Triop {
        kind: TernaryOp::Cond,
        dtype: Some(dtype),
        cond: Box::new(c),
        left: Box::new(then),
        right: Some(Box::new(other)),
    }
}

pub fn block(exprs: Vec<Expr>) -> Expr {
    Expr::Block { name: None, exprs }
}

/// Block-local variable declaration.
pub fn decl(name: &str, width: u32) -> Expr {
    Expr::VarDecl {
        def: VarDef::new(name, logic(width)),
    }
}

pub fn while_(loopcond: Expr, body: Expr, inc: Expr) -> Expr {
    Expr::While {
        precond: None,
        loopcond: Box::new(loopcond),
        inc: Some(Box::new(inc)),
        body: Box::new(body),
    }
}

pub fn changedet(current: Expr, shadow: Expr) -> Expr {
    binop(BinaryOp::ChangeDet, logic(1), current, shadow)
}

pub fn creset(width: u32, target: Expr) -> Expr {
    unop(UnaryOp::Creset, logic(width), target)
}

pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::FuncCall {
        name: name.to_owned(),
        args,
        line: None,
    }
}

/// `if (clk && !clk_prev) { body... } clk_prev = clk`, the standard
/// positive-edge guard used by clocked test modules.
pub fn on_posedge(body: Vec<Expr>) -> Vec<Expr> {
    vec![
        if_(
            binop(
                BinaryOp::And,
                logic(1),
                var("clk"),
                not(1, var("clk_prev")),
            ),
            block(body),
        ),
        assign(var("clk_prev"), var("clk")),
    ]
}

// ── Module builder ──

pub struct ModuleBuilder {
    name: String,
    vardefs: Vec<VarDef>,
    blocks: Vec<BlockDef>,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            vardefs: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn input(mut self, name: &str, width: u32) -> Self {
        let mut def = VarDef::new(name, logic(width));
        def.is_input = true;
        self.vardefs.push(def);
        self
    }

    pub fn output(mut self, name: &str, width: u32) -> Self {
        let mut def = VarDef::new(name, logic(width));
        def.is_output = true;
        self.vardefs.push(def);
        self
    }

    pub fn signal(self, name: &str, width: u32) -> Self {
        self.signal_typed(name, logic(width))
    }

    pub fn signal_signed(self, name: &str, width: u32) -> Self {
        self.signal_typed(name, logic_s(width))
    }

    pub fn signal_typed(mut self, name: &str, dtype: DataType) -> Self {
        self.vardefs.push(VarDef::new(name, dtype));
        self
    }

    pub fn constant(mut self, name: &str, width: u32, value: u64) -> Self {
        let mut def = VarDef::new(name, logic(width));
        def.const_value = Some(ConstExpr::new(logic(width), value));
        self.vardefs.push(def);
        self
    }

    /// A clocked module: adds `clk` plus the `clk_prev` shadow.
    pub fn clocked(self) -> Self {
        self.input("clk", 1).signal("clk_prev", 1)
    }

    pub fn block(mut self, name: &str, exprs: Vec<Expr>) -> Self {
        self.blocks.push(BlockDef {
            name: name.to_owned(),
            exprs,
        });
        self
    }

    pub fn build(self) -> ModuleDef {
        ModuleDef {
            name: self.name,
            vardefs: self.vardefs,
            blocks: self.blocks,
        }
    }
}

// ── Compile and run ──

pub fn compile_module(module: &ModuleDef) -> crate::Result<CompiledModule> {
    crate::translate::compile(module, None)
}

pub fn compile_with(
    module: &ModuleDef,
    options: &CompileOptions,
) -> crate::Result<CompiledModule> {
    crate::translate::compile_with_options(module, None, options)
}

/// Compile and instantiate; panics on failure so tests stay terse.
pub fn instantiate(module: &ModuleDef) -> Sim {
    let compiled = compile_module(module).expect("compile");
    Sim::new(compiled).expect("instantiate")
}

/// Compile, instantiate and powercycle.
pub fn run(module: &ModuleDef) -> Sim {
    let mut sim = instantiate(module);
    sim.powercycle().expect("powercycle");
    sim
}

/// Like `run` but with a `$readmem` file table.
pub fn run_with_files(module: &ModuleDef, files: Vec<(String, String)>) -> Sim {
    let compiled = compile_module(module).expect("compile");
    let lookup: crate::runtime::FileLookup = Box::new(move |name: &str| {
        files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, content)| content.clone())
    });
    let mut sim = Sim::with_options(
        compiled,
        SimOptions {
            seed: Some(0),
            get_file: Some(lookup),
        },
    )
    .expect("instantiate");
    sim.powercycle().expect("powercycle");
    sim
}
