//! Scalar expression translation (operand width <= 64).
//!
//! One `BlockCompiler` per IR block turns the expression tree into a flat
//! WASM instruction buffer. Values up to 64 bits travel on the WASM value
//! stack in an i32 or i64 container; the declared bit width only matters at
//! store time, where the destination width drives masking. Anything wider
//! never touches the value stack and is routed to the wide path (`wide.rs`),
//! which works on chunk addresses.

use std::collections::HashMap;

use wasm_encoder::{BlockType, Instruction, MemArg, ValType};

use super::{
    CompileOptions, FuncTable, IMPORT_FINISH, IMPORT_RAND, IMPORT_READMEM, IMPORT_STOP,
    IMPORT_TIME, StateLayout,
};
use crate::ir::{BinaryOp, BlockDef, DataType, Expr, NativeType, TernaryOp, UnaryOp, VarDef};
use crate::{Error, Result};

/// Local index of the data pointer parameter, present in every function.
pub const DATAPTR: u32 = 0;

/// Scalar container on the WASM value stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scalar {
    I32,
    I64,
}

pub(crate) fn container(dtype: &DataType) -> Result<Scalar> {
    match dtype.native() {
        NativeType::I32 => Ok(Scalar::I32),
        NativeType::I64 => Ok(Scalar::I64),
        NativeType::Ref => Err(Error::UnsupportedDataType(format!(
            "{dtype} used in scalar context"
        ))),
    }
}

pub(crate) fn memarg(offset: u32, align: u32) -> MemArg {
    MemArg {
        offset: u64::from(offset),
        align,
        memory_index: 0,
    }
}

/// Per-function local bookkeeping: the data pointer parameter, named locals
/// from `VarDecl`s, and scratch locals for emitted sequences.
pub struct LocalScope {
    n_params: u32,
    types: Vec<ValType>,
    named: HashMap<String, (u32, DataType)>,
    keyed: HashMap<&'static str, u32>,
}

impl LocalScope {
    #[must_use]
    pub fn new(n_params: u32) -> Self {
        Self {
            n_params,
            types: Vec::new(),
            named: HashMap::new(),
            keyed: HashMap::new(),
        }
    }

    pub fn add(&mut self, ty: ValType) -> u32 {
        let idx = self.n_params + self.types.len() as u32;
        self.types.push(ty);
        idx
    }

    pub fn declare(&mut self, name: &str, dtype: &DataType, ty: ValType) -> u32 {
        if let Some((idx, _)) = self.named.get(name) {
            return *idx;
        }
        let idx = self.add(ty);
        self.named.insert(name.to_owned(), (idx, dtype.clone()));
        idx
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<(u32, &DataType)> {
        self.named.get(name).map(|(idx, dt)| (*idx, dt))
    }

    /// Keyed scratch local, allocated once per function and reused.
    /// Only safe for straight-line sequences that finish with the value.
    pub fn scratch(&mut self, key: &'static str, ty: ValType) -> u32 {
        if let Some(idx) = self.keyed.get(key) {
            return *idx;
        }
        let idx = self.add(ty);
        self.keyed.insert(key, idx);
        idx
    }

    /// A never-reused i32 local; used for addresses that stay live across
    /// nested emission (wide operand materialization recurses).
    pub fn fresh_i32(&mut self) -> u32 {
        self.add(ValType::I32)
    }

    /// Run-length encoded local declarations for the code section.
    #[must_use]
    pub fn compressed(&self) -> Vec<(u32, ValType)> {
        let mut out: Vec<(u32, ValType)> = Vec::new();
        for ty in &self.types {
            match out.last_mut() {
                Some((count, last)) if *last == *ty => *count += 1,
                _ => out.push((1, *ty)),
            }
        }
        out
    }
}

pub struct BlockCompiler<'a> {
    pub(crate) layout: &'a mut StateLayout,
    pub(crate) funcs: &'a FuncTable,
    pub(crate) options: &'a CompileOptions,
    pub(crate) body: Vec<Instruction<'static>>,
    pub(crate) locals: LocalScope,
    pub(crate) changed_local: Option<u32>,
}

impl<'a> BlockCompiler<'a> {
    pub fn new(
        layout: &'a mut StateLayout,
        funcs: &'a FuncTable,
        options: &'a CompileOptions,
    ) -> Self {
        Self {
            layout,
            funcs,
            options,
            body: Vec::new(),
            locals: LocalScope::new(1),
            changed_local: None,
        }
    }

    /// Translate one IR block. `_change_request` gets a changed-flag local
    /// returned as the function result.
    pub fn compile_block(mut self, block: &BlockDef, is_change_request: bool) -> Result<FuncBody> {
        if is_change_request {
            let flag = self.locals.scratch("changed", ValType::I32);
            self.changed_local = Some(flag);
        }
        for e in &block.exprs {
            self.stmt(e)?;
        }
        if let Some(flag) = self.changed_local {
            self.emit(Instruction::LocalGet(flag));
        }
        Ok(FuncBody {
            instructions: self.body,
            locals: self.locals.compressed(),
        })
    }

    pub(crate) fn emit(&mut self, instr: Instruction<'static>) {
        self.body.push(instr);
    }

    // ── Statements ──

    pub(crate) fn stmt(&mut self, e: &Expr) -> Result<()> {
        match e {
            Expr::Block { exprs, .. } => {
                for e in exprs {
                    self.stmt(e)?;
                }
                Ok(())
            }
            Expr::VarDecl { def } => self.declare_var(def),
            Expr::Binop {
                kind, left, right, ..
            } if kind.is_assign() => self.assign(left, right),
            Expr::Binop {
                kind: BinaryOp::ChangeDet,
                left,
                right,
                ..
            } => self.changedet(left, right),
            Expr::Triop {
                kind: TernaryOp::If,
                cond,
                left,
                right,
                ..
            } => {
                self.truthy(cond)?;
                self.emit(Instruction::If(BlockType::Empty));
                self.stmt(left)?;
                if let Some(r) = right {
                    self.emit(Instruction::Else);
                    self.stmt(r)?;
                }
                self.emit(Instruction::End);
                Ok(())
            }
            Expr::While {
                precond,
                loopcond,
                inc,
                body,
            } => self.while_loop(precond.as_deref(), loopcond, inc.as_deref(), body),
            Expr::Unop {
                kind: UnaryOp::Creset,
                arg,
                ..
            } => self.creset(arg),
            Expr::Unop {
                kind: UnaryOp::Creturn,
                arg,
                ..
            } => self.creturn(arg),
            Expr::FuncCall { name, args, line } => {
                let pushes = self.call(name, args, *line)?;
                if pushes {
                    self.emit(Instruction::Drop);
                }
                Ok(())
            }
            // A bare value in statement position is evaluated for its side
            // effects and dropped.
            _ => {
                self.value(e)?;
                self.emit(Instruction::Drop);
                Ok(())
            }
        }
    }

    fn declare_var(&mut self, def: &VarDef) -> Result<()> {
        if def.dtype.native() == NativeType::Ref {
            if self.layout.lookup(&def.name).is_none() {
                self.layout.emplace(def)?;
            }
            return Ok(());
        }
        let ty = match container(&def.dtype)? {
            Scalar::I32 => ValType::I32,
            Scalar::I64 => ValType::I64,
        };
        self.locals.declare(&def.name, &def.dtype, ty);
        Ok(())
    }

    fn while_loop(
        &mut self,
        precond: Option<&Expr>,
        loopcond: &Expr,
        inc: Option<&Expr>,
        body: &Expr,
    ) -> Result<()> {
        if let Some(p) = precond {
            self.stmt(p)?;
        }
        let counter = self.locals.fresh_i32();
        self.emit(Instruction::I32Const(0));
        self.emit(Instruction::LocalSet(counter));
        self.emit(Instruction::Block(BlockType::Empty));
        self.emit(Instruction::Loop(BlockType::Empty));
        self.truthy(loopcond)?;
        self.emit(Instruction::I32Eqz);
        self.emit(Instruction::BrIf(1));
        self.stmt(body)?;
        if let Some(i) = inc {
            self.stmt(i)?;
        }
        // Iteration cap: a runaway loop exits silently with stale values.
        self.emit(Instruction::LocalGet(counter));
        self.emit(Instruction::I32Const(1));
        self.emit(Instruction::I32Add);
        self.emit(Instruction::LocalTee(counter));
        self.emit(Instruction::I32Const(self.options.loop_limit as i32));
        self.emit(Instruction::I32GeU);
        self.emit(Instruction::BrIf(1));
        self.emit(Instruction::Br(0));
        self.emit(Instruction::End);
        self.emit(Instruction::End);
        Ok(())
    }

    fn creset(&mut self, arg: &Expr) -> Result<()> {
        let Expr::VarRef { name } = arg else {
            return Err(Error::UnknownOperator("creset of non-variable".into()));
        };
        if let Some((idx, dtype)) = self.locals.lookup(name) {
            let dtype = dtype.clone();
            match container(&dtype)? {
                Scalar::I32 => self.emit(Instruction::I32Const(0)),
                Scalar::I64 => self.emit(Instruction::I64Const(0)),
            }
            self.emit(Instruction::LocalSet(idx));
            return Ok(());
        }
        let slot = self.layout.get(name)?;
        let (offset, size, native) = (slot.offset, slot.size, slot.native);
        match native {
            NativeType::I32 => {
                self.emit(Instruction::LocalGet(DATAPTR));
                self.emit(Instruction::I32Const(0));
                self.store_sized(size, offset);
            }
            NativeType::I64 => {
                self.emit(Instruction::LocalGet(DATAPTR));
                self.emit(Instruction::I64Const(0));
                self.store_sized(size, offset);
            }
            NativeType::Ref => self.zero_region(offset, size),
        }
        Ok(())
    }

    fn creturn(&mut self, arg: &Expr) -> Result<()> {
        let Some(flag) = self.changed_local else {
            return Err(Error::UnknownOperator(
                "creturn outside _change_request".into(),
            ));
        };
        let c = self.value(arg)?;
        self.coerce(c, Scalar::I32, false);
        self.emit(Instruction::LocalGet(flag));
        self.emit(Instruction::I32Or);
        self.emit(Instruction::LocalSet(flag));
        Ok(())
    }

    /// Zero `size` bytes at `offset`: straight-line 64-bit stores for small
    /// regions, a word loop for large ones (arrays can be framebuffer-sized).
    pub(crate) fn zero_region(&mut self, offset: u32, size: u32) {
        let words = size / 8;
        if words <= 16 {
            for i in 0..words {
                self.emit(Instruction::LocalGet(DATAPTR));
                self.emit(Instruction::I64Const(0));
                self.emit(Instruction::I64Store(memarg(offset + i * 8, 0)));
            }
        } else {
            let addr = self.locals.fresh_i32();
            let end = self.locals.fresh_i32();
            self.emit(Instruction::LocalGet(DATAPTR));
            self.emit(Instruction::I32Const(offset as i32));
            self.emit(Instruction::I32Add);
            self.emit(Instruction::LocalTee(addr));
            self.emit(Instruction::I32Const((words * 8) as i32));
            self.emit(Instruction::I32Add);
            self.emit(Instruction::LocalSet(end));
            self.emit(Instruction::Block(BlockType::Empty));
            self.emit(Instruction::Loop(BlockType::Empty));
            self.emit(Instruction::LocalGet(addr));
            self.emit(Instruction::LocalGet(end));
            self.emit(Instruction::I32GeU);
            self.emit(Instruction::BrIf(1));
            self.emit(Instruction::LocalGet(addr));
            self.emit(Instruction::I64Const(0));
            self.emit(Instruction::I64Store(memarg(0, 0)));
            self.emit(Instruction::LocalGet(addr));
            self.emit(Instruction::I32Const(8));
            self.emit(Instruction::I32Add);
            self.emit(Instruction::LocalSet(addr));
            self.emit(Instruction::Br(0));
            self.emit(Instruction::End);
            self.emit(Instruction::End);
        }
        let mut tail = words * 8;
        if size - tail >= 4 {
            self.emit(Instruction::LocalGet(DATAPTR));
            self.emit(Instruction::I32Const(0));
            self.emit(Instruction::I32Store(memarg(offset + tail, 0)));
            tail += 4;
        }
        if size - tail >= 2 {
            self.emit(Instruction::LocalGet(DATAPTR));
            self.emit(Instruction::I32Const(0));
            self.emit(Instruction::I32Store16(memarg(offset + tail, 0)));
            tail += 2;
        }
        if size - tail >= 1 {
            self.emit(Instruction::LocalGet(DATAPTR));
            self.emit(Instruction::I32Const(0));
            self.emit(Instruction::I32Store8(memarg(offset + tail, 0)));
        }
    }

    // ── Assignment ──

    pub(crate) fn assign(&mut self, lhs: &Expr, rhs: &Expr) -> Result<()> {
        match lhs {
            Expr::VarRef { name } => {
                if let Some((idx, dtype)) = self.locals.lookup(name) {
                    let dtype = dtype.clone();
                    let c = container(&dtype)?;
                    let got = self.value(rhs)?;
                    self.coerce(got, c, rhs_signed(rhs));
                    self.mask_to_width(c, dtype.width());
                    self.emit(Instruction::LocalSet(idx));
                    return Ok(());
                }
                let slot = self.layout.get(name)?;
                let (offset, size, dtype) = (slot.offset, slot.size, slot.dtype.clone());
                if dtype.is_wide() {
                    let addr = self.addr_local(offset);
                    return self.wide_assign(addr, &dtype, rhs);
                }
                if dtype.is_array() {
                    return Err(Error::UnsupportedDataType(format!(
                        "whole-array assignment to {name}"
                    )));
                }
                let c = container(&dtype)?;
                self.emit(Instruction::LocalGet(DATAPTR));
                let got = self.value(rhs)?;
                self.coerce(got, c, rhs_signed(rhs));
                self.mask_to_width(c, dtype.width());
                self.store_sized(size, offset);
                Ok(())
            }
            Expr::Binop {
                kind: BinaryOp::ArraySel,
                dtype,
                left,
                right,
            } => {
                if dtype.is_wide() {
                    let addr = self.locals.fresh_i32();
                    let off = self.element_addr(left, right)?.0;
                    self.emit(Instruction::I32Const(off as i32));
                    self.emit(Instruction::I32Add);
                    self.emit(Instruction::LocalSet(addr));
                    return self.wide_assign(addr, &dtype.clone(), rhs);
                }
                let elem = dtype.clone();
                let c = container(&elem)?;
                let (off, _) = self.element_addr(left, right)?;
                let got = self.value(rhs)?;
                self.coerce(got, c, rhs_signed(rhs));
                self.mask_to_width(c, elem.width());
                self.store_sized(elem.size_bytes(), off);
                Ok(())
            }
            Expr::Binop {
                kind: BinaryOp::WordSel,
                left,
                right,
                ..
            } => {
                let (off, _) = self.word_addr(left, right)?;
                let got = self.value(rhs)?;
                self.coerce(got, Scalar::I32, false);
                self.emit(Instruction::I32Store(memarg(off, 2)));
                Ok(())
            }
            other => Err(Error::UnknownOperator(format!(
                "assignment target {other}"
            ))),
        }
    }

    fn changedet(&mut self, left: &Expr, right: &Expr) -> Result<()> {
        let Some(flag) = self.changed_local else {
            return Err(Error::UnknownOperator(
                "changedet outside _change_request".into(),
            ));
        };
        let dt = self.expr_dtype(left)?;
        if dt.is_wide() {
            return self.wide_changedet(left, right);
        }
        let c = container(&dt)?;
        let lc = self.value(left)?;
        self.coerce(lc, c, false);
        let rc = self.value(right)?;
        self.coerce(rc, c, false);
        match c {
            Scalar::I32 => self.emit(Instruction::I32Ne),
            Scalar::I64 => self.emit(Instruction::I64Ne),
        }
        self.emit(Instruction::If(BlockType::Empty));
        self.emit(Instruction::I32Const(1));
        self.emit(Instruction::LocalSet(flag));
        self.assign(right, left)?;
        self.emit(Instruction::End);
        Ok(())
    }

    // ── Values ──

    /// Push a scalar value; returns the container it lives in.
    pub(crate) fn value(&mut self, e: &Expr) -> Result<Scalar> {
        match e {
            Expr::Const(c) => {
                let dt = &c.dtype;
                if dt.is_wide() {
                    return Err(Error::UnsupportedDataType(format!(
                        "wide constant {e} in scalar context"
                    )));
                }
                match container(dt)? {
                    Scalar::I32 => {
                        self.emit(Instruction::I32Const(c.cvalue as u32 as i32));
                        Ok(Scalar::I32)
                    }
                    Scalar::I64 => {
                        let v = c.bigvalue.as_ref().map_or(c.cvalue, |big| {
                            big.to_u64_digits().first().copied().unwrap_or(0)
                        });
                        self.emit(Instruction::I64Const(v as i64));
                        Ok(Scalar::I64)
                    }
                }
            }
            Expr::VarRef { name } => {
                if let Some((idx, dtype)) = self.locals.lookup(name) {
                    let c = container(&dtype.clone())?;
                    self.emit(Instruction::LocalGet(idx));
                    return Ok(c);
                }
                let slot = self.layout.get(name)?;
                let (offset, size, dtype) = (slot.offset, slot.size, slot.dtype.clone());
                let c = container(&dtype)?;
                self.emit(Instruction::LocalGet(DATAPTR));
                self.load_sized(size, offset);
                Ok(c)
            }
            Expr::Unop {
                kind,
                dtype,
                from_width,
                arg,
            } => self.unop(*kind, dtype, *from_width, arg),
            Expr::Binop {
                kind,
                dtype,
                left,
                right,
            } => self.binop(*kind, dtype, left, right),
            Expr::Triop {
                kind: TernaryOp::Cond,
                dtype,
                cond,
                left,
                right,
            } => {
                let dt = dtype
                    .clone()
                    .ok_or_else(|| Error::Internal("cond without dtype".into()))?;
                let c = container(&dt)?;
                let right = right
                    .as_deref()
                    .ok_or_else(|| Error::Internal("cond without else arm".into()))?;
                let lc = self.value(left)?;
                self.coerce(lc, c, false);
                let rc = self.value(right)?;
                self.coerce(rc, c, false);
                self.truthy(cond)?;
                self.emit(Instruction::Select);
                Ok(c)
            }
            Expr::FuncCall { name, args, line } => {
                if self.call(name, args, *line)? {
                    match name.as_str() {
                        "$time" => Ok(Scalar::I64),
                        _ => Ok(Scalar::I32),
                    }
                } else {
                    Err(Error::UnknownOperator(format!(
                        "call to {name} produces no value"
                    )))
                }
            }
            other => Err(Error::UnknownOperator(format!("{other} in value position"))),
        }
    }

    /// Push a boolean i32 for a condition expression.
    pub(crate) fn truthy(&mut self, e: &Expr) -> Result<()> {
        match self.value(e)? {
            Scalar::I32 => {}
            Scalar::I64 => {
                self.emit(Instruction::I64Const(0));
                self.emit(Instruction::I64Ne);
            }
        }
        Ok(())
    }

    fn unop(
        &mut self,
        kind: UnaryOp,
        dtype: &DataType,
        from_width: Option<u32>,
        arg: &Expr,
    ) -> Result<Scalar> {
        match kind {
            UnaryOp::Not => {
                let c = container(dtype)?;
                let got = self.value(arg)?;
                self.coerce(got, c, false);
                match c {
                    Scalar::I32 => {
                        self.emit(Instruction::I32Const(width_mask_32(dtype.width())));
                        self.emit(Instruction::I32Xor);
                    }
                    Scalar::I64 => {
                        self.emit(Instruction::I64Const(width_mask_64(dtype.width())));
                        self.emit(Instruction::I64Xor);
                    }
                }
                Ok(c)
            }
            UnaryOp::Negate => {
                let c = container(dtype)?;
                match c {
                    Scalar::I32 => self.emit(Instruction::I32Const(0)),
                    Scalar::I64 => self.emit(Instruction::I64Const(0)),
                }
                let got = self.value(arg)?;
                self.coerce(got, c, false);
                match c {
                    Scalar::I32 => self.emit(Instruction::I32Sub),
                    Scalar::I64 => self.emit(Instruction::I64Sub),
                }
                Ok(c)
            }
            UnaryOp::Extends => {
                let c = container(dtype)?;
                let w = from_width
                    .ok_or_else(|| Error::Internal("extends without source width".into()))?;
                let got = self.value(arg)?;
                self.coerce(got, c, false);
                self.sign_extend(c, w);
                Ok(c)
            }
            UnaryOp::Ccast => {
                let to = container(dtype)?;
                let from_dt = self.expr_dtype(arg)?;
                if from_dt.is_wide() {
                    return Err(Error::UnsupportedDataType(format!(
                        "ccast from {from_dt}"
                    )));
                }
                let from = container(&from_dt)?;
                self.value(arg)?;
                self.coerce(from, to, from_dt.is_signed());
                Ok(to)
            }
            UnaryOp::Redxor => {
                let c = container(dtype)?;
                let from_dt = self.expr_dtype(arg)?;
                let from = container(&from_dt)?;
                self.value(arg)?;
                match from {
                    Scalar::I32 => {
                        self.emit(Instruction::I32Popcnt);
                        self.emit(Instruction::I32Const(1));
                        self.emit(Instruction::I32And);
                    }
                    Scalar::I64 => {
                        self.emit(Instruction::I64Popcnt);
                        self.emit(Instruction::I64Const(1));
                        self.emit(Instruction::I64And);
                    }
                }
                self.coerce(from, c, false);
                Ok(c)
            }
            UnaryOp::Creset | UnaryOp::Creturn => Err(Error::UnknownOperator(format!(
                "{kind} in value position"
            ))),
        }
    }

    fn binop(
        &mut self,
        kind: BinaryOp,
        dtype: &DataType,
        left: &Expr,
        right: &Expr,
    ) -> Result<Scalar> {
        if kind.is_assign() || kind == BinaryOp::ChangeDet {
            return Err(Error::UnknownOperator(format!("{kind} in value position")));
        }
        match kind {
            BinaryOp::ArraySel => {
                let elem = dtype.clone();
                if elem.is_wide() {
                    return Err(Error::UnsupportedDataType(format!(
                        "wide array element {elem} in scalar context"
                    )));
                }
                let c = container(&elem)?;
                let (off, _) = self.element_addr(left, right)?;
                self.load_sized(elem.size_bytes(), off);
                Ok(c)
            }
            BinaryOp::WordSel => {
                let (off, _) = self.word_addr(left, right)?;
                self.emit(Instruction::I32Load(memarg(off, 2)));
                Ok(Scalar::I32)
            }
            BinaryOp::Eq
            | BinaryOp::Neq
            | BinaryOp::Lt
            | BinaryOp::LtS
            | BinaryOp::Gt
            | BinaryOp::GtS
            | BinaryOp::Lte
            | BinaryOp::LteS
            | BinaryOp::Gte
            | BinaryOp::GteS => self.comparison(kind, left, right),
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::ShrS => {
                let c = container(dtype)?;
                let lc = self.value(left)?;
                self.coerce(lc, c, kind == BinaryOp::ShrS);
                let rc = self.value(right)?;
                self.coerce(rc, c, false);
                let op = match (kind, c) {
                    (BinaryOp::Shl, Scalar::I32) => Instruction::I32Shl,
                    (BinaryOp::Shl, Scalar::I64) => Instruction::I64Shl,
                    (BinaryOp::Shr, Scalar::I32) => Instruction::I32ShrU,
                    (BinaryOp::Shr, Scalar::I64) => Instruction::I64ShrU,
                    (BinaryOp::ShrS, Scalar::I32) => Instruction::I32ShrS,
                    (BinaryOp::ShrS, Scalar::I64) => Instruction::I64ShrS,
                    _ => unreachable!(),
                };
                self.emit(op);
                Ok(c)
            }
            BinaryOp::Div | BinaryOp::DivS | BinaryOp::Moddiv | BinaryOp::ModdivS => {
                self.division(kind, dtype, left, right)
            }
            _ => {
                // add/sub/mul and bitwise: compute in the wider container,
                // downcast the result to the node's dtype.
                let ldt = self.expr_dtype(left)?;
                let rdt = self.expr_dtype(right)?;
                if ldt.is_wide() || rdt.is_wide() {
                    return Err(Error::UnsupportedDataType(format!(
                        "wide operand for scalar {kind}"
                    )));
                }
                let lc = container(&ldt)?;
                let rc = container(&rdt)?;
                let oc = if lc == Scalar::I64 || rc == Scalar::I64 {
                    Scalar::I64
                } else {
                    Scalar::I32
                };
                // Upcast signedness for mul follows the wider operand.
                let wider_signed = if ldt.size_bytes() >= rdt.size_bytes() {
                    ldt.is_signed()
                } else {
                    rdt.is_signed()
                };
                let upcast_signed = match kind {
                    BinaryOp::Mul | BinaryOp::MulS => wider_signed,
                    _ => false,
                };
                self.value(left)?;
                self.coerce(lc, oc, upcast_signed);
                self.value(right)?;
                self.coerce(rc, oc, upcast_signed);
                let op = match (kind, oc) {
                    (BinaryOp::Add, Scalar::I32) => Instruction::I32Add,
                    (BinaryOp::Add, Scalar::I64) => Instruction::I64Add,
                    (BinaryOp::Sub, Scalar::I32) => Instruction::I32Sub,
                    (BinaryOp::Sub, Scalar::I64) => Instruction::I64Sub,
                    (BinaryOp::Mul | BinaryOp::MulS, Scalar::I32) => Instruction::I32Mul,
                    (BinaryOp::Mul | BinaryOp::MulS, Scalar::I64) => Instruction::I64Mul,
                    (BinaryOp::And, Scalar::I32) => Instruction::I32And,
                    (BinaryOp::And, Scalar::I64) => Instruction::I64And,
                    (BinaryOp::Or, Scalar::I32) => Instruction::I32Or,
                    (BinaryOp::Or, Scalar::I64) => Instruction::I64Or,
                    (BinaryOp::Xor, Scalar::I32) => Instruction::I32Xor,
                    (BinaryOp::Xor, Scalar::I64) => Instruction::I64Xor,
                    (other, _) => {
                        return Err(Error::UnknownOperator(other.to_string()));
                    }
                };
                self.emit(op);
                let c = container(dtype)?;
                self.coerce(oc, c, false);
                Ok(c)
            }
        }
    }

    /// Division and modulo with a zero-divisor guard: the quotient is forced
    /// to 0 instead of trapping the whole simulation.
    fn division(
        &mut self,
        kind: BinaryOp,
        dtype: &DataType,
        left: &Expr,
        right: &Expr,
    ) -> Result<Scalar> {
        let ldt = self.expr_dtype(left)?;
        let rdt = self.expr_dtype(right)?;
        let lc = container(&ldt)?;
        let rc = container(&rdt)?;
        let oc = if lc == Scalar::I64 || rc == Scalar::I64 {
            Scalar::I64
        } else {
            Scalar::I32
        };
        let wider_signed = if ldt.size_bytes() >= rdt.size_bytes() {
            ldt.is_signed()
        } else {
            rdt.is_signed()
        };
        let (divisor, zero, quot) = match oc {
            Scalar::I32 => (
                self.locals.scratch("div32_d", ValType::I32),
                self.locals.scratch("div32_z", ValType::I32),
                self.locals.scratch("div32_q", ValType::I32),
            ),
            Scalar::I64 => (
                self.locals.scratch("div64_d", ValType::I64),
                self.locals.scratch("div64_z", ValType::I32),
                self.locals.scratch("div64_q", ValType::I64),
            ),
        };
        self.value(left)?;
        self.coerce(lc, oc, wider_signed);
        self.value(right)?;
        self.coerce(rc, oc, wider_signed);
        self.emit(Instruction::LocalTee(divisor));
        match oc {
            Scalar::I32 => self.emit(Instruction::I32Eqz),
            Scalar::I64 => self.emit(Instruction::I64Eqz),
        }
        self.emit(Instruction::LocalSet(zero));
        // divisor' = zero ? 1 : divisor
        match oc {
            Scalar::I32 => self.emit(Instruction::I32Const(1)),
            Scalar::I64 => self.emit(Instruction::I64Const(1)),
        }
        self.emit(Instruction::LocalGet(divisor));
        self.emit(Instruction::LocalGet(zero));
        self.emit(Instruction::Select);
        let op = match (kind, oc) {
            (BinaryOp::Div, Scalar::I32) => Instruction::I32DivU,
            (BinaryOp::Div, Scalar::I64) => Instruction::I64DivU,
            (BinaryOp::DivS, Scalar::I32) => Instruction::I32DivS,
            (BinaryOp::DivS, Scalar::I64) => Instruction::I64DivS,
            (BinaryOp::Moddiv, Scalar::I32) => Instruction::I32RemU,
            (BinaryOp::Moddiv, Scalar::I64) => Instruction::I64RemU,
            (BinaryOp::ModdivS, Scalar::I32) => Instruction::I32RemS,
            (BinaryOp::ModdivS, Scalar::I64) => Instruction::I64RemS,
            _ => unreachable!(),
        };
        self.emit(op);
        self.emit(Instruction::LocalSet(quot));
        match oc {
            Scalar::I32 => self.emit(Instruction::I32Const(0)),
            Scalar::I64 => self.emit(Instruction::I64Const(0)),
        }
        self.emit(Instruction::LocalGet(quot));
        self.emit(Instruction::LocalGet(zero));
        self.emit(Instruction::Select);
        let c = container(dtype)?;
        self.coerce(oc, c, false);
        Ok(c)
    }

    fn comparison(&mut self, kind: BinaryOp, left: &Expr, right: &Expr) -> Result<Scalar> {
        let ldt = self.expr_dtype(left)?;
        let rdt = self.expr_dtype(right)?;
        if ldt.is_wide() || rdt.is_wide() {
            self.wide_compare(kind, left, right)?;
            return Ok(Scalar::I32);
        }
        let lc = container(&ldt)?;
        let rc = container(&rdt)?;
        let oc = if lc == Scalar::I64 || rc == Scalar::I64 {
            Scalar::I64
        } else {
            Scalar::I32
        };
        let signed = kind.is_signed();
        self.value(left)?;
        self.coerce(lc, oc, signed);
        self.value(right)?;
        self.coerce(rc, oc, signed);
        let op = match (kind, oc) {
            (BinaryOp::Eq, Scalar::I32) => Instruction::I32Eq,
            (BinaryOp::Eq, Scalar::I64) => Instruction::I64Eq,
            (BinaryOp::Neq, Scalar::I32) => Instruction::I32Ne,
            (BinaryOp::Neq, Scalar::I64) => Instruction::I64Ne,
            (BinaryOp::Lt, Scalar::I32) => Instruction::I32LtU,
            (BinaryOp::Lt, Scalar::I64) => Instruction::I64LtU,
            (BinaryOp::LtS, Scalar::I32) => Instruction::I32LtS,
            (BinaryOp::LtS, Scalar::I64) => Instruction::I64LtS,
            (BinaryOp::Gt, Scalar::I32) => Instruction::I32GtU,
            (BinaryOp::Gt, Scalar::I64) => Instruction::I64GtU,
            (BinaryOp::GtS, Scalar::I32) => Instruction::I32GtS,
            (BinaryOp::GtS, Scalar::I64) => Instruction::I64GtS,
            (BinaryOp::Lte, Scalar::I32) => Instruction::I32LeU,
            (BinaryOp::Lte, Scalar::I64) => Instruction::I64LeU,
            (BinaryOp::LteS, Scalar::I32) => Instruction::I32LeS,
            (BinaryOp::LteS, Scalar::I64) => Instruction::I64LeS,
            (BinaryOp::Gte, Scalar::I32) => Instruction::I32GeU,
            (BinaryOp::Gte, Scalar::I64) => Instruction::I64GeU,
            (BinaryOp::GteS, Scalar::I32) => Instruction::I32GeS,
            (BinaryOp::GteS, Scalar::I64) => Instruction::I64GeS,
            _ => unreachable!(),
        };
        self.emit(op);
        Ok(Scalar::I32)
    }

    // ── Calls ──

    /// Emit a call; returns whether a value was pushed.
    fn call(&mut self, name: &str, args: &[Expr], line: Option<u32>) -> Result<bool> {
        match name {
            "$finish" | "$stop" => {
                self.emit(Instruction::LocalGet(DATAPTR));
                self.emit(Instruction::I32Const(line.unwrap_or(0) as i32));
                let import = if name == "$finish" {
                    IMPORT_FINISH
                } else {
                    IMPORT_STOP
                };
                self.emit(Instruction::Call(import));
                Ok(false)
            }
            "$time" => {
                self.emit(Instruction::LocalGet(DATAPTR));
                self.emit(Instruction::Call(IMPORT_TIME));
                Ok(true)
            }
            "$rand" => {
                self.emit(Instruction::LocalGet(DATAPTR));
                self.emit(Instruction::Call(IMPORT_RAND));
                Ok(true)
            }
            "$readmemh" | "$readmemb" => {
                let [file, mem] = args else {
                    return Err(Error::UnknownOperator(format!(
                        "{name} expects (file, memory)"
                    )));
                };
                self.emit(Instruction::LocalGet(DATAPTR));
                self.push_addr(file)?;
                self.push_addr(mem)?;
                self.emit(Instruction::I32Const(i32::from(name == "$readmemh")));
                self.emit(Instruction::Call(IMPORT_READMEM));
                Ok(false)
            }
            _ => {
                if !args.is_empty() {
                    return Err(Error::UnsupportedDataType(format!(
                        "call to {name} with arguments"
                    )));
                }
                let idx = self
                    .funcs
                    .lookup(name)
                    .ok_or_else(|| Error::UnknownOperator(format!("call to {name}")))?;
                self.emit(Instruction::LocalGet(DATAPTR));
                self.emit(Instruction::Call(idx));
                Ok(false)
            }
        }
    }

    /// Push the absolute address of a memory-resident operand.
    pub(crate) fn push_addr(&mut self, e: &Expr) -> Result<()> {
        match e {
            Expr::VarRef { name } => {
                let slot = self.layout.get(name)?;
                let offset = slot.offset;
                self.emit(Instruction::LocalGet(DATAPTR));
                if offset != 0 {
                    self.emit(Instruction::I32Const(offset as i32));
                    self.emit(Instruction::I32Add);
                }
                Ok(())
            }
            Expr::Binop {
                kind: BinaryOp::ArraySel,
                left,
                right,
                ..
            } => {
                let (off, _) = self.element_addr(left, right)?;
                if off != 0 {
                    self.emit(Instruction::I32Const(off as i32));
                    self.emit(Instruction::I32Add);
                }
                Ok(())
            }
            other => Err(Error::UnknownOperator(format!("address of {other}"))),
        }
    }

    // ── Addressing ──

    /// Push the dynamic part of an array element address; returns the static
    /// byte offset to fold into the access and the element type. A constant
    /// index folds entirely into the static offset.
    pub(crate) fn element_addr(&mut self, arr: &Expr, idx: &Expr) -> Result<(u32, DataType)> {
        let Expr::VarRef { name } = arr else {
            return Err(Error::UnsupportedDataType(format!(
                "array selection on {arr}"
            )));
        };
        let slot = self.layout.get(name)?;
        let DataType::Array { subtype, .. } = slot.dtype.clone() else {
            return Err(Error::UnsupportedDataType(format!(
                "array selection on non-array {name}"
            )));
        };
        let base = slot.offset;
        let elem = *subtype;
        let elsize = elem.size_bytes();
        self.emit(Instruction::LocalGet(DATAPTR));
        if let Expr::Const(c) = idx {
            return Ok((base + c.cvalue as u32 * elsize, elem));
        }
        let ic = self.value(idx)?;
        self.coerce(ic, Scalar::I32, false);
        if elsize.is_power_of_two() {
            if elsize > 1 {
                self.emit(Instruction::I32Const(elsize.trailing_zeros() as i32));
                self.emit(Instruction::I32Shl);
            }
        } else {
            self.emit(Instruction::I32Const(elsize as i32));
            self.emit(Instruction::I32Mul);
        }
        self.emit(Instruction::I32Add);
        Ok((base, elem))
    }

    /// Like `element_addr` but for `wordsel`: the element is always one
    /// 32-bit chunk of a wide parent, regardless of the parent's width.
    fn word_addr(&mut self, parent: &Expr, idx: &Expr) -> Result<(u32, DataType)> {
        let Expr::VarRef { name } = parent else {
            return Err(Error::UnsupportedDataType(format!(
                "word selection on {parent}"
            )));
        };
        let slot = self.layout.get(name)?;
        let base = slot.offset;
        self.emit(Instruction::LocalGet(DATAPTR));
        if let Expr::Const(c) = idx {
            return Ok((base + c.cvalue as u32 * 4, DataType::logic(32)));
        }
        let ic = self.value(idx)?;
        self.coerce(ic, Scalar::I32, false);
        self.emit(Instruction::I32Const(2));
        self.emit(Instruction::I32Shl);
        self.emit(Instruction::I32Add);
        Ok((base, DataType::logic(32)))
    }

    /// Materialize `DATAPTR + offset` into a fresh local and return it.
    pub(crate) fn addr_local(&mut self, offset: u32) -> u32 {
        let addr = self.locals.fresh_i32();
        self.emit(Instruction::LocalGet(DATAPTR));
        if offset != 0 {
            self.emit(Instruction::I32Const(offset as i32));
            self.emit(Instruction::I32Add);
        }
        self.emit(Instruction::LocalSet(addr));
        addr
    }

    // ── Conversions ──

    pub(crate) fn coerce(&mut self, from: Scalar, to: Scalar, signed: bool) {
        match (from, to) {
            (Scalar::I32, Scalar::I64) => {
                if signed {
                    self.emit(Instruction::I64ExtendI32S);
                } else {
                    self.emit(Instruction::I64ExtendI32U);
                }
            }
            (Scalar::I64, Scalar::I32) => self.emit(Instruction::I32WrapI64),
            _ => {}
        }
    }

    /// Sign-extend the low `w` bits within the container, preferring the
    /// native extension ops when widths line up.
    fn sign_extend(&mut self, c: Scalar, w: u32) {
        match (c, w) {
            (Scalar::I32, 8) => self.emit(Instruction::I32Extend8S),
            (Scalar::I32, 16) => self.emit(Instruction::I32Extend16S),
            (Scalar::I32, 32) => {}
            (Scalar::I64, 8) => self.emit(Instruction::I64Extend8S),
            (Scalar::I64, 16) => self.emit(Instruction::I64Extend16S),
            (Scalar::I64, 32) => self.emit(Instruction::I64Extend32S),
            (Scalar::I64, 64) => {}
            (Scalar::I32, _) => {
                let sh = 32 - w as i32;
                self.emit(Instruction::I32Const(sh));
                self.emit(Instruction::I32Shl);
                self.emit(Instruction::I32Const(sh));
                self.emit(Instruction::I32ShrS);
            }
            (Scalar::I64, _) => {
                let sh = i64::from(64 - w);
                self.emit(Instruction::I64Const(sh));
                self.emit(Instruction::I64Shl);
                self.emit(Instruction::I64Const(sh));
                self.emit(Instruction::I64ShrS);
            }
        }
    }

    /// Mask the top of the stack to `width` bits; full containers pass
    /// through untouched.
    pub(crate) fn mask_to_width(&mut self, c: Scalar, width: u32) {
        match c {
            Scalar::I32 => {
                if width < 32 {
                    self.emit(Instruction::I32Const(width_mask_32(width)));
                    self.emit(Instruction::I32And);
                }
            }
            Scalar::I64 => {
                if width < 64 {
                    self.emit(Instruction::I64Const(width_mask_64(width)));
                    self.emit(Instruction::I64And);
                }
            }
        }
    }

    // ── Memory access by storage size ──

    pub(crate) fn load_sized(&mut self, size: u32, offset: u32) {
        match size {
            1 => self.emit(Instruction::I32Load8U(memarg(offset, 0))),
            2 => self.emit(Instruction::I32Load16U(memarg(offset, 1))),
            4 => self.emit(Instruction::I32Load(memarg(offset, 2))),
            _ => self.emit(Instruction::I64Load(memarg(offset, 3))),
        }
    }

    pub(crate) fn store_sized(&mut self, size: u32, offset: u32) {
        match size {
            1 => self.emit(Instruction::I32Store8(memarg(offset, 0))),
            2 => self.emit(Instruction::I32Store16(memarg(offset, 1))),
            4 => self.emit(Instruction::I32Store(memarg(offset, 2))),
            _ => self.emit(Instruction::I64Store(memarg(offset, 3))),
        }
    }

    // ── Type queries ──

    pub(crate) fn expr_dtype(&self, e: &Expr) -> Result<DataType> {
        match e {
            Expr::Const(c) => Ok(c.dtype.clone()),
            Expr::VarRef { name } => {
                if let Some((_, dt)) = self.locals.lookup(name) {
                    Ok(dt.clone())
                } else {
                    Ok(self.layout.get(name)?.dtype.clone())
                }
            }
            Expr::VarDecl { def } => Ok(def.dtype.clone()),
            Expr::Unop { dtype, .. } | Expr::Binop { dtype, .. } => Ok(dtype.clone()),
            Expr::Triop { dtype, .. } => dtype
                .clone()
                .ok_or_else(|| Error::Internal("conditional without dtype".into())),
            Expr::FuncCall { name, .. } => match name.as_str() {
                "$time" => Ok(DataType::logic(64)),
                "$rand" => Ok(DataType::logic(32)),
                _ => Err(Error::UnknownOperator(format!(
                    "call to {name} has no value type"
                ))),
            },
            other => Err(Error::UnknownOperator(format!("{other} has no value type"))),
        }
    }
}

/// Signedness hint for an assignment's implicit upcast.
fn rhs_signed(e: &Expr) -> bool {
    match e {
        Expr::Const(c) => c.dtype.is_signed(),
        Expr::Unop { dtype, .. } | Expr::Binop { dtype, .. } => dtype.is_signed(),
        _ => false,
    }
}

pub(crate) fn width_mask_32(width: u32) -> i32 {
    if width >= 32 {
        -1
    } else {
        ((1u32 << width) - 1) as i32
    }
}

pub(crate) fn width_mask_64(width: u32) -> i64 {
    if width >= 64 {
        -1
    } else {
        ((1u64 << width) - 1) as i64
    }
}

/// A compiled function body: instructions (without the trailing `end`) plus
/// run-length encoded locals.
pub struct FuncBody {
    pub instructions: Vec<Instruction<'static>>,
    pub locals: Vec<(u32, ValType)>,
}
