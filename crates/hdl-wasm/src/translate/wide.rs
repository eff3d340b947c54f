//! Chunked codegen for values wider than 64 bits.
//!
//! Wide values never touch the WASM value stack; only their addresses do.
//! Every operation below lowers to i32 load/store sequences over an array of
//! little-endian 32-bit chunks. Addresses live in function locals so nested
//! operand materialization cannot clobber them; per-chunk temporaries reuse
//! keyed scratch locals because each emitter runs straight through.
//!
//! Carry and borrow are recomputed at every chunk (WASM has no add-with-carry),
//! and processing order is chosen so destination/source aliasing is safe:
//! add/sub/shr walk LSB to MSB, shl walks MSB to LSB.

use wasm_encoder::{BlockType, Instruction, ValType};

use super::codegen::{BlockCompiler, Scalar, memarg};
use crate::ir::{BinaryOp, DataType, Expr, TernaryOp, UnaryOp};
use crate::{Error, Result};

impl BlockCompiler<'_> {
    // ── Assignment dispatch ──

    /// Store `rhs` into the wide destination whose address is in `dst`.
    pub(crate) fn wide_assign(&mut self, dst: u32, dtype: &DataType, rhs: &Expr) -> Result<()> {
        let n = dtype.chunks();
        let mask = dtype.last_chunk_mask();
        let rdt = self.expr_dtype(rhs)?;
        if !rdt.is_wide() && !matches!(rhs, Expr::Triop { .. }) {
            return self.scalar_into_wide(dst, n, rhs);
        }
        match rhs {
            Expr::Const(c) => {
                let mut chunks = c.chunks(n);
                if let Some(last) = chunks.last_mut() {
                    *last &= mask;
                }
                for (i, chunk) in chunks.iter().enumerate() {
                    self.emit(Instruction::LocalGet(dst));
                    self.emit(Instruction::I32Const(*chunk as i32));
                    self.emit(Instruction::I32Store(memarg(i as u32 * 4, 2)));
                }
                Ok(())
            }
            Expr::VarRef { .. }
            | Expr::Binop {
                kind: BinaryOp::ArraySel,
                ..
            } if rdt.is_wide() => {
                let src = self.wide_operand(rhs, &rdt)?;
                self.copy_chunks(dst, src, rdt.chunks(), n, mask);
                Ok(())
            }
            Expr::Binop {
                kind, left, right, ..
            } => self.wide_binop(dst, dtype, *kind, left, right),
            Expr::Unop {
                kind,
                from_width,
                arg,
                ..
            } => self.wide_unop(dst, dtype, *kind, *from_width, arg),
            Expr::Triop {
                kind: TernaryOp::Cond,
                cond,
                left,
                right,
                ..
            } => {
                let right = right
                    .as_deref()
                    .ok_or_else(|| Error::Internal("cond without else arm".into()))?;
                self.truthy(cond)?;
                self.emit(Instruction::If(BlockType::Empty));
                self.wide_assign(dst, dtype, left)?;
                self.emit(Instruction::Else);
                self.wide_assign(dst, dtype, right)?;
                self.emit(Instruction::End);
                Ok(())
            }
            other => Err(Error::UnsupportedDataType(format!(
                "wide assignment from {other}"
            ))),
        }
    }

    /// Broadcast a scalar (<= 64 bit) value into the low chunks and zero the
    /// rest.
    fn scalar_into_wide(&mut self, dst: u32, n: u32, rhs: &Expr) -> Result<()> {
        let c = self.value(rhs)?;
        self.coerce(c, Scalar::I64, false);
        let v = self.locals.scratch("wv", ValType::I64);
        self.emit(Instruction::LocalSet(v));
        self.emit(Instruction::LocalGet(dst));
        self.emit(Instruction::LocalGet(v));
        self.emit(Instruction::I32WrapI64);
        self.emit(Instruction::I32Store(memarg(0, 2)));
        self.emit(Instruction::LocalGet(dst));
        self.emit(Instruction::LocalGet(v));
        self.emit(Instruction::I64Const(32));
        self.emit(Instruction::I64ShrU);
        self.emit(Instruction::I32WrapI64);
        self.emit(Instruction::I32Store(memarg(4, 2)));
        for i in 2..n {
            self.emit(Instruction::LocalGet(dst));
            self.emit(Instruction::I32Const(0));
            self.emit(Instruction::I32Store(memarg(i * 4, 2)));
        }
        Ok(())
    }

    // ── Operand materialization ──

    /// Put the address of a wide operand into a fresh local. Operands that
    /// are not already memory-resident at the expected width are evaluated
    /// into a scratch slot first.
    pub(crate) fn wide_operand(&mut self, e: &Expr, expect: &DataType) -> Result<u32> {
        let dt = self.expr_dtype(e)?;
        match e {
            Expr::VarRef { name } if dt.is_wide() && dt.chunks() == expect.chunks() => {
                let offset = self.layout.get(name)?.offset;
                Ok(self.addr_local(offset))
            }
            Expr::Binop {
                kind: BinaryOp::ArraySel,
                left,
                right,
                ..
            } if dt.is_wide() && dt.chunks() == expect.chunks() => {
                let addr = self.locals.fresh_i32();
                let (off, _) = self.element_addr(left, right)?;
                if off != 0 {
                    self.emit(Instruction::I32Const(off as i32));
                    self.emit(Instruction::I32Add);
                }
                self.emit(Instruction::LocalSet(addr));
                Ok(addr)
            }
            _ => {
                if dt.is_wide()
                    && matches!(
                        e,
                        Expr::VarRef { .. }
                            | Expr::Binop {
                                kind: BinaryOp::ArraySel,
                                ..
                            }
                    )
                {
                    // Width-adapting copy of a memory-resident operand.
                    let src = self.wide_operand(e, &dt)?;
                    let offset = self.layout.alloc_scratch(expect);
                    let addr = self.addr_local(offset);
                    self.copy_chunks(
                        addr,
                        src,
                        dt.chunks(),
                        expect.chunks(),
                        expect.last_chunk_mask(),
                    );
                    return Ok(addr);
                }
                let offset = self.layout.alloc_scratch(expect);
                let addr = self.addr_local(offset);
                self.wide_assign(addr, expect, e)?;
                Ok(addr)
            }
        }
    }

    // ── Binary operations ──

    fn wide_binop(
        &mut self,
        dst: u32,
        dtype: &DataType,
        kind: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<()> {
        let n = dtype.chunks();
        let mask = dtype.last_chunk_mask();
        match kind {
            BinaryOp::Add | BinaryOp::Sub => {
                let l = self.wide_operand(left, dtype)?;
                let r = self.wide_operand(right, dtype)?;
                if kind == BinaryOp::Add {
                    self.wide_add(dst, l, r, n, mask);
                } else {
                    self.wide_sub(dst, l, r, n, mask);
                }
                Ok(())
            }
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
                let l = self.wide_operand(left, dtype)?;
                let r = self.wide_operand(right, dtype)?;
                let op = match kind {
                    BinaryOp::And => Instruction::I32And,
                    BinaryOp::Or => Instruction::I32Or,
                    _ => Instruction::I32Xor,
                };
                for i in 0..n {
                    self.emit(Instruction::LocalGet(dst));
                    self.emit(Instruction::LocalGet(l));
                    self.emit(Instruction::I32Load(memarg(i * 4, 2)));
                    self.emit(Instruction::LocalGet(r));
                    self.emit(Instruction::I32Load(memarg(i * 4, 2)));
                    self.emit(op.clone());
                    self.emit(Instruction::I32Store(memarg(i * 4, 2)));
                }
                Ok(())
            }
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::ShrS => {
                let src = self.wide_operand(left, dtype)?;
                if let Expr::Const(c) = right {
                    let shift = c.cvalue as u32;
                    match kind {
                        BinaryOp::Shl => self.wide_shl_const(dst, src, n, mask, shift),
                        BinaryOp::Shr => self.wide_shr_const(dst, src, dtype, shift, false),
                        _ => self.wide_shr_const(dst, src, dtype, shift, true),
                    }
                } else {
                    let ac = self.value(right)?;
                    self.coerce(ac, Scalar::I32, false);
                    let amt = self.locals.fresh_i32();
                    self.emit(Instruction::LocalSet(amt));
                    match kind {
                        BinaryOp::Shl => self.wide_shl_var(dst, src, n, mask, amt),
                        BinaryOp::Shr => self.wide_shr_var(dst, src, dtype, amt, false),
                        _ => self.wide_shr_var(dst, src, dtype, amt, true),
                    }
                }
                Ok(())
            }
            BinaryOp::Mul
            | BinaryOp::MulS
            | BinaryOp::Div
            | BinaryOp::DivS
            | BinaryOp::Moddiv
            | BinaryOp::ModdivS => Err(Error::UnsupportedDataType(format!(
                "{kind} on values wider than 64 bits"
            ))),
            other => Err(Error::UnknownOperator(format!(
                "{other} as wide assignment source"
            ))),
        }
    }

    /// Chunked addition; both overflow cases are recomputed per chunk.
    fn wide_add(&mut self, dst: u32, l: u32, r: u32, n: u32, mask: u32) {
        let wl = self.locals.scratch("wl", ValType::I32);
        let ws = self.locals.scratch("ws", ValType::I32);
        let wc = self.locals.scratch("wc", ValType::I32);
        self.emit(Instruction::I32Const(0));
        self.emit(Instruction::LocalSet(wc));
        for i in 0..n {
            let off = i * 4;
            let last = i == n - 1;
            self.emit(Instruction::LocalGet(l));
            self.emit(Instruction::I32Load(memarg(off, 2)));
            self.emit(Instruction::LocalSet(wl));
            self.emit(Instruction::LocalGet(wl));
            self.emit(Instruction::LocalGet(r));
            self.emit(Instruction::I32Load(memarg(off, 2)));
            self.emit(Instruction::I32Add);
            self.emit(Instruction::LocalSet(ws));
            if last {
                // Carry out of the top chunk is discarded (wrap-around).
                self.emit(Instruction::LocalGet(dst));
                self.emit(Instruction::LocalGet(ws));
                self.emit(Instruction::LocalGet(wc));
                self.emit(Instruction::I32Add);
                if mask != u32::MAX {
                    self.emit(Instruction::I32Const(mask as i32));
                    self.emit(Instruction::I32And);
                }
                self.emit(Instruction::I32Store(memarg(off, 2)));
            } else {
                // overflow1: the raw add wrapped.
                let wo = self.locals.scratch("wo", ValType::I32);
                self.emit(Instruction::LocalGet(ws));
                self.emit(Instruction::LocalGet(wl));
                self.emit(Instruction::I32LtU);
                self.emit(Instruction::LocalSet(wo));
                self.emit(Instruction::LocalGet(ws));
                self.emit(Instruction::LocalGet(wc));
                self.emit(Instruction::I32Add);
                self.emit(Instruction::LocalSet(ws));
                // overflow2: adding the carry wrapped to zero.
                self.emit(Instruction::LocalGet(ws));
                self.emit(Instruction::I32Eqz);
                self.emit(Instruction::LocalGet(wc));
                self.emit(Instruction::I32And);
                self.emit(Instruction::LocalGet(wo));
                self.emit(Instruction::I32Or);
                self.emit(Instruction::LocalSet(wc));
                self.emit(Instruction::LocalGet(dst));
                self.emit(Instruction::LocalGet(ws));
                self.emit(Instruction::I32Store(memarg(off, 2)));
            }
        }
    }

    /// Chunked subtraction, the mirror of `wide_add` with a borrow.
    fn wide_sub(&mut self, dst: u32, l: u32, r: u32, n: u32, mask: u32) {
        let wl = self.locals.scratch("wl", ValType::I32);
        let wr = self.locals.scratch("wr", ValType::I32);
        let ws = self.locals.scratch("ws", ValType::I32);
        let wb = self.locals.scratch("wb", ValType::I32);
        self.emit(Instruction::I32Const(0));
        self.emit(Instruction::LocalSet(wb));
        for i in 0..n {
            let off = i * 4;
            let last = i == n - 1;
            self.emit(Instruction::LocalGet(l));
            self.emit(Instruction::I32Load(memarg(off, 2)));
            self.emit(Instruction::LocalSet(wl));
            self.emit(Instruction::LocalGet(r));
            self.emit(Instruction::I32Load(memarg(off, 2)));
            self.emit(Instruction::LocalSet(wr));
            self.emit(Instruction::LocalGet(wl));
            self.emit(Instruction::LocalGet(wr));
            self.emit(Instruction::I32Sub);
            self.emit(Instruction::LocalSet(ws));
            if last {
                self.emit(Instruction::LocalGet(dst));
                self.emit(Instruction::LocalGet(ws));
                self.emit(Instruction::LocalGet(wb));
                self.emit(Instruction::I32Sub);
                if mask != u32::MAX {
                    self.emit(Instruction::I32Const(mask as i32));
                    self.emit(Instruction::I32And);
                }
                self.emit(Instruction::I32Store(memarg(off, 2)));
            } else {
                let wo = self.locals.scratch("wo", ValType::I32);
                // borrow1: the raw subtract wrapped.
                self.emit(Instruction::LocalGet(wl));
                self.emit(Instruction::LocalGet(wr));
                self.emit(Instruction::I32LtU);
                self.emit(Instruction::LocalSet(wo));
                // borrow2: equal chunks propagate an incoming borrow.
                self.emit(Instruction::LocalGet(ws));
                self.emit(Instruction::I32Eqz);
                self.emit(Instruction::LocalGet(wb));
                self.emit(Instruction::I32And);
                self.emit(Instruction::LocalGet(wo));
                self.emit(Instruction::I32Or);
                self.emit(Instruction::LocalSet(wo));
                self.emit(Instruction::LocalGet(dst));
                self.emit(Instruction::LocalGet(ws));
                self.emit(Instruction::LocalGet(wb));
                self.emit(Instruction::I32Sub);
                self.emit(Instruction::I32Store(memarg(off, 2)));
                self.emit(Instruction::LocalGet(wo));
                self.emit(Instruction::LocalSet(wb));
            }
        }
    }

    // ── Unary operations ──

    fn wide_unop(
        &mut self,
        dst: u32,
        dtype: &DataType,
        kind: UnaryOp,
        from_width: Option<u32>,
        arg: &Expr,
    ) -> Result<()> {
        let n = dtype.chunks();
        let mask = dtype.last_chunk_mask();
        match kind {
            UnaryOp::Not => {
                let src = self.wide_operand(arg, dtype)?;
                for i in 0..n {
                    self.emit(Instruction::LocalGet(dst));
                    self.emit(Instruction::LocalGet(src));
                    self.emit(Instruction::I32Load(memarg(i * 4, 2)));
                    self.emit(Instruction::I32Const(-1));
                    self.emit(Instruction::I32Xor);
                    if i == n - 1 && mask != u32::MAX {
                        self.emit(Instruction::I32Const(mask as i32));
                        self.emit(Instruction::I32And);
                    }
                    self.emit(Instruction::I32Store(memarg(i * 4, 2)));
                }
                Ok(())
            }
            UnaryOp::Negate => {
                let src = self.wide_operand(arg, dtype)?;
                let wl = self.locals.scratch("wl", ValType::I32);
                let ws = self.locals.scratch("ws", ValType::I32);
                let wc = self.locals.scratch("wc", ValType::I32);
                self.emit(Instruction::I32Const(1));
                self.emit(Instruction::LocalSet(wc));
                for i in 0..n {
                    let off = i * 4;
                    self.emit(Instruction::LocalGet(src));
                    self.emit(Instruction::I32Load(memarg(off, 2)));
                    self.emit(Instruction::I32Const(-1));
                    self.emit(Instruction::I32Xor);
                    self.emit(Instruction::LocalSet(wl));
                    self.emit(Instruction::LocalGet(wl));
                    self.emit(Instruction::LocalGet(wc));
                    self.emit(Instruction::I32Add);
                    self.emit(Instruction::LocalSet(ws));
                    if i < n - 1 {
                        self.emit(Instruction::LocalGet(ws));
                        self.emit(Instruction::I32Eqz);
                        self.emit(Instruction::LocalGet(wc));
                        self.emit(Instruction::I32And);
                        self.emit(Instruction::LocalSet(wc));
                    }
                    self.emit(Instruction::LocalGet(dst));
                    self.emit(Instruction::LocalGet(ws));
                    if i == n - 1 && mask != u32::MAX {
                        self.emit(Instruction::I32Const(mask as i32));
                        self.emit(Instruction::I32And);
                    }
                    self.emit(Instruction::I32Store(memarg(off, 2)));
                }
                Ok(())
            }
            UnaryOp::Extends => {
                let w = from_width
                    .ok_or_else(|| Error::Internal("extends without source width".into()))?;
                self.wide_extends(dst, dtype, w, arg)
            }
            other => Err(Error::UnsupportedDataType(format!(
                "{other} on values wider than 64 bits"
            ))),
        }
    }

    /// Sign-extend a narrower value into a wide destination.
    fn wide_extends(&mut self, dst: u32, dtype: &DataType, w: u32, arg: &Expr) -> Result<()> {
        let n = dtype.chunks();
        let mask = dtype.last_chunk_mask();
        if w > 64 {
            let src_dt = self.expr_dtype(arg)?;
            let src = self.wide_operand(arg, &src_dt)?;
            let ns = src_dt.chunks().min(n);
            let fill = self.wide_sign_fill(src, &src_dt);
            // Top source chunk gets its missing sign bits OR-ed in.
            for i in 0..ns {
                self.emit(Instruction::LocalGet(dst));
                self.emit(Instruction::LocalGet(src));
                self.emit(Instruction::I32Load(memarg(i * 4, 2)));
                if i == ns - 1 && src_dt.last_chunk_mask() != u32::MAX {
                    self.emit(Instruction::LocalGet(fill));
                    self.emit(Instruction::I32Const(!src_dt.last_chunk_mask() as i32));
                    self.emit(Instruction::I32And);
                    self.emit(Instruction::I32Or);
                }
                if i == n - 1 && mask != u32::MAX {
                    self.emit(Instruction::I32Const(mask as i32));
                    self.emit(Instruction::I32And);
                }
                self.emit(Instruction::I32Store(memarg(i * 4, 2)));
            }
            for i in ns..n {
                self.emit(Instruction::LocalGet(dst));
                self.emit(Instruction::LocalGet(fill));
                if i == n - 1 && mask != u32::MAX {
                    self.emit(Instruction::I32Const(mask as i32));
                    self.emit(Instruction::I32And);
                }
                self.emit(Instruction::I32Store(memarg(i * 4, 2)));
            }
            return Ok(());
        }
        // Scalar source: widen to i64, sign-extend, then spread.
        let c = self.value(arg)?;
        self.coerce(c, Scalar::I64, false);
        if w < 64 {
            let sh = i64::from(64 - w);
            self.emit(Instruction::I64Const(sh));
            self.emit(Instruction::I64Shl);
            self.emit(Instruction::I64Const(sh));
            self.emit(Instruction::I64ShrS);
        }
        let v = self.locals.scratch("wv", ValType::I64);
        self.emit(Instruction::LocalSet(v));
        let fill = self.locals.scratch("wf", ValType::I32);
        self.emit(Instruction::LocalGet(v));
        self.emit(Instruction::I64Const(63));
        self.emit(Instruction::I64ShrS);
        self.emit(Instruction::I32WrapI64);
        self.emit(Instruction::LocalSet(fill));
        self.emit(Instruction::LocalGet(dst));
        self.emit(Instruction::LocalGet(v));
        self.emit(Instruction::I32WrapI64);
        self.emit(Instruction::I32Store(memarg(0, 2)));
        self.emit(Instruction::LocalGet(dst));
        self.emit(Instruction::LocalGet(v));
        self.emit(Instruction::I64Const(32));
        self.emit(Instruction::I64ShrU);
        self.emit(Instruction::I32WrapI64);
        self.emit(Instruction::I32Store(memarg(4, 2)));
        for i in 2..n {
            self.emit(Instruction::LocalGet(dst));
            self.emit(Instruction::LocalGet(fill));
            if i == n - 1 && mask != u32::MAX {
                self.emit(Instruction::I32Const(mask as i32));
                self.emit(Instruction::I32And);
            }
            self.emit(Instruction::I32Store(memarg(i * 4, 2)));
        }
        Ok(())
    }

    /// Compute the sign-fill word (0 or all-ones) of a wide value into a
    /// scratch local. The declared top bit drives the fill, which reduces to
    /// `top >> 31` when the width is a chunk multiple.
    fn wide_sign_fill(&mut self, src: u32, dtype: &DataType) -> u32 {
        let n = dtype.chunks();
        let k = 31 - ((dtype.width() - 1) % 32);
        let fill = self.locals.scratch("wf", ValType::I32);
        self.emit(Instruction::LocalGet(src));
        self.emit(Instruction::I32Load(memarg((n - 1) * 4, 2)));
        if k != 0 {
            self.emit(Instruction::I32Const(k as i32));
            self.emit(Instruction::I32Shl);
        }
        self.emit(Instruction::I32Const(31));
        self.emit(Instruction::I32ShrS);
        self.emit(Instruction::LocalSet(fill));
        fill
    }

    // ── Shifts by a constant amount ──

    /// Left shift; MSB→LSB order keeps dst == src aliasing safe.
    fn wide_shl_const(&mut self, dst: u32, src: u32, n: u32, mask: u32, shift: u32) {
        let cs = (shift / 32) as i64;
        let bs = shift % 32;
        for i in (0..n).rev() {
            let srcidx = i64::from(i) - cs;
            self.emit(Instruction::LocalGet(dst));
            if srcidx < 0 {
                self.emit(Instruction::I32Const(0));
            } else {
                let s = srcidx as u32;
                self.emit(Instruction::LocalGet(src));
                self.emit(Instruction::I32Load(memarg(s * 4, 2)));
                if bs != 0 {
                    self.emit(Instruction::I32Const(bs as i32));
                    self.emit(Instruction::I32Shl);
                    if s > 0 {
                        self.emit(Instruction::LocalGet(src));
                        self.emit(Instruction::I32Load(memarg((s - 1) * 4, 2)));
                        self.emit(Instruction::I32Const((32 - bs) as i32));
                        self.emit(Instruction::I32ShrU);
                        self.emit(Instruction::I32Or);
                    }
                }
            }
            if i == n - 1 && mask != u32::MAX {
                self.emit(Instruction::I32Const(mask as i32));
                self.emit(Instruction::I32And);
            }
            self.emit(Instruction::I32Store(memarg(i * 4, 2)));
        }
    }

    /// Right shift, LSB→MSB. The signed variant fills vacated positions from
    /// the declared sign bit and extends the top source chunk on the fly.
    fn wide_shr_const(&mut self, dst: u32, src: u32, dtype: &DataType, shift: u32, signed: bool) {
        let n = dtype.chunks();
        let mask = dtype.last_chunk_mask();
        let cs = shift / 32;
        let bs = shift % 32;
        let fill = if signed {
            Some(self.wide_sign_fill(src, dtype))
        } else {
            None
        };
        let ext_top = |c: &mut Self, idx: u32| {
            // OR the sign bits above the declared width into the top chunk.
            let Some(f) = fill else { return };
            if idx == n - 1 && mask != u32::MAX {
                c.emit(Instruction::LocalGet(f));
                c.emit(Instruction::I32Const(!mask as i32));
                c.emit(Instruction::I32And);
                c.emit(Instruction::I32Or);
            }
        };
        for i in 0..n {
            let srcidx = i + cs;
            self.emit(Instruction::LocalGet(dst));
            if srcidx >= n {
                match fill {
                    Some(f) => self.emit(Instruction::LocalGet(f)),
                    None => self.emit(Instruction::I32Const(0)),
                }
            } else {
                self.emit(Instruction::LocalGet(src));
                self.emit(Instruction::I32Load(memarg(srcidx * 4, 2)));
                ext_top(self, srcidx);
                if bs != 0 {
                    self.emit(Instruction::I32Const(bs as i32));
                    self.emit(Instruction::I32ShrU);
                    if srcidx < n - 1 {
                        self.emit(Instruction::LocalGet(src));
                        self.emit(Instruction::I32Load(memarg((srcidx + 1) * 4, 2)));
                        ext_top(self, srcidx + 1);
                    } else {
                        match fill {
                            Some(f) => self.emit(Instruction::LocalGet(f)),
                            None => self.emit(Instruction::I32Const(0)),
                        }
                    }
                    self.emit(Instruction::I32Const((32 - bs) as i32));
                    self.emit(Instruction::I32Shl);
                    self.emit(Instruction::I32Or);
                }
            }
            if i == n - 1 && mask != u32::MAX {
                self.emit(Instruction::I32Const(mask as i32));
                self.emit(Instruction::I32And);
            }
            self.emit(Instruction::I32Store(memarg(i * 4, 2)));
        }
    }

    // ── Shifts by a runtime amount ──

    /// Push `base + idx*4` using the chunk index in local `idx`.
    fn push_chunk_addr(&mut self, base: u32, idx: u32) {
        self.emit(Instruction::LocalGet(base));
        self.emit(Instruction::LocalGet(idx));
        self.emit(Instruction::I32Const(2));
        self.emit(Instruction::I32Shl);
        self.emit(Instruction::I32Add);
    }

    /// Split a shift amount local into chunk and bit parts.
    fn split_shift(&mut self, amt: u32) -> (u32, u32) {
        let cs = self.locals.scratch("wcs", ValType::I32);
        let bs = self.locals.scratch("wbs", ValType::I32);
        self.emit(Instruction::LocalGet(amt));
        self.emit(Instruction::I32Const(5));
        self.emit(Instruction::I32ShrU);
        self.emit(Instruction::LocalSet(cs));
        self.emit(Instruction::LocalGet(amt));
        self.emit(Instruction::I32Const(31));
        self.emit(Instruction::I32And);
        self.emit(Instruction::LocalSet(bs));
        (cs, bs)
    }

    /// Apply the declared-width mask only on the top chunk: `v & select(mask,
    /// -1, i == n-1)`.
    fn mask_if_top(&mut self, i: u32, n: u32, mask: u32) {
        if mask == u32::MAX {
            return;
        }
        self.emit(Instruction::I32Const(mask as i32));
        self.emit(Instruction::I32Const(-1));
        self.emit(Instruction::LocalGet(i));
        self.emit(Instruction::I32Const((n - 1) as i32));
        self.emit(Instruction::I32Eq);
        self.emit(Instruction::Select);
        self.emit(Instruction::I32And);
    }

    fn wide_shl_var(&mut self, dst: u32, src: u32, n: u32, mask: u32, amt: u32) {
        let (cs, bs) = self.split_shift(amt);
        let i = self.locals.scratch("wi", ValType::I32);
        let sidx = self.locals.scratch("wsx", ValType::I32);
        self.emit(Instruction::I32Const((n - 1) as i32));
        self.emit(Instruction::LocalSet(i));
        self.emit(Instruction::Block(BlockType::Empty));
        self.emit(Instruction::Loop(BlockType::Empty));
        self.emit(Instruction::LocalGet(i));
        self.emit(Instruction::I32Const(0));
        self.emit(Instruction::I32LtS);
        self.emit(Instruction::BrIf(1));
        // srcidx = i - cs
        self.emit(Instruction::LocalGet(i));
        self.emit(Instruction::LocalGet(cs));
        self.emit(Instruction::I32Sub);
        self.emit(Instruction::LocalSet(sidx));
        // store address first, value second
        self.push_chunk_addr(dst, i);
        self.emit(Instruction::LocalGet(sidx));
        self.emit(Instruction::I32Const(0));
        self.emit(Instruction::I32LtS);
        self.emit(Instruction::If(BlockType::Result(ValType::I32)));
        self.emit(Instruction::I32Const(0));
        self.emit(Instruction::Else);
        self.push_chunk_addr(src, sidx);
        self.emit(Instruction::I32Load(memarg(0, 2)));
        self.emit(Instruction::LocalGet(bs));
        self.emit(Instruction::I32Shl);
        // The low neighbour contributes only when bs != 0; a shift by
        // 32 - bs == 32 would otherwise wrap to a shift by zero.
        self.emit(Instruction::LocalGet(sidx));
        self.emit(Instruction::I32Const(0));
        self.emit(Instruction::I32GtS);
        self.emit(Instruction::LocalGet(bs));
        self.emit(Instruction::I32Const(0));
        self.emit(Instruction::I32Ne);
        self.emit(Instruction::I32And);
        self.emit(Instruction::If(BlockType::Result(ValType::I32)));
        self.emit(Instruction::LocalGet(src));
        self.emit(Instruction::LocalGet(sidx));
        self.emit(Instruction::I32Const(1));
        self.emit(Instruction::I32Sub);
        self.emit(Instruction::I32Const(2));
        self.emit(Instruction::I32Shl);
        self.emit(Instruction::I32Add);
        self.emit(Instruction::I32Load(memarg(0, 2)));
        self.emit(Instruction::I32Const(32));
        self.emit(Instruction::LocalGet(bs));
        self.emit(Instruction::I32Sub);
        self.emit(Instruction::I32ShrU);
        self.emit(Instruction::Else);
        self.emit(Instruction::I32Const(0));
        self.emit(Instruction::End);
        self.emit(Instruction::I32Or);
        self.emit(Instruction::End);
        self.mask_if_top(i, n, mask);
        self.emit(Instruction::I32Store(memarg(0, 2)));
        self.emit(Instruction::LocalGet(i));
        self.emit(Instruction::I32Const(1));
        self.emit(Instruction::I32Sub);
        self.emit(Instruction::LocalSet(i));
        self.emit(Instruction::Br(0));
        self.emit(Instruction::End);
        self.emit(Instruction::End);
    }

    fn wide_shr_var(&mut self, dst: u32, src: u32, dtype: &DataType, amt: u32, signed: bool) {
        let n = dtype.chunks();
        let mask = dtype.last_chunk_mask();
        let fill = if signed {
            Some(self.wide_sign_fill(src, dtype))
        } else {
            None
        };
        let push_fill = |c: &mut Self| match fill {
            Some(f) => c.emit(Instruction::LocalGet(f)),
            None => c.emit(Instruction::I32Const(0)),
        };
        // OR in sign bits above the width when the loaded chunk is the top one.
        let ext_top = |c: &mut Self, sidx: u32| {
            let Some(f) = fill else { return };
            if mask != u32::MAX {
                c.emit(Instruction::LocalGet(f));
                c.emit(Instruction::I32Const(!mask as i32));
                c.emit(Instruction::I32And);
                c.emit(Instruction::I32Const(0));
                c.emit(Instruction::LocalGet(sidx));
                c.emit(Instruction::I32Const((n - 1) as i32));
                c.emit(Instruction::I32Eq);
                c.emit(Instruction::Select);
                c.emit(Instruction::I32Or);
            }
        };
        let (cs, bs) = self.split_shift(amt);
        let i = self.locals.scratch("wi", ValType::I32);
        let sidx = self.locals.scratch("wsx", ValType::I32);
        self.emit(Instruction::I32Const(0));
        self.emit(Instruction::LocalSet(i));
        self.emit(Instruction::Block(BlockType::Empty));
        self.emit(Instruction::Loop(BlockType::Empty));
        self.emit(Instruction::LocalGet(i));
        self.emit(Instruction::I32Const(n as i32));
        self.emit(Instruction::I32GeU);
        self.emit(Instruction::BrIf(1));
        self.emit(Instruction::LocalGet(i));
        self.emit(Instruction::LocalGet(cs));
        self.emit(Instruction::I32Add);
        self.emit(Instruction::LocalSet(sidx));
        self.push_chunk_addr(dst, i);
        self.emit(Instruction::LocalGet(sidx));
        self.emit(Instruction::I32Const(n as i32));
        self.emit(Instruction::I32GeU);
        self.emit(Instruction::If(BlockType::Result(ValType::I32)));
        push_fill(self);
        self.emit(Instruction::Else);
        self.push_chunk_addr(src, sidx);
        self.emit(Instruction::I32Load(memarg(0, 2)));
        ext_top(self, sidx);
        self.emit(Instruction::LocalGet(bs));
        self.emit(Instruction::I32ShrU);
        self.emit(Instruction::LocalGet(bs));
        self.emit(Instruction::If(BlockType::Result(ValType::I32)));
        // neighbour = sidx < n-1 ? chunk[sidx+1] : fill
        self.emit(Instruction::LocalGet(sidx));
        self.emit(Instruction::I32Const((n - 1) as i32));
        self.emit(Instruction::I32LtU);
        self.emit(Instruction::If(BlockType::Result(ValType::I32)));
        self.emit(Instruction::LocalGet(src));
        self.emit(Instruction::LocalGet(sidx));
        self.emit(Instruction::I32Const(1));
        self.emit(Instruction::I32Add);
        self.emit(Instruction::I32Const(2));
        self.emit(Instruction::I32Shl);
        self.emit(Instruction::I32Add);
        self.emit(Instruction::I32Load(memarg(0, 2)));
        if let (Some(f), true) = (fill, mask != u32::MAX) {
            // sidx + 1 may be the top chunk; extend it too.
            self.emit(Instruction::LocalGet(f));
            self.emit(Instruction::I32Const(!mask as i32));
            self.emit(Instruction::I32And);
            self.emit(Instruction::I32Const(0));
            self.emit(Instruction::LocalGet(sidx));
            self.emit(Instruction::I32Const((n - 2) as i32));
            self.emit(Instruction::I32Eq);
            self.emit(Instruction::Select);
            self.emit(Instruction::I32Or);
        }
        self.emit(Instruction::Else);
        push_fill(self);
        self.emit(Instruction::End);
        self.emit(Instruction::I32Const(32));
        self.emit(Instruction::LocalGet(bs));
        self.emit(Instruction::I32Sub);
        self.emit(Instruction::I32Shl);
        self.emit(Instruction::Else);
        self.emit(Instruction::I32Const(0));
        self.emit(Instruction::End);
        self.emit(Instruction::I32Or);
        self.emit(Instruction::End);
        self.mask_if_top(i, n, mask);
        self.emit(Instruction::I32Store(memarg(0, 2)));
        self.emit(Instruction::LocalGet(i));
        self.emit(Instruction::I32Const(1));
        self.emit(Instruction::I32Add);
        self.emit(Instruction::LocalSet(i));
        self.emit(Instruction::Br(0));
        self.emit(Instruction::End);
        self.emit(Instruction::End);
    }

    // ── Comparisons ──

    /// Push a 1-bit comparison result for wide operands.
    pub(crate) fn wide_compare(&mut self, kind: BinaryOp, left: &Expr, right: &Expr) -> Result<()> {
        let ldt = self.expr_dtype(left)?;
        let rdt = self.expr_dtype(right)?;
        let expect = if ldt.chunks() >= rdt.chunks() { ldt } else { rdt };
        let n = expect.chunks();
        let l = self.wide_operand(left, &expect)?;
        let r = self.wide_operand(right, &expect)?;
        match kind {
            BinaryOp::Eq | BinaryOp::Neq => {
                for i in 0..n {
                    self.emit(Instruction::LocalGet(l));
                    self.emit(Instruction::I32Load(memarg(i * 4, 2)));
                    self.emit(Instruction::LocalGet(r));
                    self.emit(Instruction::I32Load(memarg(i * 4, 2)));
                    if kind == BinaryOp::Eq {
                        self.emit(Instruction::I32Eq);
                        if i > 0 {
                            self.emit(Instruction::I32And);
                        }
                    } else {
                        self.emit(Instruction::I32Ne);
                        if i > 0 {
                            self.emit(Instruction::I32Or);
                        }
                    }
                }
                Ok(())
            }
            BinaryOp::Lt | BinaryOp::LtS | BinaryOp::Gt | BinaryOp::GtS => {
                self.wide_order(kind.is_signed(), matches!(kind, BinaryOp::Lt | BinaryOp::LtS), l, r, &expect);
                Ok(())
            }
            BinaryOp::Lte | BinaryOp::LteS => {
                self.wide_order(kind.is_signed(), false, l, r, &expect);
                self.emit(Instruction::I32Eqz);
                Ok(())
            }
            BinaryOp::Gte | BinaryOp::GteS => {
                self.wide_order(kind.is_signed(), true, l, r, &expect);
                self.emit(Instruction::I32Eqz);
                Ok(())
            }
            other => Err(Error::UnknownOperator(format!(
                "{other} on wide operands"
            ))),
        }
    }

    /// Ordered comparison via a select chain built LSB→MSB, so the most
    /// significant differing chunk decides.
    fn wide_order(&mut self, signed: bool, favor_lt: bool, l: u32, r: u32, dtype: &DataType) {
        let n = dtype.chunks();
        // Align the declared sign bit with bit 31 of the top chunk.
        let k = 31 - ((dtype.width() - 1) % 32);
        let acc = self.locals.scratch("wcmp", ValType::I32);
        self.emit(Instruction::I32Const(0));
        self.emit(Instruction::LocalSet(acc));
        for i in 0..n {
            let top = i == n - 1;
            let use_signed = signed && top;
            let shift = if use_signed && k != 0 { Some(k as i32) } else { None };
            let push_chunk = |c: &mut Self, base: u32| {
                c.emit(Instruction::LocalGet(base));
                c.emit(Instruction::I32Load(memarg(i * 4, 2)));
                if let Some(sh) = shift {
                    c.emit(Instruction::I32Const(sh));
                    c.emit(Instruction::I32Shl);
                }
            };
            self.emit(Instruction::I32Const(1));
            self.emit(Instruction::I32Const(0));
            self.emit(Instruction::LocalGet(acc));
            // opposed comparison
            push_chunk(self, l);
            push_chunk(self, r);
            self.emit(match (use_signed, favor_lt) {
                (true, true) => Instruction::I32GtS,
                (false, true) => Instruction::I32GtU,
                (true, false) => Instruction::I32LtS,
                (false, false) => Instruction::I32LtU,
            });
            self.emit(Instruction::Select);
            // favored comparison
            push_chunk(self, l);
            push_chunk(self, r);
            self.emit(match (use_signed, favor_lt) {
                (true, true) => Instruction::I32LtS,
                (false, true) => Instruction::I32LtU,
                (true, false) => Instruction::I32GtS,
                (false, false) => Instruction::I32GtU,
            });
            self.emit(Instruction::Select);
            self.emit(Instruction::LocalSet(acc));
        }
        self.emit(Instruction::LocalGet(acc));
    }

    // ── Change detection ──

    pub(crate) fn wide_changedet(&mut self, left: &Expr, right: &Expr) -> Result<()> {
        let Some(flag) = self.changed_local else {
            return Err(Error::UnknownOperator(
                "changedet outside _change_request".into(),
            ));
        };
        self.wide_compare(BinaryOp::Neq, left, right)?;
        self.emit(Instruction::If(BlockType::Empty));
        self.emit(Instruction::I32Const(1));
        self.emit(Instruction::LocalSet(flag));
        self.assign(right, left)?;
        self.emit(Instruction::End);
        Ok(())
    }

    // ── Chunk copies ──

    /// Copy `n_copy` chunks from `src` to `dst`, zero-fill up to `n_total`,
    /// masking the top chunk to the declared width.
    pub(crate) fn copy_chunks(&mut self, dst: u32, src: u32, n_copy: u32, n_total: u32, mask: u32) {
        for i in 0..n_copy.min(n_total) {
            self.emit(Instruction::LocalGet(dst));
            self.emit(Instruction::LocalGet(src));
            self.emit(Instruction::I32Load(memarg(i * 4, 2)));
            if i == n_total - 1 && mask != u32::MAX {
                self.emit(Instruction::I32Const(mask as i32));
                self.emit(Instruction::I32And);
            }
            self.emit(Instruction::I32Store(memarg(i * 4, 2)));
        }
        for i in n_copy..n_total {
            self.emit(Instruction::LocalGet(dst));
            self.emit(Instruction::I32Const(0));
            self.emit(Instruction::I32Store(memarg(i * 4, 2)));
        }
    }
}
