//! Peephole optimizer for emitted function bodies.
//!
//! Runs on the flat instruction buffer before the body is encoded. Branches
//! in structured WASM target blocks rather than byte offsets, so removing
//! instructions needs no fixup pass. Patterns stay within one basic block by
//! construction: every window is a run of adjacent non-control instructions.

use wasm_encoder::Instruction;

/// Rewrite until a pass makes no changes.
pub fn optimize(body: &mut Vec<Instruction<'static>>) {
    while pass(body) {}
}

fn pass(body: &mut Vec<Instruction<'static>>) -> bool {
    let mut out: Vec<Instruction<'static>> = Vec::with_capacity(body.len());
    let mut changed = false;
    for instr in body.drain(..) {
        match (&instr, out.last()) {
            // Identity arithmetic against a just-pushed constant.
            (
                Instruction::I32Add
                | Instruction::I32Sub
                | Instruction::I32Or
                | Instruction::I32Xor
                | Instruction::I32Shl
                | Instruction::I32ShrU
                | Instruction::I32ShrS,
                Some(Instruction::I32Const(0)),
            )
            | (Instruction::I32And, Some(Instruction::I32Const(-1))) => {
                out.pop();
                changed = true;
            }
            (
                Instruction::I64Add
                | Instruction::I64Sub
                | Instruction::I64Or
                | Instruction::I64Xor
                | Instruction::I64Shl
                | Instruction::I64ShrU
                | Instruction::I64ShrS,
                Some(Instruction::I64Const(0)),
            )
            | (Instruction::I64And, Some(Instruction::I64Const(-1))) => {
                out.pop();
                changed = true;
            }
            // Consecutive masks collapse into their intersection.
            (Instruction::I32And, _) if mask_pair(&out).is_some() => {
                let merged = mask_pair(&out).unwrap_or(-1);
                out.truncate(out.len() - 3);
                out.push(Instruction::I32Const(merged));
                out.push(Instruction::I32And);
                changed = true;
            }
            // set x; get x  →  tee x
            (Instruction::LocalGet(a), Some(Instruction::LocalSet(b))) if a == b => {
                let idx = *a;
                out.pop();
                out.push(Instruction::LocalTee(idx));
                changed = true;
            }
            _ => out.push(instr),
        }
    }
    *body = out;
    changed
}

/// The merged constant when the buffer ends `i32.const m1`, `i32.and`,
/// `i32.const m2` and the incoming instruction is the second `i32.and`.
fn mask_pair(out: &[Instruction<'static>]) -> Option<i32> {
    let n = out.len();
    if n < 3 {
        return None;
    }
    match (&out[n - 3], &out[n - 2], &out[n - 1]) {
        (Instruction::I32Const(m1), Instruction::I32And, Instruction::I32Const(m2)) => {
            Some(m1 & m2)
        }
        _ => None,
    }
}
