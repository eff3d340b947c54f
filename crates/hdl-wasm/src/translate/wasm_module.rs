//! Module assembly: one WASM function per IR block plus the helpers.
//!
//! Pipeline per module:
//!   Phase 1: place all variables (`StateLayout::build`).
//!   Phase 2: assign function indices (`FuncTable::build`) so calls resolve
//!            before any body exists.
//!   Phase 3: translate each block body; block variables may still be
//!            promoted into the layout here.
//!   Phase 4: finalize the layout (trace trailer, page count, memory cap).
//!   Phase 5: emit the helpers that depend on final offsets, run the
//!            peephole, assemble sections, and validate the binary.

use wasm_encoder::{
    BlockType, CodeSection, EntityType, ExportKind, ExportSection, Function, FunctionSection,
    ImportSection, Instruction, MemorySection, MemoryType, Module, TypeSection, ValType,
};

use super::codegen::{BlockCompiler, DATAPTR, FuncBody, memarg};
use super::{
    BLOCK_CHANGE, CompileOptions, CompiledModule, FuncTable, IMPORT_FINISH, IMPORT_RAND,
    IMPORT_READMEM, IMPORT_STOP, IMPORT_TIME, SPECIAL_BLOCKS, StateLayout, peephole,
};
use crate::ir::{BlockDef, ModuleDef, NativeType};
use crate::{Error, Result};

// Type section indices.
const TYPE_VOID: u32 = 0; // (dataptr) -> ()
const TYPE_FLAG: u32 = 1; // (dataptr) -> i32
const TYPE_PAIR: u32 = 2; // (dataptr, arg) -> ()
const TYPE_TIME: u32 = 3; // (dataptr) -> i64
const TYPE_READMEM: u32 = 4; // (dataptr, file, mem, ishex) -> ()

pub fn emit_module(
    module: &ModuleDef,
    pool: Option<&ModuleDef>,
    options: &CompileOptions,
) -> Result<CompiledModule> {
    let mut layout = StateLayout::build(module, pool)?;
    let funcs = FuncTable::build(module)?;
    let has_clk = layout.lookup("clk").is_some();

    // Phase 3: block bodies.
    let mut bodies: Vec<FuncBody> = Vec::new();
    for name in &funcs.block_names {
        let synthesized = BlockDef {
            name: name.clone(),
            exprs: Vec::new(),
        };
        let block = module.block(name).unwrap_or(&synthesized);
        let compiler = BlockCompiler::new(&mut layout, &funcs, options);
        bodies.push(compiler.compile_block(block, name == BLOCK_CHANGE)?);
    }

    // Phase 4: trailer and memory sizing.
    layout.finalize(options.trace_depth, options.max_memory_bytes())?;

    // Phase 5: helpers over the final layout.
    bodies.push(emit_copy_trace_rec(&layout));
    bodies.push(emit_eval(&funcs, options.max_eval_iterations));
    bodies.push(emit_tick2(&layout, &funcs, has_clk)?);

    if options.peephole {
        for body in &mut bodies {
            peephole::optimize(&mut body.instructions);
        }
    }

    let wasm = assemble(&layout, &funcs, &bodies)?;
    wasmparser::validate(&wasm).map_err(|e| Error::ValidationFailed(e.to_string()))?;

    tracing::debug!(
        module = %module.name,
        bytes = wasm.len(),
        pages = layout.pages,
        "module emitted"
    );
    Ok(CompiledModule {
        name: module.name.clone(),
        wasm,
        layout,
        has_clk,
        options: options.clone(),
    })
}

/// Copy the leading `TRACERECLEN` bytes into the ring at `TRACEOFS`, then
/// advance and wrap the cursor. All three metadata words are data-pointer
/// relative.
fn emit_copy_trace_rec(layout: &StateLayout) -> FuncBody {
    let meta = layout.state_bytes;
    let mut b: Vec<Instruction<'static>> = Vec::new();
    let reclen = 1u32; // locals after the dataptr param
    let ofs = 2u32;
    let j = 3u32;

    b.push(Instruction::LocalGet(DATAPTR));
    b.push(Instruction::I32Load(memarg(meta, 2)));
    b.push(Instruction::LocalSet(reclen));
    b.push(Instruction::LocalGet(DATAPTR));
    b.push(Instruction::I32Load(memarg(meta + 4, 2)));
    b.push(Instruction::LocalSet(ofs));
    b.push(Instruction::I32Const(0));
    b.push(Instruction::LocalSet(j));
    b.push(Instruction::Block(BlockType::Empty));
    b.push(Instruction::Loop(BlockType::Empty));
    b.push(Instruction::LocalGet(j));
    b.push(Instruction::LocalGet(reclen));
    b.push(Instruction::I32GeU);
    b.push(Instruction::BrIf(1));
    b.push(Instruction::LocalGet(DATAPTR));
    b.push(Instruction::LocalGet(ofs));
    b.push(Instruction::I32Add);
    b.push(Instruction::LocalGet(j));
    b.push(Instruction::I32Add);
    b.push(Instruction::LocalGet(DATAPTR));
    b.push(Instruction::LocalGet(j));
    b.push(Instruction::I32Add);
    b.push(Instruction::I64Load(memarg(0, 3)));
    b.push(Instruction::I64Store(memarg(0, 3)));
    b.push(Instruction::LocalGet(j));
    b.push(Instruction::I32Const(8));
    b.push(Instruction::I32Add);
    b.push(Instruction::LocalSet(j));
    b.push(Instruction::Br(0));
    b.push(Instruction::End);
    b.push(Instruction::End);
    // Advance, wrapping at TRACEEND.
    b.push(Instruction::LocalGet(ofs));
    b.push(Instruction::LocalGet(reclen));
    b.push(Instruction::I32Add);
    b.push(Instruction::LocalSet(ofs));
    b.push(Instruction::LocalGet(ofs));
    b.push(Instruction::LocalGet(DATAPTR));
    b.push(Instruction::I32Load(memarg(meta + 8, 2)));
    b.push(Instruction::I32GeU);
    b.push(Instruction::If(BlockType::Empty));
    b.push(Instruction::I32Const(layout.trace_offset as i32));
    b.push(Instruction::LocalSet(ofs));
    b.push(Instruction::End);
    b.push(Instruction::LocalGet(DATAPTR));
    b.push(Instruction::LocalGet(ofs));
    b.push(Instruction::I32Store(memarg(meta + 4, 2)));

    FuncBody {
        instructions: b,
        locals: vec![(3, ValType::I32)],
    }
}

/// The settle helper: `_eval`, then `_change_request`, recursing while
/// changes are reported. Nested if/else rather than a loop so engines can
/// inline and unroll it.
fn emit_eval(funcs: &FuncTable, max_iterations: u32) -> FuncBody {
    let mut b: Vec<Instruction<'static>> = Vec::new();
    let eval_idx = funcs
        .lookup(super::BLOCK_EVAL)
        .expect("special blocks always present");
    let change_idx = funcs
        .lookup(BLOCK_CHANGE)
        .expect("special blocks always present");
    nest_eval(&mut b, eval_idx, change_idx, 1, max_iterations);
    FuncBody {
        instructions: b,
        locals: Vec::new(),
    }
}

fn nest_eval(
    b: &mut Vec<Instruction<'static>>,
    eval_idx: u32,
    change_idx: u32,
    depth: u32,
    max: u32,
) {
    b.push(Instruction::LocalGet(DATAPTR));
    b.push(Instruction::Call(eval_idx));
    if depth < max {
        b.push(Instruction::LocalGet(DATAPTR));
        b.push(Instruction::Call(change_idx));
        b.push(Instruction::If(BlockType::Empty));
        nest_eval(b, eval_idx, change_idx, depth + 1, max);
        b.push(Instruction::End);
    }
}

/// `tick2(dataptr, iters)`: clk low, settle, clk high, settle, record, once
/// per iteration. Without a `clk` variable it degenerates to one `eval`
/// call, standing in for the export alias.
fn emit_tick2(layout: &StateLayout, funcs: &FuncTable, has_clk: bool) -> Result<FuncBody> {
    let mut b: Vec<Instruction<'static>> = Vec::new();
    if !has_clk {
        b.push(Instruction::LocalGet(DATAPTR));
        b.push(Instruction::Call(funcs.eval));
        return Ok(FuncBody {
            instructions: b,
            locals: Vec::new(),
        });
    }
    let clk = layout.get("clk")?;
    if clk.native != NativeType::I32 {
        return Err(Error::UnsupportedDataType(format!(
            "clk must be a narrow logic signal, found {}",
            clk.dtype
        )));
    }
    let (clk_off, clk_size) = (clk.offset, clk.size);
    let iters = 1u32; // second parameter

    let store_clk = |b: &mut Vec<Instruction<'static>>, value: i32| {
        b.push(Instruction::LocalGet(DATAPTR));
        b.push(Instruction::I32Const(value));
        match clk_size {
            1 => b.push(Instruction::I32Store8(memarg(clk_off, 0))),
            2 => b.push(Instruction::I32Store16(memarg(clk_off, 1))),
            _ => b.push(Instruction::I32Store(memarg(clk_off, 2))),
        }
    };

    b.push(Instruction::Block(BlockType::Empty));
    b.push(Instruction::Loop(BlockType::Empty));
    b.push(Instruction::LocalGet(iters));
    b.push(Instruction::I32Eqz);
    b.push(Instruction::BrIf(1));
    store_clk(&mut b, 0);
    b.push(Instruction::LocalGet(DATAPTR));
    b.push(Instruction::Call(funcs.eval));
    store_clk(&mut b, 1);
    b.push(Instruction::LocalGet(DATAPTR));
    b.push(Instruction::Call(funcs.eval));
    b.push(Instruction::LocalGet(DATAPTR));
    b.push(Instruction::Call(funcs.copy_trace_rec));
    b.push(Instruction::LocalGet(iters));
    b.push(Instruction::I32Const(1));
    b.push(Instruction::I32Sub);
    b.push(Instruction::LocalSet(iters));
    b.push(Instruction::Br(0));
    b.push(Instruction::End);
    b.push(Instruction::End);

    Ok(FuncBody {
        instructions: b,
        locals: Vec::new(),
    })
}

fn assemble(layout: &StateLayout, funcs: &FuncTable, bodies: &[FuncBody]) -> Result<Vec<u8>> {
    let mut module = Module::new();

    let mut types = TypeSection::new();
    types.ty().function(vec![ValType::I32], vec![]);
    types.ty().function(vec![ValType::I32], vec![ValType::I32]);
    types.ty().function(vec![ValType::I32, ValType::I32], vec![]);
    types.ty().function(vec![ValType::I32], vec![ValType::I64]);
    types.ty().function(
        vec![ValType::I32, ValType::I32, ValType::I32, ValType::I32],
        vec![],
    );
    module.section(&types);

    let mut imports = ImportSection::new();
    for (name, ty) in [
        ("$finish", TYPE_PAIR),
        ("$stop", TYPE_PAIR),
        ("$time", TYPE_TIME),
        ("$rand", TYPE_FLAG),
        ("$readmem", TYPE_READMEM),
    ] {
        imports.import("builtins", name, EntityType::Function(ty));
    }
    debug_assert_eq!(IMPORT_FINISH, 0);
    debug_assert_eq!(IMPORT_STOP, 1);
    debug_assert_eq!(IMPORT_TIME, 2);
    debug_assert_eq!(IMPORT_RAND, 3);
    debug_assert_eq!(IMPORT_READMEM, 4);
    module.section(&imports);

    let mut functions = FunctionSection::new();
    for name in &funcs.block_names {
        functions.function(if name == BLOCK_CHANGE {
            TYPE_FLAG
        } else {
            TYPE_VOID
        });
    }
    functions.function(TYPE_VOID); // copyTraceRec
    functions.function(TYPE_VOID); // eval
    functions.function(TYPE_PAIR); // tick2
    module.section(&functions);

    let mut memories = MemorySection::new();
    memories.memory(MemoryType {
        minimum: u64::from(layout.pages),
        maximum: Some(u64::from(layout.pages)),
        memory64: false,
        shared: false,
        page_size_log2: None,
    });
    module.section(&memories);

    let mut exports = ExportSection::new();
    exports.export("memory", ExportKind::Memory, 0);
    for name in SPECIAL_BLOCKS {
        exports.export(name, ExportKind::Func, funcs.index_of(name)?);
    }
    exports.export("eval", ExportKind::Func, funcs.eval);
    exports.export("tick2", ExportKind::Func, funcs.tick2);
    module.section(&exports);

    let mut code = CodeSection::new();
    for body in bodies {
        let mut func = Function::new(body.locals.clone());
        for instr in &body.instructions {
            func.instruction(instr);
        }
        func.instruction(&Instruction::End);
        code.function(&func);
    }
    module.section(&code);

    Ok(module.finish())
}
