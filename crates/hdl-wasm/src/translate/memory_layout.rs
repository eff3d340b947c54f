//! State buffer layout for one compiled module.
//!
//! All simulation state lives in a single flat region at the base of linear
//! memory. The layout is decided once, before any code is emitted, and the
//! runtime borrows it read-only for proxy access.
//!
//! ```text
//! State region (data pointer relative):
//!   0 ..             Output variables, padded to 8 (the trace record)
//!   ..               Inputs and internal state, padded to 8
//!   const_offset ..  Module constants, then the shared constant pool
//!   ..               Codegen scratch (promoted block vars, wide temporaries)
//!   state_bytes ..   Metadata trailer: TRACERECLEN, TRACEOFS, TRACEEND (u32 each)
//!   trace_offset ..  Trace ring buffer (trace_depth records)
//!   trace_end        End of ring; TRACEOFS wraps back to trace_offset here
//! ```
//!
//! `TRACEOFS` and `TRACEEND` hold data-pointer-relative offsets so a nonzero
//! base address keeps working.

use std::collections::HashMap;

use crate::ir::{ConstExpr, DataType, InitEntry, ModuleDef, NativeType, VarDef};
use crate::{Error, Result};

/// WASM page size in bytes.
pub const PAGE_SIZE: u32 = 65536;

/// Bytes occupied by the three metadata words.
pub const TRACE_META_BYTES: u32 = 12;

/// One placed variable.
#[derive(Debug, Clone)]
pub struct VarSlot {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    pub native: NativeType,
    pub dtype: DataType,
    pub index: usize,
    pub init_value: Option<Vec<InitEntry>>,
    pub const_value: Option<ConstExpr>,
}

impl VarSlot {
    #[must_use]
    pub fn is_const(&self) -> bool {
        self.const_value.is_some()
    }
}

/// The layout record. Built during compilation; immutable afterwards.
#[derive(Debug, Clone)]
pub struct StateLayout {
    len: u32,
    slots: Vec<VarSlot>,
    by_name: HashMap<String, usize>,
    /// Bytes covered by output variables, padded to a multiple of 8.
    /// Copying this many leading bytes captures one trace record.
    pub output_bytes: u32,
    /// Start of the constant region; `powercycle` zeroes `[0, const_offset)`.
    pub const_offset: u32,
    /// Save/load region size; also where the metadata trailer starts.
    pub state_bytes: u32,
    /// Ring buffer start, relative to the data pointer.
    pub trace_offset: u32,
    /// Ring buffer end.
    pub trace_end: u32,
    /// Number of records the ring holds.
    pub trace_depth: u32,
    /// Linear memory size in pages (minimum == maximum).
    pub pages: u32,
}

impl StateLayout {
    /// Place all module variables plus the shared constant pool.
    ///
    /// Non-constants are sorted outputs-first, then by size descending to
    /// improve packing. Each region is padded to an 8-byte boundary so the
    /// trace copy loop can run on 64-bit words.
    pub fn build(module: &ModuleDef, pool: Option<&ModuleDef>) -> Result<Self> {
        let mut layout = StateLayout {
            len: 0,
            slots: Vec::new(),
            by_name: HashMap::new(),
            output_bytes: 0,
            const_offset: 0,
            state_bytes: 0,
            trace_offset: 0,
            trace_end: 0,
            trace_depth: 0,
            pages: 0,
        };

        let mut mutable: Vec<&VarDef> = module
            .vardefs
            .iter()
            .filter(|v| v.const_value.is_none())
            .collect();
        mutable.sort_by_key(|v| (!v.is_output, std::cmp::Reverse(v.dtype.size_bytes())));

        for &def in mutable.iter().filter(|v| v.is_output) {
            layout.emplace(def)?;
        }
        layout.pad_to(8);
        layout.output_bytes = layout.len;

        for &def in mutable.iter().filter(|v| !v.is_output) {
            layout.emplace(def)?;
        }
        layout.pad_to(8);

        layout.const_offset = layout.len;
        for def in module.vardefs.iter().filter(|v| v.const_value.is_some()) {
            layout.emplace(def)?;
        }
        if let Some(pool) = pool {
            for def in &pool.vardefs {
                layout.emplace(def)?;
            }
        }
        layout.pad_to(8);

        tracing::debug!(
            module = %module.name,
            output_bytes = layout.output_bytes,
            const_offset = layout.const_offset,
            vars = layout.slots.len(),
            "state layout placed"
        );
        Ok(layout)
    }

    /// Append the metadata trailer and trace ring, then size the memory.
    ///
    /// Called after codegen has promoted its block variables, so scratch
    /// entries land between the constants and the trailer.
    pub fn finalize(&mut self, trace_depth: u32, max_memory_bytes: u64) -> Result<()> {
        self.pad_to(8);
        self.state_bytes = self.len;
        self.trace_depth = trace_depth;
        // Ring records stay 8-aligned for the 64-bit copy loop.
        self.trace_offset = (self.state_bytes + TRACE_META_BYTES).next_multiple_of(8);
        self.trace_end = self.trace_offset + trace_depth * self.output_bytes;

        let total = u64::from(self.trace_end);
        if total > max_memory_bytes {
            return Err(Error::MemoryLimitExceeded {
                needed: total,
                cap: max_memory_bytes,
            });
        }
        self.pages = self.trace_end.div_ceil(PAGE_SIZE).max(1);
        Ok(())
    }

    /// Assign an aligned offset to one variable.
    pub fn emplace(&mut self, def: &VarDef) -> Result<&VarSlot> {
        if self.by_name.contains_key(&def.name) {
            return Err(Error::Internal(format!(
                "variable {} placed twice",
                def.name
            )));
        }
        let size = def.dtype.size_bytes();
        self.pad_to(def.dtype.align());
        let index = self.slots.len();
        let slot = VarSlot {
            name: def.name.clone(),
            offset: self.len,
            size,
            native: def.dtype.native(),
            dtype: def.dtype.clone(),
            index,
            init_value: def.init_value.clone(),
            const_value: def.const_value.clone(),
        };
        self.len += size;
        self.by_name.insert(def.name.clone(), index);
        self.slots.push(slot);
        Ok(&self.slots[index])
    }

    /// Reserve an anonymous scratch slot for codegen temporaries.
    pub fn alloc_scratch(&mut self, dtype: &DataType) -> u32 {
        let name = format!("$tmp${}", self.slots.len());
        let def = VarDef::new(name, dtype.clone());
        let slot = self.emplace(&def).expect("scratch names are unique");
        slot.offset
    }

    fn pad_to(&mut self, align: u32) {
        self.len = self.len.next_multiple_of(align);
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&VarSlot> {
        self.by_name.get(name).map(|&i| &self.slots[i])
    }

    pub fn get(&self, name: &str) -> Result<&VarSlot> {
        self.lookup(name)
            .ok_or_else(|| Error::UnknownVariable(name.to_owned()))
    }

    #[must_use]
    pub fn slots(&self) -> &[VarSlot] {
        &self.slots
    }

    /// The slot whose byte range contains `offset`, if any.
    #[must_use]
    pub fn slot_at(&self, offset: u32) -> Option<&VarSlot> {
        self.slots
            .iter()
            .find(|s| offset >= s.offset && offset < s.offset + s.size)
    }
}
