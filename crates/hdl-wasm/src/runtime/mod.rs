//! Simulation driver: instantiates the generated WASM module and exposes the
//! host lifecycle (`powercycle`, `eval`, `tick`, `tick2`, state save/load).
//!
//! All mutable per-instance state (the `$finish`/`$stop` flags, the elapsed
//! time origin, the RNG) lives in the wasmi `Store` data, so several
//! simulators can run side by side without interference.

pub mod readmem;
pub mod state;

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use wasmi::{Caller, Engine, Instance, Linker, Memory, Module, Store, TypedFunc};

use crate::translate::{
    BLOCK_CHANGE, BLOCK_CTOR, BLOCK_EVAL, BLOCK_INITIAL, BLOCK_SETTLE, CompileOptions,
    CompiledModule, StateLayout,
};
use crate::{Error, Result};

pub use state::SignalValue;

/// Settle iteration cap applied by `powercycle`.
const POWERCYCLE_SETTLE_LIMIT: u32 = 100;

/// Number of ticks `reset` holds `rst_n` low.
const RESET_HOLD_TICKS: u32 = 10;

/// Host callback resolving `$readmem` file names to their contents.
pub type FileLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Instantiation options.
#[derive(Default)]
pub struct SimOptions {
    /// Seed for the `$rand` builtin; unseeded instances use OS entropy.
    pub seed: Option<u64>,
    /// File lookup for `$readmem`.
    pub get_file: Option<FileLookup>,
}

/// Mutable host-side state stored inside the wasmi `Store`.
pub struct HostState {
    finished: bool,
    stopped: bool,
    origin: Option<Instant>,
    rng: StdRng,
    get_file: Option<FileLookup>,
    layout: Arc<StateLayout>,
    /// Typed error slot for traps raised from host builtins.
    host_error: Option<Error>,
}

/// One instantiated simulator.
pub struct Sim {
    store: Store<HostState>,
    #[allow(dead_code)]
    instance: Instance,
    memory: Memory,
    layout: Arc<StateLayout>,
    name: String,
    has_clk: bool,
    options: CompileOptions,
    f_ctor: TypedFunc<i32, ()>,
    f_initial: TypedFunc<i32, ()>,
    f_settle: TypedFunc<i32, ()>,
    f_eval_block: TypedFunc<i32, ()>,
    f_change: TypedFunc<i32, i32>,
    f_eval: TypedFunc<i32, ()>,
    f_tick2: TypedFunc<(i32, i32), ()>,
    pub(crate) trace_cursor: u32,
}

impl Sim {
    /// Compile-to-instance in one step with default options.
    pub fn new(compiled: CompiledModule) -> Result<Self> {
        Self::with_options(compiled, SimOptions::default())
    }

    pub fn with_options(compiled: CompiledModule, sim_options: SimOptions) -> Result<Self> {
        let engine = Engine::default();
        let module = Module::new(&engine, &compiled.wasm[..])?;
        let layout = Arc::new(compiled.layout);

        let rng = match sim_options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut store = Store::new(
            &engine,
            HostState {
                finished: false,
                stopped: false,
                origin: None,
                rng,
                get_file: sim_options.get_file,
                layout: Arc::clone(&layout),
                host_error: None,
            },
        );

        let mut linker = Linker::<HostState>::new(&engine);
        linker
            .func_wrap(
                "builtins",
                "$finish",
                |mut caller: Caller<HostState>, _dp: i32, line: i32| {
                    let host = caller.data_mut();
                    if !host.finished {
                        tracing::info!(line, "$finish");
                    }
                    host.finished = true;
                },
            )
            .map_err(|e| Error::Internal(e.to_string()))?;
        linker
            .func_wrap(
                "builtins",
                "$stop",
                |mut caller: Caller<HostState>, _dp: i32, line: i32| {
                    let host = caller.data_mut();
                    if !host.stopped {
                        tracing::warn!(line, "$stop");
                    }
                    host.stopped = true;
                },
            )
            .map_err(|e| Error::Internal(e.to_string()))?;
        linker
            .func_wrap(
                "builtins",
                "$time",
                |caller: Caller<HostState>, _dp: i32| -> i64 {
                    caller
                        .data()
                        .origin
                        .map_or(0, |t| i64::try_from(t.elapsed().as_millis()).unwrap_or(i64::MAX))
                },
            )
            .map_err(|e| Error::Internal(e.to_string()))?;
        linker
            .func_wrap(
                "builtins",
                "$rand",
                |mut caller: Caller<HostState>, _dp: i32| -> i32 {
                    caller.data_mut().rng.next_u32() as i32
                },
            )
            .map_err(|e| Error::Internal(e.to_string()))?;
        linker
            .func_wrap(
                "builtins",
                "$readmem",
                |mut caller: Caller<HostState>,
                 dp: i32,
                 file_ptr: i32,
                 mem_ptr: i32,
                 is_hex: i32|
                 -> std::result::Result<(), wasmi::Error> {
                    readmem::builtin_readmem(&mut caller, dp, file_ptr, mem_ptr, is_hex)
                },
            )
            .map_err(|e| Error::Internal(e.to_string()))?;

        let instance = linker.instantiate(&mut store, &module)?.start(&mut store)?;
        let memory = instance
            .get_memory(&store, "memory")
            .ok_or_else(|| Error::Internal("generated module exports no memory".into()))?;

        let mut sim = Sim {
            f_ctor: instance.get_typed_func::<i32, ()>(&store, BLOCK_CTOR)?,
            f_initial: instance.get_typed_func::<i32, ()>(&store, BLOCK_INITIAL)?,
            f_settle: instance.get_typed_func::<i32, ()>(&store, BLOCK_SETTLE)?,
            f_eval_block: instance.get_typed_func::<i32, ()>(&store, BLOCK_EVAL)?,
            f_change: instance.get_typed_func::<i32, i32>(&store, BLOCK_CHANGE)?,
            f_eval: instance.get_typed_func::<i32, ()>(&store, "eval")?,
            f_tick2: instance.get_typed_func::<(i32, i32), ()>(&store, "tick2")?,
            store,
            instance,
            memory,
            layout,
            name: compiled.name,
            has_clk: compiled.has_clk,
            options: compiled.options,
            trace_cursor: 0,
        };
        sim.write_trailer();
        sim.write_constants()?;
        Ok(sim)
    }

    /// Zero mutable state, apply initial values, run the reset blocks, then
    /// settle to a fixed point.
    pub fn powercycle(&mut self) -> Result<()> {
        let const_offset = self.layout.const_offset as usize;
        self.memory.data_mut(&mut self.store)[..const_offset].fill(0);
        {
            let host = self.store.data_mut();
            host.finished = false;
            host.stopped = false;
            host.origin = Some(Instant::now());
        }
        self.apply_init_values()?;
        let r = self.f_ctor.call(&mut self.store, 0);
        self.surface(r)?;
        let r = self.f_initial.call(&mut self.store, 0);
        self.surface(r)?;
        for _ in 0..POWERCYCLE_SETTLE_LIMIT {
            let r = self.f_settle.call(&mut self.store, 0);
            self.surface(r)?;
            let r = self.f_eval_block.call(&mut self.store, 0);
            self.surface(r)?;
            let r = self.f_change.call(&mut self.store, 0);
            if self.surface(r)? == 0 {
                return Ok(());
            }
        }
        Err(Error::SettleDidNotConverge(POWERCYCLE_SETTLE_LIMIT))
    }

    /// One bounded settle pass over the design.
    pub fn eval(&mut self) -> Result<()> {
        let r = self.f_eval.call(&mut self.store, 0);
        self.surface(r)
    }

    /// Flip bit 0 of `clk` and settle.
    pub fn tick(&mut self) -> Result<()> {
        let clk = self.peek_scalar("clk")?;
        self.poke_scalar("clk", clk ^ 1)?;
        self.eval()
    }

    /// Run `iters` full clock cycles, recording a trace entry per cycle.
    pub fn tick2(&mut self, iters: u32) -> Result<()> {
        let r = self.f_tick2.call(&mut self.store, (0, iters as i32));
        self.surface(r)
    }

    /// Power-on reset convenience: keep `ui_in` across the powercycle and
    /// hold `rst_n` low for a few cycles.
    pub fn reset(&mut self) -> Result<()> {
        let ui_in = self.peek("ui_in").ok();
        self.powercycle()?;
        if let Some(v) = ui_in {
            self.poke("ui_in", &v)?;
        }
        if self.layout.lookup("rst_n").is_some() {
            self.poke_scalar("rst_n", 0)?;
            self.tick2(RESET_HOLD_TICKS)?;
            self.poke_scalar("rst_n", 1)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.store.data().finished
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.store.data().stopped
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn has_clk(&self) -> bool {
        self.has_clk
    }

    /// The layout is the contract for raw-offset readers (video/audio paths).
    #[must_use]
    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    /// Snapshot of the persistent state region.
    #[must_use]
    pub fn save_state(&self) -> Vec<u8> {
        self.memory.data(&self.store)[..self.layout.state_bytes as usize].to_vec()
    }

    pub fn load_state(&mut self, bytes: &[u8]) -> Result<()> {
        let expected = self.layout.state_bytes as usize;
        if bytes.len() != expected {
            return Err(Error::StateSizeMismatch {
                expected,
                got: bytes.len(),
            });
        }
        self.memory.data_mut(&mut self.store)[..expected].copy_from_slice(bytes);
        Ok(())
    }

    // ── internals ──

    /// Replace engine traps raised by host builtins with their typed error.
    fn surface<T>(&mut self, r: std::result::Result<T, wasmi::Error>) -> Result<T> {
        match r {
            Ok(v) => Ok(v),
            Err(e) => match self.store.data_mut().host_error.take() {
                Some(host) => Err(host),
                None => Err(Error::Engine(e)),
            },
        }
    }

    /// Write the trace metadata words the generated `copyTraceRec` reads.
    fn write_trailer(&mut self) {
        let meta = self.layout.state_bytes as usize;
        let words = [
            self.layout.output_bytes,
            self.layout.trace_offset,
            self.layout.trace_end,
        ];
        let data = self.memory.data_mut(&mut self.store);
        for (i, w) in words.iter().enumerate() {
            data[meta + i * 4..meta + i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
    }

    fn write_constants(&mut self) -> Result<()> {
        let layout = Arc::clone(&self.layout);
        for slot in layout.slots() {
            if let Some(cv) = &slot.const_value {
                self.write_const_chunks(slot.offset, slot.size, cv)?;
            }
        }
        Ok(())
    }

    /// Reset-time initial values; only flat array-init lists are supported.
    fn apply_init_values(&mut self) -> Result<()> {
        let layout = Arc::clone(&self.layout);
        for slot in layout.slots() {
            let Some(entries) = &slot.init_value else {
                continue;
            };
            let crate::ir::DataType::Array { subtype, .. } = &slot.dtype else {
                return Err(Error::UnsupportedDataType(format!(
                    "initial value on non-array {}",
                    slot.name
                )));
            };
            if subtype.is_array() {
                return Err(Error::UnsupportedDataType(format!(
                    "multidimensional initial value on {}",
                    slot.name
                )));
            }
            let elsize = subtype.size_bytes();
            for entry in entries {
                let offset = slot.offset + entry.index * elsize;
                if entry.index >= slot.dtype.element_count() {
                    return Err(Error::Internal(format!(
                        "initial value index {} out of range for {}",
                        entry.index, slot.name
                    )));
                }
                self.write_const_chunks(offset, elsize, &entry.value)?;
            }
        }
        Ok(())
    }

    fn write_const_chunks(
        &mut self,
        offset: u32,
        size: u32,
        value: &crate::ir::ConstExpr,
    ) -> Result<()> {
        let data = self.memory.data_mut(&mut self.store);
        let start = offset as usize;
        let end = start + size as usize;
        if end > data.len() {
            return Err(Error::Internal(format!(
                "constant write past end of state ({end} > {})",
                data.len()
            )));
        }
        let chunks = value.chunks(size.div_ceil(4));
        let mut bytes: Vec<u8> = chunks.iter().flat_map(|c| c.to_le_bytes()).collect();
        bytes.truncate(size as usize);
        data[start..end].copy_from_slice(&bytes);
        Ok(())
    }

    #[must_use]
    pub fn loop_limit(&self) -> u32 {
        self.options.loop_limit
    }
}
