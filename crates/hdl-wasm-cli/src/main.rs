use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

use hdl_wasm::ir::ModuleDef;
use hdl_wasm::runtime::SimOptions;
use hdl_wasm::{CompileOptions, Sim, compile_with_options};

const COMPILER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "hdl-wasm")]
#[command(about = "HDL IR to WebAssembly simulator", version = COMPILER_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an IR module (JSON) to a WASM binary.
    Compile {
        #[arg(help = "Input IR module JSON file")]
        input: PathBuf,

        #[arg(short, long, help = "Output WASM file")]
        output: PathBuf,

        #[arg(long, help = "Constant pool module JSON file")]
        pool: Option<PathBuf>,

        #[arg(long, help = "Disable the instruction peephole")]
        no_peephole: bool,

        #[arg(long, help = "Linear memory cap in megabytes")]
        max_memory_mb: Option<u32>,

        #[arg(long, help = "Print the parsed IR blocks before compiling")]
        dump_ir: bool,
    },
    /// Compile, instantiate, run clock cycles and print the outputs.
    Run {
        #[arg(help = "Input IR module JSON file")]
        input: PathBuf,

        #[arg(long, help = "Constant pool module JSON file")]
        pool: Option<PathBuf>,

        #[arg(long, default_value_t = 1, help = "Clock cycles to run")]
        ticks: u32,

        #[arg(
            long = "set",
            value_name = "NAME=VALUE",
            help = "Poke an input before running (repeatable)"
        )]
        sets: Vec<String>,

        #[arg(long, help = "Seed for the $rand builtin")]
        seed: Option<u64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            input,
            output,
            pool,
            no_peephole,
            max_memory_mb,
            dump_ir,
        } => {
            let module = load_module(&input)?;
            let pool = pool.as_deref().map(load_module).transpose()?;

            if dump_ir {
                for block in &module.blocks {
                    println!("{}:", block.name);
                    for e in &block.exprs {
                        println!("  {e}");
                    }
                }
            }

            let defaults = CompileOptions::default();
            let options = CompileOptions {
                peephole: !no_peephole,
                max_memory_mb: max_memory_mb.unwrap_or(defaults.max_memory_mb),
                ..defaults
            };

            let compiled = compile_with_options(&module, pool.as_ref(), &options)
                .context("Compilation failed")?;
            fs::write(&output, &compiled.wasm)
                .with_context(|| format!("Failed to write output to {}", output.display()))?;
            println!(
                "Compiled {} -> {} ({} bytes, {} pages)",
                input.display(),
                output.display(),
                compiled.wasm.len(),
                compiled.layout.pages
            );
        }
        Commands::Run {
            input,
            pool,
            ticks,
            sets,
            seed,
        } => {
            let module = load_module(&input)?;
            let pool = pool.as_deref().map(load_module).transpose()?;
            let compiled =
                compile_with_options(&module, pool.as_ref(), &CompileOptions::default())
                    .context("Compilation failed")?;
            let has_clk = compiled.has_clk;
            let mut sim = Sim::with_options(
                compiled,
                SimOptions {
                    seed,
                    get_file: None,
                },
            )
            .context("Instantiation failed")?;
            sim.powercycle().context("Powercycle failed")?;

            for set in &sets {
                let (name, value) = parse_set(set)?;
                sim.poke_scalar(name, value)
                    .with_context(|| format!("Failed to set {name}"))?;
            }

            if has_clk {
                sim.tick2(ticks).context("Simulation failed")?;
            } else {
                sim.eval().context("Simulation failed")?;
            }

            let output_bytes = sim.layout().output_bytes;
            let outputs: Vec<String> = sim
                .layout()
                .slots()
                .iter()
                .filter(|s| s.offset + s.size <= output_bytes)
                .map(|s| s.name.clone())
                .collect();
            for name in outputs {
                let value = sim.peek(&name)?;
                println!("{name} = {value}");
            }
            if sim.is_finished() {
                println!("($finish reached)");
            }
        }
    }

    Ok(())
}

fn load_module(path: &std::path::Path) -> Result<ModuleDef> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn parse_set(arg: &str) -> Result<(&str, u64)> {
    let Some((name, value)) = arg.split_once('=') else {
        bail!("--set expects NAME=VALUE, got {arg:?}");
    };
    let value = if let Some(hex) = value.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)?
    } else {
        value.parse()?
    };
    Ok((name, value))
}
