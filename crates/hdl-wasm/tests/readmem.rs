//! `$readmem`: hex and binary parsing, the missing-file error, and the
//! destination-too-small check. A failing call must leave the target bytes
//! untouched.

use hdl_wasm::Error;
use hdl_wasm::test_harness::*;

/// Module whose `_eval` loads `mem.hex` into `mem` when `do_load` is set.
/// The filename lives in a constant as NUL-terminated LE bytes.
fn readmem_module(builtin: &str) -> hdl_wasm::ModuleDef {
    let fname = u64::from_le_bytes(*b"mem.hex\0");
    ModuleBuilder::new("loader")
        .input("do_load", 1)
        .signal_typed("mem", array_of(logic(32), 4))
        .constant("fname", 64, fname)
        .block(
            "_eval",
            vec![if_(
                var("do_load"),
                call(builtin, vec![var("fname"), var("mem")]),
            )],
        )
        .build()
}

fn mem_words(sim: &hdl_wasm::Sim) -> Vec<u32> {
    sim.read_bytes("mem")
        .unwrap()
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[test]
fn hex_lines_fill_chunks_in_order() {
    let mut sim = run_with_files(
        &readmem_module("$readmemh"),
        vec![(
            "mem.hex".to_owned(),
            "DEADBEEF\n\n// rom image\n12345678\nFF\n".to_owned(),
        )],
    );
    sim.poke_scalar("do_load", 1).unwrap();
    sim.eval().unwrap();
    assert_eq!(mem_words(&sim), vec![0xDEAD_BEEF, 0x1234_5678, 0xFF, 0]);
}

#[test]
fn binary_lines_parse_base_two() {
    let mut sim = run_with_files(
        &readmem_module("$readmemb"),
        vec![("mem.hex".to_owned(), "1010\n1\n".to_owned())],
    );
    sim.poke_scalar("do_load", 1).unwrap();
    sim.eval().unwrap();
    assert_eq!(mem_words(&sim), vec![0b1010, 1, 0, 0]);
}

#[test]
fn missing_file_raises_and_leaves_destination_untouched() {
    // No file table at all: every lookup misses.
    let mut sim = run(&readmem_module("$readmemh"));
    sim.bytes_mut("mem").unwrap().fill(0xAB);
    sim.poke_scalar("do_load", 1).unwrap();
    match sim.eval() {
        Err(Error::MissingFile(name)) => assert_eq!(name, "mem.hex"),
        other => panic!("expected MissingFile, got {other:?}"),
    }
    assert!(sim.read_bytes("mem").unwrap().iter().all(|&b| b == 0xAB));
}

#[test]
fn oversized_file_is_rejected_before_writing() {
    let mut sim = run_with_files(
        &readmem_module("$readmemh"),
        vec![(
            "mem.hex".to_owned(),
            "1\n2\n3\n4\n5\n".to_owned(), // five chunks into a four-chunk array
        )],
    );
    sim.bytes_mut("mem").unwrap().fill(0xCD);
    sim.poke_scalar("do_load", 1).unwrap();
    assert!(sim.eval().is_err());
    assert!(sim.read_bytes("mem").unwrap().iter().all(|&b| b == 0xCD));
}

#[test]
fn garbage_lines_are_rejected() {
    let mut sim = run_with_files(
        &readmem_module("$readmemh"),
        vec![("mem.hex".to_owned(), "not-hex\n".to_owned())],
    );
    sim.poke_scalar("do_load", 1).unwrap();
    assert!(sim.eval().is_err());
}
