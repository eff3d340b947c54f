//! End-to-end coverage of the scalar operator set: each test compiles a tiny
//! module, drives it through the interpreter, and checks bit-exact results.

use hdl_wasm::ir::BinaryOp;
use hdl_wasm::test_harness::*;
use hdl_wasm::translate::CompileOptions;
use hdl_wasm::{Sim, SimOptions};

#[test]
fn add_sub_mul_wrap_to_destination_width() {
    let module = ModuleBuilder::new("arith")
        .input("a", 8)
        .input("b", 8)
        .output("sum", 8)
        .output("diff", 8)
        .output("prod", 8)
        .block(
            "_eval",
            vec![
                assign(var("sum"), add(8, var("a"), var("b"))),
                assign(var("diff"), sub(8, var("a"), var("b"))),
                assign(var("prod"), binop(BinaryOp::Mul, logic(8), var("a"), var("b"))),
            ],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("a", 200).unwrap();
    sim.poke_scalar("b", 100).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("sum").unwrap(), 44); // 300 & 0xFF
    assert_eq!(sim.peek_scalar("diff").unwrap(), 100);
    assert_eq!(sim.peek_scalar("prod").unwrap(), 20000 & 0xFF);
}

#[test]
fn division_by_zero_produces_zero_instead_of_trapping() {
    let module = ModuleBuilder::new("divz")
        .input("a", 16)
        .input("b", 16)
        .output("q", 16)
        .output("r", 16)
        .block(
            "_eval",
            vec![
                assign(var("q"), binop(BinaryOp::Div, logic(16), var("a"), var("b"))),
                assign(
                    var("r"),
                    binop(BinaryOp::Moddiv, logic(16), var("a"), var("b")),
                ),
            ],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("a", 100).unwrap();
    sim.poke_scalar("b", 7).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("q").unwrap(), 14);
    assert_eq!(sim.peek_scalar("r").unwrap(), 2);
    sim.poke_scalar("b", 0).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("q").unwrap(), 0);
    assert_eq!(sim.peek_scalar("r").unwrap(), 0);
}

#[test]
fn signed_division_goes_through_extends() {
    // The frontend sign-extends narrow operands into the container before
    // signed ops; -6 / 2 must come out -3, not 125.
    let module = ModuleBuilder::new("sdiv")
        .input("a", 8)
        .output("q", 8)
        .block(
            "_eval",
            vec![assign(
                var("q"),
                binop(
                    BinaryOp::DivS,
                    logic_s(8),
                    extends(8, logic_s(32), var("a")),
                    num_s(32, 2),
                ),
            )],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("a", 0xFA).unwrap(); // -6
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("q").unwrap(), 0xFD); // -3 in 8 bits
}

#[test]
fn shifts_respect_signedness() {
    let module = ModuleBuilder::new("shifts")
        .input("a", 16)
        .input("s", 8)
        .output("l", 16)
        .output("ru", 16)
        .output("rs", 16)
        .block(
            "_eval",
            vec![
                assign(var("l"), shl(16, var("a"), var("s"))),
                assign(var("ru"), shr(16, var("a"), var("s"))),
                assign(
                    var("rs"),
                    binop(
                        BinaryOp::ShrS,
                        logic_s(16),
                        extends(16, logic_s(32), var("a")),
                        var("s"),
                    ),
                ),
            ],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("a", 0x8001).unwrap();
    sim.poke_scalar("s", 4).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("l").unwrap(), 0x0010);
    assert_eq!(sim.peek_scalar("ru").unwrap(), 0x0800);
    assert_eq!(sim.peek_scalar("rs").unwrap(), 0xF800);
}

#[test]
fn comparisons_unsigned_and_signed() {
    let module = ModuleBuilder::new("cmp")
        .input("a", 8)
        .input("b", 8)
        .output("ltu", 1)
        .output("lts", 1)
        .output("eq", 1)
        .block(
            "_eval",
            vec![
                assign(var("ltu"), compare(BinaryOp::Lt, var("a"), var("b"))),
                assign(
                    var("lts"),
                    binop(
                        BinaryOp::LtS,
                        logic(1),
                        extends(8, logic_s(32), var("a")),
                        extends(8, logic_s(32), var("b")),
                    ),
                ),
                assign(var("eq"), compare(BinaryOp::Eq, var("a"), var("b"))),
            ],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("a", 0xFF).unwrap(); // unsigned 255, signed -1
    sim.poke_scalar("b", 1).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("ltu").unwrap(), 0);
    assert_eq!(sim.peek_scalar("lts").unwrap(), 1);
    assert_eq!(sim.peek_scalar("eq").unwrap(), 0);
}

#[test]
fn signed_compare_does_not_use_the_container_sign_bit() {
    // 0xF000 sign-extended to 28 bits is -4096; in the raw i32 container it
    // would look positive and compare greater than 0x4000.
    let module = ModuleBuilder::new("cmp28")
        .input("raw", 16)
        .signal_signed("x", 28)
        .output("gt", 1)
        .block(
            "_eval",
            vec![
                assign(var("x"), extends(16, logic_s(28), var("raw"))),
                assign(
                    var("gt"),
                    binop(
                        BinaryOp::GtS,
                        logic(1),
                        extends(28, logic_s(32), var("x")),
                        num_s(32, 0x4000),
                    ),
                ),
            ],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("raw", 0xF000).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("gt").unwrap(), 0);
    sim.poke_scalar("raw", 0x5000).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("gt").unwrap(), 1);
}

#[test]
fn not_negate_redxor() {
    let module = ModuleBuilder::new("unops")
        .input("a", 8)
        .output("inv", 8)
        .output("neg", 8)
        .output("par", 1)
        .block(
            "_eval",
            vec![
                assign(var("inv"), not(8, var("a"))),
                assign(
                    var("neg"),
                    unop(hdl_wasm::ir::UnaryOp::Negate, logic(8), var("a")),
                ),
                assign(
                    var("par"),
                    unop(hdl_wasm::ir::UnaryOp::Redxor, logic(1), var("a")),
                ),
            ],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("a", 0b1011_0100).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("inv").unwrap(), 0b0100_1011);
    assert_eq!(sim.peek_scalar("neg").unwrap(), 0x4C); // 256 - 0xB4
    assert_eq!(sim.peek_scalar("par").unwrap(), 0); // four bits set
    sim.poke_scalar("a", 0b1011_0101).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("par").unwrap(), 1);
}

#[test]
fn extends_generic_width() {
    let module = ModuleBuilder::new("ext5")
        .input("a", 5)
        .output("wide", 32)
        .block(
            "_eval",
            vec![assign(var("wide"), extends(5, logic_s(32), var("a")))],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("a", 0x1F).unwrap(); // -1 in 5 bits
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("wide").unwrap(), 0xFFFF_FFFF);
}

#[test]
fn ccast_between_containers() {
    let module = ModuleBuilder::new("casts")
        .input("a64", 64)
        .input("b32", 32)
        .signal_signed("bs32", 32)
        .output("low", 32)
        .output("zext", 64)
        .output("sext", 64)
        .block(
            "_eval",
            vec![
                assign(
                    var("low"),
                    unop(hdl_wasm::ir::UnaryOp::Ccast, logic(32), var("a64")),
                ),
                assign(
                    var("zext"),
                    unop(hdl_wasm::ir::UnaryOp::Ccast, logic(64), var("b32")),
                ),
                assign(var("bs32"), var("b32")),
                assign(
                    var("sext"),
                    unop(hdl_wasm::ir::UnaryOp::Ccast, logic(64), var("bs32")),
                ),
            ],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("a64", 0x1_2345_6789).unwrap();
    sim.poke_scalar("b32", 0xFFFF_FFFE).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("low").unwrap(), 0x2345_6789);
    assert_eq!(sim.peek_scalar("zext").unwrap(), 0xFFFF_FFFE);
    assert_eq!(sim.peek_scalar("sext").unwrap(), 0xFFFF_FFFF_FFFF_FFFE);
}

#[test]
fn array_select_load_and_store() {
    let elem = logic(16);
    let module = ModuleBuilder::new("mem")
        .signal_typed("mem", array_of(logic(16), 8))
        .input("widx", 8)
        .input("ridx", 8)
        .input("din", 16)
        .output("dout", 16)
        .output("fixed", 16)
        .block(
            "_eval",
            vec![
                assign(
                    arraysel(elem.clone(), var("mem"), var("widx")),
                    var("din"),
                ),
                assign(
                    var("dout"),
                    arraysel(elem.clone(), var("mem"), var("ridx")),
                ),
                assign(var("fixed"), arraysel(elem, var("mem"), num(32, 3))),
            ],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("widx", 3).unwrap();
    sim.poke_scalar("ridx", 3).unwrap();
    sim.poke_scalar("din", 0xBEEF).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("dout").unwrap(), 0xBEEF);
    assert_eq!(sim.peek_scalar("fixed").unwrap(), 0xBEEF);
    sim.poke_scalar("widx", 5).unwrap();
    sim.poke_scalar("din", 0x1234).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("fixed").unwrap(), 0xBEEF);
    sim.poke_scalar("ridx", 5).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("dout").unwrap(), 0x1234);
}

#[test]
fn word_select_reads_32_bit_chunks() {
    let module = ModuleBuilder::new("chunks")
        .signal("w", 96)
        .output("c0", 32)
        .output("c1", 32)
        .output("c2", 32)
        .block(
            "_eval",
            vec![
                assign(
                    var("c0"),
                    binop(BinaryOp::WordSel, logic(32), var("w"), num(32, 0)),
                ),
                assign(
                    var("c1"),
                    binop(BinaryOp::WordSel, logic(32), var("w"), num(32, 1)),
                ),
                assign(
                    var("c2"),
                    binop(BinaryOp::WordSel, logic(32), var("w"), num(32, 2)),
                ),
            ],
        )
        .build();
    let mut sim = run(&module);
    let value = num_bigint::BigUint::parse_bytes(b"0123456789ABCDEF11223344", 16).unwrap();
    sim.poke_big("w", &value).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("c0").unwrap(), 0x1122_3344);
    assert_eq!(sim.peek_scalar("c1").unwrap(), 0x89AB_CDEF);
    assert_eq!(sim.peek_scalar("c2").unwrap(), 0x0123_4567);
}

#[test]
fn conditional_select_and_if_else() {
    let module = ModuleBuilder::new("cond")
        .input("sel", 1)
        .input("a", 8)
        .input("b", 8)
        .output("picked", 8)
        .output("branched", 8)
        .block(
            "_eval",
            vec![
                assign(var("picked"), cond(logic(8), var("sel"), var("a"), var("b"))),
                if_else(
                    var("sel"),
                    assign(var("branched"), num(8, 0xAA)),
                    assign(var("branched"), num(8, 0x55)),
                ),
            ],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("a", 1).unwrap();
    sim.poke_scalar("b", 2).unwrap();
    sim.poke_scalar("sel", 1).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("picked").unwrap(), 1);
    assert_eq!(sim.peek_scalar("branched").unwrap(), 0xAA);
    sim.poke_scalar("sel", 0).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("picked").unwrap(), 2);
    assert_eq!(sim.peek_scalar("branched").unwrap(), 0x55);
}

#[test]
fn while_loop_accumulates_with_block_locals() {
    let module = ModuleBuilder::new("loop")
        .input("n", 8)
        .output("total", 16)
        .block(
            "_eval",
            vec![
                decl("i", 32),
                decl("acc", 32),
                assign(var("i"), num(32, 0)),
                assign(var("acc"), num(32, 0)),
                while_(
                    compare(BinaryOp::Lt, var("i"), var("n")),
                    block(vec![assign(var("acc"), add(32, var("acc"), var("i")))]),
                    assign(var("i"), add(32, var("i"), num(32, 1))),
                ),
                assign(var("total"), var("acc")),
            ],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("n", 5).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("total").unwrap(), 10);
}

#[test]
fn runaway_while_exits_at_the_iteration_cap() {
    let module = ModuleBuilder::new("runaway")
        .output("spins", 16)
        .block(
            "_eval",
            vec![while_(
                num(1, 1),
                block(vec![assign(var("spins"), add(16, var("spins"), num(16, 1)))]),
                block(vec![]),
            )],
        )
        .build();
    let options = CompileOptions {
        loop_limit: 10,
        ..CompileOptions::default()
    };
    let compiled = compile_with(&module, &options).expect("compile");
    let mut sim = Sim::new(compiled).expect("instantiate");
    sim.powercycle().expect("powercycle");
    assert_eq!(sim.peek_scalar("spins").unwrap(), 10);
}

#[test]
fn user_blocks_are_callable() {
    let module = ModuleBuilder::new("calls")
        .output("answer", 8)
        .block("load_answer", vec![assign(var("answer"), num(8, 42))])
        .block("_eval", vec![call("load_answer", vec![])])
        .build();
    let sim = run(&module);
    assert_eq!(sim.peek_scalar("answer").unwrap(), 42);
}

#[test]
fn finish_sets_the_one_shot_flag() {
    let module = ModuleBuilder::new("fin")
        .input("go", 1)
        .block("_eval", vec![if_(var("go"), call("$finish", vec![]))])
        .build();
    let mut sim = run(&module);
    assert!(!sim.is_finished());
    sim.poke_scalar("go", 1).unwrap();
    sim.eval().unwrap();
    assert!(sim.is_finished());
    assert!(!sim.is_stopped());
    sim.powercycle().unwrap();
    assert!(!sim.is_finished());
}

#[test]
fn rand_is_deterministic_under_a_seed() {
    let module = ModuleBuilder::new("rng")
        .input("go", 1)
        .output("r", 32)
        .block(
            "_eval",
            vec![if_(var("go"), assign(var("r"), call("$rand", vec![])))],
        )
        .build();
    let draw = |seed: u64| {
        let compiled = compile_module(&module).expect("compile");
        let mut sim = Sim::with_options(
            compiled,
            SimOptions {
                seed: Some(seed),
                get_file: None,
            },
        )
        .expect("instantiate");
        sim.powercycle().unwrap();
        sim.poke_scalar("go", 1).unwrap();
        sim.eval().unwrap();
        sim.peek_scalar("r").unwrap()
    };
    assert_eq!(draw(7), draw(7));
}

#[test]
fn time_reports_milliseconds_since_powercycle() {
    let module = ModuleBuilder::new("clk64")
        .output("t", 64)
        .block("_eval", vec![assign(var("t"), call("$time", vec![]))])
        .build();
    let mut sim = run(&module);
    sim.eval().unwrap();
    // Wall clock; just bound it loosely.
    assert!(sim.peek_scalar("t").unwrap() < 60_000);
}

#[test]
fn creset_zeroes_every_storage_class() {
    let module = ModuleBuilder::new("resets")
        .input("go", 1)
        .signal("s32", 32)
        .signal("w96", 96)
        .signal_typed("arr", array_of(logic(16), 4))
        .block(
            "_eval",
            vec![if_(
                var("go"),
                block(vec![
                    creset(32, var("s32")),
                    creset(96, var("w96")),
                    creset(16, var("arr")),
                ]),
            )],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("s32", 0xDEAD_BEEF).unwrap();
    sim.poke_big("w96", &num_bigint::BigUint::from(u128::MAX >> 32))
        .unwrap();
    sim.bytes_mut("arr").unwrap().fill(0xAB);
    sim.poke_scalar("go", 1).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("s32").unwrap(), 0);
    assert_eq!(sim.peek_big("w96").unwrap(), 0u32.into());
    assert!(sim.read_bytes("arr").unwrap().iter().all(|&b| b == 0));
}

#[test]
fn change_request_drives_resettle() {
    // `out` reads the stale `mid` on the first pass; the change detector
    // forces a second pass that propagates the new value.
    let module = ModuleBuilder::new("settle2")
        .input("a", 8)
        .signal("mid", 8)
        .signal("mid_shadow", 8)
        .output("out", 8)
        .block(
            "_eval",
            vec![
                assign(var("out"), var("mid")),
                assign(var("mid"), var("a")),
            ],
        )
        .block("_change_request", vec![changedet(var("mid"), var("mid_shadow"))])
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("a", 5).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("out").unwrap(), 5);
}

#[test]
fn creturn_merges_into_the_change_flag() {
    let module = ModuleBuilder::new("creturn")
        .input("a", 8)
        .signal("mid", 8)
        .signal("mid_shadow", 8)
        .output("out", 8)
        .block(
            "_eval",
            vec![
                assign(var("out"), var("mid")),
                assign(var("mid"), var("a")),
            ],
        )
        .block(
            "_change_request",
            vec![
                unop(
                    hdl_wasm::ir::UnaryOp::Creturn,
                    logic(1),
                    compare(BinaryOp::Neq, var("mid"), var("mid_shadow")),
                ),
                assign(var("mid_shadow"), var("mid")),
            ],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("a", 9).unwrap();
    sim.eval().unwrap();
    assert_eq!(sim.peek_scalar("out").unwrap(), 9);
}
