//! Runtime driver behavior: powercycle and settle, state save/load, tick
//! semantics, proxy masking, and the reset convenience.

use num_bigint::BigUint;
use num_traits::One;

use hdl_wasm::test_harness::*;
use hdl_wasm::{Error, SignalValue};

#[test]
fn combinational_feedback_settles() {
    // out = out is already a fixed point; powercycle must not raise.
    let module = ModuleBuilder::new("feedback")
        .output("out", 8)
        .block(
            "_eval",
            vec![binop_assign_contassign(var("out"), var("out"))],
        )
        .build();
    let mut sim = instantiate(&module);
    sim.powercycle().expect("settle");
}

// `contassign` is semantically identical to `assign`; exercise the variant.
fn binop_assign_contassign(lhs: hdl_wasm::Expr, rhs: hdl_wasm::Expr) -> hdl_wasm::Expr {
    binop(hdl_wasm::ir::BinaryOp::ContAssign, logic(1), lhs, rhs)
}

#[test]
fn eval_is_idempotent_without_input_changes() {
    let module = ModuleBuilder::new("idem")
        .input("a", 8)
        .output("x", 8)
        .output("y", 16)
        .block(
            "_eval",
            vec![
                assign(var("x"), add(8, var("a"), num(8, 3))),
                assign(var("y"), shl(16, var("a"), num(32, 2))),
            ],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("a", 0x55).unwrap();
    sim.eval().unwrap();
    let first = sim.save_state();
    sim.eval().unwrap();
    assert_eq!(first, sim.save_state());
}

#[test]
fn save_and_load_round_trip() {
    let module = ModuleBuilder::new("snap")
        .input("a", 8)
        .signal("w", 80)
        .output("x", 8)
        .block(
            "_eval",
            vec![
                assign(var("x"), var("a")),
                assign(var("w"), add(80, var("w"), num(32, 1))),
            ],
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("a", 42).unwrap();
    sim.eval().unwrap();
    let snapshot = sim.save_state();
    let w_before = sim.peek_big("w").unwrap();

    sim.poke_scalar("a", 7).unwrap();
    sim.eval().unwrap();
    sim.eval().unwrap();
    assert_ne!(snapshot, sim.save_state());

    sim.load_state(&snapshot).unwrap();
    assert_eq!(snapshot, sim.save_state());
    assert_eq!(sim.peek_scalar("x").unwrap(), 42);
    assert_eq!(sim.peek_big("w").unwrap(), w_before);
}

#[test]
fn load_state_rejects_wrong_sizes() {
    let module = ModuleBuilder::new("strict")
        .output("x", 8)
        .block("_eval", vec![])
        .build();
    let mut sim = run(&module);
    let mut blob = sim.save_state();
    blob.push(0);
    match sim.load_state(&blob) {
        Err(Error::StateSizeMismatch { expected, got }) => {
            assert_eq!(got, expected + 1);
        }
        other => panic!("expected StateSizeMismatch, got {other:?}"),
    }
    match sim.load_state(&[]) {
        Err(Error::StateSizeMismatch { got: 0, .. }) => {}
        other => panic!("expected StateSizeMismatch, got {other:?}"),
    }
}

#[test]
fn narrow_writes_mask_to_declared_width() {
    let module = ModuleBuilder::new("narrow")
        .signal("five", 5)
        .signal("thin", 1)
        .signal("mid", 44)
        .block("_eval", vec![])
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("five", 0xFF).unwrap();
    assert_eq!(sim.peek_scalar("five").unwrap(), 0x1F);
    sim.poke_scalar("thin", 3).unwrap();
    assert_eq!(sim.peek_scalar("thin").unwrap(), 1);
    sim.poke_scalar("mid", u64::MAX).unwrap();
    assert_eq!(sim.peek_scalar("mid").unwrap(), (1u64 << 44) - 1);
}

#[test]
fn wide_proxy_round_trips_and_masks() {
    let module = ModuleBuilder::new("wideproxy")
        .signal("w", 70)
        .block("_eval", vec![])
        .build();
    let mut sim = run(&module);
    let value = (BigUint::one() << 69u32) | BigUint::from(0xDEAD_BEEFu32);
    sim.poke_big("w", &value).unwrap();
    assert_eq!(sim.peek_big("w").unwrap(), value);

    // Bits past the declared width are dropped on write.
    let oversized = BigUint::one() << 99u32;
    sim.poke_big("w", &oversized).unwrap();
    assert_eq!(sim.peek_big("w").unwrap(), BigUint::from(0u32));
}

#[test]
fn proxy_values_carry_their_storage_class() {
    let module = ModuleBuilder::new("classes")
        .signal("b", 8)
        .signal("w", 96)
        .signal_typed("arr", array_of(logic(8), 4))
        .block("_eval", vec![])
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("b", 5).unwrap();
    assert!(matches!(sim.peek("b").unwrap(), SignalValue::Scalar(5)));
    assert!(matches!(sim.peek("w").unwrap(), SignalValue::Wide(_)));
    assert!(matches!(sim.peek("arr").unwrap(), SignalValue::Bytes(ref b) if b.len() == 4));
    assert!(matches!(
        sim.peek("nonexistent"),
        Err(Error::UnknownVariable(_))
    ));
}

#[test]
fn aliased_bytes_are_visible_immediately() {
    let module = ModuleBuilder::new("alias")
        .signal_typed("arr", array_of(logic(8), 8))
        .block("_eval", vec![])
        .build();
    let mut sim = run(&module);
    sim.bytes_mut("arr").unwrap()[3] = 0x7E;
    assert_eq!(sim.read_bytes("arr").unwrap()[3], 0x7E);
}

#[test]
fn tick_flips_clock_bit_zero() {
    let module = ModuleBuilder::new("ticker")
        .clocked()
        .output("count", 8)
        .block(
            "_eval",
            on_posedge(vec![assign(var("count"), add(8, var("count"), num(8, 1)))]),
        )
        .build();
    let mut sim = run(&module);
    assert_eq!(sim.peek_scalar("clk").unwrap(), 0);
    sim.tick().unwrap(); // rising edge
    assert_eq!(sim.peek_scalar("clk").unwrap(), 1);
    assert_eq!(sim.peek_scalar("count").unwrap(), 1);
    sim.tick().unwrap(); // falling edge, no increment
    assert_eq!(sim.peek_scalar("clk").unwrap(), 0);
    assert_eq!(sim.peek_scalar("count").unwrap(), 1);
}

#[test]
fn tick2_runs_full_cycles() {
    let module = ModuleBuilder::new("cycles")
        .clocked()
        .output("count", 16)
        .block(
            "_eval",
            on_posedge(vec![assign(var("count"), add(16, var("count"), num(16, 1)))]),
        )
        .build();
    let mut sim = run(&module);
    sim.tick2(5).unwrap();
    assert_eq!(sim.peek_scalar("count").unwrap(), 5);
}

#[test]
fn tick2_without_clock_degenerates_to_eval() {
    let module = ModuleBuilder::new("comb")
        .input("a", 8)
        .output("x", 8)
        .block("_eval", vec![assign(var("x"), add(8, var("a"), num(8, 1)))])
        .build();
    let compiled = compile_module(&module).expect("compile");
    assert!(!compiled.has_clk);
    let mut sim = hdl_wasm::Sim::new(compiled).expect("instantiate");
    sim.powercycle().unwrap();
    sim.poke_scalar("a", 9).unwrap();
    sim.tick2(3).unwrap();
    assert_eq!(sim.peek_scalar("x").unwrap(), 10);
}

#[test]
fn reset_preserves_ui_in_and_pulses_rst_n() {
    let module = ModuleBuilder::new("resettable")
        .clocked()
        .input("ui_in", 8)
        .input("rst_n", 1)
        .output("count", 8)
        .block(
            "_eval",
            on_posedge(vec![if_else(
                var("rst_n"),
                assign(var("count"), add(8, var("count"), num(8, 1))),
                assign(var("count"), num(8, 0)),
            )]),
        )
        .build();
    let mut sim = run(&module);
    sim.poke_scalar("ui_in", 0x5A).unwrap();
    sim.poke_scalar("rst_n", 1).unwrap();
    sim.tick2(4).unwrap();
    assert_eq!(sim.peek_scalar("count").unwrap(), 4);

    sim.reset().unwrap();
    assert_eq!(sim.peek_scalar("ui_in").unwrap(), 0x5A);
    assert_eq!(sim.peek_scalar("rst_n").unwrap(), 1);
    assert_eq!(sim.peek_scalar("count").unwrap(), 0);

    sim.tick2(2).unwrap();
    assert_eq!(sim.peek_scalar("count").unwrap(), 2);
}

#[test]
fn powercycle_applies_array_initial_values() {
    let mut module = ModuleBuilder::new("rominit")
        .signal_typed("rom", array_of(logic(16), 4))
        .output("d0", 16)
        .block(
            "_eval",
            vec![assign(
                var("d0"),
                arraysel(logic(16), var("rom"), num(32, 2)),
            )],
        )
        .build();
    let rom = module
        .vardefs
        .iter_mut()
        .find(|v| v.name == "rom")
        .unwrap();
    rom.init_value = Some(vec![
        hdl_wasm::ir::InitEntry {
            index: 2,
            value: hdl_wasm::ir::ConstExpr::new(logic(16), 0xC0DE),
        },
        hdl_wasm::ir::InitEntry {
            index: 0,
            value: hdl_wasm::ir::ConstExpr::new(logic(16), 0x1111),
        },
    ]);
    let sim = run(&module);
    assert_eq!(sim.peek_scalar("d0").unwrap(), 0xC0DE);
    assert_eq!(sim.read_bytes("rom").unwrap()[0..2], [0x11, 0x11]);
}

#[test]
fn constants_survive_powercycle() {
    let module = ModuleBuilder::new("consts")
        .constant("K", 32, 0x1234_5678)
        .output("x", 32)
        .block("_eval", vec![assign(var("x"), var("K"))])
        .build();
    let mut sim = run(&module);
    assert_eq!(sim.peek_scalar("K").unwrap(), 0x1234_5678);
    sim.powercycle().unwrap();
    assert_eq!(sim.peek_scalar("x").unwrap(), 0x1234_5678);
}
