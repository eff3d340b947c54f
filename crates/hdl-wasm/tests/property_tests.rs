//! Property-based tests for the codegen.
//!
//! Uses `proptest` to drive random widths and operand values through the
//! compiled simulator and compare against `BigUint` reference arithmetic:
//! - compilation of well-formed modules never panics,
//! - wide algebraic laws hold for any width,
//! - shifts respect the declared width mask,
//! - comparisons agree with the reference ordering.

use num_bigint::BigUint;
use num_traits::One;
use proptest::prelude::*;

use hdl_wasm::ir::BinaryOp;
use hdl_wasm::test_harness::*;

fn mask(width: u32) -> BigUint {
    (BigUint::one() << width) - BigUint::one()
}

fn wide_alu_module(width: u32) -> hdl_wasm::ModuleDef {
    ModuleBuilder::new("alu")
        .input("a", width)
        .input("b", width)
        .input("s", 16)
        .output("sum", width)
        .output("diff", width)
        .output("and_", width)
        .output("or_", width)
        .output("xor_", width)
        .output("shl_", width)
        .output("shr_", width)
        .output("ltu", 1)
        .output("eq", 1)
        .block(
            "_eval",
            vec![
                assign(var("sum"), add(width, var("a"), var("b"))),
                assign(var("diff"), sub(width, var("a"), var("b"))),
                assign(var("and_"), binop(BinaryOp::And, logic(width), var("a"), var("b"))),
                assign(var("or_"), binop(BinaryOp::Or, logic(width), var("a"), var("b"))),
                assign(var("xor_"), binop(BinaryOp::Xor, logic(width), var("a"), var("b"))),
                assign(var("shl_"), shl(width, var("a"), var("s"))),
                assign(var("shr_"), shr(width, var("a"), var("s"))),
                assign(var("ltu"), compare(BinaryOp::Lt, var("a"), var("b"))),
                assign(var("eq"), compare(BinaryOp::Eq, var("a"), var("b"))),
            ],
        )
        .build()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// `(a + b) - b == a` and the bitwise identities, for arbitrary widths.
    #[test]
    fn wide_algebraic_laws(
        width in 65u32..=160,
        seed_a in prop::collection::vec(any::<u32>(), 6),
        seed_b in prop::collection::vec(any::<u32>(), 6),
    ) {
        let a = BigUint::new(seed_a) & mask(width);
        let b = BigUint::new(seed_b) & mask(width);
        let mut sim = run(&wide_alu_module(width));
        sim.poke_big("a", &a).unwrap();
        sim.poke_big("b", &b).unwrap();
        sim.poke_scalar("s", 0).unwrap();
        sim.eval().unwrap();

        let sum = sim.peek_big("sum").unwrap();
        prop_assert_eq!(&sum, &((&a + &b) & mask(width)));

        // (a + b) - b == a, computed by the simulator itself.
        sim.poke_big("a", &sum).unwrap();
        sim.eval().unwrap();
        prop_assert_eq!(sim.peek_big("diff").unwrap(), a.clone());

        // Idempotent / annihilating bitwise ops on equal operands.
        sim.poke_big("a", &b).unwrap();
        sim.eval().unwrap();
        prop_assert_eq!(sim.peek_big("and_").unwrap(), b.clone());
        prop_assert_eq!(sim.peek_big("or_").unwrap(), b.clone());
        prop_assert_eq!(sim.peek_big("xor_").unwrap(), BigUint::from(0u32));
    }

    /// `(a << s) >> s == a & mask(width - s)` for any shift in range.
    #[test]
    fn wide_shift_round_trip(
        width in 65u32..=130,
        shift_frac in 0.0f64..=1.0,
        value in prop::collection::vec(any::<u32>(), 5),
    ) {
        let s = ((f64::from(width) * shift_frac) as u32).min(width);
        let a = BigUint::new(value) & mask(width);
        let mut sim = run(&wide_alu_module(width));
        sim.poke_big("a", &a).unwrap();
        sim.poke_big("b", &BigUint::from(0u32)).unwrap();
        sim.poke_scalar("s", u64::from(s)).unwrap();
        sim.eval().unwrap();

        let shifted = sim.peek_big("shl_").unwrap();
        prop_assert_eq!(&shifted, &((&a << s) & mask(width)));

        // Feed the shifted value back and shift right.
        sim.poke_big("a", &shifted).unwrap();
        sim.eval().unwrap();
        let expected = if s >= width {
            BigUint::from(0u32)
        } else {
            &a & mask(width - s)
        };
        prop_assert_eq!(sim.peek_big("shr_").unwrap(), expected);
    }

    /// Equality and unsigned ordering agree with the reference integers.
    #[test]
    fn wide_comparisons_agree_with_reference(
        width in 65u32..=130,
        seed_a in prop::collection::vec(any::<u32>(), 5),
        seed_b in prop::collection::vec(any::<u32>(), 5),
        force_equal in any::<bool>(),
    ) {
        let a = BigUint::new(seed_a) & mask(width);
        let b = if force_equal { a.clone() } else { BigUint::new(seed_b) & mask(width) };
        let mut sim = run(&wide_alu_module(width));
        sim.poke_big("a", &a).unwrap();
        sim.poke_big("b", &b).unwrap();
        sim.poke_scalar("s", 0).unwrap();
        sim.eval().unwrap();
        prop_assert_eq!(sim.peek_scalar("eq").unwrap() == 1, a == b);
        prop_assert_eq!(sim.peek_scalar("ltu").unwrap() == 1, a < b);
    }

    /// Scalar modules across the width range compile and validate.
    #[test]
    fn scalar_modules_always_compile(width in 1u32..=64, value in any::<u64>()) {
        let module = ModuleBuilder::new("anywidth")
            .input("a", width)
            .output("x", width)
            .output("gt", 1)
            .block(
                "_eval",
                vec![
                    assign(var("x"), add(width, var("a"), num(32, 1))),
                    assign(var("gt"), compare(BinaryOp::Gt, var("a"), num(width, 0))),
                ],
            )
            .build();
        let mut sim = run(&module);
        let masked = if width == 64 { value } else { value & ((1u64 << width) - 1) };
        sim.poke_scalar("a", value).unwrap();
        sim.eval().unwrap();
        let expected = if width == 64 {
            masked.wrapping_add(1)
        } else {
            (masked + 1) & ((1u64 << width) - 1)
        };
        prop_assert_eq!(sim.peek_scalar("x").unwrap(), expected);
        prop_assert_eq!(sim.peek_scalar("gt").unwrap() == 1, masked > 0);
    }
}
