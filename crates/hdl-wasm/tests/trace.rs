//! Trace ring buffer: one record per `tick2` cycle, wrap-around, and the
//! read-only trace proxy.

use hdl_wasm::test_harness::*;
use hdl_wasm::translate::CompileOptions;
use hdl_wasm::{Sim, SignalValue};

fn counter_module() -> hdl_wasm::ModuleDef {
    ModuleBuilder::new("traced")
        .clocked()
        .output("count", 16)
        .output("double", 16)
        .block(
            "_eval",
            on_posedge(vec![
                assign(var("count"), add(16, var("count"), num(16, 1))),
                assign(var("double"), shl(16, var("count"), num(32, 1))),
            ]),
        )
        .build()
}

#[test]
fn record_size_is_padded_output_bytes() {
    let compiled = compile_module(&counter_module()).expect("compile");
    let sim = Sim::new(compiled).expect("instantiate");
    assert_eq!(sim.trace_record_size() % 8, 0);
    assert!(sim.trace_record_size() >= 4);
}

#[test]
fn each_cycle_appends_one_record() {
    let mut sim = run(&counter_module());
    sim.tick2(3).unwrap();
    // Records hold the outputs as of the end of each cycle.
    for expected in 1..=3u64 {
        match sim.trace_peek("count").unwrap() {
            SignalValue::Scalar(v) => assert_eq!(v, expected),
            other => panic!("unexpected trace value {other:?}"),
        }
        match sim.trace_peek("double").unwrap() {
            SignalValue::Scalar(v) => assert_eq!(v, expected * 2),
            other => panic!("unexpected trace value {other:?}"),
        }
        sim.next_trace();
    }
}

#[test]
fn ring_wraps_at_trace_end() {
    let options = CompileOptions {
        trace_depth: 2,
        ..CompileOptions::default()
    };
    let compiled = compile_with(&counter_module(), &options).expect("compile");
    let mut sim = Sim::new(compiled).expect("instantiate");
    sim.powercycle().unwrap();
    sim.tick2(3).unwrap();
    // The third record overwrote ring slot 0.
    sim.reset_trace();
    match sim.trace_peek("count").unwrap() {
        SignalValue::Scalar(v) => assert_eq!(v, 3),
        other => panic!("unexpected trace value {other:?}"),
    }
    sim.next_trace();
    match sim.trace_peek("count").unwrap() {
        SignalValue::Scalar(v) => assert_eq!(v, 2),
        other => panic!("unexpected trace value {other:?}"),
    }
    sim.next_trace(); // cursor wraps with the ring
    match sim.trace_peek("count").unwrap() {
        SignalValue::Scalar(v) => assert_eq!(v, 3),
        other => panic!("unexpected trace value {other:?}"),
    }
}

#[test]
fn non_outputs_are_not_in_the_trace() {
    let module = ModuleBuilder::new("hidden")
        .clocked()
        .output("out", 8)
        .signal("internal", 8)
        .block("_eval", vec![])
        .build();
    let mut sim = run(&module);
    sim.tick2(1).unwrap();
    assert!(sim.trace_peek("out").is_ok());
    assert!(sim.trace_peek("internal").is_err());
    assert!(sim.trace_peek("clk").is_err());
}

#[test]
fn reset_trace_rewinds_the_cursor() {
    let mut sim = run(&counter_module());
    sim.tick2(2).unwrap();
    sim.next_trace();
    let second = sim.trace_peek("count").unwrap();
    sim.reset_trace();
    let first = sim.trace_peek("count").unwrap();
    assert_eq!(first, SignalValue::Scalar(1));
    assert_eq!(second, SignalValue::Scalar(2));
}
