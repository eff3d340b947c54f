//! State layout invariants: output-first placement, padding, alignment,
//! constant region, trailer geometry, and the memory cap.

use hdl_wasm::Error;
use hdl_wasm::test_harness::*;
use hdl_wasm::translate::CompileOptions;

fn sample_module() -> hdl_wasm::ModuleDef {
    ModuleBuilder::new("layout_sample")
        .output("o_narrow", 1)
        .output("o_word", 32)
        .output("o_wide", 65)
        .input("a", 8)
        .signal("internal", 48)
        .signal("wide_state", 96)
        .constant("MAGIC", 32, 0xCAFE)
        .block("_eval", vec![assign(var("o_word"), var("a"))])
        .build()
}

#[test]
fn outputs_occupy_the_leading_bytes() {
    let compiled = compile_module(&sample_module()).expect("compile");
    let layout = &compiled.layout;
    assert_eq!(layout.output_bytes % 8, 0);
    for name in ["o_narrow", "o_word", "o_wide"] {
        let slot = layout.get(name).unwrap();
        assert!(
            slot.offset + slot.size <= layout.output_bytes,
            "{name} at {} spills past the trace record",
            slot.offset
        );
    }
    for name in ["a", "internal", "wide_state"] {
        let slot = layout.get(name).unwrap();
        assert!(slot.offset >= layout.output_bytes, "{name} inside outputs");
    }
}

#[test]
fn entries_are_aligned_to_capped_power_of_two() {
    let compiled = compile_module(&sample_module()).expect("compile");
    for slot in compiled.layout.slots() {
        let align = slot.size.next_power_of_two().min(8);
        assert_eq!(
            slot.offset % align,
            0,
            "{} (size {}) misaligned at {}",
            slot.name,
            slot.size,
            slot.offset
        );
    }
}

#[test]
fn constants_land_after_mutable_state() {
    let compiled = compile_module(&sample_module()).expect("compile");
    let layout = &compiled.layout;
    let magic = layout.get("MAGIC").unwrap();
    assert!(magic.offset >= layout.const_offset);
    for name in ["o_narrow", "a", "internal"] {
        assert!(layout.get(name).unwrap().offset < layout.const_offset);
    }
}

#[test]
fn trailer_and_ring_follow_the_state() {
    let options = CompileOptions {
        trace_depth: 16,
        ..CompileOptions::default()
    };
    let compiled = compile_with(&sample_module(), &options).expect("compile");
    let layout = &compiled.layout;
    assert!(layout.trace_offset >= layout.state_bytes + 12);
    assert_eq!(layout.trace_offset % 8, 0);
    assert_eq!(
        layout.trace_end,
        layout.trace_offset + 16 * layout.output_bytes
    );
    assert!(u64::from(layout.pages) * 65536 >= u64::from(layout.trace_end));
}

#[test]
fn memory_cap_is_enforced() {
    let options = CompileOptions {
        max_memory_mb: 0,
        ..CompileOptions::default()
    };
    match compile_with(&sample_module(), &options) {
        Err(Error::MemoryLimitExceeded { cap: 0, .. }) => {}
        other => panic!("expected MemoryLimitExceeded, got {other:?}"),
    }
}

#[test]
fn odd_output_widths_still_pad_to_eight() {
    let module = ModuleBuilder::new("odd")
        .output("bit", 1)
        .output("nibble", 4)
        .block("_eval", vec![])
        .build();
    let compiled = compile_module(&module).expect("compile");
    assert!(compiled.layout.output_bytes >= 2);
    assert_eq!(compiled.layout.output_bytes % 8, 0);
}

#[test]
fn outputless_module_has_empty_trace_record() {
    let module = ModuleBuilder::new("sink")
        .input("a", 8)
        .block("_eval", vec![])
        .build();
    let compiled = compile_module(&module).expect("compile");
    assert_eq!(compiled.layout.output_bytes, 0);
}
