//! End-to-end translation tests: WAT in, Kotlin fragments out.

use wasm2kt::{transpile, Features, TranspileOptions};

fn kotlin_for(wat: &str) -> String {
    let wasm = wat::parse_str(wat).expect("wat assembles");
    transpile(&wasm, &TranspileOptions::default()).expect("translation succeeds")
}

fn kotlin_with(wat: &str, options: &TranspileOptions) -> String {
    let wasm = wat::parse_str(wat).expect("wat assembles");
    transpile(&wasm, options).expect("translation succeeds")
}

/// Collect every identifier of the stack-variable shape (`w2k_` + type char +
/// digits) appearing in the code.
fn stack_var_tokens(code: &str) -> Vec<String> {
    let mut out = std::collections::BTreeSet::new();
    let bytes = code.as_bytes();
    let mut i = 0;
    while let Some(pos) = code[i..].find("w2k_") {
        let start = i + pos;
        let mut end = start + 4;
        while end < bytes.len()
            && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
        {
            end += 1;
        }
        let token = &code[start..end];
        let tail = &token[4..];
        let mut chars = tail.chars();
        if matches!(chars.next(), Some('i' | 'j' | 'f' | 'd'))
            && chars.clone().next().is_some()
            && chars.all(|c| c.is_ascii_digit())
        {
            out.insert(token.to_string());
        }
        i = end;
    }
    out.into_iter().collect()
}

// ─── Characteristic output shapes ───────────────────────────────────────────

#[test]
fn constant_return_is_folded() {
    let code = kotlin_for("(module (func (result i32) i32.const -1))");
    assert!(code.contains("return (-1);"), "got:\n{code}");
}

#[test]
fn add_of_locals_folds_into_return() {
    let code = kotlin_for(
        "(module (func (param i32) (result i32) local.get 0 local.get 0 i32.add))",
    );
    assert!(code.contains("return (w2k_p0 + w2k_p0);"), "got:\n{code}");
}

#[test]
fn nan_payload_survives_via_from_bits() {
    let code = kotlin_for("(module (func (result f32) f32.const nan:0x400000))");
    assert!(
        code.contains("Float.fromBits(2143289344) /* nan:0x400000 */"),
        "got:\n{code}"
    );
}

#[test]
fn block_with_br_if_lands_result_in_slot() {
    let code = kotlin_for(
        r#"
        (module
            (func (param i32) (result i32)
                block (result i32)
                    local.get 0
                    local.get 0
                    i32.eqz
                    br_if 0
                    drop
                    i32.const 7
                end
            )
        )
    "#,
    );
    assert!(code.contains("w2k_B0@ do {"), "got:\n{code}");
    assert!(code.contains("} while (false);"), "got:\n{code}");
    assert!(code.contains("break@w2k_B0;"), "got:\n{code}");
    assert!(code.contains("if (w2k_p0.isz().inz())"), "got:\n{code}");
    assert!(code.contains("w2k_i0 = 7;"), "got:\n{code}");
    assert!(code.contains("return w2k_i0;"), "got:\n{code}");
}

#[test]
fn signed_division_goes_through_helper() {
    let code = kotlin_for(
        "(module (func (param i32 i32) (result i32) local.get 0 local.get 1 i32.div_s))",
    );
    assert!(
        code.contains("wasm_rt_impl.I32_DIV_S(w2k_p0, w2k_p1)"),
        "got:\n{code}"
    );
}

#[test]
fn call_indirect_goes_through_adapter() {
    let code = kotlin_for(
        r#"
        (module
            (type $t (func (param i32) (result i32)))
            (table 2 funcref)
            (func $f (param i32) (result i32) local.get 0)
            (elem (i32.const 0) $f)
            (func (param i32) (result i32)
                local.get 0
                i32.const 0
                call_indirect (type $t)
            )
        )
    "#,
    );
    assert!(
        code.contains("CALL_INDIRECT_0(w2k_T0, w2k_p0, 0)"),
        "got:\n{code}"
    );
    assert!(
        code.contains(
            "private fun CALL_INDIRECT_0(table: wasm_rt_impl.Table, p0: Int, index: Int): Int {"
        ),
        "got:\n{code}"
    );
    assert!(
        code.contains(
            "return wasm_rt_impl.CALL_INDIRECT<(Int) -> Int>(table, func_types[0], index)(p0)"
        ),
        "got:\n{code}"
    );
}

// ─── Control flow ───────────────────────────────────────────────────────────

#[test]
fn loop_emits_continue_for_back_edge() {
    let code = kotlin_for(
        r#"
        (module
            (func (param i32)
                loop
                    local.get 0
                    br_if 0
                end
            )
        )
    "#,
    );
    assert!(code.contains("w2k_L0@ while (true) {"), "got:\n{code}");
    assert!(
        code.contains("if (w2k_p0.inz()) { continue@w2k_L0; }"),
        "got:\n{code}"
    );
    assert!(code.contains("break;"), "got:\n{code}");
}

#[test]
fn unused_label_decoration_is_dropped() {
    let code = kotlin_for(
        r#"
        (module
            (func (result i32)
                block (result i32)
                    i32.const 3
                end
            )
        )
    "#,
    );
    // No branch targets the block, so the label text must not appear.
    assert!(!code.contains("w2k_B0@"), "got:\n{code}");
    assert!(code.contains("do {"), "got:\n{code}");
}

#[test]
fn if_else_shape() {
    let code = kotlin_for(
        r#"
        (module
            (func (param i32) (result i32)
                local.get 0
                if (result i32)
                    i32.const 1
                else
                    i32.const 2
                end
            )
        )
    "#,
    );
    assert!(code.contains("if (w2k_p0.inz()) {"), "got:\n{code}");
    assert!(code.contains("} else {"), "got:\n{code}");
    assert!(code.contains("w2k_i0 = 1;"), "got:\n{code}");
    assert!(code.contains("w2k_i0 = 2;"), "got:\n{code}");
}

#[test]
fn br_table_groups_duplicate_targets() {
    let code = kotlin_for(
        r#"
        (module
            (func (param i32) (result i32)
                block
                    block
                        local.get 0
                        br_table 0 1 0 1 1
                    end
                    i32.const 10
                    return
                end
                i32.const 20
            )
        )
    "#,
    );
    assert!(code.contains("when (w2k_p0) {"), "got:\n{code}");
    assert!(code.contains("0, 2 -> { break@w2k_B1; }"), "got:\n{code}");
    assert!(code.contains("1, 3 -> { break@w2k_B0; }"), "got:\n{code}");
    assert!(code.contains("else -> { break@w2k_B0; }"), "got:\n{code}");
}

#[test]
fn return_mid_function_is_folded() {
    let code = kotlin_for(
        r#"
        (module
            (func (param i32) (result i32)
                local.get 0
                if
                    i32.const 5
                    return
                end
                i32.const 9
            )
        )
    "#,
    );
    assert!(code.contains("return 5;"), "got:\n{code}");
    assert!(code.contains("return 9;"), "got:\n{code}");
}

#[test]
fn unreachable_throws() {
    let code = kotlin_for("(module (func unreachable))");
    assert!(
        code.contains("throw wasm_rt_impl.UnreachableException(\"unreachable\");"),
        "got:\n{code}"
    );
}

// ─── Expressions ────────────────────────────────────────────────────────────

#[test]
fn local_tee_uses_also() {
    let code = kotlin_for(
        r#"
        (module
            (func (param i32) (result i32)
                (local $x i32)
                local.get 0
                local.tee $x
            )
        )
    "#,
    );
    assert!(
        code.contains("return w2k_p0.also { w2k_x = it };"),
        "got:\n{code}"
    );
}

#[test]
fn comparison_debooleanizes() {
    let code = kotlin_for(
        "(module (func (param i32 i32) (result i32) local.get 0 local.get 1 i32.lt_s))",
    );
    assert!(
        code.contains("return (w2k_p0 < w2k_p1).btoInt();"),
        "got:\n{code}"
    );
}

#[test]
fn unsigned_comparison_uses_compare_unsigned() {
    let code = kotlin_for(
        "(module (func (param i64 i64) (result i32) local.get 0 local.get 1 i64.gt_u))",
    );
    assert!(
        code.contains("(java.lang.Long.compareUnsigned(w2k_p0, w2k_p1) > 0).btoInt()"),
        "got:\n{code}"
    );
}

#[test]
fn extend_unsigned_masks() {
    let code = kotlin_for(
        "(module (func (param i32) (result i64) local.get 0 i64.extend_i32_u))",
    );
    assert!(
        code.contains("return (w2k_p0.toLong() and 0xFFFFFFFFL);"),
        "got:\n{code}"
    );
}

#[test]
fn precedence_parenthesizes_nested_arithmetic() {
    // (a + b) * c must keep its parens; a + b * c must not gain any.
    let code = kotlin_for(
        r#"
        (module
            (func (param i32 i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add
                local.get 2
                i32.mul
            )
            (func (param i32 i32 i32) (result i32)
                local.get 0
                local.get 1
                local.get 2
                i32.mul
                i32.add
            )
        )
    "#,
    );
    assert!(
        code.contains("return ((w2k_p0 + w2k_p1) * w2k_p2);"),
        "got:\n{code}"
    );
    assert!(
        code.contains("return (w2k_p0 + w2k_p1 * w2k_p2);"),
        "got:\n{code}"
    );
}

#[test]
fn loads_and_stores_go_through_memory_methods() {
    let code = kotlin_for(
        r#"
        (module
            (memory 1)
            (func (param i32) (result i32)
                local.get 0
                i32.load offset=4
            )
            (func (param i32 i64)
                local.get 0
                local.get 1
                i64.store16
            )
        )
    "#,
    );
    assert!(
        code.contains("return w2k_M0.i32_load(w2k_p0, 4);"),
        "got:\n{code}"
    );
    assert!(
        code.contains("w2k_M0.i64_store16(w2k_p0, w2k_p1);"),
        "got:\n{code}"
    );
}

#[test]
fn memory_size_and_grow() {
    let code = kotlin_for(
        r#"
        (module
            (memory 1 4)
            (func (result i32) memory.size)
            (func (param i32) (result i32) local.get 0 memory.grow)
        )
    "#,
    );
    assert!(code.contains("return w2k_M0.pages;"), "got:\n{code}");
    assert!(
        code.contains("return w2k_M0.resize(w2k_p0);"),
        "got:\n{code}"
    );
}

#[test]
fn select_preserves_operand_order() {
    let code = kotlin_for(
        r#"
        (module
            (func (param i32 i32 i32) (result i32)
                local.get 0
                local.get 1
                local.get 2
                select
            )
        )
    "#,
    );
    assert!(
        code.contains("return wasm_rt_impl.select(w2k_p0, w2k_p1, w2k_p2);"),
        "got:\n{code}"
    );
}

#[test]
fn calls_spill_pending_values_in_order() {
    let code = kotlin_for(
        r#"
        (module
            (func $g (result i32) i32.const 1)
            (func (result i32)
                call $g
                call $g
                i32.add
            )
        )
    "#,
    );
    // The first call's result must materialize before the second call runs.
    let spill = code.find("w2k_i0 = w2k_g();").expect("first call spills");
    let fold = code
        .find("return (w2k_i0 + w2k_g());")
        .expect("second call folds into the add");
    assert!(spill < fold, "got:\n{code}");
}

#[test]
fn imported_function_call() {
    let code = kotlin_for(
        r#"
        (module
            (import "env" "log" (func $log (param i32)))
            (func (export "run") (param i32)
                local.get 0
                call $log
            )
        )
    "#,
    );
    assert!(code.contains("w2k_Z_logZ_vi(w2k_p0);"), "got:\n{code}");
    assert!(
        code.contains("moduleRegistry.exportFunc(name, \"Z_runZ_vi\", this@Wasm::w2k_f1);"),
        "got:\n{code}"
    );
}

// ─── Multi-value ────────────────────────────────────────────────────────────

#[test]
fn multi_result_function_uses_continuation() {
    let code = kotlin_for(
        r#"
        (module
            (func $pair (result i32 i64)
                i32.const 1
                i64.const 2
            )
            (func (result i64)
                (local i64)
                call $pair
                local.set 0
                drop
                local.get 0
            )
        )
    "#,
    );
    // Callee: continuation parameter and a continuation invocation on return.
    assert!(
        code.contains("private fun w2k_pair(w2k_k: (Long) -> Unit): Int {"),
        "got:\n{code}"
    );
    assert!(code.contains("w2k_k(w2k_j1); return w2k_i0;"), "got:\n{code}");
    // Caller: trailing lambda binding the extra result into its slot.
    assert!(
        code.contains("w2k_i0 = w2k_pair() { w2k_mv1 -> w2k_j1 = w2k_mv1 };"),
        "got:\n{code}"
    );
}

// ─── Bulk memory ────────────────────────────────────────────────────────────

#[test]
fn bulk_memory_operations() {
    let mut options = TranspileOptions::default();
    options.features = Features {
        bulk_memory: true,
        ..Features::default()
    };
    let code = kotlin_with(
        r#"
        (module
            (memory 1)
            (data $seg "abcdef")
            (func (param i32 i32 i32)
                local.get 0
                local.get 1
                local.get 2
                memory.copy
                local.get 0
                local.get 1
                local.get 2
                memory.fill
                local.get 0
                local.get 1
                local.get 2
                memory.init $seg
                data.drop $seg
            )
        )
    "#,
        &options,
    );
    assert!(
        code.contains("w2k_M0.copy_from(w2k_M0, w2k_p0, w2k_p1, w2k_p2);"),
        "got:\n{code}"
    );
    assert!(
        code.contains("w2k_M0.fill(w2k_p0, w2k_p1, w2k_p2);"),
        "got:\n{code}"
    );
    assert!(
        code.contains(
            "w2k_M0.memory_init(wasm_rt_impl.loadb64(data_segment_data_0), w2k_p0, w2k_p1, w2k_p2);"
        ),
        "got:\n{code}"
    );
    assert!(code.contains("data_segment_data_0 = \"\";"), "got:\n{code}");
    assert!(
        code.contains("private var data_segment_data_0: String = \"YWJjZGVm\";"),
        "got:\n{code}"
    );
}

// ─── Failure semantics ──────────────────────────────────────────────────────

#[test]
fn simd_is_fatal() {
    let wasm = wat::parse_str(
        r#"
        (module
            (memory 1)
            (func (param v128) (result v128) local.get 0)
        )
    "#,
    );
    if let Ok(bytes) = wasm {
        let err = transpile(&bytes, &TranspileOptions::default());
        assert!(err.is_err());
    }
}

#[test]
fn table_get_is_fatal() {
    let mut options = TranspileOptions::default();
    options.features = Features {
        bulk_memory: true,
        ..Features::default()
    };
    let wasm = wat::parse_str(
        r#"
        (module
            (table 1 funcref)
            (func (param i32) (result funcref)
                local.get 0
                table.get 0
            )
        )
    "#,
    );
    if let Ok(bytes) = wasm {
        assert!(transpile(&bytes, &options).is_err());
    }
}

// ─── Output hygiene ─────────────────────────────────────────────────────────

#[test]
fn spill_is_idempotent_no_self_assignments() {
    let code = kotlin_for(
        r#"
        (module
            (func (param i32) (result i32)
                block (result i32)
                    block (result i32)
                        local.get 0
                    end
                end
            )
        )
    "#,
    );
    for token in stack_var_tokens(&code) {
        let self_assign = format!("{token} = {token};");
        assert!(
            !code.contains(&self_assign),
            "self assignment {self_assign} in:\n{code}"
        );
    }
}

#[test]
fn all_stack_variables_are_declared() {
    // The function carries a debug name so its symbol does not collide with
    // the stack-variable token shape.
    let code = kotlin_for(
        r#"
        (module
            (memory 1)
            (func $check (param i32 i32) (result i32)
                block (result i32)
                    local.get 0
                    local.get 1
                    i32.add
                    local.get 0
                    i32.eqz
                    br_if 0
                    drop
                    local.get 0
                    i32.load
                end
            )
        )
    "#,
    );
    for token in stack_var_tokens(&code) {
        let decl = format!("var {token}: ");
        assert!(code.contains(&decl), "undeclared {token} in:\n{code}");
    }
}

#[test]
fn debug_names_can_be_disabled() {
    let wat = r#"
        (module
            (func $square (param $n i32) (result i32)
                local.get $n local.get $n i32.mul)
        )
    "#;
    let named = kotlin_for(wat);
    assert!(named.contains("w2k_square"));
    assert!(named.contains("w2k_n"));

    let mut options = TranspileOptions::default();
    options.read_debug_names = false;
    let plain = kotlin_with(wat, &options);
    assert!(plain.contains("w2k_f0"));
    assert!(plain.contains("w2k_p0"));
}

#[test]
fn package_and_class_options() {
    let wat = "(module)";
    let options = TranspileOptions {
        class_name: "Fib".to_string(),
        package_name: Some("com.example.gen".to_string()),
        ..TranspileOptions::default()
    };
    let code = kotlin_with(wat, &options);
    assert!(code.starts_with("package com.example.gen\n"));
    assert!(code.contains(
        "class Fib (moduleRegistry: wasm_rt_impl.ModuleRegistry, name: String) {"
    ));
}

#[test]
fn exhaustion_guard_wraps_every_body() {
    let code = kotlin_for("(module (func) (func (result i32) i32.const 0))");
    let guards = code
        .matches("catch(e: StackOverflowError) { throw wasm_rt_impl.ExhaustionException(null, e) }")
        .count();
    assert_eq!(guards, 2, "got:\n{code}");
}
