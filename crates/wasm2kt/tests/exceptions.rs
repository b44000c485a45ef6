//! Exception-handling translation tests.
//!
//! These build the module IR directly: the try/catch/delegate constructs are
//! validated through the writer without round-tripping through the text
//! format.

use wasm2kt::codegen::KotlinWriter;
use wasm2kt::ir::{
    CatchClause, Const, Expr, Func, Module, Signature, TagDef, TryKind, ValueType,
};
use wasm2kt::TranspileOptions;

fn base_module() -> Module {
    Module {
        types: vec![
            // Type 0: the tag payload (one i32).
            Signature {
                params: vec![ValueType::I32],
                results: vec![],
            },
            // Type 1: () -> i32.
            Signature {
                params: vec![],
                results: vec![ValueType::I32],
            },
            // Type 2: () -> ().
            Signature {
                params: vec![],
                results: vec![],
            },
        ],
        tags: vec![TagDef {
            name: "t0".to_string(),
            type_idx: 0,
        }],
        ..Module::default()
    }
}

fn kotlin_for(module: &Module) -> String {
    let options = TranspileOptions::default();
    KotlinWriter::new(module, &options)
        .write_module()
        .expect("translation succeeds")
}

#[test]
fn tag_declaration_and_throw() {
    let mut module = base_module();
    module.funcs.push(Func {
        name: "boom".to_string(),
        type_idx: 2,
        param_names: vec![],
        locals: vec![],
        body: vec![Expr::Const(Const::I32(42)), Expr::Throw { tag: 0 }],
    });

    let code = kotlin_for(&module);
    assert!(
        code.contains("private val w2k_t0: wasm_rt_impl.Tag<(Int) -> Unit> = wasm_rt_impl.Tag();"),
        "got:\n{code}"
    );
    assert!(
        code.contains("throw w2k_t0.newException() { it(42) };"),
        "got:\n{code}"
    );
}

#[test]
fn try_catch_dispatches_by_tag() {
    let mut module = base_module();
    module.funcs.push(Func {
        name: "catcher".to_string(),
        type_idx: 1,
        param_names: vec![],
        locals: vec![],
        body: vec![Expr::Try {
            label: "T0".to_string(),
            sig: Signature {
                params: vec![],
                results: vec![ValueType::I32],
            },
            body: vec![Expr::Const(Const::I32(5)), Expr::Throw { tag: 0 }],
            kind: TryKind::Catch {
                catches: vec![CatchClause {
                    tag: 0,
                    // The payload the binder put into the result slot is the
                    // try's result.
                    body: vec![],
                }],
                catch_all: None,
            },
        }],
    });

    let code = kotlin_for(&module);
    assert!(code.contains("w2k_T0@ do {"), "got:\n{code}");
    assert!(
        code.contains("var w2k_T0_ex: Exception? = null"),
        "got:\n{code}"
    );
    assert!(
        code.contains("} catch (e: wasm_rt_impl.DelegateException) {"),
        "got:\n{code}"
    );
    assert!(
        code.contains("if (e.level > 0) { e.level -= 1; throw e }"),
        "got:\n{code}"
    );
    assert!(code.contains("w2k_T0_ex = e.inner"), "got:\n{code}");
    assert!(
        code.contains("} catch (e: wasm_rt_impl.WasmTrapException) {"),
        "got:\n{code}"
    );
    assert!(code.contains("} catch (e: Exception) {"), "got:\n{code}");
    assert!(
        code.contains("if (w2k_t0.check(w2k_T0_ex!!) { w2k_x0 -> w2k_i0 = w2k_x0 }) {"),
        "got:\n{code}"
    );
    assert!(code.contains("break@w2k_T0;"), "got:\n{code}");
    assert!(code.contains("throw w2k_T0_ex!!;"), "got:\n{code}");
    assert!(code.contains("return w2k_i0;"), "got:\n{code}");
}

#[test]
fn catch_all_and_rethrow() {
    let mut module = base_module();
    module.funcs.push(Func {
        name: "again".to_string(),
        type_idx: 2,
        param_names: vec![],
        locals: vec![],
        body: vec![Expr::Try {
            label: "T0".to_string(),
            sig: Signature::default(),
            body: vec![Expr::Const(Const::I32(1)), Expr::Throw { tag: 0 }],
            kind: TryKind::Catch {
                catches: vec![],
                catch_all: Some(vec![Expr::Rethrow { depth: 0 }]),
            },
        }],
    });

    let code = kotlin_for(&module);
    assert!(code.contains("w2k_T0_ex = e"), "got:\n{code}");
    assert!(code.contains("throw w2k_T0_ex!!;"), "got:\n{code}");
    // No tag arms: the catch-all body must not sit inside a check.
    assert!(!code.contains(".check("), "got:\n{code}");
}

#[test]
fn delegate_wraps_with_countdown_sentinel() {
    let mut module = base_module();
    module.funcs.push(Func {
        name: "fwd".to_string(),
        type_idx: 2,
        param_names: vec![],
        locals: vec![],
        body: vec![Expr::Try {
            label: "T0".to_string(),
            sig: Signature::default(),
            body: vec![Expr::Try {
                label: "T1".to_string(),
                sig: Signature::default(),
                body: vec![Expr::Const(Const::I32(9)), Expr::Throw { tag: 0 }],
                kind: TryKind::Delegate { depth: 0 },
            }],
            kind: TryKind::Catch {
                catches: vec![],
                catch_all: Some(vec![]),
            },
        }],
    });

    let code = kotlin_for(&module);
    // The inner try targets the enclosing try directly: level 0.
    assert!(
        code.contains("throw wasm_rt_impl.DelegateException(0, e.inner);"),
        "got:\n{code}"
    );
    assert!(
        code.contains("throw wasm_rt_impl.DelegateException(0, e);"),
        "got:\n{code}"
    );
}

#[test]
fn function_level_delegate_counts_enclosing_handlers() {
    let mut module = base_module();
    module.funcs.push(Func {
        name: "escape".to_string(),
        type_idx: 2,
        param_names: vec![],
        locals: vec![],
        body: vec![Expr::Try {
            label: "T0".to_string(),
            sig: Signature::default(),
            body: vec![Expr::Try {
                label: "T1".to_string(),
                sig: Signature::default(),
                // Depth 1 skips past T0's label to the implicit function
                // label, so one enclosing handler must count down.
                body: vec![Expr::Const(Const::I32(3)), Expr::Throw { tag: 0 }],
                kind: TryKind::Delegate { depth: 1 },
            }],
            kind: TryKind::Catch {
                catches: vec![],
                catch_all: Some(vec![]),
            },
        }],
    });

    let code = kotlin_for(&module);
    assert!(
        code.contains("throw wasm_rt_impl.DelegateException(1, e);"),
        "got:\n{code}"
    );
}

#[test]
fn bare_try_degenerates_to_block() {
    let mut module = base_module();
    module.funcs.push(Func {
        name: "plain".to_string(),
        type_idx: 1,
        param_names: vec![],
        locals: vec![],
        body: vec![Expr::Try {
            label: "T0".to_string(),
            sig: Signature {
                params: vec![],
                results: vec![ValueType::I32],
            },
            body: vec![Expr::Const(Const::I32(11))],
            kind: TryKind::Catch {
                catches: vec![],
                catch_all: None,
            },
        }],
    });

    let code = kotlin_for(&module);
    assert!(!code.contains("catch (e:"), "got:\n{code}");
    assert!(code.contains("w2k_i0 = 11;"), "got:\n{code}");
}
